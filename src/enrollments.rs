//! Course rosters. An enrollment row is unique per (student, course); dropping
//! a course only clears the active flag so that re-enrolling reuses the row.

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashSet;
use tracing::info;
use uuid::Uuid;

use crate::authz::{self, Action, Actor};
use crate::courses;
use crate::error::{CoreError, CoreResult};
use crate::model::{now_timestamp, Course, Enrollment, User, ENROLLMENT_COLUMNS, USER_COLUMNS};
use crate::users;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub enrollment_id: String,
    pub student_id: String,
    pub student_name: String,
    pub student_email: String,
    pub enrolled_at: String,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollStatus {
    Enrolled,
    Reactivated,
    AlreadyEnrolled,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollOutcome {
    pub enrollment: Enrollment,
    pub status: EnrollStatus,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkEnrollReport {
    pub course_id: String,
    pub enrolled: Vec<String>,
    pub reactivated: Vec<String>,
    pub already_enrolled: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManageView {
    pub course: Course,
    pub enrollments: Vec<RosterEntry>,
    /// Students without an active enrollment in the course.
    pub available_students: Vec<User>,
}

pub fn find_enrollment(
    conn: &Connection,
    course_id: &str,
    student_id: &str,
) -> CoreResult<Option<Enrollment>> {
    let sql = format!(
        "SELECT {} FROM enrollments WHERE course_id = ? AND student_id = ?",
        ENROLLMENT_COLUMNS
    );
    Ok(conn
        .query_row(&sql, (course_id, student_id), Enrollment::from_row)
        .optional()?)
}

pub fn has_active_enrollment(
    conn: &Connection,
    course_id: &str,
    student_id: &str,
) -> CoreResult<bool> {
    Ok(find_enrollment(conn, course_id, student_id)?.is_some_and(|e| e.active))
}

/// Active enrollments of a course, ordered by student name.
pub fn list_active_enrollments(conn: &Connection, course_id: &str) -> CoreResult<Vec<Enrollment>> {
    let mut stmt = conn.prepare(
        "SELECT e.id, e.student_id, e.course_id, e.enrolled_at, e.active
         FROM enrollments e
         JOIN users u ON u.id = e.student_id
         WHERE e.course_id = ? AND e.active = 1
         ORDER BY u.full_name COLLATE NOCASE, u.email",
    )?;
    let rows = stmt
        .query_map([course_id], Enrollment::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Every enrollment row of a course, active ones first.
pub fn course_roster(conn: &Connection, course_id: &str) -> CoreResult<Vec<RosterEntry>> {
    let mut stmt = conn.prepare(
        "SELECT e.id, u.id, u.full_name, u.email, e.enrolled_at, e.active
         FROM enrollments e
         JOIN users u ON u.id = e.student_id
         WHERE e.course_id = ?
         ORDER BY e.active DESC, u.full_name COLLATE NOCASE, u.email",
    )?;
    let rows = stmt
        .query_map([course_id], |r| {
            Ok(RosterEntry {
                enrollment_id: r.get(0)?,
                student_id: r.get(1)?,
                student_name: r.get(2)?,
                student_email: r.get(3)?,
                enrolled_at: r.get(4)?,
                active: r.get::<_, i64>(5)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn manage_view(conn: &Connection, actor: &Actor, course_id: &str) -> CoreResult<ManageView> {
    let course = courses::require_course(conn, course_id)?;
    authz::authorize(actor, Action::ManageEnrollments, Some(&course))?;

    let enrollments = course_roster(conn, &course.id)?;
    let sql = format!(
        "SELECT {} FROM users u
         WHERE u.role = 'student'
           AND NOT EXISTS (
             SELECT 1 FROM enrollments e
             WHERE e.student_id = u.id AND e.course_id = ? AND e.active = 1
           )
         ORDER BY u.full_name COLLATE NOCASE, u.email",
        USER_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let available_students = stmt
        .query_map([&course.id], User::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ManageView {
        course,
        enrollments,
        available_students,
    })
}

/// Makes (course, student) active, inserting or reactivating the row.
fn activate(conn: &Connection, course_id: &str, student_id: &str) -> CoreResult<EnrollOutcome> {
    match find_enrollment(conn, course_id, student_id)? {
        Some(e) if e.active => Ok(EnrollOutcome {
            enrollment: e,
            status: EnrollStatus::AlreadyEnrolled,
        }),
        Some(mut e) => {
            e.active = true;
            e.enrolled_at = now_timestamp();
            conn.execute(
                "UPDATE enrollments SET active = 1, enrolled_at = ? WHERE id = ?",
                (&e.enrolled_at, &e.id),
            )?;
            Ok(EnrollOutcome {
                enrollment: e,
                status: EnrollStatus::Reactivated,
            })
        }
        None => {
            let e = Enrollment {
                id: Uuid::new_v4().to_string(),
                student_id: student_id.to_string(),
                course_id: course_id.to_string(),
                enrolled_at: now_timestamp(),
                active: true,
            };
            conn.execute(
                "INSERT INTO enrollments(id, student_id, course_id, enrolled_at, active)
                 VALUES(?, ?, ?, ?, 1)",
                (&e.id, &e.student_id, &e.course_id, &e.enrolled_at),
            )?;
            Ok(EnrollOutcome {
                enrollment: e,
                status: EnrollStatus::Enrolled,
            })
        }
    }
}

pub fn enroll_student(
    conn: &Connection,
    actor: &Actor,
    course_id: &str,
    student_id: &str,
) -> CoreResult<EnrollOutcome> {
    let course = courses::require_course(conn, course_id)?;
    authz::authorize(actor, Action::ManageEnrollments, Some(&course))?;
    users::require_student(conn, student_id)?;

    let outcome = activate(conn, &course.id, student_id)?;
    if outcome.status == EnrollStatus::AlreadyEnrolled {
        return Err(CoreError::Conflict(
            "student is already enrolled in this course".to_string(),
        ));
    }
    info!(course = %course.code, student_id, status = ?outcome.status, "student enrolled");
    Ok(outcome)
}

/// Enrolls several students at once. Repeated ids are collapsed and students
/// who are already active are reported rather than rejected.
pub fn bulk_enroll(
    conn: &Connection,
    actor: &Actor,
    course_id: &str,
    student_ids: &[String],
) -> CoreResult<BulkEnrollReport> {
    let course = courses::require_course(conn, course_id)?;
    authz::authorize(actor, Action::ManageEnrollments, Some(&course))?;

    let mut seen = HashSet::new();
    let unique: Vec<&str> = student_ids
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty() && seen.insert(*s))
        .collect();
    if unique.is_empty() {
        return Err(CoreError::validation("no students selected"));
    }

    let tx = conn.unchecked_transaction()?;
    let mut report = BulkEnrollReport {
        course_id: course.id.clone(),
        ..Default::default()
    };
    for student_id in unique {
        users::require_student(&tx, student_id)?;
        let outcome = activate(&tx, &course.id, student_id)?;
        let bucket = match outcome.status {
            EnrollStatus::Enrolled => &mut report.enrolled,
            EnrollStatus::Reactivated => &mut report.reactivated,
            EnrollStatus::AlreadyEnrolled => &mut report.already_enrolled,
        };
        bucket.push(student_id.to_string());
    }
    tx.commit()?;

    info!(
        course = %course.code,
        enrolled = report.enrolled.len(),
        reactivated = report.reactivated.len(),
        already_enrolled = report.already_enrolled.len(),
        "bulk enrollment committed"
    );
    Ok(report)
}

/// Deletes the enrollment row. Attendance records already taken are kept.
pub fn remove_enrollment(
    conn: &Connection,
    actor: &Actor,
    enrollment_id: &str,
) -> CoreResult<Enrollment> {
    let sql = format!("SELECT {} FROM enrollments WHERE id = ?", ENROLLMENT_COLUMNS);
    let enrollment = conn
        .query_row(&sql, [enrollment_id], Enrollment::from_row)
        .optional()?
        .ok_or(CoreError::NotFound("enrollment"))?;
    let course = courses::require_course(conn, &enrollment.course_id)?;
    authz::authorize(actor, Action::ManageEnrollments, Some(&course))?;

    conn.execute("DELETE FROM enrollments WHERE id = ?", [&enrollment.id])?;
    info!(
        course = %course.code,
        student_id = %enrollment.student_id,
        "enrollment removed"
    );
    Ok(enrollment)
}

pub fn self_enroll(conn: &Connection, actor: &Actor, course_id: &str) -> CoreResult<EnrollOutcome> {
    let course = courses::require_course(conn, course_id)?;
    authz::authorize(actor, Action::SelfEnroll, Some(&course))?;
    users::require_student(conn, actor.id())?;

    let outcome = activate(conn, &course.id, actor.id())?;
    if outcome.status == EnrollStatus::AlreadyEnrolled {
        return Err(CoreError::Conflict(
            "you are already enrolled in this course".to_string(),
        ));
    }
    info!(
        course = %course.code,
        student_id = actor.id(),
        status = ?outcome.status,
        "student self-enrolled"
    );
    Ok(outcome)
}

/// Clears the active flag; the row stays so a later enroll reactivates it.
pub fn self_drop(conn: &Connection, actor: &Actor, course_id: &str) -> CoreResult<Enrollment> {
    let course = courses::require_course(conn, course_id)?;
    authz::authorize(actor, Action::SelfDrop, Some(&course))?;

    let mut enrollment = find_enrollment(conn, &course.id, actor.id())?
        .filter(|e| e.active)
        .ok_or(CoreError::NotFound("enrollment"))?;
    conn.execute(
        "UPDATE enrollments SET active = 0 WHERE id = ?",
        [&enrollment.id],
    )?;
    enrollment.active = false;
    info!(course = %course.code, student_id = actor.id(), "student dropped course");
    Ok(enrollment)
}
