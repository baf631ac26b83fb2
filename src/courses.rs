use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::authz::{self, Action, Actor};
use crate::enrollments::{self, RosterEntry};
use crate::error::{CoreError, CoreResult};
use crate::model::{now_timestamp, Course, Role, COURSE_COLUMNS};

const MAX_NAME_LEN: usize = 100;
const MAX_CODE_LEN: usize = 20;
const MAX_DESCRIPTION_LEN: usize = 500;

/// Editable course fields, shared by create and update.
#[derive(Debug, Clone, Default)]
pub struct CourseInput {
    pub name: String,
    pub code: String,
    pub description: Option<String>,
    pub credit_hours: i64,
    pub teacher_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseListItem {
    #[serde(flatten)]
    pub course: Course,
    pub teacher_name: Option<String>,
    pub active_students: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseDetail {
    #[serde(flatten)]
    pub course: Course,
    pub teacher_name: Option<String>,
    pub enrollments: Vec<RosterEntry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseDeleted {
    pub course_id: String,
    pub enrollments_removed: usize,
    pub records_removed: usize,
}

pub fn find_course(conn: &Connection, course_id: &str) -> CoreResult<Option<Course>> {
    let sql = format!("SELECT {} FROM courses WHERE id = ?", COURSE_COLUMNS);
    Ok(conn.query_row(&sql, [course_id], Course::from_row).optional()?)
}

pub fn require_course(conn: &Connection, course_id: &str) -> CoreResult<Course> {
    find_course(conn, course_id)?.ok_or(CoreError::NotFound("course"))
}

/// Courses visible to the actor: everything for admins, owned courses for
/// teachers, and the catalog of courses not actively enrolled for students.
pub fn list_courses(conn: &Connection, actor: &Actor) -> CoreResult<Vec<CourseListItem>> {
    authz::authorize(actor, Action::BrowseCourses, None)?;
    let base = "SELECT c.id, c.name, c.code, c.description, c.credit_hours, c.teacher_id,
                  c.created_at, t.full_name,
                  (SELECT COUNT(*) FROM enrollments e
                   WHERE e.course_id = c.id AND e.active = 1) AS active_students
                FROM courses c
                LEFT JOIN users t ON t.id = c.teacher_id";
    let (filter, key) = match actor {
        Actor::Admin { .. } => ("", None),
        Actor::Teacher { id, .. } => (" WHERE c.teacher_id = ?", Some(id.as_str())),
        Actor::Student { id, .. } => (
            " WHERE NOT EXISTS (
                SELECT 1 FROM enrollments e
                WHERE e.course_id = c.id AND e.student_id = ? AND e.active = 1
              )",
            Some(id.as_str()),
        ),
    };
    let sql = format!("{}{} ORDER BY c.code COLLATE NOCASE", base, filter);

    let mut stmt = conn.prepare(&sql)?;
    let rows = match key {
        Some(k) => stmt
            .query_map([k], list_item_from_row)?
            .collect::<Result<Vec<_>, _>>()?,
        None => stmt
            .query_map([], list_item_from_row)?
            .collect::<Result<Vec<_>, _>>()?,
    };
    Ok(rows)
}

fn list_item_from_row(r: &Row<'_>) -> rusqlite::Result<CourseListItem> {
    Ok(CourseListItem {
        course: Course::from_row(r)?,
        teacher_name: r.get(7)?,
        active_students: r.get(8)?,
    })
}

pub fn get_course(conn: &Connection, actor: &Actor, course_id: &str) -> CoreResult<CourseDetail> {
    let course = require_course(conn, course_id)?;
    authz::authorize(actor, Action::ViewCourse, Some(&course))?;
    let teacher_name = teacher_name(conn, &course)?;
    let enrollments = enrollments::course_roster(conn, &course.id)?;
    Ok(CourseDetail {
        course,
        teacher_name,
        enrollments,
    })
}

pub fn create_course(conn: &Connection, actor: &Actor, input: CourseInput) -> CoreResult<Course> {
    authz::authorize(actor, Action::ManageCourses, None)?;
    let input = validate_input(conn, input, None)?;

    let course = Course {
        id: Uuid::new_v4().to_string(),
        name: input.name,
        code: input.code,
        description: input.description,
        credit_hours: input.credit_hours,
        teacher_id: input.teacher_id,
        created_at: now_timestamp(),
    };
    conn.execute(
        "INSERT INTO courses(id, name, code, description, credit_hours, teacher_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &course.id,
            &course.name,
            &course.code,
            &course.description,
            course.credit_hours,
            &course.teacher_id,
            &course.created_at,
        ),
    )?;
    info!(code = %course.code, course_id = %course.id, "course created");
    Ok(course)
}

/// Replaces the editable fields. `created_at` keeps its original value.
pub fn update_course(
    conn: &Connection,
    actor: &Actor,
    course_id: &str,
    input: CourseInput,
) -> CoreResult<Course> {
    authz::authorize(actor, Action::ManageCourses, None)?;
    let mut course = require_course(conn, course_id)?;
    let input = validate_input(conn, input, Some(course.id.as_str()))?;

    course.name = input.name;
    course.code = input.code;
    course.description = input.description;
    course.credit_hours = input.credit_hours;
    course.teacher_id = input.teacher_id;
    conn.execute(
        "UPDATE courses
         SET name = ?, code = ?, description = ?, credit_hours = ?, teacher_id = ?
         WHERE id = ?",
        (
            &course.name,
            &course.code,
            &course.description,
            course.credit_hours,
            &course.teacher_id,
            &course.id,
        ),
    )?;
    info!(code = %course.code, course_id = %course.id, "course updated");
    Ok(course)
}

/// Removes the course together with its enrollments and attendance records.
pub fn delete_course(
    conn: &Connection,
    actor: &Actor,
    course_id: &str,
) -> CoreResult<CourseDeleted> {
    authz::authorize(actor, Action::ManageCourses, None)?;
    let course = require_course(conn, course_id)?;

    let tx = conn.unchecked_transaction()?;
    // Dependents first; the schema declares no ON DELETE CASCADE.
    let records_removed = tx.execute(
        "DELETE FROM attendance_records WHERE course_id = ?",
        [&course.id],
    )?;
    let enrollments_removed =
        tx.execute("DELETE FROM enrollments WHERE course_id = ?", [&course.id])?;
    tx.execute("DELETE FROM courses WHERE id = ?", [&course.id])?;
    tx.commit()?;

    info!(
        code = %course.code,
        enrollments_removed,
        records_removed,
        "course deleted"
    );
    Ok(CourseDeleted {
        course_id: course.id,
        enrollments_removed,
        records_removed,
    })
}

fn teacher_name(conn: &Connection, course: &Course) -> CoreResult<Option<String>> {
    let Some(teacher_id) = course.teacher_id.as_deref() else {
        return Ok(None);
    };
    Ok(conn
        .query_row(
            "SELECT full_name FROM users WHERE id = ?",
            [teacher_id],
            |r| r.get(0),
        )
        .optional()?)
}

fn validate_input(
    conn: &Connection,
    input: CourseInput,
    existing_id: Option<&str>,
) -> CoreResult<CourseInput> {
    let name = input.name.trim().to_string();
    let code = input.code.trim().to_string();
    if name.is_empty() {
        return Err(CoreError::validation("name must not be empty"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(CoreError::validation(format!(
            "name must be at most {} characters",
            MAX_NAME_LEN
        )));
    }
    if code.is_empty() {
        return Err(CoreError::validation("code must not be empty"));
    }
    if code.chars().count() > MAX_CODE_LEN {
        return Err(CoreError::validation(format!(
            "code must be at most {} characters",
            MAX_CODE_LEN
        )));
    }
    let description = input
        .description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());
    if description
        .as_ref()
        .is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LEN)
    {
        return Err(CoreError::validation(format!(
            "description must be at most {} characters",
            MAX_DESCRIPTION_LEN
        )));
    }
    if input.credit_hours < 0 {
        return Err(CoreError::validation("creditHours must not be negative"));
    }
    let teacher_id = input
        .teacher_id
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    if let Some(t) = teacher_id.as_deref() {
        let role: Option<String> = conn
            .query_row("SELECT role FROM users WHERE id = ?", [t], |r| r.get(0))
            .optional()?;
        let Some(role) = role else {
            return Err(CoreError::NotFound("teacher"));
        };
        if role.parse::<Role>()? != Role::Teacher {
            return Err(CoreError::validation(format!("user {} is not a teacher", t)));
        }
    }

    let clash: Option<String> = conn
        .query_row(
            "SELECT id FROM courses WHERE code = ? COLLATE NOCASE AND id != ?",
            (&code, existing_id.unwrap_or("")),
            |r| r.get(0),
        )
        .optional()?;
    if clash.is_some() {
        return Err(CoreError::Conflict(format!(
            "course code {} is already in use",
            code
        )));
    }

    Ok(CourseInput {
        name,
        code,
        description,
        credit_hours: input.credit_hours,
        teacher_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AttendanceStatus;
    use crate::testutil::{add_course, Fixture};

    fn input(code: &str, teacher: Option<&str>) -> CourseInput {
        CourseInput {
            name: "Operating Systems".to_string(),
            code: code.to_string(),
            description: Some("  kernels and schedulers ".to_string()),
            credit_hours: 4,
            teacher_id: teacher.map(str::to_string),
        }
    }

    #[test]
    fn only_admins_manage_courses() {
        let f = Fixture::new();
        let e = create_course(&f.conn, &f.teacher_actor(), input("OS200", None)).unwrap_err();
        assert_eq!(e.code(), "forbidden");

        let c = create_course(&f.conn, &f.admin_actor(), input("OS200", Some(f.teacher.as_str())))
            .expect("create");
        assert_eq!(c.description.as_deref(), Some("kernels and schedulers"));
        assert_eq!(c.teacher_id.as_deref(), Some(f.teacher.as_str()));
    }

    #[test]
    fn course_codes_are_unique_ignoring_case() {
        let f = Fixture::new();
        let admin = f.admin_actor();
        let e = create_course(&f.conn, &admin, input("cs301", None)).unwrap_err();
        assert_eq!(e.code(), "conflict");

        let other = create_course(&f.conn, &admin, input("OS200", None)).expect("create");
        let e = update_course(&f.conn, &admin, &other.id, input("CS301", None)).unwrap_err();
        assert_eq!(e.code(), "conflict");

        // Keeping its own code is not a clash.
        let same = update_course(&f.conn, &admin, &other.id, input("OS200", None))
            .expect("update with same code");
        assert_eq!(same.created_at, other.created_at);
    }

    #[test]
    fn assigned_teacher_must_hold_teacher_role() {
        let f = Fixture::new();
        let admin = f.admin_actor();
        let e = create_course(&f.conn, &admin, input("OS200", Some(f.student_a.as_str()))).unwrap_err();
        assert_eq!(e.code(), "bad_params");
        let e = create_course(&f.conn, &admin, input("OS200", Some("ghost"))).unwrap_err();
        assert_eq!(e.code(), "not_found");
    }

    #[test]
    fn listing_depends_on_role() {
        let f = Fixture::new();
        let second = add_course(&f.conn, "AA100", Some(f.other_teacher.as_str()));
        f.enroll(&f.student_a);

        let all = list_courses(&f.conn, &f.admin_actor()).expect("admin list");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].course.id, second);
        assert_eq!(all[1].active_students, 1);
        assert_eq!(all[1].teacher_name.as_deref(), Some("Tom Teacher"));

        let own = list_courses(&f.conn, &f.teacher_actor()).expect("teacher list");
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].course.id, f.course_id);

        let a = f.student_actor(&f.student_a);
        let available = list_courses(&f.conn, &a).expect("student list");
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].course.id, second);

        // A dropped course shows up in the catalog again.
        f.drop_enrollment(&f.student_a);
        let available = list_courses(&f.conn, &a).expect("student list");
        assert_eq!(available.len(), 2);
    }

    #[test]
    fn non_owner_teacher_cannot_view_course() {
        let f = Fixture::new();
        let e = get_course(&f.conn, &f.other_teacher_actor(), &f.course_id).unwrap_err();
        assert_eq!(e.code(), "forbidden");
        let d = get_course(&f.conn, &f.teacher_actor(), &f.course_id).expect("owner view");
        assert_eq!(d.course.code, "CS301");
    }

    #[test]
    fn delete_cascades_to_enrollments_and_records() {
        let f = Fixture::new();
        let keep = add_course(&f.conn, "KEEP1", Some(f.teacher.as_str()));
        f.enroll(&f.student_a);
        f.enroll(&f.student_b);
        f.record(&f.course_id, &f.student_a, "2024-12-06", AttendanceStatus::Present.as_str());
        f.record(&f.course_id, &f.student_b, "2024-12-06", AttendanceStatus::Late.as_str());
        f.record(&keep, &f.student_a, "2024-12-06", AttendanceStatus::Absent.as_str());

        let out = delete_course(&f.conn, &f.admin_actor(), &f.course_id).expect("delete");
        assert_eq!(out.enrollments_removed, 2);
        assert_eq!(out.records_removed, 2);
        assert!(find_course(&f.conn, &f.course_id).expect("find").is_none());

        let left: i64 = f
            .conn
            .query_row("SELECT COUNT(*) FROM attendance_records", [], |r| r.get(0))
            .expect("count");
        assert_eq!(left, 1);

        let e = delete_course(&f.conn, &f.admin_actor(), &f.course_id).unwrap_err();
        assert_eq!(e.code(), "not_found");
    }
}
