//! Attendance aggregation.
//!
//! A course's session count is the number of distinct dates that carry any
//! record for the course. A student's percentage in a course is their
//! attended records (present or late) over that course-wide session count,
//! so a student with no record on some date is measured against it anyway.
//! Nothing here is cached; every call reads the store.

use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;

use crate::attendance::normalize_date;
use crate::authz::{self, Action, Actor};
use crate::config::AttendancePolicy;
use crate::courses;
use crate::error::CoreResult;
use crate::model::{date_key, AttendanceStatus, Course, User};
use crate::users;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub excused: i64,
}

impl StatusCounts {
    pub fn add(&mut self, status: AttendanceStatus, n: i64) {
        match status {
            AttendanceStatus::Present => self.present += n,
            AttendanceStatus::Absent => self.absent += n,
            AttendanceStatus::Late => self.late += n,
            AttendanceStatus::Excused => self.excused += n,
        }
    }

    /// Present and Late both count as attended.
    pub fn attended(&self) -> i64 {
        self.present + self.late
    }

    pub fn total(&self) -> i64 {
        self.present + self.absent + self.late + self.excused
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    Good,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Thresholds {
    pub good: f64,
    pub warning: f64,
}

impl From<&AttendancePolicy> for Thresholds {
    fn from(p: &AttendancePolicy) -> Self {
        Thresholds {
            good: p.good_threshold,
            warning: p.warning_threshold,
        }
    }
}

impl Thresholds {
    pub fn classify(&self, percentage: f64) -> Band {
        if percentage >= self.good {
            Band::Good
        } else if percentage >= self.warning {
            Band::Warning
        } else {
            Band::Critical
        }
    }
}

/// `attended / total * 100`, or 0 when there is nothing to divide by.
pub fn attendance_percentage(attended: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    attended as f64 * 100.0 / total as f64
}

pub fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Distinct dates with at least one record for the course.
pub fn total_sessions(conn: &Connection, course_id: &str) -> CoreResult<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(DISTINCT date) FROM attendance_records WHERE course_id = ?",
        [course_id],
        |r| r.get(0),
    )?)
}

fn status_counts(
    conn: &Connection,
    student_id: &str,
    course_id: Option<&str>,
) -> CoreResult<StatusCounts> {
    let mut sql = String::from(
        "SELECT status, COUNT(*) FROM attendance_records WHERE student_id = ?",
    );
    if course_id.is_some() {
        sql.push_str(" AND course_id = ?");
    }
    sql.push_str(" GROUP BY status");

    let mut stmt = conn.prepare(&sql)?;
    let map = |r: &rusqlite::Row<'_>| -> rusqlite::Result<(String, i64)> {
        Ok((r.get(0)?, r.get(1)?))
    };
    let rows = match course_id {
        Some(c) => stmt
            .query_map((student_id, c), map)?
            .collect::<Result<Vec<_>, _>>()?,
        None => stmt
            .query_map([student_id], map)?
            .collect::<Result<Vec<_>, _>>()?,
    };

    let mut counts = StatusCounts::default();
    for (status, n) in rows {
        counts.add(status.parse()?, n);
    }
    Ok(counts)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentCourseStats {
    pub student_id: String,
    pub student_name: String,
    pub student_email: String,
    pub course_id: String,
    pub course_code: String,
    pub course_name: String,
    pub total_sessions: i64,
    /// The student's own record count, which can be below `total_sessions`.
    pub records: i64,
    pub counts: StatusCounts,
    pub percentage: f64,
    pub band: Band,
}

pub fn student_course_stats(
    conn: &Connection,
    course: &Course,
    student: &User,
    thresholds: &Thresholds,
) -> CoreResult<StudentCourseStats> {
    let sessions = total_sessions(conn, &course.id)?;
    course_row(conn, course, student, sessions, thresholds)
}

fn course_row(
    conn: &Connection,
    course: &Course,
    student: &User,
    sessions: i64,
    thresholds: &Thresholds,
) -> CoreResult<StudentCourseStats> {
    let counts = status_counts(conn, &student.id, Some(course.id.as_str()))?;
    let percentage = attendance_percentage(counts.attended(), sessions);
    Ok(StudentCourseStats {
        student_id: student.id.clone(),
        student_name: student.full_name.clone(),
        student_email: student.email.clone(),
        course_id: course.id.clone(),
        course_code: course.code.clone(),
        course_name: course.name.clone(),
        total_sessions: sessions,
        records: counts.total(),
        counts,
        percentage,
        band: thresholds.classify(percentage),
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseSummary {
    pub course: Course,
    pub teacher_name: Option<String>,
    pub total_sessions: i64,
    pub thresholds: Thresholds,
    pub students: Vec<StudentCourseStats>,
}

/// One row per active enrollment, sorted by student name, all measured
/// against the same course-wide session count.
pub fn compute_course_summary(
    conn: &Connection,
    actor: &Actor,
    course_id: &str,
    policy: &AttendancePolicy,
) -> CoreResult<CourseSummary> {
    let course = courses::require_course(conn, course_id)?;
    authz::authorize(actor, Action::ViewCourseReport, Some(&course))?;
    let thresholds = Thresholds::from(policy);
    let sessions = total_sessions(conn, &course.id)?;

    let mut students = Vec::new();
    for student in active_students(conn, &course.id)? {
        students.push(course_row(conn, &course, &student, sessions, &thresholds)?);
    }
    let teacher_name = match course.teacher_id.as_deref() {
        Some(t) => authz::find_user(conn, t)?.map(|u| u.full_name),
        None => None,
    };
    Ok(CourseSummary {
        course,
        teacher_name,
        total_sessions: sessions,
        thresholds,
        students,
    })
}

fn active_students(conn: &Connection, course_id: &str) -> CoreResult<Vec<User>> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.full_name, u.email, u.role, u.created_at
         FROM enrollments e
         JOIN users u ON u.id = e.student_id
         WHERE e.course_id = ? AND e.active = 1
         ORDER BY u.full_name COLLATE NOCASE, u.email",
    )?;
    let rows = stmt
        .query_map([course_id], User::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallStats {
    pub records: i64,
    pub counts: StatusCounts,
    /// Attended over the student's own records, not over sessions.
    pub percentage: f64,
    pub band: Band,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub student: User,
    pub thresholds: Thresholds,
    pub courses: Vec<StudentCourseStats>,
    pub overall: OverallStats,
}

/// Per-course rows for the student's active enrollments (or just the given
/// course) plus an overall ratio over all of the student's records.
pub fn compute_student_summary(
    conn: &Connection,
    actor: &Actor,
    student_id: &str,
    course_id: Option<&str>,
    policy: &AttendancePolicy,
) -> CoreResult<StudentSummary> {
    let course = course_id
        .map(|c| courses::require_course(conn, c))
        .transpose()?;
    authz::authorize_student_view(actor, student_id, course.as_ref())?;
    let student = users::require_student(conn, student_id)?;
    let thresholds = Thresholds::from(policy);

    let courses = match &course {
        Some(c) => vec![c.clone()],
        None => enrolled_courses(conn, &student.id)?,
    };
    let mut rows = Vec::with_capacity(courses.len());
    for c in &courses {
        rows.push(student_course_stats(conn, c, &student, &thresholds)?);
    }

    let counts = status_counts(conn, &student.id, course.as_ref().map(|c| c.id.as_str()))?;
    let percentage = attendance_percentage(counts.attended(), counts.total());
    Ok(StudentSummary {
        student,
        thresholds,
        courses: rows,
        overall: OverallStats {
            records: counts.total(),
            counts,
            percentage,
            band: thresholds.classify(percentage),
        },
    })
}

fn enrolled_courses(conn: &Connection, student_id: &str) -> CoreResult<Vec<Course>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.name, c.code, c.description, c.credit_hours, c.teacher_id, c.created_at
         FROM enrollments e
         JOIN courses c ON c.id = e.course_id
         WHERE e.student_id = ? AND e.active = 1
         ORDER BY c.code COLLATE NOCASE",
    )?;
    let rows = stmt
        .query_map([student_id], Course::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyRow {
    pub record_id: String,
    pub student_id: String,
    pub student_name: String,
    pub student_email: String,
    pub status: AttendanceStatus,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySheet {
    pub course: Course,
    pub date: NaiveDate,
    pub rows: Vec<DailyRow>,
    pub counts: StatusCounts,
    pub total: i64,
}

/// The records taken for one course on one date, sorted by student name.
pub fn daily_sheet(
    conn: &Connection,
    actor: &Actor,
    course_id: &str,
    raw_date: &str,
) -> CoreResult<DailySheet> {
    let course = courses::require_course(conn, course_id)?;
    authz::authorize(actor, Action::ViewCourseReport, Some(&course))?;
    let date = normalize_date(raw_date)?;

    let mut stmt = conn.prepare(
        "SELECT a.id, u.id, u.full_name, u.email, a.status, a.remarks
         FROM attendance_records a
         JOIN users u ON u.id = a.student_id
         WHERE a.course_id = ? AND a.date = ?
         ORDER BY u.full_name COLLATE NOCASE, u.email",
    )?;
    let raw = stmt
        .query_map((&course.id, date_key(date)), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, Option<String>>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut counts = StatusCounts::default();
    let mut rows = Vec::with_capacity(raw.len());
    for (record_id, student_id, student_name, student_email, status, remarks) in raw {
        let status: AttendanceStatus = status.parse()?;
        counts.add(status, 1);
        rows.push(DailyRow {
            record_id,
            student_id,
            student_name,
            student_email,
            status,
            remarks,
        });
    }
    Ok(DailySheet {
        course,
        date,
        total: counts.total(),
        rows,
        counts,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminDashboard {
    pub total_users: i64,
    pub total_admins: i64,
    pub total_teachers: i64,
    pub total_students: i64,
    pub total_courses: i64,
    pub total_enrollments: i64,
    pub total_attendance_records: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherDashboard {
    pub my_courses: i64,
    /// Distinct students with an active enrollment in any owned course.
    pub total_students: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentDashboard {
    pub enrolled_courses: i64,
    pub total_attendance_records: i64,
    /// Percentage over the student's own records, one decimal.
    pub attendance_rate: f64,
    pub band: Band,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Dashboard {
    Admin(AdminDashboard),
    Teacher(TeacherDashboard),
    Student(StudentDashboard),
}

fn count(conn: &Connection, sql: &str, key: Option<&str>) -> CoreResult<i64> {
    let n = match key {
        Some(k) => conn.query_row(sql, [k], |r| r.get(0))?,
        None => conn.query_row(sql, [], |r| r.get(0))?,
    };
    Ok(n)
}

pub fn dashboard(
    conn: &Connection,
    actor: &Actor,
    policy: &AttendancePolicy,
) -> CoreResult<Dashboard> {
    Ok(match actor {
        Actor::Admin { .. } => {
            let by_role = |role: &str| {
                count(conn, "SELECT COUNT(*) FROM users WHERE role = ?", Some(role))
            };
            Dashboard::Admin(AdminDashboard {
                total_users: count(conn, "SELECT COUNT(*) FROM users", None)?,
                total_admins: by_role("admin")?,
                total_teachers: by_role("teacher")?,
                total_students: by_role("student")?,
                total_courses: count(conn, "SELECT COUNT(*) FROM courses", None)?,
                total_enrollments: count(conn, "SELECT COUNT(*) FROM enrollments", None)?,
                total_attendance_records: count(
                    conn,
                    "SELECT COUNT(*) FROM attendance_records",
                    None,
                )?,
            })
        }
        Actor::Teacher { id, owned_courses } => Dashboard::Teacher(TeacherDashboard {
            my_courses: owned_courses.len() as i64,
            total_students: count(
                conn,
                "SELECT COUNT(DISTINCT e.student_id)
                 FROM enrollments e
                 JOIN courses c ON c.id = e.course_id
                 WHERE c.teacher_id = ? AND e.active = 1",
                Some(id.as_str()),
            )?,
        }),
        Actor::Student { id, .. } => {
            let counts = status_counts(conn, id, None)?;
            let rate = round1(attendance_percentage(counts.attended(), counts.total()));
            Dashboard::Student(StudentDashboard {
                enrolled_courses: count(
                    conn,
                    "SELECT COUNT(*) FROM enrollments WHERE student_id = ? AND active = 1",
                    Some(id.as_str()),
                )?,
                total_attendance_records: counts.total(),
                attendance_rate: rate,
                band: Thresholds::from(policy).classify(rate),
            })
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Fixture;

    fn policy() -> AttendancePolicy {
        AttendancePolicy::default()
    }

    #[test]
    fn percentage_is_zero_without_sessions() {
        assert_eq!(attendance_percentage(0, 0), 0.0);
        assert_eq!(attendance_percentage(3, 0), 0.0);
    }

    #[test]
    fn bands_follow_thresholds() {
        let t = Thresholds::from(&policy());
        assert_eq!(t.classify(100.0), Band::Good);
        assert_eq!(t.classify(75.0), Band::Good);
        assert_eq!(t.classify(74.9), Band::Warning);
        assert_eq!(t.classify(60.0), Band::Warning);
        assert_eq!(t.classify(59.9), Band::Critical);
        assert_eq!(t.classify(0.0), Band::Critical);
    }

    #[test]
    fn two_present_one_late_one_absent_is_seventy_five() {
        let f = Fixture::new();
        f.enroll(&f.student_a);
        f.record(&f.course_id, &f.student_a, "2024-12-02", "present");
        f.record(&f.course_id, &f.student_a, "2024-12-03", "present");
        f.record(&f.course_id, &f.student_a, "2024-12-04", "late");
        f.record(&f.course_id, &f.student_a, "2024-12-05", "absent");

        let s = compute_course_summary(&f.conn, &f.teacher_actor(), &f.course_id, &policy())
            .expect("summary");
        assert_eq!(s.total_sessions, 4);
        let row = &s.students[0];
        assert_eq!(row.percentage, 75.0);
        assert_eq!(row.band, Band::Good);
        assert_eq!(row.counts.present, 2);
        assert_eq!(row.counts.late, 1);
        assert_eq!(row.counts.absent, 1);
    }

    #[test]
    fn missing_rows_still_count_against_course_sessions() {
        let f = Fixture::new();
        f.enroll(&f.student_a);
        f.enroll(&f.student_b);
        for d in ["2024-12-02", "2024-12-03", "2024-12-04", "2024-12-05", "2024-12-06"] {
            f.record(&f.course_id, &f.student_a, d, "present");
        }
        // Bob joined late: three records, all attended.
        for d in ["2024-12-04", "2024-12-05", "2024-12-06"] {
            f.record(&f.course_id, &f.student_b, d, "present");
        }

        let s = compute_course_summary(&f.conn, &f.admin_actor(), &f.course_id, &policy())
            .expect("summary");
        assert_eq!(s.total_sessions, 5);
        let names: Vec<&str> = s.students.iter().map(|r| r.student_name.as_str()).collect();
        assert_eq!(names, vec!["Alice Able", "Bob Baker"]);
        assert_eq!(s.students[0].percentage, 100.0);
        assert_eq!(s.students[1].records, 3);
        assert_eq!(s.students[1].percentage, 60.0);
        assert_eq!(s.students[1].band, Band::Warning);

        // Overall ratio uses Bob's own records instead.
        let me = f.student_actor(&f.student_b);
        let own = compute_student_summary(&f.conn, &me, &f.student_b, None, &policy())
            .expect("student summary");
        assert_eq!(own.courses.len(), 1);
        assert_eq!(own.courses[0].percentage, 60.0);
        assert_eq!(own.overall.percentage, 100.0);
    }

    #[test]
    fn course_summary_skips_dropped_students_and_is_gated() {
        let f = Fixture::new();
        f.enroll(&f.student_a);
        f.enroll(&f.student_b);
        f.drop_enrollment(&f.student_b);

        let outsider = f.other_teacher_actor();
        let e = compute_course_summary(&f.conn, &outsider, &f.course_id, &policy()).unwrap_err();
        assert_eq!(e.code(), "forbidden");

        let s = compute_course_summary(&f.conn, &f.teacher_actor(), &f.course_id, &policy())
            .expect("summary");
        assert_eq!(s.students.len(), 1);
        assert_eq!(s.total_sessions, 0);
        assert_eq!(s.students[0].percentage, 0.0);
        assert_eq!(s.teacher_name.as_deref(), Some("Tom Teacher"));
    }

    #[test]
    fn students_only_see_their_own_summary() {
        let f = Fixture::new();
        f.enroll(&f.student_a);
        let me = f.student_actor(&f.student_a);
        let e = compute_student_summary(&f.conn, &me, &f.student_b, None, &policy()).unwrap_err();
        assert_eq!(e.code(), "forbidden");

        let teacher = f.teacher_actor();
        let e = compute_student_summary(&f.conn, &teacher, &f.student_a, None, &policy())
            .unwrap_err();
        assert_eq!(e.code(), "forbidden");
        compute_student_summary(
            &f.conn,
            &teacher,
            &f.student_a,
            Some(f.course_id.as_str()),
            &policy(),
        )
        .expect("owner teacher view");
    }

    #[test]
    fn daily_sheet_lists_records_for_the_date_only() {
        let f = Fixture::new();
        f.record(&f.course_id, &f.student_b, "2024-12-06", "late");
        f.record(&f.course_id, &f.student_a, "2024-12-06", "present");
        f.record(&f.course_id, &f.student_a, "2024-12-07", "absent");

        let sheet = daily_sheet(&f.conn, &f.teacher_actor(), &f.course_id, "2024-12-06T09:15")
            .expect("sheet");
        assert_eq!(sheet.total, 2);
        assert_eq!(sheet.rows[0].student_name, "Alice Able");
        assert_eq!(sheet.counts.present, 1);
        assert_eq!(sheet.counts.late, 1);
    }

    #[test]
    fn dashboards_per_role() {
        let f = Fixture::new();
        f.enroll(&f.student_a);
        f.record(&f.course_id, &f.student_a, "2024-12-02", "present");
        f.record(&f.course_id, &f.student_a, "2024-12-03", "absent");
        f.record(&f.course_id, &f.student_a, "2024-12-04", "absent");

        match dashboard(&f.conn, &f.admin_actor(), &policy()).expect("admin") {
            Dashboard::Admin(d) => {
                assert_eq!(d.total_users, 5);
                assert_eq!(d.total_teachers, 2);
                assert_eq!(d.total_students, 2);
                assert_eq!(d.total_attendance_records, 3);
            }
            other => panic!("unexpected dashboard {:?}", other),
        }
        match dashboard(&f.conn, &f.teacher_actor(), &policy()).expect("teacher") {
            Dashboard::Teacher(d) => {
                assert_eq!(d.my_courses, 1);
                assert_eq!(d.total_students, 1);
            }
            other => panic!("unexpected dashboard {:?}", other),
        }
        match dashboard(&f.conn, &f.student_actor(&f.student_a), &policy()).expect("student") {
            Dashboard::Student(d) => {
                assert_eq!(d.enrolled_courses, 1);
                assert_eq!(d.attendance_rate, 33.3);
                assert_eq!(d.band, Band::Critical);
            }
            other => panic!("unexpected dashboard {:?}", other),
        }
    }
}
