//! Report models. The daemon assembles everything a printed report shows and
//! suggests a file name; the host lays the model out as a document.

use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;

use crate::attendance::{list_attendance, AttendanceFilter};
use crate::authz::{self, Actor};
use crate::config::AttendancePolicy;
use crate::courses;
use crate::error::{CoreError, CoreResult};
use crate::model::{date_key, AttendanceStatus, User};
use crate::stats::{self, CourseSummary, DailySheet, StudentCourseStats, StudentSummary};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyReport {
    pub file_name: String,
    pub teacher_name: Option<String>,
    pub sheet: DailySheet,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseSummaryReport {
    pub file_name: String,
    pub generated_on: NaiveDate,
    pub summary: CourseSummary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecordLine {
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub remarks: Option<String>,
    pub marked_by_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentCourseSection {
    pub stats: StudentCourseStats,
    /// Newest first.
    pub records: Vec<StudentRecordLine>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentReport {
    pub file_name: String,
    pub generated_on: NaiveDate,
    pub student: User,
    pub sections: Vec<StudentCourseSection>,
    pub overall: stats::OverallStats,
    pub thresholds: stats::Thresholds,
}

/// `Jane Q Doe` becomes `Jane_Q_Doe`.
fn file_stem(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join("_")
}

pub fn daily_file_name(course_code: &str, date: NaiveDate) -> String {
    format!("{}_Attendance_{}.pdf", course_code, date_key(date))
}

pub fn course_summary_file_name(course_code: &str, today: NaiveDate) -> String {
    format!("{}_Summary_{}.pdf", course_code, date_key(today))
}

pub fn student_file_name(full_name: &str, course_code: Option<&str>, today: NaiveDate) -> String {
    match course_code {
        Some(code) => format!(
            "{}_{}_Attendance_{}.pdf",
            file_stem(full_name),
            code,
            date_key(today)
        ),
        None => format!("{}_Attendance_{}.pdf", file_stem(full_name), date_key(today)),
    }
}

pub fn daily_report(
    conn: &Connection,
    actor: &Actor,
    course_id: &str,
    raw_date: &str,
) -> CoreResult<DailyReport> {
    let sheet = stats::daily_sheet(conn, actor, course_id, raw_date)?;
    if sheet.rows.is_empty() {
        return Err(CoreError::NotFound("attendance records for this date"));
    }
    let teacher_name = match sheet.course.teacher_id.as_deref() {
        Some(t) => authz::find_user(conn, t)?.map(|u| u.full_name),
        None => None,
    };
    Ok(DailyReport {
        file_name: daily_file_name(&sheet.course.code, sheet.date),
        teacher_name,
        sheet,
    })
}

pub fn course_summary_report(
    conn: &Connection,
    actor: &Actor,
    course_id: &str,
    policy: &AttendancePolicy,
    today: NaiveDate,
) -> CoreResult<CourseSummaryReport> {
    let summary = stats::compute_course_summary(conn, actor, course_id, policy)?;
    if summary.students.is_empty() {
        return Err(CoreError::validation("no students enrolled in this course"));
    }
    Ok(CourseSummaryReport {
        file_name: course_summary_file_name(&summary.course.code, today),
        generated_on: today,
        summary,
    })
}

pub fn student_report(
    conn: &Connection,
    actor: &Actor,
    student_id: &str,
    course_id: Option<&str>,
    policy: &AttendancePolicy,
    today: NaiveDate,
) -> CoreResult<StudentReport> {
    let StudentSummary {
        student,
        thresholds,
        courses: rows,
        overall,
    } = stats::compute_student_summary(conn, actor, student_id, course_id, policy)?;
    if rows.is_empty() {
        return Err(CoreError::validation("student is not enrolled in any courses"));
    }

    let mut sections = Vec::with_capacity(rows.len());
    for row in rows {
        let records = list_attendance(
            conn,
            &AttendanceFilter {
                course_id: Some(row.course_id.clone()),
                student_id: Some(student.id.clone()),
                date: None,
            },
        )?;
        let mut lines = Vec::with_capacity(records.len());
        for r in records {
            let marked_by_name = match r.marked_by.as_deref() {
                Some(m) => authz::find_user(conn, m)?.map(|u| u.full_name),
                None => None,
            };
            lines.push(StudentRecordLine {
                date: r.date,
                status: r.status,
                remarks: r.remarks,
                marked_by_name,
            });
        }
        sections.push(StudentCourseSection {
            stats: row,
            records: lines,
        });
    }

    let course_code = match course_id {
        Some(c) => Some(courses::require_course(conn, c)?.code),
        None => None,
    };
    Ok(StudentReport {
        file_name: student_file_name(&student.full_name, course_code.as_deref(), today),
        generated_on: today,
        student,
        sections,
        overall,
        thresholds,
    })
}
