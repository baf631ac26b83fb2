//! Attendance upserts keyed by (course, student, date).
//!
//! Every write path, single or bulk, funnels through [`mark_entry`] so that
//! the lookup-then-write rules are identical everywhere. The storage layer
//! carries a UNIQUE(course_id, student_id, date) index; an insert that loses
//! a race against another writer is retried once as an update.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::authz::{self, Action, Actor};
use crate::config::AttendancePolicy;
use crate::courses;
use crate::enrollments;
use crate::error::{map_unique_violation, CoreError, CoreResult};
use crate::model::{
    date_key, now_timestamp, AttendanceRecord, AttendanceStatus, Course, ATTENDANCE_COLUMNS,
};
use crate::users;

#[derive(Debug, Clone, PartialEq)]
pub struct MarkEntry {
    pub student_id: String,
    pub status: AttendanceStatus,
    /// `None` keeps whatever remarks an existing record has. An empty string clears them.
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkOutcome {
    pub record: AttendanceRecord,
    pub created: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedEntry {
    pub student_id: String,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub course_id: String,
    pub date: NaiveDate,
    pub created: usize,
    pub updated: usize,
    pub records: Vec<MarkOutcome>,
    pub failed: Vec<FailedEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct AttendanceFilter {
    pub course_id: Option<String>,
    pub student_id: Option<String>,
    pub date: Option<NaiveDate>,
}

/// Reduces a submitted date or timestamp to the calendar day it falls on (UTC).
pub fn normalize_date(raw: &str) -> CoreResult<NaiveDate> {
    let t = raw.trim();
    if t.is_empty() {
        return Err(CoreError::validation("date must not be empty"));
    }
    if let Ok(d) = NaiveDate::parse_from_str(t, "%Y-%m-%d") {
        return Ok(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Ok(dt.with_timezone(&Utc).date_naive());
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(t, fmt) {
            return Ok(dt.date());
        }
    }
    Err(CoreError::validation(format!(
        "date must be YYYY-MM-DD or an ISO-8601 timestamp (got {:?})",
        t
    )))
}

fn normalize_remarks(remarks: Option<&str>) -> Option<Option<String>> {
    remarks.map(|r| {
        let t = r.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

pub fn find_attendance(
    conn: &Connection,
    course_id: &str,
    student_id: &str,
    date: NaiveDate,
) -> CoreResult<Option<AttendanceRecord>> {
    let sql = format!(
        "SELECT {} FROM attendance_records
         WHERE course_id = ? AND student_id = ? AND date = ?",
        ATTENDANCE_COLUMNS
    );
    Ok(conn
        .query_row(&sql, (course_id, student_id, date_key(date)), |r| {
            AttendanceRecord::from_row(r)
        })
        .optional()?)
}

pub fn insert_attendance(conn: &Connection, record: &AttendanceRecord) -> CoreResult<()> {
    conn.execute(
        "INSERT INTO attendance_records(
            id, course_id, student_id, date, status, remarks, marked_by, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &record.id,
            &record.course_id,
            &record.student_id,
            date_key(record.date),
            record.status.as_str(),
            &record.remarks,
            &record.marked_by,
            &record.created_at,
        ),
    )
    .map_err(|e| {
        map_unique_violation(e, "attendance record for this course, student and date")
    })?;
    Ok(())
}

/// Writes status, remarks and marked-by back to an existing row. The triple
/// and `created_at` are never rewritten.
pub fn update_attendance(conn: &Connection, record: &AttendanceRecord) -> CoreResult<()> {
    let changed = conn.execute(
        "UPDATE attendance_records
         SET status = ?, remarks = ?, marked_by = ?
         WHERE id = ?",
        (
            record.status.as_str(),
            &record.remarks,
            &record.marked_by,
            &record.id,
        ),
    )?;
    if changed == 0 {
        return Err(CoreError::NotFound("attendance record"));
    }
    Ok(())
}

pub fn list_attendance(
    conn: &Connection,
    filter: &AttendanceFilter,
) -> CoreResult<Vec<AttendanceRecord>> {
    let mut sql = format!(
        "SELECT {} FROM attendance_records WHERE 1 = 1",
        ATTENDANCE_COLUMNS
    );
    let mut bind: Vec<Value> = Vec::new();
    if let Some(c) = &filter.course_id {
        sql.push_str(" AND course_id = ?");
        bind.push(Value::Text(c.clone()));
    }
    if let Some(s) = &filter.student_id {
        sql.push_str(" AND student_id = ?");
        bind.push(Value::Text(s.clone()));
    }
    if let Some(d) = filter.date {
        sql.push_str(" AND date = ?");
        bind.push(Value::Text(date_key(d)));
    }
    sql.push_str(" ORDER BY date DESC, created_at");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind), AttendanceRecord::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Raw records visible to the actor. Admins may list anything, teachers
/// must name a course they own, and students only ever see their own rows.
pub fn list_for_actor(
    conn: &Connection,
    actor: &Actor,
    mut filter: AttendanceFilter,
) -> CoreResult<Vec<AttendanceRecord>> {
    let course = filter
        .course_id
        .as_deref()
        .map(|c| courses::require_course(conn, c))
        .transpose()?;
    match actor {
        Actor::Admin { .. } => {}
        Actor::Teacher { .. } => {
            if course.is_none() {
                return Err(CoreError::forbidden("teachers must name one of their courses"));
            }
            authz::authorize(actor, Action::ViewCourseReport, course.as_ref())?;
        }
        Actor::Student { id, .. } => {
            let student_id = filter.student_id.get_or_insert_with(|| id.clone());
            authz::authorize_student_view(actor, student_id, course.as_ref())?;
        }
    }
    list_attendance(conn, &filter)
}

fn apply_update(
    conn: &Connection,
    mut existing: AttendanceRecord,
    status: AttendanceStatus,
    remarks: Option<Option<String>>,
    marked_by: &str,
) -> CoreResult<MarkOutcome> {
    existing.status = status;
    if let Some(r) = remarks {
        existing.remarks = r;
    }
    existing.marked_by = Some(marked_by.to_string());
    update_attendance(conn, &existing)?;
    Ok(MarkOutcome {
        record: existing,
        created: false,
    })
}

/// Insert-or-update given the result of a prior lookup. A stale "not found"
/// lookup surfaces as a UNIQUE conflict on insert and is resolved by
/// re-reading the row and updating it.
fn write_mark(
    conn: &Connection,
    looked_up: Option<AttendanceRecord>,
    course_id: &str,
    date: NaiveDate,
    entry: &MarkEntry,
    marked_by: &str,
) -> CoreResult<MarkOutcome> {
    let remarks = normalize_remarks(entry.remarks.as_deref());
    if let Some(existing) = looked_up {
        return apply_update(conn, existing, entry.status, remarks, marked_by);
    }

    let record = AttendanceRecord {
        id: Uuid::new_v4().to_string(),
        course_id: course_id.to_string(),
        student_id: entry.student_id.clone(),
        date,
        status: entry.status,
        remarks: remarks.clone().flatten(),
        marked_by: Some(marked_by.to_string()),
        created_at: now_timestamp(),
    };
    match insert_attendance(conn, &record) {
        Ok(()) => Ok(MarkOutcome {
            record,
            created: true,
        }),
        Err(e) if e.is_conflict() => {
            warn!(
                course_id,
                student_id = %entry.student_id,
                date = %date,
                "attendance insert raced another writer; retrying as update"
            );
            let existing = find_attendance(conn, course_id, &entry.student_id, date)?
                .ok_or_else(|| {
                    CoreError::Conflict("attendance record changed concurrently".to_string())
                })?;
            apply_update(conn, existing, entry.status, remarks, marked_by)
        }
        Err(e) => Err(e),
    }
}

/// The single per-student write path shared by markOne, markBatch and markAll.
fn mark_entry(
    conn: &Connection,
    course: &Course,
    date: NaiveDate,
    entry: &MarkEntry,
    marked_by: &str,
    policy: &AttendancePolicy,
) -> CoreResult<MarkOutcome> {
    users::require_student(conn, &entry.student_id)?;
    if policy.require_active_enrollment
        && !enrollments::has_active_enrollment(conn, &course.id, &entry.student_id)?
    {
        return Err(CoreError::validation(format!(
            "student {} has no active enrollment in {}",
            entry.student_id, course.code
        )));
    }
    let looked_up = find_attendance(conn, &course.id, &entry.student_id, date)?;
    write_mark(conn, looked_up, &course.id, date, entry, marked_by)
}

pub fn mark_one(
    conn: &Connection,
    actor: &Actor,
    course_id: &str,
    raw_date: &str,
    entry: &MarkEntry,
    policy: &AttendancePolicy,
) -> CoreResult<MarkOutcome> {
    let course = courses::require_course(conn, course_id)?;
    authz::authorize(actor, Action::MarkAttendance, Some(&course))?;
    let date = normalize_date(raw_date)?;

    let outcome = mark_entry(conn, &course, date, entry, actor.id(), policy)?;
    info!(
        course = %course.code,
        student_id = %entry.student_id,
        date = %date,
        status = %entry.status,
        created = outcome.created,
        "attendance marked"
    );
    Ok(outcome)
}

/// Applies every entry for one (course, date) inside a single transaction.
/// Entries repeating a student collapse to the last one. An entry whose
/// conflict survives the retry is reported in `failed`; any other error rolls
/// the whole batch back.
pub fn mark_batch(
    conn: &Connection,
    actor: &Actor,
    course_id: &str,
    raw_date: &str,
    entries: &[MarkEntry],
    policy: &AttendancePolicy,
) -> CoreResult<BatchOutcome> {
    let course = courses::require_course(conn, course_id)?;
    authz::authorize(actor, Action::MarkAttendance, Some(&course))?;
    let date = normalize_date(raw_date)?;

    let mut order: Vec<&str> = Vec::new();
    let mut latest: HashMap<&str, &MarkEntry> = HashMap::new();
    for e in entries {
        if latest.insert(e.student_id.as_str(), e).is_none() {
            order.push(e.student_id.as_str());
        }
    }

    let tx = conn.unchecked_transaction()?;
    let mut outcome = BatchOutcome {
        course_id: course.id.clone(),
        date,
        created: 0,
        updated: 0,
        records: Vec::with_capacity(order.len()),
        failed: Vec::new(),
    };
    for student_id in order {
        let entry = latest[student_id];
        match mark_entry(&tx, &course, date, entry, actor.id(), policy) {
            Ok(m) => {
                if m.created {
                    outcome.created += 1;
                } else {
                    outcome.updated += 1;
                }
                outcome.records.push(m);
            }
            Err(e) if e.is_conflict() => {
                outcome.failed.push(FailedEntry {
                    student_id: student_id.to_string(),
                    code: e.code(),
                    message: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }
    tx.commit()?;

    info!(
        course = %course.code,
        date = %date,
        created = outcome.created,
        updated = outcome.updated,
        failed = outcome.failed.len(),
        "attendance batch committed"
    );
    Ok(outcome)
}

/// Stamps one status on every active enrollment of the course. Existing
/// remarks are kept.
pub fn mark_all(
    conn: &Connection,
    actor: &Actor,
    course_id: &str,
    raw_date: &str,
    status: AttendanceStatus,
    policy: &AttendancePolicy,
) -> CoreResult<BatchOutcome> {
    let course = courses::require_course(conn, course_id)?;
    authz::authorize(actor, Action::MarkAttendance, Some(&course))?;

    let entries: Vec<MarkEntry> = enrollments::list_active_enrollments(conn, &course.id)?
        .into_iter()
        .map(|e| MarkEntry {
            student_id: e.student_id,
            status,
            remarks: None,
        })
        .collect();
    debug!(course = %course.code, students = entries.len(), "mark all");
    mark_batch(conn, actor, course_id, raw_date, &entries, policy)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRow {
    pub enrollment_id: String,
    pub student_id: String,
    pub student_name: String,
    pub student_email: String,
    pub status: AttendanceStatus,
    pub remarks: String,
    pub record_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSheet {
    pub course: Course,
    pub date: NaiveDate,
    pub rows: Vec<SessionRow>,
}

/// The marking sheet for one session: every active enrollment with its
/// current outcome, defaulting to present when nothing is recorded yet.
pub fn session_open(
    conn: &Connection,
    actor: &Actor,
    course_id: &str,
    raw_date: &str,
) -> CoreResult<SessionSheet> {
    let course = courses::require_course(conn, course_id)?;
    authz::authorize(actor, Action::MarkAttendance, Some(&course))?;
    let date = normalize_date(raw_date)?;

    let mut stmt = conn.prepare(
        "SELECT e.id, u.id, u.full_name, u.email, a.id, a.status, a.remarks
         FROM enrollments e
         JOIN users u ON u.id = e.student_id
         LEFT JOIN attendance_records a
           ON a.course_id = e.course_id AND a.student_id = e.student_id AND a.date = ?
         WHERE e.course_id = ? AND e.active = 1
         ORDER BY u.full_name COLLATE NOCASE, u.email",
    )?;
    let raw = stmt
        .query_map((date_key(date), &course.id), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, Option<String>>(4)?,
                r.get::<_, Option<String>>(5)?,
                r.get::<_, Option<String>>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut rows = Vec::with_capacity(raw.len());
    for (enrollment_id, student_id, student_name, student_email, record_id, status, remarks) in raw
    {
        let status = match status {
            Some(s) => s.parse::<AttendanceStatus>()?,
            None => AttendanceStatus::Present,
        };
        rows.push(SessionRow {
            enrollment_id,
            student_id,
            student_name,
            student_email,
            status,
            remarks: remarks.unwrap_or_default(),
            record_id,
        });
    }

    Ok(SessionSheet { course, date, rows })
}
