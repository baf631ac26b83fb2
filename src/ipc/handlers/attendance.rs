use serde_json::Value;

use crate::attendance::{self, AttendanceFilter, MarkEntry};
use crate::ipc::helpers::{
    db_conn, get_actor, get_optional_str, get_policy, get_required_str, get_status, respond,
    to_json, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};

fn mark_entry(params: &Value) -> Result<MarkEntry, HandlerErr> {
    Ok(MarkEntry {
        student_id: get_required_str(params, "studentId")?,
        status: get_status(params, "status")?,
        remarks: get_optional_str(params, "remarks")?,
    })
}

fn get_entries(params: &Value) -> Result<Vec<MarkEntry>, HandlerErr> {
    let Some(items) = params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "missing entries"));
    };
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            mark_entry(item).map_err(|e| {
                HandlerErr::new(e.code, format!("entries[{}]: {}", i, e.message))
            })
        })
        .collect()
}

fn attendance_session_open(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let actor = get_actor(conn, &req.params)?;
    let course_id = get_required_str(&req.params, "courseId")?;
    let date = get_required_str(&req.params, "date")?;
    to_json(&attendance::session_open(conn, &actor, &course_id, &date)?)
}

fn attendance_mark_one(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let actor = get_actor(conn, &req.params)?;
    let policy = get_policy(conn)?;
    let course_id = get_required_str(&req.params, "courseId")?;
    let date = get_required_str(&req.params, "date")?;
    let entry = mark_entry(&req.params)?;
    to_json(&attendance::mark_one(
        conn, &actor, &course_id, &date, &entry, &policy,
    )?)
}

fn attendance_mark_batch(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let actor = get_actor(conn, &req.params)?;
    let policy = get_policy(conn)?;
    let course_id = get_required_str(&req.params, "courseId")?;
    let date = get_required_str(&req.params, "date")?;
    let entries = get_entries(&req.params)?;
    to_json(&attendance::mark_batch(
        conn, &actor, &course_id, &date, &entries, &policy,
    )?)
}

fn attendance_mark_all(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let actor = get_actor(conn, &req.params)?;
    let policy = get_policy(conn)?;
    let course_id = get_required_str(&req.params, "courseId")?;
    let date = get_required_str(&req.params, "date")?;
    let status = get_status(&req.params, "status")?;
    to_json(&attendance::mark_all(
        conn, &actor, &course_id, &date, status, &policy,
    )?)
}

fn attendance_list(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let actor = get_actor(conn, &req.params)?;
    let date = get_optional_str(&req.params, "date")?
        .map(|d| attendance::normalize_date(&d))
        .transpose()?;
    let filter = AttendanceFilter {
        course_id: get_optional_str(&req.params, "courseId")?,
        student_id: get_optional_str(&req.params, "studentId")?,
        date,
    };
    to_json(&attendance::list_for_actor(conn, &actor, filter)?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "attendance.sessionOpen" => attendance_session_open(state, req),
        "attendance.markOne" => attendance_mark_one(state, req),
        "attendance.markBatch" => attendance_mark_batch(state, req),
        "attendance.markAll" => attendance_mark_all(state, req),
        "attendance.list" => attendance_list(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
