use serde_json::Value;

use crate::ipc::helpers::{
    db_conn, get_actor, get_optional_str, get_policy, get_required_str, respond, to_json,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::stats;

fn stats_course_summary(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let actor = get_actor(conn, &req.params)?;
    let policy = get_policy(conn)?;
    let course_id = get_required_str(&req.params, "courseId")?;
    to_json(&stats::compute_course_summary(
        conn, &actor, &course_id, &policy,
    )?)
}

/// `studentId` defaults to the actor, which is what a student's own view sends.
fn stats_student_summary(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let actor = get_actor(conn, &req.params)?;
    let policy = get_policy(conn)?;
    let student_id =
        get_optional_str(&req.params, "studentId")?.unwrap_or_else(|| actor.id().to_string());
    let course_id = get_optional_str(&req.params, "courseId")?;
    to_json(&stats::compute_student_summary(
        conn,
        &actor,
        &student_id,
        course_id.as_deref(),
        &policy,
    )?)
}

fn stats_dashboard(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let actor = get_actor(conn, &req.params)?;
    let policy = get_policy(conn)?;
    to_json(&stats::dashboard(conn, &actor, &policy)?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "stats.courseSummary" => stats_course_summary(state, req),
        "stats.studentSummary" => stats_student_summary(state, req),
        "stats.dashboard" => stats_dashboard(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
