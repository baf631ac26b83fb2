use serde_json::Value;

use crate::enrollments;
use crate::ipc::helpers::{
    db_conn, get_actor, get_required_str, respond, to_json, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};

fn get_student_ids(params: &Value) -> Result<Vec<String>, HandlerErr> {
    let Some(items) = params.get("studentIds").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "missing studentIds"));
    };
    items
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| HandlerErr::new("bad_params", "studentIds must be strings"))
        })
        .collect()
}

fn enrollments_manage(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let actor = get_actor(conn, &req.params)?;
    let course_id = get_required_str(&req.params, "courseId")?;
    to_json(&enrollments::manage_view(conn, &actor, &course_id)?)
}

fn enrollments_enroll(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let actor = get_actor(conn, &req.params)?;
    let course_id = get_required_str(&req.params, "courseId")?;
    let student_id = get_required_str(&req.params, "studentId")?;
    to_json(&enrollments::enroll_student(
        conn,
        &actor,
        &course_id,
        &student_id,
    )?)
}

fn enrollments_bulk_enroll(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let actor = get_actor(conn, &req.params)?;
    let course_id = get_required_str(&req.params, "courseId")?;
    let student_ids = get_student_ids(&req.params)?;
    to_json(&enrollments::bulk_enroll(
        conn,
        &actor,
        &course_id,
        &student_ids,
    )?)
}

fn enrollments_remove(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let actor = get_actor(conn, &req.params)?;
    let enrollment_id = get_required_str(&req.params, "enrollmentId")?;
    to_json(&enrollments::remove_enrollment(conn, &actor, &enrollment_id)?)
}

fn enrollments_self_enroll(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let actor = get_actor(conn, &req.params)?;
    let course_id = get_required_str(&req.params, "courseId")?;
    to_json(&enrollments::self_enroll(conn, &actor, &course_id)?)
}

fn enrollments_self_drop(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let actor = get_actor(conn, &req.params)?;
    let course_id = get_required_str(&req.params, "courseId")?;
    to_json(&enrollments::self_drop(conn, &actor, &course_id)?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "enrollments.manage" => enrollments_manage(state, req),
        "enrollments.enroll" => enrollments_enroll(state, req),
        "enrollments.bulkEnroll" => enrollments_bulk_enroll(state, req),
        "enrollments.remove" => enrollments_remove(state, req),
        "enrollments.selfEnroll" => enrollments_self_enroll(state, req),
        "enrollments.selfDrop" => enrollments_self_drop(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
