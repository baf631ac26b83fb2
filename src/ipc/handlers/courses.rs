use serde_json::Value;

use crate::courses::{self, CourseInput};
use crate::ipc::helpers::{
    db_conn, get_actor, get_optional_str, get_required_str, respond, to_json, HandlerErr,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};

fn get_required_i64(params: &Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

fn course_input(params: &Value) -> Result<CourseInput, HandlerErr> {
    Ok(CourseInput {
        name: get_required_str(params, "name")?,
        code: get_required_str(params, "code")?,
        description: get_optional_str(params, "description")?,
        credit_hours: get_required_i64(params, "creditHours")?,
        teacher_id: get_optional_str(params, "teacherId")?.filter(|t| !t.trim().is_empty()),
    })
}

fn courses_list(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let actor = get_actor(conn, &req.params)?;
    to_json(&courses::list_courses(conn, &actor)?)
}

fn courses_get(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let actor = get_actor(conn, &req.params)?;
    let course_id = get_required_str(&req.params, "courseId")?;
    to_json(&courses::get_course(conn, &actor, &course_id)?)
}

fn courses_create(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let actor = get_actor(conn, &req.params)?;
    let input = course_input(&req.params)?;
    to_json(&courses::create_course(conn, &actor, input)?)
}

fn courses_update(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let actor = get_actor(conn, &req.params)?;
    let course_id = get_required_str(&req.params, "courseId")?;
    let input = course_input(&req.params)?;
    to_json(&courses::update_course(conn, &actor, &course_id, input)?)
}

fn courses_delete(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let actor = get_actor(conn, &req.params)?;
    let course_id = get_required_str(&req.params, "courseId")?;
    to_json(&courses::delete_course(conn, &actor, &course_id)?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "courses.list" => courses_list(state, req),
        "courses.get" => courses_get(state, req),
        "courses.create" => courses_create(state, req),
        "courses.update" => courses_update(state, req),
        "courses.delete" => courses_delete(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
