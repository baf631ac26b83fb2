use serde_json::Value;

use crate::ipc::helpers::{
    db_conn, get_actor, get_optional_str, get_required_str, respond, to_json, HandlerErr,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::model::Role;
use crate::users::{self, UserInput};

fn user_input(params: &Value) -> Result<UserInput, HandlerErr> {
    Ok(UserInput {
        full_name: get_required_str(params, "fullName")?,
        email: get_required_str(params, "email")?,
        role: get_required_str(params, "role")?.parse::<Role>()?,
    })
}

fn users_list(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let actor = get_actor(conn, &req.params)?;
    let role = get_optional_str(&req.params, "role")?
        .map(|r| r.parse::<Role>())
        .transpose()?;
    to_json(&users::list_users(conn, &actor, role)?)
}

fn users_create(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let actor = get_actor(conn, &req.params)?;
    let input = user_input(&req.params)?;
    to_json(&users::create_user(conn, &actor, input)?)
}

fn users_update(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let actor = get_actor(conn, &req.params)?;
    let user_id = get_required_str(&req.params, "userId")?;
    let input = user_input(&req.params)?;
    to_json(&users::update_user(conn, &actor, &user_id, input)?)
}

fn users_delete(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let actor = get_actor(conn, &req.params)?;
    let user_id = get_required_str(&req.params, "userId")?;
    to_json(&users::delete_user(conn, &actor, &user_id)?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "users.list" => users_list(state, req),
        "users.create" => users_create(state, req),
        "users.update" => users_update(state, req),
        "users.delete" => users_delete(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
