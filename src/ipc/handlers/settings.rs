use serde_json::Value;
use tracing::info;

use crate::authz::{self, Action};
use crate::config;
use crate::ipc::helpers::{
    db_conn, get_actor, get_policy, respond, to_json, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};

fn settings_get(state: &AppState) -> HandlerResult {
    let conn = db_conn(state)?;
    to_json(&get_policy(conn)?)
}

fn optional_f64(params: &Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| HandlerErr::new("bad_params", format!("{} must be a number", key))),
    }
}

/// Overlays whichever policy fields are present onto the stored policy.
fn settings_update(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let actor = get_actor(conn, &req.params)?;
    authz::authorize(&actor, Action::ManageSettings, None)?;

    let mut policy = get_policy(conn)?;
    if let Some(v) = optional_f64(&req.params, "goodThreshold")? {
        policy.good_threshold = v;
    }
    if let Some(v) = optional_f64(&req.params, "warningThreshold")? {
        policy.warning_threshold = v;
    }
    match req.params.get("requireActiveEnrollment") {
        None | Some(Value::Null) => {}
        Some(Value::Bool(b)) => policy.require_active_enrollment = *b,
        Some(_) => {
            return Err(HandlerErr::new(
                "bad_params",
                "requireActiveEnrollment must be a boolean",
            ))
        }
    }
    policy.validate()?;

    config::save_policy(conn, &policy)
        .map_err(|e| HandlerErr::new("db_update_failed", format!("{e:#}")))?;
    info!(
        good = policy.good_threshold,
        warning = policy.warning_threshold,
        strict = policy.require_active_enrollment,
        "attendance policy updated"
    );
    to_json(&policy)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "settings.get" => Some(respond(req, settings_get(state))),
        "settings.update" => Some(respond(req, settings_update(state, req))),
        _ => None,
    }
}
