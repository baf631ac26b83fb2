use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::authz::{self, Actor};
use crate::config::{self, AttendancePolicy};
use crate::error::CoreError;
use crate::ipc::types::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::AttendanceStatus;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<CoreError> for HandlerErr {
    fn from(e: CoreError) -> Self {
        if let CoreError::Db(inner) = &e {
            warn!(error = %inner, "database error while handling request");
        }
        HandlerErr::new(e.code(), e.to_string())
    }
}

pub type HandlerResult = Result<Value, HandlerErr>;

pub fn respond(req: &Request, result: HandlerResult) -> Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn to_json<T: Serialize>(value: &T) -> HandlerResult {
    serde_json::to_value(value).map_err(|e| HandlerErr::new("serialize_failed", e.to_string()))
}

pub fn db_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

/// A string param, trimmed; missing or blank values are rejected.
pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    match params.get(key).and_then(|v| v.as_str()).map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(HandlerErr::new("bad_params", format!("missing {}", key))),
    }
}

/// Missing and `null` both read as `None`; other non-strings are rejected.
pub fn get_optional_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(HandlerErr::new(
            "bad_params",
            format!("{} must be a string", key),
        )),
    }
}

pub fn get_status(params: &Value, key: &str) -> Result<AttendanceStatus, HandlerErr> {
    Ok(get_required_str(params, key)?.parse::<AttendanceStatus>()?)
}

/// Loads the acting user named by `params.actorId`.
pub fn get_actor(conn: &Connection, params: &Value) -> Result<Actor, HandlerErr> {
    let actor_id = get_required_str(params, "actorId")?;
    Ok(authz::load_actor(conn, &actor_id)?)
}

pub fn get_policy(conn: &Connection) -> Result<AttendancePolicy, HandlerErr> {
    config::load_policy(conn).map_err(|e| HandlerErr::new("settings_invalid", format!("{e:#}")))
}
