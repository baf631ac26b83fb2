use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::info;

use crate::db;
use crate::ipc::helpers::{db_conn, get_required_str, respond, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::users;

fn handle_health(state: &mut AppState, req: &Request) -> Value {
    respond(
        req,
        Ok(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
        })),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> Value {
    let result = workspace_select(state, req);
    respond(req, result)
}

fn workspace_select(state: &mut AppState, req: &Request) -> HandlerResult {
    let path = get_required_str(&req.params, "path")?;
    let workspace = PathBuf::from(&path);

    let conn = db::open_db(&workspace).map_err(|e| {
        HandlerErr::new("db_open_failed", format!("{e:#}")).with_details(json!({ "path": path }))
    })?;
    let bootstrap_admin_id = db::seed_bootstrap_admin(&conn)
        .map_err(|e| HandlerErr::new("db_insert_failed", format!("{e:#}")))?;

    info!(workspace = %workspace.display(), "workspace selected");
    state.workspace = Some(workspace);
    state.db = Some(conn);
    Ok(json!({
        "workspacePath": path,
        "bootstrapAdminId": bootstrap_admin_id,
    }))
}

fn handle_session_resolve(state: &mut AppState, req: &Request) -> Value {
    respond(req, session_resolve(state, req))
}

/// Identity is verified by the host; the daemon only maps the email to a
/// stored user and role.
fn session_resolve(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let email = get_required_str(&req.params, "email")?;
    let user = users::resolve_email(conn, &email)?;
    Ok(json!({
        "userId": user.id,
        "role": user.role,
        "fullName": user.full_name,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "session.resolve" => Some(handle_session_resolve(state, req)),
        _ => None,
    }
}
