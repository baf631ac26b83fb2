use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::warn;

use crate::authz::{self, Action};
use crate::backup;
use crate::db;
use crate::ipc::helpers::{db_conn, get_actor, get_required_str, respond, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request};

fn require_admin(state: &AppState, req: &Request) -> Result<PathBuf, HandlerErr> {
    let conn = db_conn(state)?;
    let actor = get_actor(conn, &req.params)?;
    authz::authorize(&actor, Action::ManageSettings, None)?;
    state
        .workspace
        .clone()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn backup_export(state: &AppState, req: &Request) -> HandlerResult {
    let workspace = require_admin(state, req)?;
    let out_path = get_required_str(&req.params, "outPath")?;

    let export = backup::export_workspace_bundle(&workspace, &PathBuf::from(&out_path))
        .map_err(|e| {
            HandlerErr::new("io_failed", format!("{e:#}"))
                .with_details(json!({ "path": out_path }))
        })?;
    Ok(json!({
        "path": out_path,
        "bundleFormat": export.bundle_format,
        "dbSha256": export.db_sha256,
        "entryCount": export.entry_count,
    }))
}

/// Replaces the workspace database. The open handle is dropped first and
/// the workspace is reopened afterwards whether or not the import succeeded.
fn backup_import(state: &mut AppState, req: &Request) -> HandlerResult {
    let workspace = require_admin(state, req)?;
    let in_path = get_required_str(&req.params, "inPath")?;
    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return Err(HandlerErr::new("not_found", "bundle file not found")
            .with_details(json!({ "path": in_path })));
    }

    state.db = None;
    let imported = backup::import_workspace_bundle(&src, &workspace);

    let conn = db::open_db(&workspace).map_err(|e| {
        HandlerErr::new("db_open_failed", format!("{e:#}"))
            .with_details(json!({ "path": workspace.to_string_lossy() }))
    })?;
    if let Err(e) = db::seed_bootstrap_admin(&conn) {
        warn!(error = %format!("{e:#}"), "failed to seed bootstrap admin after import");
    }
    state.db = Some(conn);

    let import = imported.map_err(|e| {
        HandlerErr::new("io_failed", format!("{e:#}")).with_details(json!({ "path": in_path }))
    })?;
    Ok(json!({
        "workspacePath": workspace.to_string_lossy(),
        "bundleFormatDetected": import.bundle_format_detected,
        "dbSha256": import.db_sha256,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(respond(req, backup_export(state, req))),
        "backup.importWorkspaceBundle" => {
            let result = backup_import(state, req);
            Some(respond(req, result))
        }
        _ => None,
    }
}
