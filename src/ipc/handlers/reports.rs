use chrono::NaiveDate;
use serde_json::Value;

use crate::ipc::helpers::{
    db_conn, get_actor, get_optional_str, get_policy, get_required_str, respond, to_json,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::reports;

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn reports_daily_sheet_model(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let actor = get_actor(conn, &req.params)?;
    let course_id = get_required_str(&req.params, "courseId")?;
    let date = get_required_str(&req.params, "date")?;
    to_json(&reports::daily_report(conn, &actor, &course_id, &date)?)
}

fn reports_course_summary_model(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let actor = get_actor(conn, &req.params)?;
    let policy = get_policy(conn)?;
    let course_id = get_required_str(&req.params, "courseId")?;
    to_json(&reports::course_summary_report(
        conn,
        &actor,
        &course_id,
        &policy,
        today(),
    )?)
}

fn reports_student_report_model(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let actor = get_actor(conn, &req.params)?;
    let policy = get_policy(conn)?;
    let student_id =
        get_optional_str(&req.params, "studentId")?.unwrap_or_else(|| actor.id().to_string());
    let course_id = get_optional_str(&req.params, "courseId")?;
    to_json(&reports::student_report(
        conn,
        &actor,
        &student_id,
        course_id.as_deref(),
        &policy,
        today(),
    )?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "reports.dailySheetModel" => reports_daily_sheet_model(state, req),
        "reports.courseSummaryModel" => reports_course_summary_model(state, req),
        "reports.studentReportModel" => reports_student_report_model(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
