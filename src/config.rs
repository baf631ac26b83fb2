use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::db;
use crate::error::{CoreError, CoreResult};

pub const POLICY_SETTINGS_KEY: &str = "attendance.policy";

pub const LOG_ENV: &str = "ROLLCALL_LOG";
pub const WORKSPACE_ENV: &str = "ROLLCALL_WORKSPACE";

/// Process-level settings read once at startup.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub log_filter: String,
    pub workspace: Option<PathBuf>,
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        let log_filter = std::env::var(LOG_ENV)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "info".to_string());
        let workspace = std::env::var_os(WORKSPACE_ENV)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        DaemonConfig {
            log_filter,
            workspace,
        }
    }
}

/// Workspace-level attendance policy, stored in the settings table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttendancePolicy {
    pub good_threshold: f64,
    pub warning_threshold: f64,
    /// Reject marks for students without an active enrollment in the course.
    pub require_active_enrollment: bool,
}

impl Default for AttendancePolicy {
    fn default() -> Self {
        AttendancePolicy {
            good_threshold: 75.0,
            warning_threshold: 60.0,
            require_active_enrollment: false,
        }
    }
}

impl AttendancePolicy {
    pub fn validate(&self) -> CoreResult<()> {
        let in_range = |v: f64| v.is_finite() && (0.0..=100.0).contains(&v);
        if !in_range(self.good_threshold) || !in_range(self.warning_threshold) {
            return Err(CoreError::validation(
                "thresholds must be between 0 and 100",
            ));
        }
        if self.warning_threshold > self.good_threshold {
            return Err(CoreError::validation(
                "warningThreshold must not exceed goodThreshold",
            ));
        }
        Ok(())
    }
}

pub fn load_policy(conn: &Connection) -> anyhow::Result<AttendancePolicy> {
    match db::settings_get_json(conn, POLICY_SETTINGS_KEY)? {
        Some(v) => Ok(serde_json::from_value(v)?),
        None => Ok(AttendancePolicy::default()),
    }
}

pub fn save_policy(conn: &Connection, policy: &AttendancePolicy) -> anyhow::Result<()> {
    db::settings_set_json(conn, POLICY_SETTINGS_KEY, &serde_json::to_value(policy)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_setting_yields_defaults() {
        let conn = db::test_conn();
        let p = load_policy(&conn).expect("load");
        assert_eq!(p, AttendancePolicy::default());
        assert_eq!(p.good_threshold, 75.0);
        assert_eq!(p.warning_threshold, 60.0);
        assert!(!p.require_active_enrollment);
    }

    #[test]
    fn partial_setting_fills_remaining_fields_from_defaults() {
        let conn = db::test_conn();
        db::settings_set_json(
            &conn,
            POLICY_SETTINGS_KEY,
            &serde_json::json!({ "requireActiveEnrollment": true }),
        )
        .expect("set");
        let p = load_policy(&conn).expect("load");
        assert!(p.require_active_enrollment);
        assert_eq!(p.good_threshold, 75.0);
    }

    #[test]
    fn validate_rejects_inverted_thresholds() {
        let p = AttendancePolicy {
            good_threshold: 50.0,
            warning_threshold: 70.0,
            require_active_enrollment: false,
        };
        assert!(p.validate().is_err());
        assert!(AttendancePolicy::default().validate().is_ok());
    }
}
