use chrono::NaiveDate;
use rusqlite::Row;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "teacher" => Ok(Role::Teacher),
            "student" => Ok(Role::Student),
            other => Err(CoreError::validation(format!(
                "role must be one of: admin, teacher, student (got {:?})",
                other
            ))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Excused => "excused",
        }
    }
}

impl FromStr for AttendanceStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            "late" => Ok(AttendanceStatus::Late),
            "excused" => Ok(AttendanceStatus::Excused),
            other => Err(CoreError::validation(format!(
                "status must be one of: present, absent, late, excused (got {:?})",
                other
            ))),
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub role: Role,
    pub created_at: String,
}

pub const USER_COLUMNS: &str = "id, full_name, email, role, created_at";

impl User {
    pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        let role_raw: String = r.get(3)?;
        let role = role_raw.parse::<Role>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(User {
            id: r.get(0)?,
            full_name: r.get(1)?,
            email: r.get(2)?,
            role,
            created_at: r.get(4)?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    pub name: String,
    pub code: String,
    pub description: Option<String>,
    pub credit_hours: i64,
    pub teacher_id: Option<String>,
    pub created_at: String,
}

pub const COURSE_COLUMNS: &str =
    "id, name, code, description, credit_hours, teacher_id, created_at";

impl Course {
    pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Course {
            id: r.get(0)?,
            name: r.get(1)?,
            code: r.get(2)?,
            description: r.get(3)?,
            credit_hours: r.get(4)?,
            teacher_id: r.get(5)?,
            created_at: r.get(6)?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: String,
    pub student_id: String,
    pub course_id: String,
    pub enrolled_at: String,
    pub active: bool,
}

pub const ENROLLMENT_COLUMNS: &str = "id, student_id, course_id, enrolled_at, active";

impl Enrollment {
    pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Enrollment {
            id: r.get(0)?,
            student_id: r.get(1)?,
            course_id: r.get(2)?,
            enrolled_at: r.get(3)?,
            active: r.get::<_, i64>(4)? != 0,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub course_id: String,
    pub student_id: String,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub remarks: Option<String>,
    pub marked_by: Option<String>,
    pub created_at: String,
}

pub const ATTENDANCE_COLUMNS: &str =
    "id, course_id, student_id, date, status, remarks, marked_by, created_at";

impl AttendanceRecord {
    pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        let date_raw: String = r.get(3)?;
        let date = NaiveDate::parse_from_str(&date_raw, "%Y-%m-%d").map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let status_raw: String = r.get(4)?;
        let status = status_raw.parse::<AttendanceStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(AttendanceRecord {
            id: r.get(0)?,
            course_id: r.get(1)?,
            student_id: r.get(2)?,
            date,
            status,
            remarks: r.get(5)?,
            marked_by: r.get(6)?,
            created_at: r.get(7)?,
        })
    }
}

/// Storage form of a date-only value.
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
