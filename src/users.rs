use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::authz::{self, Action, Actor};
use crate::error::{map_unique_violation, CoreError, CoreResult};
use crate::model::{now_timestamp, Role, User, USER_COLUMNS};

#[derive(Debug, Clone)]
pub struct UserInput {
    pub full_name: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDeleted {
    pub user_id: String,
    pub enrollments_removed: usize,
    pub records_removed: usize,
    pub courses_unassigned: usize,
}

pub fn require_user(conn: &Connection, user_id: &str) -> CoreResult<User> {
    authz::find_user(conn, user_id)?.ok_or(CoreError::NotFound("user"))
}

pub fn require_student(conn: &Connection, student_id: &str) -> CoreResult<User> {
    let user = authz::find_user(conn, student_id)?.ok_or(CoreError::NotFound("student"))?;
    if user.role != Role::Student {
        return Err(CoreError::validation(format!(
            "user {} is not a student",
            student_id
        )));
    }
    Ok(user)
}

/// Maps an authenticated email to the stored user.
pub fn resolve_email(conn: &Connection, email: &str) -> CoreResult<User> {
    let sql = format!(
        "SELECT {} FROM users WHERE email = ? COLLATE NOCASE",
        USER_COLUMNS
    );
    conn.query_row(&sql, [email.trim()], User::from_row)
        .optional()?
        .ok_or(CoreError::NotFound("user"))
}

pub fn list_users(conn: &Connection, actor: &Actor, role: Option<Role>) -> CoreResult<Vec<User>> {
    authz::authorize(actor, Action::ManageUsers, None)?;
    let mut sql = format!("SELECT {} FROM users", USER_COLUMNS);
    if role.is_some() {
        sql.push_str(" WHERE role = ?");
    }
    sql.push_str(" ORDER BY full_name COLLATE NOCASE, email");

    let mut stmt = conn.prepare(&sql)?;
    let rows = match role {
        Some(r) => stmt
            .query_map([r.as_str()], User::from_row)?
            .collect::<Result<Vec<_>, _>>()?,
        None => stmt
            .query_map([], User::from_row)?
            .collect::<Result<Vec<_>, _>>()?,
    };
    Ok(rows)
}

pub fn create_user(conn: &Connection, actor: &Actor, input: UserInput) -> CoreResult<User> {
    authz::authorize(actor, Action::ManageUsers, None)?;
    let input = validate_input(input)?;

    let user = User {
        id: Uuid::new_v4().to_string(),
        full_name: input.full_name,
        email: input.email,
        role: input.role,
        created_at: now_timestamp(),
    };
    conn.execute(
        "INSERT INTO users(id, full_name, email, role, created_at) VALUES(?, ?, ?, ?, ?)",
        (
            &user.id,
            &user.full_name,
            &user.email,
            user.role.as_str(),
            &user.created_at,
        ),
    )
    .map_err(|e| map_unique_violation(e, "user with this email"))?;
    info!(user_id = %user.id, role = %user.role, "user created");
    Ok(user)
}

/// Replaces name, email and role. A user leaving the student role has their
/// active enrollments dropped, and a user leaving the teacher role stops
/// owning their courses, so rosters and course owners keep the right role.
pub fn update_user(
    conn: &Connection,
    actor: &Actor,
    user_id: &str,
    input: UserInput,
) -> CoreResult<User> {
    authz::authorize(actor, Action::ManageUsers, None)?;
    let mut user = require_user(conn, user_id)?;
    let input = validate_input(input)?;
    let previous_role = user.role;

    user.full_name = input.full_name;
    user.email = input.email;
    user.role = input.role;

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE users SET full_name = ?, email = ?, role = ? WHERE id = ?",
        (&user.full_name, &user.email, user.role.as_str(), &user.id),
    )
    .map_err(|e| map_unique_violation(e, "user with this email"))?;

    let mut enrollments_dropped = 0;
    let mut courses_unassigned = 0;
    if previous_role != user.role {
        if previous_role == Role::Student {
            enrollments_dropped = tx.execute(
                "UPDATE enrollments SET active = 0 WHERE student_id = ? AND active = 1",
                [&user.id],
            )?;
        }
        if previous_role == Role::Teacher {
            courses_unassigned = tx.execute(
                "UPDATE courses SET teacher_id = NULL WHERE teacher_id = ?",
                [&user.id],
            )?;
        }
    }
    tx.commit()?;

    if previous_role != user.role {
        info!(user_id, from = %previous_role, to = %user.role, "user role reassigned");
    }
    if enrollments_dropped > 0 {
        warn!(user_id, enrollments_dropped, "role change dropped active enrollments");
    }
    if courses_unassigned > 0 {
        warn!(user_id, courses_unassigned, "role change left courses unassigned");
    }
    Ok(user)
}

/// Deletes a user other than the actor, together with the rows that cannot
/// outlive them. Courses they taught become unassigned and records they
/// marked lose their marked-by reference.
pub fn delete_user(conn: &Connection, actor: &Actor, user_id: &str) -> CoreResult<UserDeleted> {
    authz::authorize(actor, Action::ManageUsers, None)?;
    if actor.id() == user_id {
        return Err(CoreError::forbidden("you cannot delete your own account"));
    }
    let user = require_user(conn, user_id)?;

    let tx = conn.unchecked_transaction()?;
    let records_removed = tx.execute(
        "DELETE FROM attendance_records WHERE student_id = ?",
        [&user.id],
    )?;
    tx.execute(
        "UPDATE attendance_records SET marked_by = NULL WHERE marked_by = ?",
        [&user.id],
    )?;
    let enrollments_removed =
        tx.execute("DELETE FROM enrollments WHERE student_id = ?", [&user.id])?;
    let courses_unassigned = tx.execute(
        "UPDATE courses SET teacher_id = NULL WHERE teacher_id = ?",
        [&user.id],
    )?;
    tx.execute("DELETE FROM users WHERE id = ?", [&user.id])?;
    tx.commit()?;

    if courses_unassigned > 0 {
        warn!(user_id, courses_unassigned, "deleted teacher left courses unassigned");
    }
    info!(user_id, role = %user.role, "user deleted");
    Ok(UserDeleted {
        user_id: user.id,
        enrollments_removed,
        records_removed,
        courses_unassigned,
    })
}

fn validate_input(input: UserInput) -> CoreResult<UserInput> {
    let full_name = input.full_name.trim().to_string();
    let email = input.email.trim().to_string();
    if full_name.is_empty() {
        return Err(CoreError::validation("fullName must not be empty"));
    }
    let well_formed = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !domain.contains('@')
        }
        None => false,
    };
    if !well_formed || email.chars().any(char::is_whitespace) {
        return Err(CoreError::validation(format!(
            "email is not a valid address: {:?}",
            email
        )));
    }
    Ok(UserInput {
        full_name,
        email,
        role: input.role,
    })
}
