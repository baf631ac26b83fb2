//! Role-based authorization.
//!
//! The acting user is resolved once per request into an [`Actor`] and every
//! permission question is answered by matching on that variant. The gate
//! never touches the store; callers load the actor and the target course and
//! ask [`authorize`] before they write anything.

use rusqlite::{Connection, OptionalExtension};
use std::collections::BTreeSet;

use crate::error::{CoreError, CoreResult};
use crate::model::{Course, Role, User, USER_COLUMNS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    Admin {
        id: String,
    },
    Teacher {
        id: String,
        owned_courses: BTreeSet<String>,
    },
    Student {
        id: String,
        /// Courses with an enrollment row, active or dropped.
        enrolled_courses: BTreeSet<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ManageUsers,
    ManageCourses,
    ManageSettings,
    BrowseCourses,
    ViewCourse,
    ManageEnrollments,
    MarkAttendance,
    ViewCourseReport,
    SelfEnroll,
    SelfDrop,
    ViewOwnAttendance,
}

impl Actor {
    pub fn id(&self) -> &str {
        match self {
            Actor::Admin { id } | Actor::Teacher { id, .. } | Actor::Student { id, .. } => id,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Actor::Admin { .. } => Role::Admin,
            Actor::Teacher { .. } => Role::Teacher,
            Actor::Student { .. } => Role::Student,
        }
    }
}

pub fn can_act(actor: &Actor, action: Action, course: Option<&Course>) -> bool {
    match actor {
        Actor::Admin { .. } => true,
        Actor::Teacher { owned_courses, .. } => match action {
            Action::BrowseCourses => true,
            Action::ViewCourse
            | Action::ManageEnrollments
            | Action::MarkAttendance
            | Action::ViewCourseReport => course.is_some_and(|c| owned_courses.contains(&c.id)),
            Action::ManageUsers
            | Action::ManageCourses
            | Action::ManageSettings
            | Action::SelfEnroll
            | Action::SelfDrop
            | Action::ViewOwnAttendance => false,
        },
        Actor::Student {
            enrolled_courses, ..
        } => match action {
            Action::BrowseCourses | Action::SelfEnroll | Action::SelfDrop => true,
            Action::ViewOwnAttendance => match course {
                Some(c) => enrolled_courses.contains(&c.id),
                None => true,
            },
            Action::ManageUsers
            | Action::ManageCourses
            | Action::ManageSettings
            | Action::ViewCourse
            | Action::ManageEnrollments
            | Action::MarkAttendance
            | Action::ViewCourseReport => false,
        },
    }
}

pub fn authorize(actor: &Actor, action: Action, course: Option<&Course>) -> CoreResult<()> {
    if can_act(actor, action, course) {
        return Ok(());
    }
    Err(CoreError::forbidden(match course {
        Some(c) => format!(
            "{} {} may not {:?} on course {}",
            actor.role(),
            actor.id(),
            action,
            c.code
        ),
        None => format!("{} {} may not {:?}", actor.role(), actor.id(), action),
    }))
}

/// Students read only their own data; teachers read a student's data within
/// a course they own.
pub fn authorize_student_view(
    actor: &Actor,
    student_id: &str,
    course: Option<&Course>,
) -> CoreResult<()> {
    match actor {
        Actor::Admin { .. } => Ok(()),
        Actor::Teacher { .. } => {
            if course.is_none() {
                return Err(CoreError::forbidden(
                    "teachers must name one of their courses",
                ));
            }
            authorize(actor, Action::ViewCourseReport, course)
        }
        Actor::Student { id, .. } => {
            if id != student_id {
                return Err(CoreError::forbidden(
                    "students may only view their own attendance",
                ));
            }
            authorize(actor, Action::ViewOwnAttendance, course)
        }
    }
}

pub fn find_user(conn: &Connection, user_id: &str) -> CoreResult<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS);
    Ok(conn.query_row(&sql, [user_id], User::from_row).optional()?)
}

/// Resolves a user id into the tagged actor used by the gate.
pub fn load_actor(conn: &Connection, user_id: &str) -> CoreResult<Actor> {
    let user = find_user(conn, user_id)?.ok_or(CoreError::NotFound("actor"))?;
    Ok(match user.role {
        Role::Admin => Actor::Admin { id: user.id },
        Role::Teacher => {
            let owned_courses =
                collect_ids(conn, "SELECT id FROM courses WHERE teacher_id = ?", &user.id)?;
            Actor::Teacher {
                id: user.id,
                owned_courses,
            }
        }
        Role::Student => {
            let enrolled_courses = collect_ids(
                conn,
                "SELECT course_id FROM enrollments WHERE student_id = ?",
                &user.id,
            )?;
            Actor::Student {
                id: user.id,
                enrolled_courses,
            }
        }
    })
}

fn collect_ids(conn: &Connection, sql: &str, key: &str) -> CoreResult<BTreeSet<String>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map([key], |r| r.get::<_, String>(0))?
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(ids)
}
