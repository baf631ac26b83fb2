use rusqlite::Connection;
use uuid::Uuid;

use crate::authz::{self, Actor};
use crate::db;
use crate::model::{now_timestamp, Role};

/// In-memory workspace with one admin, two teachers, two students and a
/// course owned by the first teacher.
pub struct Fixture {
    pub conn: Connection,
    pub admin: String,
    pub teacher: String,
    pub other_teacher: String,
    pub student_a: String,
    pub student_b: String,
    pub course_id: String,
}

impl Fixture {
    pub fn new() -> Self {
        let conn = db::test_conn();
        let admin = add_user(&conn, "Ada Admin", "ada@school.test", Role::Admin);
        let teacher = add_user(&conn, "Tom Teacher", "tom@school.test", Role::Teacher);
        let other_teacher = add_user(&conn, "Olga Other", "olga@school.test", Role::Teacher);
        let student_a = add_user(&conn, "Alice Able", "alice@school.test", Role::Student);
        let student_b = add_user(&conn, "Bob Baker", "bob@school.test", Role::Student);
        let course_id = add_course(&conn, "CS301", Some(teacher.as_str()));
        Fixture {
            conn,
            admin,
            teacher,
            other_teacher,
            student_a,
            student_b,
            course_id,
        }
    }

    pub fn admin_actor(&self) -> Actor {
        authz::load_actor(&self.conn, &self.admin).expect("load admin")
    }

    pub fn teacher_actor(&self) -> Actor {
        authz::load_actor(&self.conn, &self.teacher).expect("load teacher")
    }

    pub fn other_teacher_actor(&self) -> Actor {
        authz::load_actor(&self.conn, &self.other_teacher).expect("load other teacher")
    }

    pub fn student_actor(&self, id: &str) -> Actor {
        authz::load_actor(&self.conn, id).expect("load student")
    }

    pub fn enroll(&self, student_id: &str) {
        enroll_in(&self.conn, &self.course_id, student_id);
    }

    pub fn drop_enrollment(&self, student_id: &str) {
        self.conn
            .execute(
                "UPDATE enrollments SET active = 0 WHERE course_id = ? AND student_id = ?",
                (&self.course_id, student_id),
            )
            .expect("drop enrollment");
    }

    pub fn add_student(&self, name: &str) -> String {
        let email = format!("{}@school.test", name.to_ascii_lowercase().replace(' ', "."));
        add_user(&self.conn, name, &email, Role::Student)
    }

    /// Writes a record directly, bypassing the upsert engine.
    pub fn record(&self, course_id: &str, student_id: &str, date: &str, status: &str) {
        self.conn
            .execute(
                "INSERT INTO attendance_records(
                    id, course_id, student_id, date, status, remarks, marked_by, created_at
                 ) VALUES(?, ?, ?, ?, ?, NULL, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    course_id,
                    student_id,
                    date,
                    status,
                    &self.teacher,
                    now_timestamp(),
                ),
            )
            .expect("insert attendance record");
    }
}

pub fn add_user(conn: &Connection, name: &str, email: &str, role: Role) -> String {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, full_name, email, role, created_at) VALUES(?, ?, ?, ?, ?)",
        (&id, name, email, role.as_str(), now_timestamp()),
    )
    .expect("insert user");
    id
}

pub fn add_course(conn: &Connection, code: &str, teacher: Option<&str>) -> String {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO courses(id, name, code, credit_hours, teacher_id, created_at)
         VALUES(?, ?, ?, 3, ?, ?)",
        (&id, format!("Course {}", code), code, teacher, now_timestamp()),
    )
    .expect("insert course");
    id
}

pub fn enroll_in(conn: &Connection, course_id: &str, student_id: &str) {
    conn.execute(
        "INSERT INTO enrollments(id, student_id, course_id, enrolled_at, active)
         VALUES(?, ?, ?, ?, 1)",
        (Uuid::new_v4().to_string(), student_id, course_id, now_timestamp()),
    )
    .expect("insert enrollment");
}
