pub mod attendance;
pub mod backup;
pub mod core;
pub mod courses;
pub mod enrollments;
pub mod reports;
pub mod settings;
pub mod stats;
pub mod users;
