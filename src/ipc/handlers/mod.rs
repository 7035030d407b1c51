pub mod admin;
pub mod core;
pub mod messages;
pub mod parents;
pub mod students;
