pub mod contractor;
pub mod employee;
pub mod expense;
pub mod permissions;
pub mod project;
pub mod redact;
pub mod role;
pub mod transaction;
pub mod user;
