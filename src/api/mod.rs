pub mod contractors;
pub mod employees;
pub mod expenses;
pub mod permissions;
pub mod projects;
pub mod reports;
pub mod transactions;
pub mod users;
