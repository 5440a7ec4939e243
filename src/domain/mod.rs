pub mod dashboard;
pub mod models;
pub mod timer;
