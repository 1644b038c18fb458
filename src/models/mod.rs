pub mod access;
pub mod incident;
pub mod job;
pub mod patch;
