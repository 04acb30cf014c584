pub mod cache;
pub mod capture;
pub mod common;
pub mod completions;
pub mod drain;
pub mod queue;
