//! Database layer for Rota

mod connection;
mod handled_repository;
mod migrations;
mod queue_repository;

pub use connection::Database;
pub use handled_repository::{HandledRepository, LibSqlHandledRepository};
pub use queue_repository::{LibSqlQueueRepository, QueueRepository};
