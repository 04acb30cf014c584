//! Client-facing services built on the queue, cache and sync engine.

mod queue;

pub use queue::CourierQueue;
