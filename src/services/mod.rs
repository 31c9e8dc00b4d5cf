//! Orchestration layer: enqueue, delivery attempts, and batch draining.

pub mod delivery_worker;
pub mod drainer;
pub mod event_queue;
