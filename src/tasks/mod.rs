//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - Sweep tick: runs the expired-row sweep check while the server is idle

mod sweep;

pub use sweep::spawn_sweep_task;
