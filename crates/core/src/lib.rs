//! Shared vocabulary for the opsdash real-time layer.
//!
//! Pure types, constants and helpers used by both the push-connection
//! crate (`opsdash-realtime`) and the job tracker (`opsdash-jobs`).
//! Kept free of I/O and async dependencies.

pub mod error;
pub mod job_status;
pub mod message_types;
pub mod types;
