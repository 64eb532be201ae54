//! Library half of `opsdash-monitor`: configuration loading and the
//! logging handlers the binary wires into the realtime and job layers.

pub mod config;
pub mod handlers;
