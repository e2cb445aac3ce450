#![allow(clippy::uninlined_format_args)]

pub mod capture;
pub mod config;
pub mod metrics;
pub mod output;
pub mod protocol;
pub mod reassembly;
pub mod sanitize;
pub mod session;
pub mod ssh;
pub mod stream;
