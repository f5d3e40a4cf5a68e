//! Jimaku - Local Multilingual Subtitle Generation
//!
//! Resource-aware orchestration of local speech and translation models:
//! hardware is profiled once, each heavy model holds the accelerator
//! exclusively while resident, translation runs in an isolated worker
//! process, and every output is committed atomically so interrupted runs
//! resume where they stopped.

pub mod cli;
pub mod config;
pub mod error;
pub mod hardware;
pub mod isolation;
pub mod media;
pub mod model;
pub mod pipeline;
pub mod providers;
pub mod quality;
pub mod scheduler;
pub mod subtitle;
pub mod worker;
pub mod writer;

pub use error::{JimakuError, Result};
