//! Speedtest Exporter
//!
//! Runs speedtest-cli on a schedule and exposes the latest measurement as
//! Prometheus metrics.

pub mod app;
pub mod cli;
pub mod config;
pub mod controller;
pub mod core;
pub mod internal_metrics;
pub mod publisher;
pub mod selection;
pub mod speedtest;
pub mod task_manager;

// Re-export core types for convenience
pub use crate::core::*;
