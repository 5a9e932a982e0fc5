//! Agent Jobs: background execution and status tracking for agent runs.

pub mod adapters;
pub mod agents;
pub mod config;
pub mod error;
pub mod jobs;
pub mod service;
pub mod sse;
