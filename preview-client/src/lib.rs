//! # preview-client: headless remote UI
//!
//! Connects to a render server, completes the ready handshake, decodes
//! the live preview on a background thread and samples it at display
//! cadence. Telemetry is logged, received HDR images are written as PFM,
//! and the configured control values are pushed to the server.

pub mod config;
pub mod connection;
pub mod display;
pub mod telemetry;
