//! # preview-server: test render server
//!
//! Stands in for a renderer: waits for one remote UI, streams a scrolling
//! gradient as the live preview, reports fake progress and sample rates,
//! optionally sends an HDR test image, and applies the control values the
//! client changes until it asks to stop or detach.

pub mod config;
pub mod service;
