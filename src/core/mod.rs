//! Core module containing the main functionality of SerialView
//!
//! This module provides:
//! - Connection settings and their persisted layout
//! - Connections (serial devices and a synthetic source)
//! - The outbound line queue
//! - The background I/O worker with pause/resume and hot-swap
//! - Text decoding and line endings

pub mod codec;
pub mod connection;
pub mod queue;
pub mod settings;
pub mod worker;
