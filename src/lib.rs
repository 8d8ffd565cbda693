//! Admission Control Service
//!
//! Admission control and automated incident response for multi-tenant APIs:
//! credential authentication, multi-window rate limiting, an ephemeral IP
//! block list, abusive-traffic detection, and an auditable security alert
//! pipeline.

pub mod api;
pub mod config;
pub mod core;
pub mod models;
pub mod utils;
