//! Gatekeeper - Request Admission and Usage Accounting
//!
//! This crate decides, per caller, whether an HTTP request may proceed. Each
//! authenticated user or anonymous address gets a fixed-window counter held
//! in process memory, and an axum middleware turns the decision into quota
//! headers or a 429 response.

pub mod admission;
pub mod config;
pub mod error;
pub mod http;
