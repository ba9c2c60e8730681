//! The HTTP/WebSocket surface for the review daemon: task submission and
//! management, issue feedback, live log streaming, and auth.
//!
//! Key modules:
//! - [`routes`] — the axum router and its handlers
//! - [`api_state`] — shared state handed to every handler
//! - [`auth`] — bearer-token identity resolution
//! - [`share_guard`] — owner/admin/share permission resolution
//! - [`log_bus`] — per-task log/event fan-out feeding `/ws/tasks/{id}/logs`
//! - [`api_error`] — the HTTP error taxonomy
//! - [`origin_validation`] — WebSocket Origin header allowlisting

pub mod api_error;
pub mod api_state;
pub mod auth;
pub mod log_bus;
pub mod origin_validation;
pub mod routes;
pub mod share_guard;
