//! HTTP endpoints served next to the controller
//!
//! `/health` for probes and, with the `metrics` feature, `/metrics` for
//! Prometheus scraping.

mod handlers;
mod server;

pub use server::{router, run_server};
