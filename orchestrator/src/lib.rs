//! datashell orchestrator library
//!
//! Session-oriented code execution for data analysis: isolated interpreter
//! sessions, tabular file loading and bounded inspection of the results.

pub mod api;
pub mod config;
pub mod error;
pub mod executor;
pub mod ingest;
pub mod interp;
pub mod kernel;
pub mod logging;
pub mod mcp;
pub mod models;
pub mod sampling;
pub mod service;
pub mod session;
pub mod store;
pub mod table;

/// Application state shared across all handlers
pub struct AppState {
    pub service: service::DataService,
}

impl AppState {
    pub fn new(service: service::DataService) -> Self {
        Self { service }
    }
}
