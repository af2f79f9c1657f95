//! HTTP surface for the shared-file index.
//!
//! `GET /files` answers status and directory listings as XML, `POST /files`
//! takes share and unshare form submissions.

pub mod files;
pub mod server;

pub use server::{build_router, start_server, AppState, SharedState};

#[cfg(test)]
mod files_tests;
