//! HTTP serving surface for filetide: token-addressed pipeline execution
//! with streamed responses.

pub mod config;
pub mod response;
pub mod routes;
pub mod token;

pub use config::Cli;
pub use routes::{AppState, router};
pub use token::{MemoryTokenSource, TokenSource};
