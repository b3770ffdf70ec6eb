pub mod commands;
pub mod config;
pub mod error;
/// NDJSON transcript of exchanges and lifecycle events, with rotation.
pub mod history;
pub mod http;
pub mod input;
pub mod session;
pub mod ws;

pub use error::{ClientError, Result};
pub use session::{Flow, Session};
