//! # pmoserver - high level web server built on Axum
//!
//! Small layer over Axum used by the PMOSiriusXM binary:
//!
//! - [`server`] : assembling routers and serving them with graceful Ctrl+C shutdown
//! - [`logs`] : tracing subscriber bootstrap with a runtime-adjustable level
//!
//! ## Usage example
//!
//! ```rust,no_run
//! use pmoserver::{ServerBuilder, logs::{init_logging, LoggingOptions}};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     init_logging(LoggingOptions::default());
//!
//!     let mut server = ServerBuilder::new_configured().http_port(8080).build();
//!     server.add_handler("/status", || async { "ok" }).await;
//!
//!     server.start().await?;
//!     server.wait().await;
//!     Ok(())
//! }
//! ```

pub mod logs;
pub mod server;

pub use logs::{LogState, LoggingOptions, init_logging};
pub use server::{Server, ServerBuilder, ServerInfo};
