//! # PWA Common
//!
//! Shared plumbing for the offline agent crates.
//!
//! ## Features
//!
//! - Logging configuration and setup on top of `tracing-subscriber`
//! - A backoff schedule with jitter, used by the registration host to
//!   re-attempt failed installs

pub mod logging;
pub mod retry;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use retry::{retry_with_backoff, Backoff};
