//! # linkdigest
//!
//! A small service that collects links submitted per email address and, once
//! enough have accumulated, mails the user a digest of AI-written summaries.
//!
//! ## Features
//!
//! - **Per-user queues**: JSON files or sled, with per-key serialized updates
//! - **Bounded workers**: digests run on a fixed pool with a deadline per job
//! - **Structured rendering**: summaries are parsed before HTML is emitted

pub mod agent;
pub mod config;
pub mod mail;
pub mod render;
pub mod server;
pub mod storage;
pub mod summary;
pub mod worker;

pub use config::Config;
pub use storage::{LinkStore, UserLinks};
pub use summary::LinkSummary;
