//! Provisions the chat application schema in a Supabase-hosted Postgres.
//!
//! This crate provides:
//! - A destructive full setup: drops and recreates the four chat tables,
//!   enables row-level security, installs policies and the message status
//!   trigger
//! - An additive migration that only adds the message status columns and
//!   reinstalls the trigger
//! - Realtime publication membership for every table
//! - Read-only verification of what is currently installed
//!
//! # Example
//!
//! ```ignore
//! let config = chatdb::Config::new(std::env::var("DATABASE_URL")?);
//!
//! if !chatdb::run_full_setup(&config).await {
//!     std::process::exit(1);
//! }
//! ```
//!
//! The boolean entry points log and swallow errors. Use [`Provisioner`]
//! directly to get a [`RunReport`] or a typed [`Error`].

mod config;
mod error;
pub mod provision;
pub mod schema;
pub mod sql;
mod traced;
pub mod verify;

pub use config::{Config, DEFAULT_PUBLICATION, mask_password};
pub use error::{Error, Step};
pub use provision::{
    Mode, Provisioner, PublishOutcome, RunReport, enable_realtime, provision,
    run_additive_migration, run_full_setup,
};
pub use schema::{STATUS_COLUMNS, STATUS_FLAGS, StatusColumn, Table};
pub use traced::{Connection, ConnectionExt, TracedConn};
pub use verify::{SchemaStatus, TableStatus, verify_schema};

/// Result type for chatdb operations.
pub type Result<T> = std::result::Result<T, Error>;
