use std::fmt;

use thiserror::Error;

/// The payload a failing statement belonged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Drop-and-recreate tables, RLS, policies and trigger.
    Setup,
    /// `ADD COLUMN IF NOT EXISTS` for the status columns, plus trigger.
    AddStatusColumns,
    /// Realtime publication membership.
    Realtime,
    /// Read-only schema inspection.
    Verify,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Setup => "setup script",
            Step::AddStatusColumns => "message status migration",
            Step::Realtime => "realtime publication",
            Step::Verify => "schema verification",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("no database URL configured (pass --database-url or set DATABASE_URL)")]
    MissingDatabaseUrl,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("could not connect to database: {}", describe(.0))]
    Connect(#[source] tokio_postgres::Error),

    #[error("{step} failed: {}", describe(.source))]
    Statement {
        step: Step,
        #[source]
        source: tokio_postgres::Error,
    },
}

impl Error {
    pub(crate) fn statement(step: Step) -> impl FnOnce(tokio_postgres::Error) -> Self {
        move |source| Error::Statement { step, source }
    }

    /// The SQLSTATE reported by the server, if the error came from Postgres.
    pub fn sql_state(&self) -> Option<&tokio_postgres::error::SqlState> {
        match self {
            Error::Connect(e) | Error::Statement { source: e, .. } => e.code(),
            _ => None,
        }
    }
}

/// Render a postgres error as severity, SQLSTATE and server message when it
/// came from the server.
pub(crate) fn describe(err: &tokio_postgres::Error) -> String {
    match err.as_db_error() {
        Some(db) => format!("{} ({}): {}", db.severity(), db.code().code(), db.message()),
        None => err.to_string(),
    }
}
