//! SQL payloads.
//!
//! The fixed DDL is kept in `sql/*.sql` next to the crate and embedded at
//! build time. Publication statements are generated per table so each one
//! can fail on its own.

use crate::schema::Table;

/// Drop-and-recreate the four tables, enable RLS and install policies.
pub const TABLES_SQL: &str = include_str!("../sql/setup.sql");

/// Recreate the status-change trigger function and its trigger.
pub const STATUS_TRIGGER_SQL: &str = include_str!("../sql/status_trigger.sql");

/// Add the six message status columns if they are missing.
pub const STATUS_COLUMNS_SQL: &str = include_str!("../sql/add_message_status.sql");

/// The destructive full setup payload.
pub const SETUP_SQL: &str = concat!(
    include_str!("../sql/setup.sql"),
    "\n",
    include_str!("../sql/status_trigger.sql"),
);

/// The additive migration payload.
pub const ADD_MESSAGE_STATUS_SQL: &str = concat!(
    include_str!("../sql/add_message_status.sql"),
    "\n",
    include_str!("../sql/status_trigger.sql"),
);

/// Whether the publication exists at all.
pub const PUBLICATION_EXISTS_SQL: &str =
    "SELECT EXISTS (SELECT 1 FROM pg_publication WHERE pubname = $1)";

/// Membership check against `pg_publication_tables`.
pub const PUBLICATION_MEMBER_SQL: &str = "SELECT EXISTS (
    SELECT 1 FROM pg_publication_tables
    WHERE pubname = $1 AND schemaname = 'public' AND tablename = $2
)";

/// Quote an identifier for Postgres.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// `ALTER PUBLICATION ... ADD TABLE ...` for one table.
pub fn add_to_publication_sql(publication: &str, table: Table) -> String {
    format!(
        "ALTER PUBLICATION {} ADD TABLE public.{}",
        quote_ident(publication),
        table.name()
    )
}

/// Every publication statement, one per line, for display.
pub fn realtime_script(publication: &str) -> String {
    Table::ALL
        .into_iter()
        .map(|table| format!("{};\n", add_to_publication_sql(publication, table)))
        .collect()
}
