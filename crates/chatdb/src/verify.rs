//! Read-only inspection of what is installed.
//!
//! Looks at the catalog rather than trusting that a previous run succeeded:
//! tables, RLS flags, policies, status columns, the trigger and publication
//! membership.

use std::collections::HashSet;

use crate::provision::Provisioner;
use crate::schema::{STATUS_COLUMNS, TRIGGER_FUNCTION, TRIGGER_NAME, Table};
use crate::traced::{Connection, ConnectionExt};
use crate::{Config, Error, Result, Step};

const TABLES_SQL: &str =
    "SELECT tablename::text, rowsecurity FROM pg_tables WHERE schemaname = 'public'";

const POLICIES_SQL: &str =
    "SELECT tablename::text, policyname::text FROM pg_policies WHERE schemaname = 'public'";

const MESSAGE_COLUMNS_SQL: &str = "SELECT column_name::text FROM information_schema.columns
    WHERE table_schema = 'public' AND table_name = 'messages'";

const TRIGGER_SQL: &str = "SELECT EXISTS (
    SELECT 1 FROM pg_trigger t
    JOIN pg_class c ON c.oid = t.tgrelid
    JOIN pg_namespace n ON n.oid = c.relnamespace
    WHERE n.nspname = 'public' AND c.relname = 'messages' AND t.tgname = $1
)";

const FUNCTION_SQL: &str = "SELECT EXISTS (
    SELECT 1 FROM pg_proc p
    JOIN pg_namespace n ON n.oid = p.pronamespace
    WHERE n.nspname = 'public' AND p.proname = $1
)";

const PUBLISHED_SQL: &str = "SELECT tablename::text FROM pg_publication_tables
    WHERE pubname = $1 AND schemaname = 'public'";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStatus {
    pub table: Table,
    pub exists: bool,
    pub rls_enabled: bool,
    pub has_policy: bool,
    pub published: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaStatus {
    pub tables: Vec<TableStatus>,
    /// Status column name and whether `messages` has it.
    pub status_columns: Vec<(&'static str, bool)>,
    pub trigger_function: bool,
    pub trigger: bool,
}

impl SchemaStatus {
    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }

    /// Human-readable list of everything that is not in place.
    pub fn missing(&self) -> Vec<String> {
        let mut missing = Vec::new();
        for t in &self.tables {
            if !t.exists {
                missing.push(format!("table {}", t.table));
                continue;
            }
            if !t.rls_enabled {
                missing.push(format!("row level security on {}", t.table));
            }
            if !t.has_policy {
                missing.push(format!("policy {}", t.table.policy_name()));
            }
            if !t.published {
                missing.push(format!("realtime publication of {}", t.table));
            }
        }
        for (column, present) in &self.status_columns {
            if !present {
                missing.push(format!("column messages.{column}"));
            }
        }
        if !self.trigger_function {
            missing.push(format!("function {TRIGGER_FUNCTION}()"));
        }
        if !self.trigger {
            missing.push(format!("trigger {TRIGGER_NAME}"));
        }
        missing
    }
}

/// Inspect the catalog through an existing connection.
pub async fn verify_schema<C: Connection>(conn: &C, publication: &str) -> Result<SchemaStatus> {
    let conn = conn.traced();
    let err = Error::statement;

    let rows = conn.query(TABLES_SQL, &[]).await.map_err(err(Step::Verify))?;
    let mut existing = HashSet::new();
    let mut rls = HashSet::new();
    for row in rows {
        let name: String = row.get(0);
        let Some(table) = Table::from_name(&name) else {
            continue;
        };
        if row.get::<_, bool>(1) {
            rls.insert(table);
        }
        existing.insert(table);
    }

    let policies: HashSet<(String, String)> = conn
        .query(POLICIES_SQL, &[])
        .await
        .map_err(err(Step::Verify))?
        .into_iter()
        .map(|row| (row.get(0), row.get(1)))
        .collect();

    let published: HashSet<String> = conn
        .query(PUBLISHED_SQL, &[&publication])
        .await
        .map_err(err(Step::Verify))?
        .into_iter()
        .map(|row| row.get(0))
        .collect();

    let columns: HashSet<String> = conn
        .query(MESSAGE_COLUMNS_SQL, &[])
        .await
        .map_err(err(Step::Verify))?
        .into_iter()
        .map(|row| row.get(0))
        .collect();

    let trigger: bool = conn
        .query_one(TRIGGER_SQL, &[&TRIGGER_NAME])
        .await
        .map_err(err(Step::Verify))?
        .get(0);

    let trigger_function: bool = conn
        .query_one(FUNCTION_SQL, &[&TRIGGER_FUNCTION])
        .await
        .map_err(err(Step::Verify))?
        .get(0);

    let tables = Table::ALL
        .into_iter()
        .map(|table| {
            let name = table.name();
            TableStatus {
                table,
                exists: existing.contains(&table),
                rls_enabled: rls.contains(&table),
                has_policy: policies.contains(&(name.to_string(), table.policy_name())),
                published: published.contains(name),
            }
        })
        .collect();

    Ok(SchemaStatus {
        tables,
        status_columns: STATUS_COLUMNS
            .iter()
            .map(|c| (c.name, columns.contains(c.name)))
            .collect(),
        trigger_function,
        trigger,
    })
}

/// Connect, inspect, disconnect.
pub async fn verify(config: &Config) -> Result<SchemaStatus> {
    let provisioner = Provisioner::connect(config).await?;
    let status = verify_schema(provisioner.client(), &config.publication).await;
    provisioner.close().await;
    status
}
