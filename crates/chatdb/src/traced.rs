//! Traced database connection wrapper.
//!
//! Wraps a tokio-postgres client and logs every statement via tracing.

use std::future::Future;
use std::pin::Pin;

use tokio_postgres::types::ToSql;
use tokio_postgres::{Error, Row};
use tracing::Instrument;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, Error>> + Send + 'a>>;

/// A wrapper around a database connection that logs all statements via tracing.
///
/// Each call runs inside a `tracing::debug_span!` carrying the SQL, so
/// `RUST_LOG=chatdb=debug` shows exactly what was sent to the server.
///
/// # Example
///
/// ```ignore
/// use chatdb::ConnectionExt;
///
/// let traced = client.traced();
/// traced.batch_execute(chatdb::sql::SETUP_SQL).await?;
/// ```
pub struct TracedConn<'a, C: Connection> {
    conn: &'a C,
}

impl<'a, C: Connection> TracedConn<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// Run a multi-statement payload through the simple query protocol.
    pub async fn batch_execute(&self, sql: &str) -> Result<(), Error> {
        let span = tracing::debug_span!("db.batch", sql = %sql, bytes = sql.len());
        self.conn.batch_execute(sql).instrument(span).await
    }

    /// Execute a statement, returning the number of rows affected.
    pub async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<u64, Error> {
        let span = tracing::debug_span!(
            "db.execute",
            sql = %sql,
            params = params.len(),
            affected = tracing::field::Empty,
        );
        let affected = self
            .conn
            .execute(sql, params)
            .instrument(span.clone())
            .await?;
        span.record("affected", affected);
        Ok(affected)
    }

    /// Execute a query, returning all rows.
    pub async fn query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, Error> {
        let span = tracing::debug_span!(
            "db.query",
            sql = %sql,
            params = params.len(),
            rows = tracing::field::Empty,
        );
        let rows = self
            .conn
            .query(sql, params)
            .instrument(span.clone())
            .await?;
        span.record("rows", rows.len());
        Ok(rows)
    }

    /// Execute a query, returning exactly one row.
    pub async fn query_one(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Row, Error> {
        let span = tracing::debug_span!(
            "db.query",
            sql = %sql,
            params = params.len(),
            rows = 1u64,
        );
        self.conn.query_one(sql, params).instrument(span).await
    }
}

/// Extension trait to get a traced wrapper from a connection.
pub trait ConnectionExt: Connection + Sized {
    /// Wrap this connection in a `TracedConn` for statement logging.
    fn traced(&self) -> TracedConn<'_, Self> {
        TracedConn::new(self)
    }
}

impl<C: Connection> ConnectionExt for C {}

/// Trait for database connections that can run statements.
///
/// Implemented for `tokio_postgres::Client`.
pub trait Connection: Send + Sync {
    /// Run one or more `;`-separated statements without parameters.
    fn batch_execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, ()>;

    /// Execute a statement, returning the number of rows affected.
    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> BoxFuture<'a, u64>;

    /// Execute a query, returning all rows.
    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> BoxFuture<'a, Vec<Row>>;

    /// Execute a query, returning exactly one row.
    fn query_one<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> BoxFuture<'a, Row>;
}

impl Connection for tokio_postgres::Client {
    fn batch_execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(tokio_postgres::Client::batch_execute(self, sql))
    }

    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> BoxFuture<'a, u64> {
        Box::pin(tokio_postgres::Client::execute(self, sql, params))
    }

    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> BoxFuture<'a, Vec<Row>> {
        Box::pin(tokio_postgres::Client::query(self, sql, params))
    }

    fn query_one<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> BoxFuture<'a, Row> {
        Box::pin(tokio_postgres::Client::query_one(self, sql, params))
    }
}
