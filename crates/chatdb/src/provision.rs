//! The schema provisioner.
//!
//! A run is linear: connect, execute the mode's DDL payload, wait for the
//! settle delay, add every table to the realtime publication, close. Each
//! statement commits on its own, so a failure part-way leaves whatever ran
//! before it in place.

use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info, warn};

use crate::error::describe;
use crate::schema::Table;
use crate::traced::{Connection, ConnectionExt, TracedConn};
use crate::{Config, Error, Result, Step, mask_password, sql};

/// Which payload a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Drop and recreate everything.
    FullSetup,
    /// Only add the message status columns and reinstall the trigger.
    AddStatusOnly,
}

impl Mode {
    /// The DDL payload run before the publication step.
    pub fn payload(self) -> &'static str {
        match self {
            Mode::FullSetup => sql::SETUP_SQL,
            Mode::AddStatusOnly => sql::ADD_MESSAGE_STATUS_SQL,
        }
    }

    pub fn step(self) -> Step {
        match self {
            Mode::FullSetup => Step::Setup,
            Mode::AddStatusOnly => Step::AddStatusColumns,
        }
    }

    // Not known to be required; a zero settle delay skips it.
    pub fn default_settle(self) -> Duration {
        match self {
            Mode::FullSetup => Duration::from_secs(2),
            Mode::AddStatusOnly => Duration::from_secs(1),
        }
    }

    /// Everything the mode would send, publication statements included.
    pub fn script(self, publication: &str) -> String {
        format!(
            "{}\n{}",
            self.payload(),
            sql::realtime_script(publication)
        )
    }

    fn narration(self) -> Narration {
        match self {
            Mode::FullSetup => Narration {
                connecting: "Connecting to database for full setup...",
                executing: "Connection successful. Executing setup script...",
                executed: "Main SQL script executed successfully.",
                realtime: "Enabling real-time features...",
                realtime_done: "Real-time features enabled successfully.",
                done: "Database setup completed successfully with tables and message status functionality!",
                failed: "Error executing SQL script",
            },
            Mode::AddStatusOnly => Narration {
                connecting: "Connecting to database to add message status fields...",
                executing: "Connection successful. Adding message status fields...",
                executed: "Message status fields added successfully.",
                realtime: "Ensuring real-time features are enabled...",
                realtime_done: "Real-time features configuration completed.",
                done: "Message status fields added successfully!",
                failed: "Error adding message status fields",
            },
        }
    }
}

/// Progress lines for one mode.
struct Narration {
    connecting: &'static str,
    executing: &'static str,
    executed: &'static str,
    realtime: &'static str,
    realtime_done: &'static str,
    done: &'static str,
    failed: &'static str,
}

/// What happened when adding one table to the publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Added,
    AlreadyPublished,
    /// The attempt failed and was logged; the batch carried on.
    Skipped { reason: String },
}

/// Summary of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub mode: Mode,
    pub publication: Vec<(Table, PublishOutcome)>,
    pub elapsed: Duration,
}

impl RunReport {
    /// Tables that are in the publication after the run.
    pub fn published(&self) -> impl Iterator<Item = Table> + '_ {
        self.publication
            .iter()
            .filter(|(_, o)| !matches!(o, PublishOutcome::Skipped { .. }))
            .map(|(t, _)| *t)
    }

    pub fn skipped(&self) -> impl Iterator<Item = (Table, &str)> + '_ {
        self.publication.iter().filter_map(|(t, o)| match o {
            PublishOutcome::Skipped { reason } => Some((*t, reason.as_str())),
            _ => None,
        })
    }
}

/// An open connection plus the configuration it was opened with.
///
/// The client is released when the provisioner is dropped, which also ends
/// the background connection task, so early returns do not leak it.
pub struct Provisioner {
    client: Client,
    connection: JoinHandle<()>,
    config: Config,
}

impl Provisioner {
    pub async fn connect(config: &Config) -> Result<Self> {
        config.validate()?;
        debug!(database = %mask_password(&config.database_url), "connecting");

        let (client, connection) = tokio_postgres::connect(&config.database_url, NoTls)
            .await
            .map_err(Error::Connect)?;

        let connection = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("database connection error: {}", describe(&e));
            }
        });

        Ok(Self {
            client,
            connection,
            config: config.clone(),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Drop-and-recreate everything, then publish.
    pub async fn full_setup(self) -> Result<RunReport> {
        self.run(Mode::FullSetup).await
    }

    /// Add the status columns and trigger, then publish.
    pub async fn additive_migration(self) -> Result<RunReport> {
        self.run(Mode::AddStatusOnly).await
    }

    /// Add every table to the configured publication.
    pub async fn enable_realtime(&self) -> Result<Vec<(Table, PublishOutcome)>> {
        enable_realtime(&self.client, &self.config.publication).await
    }

    async fn run(self, mode: Mode) -> Result<RunReport> {
        let narration = mode.narration();
        let start = Instant::now();

        info!("{}", narration.executing);
        self.client
            .traced()
            .batch_execute(mode.payload())
            .await
            .map_err(Error::statement(mode.step()))?;
        info!("{}", narration.executed);

        let delay = self.config.settle_for(mode);
        if !delay.is_zero() {
            debug!(?delay, "waiting for DDL to settle");
            tokio::time::sleep(delay).await;
        }

        info!("{}", narration.realtime);
        let publication = self.enable_realtime().await?;
        info!("{}", narration.realtime_done);

        self.close().await;

        Ok(RunReport {
            mode,
            publication,
            elapsed: start.elapsed(),
        })
    }

    /// Close the connection and wait for the connection task to finish.
    pub async fn close(self) {
        drop(self.client);
        if let Err(e) = self.connection.await {
            warn!("connection task did not shut down cleanly: {}", e);
        }
    }
}

/// Add each table to `publication`, logging and moving on when one fails.
///
/// Only a failure to look up the publication itself is an error; per-table
/// failures become [`PublishOutcome::Skipped`].
pub async fn enable_realtime<C: Connection>(
    conn: &C,
    publication: &str,
) -> Result<Vec<(Table, PublishOutcome)>> {
    let traced = conn.traced();

    let exists: bool = traced
        .query_one(sql::PUBLICATION_EXISTS_SQL, &[&publication])
        .await
        .map_err(Error::statement(Step::Realtime))?
        .get(0);

    if !exists {
        let reason = format!("publication {publication} does not exist");
        warn!("{}; no table was added to it", reason);
        return Ok(Table::ALL
            .into_iter()
            .map(|table| {
                (
                    table,
                    PublishOutcome::Skipped {
                        reason: reason.clone(),
                    },
                )
            })
            .collect());
    }

    let mut outcomes = Vec::with_capacity(Table::ALL.len());
    for table in Table::ALL {
        let outcome = match publish_table(&traced, publication, table).await {
            Ok(outcome) => {
                match outcome {
                    PublishOutcome::Added => info!("Added {} to {}", table, publication),
                    _ => info!("Table {} already in {}", table, publication),
                }
                outcome
            }
            Err(e) => {
                let reason = describe(&e);
                info!(
                    "Table {} already in publication or other error: {}",
                    table, reason
                );
                PublishOutcome::Skipped { reason }
            }
        };
        outcomes.push((table, outcome));
    }

    Ok(outcomes)
}

async fn publish_table<C: Connection>(
    conn: &TracedConn<'_, C>,
    publication: &str,
    table: Table,
) -> std::result::Result<PublishOutcome, tokio_postgres::Error> {
    let row = conn
        .query_one(sql::PUBLICATION_MEMBER_SQL, &[&publication, &table.name()])
        .await?;
    if row.get::<_, bool>(0) {
        return Ok(PublishOutcome::AlreadyPublished);
    }

    match conn
        .execute(&sql::add_to_publication_sql(publication, table), &[])
        .await
    {
        Ok(_) => Ok(PublishOutcome::Added),
        Err(e) if e.code() == Some(&SqlState::DUPLICATE_OBJECT) => {
            Ok(PublishOutcome::AlreadyPublished)
        }
        Err(e) => Err(e),
    }
}

/// Connect and run `mode`, returning the typed result.
pub async fn provision(config: &Config, mode: Mode) -> Result<RunReport> {
    info!("{}", mode.narration().connecting);
    Provisioner::connect(config).await?.run(mode).await
}

/// Run the destructive full setup. Returns false, after logging, on any error.
pub async fn run_full_setup(config: &Config) -> bool {
    run_reporting(config, Mode::FullSetup).await
}

/// Run the additive status-column migration. Returns false, after logging,
/// on any error.
pub async fn run_additive_migration(config: &Config) -> bool {
    run_reporting(config, Mode::AddStatusOnly).await
}

async fn run_reporting(config: &Config, mode: Mode) -> bool {
    let narration = mode.narration();
    match provision(config, mode).await {
        Ok(report) => {
            for (table, reason) in report.skipped() {
                warn!(%table, "not added to publication {}: {}", config.publication, reason);
            }
            let published = report.published().count();
            info!(
                elapsed = ?report.elapsed,
                "{} {}/{} tables in {}.",
                narration.done,
                published,
                Table::ALL.len(),
                config.publication
            );
            true
        }
        Err(e) => {
            error!("{}: {}", narration.failed, e);
            false
        }
    }
}
