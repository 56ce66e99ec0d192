use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;

use chatdb::{Config, Mode, SchemaStatus, mask_password};
use clap::Parser;
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

/// Provision the chat application schema in a Supabase Postgres database.
///
/// Without flags this drops and recreates the profiles, conversations,
/// conversation_participants and messages tables.
#[derive(Parser, Debug)]
#[command(name = "chatdb", version)]
struct Cli {
    /// Only add message status fields to existing tables
    #[arg(long)]
    add_status_only: bool,

    /// Database connection URL
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// Logical replication publication to add the tables to
    #[arg(long, env = "CHATDB_PUBLICATION", default_value = chatdb::DEFAULT_PUBLICATION)]
    publication: String,

    /// Milliseconds to wait between the schema changes and the publication
    /// step (defaults to 2000 for full setup, 1000 with --add-status-only)
    #[arg(long, env = "CHATDB_SETTLE_MS")]
    settle_ms: Option<u64>,

    /// Print the SQL that would run, without connecting
    #[arg(long, conflicts_with = "verify")]
    dry_run: bool,

    /// Inspect the database and report what is missing, without changing it
    #[arg(long, conflicts_with = "add_status_only")]
    verify: bool,
}

impl Cli {
    fn mode(&self) -> Mode {
        if self.add_status_only {
            Mode::AddStatusOnly
        } else {
            Mode::FullSetup
        }
    }

    fn config(&self) -> chatdb::Result<Config> {
        let mut config =
            Config::from_url(self.database_url.clone())?.with_publication(&self.publication);
        if let Some(ms) = self.settle_ms {
            config = config.with_settle_delay(Duration::from_millis(ms));
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "chatdb=info".into()),
        )
        .with_target(false)
        .without_time()
        .init();

    let cli = Cli::parse();

    if run(&cli, &mut std::io::stdout()) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Carry out whatever `cli` asks for. Returns whether the process should
/// exit successfully.
fn run(cli: &Cli, out: &mut impl Write) -> bool {
    if cli.dry_run {
        return match write!(out, "{}", cli.mode().script(&cli.publication)) {
            Ok(()) => true,
            Err(e) => {
                eprintln!("{} {}", "error:".red().bold(), e);
                false
            }
        };
    }

    let config = match cli.config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            return false;
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{} failed to start runtime: {}", "error:".red().bold(), e);
            return false;
        }
    };

    tracing::debug!(database = %mask_password(&config.database_url), mode = ?cli.mode());

    if cli.verify {
        runtime.block_on(verify(&config))
    } else {
        runtime.block_on(async {
            match cli.mode() {
                Mode::FullSetup => chatdb::run_full_setup(&config).await,
                Mode::AddStatusOnly => chatdb::run_additive_migration(&config).await,
            }
        })
    }
}

async fn verify(config: &Config) -> bool {
    match chatdb::verify::verify(config).await {
        Ok(status) => {
            print_status(&status, &config.publication);
            status.is_complete()
        }
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            false
        }
    }
}

fn print_status(status: &SchemaStatus, publication: &str) {
    println!("Schema ({} tables):", status.tables.len());
    println!();
    for t in &status.tables {
        let mut attrs = Vec::new();
        if t.rls_enabled {
            attrs.push("RLS".to_string());
        }
        if t.has_policy {
            attrs.push(t.table.policy_name());
        }
        if t.published {
            attrs.push(publication.to_string());
        }

        let attrs_str = if attrs.is_empty() {
            String::new()
        } else {
            format!(" [{}]", attrs.join(", "))
        };

        if t.exists {
            println!("  {} {}{}", "✓".green(), t.table, attrs_str);
        } else {
            println!("  {} {} (missing)", "✗".red(), t.table);
        }
    }

    println!();
    for (column, present) in &status.status_columns {
        let mark = if *present {
            "✓".green().to_string()
        } else {
            "✗".red().to_string()
        };
        println!("  {} messages.{}", mark, column);
    }
    println!();

    let missing = status.missing();
    if missing.is_empty() {
        println!("{}", "Schema is complete.".green().bold());
    } else {
        println!("{}", "Missing:".yellow().bold());
        for item in missing {
            println!("  - {}", item);
        }
    }
}
