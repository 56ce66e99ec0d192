//! Integration tests against real PostgreSQL.
//!
//! Supabase provides `auth.users`, `auth.role()` and the `supabase_realtime`
//! publication; the harness creates minimal stand-ins for them.
//!
//! Run with: cargo nextest run -p chatdb --features test-postgres --test postgres
//!
//! Note: Requires Docker to be running.

#![cfg(feature = "test-postgres")]

use std::time::Duration;

use chatdb::{Config, PublishOutcome, Table};
use chrono::{DateTime, Utc};
use testcontainers_modules::postgres::Postgres;
use testcontainers_modules::testcontainers::runners::AsyncRunner;
use testcontainers_modules::testcontainers::{ContainerAsync, ImageExt};
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls};
use uuid::Uuid;

const SUPABASE_STANDINS: &str = r#"
CREATE SCHEMA IF NOT EXISTS auth;
CREATE TABLE IF NOT EXISTS auth.users (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid()
);
CREATE OR REPLACE FUNCTION auth.role() RETURNS TEXT
    AS $$ SELECT 'authenticated'::text $$ LANGUAGE sql STABLE;
CREATE PUBLICATION supabase_realtime;
"#;

struct TestDb {
    _container: ContainerAsync<Postgres>,
    client: Client,
    config: Config,
    host: String,
    port: u16,
}

/// Set up a PostgreSQL container with the Supabase stand-ins installed.
async fn setup_postgres() -> TestDb {
    let container = Postgres::default()
        .with_tag("16-alpine")
        .start()
        .await
        .expect("failed to start postgres container");

    let host = container.get_host().await.expect("container host").to_string();
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("postgres port not available");

    let url = format!("postgres://postgres:postgres@{host}:{port}/postgres");

    // Connect with retries (postgres may not be fully ready even after port is open)
    let mut attempts = 0;
    let max_attempts = 10;
    let (client, connection) = loop {
        attempts += 1;
        match tokio_postgres::connect(&url, NoTls).await {
            Ok(result) => break result,
            Err(e) if attempts < max_attempts => {
                eprintln!("connection attempt {} failed: {}, retrying...", attempts, e);
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            Err(e) => panic!(
                "failed to connect to postgres after {} attempts: {}",
                attempts, e
            ),
        }
    };

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            eprintln!("connection error: {}", e);
        }
    });

    client
        .batch_execute(SUPABASE_STANDINS)
        .await
        .expect("failed to create supabase stand-ins");

    TestDb {
        _container: container,
        client,
        config: Config::new(url).with_settle_delay(Duration::ZERO),
        host,
        port,
    }
}

async fn create_user(client: &Client, username: &str) -> Uuid {
    let id: Uuid = client
        .query_one("INSERT INTO auth.users DEFAULT VALUES RETURNING id", &[])
        .await
        .unwrap()
        .get(0);
    client
        .execute(
            "INSERT INTO profiles (id, username) VALUES ($1, $2)",
            &[&id, &username],
        )
        .await
        .unwrap();
    id
}

async fn create_conversation(client: &Client) -> Uuid {
    client
        .query_one("INSERT INTO conversations DEFAULT VALUES RETURNING id", &[])
        .await
        .unwrap()
        .get(0)
}

async fn count(client: &Client, sql: &str, id: &Uuid) -> i64 {
    client.query_one(sql, &[id]).await.unwrap().get(0)
}

#[tokio::test]
async fn full_setup_installs_everything() {
    let db = setup_postgres().await;

    assert!(chatdb::run_full_setup(&db.config).await);

    let status = chatdb::verify_schema(&db.client, "supabase_realtime")
        .await
        .unwrap();
    assert!(status.is_complete(), "missing: {:?}", status.missing());
}

#[tokio::test]
async fn additive_migration_is_idempotent() {
    let db = setup_postgres().await;

    // An older schema without the status columns.
    db.client
        .batch_execute(
            "CREATE TABLE conversations (id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                updated_at TIMESTAMPTZ DEFAULT NOW());
             CREATE TABLE messages (id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                conversation_id UUID REFERENCES conversations(id), content TEXT NOT NULL);",
        )
        .await
        .unwrap();

    assert!(chatdb::run_additive_migration(&db.config).await);
    let first = chatdb::verify_schema(&db.client, "supabase_realtime")
        .await
        .unwrap();
    assert!(first.status_columns.iter().all(|(_, present)| *present));
    assert!(first.trigger);

    assert!(chatdb::run_additive_migration(&db.config).await);
    let second = chatdb::verify_schema(&db.client, "supabase_realtime")
        .await
        .unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn realtime_twice_reports_already_published() {
    let db = setup_postgres().await;
    assert!(chatdb::run_full_setup(&db.config).await);

    let again = chatdb::enable_realtime(&db.client, "supabase_realtime")
        .await
        .unwrap();
    assert_eq!(again.len(), 4);
    for (table, outcome) in &again {
        assert_eq!(*outcome, PublishOutcome::AlreadyPublished, "{table}");
    }

    assert!(chatdb::run_full_setup(&db.config).await);
}

#[tokio::test]
async fn missing_publication_does_not_abort_the_batch() {
    let db = setup_postgres().await;
    let config = db.config.clone().with_publication("no_such_publication");

    let provisioner = chatdb::Provisioner::connect(&config).await.unwrap();
    let report = provisioner.full_setup().await.unwrap();

    assert_eq!(report.publication.len(), 4);
    assert_eq!(report.skipped().count(), 4);
    assert_eq!(report.published().count(), 0);
    for (_, reason) in report.skipped() {
        assert_eq!(reason, "publication no_such_publication does not exist");
    }
    assert!(chatdb::run_full_setup(&config).await);
}

#[tokio::test]
async fn status_flag_updates_touch_conversation() {
    let db = setup_postgres().await;
    assert!(chatdb::run_full_setup(&db.config).await);

    let author = create_user(&db.client, "ada").await;
    let conversation = create_conversation(&db.client).await;
    let message: Uuid = db
        .client
        .query_one(
            "INSERT INTO messages (conversation_id, profile_id, content)
             VALUES ($1, $2, 'hi') RETURNING id",
            &[&conversation, &author],
        )
        .await
        .unwrap()
        .get(0);

    for flag in chatdb::STATUS_FLAGS {
        let before: DateTime<Utc> = db
            .client
            .query_one(
                "SELECT updated_at FROM conversations WHERE id = $1",
                &[&conversation],
            )
            .await
            .unwrap()
            .get(0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        db.client
            .execute(
                &format!("UPDATE messages SET {flag} = TRUE WHERE id = $1"),
                &[&message],
            )
            .await
            .unwrap();

        let after: DateTime<Utc> = db
            .client
            .query_one(
                "SELECT updated_at FROM conversations WHERE id = $1",
                &[&conversation],
            )
            .await
            .unwrap()
            .get(0);
        assert!(after > before, "{flag}: {after} <= {before}");
    }
}

#[tokio::test]
async fn duplicate_participant_is_rejected() {
    let db = setup_postgres().await;
    assert!(chatdb::run_full_setup(&db.config).await);

    let profile = create_user(&db.client, "grace").await;
    let conversation = create_conversation(&db.client).await;
    let insert = "INSERT INTO conversation_participants (conversation_id, profile_id)
                  VALUES ($1, $2)";

    db.client
        .execute(insert, &[&conversation, &profile])
        .await
        .unwrap();
    let err = db
        .client
        .execute(insert, &[&conversation, &profile])
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::UNIQUE_VIOLATION));
}

#[tokio::test]
async fn deleting_auth_user_cascades_but_keeps_conversation() {
    let db = setup_postgres().await;
    assert!(chatdb::run_full_setup(&db.config).await);

    let leaver = create_user(&db.client, "leaver").await;
    let stayer = create_user(&db.client, "stayer").await;
    let conversation = create_conversation(&db.client).await;

    for profile in [&leaver, &stayer] {
        db.client
            .execute(
                "INSERT INTO conversation_participants (conversation_id, profile_id)
                 VALUES ($1, $2)",
                &[&conversation, profile],
            )
            .await
            .unwrap();
        db.client
            .execute(
                "INSERT INTO messages (conversation_id, profile_id, content)
                 VALUES ($1, $2, 'hello')",
                &[&conversation, profile],
            )
            .await
            .unwrap();
    }

    db.client
        .execute("DELETE FROM auth.users WHERE id = $1", &[&leaver])
        .await
        .unwrap();

    let profiles = "SELECT count(*) FROM profiles WHERE id = $1";
    let participants = "SELECT count(*) FROM conversation_participants WHERE profile_id = $1";
    let messages = "SELECT count(*) FROM messages WHERE profile_id = $1";

    assert_eq!(count(&db.client, profiles, &leaver).await, 0);
    assert_eq!(count(&db.client, participants, &leaver).await, 0);
    assert_eq!(count(&db.client, messages, &leaver).await, 0);

    assert_eq!(count(&db.client, messages, &stayer).await, 1);
    assert_eq!(
        count(
            &db.client,
            "SELECT count(*) FROM conversations WHERE id = $1",
            &conversation
        )
        .await,
        1
    );
}

#[tokio::test]
async fn failing_setup_returns_false() {
    let db = setup_postgres().await;
    db.client
        .batch_execute("DROP TABLE auth.users CASCADE")
        .await
        .unwrap();

    let err = chatdb::provision(&db.config, chatdb::Mode::FullSetup)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        chatdb::Error::Statement {
            step: chatdb::Step::Setup,
            ..
        }
    ));
    assert_eq!(err.sql_state(), Some(&SqlState::UNDEFINED_TABLE));
    assert!(!chatdb::run_full_setup(&db.config).await);
}

#[tokio::test]
async fn verify_over_config_reports_empty_database() {
    let db = setup_postgres().await;
    let status = chatdb::verify::verify(&db.config).await.unwrap();
    assert!(!status.is_complete());
    assert!(status.tables.iter().all(|t| !t.exists));
    assert!(status.missing().contains(&format!("table {}", Table::Profiles)));
}

#[tokio::test]
async fn unreadable_publication_catalog_is_a_realtime_error() {
    let db = setup_postgres().await;
    db.client
        .batch_execute(
            "CREATE ROLE limited LOGIN PASSWORD 'limited';
             REVOKE SELECT ON pg_catalog.pg_publication FROM PUBLIC;",
        )
        .await
        .unwrap();

    let config = Config::new(format!(
        "postgres://limited:limited@{}:{}/postgres",
        db.host, db.port
    ))
    .with_settle_delay(Duration::ZERO);

    let provisioner = chatdb::Provisioner::connect(&config).await.unwrap();
    let err = provisioner.enable_realtime().await.unwrap_err();
    assert!(matches!(
        err,
        chatdb::Error::Statement {
            step: chatdb::Step::Realtime,
            ..
        }
    ));
    assert_eq!(err.sql_state(), Some(&SqlState::INSUFFICIENT_PRIVILEGE));
    assert!(err.to_string().starts_with("realtime publication failed"));
    provisioner.close().await;
}
