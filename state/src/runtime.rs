use crate::model::CallStatus;
use crate::model::Checkpoint;
use crate::model::CheckpointError;
use crate::model::CheckpointRow;
use crate::model::Job;
use crate::model::JobCreateParams;
use crate::model::JobRow;
use crate::model::JobRun;
use crate::model::JobRunRow;
use crate::model::JobType;
use crate::model::LlmRequestRecord;
use crate::model::LlmRequestRow;
use crate::model::LlmResponseRecord;
use crate::model::LlmResponseRow;
use crate::model::RequestCreateParams;
use crate::model::ResponseCreateParams;
use crate::model::RunStatus;
use chrono::Utc;
use sqlx::Row;
use sqlx::SqlitePool;
use sqlx::migrate::Migrator;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::sqlite::SqliteJournalMode;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::sqlite::SqliteSynchronous;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

mod calls;
mod checkpoints;
mod jobs;
mod runs;

pub use jobs::JobSnapshot;

pub const STATE_DB_FILENAME: &str = "loreminer.sqlite";

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed store for jobs, runs, the LLM call ledger, and checkpoints.
///
/// All orchestration state lives here; the engine only needs CRUD-by-key and
/// simple status queries, so the surface is deliberately small.
#[derive(Clone)]
pub struct StateRuntime {
    pool: Arc<SqlitePool>,
}

impl StateRuntime {
    /// Open (and migrate) the database at `state_dir/loreminer.sqlite`.
    pub async fn init(state_dir: PathBuf) -> anyhow::Result<Arc<Self>> {
        tokio::fs::create_dir_all(&state_dir).await?;
        let pool = open_sqlite(&state_db_path(state_dir.as_path())).await?;
        Ok(Arc::new(Self {
            pool: Arc::new(pool),
        }))
    }

    /// In-memory database, used by tests and throwaway runs.
    pub async fn init_in_memory() -> anyhow::Result<Arc<Self>> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(true);
        // A single long-lived connection: the database lives and dies with it.
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        MIGRATOR.run(&pool).await?;
        Ok(Arc::new(Self {
            pool: Arc::new(pool),
        }))
    }
}

async fn open_sqlite(path: &Path) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    MIGRATOR.run(&pool).await?;
    Ok(pool)
}

pub fn state_db_path(state_dir: &Path) -> PathBuf {
    state_dir.join(STATE_DB_FILENAME)
}
