use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::{error, info};
use rusqlite::{params, Connection};
use shared::Keyword;
use tokio::sync::oneshot;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Database file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database worker unavailable: {0}")]
    WorkerGone(String),
}

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct DatabaseInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to DB thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join DB thread: {join_err:?}");
            }
        }
    }
}

// Safe to run on every process start.
fn init_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS image_keywords (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            image_name TEXT,
            keyword TEXT,
            confidence REAL,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Append-only keyword store. A dedicated worker thread owns the single
/// SQLite connection; callers reach it through a command channel, which
/// also serializes concurrent requests' inserts.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self, RepositoryError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("keyword-db".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(RepositoryError::Sqlite(err)));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }

                let init_result = init_schema(&conn).map_err(RepositoryError::Sqlite);
                if ready_tx.send(init_result).is_err() {
                    error!("DB initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Database thread shutting down");
            })?;

        ready_rx
            .recv()
            .map_err(|err| RepositoryError::WorkerGone(err.to_string()))??;

        info!("Database initialized at {}", db_path.display());

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    async fn execute<F, T>(&self, task: F) -> Result<T, RepositoryError>
    where
        F: FnOnce(&mut Connection) -> Result<T, RepositoryError> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("DB caller dropped before receiving result");
            }
        }));

        self.inner
            .sender
            .send(command)
            .map_err(|err| RepositoryError::WorkerGone(err.to_string()))?;

        reply_rx
            .await
            .map_err(|_| RepositoryError::WorkerGone("database thread terminated".to_string()))?
    }

    /// One row per keyword, one prepared statement for the batch. The batch
    /// is not wrapped in a transaction: a mid-batch failure leaves the rows
    /// inserted before it in place. `created_at` comes from the column
    /// default at insert time.
    pub async fn insert_keywords(
        &self,
        image_name: &str,
        keywords: &[Keyword],
    ) -> Result<(), RepositoryError> {
        let image_name = image_name.to_string();
        let keywords = keywords.to_vec();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "INSERT INTO image_keywords (image_name, keyword, confidence) VALUES (?1, ?2, ?3)",
            )?;
            for keyword in &keywords {
                stmt.execute(params![image_name, keyword.keyword, keyword.confidence])?;
            }
            Ok(())
        })
        .await
    }
}
