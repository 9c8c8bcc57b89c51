// crates/ashfox-server/src/store/repo.rs
// The ProjectRepository port and its backends. The sqlite backend pools
// connections with deadpool and runs closures on blocking threads; the
// memory backend exists for tests and `memory` mode.

use super::state::StoredDocument;
use async_trait::async_trait;
use deadpool_sqlite::{Config, Hook, Pool, Runtime};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoError {
    /// A conditional write observed a different revision than expected.
    #[error("document revision conflict")]
    Conflict,

    #[error("repository I/O error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for RepoError {
    fn from(err: rusqlite::Error) -> Self {
        RepoError::Io(err.to_string())
    }
}

/// Durable document storage for the pipeline state and lock documents.
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn find(
        &self,
        tenant_id: &str,
        project_id: &str,
    ) -> Result<Option<StoredDocument>, RepoError>;

    /// Unconditional upsert.
    async fn save(&self, doc: StoredDocument) -> Result<(), RepoError>;

    /// Conditional write: `expected` is the revision the caller last read,
    /// or `None` when the document must not exist yet. Any mismatch is a
    /// [`RepoError::Conflict`].
    async fn save_if_revision(
        &self,
        doc: StoredDocument,
        expected: Option<&str>,
    ) -> Result<(), RepoError>;

    async fn remove(&self, tenant_id: &str, project_id: &str) -> Result<(), RepoError>;
}

// ---------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------

/// HashMap-backed repository. State is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    docs: Mutex<HashMap<(String, String), StoredDocument>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), StoredDocument>> {
        self.docs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ProjectRepository for MemoryRepository {
    async fn find(
        &self,
        tenant_id: &str,
        project_id: &str,
    ) -> Result<Option<StoredDocument>, RepoError> {
        Ok(self
            .lock()
            .get(&(tenant_id.to_string(), project_id.to_string()))
            .cloned())
    }

    async fn save(&self, doc: StoredDocument) -> Result<(), RepoError> {
        self.lock()
            .insert((doc.tenant_id.clone(), doc.project_id.clone()), doc);
        Ok(())
    }

    async fn save_if_revision(
        &self,
        doc: StoredDocument,
        expected: Option<&str>,
    ) -> Result<(), RepoError> {
        let mut docs = self.lock();
        let key = (doc.tenant_id.clone(), doc.project_id.clone());
        match (docs.get(&key), expected) {
            (None, None) => {
                docs.insert(key, doc);
                Ok(())
            }
            (Some(existing), Some(expected)) if existing.revision == expected => {
                docs.insert(key, doc);
                Ok(())
            }
            _ => Err(RepoError::Conflict),
        }
    }

    async fn remove(&self, tenant_id: &str, project_id: &str) -> Result<(), RepoError> {
        self.lock()
            .remove(&(tenant_id.to_string(), project_id.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------
// Sqlite backend
// ---------------------------------------------------------------

/// Sqlite-backed repository behind a deadpool connection pool.
pub struct SqliteRepository {
    pool: Pool,
    path: Option<PathBuf>,
}

impl SqliteRepository {
    /// Open a pooled database at the given path, creating the schema.
    pub async fn open(path: &Path) -> Result<Self, RepoError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RepoError::Io(e.to_string()))?;
        }
        let conn_str = path.to_string_lossy().to_string();
        Self::open_internal(conn_str, Some(path.to_path_buf())).await
    }

    /// Open a pooled in-memory database (shared cache, so every pooled
    /// connection sees the same state). Used by tests.
    pub async fn open_in_memory() -> Result<Self, RepoError> {
        let uri = format!(
            "file:ashfox_memdb_{}?mode=memory&cache=shared",
            uuid::Uuid::new_v4().simple()
        );
        Self::open_internal(uri, None).await
    }

    async fn open_internal(conn_str: String, path: Option<PathBuf>) -> Result<Self, RepoError> {
        let cfg = Config::new(&conn_str);
        let pool = cfg
            .builder(Runtime::Tokio1)
            .map_err(|e| RepoError::Io(format!("failed to create pool builder: {e}")))?
            .max_size(8)
            .post_create(Hook::async_fn(|conn, _metrics| {
                Box::pin(async move {
                    conn.interact(|conn| setup_connection(conn))
                        .await
                        .map_err(|e| {
                            deadpool_sqlite::HookError::Message(
                                format!("interact failed: {e}").into(),
                            )
                        })?
                        .map_err(|e| {
                            deadpool_sqlite::HookError::Message(
                                format!("connection setup failed: {e}").into(),
                            )
                        })
                })
            }))
            .build()
            .map_err(|e| RepoError::Io(format!("failed to build pool: {e}")))?;

        let repo = Self { pool, path };
        repo.interact(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS documents (
                     tenant_id  TEXT NOT NULL,
                     project_id TEXT NOT NULL,
                     revision   TEXT NOT NULL,
                     state_json TEXT NOT NULL,
                     created_at TEXT NOT NULL,
                     updated_at TEXT NOT NULL,
                     PRIMARY KEY (tenant_id, project_id)
                 );",
            )?;
            Ok(())
        })
        .await?;
        Ok(repo)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run a closure with a pooled connection on a blocking thread.
    async fn interact<F, R>(&self, f: F) -> Result<R, RepoError>
    where
        F: FnOnce(&Connection) -> Result<R, RepoError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| RepoError::Io(format!("failed to get connection: {e}")))?;
        conn.interact(move |conn| f(conn))
            .await
            .map_err(|e| RepoError::Io(format!("interact failed: {e}")))?
    }
}

fn setup_connection(conn: &Connection) -> rusqlite::Result<()> {
    // WAL for concurrent readers; busy_timeout rides out write contention.
    // In-memory shared-cache databases reject WAL; that failure is fine.
    let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
    conn.execute_batch(
        "PRAGMA foreign_keys=ON; \
         PRAGMA busy_timeout=5000; \
         PRAGMA synchronous=NORMAL;",
    )?;
    Ok(())
}

fn row_to_doc(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredDocument> {
    Ok(StoredDocument {
        tenant_id: row.get(0)?,
        project_id: row.get(1)?,
        revision: row.get(2)?,
        state_json: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

#[async_trait]
impl ProjectRepository for SqliteRepository {
    async fn find(
        &self,
        tenant_id: &str,
        project_id: &str,
    ) -> Result<Option<StoredDocument>, RepoError> {
        let tenant_id = tenant_id.to_string();
        let project_id = project_id.to_string();
        self.interact(move |conn| {
            conn.query_row(
                "SELECT tenant_id, project_id, revision, state_json, created_at, updated_at
                 FROM documents WHERE tenant_id = ?1 AND project_id = ?2",
                params![tenant_id, project_id],
                row_to_doc,
            )
            .optional()
            .map_err(Into::into)
        })
        .await
    }

    async fn save(&self, doc: StoredDocument) -> Result<(), RepoError> {
        self.interact(move |conn| {
            conn.execute(
                "INSERT INTO documents (tenant_id, project_id, revision, state_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (tenant_id, project_id) DO UPDATE SET
                     revision = excluded.revision,
                     state_json = excluded.state_json,
                     updated_at = excluded.updated_at",
                params![
                    doc.tenant_id,
                    doc.project_id,
                    doc.revision,
                    doc.state_json,
                    doc.created_at,
                    doc.updated_at
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn save_if_revision(
        &self,
        doc: StoredDocument,
        expected: Option<&str>,
    ) -> Result<(), RepoError> {
        let expected = expected.map(str::to_string);
        self.interact(move |conn| {
            let changed = match expected {
                None => conn.execute(
                    "INSERT INTO documents (tenant_id, project_id, revision, state_json, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT (tenant_id, project_id) DO NOTHING",
                    params![
                        doc.tenant_id,
                        doc.project_id,
                        doc.revision,
                        doc.state_json,
                        doc.created_at,
                        doc.updated_at
                    ],
                )?,
                Some(expected) => conn.execute(
                    "UPDATE documents SET revision = ?3, state_json = ?4, updated_at = ?6
                     WHERE tenant_id = ?1 AND project_id = ?2 AND revision = ?7",
                    params![
                        doc.tenant_id,
                        doc.project_id,
                        doc.revision,
                        doc.state_json,
                        doc.created_at,
                        doc.updated_at,
                        expected
                    ],
                )?,
            };
            if changed == 0 {
                return Err(RepoError::Conflict);
            }
            Ok(())
        })
        .await
    }

    async fn remove(&self, tenant_id: &str, project_id: &str) -> Result<(), RepoError> {
        let tenant_id = tenant_id.to_string();
        let project_id = project_id.to_string();
        self.interact(move |conn| {
            conn.execute(
                "DELETE FROM documents WHERE tenant_id = ?1 AND project_id = ?2",
                params![tenant_id, project_id],
            )?;
            Ok(())
        })
        .await
    }
}
