//! `DuckDB` connection pool.
//!
//! Every connection is cloned from one root handle so they all share a single
//! database instance; two independently opened instances on the same file
//! would not see each other's writes. Idle connections are kept per access
//! mode.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ::duckdb::Connection;

/// Which idle list a connection returns to. Read-only handles are only
/// handed to statements the query layer has classified as reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

impl AccessMode {
    const fn slot(self) -> usize {
        match self {
            Self::ReadOnly => 0,
            Self::ReadWrite => 1,
        }
    }
}

struct PoolInner {
    db_path: PathBuf,
    max_idle: usize,
    root: Mutex<Option<Connection>>,
    idle: Mutex<[Vec<Connection>; 2]>,
}

impl PoolInner {
    fn take_idle(&self, mode: AccessMode) -> Option<Connection> {
        let mut idle = self.idle.lock().expect("duckdb pool lock is not poisoned");
        idle[mode.slot()].pop()
    }

    fn give_back(&self, mode: AccessMode, connection: Connection) {
        let mut idle = self.idle.lock().expect("duckdb pool lock is not poisoned");
        let list = &mut idle[mode.slot()];
        if list.len() < self.max_idle {
            list.push(connection);
        }
    }

    /// Clone of the root handle, opening the file on first use.
    fn clone_root(&self) -> Result<Connection, ::duckdb::Error> {
        let mut root = self.root.lock().expect("duckdb root lock is not poisoned");
        let connection = match root.as_ref() {
            Some(root) => root.try_clone()?,
            None => {
                let opened = Connection::open(self.db_path.as_path())?;
                let connection = opened.try_clone()?;
                *root = Some(opened);
                connection
            }
        };
        drop(root);
        // Progress output would interleave with JSON on stdout.
        connection.execute_batch("PRAGMA disable_progress_bar;")?;
        Ok(connection)
    }
}

/// Idle-connection pool over one DuckDB file.
#[derive(Clone)]
pub struct DuckDbConnectionManager {
    inner: Arc<PoolInner>,
}

impl DuckDbConnectionManager {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, max_pool_size: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                db_path: path.into(),
                max_idle: max_pool_size.max(1),
                root: Mutex::new(None),
                idle: Mutex::new([Vec::new(), Vec::new()]),
            }),
        }
    }

    /// Take an idle connection for `mode`, or clone a new one.
    ///
    /// # Errors
    /// Returns an error if the database file cannot be opened.
    pub fn acquire(&self, mode: AccessMode) -> Result<PooledConnection, ::duckdb::Error> {
        let connection = match self.inner.take_idle(mode) {
            Some(connection) => connection,
            None => self.inner.clone_root()?,
        };
        Ok(PooledConnection {
            mode,
            pool: Arc::clone(&self.inner),
            connection: Some(connection),
        })
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        self.inner.db_path.as_path()
    }
}

/// Connection handle that goes back to the pool when dropped.
pub struct PooledConnection {
    mode: AccessMode,
    pool: Arc<PoolInner>,
    connection: Option<Connection>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_ref()
            .expect("pooled connection is present until drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
            .as_mut()
            .expect("pooled connection is present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.give_back(self.mode, connection);
        }
    }
}
