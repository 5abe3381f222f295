// SPDX-License-Identifier: MIT

//! Storage used by the validator node
//!
//! Just enough of a wrapper over [`redb_bincode`] to keep blocking
//! database work off the async executor threads.

pub mod error;

use std::path::PathBuf;

use error::{
    CommitSnafu, CreateDirSnafu, DbResult, InMemorySnafu, InvalidPathSnafu, JoinSnafu, OpenSnafu,
    TransactionSnafu,
};
use lbft_util_error::fmt::FmtCompact as _;
pub use redb_bincode;
use redb_bincode::{ReadTransaction, WriteTransaction};
use snafu::{OptionExt as _, ResultExt as _};
use tracing::{debug, warn};

const LOG_TARGET: &str = "lbft::db";

/// Define a typed table
///
/// Generates a module `$name` with `Key`, `Value` and a `TABLE`
/// definition named after the module.
#[macro_export]
macro_rules! def_table {
    ($(#[$outer:meta])*
        $name:ident : $k:ty => $v:ty) => {
        #[allow(unused)]
        $(#[$outer])*
        pub mod $name {
            use super::*;
            pub type Key = $k;
            pub type Value = $v;
            pub type Definition<'a> = $crate::redb_bincode::TableDefinition<'a, Key, Value>;
            pub type Table<'a> = $crate::redb_bincode::Table<'a, Key, Value>;
            pub const TABLE: Definition = $crate::redb_bincode::TableDefinition::new(stringify!($name));
        }
    };
}

#[derive(Debug)]
pub struct Database {
    inner: redb_bincode::Database,
    ephemeral: bool,
}

impl Database {
    pub async fn new_in_memory() -> DbResult<Database> {
        debug!(target: LOG_TARGET, "Opening in-memory database");
        let inner = redb::Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .context(InMemorySnafu)?;
        Ok(Self {
            inner: inner.into(),
            ephemeral: true,
        })
    }

    pub async fn open(path: impl Into<PathBuf>) -> DbResult<Database> {
        let path = path.into();
        let dir = path
            .parent()
            .context(InvalidPathSnafu { path: path.clone() })?;
        tokio::fs::create_dir_all(dir)
            .await
            .context(CreateDirSnafu { path: dir.to_owned() })?;
        debug!(target: LOG_TARGET, path = %path.display(), "Opening database…");

        let inner = tokio::task::spawn_blocking({
            let path = path.clone();
            move || {
                let mut db = redb::Database::create(path)?;
                let _ = db.compact().inspect_err(|err| {
                    warn!(target: LOG_TARGET, err = %err.fmt_compact(), "Failed to compact database");
                });
                Ok::<_, redb::DatabaseError>(db)
            }
        })
        .await
        .context(JoinSnafu)?
        .context(OpenSnafu { path })?;

        Ok(Self {
            inner: inner.into(),
            ephemeral: false,
        })
    }

    /// Run `f` in a write transaction, committing if it returns `Ok`
    ///
    /// Requires a multi-threaded runtime.
    pub async fn write_with<T>(
        &self,
        f: impl FnOnce(&'_ WriteTransaction) -> DbResult<T>,
    ) -> DbResult<T> {
        tokio::task::block_in_place(|| {
            let dbtx = self.inner.begin_write().context(TransactionSnafu)?;
            let res = f(&dbtx)?;
            dbtx.commit().context(CommitSnafu)?;
            Ok(res)
        })
    }

    /// Run `f` in a read transaction
    ///
    /// Requires a multi-threaded runtime.
    pub async fn read_with<T>(
        &self,
        f: impl FnOnce(&'_ ReadTransaction) -> DbResult<T>,
    ) -> DbResult<T> {
        tokio::task::block_in_place(|| {
            let dbtx = self.inner.begin_read().context(TransactionSnafu)?;
            f(&dbtx)
        })
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }
}

#[cfg(test)]
mod tests;
