//! A transaction that owns its connection.
//!
//! Dropping a [`Transaction`] that was neither committed nor rolled back
//! first abandons the transaction on the connection, then drops the
//! connection, so a pooled connection goes back to its pool exactly once on
//! every exit path.

use std::fmt;

use crate::connection::Connection;
use crate::error::Result;

pub struct Transaction<C: Connection> {
    connection: C,
    finished: bool,
}

impl<C: Connection> Transaction<C> {
    /// Begins a transaction on `connection`, taking ownership of it.
    pub async fn begin(mut connection: C) -> Result<Self> {
        connection.begin().await?;
        log::debug!("Transaction started");

        Ok(Self {
            connection,
            finished: false,
        })
    }

    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Commits and releases the connection. A failed commit is returned as is
    /// and the connection is still released.
    pub async fn commit(mut self) -> Result<()> {
        self.connection.commit().await?;
        self.finished = true;
        log::debug!("Transaction committed");
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<()> {
        self.connection.rollback().await?;
        self.finished = true;
        log::debug!("Transaction rolled back");
        Ok(())
    }
}

impl<C: Connection> Drop for Transaction<C> {
    fn drop(&mut self) {
        if !self.finished {
            log::warn!("Transaction dropped without commit or rollback, abandoning it");
            self.connection.abandon();
        }
        // `connection` is dropped after this returns, releasing it.
    }
}

impl<C: Connection> fmt::Debug for Transaction<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("finished", &self.finished)
            .finish()
    }
}
