//! Seams to the backend: the statement executor, connections, and the
//! provider that hands connections out.

use std::future::Future;
use std::time::Duration;

use futures::future::TryFutureExt;
use futures::stream::{self, BoxStream, StreamExt};

use crate::compiler::Statement;
use crate::error::Result;
use crate::value::{FromRow, Row, Value};

/// Runs compiled statements. The timeout is passed through to the backend,
/// never enforced here.
pub trait Executor: Send {
    /// Runs a statement and returns the number of affected rows.
    fn execute(
        &mut self,
        statement: &Statement,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<u64>> + Send;

    fn fetch_all(
        &mut self,
        statement: &Statement,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<Vec<Row>>> + Send;

    /// Runs a statement producing several result sets.
    fn fetch_multiple(
        &mut self,
        statement: &Statement,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<Vec<Vec<Row>>>> + Send;

    /// Single-pass row stream. Backends that can stream override this; the
    /// default buffers through `fetch_all`.
    fn fetch<'e>(
        &'e mut self,
        statement: Statement,
        timeout: Option<Duration>,
    ) -> BoxStream<'e, Result<Row>> {
        async move { self.fetch_all(&statement, timeout).await }
            .map_ok(|rows| stream::iter(rows.into_iter().map(Ok)))
            .try_flatten_stream()
            .boxed()
    }

    /// First column of the first row, `Value::Null` when there is none.
    fn fetch_scalar(
        &mut self,
        statement: &Statement,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<Value>> + Send {
        async move {
            let rows = self.fetch_all(statement, timeout).await?;
            Ok(rows
                .first()
                .and_then(|row| row.value_at(0))
                .cloned()
                .unwrap_or(Value::Null))
        }
    }
}

/// A live backend connection.
pub trait Connection: Executor {
    fn begin(&mut self) -> impl Future<Output = Result<()>> + Send;

    fn commit(&mut self) -> impl Future<Output = Result<()>> + Send;

    fn rollback(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Called synchronously when a transaction is dropped unfinished; the
    /// connection must not reuse that transaction's work.
    fn abandon(&mut self);

    fn ping(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Hands out connections; dropping a connection releases it.
pub trait ConnectionProvider: Send + Sync {
    type Connection: Connection;

    fn create_connection(&self) -> impl Future<Output = Result<Self::Connection>> + Send;
}

/// Result sets of a multi-statement query, read in order.
#[derive(Debug, Default)]
pub struct ResultSets {
    sets: std::collections::VecDeque<Vec<Row>>,
}

impl ResultSets {
    pub fn new(sets: Vec<Vec<Row>>) -> Self {
        Self { sets: sets.into() }
    }

    pub fn remaining(&self) -> usize {
        self.sets.len()
    }

    /// Materializes the next result set.
    pub fn read<T: FromRow>(&mut self) -> Result<Vec<T>> {
        self.sets
            .pop_front()
            .unwrap_or_default()
            .iter()
            .map(T::from_row)
            .collect()
    }

    pub fn read_first<T: FromRow>(&mut self) -> Result<Option<T>> {
        match self.sets.pop_front().unwrap_or_default().first() {
            Some(row) => T::from_row(row).map(Some),
            None => Ok(None),
        }
    }
}
