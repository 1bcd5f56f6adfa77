//! The execution side: compiles queries for model types and runs them on a
//! caller transaction, a connection scoped to the call, or a transaction
//! opened for one batch.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{BoxStream, StreamExt};

use crate::compiler::{Dialect, IntoStatement, QueryCompiler, SqlCompiler, Statement};
use crate::config::RepositoryConfig;
use crate::connection::{ConnectionProvider, Executor, ResultSets};
use crate::error::{RepositoryError, Result};
use crate::metadata::{self, Binding};
use crate::metrics::SharedRegistrar;
use crate::model::Model;
use crate::pool::{ConnectionFactory, ConnectionPool};
use crate::query::{self, Filter, Query, Sort, UpdateColumns, UpdatePlan};
use crate::transaction::Transaction;
use crate::value::{FromRow, FromValue, Row, Value};

/// Where an operation's statements run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// On the connection of a transaction supplied by the caller.
    CallerTransaction,
    /// On a connection acquired for this call only.
    ScopedConnection,
    /// On a transaction opened, committed and released by this call.
    ImplicitTransaction,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::CallerTransaction => write!(f, "caller transaction"),
            ExecutionMode::ScopedConnection => write!(f, "scoped connection"),
            ExecutionMode::ImplicitTransaction => write!(f, "implicit transaction"),
        }
    }
}

enum Session<'t, C> {
    Borrowed(&'t mut C),
    Owned(C),
}

impl<'t, C> Session<'t, C> {
    fn connection(&mut self) -> &mut C {
        match self {
            Session::Borrowed(connection) => &mut **connection,
            Session::Owned(connection) => connection,
        }
    }
}

/// Generic repository over any model type implementing [`Model`].
pub struct Repository<P, Q = SqlCompiler> {
    provider: Arc<P>,
    compiler: Arc<Q>,
    command_timeout: Option<Duration>,
    metrics: Option<SharedRegistrar>,
}

impl<P, Q> Clone for Repository<P, Q> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            compiler: self.compiler.clone(),
            command_timeout: self.command_timeout,
            metrics: self.metrics.clone(),
        }
    }
}

impl<P, Q> fmt::Debug for Repository<P, Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("command_timeout", &self.command_timeout)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

impl<P: ConnectionProvider> Repository<P, SqlCompiler> {
    pub fn new(provider: P, dialect: Dialect) -> Self {
        Self::with_compiler(provider, SqlCompiler::new(dialect))
    }
}

impl<F: ConnectionFactory> Repository<ConnectionPool<F>, SqlCompiler> {
    /// Builds the pool, the compiler and the command timeout from configuration.
    pub fn from_config(
        factory: F,
        config: RepositoryConfig,
        metrics: Option<SharedRegistrar>,
    ) -> Result<Self> {
        let command_timeout = config.command_timeout();
        let pool = ConnectionPool::new(factory, config.pool, metrics.clone())?;

        log::info!(
            "Repository configured: dialect={:?}, command_timeout={:?}",
            config.dialect,
            command_timeout
        );

        Ok(Self {
            provider: Arc::new(pool),
            compiler: Arc::new(SqlCompiler::new(config.dialect)),
            command_timeout,
            metrics,
        })
    }
}

impl<P: ConnectionProvider, Q: QueryCompiler> Repository<P, Q> {
    pub fn with_compiler(provider: P, compiler: Q) -> Self {
        Self {
            provider: Arc::new(provider),
            compiler: Arc::new(compiler),
            command_timeout: None,
            metrics: None,
        }
    }

    /// A copy of this repository passing `timeout` to the executor with every statement.
    pub fn with_command_timeout(&self, timeout: Option<Duration>) -> Self {
        Self {
            command_timeout: timeout,
            ..self.clone()
        }
    }

    pub fn with_metrics(mut self, metrics: SharedRegistrar) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn compiler(&self) -> &Q {
        &self.compiler
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout
    }

    /// Opens a transaction on a fresh connection, for passing to later calls.
    pub async fn begin(&self) -> Result<Transaction<P::Connection>> {
        let connection = self.provider.create_connection().await?;
        Transaction::begin(connection).await
    }

    pub async fn count<T: Model>(
        &self,
        filter: impl Into<Filter>,
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<u64> {
        let metadata = metadata::resolve::<T>();
        let statement = self.compile(&query::count(metadata.table_name, filter))?;

        let value = self.run_scalar(&statement, transaction).await?;
        u64::from_value(&value).map_err(|e| RepositoryError::decode("COUNT(*)", e))
    }

    pub async fn select<T: Model>(
        &self,
        filter: impl Into<Filter>,
        sort: impl Into<Sort>,
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<Vec<T>> {
        let statement = self.compile(&select_query::<T>(filter.into(), sort.into(), None))?;
        let rows = self.run_fetch(&statement, transaction).await?;
        decode_rows(&rows)
    }

    pub async fn select_first_or_default<T: Model>(
        &self,
        filter: impl Into<Filter>,
        sort: impl Into<Sort>,
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<Option<T>> {
        let statement = self.compile(&select_query::<T>(filter.into(), sort.into(), Some(1)))?;
        let rows = self.run_fetch(&statement, transaction).await?;
        first_row(&rows)
    }

    pub async fn select_first<T: Model>(
        &self,
        filter: impl Into<Filter>,
        sort: impl Into<Sort>,
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<T> {
        self.select_first_or_default(filter, sort, transaction)
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    /// Fails with [`RepositoryError::MultipleRows`] when more than one row matches.
    pub async fn select_single_or_default<T: Model>(
        &self,
        filter: impl Into<Filter>,
        sort: impl Into<Sort>,
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<Option<T>> {
        let statement = self.compile(&select_query::<T>(filter.into(), sort.into(), Some(2)))?;
        let rows = self.run_fetch(&statement, transaction).await?;
        single_row(&rows)
    }

    pub async fn select_single<T: Model>(
        &self,
        filter: impl Into<Filter>,
        sort: impl Into<Sort>,
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<T> {
        self.select_single_or_default(filter, sort, transaction)
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    pub async fn insert<T: Model>(
        &self,
        model: &T,
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<u64> {
        let metadata = metadata::resolve::<T>();
        let statement = self.compile(&query::insert_model(&metadata, model)?)?;
        self.run_execute(&statement, transaction).await
    }

    /// Inserts the model and reads back the value the store assigned to its
    /// identity column.
    pub async fn insert_returning_identity<T: Model, I: FromValue>(
        &self,
        model: &T,
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<I> {
        let metadata = metadata::resolve::<T>();
        let query = query::with_identity(&metadata, query::insert_model(&metadata, model)?)?;
        let statement = self.compile(&query)?;
        let identity = identity_name(&query);

        // The identity may arrive in a trailing result set.
        let sets = self.run_multiple(&statement, transaction).await?;
        let value = sets
            .iter()
            .rev()
            .find_map(|rows| rows.first().and_then(|row| row.value_at(0)))
            .cloned()
            .unwrap_or(Value::Null);

        I::from_value(&value).map_err(|e| RepositoryError::decode(identity, e))
    }

    /// Inserts every model with one multi-row statement. An empty slice is a no-op.
    pub async fn insert_many<T: Model>(
        &self,
        models: &[T],
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<u64> {
        if models.is_empty() {
            return Ok(0);
        }

        let metadata = metadata::resolve::<T>();
        let statement = self.compile(&query::insert_models(&metadata, models)?)?;
        self.run_execute(&statement, transaction).await
    }

    /// Identities come back in row order, one per model.
    pub async fn insert_many_returning_identities<T: Model, I: FromValue>(
        &self,
        models: &[T],
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<Vec<I>> {
        if models.is_empty() {
            return Ok(Vec::new());
        }

        let metadata = metadata::resolve::<T>();
        let query = query::with_identity(&metadata, query::insert_models(&metadata, models)?)?;
        let statement = self.compile(&query)?;
        let identity = identity_name(&query);

        let rows = self.run_fetch(&statement, transaction).await?;
        rows.iter()
            .map(|row| {
                let value = row.value_at(0).unwrap_or(&Value::Null);
                I::from_value(value).map_err(|e| RepositoryError::decode(identity.clone(), e))
            })
            .collect()
    }

    /// Writes every updatable column, filtered on the key columns.
    pub async fn update<T: Model>(
        &self,
        model: &T,
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<u64> {
        self.update_one(model, UpdateColumns::All, transaction).await
    }

    /// Writes only the named columns. Names match column or property names
    /// case-insensitively; when none is updatable nothing is sent and 0 is returned.
    pub async fn update_columns<T: Model>(
        &self,
        model: &T,
        columns: &[&str],
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<u64> {
        self.update_one(model, UpdateColumns::Only(columns), transaction).await
    }

    /// Writes every updatable column except the named ones.
    pub async fn update_ignore<T: Model>(
        &self,
        model: &T,
        ignored: &[&str],
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<u64> {
        self.update_one(model, UpdateColumns::Ignore(ignored), transaction).await
    }

    /// One update per model. Without a caller transaction the batch runs in
    /// an implicit one.
    pub async fn update_many<T: Model>(
        &self,
        models: &[T],
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<u64> {
        self.update_batch(models, UpdateColumns::All, transaction).await
    }

    pub async fn update_many_columns<T: Model>(
        &self,
        models: &[T],
        columns: &[&str],
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<u64> {
        self.update_batch(models, UpdateColumns::Only(columns), transaction).await
    }

    pub async fn update_many_ignore<T: Model>(
        &self,
        models: &[T],
        ignored: &[&str],
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<u64> {
        self.update_batch(models, UpdateColumns::Ignore(ignored), transaction).await
    }

    /// Explicit assignments on the rows matching `filter`; works for key-less types.
    pub async fn update_where<T: Model>(
        &self,
        assignments: Vec<Binding>,
        filter: impl Into<Filter>,
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<u64> {
        let metadata = metadata::resolve::<T>();
        let statement = self.compile(&query::update(metadata.table_name, assignments, filter))?;
        self.run_execute(&statement, transaction).await
    }

    async fn update_one<T: Model>(
        &self,
        model: &T,
        selection: UpdateColumns<'_>,
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<u64> {
        let metadata = metadata::resolve::<T>();
        let statement = match UpdatePlan::new(&metadata, selection)? {
            Some(plan) => self.compile(&plan.query(model))?,
            None => {
                log::debug!(
                    "No updatable column of `{}` selected, skipping update",
                    metadata.table_name
                );
                return Ok(0);
            }
        };

        self.run_execute(&statement, transaction).await
    }

    async fn update_batch<T: Model>(
        &self,
        models: &[T],
        selection: UpdateColumns<'_>,
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<u64> {
        let metadata = metadata::resolve::<T>();
        let plan = match UpdatePlan::new(&metadata, selection)? {
            Some(plan) => plan,
            None => {
                log::debug!(
                    "No updatable column of `{}` selected, skipping batch update",
                    metadata.table_name
                );
                return Ok(0);
            }
        };

        if models.is_empty() {
            return Ok(0);
        }

        let statements = models
            .iter()
            .map(|model| self.compile(&plan.query(model)))
            .collect::<Result<Vec<_>>>()?;

        match transaction {
            Some(transaction) => {
                log::debug!(
                    "Running {} statements on {}",
                    statements.len(),
                    ExecutionMode::CallerTransaction
                );
                self.execute_all(transaction.connection_mut(), &statements).await
            }
            None => self.execute_in_implicit_transaction(&statements).await,
        }
    }

    pub async fn delete<T: Model>(
        &self,
        model: &T,
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<u64> {
        let metadata = metadata::resolve::<T>();
        let statement = self.compile(&query::delete_model(&metadata, model)?)?;
        self.run_execute(&statement, transaction).await
    }

    /// Deletes every model with one statement matching any of their keys.
    pub async fn delete_many<T: Model>(
        &self,
        models: &[T],
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<u64> {
        let metadata = metadata::resolve::<T>();
        let query = query::delete_models(&metadata, models)?;
        if models.is_empty() {
            return Ok(0);
        }

        let statement = self.compile(&query)?;
        self.run_execute(&statement, transaction).await
    }

    pub async fn delete_where<T: Model>(
        &self,
        filter: impl Into<Filter>,
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<u64> {
        let metadata = metadata::resolve::<T>();
        let statement = self.compile(&query::delete(metadata.table_name, filter))?;
        self.run_execute(&statement, transaction).await
    }

    pub async fn execute(
        &self,
        statement: impl IntoStatement,
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<u64> {
        let statement = statement.into_statement(&*self.compiler)?;
        self.run_execute(&statement, transaction).await
    }

    pub async fn execute_scalar<V: FromValue>(
        &self,
        statement: impl IntoStatement,
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<V> {
        let statement = statement.into_statement(&*self.compiler)?;
        let value = self.run_scalar(&statement, transaction).await?;
        V::from_value(&value).map_err(|e| RepositoryError::decode("scalar", e))
    }

    pub async fn query<T: FromRow>(
        &self,
        statement: impl IntoStatement,
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<Vec<T>> {
        let statement = statement.into_statement(&*self.compiler)?;
        let rows = self.run_fetch(&statement, transaction).await?;
        decode_rows(&rows)
    }

    pub async fn query_rows(
        &self,
        statement: impl IntoStatement,
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<Vec<Row>> {
        let statement = statement.into_statement(&*self.compiler)?;
        self.run_fetch(&statement, transaction).await
    }

    pub async fn query_first_or_default<T: FromRow>(
        &self,
        statement: impl IntoStatement,
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<Option<T>> {
        let statement = statement.into_statement(&*self.compiler)?;
        let rows = self.run_fetch(&statement, transaction).await?;
        first_row(&rows)
    }

    pub async fn query_first<T: FromRow>(
        &self,
        statement: impl IntoStatement,
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<T> {
        self.query_first_or_default(statement, transaction)
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    pub async fn query_single_or_default<T: FromRow>(
        &self,
        statement: impl IntoStatement,
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<Option<T>> {
        let statement = statement.into_statement(&*self.compiler)?;
        let rows = self.run_fetch(&statement, transaction).await?;
        single_row(&rows)
    }

    pub async fn query_single<T: FromRow>(
        &self,
        statement: impl IntoStatement,
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<T> {
        self.query_single_or_default(statement, transaction)
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    /// Runs a statement yielding several result sets, read in order from the returned [`ResultSets`].
    pub async fn query_multiple(
        &self,
        statement: impl IntoStatement,
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<ResultSets> {
        let statement = statement.into_statement(&*self.compiler)?;
        let sets = self.run_multiple(&statement, transaction).await?;
        Ok(ResultSets::new(sets))
    }

    /// Lazily decodes rows as the backend yields them. The stream borrows
    /// the transaction's connection, so it needs one from the caller.
    pub fn fetch<'t, T>(
        &self,
        statement: impl IntoStatement,
        transaction: &'t mut Transaction<P::Connection>,
    ) -> Result<BoxStream<'t, Result<T>>>
    where
        T: FromRow + Send + 't,
    {
        let statement = statement.into_statement(&*self.compiler)?;
        log::debug!(
            "Streaming {} on {}: {}",
            statement.kind_label(),
            ExecutionMode::CallerTransaction,
            statement.sql
        );
        self.record_statement(statement.kind_label());

        Ok(transaction
            .connection_mut()
            .fetch(statement, self.command_timeout)
            .map(|row| row.and_then(|row| T::from_row(&row)))
            .boxed())
    }

    fn compile(&self, query: &Query) -> Result<Statement> {
        self.compiler.compile(query).map_err(|e| {
            log::error!("Failed to compile {} on `{}`: {}", query.kind_label(), query.table, e);
            e
        })
    }

    async fn session<'t>(
        &self,
        transaction: Option<&'t mut Transaction<P::Connection>>,
    ) -> Result<(Session<'t, P::Connection>, ExecutionMode)> {
        match transaction {
            Some(transaction) => Ok((
                Session::Borrowed(transaction.connection_mut()),
                ExecutionMode::CallerTransaction,
            )),
            None => {
                let connection = self.provider.create_connection().await?;
                Ok((Session::Owned(connection), ExecutionMode::ScopedConnection))
            }
        }
    }

    async fn run_execute(
        &self,
        statement: &Statement,
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<u64> {
        let (mut session, mode) = self.session(transaction).await?;
        log::debug!("Executing {} on {}: {}", statement.kind_label(), mode, statement.sql);
        self.timed_execute(session.connection(), statement).await
    }

    async fn run_fetch(
        &self,
        statement: &Statement,
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<Vec<Row>> {
        let (mut session, mode) = self.session(transaction).await?;
        log::debug!("Querying {} on {}: {}", statement.kind_label(), mode, statement.sql);

        let start = Instant::now();
        let result = session
            .connection()
            .fetch_all(statement, self.command_timeout)
            .await;
        self.observe(statement, start, &result);
        result
    }

    async fn run_scalar(
        &self,
        statement: &Statement,
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<Value> {
        let (mut session, mode) = self.session(transaction).await?;
        log::debug!("Querying scalar on {}: {}", mode, statement.sql);

        let start = Instant::now();
        let result = session
            .connection()
            .fetch_scalar(statement, self.command_timeout)
            .await;
        self.observe(statement, start, &result);
        result
    }

    async fn run_multiple(
        &self,
        statement: &Statement,
        transaction: Option<&mut Transaction<P::Connection>>,
    ) -> Result<Vec<Vec<Row>>> {
        let (mut session, mode) = self.session(transaction).await?;
        log::debug!("Querying result sets on {}: {}", mode, statement.sql);

        let start = Instant::now();
        let result = session
            .connection()
            .fetch_multiple(statement, self.command_timeout)
            .await;
        self.observe(statement, start, &result);
        result
    }

    async fn timed_execute(
        &self,
        connection: &mut P::Connection,
        statement: &Statement,
    ) -> Result<u64> {
        let start = Instant::now();
        let result = connection.execute(statement, self.command_timeout).await;
        self.observe(statement, start, &result);

        if let (Ok(rows), Some(metrics)) = (&result, &self.metrics) {
            metrics.inc_by_int_counter_vec_mut(
                "repository_rows_affected_total",
                &[statement.kind_label()],
                *rows,
            );
        }
        result
    }

    /// Runs statements in order on one connection, stopping at the first failure.
    async fn execute_all(
        &self,
        connection: &mut P::Connection,
        statements: &[Statement],
    ) -> Result<u64> {
        let mut affected = 0;
        for statement in statements {
            affected += self.timed_execute(connection, statement).await?;
        }
        Ok(affected)
    }

    async fn execute_in_implicit_transaction(&self, statements: &[Statement]) -> Result<u64> {
        log::debug!(
            "Running {} statements on {}",
            statements.len(),
            ExecutionMode::ImplicitTransaction
        );

        let connection = self.provider.create_connection().await?;
        let mut transaction = Transaction::begin(connection).await?;

        let affected = match self.execute_all(transaction.connection_mut(), statements).await {
            Ok(affected) => affected,
            Err(e) => {
                log::warn!("Implicit transaction failed, leaving it uncommitted: {}", e);
                self.record_implicit_transaction("failed");
                // Dropping the transaction abandons it and releases the connection.
                return Err(e);
            }
        };

        match transaction.commit().await {
            Ok(()) => {
                self.record_implicit_transaction("committed");
                Ok(affected)
            }
            Err(e) => {
                log::error!("Failed to commit implicit transaction: {}", e);
                self.record_implicit_transaction("commit_failed");
                Err(e)
            }
        }
    }

    fn observe<T>(&self, statement: &Statement, start: Instant, result: &Result<T>) {
        let kind = statement.kind_label();
        let elapsed = start.elapsed();

        match result {
            Ok(_) => log::debug!("{} completed in {:?}", kind, elapsed),
            Err(e) => log::error!("{} failed after {:?}: {}\nStatement: {}", kind, elapsed, e, statement.sql),
        }

        self.record_statement(kind);
        if let Some(metrics) = &self.metrics {
            metrics.set_gauge_vec_mut(
                "repository_statement_duration_seconds",
                &[kind],
                elapsed.as_secs_f64(),
            );
            if result.is_err() {
                metrics.inc_int_counter_vec_mut("repository_statement_errors_total", &[kind]);
            }
        }
    }

    fn record_statement(&self, kind: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_int_counter_vec_mut("repository_statements_total", &[kind]);
        }
    }

    fn record_implicit_transaction(&self, status: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_int_counter_vec_mut("repository_implicit_transactions_total", &[status]);
        }
    }
}

fn select_query<T: Model>(filter: Filter, sort: Sort, limit: Option<u64>) -> Query {
    let metadata = metadata::resolve::<T>();
    query::select(metadata.table_name, filter, sort, limit)
        .columns(metadata.columns().iter().map(|column| column.name))
}

fn identity_name(query: &Query) -> String {
    match &query.kind {
        query::QueryKind::Insert {
            returning: Some(column),
            ..
        } => column.clone(),
        _ => "identity".to_string(),
    }
}

fn decode_rows<T: FromRow>(rows: &[Row]) -> Result<Vec<T>> {
    rows.iter().map(T::from_row).collect()
}

fn first_row<T: FromRow>(rows: &[Row]) -> Result<Option<T>> {
    rows.first().map(T::from_row).transpose()
}

fn single_row<T: FromRow>(rows: &[Row]) -> Result<Option<T>> {
    match rows {
        [] => Ok(None),
        [row] => T::from_row(row).map(Some),
        _ => Err(RepositoryError::MultipleRows),
    }
}
