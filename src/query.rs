//! Backend-agnostic statement descriptions and the builders that derive them
//! from model metadata.

use std::fmt;

use crate::error::{RepositoryError, Result};
use crate::metadata::{extract, Binding, ColumnDescriptor, EntityMetadata};
use crate::value::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// Ordered sort specification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sort(pub Vec<(String, SortDirection)>);

impl Sort {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn asc(column: impl Into<String>) -> Self {
        Self(vec![(column.into(), SortDirection::Ascending)])
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self(vec![(column.into(), SortDirection::Descending)])
    }

    pub fn then(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.0.push((column.into(), direction));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Sort {
    fn from(column: &str) -> Self {
        Sort::asc(column)
    }
}

impl From<(&str, SortDirection)> for Sort {
    fn from((column, direction): (&str, SortDirection)) -> Self {
        Sort(vec![(column.to_string(), direction)])
    }
}

impl From<Vec<(&str, SortDirection)>> for Sort {
    fn from(columns: Vec<(&str, SortDirection)>) -> Self {
        Sort(
            columns
                .into_iter()
                .map(|(column, direction)| (column.to_string(), direction))
                .collect(),
        )
    }
}

/// Equality predicates: an OR of groups, each group an AND of `column = value`.
///
/// An empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    groups: Vec<Vec<Binding>>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            groups: vec![vec![(column.into(), value.into())]],
        }
    }

    /// ANDs another equality into every group.
    pub fn and(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        let binding = (column.into(), value.into());
        if self.groups.is_empty() {
            self.groups.push(Vec::new());
        }
        for group in &mut self.groups {
            group.push(binding.clone());
        }
        self
    }

    pub fn any_of(groups: Vec<Vec<Binding>>) -> Self {
        Self {
            groups: groups.into_iter().filter(|g| !g.is_empty()).collect(),
        }
    }

    pub fn groups(&self) -> &[Vec<Binding>] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl<V: Into<Value>> From<(&str, V)> for Filter {
    fn from((column, value): (&str, V)) -> Self {
        Filter::eq(column, value)
    }
}

impl From<Vec<Binding>> for Filter {
    fn from(bindings: Vec<Binding>) -> Self {
        Filter::any_of(vec![bindings])
    }
}

impl From<Vec<(&str, Value)>> for Filter {
    fn from(bindings: Vec<(&str, Value)>) -> Self {
        Filter::any_of(vec![bindings
            .into_iter()
            .map(|(column, value)| (column.to_string(), value))
            .collect()])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryKind {
    /// An empty column list selects every column.
    Select { columns: Vec<String> },
    Count,
    Insert {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
        returning: Option<String>,
    },
    Update { assignments: Vec<Binding> },
    Delete,
}

/// Abstract description of one statement, handed to a `QueryCompiler`.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub kind: QueryKind,
    pub filter: Filter,
    pub sort: Sort,
    pub limit: Option<u64>,
}

impl Query {
    fn new(table: impl Into<String>, kind: QueryKind) -> Self {
        Self {
            table: table.into(),
            kind,
            filter: Filter::all(),
            sort: Sort::none(),
            limit: None,
        }
    }

    pub fn select_from(table: impl Into<String>) -> Self {
        Self::new(table, QueryKind::Select { columns: Vec::new() })
    }

    pub fn columns<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let QueryKind::Select { columns } = &mut self.kind {
            columns.extend(names.into_iter().map(Into::into));
        }
        self
    }

    pub fn filter(mut self, filter: impl Into<Filter>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.0.push((column.into(), direction));
        self
    }

    pub fn sort(mut self, sort: impl Into<Sort>) -> Self {
        self.sort = sort.into();
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Requests the given column back from an insert.
    pub fn returning(mut self, column: impl Into<String>) -> Self {
        if let QueryKind::Insert { returning, .. } = &mut self.kind {
            *returning = Some(column.into());
        }
        self
    }

    /// Short statement kind used in logs and metric labels.
    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            QueryKind::Select { .. } => "select",
            QueryKind::Count => "count",
            QueryKind::Insert { .. } => "insert",
            QueryKind::Update { .. } => "update",
            QueryKind::Delete => "delete",
        }
    }
}

pub fn count(table: impl Into<String>, filter: impl Into<Filter>) -> Query {
    Query::new(table, QueryKind::Count).filter(filter)
}

pub fn select(
    table: impl Into<String>,
    filter: impl Into<Filter>,
    sort: impl Into<Sort>,
    limit: Option<u64>,
) -> Query {
    let mut query = Query::select_from(table).filter(filter).sort(sort);
    query.limit = limit;
    query
}

pub fn insert(table: impl Into<String>, bindings: Vec<Binding>) -> Result<Query> {
    insert_many(table, vec![bindings])
}

/// One statement carrying every row; all rows must bind the same columns in the same order.
pub fn insert_many(table: impl Into<String>, rows: Vec<Vec<Binding>>) -> Result<Query> {
    let table = table.into();

    let columns: Vec<String> = match rows.first() {
        Some(first) if !first.is_empty() => first.iter().map(|(name, _)| name.clone()).collect(),
        _ => {
            return Err(RepositoryError::unsupported(format!(
                "no insertable columns for table `{}`",
                table
            )))
        }
    };

    let mut values = Vec::with_capacity(rows.len());
    for row in rows {
        let same_shape = row.len() == columns.len()
            && row.iter().zip(&columns).all(|((name, _), column)| name == column);
        if !same_shape {
            return Err(RepositoryError::Compile(format!(
                "insert rows for `{}` bind different columns",
                table
            )));
        }
        values.push(row.into_iter().map(|(_, value)| value).collect());
    }

    Ok(Query::new(
        table,
        QueryKind::Insert {
            columns,
            rows: values,
            returning: None,
        },
    ))
}

pub fn update(
    table: impl Into<String>,
    assignments: Vec<Binding>,
    filter: impl Into<Filter>,
) -> Query {
    Query::new(table, QueryKind::Update { assignments }).filter(filter)
}

pub fn delete(table: impl Into<String>, filter: impl Into<Filter>) -> Query {
    Query::new(table, QueryKind::Delete).filter(filter)
}

/// Which updatable columns an update by instance writes.
#[derive(Debug, Clone, Copy)]
pub enum UpdateColumns<'a> {
    All,
    /// Allow-list; an empty intersection makes the update a no-op.
    Only(&'a [&'a str]),
    /// Deny-list.
    Ignore(&'a [&'a str]),
}

/// Columns chosen for an update by instance, shared by every model of a batch.
pub struct UpdatePlan<'m, T> {
    table: &'static str,
    keys: Vec<&'m ColumnDescriptor<T>>,
    payload: Vec<&'m ColumnDescriptor<T>>,
}

impl<T> fmt::Debug for UpdatePlan<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdatePlan")
            .field("table", &self.table)
            .field("keys", &self.keys)
            .field("payload", &self.payload)
            .finish()
    }
}

impl<'m, T> UpdatePlan<'m, T> {
    /// Plans the update, or returns `None` when an allow-list leaves nothing to write.
    pub fn new(metadata: &'m EntityMetadata<T>, selection: UpdateColumns<'_>) -> Result<Option<Self>> {
        let keys = require_keys(metadata, "update")?;
        let updatable = metadata.updatable_columns();

        let payload: Vec<_> = match selection {
            UpdateColumns::All => updatable,
            UpdateColumns::Only(names) => {
                let payload: Vec<_> = updatable
                    .into_iter()
                    .filter(|column| names.iter().any(|name| column.matches_name(name)))
                    .collect();
                if payload.is_empty() {
                    return Ok(None);
                }
                payload
            }
            UpdateColumns::Ignore(names) => updatable
                .into_iter()
                .filter(|column| !names.iter().any(|name| column.matches_name(name)))
                .collect(),
        };

        if payload.is_empty() {
            return Err(RepositoryError::unsupported(format!(
                "no updatable columns for table `{}`",
                metadata.table_name
            )));
        }

        Ok(Some(Self {
            table: metadata.table_name,
            keys,
            payload,
        }))
    }

    pub fn payload_columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.payload.iter().map(|column| column.name)
    }

    pub fn query(&self, model: &T) -> Query {
        update(
            self.table,
            extract(self.payload.iter().copied(), model),
            extract(self.keys.iter().copied(), model),
        )
    }
}

fn require_keys<'m, T>(metadata: &'m EntityMetadata<T>, operation: &str) -> Result<Vec<&'m ColumnDescriptor<T>>> {
    let keys = metadata.key_columns();
    if keys.is_empty() {
        return Err(RepositoryError::unsupported(format!(
            "cannot {} `{}` by instance: the model has no key columns",
            operation, metadata.table_name
        )));
    }
    Ok(keys)
}

fn require_insertable<T>(metadata: &EntityMetadata<T>) -> Result<Vec<&ColumnDescriptor<T>>> {
    let columns = metadata.insertable_columns();
    if columns.is_empty() {
        return Err(RepositoryError::unsupported(format!(
            "no insertable columns for table `{}`",
            metadata.table_name
        )));
    }
    Ok(columns)
}

pub fn insert_model<T>(metadata: &EntityMetadata<T>, model: &T) -> Result<Query> {
    let columns = require_insertable(metadata)?;
    insert(metadata.table_name, extract(columns, model))
}

pub fn insert_models<'a, T: 'a, I>(metadata: &EntityMetadata<T>, models: I) -> Result<Query>
where
    I: IntoIterator<Item = &'a T>,
{
    let columns = require_insertable(metadata)?;
    let rows = models
        .into_iter()
        .map(|model| extract(columns.iter().copied(), model))
        .collect();
    insert_many(metadata.table_name, rows)
}

/// Appends the identity column as the insert's returned column.
pub fn with_identity<T>(metadata: &EntityMetadata<T>, query: Query) -> Result<Query> {
    let identity = metadata.identity_column().ok_or_else(|| {
        RepositoryError::unsupported(format!(
            "table `{}` has no identity column to read back",
            metadata.table_name
        ))
    })?;
    Ok(query.returning(identity.name))
}

pub fn delete_model<T>(metadata: &EntityMetadata<T>, model: &T) -> Result<Query> {
    let keys = require_keys(metadata, "delete")?;
    Ok(delete(metadata.table_name, extract(keys, model)))
}

/// One delete whose filter ORs the key equality of every model.
pub fn delete_models<'a, T: 'a, I>(metadata: &EntityMetadata<T>, models: I) -> Result<Query>
where
    I: IntoIterator<Item = &'a T>,
{
    let keys = require_keys(metadata, "delete")?;
    let groups = models
        .into_iter()
        .map(|model| extract(keys.iter().copied(), model))
        .collect();
    Ok(delete(metadata.table_name, Filter::any_of(groups)))
}
