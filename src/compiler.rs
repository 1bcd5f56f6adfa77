//! Turning abstract queries into SQL text with named parameter bindings.

use serde_derive::{Deserialize, Serialize};

use crate::error::{RepositoryError, Result};
use crate::metadata::Binding;
use crate::query::{Filter, Query, QueryKind, SortDirection};
use crate::value::Value;

/// SQL text plus its parameters, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Binding>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Statement kind taken from the leading keyword, for logs and metric labels.
    pub fn kind_label(&self) -> &'static str {
        let head: String = self
            .sql
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_uppercase();

        match head.as_str() {
            "SELECT" | "WITH" => "select",
            "INSERT" => "insert",
            "UPDATE" => "update",
            "DELETE" => "delete",
            _ => "other",
        }
    }
}

/// Compiles abstract queries into dialect-specific SQL.
pub trait QueryCompiler: Send + Sync {
    fn compile(&self, query: &Query) -> Result<Statement>;
}

/// Anything the repository can run: raw SQL, SQL with parameters, an
/// abstract query or an already compiled statement.
pub trait IntoStatement {
    fn into_statement<C: QueryCompiler + ?Sized>(self, compiler: &C) -> Result<Statement>;
}

impl IntoStatement for Statement {
    fn into_statement<C: QueryCompiler + ?Sized>(self, _: &C) -> Result<Statement> {
        Ok(self)
    }
}

impl IntoStatement for &Query {
    fn into_statement<C: QueryCompiler + ?Sized>(self, compiler: &C) -> Result<Statement> {
        compiler.compile(self)
    }
}

impl IntoStatement for Query {
    fn into_statement<C: QueryCompiler + ?Sized>(self, compiler: &C) -> Result<Statement> {
        compiler.compile(&self)
    }
}

impl IntoStatement for &str {
    fn into_statement<C: QueryCompiler + ?Sized>(self, _: &C) -> Result<Statement> {
        Ok(Statement::new(self))
    }
}

impl IntoStatement for String {
    fn into_statement<C: QueryCompiler + ?Sized>(self, _: &C) -> Result<Statement> {
        Ok(Statement::new(self))
    }
}

impl IntoStatement for (&str, Vec<Binding>) {
    fn into_statement<C: QueryCompiler + ?Sized>(self, _: &C) -> Result<Statement> {
        Ok(Statement {
            sql: self.0.to_string(),
            params: self.1,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// `?` placeholders, `"` quoting, `LIMIT`, `RETURNING`.
    #[default]
    Generic,
    Sqlite,
    /// `$1, $2, ...` placeholders.
    Postgres,
    /// `?` placeholders with backtick quoting; identity via `LAST_INSERT_ID()`.
    MySql,
    /// `@p0, @p1, ...` placeholders, `[ ]` quoting, `TOP`, `OUTPUT INSERTED`.
    SqlServer,
}

impl Dialect {
    fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", index + 1),
            Dialect::SqlServer => format!("@p{}", index),
            Dialect::Generic | Dialect::Sqlite | Dialect::MySql => "?".to_string(),
        }
    }

    fn quote(self, identifier: &str) -> String {
        match self {
            Dialect::MySql => format!("`{}`", identifier.replace('`', "``")),
            Dialect::SqlServer => format!("[{}]", identifier.replace(']', "]]")),
            Dialect::Generic | Dialect::Sqlite | Dialect::Postgres => {
                format!("\"{}\"", identifier.replace('"', "\"\""))
            }
        }
    }
}

/// The bundled compiler: ANSI-style SQL with per-dialect placeholders,
/// quoting, row limits and identity read-back.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlCompiler {
    dialect: Dialect,
}

impl SqlCompiler {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }
}

struct Builder {
    dialect: Dialect,
    sql: String,
    params: Vec<Binding>,
}

impl Builder {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    fn ident(&mut self, identifier: &str) {
        let quoted = self.dialect.quote(identifier);
        self.sql.push_str(&quoted);
    }

    fn param(&mut self, value: &Value) {
        let index = self.params.len();
        self.sql.push_str(&self.dialect.placeholder(index));
        self.params.push((format!("p{}", index), value.clone()));
    }

    fn column_list(&mut self, columns: &[String]) {
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.ident(column);
        }
    }

    fn filter(&mut self, filter: &Filter) {
        if filter.is_empty() {
            return;
        }

        self.push(" WHERE ");
        let grouped = filter.groups().len() > 1;
        for (g, group) in filter.groups().iter().enumerate() {
            if g > 0 {
                self.push(" OR ");
            }
            if grouped {
                self.push("(");
            }
            for (i, (column, value)) in group.iter().enumerate() {
                if i > 0 {
                    self.push(" AND ");
                }
                self.ident(column);
                if value.is_null() {
                    self.push(" IS NULL");
                } else {
                    self.push(" = ");
                    self.param(value);
                }
            }
            if grouped {
                self.push(")");
            }
        }
    }

    fn finish(self) -> Statement {
        Statement {
            sql: self.sql,
            params: self.params,
        }
    }
}

impl QueryCompiler for SqlCompiler {
    fn compile(&self, query: &Query) -> Result<Statement> {
        let dialect = self.dialect;
        let mut b = Builder::new(dialect);

        match &query.kind {
            QueryKind::Count => {
                b.push("SELECT COUNT(*) FROM ");
                b.ident(&query.table);
                b.filter(&query.filter);
            }
            QueryKind::Select { columns } => {
                b.push("SELECT ");
                if let (Dialect::SqlServer, Some(limit)) = (dialect, query.limit) {
                    b.push(&format!("TOP ({}) ", limit));
                }
                if columns.is_empty() {
                    b.push("*");
                } else {
                    b.column_list(columns);
                }
                b.push(" FROM ");
                b.ident(&query.table);
                b.filter(&query.filter);

                for (i, (column, direction)) in query.sort.0.iter().enumerate() {
                    b.push(if i == 0 { " ORDER BY " } else { ", " });
                    b.ident(column);
                    if *direction == SortDirection::Descending {
                        b.push(" DESC");
                    }
                }

                if let Some(limit) = query.limit {
                    if dialect != Dialect::SqlServer {
                        b.push(&format!(" LIMIT {}", limit));
                    }
                }
            }
            QueryKind::Insert {
                columns,
                rows,
                returning,
            } => {
                if rows.is_empty() {
                    return Err(RepositoryError::Compile(format!(
                        "insert into `{}` has no value rows",
                        query.table
                    )));
                }
                if dialect == Dialect::MySql && returning.is_some() && rows.len() > 1 {
                    return Err(RepositoryError::unsupported(
                        "MySQL cannot return one identity per row of a multi-row insert",
                    ));
                }

                b.push("INSERT INTO ");
                b.ident(&query.table);
                b.push(" (");
                b.column_list(columns);
                b.push(")");

                if let (Dialect::SqlServer, Some(column)) = (dialect, returning) {
                    b.push(" OUTPUT INSERTED.");
                    b.ident(column);
                }

                b.push(" VALUES ");
                for (r, row) in rows.iter().enumerate() {
                    if row.len() != columns.len() {
                        return Err(RepositoryError::Compile(format!(
                            "insert row {} into `{}` has {} values for {} columns",
                            r,
                            query.table,
                            row.len(),
                            columns.len()
                        )));
                    }
                    if r > 0 {
                        b.push(", ");
                    }
                    b.push("(");
                    for (i, value) in row.iter().enumerate() {
                        if i > 0 {
                            b.push(", ");
                        }
                        b.param(value);
                    }
                    b.push(")");
                }

                if let Some(column) = returning {
                    match dialect {
                        Dialect::MySql => b.push("; SELECT LAST_INSERT_ID()"),
                        Dialect::SqlServer => {}
                        Dialect::Generic | Dialect::Sqlite | Dialect::Postgres => {
                            b.push(" RETURNING ");
                            b.ident(column);
                        }
                    }
                }
            }
            QueryKind::Update { assignments } => {
                if assignments.is_empty() {
                    return Err(RepositoryError::Compile(format!(
                        "update of `{}` assigns no columns",
                        query.table
                    )));
                }

                b.push("UPDATE ");
                b.ident(&query.table);
                b.push(" SET ");
                for (i, (column, value)) in assignments.iter().enumerate() {
                    if i > 0 {
                        b.push(", ");
                    }
                    b.ident(column);
                    b.push(" = ");
                    b.param(value);
                }
                b.filter(&query.filter);
            }
            QueryKind::Delete => {
                b.push("DELETE FROM ");
                b.ident(&query.table);
                b.filter(&query.filter);
            }
        }

        Ok(b.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{self, Sort};

    fn binding(name: &str, value: impl Into<Value>) -> Binding {
        (name.to_string(), value.into())
    }

    #[test]
    fn compiles_select_with_sort_and_limit() {
        let q = query::select(
            "people",
            ("Age", 30),
            Sort::desc("Name").then("Id", SortDirection::Ascending),
            Some(1),
        );
        let statement = SqlCompiler::new(Dialect::Postgres).compile(&q).unwrap();

        assert_eq!(
            statement.sql,
            r#"SELECT * FROM "people" WHERE "Age" = $1 ORDER BY "Name" DESC, "Id" LIMIT 1"#
        );
        assert_eq!(statement.params, vec![binding("p0", 30)]);
    }

    #[test]
    fn sql_server_uses_top_and_named_placeholders() {
        let q = query::select("people", ("Age", 30), Sort::none(), Some(2));
        let statement = SqlCompiler::new(Dialect::SqlServer).compile(&q).unwrap();

        assert_eq!(
            statement.sql,
            "SELECT TOP (2) * FROM [people] WHERE [Age] = @p0"
        );
    }

    #[test]
    fn compiles_multi_row_insert_as_one_statement() {
        let q = query::insert_many(
            "people",
            vec![
                vec![binding("Name", "Ann"), binding("Age", 30)],
                vec![binding("Name", "Bob"), binding("Age", 41)],
            ],
        )
        .unwrap();
        let statement = SqlCompiler::new(Dialect::MySql).compile(&q).unwrap();

        assert_eq!(
            statement.sql,
            "INSERT INTO `people` (`Name`, `Age`) VALUES (?, ?), (?, ?)"
        );
        assert_eq!(statement.params.len(), 4);
    }

    #[test]
    fn identity_read_back_per_dialect() {
        let q = query::insert("people", vec![binding("Name", "Ann")])
            .unwrap()
            .returning("Id");

        let sql = |dialect| SqlCompiler::new(dialect).compile(&q).unwrap().sql;

        assert_eq!(
            sql(Dialect::Sqlite),
            r#"INSERT INTO "people" ("Name") VALUES (?) RETURNING "Id""#
        );
        assert_eq!(
            sql(Dialect::SqlServer),
            "INSERT INTO [people] ([Name]) OUTPUT INSERTED.[Id] VALUES (@p0)"
        );
        assert_eq!(
            sql(Dialect::MySql),
            "INSERT INTO `people` (`Name`) VALUES (?); SELECT LAST_INSERT_ID()"
        );
    }

    #[test]
    fn mysql_rejects_multi_row_identity_read_back() {
        let q = query::insert_many(
            "people",
            vec![vec![binding("Name", "Ann")], vec![binding("Name", "Bob")]],
        )
        .unwrap()
        .returning("Id");

        let err = SqlCompiler::new(Dialect::MySql).compile(&q).unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn compiles_or_groups_and_null_checks() {
        let filter = Filter::any_of(vec![
            vec![binding("Id", 1), binding("Region", Value::Null)],
            vec![binding("Id", 2)],
        ]);
        let statement = SqlCompiler::default()
            .compile(&query::delete("people", filter))
            .unwrap();

        assert_eq!(
            statement.sql,
            r#"DELETE FROM "people" WHERE ("Id" = ? AND "Region" IS NULL) OR ("Id" = ?)"#
        );
        assert_eq!(statement.params, vec![binding("p0", 1), binding("p1", 2)]);
    }

    #[test]
    fn update_with_nothing_to_assign_is_rejected() {
        let q = query::update("people", Vec::new(), ("Id", 1));

        assert!(matches!(
            SqlCompiler::default().compile(&q),
            Err(RepositoryError::Compile(_))
        ));
    }

    #[test]
    fn count_ignores_sort_and_escapes_identifiers() {
        let q = query::count("odd\"name", Filter::all());
        let statement = SqlCompiler::default().compile(&q).unwrap();

        assert_eq!(statement.sql, r#"SELECT COUNT(*) FROM "odd""name""#);
        assert!(statement.params.is_empty());
    }

    #[test]
    fn statement_kind_from_leading_keyword() {
        assert_eq!(Statement::new("  select 1").kind_label(), "select");
        assert_eq!(Statement::new("INSERT INTO t VALUES (1)").kind_label(), "insert");
        assert_eq!(Statement::new("PRAGMA foreign_keys").kind_label(), "other");
    }
}
