pub mod compiler;
pub mod config;
pub mod connection;
pub mod error;
pub mod metadata;
pub mod metrics;
pub mod model;
pub mod pool;
pub mod query;
pub mod repository;
pub mod transaction;
pub mod value;

pub use compiler::{Dialect, IntoStatement, QueryCompiler, SqlCompiler, Statement};
pub use connection::{Connection, ConnectionProvider, Executor, ResultSets};
pub use error::{RepositoryError, Result};
pub use model::{Field, Generated, Mapping, Model};
pub use query::{Filter, Query, Sort, SortDirection};
pub use repository::{ExecutionMode, Repository};
pub use transaction::Transaction;
pub use value::{FromRow, FromValue, Row, Value};
