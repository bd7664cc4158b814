#[cfg(feature = "mysql")]
use sea_query::MysqlQueryBuilder;
#[cfg(feature = "postgres")]
use sea_query::PostgresQueryBuilder;
#[cfg(feature = "sqlite")]
use sea_query::SqliteQueryBuilder;
use sea_query::SchemaStatementBuilder;
use sea_query_binder::{SqlxBinder, SqlxValues};
use sqlx::Database;

use crate::error::QueryError;

/// Renders a DML statement for the backend behind `DB`, with bound values.
#[allow(unused_variables)]
pub fn build_sqlx<DB: Database, S: SqlxBinder>(
    statement: &S,
) -> Result<(String, SqlxValues), QueryError> {
    match DB::NAME {
        #[cfg(feature = "sqlite")]
        "SQLite" => Ok(statement.build_sqlx(SqliteQueryBuilder)),
        #[cfg(feature = "mysql")]
        "MySQL" => Ok(statement.build_sqlx(MysqlQueryBuilder)),
        #[cfg(feature = "postgres")]
        "PostgreSQL" => Ok(statement.build_sqlx(PostgresQueryBuilder)),
        name => Err(QueryError::UnsupportedDatabase(name.to_owned())),
    }
}

/// Renders a DDL statement (table or index) as SQL text for the backend behind `DB`.
#[allow(unused_variables)]
pub fn build_schema<DB: Database, S: SchemaStatementBuilder>(
    statement: &S,
) -> Result<String, QueryError> {
    match DB::NAME {
        #[cfg(feature = "sqlite")]
        "SQLite" => Ok(statement.to_string(SqliteQueryBuilder)),
        #[cfg(feature = "mysql")]
        "MySQL" => Ok(statement.to_string(MysqlQueryBuilder)),
        #[cfg(feature = "postgres")]
        "PostgreSQL" => Ok(statement.to_string(PostgresQueryBuilder)),
        name => Err(QueryError::UnsupportedDatabase(name.to_owned())),
    }
}
