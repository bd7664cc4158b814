/// Errors raised while building or executing a paginated query.
///
/// ```rust
/// use streamtable_query::QueryError;
///
/// fn handle_query_error(error: QueryError) {
///     match error {
///         QueryError::MissingField(column) => {
///             // A row did not expose one of the ordering columns
///         }
///         QueryError::Sqlx(sqlx_error) => {
///             // The backend rejected the statement
///         }
///         QueryError::UnsupportedDatabase(name) => {
///             // No query builder compiled in for this backend
///         }
///     }
/// }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum QueryError {
    /// A row is missing a value for one of the ordering columns.
    #[error("missing ordering column `{0}`")]
    MissingField(String),

    /// Error returned by the sqlx driver.
    #[error("sqlx: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// The pool's backend has no sea-query builder enabled.
    #[error("'{0}' not supported, consider enabling the sqlite, postgres or mysql feature")]
    UnsupportedDatabase(String),
}
