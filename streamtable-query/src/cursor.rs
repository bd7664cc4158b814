use std::ops::Deref;

use crate::error::QueryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

/// Keyset position of a row: the values of every ordering column, in
/// ordering order. A reader resumes strictly after it.
#[derive(Debug, Clone, PartialEq)]
pub struct Position(Vec<sea_query::Value>);

impl Position {
    pub fn new(values: Vec<sea_query::Value>) -> Self {
        Self(values)
    }

    pub fn into_values(self) -> Vec<sea_query::Value> {
        self.0
    }
}

impl Deref for Position {
    type Target = [sea_query::Value];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Rows that can report the value of an ordering column, so a reader can
/// continue after them.
pub trait Keyset {
    fn keyset_value(&self, column: &str) -> Option<sea_query::Value>;

    fn position(&self, columns: &[String]) -> Result<Position, QueryError> {
        columns
            .iter()
            .map(|column| {
                self.keyset_value(column)
                    .ok_or_else(|| QueryError::MissingField(column.to_owned()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Position)
    }
}
