//! Query infrastructure for streamtable stores.
//!
//! The [`Reader`] wraps a sea-query [`SelectStatement`](sea_query::SelectStatement)
//! and fetches it one page at a time with keyset pagination: every page is
//! ordered by a fixed list of columns and the next page starts strictly after
//! the [`Position`] of the last row of the previous one. Rows expose their
//! ordering values through the [`Keyset`] trait.
//!
//! Statements are rendered for the backend behind the sqlx pool with
//! [`build_sqlx`] and [`build_schema`]. Enable the `sqlite`, `postgres` or
//! `mysql` feature for each backend you connect to.

#![forbid(unsafe_code)]

mod cursor;
mod error;
mod reader;
mod sql;

pub use cursor::{Keyset, Order, Position};
pub use error::QueryError;
pub use reader::Reader;
pub use sql::{build_schema, build_sqlx};

#[derive(Default, Debug, Clone, PartialEq)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<Position>,
}

#[derive(Debug, PartialEq)]
pub struct ReadResult<N> {
    pub rows: Vec<N>,
    pub page_info: PageInfo,
}

impl<N> ReadResult<N> {
    pub fn map<B, F>(self, f: F) -> ReadResult<B>
    where
        F: Fn(N) -> B,
    {
        ReadResult {
            page_info: self.page_info,
            rows: self.rows.into_iter().map(f).collect(),
        }
    }
}

impl<N> Default for ReadResult<N> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            page_info: PageInfo::default(),
        }
    }
}
