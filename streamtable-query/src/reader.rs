use sea_query::{Alias, Expr, SelectStatement, SimpleExpr};
use sqlx::Database;

use crate::{
    cursor::{Keyset, Order, Position},
    error::QueryError,
    sql::build_sqlx,
    PageInfo, ReadResult,
};

/// Query builder reading a select statement one page at a time.
///
/// The statement itself is never mutated, so the same reader can be executed
/// again from the first page at any time.
///
/// ```rust,ignore
/// use sea_query::{Alias, Asterisk, Query};
/// use streamtable_query::Reader;
///
/// let statement = Query::select()
///     .column(Asterisk)
///     .from(Alias::new("user_stream"))
///     .to_owned();
///
/// let mut reader = Reader::new(statement);
/// reader.order_by("version").order_by("event_id");
///
/// let page = reader.forward(100, None).execute::<_, MyRow, _>(&pool).await?;
///
/// if page.page_info.has_next_page {
///     let next = reader
///         .forward(100, page.page_info.end_cursor)
///         .execute::<_, MyRow, _>(&pool)
///         .await?;
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Reader {
    statement: SelectStatement,
    columns: Vec<String>,
    order: Order,
    first: u16,
    after: Option<Position>,
}

impl Reader {
    pub fn new(statement: SelectStatement) -> Self {
        Self {
            statement,
            columns: Vec::new(),
            order: Order::Asc,
            first: 40,
            after: None,
        }
    }

    /// Appends an ordering column. Columns compare in the order they are added.
    pub fn order_by(&mut self, column: impl Into<String>) -> &mut Self {
        self.columns.push(column.into());

        self
    }

    pub fn order(&mut self, order: Order) -> &mut Self {
        self.order = order;

        self
    }

    pub fn desc(&mut self) -> &mut Self {
        self.order(Order::Desc)
    }

    /// Configures the next page: `first` rows strictly after `after`.
    pub fn forward(&mut self, first: u16, after: Option<Position>) -> &mut Self {
        self.first = first;
        self.after = after;

        self
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub async fn execute<'e, 'c: 'e, DB, O, E>(
        &self,
        executor: E,
    ) -> Result<ReadResult<O>, QueryError>
    where
        DB: Database,
        E: 'e + sqlx::Executor<'c, Database = DB>,
        O: for<'r> sqlx::FromRow<'r, DB::Row>,
        O: Keyset,
        O: Send + Unpin,
        sea_query_binder::SqlxValues: for<'q> sqlx::IntoArguments<'q, DB>,
    {
        let statement = self.build_statement();
        let (sql, values) = build_sqlx::<DB, _>(&statement)?;

        tracing::debug!(sql = %sql, first = self.first, "reading page");

        let mut rows = sqlx::query_as_with::<DB, O, _>(&sql, values)
            .fetch_all(executor)
            .await?;

        let has_more = rows.len() > usize::from(self.first);
        if has_more {
            rows.pop();
        }

        let end_cursor = match rows.last() {
            Some(row) => Some(row.position(&self.columns)?),
            _ => None,
        };

        Ok(ReadResult {
            rows,
            page_info: PageInfo {
                has_next_page: has_more,
                end_cursor,
            },
        })
    }

    /// Statement for the configured page: keyset filter, ordering and
    /// `LIMIT first + 1` so the extra row tells whether another page exists.
    pub fn build_statement(&self) -> SelectStatement {
        let mut statement = self.statement.clone();

        if let Some(expr) = self.after.as_ref().and_then(|after| self.keyset_filter(after)) {
            statement.and_where(expr);
        }

        let order = match self.order {
            Order::Asc => sea_query::Order::Asc,
            Order::Desc => sea_query::Order::Desc,
        };

        for column in self.columns.iter() {
            statement.order_by(Alias::new(column), order.clone());
        }

        statement.limit(u64::from(self.first) + 1);

        statement
    }

    // (c1 > v1) OR (c1 = v1 AND ((c2 > v2) OR (c2 = v2 AND c3 > v3)))
    fn keyset_filter(&self, after: &Position) -> Option<SimpleExpr> {
        let columns = self.columns.iter().rev();
        let values = after.iter().rev();

        let mut expr = None::<SimpleExpr>;
        for (column, value) in columns.zip(values) {
            let current_expr = match self.order {
                Order::Asc => Expr::col(Alias::new(column)).gt(value.clone()),
                Order::Desc => Expr::col(Alias::new(column)).lt(value.clone()),
            };

            let Some(prev_expr) = expr.take() else {
                expr = Some(current_expr);
                continue;
            };

            expr = Some(
                current_expr.or(Expr::col(Alias::new(column))
                    .eq(value.clone())
                    .and(prev_expr)),
            );
        }

        expr
    }
}
