use std::collections::{BTreeMap, VecDeque};

use futures_util::{stream, Stream};
use sea_query::SelectStatement;
use sea_query_binder::SqlxValues;
use sqlx::Database;
use streamtable_query::{PageInfo, Reader};

use crate::{
    adapter::StreamAdapter,
    error::{Result, StoreError},
    row::EventRow,
    schema::StreamColumn,
    Message,
};

#[derive(Debug)]
enum State {
    Unstarted,
    Positioned { row: EventRow, index: usize },
    Exhausted,
}

/// Forward-only, restartable cursor over the events of a stream query.
///
/// Rows are fetched `batch_size` at a time with keyset continuation on the
/// ordering columns, so memory stays bounded whatever the stream length.
/// Messages are rebuilt from the current row on demand.
pub struct StreamIterator<'a, DB: Database> {
    adapter: &'a StreamAdapter<DB>,
    reader: Reader,
    batch_size: u16,
    filter: BTreeMap<String, String>,
    buffer: VecDeque<EventRow>,
    page_info: PageInfo,
    state: State,
}

impl<'a, DB> StreamIterator<'a, DB>
where
    DB: Database,
    for<'c> &'c mut DB::Connection: sqlx::Executor<'c, Database = DB>,
    SqlxValues: for<'q> sqlx::IntoArguments<'q, DB>,
    EventRow: for<'r> sqlx::FromRow<'r, DB::Row>,
{
    /// Executes the query and positions the iterator on its first row.
    pub(crate) async fn new(
        adapter: &'a StreamAdapter<DB>,
        statement: SelectStatement,
        order_by: &[StreamColumn],
        filter: BTreeMap<String, String>,
    ) -> Result<Self> {
        let mut reader = Reader::new(statement);

        for column in order_by {
            reader.order_by(column.name());
        }

        let mut iterator = Self {
            adapter,
            reader,
            batch_size: adapter.batch_size(),
            filter,
            buffer: VecDeque::new(),
            page_info: PageInfo::default(),
            state: State::Unstarted,
        };

        iterator.rewind().await?;

        Ok(iterator)
    }

    pub fn current(&self) -> Result<Option<Message>> {
        let State::Positioned { row, .. } = &self.state else {
            return Ok(None);
        };

        row.clone()
            .into_message(self.adapter.codec(), self.adapter.factory(), &self.filter)
            .map(Some)
    }

    /// Zero-based position of the current row, `None` once exhausted.
    pub fn key(&self) -> Option<usize> {
        match self.state {
            State::Positioned { index, .. } => Some(index),
            _ => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self.state, State::Positioned { .. })
    }

    pub async fn advance(&mut self) -> Result<()> {
        let index = match self.state {
            State::Unstarted => return self.rewind().await,
            State::Exhausted => return Ok(()),
            State::Positioned { index, .. } => index,
        };

        if self.buffer.is_empty() && self.page_info.has_next_page {
            let after = self.page_info.end_cursor.take();
            self.fetch(after).await?;
        }

        self.state = match self.buffer.pop_front() {
            Some(row) => State::Positioned {
                row,
                index: index + 1,
            },
            None => State::Exhausted,
        };

        Ok(())
    }

    /// Goes back to the first row, re-running the query unless the iterator
    /// already stands on it.
    pub async fn restart(&mut self) -> Result<()> {
        if let State::Positioned { index: 0, .. } = self.state {
            return Ok(());
        }

        self.rewind().await
    }

    /// Returns the current message and moves past it.
    pub async fn next(&mut self) -> Result<Option<Message>> {
        if let State::Unstarted = self.state {
            self.rewind().await?;
        }

        let Some(message) = self.current()? else {
            return Ok(None);
        };

        self.advance().await?;

        Ok(Some(message))
    }

    /// Drains the remaining messages.
    pub async fn try_collect(mut self) -> Result<Vec<Message>> {
        let mut messages = Vec::new();

        while let Some(message) = self.next().await? {
            messages.push(message);
        }

        Ok(messages)
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Message>> + 'a {
        stream::try_unfold(self, |mut iterator| async move {
            let message = iterator.next().await?;

            Ok::<_, StoreError>(message.map(|message| (message, iterator)))
        })
    }

    async fn rewind(&mut self) -> Result<()> {
        self.fetch(None).await?;

        self.state = match self.buffer.pop_front() {
            Some(row) => State::Positioned { row, index: 0 },
            None => State::Exhausted,
        };

        Ok(())
    }

    async fn fetch(&mut self, after: Option<streamtable_query::Position>) -> Result<()> {
        self.reader.forward(self.batch_size, after);

        let page = self.adapter.read_page(&self.reader).await?;

        tracing::debug!(
            rows = page.rows.len(),
            has_next_page = page.page_info.has_next_page,
            "fetched stream batch"
        );

        self.buffer = page.rows.into();
        self.page_info = page.page_info;

        Ok(())
    }
}
