use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use futures_util::future::LocalBoxFuture;
use sea_query::{Alias, Asterisk, Expr, Query, SelectStatement, SimpleExpr};
use sea_query_binder::SqlxValues;
use sqlx::{pool::PoolOptions, Database, Pool, Transaction};
use streamtable_query::{build_schema, build_sqlx, ReadResult, Reader};
use tokio::sync::Mutex;

use crate::{
    codec::{JsonPayloadCodec, PayloadCodec},
    config::AdapterConfig,
    error::{Result, StoreError},
    iterator::StreamIterator,
    message::{DefaultMessageFactory, Message, MessageConverter, MessageFactory, NoOpMessageConverter},
    row::{format_created_at, EventRow},
    schema::{drop_statement, validate_metadata_key, SchemaDefiner, StreamColumn},
    stream::{Stream, StreamName},
    table::TableResolver,
};

/// Persists streams in one table each on a sqlx pool.
///
/// Statements autocommit on the pool unless a transaction was opened with
/// [`StreamAdapter::begin_transaction`], in which case every statement of
/// this adapter, iterator batches included, runs on that transaction until
/// it is committed or rolled back.
///
/// ```rust,ignore
/// use streamtable_store::{AdapterConfig, Message, Stream, StreamAdapter, StreamName};
///
/// let config = AdapterConfig::builder().connection("sqlite::memory:").build();
/// let adapter = StreamAdapter::<sqlx::Sqlite>::connect(&config).await?;
///
/// let name = StreamName::new("App\\Model\\User")?;
/// adapter
///     .create(Stream::new(
///         name.clone(),
///         vec![Message::new("user-created").aggregate("user", "1").version(1)],
///     ))
///     .await?;
///
/// let stream = adapter.load(&name, None).await?;
/// ```
pub struct StreamAdapter<DB: Database> {
    pool: Pool<DB>,
    transaction: Mutex<Option<Transaction<'static, DB>>>,
    resolver: TableResolver,
    definer: SchemaDefiner,
    batch_size: u16,
    codec: Box<dyn PayloadCodec>,
    factory: Box<dyn MessageFactory>,
    converter: Box<dyn MessageConverter>,
}

impl<DB: Database> StreamAdapter<DB> {
    pub fn new(pool: Pool<DB>, config: &AdapterConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            pool,
            transaction: Mutex::new(None),
            resolver: config.resolver(),
            definer: config.definer(),
            batch_size: config.batch_size,
            codec: Box::new(JsonPayloadCodec),
            factory: Box::new(DefaultMessageFactory),
            converter: Box::new(NoOpMessageConverter),
        })
    }

    /// Opens a pool from `config.connection`.
    pub async fn connect(config: &AdapterConfig) -> Result<Self> {
        config.validate()?;

        let dsn = config.dsn()?;
        let pool = PoolOptions::<DB>::new()
            .max_connections(config.max_connections)
            .connect(dsn)
            .await
            .map_err(|err| match err {
                sqlx::Error::Configuration(err) => StoreError::Configuration(err.to_string()),
                err => StoreError::Sqlx(err),
            })?;

        Self::new(pool, config)
    }

    pub fn with_codec<C: PayloadCodec + 'static>(mut self, codec: C) -> Self {
        self.codec = Box::new(codec);
        self
    }

    pub fn with_factory<F: MessageFactory + 'static>(mut self, factory: F) -> Self {
        self.factory = Box::new(factory);
        self
    }

    pub fn with_converter<C: MessageConverter + 'static>(mut self, converter: C) -> Self {
        self.converter = Box::new(converter);
        self
    }

    pub fn pool(&self) -> &Pool<DB> {
        &self.pool
    }

    pub fn get_table(&self, stream: &StreamName) -> String {
        self.resolver.resolve(stream)
    }

    /// DDL creating the table of `stream`, rendered for this backend.
    pub fn schema_sql_for<I, K>(&self, stream: &StreamName, metadata_keys: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let table = self.get_table(stream);
        let (table, index) = self.definer.define(&table, metadata_keys)?.create_statements();

        Ok(vec![
            build_schema::<DB, _>(&table)?,
            build_schema::<DB, _>(&index)?,
        ])
    }

    pub fn drop_schema_sql_for(&self, stream: &StreamName) -> Result<String> {
        let table = self.get_table(stream);

        Ok(build_schema::<DB, _>(&drop_statement(&table))?)
    }

    pub(crate) fn batch_size(&self) -> u16 {
        self.batch_size
    }

    pub(crate) fn codec(&self) -> &dyn PayloadCodec {
        self.codec.as_ref()
    }

    pub(crate) fn factory(&self) -> &dyn MessageFactory {
        self.factory.as_ref()
    }
}

impl<DB> StreamAdapter<DB>
where
    DB: Database,
    for<'c> &'c mut DB::Connection: sqlx::Executor<'c, Database = DB>,
    SqlxValues: for<'q> sqlx::IntoArguments<'q, DB>,
    EventRow: for<'r> sqlx::FromRow<'r, DB::Row>,
{
    /// Creates the table of `stream` with one column per metadata key.
    /// Fails if the table already exists.
    #[tracing::instrument(skip_all, fields(stream = %stream))]
    pub async fn create_schema_for<I, K>(&self, stream: &StreamName, metadata_keys: I) -> Result<()>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        for sql in self.schema_sql_for(stream, metadata_keys)? {
            tracing::debug!(sql = %sql, "executing schema statement");

            self.execute_raw(&sql).await?;
        }

        Ok(())
    }

    #[tracing::instrument(skip_all, fields(stream = %stream))]
    pub async fn drop_schema_for(&self, stream: &StreamName) -> Result<()> {
        let sql = self.drop_schema_sql_for(stream)?;

        tracing::debug!(sql = %sql, "dropping stream table");

        self.execute_raw(&sql).await
    }

    /// Creates the schema from the metadata keys of the first event, then
    /// appends every event.
    pub async fn create(&self, stream: Stream) -> Result<()> {
        let Some(first) = stream.events.first() else {
            return Err(StoreError::EmptyStream(stream.name));
        };

        let fields = self.converter.to_fields(first)?;

        self.create_schema_for(&stream.name, fields.metadata.keys())
            .await?;

        self.append_to(&stream.name, stream.events).await
    }

    /// Inserts one row per event, in the given order. Rows inserted before a
    /// failing one stay unless a transaction is open.
    ///
    /// Any unique violation fails with [`StoreError::Concurrency`]: a version
    /// already taken by the aggregate, but also an event id already stored in
    /// the table. Reloading and retrying on
    /// [`StoreError::is_concurrency`] cannot resolve the latter, so callers
    /// that retry should give each attempt fresh event ids.
    #[tracing::instrument(skip_all, fields(stream = %stream))]
    pub async fn append_to<I>(&self, stream: &StreamName, events: I) -> Result<()>
    where
        I: IntoIterator<Item = Message>,
    {
        let table = self.get_table(stream);

        for event in events {
            let fields = self.converter.to_fields(&event)?;
            let payload = self.codec.serialize(&fields.payload)?;

            let mut columns = vec![
                Alias::new(StreamColumn::EventId.name()),
                Alias::new(StreamColumn::Version.name()),
                Alias::new(StreamColumn::EventName.name()),
                Alias::new(StreamColumn::Payload.name()),
                Alias::new(StreamColumn::CreatedAt.name()),
            ];

            let mut values: Vec<SimpleExpr> = vec![
                fields.uuid.to_string().into(),
                i64::try_from(fields.version)?.into(),
                fields.message_name.to_owned().into(),
                payload.into(),
                format_created_at(&fields.created_at).into(),
            ];

            for (key, value) in fields.metadata {
                validate_metadata_key(&key)?;

                columns.push(Alias::new(key));
                values.push(value.into());
            }

            let mut statement = Query::insert();
            statement.into_table(Alias::new(&table)).columns(columns);
            statement.values(values)?;

            let (sql, values) = build_sqlx::<DB, _>(&statement)?;

            tracing::debug!(
                table = %table,
                event = %fields.message_name,
                version = fields.version,
                "appending event"
            );

            if let Err(err) = self.execute(&sql, values).await {
                let unique_violation = err
                    .as_database_error()
                    .map(|err| err.is_unique_violation())
                    .unwrap_or(false);

                if unique_violation {
                    return Err(StoreError::Concurrency { table, source: err });
                }

                return Err(err.into());
            }
        }

        Ok(())
    }

    /// Every event of `stream` from `min_version` on, in version order.
    pub async fn load(&self, stream: &StreamName, min_version: Option<u64>) -> Result<Stream> {
        let events = self
            .load_events(stream, BTreeMap::<String, String>::new(), min_version)
            .await?
            .try_collect()
            .await?;

        Ok(Stream::new(stream.clone(), events))
    }

    /// Events whose metadata columns equal every `filter` entry, compared as
    /// strings, in version order.
    #[tracing::instrument(skip_all, fields(stream = %stream))]
    pub async fn load_events<F, K, V>(
        &self,
        stream: &StreamName,
        filter: F,
        min_version: Option<u64>,
    ) -> Result<StreamIterator<'_, DB>>
    where
        F: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
    {
        let filter = metadata_filter(filter)?;
        let mut statement = self.select_filtered(stream, &filter);

        if let Some(min_version) = min_version {
            statement.and_where(Expr::col(StreamColumn::Version).gte(i64::try_from(min_version)?));
        }

        StreamIterator::new(
            self,
            statement,
            &[StreamColumn::Version, StreamColumn::EventId],
            filter,
        )
        .await
    }

    /// Events across aggregates in write order: `created_at`, then version.
    /// `since` is exclusive.
    #[tracing::instrument(skip_all, fields(stream = %stream))]
    pub async fn replay<F, K, V>(
        &self,
        stream: &StreamName,
        since: Option<DateTime<Utc>>,
        filter: F,
    ) -> Result<StreamIterator<'_, DB>>
    where
        F: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
    {
        let filter = metadata_filter(filter)?;
        let mut statement = self.select_filtered(stream, &filter);

        if let Some(since) = since {
            statement.and_where(Expr::col(StreamColumn::CreatedAt).gt(format_created_at(&since)));
        }

        StreamIterator::new(
            self,
            statement,
            &[
                StreamColumn::CreatedAt,
                StreamColumn::Version,
                StreamColumn::EventId,
            ],
            filter,
        )
        .await
    }

    /// Opens the transaction every later statement of this adapter runs on.
    /// It stays open until [`StreamAdapter::commit`] or
    /// [`StreamAdapter::rollback`]; prefer [`StreamAdapter::transactional`]
    /// when the unit of work fits in one closure.
    pub async fn begin_transaction(&self) -> Result<()> {
        let mut transaction = self.transaction.lock().await;

        if transaction.is_some() {
            return Err(StoreError::TransactionAlreadyStarted);
        }

        *transaction = Some(self.pool.begin().await?);

        tracing::debug!("transaction started");

        Ok(())
    }

    pub async fn commit(&self) -> Result<()> {
        let Some(transaction) = self.transaction.lock().await.take() else {
            return Err(StoreError::NoTransaction);
        };

        transaction.commit().await?;

        tracing::debug!("transaction committed");

        Ok(())
    }

    pub async fn rollback(&self) -> Result<()> {
        let Some(transaction) = self.transaction.lock().await.take() else {
            return Err(StoreError::NoTransaction);
        };

        transaction.rollback().await?;

        tracing::debug!("transaction rolled back");

        Ok(())
    }

    pub async fn in_transaction(&self) -> bool {
        self.transaction.lock().await.is_some()
    }

    /// Runs `f` inside a transaction: committed when it returns `Ok`, rolled
    /// back when it returns `Err`. Dropping the returned future before it
    /// completes, or a panic in `f`, rolls the transaction back as well and
    /// leaves the adapter without one.
    ///
    /// ```rust,ignore
    /// adapter
    ///     .transactional(|adapter| {
    ///         Box::pin(async move {
    ///             adapter.append_to(&name, events).await
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn transactional<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'t> FnOnce(&'t Self) -> LocalBoxFuture<'t, Result<T>>,
    {
        self.begin_transaction().await?;

        let _guard = TransactionGuard(&self.transaction);

        match f(self).await {
            Ok(value) => {
                self.commit().await?;

                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback().await {
                    tracing::warn!(error = %rollback_err, "failed to roll back transaction");
                }

                Err(err)
            }
        }
    }

    pub(crate) async fn read_page(&self, reader: &Reader) -> Result<ReadResult<EventRow>> {
        let mut transaction = self.transaction.lock().await;

        if let Some(transaction) = transaction.as_mut() {
            return Ok(reader
                .execute::<DB, EventRow, _>(&mut **transaction)
                .await?);
        }

        drop(transaction);

        Ok(reader.execute::<DB, EventRow, _>(&self.pool).await?)
    }

    async fn execute(&self, sql: &str, values: SqlxValues) -> std::result::Result<(), sqlx::Error> {
        let mut transaction = self.transaction.lock().await;

        if let Some(transaction) = transaction.as_mut() {
            sqlx::query_with::<DB, _>(sql, values)
                .execute(&mut **transaction)
                .await?;

            return Ok(());
        }

        drop(transaction);

        sqlx::query_with::<DB, _>(sql, values)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn execute_raw(&self, sql: &str) -> Result<()> {
        let mut transaction = self.transaction.lock().await;

        if let Some(transaction) = transaction.as_mut() {
            sqlx::raw_sql(sql).execute(&mut **transaction).await?;

            return Ok(());
        }

        drop(transaction);

        sqlx::raw_sql(sql).execute(&self.pool).await?;

        Ok(())
    }

    fn select_filtered(
        &self,
        stream: &StreamName,
        filter: &BTreeMap<String, String>,
    ) -> SelectStatement {
        let table = self.get_table(stream);
        let mut statement = Query::select()
            .column(Asterisk)
            .from(Alias::new(table))
            .to_owned();

        for (key, value) in filter.iter() {
            statement.and_where(Expr::col(Alias::new(key)).eq(value.to_owned()));
        }

        statement
    }
}

/// Shares the pool and collaborators. The clone starts without a transaction.
impl<DB: Database> Clone for StreamAdapter<DB> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            transaction: Mutex::new(None),
            resolver: self.resolver.clone(),
            definer: self.definer,
            batch_size: self.batch_size,
            codec: self.codec.clone(),
            factory: self.factory.clone(),
            converter: self.converter.clone(),
        }
    }
}

/// Clears the transaction slot when a [`StreamAdapter::transactional`] call
/// ends without reaching commit or rollback. The dropped transaction is
/// rolled back by sqlx.
struct TransactionGuard<'a, DB: Database>(&'a Mutex<Option<Transaction<'static, DB>>>);

impl<DB: Database> Drop for TransactionGuard<'_, DB> {
    fn drop(&mut self) {
        // the body future is dropped before the guard, so no statement holds the lock
        let Ok(mut transaction) = self.0.try_lock() else {
            tracing::warn!("transaction slot busy, transaction left open");
            return;
        };

        if transaction.take().is_some() {
            tracing::warn!("transactional future dropped, rolling back");
        }
    }
}

fn metadata_filter<F, K, V>(filter: F) -> Result<BTreeMap<String, String>>
where
    F: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: ToString,
{
    filter
        .into_iter()
        .map(|(key, value)| {
            let key = key.into();
            validate_metadata_key(&key)?;

            Ok((key, value.to_string()))
        })
        .collect()
}
