//! Event streams persisted one relational table per stream.
//!
//! A [`StreamAdapter`] resolves a [`StreamName`] to a table with the
//! [`TableResolver`], creates that table from the [`SchemaDefiner`] layout and
//! appends [`Message`]s to it as rows. Metadata entries become columns of
//! their own and the unique `<table>_m_v_uix` index on aggregate and version
//! makes the database reject concurrent writers with
//! [`StoreError::Concurrency`].
//!
//! Reads return a [`StreamIterator`] fetching rows in batches, either in
//! version order ([`StreamAdapter::load_events`]) or in write order across
//! aggregates ([`StreamAdapter::replay`]).
//!
//! Enable the `sqlite`, `postgres` or `mysql` feature for every backend the
//! adapter is used with.

#![forbid(unsafe_code)]

mod adapter;
mod codec;
mod config;
mod error;
mod iterator;
mod message;
mod row;
mod schema;
mod stream;
mod table;

pub use adapter::StreamAdapter;
pub use codec::{JsonPayloadCodec, PayloadCodec};
pub use config::{
    AdapterConfig, ConfigBuilder, DEFAULT_BATCH_SIZE, DEFAULT_MAX_CONNECTIONS,
};
pub use error::{Result, StoreError};
pub use iterator::StreamIterator;
pub use message::{
    DefaultMessageFactory, Message, MessageConverter, MessageFactory, MessageFields,
    MessageRegistry, NoOpMessageConverter,
};
pub use row::{format_created_at, parse_created_at, EventRow, CREATED_AT_FORMAT};
pub use schema::{
    ColumnDefinition, ColumnKind, IndexDefinition, SchemaDefiner, SchemaLayout, TableDefinition,
    RESERVED_COLUMNS,
};
pub use stream::{Stream, StreamName};
pub use table::{TableResolver, DEFAULT_NAMESPACE_DELIMITER};
