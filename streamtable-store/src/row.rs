use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{Column, ColumnIndex, Decode, FromRow, Row, Type, TypeInfo};
use streamtable_query::Keyset;
use uuid::Uuid;

use crate::{
    codec::PayloadCodec,
    error::{Result, StoreError},
    message::{MessageFactory, MessageFields},
    schema::RESERVED_COLUMNS,
    Message,
};

/// Text layout of `created_at`: microsecond precision, UTC, no offset.
pub const CREATED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

pub fn format_created_at(value: &DateTime<Utc>) -> String {
    value.format(CREATED_AT_FORMAT).to_string()
}

pub fn parse_created_at(value: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, CREATED_AT_FORMAT)
        .map(|value| value.and_utc())
        .map_err(|_| StoreError::InvalidCreatedAt(value.to_owned()))
}

/// One stored event as read from a stream table. Every column outside the
/// fixed set lands in `metadata`, NULL ones excluded.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRow {
    pub event_id: String,
    pub version: i64,
    pub event_name: String,
    pub payload: String,
    pub created_at: String,
    pub metadata: BTreeMap<String, String>,
}

impl<'r, R> FromRow<'r, R> for EventRow
where
    R: Row,
    for<'a> &'a str: ColumnIndex<R>,
    String: Decode<'r, R::Database> + Type<R::Database>,
    Option<String>: Decode<'r, R::Database> + Type<R::Database>,
    i64: Decode<'r, R::Database> + Type<R::Database>,
{
    fn from_row(row: &'r R) -> std::result::Result<Self, sqlx::Error> {
        let mut metadata = BTreeMap::new();

        for column in row.columns() {
            let name = column.name();

            if RESERVED_COLUMNS.contains(&name) {
                continue;
            }

            let Some(mut value) = row.try_get::<Option<String>, _>(name)? else {
                continue;
            };

            // fixed-width columns come back blank-padded on PostgreSQL
            if column.type_info().name().eq_ignore_ascii_case("CHAR") {
                value.truncate(value.trim_end_matches(' ').len());
            }

            metadata.insert(name.to_owned(), value);
        }

        Ok(Self {
            event_id: row.try_get("event_id")?,
            version: row.try_get("version")?,
            event_name: row.try_get("event_name")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
            metadata,
        })
    }
}

impl Keyset for EventRow {
    fn keyset_value(&self, column: &str) -> Option<sea_query::Value> {
        match column {
            "version" => Some(self.version.into()),
            "created_at" => Some(self.created_at.to_owned().into()),
            "event_id" => Some(self.event_id.to_owned().into()),
            _ => None,
        }
    }
}

impl EventRow {
    /// Rebuilds the domain message. Row metadata overrides the caller's
    /// filter metadata on equal keys.
    pub fn into_message(
        self,
        codec: &dyn PayloadCodec,
        factory: &dyn MessageFactory,
        filter: &BTreeMap<String, String>,
    ) -> Result<Message> {
        let mut metadata = filter.clone();
        metadata.extend(self.metadata);

        let fields = MessageFields {
            uuid: Uuid::parse_str(&self.event_id)?,
            message_name: self.event_name.to_owned(),
            version: u64::try_from(self.version)?,
            created_at: parse_created_at(&self.created_at)?,
            payload: codec.deserialize(&self.payload)?,
            metadata,
        };

        Ok(factory.create_from_fields(&self.event_name, fields)?)
    }
}
