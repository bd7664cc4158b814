use sea_query::{
    Alias, ColumnDef, Iden, Index, IndexCreateStatement, Table, TableCreateStatement,
    TableDropStatement,
};
use serde::Deserialize;

use crate::error::{Result, StoreError};

#[derive(Iden, Clone, Copy)]
pub(crate) enum StreamColumn {
    EventId,
    Version,
    EventName,
    Payload,
    CreatedAt,
    AggregateId,
    AggregateType,
    CausationId,
    CausationName,
}

impl StreamColumn {
    pub(crate) fn name(self) -> String {
        Iden::to_string(&self)
    }
}

/// Columns every stream table owns; metadata keys must avoid them.
pub const RESERVED_COLUMNS: [&str; 5] = ["event_id", "version", "event_name", "payload", "created_at"];

/// How aggregates share stream tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaLayout {
    /// One table for aggregates of any type, versions unique per
    /// (`aggregate_id`, `aggregate_type`).
    #[default]
    SingleStream,
    /// One table per aggregate type, versions unique per `aggregate_id`.
    AggregateType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Char(u32),
    VarChar(u32),
    BigInteger,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub kind: ColumnKind,
    pub nullable: bool,
}

impl ColumnDefinition {
    fn required(column: StreamColumn, kind: ColumnKind) -> Self {
        Self {
            name: column.name(),
            kind,
            nullable: false,
        }
    }

    fn optional(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: true,
        }
    }

    fn to_column_def(&self, primary_key: bool) -> ColumnDef {
        let mut def = ColumnDef::new(Alias::new(&self.name));

        match self.kind {
            ColumnKind::Char(len) => def.char_len(len),
            ColumnKind::VarChar(len) => def.string_len(len),
            ColumnKind::BigInteger => def.big_integer(),
            ColumnKind::Text => def.text(),
        };

        if self.nullable {
            def.null();
        } else {
            def.not_null();
        }

        if primary_key {
            def.primary_key();
        }

        def
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<String>,
}

/// Structural layout of one stream table. Turned into DDL with
/// [`TableDefinition::create_statements`], never executed here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    pub primary_key: String,
    pub unique_index: IndexDefinition,
}

impl TableDefinition {
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn create_statements(&self) -> (TableCreateStatement, IndexCreateStatement) {
        let mut table = Table::create();
        table.table(Alias::new(&self.name));

        for column in self.columns.iter() {
            let mut def = column.to_column_def(column.name == self.primary_key);
            table.col(&mut def);
        }

        let mut index = Index::create();
        index
            .name(&self.unique_index.name)
            .table(Alias::new(&self.name))
            .unique();

        for column in self.unique_index.columns.iter() {
            index.col(Alias::new(column));
        }

        (table.to_owned(), index.to_owned())
    }

    pub fn drop_statement(&self) -> TableDropStatement {
        drop_statement(&self.name)
    }
}

pub(crate) fn drop_statement(table: &str) -> TableDropStatement {
    Table::drop().table(Alias::new(table)).to_owned()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaDefiner {
    layout: SchemaLayout,
    causation: bool,
}

impl SchemaDefiner {
    pub fn new(layout: SchemaLayout) -> Self {
        Self {
            layout,
            causation: false,
        }
    }

    pub fn causation(mut self, enabled: bool) -> Self {
        self.causation = enabled;

        self
    }

    pub fn layout(&self) -> SchemaLayout {
        self.layout
    }

    pub fn define<I, K>(&self, table: &str, metadata_keys: I) -> Result<TableDefinition>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let mut columns = vec![
            ColumnDefinition::required(StreamColumn::EventId, ColumnKind::Char(36)),
            ColumnDefinition::required(StreamColumn::Version, ColumnKind::BigInteger),
            ColumnDefinition::required(StreamColumn::EventName, ColumnKind::VarChar(100)),
            ColumnDefinition::required(StreamColumn::Payload, ColumnKind::Text),
            ColumnDefinition::required(StreamColumn::CreatedAt, ColumnKind::Char(26)),
            ColumnDefinition::optional(StreamColumn::AggregateId.name(), ColumnKind::Char(36)),
            ColumnDefinition::optional(StreamColumn::AggregateType.name(), ColumnKind::VarChar(150)),
        ];

        if self.causation {
            columns.push(ColumnDefinition::optional(
                StreamColumn::CausationId.name(),
                ColumnKind::Char(36),
            ));
            columns.push(ColumnDefinition::optional(
                StreamColumn::CausationName.name(),
                ColumnKind::VarChar(100),
            ));
        }

        for key in metadata_keys {
            let key = key.as_ref();

            validate_metadata_key(key)?;

            if columns.iter().any(|column| column.name == key) {
                continue;
            }

            columns.push(ColumnDefinition::optional(key, ColumnKind::VarChar(100)));
        }

        let index_columns = match self.layout {
            SchemaLayout::SingleStream => vec![
                StreamColumn::AggregateId.name(),
                StreamColumn::AggregateType.name(),
                StreamColumn::Version.name(),
            ],
            SchemaLayout::AggregateType => vec![
                StreamColumn::AggregateId.name(),
                StreamColumn::Version.name(),
            ],
        };

        Ok(TableDefinition {
            name: table.to_owned(),
            columns,
            primary_key: StreamColumn::EventId.name(),
            unique_index: IndexDefinition {
                name: format!("{table}_m_v_uix"),
                columns: index_columns,
            },
        })
    }
}

pub(crate) fn validate_metadata_key(key: &str) -> Result<()> {
    if RESERVED_COLUMNS.contains(&key) {
        return Err(StoreError::ReservedColumn(key.to_owned()));
    }

    Ok(())
}
