use std::collections::HashMap;

use crate::stream::StreamName;

pub const DEFAULT_NAMESPACE_DELIMITER: &str = "\\";

const TABLE_SUFFIX: &str = "_stream";

/// Maps stream names to physical table names.
#[derive(Debug, Clone)]
pub struct TableResolver {
    stream_table_map: HashMap<String, String>,
    namespace_delimiter: String,
}

impl Default for TableResolver {
    fn default() -> Self {
        Self {
            stream_table_map: HashMap::new(),
            namespace_delimiter: DEFAULT_NAMESPACE_DELIMITER.to_owned(),
        }
    }
}

impl TableResolver {
    pub fn new(stream_table_map: HashMap<String, String>) -> Self {
        Self {
            stream_table_map,
            ..Self::default()
        }
    }

    pub fn namespace_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.namespace_delimiter = delimiter.into();

        self
    }

    /// Explicit mapping first, otherwise the last namespace segment,
    /// snake-cased and suffixed with `_stream`.
    pub fn resolve(&self, stream: &StreamName) -> String {
        if let Some(table) = self.stream_table_map.get(stream.as_str()) {
            return table.to_owned();
        }

        let segment = match self.namespace_delimiter.is_empty() {
            true => stream.as_str(),
            false => stream
                .as_str()
                .rsplit(self.namespace_delimiter.as_str())
                .next()
                .unwrap_or_default(),
        };

        let mut table = segment.replace('-', "_").to_lowercase();

        if !table.contains(TABLE_SUFFIX) {
            table.push_str(TABLE_SUFFIX);
        }

        table
    }
}
