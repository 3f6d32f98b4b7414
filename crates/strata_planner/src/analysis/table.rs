use std::fmt;

use serde::{Deserialize, Serialize};

use crate::datatype::DataType;

/// How a table's data is laid out in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableFormat {
    /// Files split into byte ranges. Clustering columns are partition keys.
    File,
    /// Key-value store. The first clustering column is the row key, stored as
    /// lexicographically ordered bytes.
    KeyValue,
}

impl fmt::Display for TableFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => write!(f, "HDFS"),
            Self::KeyValue => write!(f, "HBASE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub datatype: DataType,
}

/// Catalog metadata for a table, as resolved by analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    pub format: TableFormat,
    /// Columns in declared order. Clustering columns come first.
    pub columns: Vec<ColumnDef>,
    pub num_clustering_cols: usize,
}

impl TableDescriptor {
    pub fn new(
        name: impl Into<String>,
        format: TableFormat,
        columns: impl IntoIterator<Item = (&'static str, DataType)>,
        num_clustering_cols: usize,
    ) -> Self {
        TableDescriptor {
            name: name.into(),
            format,
            columns: columns
                .into_iter()
                .map(|(name, datatype)| ColumnDef {
                    name: name.to_string(),
                    datatype,
                })
                .collect(),
            num_clustering_cols,
        }
    }

    pub fn clustering_columns(&self) -> &[ColumnDef] {
        let n = self.num_clustering_cols.min(self.columns.len());
        &self.columns[..n]
    }
}
