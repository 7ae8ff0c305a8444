//! Schema Registry - Dataset to table/column-family/row-key mapping
//!
//! Holds one [`DatasetSpec`] per logical dataset. The registry is built once at
//! startup (from a JSON document or the built-in MovieLens layout) and is
//! read-only afterwards.

mod movielens;

use crate::error::{ImportError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

lazy_static::lazy_static! {
    static ref MOVIELENS: SchemaRegistry = SchemaRegistry::from_specs_unchecked(movielens::datasets());
}

/// How the row key of a dataset is derived from a source row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowKeySpec {
    /// Key is the raw value of one column
    Single(String),

    /// Key is the ordered, escaped join of several columns
    Composite(Vec<String>),
}

impl RowKeySpec {
    pub fn single(column: impl Into<String>) -> Self {
        RowKeySpec::Single(column.into())
    }

    pub fn composite<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RowKeySpec::Composite(columns.into_iter().map(Into::into).collect())
    }

    /// Source columns consumed by the key, in key order.
    pub fn components(&self) -> &[String] {
        match self {
            RowKeySpec::Single(column) => std::slice::from_ref(column),
            RowKeySpec::Composite(columns) => columns,
        }
    }

    pub fn contains(&self, column: &str) -> bool {
        self.components().iter().any(|c| c == column)
    }
}

impl std::fmt::Display for RowKeySpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowKeySpec::Single(column) => write!(f, "{}", column),
            RowKeySpec::Composite(columns) => write!(f, "[{}]", columns.join(", ")),
        }
    }
}

/// Target layout of one logical dataset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetSpec {
    pub name: String,
    pub source_file: String,
    pub table_name: String,
    pub column_family: String,
    pub row_key: RowKeySpec,
    /// Allow-list of columns copied into the row; never overlaps `row_key`
    pub output_columns: Vec<String>,
    #[serde(default)]
    pub is_large: bool,
    #[serde(default = "default_chunk_count")]
    pub chunk_count: usize,
}

fn default_chunk_count() -> usize {
    1
}

impl DatasetSpec {
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        source_file: impl Into<String>,
        table_name: impl Into<String>,
        column_family: impl Into<String>,
        row_key: RowKeySpec,
        output_columns: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name: name.into(),
            source_file: source_file.into(),
            table_name: table_name.into(),
            column_family: column_family.into(),
            row_key,
            output_columns: output_columns.into_iter().map(Into::into).collect(),
            is_large: false,
            chunk_count: 1,
        }
    }

    /// Mark the dataset for chunked import.
    pub fn large(mut self, chunk_count: usize) -> Self {
        self.is_large = true;
        self.chunk_count = chunk_count;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| ImportError::InvalidDatasetSpec {
            dataset: self.name.clone(),
            reason,
        };

        let components = self.row_key.components();
        if components.is_empty() {
            return Err(invalid("row key has no components".to_string()));
        }

        let mut seen = HashSet::new();
        for component in components {
            if component.trim().is_empty() {
                return Err(invalid("row key component name is blank".to_string()));
            }
            if !seen.insert(component.as_str()) {
                return Err(invalid(format!("row key component '{}' repeats", component)));
            }
        }

        let mut seen = HashSet::new();
        for column in &self.output_columns {
            if self.row_key.contains(column) {
                return Err(invalid(format!(
                    "output column '{}' is already encoded in the row key",
                    column
                )));
            }
            if !seen.insert(column.as_str()) {
                return Err(invalid(format!("output column '{}' is listed twice", column)));
            }
        }

        if self.table_name.is_empty() || self.column_family.is_empty() {
            return Err(invalid("table name and column family are required".to_string()));
        }

        Ok(())
    }
}

/// On-disk shape of a dataset entry. Accepts both the native field names and
/// the older loader names (`filename`, `row_key_column`, `row_key_components`,
/// `columns`, `large_file`, `default_chunks`).
#[derive(Debug, Deserialize)]
struct DatasetConfig {
    #[serde(alias = "filename")]
    source_file: String,
    table_name: String,
    column_family: String,
    #[serde(default, alias = "row_key_components")]
    row_key: Option<RowKeySpec>,
    #[serde(default)]
    row_key_column: Option<String>,
    #[serde(alias = "columns")]
    output_columns: Vec<String>,
    #[serde(default, alias = "large_file")]
    is_large: bool,
    #[serde(default = "default_chunk_count", alias = "default_chunks")]
    chunk_count: usize,
}

impl DatasetConfig {
    fn into_spec(self, name: String) -> Result<DatasetSpec> {
        let row_key = match (self.row_key, self.row_key_column) {
            (Some(spec), _) => spec,
            (None, Some(column)) => RowKeySpec::Single(column),
            (None, None) => {
                return Err(ImportError::InvalidDatasetSpec {
                    dataset: name,
                    reason: "no row key configured".to_string(),
                })
            }
        };

        Ok(DatasetSpec {
            name,
            source_file: self.source_file,
            table_name: self.table_name,
            column_family: self.column_family,
            row_key,
            output_columns: self.output_columns,
            is_large: self.is_large,
            chunk_count: self.chunk_count,
        })
    }
}

/// Read-only lookup of dataset specs by name.
#[derive(Clone, Debug)]
pub struct SchemaRegistry {
    datasets: BTreeMap<String, DatasetSpec>,
}

impl SchemaRegistry {
    /// Build a registry, validating every spec.
    pub fn new(specs: impl IntoIterator<Item = DatasetSpec>) -> Result<Self> {
        let mut datasets = BTreeMap::new();
        for spec in specs {
            spec.validate()?;
            if datasets.contains_key(&spec.name) {
                return Err(ImportError::InvalidDatasetSpec {
                    dataset: spec.name.clone(),
                    reason: "dataset registered twice".to_string(),
                });
            }
            datasets.insert(spec.name.clone(), spec);
        }
        Ok(Self { datasets })
    }

    fn from_specs_unchecked(specs: Vec<DatasetSpec>) -> Self {
        Self {
            datasets: specs.into_iter().map(|s| (s.name.clone(), s)).collect(),
        }
    }

    /// The built-in MovieLens layout (movies, ratings, movie_ratings, tags, links).
    pub fn movielens() -> &'static SchemaRegistry {
        &MOVIELENS
    }

    /// Parse a JSON object mapping dataset name to its spec fields.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: BTreeMap<String, DatasetConfig> = serde_json::from_str(json)?;
        let specs = raw
            .into_iter()
            .map(|(name, config)| config.into_spec(name))
            .collect::<Result<Vec<_>>>()?;
        Self::new(specs)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn lookup(&self, name: &str) -> Result<&DatasetSpec> {
        self.datasets
            .get(name)
            .ok_or_else(|| ImportError::UnknownDataset(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.datasets.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DatasetSpec> {
        self.datasets.values()
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    /// Re-run spec validation over every entry.
    pub fn validate(&self) -> Result<()> {
        self.datasets.values().try_for_each(DatasetSpec::validate)
    }
}
