//! Row Key Composer
//!
//! Turns a source row into a wide-column row key plus the columns to store.
//!
//! Composite keys join their components with [`KEY_SEPARATOR`]. Inside a
//! component, [`KEY_ESCAPE`] and [`KEY_SEPARATOR`] are prefixed with
//! [`KEY_ESCAPE`], so the join is injective and [`decompose`] always recovers
//! the original components. Components that contain neither character are
//! joined verbatim (`7` + `42` → `7_42`). Changing either character
//! invalidates the decomposition of every key already written.

use crate::error::{ImportError, Result};
use crate::registry::{DatasetSpec, RowKeySpec};
use crate::sink::OutputRecord;
use crate::source::SourceRow;
use std::collections::BTreeMap;

pub const KEY_SEPARATOR: char = '_';
pub const KEY_ESCAPE: char = '\\';

/// Row key and retained columns for one source row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComposedRow {
    pub row_key: String,
    pub columns: BTreeMap<String, String>,
}

/// Derive the row key and the allow-listed columns of `row`.
///
/// A single-column key is the raw value, unescaped; [`decompose`] only
/// applies to keys of composite-key datasets.
pub fn compose(spec: &DatasetSpec, row: &SourceRow) -> Result<ComposedRow> {
    let row_key = compose_key(spec, row)?;

    let mut columns = BTreeMap::new();
    for name in &spec.output_columns {
        let value = row.get(name).ok_or_else(|| missing(spec, name))?;
        columns.insert(name.clone(), value.to_string());
    }

    Ok(ComposedRow { row_key, columns })
}

/// [`compose`] and address the result at the dataset's table and family.
pub fn compose_record(spec: &DatasetSpec, row: &SourceRow) -> Result<OutputRecord> {
    let composed = compose(spec, row)?;
    Ok(OutputRecord::new(
        spec.table_name.clone(),
        spec.column_family.clone(),
        composed.row_key,
        composed.columns,
    ))
}

fn compose_key(spec: &DatasetSpec, row: &SourceRow) -> Result<String> {
    match &spec.row_key {
        RowKeySpec::Single(column) => match row.get(column) {
            Some(value) if !value.is_empty() => Ok(value.to_string()),
            _ => Err(missing(spec, column)),
        },
        RowKeySpec::Composite(components) => {
            let mut values = Vec::with_capacity(components.len());
            for component in components {
                values.push(row.get(component).ok_or_else(|| missing(spec, component))?);
            }
            Ok(join_components(&values))
        }
    }
}

fn missing(spec: &DatasetSpec, column: &str) -> ImportError {
    ImportError::MissingColumn {
        dataset: spec.name.clone(),
        column: column.to_string(),
    }
}

/// Escape each component and join them with [`KEY_SEPARATOR`].
pub fn join_components<S: AsRef<str>>(components: &[S]) -> String {
    let capacity = components.iter().map(|c| c.as_ref().len() + 1).sum();
    let mut key = String::with_capacity(capacity);
    for (i, component) in components.iter().enumerate() {
        if i > 0 {
            key.push(KEY_SEPARATOR);
        }
        for ch in component.as_ref().chars() {
            if ch == KEY_SEPARATOR || ch == KEY_ESCAPE {
                key.push(KEY_ESCAPE);
            }
            key.push(ch);
        }
    }
    key
}

/// Split a composite key back into its unescaped components.
pub fn decompose(key: &str) -> Result<Vec<String>> {
    let mut components = Vec::new();
    let mut current = String::new();
    let mut chars = key.chars();

    while let Some(ch) = chars.next() {
        if ch == KEY_ESCAPE {
            match chars.next() {
                Some(escaped) => current.push(escaped),
                None => {
                    return Err(ImportError::MalformedRowKey {
                        key: key.to_string(),
                        reason: "dangling escape at end of key".to_string(),
                    })
                }
            }
        } else if ch == KEY_SEPARATOR {
            components.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }
    components.push(current);

    Ok(components)
}

/// Smallest key prefix shared by every composite key whose leading
/// components equal `leading`. Used for prefix scans such as "all ratings of
/// user 7".
pub fn scan_prefix<S: AsRef<str>>(leading: &[S]) -> String {
    let mut prefix = join_components(leading);
    if !leading.is_empty() {
        prefix.push(KEY_SEPARATOR);
    }
    prefix
}
