//! Item store: whole-item get/put keyed by identifier.
//!
//! Layout: `{root}/item={HASH}/data-{version}.parquet` plus `meta.json`.
//!
//! - `HASH` is a BLAKE3 prefix of the identifier, so fund names with spaces
//!   and accents map to safe directory names. The identifier itself lives in
//!   the sidecar.
//! - Every write goes to a fresh versioned data file. Renaming the new
//!   `meta.json` into place is the commit point; readers see either the old
//!   item or the new one, never a mix.
//! - The previous data file is removed after the commit.

use super::provider::DataError;
use crate::domain::{Identifier, Metadata, Row, Series, StoredItem};
use chrono::{DateTime, NaiveDate, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Whole-item persistence.
pub trait ItemStore: Send + Sync {
    fn get(&self, identifier: &Identifier) -> Result<Option<StoredItem>, DataError>;

    /// Replace the whole item. With `overwrite == false` an existing item is
    /// an `AlreadyExists` error.
    fn put(&self, item: StoredItem, overwrite: bool) -> Result<(), DataError>;

    fn list_keys(&self) -> Result<BTreeSet<Identifier>, DataError>;

    fn contains(&self, identifier: &Identifier) -> Result<bool, DataError> {
        Ok(self.get(identifier)?.is_some())
    }
}

/// Sidecar describing the committed version of an item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemMeta {
    pub identifier: Identifier,
    pub metadata: Metadata,
    pub columns: Vec<String>,
    pub version: u64,
    pub data_file: String,
    pub row_count: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub data_hash: String,
    pub written_at: DateTime<Utc>,
}

/// Reserved name of the date column inside data files.
const DATE_FIELD: &str = "__date";

/// Parquet-backed item store.
pub struct ParquetStore {
    root: PathBuf,
}

impl ParquetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn item_dir(&self, identifier: &Identifier) -> PathBuf {
        let hash = blake3::hash(identifier.as_str().as_bytes()).to_hex();
        self.root.join(format!("item={}", &hash[..16]))
    }

    fn meta_path(dir: &Path) -> PathBuf {
        dir.join("meta.json")
    }

    /// Committed sidecar for `identifier`, if any.
    pub fn get_meta(&self, identifier: &Identifier) -> Result<Option<ItemMeta>, DataError> {
        let path = Self::meta_path(&self.item_dir(identifier));
        if !path.exists() {
            return Ok(None);
        }
        let meta = read_meta(&path)?;
        if meta.identifier != *identifier {
            return Err(DataError::Storage(format!(
                "{} holds '{}', not '{identifier}'",
                path.display(),
                meta.identifier
            )));
        }
        Ok(Some(meta))
    }
}

impl ItemStore for ParquetStore {
    fn get(&self, identifier: &Identifier) -> Result<Option<StoredItem>, DataError> {
        let Some(meta) = self.get_meta(identifier)? else {
            return Ok(None);
        };

        let path = self.item_dir(identifier).join(&meta.data_file);
        let rows = read_rows(&path, &meta.columns)?;
        if rows.len() != meta.row_count {
            return Err(DataError::Storage(format!(
                "{}: expected {} rows, found {}",
                path.display(),
                meta.row_count,
                rows.len()
            )));
        }

        let series = Series::new(meta.columns, rows)?;
        StoredItem::new(meta.identifier, series, meta.metadata).map(Some)
    }

    fn put(&self, item: StoredItem, overwrite: bool) -> Result<(), DataError> {
        let previous = self.get_meta(item.identifier())?;
        if previous.is_some() && !overwrite {
            return Err(DataError::AlreadyExists {
                identifier: item.identifier().to_string(),
            });
        }

        let dir = self.item_dir(item.identifier());
        fs::create_dir_all(&dir)
            .map_err(|e| DataError::Storage(format!("failed to create dir: {e}")))?;

        let version = previous.as_ref().map_or(1, |m| m.version + 1);
        let data_file = format!("data-{version}.parquet");
        let data_path = dir.join(&data_file);

        let mut df = series_to_dataframe(item.series())?;
        let tmp_path = data_path.with_extension("parquet.tmp");
        write_parquet(&mut df, &tmp_path)?;
        rename(&tmp_path, &data_path)?;

        let (identifier, series, metadata) = item.into_parts();
        let meta = ItemMeta {
            data_hash: hash_series(&series)?,
            row_count: series.len(),
            first_date: series.first_date(),
            last_date: series.last_date(),
            columns: series.columns().to_vec(),
            identifier,
            metadata,
            version,
            data_file,
            written_at: Utc::now(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| DataError::Storage(format!("meta serialization: {e}")))?;
        let meta_path = Self::meta_path(&dir);
        let meta_tmp = meta_path.with_extension("json.tmp");
        fs::write(&meta_tmp, meta_json)
            .map_err(|e| DataError::Storage(format!("meta write: {e}")))?;
        rename(&meta_tmp, &meta_path)?;

        if let Some(old) = previous {
            if old.data_file != meta.data_file {
                if let Err(e) = fs::remove_file(dir.join(&old.data_file)) {
                    tracing::warn!(
                        identifier = %meta.identifier,
                        file = %old.data_file,
                        error = %e,
                        "failed to remove superseded data file"
                    );
                }
            }
        }

        tracing::debug!(
            identifier = %meta.identifier,
            version,
            rows = meta.row_count,
            "stored item"
        );
        Ok(())
    }

    fn list_keys(&self) -> Result<BTreeSet<Identifier>, DataError> {
        let mut keys = BTreeSet::new();
        if !self.root.exists() {
            return Ok(keys);
        }

        let entries =
            fs::read_dir(&self.root).map_err(|e| DataError::Storage(format!("read dir: {e}")))?;
        for entry in entries {
            let dir = entry
                .map_err(|e| DataError::Storage(format!("dir entry: {e}")))?
                .path();
            let is_item = dir
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("item="));
            let meta_path = Self::meta_path(&dir);
            if !is_item || !meta_path.exists() {
                continue;
            }
            match read_meta(&meta_path) {
                Ok(meta) => {
                    keys.insert(meta.identifier);
                }
                Err(e) => {
                    tracing::warn!(path = %meta_path.display(), error = %e, "skipping unreadable item");
                }
            }
        }
        Ok(keys)
    }

    fn contains(&self, identifier: &Identifier) -> Result<bool, DataError> {
        Ok(self.get_meta(identifier)?.is_some())
    }
}

/// In-process store.
#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<BTreeMap<Identifier, StoredItem>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ItemStore for MemoryStore {
    fn get(&self, identifier: &Identifier) -> Result<Option<StoredItem>, DataError> {
        let items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(items.get(identifier).cloned())
    }

    fn put(&self, item: StoredItem, overwrite: bool) -> Result<(), DataError> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        if !overwrite && items.contains_key(item.identifier()) {
            return Err(DataError::AlreadyExists {
                identifier: item.identifier().to_string(),
            });
        }
        items.insert(item.identifier().clone(), item);
        Ok(())
    }

    fn list_keys(&self) -> Result<BTreeSet<Identifier>, DataError> {
        let items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(items.keys().cloned().collect())
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn rename(from: &Path, to: &Path) -> Result<(), DataError> {
    fs::rename(from, to).map_err(|e| {
        let _ = fs::remove_file(from);
        DataError::Storage(format!("atomic rename failed: {e}"))
    })
}

fn read_meta(path: &Path) -> Result<ItemMeta, DataError> {
    let content = fs::read_to_string(path)
        .map_err(|e| DataError::Storage(format!("read {}: {e}", path.display())))?;
    serde_json::from_str(&content)
        .map_err(|e| DataError::Storage(format!("parse {}: {e}", path.display())))
}

fn hash_series(series: &Series) -> Result<String, DataError> {
    let bytes = serde_json::to_vec(series)
        .map_err(|e| DataError::Storage(format!("hash serialization: {e}")))?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

fn epoch() -> Result<NaiveDate, DataError> {
    NaiveDate::from_ymd_opt(1970, 1, 1).ok_or_else(|| DataError::Parquet("epoch date".into()))
}

fn series_to_dataframe(series: &Series) -> Result<DataFrame, DataError> {
    if series.has_column(DATE_FIELD) {
        return Err(DataError::MalformedRecord(format!(
            "column name '{DATE_FIELD}' is reserved"
        )));
    }

    let epoch = epoch()?;
    let days: Vec<i32> = series
        .dates()
        .map(|d| (d - epoch).num_days() as i32)
        .collect();

    let mut columns = Vec::with_capacity(series.columns().len() + 1);
    columns.push(
        Column::new(DATE_FIELD.into(), days)
            .cast(&DataType::Date)
            .map_err(|e| DataError::Parquet(format!("date cast: {e}")))?,
    );
    for (j, name) in series.columns().iter().enumerate() {
        let values: Vec<f64> = series.rows().iter().map(|r| r.values[j]).collect();
        columns.push(Column::new(name.as_str().into(), values));
    }

    DataFrame::new(columns).map_err(|e| DataError::Parquet(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<(), DataError> {
    let file =
        fs::File::create(path).map_err(|e| DataError::Parquet(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(df)
        .map_err(|e| DataError::Parquet(format!("write parquet: {e}")))?;
    Ok(())
}

fn read_rows(path: &Path, columns: &[String]) -> Result<Vec<Row>, DataError> {
    let file = fs::File::open(path)
        .map_err(|e| DataError::Parquet(format!("open {}: {e}", path.display())))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::Parquet(format!("read {}: {e}", path.display())))?;

    let col_err = |e: PolarsError| DataError::Parquet(format!("column read: {e}"));
    let date_ca = df
        .column(DATE_FIELD)
        .map_err(col_err)?
        .date()
        .map_err(|e| DataError::Parquet(format!("date column type: {e}")))?;

    let mut value_cas = Vec::with_capacity(columns.len());
    for name in columns {
        let ca = df
            .column(name)
            .map_err(col_err)?
            .f64()
            .map_err(|e| DataError::Parquet(format!("'{name}' column type: {e}")))?;
        value_cas.push(ca);
    }

    let epoch = epoch()?;
    let mut rows = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let days = date_ca
            .get(i)
            .ok_or_else(|| DataError::Parquet(format!("null date at row {i}")))?;
        let date = epoch + chrono::Duration::days(days as i64);
        let values = value_cas
            .iter()
            .map(|ca| ca.get(i).unwrap_or(f64::NAN))
            .collect();
        rows.push(Row::new(date, values));
    }
    Ok(rows)
}
