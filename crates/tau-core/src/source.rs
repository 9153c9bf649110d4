//! Event sources: flat column tables read cluster by cluster.
//!
//! A source exposes named `Float64` columns split into clusters (Parquet row
//! groups, or fixed-size chunks for in-memory tables). The dataframe engine
//! schedules one task per cluster.
//!
//! # Parquet key-value metadata
//!
//! | Key              | Value                                               |
//! |------------------|-----------------------------------------------------|
//! | `taufw.sumw`     | Sum of generator weights before any skim (decimal)  |
//! | `taufw.nevents`  | Number of generated events before any skim          |
//!
//! Both keys are optional. Samples fall back to the row count when
//! `taufw.sumw` is absent.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, AsArray, Float64Array};
use arrow::datatypes::{DataType, Field, Float64Type, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::error::{Error, Result};

/// Parquet metadata key for the pre-skim sum of weights.
pub const META_KEY_SUMW: &str = "taufw.sumw";

/// Parquet metadata key for the pre-skim event count.
pub const META_KEY_NEVENTS: &str = "taufw.nevents";

/// Default number of rows per cluster for in-memory sources and writers.
pub const DEFAULT_CLUSTER_SIZE: usize = 65_536;

/// Pre-skim bookkeeping stored alongside the events.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bookkeeping {
    /// Sum of generator weights.
    pub sumw: Option<f64>,
    /// Number of generated events.
    pub nevents: Option<f64>,
}

/// A table of events readable in independent clusters.
pub trait EventSource: Send + Sync + fmt::Debug {
    /// Human-readable name (file path or label).
    fn name(&self) -> &str;

    /// Available column names.
    fn branches(&self) -> Vec<String>;

    /// Whether a column exists.
    fn has_branch(&self, name: &str) -> bool {
        self.branches().iter().any(|b| b == name)
    }

    /// Number of clusters.
    fn n_clusters(&self) -> usize;

    /// Total number of rows.
    fn n_entries(&self) -> u64;

    /// Pre-skim bookkeeping, if recorded.
    fn bookkeeping(&self) -> Bookkeeping {
        Bookkeeping::default()
    }

    /// Read the requested columns of one cluster.
    fn read_cluster(&self, idx: usize, columns: &[String]) -> Result<HashMap<String, Vec<f64>>>;
}

// ── In-memory source ────────────────────────────────────────────

/// Column table held in memory. Used for tests and embedded inputs.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    columns: HashMap<String, Arc<Vec<f64>>>,
    n_rows: usize,
    cluster_size: usize,
    bookkeeping: Bookkeeping,
}

impl MemorySource {
    /// Create a source. All columns must have equal length.
    pub fn new(name: impl Into<String>, columns: Vec<(String, Vec<f64>)>) -> Result<Self> {
        let name = name.into();
        let n_rows = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut map = HashMap::with_capacity(columns.len());
        for (col, values) in columns {
            if values.len() != n_rows {
                return Err(Error::Config(format!(
                    "column '{col}' of '{name}' has {} rows, expected {n_rows}",
                    values.len()
                )));
            }
            map.insert(col, Arc::new(values));
        }
        Ok(Self {
            name,
            columns: map,
            n_rows,
            cluster_size: DEFAULT_CLUSTER_SIZE,
            bookkeeping: Bookkeeping::default(),
        })
    }

    /// Override the rows per cluster (min 1).
    pub fn with_cluster_size(mut self, n: usize) -> Self {
        self.cluster_size = n.max(1);
        self
    }

    /// Attach bookkeeping metadata.
    pub fn with_bookkeeping(mut self, bookkeeping: Bookkeeping) -> Self {
        self.bookkeeping = bookkeeping;
        self
    }
}

impl EventSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn branches(&self) -> Vec<String> {
        let mut b: Vec<String> = self.columns.keys().cloned().collect();
        b.sort();
        b
    }

    fn has_branch(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    fn n_clusters(&self) -> usize {
        self.n_rows.div_ceil(self.cluster_size)
    }

    fn n_entries(&self) -> u64 {
        self.n_rows as u64
    }

    fn bookkeeping(&self) -> Bookkeeping {
        self.bookkeeping
    }

    fn read_cluster(&self, idx: usize, columns: &[String]) -> Result<HashMap<String, Vec<f64>>> {
        let lo = idx * self.cluster_size;
        let hi = (lo + self.cluster_size).min(self.n_rows);
        if lo >= hi && self.n_rows > 0 {
            return Err(Error::Engine(format!("cluster {idx} out of range for '{}'", self.name)));
        }
        columns
            .iter()
            .map(|c| {
                let col = self.columns.get(c).ok_or_else(|| Error::BranchMissing {
                    branch: c.clone(),
                    source_name: self.name.clone(),
                })?;
                Ok((c.clone(), col[lo..hi].to_vec()))
            })
            .collect()
    }
}

// ── Parquet source ──────────────────────────────────────────────

/// Parquet file read one row group at a time.
#[derive(Debug, Clone)]
pub struct ParquetSource {
    path: PathBuf,
    name: String,
    branches: Vec<String>,
    n_row_groups: usize,
    n_rows: u64,
    bookkeeping: Bookkeeping,
}

impl ParquetSource {
    /// Open a file and read its footer. Remote URLs are not supported.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path.display().to_string();
        if name.contains("://") {
            return Err(Error::FileUnavailable {
                path: name,
                reason: "remote access protocols are not supported".into(),
            });
        }
        let file = std::fs::File::open(path)
            .map_err(|e| Error::FileUnavailable { path: name.clone(), reason: e.to_string() })?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| Error::FileUnavailable { path: name.clone(), reason: e.to_string() })?;

        let schema = builder.schema().clone();
        let branches = schema.fields().iter().map(|f| f.name().clone()).collect();
        let meta = builder.metadata();
        let n_row_groups = meta.num_row_groups();
        let n_rows = meta.file_metadata().num_rows().max(0) as u64;
        let bookkeeping = bookkeeping_from_metadata(schema.metadata(), &name)?;

        log::debug!("opened '{name}': {n_rows} rows in {n_row_groups} row groups");
        Ok(Self { path: path.to_path_buf(), name, branches, n_row_groups, n_rows, bookkeeping })
    }

    /// Path on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn bookkeeping_from_metadata(meta: &HashMap<String, String>, name: &str) -> Result<Bookkeeping> {
    let parse = |key: &str| -> Result<Option<f64>> {
        meta.get(key)
            .map(|v| {
                v.trim().parse::<f64>().map_err(|e| {
                    Error::Parquet(format!("invalid {key} metadata in '{name}': {v:?} ({e})"))
                })
            })
            .transpose()
    };
    Ok(Bookkeeping { sumw: parse(META_KEY_SUMW)?, nevents: parse(META_KEY_NEVENTS)? })
}

impl EventSource for ParquetSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn branches(&self) -> Vec<String> {
        self.branches.clone()
    }

    fn n_clusters(&self) -> usize {
        self.n_row_groups
    }

    fn n_entries(&self) -> u64 {
        self.n_rows
    }

    fn bookkeeping(&self) -> Bookkeeping {
        self.bookkeeping
    }

    fn read_cluster(&self, idx: usize, columns: &[String]) -> Result<HashMap<String, Vec<f64>>> {
        let file = std::fs::File::open(&self.path).map_err(|e| Error::FileUnavailable {
            path: self.name.clone(),
            reason: e.to_string(),
        })?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| Error::Parquet(format!("failed to read '{}': {e}", self.name)))?;

        let schema = builder.schema().clone();
        let mut indices = Vec::with_capacity(columns.len());
        for c in columns {
            let i = schema.index_of(c).map_err(|_| Error::BranchMissing {
                branch: c.clone(),
                source_name: self.name.clone(),
            })?;
            indices.push(i);
        }
        let mask = ProjectionMask::roots(builder.parquet_schema(), indices);
        let reader = builder
            .with_row_groups(vec![idx])
            .with_projection(mask)
            .build()
            .map_err(|e| Error::Parquet(format!("failed to build reader for '{}': {e}", self.name)))?;

        let mut out: HashMap<String, Vec<f64>> =
            columns.iter().map(|c| (c.clone(), Vec::new())).collect();
        for batch in reader {
            let batch = batch.map_err(|e| {
                Error::Parquet(format!("failed to read row group {idx} of '{}': {e}", self.name))
            })?;
            for c in columns {
                let i = batch.schema().index_of(c).map_err(|_| Error::BranchMissing {
                    branch: c.clone(),
                    source_name: self.name.clone(),
                })?;
                let values = column_as_f64(batch.column(i).as_ref(), c)?;
                if let Some(dst) = out.get_mut(c) {
                    dst.extend(values);
                }
            }
        }
        Ok(out)
    }
}

/// Cast any numeric or boolean column to `f64`. Nulls become NaN.
fn column_as_f64(arr: &dyn Array, name: &str) -> Result<Vec<f64>> {
    let casted = arrow::compute::cast(arr, &DataType::Float64).map_err(|e| {
        Error::Parquet(format!("column '{name}' of type {:?} is not numeric: {e}", arr.data_type()))
    })?;
    let f64_arr = casted.as_primitive::<Float64Type>();
    if f64_arr.null_count() == 0 {
        return Ok(f64_arr.values().to_vec());
    }
    Ok(f64_arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

/// Write `Float64` columns to a Parquet file with bookkeeping metadata.
pub fn write_parquet(
    path: &Path,
    columns: &[(String, Vec<f64>)],
    bookkeeping: Bookkeeping,
    row_group_size: usize,
) -> Result<()> {
    let mut metadata = HashMap::new();
    if let Some(s) = bookkeeping.sumw {
        metadata.insert(META_KEY_SUMW.to_string(), s.to_string());
    }
    if let Some(n) = bookkeeping.nevents {
        metadata.insert(META_KEY_NEVENTS.to_string(), n.to_string());
    }

    let fields: Vec<Field> =
        columns.iter().map(|(n, _)| Field::new(n, DataType::Float64, false)).collect();
    let schema = Arc::new(Schema::new(fields).with_metadata(metadata));
    let arrays: Vec<Arc<dyn Array>> = columns
        .iter()
        .map(|(_, v)| Arc::new(Float64Array::from(v.clone())) as Arc<dyn Array>)
        .collect();
    let batch = RecordBatch::try_new(schema, arrays)
        .map_err(|e| Error::Parquet(format!("failed to build RecordBatch: {e}")))?;

    let file = std::fs::File::create(path)?;
    let props = parquet::file::properties::WriterProperties::builder()
        .set_compression(parquet::basic::Compression::SNAPPY)
        .set_max_row_group_size(row_group_size.max(1))
        .build();
    let mut writer = parquet::arrow::ArrowWriter::try_new(file, batch.schema(), Some(props))
        .map_err(|e| Error::Parquet(format!("failed to create Parquet writer: {e}")))?;
    writer.write(&batch).map_err(|e| Error::Parquet(format!("failed to write Parquet: {e}")))?;
    writer.close().map_err(|e| Error::Parquet(format!("failed to close Parquet writer: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_source_clusters() {
        let src = MemorySource::new("mem", vec![("x".into(), (0..10).map(f64::from).collect())])
            .unwrap()
            .with_cluster_size(4);
        assert_eq!(src.n_clusters(), 3);
        assert_eq!(src.n_entries(), 10);
        let last = src.read_cluster(2, &["x".into()]).unwrap();
        assert_eq!(last["x"], vec![8.0, 9.0]);
    }

    #[test]
    fn memory_source_missing_branch() {
        let src = MemorySource::new("mem", vec![("x".into(), vec![1.0])]).unwrap();
        let err = src.read_cluster(0, &["y".into()]).unwrap_err();
        assert!(matches!(err, Error::BranchMissing { ref branch, .. } if branch == "y"));
    }

    #[test]
    fn memory_source_rejects_ragged_columns() {
        let err = MemorySource::new("mem", vec![("x".into(), vec![1.0]), ("y".into(), vec![])]);
        assert!(err.is_err());
    }

    #[test]
    fn remote_url_is_unavailable() {
        let err = ParquetSource::open("root://eosuser.cern.ch//store/DY.root").unwrap_err();
        assert!(matches!(err, Error::FileUnavailable { .. }));
    }

    #[test]
    fn missing_file_is_unavailable() {
        let err = ParquetSource::open("/nonexistent/taufw/DY.parquet").unwrap_err();
        assert!(matches!(err, Error::FileUnavailable { .. }));
    }

    #[test]
    fn parquet_round_trip_with_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("DY.parquet");
        let x: Vec<f64> = (0..25).map(f64::from).collect();
        let w = vec![0.5; 25];
        let bk = Bookkeeping { sumw: Some(1234.5), nevents: Some(2000.0) };
        write_parquet(&path, &[("x".into(), x), ("genweight".into(), w)], bk, 10).unwrap();

        let src = ParquetSource::open(&path).unwrap();
        assert_eq!(src.n_entries(), 25);
        assert_eq!(src.n_clusters(), 3);
        assert_eq!(src.bookkeeping(), bk);
        assert!(src.has_branch("genweight"));

        let c = src.read_cluster(1, &["x".into()]).unwrap();
        assert_eq!(c["x"].len(), 10);
        assert_eq!(c["x"][0], 10.0);
        assert!(!c.contains_key("genweight"));
    }
}
