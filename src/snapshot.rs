//! Columnar snapshot I/O.
//!
//! Snapshots are parquet files read schema-on-read into a [`Table`] of dynamic
//! [`Value`]s. Each stage maps the table into typed records (see `models`) at
//! its boundary, so nothing downstream works with column names directly.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::{Duration, NaiveDate};
use parquet::data_type::{BoolType, ByteArray, ByteArrayType, DoubleType, Int64Type};
use parquet::file::properties::WriterProperties;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::file::writer::SerializedFileWriter;
use parquet::record::Field;
use parquet::schema::parser::parse_message_type;

use crate::error::EtlError;

static NULL: Value = Value::Null;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view of the value. Floats truncate toward zero; strings are parsed.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Int(v) => Some(*v),
            Value::Float(v) => float_to_i64(*v),
            Value::Str(s) => {
                let trimmed = s.trim();
                trimmed
                    .parse::<i64>()
                    .ok()
                    .or_else(|| trimmed.parse::<f64>().ok().and_then(float_to_i64))
            }
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => v.is_finite().then_some(*v),
            Value::Str(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        }
    }

    /// Text view of the value; `None` for null and for blank strings.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Str(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            other => Some(other.to_string()),
        }
    }

    /// Truthy flag: any non-zero number, `true`, or a numeric string other than 0.
    pub fn is_set(&self) -> bool {
        self.as_i64().is_some_and(|v| v != 0)
    }

    fn from_field(field: &Field) -> Self {
        match field {
            Field::Null => Value::Null,
            Field::Bool(b) => Value::Bool(*b),
            Field::Byte(v) => Value::Int(i64::from(*v)),
            Field::Short(v) => Value::Int(i64::from(*v)),
            Field::Int(v) => Value::Int(i64::from(*v)),
            Field::Long(v) => Value::Int(*v),
            Field::UByte(v) => Value::Int(i64::from(*v)),
            Field::UShort(v) => Value::Int(i64::from(*v)),
            Field::UInt(v) => Value::Int(i64::from(*v)),
            Field::ULong(v) => i64::try_from(*v)
                .map(Value::Int)
                .unwrap_or(Value::Float(*v as f64)),
            Field::Float(v) => Value::Float(f64::from(*v)),
            Field::Double(v) => Value::Float(*v),
            Field::Str(s) => Value::Str(s.clone()),
            Field::Date(days) => epoch_days_to_string(*days)
                .map(Value::Str)
                .unwrap_or(Value::Null),
            other => Value::Str(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => {
                if v.fract() == 0.0 && v.abs() < 1e15 {
                    write!(f, "{}", *v as i64)
                } else {
                    write!(f, "{v}")
                }
            }
            Value::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

fn float_to_i64(v: f64) -> Option<i64> {
    if !v.is_finite() || v.abs() >= 9.0e18 {
        return None;
    }
    Some(v.trunc() as i64)
}

fn epoch_days_to_string(days: i32) -> Option<String> {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
    let date = epoch.checked_add_signed(Duration::days(i64::from(days)))?;
    Some(date.format("%Y-%m-%d").to_string())
}

/// In-memory columnar snapshot, stored row-major.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let index = columns
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), idx))
            .collect();
        Self {
            columns,
            index,
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Appends a row; short rows are padded with nulls, long rows are truncated.
    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    /// Cell lookup by column name. Absent columns read as null.
    pub fn value(&self, row: usize, column: &str) -> &Value {
        match (self.rows.get(row), self.index.get(column)) {
            (Some(values), Some(idx)) => &values[*idx],
            _ => &NULL,
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = RowRef<'_>> {
        (0..self.rows.len()).map(move |idx| RowRef { table: self, idx })
    }

    fn column_values(&self, idx: usize) -> impl Iterator<Item = &Value> {
        self.rows.iter().map(move |row| &row[idx])
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RowRef<'a> {
    table: &'a Table,
    idx: usize,
}

impl<'a> RowRef<'a> {
    pub fn get(&self, column: &str) -> &'a Value {
        self.table.value(self.idx, column)
    }

    pub fn text(&self, column: &str) -> Option<String> {
        self.get(column).as_text()
    }

    pub fn int(&self, column: &str) -> i64 {
        self.get(column).as_i64().unwrap_or(0)
    }

    pub fn flag(&self, column: &str) -> bool {
        self.get(column).is_set()
    }
}

/// Which snapshot a path refers to. Raw kinds are keyed by season.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    PlayByPlay,
    Rosters,
    Injuries,
    DimPlayers,
    FactPlayerGame,
    FactPlayerInjury,
}

impl SnapshotKind {
    pub fn label(self) -> &'static str {
        match self {
            SnapshotKind::PlayByPlay => "play-by-play",
            SnapshotKind::Rosters => "rosters",
            SnapshotKind::Injuries => "injuries",
            SnapshotKind::DimPlayers => "dim_players",
            SnapshotKind::FactPlayerGame => "fact_player_game",
            SnapshotKind::FactPlayerInjury => "fact_player_injury",
        }
    }

    pub fn is_raw(self) -> bool {
        matches!(
            self,
            SnapshotKind::PlayByPlay | SnapshotKind::Rosters | SnapshotKind::Injuries
        )
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    pub raw_dir: PathBuf,
    pub transformed_dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(raw_dir: impl Into<PathBuf>, transformed_dir: impl Into<PathBuf>) -> Self {
        Self {
            raw_dir: raw_dir.into(),
            transformed_dir: transformed_dir.into(),
        }
    }

    pub fn path(&self, kind: SnapshotKind, season: i32) -> PathBuf {
        match kind {
            SnapshotKind::PlayByPlay => self.raw_dir.join(format!("pbp_{season}.parquet")),
            SnapshotKind::Rosters => self.raw_dir.join(format!("rosters_{season}.parquet")),
            SnapshotKind::Injuries => self.raw_dir.join(format!("injuries_{season}.parquet")),
            SnapshotKind::DimPlayers => self.transformed_dir.join("dim_players.parquet"),
            SnapshotKind::FactPlayerGame => self.transformed_dir.join("fact_player_game.parquet"),
            SnapshotKind::FactPlayerInjury => {
                self.transformed_dir.join("fact_player_injury.parquet")
            }
        }
    }

    /// Fails with [`EtlError::MissingInput`] when the snapshot file does not exist.
    pub fn ensure(&self, kind: SnapshotKind, season: i32) -> Result<PathBuf, EtlError> {
        let path = self.path(kind, season);
        if path.is_file() {
            Ok(path)
        } else {
            Err(EtlError::MissingInput { path })
        }
    }

    pub fn read(&self, kind: SnapshotKind, season: i32) -> Result<Table, EtlError> {
        let path = self.ensure(kind, season)?;
        log::debug!("reading {} snapshot from {}", kind.label(), path.display());
        read_snapshot(&path).map_err(EtlError::Snapshot)
    }

    pub fn write(&self, kind: SnapshotKind, season: i32, table: &Table) -> Result<PathBuf, EtlError> {
        let path = self.path(kind, season);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create snapshot dir {}", parent.display()))
                .map_err(EtlError::Snapshot)?;
        }
        write_snapshot(&path, table).map_err(EtlError::Snapshot)?;
        log::info!(
            "saved {} snapshot ({} rows) to {}",
            kind.label(),
            table.len(),
            path.display()
        );
        Ok(path)
    }
}

pub fn read_snapshot(path: &Path) -> Result<Table> {
    let file = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader = SerializedFileReader::new(file)
        .with_context(|| format!("open parquet reader {}", path.display()))?;
    let columns = reader
        .metadata()
        .file_metadata()
        .schema_descr()
        .root_schema()
        .get_fields()
        .iter()
        .map(|field| field.name().to_string())
        .collect::<Vec<_>>();

    let mut table = Table::new(columns);
    let iter = reader
        .get_row_iter(None)
        .with_context(|| format!("iterate rows of {}", path.display()))?;
    for row in iter {
        let row = row.with_context(|| format!("decode row of {}", path.display()))?;
        let mut values = vec![Value::Null; table.columns.len()];
        for (name, field) in row.get_column_iter() {
            if let Some(idx) = table.index.get(name.as_str()) {
                values[*idx] = Value::from_field(field);
            }
        }
        table.rows.push(values);
    }
    Ok(table)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Bool,
    Int,
    Float,
    Text,
}

impl ColumnKind {
    fn infer<'a>(values: impl Iterator<Item = &'a Value>) -> Self {
        let mut kind: Option<ColumnKind> = None;
        for value in values {
            let next = match value {
                Value::Null => continue,
                Value::Bool(_) => ColumnKind::Bool,
                Value::Int(_) => ColumnKind::Int,
                Value::Float(_) => ColumnKind::Float,
                Value::Str(_) => return ColumnKind::Text,
            };
            kind = Some(match (kind, next) {
                (None, k) => k,
                (Some(a), b) if a == b => a,
                (Some(ColumnKind::Int), ColumnKind::Float)
                | (Some(ColumnKind::Float), ColumnKind::Int) => ColumnKind::Float,
                _ => return ColumnKind::Text,
            });
        }
        kind.unwrap_or(ColumnKind::Text)
    }

    fn physical(self) -> &'static str {
        match self {
            ColumnKind::Bool => "BOOLEAN",
            ColumnKind::Int => "INT64",
            ColumnKind::Float => "DOUBLE",
            ColumnKind::Text => "BYTE_ARRAY",
        }
    }
}

pub fn write_snapshot(path: &Path, table: &Table) -> Result<()> {
    let kinds = (0..table.columns.len())
        .map(|idx| ColumnKind::infer(table.column_values(idx)))
        .collect::<Vec<_>>();

    let mut message = String::from("message snapshot {\n");
    for (name, kind) in table.columns.iter().zip(&kinds) {
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(anyhow!("column name {name:?} is not a plain identifier"));
        }
        let annotation = if *kind == ColumnKind::Text { " (UTF8)" } else { "" };
        message.push_str(&format!("  OPTIONAL {} {name}{annotation};\n", kind.physical()));
    }
    message.push('}');

    let schema = Arc::new(parse_message_type(&message).context("build parquet schema")?);
    let props = Arc::new(WriterProperties::builder().build());
    let file = fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut writer =
        SerializedFileWriter::new(file, schema, props).context("open parquet writer")?;

    if !table.is_empty() {
        let mut group = writer.next_row_group().context("start row group")?;
        let mut idx = 0usize;
        while let Some(mut column) = group.next_column().context("next column writer")? {
            let values = table.column_values(idx).collect::<Vec<_>>();
            let defs = values
                .iter()
                .map(|v| i16::from(!v.is_null()))
                .collect::<Vec<_>>();
            match kinds[idx] {
                ColumnKind::Bool => {
                    let data = values
                        .iter()
                        .filter_map(|v| match v {
                            Value::Bool(b) => Some(*b),
                            _ => None,
                        })
                        .collect::<Vec<_>>();
                    column
                        .typed::<BoolType>()
                        .write_batch(&data, Some(&defs[..]), None)?;
                }
                ColumnKind::Int => {
                    let data = values.iter().filter_map(|v| v.as_i64()).collect::<Vec<_>>();
                    column
                        .typed::<Int64Type>()
                        .write_batch(&data, Some(&defs[..]), None)?;
                }
                ColumnKind::Float => {
                    let data = values
                        .iter()
                        .filter(|v| !v.is_null())
                        .map(|v| v.as_f64().unwrap_or(f64::NAN))
                        .collect::<Vec<_>>();
                    column
                        .typed::<DoubleType>()
                        .write_batch(&data, Some(&defs[..]), None)?;
                }
                ColumnKind::Text => {
                    let data = values
                        .iter()
                        .filter(|v| !v.is_null())
                        .map(|v| ByteArray::from(v.to_string().as_str()))
                        .collect::<Vec<_>>();
                    column
                        .typed::<ByteArrayType>()
                        .write_batch(&data, Some(&defs[..]), None)?;
                }
            }
            column
                .close()
                .with_context(|| format!("close column {}", table.columns[idx]))?;
            idx += 1;
        }
        group.close().context("close row group")?;
    }
    writer.close().context("finish parquet file")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        let mut table = Table::new(["game_id", "yards", "epa", "flag"]);
        table.push_row(vec!["G1".into(), Value::Int(12), Value::Float(0.5), Value::Bool(true)]);
        table.push_row(vec!["G2".into(), Value::Null, Value::Int(1), Value::Null]);
        table
    }

    #[test]
    fn value_coercions() {
        assert_eq!(Value::from("17.0").as_i64(), Some(17));
        assert_eq!(Value::Float(3.9).as_i64(), Some(3));
        assert_eq!(Value::from("abc").as_i64(), None);
        assert_eq!(Value::Float(17.0).to_string(), "17");
        assert_eq!(Value::from("  ").as_text(), None);
        assert!(Value::Bool(true).is_set());
        assert!(!Value::Int(0).is_set());
    }

    #[test]
    fn absent_column_reads_null() {
        let table = sample();
        assert!(table.value(0, "missing").is_null());
        assert!(table.value(9, "game_id").is_null());
        let row = table.rows().next().expect("first row");
        assert_eq!(row.int("yards"), 12);
        assert_eq!(row.int("missing"), 0);
    }

    #[test]
    fn column_kind_widens_int_to_float() {
        let table = sample();
        assert_eq!(ColumnKind::infer(table.column_values(1)), ColumnKind::Int);
        assert_eq!(ColumnKind::infer(table.column_values(2)), ColumnKind::Float);
        assert_eq!(ColumnKind::infer(table.column_values(0)), ColumnKind::Text);
    }

    #[test]
    fn parquet_file_preserves_nulls_and_columns() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sample.parquet");
        write_snapshot(&path, &sample()).expect("write");
        let back = read_snapshot(&path).expect("read");
        assert_eq!(back.columns(), sample().columns());
        assert_eq!(back.len(), 2);
        assert_eq!(back.value(0, "game_id"), &Value::from("G1"));
        assert!(back.value(1, "yards").is_null());
        assert_eq!(back.value(1, "epa"), &Value::Float(1.0));
        assert_eq!(back.value(0, "flag"), &Value::Bool(true));
    }

    #[test]
    fn empty_table_keeps_schema() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("empty.parquet");
        write_snapshot(&path, &Table::new(["player_id", "week"])).expect("write");
        let back = read_snapshot(&path).expect("read");
        assert!(back.is_empty());
        assert!(back.has_column("week"));
    }

    #[test]
    fn store_reports_missing_input() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::new(dir.path().join("raw"), dir.path().join("out"));
        let err = store.read(SnapshotKind::DimPlayers, 2025).unwrap_err();
        assert!(matches!(err, EtlError::MissingInput { .. }));
        assert_eq!(
            store.path(SnapshotKind::PlayByPlay, 2025),
            dir.path().join("raw").join("pbp_2025.parquet")
        );
    }
}
