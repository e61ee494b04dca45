//! Columnar table values
//!
//! A [`Table`] is the in-memory form of a loaded dataset: an ordered set of
//! equally long [`Column`]s, each carrying an inferred [`DType`]. Tables are
//! immutable once bound into a namespace.

mod infer;
mod render;
pub mod stats;

use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

pub use render::{render_column, render_table};

/// Fixed overhead charged to every column and table in footprint estimates
const OBJECT_OVERHEAD_BYTES: u64 = 128;

/// Per-cell overhead of a boxed string cell
const STRING_CELL_OVERHEAD_BYTES: u64 = 49;

/// Inferred column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Int64,
    Float64,
    Bool,
    Object,
}

impl DType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DType::Int64 => "int64",
            DType::Float64 => "float64",
            DType::Bool => "bool",
            DType::Object => "object",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DType::Int64 | DType::Float64)
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single table cell
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        match self {
            Cell::Null => true,
            Cell::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) if !f.is_nan() => Some(*f),
            Cell::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Name of the cell's runtime type, as reported by sampling
    pub fn type_name(&self) -> &'static str {
        match self {
            Cell::Null => "NoneType",
            Cell::Bool(_) => "bool",
            Cell::Int(_) => "int",
            Cell::Float(_) => "float",
            Cell::Str(_) => "str",
        }
    }

    /// Hashable identity used for distinct-value scans
    pub fn key(&self) -> CellKey {
        match self {
            Cell::Null => CellKey::Null,
            Cell::Bool(b) => CellKey::Bool(*b),
            Cell::Int(i) => CellKey::Int(*i),
            Cell::Float(f) if f.is_nan() => CellKey::Null,
            Cell::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => CellKey::Int(*f as i64),
            Cell::Float(f) => CellKey::Float(f.to_bits()),
            Cell::Str(s) => CellKey::Str(s.clone()),
        }
    }

    /// Plain display text (no quoting)
    pub fn display(&self) -> String {
        match self {
            Cell::Null => "NaN".to_string(),
            Cell::Bool(true) => "True".to_string(),
            Cell::Bool(false) => "False".to_string(),
            Cell::Int(i) => i.to_string(),
            Cell::Float(f) => format_float(*f),
            Cell::Str(s) => s.clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Cell::Null => serde_json::Value::Null,
            Cell::Bool(b) => serde_json::Value::Bool(*b),
            Cell::Int(i) => serde_json::Value::from(*i),
            Cell::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Cell::Str(s) => serde_json::Value::String(s.clone()),
        }
    }

    fn footprint(&self) -> u64 {
        match self {
            Cell::Str(s) => STRING_CELL_OVERHEAD_BYTES + s.len() as u64,
            _ => 8,
        }
    }
}

/// Hashable projection of a [`Cell`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellKey {
    Null,
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(String),
}

impl Hash for CellKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            CellKey::Null => {}
            CellKey::Bool(b) => b.hash(state),
            CellKey::Int(i) => i.hash(state),
            CellKey::Float(bits) => bits.hash(state),
            CellKey::Str(s) => s.hash(state),
        }
    }
}

/// Format a float the way an interactive prompt shows it (`2.0`, `0.1`, `1e+20`)
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    let abs = f.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        let raw = format!("{:e}", f);
        if let Some((mantissa, exponent)) = raw.split_once('e') {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exponent),
            };
            return format!("{}e{}{:0>2}", mantissa, sign, digits);
        }
        return raw;
    }
    if f.fract() == 0.0 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

/// A named, typed column of cells
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub dtype: DType,
    cells: Vec<Cell>,
}

impl Column {
    /// Build a column, inferring and normalising its dtype from the cells
    pub fn new(name: impl Into<String>, cells: Vec<Cell>) -> Self {
        let (dtype, cells) = infer::normalize(cells);
        Self {
            name: name.into(),
            dtype,
            cells,
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn get(&self, index: usize) -> Option<&Cell> {
        self.cells.get(index)
    }

    pub fn null_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_null()).count()
    }

    pub fn non_null(&self) -> impl Iterator<Item = &Cell> {
        self.cells.iter().filter(|c| !c.is_null())
    }

    /// Non-null numeric values, in row order
    pub fn numbers(&self) -> Vec<f64> {
        self.cells.iter().filter_map(Cell::as_f64).collect()
    }

    /// Distinct non-null values in first-seen order, stopping after `limit`
    pub fn distinct(&self, limit: usize) -> Vec<(usize, &Cell)> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (idx, cell) in self.cells.iter().enumerate() {
            if out.len() >= limit {
                break;
            }
            if cell.is_null() {
                continue;
            }
            if seen.insert(cell.key()) {
                out.push((idx, cell));
            }
        }
        out
    }

    pub fn unique_count(&self) -> usize {
        self.non_null().map(Cell::key).collect::<HashSet<_>>().len()
    }

    pub fn footprint_bytes(&self) -> u64 {
        let cells: u64 = match self.dtype {
            DType::Object => self.cells.iter().map(Cell::footprint).sum(),
            DType::Bool => self.cells.len() as u64,
            _ => self.cells.len() as u64 * 8,
        };
        OBJECT_OVERHEAD_BYTES + cells
    }
}

/// An ordered collection of equally long columns with an implicit range index
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<Column>,
    nrows: usize,
}

impl Table {
    /// Build a table; all columns must have the same length
    pub fn new(columns: Vec<Column>) -> Result<Self, String> {
        let nrows = columns.first().map(Column::len).unwrap_or(0);
        if let Some(bad) = columns.iter().find(|c| c.len() != nrows) {
            return Err(format!(
                "column '{}' has {} rows, expected {}",
                bad.name,
                bad.len(),
                nrows
            ));
        }
        Ok(Self { columns, nrows })
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn footprint_bytes(&self) -> u64 {
        OBJECT_OVERHEAD_BYTES + self.columns.iter().map(Column::footprint_bytes).sum::<u64>()
    }

    /// Row-oriented view: one `(column, cell)` list per row
    pub fn row(&self, index: usize) -> Vec<(&str, &Cell)> {
        self.columns
            .iter()
            .filter_map(|c| c.get(index).map(|cell| (c.name.as_str(), cell)))
            .collect()
    }

    /// Rows as JSON objects, keyed by column name
    pub fn records(&self, indices: &[usize]) -> Vec<serde_json::Map<String, serde_json::Value>> {
        indices
            .iter()
            .filter(|&&i| i < self.nrows)
            .map(|&i| {
                self.row(i)
                    .into_iter()
                    .map(|(name, cell)| (name.to_string(), cell.to_json()))
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> Table {
        Table::new(vec![
            Column::new("a", vec![Cell::Int(3), Cell::Int(1), Cell::Null]),
            Column::new(
                "b",
                vec![
                    Cell::Str("x".into()),
                    Cell::Str("y".into()),
                    Cell::Str("x".into()),
                ],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(2.0), "2.0");
        assert_eq!(format_float(0.1), "0.1");
        assert_eq!(format_float(1e20), "1e+20");
        assert_eq!(format_float(1.5e-7), "1.5e-07");
        assert_eq!(format_float(f64::NAN), "nan");
    }

    #[test]
    fn test_ragged_columns_rejected() {
        let result = Table::new(vec![
            Column::new("a", vec![Cell::Int(1)]),
            Column::new("b", vec![Cell::Int(1), Cell::Int(2)]),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_records_skip_out_of_range_rows() {
        let records = sample().records(&[2, 7]);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["a"], serde_json::Value::Null);
        assert_eq!(records[0]["b"], serde_json::json!("x"));
    }

    #[test]
    fn test_distinct_is_first_seen_and_bounded() {
        let table = sample();
        let b = table.column("b").unwrap();
        let distinct: Vec<usize> = b.distinct(10).into_iter().map(|(i, _)| i).collect();
        assert_eq!(distinct, vec![0, 1]);
        assert_eq!(b.distinct(1).len(), 1);
        assert_eq!(b.unique_count(), 2);
    }
}
