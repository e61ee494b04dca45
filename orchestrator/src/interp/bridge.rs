//! Data exchanged with the embedded runtime.
//!
//! Tables cross the boundary as JSON payloads of named cell columns; the
//! namespace inventory comes back as a list of [`Binding`]s.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as Json};

use crate::table::{Cell, Column, Table};

/// Coarse category used by variable inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Table,
    Scalar,
    Sequence,
    Callable,
    Other,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Table => "table",
            Classification::Scalar => "scalar",
            Classification::Sequence => "sequence",
            Classification::Callable => "callable",
            Classification::Other => "other",
        }
    }
}

/// Runtime kind of a bound value, as reported by the inventory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Table,
    Column,
    None,
    Bool,
    Number,
    Text,
    Collection,
    Module,
    Builtin,
    Class,
    Function,
    Other,
}

impl ValueKind {
    pub fn classification(self) -> Classification {
        match self {
            ValueKind::Table => Classification::Table,
            ValueKind::None | ValueKind::Bool | ValueKind::Number | ValueKind::Text => {
                Classification::Scalar
            }
            ValueKind::Column | ValueKind::Collection => Classification::Sequence,
            ValueKind::Builtin | ValueKind::Class | ValueKind::Function => {
                Classification::Callable
            }
            ValueKind::Module | ValueKind::Other => Classification::Other,
        }
    }
}

/// One visible name in a session namespace
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Binding {
    pub name: String,
    pub kind: ValueKind,
    pub type_name: String,
    pub size_bytes: u64,
    /// Modules and native functions; kept by `clear(keep_imports)` and hidden from `%who`
    pub imported: bool,
    #[serde(default)]
    pub length: Option<usize>,
    #[serde(default)]
    pub shape: Option<Vec<usize>>,
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    /// `(column, dtype)` in column order
    #[serde(default)]
    pub dtypes: Option<Vec<(String, String)>>,
    /// `(name, dtype)` of a column value
    #[serde(default)]
    pub column: Option<(String, String)>,
}

impl Binding {
    pub fn classification(&self) -> Classification {
        self.kind.classification()
    }
}

/// Outcome of a runtime entry point
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct Reply {
    pub ok: bool,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub elapsed: Option<f64>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

fn encode_cell(cell: &Cell) -> Json {
    match cell {
        Cell::Float(f) if f.is_infinite() => {
            json!({ "$float": if *f > 0.0 { "inf" } else { "-inf" } })
        }
        other => other.to_json(),
    }
}

fn decode_cell(value: &Json) -> Cell {
    match value {
        Json::Null => Cell::Null,
        Json::Bool(b) => Cell::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Cell::Int(i),
            None => n.as_f64().map(Cell::Float).unwrap_or(Cell::Null),
        },
        Json::String(s) => Cell::Str(s.clone()),
        Json::Object(map) => match map.get("$float").and_then(Json::as_str) {
            Some("inf") => Cell::Float(f64::INFINITY),
            Some("-inf") => Cell::Float(f64::NEG_INFINITY),
            _ => Cell::Null,
        },
        Json::Array(_) => Cell::Str(value.to_string()),
    }
}

/// Serialize a table for `frame._from_payload`
pub fn table_payload(table: &Table) -> String {
    let columns: Vec<Json> = table
        .columns()
        .iter()
        .map(|column| {
            let mut entry = Map::new();
            entry.insert("name".into(), Json::from(column.name.clone()));
            entry.insert(
                "cells".into(),
                Json::Array(column.cells().iter().map(encode_cell).collect()),
            );
            Json::Object(entry)
        })
        .collect();
    json!({ "columns": columns }).to_string()
}

/// Rebuild a table from a runtime payload; dtypes are re-inferred from the cells
pub fn table_from_payload(payload: &str) -> Result<Table, String> {
    let root: Json = serde_json::from_str(payload).map_err(|e| e.to_string())?;
    let columns = root
        .get("columns")
        .and_then(Json::as_array)
        .ok_or_else(|| "table payload has no columns".to_string())?;
    let mut out = Vec::with_capacity(columns.len());
    for column in columns {
        let name = column.get("name").and_then(Json::as_str).unwrap_or_default();
        let cells = column
            .get("cells")
            .and_then(Json::as_array)
            .map(|cells| cells.iter().map(decode_cell).collect())
            .unwrap_or_default();
        out.push(Column::new(name, cells));
    }
    Table::new(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::DType;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_payload_keeps_types_and_infinities() {
        let table = Table::new(vec![
            Column::new("n", vec![Cell::Int(1), Cell::Null]),
            Column::new("f", vec![Cell::Float(f64::NEG_INFINITY), Cell::Float(0.5)]),
            Column::new("s", vec![Cell::Str("a".into()), Cell::Bool(true)]),
        ])
        .unwrap();
        let back = table_from_payload(&table_payload(&table)).unwrap();
        assert_eq!(back, table);
        assert_eq!(back.columns()[2].dtype, DType::Object);
    }

    #[test]
    fn test_payload_from_runtime_infers_float_columns() {
        let payload = r#"{"columns":[{"name":"x","cells":[1,2.5,null]},{"name":"big","cells":["123456789012345678901234"]}]}"#;
        let err = table_from_payload(payload).unwrap_err();
        assert!(err.contains("expected 3"));

        let payload = r#"{"columns":[{"name":"x","cells":[1,2.5,null]}]}"#;
        let table = table_from_payload(payload).unwrap();
        assert_eq!(table.columns()[0].dtype, DType::Float64);
        assert_eq!(table.columns()[0].cells()[0], Cell::Float(1.0));
        assert!(table_from_payload("[]").is_err());
    }

    #[test]
    fn test_binding_classification() {
        let raw = r#"[
            {"name":"df","kind":"table","type_name":"DataFrame","size_bytes":400,"imported":false,
             "length":2,"shape":[2,1],"columns":["a"],"dtypes":[["a","int64"]]},
            {"name":"math","kind":"module","type_name":"module","size_bytes":72,"imported":true},
            {"name":"f","kind":"function","type_name":"function","size_bytes":136,"imported":false}
        ]"#;
        let bindings: Vec<Binding> = serde_json::from_str(raw).unwrap();
        let classes: Vec<Classification> = bindings.iter().map(Binding::classification).collect();
        assert_eq!(
            classes,
            vec![Classification::Table, Classification::Other, Classification::Callable]
        );
        assert_eq!(bindings[0].dtypes, Some(vec![("a".to_string(), "int64".to_string())]));
    }
}
