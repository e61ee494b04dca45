//! JSON sources in the common tabular layouts.
//!
//! - records: `[{"a": 1, "b": 2}, ...]`
//! - columns: `{"a": [1, 2], "b": [3, 4]}`
//! - index:   `{"a": {"0": 1, "1": 2}, ...}`
//! - values:  `[[1, 2], [3, 4]]`

use serde_json::{Map, Value as Json};

use crate::table::{Cell, Column, Table};

fn to_cell(value: &Json) -> Cell {
    match value {
        Json::Null => Cell::Null,
        Json::Bool(b) => Cell::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Cell::Int(i),
            None => n.as_f64().map(Cell::Float).unwrap_or(Cell::Null),
        },
        Json::String(s) => Cell::Str(s.clone()),
        nested => Cell::Str(nested.to_string()),
    }
}

/// Ordered union of keys across objects
fn key_union<'a>(objects: impl Iterator<Item = &'a Map<String, Json>>) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for object in objects {
        for key in object.keys() {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
    }
    keys
}

fn from_records(rows: &[Json]) -> Result<Table, String> {
    let objects = rows
        .iter()
        .map(|r| {
            r.as_object()
                .ok_or_else(|| "mixed record layout: expected every element to be an object".to_string())
        })
        .collect::<Result<Vec<_>, _>>()?;
    let keys = key_union(objects.iter().copied());
    let columns = keys
        .into_iter()
        .map(|key| {
            let cells = objects
                .iter()
                .map(|o| o.get(&key).map(to_cell).unwrap_or(Cell::Null))
                .collect();
            Column::new(key, cells)
        })
        .collect();
    Table::new(columns)
}

fn from_rows(rows: &[Json]) -> Result<Table, String> {
    let arrays = rows
        .iter()
        .map(|r| {
            r.as_array()
                .ok_or_else(|| "mixed row layout: expected every element to be an array".to_string())
        })
        .collect::<Result<Vec<_>, _>>()?;
    let width = arrays.iter().map(|a| a.len()).max().unwrap_or(0);
    let columns = (0..width)
        .map(|i| {
            let cells = arrays
                .iter()
                .map(|a| a.get(i).map(to_cell).unwrap_or(Cell::Null))
                .collect();
            Column::new(i.to_string(), cells)
        })
        .collect();
    Table::new(columns)
}

fn from_columns(map: &Map<String, Json>) -> Result<Table, String> {
    if map.values().all(Json::is_array) {
        let lengths: Vec<usize> = map
            .values()
            .filter_map(Json::as_array)
            .map(Vec::len)
            .collect();
        if lengths.windows(2).any(|w| w[0] != w[1]) {
            return Err("All arrays must be of the same length".to_string());
        }
        let columns = map
            .iter()
            .map(|(name, values)| {
                let cells = values
                    .as_array()
                    .map(|a| a.iter().map(to_cell).collect())
                    .unwrap_or_default();
                Column::new(name.clone(), cells)
            })
            .collect();
        return Table::new(columns);
    }

    if map.values().all(Json::is_object) {
        let inner: Vec<&Map<String, Json>> = map.values().filter_map(Json::as_object).collect();
        let index = key_union(inner.iter().copied());
        let columns = map
            .iter()
            .zip(inner)
            .map(|((name, _), values)| {
                let cells = index
                    .iter()
                    .map(|k| values.get(k).map(to_cell).unwrap_or(Cell::Null))
                    .collect();
                Column::new(name.clone(), cells)
            })
            .collect();
        return Table::new(columns);
    }

    Err("If using all scalar values, you must pass an index".to_string())
}

/// Build a table from an already parsed JSON document
pub fn table_from_json(document: &Json) -> Result<Table, String> {
    match document {
        Json::Array(rows) if rows.is_empty() => Ok(Table::default()),
        Json::Array(rows) if rows[0].is_object() => from_records(rows),
        Json::Array(rows) if rows[0].is_array() => from_rows(rows),
        Json::Object(map) => from_columns(map),
        _ => Err("unsupported JSON layout: expected records, columns, index or values".to_string()),
    }
}

pub fn read_json(bytes: &[u8]) -> Result<Table, String> {
    let body = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    let document: Json = serde_json::from_slice(body).map_err(|e| e.to_string())?;
    table_from_json(&document)
}
