//! Excel workbooks (xlsx, xlsm, xls, ods).

use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};

use super::naming::normalize_headers;
use super::{IngestError, SheetSelector};
use crate::table::{Cell, Column, Table};

fn to_cell(data: &Data) -> Cell {
    match data {
        Data::Empty | Data::Error(_) => Cell::Null,
        Data::Int(i) => Cell::Int(*i),
        Data::Float(f) => Cell::Float(*f),
        Data::Bool(b) => Cell::Bool(*b),
        Data::String(s) if s.is_empty() => Cell::Null,
        Data::String(s) => Cell::Str(s.clone()),
        other => Cell::Str(other.to_string()),
    }
}

/// Read one worksheet; the first row is the header. Returns the sheet name read.
pub fn read_excel(path: &Path, sheet: &SheetSelector) -> Result<(Table, String), IngestError> {
    let mut workbook = open_workbook_auto(path).map_err(|e| IngestError::parse(path, e))?;
    let names = workbook.sheet_names().to_vec();
    let name = match sheet {
        SheetSelector::Name(name) if names.contains(name) => name.clone(),
        SheetSelector::Name(name) => {
            return Err(IngestError::InvalidOption(format!(
                "Worksheet named '{}' not found (available: {})",
                name,
                names.join(", ")
            )))
        }
        SheetSelector::Index(i) => names.get(*i).cloned().ok_or_else(|| {
            IngestError::InvalidOption(format!(
                "Worksheet index {} is invalid, {} worksheets found",
                i,
                names.len()
            ))
        })?,
    };

    let range = workbook
        .worksheet_range(&name)
        .map_err(|e| IngestError::parse(path, e))?;
    let mut rows = range.rows();
    let Some(header_row) = rows.next() else {
        return Ok((Table::default(), name));
    };
    let headers = normalize_headers(
        header_row
            .iter()
            .map(|d| match d {
                Data::Empty => String::new(),
                other => other.to_string(),
            })
            .collect(),
    );

    let mut cells: Vec<Vec<Cell>> = vec![Vec::new(); headers.len()];
    for row in rows {
        for (i, column) in cells.iter_mut().enumerate() {
            column.push(row.get(i).map(to_cell).unwrap_or(Cell::Null));
        }
    }
    let columns = headers
        .into_iter()
        .zip(cells)
        .map(|(name, cells)| Column::new(name, cells))
        .collect();
    let table = Table::new(columns).map_err(|e| IngestError::parse(path, e))?;
    Ok((table, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_conversion() {
        assert_eq!(to_cell(&Data::Empty), Cell::Null);
        assert_eq!(to_cell(&Data::Int(3)), Cell::Int(3));
        assert_eq!(to_cell(&Data::String("x".into())), Cell::Str("x".into()));
        assert_eq!(to_cell(&Data::String(String::new())), Cell::Null);
    }

    #[test]
    fn test_unreadable_workbook_is_a_parse_error() {
        let mut file = tempfile::Builder::new().suffix(".xlsx").tempfile().unwrap();
        std::io::Write::write_all(&mut file, b"not a zip archive").unwrap();
        let err = read_excel(file.path(), &SheetSelector::default()).unwrap_err();
        assert!(matches!(err, IngestError::Parse { .. }));
    }
}
