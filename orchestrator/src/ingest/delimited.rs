//! Delimited text (CSV) sources.

use csv::ReaderBuilder;

use super::encoding::decode;
use super::naming::normalize_headers;
use super::LoadOptions;
use crate::table::{Column, Table};

/// Parse CSV bytes into a table; returns the table and the encoding used.
pub fn read_csv(
    bytes: &[u8],
    options: &LoadOptions,
    encodings: &[String],
) -> Result<(Table, String), String> {
    let (text, encoding) = decode(bytes, &options.encoding, encodings)?;

    let mut reader = ReaderBuilder::new()
        .delimiter(options.delimiter as u8)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut rows: Vec<Vec<String>> = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let record = result.map_err(|e| format!("row {}: {}", idx + 1, e))?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    let mut rows = rows.into_iter();
    let headers = if options.has_header {
        match rows.next() {
            Some(header) => normalize_headers(header),
            None => return Err("No columns to parse from file".to_string()),
        }
    } else {
        Vec::new()
    };
    let body: Vec<Vec<String>> = rows.collect();

    let width = if options.has_header {
        headers.len()
    } else {
        body.iter().map(Vec::len).max().unwrap_or(0)
    };
    if width == 0 {
        return Err("No columns to parse from file".to_string());
    }
    if let Some((line, row)) = body.iter().enumerate().find(|(_, r)| r.len() > width) {
        return Err(format!(
            "Error tokenizing data. Expected {} fields in line {}, saw {}",
            width,
            line + 1 + options.has_header as usize,
            row.len()
        ));
    }
    let headers = if options.has_header {
        headers
    } else {
        (0..width).map(|i| i.to_string()).collect()
    };

    let mut raw_columns: Vec<Vec<Option<String>>> = vec![Vec::with_capacity(body.len()); width];
    for row in body {
        let mut cells = row.into_iter();
        for column in raw_columns.iter_mut() {
            column.push(cells.next());
        }
    }

    let columns = headers
        .into_iter()
        .zip(raw_columns)
        .map(|(name, raw)| Column::from_text(name, raw))
        .collect();
    let table = Table::new(columns)?;
    Ok((table, encoding))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::DType;
    use pretty_assertions::assert_eq;

    fn read(text: &str, options: &LoadOptions) -> Result<Table, String> {
        read_csv(text.as_bytes(), options, &[]).map(|(t, _)| t)
    }

    #[test]
    fn test_types_are_inferred() {
        let table = read(
            "id,price,active,name\n1,2.5,true,a\n2,,false,b\n3,4,true,\n",
            &LoadOptions::default(),
        )
        .unwrap();
        assert_eq!(table.nrows(), 3);
        let dtypes: Vec<DType> = table.columns().iter().map(|c| c.dtype).collect();
        assert_eq!(
            dtypes,
            vec![DType::Int64, DType::Float64, DType::Bool, DType::Object]
        );
        assert_eq!(table.column("price").unwrap().null_count(), 1);
        assert_eq!(table.column("name").unwrap().null_count(), 1);
    }

    #[test]
    fn test_short_rows_are_padded() {
        let table = read("a,b,c\n1,2\n", &LoadOptions::default()).unwrap();
        assert_eq!(table.column("c").unwrap().null_count(), 1);
    }

    #[test]
    fn test_long_rows_are_rejected() {
        let err = read("a,b\n1,2,3\n", &LoadOptions::default()).unwrap_err();
        assert!(err.contains("Expected 2 fields in line 2, saw 3"), "{}", err);
    }

    #[test]
    fn test_no_header_and_custom_delimiter() {
        let options = LoadOptions {
            delimiter: ';',
            has_header: false,
            ..LoadOptions::default()
        };
        let table = read("1;x\n2;y\n", &options).unwrap();
        assert_eq!(table.column_names(), vec!["0", "1"]);
        assert_eq!(table.nrows(), 2);
    }

    #[test]
    fn test_empty_input() {
        assert!(read("", &LoadOptions::default())
            .unwrap_err()
            .contains("No columns"));
    }
}
