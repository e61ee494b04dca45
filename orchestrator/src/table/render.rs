use super::{Cell, Column, Table};

/// Rows shown on each side of the ellipsis when a rendering is truncated
const EDGE_ROWS: usize = 5;

fn cell_text(cell: &Cell) -> String {
    match cell {
        Cell::Null => "NaN".to_string(),
        other => other.display(),
    }
}

/// Row positions to show, with `None` marking the ellipsis row
fn visible_rows(nrows: usize, max_rows: usize) -> Vec<Option<usize>> {
    if nrows <= max_rows {
        return (0..nrows).map(Some).collect();
    }
    let mut rows: Vec<Option<usize>> = (0..EDGE_ROWS).map(Some).collect();
    rows.push(None);
    rows.extend((nrows - EDGE_ROWS..nrows).map(Some));
    rows
}

/// Render a table as an aligned text grid with a range index
pub fn render_table(table: &Table, max_rows: usize) -> String {
    if table.ncols() == 0 || table.nrows() == 0 {
        return format!(
            "Empty DataFrame\nColumns: [{}]\nIndex: []",
            table.column_names().join(", ")
        );
    }

    let rows = visible_rows(table.nrows(), max_rows);
    let index: Vec<String> = rows
        .iter()
        .map(|r| r.map(|i| i.to_string()).unwrap_or_else(|| "...".to_string()))
        .collect();
    let index_width = index.iter().map(|s| s.len()).max().unwrap_or(0);

    let columns: Vec<(String, Vec<String>)> = table
        .columns()
        .iter()
        .map(|col| {
            let values = rows
                .iter()
                .map(|r| match r {
                    Some(i) => col.get(*i).map(cell_text).unwrap_or_default(),
                    None => "...".to_string(),
                })
                .collect();
            (col.name.clone(), values)
        })
        .collect();

    let widths: Vec<usize> = columns
        .iter()
        .map(|(name, values)| {
            values
                .iter()
                .map(|v| v.chars().count())
                .chain(std::iter::once(name.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut out = String::new();
    out.push_str(&" ".repeat(index_width));
    for ((name, _), width) in columns.iter().zip(&widths) {
        out.push_str(&format!("  {:>width$}", name, width = *width));
    }
    for (row, label) in index.iter().enumerate() {
        out.push('\n');
        out.push_str(&format!("{:<width$}", label, width = index_width));
        for ((_, values), width) in columns.iter().zip(&widths) {
            out.push_str(&format!("  {:>width$}", values[row], width = *width));
        }
    }

    if table.nrows() > max_rows {
        out.push_str(&format!(
            "\n\n[{} rows x {} columns]",
            table.nrows(),
            table.ncols()
        ));
    }
    out
}

/// Render a column as an indexed listing followed by its name and dtype
pub fn render_column(column: &Column, max_rows: usize) -> String {
    let rows = visible_rows(column.len(), max_rows);
    let labels: Vec<String> = rows
        .iter()
        .map(|r| r.map(|i| i.to_string()).unwrap_or_else(|| "...".to_string()))
        .collect();
    let values: Vec<String> = rows
        .iter()
        .map(|r| match r {
            Some(i) => column.get(*i).map(cell_text).unwrap_or_default(),
            None => "...".to_string(),
        })
        .collect();
    let label_width = labels.iter().map(|s| s.len()).max().unwrap_or(0);
    let value_width = values.iter().map(|s| s.chars().count()).max().unwrap_or(0);

    let mut out = String::new();
    for (label, value) in labels.iter().zip(&values) {
        out.push_str(&format!(
            "{:<lw$}    {:>vw$}\n",
            label,
            value,
            lw = label_width,
            vw = value_width
        ));
    }
    if column.len() > max_rows {
        out.push_str(&format!("Name: {}, Length: {}, dtype: {}", column.name, column.len(), column.dtype));
    } else {
        out.push_str(&format!("Name: {}, dtype: {}", column.name, column.dtype));
    }
    out
}
