//! Descriptive statistics over columns

use std::collections::HashMap;

use serde::Serialize;

use super::{Cell, CellKey, Column, Table};

/// Summary of a numeric column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericSummary {
    pub count: usize,
    pub mean: f64,
    pub std: Option<f64>,
    pub min: f64,
    #[serde(rename = "25%")]
    pub q25: f64,
    #[serde(rename = "50%")]
    pub median: f64,
    #[serde(rename = "75%")]
    pub q75: f64,
    pub max: f64,
}

/// Summary of a non-numeric column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoricalSummary {
    pub count: usize,
    pub unique: usize,
    pub top: Option<String>,
    pub freq: usize,
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Variance with `ddof` degrees of freedom removed
pub fn variance(values: &[f64], ddof: usize) -> Option<f64> {
    if values.len() <= ddof {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some(ss / (values.len() - ddof) as f64)
}

pub fn std_dev(values: &[f64]) -> Option<f64> {
    variance(values, 1).map(f64::sqrt)
}

/// Linear-interpolated quantile, `q` in `[0, 1]`
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}

pub fn median(values: &[f64]) -> Option<f64> {
    quantile(values, 0.5)
}

pub fn numeric_summary(column: &Column) -> Option<NumericSummary> {
    if !column.dtype.is_numeric() {
        return None;
    }
    let values = column.numbers();
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some(NumericSummary {
        count: values.len(),
        mean: mean(&values)?,
        std: std_dev(&values),
        min,
        q25: quantile(&values, 0.25)?,
        median: median(&values)?,
        q75: quantile(&values, 0.75)?,
        max,
    })
}

/// Most frequent value with its count; ties go to the first seen
pub fn mode(column: &Column) -> Option<(String, usize)> {
    let mut counts: HashMap<CellKey, (usize, usize)> = HashMap::new();
    for (idx, cell) in column.cells().iter().enumerate() {
        if cell.is_null() {
            continue;
        }
        counts.entry(cell.key()).or_insert((0, idx)).0 += 1;
    }
    let (_, (count, first)) = counts
        .into_iter()
        .max_by(|(_, (ca, fa)), (_, (cb, fb))| ca.cmp(cb).then(fb.cmp(fa)))?;
    column.get(first).map(|cell| (cell.display(), count))
}

pub fn categorical_summary(column: &Column) -> CategoricalSummary {
    let top = mode(column);
    CategoricalSummary {
        count: column.len() - column.null_count(),
        unique: column.unique_count(),
        freq: top.as_ref().map(|(_, n)| *n).unwrap_or(0),
        top: top.map(|(v, _)| v),
    }
}

/// Value frequencies, most common first
pub fn value_counts(column: &Column) -> Vec<(Cell, usize)> {
    let mut order: Vec<(CellKey, Cell)> = Vec::new();
    let mut counts: HashMap<CellKey, usize> = HashMap::new();
    for cell in column.non_null() {
        let key = cell.key();
        let slot = counts.entry(key.clone()).or_insert(0);
        if *slot == 0 {
            order.push((key, cell.clone()));
        }
        *slot += 1;
    }
    let mut out: Vec<(Cell, usize)> = order
        .into_iter()
        .map(|(key, cell)| (cell, counts[&key]))
        .collect();
    out.sort_by(|a, b| b.1.cmp(&a.1));
    out
}

/// Statistics table for the numeric columns of `table`
///
/// Falls back to categorical statistics when the table has no numeric column.
pub fn describe(table: &Table) -> Table {
    let numeric: Vec<&Column> = table.columns().iter().filter(|c| c.dtype.is_numeric()).collect();
    if numeric.is_empty() {
        let labels = ["count", "unique", "top", "freq"];
        let mut columns = vec![Column::new(
            "",
            labels.iter().map(|l| Cell::Str(l.to_string())).collect(),
        )];
        for col in table.columns() {
            let s = categorical_summary(col);
            columns.push(Column::new(
                col.name.clone(),
                vec![
                    Cell::Int(s.count as i64),
                    Cell::Int(s.unique as i64),
                    s.top.map(Cell::Str).unwrap_or(Cell::Null),
                    Cell::Int(s.freq as i64),
                ],
            ));
        }
        return Table::new(columns).unwrap_or_default();
    }

    let labels = ["count", "mean", "std", "min", "25%", "50%", "75%", "max"];
    let mut columns = vec![Column::new(
        "",
        labels.iter().map(|l| Cell::Str(l.to_string())).collect(),
    )];
    for col in numeric {
        let cells = match numeric_summary(col) {
            Some(s) => vec![
                s.count as f64,
                s.mean,
                s.std.unwrap_or(f64::NAN),
                s.min,
                s.q25,
                s.median,
                s.q75,
                s.max,
            ]
            .into_iter()
            .map(Cell::Float)
            .collect(),
            None => {
                let mut cells = vec![Cell::Float(0.0)];
                cells.extend(std::iter::repeat(Cell::Null).take(7));
                cells
            }
        };
        columns.push(Column::new(col.name.clone(), cells));
    }
    Table::new(columns).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_quantiles_interpolate() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(median(&values), Some(2.5));
        assert_eq!(quantile(&values, 0.25), Some(1.75));
        assert_eq!(quantile(&[], 0.5), None);
    }

    #[test]
    fn test_std_needs_two_values() {
        assert_eq!(std_dev(&[1.0]), None);
        assert_eq!(std_dev(&[2.0, 4.0]), Some(2f64.sqrt()));
    }

    #[test]
    fn test_numeric_summary_skips_nulls() {
        let col = Column::new("a", vec![Cell::Int(1), Cell::Null, Cell::Int(3)]);
        let s = numeric_summary(&col).unwrap();
        assert_eq!(s.count, 2);
        assert_eq!(s.mean, 2.0);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 3.0);
    }

    #[test]
    fn test_categorical_summary_and_counts() {
        let col = Column::new(
            "c",
            ["a", "b", "b", "c"].iter().map(|s| Cell::Str(s.to_string())).collect(),
        );
        let s = categorical_summary(&col);
        assert_eq!(s.unique, 3);
        assert_eq!(s.top.as_deref(), Some("b"));
        assert_eq!(s.freq, 2);

        let counts = value_counts(&col);
        assert_eq!(counts[0], (Cell::Str("b".into()), 2));
        assert_eq!(counts.len(), 3);
    }

    #[test]
    fn test_describe_shape() {
        let table = Table::new(vec![
            Column::new("n", vec![Cell::Int(1), Cell::Int(2)]),
            Column::new("s", vec![Cell::Str("x".into()), Cell::Str("y".into())]),
        ])
        .unwrap();
        let d = describe(&table);
        assert_eq!(d.nrows(), 8);
        assert_eq!(d.column_names(), vec!["", "n"]);
    }
}
