use super::{Cell, Column, DType};

/// Text tokens that load as missing values
const NULL_TOKENS: &[&str] = &[
    "", "NA", "N/A", "NaN", "nan", "null", "NULL", "None", "<NA>", "#N/A",
];

pub(super) fn is_null_token(raw: &str) -> bool {
    NULL_TOKENS.contains(&raw.trim())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim() {
        "true" | "True" | "TRUE" => Some(true),
        "false" | "False" | "FALSE" => Some(false),
        _ => None,
    }
}

fn parse_int(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok()
}

fn parse_float(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    // Rust accepts "infinity" and friends; only take things that look numeric
    let first = trimmed.chars().next()?;
    if !(first.is_ascii_digit() || matches!(first, '-' | '+' | '.')) {
        return None;
    }
    trimmed.parse::<f64>().ok()
}

impl Column {
    /// Build a column from raw text, inferring one dtype for the whole column.
    ///
    /// All non-null cells integer gives `int64`, all numeric gives `float64`,
    /// all boolean gives `bool`; anything else keeps the original text.
    pub fn from_text(name: impl Into<String>, raw: Vec<Option<String>>) -> Column {
        let is_null = |v: &Option<String>| v.as_deref().map(is_null_token).unwrap_or(true);
        let present = || raw.iter().filter(|v| !is_null(*v)).filter_map(|v| v.as_deref());

        let dtype = if present().next().is_none() {
            if raw.is_empty() {
                DType::Object
            } else {
                DType::Float64
            }
        } else if present().all(|v| parse_int(v).is_some()) {
            DType::Int64
        } else if present().all(|v| parse_float(v).is_some()) {
            DType::Float64
        } else if present().all(|v| parse_bool(v).is_some()) {
            DType::Bool
        } else {
            DType::Object
        };

        let cells = raw
            .iter()
            .map(|v| match v {
                Some(text) if !is_null(v) => match dtype {
                    DType::Int64 => parse_int(text).map(Cell::Int).unwrap_or(Cell::Null),
                    DType::Float64 => parse_float(text).map(Cell::Float).unwrap_or(Cell::Null),
                    DType::Bool => parse_bool(text).map(Cell::Bool).unwrap_or(Cell::Null),
                    DType::Object => Cell::Str(text.clone()),
                },
                _ => Cell::Null,
            })
            .collect();

        Column {
            name: name.into(),
            dtype,
            cells,
        }
    }
}

/// Settle the dtype of already-typed cells, widening ints to floats when mixed
pub(super) fn normalize(cells: Vec<Cell>) -> (DType, Vec<Cell>) {
    let mut has_int = false;
    let mut has_float = false;
    let mut has_bool = false;
    let mut has_other = false;
    let mut has_value = false;

    for cell in &cells {
        match cell {
            c if c.is_null() => {}
            Cell::Int(_) => has_int = true,
            Cell::Float(_) => has_float = true,
            Cell::Bool(_) => has_bool = true,
            _ => has_other = true,
        }
        has_value |= !cell.is_null();
    }

    let dtype = if !has_value {
        if cells.is_empty() {
            DType::Object
        } else {
            DType::Float64
        }
    } else if has_other || (has_bool && (has_int || has_float)) {
        DType::Object
    } else if has_bool {
        DType::Bool
    } else if has_float {
        DType::Float64
    } else {
        DType::Int64
    };

    let cells = cells
        .into_iter()
        .map(|cell| match cell {
            c if c.is_null() => Cell::Null,
            Cell::Int(i) if dtype == DType::Float64 => Cell::Float(i as f64),
            other => other,
        })
        .collect();
    (dtype, cells)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn text(values: &[&str]) -> Vec<Option<String>> {
        values.iter().map(|v| Some(v.to_string())).collect()
    }

    #[test]
    fn test_integer_column() {
        let col = Column::from_text("a", text(&["1", "2", "NA", "-4"]));
        assert_eq!(col.dtype, DType::Int64);
        assert_eq!(col.null_count(), 1);
        assert_eq!(col.cells()[3], Cell::Int(-4));
    }

    #[test]
    fn test_mixed_numbers_widen_to_float() {
        let col = Column::from_text("a", text(&["1", "2.5", ""]));
        assert_eq!(col.dtype, DType::Float64);
        assert_eq!(col.cells()[0], Cell::Float(1.0));
    }

    #[test]
    fn test_bool_and_object_columns() {
        assert_eq!(Column::from_text("b", text(&["true", "False"])).dtype, DType::Bool);

        let col = Column::from_text("c", text(&["1", "x"]));
        assert_eq!(col.dtype, DType::Object);
        assert_eq!(col.cells()[0], Cell::Str("1".into()));
    }

    #[test]
    fn test_words_are_not_floats() {
        let col = Column::from_text("w", text(&["inf", "#N/A", "3.25"]));
        assert_eq!(col.dtype, DType::Object);
        assert_eq!(col.cells()[1], Cell::Null);

        let col = Column::from_text("f", text(&["3.25", "#N/A"]));
        assert_eq!(col.cells(), &[Cell::Float(3.25), Cell::Null]);
    }

    #[test]
    fn test_normalize_mixed_cells() {
        let col = Column::new("n", vec![Cell::Int(1), Cell::Float(f64::NAN), Cell::Float(0.5)]);
        assert_eq!(col.dtype, DType::Float64);
        assert_eq!(col.cells(), &[Cell::Float(1.0), Cell::Null, Cell::Float(0.5)]);

        let col = Column::new("o", vec![Cell::Bool(true), Cell::Int(1)]);
        assert_eq!(col.dtype, DType::Object);
    }
}
