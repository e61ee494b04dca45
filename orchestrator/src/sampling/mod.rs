//! Bounded, representative views of a single column.
//!
//! Sampling never returns more than the configured maximum, and every value
//! is rendered as truncated text so one huge cell cannot flood the caller.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::SamplingConfig;
use crate::error::{KernelError, KernelResult};
use crate::models::{
    ColumnStatistics, NumericStats, SampleMethod, SampleOptions, SampleResult, SampledValue,
    TextStats,
};
use crate::store::VariableStore;
use crate::table::stats::{mean, median, std_dev};
use crate::table::{Cell, CellKey, Column, DType};

/// Rows taken from the top of the column by `mixed`
const MIXED_HEAD_ROWS: usize = 3;

fn rng_for(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn truncate(text: String, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text,
    }
}

/// Row positions picked by `method`, at most `n`
pub fn pick_rows(column: &Column, method: SampleMethod, n: usize, seed: Option<u64>) -> Vec<usize> {
    let len = column.len();
    let n = n.min(len);
    match method {
        SampleMethod::Head => (0..n).collect(),
        SampleMethod::Tail => (len - n..len).collect(),
        SampleMethod::Unique => column.distinct(n).into_iter().map(|(i, _)| i).collect(),
        SampleMethod::Random => {
            let mut rng = rng_for(seed);
            let mut picked = rand::seq::index::sample(&mut rng, len, n).into_vec();
            picked.sort_unstable();
            picked
        }
        SampleMethod::Mixed => mixed_rows(column, n, seed),
    }
}

/// Head rows, then first-seen distinct values, then random fill; no value twice
fn mixed_rows(column: &Column, n: usize, seed: Option<u64>) -> Vec<usize> {
    let cells = column.cells();
    let mut seen: HashSet<CellKey> = HashSet::new();
    let mut picked: Vec<usize> = Vec::with_capacity(n);

    for idx in 0..MIXED_HEAD_ROWS.min(n) {
        if seen.insert(cells[idx].key()) {
            picked.push(idx);
        }
    }

    let distinct_budget = (n - picked.len()) / 2;
    let mut added = 0;
    for (idx, cell) in cells.iter().enumerate() {
        if added >= distinct_budget {
            break;
        }
        if !cell.is_null() && seen.insert(cell.key()) {
            picked.push(idx);
            added += 1;
        }
    }

    if picked.len() < n {
        let taken: HashSet<usize> = picked.iter().copied().collect();
        let mut rest: Vec<usize> = (0..cells.len()).filter(|i| !taken.contains(i)).collect();
        rest.shuffle(&mut rng_for(seed));
        for idx in rest {
            if picked.len() >= n {
                break;
            }
            if seen.insert(cells[idx].key()) {
                picked.push(idx);
            }
        }
    }
    picked
}

/// Statistics over the whole column
pub fn column_statistics(column: &Column) -> ColumnStatistics {
    let non_null_count = column.len() - column.null_count();
    let unique_count = column.unique_count();

    let numeric_stats = if column.dtype.is_numeric() && non_null_count > 0 {
        let values = column.numbers();
        Some(NumericStats {
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            mean: mean(&values).unwrap_or(f64::NAN),
            median: median(&values).unwrap_or(f64::NAN),
            std: std_dev(&values).unwrap_or(0.0),
        })
    } else {
        None
    };

    let text_stats = if column.dtype == DType::Object && non_null_count > 0 {
        let lengths: Vec<usize> = column.non_null().map(|c| c.display().chars().count()).collect();
        Some(TextStats {
            min_length: lengths.iter().copied().min().unwrap_or(0),
            max_length: lengths.iter().copied().max().unwrap_or(0),
            avg_length: lengths.iter().sum::<usize>() as f64 / lengths.len() as f64,
        })
    } else {
        None
    };

    ColumnStatistics {
        non_null_count,
        unique_count,
        duplicate_count: non_null_count - unique_count,
        numeric_stats,
        text_stats,
    }
}

fn sampled_value(index: usize, cell: &Cell, max_text_length: usize) -> SampledValue {
    SampledValue {
        index,
        value: if cell.is_null() {
            None
        } else {
            Some(truncate(cell.display(), max_text_length))
        },
        original_type: cell.type_name().to_string(),
    }
}

/// Sample `column` of the table bound to `table` in `store`
pub async fn sample(
    store: &VariableStore,
    table: &str,
    column: &str,
    method: SampleMethod,
    sample_size: usize,
    options: &SampleOptions,
    limits: &SamplingConfig,
) -> KernelResult<SampleResult> {
    let bound = store.table(table).await?;
    let col = bound
        .column(column)
        .ok_or_else(|| KernelError::ColumnNotFound {
            session_id: store.session_id().to_string(),
            table: table.to_string(),
            column: column.to_string(),
            available: bound.column_names(),
        })?;

    let n = sample_size.min(limits.max_sample_size).min(col.len());
    let max_text_length = options.max_text_length.unwrap_or(limits.max_text_length).max(1);
    let sample_data: Vec<SampledValue> = pick_rows(col, method, n, options.seed)
        .into_iter()
        .filter_map(|i| col.get(i).map(|cell| sampled_value(i, cell, max_text_length)))
        .collect();

    Ok(SampleResult {
        variable_name: table.to_string(),
        column_name: column.to_string(),
        method,
        dtype: col.dtype.as_str().to_string(),
        total_rows: col.len(),
        null_count: col.null_count(),
        sample_size: sample_data.len(),
        sample_data,
        statistics: options.include_stats.then(|| column_statistics(col)),
    })
}
