use std::collections::HashSet;
use std::fmt::Write;
use std::sync::OnceLock;

use num_format::{Locale, ToFormattedString};
use parking_lot::Mutex;

use crate::categories::CategoryCount;
use crate::types::{SeriesRow, TrendRow};

static WARNED_MESSAGES: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();

pub fn warn_once(message: impl Into<String>) {
    let message = message.into();
    let cache = WARNED_MESSAGES.get_or_init(|| Mutex::new(HashSet::new()));

    if cache.lock().insert(message.clone()) {
        eprintln!("{message}");
    }
}

#[derive(Clone)]
pub struct NumberFormatOptions {
    pub use_comma: bool,
    pub use_human: bool,
    pub locale: String,
    pub decimal_places: usize,
}

/// Format a number for display. Accepts both u32 and u64.
pub fn format_number(n: impl Into<u64>, options: &NumberFormatOptions) -> String {
    let n: u64 = n.into();
    let locale = match options.locale.as_str() {
        "de" => Locale::de,
        "fr" => Locale::fr,
        "es" => Locale::es,
        "it" => Locale::it,
        "ja" => Locale::ja,
        "ko" => Locale::ko,
        "zh" => Locale::zh,
        _ => Locale::en,
    };

    if options.use_human {
        let (scale, suffix) = match n {
            1_000_000_000_000.. => (1_000_000_000_000.0, "t"),
            1_000_000_000.. => (1_000_000_000.0, "b"),
            1_000_000.. => (1_000_000.0, "m"),
            1_000.. => (1_000.0, "k"),
            _ => return n.to_string(),
        };
        format!(
            "{:.prec$}{suffix}",
            n as f64 / scale,
            prec = options.decimal_places
        )
    } else if options.use_comma {
        n.to_formatted_string(&locale)
    } else {
        n.to_string()
    }
}

/// Undefined ratios are shown as `-`.
pub fn format_ratio(value: Option<f64>, options: &NumberFormatOptions) -> String {
    match value {
        Some(v) => format!("{v:.prec$}", prec = options.decimal_places),
        None => "-".to_string(),
    }
}

/// Left-align the first column, right-align the rest.
fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    let header: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    for row in std::iter::once(&header).chain(rows) {
        for (i, (cell, width)) in row.iter().zip(&widths).enumerate() {
            if i == 0 {
                let _ = write!(out, "{cell:<width$}");
            } else {
                let _ = write!(out, "  {cell:>width$}");
            }
        }
        out.push('\n');
    }
    out
}

pub fn render_counts_table(rows: &[SeriesRow], options: &NumberFormatOptions) -> String {
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            vec![
                row.bucket.to_string(),
                format_number(row.new, options),
                format_number(row.active, options),
                format_number(row.total, options),
            ]
        })
        .collect();
    render_table(&["Month", "New", "Active", "Total"], &cells)
}

pub fn render_trend_table(rows: &[TrendRow], options: &NumberFormatOptions) -> String {
    let fitted = rows.iter().any(|row| row.fitted.is_some());
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            let mut cells = vec![row.bucket.to_string(), format_ratio(row.ratio, options)];
            if fitted {
                cells.push(format_ratio(row.fitted, options));
            }
            cells
        })
        .collect();
    if fitted {
        render_table(&["Month", "Ratio", "Trend"], &cells)
    } else {
        render_table(&["Month", "Ratio"], &cells)
    }
}

pub fn render_categories_table(counts: &[CategoryCount], options: &NumberFormatOptions) -> String {
    let cells: Vec<Vec<String>> = counts
        .iter()
        .map(|c| vec![c.category.clone(), format_number(c.reviews, options)])
        .collect();
    render_table(&["Category", "Reviews"], &cells)
}
