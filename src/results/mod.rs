use std::fs;
use std::path::Path;

use log::{debug, warn};

use crate::error::Result;
use crate::schema::{self, AggKind};

/// A typed column of the result table.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Int(Vec<i64>),
    Float(Vec<f64>),
    Text(Vec<String>),
    /// Histogram cells that did not collapse: (fraction, count) pairs
    Pairs(Vec<(f64, i64)>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Int(v) => v.len(),
            Column::Float(v) => v.len(),
            Column::Text(v) => v.len(),
            Column::Pairs(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numeric view of a cell; text and pair cells have none.
    pub fn as_f64(&self, row: usize) -> Option<f64> {
        match self {
            Column::Int(v) => Some(v[row] as f64),
            Column::Float(v) => Some(v[row]),
            _ => None,
        }
    }

    /// Canonical string form of a cell, used for key matching.
    pub fn key_string(&self, row: usize) -> String {
        match self {
            Column::Int(v) => v[row].to_string(),
            Column::Float(v) => v[row].to_string(),
            Column::Text(v) => v[row].clone(),
            Column::Pairs(v) => format!("{}={}", v[row].0, v[row].1),
        }
    }
}

/// Columnar result table loaded from the batch run's CSV output.
#[derive(Debug, Clone, Default)]
pub struct ResultTable {
    pub names: Vec<String>,
    pub columns: Vec<Column>,
    /// Histogram renames as (new name, original name)
    pub renames: Vec<(String, String)>,
}

impl ResultTable {
    pub fn rows(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.index_of(name).map(|i| &self.columns[i])
    }

    /// Aggregation semantics for a column, following renames back to the
    /// original schema field.
    pub fn agg_semantics(&self, name: &str) -> Option<AggKind> {
        let original = self
            .renames
            .iter()
            .find(|(new, _)| new == name)
            .map(|(_, orig)| orig.as_str())
            .unwrap_or(name);
        schema::agg_kind(original)
    }
}

/// Reads the result CSV from disk and runs both normalization passes.
pub fn read_results<P: AsRef<Path>>(path: P) -> Result<ResultTable> {
    let mut table = parse_results(&fs::read_to_string(path)?)?;
    convert_percentages(&mut table);
    convert_histograms(&mut table);
    Ok(table)
}

/// Parses the `;`-delimited result CSV into typed columns: integer when
/// every cell parses as an integer, float when every cell parses as a float
/// (blank cells become NaN), text otherwise.
pub fn parse_results(text: &str) -> Result<ResultTable> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let names: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut cells: Vec<Vec<String>> = vec![Vec::new(); names.len()];
    for record in reader.records() {
        let record = record?;
        for (i, column) in cells.iter_mut().enumerate() {
            column.push(record.get(i).unwrap_or_default().trim().to_string());
        }
    }

    let columns = cells.into_iter().map(infer_column).collect();
    Ok(ResultTable {
        names,
        columns,
        renames: Vec::new(),
    })
}

fn infer_column(cells: Vec<String>) -> Column {
    if cells.iter().all(|c| c.parse::<i64>().is_ok()) {
        return Column::Int(cells.iter().map(|c| c.parse().unwrap()).collect());
    }
    if cells
        .iter()
        .all(|c| c.is_empty() || c.parse::<f64>().is_ok())
    {
        return Column::Float(
            cells
                .iter()
                .map(|c| c.parse().unwrap_or(f64::NAN))
                .collect(),
        );
    }
    Column::Text(cells)
}

/// Converts every text column whose values all end in `%` into a float
/// column of fractions. Already-numeric columns are untouched, so the pass
/// is idempotent.
pub fn convert_percentages(table: &mut ResultTable) {
    for (name, column) in table.names.iter().zip(&mut table.columns) {
        let Column::Text(cells) = column else {
            continue;
        };
        if cells.is_empty() || !cells.iter().all(|c| c.ends_with('%')) {
            continue;
        }
        match cells
            .iter()
            .map(|c| c.trim_end_matches('%').parse::<f64>())
            .collect::<std::result::Result<Vec<f64>, _>>()
        {
            Ok(values) => {
                *column = Column::Float(values.into_iter().map(|v| v / 100.0).collect());
                debug!("Converted {name} from percentage to float");
            }
            Err(_) => warn!("Cannot convert column {name} from percentage to float"),
        }
    }
}

/// Converts every text column of `left=right` cells. All-zero columns are
/// dropped; columns whose lefts are all equal collapse to the integer rights
/// and take a name derived from the shared left value; the rest become
/// (fraction, count) pairs. Idempotent: non-text columns are never touched.
pub fn convert_histograms(table: &mut ResultTable) {
    let mut dropped: Vec<usize> = Vec::new();

    for index in 0..table.columns.len() {
        let name = table.names[index].clone();
        let Column::Text(cells) = &table.columns[index] else {
            continue;
        };
        if cells.is_empty() || !cells.iter().all(|c| c.contains('=')) {
            continue;
        }

        let Some((lefts, rights)) = split_histogram(cells) else {
            warn!("Cannot convert column {name} from histogram");
            continue;
        };

        if lefts.iter().all(|&l| l == 0.0) && rights.iter().all(|&r| r == 0) {
            debug!("Dropped column {name}");
            dropped.push(index);
            continue;
        }

        if lefts.windows(2).all(|w| w[0] == w[1]) {
            let new_name = collapsed_name(&name, lefts[0]);
            if new_name != name && table.index_of(&new_name).is_none() {
                debug!("Converted {name} -> {new_name} from histogram to int");
                table.renames.push((new_name.clone(), name.clone()));
                table.names[index] = new_name;
            } else {
                debug!("Converted {name} from histogram to int");
            }
            table.columns[index] = Column::Int(rights);
        } else {
            debug!("Converted {name} from histogram to tuples");
            table.columns[index] = Column::Pairs(lefts.into_iter().zip(rights).collect());
        }
    }

    for index in dropped.into_iter().rev() {
        table.names.remove(index);
        table.columns.remove(index);
    }
}

/// Splits `left=right` cells into parsed sides. Lefts may be percentages
/// (converted to fractions) or plain floats; rights must be integers.
fn split_histogram(cells: &[String]) -> Option<(Vec<f64>, Vec<i64>)> {
    let mut lefts = Vec::with_capacity(cells.len());
    let mut rights = Vec::with_capacity(cells.len());
    let percentages = cells.iter().all(|c| {
        c.split_once('=')
            .map(|(l, _)| l.ends_with('%'))
            .unwrap_or(false)
    });

    for cell in cells {
        let (left, right) = cell.split_once('=')?;
        let left = if percentages {
            left.trim_end_matches('%').parse::<f64>().ok()? / 100.0
        } else {
            left.parse::<f64>().ok()?
        };
        lefts.push(left);
        rights.push(right.parse::<i64>().ok()?);
    }
    Some((lefts, rights))
}

/// Name for a collapsed histogram column: `read_clat_pct01` with shared
/// left 0.99 becomes `read_clat_99p`. Names without the `_pctNN` suffix
/// keep their base.
fn collapsed_name(name: &str, left: f64) -> String {
    let base = pct_base(name).unwrap_or(name);
    format!("{}_{}p", base, fmt_percent(left * 100.0))
}

/// Formats a percentage without float noise: 99.00000000000001 prints as
/// `99`, 99.5 as `99.5`.
fn fmt_percent(x: f64) -> String {
    let mut s = format!("{x:.6}");
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    s
}

fn pct_base(name: &str) -> Option<&str> {
    let base = name.strip_suffix(|c: char| c.is_ascii_digit())?;
    let base = base.strip_suffix(|c: char| c.is_ascii_digit())?;
    let base = base.strip_suffix("_pct")?;
    if base.is_empty() {
        None
    } else {
        Some(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(header: &str, rows: &[&str]) -> ResultTable {
        let mut text = String::from(header);
        text.push('\n');
        for row in rows {
            text.push_str(row);
            text.push('\n');
        }
        parse_results(&text).unwrap()
    }

    #[test]
    fn infers_int_float_and_text_columns() {
        let t = table("a;b;c", &["1;1.5;4k", "2;2.5;8k"]);
        assert_eq!(t.column("a"), Some(&Column::Int(vec![1, 2])));
        assert_eq!(t.column("b"), Some(&Column::Float(vec![1.5, 2.5])));
        assert_eq!(
            t.column("c"),
            Some(&Column::Text(vec!["4k".to_string(), "8k".to_string()]))
        );
    }

    #[test]
    fn percentage_columns_become_fractions() {
        let mut t = table("util", &["12.5%", "50%"]);
        convert_percentages(&mut t);
        assert_eq!(t.column("util"), Some(&Column::Float(vec![0.125, 0.5])));
    }

    #[test]
    fn percentage_pass_is_idempotent() {
        let mut t = table("util", &["12.5%", "50%"]);
        convert_percentages(&mut t);
        let first = t.clone();
        convert_percentages(&mut t);
        assert_eq!(t.columns, first.columns);
    }

    #[test]
    fn mixed_text_is_not_converted() {
        let mut t = table("note", &["12.5%", "n/a"]);
        convert_percentages(&mut t);
        assert!(matches!(t.column("note"), Some(Column::Text(_))));
    }

    #[test]
    fn histogram_with_shared_left_collapses_and_renames() {
        let mut t = table("read_clat_pct01", &["99%=504", "99%=612"]);
        convert_histograms(&mut t);
        assert_eq!(t.column("read_clat_99p"), Some(&Column::Int(vec![504, 612])));
        assert_eq!(
            t.renames,
            vec![("read_clat_99p".to_string(), "read_clat_pct01".to_string())]
        );
        // Semantics follow the original schema field
        assert_eq!(t.agg_semantics("read_clat_99p"), Some(AggKind::Sum));
    }

    #[test]
    fn histogram_with_zero_left_keeps_zero_name() {
        let mut t = table("read_clat_pct01", &["0.00%=5", "0.00%=5"]);
        convert_histograms(&mut t);
        assert_eq!(t.column("read_clat_0p"), Some(&Column::Int(vec![5, 5])));
    }

    #[test]
    fn all_zero_histogram_column_is_dropped() {
        let mut t = table("read_clat_pct20;read_iops", &["0%=0;100", "0%=0;200"]);
        convert_histograms(&mut t);
        assert_eq!(t.names, vec!["read_iops"]);
        assert_eq!(t.columns.len(), 1);
    }

    #[test]
    fn varying_lefts_become_pairs() {
        let mut t = table("read_clat_pct01", &["1%=5", "2%=7"]);
        convert_histograms(&mut t);
        assert_eq!(
            t.column("read_clat_pct01"),
            Some(&Column::Pairs(vec![(0.01, 5), (0.02, 7)]))
        );
    }

    #[test]
    fn histogram_pass_is_idempotent() {
        let mut t = table("read_clat_pct01;read_clat_pct02", &["99%=504;1%=5", "99%=612;2%=7"]);
        convert_histograms(&mut t);
        let first = t.clone();
        convert_histograms(&mut t);
        assert_eq!(t.columns, first.columns);
        assert_eq!(t.names, first.names);
    }

    #[test]
    fn existing_target_name_blocks_the_rename() {
        let mut t = table("read_clat_99p;read_clat_pct01", &["1;99%=504", "2;99%=612"]);
        convert_histograms(&mut t);
        // Collapses in place but keeps its original name
        assert_eq!(t.column("read_clat_pct01"), Some(&Column::Int(vec![504, 612])));
        assert!(t.renames.is_empty());
    }

    #[test]
    fn collapsed_names_format_like_printf_g() {
        assert_eq!(collapsed_name("read_clat_pct01", 0.99), "read_clat_99p");
        assert_eq!(collapsed_name("read_clat_pct05", 0.995), "read_clat_99.5p");
        assert_eq!(collapsed_name("read_clat_pct01", 0.0), "read_clat_0p");
        assert_eq!(collapsed_name("other", 0.5), "other_50p");
    }
}
