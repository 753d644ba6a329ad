use std::collections::HashMap;
use std::io::Write;

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};

use crate::corrlog::LogRecord;
use crate::error::{BatchError, Result};
use crate::results::{Column, ResultTable};
use crate::schema::AggKind;
use crate::stats;
use crate::telemetry::Telemetry;

/// A cell of the joined/aggregated tables.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Time(DateTime<Utc>),
    Null,
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn to_csv(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) if f.is_nan() => String::new(),
            Value::Float(f) => f.to_string(),
            Value::Time(t) => t.format("%Y-%m-%d %H:%M:%S%.3f%:z").to_string(),
            Value::Null => String::new(),
        }
    }

    fn group_key(&self) -> String {
        self.to_csv()
    }
}

/// Row-oriented table with dynamic columns, written out as CSV.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub names: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut out = csv::Writer::from_writer(writer);
        out.write_record(&self.names)?;
        for row in &self.rows {
            out.write_record(row.iter().map(Value::to_csv))?;
        }
        out.flush()?;
        Ok(())
    }
}

/// Reconciliation settings.
#[derive(Debug, Clone)]
pub struct JoinConfig {
    /// Telemetry channel holding instantaneous power in watts
    pub power_channel: String,
}

impl Default for JoinConfig {
    fn default() -> Self {
        JoinConfig {
            power_channel: "Active Power".to_string(),
        }
    }
}

/// The joined table plus the key columns it was built around.
#[derive(Debug, Clone)]
pub struct Joined {
    pub table: Table,
    pub key_columns: Vec<String>,
}

/// Joins correlated log records against the telemetry stream and the result
/// table, producing one row per completed job.
pub fn reconcile(
    records: &[LogRecord],
    telemetry: &Telemetry,
    results: &ResultTable,
    config: &JoinConfig,
) -> Result<Joined> {
    let Some(first) = records.first() else {
        return Ok(Joined {
            table: Table::default(),
            key_columns: Vec::new(),
        });
    };

    let key_columns: Vec<String> = first.params.iter().map(|(k, _)| k.clone()).collect();

    let missing: Vec<&str> = key_columns
        .iter()
        .filter(|k| results.index_of(k).is_none())
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(BatchError::KeyMismatch(missing.join(", ")));
    }

    report_ramp_time(records);

    let collapsed = collapse_results(results, &key_columns);
    let power = telemetry.channel(&config.power_channel);
    if power.is_none() {
        warn!(
            "Telemetry channel \"{}\" not found, power means will be empty",
            config.power_channel
        );
    }

    let mut names = key_columns.clone();
    names.extend(
        ["batchid", "start", "stop", "duration", "num_samples", "watts_mean"]
            .map(str::to_string),
    );
    names.extend(collapsed.names.iter().cloned());
    names.extend(["iops", "bandwidth", "iopj", "bpj"].map(str::to_string));

    let metric = |collapsed_row: &[Value], name: &str| -> f64 {
        collapsed
            .names
            .iter()
            .position(|n| n == name)
            .and_then(|i| collapsed_row[i].as_f64())
            .unwrap_or(f64::NAN)
    };

    let mut rows = Vec::with_capacity(records.len());
    for record in records {
        let record_keys: Vec<&str> = record.params.iter().map(|(k, _)| k.as_str()).collect();
        if record_keys != key_columns.iter().map(String::as_str).collect::<Vec<_>>() {
            warn!(
                "Parameter keys of batchid={} differ from the run's key set, skipping",
                record.batchid
            );
            continue;
        }

        let key: Vec<String> = record.params.iter().map(|(_, v)| canon(v)).collect();
        let Some(metrics) = collapsed.groups.get(&key) else {
            warn!(
                "No result rows for batchid={} ({}), skipping",
                record.batchid,
                record
                    .params
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            continue;
        };

        // Ramp time shifts the window start; the tool warms up before
        // steady-state I/O is worth measuring
        let start = record.start + ramp_duration(record);
        let window = telemetry.window(start, record.stop);
        let watts_mean = match power {
            Some(channel) => {
                let samples: Vec<f64> = window.iter().map(|&i| channel[i]).collect();
                stats::mean(&samples)
            }
            None => f64::NAN,
        };

        let mut row: Vec<Value> = record.params.iter().map(|(_, v)| typed(v)).collect();
        row.push(Value::Int(record.batchid as i64));
        row.push(Value::Time(record.start));
        row.push(Value::Time(record.stop));
        row.push(Value::Float(
            (record.stop - record.start).num_milliseconds() as f64 / 1000.0,
        ));
        row.push(Value::Int(window.len() as i64));
        row.push(Value::Float(watts_mean));
        row.extend(metrics.iter().cloned());

        let iops = metric(metrics, "read_iops") + metric(metrics, "write_iops");
        let bandwidth =
            (metric(metrics, "read_bandwidth_kb") + metric(metrics, "write_bandwidth_kb")) * 1024.0;
        row.push(Value::Float(iops));
        row.push(Value::Float(bandwidth));
        row.push(Value::Float(iops / watts_mean));
        row.push(Value::Float(bandwidth / watts_mean));

        rows.push(row);
    }

    Ok(Joined {
        table: Table { names, rows },
        key_columns,
    })
}

/// Groups the joined table by every key column except `replicate` and
/// computes mean, median and sample standard deviation of each numeric
/// column, suffixed by the statistic name.
pub fn aggregate(joined: &Joined) -> Table {
    let group_keys: Vec<&String> = joined
        .key_columns
        .iter()
        .filter(|k| k.as_str() != "replicate")
        .collect();
    let group_indices: Vec<usize> = group_keys
        .iter()
        .filter_map(|k| joined.table.column_index(k))
        .collect();

    // A column takes part when at least one row holds a number and none
    // holds a string or timestamp
    let numeric_indices: Vec<usize> = (0..joined.table.names.len())
        .filter(|i| !group_indices.contains(i))
        .filter(|&i| {
            let mut any_number = false;
            for row in &joined.table.rows {
                match &row[i] {
                    Value::Int(_) | Value::Float(_) => any_number = true,
                    Value::Null => {}
                    _ => return false,
                }
            }
            any_number
        })
        .collect();

    let mut names: Vec<String> = group_keys.iter().map(|k| (*k).clone()).collect();
    for &i in &numeric_indices {
        for stat in ["mean", "median", "std"] {
            names.push(format!("{}__{}", joined.table.names[i], stat));
        }
    }

    let mut order: Vec<Vec<String>> = Vec::new();
    let mut groups: HashMap<Vec<String>, Vec<&Vec<Value>>> = HashMap::new();
    for row in &joined.table.rows {
        let key: Vec<String> = group_indices.iter().map(|&i| row[i].group_key()).collect();
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(row);
    }

    let mut rows = Vec::with_capacity(order.len());
    for key in order {
        let members = &groups[&key];
        let mut row: Vec<Value> = group_indices
            .iter()
            .map(|&i| members[0][i].clone())
            .collect();
        for &i in &numeric_indices {
            let values: Vec<f64> = members
                .iter()
                .map(|m| m[i].as_f64().unwrap_or(f64::NAN))
                .collect();
            row.push(Value::Float(stats::mean(&values)));
            row.push(Value::Float(stats::median(&values)));
            row.push(Value::Float(stats::std_dev(&values)));
        }
        rows.push(row);
    }

    Table { names, rows }
}

struct CollapsedResults {
    /// Metric column names, in result-table order
    names: Vec<String>,
    /// Canonical key tuple -> collapsed metric row
    groups: HashMap<Vec<String>, Vec<Value>>,
}

/// Collapses within-job multiplicity: result rows are grouped by the key
/// columns and each metric field is folded with its schema semantics.
fn collapse_results(results: &ResultTable, key_columns: &[String]) -> CollapsedResults {
    let key_indices: Vec<usize> = key_columns
        .iter()
        .filter_map(|k| results.index_of(k))
        .collect();

    let mut metric_columns: Vec<(usize, AggKind)> = Vec::new();
    let mut names = Vec::new();
    for (i, name) in results.names.iter().enumerate() {
        if key_indices.contains(&i) {
            continue;
        }
        if matches!(results.columns[i], Column::Pairs(_)) {
            debug!("Column {name} holds histogram pairs, not aggregated");
            continue;
        }
        match results.agg_semantics(name) {
            Some(kind) => {
                metric_columns.push((i, kind));
                names.push(name.clone());
            }
            None => debug!("Column {name} has no aggregation semantics, dropped"),
        }
    }

    let mut order: Vec<Vec<String>> = Vec::new();
    let mut row_groups: HashMap<Vec<String>, Vec<usize>> = HashMap::new();
    for row in 0..results.rows() {
        let key: Vec<String> = key_indices
            .iter()
            .map(|&i| canon(&results.columns[i].key_string(row)))
            .collect();
        if !row_groups.contains_key(&key) {
            order.push(key.clone());
        }
        row_groups.entry(key).or_default().push(row);
    }

    let mut groups = HashMap::with_capacity(order.len());
    for key in order {
        let members = &row_groups[&key];
        let collapsed: Vec<Value> = metric_columns
            .iter()
            .map(|&(i, kind)| fold_column(&results.names[i], &results.columns[i], members, kind))
            .collect();
        groups.insert(key, collapsed);
    }

    CollapsedResults { names, groups }
}

fn fold_column(name: &str, column: &Column, rows: &[usize], kind: AggKind) -> Value {
    match kind {
        AggKind::Same => {
            let first = column.key_string(rows[0]);
            if rows.iter().any(|&r| column.key_string(r) != first) {
                warn!("Expected same values, but found different values in {name}");
            }
            match column {
                Column::Int(v) => Value::Int(v[rows[0]]),
                Column::Float(v) => Value::Float(v[rows[0]]),
                _ => Value::Str(first),
            }
        }
        AggKind::Sum => match column {
            Column::Int(v) => Value::Int(rows.iter().map(|&r| v[r]).sum()),
            _ => numeric_fold(column, rows, |values| {
                stats::mean(values) * values.iter().filter(|v| !v.is_nan()).count() as f64
            }),
        },
        AggKind::Mean => numeric_fold(column, rows, stats::mean),
        AggKind::Min => match column {
            Column::Int(v) => Value::Int(rows.iter().map(|&r| v[r]).min().unwrap_or(0)),
            _ => numeric_fold(column, rows, |values| {
                values
                    .iter()
                    .copied()
                    .filter(|v| !v.is_nan())
                    .fold(f64::NAN, f64::min)
            }),
        },
        AggKind::Max => match column {
            Column::Int(v) => Value::Int(rows.iter().map(|&r| v[r]).max().unwrap_or(0)),
            _ => numeric_fold(column, rows, |values| {
                values
                    .iter()
                    .copied()
                    .filter(|v| !v.is_nan())
                    .fold(f64::NAN, f64::max)
            }),
        },
    }
}

fn numeric_fold(column: &Column, rows: &[usize], fold: impl Fn(&[f64]) -> f64) -> Value {
    let values: Vec<f64> = rows
        .iter()
        .map(|&r| column.as_f64(r).unwrap_or(f64::NAN))
        .collect();
    Value::Float(fold(&values))
}

fn report_ramp_time(records: &[LogRecord]) {
    let mut ramps: Vec<&str> = records
        .iter()
        .filter_map(|r| {
            r.params
                .iter()
                .find(|(k, _)| k == "ramp_time")
                .map(|(_, v)| v.as_str())
        })
        .collect();
    ramps.sort_unstable();
    ramps.dedup();
    if !ramps.is_empty() {
        info!("Using ramp_time of {} seconds", ramps.join(", "));
    }
}

fn ramp_duration(record: &LogRecord) -> Duration {
    let Some((_, raw)) = record.params.iter().find(|(k, _)| k == "ramp_time") else {
        return Duration::zero();
    };
    match raw.parse::<f64>() {
        Ok(seconds) => Duration::milliseconds((seconds * 1000.0).round() as i64),
        Err(_) => {
            warn!("Cannot parse ramp_time \"{raw}\", window start not adjusted");
            Duration::zero()
        }
    }
}

/// Canonical string form used to match log parameters against result cells:
/// integer-valued text collapses to the integer, float-valued text to the
/// float's shortest form.
fn canon(text: &str) -> String {
    let text = text.trim();
    if let Ok(i) = text.parse::<i64>() {
        return i.to_string();
    }
    if let Ok(f) = text.parse::<f64>() {
        return f.to_string();
    }
    text.to_string()
}

/// Typed value for a key cell of the joined table.
fn typed(text: &str) -> Value {
    if let Ok(i) = text.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = text.parse::<f64>() {
        return Value::Float(f);
    }
    Value::Str(text.to_string())
}
