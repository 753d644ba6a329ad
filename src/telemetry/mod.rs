use std::fs;
use std::path::Path;

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, Utc};
use log::{debug, warn};

use crate::error::{BatchError, Result};

/// Timestamp layouts emitted by the power logger's CSV export.
const TIME_FORMATS: [&str; 5] = [
    "%m/%d/%y %I:%M:%S %p",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%y %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

/// Time-ordered power samples. Channels are column-oriented; a cell that did
/// not parse is NaN so gaps stay visible without breaking alignment.
#[derive(Debug, Clone)]
pub struct Telemetry {
    pub times: Vec<DateTime<Utc>>,
    pub channels: Vec<(String, Vec<f64>)>,
}

impl Telemetry {
    pub fn channel(&self, name: &str) -> Option<&[f64]> {
        self.channels
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.as_slice())
    }

    /// Indices of samples within the half-open window [start, stop).
    pub fn window(&self, start: DateTime<Utc>, stop: DateTime<Utc>) -> Vec<usize> {
        self.times
            .iter()
            .enumerate()
            .filter(|(_, &t)| t >= start && t < stop)
            .map(|(i, _)| i)
            .collect()
    }

    /// Shifts every timestamp by the given clock-skew correction.
    pub fn shift(&mut self, seconds: f64) {
        let delta = Duration::milliseconds((seconds * 1000.0).round() as i64);
        for t in &mut self.times {
            *t += delta;
        }
    }
}

/// Reads a power-telemetry CSV from disk.
pub fn read_telemetry<P: AsRef<Path>>(path: P, shift_seconds: Option<f64>) -> Result<Telemetry> {
    parse_telemetry(&fs::read_to_string(path)?, shift_seconds)
}

/// Parses a power-telemetry CSV: a title line, then a header row naming a
/// `Date Time, GMT<offset>` column plus channel columns, then samples.
/// Channel names are cut at their first comma (dropping serial numbers);
/// timestamps are converted to UTC via the offset embedded in the header.
pub fn parse_telemetry(text: &str, shift_seconds: Option<f64>) -> Result<Telemetry> {
    // First line is a plot title, not part of the table
    let body = match text.split_once('\n') {
        Some((_, rest)) => rest,
        None => text,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(body.as_bytes());

    let headers = reader.headers()?.clone();
    let time_index = headers
        .iter()
        .position(|h| h.trim().starts_with("Date Time"))
        .ok_or_else(|| {
            BatchError::Telemetry(format!(
                "no \"Date Time\" column found, headers are: {}",
                headers.iter().collect::<Vec<_>>().join(", ")
            ))
        })?;

    let offset = header_offset(headers.iter().nth(time_index).unwrap_or_default());
    debug!("Telemetry time zone offset: {offset}");

    let mut channels: Vec<(usize, String)> = Vec::new();
    for (i, header) in headers.iter().enumerate() {
        let name = header.split(',').next().unwrap_or(header).trim();
        if i == time_index || name == "#" || name.is_empty() {
            continue;
        }
        channels.push((i, name.to_string()));
    }

    let mut times = Vec::new();
    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); channels.len()];
    for record in reader.records() {
        let record = record?;
        let Some(raw_time) = record.get(time_index) else {
            continue;
        };
        let Some(time) = parse_time(raw_time, offset) else {
            warn!("Unparseable telemetry timestamp \"{raw_time}\", skipping sample");
            continue;
        };
        times.push(time);
        for (column, (index, _)) in columns.iter_mut().zip(&channels) {
            let value = record
                .get(*index)
                .and_then(|cell| cell.trim().parse::<f64>().ok())
                .unwrap_or(f64::NAN);
            column.push(value);
        }
    }

    let mut telemetry = Telemetry {
        times,
        channels: channels
            .into_iter()
            .map(|(_, name)| name)
            .zip(columns)
            .collect(),
    };
    if let Some(seconds) = shift_seconds {
        telemetry.shift(seconds);
    }
    Ok(telemetry)
}

/// Extracts the fixed offset from a `Date Time, GMT-07:00` style header.
/// A header without a timezone token means no offset.
fn header_offset(header: &str) -> FixedOffset {
    let utc = FixedOffset::east_opt(0).unwrap();
    let Some(token) = header.split(", ").nth(1) else {
        return utc;
    };
    let token = token.trim().trim_start_matches("GMT");
    parse_offset(token).unwrap_or_else(|| {
        warn!("Unrecognized timezone token \"{token}\", assuming UTC");
        utc
    })
}

fn parse_offset(token: &str) -> Option<FixedOffset> {
    let (sign, rest) = match token.as_bytes().first()? {
        b'+' => (1, &token[1..]),
        b'-' => (-1, &token[1..]),
        _ => (1, token),
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h.parse::<i32>().ok()?, m.parse::<i32>().ok()?),
        None => (rest.parse::<i32>().ok()?, 0),
    };
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn parse_time(text: &str, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let text = text.trim();
    for format in TIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            let local = naive.and_local_timezone(offset).single()?;
            return Some(local.with_timezone(&Utc));
        }
    }
    None
}
