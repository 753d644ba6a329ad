use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, warn};

use crate::error::Result;
use crate::logging::TIMESTAMP_FORMAT;

/// One correlated (start, stop) pair recovered from the batch log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub batchid: u64,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    /// Parameter mapping exactly as serialized in the events, in key order
    pub params: Vec<(String, String)>,
}

/// Parses the engine's correlation log into matched (start, stop) records.
///
/// Only lines with exactly five pipe-delimited fields participate. A stop
/// pairs with the start sharing its correlation id and identical serialized
/// parameters; anything unmatched is reported and excluded, so a
/// partially-logged job never yields a record.
pub fn read_log<R: BufRead>(reader: R) -> Result<Vec<LogRecord>> {
    let mut pending: Vec<(u64, String, DateTime<Utc>)> = Vec::new();
    let mut records = Vec::new();

    for line in reader.lines() {
        let line = line?;
        let fields: Vec<&str> = line.split('|').collect();
        if fields.len() != 5 {
            continue;
        }

        let Some(timestamp) = parse_timestamp(fields[0]) else {
            warn!("Unparseable timestamp \"{}\", skipping", fields[0]);
            continue;
        };
        let Some(batchid) = parse_batchid(fields[3]) else {
            warn!("Unparseable correlation id \"{}\", skipping", fields[3]);
            continue;
        };
        let params = fields[4].trim().to_string();

        match fields[2] {
            "start" => {
                if pending.iter().any(|(id, p, _)| *id == batchid && *p == params) {
                    warn!("Unexpected 'start' after {params}");
                    continue;
                }
                pending.push((batchid, params, timestamp));
            }
            "stop" => {
                match pending
                    .iter()
                    .position(|(id, p, _)| *id == batchid && *p == params)
                {
                    Some(i) => {
                        let (batchid, params, start) = pending.remove(i);
                        records.push(LogRecord {
                            batchid,
                            start,
                            stop: timestamp,
                            params: parse_params(&params),
                        });
                    }
                    None => warn!("Mismatched 'stop' line for {params}"),
                }
            }
            other => debug!("Unrecognized event \"{other}\", skipping"),
        }
    }

    for (batchid, params, _) in &pending {
        warn!("No 'stop' event for batchid={batchid} ({params}), job incomplete");
    }

    Ok(records)
}

/// Reads and correlates a log file from disk.
pub fn read_log_file<P: AsRef<Path>>(path: P) -> Result<Vec<LogRecord>> {
    read_log(BufReader::new(File::open(path)?))
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(text.trim(), TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

fn parse_batchid(field: &str) -> Option<u64> {
    field.strip_prefix("batchid=")?.trim().parse().ok()
}

fn parse_params(serialized: &str) -> Vec<(String, String)> {
    serialized
        .split(", ")
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}
