//! Reading export files into engine records.
//!
//! This is the ingestion collaborator the engine deliberately excludes:
//! column names are resolved to semantic roles here, against the caller's
//! explicit `--*-col` flags, and nowhere else. Rows with a missing or broken
//! timestamp cell still become records; dropping and counting them is the
//! normalizer's job, so the drop shows up in the report.

use anyhow::{Context, Result, bail};
use ct_core::RawRecord;

use crate::cli::{InputArgs, InputFormat};

/// Reads the input file into raw records per the caller's column mapping.
pub fn read_records(args: &InputArgs) -> Result<Vec<RawRecord>> {
    let content = std::fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;

    match args.format {
        InputFormat::Delimited => parse_delimited(&content, args),
        InputFormat::Jsonl => parse_jsonl(&content, args),
    }
}

/// Header-row delimited text (TSV/CSV).
fn parse_delimited(content: &str, args: &InputArgs) -> Result<Vec<RawRecord>> {
    let mut lines = content.lines().filter(|l| !l.trim().is_empty());

    let Some(header) = lines.next() else {
        bail!("{} is empty", args.file.display());
    };
    let headers: Vec<&str> = header.split(args.delimiter).map(str::trim).collect();

    let timestamp_idx = resolve_column(&headers, &args.timestamp_col)?;
    let unit_idx = args
        .unit_col
        .as_deref()
        .map(|c| resolve_column(&headers, c))
        .transpose()?;
    let group_idx = args
        .group_col
        .as_deref()
        .map(|c| resolve_column(&headers, c))
        .transpose()?;
    let actor_idx = args
        .actor_col
        .as_deref()
        .map(|c| resolve_column(&headers, c))
        .transpose()?;

    let cell = |fields: &[&str], idx: Option<usize>| -> Option<String> {
        idx.and_then(|i| fields.get(i))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    let records = lines
        .map(|line| {
            let fields: Vec<&str> = line.split(args.delimiter).collect();
            RawRecord {
                timestamp: cell(&fields, Some(timestamp_idx)).unwrap_or_default(),
                unit_id: cell(&fields, unit_idx),
                group_key: cell(&fields, group_idx),
                actor_key: cell(&fields, actor_idx),
            }
        })
        .collect();

    Ok(records)
}

/// One JSON object per line, keyed by column name.
fn parse_jsonl(content: &str, args: &InputArgs) -> Result<Vec<RawRecord>> {
    let field = |value: &serde_json::Value, col: Option<&str>| -> Option<String> {
        let value = value.get(col?)?;
        match value {
            serde_json::Value::String(s) => {
                let s = s.trim();
                (!s.is_empty()).then(|| s.to_string())
            }
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    };

    let mut records = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(line).with_context(|| {
            format!("{}:{}: invalid JSON", args.file.display(), line_no + 1)
        })?;

        records.push(RawRecord {
            timestamp: field(&value, Some(&args.timestamp_col)).unwrap_or_default(),
            unit_id: field(&value, args.unit_col.as_deref()),
            group_key: field(&value, args.group_col.as_deref()),
            actor_key: field(&value, args.actor_col.as_deref()),
        });
    }

    Ok(records)
}

/// Finds a named column, case-insensitively, or fails with the available
/// headers so the user can fix the flag.
fn resolve_column(headers: &[&str], name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case(name.trim()))
        .with_context(|| {
            format!(
                "column {name:?} not found; available columns: {}",
                headers.join(", ")
            )
        })
}
