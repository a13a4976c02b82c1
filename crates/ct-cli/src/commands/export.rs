//! The `export` subcommand: write the work-classified clean subset as CSV.

use anyhow::{Context, Result};
use ct_core::{Event, Pipeline};

use crate::cli::{EngineArgs, InputArgs};
use crate::commands::ingest;
use crate::config::Config;

/// Runs the export subcommand. The clean subset goes to stdout so it can be
/// piped straight into the next tool.
pub fn run(input: &InputArgs, engine: &EngineArgs, config: Config) -> Result<()> {
    let config = config.merged(engine);
    let records = ingest::read_records(input)?;

    let pipeline = Pipeline::new(config.pipeline_config());
    let report = pipeline
        .analyze(&records)
        .with_context(|| format!("cannot analyze {}", input.file.display()))?;

    tracing::info!(
        clean = report.clean_events.len(),
        total = report.counts.events,
        "exporting work-classified events"
    );

    print!("{}", render_csv(&report.clean_events));
    Ok(())
}

/// CSV rendering with minimal quoting.
fn render_csv(events: &[Event]) -> String {
    let mut out = String::from("timestamp,unit_id,group_key,actor_key\n");
    for event in events {
        let fields = [
            event.timestamp.to_rfc3339(),
            event
                .unit_id
                .as_ref()
                .map(|u| u.as_str().to_string())
                .unwrap_or_default(),
            event
                .group_key
                .as_ref()
                .map(|g| g.as_str().to_string())
                .unwrap_or_default(),
            event.actor_key.clone().unwrap_or_default(),
        ];
        let row: Vec<String> = fields.iter().map(|f| quote_csv(f)).collect();
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

/// Quotes a field only when it contains a delimiter, quote, or newline.
fn quote_csv(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use ct_core::{GroupKey, UnitId};

    use super::*;

    fn event(minute: u32, unit: Option<&str>, group: Option<&str>) -> Event {
        Event {
            timestamp: Utc
                .with_ymd_and_hms(2025, 3, 1, 8, minute, 0)
                .single()
                .expect("valid test timestamp"),
            unit_id: unit.map(|u| UnitId::new(u).unwrap()),
            group_key: group.map(|g| GroupKey::new(g).unwrap()),
            actor_key: None,
        }
    }

    #[test]
    fn renders_header_and_rows() {
        let events = vec![
            event(0, Some("SN-1"), Some("ICT")),
            event(1, Some("SN-2"), Some("ICT")),
        ];

        let csv = render_csv(&events);
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "timestamp,unit_id,group_key,actor_key");
        assert!(lines[1].starts_with("2025-03-01T08:00:00"));
        assert!(lines[1].contains("SN-1"));
        assert!(lines[2].contains("SN-2"));
    }

    #[test]
    fn absent_optional_fields_are_empty_cells() {
        let csv = render_csv(&[event(0, None, None)]);
        let row = csv.lines().nth(1).unwrap();

        assert!(row.ends_with(",,,"));
    }

    #[test]
    fn fields_with_delimiters_are_quoted() {
        assert_eq!(quote_csv("plain"), "plain");
        assert_eq!(quote_csv("a,b"), "\"a,b\"");
        assert_eq!(quote_csv("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
