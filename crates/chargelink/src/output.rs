use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use chargelink::detect::DomainEvent;
use chargelink::link::Incident;
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// One JSON document per line.
pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

pub fn print_event(event: &DomainEvent, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(event),
        OutputFormat::Table => {
            let mut table = new_table(vec!["EVENT", "FROM", "TO", "TIME"]);
            table.add_row(vec![
                event.kind.to_string(),
                format!("{} ({})", event.from_state_name, event.from_state.code()),
                format!("{} ({})", event.to_state_name, event.to_state.code()),
                unix_seconds(event.timestamp),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{} {} -> {} at {}",
                event.kind,
                event.from_state_name,
                event.to_state_name,
                unix_seconds(event.timestamp)
            );
        }
    }
}

#[derive(Serialize)]
struct IncidentOutput<'a> {
    incident: &'a Incident,
    timestamp: String,
}

pub fn print_incident(incident: &Incident, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&IncidentOutput {
            incident,
            timestamp: unix_seconds(incident.raised_at),
        }),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("incident {}: {}", incident.kind, incident.message);
        }
    }
}

pub fn unix_seconds(time: SystemTime) -> String {
    time.duration_since(UNIX_EPOCH)
        .map(|d| format!("{:.3}", d.as_secs_f64()))
        .unwrap_or_else(|_| "0".to_string())
}
