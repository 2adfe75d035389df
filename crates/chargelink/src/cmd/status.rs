use std::thread;
use std::time::{Duration, Instant};

use chargelink::frame::StatusFrame;
use chargelink::link::{ConnectionSnapshot, DeviceLink};
use serde::Serialize;

use crate::cmd::{open_link, parse_duration, Context, StatusArgs};
use crate::exit::{CliError, CliResult, SUCCESS, TIMEOUT};
use crate::output::{new_table, print_json, unix_seconds, OutputFormat};

const POLL: Duration = Duration::from_millis(50);

#[derive(Serialize)]
struct StatusOutput {
    connection: ConnectionSnapshot,
    queued_commands: usize,
    status: Option<StatusFrame>,
}

pub fn run(args: StatusArgs, ctx: &Context) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let link = open_link(ctx, true)?;

    let status = if args.wait {
        link.get_status_sync(timeout)
    } else {
        link.send_status_request();
        first_status(&link, ctx.config.detector.status_max_age(), timeout)
    };

    let out = StatusOutput {
        connection: link.connection(),
        queued_commands: link.queued_commands(),
        status,
    };
    link.stop();

    if args.wait && out.status.is_none() {
        return Err(CliError::new(
            TIMEOUT,
            format!("no status frame within {timeout:?}"),
        ));
    }
    print_status(&out, ctx.format);
    Ok(SUCCESS)
}

/// Whatever status shows up first, fresh or already buffered.
fn first_status(link: &DeviceLink, max_age: Duration, timeout: Duration) -> Option<StatusFrame> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(frame) = link.get_status(max_age) {
            return Some(frame);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }
        thread::sleep(POLL.min(remaining));
    }
}

fn print_status(out: &StatusOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let mut table = new_table(vec!["FIELD", "VALUE"]);
            table.add_row(vec![
                "port".to_string(),
                out.connection.port.clone().unwrap_or_else(|| "-".to_string()),
            ]);
            table.add_row(vec![
                "connected".to_string(),
                out.connection.connected.to_string(),
            ]);
            table.add_row(vec![
                "queued".to_string(),
                out.queued_commands.to_string(),
            ]);
            if let Some(status) = &out.status {
                table.add_row(vec![
                    "captured".to_string(),
                    unix_seconds(status.captured_at()),
                ]);
                for (key, value) in status.fields() {
                    table.add_row(vec![key.clone(), value.to_string()]);
                }
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("Link:");
            println!(
                "  Port:       {}",
                out.connection.port.as_deref().unwrap_or("-")
            );
            println!("  Connected:  {}", out.connection.connected);
            println!("  Queued:     {}", out.queued_commands);
            if let Some(error) = &out.connection.last_error {
                println!("  Last error: {error}");
            }
            match &out.status {
                Some(status) => {
                    println!(
                        "Status ({}):",
                        status.state_name().unwrap_or("UNKNOWN")
                    );
                    for (key, value) in status.fields() {
                        println!("  {key:<10}  {value}");
                    }
                }
                None => println!("Status:       unavailable"),
            }
        }
    }
}
