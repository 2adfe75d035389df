use chargelink::frame::{AckFrame, MAX_AMPERAGE, MIN_AMPERAGE};
use chargelink::link::{DeviceLink, LinkError};
use serde::Serialize;

use crate::cmd::{open_link, Context, SetCurrentArgs};
use crate::exit::{link_error, CliResult, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Serialize)]
struct CommandOutput {
    command: &'static str,
    value: Option<i64>,
    acknowledged: bool,
    ack: Option<AckFrame>,
    queued_commands: usize,
}

pub fn authorize(ctx: &Context) -> CliResult<i32> {
    execute(ctx, "authorize", None, |link| {
        link.sender().send_authorization()?;
        Ok(true)
    })
}

pub fn set_current(args: SetCurrentArgs, ctx: &Context) -> CliResult<i32> {
    let amperage = args.amperage;
    // Reject before touching the port.
    if !(i64::from(MIN_AMPERAGE)..=i64::from(MAX_AMPERAGE)).contains(&amperage) {
        return Err(link_error("set-current", LinkError::InvalidAmperage(amperage)));
    }
    execute(ctx, "set-current", Some(amperage), |link| {
        link.sender().send_current_set(amperage)?;
        Ok(true)
    })
}

pub fn stop(ctx: &Context) -> CliResult<i32> {
    execute(ctx, "stop", None, |link| {
        link.sender().send_charge_stop()?;
        Ok(link.sender().config().stop_wait_for_ack)
    })
}

/// Connect, run one command and report. `send` returns whether an ACK was awaited.
fn execute<F>(
    ctx: &Context,
    command: &'static str,
    value: Option<i64>,
    send: F,
) -> CliResult<i32>
where
    F: FnOnce(&DeviceLink) -> Result<bool, LinkError>,
{
    let link = open_link(ctx, true)?;
    let result = send(&link);
    let out = CommandOutput {
        command,
        value,
        acknowledged: matches!(result, Ok(true)),
        ack: link.last_ack(),
        queued_commands: link.queued_commands(),
    };
    link.stop();

    result.map_err(|err| link_error(command, err))?;
    print_command(&out, ctx.format);
    Ok(SUCCESS)
}

fn print_command(out: &CommandOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table | OutputFormat::Pretty => {
            let value = out.value.map(|v| format!(" {v}A")).unwrap_or_default();
            let ack = match (&out.ack, out.acknowledged) {
                (Some(ack), true) => format!("acknowledged ({}={})", ack.command, ack.status),
                _ => "sent".to_string(),
            };
            println!("{}{}: {}", out.command, value, ack);
            if out.queued_commands > 0 {
                println!("{} command(s) still queued", out.queued_commands);
            }
        }
    }
}
