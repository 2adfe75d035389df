use chargelink::transport::{select_port, PortDescriptor, PortProvider, SystemPorts};
use serde::Serialize;

use crate::cmd::{Context, PortsArgs};
use crate::exit::{transport_error, CliResult, SUCCESS};
use crate::output::{new_table, print_json, OutputFormat};

#[derive(Serialize)]
struct PortOutput<'a> {
    name: &'a str,
    kind: String,
    manufacturer: Option<&'a str>,
    product: Option<&'a str>,
    selected: bool,
}

#[derive(Serialize)]
struct PortsOutput<'a> {
    configured: Option<&'a str>,
    ports: Vec<PortOutput<'a>>,
}

pub fn run(_args: PortsArgs, ctx: &Context) -> CliResult<i32> {
    let ports = SystemPorts
        .list()
        .map_err(|err| transport_error("port enumeration failed", err))?;
    let serial = &ctx.config.link.serial;
    let selected = selected_name(&ports, serial.port.as_deref(), &serial.port_keywords);

    let out = PortsOutput {
        configured: serial.port.as_deref(),
        ports: ports
            .iter()
            .map(|port| PortOutput {
                name: &port.name,
                kind: port.kind.to_string(),
                manufacturer: port.manufacturer.as_deref(),
                product: port.product.as_deref(),
                selected: selected == Some(port.name.as_str()),
            })
            .collect(),
    };
    print_ports(&out, ctx.format);
    Ok(SUCCESS)
}

/// The port a connect would use: the configured one, else the first keyword match.
fn selected_name<'a>(
    ports: &'a [PortDescriptor],
    configured: Option<&'a str>,
    keywords: &[String],
) -> Option<&'a str> {
    configured.or_else(|| select_port(ports, keywords).map(|port| port.name.as_str()))
}

fn print_ports(out: &PortsOutput<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let mut table = new_table(vec!["", "PORT", "KIND", "MANUFACTURER", "PRODUCT"]);
            for port in &out.ports {
                table.add_row(vec![
                    if port.selected { "*" } else { "" }.to_string(),
                    port.name.to_string(),
                    port.kind.clone(),
                    port.manufacturer.unwrap_or("-").to_string(),
                    port.product.unwrap_or("-").to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            if out.ports.is_empty() {
                println!("no serial ports found");
            }
            for port in &out.ports {
                println!(
                    "{} {} ({}){}",
                    if port.selected { "*" } else { " " },
                    port.name,
                    port.kind,
                    port.product
                        .map(|product| format!(" {product}"))
                        .unwrap_or_default()
                );
            }
        }
    }
}
