use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use chargelink::detect::{DomainEvent, FilePowerMeter, PowerMeter, StateDetector, StatusSource};
use chargelink::link::{DeviceLink, Incident};
use tracing::{info, warn};

use crate::cmd::{open_link, Context, MonitorArgs};
use crate::exit::{detect_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_event, print_incident};

const RECV_POLL: Duration = Duration::from_millis(200);

enum Printable {
    Event(DomainEvent),
    Incident(Incident),
}

pub fn run(args: MonitorArgs, ctx: &Context) -> CliResult<i32> {
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    // The monitor keeps retrying when the controller is absent at start.
    let link = open_link(ctx, false)?;
    let (tx, rx) = mpsc::channel();

    let incidents = tx.clone();
    link.set_incident_handler(move |incident| {
        let _ = incidents.send(Printable::Incident(incident.clone()));
    });

    let meter = args.meter_file.map(|path| {
        info!(path = %path.display(), "resume validation reads power from file");
        Arc::new(FilePowerMeter::new(path)) as Arc<dyn PowerMeter>
    });
    let source: Arc<dyn StatusSource> = link.clone();
    let detector = StateDetector::new(source, ctx.config.detector.clone(), meter)
        .map_err(|err| detect_error("detector setup failed", err))?;
    detector.register(move |event| {
        let _ = tx.send(Printable::Event(event.clone()));
    });
    detector
        .start()
        .map_err(|err| detect_error("detector start failed", err))?;

    let mut authorize_pending = args.authorize;
    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        if authorize_pending && detector.current_state().is_some() {
            authorize_pending = false;
            request_start(&link, &detector);
        }
        match rx.recv_timeout(RECV_POLL) {
            Ok(Printable::Event(event)) => {
                print_event(&event, ctx.format);
                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    break;
                }
            }
            Ok(Printable::Incident(incident)) => print_incident(&incident, ctx.format),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    detector.stop();
    link.stop();
    Ok(SUCCESS)
}

/// Authorize the session and, when the controller clears it, publish
/// `CHARGE_START_REQUESTED` on the detector's bus.
fn request_start(link: &DeviceLink, detector: &StateDetector) -> bool {
    if !link.send_authorization() {
        warn!("controller did not clear authorization");
        return false;
    }
    detector.record_start_request().is_some()
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
