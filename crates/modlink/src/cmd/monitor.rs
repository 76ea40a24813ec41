use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use modlink_client::Connection;

use crate::cmd::{MonitorArgs, Target};
use crate::exit::{client_error, CliError, CliResult, SUCCESS};
use crate::output::{print_callback, OutputFormat};

const PUMP_INTERVAL: Duration = Duration::from_millis(250);

pub fn run(args: MonitorArgs, target: &Target, format: OutputFormat) -> CliResult<i32> {
    let connection = Connection::new();
    connection
        .connect(&target.host, target.port)
        .map_err(|err| client_error("connect failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let printed = Arc::new(AtomicUsize::new(0));
    register_printers(&connection, &args, &printed, format);

    // Pull-style dispatch keeps printing on the main thread so output order
    // matches delivery order.
    while running.load(Ordering::SeqCst) {
        connection.dispatch_callbacks(PUMP_INTERVAL);
        if let Some(count) = args.count {
            if printed.load(Ordering::SeqCst) >= count {
                break;
            }
        }
    }

    connection.disconnect();
    Ok(SUCCESS)
}

fn register_printers(
    connection: &Connection,
    args: &MonitorArgs,
    printed: &Arc<AtomicUsize>,
    format: OutputFormat,
) {
    let uid = args.uid;
    let ids: Vec<u8> = match &args.callbacks {
        Some(ids) => ids.clone(),
        None => (u8::MIN..=u8::MAX).collect(),
    };
    for callback_id in ids {
        let printed = printed.clone();
        connection.registry().register_callback(
            uid,
            callback_id,
            Arc::new(move |payload| {
                print_callback(uid, callback_id, payload.as_ref(), format);
                printed.fetch_add(1, Ordering::SeqCst);
            }),
        );
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
