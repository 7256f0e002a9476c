use netdevgen::engine::ExitStatus;
use netdevgen::host::RawSocketHost;
use netdevgen::route;
use netdevgen::{GeneratorConfig, PacketTemplate};
mod cmd;

use std::fmt::Write;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use crossbeam_channel::bounded;

/// The entry point of the application.
///
/// `run` plays the role of loading the generator (start) and unloading it (stop) on Ctrl-C or
/// when the duration elapsed.
fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = cmd::Args::parse();

    match args.command {
        cmd::Command::Run {
            packet,
            max_in_flight,
            duration,
        } => {
            let mut config = packet.load()?;
            if let Some(max_in_flight) = max_in_flight {
                config.max_in_flight = max_in_flight;
            }
            config.validate()?;
            let duration = duration
                .map(|d| humantime::parse_duration(&d))
                .transpose()
                .context("Duration could not be parsed")?;
            if let Some(d) = duration {
                log::info!("Generating for {d:?}");
            }
            run(config, duration)
        }
        cmd::Command::Template { packet } => {
            let config = packet.load()?;
            let template = PacketTemplate::build(
                config.packet_length,
                config.source,
                config.destination,
                config.max_in_flight,
            )?;
            print!("{}", hex_dump(template.as_bytes()));
            Ok(())
        }
        cmd::Command::Route { packet } => {
            let config = packet.load()?;
            let route = route::resolve(config.source, config.destination)?;
            println!("{route}");
            Ok(())
        }
    }
}

/// Starts the worker, waits for a stop request, then stops the worker.
///
/// A startup failure (no privilege, no route) is reported as an error instead of leaving an
/// idle generator behind.
fn run(config: GeneratorConfig, duration: Option<Duration>) -> anyhow::Result<()> {
    let host = RawSocketHost::new(config.socket_buffer);
    let mut worker = netdevgen::start(config, host)?;
    worker.wait_ready()?;

    // Handle ctrl+C
    let (tx_stop, rx_stop) = bounded::<()>(1);
    let interrupted = Arc::new(AtomicBool::new(false));
    let i = interrupted.clone();
    ctrlc::set_handler(move || {
        if !i.swap(true, Ordering::Relaxed) {
            log::warn!("Ending the generation, please wait");
            let _ = tx_stop.try_send(());
        } else {
            log::warn!("Ending immediately");
            process::abort();
        }
    })
    .context("Error setting Ctrl-C handler")?;

    // either a message or a timeout: both mean stop
    let _ = match duration {
        Some(d) => rx_stop.recv_timeout(d).ok(),
        None => rx_stop.recv().ok(),
    };

    match worker.stop() {
        Some(ExitStatus::Ok) => Ok(()),
        Some(ExitStatus::StartupFailed) => bail!("The generator failed to start"),
        None => bail!("The generator thread panicked"),
    }
}

/// 16 bytes per line, space-separated
fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for line in bytes.chunks(16) {
        let line: Vec<String> = line.iter().map(|b| format!("{b:02x}")).collect();
        let _ = writeln!(out, "{}", line.join(" "));
    }
    out
}
