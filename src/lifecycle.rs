use crate::config::GeneratorConfig;
use crate::engine::{Engine, ExitStatus, StartupError};
use crate::host::NetHost;
use crate::state::{RunState, SharedRunState, StopSignal};

use crossbeam_channel::{bounded, Receiver};
use std::io;
use std::thread::{self, JoinHandle};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to run the generator thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("the generator failed to start: {0}")]
    Startup(#[from] StartupError),
    #[error("the generator thread ended without reporting its startup")]
    WorkerLost,
}

/// Spawns the transmit worker.
///
/// Returns as soon as the thread exists: the startup (route, template) happens in the worker.
/// Use `Worker::wait_ready` to learn whether it succeeded.
pub fn start<H: NetHost>(config: GeneratorConfig, host: H) -> Result<Worker, Error> {
    log::info!("Start generator thread");
    let stop = StopSignal::default();
    let state = SharedRunState::default();
    let (tx_ready, rx_ready) = bounded(1);

    let engine = Engine::new(host, config, stop.clone(), state.clone()).notify_ready(tx_ready);
    let builder = thread::Builder::new().name("netdevgen".into());
    let handle = builder
        .spawn(move || engine.run())
        .map_err(|e| {
            log::error!("Failed to run the generator thread");
            Error::Spawn(e)
        })?;
    log::info!("Generator loaded");

    Ok(Worker {
        handle: Some(handle),
        stop,
        state,
        ready: Some(rx_ready),
        started: false,
    })
}

/// Handle on the running worker. Dropping it stops the worker.
pub struct Worker {
    handle: Option<JoinHandle<ExitStatus>>,
    stop: StopSignal,
    state: SharedRunState,
    ready: Option<Receiver<Result<(), StartupError>>>,
    started: bool,
}

impl Worker {
    pub fn run_state(&self) -> RunState {
        self.state.get()
    }

    /// Blocks until the worker either started looping or gave up.
    ///
    /// The startup error is returned once; later calls return `WorkerLost`.
    pub fn wait_ready(&mut self) -> Result<(), Error> {
        match self.ready.take() {
            Some(rx_ready) => match rx_ready.recv() {
                Ok(Ok(())) => {
                    self.started = true;
                    Ok(())
                }
                Ok(Err(e)) => Err(Error::Startup(e)),
                Err(_) => Err(Error::WorkerLost),
            },
            None if self.started => Ok(()),
            None => Err(Error::WorkerLost),
        }
    }

    /// Asks the worker to stop and waits until it has freed the template.
    ///
    /// Stopping a worker that already ended is not an error. Returns the exit status the first
    /// time, `None` afterwards or if the worker panicked. There is no timeout.
    pub fn stop(&mut self) -> Option<ExitStatus> {
        let Some(handle) = self.handle.take() else {
            log::debug!("Generator thread already joined");
            return None;
        };
        match self.state.get() {
            RunState::Running => {
                log::debug!("Stopping the generator thread");
                self.stop.raise();
            }
            RunState::NotStarted => {
                // still starting: the worker checks the signal before its first transmission
                self.stop.raise();
            }
            RunState::Stopped => log::info!("Generator thread is already done"),
        }
        let status = match handle.join() {
            Ok(status) => Some(status),
            Err(_) => {
                log::error!("Generator thread panicked");
                None
            }
        };
        log::info!("Generator unloaded");
        status
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}
