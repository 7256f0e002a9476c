use crate::config::GeneratorConfig;
use crate::host::{HostError, NetHost};
use crate::route::RouteError;
use crate::state::{RunState, SharedRunState, StopSignal};
use crate::template::{PacketTemplate, TemplateError};

use crossbeam_channel::Sender;
use thiserror::Error;

/// How the worker ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Stopped on request, after the template was freed
    Ok,
    /// Nothing was sent: the context, the route or the template could not be obtained
    StartupFailed,
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("cannot acquire the network context: {0}")]
    Context(#[from] HostError),
    #[error(transparent)]
    NoRoute(#[from] RouteError),
    #[error(transparent)]
    Allocation(#[from] TemplateError),
}

enum Phase<R> {
    Starting,
    Looping {
        template: PacketTemplate,
        route: R,
    },
    Draining {
        template: PacketTemplate,
        route: R,
    },
    Stopped(Result<(), StartupError>),
}

impl<R> Phase<R> {
    fn name(&self) -> &'static str {
        match self {
            Phase::Starting => "starting",
            Phase::Looping { .. } => "looping",
            Phase::Draining { .. } => "draining",
            Phase::Stopped(_) => "stopped",
        }
    }
}

/// The transmit worker: resolves the route, builds the template, then sends clones of it until
/// the stop signal is raised.
pub struct Engine<H: NetHost> {
    host: H,
    config: GeneratorConfig,
    stop: StopSignal,
    state: SharedRunState,
    ready: Option<Sender<Result<(), StartupError>>>,
}

impl<H: NetHost> Engine<H> {
    pub fn new(host: H, config: GeneratorConfig, stop: StopSignal, state: SharedRunState) -> Self {
        Engine {
            host,
            config,
            stop,
            state,
            ready: None,
        }
    }

    /// The startup outcome is sent once on `ready`, after the run state has been updated
    pub fn notify_ready(mut self, ready: Sender<Result<(), StartupError>>) -> Self {
        self.ready = Some(ready);
        self
    }

    fn report(&mut self, outcome: Result<(), StartupError>) {
        if let Some(ready) = self.ready.take() {
            // nobody may be waiting for it anymore
            let _ = ready.send(outcome);
        }
    }

    fn start_up(&mut self) -> Result<(PacketTemplate, H::Route), StartupError> {
        self.host.attach()?;
        let route = self
            .host
            .resolve_route(self.config.source, self.config.destination)?;
        let template = PacketTemplate::build(
            self.config.packet_length,
            self.config.source,
            self.config.destination,
            self.config.max_in_flight,
        )?;
        Ok((template, route))
    }

    /// Sends clones until the stop signal is raised.
    ///
    /// The signal is polled once per iteration: a clone already handed to the host is never
    /// recalled. A clone failure is retried right away, without limit.
    fn transmit_loop(&mut self, template: &PacketTemplate, route: &H::Route) {
        let mut failing = false;
        while !self.stop.is_raised() {
            match template.try_clone() {
                Ok(packet) => {
                    if failing {
                        log::debug!("Clone succeeded again");
                        failing = false;
                    }
                    self.host.transmit(packet, route);
                }
                Err(e) => {
                    if failing {
                        log::debug!("Failed to clone the packet: {e}");
                    } else {
                        log::warn!("Failed to clone the packet: {e}. Retry.");
                        failing = true;
                    }
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// Runs the worker until it stops.
    ///
    /// Phases: starting, then looping until the stop signal, then draining (the template is
    /// freed once the host released every clone), then stopped. Any startup failure goes
    /// straight to stopped and nothing is sent. The run state becomes `Running` only when the
    /// loop is about to start, and `Stopped` when the worker leaves.
    pub fn run(mut self) -> ExitStatus {
        let mut phase = Phase::Starting;
        loop {
            log::trace!("Engine phase: {}", phase.name());
            phase = match phase {
                Phase::Starting => match self.start_up() {
                    Ok((template, route)) => {
                        log::info!(
                            "Sending {} bytes packets from {} to {} through {route:?}",
                            self.config.packet_length,
                            self.config.source,
                            self.config.destination
                        );
                        self.state.set(RunState::Running);
                        self.report(Ok(()));
                        Phase::Looping { template, route }
                    }
                    Err(e) => {
                        log::error!("{e}");
                        Phase::Stopped(Err(e))
                    }
                },
                Phase::Looping { template, route } => {
                    self.transmit_loop(&template, &route);
                    log::debug!("Stop requested");
                    Phase::Draining { template, route }
                }
                Phase::Draining { template, route } => {
                    template.release();
                    drop(route);
                    Phase::Stopped(Ok(()))
                }
                Phase::Stopped(outcome) => {
                    self.state.set(RunState::Stopped);
                    return match outcome {
                        Ok(()) => ExitStatus::Ok,
                        Err(e) => {
                            self.report(Err(e));
                            ExitStatus::StartupFailed
                        }
                    };
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::PacketClone;
    use log::{Level, LevelFilter, Log, Metadata, Record};
    use std::net::Ipv4Addr;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    /// Keeps the levels of the clone failure messages logged by the engine
    struct CloneFailureLog(Mutex<Vec<Level>>);

    impl Log for CloneFailureLog {
        fn enabled(&self, _metadata: &Metadata) -> bool {
            true
        }

        fn log(&self, record: &Record) {
            if record.target() == "netdevgen::engine"
                && record.args().to_string().starts_with("Failed to clone")
            {
                self.0.lock().unwrap().push(record.level());
            }
        }

        fn flush(&self) {}
    }

    static CLONE_FAILURES: CloneFailureLog = CloneFailureLog(Mutex::new(Vec::new()));

    /// Never gives a clone back until the test empties `held`
    struct HoldingHost {
        held: Arc<Mutex<Vec<PacketClone>>>,
    }

    impl NetHost for HoldingHost {
        type Route = ();

        fn attach(&mut self) -> Result<(), HostError> {
            Ok(())
        }

        fn resolve_route(&mut self, _: Ipv4Addr, _: Ipv4Addr) -> Result<(), RouteError> {
            Ok(())
        }

        fn transmit(&mut self, packet: PacketClone, _route: &()) {
            self.held.lock().unwrap().push(packet);
        }
    }

    #[test]
    fn test_clone_retries_logged_at_debug() {
        log::set_logger(&CLONE_FAILURES).unwrap();
        log::set_max_level(LevelFilter::Debug);

        let held = Arc::new(Mutex::new(Vec::new()));
        let stop = StopSignal::default();
        let config = GeneratorConfig {
            max_in_flight: 2,
            ..GeneratorConfig::default()
        };
        let host = HoldingHost { held: held.clone() };
        let engine = Engine::new(host, config, stop.clone(), SharedRunState::default());
        let handle = thread::spawn(move || engine.run());

        let deadline = Instant::now() + Duration::from_secs(30);
        while CLONE_FAILURES.0.lock().unwrap().len() < 3 {
            assert!(Instant::now() < deadline, "no clone failure logged");
            thread::sleep(Duration::from_millis(1));
        }
        // stop before giving the clones back, so the failure streak is never interrupted
        stop.raise();
        while !handle.is_finished() {
            held.lock().unwrap().clear();
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(handle.join().unwrap(), ExitStatus::Ok);

        let levels = CLONE_FAILURES.0.lock().unwrap();
        assert_eq!(levels[0], Level::Warn);
        assert!(levels[1..].iter().all(|level| *level == Level::Debug));
    }
}
