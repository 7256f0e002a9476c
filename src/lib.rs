//! Minimal synthetic traffic generator: one IPv4 packet, one destination, sent in a loop
//! until stopped. The library is used by the binary netdevgen, but the engine can be driven
//! by any `NetHost` implementation.

/// Startup parameters
pub mod config;

/// Immutable packet template and its clones
pub mod template;

/// Route resolution through the Linux routing table
pub mod route;

/// Host network seam (context, route query, IP output)
pub mod host;

/// Run state and cooperative stop signal shared between the controller and the worker
pub mod state;

/// The transmit worker
pub mod engine;

/// Start and stop of the worker
pub mod lifecycle;

pub use config::GeneratorConfig;
pub use engine::{Engine, ExitStatus, StartupError};
pub use host::NetHost;
pub use lifecycle::{start, Worker};
pub use state::{RunState, SharedRunState, StopSignal};
pub use template::{PacketClone, PacketTemplate, TemplateWatch};
