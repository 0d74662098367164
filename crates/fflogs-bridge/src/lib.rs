//! fflogs-bridge: drives the FFLogs parser bundle as a worker subprocess.
//!
//! The host writes pipelined commands to the worker's stdin, a drain task
//! decodes tagged events from its stdout, and a collector waits (with a
//! deadline) for the fight list and master info before the worker is torn
//! down.

pub mod bridge;
pub mod collector;
pub mod config;
mod drain;
pub mod image;
pub mod invocation;
pub mod outcome;
pub mod sequencer;
pub mod supervisor;

pub use bridge::protocol::{Command, CorrelationId, Event, Region, Request, SessionId};
pub use collector::{CollectionState, collect};
pub use config::BridgeConfig;
pub use image::{BundleFile, WorkerImageProvider};
pub use invocation::{InvocationRequest, read_log_lines, run_invocation, run_with_spawner};
pub use outcome::Outcome;
pub use supervisor::{LaunchError, RuntimeSpawner, Session, SessionError, WorkerSpawner};
