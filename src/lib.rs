//! # cogni-living analytics daemon
//!
//! Analytics backend of the cogni-living smart-home cognition stack. The
//! parent host streams newline-delimited JSON commands over stdin; the
//! daemon maintains a set of long-lived analytic engines ("brains") and
//! answers with `[RESULT]`-prefixed envelopes on stdout.
//!
//! ## Architecture
//!
//! - [`brains`]: the analytic engines: graph, tracker, security, energy
//!   (with its PINN sub-component), health and the comfort miner
//! - [`dispatcher`]: command parsing, routing and response serialisation
//! - [`neural`]: the shared learning substrate (dense nets, scalers,
//!   isolation forest)
//! - [`infrastructure`]: model persistence and the shared room cache
//! - [`utils`]: configuration, errors, numeric helpers
//!
//! Engines are plain owned values behind the dispatcher; all mutation flows
//! through its single-threaded command loop, and each engine persists its
//! learned parameters through the [`infrastructure::ModelStore`] so a
//! restart resumes at the last converged state.

/// Analytic engines
pub mod brains;
/// Command parsing, routing, response envelopes
pub mod dispatcher;
/// Persistence and shared caches
pub mod infrastructure;
/// Learning substrate shared by the engines
pub mod neural;
/// Configuration, errors, numeric helpers
pub mod utils;

pub use dispatcher::{Command, Dispatcher, OutputLine};
pub use infrastructure::{ModelStore, RoomTemperatureCache};
pub use utils::{CogniError, CogniResult, DaemonConfig};
