//! SSH job gateway: sessions, dispatch and remote execution.
//!
//! This module is organized into the following submodules:
//!
//! - `types`: Credential record and wire message types
//! - `error`: Error taxonomy and SSH failure classification
//! - `config`: Configuration file loading and environment resolution
//! - `storage`: Session registry enforcing one session per target address
//! - `session`: russh client handler and host key policy
//! - `auth`: Password and keyboard-interactive authentication
//! - `client`: russh dialing, exec, jump tunnels and SFTP
//! - `connection`: Per-job connection handler
//! - `jobs`: Built-in job table
//! - `router`: Protocol state machine
//! - `logging`: Tracing layer forwarding logs to clients
//! - `transport`: WebSocket endpoint
//! - `remote`: Client library (feature `client`)

pub(crate) mod auth;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod jobs;
pub mod logging;
#[cfg(feature = "client")]
pub mod remote;
pub mod router;
pub mod session;
pub mod storage;
pub mod transport;
pub mod types;

pub use error::GatewayError;
pub use router::DispatchRouter;
