//! Clients for the heketi volume orchestration service.
//!
//! Two transports implement the same [`Orchestrator`] operations: [`RestClient`] talks to the
//! heketi REST api directly, [`CliClient`] drives `heketi-cli` on the control node.

pub mod cli;
pub mod error;
pub mod models;
pub mod operations;
pub mod rest;

pub use cli::CliClient;
pub use error::Error;
pub use operations::{OrchResult, Orchestrator, StateToggle};
pub use rest::{Credentials, RestClient};
