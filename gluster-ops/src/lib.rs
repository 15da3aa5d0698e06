//! Introspection of the gluster volumes backing heketi volumes.
//!
//! The [`adapter::Adapter`] hides whether gluster runs containerized or on bare-metal nodes.

pub mod adapter;
pub mod error;
pub mod models;
pub mod parse;

pub use adapter::{Adapter, Deployment, DeploymentKind, GlusterAdapter, PodOptions, RebalanceWait};
pub use error::Error;
