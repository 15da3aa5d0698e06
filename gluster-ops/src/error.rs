use snafu::Snafu;
use std::time::Duration;

/// All errors returned when introspecting gluster.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("No running gluster pod matching '{selector}' found from node {node}"))]
    NoPodFound { node: String, selector: String },
    #[snafu(display("Failed to {operation}. Error {source}"))]
    Exec {
        operation: String,
        source: utils::exec::ExecError,
    },
    #[snafu(display("Failed to {operation}, exit code {code}: {stderr}"))]
    CommandFailed {
        operation: String,
        code: i32,
        stderr: String,
    },
    #[snafu(display("Failed to parse the output of {operation}: {reason}"))]
    Parse { operation: String, reason: String },
    #[snafu(display("Volume {volume} not found"))]
    VolumeNotFound { volume: String },
    #[snafu(display(
        "Rebalance of volume {volume} still '{status}' after {timeout:?}"
    ))]
    RebalanceTimeout {
        volume: String,
        status: String,
        timeout: Duration,
    },
}
