use snafu::Snafu;
use std::time::Duration;

/// All errors returned by the heketi clients.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The request never reached heketi, or its response could not be read.
    #[snafu(display("Failed to {operation} at {url}. Error {source}"))]
    Transport {
        operation: String,
        url: String,
        source: reqwest::Error,
    },
    /// Heketi processed the request and rejected it.
    #[snafu(display("Heketi failed to {operation}: {reason}"))]
    Execution { operation: String, reason: String },
    /// Heketi refused the credentials or their permissions.
    #[snafu(display("Heketi denied the request to {operation}: {reason}"))]
    Unauthorized { operation: String, reason: String },
    #[snafu(display("Failed to decode the response to {operation}. Error {source}"))]
    Decode {
        operation: String,
        source: serde_json::Error,
    },
    #[snafu(display("Failed to sign the token to {operation}. Error {source}"))]
    Token {
        operation: String,
        source: jsonwebtoken::errors::Error,
    },
    #[snafu(display("Invalid heketi url {url}. Error {source}"))]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
    #[snafu(display("Failed to build the http client. Error {source}"))]
    HttpClient { source: reqwest::Error },
    #[snafu(display("Heketi did not complete the request to {operation} within {timeout:?}"))]
    OperationTimeout {
        operation: String,
        timeout: Duration,
    },
    #[snafu(display("Heketi replied to {operation} without a {header} header"))]
    MissingHeader { operation: String, header: String },
    #[snafu(display("Failed to run heketi-cli to {operation}. Error {source}"))]
    Exec {
        operation: String,
        source: utils::exec::ExecError,
    },
}

impl Error {
    /// Check whether heketi itself refused the operation, as opposed to heketi not being
    /// reachable or its reply not making sense.
    pub fn is_execution(&self) -> bool {
        matches!(self, Self::Execution { .. })
    }
}
