/// Various common constants used by the functional suite.

/// Default heketi REST endpoint.
pub const DEFAULT_HEKETI_URL: &str = "http://localhost:8080";

/// Default heketi admin user.
pub const DEFAULT_HEKETI_USER: &str = "admin";

/// Default heketi command line client binary.
pub const DEFAULT_HEKETI_CLI: &str = "heketi-cli";

/// Default timeout for a single heketi request, including the wait for an
/// asynchronous operation to leave the queue.
pub const DEFAULT_REQ_TIMEOUT: &str = "120s";

/// Interval at which a pending heketi operation is polled.
pub const DEFAULT_QUEUE_POLL_PERIOD: &str = "1s";

/// Lifetime of the json web tokens handed to heketi.
pub const HEKETI_TOKEN_TTL_SECS: i64 = 600;

/// Default timeout for a rebalance to complete.
pub const DEFAULT_REBALANCE_TIMEOUT: &str = "300s";

/// Interval at which the rebalance status is polled.
pub const DEFAULT_REBALANCE_POLL_PERIOD: &str = "5s";

/// Default cluster client used to reach the gluster pods.
pub const DEFAULT_CLUSTER_CLI: &str = "oc";

/// Label selector of the glusterfs server pods.
pub const DEFAULT_GLUSTER_POD_SELECTOR: &str = "glusterfs=storage-pod";

/// Replica count used by every volume the suite creates.
pub const REPLICA_COUNT: usize = 3;

/// Environment variable which points to the functional suite configuration.
pub const CONFIG_ENV: &str = "HEKETI_FUNCTIONAL_CONFIG";

/// Log filter applied on top of `RUST_LOG` to keep noisy dependencies quiet.
pub const RUST_LOG_SILENCE_DEFAULTS: &str =
    "h2=info,hyper=info,reqwest=info,rustls=info,tokio_util=info,want=info,mio=info";
