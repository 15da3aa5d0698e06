//! Heketi REST transport.
//!
//! Requests are authenticated with a json web token signed with the user's secret. The token is
//! bound to a single method and path through its `qsh` claim, which is why redirects are never
//! followed by the http client: each hop of an asynchronous operation is signed separately.
//!
//! Mutating requests are asynchronous: heketi replies `202 Accepted` with the location of a queue
//! entry, which replies `200` while the operation is pending, `303 See Other` pointing at the
//! resulting resource or `204 No Content` once it completes, and an error status if it failed.

use crate::{
    error::{
        DecodeSnafu, Error, ExecutionSnafu, HttpClientSnafu, InvalidUrlSnafu, MissingHeaderSnafu,
        OperationTimeoutSnafu, TokenSnafu, TransportSnafu, UnauthorizedSnafu,
    },
    models::{
        ClusterInfo, ClusterList, DeviceAddRequest, DeviceInfo, EntryState, NodeId, NodeInfo,
        StateRequest, VolumeCreateRequest, VolumeExpandRequest, VolumeId, VolumeInfo, VolumeList,
    },
    operations::{OrchResult, Orchestrator},
};
use async_trait::async_trait;
use reqwest::{header, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use snafu::ResultExt;
use std::time::Duration;
use url::Url;

/// Heketi user and its secret key.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("secret", &utils::exec::REDACTED)
            .finish()
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub(crate) struct Claims {
    pub(crate) iss: String,
    pub(crate) iat: i64,
    pub(crate) exp: i64,
    pub(crate) qsh: String,
}

/// Hash binding a token to a single request.
pub(crate) fn query_hash(method: &Method, path: &str) -> String {
    hex::encode(Sha256::digest(format!("{}&{}", method.as_str(), path)))
}

/// How a request ended.
#[derive(Debug)]
enum Completion {
    /// Completed, nothing to fetch.
    Done,
    /// Completed, the result lives at this location.
    Location(Url),
    /// Completed synchronously with this body.
    Body(String),
}

/// Heketi REST client.
#[derive(Debug, Clone)]
pub struct RestClient {
    base: Url,
    client: reqwest::Client,
    credentials: Option<Credentials>,
    timeout: Duration,
    poll_period: Duration,
}

impl RestClient {
    /// Create new Rest Client for the heketi server at `url`.
    /// `timeout` bounds each operation, including the wait on the operation queue.
    pub fn new(url: &str, credentials: Option<Credentials>, timeout: Duration) -> Result<Self, Error> {
        let base = Url::parse(url).context(InvalidUrlSnafu { url })?;
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()
            .context(HttpClientSnafu)?;
        let poll_period = humantime::parse_duration(utils::DEFAULT_QUEUE_POLL_PERIOD)
            .unwrap_or(Duration::from_secs(1));
        Ok(Self {
            base,
            client,
            credentials,
            timeout,
            poll_period,
        })
    }

    /// Specify the period at which pending operations are polled.
    pub fn with_poll_period(self, poll_period: Duration) -> Self {
        Self {
            poll_period,
            ..self
        }
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        self.base.join(path).context(InvalidUrlSnafu { url: path })
    }

    fn token(&self, method: &Method, url: &Url, operation: &str) -> Result<Option<String>, Error> {
        let Some(credentials) = &self.credentials else {
            return Ok(None);
        };
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            iss: credentials.user.clone(),
            iat: now,
            exp: now + utils::HEKETI_TOKEN_TTL_SECS,
            qsh: query_hash(method, url.path()),
        };
        jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(credentials.secret.as_bytes()),
        )
        .map(Some)
        .context(TokenSnafu { operation })
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&serde_json::Value>,
        operation: &str,
    ) -> Result<Response, Error> {
        tracing::trace!(%method, %url, "Sending heketi request");
        let mut request = self.client.request(method.clone(), url.clone());
        if let Some(token) = self.token(&method, &url, operation)? {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        request.send().await.context(TransportSnafu {
            operation,
            url: url.to_string(),
        })
    }

    /// Turn an unexpected reply into an error carrying heketi's message.
    /// Authentication and permission failures are not execution errors.
    async fn rejected(response: Response, operation: &str) -> Error {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let reason = format!("{status}: {}", body.trim());
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                UnauthorizedSnafu { operation, reason }.build()
            }
            _ => ExecutionSnafu { operation, reason }.build(),
        }
    }

    fn location(&self, response: &Response, operation: &str) -> Result<Url, Error> {
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                MissingHeaderSnafu {
                    operation,
                    header: header::LOCATION.as_str(),
                }
                .build()
            })?;
        self.base
            .join(location)
            .context(InvalidUrlSnafu { url: location })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, operation: &str) -> Result<T, Error> {
        let response = self.send(Method::GET, url.clone(), None, operation).await?;
        if response.status() != StatusCode::OK {
            return Err(Self::rejected(response, operation).await);
        }
        let body = response.text().await.context(TransportSnafu {
            operation,
            url: url.to_string(),
        })?;
        serde_json::from_str(&body).context(DecodeSnafu { operation })
    }

    async fn submit(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        operation: &str,
    ) -> Result<Completion, Error> {
        let url = self.url(path)?;
        let response = self.send(method, url.clone(), body.as_ref(), operation).await?;
        match response.status() {
            StatusCode::ACCEPTED => {
                let queue = self.location(&response, operation)?;
                self.wait(queue, operation).await
            }
            StatusCode::OK | StatusCode::CREATED => {
                let body = response.text().await.context(TransportSnafu {
                    operation,
                    url: url.to_string(),
                })?;
                Ok(Completion::Body(body))
            }
            StatusCode::NO_CONTENT => Ok(Completion::Done),
            StatusCode::SEE_OTHER => Ok(Completion::Location(self.location(&response, operation)?)),
            _ => Err(Self::rejected(response, operation).await),
        }
    }

    /// Poll the queue entry of an asynchronous operation until it completes.
    async fn wait(&self, queue: Url, operation: &str) -> Result<Completion, Error> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            let response = self
                .send(Method::GET, queue.clone(), None, operation)
                .await?;
            match response.status() {
                StatusCode::OK => {
                    tracing::trace!(%queue, "Heketi operation pending");
                }
                StatusCode::NO_CONTENT => return Ok(Completion::Done),
                StatusCode::SEE_OTHER => {
                    return Ok(Completion::Location(self.location(&response, operation)?))
                }
                _ => return Err(Self::rejected(response, operation).await),
            }
            if tokio::time::Instant::now() + self.poll_period > deadline {
                return OperationTimeoutSnafu {
                    operation,
                    timeout: self.timeout,
                }
                .fail();
            }
            tokio::time::sleep(self.poll_period).await;
        }
    }

    /// Fetch the resource an operation completed with.
    async fn resolve<T: DeserializeOwned>(
        &self,
        completion: Completion,
        operation: &str,
    ) -> Result<T, Error> {
        match completion {
            Completion::Location(url) => self.get_json(url, operation).await,
            Completion::Body(body) => serde_json::from_str(&body).context(DecodeSnafu { operation }),
            Completion::Done => MissingHeaderSnafu {
                operation,
                header: header::LOCATION.as_str(),
            }
            .fail(),
        }
    }

    async fn set_state(&self, resource: &str, id: &str, state: EntryState) -> OrchResult<()> {
        let operation = format!("set {resource} {id} {state}");
        let body = serde_json::to_value(StateRequest { state }).context(DecodeSnafu {
            operation: operation.as_str(),
        })?;
        self.submit(
            Method::POST,
            &format!("/{resource}s/{id}/state"),
            Some(body),
            &operation,
        )
        .await
        .map(|_| ())
    }
}

fn to_body<T: serde::Serialize>(value: &T, operation: &str) -> Result<serde_json::Value, Error> {
    serde_json::to_value(value).context(DecodeSnafu { operation })
}

#[async_trait]
impl Orchestrator for RestClient {
    #[tracing::instrument(skip(self), err)]
    async fn list_nodes(&self) -> OrchResult<Vec<NodeId>> {
        let operation = "list nodes";
        let clusters: ClusterList = self.get_json(self.url("/clusters")?, operation).await?;
        let mut nodes = Vec::new();
        for cluster in clusters.clusters {
            let info: ClusterInfo = self
                .get_json(self.url(&format!("/clusters/{cluster}"))?, operation)
                .await?;
            nodes.extend(info.nodes);
        }
        Ok(nodes)
    }

    #[tracing::instrument(skip(self), err)]
    async fn node_info(&self, id: &str) -> OrchResult<NodeInfo> {
        self.get_json(self.url(&format!("/nodes/{id}"))?, &format!("get node {id}"))
            .await
    }

    #[tracing::instrument(skip(self), err)]
    async fn node_enable(&self, id: &str) -> OrchResult<()> {
        self.set_state("node", id, EntryState::Online).await
    }

    #[tracing::instrument(skip(self), err)]
    async fn node_disable(&self, id: &str) -> OrchResult<()> {
        self.set_state("node", id, EntryState::Offline).await
    }

    #[tracing::instrument(skip(self), err)]
    async fn device_add(&self, node: &str, name: &str) -> OrchResult<()> {
        let operation = format!("add device {name} to node {node}");
        let body = to_body(
            &DeviceAddRequest {
                node: node.to_string(),
                name: name.to_string(),
            },
            &operation,
        )?;
        self.submit(Method::POST, "/devices", Some(body), &operation)
            .await
            .map(|_| ())
    }

    #[tracing::instrument(skip(self), err)]
    async fn device_info(&self, id: &str) -> OrchResult<DeviceInfo> {
        self.get_json(self.url(&format!("/devices/{id}"))?, &format!("get device {id}"))
            .await
    }

    #[tracing::instrument(skip(self), err)]
    async fn device_enable(&self, id: &str) -> OrchResult<()> {
        self.set_state("device", id, EntryState::Online).await
    }

    #[tracing::instrument(skip(self), err)]
    async fn device_disable(&self, id: &str) -> OrchResult<()> {
        self.set_state("device", id, EntryState::Offline).await
    }

    #[tracing::instrument(skip(self), err)]
    async fn device_remove(&self, id: &str) -> OrchResult<()> {
        self.set_state("device", id, EntryState::Failed).await
    }

    #[tracing::instrument(skip(self), err)]
    async fn device_delete(&self, id: &str) -> OrchResult<()> {
        self.submit(
            Method::DELETE,
            &format!("/devices/{id}"),
            None,
            &format!("delete device {id}"),
        )
        .await
        .map(|_| ())
    }

    #[tracing::instrument(skip(self), err)]
    async fn volume_create(&self, request: &VolumeCreateRequest) -> OrchResult<VolumeInfo> {
        let operation = format!("create volume of {}GiB", request.size);
        let body = to_body(request, &operation)?;
        let completion = self
            .submit(Method::POST, "/volumes", Some(body), &operation)
            .await?;
        self.resolve(completion, &operation).await
    }

    #[tracing::instrument(skip(self), err)]
    async fn volume_info(&self, id: &str) -> OrchResult<VolumeInfo> {
        self.get_json(self.url(&format!("/volumes/{id}"))?, &format!("get volume {id}"))
            .await
    }

    #[tracing::instrument(skip(self), err)]
    async fn volume_list(&self) -> OrchResult<Vec<VolumeId>> {
        let list: VolumeList = self.get_json(self.url("/volumes")?, "list volumes").await?;
        Ok(list.volumes)
    }

    #[tracing::instrument(skip(self), err)]
    async fn volume_expand(&self, id: &str, expand_size: u64) -> OrchResult<VolumeInfo> {
        let operation = format!("expand volume {id} by {expand_size}GiB");
        let body = to_body(&VolumeExpandRequest { expand_size }, &operation)?;
        let completion = self
            .submit(
                Method::POST,
                &format!("/volumes/{id}/expand"),
                Some(body),
                &operation,
            )
            .await?;
        self.resolve(completion, &operation).await
    }

    #[tracing::instrument(skip(self), err)]
    async fn volume_delete(&self, id: &str) -> OrchResult<()> {
        self.submit(
            Method::DELETE,
            &format!("/volumes/{id}"),
            None,
            &format!("delete volume {id}"),
        )
        .await
        .map(|_| ())
    }
}
