//! HTTP implementation of the indexer client
//!
//! Every call is a JSON request against `base_url`. Anchored calls answer
//! `404 Not Found` or `409 Conflict` when their anchor is not canonical.

use crate::client::{HistoryRequest, IndexerClient, PointResult, TxRef, UtxoDiff};
use crate::{Error, Result};
use async_trait::async_trait;
use mirror_core::{ChainTransaction, HistoryCursor, TipStatus, Utxo};
use mirror_params::Network;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Default request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP indexer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpIndexerConfig {
    /// Base URL, without trailing slash
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// User agent sent with every request
    pub user_agent: String,
}

impl HttpIndexerConfig {
    /// Default configuration for a network's public indexer
    pub fn for_network(network: &Network) -> Self {
        Self {
            base_url: network.default_indexer_url.to_string(),
            ..Default::default()
        }
    }
}

impl Default for HttpIndexerConfig {
    fn default() -> Self {
        Self {
            base_url: Network::mainnet().default_indexer_url.to_string(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            user_agent: format!("mirror-sync/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Serialize)]
struct AtPointBody<'a> {
    addresses: &'a [String],
    reference: &'a str,
}

#[derive(Serialize)]
struct DiffBody<'a> {
    addresses: &'a [String],
    since: &'a str,
    candidates: &'a [String],
}

#[derive(Serialize)]
struct RecentBody<'a> {
    addresses: &'a [String],
    before: Option<&'a HistoryCursor>,
}

#[derive(Serialize)]
struct ByHashBody<'a> {
    hashes: &'a [String],
}

#[derive(Deserialize)]
struct ByHashEntry {
    hash: String,
    transaction: ChainTransaction,
}

/// Indexer client over HTTP
#[derive(Debug, Clone)]
pub struct HttpIndexerClient {
    config: HttpIndexerConfig,
    http: reqwest::Client,
}

impl HttpIndexerClient {
    /// Create client
    pub fn new(config: HttpIndexerConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::RemoteUnavailable(format!("HTTP client setup failed: {}", e)))?;
        Ok(Self { config, http })
    }

    /// Base URL
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R> {
        let url = self.url(path);
        debug!("GET {}", url);
        let response = self.http.get(&url).send().await.map_err(map_reqwest)?;
        match decode(response, path).await? {
            PointResult::Found(value) => Ok(value),
            PointResult::Rollback => Err(Error::Remote(format!(
                "{} answered with a rollback status",
                path
            ))),
        }
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<PointResult<R>>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = self.url(path);
        debug!("POST {}", url);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(map_reqwest)?;
        decode(response, path).await
    }

    async fn post_unanchored<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        match self.post(path, body).await? {
            PointResult::Found(value) => Ok(value),
            PointResult::Rollback => Err(Error::Remote(format!(
                "{} answered with a rollback status",
                path
            ))),
        }
    }
}

#[async_trait]
impl IndexerClient for HttpIndexerClient {
    async fn get_tip_status(&self) -> Result<TipStatus> {
        self.get("v1/tip").await
    }

    async fn get_utxo_at_point(
        &self,
        addresses: &[String],
        reference: &str,
    ) -> Result<PointResult<Vec<Utxo>>> {
        self.post(
            "v1/utxos/at-point",
            &AtPointBody {
                addresses,
                reference,
            },
        )
        .await
    }

    async fn get_utxo_diff_since_point(
        &self,
        addresses: &[String],
        since: &str,
        candidates: &[String],
    ) -> Result<PointResult<UtxoDiff>> {
        self.post(
            "v1/utxos/diff",
            &DiffBody {
                addresses,
                since,
                candidates,
            },
        )
        .await
    }

    async fn get_history(
        &self,
        request: &HistoryRequest,
    ) -> Result<PointResult<Vec<ChainTransaction>>> {
        self.post("v1/history", request).await
    }

    async fn get_recent_transaction_hashes(
        &self,
        addresses: &[String],
        before: Option<&HistoryCursor>,
    ) -> Result<BTreeMap<String, Vec<TxRef>>> {
        self.post_unanchored("v1/txs/recent", &RecentBody { addresses, before })
            .await
    }

    async fn get_transactions_by_hashes(
        &self,
        hashes: &[String],
    ) -> Result<BTreeMap<String, ChainTransaction>> {
        let entries: Vec<ByHashEntry> = self
            .post_unanchored("v1/txs/by-hash", &ByHashBody { hashes })
            .await?;
        Ok(entries
            .into_iter()
            .map(|entry| (entry.hash, entry.transaction))
            .collect())
    }
}

async fn decode<R: DeserializeOwned>(
    response: reqwest::Response,
    path: &str,
) -> Result<PointResult<R>> {
    let status = response.status();
    if is_rollback_status(status) {
        debug!("{} reports a non-canonical anchor ({})", path, status);
        return Ok(PointResult::Rollback);
    }
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(Error::RemoteUnavailable(format!("{} returned {}", path, status)));
    }
    if !status.is_success() {
        return Err(Error::Remote(format!("{} returned {}", path, status)));
    }
    let value = response
        .json::<R>()
        .await
        .map_err(|e| Error::Remote(format!("{}: malformed response: {}", path, e)))?;
    Ok(PointResult::Found(value))
}

fn is_rollback_status(status: StatusCode) -> bool {
    status == StatusCode::NOT_FOUND || status == StatusCode::CONFLICT
}

fn map_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else if e.is_decode() {
        Error::Remote(e.to_string())
    } else {
        Error::RemoteUnavailable(e.to_string())
    }
}
