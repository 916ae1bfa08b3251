//! Profile fetching through the Apify actor-run API.
//!
//! One chunk is one actor run: start the run, wait for it to reach a
//! terminal status, then read its default dataset.

use std::time::Duration;

use async_trait::async_trait;
use leadscore_shared::{AppConfig, Batch, Credentials, LeadScoreError, Record, Result};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tracing::{debug, instrument};
use url::Url;

use crate::ProfileSource;
use crate::item::records_from_page;

/// User-Agent string for scraper API requests.
const USER_AGENT: &str = concat!("leadscore/", env!("CARGO_PKG_VERSION"));

/// Longest slice of an error body kept in error messages.
const MAX_ERROR_BODY: usize = 300;

/// Apify caps server-side waiting at 60 seconds per request.
const MAX_WAIT_FOR_FINISH: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Settings for [`ApifyFetcher`].
#[derive(Debug, Clone)]
pub struct ApifyFetcherConfig {
    pub base_url: String,
    pub token: String,
    /// Actor id, `owner~name` or `owner/name`.
    pub actor: String,
    /// Upper bound for one run, start to dataset.
    pub job_timeout: Duration,
    /// Server-side wait per status poll.
    pub poll_wait: Duration,
    /// Client-side pause between two polls of a still-running job.
    pub poll_pause: Duration,
}

impl ApifyFetcherConfig {
    pub fn from_app(config: &AppConfig, credentials: &Credentials) -> Self {
        Self {
            base_url: config.apify.base_url.clone(),
            token: credentials.apify_token.clone(),
            actor: config.apify.actor.clone(),
            job_timeout: Duration::from_secs(config.apify.job_timeout_secs),
            poll_wait: Duration::from_secs(config.apify.poll_wait_secs),
            poll_pause: Duration::from_secs(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunInfo {
    id: String,
    status: String,
    #[serde(default)]
    default_dataset_id: Option<String>,
}

impl RunInfo {
    fn is_terminal(&self) -> bool {
        matches!(
            self.status.as_str(),
            "SUCCEEDED" | "FAILED" | "TIMED-OUT" | "ABORTED"
        )
    }
}

// ---------------------------------------------------------------------------
// ApifyFetcher
// ---------------------------------------------------------------------------

/// Fetches profile records by running the scraper actor once per chunk.
pub struct ApifyFetcher {
    client: Client,
    base_url: Url,
    token: String,
    actor: String,
    job_timeout: Duration,
    poll_wait: Duration,
    poll_pause: Duration,
}

impl ApifyFetcher {
    pub fn new(config: ApifyFetcherConfig) -> Result<Self> {
        let base_url = Url::parse(&format!("{}/", config.base_url.trim_end_matches('/')))
            .map_err(|e| LeadScoreError::config(format!("invalid scraper base URL: {e}")))?;
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(MAX_WAIT_FOR_FINISH + Duration::from_secs(30))
            .build()
            .map_err(|e| LeadScoreError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            token: config.token,
            actor: config.actor.replace('/', "~"),
            job_timeout: config.job_timeout,
            poll_wait: config.poll_wait.min(MAX_WAIT_FOR_FINISH),
            poll_pause: config.poll_pause,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| LeadScoreError::config(format!("invalid scraper URL {path}: {e}")))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| LeadScoreError::Network(format!("{what}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(MAX_ERROR_BODY).collect();
            return Err(LeadScoreError::Remote(format!(
                "{what}: HTTP {status}: {}",
                snippet.trim()
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| LeadScoreError::parse(format!("{what}: malformed response: {e}")))
    }

    /// Start an actor run for the chunk's identifiers.
    async fn start_run(&self, batch: &Batch) -> Result<RunInfo> {
        let mut url = self.url(&format!("v2/acts/{}/runs", self.actor))?;
        url.query_pairs_mut()
            .append_pair("timeout", &self.job_timeout.as_secs().max(1).to_string());

        let usernames: Vec<&str> = batch.identifiers.iter().map(|i| i.as_str()).collect();
        let body = serde_json::json!({ "usernames": usernames });

        let run: Envelope<RunInfo> = self
            .send(self.client.post(url).json(&body), "start scraper run")
            .await?;
        debug!(run_id = %run.data.id, status = %run.data.status, "scraper run started");
        Ok(run.data)
    }

    /// Poll until the run is terminal or the job timeout elapses.
    async fn wait_for_run(&self, mut run: RunInfo, started: Instant) -> Result<RunInfo> {
        let deadline = started + self.job_timeout;

        while !run.is_terminal() {
            let now = Instant::now();
            if now >= deadline {
                return Err(LeadScoreError::Remote(format!(
                    "scraper run {} did not finish within {}s (status {})",
                    run.id,
                    self.job_timeout.as_secs(),
                    run.status
                )));
            }

            let wait = self.poll_wait.min(deadline - now);
            let mut url = self.url(&format!("v2/actor-runs/{}", run.id))?;
            url.query_pairs_mut()
                .append_pair("waitForFinish", &wait.as_secs().to_string());

            let polled: Envelope<RunInfo> =
                self.send(self.client.get(url), "poll scraper run").await?;
            run = polled.data;
            debug!(run_id = %run.id, status = %run.status, "scraper run polled");

            if !run.is_terminal() && !self.poll_pause.is_zero() {
                tokio::time::sleep(self.poll_pause).await;
            }
        }

        Ok(run)
    }

    async fn dataset_items(&self, dataset_id: &str) -> Result<Vec<serde_json::Value>> {
        let mut url = self.url(&format!("v2/datasets/{dataset_id}/items"))?;
        url.query_pairs_mut()
            .append_pair("clean", "true")
            .append_pair("format", "json");
        self.send(self.client.get(url), "read scraper dataset").await
    }
}

#[async_trait]
impl ProfileSource for ApifyFetcher {
    #[instrument(skip_all, fields(chunk = batch.index, size = batch.len()))]
    async fn fetch_chunk(&self, batch: &Batch) -> Result<Vec<Record>> {
        let started = Instant::now();
        let run = self.start_run(batch).await?;
        let run = self.wait_for_run(run, started).await?;

        if run.status != "SUCCEEDED" {
            return Err(LeadScoreError::Remote(format!(
                "scraper run {} ended with status {}",
                run.id, run.status
            )));
        }

        let dataset_id = run.default_dataset_id.ok_or_else(|| {
            LeadScoreError::parse(format!("scraper run {} has no dataset", run.id))
        })?;
        let items = self.dataset_items(&dataset_id).await?;
        let item_count = items.len();
        let records = records_from_page(items);
        debug!(items = item_count, records = records.len(), "dataset read");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use leadscore_shared::Identifier;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::SilentFetchProgress;

    fn fetcher(server: &MockServer, job_timeout: Duration) -> ApifyFetcher {
        ApifyFetcher::new(ApifyFetcherConfig {
            base_url: server.uri(),
            token: "apify-test".into(),
            actor: "apify/instagram-profile-scraper".into(),
            job_timeout,
            poll_wait: Duration::ZERO,
            poll_pause: Duration::from_millis(5),
        })
        .unwrap()
    }

    fn batch(names: &[&str]) -> Batch {
        Batch {
            index: 0,
            identifiers: names.iter().filter_map(|n| Identifier::parse(n)).collect(),
        }
    }

    fn run(id: &str, status: &str) -> serde_json::Value {
        serde_json::json!({
            "data": {"id": id, "status": status, "defaultDatasetId": format!("ds-{id}")}
        })
    }

    fn items(names: &[&str]) -> serde_json::Value {
        serde_json::Value::Array(
            names
                .iter()
                .map(|n| serde_json::json!({"username": n, "biography": format!("bio {n}")}))
                .collect(),
        )
    }

    #[tokio::test]
    async fn chunk_runs_actor_and_reads_dataset() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/acts/apify~instagram-profile-scraper/runs"))
            .and(header("authorization", "Bearer apify-test"))
            .and(body_json(serde_json::json!({"usernames": ["alpha", "beta"]})))
            .respond_with(ResponseTemplate::new(201).set_body_json(run("r1", "RUNNING")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/actor-runs/r1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(run("r1", "RUNNING")))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/actor-runs/r1"))
            .and(query_param("waitForFinish", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(run("r1", "SUCCEEDED")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/datasets/ds-r1/items"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"username": "alpha", "biography": "bio alpha"},
                {"username": "beta", "error": "not_found"},
                {"username": "gamma", "biography": "bio gamma", "latestPosts": null},
                {"username": "delta", "latestPosts": "not a list"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let records = fetcher(&server, Duration::from_secs(10))
            .fetch_chunk(&batch(&["alpha", "@beta"]))
            .await
            .unwrap();

        let names: Vec<&str> = records.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(names, vec!["alpha", "gamma"]);
    }

    #[tokio::test]
    async fn failed_run_is_a_chunk_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/acts/apify~instagram-profile-scraper/runs"))
            .respond_with(ResponseTemplate::new(201).set_body_json(run("r2", "FAILED")))
            .mount(&server)
            .await;

        let err = fetcher(&server, Duration::from_secs(10))
            .fetch_chunk(&batch(&["alpha"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("FAILED"));
    }

    #[tokio::test]
    async fn run_that_never_finishes_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/acts/apify~instagram-profile-scraper/runs"))
            .respond_with(ResponseTemplate::new(201).set_body_json(run("r3", "READY")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/actor-runs/r3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(run("r3", "RUNNING")))
            .mount(&server)
            .await;

        let err = fetcher(&server, Duration::from_millis(50))
            .fetch_chunk(&batch(&["alpha"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not finish"));
    }

    #[tokio::test]
    async fn start_rejection_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
            .mount(&server)
            .await;

        let err = fetcher(&server, Duration::from_secs(1))
            .fetch_chunk(&batch(&["alpha"]))
            .await
            .unwrap_err();
        assert!(matches!(err, LeadScoreError::Remote(ref m) if m.contains("401")));
    }

    #[tokio::test]
    async fn partial_failure_keeps_other_chunks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(serde_json::json!({"usernames": ["a", "b"]})))
            .respond_with(ResponseTemplate::new(201).set_body_json(run("ok1", "SUCCEEDED")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_json(serde_json::json!({"usernames": ["c", "d"]})))
            .respond_with(ResponseTemplate::new(201).set_body_json(run("bad", "ABORTED")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_json(serde_json::json!({"usernames": ["e"]})))
            .respond_with(ResponseTemplate::new(201).set_body_json(run("ok2", "SUCCEEDED")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/datasets/ds-ok1/items"))
            .respond_with(ResponseTemplate::new(200).set_body_json(items(&["a", "b"])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/datasets/ds-ok2/items"))
            .respond_with(ResponseTemplate::new(200).set_body_json(items(&["e"])))
            .mount(&server)
            .await;

        let ids: Vec<Identifier> = ["a", "b", "c", "d", "e"]
            .iter()
            .filter_map(|n| Identifier::parse(n))
            .collect();
        let report = fetcher(&server, Duration::from_secs(10))
            .fetch(&ids, 2, &SilentFetchProgress, &CancellationToken::new())
            .await;

        assert_eq!(report.chunks, 3);
        let names: Vec<&str> = report.records.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "e"]);
        assert_eq!(report.failed_chunks.len(), 1);
        assert_eq!(report.failed_chunks[0].0, 1);
    }
}
