//! Per-record grading protocol: grade, optionally enrich, optionally re-grade.
//!
//! Each stage fails open. A failed grade leaves the score absent and keeps
//! the error text as reasoning; a failed enrichment or re-grade keeps the
//! stage-1 score. Stages only ever move forward.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadscore_remote::{
    ChatApi, ChatClient, ChatClientConfig, ChatMessage, ChatRequest, RemoteError, SearchAnswer,
    SearchApi, SearchClient, SearchClientConfig,
};
use leadscore_shared::{AppConfig, Credentials, GradingResult, Record, Result};
use leadscore_storage::ResponseCache;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use crate::prompts::Prompts;
use crate::score::extract_score;

// ---------------------------------------------------------------------------
// Scorer trait
// ---------------------------------------------------------------------------

/// Grades one record.
#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score(&self, record: &Record) -> Result<GradingResult>;
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Model parameters and switches for [`LeadScorer`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScorerSettings {
    pub model: String,
    pub temperature: f32,
    pub rescore_temperature: f32,
    pub max_tokens: u32,
    pub caption_chars: usize,
    /// Run stages 2 and 3 when a search client is present.
    pub enrich: bool,
}

impl From<&AppConfig> for ScorerSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            model: config.openai.model.clone(),
            temperature: config.openai.temperature,
            rescore_temperature: config.openai.rescore_temperature,
            max_tokens: config.openai.max_tokens,
            caption_chars: config.scoring.caption_chars,
            enrich: config.perplexity.enabled,
        }
    }
}

/// Kind of remote call, part of the response cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Grade,
    Search,
    Rescore,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grade => "grade",
            Self::Search => "search",
            Self::Rescore => "rescore",
        }
    }
}

/// Compute a prompt hash for cache keying.
pub fn prompt_hash(prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Stage machine
// ---------------------------------------------------------------------------

/// Where a record is in the protocol.
enum Stage {
    Grade,
    Enrich(Graded),
    Rescore(Graded, Enriched),
    Done(Graded, Option<Enriched>, Option<Regraded>),
}

struct Graded {
    reasoning: String,
    score: Option<u8>,
    at: DateTime<Utc>,
}

struct Enriched {
    answer: SearchAnswer,
    at: DateTime<Utc>,
}

struct Regraded {
    text: String,
    score: Option<u8>,
    at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// LeadScorer
// ---------------------------------------------------------------------------

/// The production scorer: chat model for grading, optional web search for
/// enrichment, optional response cache in front of both.
pub struct LeadScorer {
    chat: Arc<dyn ChatApi>,
    search: Option<Arc<dyn SearchApi>>,
    cache: Option<Arc<ResponseCache>>,
    prompts: Prompts,
    settings: ScorerSettings,
}

impl LeadScorer {
    pub fn new(
        chat: Arc<dyn ChatApi>,
        search: Option<Arc<dyn SearchApi>>,
        prompts: Prompts,
        settings: ScorerSettings,
    ) -> Self {
        Self {
            chat,
            search,
            cache: None,
            prompts,
            settings,
        }
    }

    /// Build the HTTP clients from configuration.
    ///
    /// Without a web-search key the scorer only grades.
    pub fn from_config(config: &AppConfig, credentials: &Credentials) -> Result<Self> {
        let chat = ChatClient::new(ChatClientConfig::from_app(config, credentials))?;
        let search = match SearchClientConfig::from_app(config, credentials) {
            Some(search_config) if config.perplexity.enabled => {
                Some(Arc::new(SearchClient::new(search_config)?) as Arc<dyn SearchApi>)
            }
            _ => None,
        };

        Ok(Self::new(
            Arc::new(chat),
            search,
            Prompts::new(&config.target),
            ScorerSettings::from(config),
        ))
    }

    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Whether stages 2 and 3 can run.
    pub fn enrichment_enabled(&self) -> bool {
        self.settings.enrich && self.search.is_some()
    }

    /// Serve `call` from the cache when possible, store its result otherwise.
    /// Cache faults are logged and treated as a miss.
    async fn cached<F, Fut>(
        &self,
        kind: CallKind,
        model: &str,
        prompt: &str,
        call: F,
    ) -> std::result::Result<String, RemoteError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<String, RemoteError>>,
    {
        let Some(cache) = &self.cache else {
            return call().await;
        };

        let hash = prompt_hash(prompt);
        match cache.get(kind.as_str(), model, &hash).await {
            Ok(Some(hit)) => {
                debug!(kind = kind.as_str(), "response cache hit");
                return Ok(hit);
            }
            Ok(None) => {}
            Err(e) => warn!(kind = kind.as_str(), error = %e, "response cache read failed"),
        }

        let text = call().await?;
        if let Err(e) = cache.put(kind.as_str(), model, &hash, &text).await {
            warn!(kind = kind.as_str(), error = %e, "response cache write failed");
        }
        Ok(text)
    }

    async fn chat(&self, kind: CallKind, request: ChatRequest) -> std::result::Result<String, RemoteError> {
        let prompt = request.prompt_text();
        self.cached(kind, &request.model, &prompt, || self.chat.complete(&request))
            .await
    }

    async fn grade(&self, record: &Record) -> Graded {
        let request = ChatRequest::new(
            &self.settings.model,
            vec![
                ChatMessage::system(self.prompts.grade_system()),
                ChatMessage::user(
                    self.prompts
                        .grade_user(record, self.settings.caption_chars),
                ),
            ],
        )
        .temperature(self.settings.temperature)
        .max_tokens(self.settings.max_tokens);

        let (reasoning, score) = match self.chat(CallKind::Grade, request).await {
            Ok(text) => {
                let score = extract_score(&text);
                (text, score)
            }
            Err(e) => {
                warn!(identifier = %record.identifier, error = %e, "grading failed");
                (e.to_string(), None)
            }
        };

        Graded {
            reasoning,
            score,
            at: Utc::now(),
        }
    }

    async fn enrich(&self, search: &dyn SearchApi, record: &Record, graded: &Graded) -> Option<Enriched> {
        let prompt = self.prompts.search(&record.identifier, &graded.reasoning);
        let text = self
            .cached(CallKind::Search, search.model(), &prompt, || async {
                search.search(&prompt).await.map(|a| a.text().to_string())
            })
            .await;

        match text {
            Ok(text) => {
                let answer = SearchAnswer::from_text(text);
                if answer.is_empty() {
                    debug!(identifier = %record.identifier, "enrichment answer is empty");
                    return None;
                }
                Some(Enriched {
                    answer,
                    at: Utc::now(),
                })
            }
            Err(e) => {
                warn!(identifier = %record.identifier, error = %e, "enrichment failed");
                None
            }
        }
    }

    async fn rescore(&self, record: &Record, graded: &Graded, enriched: &Enriched) -> Option<Regraded> {
        let request = ChatRequest::new(
            &self.settings.model,
            vec![
                ChatMessage::system(self.prompts.rescore_system()),
                ChatMessage::user(
                    self.prompts
                        .rescore_user(&graded.reasoning, enriched.answer.text()),
                ),
            ],
        )
        .temperature(self.settings.rescore_temperature)
        .max_tokens(self.settings.max_tokens);

        match self.chat(CallKind::Rescore, request).await {
            Ok(text) => {
                let score = extract_score(&text);
                if score.is_none() {
                    debug!(identifier = %record.identifier, "re-grade unparseable, keeping stage-1 score");
                }
                Some(Regraded {
                    text,
                    score,
                    at: Utc::now(),
                })
            }
            Err(e) => {
                warn!(identifier = %record.identifier, error = %e, "re-grading failed");
                None
            }
        }
    }
}

#[async_trait]
impl Scorer for LeadScorer {
    #[instrument(skip_all, fields(identifier = %record.identifier))]
    async fn score(&self, record: &Record) -> Result<GradingResult> {
        let mut stage = Stage::Grade;

        loop {
            stage = match stage {
                Stage::Grade => {
                    let graded = self.grade(record).await;
                    Stage::Enrich(graded)
                }
                Stage::Enrich(graded) => match self.search.as_deref() {
                    Some(search) if self.settings.enrich => {
                        match self.enrich(search, record, &graded).await {
                            Some(enriched) => Stage::Rescore(graded, enriched),
                            None => Stage::Done(graded, None, None),
                        }
                    }
                    _ => Stage::Done(graded, None, None),
                },
                Stage::Rescore(graded, enriched) => {
                    let regraded = self.rescore(record, &graded, &enriched).await;
                    Stage::Done(graded, Some(enriched), regraded)
                }
                Stage::Done(graded, enriched, regraded) => {
                    let result = finish(record, graded, enriched, regraded);
                    info!(identifier = %record.identifier, score = ?result.score, "graded");
                    return Ok(result);
                }
            };
        }
    }
}

/// Assemble the terminal result. The re-grade score wins when present.
fn finish(
    record: &Record,
    graded: Graded,
    enriched: Option<Enriched>,
    regraded: Option<Regraded>,
) -> GradingResult {
    let score = regraded
        .as_ref()
        .and_then(|r| r.score)
        .or(graded.score);

    let (enrichment, linked_profiles, enriched_at) = match enriched {
        Some(Enriched { answer, at }) => {
            let hints = answer.hints().to_vec();
            (answer.text().to_string(), hints, Some(at))
        }
        None => (String::new(), Vec::new(), None),
    };

    let (rescore_reasoning, regraded_at) = match regraded {
        Some(Regraded { text, at, .. }) => (text, Some(at)),
        None => (String::new(), None),
    };

    GradingResult {
        identifier: record.identifier.clone(),
        score,
        reasoning: graded.reasoning,
        enrichment,
        linked_profiles,
        rescore_reasoning,
        graded_at: graded.at,
        enriched_at,
        regraded_at,
        full_name: record.full_name.clone(),
        followers_count: record.followers_count,
    }
}
