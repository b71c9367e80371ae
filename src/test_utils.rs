//! Shared test doubles used by unit and integration tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::config::FlowConfig;
use crate::content::{ContentBroker, ContentGenerator, GenerationPrompt, GeneratorError};
use crate::engine::{FixedClock, ProgressionEngine};
use crate::store::SqliteStore;

/// Engine over an in-memory store with a pinned clock.
pub struct TestHarness {
    pub engine: ProgressionEngine,
    pub store: Arc<SqliteStore>,
    pub clock: Arc<FixedClock>,
}

impl TestHarness {
    /// Fallback-only content, clock pinned to `date`.
    pub fn new(date: NaiveDate) -> crate::Result<Self> {
        Self::with_broker(date, ContentBroker::fallback_only(FlowConfig::default()))
    }

    /// Content from `generator` with a one-second budget and one retry.
    pub fn with_generator(
        date: NaiveDate,
        generator: Arc<dyn ContentGenerator>,
    ) -> crate::Result<Self> {
        Self::with_broker(
            date,
            ContentBroker::new(
                Some(generator),
                Duration::from_secs(1),
                1,
                FlowConfig::default(),
            ),
        )
    }

    pub fn with_broker(date: NaiveDate, broker: ContentBroker) -> crate::Result<Self> {
        let store = Arc::new(SqliteStore::open_in_memory()?);
        let clock = Arc::new(FixedClock::new(date));
        let engine = ProgressionEngine::new(
            Arc::clone(&store),
            Arc::new(broker),
            Arc::clone(&clock) as Arc<dyn crate::engine::Clock>,
        );
        Ok(Self {
            engine,
            store,
            clock,
        })
    }
}

/// Generator that replays a queued script of responses.
///
/// Each call pops the next entry; an exhausted script answers with a
/// request error. Every prompt received is recorded.
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<String, GeneratorError>>>,
    prompts: Mutex<Vec<GenerationPrompt>>,
    delay: Option<Duration>,
}

impl ScriptedGenerator {
    pub fn new(script: Vec<Result<String, GeneratorError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            prompts: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Generator whose every call fails, forcing fallback content.
    pub fn failing() -> Self {
        Self::new(Vec::new())
    }

    /// Sleep before answering, to exercise broker timeouts.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue another response.
    pub fn push(&self, response: Result<String, GeneratorError>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(response);
        }
    }

    /// Number of generate calls received so far.
    pub fn calls(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn prompts(&self) -> Vec<GenerationPrompt> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ContentGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &GenerationPrompt) -> Result<String, GeneratorError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| Err(GeneratorError::RequestError("script exhausted".to_owned())))
    }
}
