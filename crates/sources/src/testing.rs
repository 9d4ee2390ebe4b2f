//! In-process adapters and fetchers for tests and demos.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use listing::{ListingRecord, SourceId};
use query::SearchQuery;
use url::Url;

use crate::adapter::SourceAdapter;
use crate::error::SourceError;
use crate::fetch::{FetchedPage, PageFetcher};

/// What a canned adapter answers for one attempt.
#[derive(Debug, Clone)]
pub enum CannedResponse {
    Listings(Vec<ListingRecord>),
    Error(SourceError),
    /// Never completes; only a timeout or abort ends the attempt.
    Hang,
}

/// Tracks how many fetches run at once across a group of adapters.
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    fn enter(self: &Arc<Self>) -> ProbeGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ProbeGuard(Arc::clone(self))
    }
}

struct ProbeGuard(Arc<ConcurrencyProbe>);

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Adapter answering from a script: one response per attempt, then the
/// fallback forever.
pub struct CannedAdapter {
    source: SourceId,
    script: Mutex<VecDeque<CannedResponse>>,
    fallback: CannedResponse,
    delay: Option<Duration>,
    calls: AtomicUsize,
    probe: Option<Arc<ConcurrencyProbe>>,
}

impl CannedAdapter {
    pub fn new(source: SourceId, fallback: CannedResponse) -> Self {
        Self {
            source,
            script: Mutex::new(VecDeque::new()),
            fallback,
            delay: None,
            calls: AtomicUsize::new(0),
            probe: None,
        }
    }

    pub fn listings(source: SourceId, listings: Vec<ListingRecord>) -> Self {
        Self::new(source, CannedResponse::Listings(listings))
    }

    pub fn failing(source: SourceId, error: SourceError) -> Self {
        Self::new(source, CannedResponse::Error(error))
    }

    pub fn hanging(source: SourceId) -> Self {
        Self::new(source, CannedResponse::Hang)
    }

    /// Responses consumed in order before the fallback applies.
    pub fn with_script(self, script: impl IntoIterator<Item = CannedResponse>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            ..self
        }
    }

    /// Simulated latency before every answer (tokio time, so paused clocks apply).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_probe(mut self, probe: Arc<ConcurrencyProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> CannedResponse {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        script.pop_front().unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl SourceAdapter for CannedAdapter {
    fn source(&self) -> &SourceId {
        &self.source
    }

    async fn fetch(&self, _query: &SearchQuery) -> Result<Vec<ListingRecord>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _guard = self.probe.as_ref().map(|probe| probe.enter());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.next_response() {
            CannedResponse::Listings(listings) => Ok(listings),
            CannedResponse::Error(err) => Err(err),
            CannedResponse::Hang => std::future::pending().await,
        }
    }
}

/// Fetcher replaying `(status, body)` pairs, then repeating the last one.
pub struct ScriptedFetcher {
    pages: Mutex<VecDeque<(u16, String)>>,
    last: Mutex<(u16, String)>,
    requested: Mutex<Vec<Url>>,
}

impl ScriptedFetcher {
    pub fn new(pages: impl IntoIterator<Item = (u16, String)>) -> Self {
        Self {
            pages: Mutex::new(pages.into_iter().collect()),
            last: Mutex::new((200, String::new())),
            requested: Mutex::new(Vec::new()),
        }
    }

    /// URLs requested so far, in order.
    pub fn requested(&self) -> Vec<Url> {
        self.requested
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, SourceError> {
        self.requested
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(url.clone());
        let (status, body) = {
            let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(next) = self
                .pages
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front()
            {
                *last = next;
            }
            last.clone()
        };
        if !(200..300).contains(&status) {
            return Err(SourceError::from_status(status, url.as_str()));
        }
        Ok(FetchedPage {
            url: url.clone(),
            status,
            body,
        })
    }
}
