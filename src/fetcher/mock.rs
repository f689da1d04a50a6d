//! # Scripted Fetcher for Testing
//!
//! Provides a `ScriptedFetcher` that implements the `Fetcher` trait by replaying
//! a predefined sequence of bodies and errors, recording every requested URL.
//! Pacing goes through a `ManualClock`, so no real time passes.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use url::Url;

use super::{FetchError, Fetcher, Pacer, RawResponse};
use crate::clock::ManualClock;

#[derive(Debug, Default)]
struct Script {
    responses: VecDeque<Result<String, FetchError>>,
    requested: Vec<Url>,
}

/// A fetcher that replays scripted responses in order
#[derive(Debug, Clone)]
pub struct ScriptedFetcher {
    script: Arc<Mutex<Script>>,
    clock: ManualClock,
}

impl ScriptedFetcher {
    /// Create an empty script paced by `clock`
    pub fn new(clock: ManualClock) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script::default())),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a successful response body
    pub fn push_body(&self, body: impl Into<String>) {
        self.lock().responses.push_back(Ok(body.into()));
    }

    /// Queue an error
    pub fn push_error(&self, error: FetchError) {
        self.lock().responses.push_back(Err(error));
    }

    /// URLs requested so far, in order
    pub fn requested(&self) -> Vec<Url> {
        self.lock().requested.clone()
    }

    /// Number of fetches performed
    pub fn fetch_count(&self) -> usize {
        self.lock().requested.len()
    }

    /// Clock used for pacing
    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }
}

impl Default for ScriptedFetcher {
    fn default() -> Self {
        Self::new(ManualClock::default())
    }
}

impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &Url, pacer: &mut Pacer) -> Result<RawResponse, FetchError> {
        pacer.wait(&self.clock).await;

        let next = {
            let mut script = self.lock();
            script.requested.push(url.clone());
            script.responses.pop_front()
        };

        match next {
            Some(Ok(body)) => Ok(RawResponse {
                body,
                final_url: url.clone(),
                status: 200,
            }),
            Some(Err(err)) => Err(err),
            None => Err(FetchError::Network {
                url: url.to_string(),
                message: "script exhausted".to_string(),
            }),
        }
    }
}
