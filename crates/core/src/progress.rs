//! Search progress records for out-of-process pollers.
//!
//! Each session owns one small JSON file, `{"total": n, "completed": m}`,
//! rewritten in full on every update. A poller infers completion from
//! `completed >= total`; it never shares memory with the search.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Error;

const READ_ATTEMPTS: usize = 3;
const READ_RETRY_DELAY: Duration = Duration::from_millis(25);

/// Latest snapshot of a session's progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ProgressState {
    /// Requests expected so far. Grows when second-stage work is discovered.
    #[serde(rename = "total")]
    pub expected: u64,
    /// Requests attempted, successful or not.
    pub completed: u64,
}

impl ProgressState {
    pub fn is_complete(&self) -> bool {
        self.completed >= self.expected
    }
}

/// Location of progress records. Built once at startup and shared.
#[derive(Debug, Clone)]
pub struct ProgressBoard {
    folder: PathBuf,
    prefix: String,
}

impl ProgressBoard {
    pub fn new(folder: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self { folder: folder.into(), prefix: prefix.into() }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Path of the record for `session_id`.
    ///
    /// Session ids are limited to ASCII letters, digits, `-` and `_` so a
    /// record can never land outside the progress folder.
    pub fn path_for(&self, session_id: &str) -> Result<PathBuf, Error> {
        validate_session_id(session_id)?;
        Ok(self.folder.join(format!("{}{session_id}", self.prefix)))
    }

    /// Begin tracking a session with a zeroed record.
    pub async fn start(&self, session_id: &str) -> Result<ProgressTracker, Error> {
        let path = self.path_for(session_id)?;
        tokio::fs::create_dir_all(&self.folder)
            .await
            .map_err(|e| Error::Storage(format!("failed to create progress folder {}: {e}", self.folder.display())))?;

        let tracker = ProgressTracker { session_id: session_id.to_string(), path, state: ProgressState::default() };
        tracker.save().await?;
        Ok(tracker)
    }

    /// Read a session's latest record.
    ///
    /// Returns `Ok(None)` if the session has no record. A record caught
    /// mid-write is retried a few times before giving up.
    pub async fn read(&self, session_id: &str) -> Result<Option<ProgressState>, Error> {
        let path = self.path_for(session_id)?;

        let mut last_problem = String::new();
        for attempt in 1..=READ_ATTEMPTS {
            match tokio::fs::read(&path).await {
                Ok(raw) => match serde_json::from_slice::<ProgressState>(&raw) {
                    Ok(state) => return Ok(Some(state)),
                    Err(e) => last_problem = e.to_string(),
                },
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(e) => last_problem = e.to_string(),
            }

            tracing::debug!(session_id, attempt, problem = %last_problem, "progress record unreadable, retrying");
            if attempt < READ_ATTEMPTS {
                tokio::time::sleep(READ_RETRY_DELAY).await;
            }
        }

        Err(Error::Storage(format!("progress record for {session_id} unreadable: {last_problem}")))
    }
}

fn validate_session_id(session_id: &str) -> Result<(), Error> {
    let valid = !session_id.is_empty()
        && session_id.len() <= 128
        && session_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid { Ok(()) } else { Err(Error::InvalidInput(format!("invalid session id: {session_id:?}"))) }
}

/// Writer side of one session's progress record.
///
/// Owned by the single task driving a search; every update overwrites the
/// whole record.
#[derive(Debug)]
pub struct ProgressTracker {
    session_id: String,
    path: PathBuf,
    state: ProgressState,
}

impl ProgressTracker {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> ProgressState {
        self.state
    }

    pub async fn set_expected(&mut self, expected: u64) -> Result<(), Error> {
        self.state.expected = expected;
        self.save().await
    }

    /// Grow the expected total by `delta`.
    pub async fn add_expected(&mut self, delta: u64) -> Result<(), Error> {
        self.state.expected = self.state.expected.saturating_add(delta);
        self.save().await
    }

    pub async fn increment_completed(&mut self) -> Result<(), Error> {
        self.state.completed = self.state.completed.saturating_add(1);
        self.save().await
    }

    async fn save(&self) -> Result<(), Error> {
        let json = serde_json::to_vec(&self.state)
            .map_err(|e| Error::Storage(format!("failed to encode progress: {e}")))?;

        let mut part = self.path.clone().into_os_string();
        part.push(".part");
        let part = PathBuf::from(part);

        tokio::fs::write(&part, &json).await?;
        tokio::fs::rename(&part, &self.path).await?;

        tracing::trace!(
            session_id = %self.session_id,
            total = self.state.expected,
            completed = self.state.completed,
            "progress saved"
        );
        Ok(())
    }
}
