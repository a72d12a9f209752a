//! Registry of upload sessions.
//!
//! Routes host commands (`start_upload`, `cancel_upload`) to sessions by id.
//! Each started session runs as its own tokio task; all notifications share
//! one event channel handed out by [`UploadRegistry::new`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chunkload_resume_store::ResumeStore;
use chunkload_transfer::{FileHandle, Fingerprint, UploadPolicy};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::UploadError;
use crate::machine::{UploadContext, UploadSession};
use crate::transport::ChunkTransport;
use crate::types::{UploadEvent, UploadStatus};

enum Entry {
    /// Enqueued or failed; owned by the registry.
    Idle(UploadSession),
    /// Owned by its task; only the cancel handle stays here.
    Running { cancel: CancellationToken },
}

type SessionMap = Arc<Mutex<HashMap<String, Entry>>>;

/// Active upload sessions keyed by session id.
pub struct UploadRegistry {
    sessions: SessionMap,
    ctx: UploadContext,
    policy: UploadPolicy,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl UploadRegistry {
    /// Creates a registry and the receiver for its notifications.
    ///
    /// Session tasks block when the channel is full, so the receiver must
    /// be drained.
    pub fn new(
        store: Arc<ResumeStore>,
        transport: Arc<dyn ChunkTransport>,
        policy: UploadPolicy,
    ) -> (Self, mpsc::Receiver<UploadEvent>) {
        let (events, events_rx) = mpsc::channel(256);
        let registry = Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            ctx: UploadContext {
                transport,
                store,
                events,
            },
            policy,
            tasks: Mutex::new(Vec::new()),
        };
        (registry, events_rx)
    }

    /// Registers a file and returns its session id.
    ///
    /// A saved resume record for the file's content replaces the generated
    /// session id and URL.
    pub async fn enqueue(&self, path: impl AsRef<Path>) -> Result<String, UploadError> {
        let file = FileHandle::open(path.as_ref())?;

        let sample = file.clone();
        let policy = self.policy.clone();
        let fingerprint = tokio::task::spawn_blocking(move || {
            chunkload_transfer::fingerprint(&sample, &policy)
        })
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "fingerprint task failed");
            Fingerprint::empty()
        });

        let resume = if fingerprint.is_empty() {
            None
        } else {
            self.ctx.store.get(&fingerprint.key())
        };

        let session = UploadSession::new(file, &fingerprint, self.policy.clone(), resume);
        let session_id = session.session_id().to_string();
        let name = session.file().name().to_string();
        let total_bytes = session.file().length();

        {
            let mut sessions = self.sessions.lock().await;
            if sessions.contains_key(&session_id) {
                return Err(UploadError::DuplicateSession(session_id));
            }
            sessions.insert(session_id.clone(), Entry::Idle(session));
        }

        info!(session = %session_id, file = %name, bytes = total_bytes, "file enqueued");
        self.emit(UploadEvent::Enqueued {
            session_id: session_id.clone(),
            name,
            total_bytes,
        })
        .await;
        Ok(session_id)
    }

    /// Starts (or restarts a failed) upload.
    ///
    /// `url` is ignored when the session was resumed with a stored URL.
    /// A non-empty `additional_data` is appended as the URL's query.
    pub async fn start_upload(
        &self,
        session_id: &str,
        url: &str,
        additional_data: &str,
    ) -> Result<(), UploadError> {
        let mut sessions = self.sessions.lock().await;
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| UploadError::SessionNotFound(session_id.to_string()))?;

        let cancel = match &mut *entry {
            Entry::Running { .. } => return Err(UploadError::SessionActive(session_id.to_string())),
            Entry::Idle(session) => {
                if session.upload_url().is_none() {
                    session.set_upload_url(compose_url(url, additional_data)?);
                }
                session.cancel_token()
            }
        };

        let Entry::Idle(session) = std::mem::replace(entry, Entry::Running { cancel }) else {
            return Err(UploadError::SessionActive(session_id.to_string()));
        };
        drop(sessions);

        debug!(session = %session_id, url = ?session.upload_url(), "starting upload");
        let ctx = self.ctx.clone();
        let sessions = self.sessions.clone();
        let handle = tokio::spawn(async move {
            let mut session = session.drive(&ctx).await;
            let events = session.take_events();
            let id = session.session_id().to_string();

            {
                let mut map = sessions.lock().await;
                if session.status() == UploadStatus::Failed {
                    map.insert(id, Entry::Idle(session));
                } else {
                    map.remove(&id);
                }
            }

            for event in events {
                let _ = ctx.events.send(event).await;
            }
        });
        self.tasks.lock().await.push(handle);
        Ok(())
    }

    /// Cancels an upload.
    ///
    /// A running session stops at its next response boundary. An idle
    /// session is dropped right away.
    pub async fn cancel_upload(&self, session_id: &str) -> Result<(), UploadError> {
        let mut sessions = self.sessions.lock().await;
        let mut session = match sessions.remove(session_id) {
            None => return Err(UploadError::SessionNotFound(session_id.to_string())),
            Some(Entry::Running { cancel }) => {
                info!(session = %session_id, "cancel requested");
                cancel.cancel();
                sessions.insert(session_id.to_string(), Entry::Running { cancel });
                return Ok(());
            }
            Some(Entry::Idle(session)) => session,
        };
        drop(sessions);

        info!(session = %session_id, "idle upload canceled");
        session.abandon();
        for event in session.take_events() {
            self.emit(event).await;
        }
        Ok(())
    }

    /// Ids of every registered session, sorted.
    pub async fn active_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether `session_id` currently has a running task.
    pub async fn is_running(&self, session_id: &str) -> bool {
        matches!(
            self.sessions.lock().await.get(session_id),
            Some(Entry::Running { .. })
        )
    }

    /// Waits until every spawned session task has finished.
    pub async fn wait_idle(&self) {
        loop {
            let handles = std::mem::take(&mut *self.tasks.lock().await);
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "upload task panicked");
                }
            }
        }
    }

    async fn emit(&self, event: UploadEvent) {
        let _ = self.ctx.events.send(event).await;
    }
}

/// Joins `url` and `additional_data` into the upload target and checks
/// that it parses.
fn compose_url(url: &str, additional_data: &str) -> Result<String, UploadError> {
    let target = if additional_data.is_empty() {
        url.to_string()
    } else if url.contains('?') {
        format!("{url}&{additional_data}")
    } else {
        format!("{url}?{additional_data}")
    };

    reqwest::Url::parse(&target).map_err(|e| UploadError::InvalidUrl(format!("{target}: {e}")))?;
    Ok(target)
}
