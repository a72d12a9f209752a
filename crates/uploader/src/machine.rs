//! Upload state machine for a single file.
//!
//! `UploadSession` owns all mutable upload state. Transitions are plain
//! synchronous methods ([`start`](UploadSession::start),
//! [`handle_outcome`](UploadSession::handle_outcome)) that queue
//! [`UploadEvent`]s; [`run`](UploadSession::run) drives them from one task,
//! performing the chunk exchange and retry delays in between.

use std::sync::Arc;

use chunkload_resume_store::{ResumeRecord, ResumeStore};
use chunkload_transfer::{
    ChunkPlan, ChunkRange, FileHandle, Fingerprint, UploadPolicy, chunk_size, next_range,
};
use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ChunkFailure, ErrorKind};
use crate::transport::{ChunkRequest, ChunkTransport};
use crate::types::{UploadEvent, UploadStatus};

/// Shared collaborators of every session task.
#[derive(Clone)]
pub struct UploadContext {
    pub transport: Arc<dyn ChunkTransport>,
    pub store: Arc<ResumeStore>,
    pub events: mpsc::Sender<UploadEvent>,
}

/// What the driver must do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Send the current chunk now.
    Send,
    /// Wait, then re-send the current chunk.
    RetryAfter(std::time::Duration),
    /// A terminal status was reached.
    Finished,
}

/// Resume store write queued by a transition.
enum StoreOp {
    Put(ResumeRecord),
    Delete(String),
}

impl StoreOp {
    fn apply(self, store: &ResumeStore) {
        match self {
            StoreOp::Put(record) => store.put(record),
            StoreOp::Delete(key) => store.delete(&key),
        }
    }
}

/// State of one file upload.
pub struct UploadSession {
    session_id: String,
    file: FileHandle,
    fingerprint: String,
    upload_url: Option<String>,
    policy: UploadPolicy,
    chunk_size: u64,
    status: UploadStatus,
    range: Option<ChunkRange>,
    confirmed: u64,
    retries_left: u32,
    last_error: Option<ChunkFailure>,
    response_text: Option<String>,
    cancel: CancellationToken,
    outbox: Vec<UploadEvent>,
    store_op: Option<StoreOp>,
}

/// Random numeric session id in the range the upload servers expect.
pub fn generate_session_id() -> String {
    let n: u64 = rand::thread_rng().gen_range(10_000_000..100_000_000);
    (1_100_000_000 + n).to_string()
}

impl UploadSession {
    /// Creates a pending session.
    ///
    /// A usable `resume` record (non-empty session id and URL) replaces the
    /// generated session id, the URL and the prior range-report.
    pub fn new(
        file: FileHandle,
        fingerprint: &Fingerprint,
        policy: UploadPolicy,
        resume: Option<ResumeRecord>,
    ) -> Self {
        let chunk_size = chunk_size(file.length(), &policy);
        let mut session = Self {
            session_id: generate_session_id(),
            file,
            fingerprint: fingerprint.key(),
            upload_url: None,
            retries_left: policy.max_chunk_retries,
            policy,
            chunk_size,
            status: UploadStatus::Pending,
            range: None,
            confirmed: 0,
            last_error: None,
            response_text: None,
            cancel: CancellationToken::new(),
            outbox: Vec::new(),
            store_op: None,
        };

        if let Some(record) = resume
            && !record.session_id.is_empty()
            && !record.upload_url.is_empty()
        {
            info!(
                session = %record.session_id,
                file = %session.file.name(),
                "resuming upload from saved state"
            );
            session.session_id = record.session_id;
            session.upload_url = Some(record.upload_url);
            session.response_text = Some(record.uploaded_ranges);
        }
        session
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn file(&self) -> &FileHandle {
        &self.file
    }

    /// Fingerprint key; empty when the file is not resumable.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn upload_url(&self) -> Option<&str> {
        self.upload_url.as_deref()
    }

    pub fn set_upload_url(&mut self, url: impl Into<String>) {
        self.upload_url = Some(url.into());
    }

    pub fn status(&self) -> UploadStatus {
        self.status
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Range of the chunk being (or about to be) sent.
    pub fn current_range(&self) -> Option<ChunkRange> {
        self.range
    }

    /// Bytes the server has confirmed.
    pub fn confirmed(&self) -> u64 {
        self.confirmed
    }

    pub fn retries_left(&self) -> u32 {
        self.retries_left
    }

    pub fn last_error(&self) -> Option<&ChunkFailure> {
        self.last_error.as_ref()
    }

    /// Last range-report or final body from the server.
    pub fn response_text(&self) -> Option<&str> {
        self.response_text.as_deref()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Requests cancellation. Takes effect at the next response boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Removes and returns the queued notifications.
    pub fn take_events(&mut self) -> Vec<UploadEvent> {
        std::mem::take(&mut self.outbox)
    }

    /// Begins (or restarts) the upload.
    pub fn start(&mut self, store: &ResumeStore) -> Step {
        let step = self.begin();
        self.apply_store_op(store);
        step
    }

    /// Applies the result of one chunk exchange.
    pub fn handle_outcome(
        &mut self,
        outcome: Result<String, ChunkFailure>,
        store: &ResumeStore,
    ) -> Step {
        let step = self.apply_outcome(outcome);
        self.apply_store_op(store);
        step
    }

    fn begin(&mut self) -> Step {
        self.last_error = None;

        if !self.file.exists() || self.upload_url.is_none() {
            return self.fail(ChunkFailure::other("missing file or upload URL"));
        }
        if self.file.length() == 0 {
            return self.fail(ChunkFailure::other("file is empty"));
        }
        if self.is_cancelled() {
            self.set_status(UploadStatus::Canceled);
            return Step::Finished;
        }

        self.retries_left = self.policy.max_chunk_retries;
        self.set_status(UploadStatus::Uploading);

        if self.range.is_none() {
            let plan = self.plan();
            self.confirmed = plan.confirmed;
            self.range = plan.range;
            if plan.is_complete(self.file.length()) || plan.range.is_none() {
                return self.complete();
            }
        }
        Step::Send
    }

    fn apply_outcome(&mut self, outcome: Result<String, ChunkFailure>) -> Step {
        if self.is_cancelled() {
            info!(session = %self.session_id, "upload canceled");
            self.set_status(UploadStatus::Canceled);
            return Step::Finished;
        }

        match outcome {
            Err(failure) => {
                self.retries_left = self.retries_left.saturating_sub(1);
                warn!(
                    session = %self.session_id,
                    retries_left = self.retries_left,
                    error = %failure,
                    "chunk failed"
                );
                if self.retries_left > 0 {
                    self.last_error = Some(failure);
                    self.set_status(UploadStatus::Retry);
                    Step::RetryAfter(self.policy.retry_delay(self.retries_left))
                } else {
                    self.fail(failure)
                }
            }
            Ok(body) => {
                self.last_error = None;
                self.response_text = Some(body);
                let plan = self.plan();
                self.confirmed = plan.confirmed;
                self.range = plan.range;

                let total = self.file.length();
                self.outbox.push(UploadEvent::Progress {
                    session_id: self.session_id.clone(),
                    bytes_uploaded: self.confirmed.min(total),
                    total_bytes: total,
                });

                if plan.is_complete(total) || plan.range.is_none() {
                    return self.complete();
                }

                self.store_op = Some(StoreOp::Put(ResumeRecord::new(
                    self.fingerprint.as_str(),
                    self.session_id.as_str(),
                    self.upload_url.clone().unwrap_or_default(),
                    self.response_text.clone().unwrap_or_default(),
                )));
                self.retries_left = self.policy.max_chunk_retries;
                self.set_status(UploadStatus::Continue);
                Step::Send
            }
        }
    }

    /// Drives the session until it reaches a terminal status, forwarding
    /// notifications to `ctx.events`.
    pub async fn run(self, ctx: &UploadContext) -> UploadSession {
        let mut session = self.drive(ctx).await;
        for event in session.take_events() {
            let _ = ctx.events.send(event).await;
        }
        session
    }

    /// Like [`run`](Self::run) but leaves the final batch of events queued.
    pub(crate) async fn drive(mut self, ctx: &UploadContext) -> UploadSession {
        let mut step = self.begin();
        self.persist(&ctx.store).await;

        loop {
            match step {
                Step::Finished => break,
                Step::Send => {
                    self.flush(&ctx.events).await;
                    if self.status != UploadStatus::Uploading {
                        self.set_status(UploadStatus::Uploading);
                        self.flush(&ctx.events).await;
                    }
                    let outcome = self.transfer_chunk(ctx.transport.as_ref()).await;
                    step = self.apply_outcome(outcome);
                    self.persist(&ctx.store).await;
                }
                Step::RetryAfter(delay) => {
                    self.flush(&ctx.events).await;
                    debug!(
                        session = %self.session_id,
                        delay_ms = delay.as_millis() as u64,
                        "waiting before retry"
                    );
                    let cancel = self.cancel.clone();
                    let cancelled = tokio::select! {
                        _ = cancel.cancelled() => true,
                        _ = tokio::time::sleep(delay) => false,
                    };
                    if cancelled {
                        info!(session = %self.session_id, "upload canceled during retry wait");
                        self.set_status(UploadStatus::Canceled);
                        step = Step::Finished;
                    } else {
                        step = Step::Send;
                    }
                }
            }
        }
        self
    }

    /// Marks a never-started session as canceled.
    pub(crate) fn abandon(&mut self) {
        self.cancel.cancel();
        self.set_status(UploadStatus::Canceled);
    }

    /// Reads the current range from disk and sends it.
    async fn transfer_chunk(&self, transport: &dyn ChunkTransport) -> Result<String, ChunkFailure> {
        let (Some(range), Some(url)) = (self.range, self.upload_url.clone()) else {
            return Err(ChunkFailure::other("no chunk planned"));
        };

        let file = self.file.clone();
        let chunk = tokio::task::spawn_blocking(move || file.read_range(range))
            .await
            .map_err(|e| ChunkFailure::other(format!("read task failed: {e}")))?
            .map_err(|e| ChunkFailure::local_io(e.to_string()))?;

        debug!(
            session = %self.session_id,
            start = range.start,
            end = range.end,
            total = self.file.length(),
            "sending chunk"
        );

        transport
            .send_chunk(ChunkRequest {
                url,
                session_id: self.session_id.clone(),
                file_name: self.file.name().to_string(),
                range,
                total: self.file.length(),
                data: chunk.data,
            })
            .await
    }

    fn plan(&self) -> ChunkPlan {
        next_range(
            self.file.length(),
            self.chunk_size,
            self.response_text.as_deref(),
        )
    }

    fn apply_store_op(&mut self, store: &ResumeStore) {
        if let Some(op) = self.store_op.take() {
            op.apply(store);
        }
    }

    /// Runs the queued store write on the blocking pool.
    async fn persist(&mut self, store: &Arc<ResumeStore>) {
        let Some(op) = self.store_op.take() else {
            return;
        };
        let store = Arc::clone(store);
        if let Err(e) = tokio::task::spawn_blocking(move || op.apply(&store)).await {
            warn!(session = %self.session_id, error = %e, "resume store task failed");
        }
    }

    fn complete(&mut self) -> Step {
        self.store_op = Some(StoreOp::Delete(self.fingerprint.clone()));
        info!(session = %self.session_id, bytes = self.file.length(), "upload complete");
        self.set_status(UploadStatus::Complete);
        Step::Finished
    }

    fn fail(&mut self, failure: ChunkFailure) -> Step {
        warn!(session = %self.session_id, error = %failure, "upload failed");
        self.last_error = Some(failure);
        self.set_status(UploadStatus::Failed);
        Step::Finished
    }

    fn set_status(&mut self, status: UploadStatus) {
        self.status = status;
        self.outbox.push(UploadEvent::StatusChanged {
            session_id: self.session_id.clone(),
            status,
        });
        match status {
            UploadStatus::Complete => self.outbox.push(UploadEvent::Completed {
                session_id: self.session_id.clone(),
                response: self.response_text.clone().unwrap_or_default(),
                total_bytes: self.file.length(),
            }),
            UploadStatus::Failed => {
                let (error_code, description) = match &self.last_error {
                    Some(f) => (f.kind.code(), f.message.clone()),
                    None => (ErrorKind::Other.code(), String::new()),
                };
                self.outbox.push(UploadEvent::Failed {
                    session_id: self.session_id.clone(),
                    error_code,
                    description,
                });
            }
            _ => {}
        }
    }

    async fn flush(&mut self, events: &mpsc::Sender<UploadEvent>) {
        for event in self.take_events() {
            let _ = events.send(event).await;
        }
    }
}
