//! Upload coordinator: owns the session state machine and the bounded
//! dispatch loop.
//!
//! Every status transition is written to the store by a single per-session
//! dispatch loop, so two part completions can never race to double-trigger
//! finalization. Part tasks move bytes only; they report outcomes back over
//! a channel and never touch the store themselves.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use chunklift_model::{
    PartStatus, ProgressSnapshot, SessionStatus, UploadConfig, UploadPart, UploadSession,
    plan_parts, verify_plan,
};
use chunklift_store::{PartUpdate, SessionStore};
use chunklift_transfer::{
    FileSource, PartUploader, SourceMeta, StorageClient, TransferError, UploadSource,
};

use crate::backoff::RetryPolicy;
use crate::error::EngineError;
use crate::progress::{SpeedTracker, build_snapshot};

/// Progress fan-out buffer per session. Slow observers lag, they never
/// block dispatch.
const PROGRESS_CHANNEL_CAPACITY: usize = 64;

/// Any non-terminal session status; used for the cancel transition.
const NON_TERMINAL: &[SessionStatus] = &[
    SessionStatus::Pending,
    SessionStatus::InProgress,
    SessionStatus::Paused,
];

/// Control messages from the caller-facing API into a session's loop.
enum Control {
    Pause,
    Resume,
    Cancel,
}

/// Caller-facing handle to one session's running dispatch loop.
struct RuntimeHandle {
    control_tx: mpsc::UnboundedSender<Control>,
    shutdown: CancellationToken,
    progress_tx: broadcast::Sender<ProgressSnapshot>,
    /// Set when the engine paused the session for a constraint violation;
    /// only such sessions are eligible for auto-resume.
    auto_paused: Arc<AtomicBool>,
}

/// Orchestrates resumable multipart uploads.
///
/// One dispatch loop runs per active session; the coordinator itself is a
/// thin API over the store, the storage client, and those loops.
pub struct UploadCoordinator {
    store: Arc<dyn SessionStore>,
    client: Arc<dyn StorageClient>,
    config: UploadConfig,
    runtimes: Arc<RwLock<HashMap<String, RuntimeHandle>>>,
}

impl UploadCoordinator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        client: Arc<dyn StorageClient>,
        config: UploadConfig,
    ) -> Self {
        Self {
            store,
            client,
            config,
            runtimes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn SessionStore> {
        Arc::clone(&self.store)
    }

    /// Starts a new upload session for a local file.
    pub async fn start(&self, path: impl AsRef<Path>) -> Result<String, EngineError> {
        let path = path.as_ref();
        let source = FileSource::open(path).await?;
        let file_name = path
            .file_name()
            .map_or_else(|| "upload".to_string(), |n| n.to_string_lossy().into_owned());
        self.start_with_source(
            Arc::new(source),
            &path.to_string_lossy(),
            &file_name,
        )
        .await
    }

    /// Starts a new upload session reading from an arbitrary source.
    ///
    /// Plans the chunks, persists the session and its parts as pending, and
    /// spawns the dispatch loop. Returns the new session id.
    pub async fn start_with_source(
        &self,
        source: Arc<dyn UploadSource>,
        source_path: &str,
        file_name: &str,
    ) -> Result<String, EngineError> {
        self.config.validate()?;
        let total_bytes = source.total_bytes();
        let ranges = plan_parts(total_bytes, self.config.chunk_bytes)?;

        let session_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let session = UploadSession {
            session_id: session_id.clone(),
            source_path: source_path.to_string(),
            file_name: file_name.to_string(),
            total_bytes,
            chunk_bytes: self.config.chunk_bytes,
            total_parts: ranges.len() as u32,
            remote_upload_id: None,
            status: SessionStatus::Pending,
            constraints: self.config.constraints,
            created_at: now,
            updated_at: now,
            error_message: None,
        };
        let parts: Vec<UploadPart> = ranges
            .iter()
            .enumerate()
            .map(|(i, r)| UploadPart::new(&session_id, (i + 1) as u32, *r))
            .collect();

        self.store.create_session(&session).await?;
        self.store.create_parts(&session_id, &parts).await?;

        info!(
            session = %session_id,
            file = %file_name,
            total_bytes,
            parts = parts.len(),
            "upload session created"
        );

        self.spawn_runtime(&session_id, source).await;
        Ok(session_id)
    }

    /// Re-attaches a dispatch loop to an interrupted session (after a
    /// restart). A session can also still be `Pending` if the process died
    /// before initiation finished. Parts left in `Uploading` necessarily
    /// have no task anymore and are reset to pending.
    pub async fn attach(&self, session_id: &str) -> Result<(), EngineError> {
        if self.is_attached(session_id).await {
            return Ok(());
        }
        let session = self.require_session(session_id).await?;
        if !matches!(
            session.status,
            SessionStatus::InProgress | SessionStatus::Pending
        ) {
            return Err(EngineError::InvalidState {
                session_id: session_id.to_string(),
                status: session.status,
                op: "attach",
            });
        }

        let parts = self.store.get_parts(session_id).await?;
        if !verify_plan(session.total_bytes, session.chunk_bytes, &parts) {
            let msg = "persisted parts no longer match the chunk plan";
            self.store.set_session_error(session_id, msg).await?;
            self.store
                .transition_session(session_id, NON_TERMINAL, SessionStatus::Failed)
                .await?;
            return Err(EngineError::PlanMismatch(session_id.to_string()));
        }
        for part in parts.iter().filter(|p| p.status == PartStatus::Uploading) {
            debug!(session = %session_id, part = part.part_number, "resetting orphaned part");
            self.store
                .update_part(session_id, part.part_number, PartUpdate::Reset)
                .await?;
        }

        let source = match FileSource::open(&session.source_path).await {
            Ok(source) => Arc::new(source),
            Err(e) => {
                self.store
                    .set_session_error(session_id, &e.to_string())
                    .await?;
                self.store
                    .transition_session(session_id, NON_TERMINAL, SessionStatus::Failed)
                    .await?;
                return Err(e.into());
            }
        };
        if source.total_bytes() != session.total_bytes {
            let msg = format!(
                "source size changed from {} to {}",
                session.total_bytes,
                source.total_bytes()
            );
            self.store.set_session_error(session_id, &msg).await?;
            self.store
                .transition_session(session_id, NON_TERMINAL, SessionStatus::Failed)
                .await?;
            return Err(EngineError::Transfer(TransferError::SourceRead(msg)));
        }

        info!(session = %session_id, "re-attaching dispatch loop");
        self.spawn_runtime(session_id, source).await;
        Ok(())
    }

    /// Pauses an in-progress session. In-flight parts drain to completion
    /// and are recorded normally; no new part is dispatched. Pausing an
    /// already-paused session is a no-op.
    pub async fn pause(&self, session_id: &str) -> Result<(), EngineError> {
        let session = self.require_session(session_id).await?;
        match session.status {
            SessionStatus::Paused => {
                // A user pause overrides a constraint pause: the session
                // must not auto-resume behind the user's back.
                if let Some(rt) = self.runtimes.read().await.get(session_id) {
                    rt.auto_paused.store(false, Ordering::SeqCst);
                }
                Ok(())
            }
            SessionStatus::InProgress => {
                self.store
                    .transition_session(
                        session_id,
                        &[SessionStatus::InProgress],
                        SessionStatus::Paused,
                    )
                    .await?;
                if let Some(rt) = self.runtimes.read().await.get(session_id) {
                    rt.auto_paused.store(false, Ordering::SeqCst);
                    let _ = rt.control_tx.send(Control::Pause);
                }
                info!(session = %session_id, "session paused");
                Ok(())
            }
            status => Err(EngineError::InvalidState {
                session_id: session_id.to_string(),
                status,
                op: "pause",
            }),
        }
    }

    /// Resumes a paused session, restarting dispatch for every
    /// non-uploaded part.
    pub async fn resume(&self, session_id: &str) -> Result<(), EngineError> {
        let session = self.require_session(session_id).await?;
        if session.status != SessionStatus::Paused {
            return Err(EngineError::InvalidState {
                session_id: session_id.to_string(),
                status: session.status,
                op: "resume",
            });
        }
        self.store
            .transition_session(session_id, &[SessionStatus::Paused], SessionStatus::InProgress)
            .await?;
        info!(session = %session_id, "session resumed");

        let attached = {
            let runtimes = self.runtimes.read().await;
            if let Some(rt) = runtimes.get(session_id) {
                rt.auto_paused.store(false, Ordering::SeqCst);
                let _ = rt.control_tx.send(Control::Resume);
                true
            } else {
                false
            }
        };
        if !attached {
            // Paused across a restart: no loop exists yet.
            self.attach(session_id).await?;
        }
        Ok(())
    }

    /// Cancels a session from any non-terminal state. In-flight parts are
    /// stopped, the backend upload is aborted best-effort, and the session
    /// ends `Aborted` regardless of the abort call's outcome.
    pub async fn cancel(&self, session_id: &str) -> Result<(), EngineError> {
        let session = self.require_session(session_id).await?;
        if session.status.is_terminal() {
            return Err(EngineError::InvalidState {
                session_id: session_id.to_string(),
                status: session.status,
                op: "cancel",
            });
        }

        let delivered = {
            let runtimes = self.runtimes.read().await;
            runtimes
                .get(session_id)
                .map(|rt| rt.control_tx.send(Control::Cancel).is_ok())
                .unwrap_or(false)
        };
        if !delivered {
            // No live loop (e.g. paused across a restart): finish directly.
            self.store
                .transition_session(session_id, NON_TERMINAL, SessionStatus::Aborted)
                .await?;
            abort_remote(&*self.client, &session).await;
            info!(session = %session_id, "session aborted");
        }
        Ok(())
    }

    /// Current progress computed from the store.
    pub async fn get_progress(&self, session_id: &str) -> Result<ProgressSnapshot, EngineError> {
        let session = self.require_session(session_id).await?;
        let parts = self.store.get_parts(session_id).await?;
        Ok(build_snapshot(&session, &parts, None, None))
    }

    /// Subscribes to the session's progress snapshot stream. Fails when no
    /// dispatch loop is active for the session.
    pub async fn observe_progress(
        &self,
        session_id: &str,
    ) -> Result<broadcast::Receiver<ProgressSnapshot>, EngineError> {
        self.require_session(session_id).await?;
        let runtimes = self.runtimes.read().await;
        runtimes
            .get(session_id)
            .map(|rt| rt.progress_tx.subscribe())
            .ok_or_else(|| EngineError::NotAttached(session_id.to_string()))
    }

    /// True when a dispatch loop is currently attached to the session.
    pub async fn is_attached(&self, session_id: &str) -> bool {
        self.runtimes.read().await.contains_key(session_id)
    }

    /// Constraint violation: pause every in-progress session, marked as
    /// auto-paused so it resumes by itself once constraints hold again.
    pub async fn auto_pause_all(&self) {
        let ids: Vec<String> = self.runtimes.read().await.keys().cloned().collect();
        for session_id in ids {
            let paused = self
                .store
                .transition_session(
                    &session_id,
                    &[SessionStatus::InProgress],
                    SessionStatus::Paused,
                )
                .await;
            if paused.is_ok() {
                let runtimes = self.runtimes.read().await;
                if let Some(rt) = runtimes.get(&session_id) {
                    rt.auto_paused.store(true, Ordering::SeqCst);
                    let _ = rt.control_tx.send(Control::Pause);
                }
                info!(session = %session_id, "auto-paused on constraint violation");
            }
        }
    }

    /// Constraints hold again: resume every auto-paused session. Sessions
    /// paused by the user stay paused.
    pub async fn auto_resume_all(&self) {
        let ids: Vec<String> = {
            let runtimes = self.runtimes.read().await;
            runtimes
                .iter()
                .filter(|(_, rt)| rt.auto_paused.load(Ordering::SeqCst))
                .map(|(id, _)| id.clone())
                .collect()
        };
        for session_id in ids {
            let resumed = self
                .store
                .transition_session(
                    &session_id,
                    &[SessionStatus::Paused],
                    SessionStatus::InProgress,
                )
                .await;
            if resumed.is_ok() {
                let runtimes = self.runtimes.read().await;
                if let Some(rt) = runtimes.get(&session_id) {
                    rt.auto_paused.store(false, Ordering::SeqCst);
                    let _ = rt.control_tx.send(Control::Resume);
                }
                info!(session = %session_id, "auto-resumed after constraints satisfied");
            }
        }
    }

    /// Stops every dispatch loop without changing persisted state; the
    /// recovery sweep re-attaches interrupted sessions on next startup.
    pub async fn shutdown(&self) {
        let runtimes = self.runtimes.read().await;
        for rt in runtimes.values() {
            rt.shutdown.cancel();
        }
    }

    async fn require_session(&self, session_id: &str) -> Result<UploadSession, EngineError> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))
    }

    async fn spawn_runtime(&self, session_id: &str, source: Arc<dyn UploadSource>) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (progress_tx, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        let handle = RuntimeHandle {
            control_tx,
            shutdown: CancellationToken::new(),
            progress_tx: progress_tx.clone(),
            auto_paused: Arc::new(AtomicBool::new(false)),
        };
        let shutdown = handle.shutdown.clone();
        self.runtimes
            .write()
            .await
            .insert(session_id.to_string(), handle);

        let ctx = RunCtx {
            session_id: session_id.to_string(),
            store: Arc::clone(&self.store),
            client: Arc::clone(&self.client),
            config: self.config.clone(),
            source,
            control_rx,
            shutdown,
            progress_tx,
        };
        let runtimes = Arc::clone(&self.runtimes);
        tokio::spawn(async move {
            let session_id = ctx.session_id.clone();
            if let Err(e) = run_session(ctx).await {
                // Persistence failures stop the loop without a transition;
                // the session keeps its last-known state for the recovery
                // sweep to re-evaluate.
                error!(session = %session_id, error = %e, "dispatch loop stopped");
            }
            runtimes.write().await.remove(&session_id);
        });
    }
}

/// Everything one dispatch loop needs. Avoids threading eight separate
/// parameters through the run functions.
struct RunCtx {
    session_id: String,
    store: Arc<dyn SessionStore>,
    client: Arc<dyn StorageClient>,
    config: UploadConfig,
    source: Arc<dyn UploadSource>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    shutdown: CancellationToken,
    progress_tx: broadcast::Sender<ProgressSnapshot>,
}

/// Why the dispatch loop is tearing down.
enum Teardown {
    Cancelled,
    Failed(String),
}

async fn run_session(mut ctx: RunCtx) -> Result<(), EngineError> {
    let session_id = ctx.session_id.clone();
    let policy = RetryPolicy::from_config(&ctx.config);
    let limit = ctx.config.effective_concurrency();

    // Initiation: fetch or create the remote upload id, then mark the
    // session in progress. An initiation failure is irrecoverable.
    let session = match ctx.store.get_session(&session_id).await? {
        Some(session) => session,
        None => return Err(EngineError::SessionNotFound(session_id)),
    };
    let remote_upload_id = match &session.remote_upload_id {
        Some(id) => id.clone(),
        None => {
            let meta = SourceMeta {
                file_name: session.file_name.clone(),
                total_bytes: session.total_bytes,
                content_type: None,
            };
            let initiated = tokio::select! {
                _ = ctx.shutdown.cancelled() => return Ok(()),
                outcome = tokio::time::timeout(ctx.config.network_timeout, ctx.client.initiate(&meta)) => {
                    match outcome {
                        Ok(result) => result,
                        Err(_) => Err(TransferError::Timeout(ctx.config.network_timeout)),
                    }
                }
            };
            match initiated {
                Ok(id) => {
                    ctx.store.set_remote_upload_id(&session_id, &id).await?;
                    id
                }
                Err(e) => {
                    warn!(session = %session_id, error = %e, "initiation failed");
                    ctx.store
                        .set_session_error(&session_id, &format!("initiation failed: {e}"))
                        .await?;
                    ctx.store
                        .transition_session(&session_id, NON_TERMINAL, SessionStatus::Failed)
                        .await?;
                    emit(&ctx, None, None).await;
                    return Ok(());
                }
            }
        }
    };
    if session.status == SessionStatus::Pending {
        ctx.store
            .transition_session(
                &session_id,
                &[SessionStatus::Pending],
                SessionStatus::InProgress,
            )
            .await?;
    }
    emit(&ctx, None, None).await;

    let uploader = Arc::new(PartUploader::new(
        Arc::clone(&ctx.client),
        Arc::clone(&ctx.source),
        ctx.config.network_timeout,
    ));
    let parts_cancel = CancellationToken::new();
    let (results_tx, mut results_rx) =
        mpsc::channel::<(u32, Result<String, TransferError>)>(limit.max(1));

    let mut inflight: HashMap<u32, tokio::task::JoinHandle<()>> = HashMap::new();
    let mut backoff_until: HashMap<u32, Instant> = HashMap::new();
    let mut paused = false;
    let mut speed = SpeedTracker::new();

    let teardown = loop {
        let parts = ctx.store.get_parts(&session_id).await?;

        // A permanently failed part fails the whole session.
        if let Some(failed) = parts.iter().find(|p| p.status == PartStatus::Failed) {
            break Teardown::Failed(format!(
                "part {} failed after {} attempts",
                failed.part_number, failed.retry_count
            ));
        }

        let uploaded = parts
            .iter()
            .filter(|p| p.status == PartStatus::Uploaded)
            .count() as u32;
        if !paused && uploaded == session.total_parts && inflight.is_empty() {
            finalize(&ctx, &remote_upload_id, &parts, &policy).await?;
            return Ok(());
        }

        // Dispatch: next pending parts in ascending order, respecting the
        // concurrency limit and per-part backoff deadlines.
        if !paused {
            let now = Instant::now();
            let eligible: Vec<_> = parts
                .iter()
                .filter(|p| {
                    p.status == PartStatus::Pending
                        && !inflight.contains_key(&p.part_number)
                        && backoff_until.get(&p.part_number).is_none_or(|&t| t <= now)
                })
                .collect();
            for part in eligible {
                if inflight.len() >= limit {
                    break;
                }
                let n = part.part_number;
                backoff_until.remove(&n);
                ctx.store.update_part(&session_id, n, PartUpdate::Launch).await?;
                debug!(session = %session_id, part = n, bytes = part.range.len(), "part launched");

                let task_uploader = Arc::clone(&uploader);
                let task_tx = results_tx.clone();
                let task_cancel = parts_cancel.clone();
                let remote = remote_upload_id.clone();
                let range = part.range;
                let handle = tokio::spawn(async move {
                    let result = task_uploader
                        .upload_part(&remote, n, &range, &task_cancel)
                        .await;
                    let _ = task_tx.send((n, result)).await;
                });
                inflight.insert(n, handle);
                emit_with_current(&ctx, &inflight, speed.bytes_per_second()).await;
            }
        }

        // Earliest backoff deadline among parts we could dispatch next.
        let next_deadline = if paused || inflight.len() >= limit {
            None
        } else {
            parts
                .iter()
                .filter(|p| {
                    p.status == PartStatus::Pending && !inflight.contains_key(&p.part_number)
                })
                .filter_map(|p| backoff_until.get(&p.part_number).copied())
                .min()
        };

        tokio::select! {
            _ = ctx.shutdown.cancelled() => {
                parts_cancel.cancel();
                drain_inflight(&ctx, &mut inflight, &mut results_rx).await;
                return Ok(());
            }

            control = ctx.control_rx.recv() => match control {
                Some(Control::Pause) => {
                    paused = true;
                    emit_with_current(&ctx, &inflight, speed.bytes_per_second()).await;
                }
                Some(Control::Resume) => {
                    paused = false;
                    backoff_until.clear();
                    emit_with_current(&ctx, &inflight, speed.bytes_per_second()).await;
                }
                Some(Control::Cancel) => break Teardown::Cancelled,
                // Coordinator dropped; behave like shutdown.
                None => {
                    parts_cancel.cancel();
                    drain_inflight(&ctx, &mut inflight, &mut results_rx).await;
                    return Ok(());
                }
            },

            result = results_rx.recv() => {
                // The loop holds a sender, so recv never yields None here.
                let Some((n, result)) = result else { continue };
                inflight.remove(&n);
                let prior_retries = parts
                    .iter()
                    .find(|p| p.part_number == n)
                    .map(|p| p.retry_count)
                    .unwrap_or(0);

                match result {
                    Ok(token) => {
                        let part = ctx
                            .store
                            .update_part(&session_id, n, PartUpdate::Uploaded { integrity_token: token })
                            .await?;
                        speed.add(part.range.len());
                        debug!(session = %session_id, part = n, "part uploaded");
                        emit_with_current(&ctx, &inflight, speed.bytes_per_second()).await;
                    }
                    Err(TransferError::Cancelled) => {
                        // Interrupted attempt during teardown elsewhere;
                        // return the part to the backlog.
                        ctx.store.update_part(&session_id, n, PartUpdate::Reset).await?;
                    }
                    Err(e) if e.is_retryable() && prior_retries < ctx.config.max_retries => {
                        let part = ctx
                            .store
                            .update_part(&session_id, n, PartUpdate::RetryableFailure)
                            .await?;
                        let delay = policy.delay_for_retry(part.retry_count);
                        warn!(
                            session = %session_id,
                            part = n,
                            retry = part.retry_count,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "part attempt failed; will retry"
                        );
                        backoff_until.insert(n, Instant::now() + delay);
                        emit_with_current(&ctx, &inflight, speed.bytes_per_second()).await;
                    }
                    Err(e @ TransferError::SourceRead(_)) => {
                        // The local file is gone or changed: no retry can help.
                        ctx.store.update_part(&session_id, n, PartUpdate::Reset).await?;
                        break Teardown::Failed(e.to_string());
                    }
                    Err(e) => {
                        // Permanent rejection or exhausted retries.
                        ctx.store
                            .update_part(&session_id, n, PartUpdate::ExhaustedFailure)
                            .await?;
                        warn!(session = %session_id, part = n, error = %e, "part failed permanently");
                        break Teardown::Failed(format!("part {n} failed: {e}"));
                    }
                }
            }

            _ = async {
                match next_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            } => {}
        }
    };

    // Teardown: stop in-flight parts, record the terminal state first so a
    // late success can never land after it, then drain.
    parts_cancel.cancel();
    match teardown {
        Teardown::Cancelled => {
            ctx.store
                .transition_session(&session_id, NON_TERMINAL, SessionStatus::Aborted)
                .await?;
            drain_inflight(&ctx, &mut inflight, &mut results_rx).await;
            let session = ctx.store.get_session(&session_id).await?;
            if let Some(session) = session {
                abort_remote(&*ctx.client, &session).await;
            }
            info!(session = %session_id, "session aborted");
        }
        Teardown::Failed(message) => {
            ctx.store.set_session_error(&session_id, &message).await?;
            ctx.store
                .transition_session(
                    &session_id,
                    &[SessionStatus::InProgress, SessionStatus::Paused],
                    SessionStatus::Failed,
                )
                .await?;
            drain_inflight(&ctx, &mut inflight, &mut results_rx).await;
            info!(session = %session_id, error = %message, "session failed");
        }
    }
    emit(&ctx, None, None).await;
    Ok(())
}

/// Completes the remote upload from the ordered integrity tokens. One
/// retry with backoff, then the session fails.
async fn finalize(
    ctx: &RunCtx,
    remote_upload_id: &str,
    parts: &[UploadPart],
    policy: &RetryPolicy,
) -> Result<(), EngineError> {
    let session_id = &ctx.session_id;
    let mut tokens = Vec::with_capacity(parts.len());
    for part in parts {
        match &part.integrity_token {
            Some(token) => tokens.push((part.part_number, token.clone())),
            None => {
                // Unreachable per the store invariant; refuse to complete
                // rather than send a hole to the backend.
                return Err(EngineError::PlanMismatch(session_id.clone()));
            }
        }
    }

    let mut last_err = None;
    for attempt in 0..2u32 {
        if attempt > 0 {
            tokio::time::sleep(policy.delay_for_retry(1)).await;
        }
        match ctx.client.complete(remote_upload_id, &tokens).await {
            Ok(()) => {
                // NON_TERMINAL rather than just InProgress: a pause landing
                // in the store at this exact moment must not strand a fully
                // uploaded session.
                ctx.store
                    .transition_session(session_id, NON_TERMINAL, SessionStatus::Completed)
                    .await?;
                info!(session = %session_id, parts = tokens.len(), "upload completed");
                emit(ctx, None, None).await;
                return Ok(());
            }
            Err(e) => {
                warn!(session = %session_id, attempt, error = %e, "completion call failed");
                last_err = Some(e);
            }
        }
    }

    let message = format!(
        "completion failed: {}",
        last_err.map_or_else(String::new, |e| e.to_string())
    );
    ctx.store.set_session_error(session_id, &message).await?;
    ctx.store
        .transition_session(session_id, NON_TERMINAL, SessionStatus::Failed)
        .await?;
    info!(session = %session_id, error = %message, "session failed");
    emit(ctx, None, None).await;
    Ok(())
}

/// Waits for every in-flight part to report, returning interrupted parts
/// to the backlog. Successes are *not* recorded; the terminal transition
/// has already been written.
async fn drain_inflight(
    ctx: &RunCtx,
    inflight: &mut HashMap<u32, tokio::task::JoinHandle<()>>,
    results_rx: &mut mpsc::Receiver<(u32, Result<String, TransferError>)>,
) {
    while !inflight.is_empty() {
        match results_rx.recv().await {
            Some((n, _result)) => {
                inflight.remove(&n);
                if let Err(e) = ctx
                    .store
                    .update_part(&ctx.session_id, n, PartUpdate::Reset)
                    .await
                {
                    debug!(session = %ctx.session_id, part = n, error = %e, "drain reset skipped");
                }
            }
            None => break,
        }
    }
}

/// Best-effort backend abort; failures are logged, never escalated.
/// Storage-side multipart uploads expire on their own.
async fn abort_remote(client: &dyn StorageClient, session: &UploadSession) {
    let Some(remote_upload_id) = &session.remote_upload_id else {
        return;
    };
    if let Err(e) = client.abort(remote_upload_id).await {
        warn!(
            session = %session.session_id,
            remote = %remote_upload_id,
            error = %e,
            "backend abort failed; upload left to expire"
        );
    }
}

async fn emit_with_current(
    ctx: &RunCtx,
    inflight: &HashMap<u32, tokio::task::JoinHandle<()>>,
    bytes_per_second: Option<u64>,
) {
    let current = inflight.keys().min().copied();
    emit(ctx, current, bytes_per_second).await;
}

/// Emits a progress snapshot built from the store's current view.
async fn emit(ctx: &RunCtx, current_part: Option<u32>, bytes_per_second: Option<u64>) {
    let session = match ctx.store.get_session(&ctx.session_id).await {
        Ok(Some(session)) => session,
        _ => return,
    };
    let parts = match ctx.store.get_parts(&ctx.session_id).await {
        Ok(parts) => parts,
        Err(_) => return,
    };
    let snapshot = build_snapshot(&session, &parts, current_part, bytes_per_second);
    let _ = ctx.progress_tx.send(snapshot);
}
