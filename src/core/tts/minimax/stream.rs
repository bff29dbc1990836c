//! Synthesis pipeline: one caller-visible text-in / audio-out stream.
//!
//! Each [`SynthesizeStream`] is driven by a background task that borrows one
//! pooled connection and runs three stages concurrently as a single unit:
//!
//! - **input**: caller text and flush signals into the sentence stream, then
//!   end of input (once) when the caller is done
//! - **send**: tokens out as `task_continue`, counted in [`PendingRequests`]
//! - **receive**: audio events decoded into the [`AudioEmitter`] until input has
//!   finished and every sent token has been answered
//!
//! Whichever stage ends the stream, the others are dropped with it, the
//! emitter is flushed exactly once and the connection is either returned to
//! the pool (clean completion) or closed (anything else).

use futures::Stream;
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::{ConnectOptions, StreamConfig, SynthesisOptions};
use super::messages::{ApiError, ServerEvent};
use super::metrics::SynthesisMetrics;
use super::pending::PendingRequests;
use super::pool::{ConnectionPool, MinimaxConnector, PooledConnection};
use super::session::{SessionReceiver, SessionSender};
use crate::core::tokenizer::{MixedLanguageTokenizer, SentenceStream};
use crate::core::tts::base::{AudioEmitter, AudioEvent, TTSError, TTSResult};
use crate::core::tts::emitter::EventSender;

/// How long to listen for a closure after an error event answered the last
/// outstanding token.
const ERROR_CLOSE_WINDOW: Duration = Duration::from_millis(100);

enum InputMessage {
    Text(String),
    Flush,
}

/// How the stage group ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    /// Every token answered with a final chunk
    Clean,
    /// Every token answered, some of them with an error event
    Degraded,
    /// Grace period expired with tokens still pending
    Forced,
}

/// Wake-ups shared by the send and receive stages.
#[derive(Default)]
struct StageSignals {
    /// Tokenization ended before a single token was sent
    no_tokens_sent: Notify,
    /// Tokenization ended; completion may now be reachable
    input_finished: Notify,
}

// =============================================================================
// Caller-facing handle
// =============================================================================

/// Caller side of one synthesis stream.
///
/// Write text with [`push_text`](Self::push_text), mark sentence boundaries with
/// [`flush`](Self::flush) and finish with [`end_input`](Self::end_input); read
/// audio by polling the stream. A fatal failure ends the stream with exactly
/// one `Err`; success simply ends it.
///
/// Both directions are unbounded. The session runs at the service's pace and
/// never waits for the caller, so audio the caller has not polled yet stays
/// buffered in memory until it is read or the stream is dropped.
pub struct SynthesizeStream {
    request_id: String,
    input: Mutex<Option<mpsc::UnboundedSender<InputMessage>>>,
    events: mpsc::UnboundedReceiver<Result<AudioEvent, TTSError>>,
    cancel: CancellationToken,
    metrics: Arc<Mutex<SynthesisMetrics>>,
    task: Option<JoinHandle<()>>,
}

impl SynthesizeStream {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn push_text(&self, text: &str) -> TTSResult<()> {
        self.send_input(InputMessage::Text(text.to_string()))
    }

    /// Force a token boundary at the current position.
    pub fn flush(&self) -> TTSResult<()> {
        self.send_input(InputMessage::Flush)
    }

    /// Signal that no more text will follow. Safe to call more than once.
    pub fn end_input(&self) {
        if self.input.lock().take().is_some() {
            debug!("[{}] Input ended by caller", self.request_id);
        }
    }

    /// Stop the stream. Audio produced so far is flushed; the connection is closed.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel and wait for the pipeline to finish its cleanup.
    pub async fn aclose(&mut self) {
        self.end_input();
        self.cancel.cancel();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            error!("[{}] Pipeline task failed: {e}", self.request_id);
        }
    }

    /// Snapshot of the stream's metrics so far.
    pub fn metrics(&self) -> SynthesisMetrics {
        self.metrics.lock().clone()
    }

    fn send_input(&self, message: InputMessage) -> TTSResult<()> {
        let guard = self.input.lock();
        let sender = guard.as_ref().ok_or_else(|| {
            TTSError::StreamClosed(format!("[{}] input already ended", self.request_id))
        })?;
        sender.send(message).map_err(|_| {
            TTSError::StreamClosed(format!("[{}] pipeline no longer running", self.request_id))
        })
    }
}

impl Stream for SynthesizeStream {
    type Item = Result<AudioEvent, TTSError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

impl Drop for SynthesizeStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Everything a pipeline task needs, moved into the task at spawn time.
pub(crate) struct Pipeline {
    pub request_id: String,
    pub pool: ConnectionPool<MinimaxConnector>,
    pub options: Arc<SynthesisOptions>,
    pub stream_config: StreamConfig,
    pub connect: ConnectOptions,
    pub emitter: Box<dyn AudioEmitter>,
    pub events: EventSender,
    pub cancel: CancellationToken,
    pub metrics: Arc<Mutex<SynthesisMetrics>>,
}

impl Pipeline {
    /// Spawn the pipeline through `spawn` and return the caller handle.
    pub(crate) fn start<F>(
        self,
        events: mpsc::UnboundedReceiver<Result<AudioEvent, TTSError>>,
        spawn: F,
    ) -> SynthesizeStream
    where
        F: FnOnce(Pin<Box<dyn Future<Output = ()> + Send>>) -> JoinHandle<()>,
    {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let request_id = self.request_id.clone();
        let cancel = self.cancel.clone();
        let metrics = Arc::clone(&self.metrics);
        let task = spawn(Box::pin(self.run(input_rx)));

        SynthesizeStream {
            request_id,
            input: Mutex::new(Some(input_tx)),
            events,
            cancel,
            metrics,
            task: Some(task),
        }
    }

    async fn run(mut self, input_rx: mpsc::UnboundedReceiver<InputMessage>) {
        let result = self.drive(input_rx).await;

        self.emitter.flush();

        let summary = self.metrics.lock().summary();
        match result {
            Ok(()) => info!("Synthesis finished: {summary}"),
            Err(e) => {
                error!("[{}] Synthesis failed: {e} ({summary})", self.request_id);
                let _ = self.events.send(Err(e));
            }
        }
    }

    async fn drive(&mut self, input_rx: mpsc::UnboundedReceiver<InputMessage>) -> TTSResult<()> {
        let sample_rate = self.options.sample_rate.as_u32();
        let channels = self.options.channels.as_u16();
        self.emitter.initialize(sample_rate, channels, true)?;
        self.emitter.start_segment(&self.request_id);

        let acquire_started = Instant::now();
        let acquired = acquire_with_retry(
            &self.request_id,
            &self.pool,
            &self.connect,
            &self.cancel,
        )
        .await?;
        let Some(mut lease) = acquired else {
            debug!("[{}] Cancelled before a connection was acquired", self.request_id);
            self.metrics.lock().cancelled = true;
            return Ok(());
        };
        self.metrics.lock().acquire_duration = Some(acquire_started.elapsed());

        let outcome = self.run_stages(&mut lease, input_rx).await;

        match outcome {
            Ok(Some(Completion::Clean)) => {
                debug!("[{}] Returning connection to pool", self.request_id);
                lease.release().await;
                Ok(())
            }
            Ok(Some(completion)) => {
                debug!("[{}] Closing connection after {completion:?} completion", self.request_id);
                lease.discard().await;
                Ok(())
            }
            Ok(None) => {
                info!("[{}] Stream cancelled", self.request_id);
                self.metrics.lock().cancelled = true;
                lease.discard().await;
                Ok(())
            }
            Err(e) => {
                lease.discard().await;
                Err(e)
            }
        }
    }

    /// Run the three stages over one connection. `Ok(None)` means cancelled.
    async fn run_stages(
        &mut self,
        lease: &mut PooledConnection<MinimaxConnector>,
        input_rx: mpsc::UnboundedReceiver<InputMessage>,
    ) -> TTSResult<Option<Completion>> {
        let connection = lease.connection_mut()?;
        let (sender, receiver) = connection.split();

        let tokenizer = SentenceStream::new(
            Arc::new(MixedLanguageTokenizer::new(
                self.stream_config.tokenizer.clone(),
            )),
            self.stream_config.tokenizer.clone(),
        );
        let pending = PendingRequests::new();
        let signals = StageSignals::default();

        let receive = ReceiveStage {
            request_id: &self.request_id,
            pending: &pending,
            signals: &signals,
            emitter: &mut self.emitter,
            events: &self.events,
            metrics: &self.metrics,
            grace: self.stream_config.completion_grace,
            sample_rate: self.options.sample_rate.as_u32(),
            channels: self.options.channels.as_u16(),
        };

        let stages = futures::future::try_join3(
            input_stage(&self.request_id, input_rx, &tokenizer),
            send_stage(
                &self.request_id,
                sender,
                &tokenizer,
                &pending,
                &signals,
                &self.metrics,
            ),
            receive.run(receiver),
        );

        // Dropping `stages` cancels all three at once.
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Ok(None),
            result = stages => result.map(|(_, _, completion)| Some(completion)),
        };

        let snapshot = pending.snapshot();
        debug!(
            "[{}] Stages ended: sent {}, completed {}, pending {}",
            self.request_id, snapshot.sent, snapshot.completed, snapshot.pending
        );
        self.metrics.lock().tokens_completed = snapshot.completed;

        match outcome {
            // A clean outcome can only be trusted with nothing outstanding.
            Ok(Some(Completion::Clean)) if snapshot.pending > 0 => Ok(Some(Completion::Forced)),
            other => other,
        }
    }
}

// =============================================================================
// Stages
// =============================================================================

/// Acquire with the caller-side retry policy. `Ok(None)` means cancelled.
///
/// Only connection-class failures are retried.
async fn acquire_with_retry(
    request_id: &str,
    pool: &ConnectionPool<MinimaxConnector>,
    connect: &ConnectOptions,
    cancel: &CancellationToken,
) -> TTSResult<Option<PooledConnection<MinimaxConnector>>> {
    let mut attempt: u32 = 0;
    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            result = pool.acquire(connect.timeout) => result,
        };

        match result {
            Ok(lease) => return Ok(Some(lease)),
            Err(e) if e.is_connection_error() && attempt < connect.max_retry => {
                attempt += 1;
                warn!(
                    "[{request_id}] Acquire failed (attempt {attempt}/{}): {e}; retrying in {:?}",
                    connect.max_retry + 1,
                    connect.retry_interval
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(None),
                    _ = tokio::time::sleep(connect.retry_interval) => {}
                }
            }
            Err(e) => return Err(e),
        }
    }
}


async fn input_stage(
    request_id: &str,
    mut input_rx: mpsc::UnboundedReceiver<InputMessage>,
    tokenizer: &SentenceStream,
) -> TTSResult<()> {
    while let Some(message) = input_rx.recv().await {
        let result = match message {
            InputMessage::Text(text) => tokenizer.push_text(&text),
            InputMessage::Flush => tokenizer.flush(),
        };
        result.map_err(|e| TTSError::InternalError(format!("[{request_id}] tokenizer: {e}")))?;
    }
    tokenizer.end_input();
    debug!("[{request_id}] Input stage finished");
    Ok(())
}

async fn send_stage(
    request_id: &str,
    mut sender: SessionSender<'_>,
    tokenizer: &SentenceStream,
    pending: &PendingRequests,
    signals: &StageSignals,
    metrics: &Mutex<SynthesisMetrics>,
) -> TTSResult<()> {
    let mut sent_any = false;

    while let Some(token) = tokenizer.next_token().await {
        if token.trim().is_empty() {
            continue;
        }
        let index = pending.on_sent();
        metrics.lock().mark_token_sent();
        debug!("[{request_id}] Sending token #{index}: {token:?}");
        sender.send_token(&token).await?;
        sent_any = true;
    }

    pending.finish_input();
    if !sent_any {
        info!("[{request_id}] No tokens to send");
        signals.no_tokens_sent.notify_one();
    }
    signals.input_finished.notify_one();
    debug!("[{request_id}] Send stage finished");
    Ok(())
}

enum Wake {
    Signal,
    GraceExpired,
    Event(Option<ServerEvent>),
}

struct ReceiveStage<'a> {
    request_id: &'a str,
    pending: &'a PendingRequests,
    signals: &'a StageSignals,
    emitter: &'a mut Box<dyn AudioEmitter>,
    events: &'a EventSender,
    metrics: &'a Mutex<SynthesisMetrics>,
    grace: Duration,
    sample_rate: u32,
    channels: u16,
}

impl ReceiveStage<'_> {
    async fn run(mut self, mut receiver: SessionReceiver<'_>) -> TTSResult<Completion> {
        let request_id = self.request_id;
        let mut last_api_error: Option<ApiError> = None;
        // Error event not yet followed by audio; a closure after it ends the session
        let mut trailing_error: Option<ApiError> = None;

        loop {
            let snapshot = self.pending.snapshot();
            if snapshot.is_complete() {
                if let Some(api) = trailing_error.take()
                    && session_ends_after_error(request_id, &mut receiver).await
                {
                    warn!(
                        "[{request_id}] Session terminated after error (status {}): {}",
                        api.status_code, api.message
                    );
                    return Err(api.into());
                }
                debug!("[{request_id}] All {} token(s) answered", snapshot.sent);
                return Ok(if last_api_error.is_some() {
                    Completion::Degraded
                } else {
                    Completion::Clean
                });
            }
            let awaiting_stragglers = snapshot.input_finished;

            let wake = tokio::select! {
                biased;
                _ = self.signals.no_tokens_sent.notified() => Wake::Signal,
                _ = self.signals.input_finished.notified() => Wake::Signal,
                event = receiver.next_event() => Wake::Event(event?),
                _ = tokio::time::sleep(self.grace), if awaiting_stragglers => Wake::GraceExpired,
            };

            let event = match wake {
                Wake::Signal => continue,
                Wake::GraceExpired => {
                    let snapshot = self.pending.snapshot();
                    warn!(
                        "[{request_id}] No response for {:?} with {} token(s) pending; forcing completion",
                        self.grace, snapshot.pending
                    );
                    self.metrics.lock().forced_completion = true;
                    return Ok(Completion::Forced);
                }
                Wake::Event(event) => event,
            };

            match event {
                None => {
                    if let Some(api) = trailing_error.take() {
                        warn!("[{request_id}] Connection closed after error event");
                        return Err(api.into());
                    }
                    if self.pending.is_complete() {
                        continue;
                    }
                    let snapshot = self.pending.snapshot();
                    warn!(
                        "[{request_id}] Connection closed with {} token(s) pending",
                        snapshot.pending
                    );
                    return Err(match last_api_error {
                        Some(api) => api.into(),
                        None => TTSError::ConnectionFailed(format!(
                            "[{request_id}] Connection closed with {} token(s) pending",
                            snapshot.pending
                        )),
                    });
                }
                Some(ServerEvent::Audio(chunk)) => {
                    trailing_error = None;
                    match chunk.decode() {
                        Ok(Some(pcm)) => {
                            self.metrics.lock().record_audio(
                                pcm.len(),
                                self.sample_rate,
                                self.channels,
                            );
                            self.emitter.push(&pcm);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!("[{request_id}] Dropping undecodable audio chunk: {e}");
                            self.metrics.lock().decode_errors += 1;
                            let _ = self.events.send(Ok(AudioEvent::TokenError {
                                token_index: self.pending.current_index(),
                                error: e,
                            }));
                        }
                    }
                    if chunk.is_final {
                        self.emitter.flush();
                        if let Some(index) = self.pending.on_final() {
                            debug!("[{request_id}] Token #{index} complete");
                        }
                    }
                }
                Some(ServerEvent::Error(api)) => {
                    let token_index = self.pending.on_final();
                    warn!(
                        "[{request_id}] Service error for token {token_index:?} (status {}): {}",
                        api.status_code, api.message
                    );
                    self.metrics.lock().token_errors += 1;
                    let _ = self.events.send(Ok(AudioEvent::TokenError {
                        token_index,
                        error: api.clone().into(),
                    }));
                    trailing_error = Some(api.clone());
                    last_api_error = Some(api);
                }
                Some(ServerEvent::SessionFinished) => {
                    if let Some(api) = trailing_error.take() {
                        warn!("[{request_id}] Session finished after error event");
                        return Err(api.into());
                    }
                    if self.pending.is_complete() {
                        continue;
                    }
                    return Err(TTSError::ConnectionFailed(format!(
                        "[{request_id}] Session finished by the service with {} token(s) pending",
                        self.pending.snapshot().pending
                    )));
                }
                Some(other) => {
                    debug!("[{request_id}] Ignoring {} event", other.kind());
                }
            }
        }
    }
}

/// Whether the session goes away right after an error event: a close, a
/// transport failure, `task_finished` or a second error within
/// [`ERROR_CLOSE_WINDOW`].
async fn session_ends_after_error(request_id: &str, receiver: &mut SessionReceiver<'_>) -> bool {
    match tokio::time::timeout(ERROR_CLOSE_WINDOW, receiver.next_event()).await {
        Err(_) => false,
        Ok(Err(_) | Ok(None) | Ok(Some(ServerEvent::SessionFinished | ServerEvent::Error(_)))) => {
            true
        }
        Ok(Ok(Some(other))) => {
            debug!("[{request_id}] Ignoring {} event after completion", other.kind());
            false
        }
    }
}
