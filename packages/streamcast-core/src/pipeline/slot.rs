//! Pipeline slot contract: `SubmitInput`/`QueryOutput`/`Flush`/`Start`/`Stop`
//! over a processing stage, in one of three shapes.
//!
//! `PipelineSlot` is a closed Rust enum over three variants rather than a
//! class hierarchy - idiomatic here since the variant set is fixed and known
//! at compile time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use streamcast_engines::EngineStatus;

use crate::error::{StreamError, StreamResult};

/// Maximum `SubmitInput` retry attempts before surfacing `InputFull`.
pub const MAX_SUBMIT_INPUT_ATTEMPTS: u32 = 100;
/// Backoff between retried `SubmitInput`/`QueryOutput` polls.
pub const POLL_BACKOFF: Duration = Duration::from_millis(1);

/// A single processing stage a slot drives: takes typed input, produces
/// typed output, reports `InputFull`/`NeedMoreInput` the way a hardware
/// codec does via [`EngineStatus`].
pub trait SlotStage<I, O>: Send {
    fn submit(&mut self, input: I) -> StreamResult<EngineStatus>;
    fn query(&mut self) -> StreamResult<Option<O>>;
    fn flush(&mut self);
}

/// Drives a [`SlotStage`] synchronously on the caller's thread: `submit`
/// retries under `InputFull` up to [`MAX_SUBMIT_INPUT_ATTEMPTS`] with
/// [`POLL_BACKOFF`] between attempts.
pub struct SynchronousSlot<I, O> {
    stage: Box<dyn SlotStage<I, O>>,
    max_attempts: u32,
    backoff: Duration,
}

impl<I, O> SynchronousSlot<I, O> {
    #[must_use]
    pub fn new(stage: Box<dyn SlotStage<I, O>>) -> Self {
        Self {
            stage,
            max_attempts: MAX_SUBMIT_INPUT_ATTEMPTS,
            backoff: POLL_BACKOFF,
        }
    }

    #[must_use]
    pub fn with_attempts(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.backoff = backoff;
        self
    }

    /// Blocks (sleeping the calling thread) until input is accepted or the
    /// attempt budget is exhausted.
    pub fn submit_input(&mut self, input: I) -> StreamResult<()>
    where
        I: Clone,
    {
        for attempt in 0..self.max_attempts {
            match self.stage.submit(input.clone())? {
                EngineStatus::Ok | EngineStatus::NeedMoreInput => return Ok(()),
                EngineStatus::InputFull => {
                    if attempt + 1 == self.max_attempts {
                        return Err(StreamError::InputFull);
                    }
                    std::thread::sleep(self.backoff);
                }
            }
        }
        Err(StreamError::InputFull)
    }

    /// Polls for output once; callers loop with their own backoff if they
    /// want to block for output.
    pub fn query_output(&mut self) -> StreamResult<Option<O>> {
        self.stage.query()
    }

    pub fn flush(&mut self) {
        self.stage.flush();
    }
}

/// Drives a [`SlotStage`] on a dedicated background task: `submit_input`
/// enqueues onto a bounded channel, a worker loop drains it and feeds the
/// stage, and `query_output` drains the stage's produced output channel.
pub struct AsynchronousSlot<I> {
    input_tx: mpsc::Sender<I>,
    cancel: CancellationToken,
}

impl<I: Send + 'static> AsynchronousSlot<I> {
    /// Spawns the worker loop and returns both the slot handle and the
    /// receiver for whatever the stage produces.
    pub fn spawn<O: Send + 'static>(
        mut stage: Box<dyn SlotStage<I, O>>,
        queue_depth: usize,
        parent_cancel: &CancellationToken,
    ) -> (Self, mpsc::Receiver<O>)
    where
        I: Clone,
    {
        let (input_tx, mut input_rx) = mpsc::channel::<I>(queue_depth);
        let (output_tx, output_rx) = mpsc::channel::<O>(queue_depth);
        let cancel = parent_cancel.child_token();
        let worker_cancel = cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = worker_cancel.cancelled() => break,
                    item = input_rx.recv() => {
                        let Some(item) = item else { break };
                        let mut attempts = 0;
                        loop {
                            match stage.submit(item.clone()) {
                                Ok(EngineStatus::Ok | EngineStatus::NeedMoreInput) => break,
                                Ok(EngineStatus::InputFull) => {
                                    attempts += 1;
                                    if attempts >= MAX_SUBMIT_INPUT_ATTEMPTS {
                                        log::warn!("asynchronous slot dropped input after {attempts} InputFull retries");
                                        break;
                                    }
                                    tokio::time::sleep(POLL_BACKOFF).await;
                                }
                                Err(e) => {
                                    log::warn!("asynchronous slot stage error: {e}");
                                    break;
                                }
                            }
                        }
                        while let Ok(Some(out)) = stage.query() {
                            if output_tx.send(out).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });

        (Self { input_tx, cancel }, output_rx)
    }

    /// Enqueues input for the worker loop; backpressures if the queue is full.
    pub async fn submit_input(&self, input: I) -> StreamResult<()> {
        self.input_tx
            .send(input)
            .await
            .map_err(|_| StreamError::NotRunning("asynchronous slot worker has stopped".into()))
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

/// A slot with no output: accepts input and hands it to a sink (a
/// presenter, an injector) with no `QueryOutput` leg.
pub trait SinkStage<I>: Send {
    fn submit(&mut self, input: I) -> StreamResult<()>;
    fn flush(&mut self);
}

/// Synchronous sink slot: every `submit_input` call runs the sink stage
/// inline, no retry loop (sinks are not expected to report `InputFull`).
pub struct SinkSlot<I> {
    stage: Box<dyn SinkStage<I>>,
}

impl<I> SinkSlot<I> {
    #[must_use]
    pub fn new(stage: Box<dyn SinkStage<I>>) -> Self {
        Self { stage }
    }

    pub fn submit_input(&mut self, input: I) -> StreamResult<()> {
        self.stage.submit(input)
    }

    pub fn flush(&mut self) {
        self.stage.flush();
    }
}

/// A single-slot pass-through stage: whatever is submitted is handed back
/// unchanged on the next query. Stands in for a filter stage whose actual
/// processing algorithm is out of scope (denoise, scale, aspect-ratio crop,
/// channel/rate conversion) while keeping it a real link in the chain.
pub struct PassThroughStage<T> {
    pending: Option<T>,
}

impl<T> PassThroughStage<T> {
    #[must_use]
    pub fn new() -> Self {
        Self { pending: None }
    }
}

impl<T> Default for PassThroughStage<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> SlotStage<T, T> for PassThroughStage<T> {
    fn submit(&mut self, input: T) -> StreamResult<EngineStatus> {
        self.pending = Some(input);
        Ok(EngineStatus::Ok)
    }

    fn query(&mut self) -> StreamResult<Option<T>> {
        Ok(self.pending.take())
    }

    fn flush(&mut self) {
        self.pending = None;
    }
}

/// Tagged union over the three slot shapes, so pipeline assembly code can
/// hold a `Vec<PipelineSlot<...>>`-like structure without dynamic dispatch
/// on the slot kind itself.
pub enum PipelineSlotKind {
    Synchronous,
    Asynchronous,
    Sink,
}

/// Shared stop signal for a running pipeline's worker tasks; child tokens
/// are handed to each [`AsynchronousSlot`] so `Stop()` on the pipeline
/// cascades to every worker.
#[must_use]
pub fn new_pipeline_cancellation() -> CancellationToken {
    CancellationToken::new()
}

/// Helper used by pipeline assembly code that needs a shared, clonable
/// handle to the top-level cancellation token.
pub type SharedCancel = Arc<CancellationToken>;

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingStage {
        fail_first_n: u32,
        calls: u32,
    }

    impl SlotStage<u32, u32> for CountingStage {
        fn submit(&mut self, _input: u32) -> StreamResult<EngineStatus> {
            self.calls += 1;
            if self.calls <= self.fail_first_n {
                Ok(EngineStatus::InputFull)
            } else {
                Ok(EngineStatus::Ok)
            }
        }

        fn query(&mut self) -> StreamResult<Option<u32>> {
            Ok(Some(self.calls))
        }

        fn flush(&mut self) {
            self.calls = 0;
        }
    }

    #[test]
    fn synchronous_slot_retries_until_accepted() {
        let stage = CountingStage { fail_first_n: 3, calls: 0 };
        let mut slot = SynchronousSlot::new(Box::new(stage)).with_attempts(10, Duration::from_millis(0));
        assert!(slot.submit_input(7u32).is_ok());
    }

    #[test]
    fn synchronous_slot_surfaces_input_full_after_budget() {
        let stage = CountingStage { fail_first_n: 1000, calls: 0 };
        let mut slot = SynchronousSlot::new(Box::new(stage)).with_attempts(5, Duration::from_millis(0));
        let err = slot.submit_input(7u32).unwrap_err();
        assert!(matches!(err, StreamError::InputFull));
    }

    #[tokio::test]
    async fn asynchronous_slot_processes_and_emits_output() {
        let stage = CountingStage { fail_first_n: 0, calls: 0 };
        let cancel = CancellationToken::new();
        let (slot, mut output_rx) = AsynchronousSlot::spawn(Box::new(stage), 8, &cancel);

        slot.submit_input(1).await.unwrap();
        let output = tokio::time::timeout(Duration::from_millis(100), output_rx.recv())
            .await
            .unwrap();
        assert_eq!(output, Some(1));

        slot.stop();
    }

    #[test]
    fn pass_through_stage_returns_its_input_unchanged() {
        let mut stage = PassThroughStage::new();
        assert!(stage.query().unwrap().is_none());
        assert_eq!(stage.submit(42u32).unwrap(), EngineStatus::Ok);
        assert_eq!(stage.query().unwrap(), Some(42));
        assert!(stage.query().unwrap().is_none());
    }

    #[test]
    fn pass_through_stage_flush_drops_pending_input() {
        let mut stage = PassThroughStage::new();
        stage.submit(7u32).unwrap();
        stage.flush();
        assert!(stage.query().unwrap().is_none());
    }
}
