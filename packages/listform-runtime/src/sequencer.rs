//! Strict one-at-a-time async step executor.
//!
//! A [`Sequencer`] owns a FIFO queue of [`Step`]s. Each step receives the
//! pipeline context, the payload produced by the previous step and an
//! [`Advance`] token. The token is consumed exactly once to report the
//! step's outcome; the next step is dequeued only after that report arrives.
//!
//! Contract violations are detected rather than hung on: a step that drops
//! its token yields [`SequencerError::StepAbandoned`], and a step that never
//! reports within the configured timeout yields
//! [`SequencerError::StepTimedOut`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::traits::StatusDisplay;

// ---------------------------------------------------------------------------
// Errors and outcomes
// ---------------------------------------------------------------------------

/// Contract failures of a step.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SequencerError {
    #[error("step `{step}` finished without advancing")]
    StepAbandoned { step: &'static str },
    #[error("step `{step}` did not advance within {timeout_ms}ms")]
    StepTimedOut { step: &'static str, timeout_ms: u64 },
}

/// How a pipeline run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// The queue drained.
    Completed { steps_run: usize },
    /// A step stopped the pipeline without an error.
    Halted {
        step: &'static str,
        message: Option<String>,
    },
    /// A step stopped the pipeline with a surfaced failure.
    Failed {
        step: &'static str,
        message: Option<String>,
    },
}

impl PipelineOutcome {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

// ---------------------------------------------------------------------------
// Advance token
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Directive {
    Continue,
    Recover,
    Halt,
    Fail,
}

#[derive(Debug)]
struct Report {
    directive: Directive,
    message: Option<String>,
    payload: Option<Value>,
}

/// One-shot completion token handed to every step.
///
/// Every method consumes the token, so a step can report at most once.
#[derive(Debug)]
#[must_use = "a step must consume its Advance token"]
pub struct Advance {
    tx: oneshot::Sender<Report>,
}

impl Advance {
    fn send(self, directive: Directive, message: Option<String>, payload: Option<Value>) {
        // The receiver is gone only when the run was cancelled.
        let _ = self.tx.send(Report {
            directive,
            message,
            payload,
        });
    }

    /// General form: `success` continues, failure stops the pipeline.
    pub fn advance(self, success: bool, message: Option<String>, payload: Option<Value>) {
        let directive = if success {
            Directive::Continue
        } else {
            Directive::Fail
        };
        self.send(directive, message, payload);
    }

    pub fn ok(self) {
        self.send(Directive::Continue, None, None);
    }

    pub fn ok_with(self, message: impl Into<String>) {
        self.send(Directive::Continue, Some(message.into()), None);
    }

    /// Continue and hand `payload` to the next step.
    pub fn ok_payload(self, payload: Value) {
        self.send(Directive::Continue, None, Some(payload));
    }

    /// Surface `message` as a failure but continue with the next step.
    pub fn recover(self, message: impl Into<String>) {
        self.send(Directive::Recover, Some(message.into()), None);
    }

    /// Stop quietly. Remaining steps are skipped; this is not an error.
    pub fn halt(self, message: Option<String>) {
        self.send(Directive::Halt, message, None);
    }

    /// Stop and surface `message` as a failure.
    pub fn fail(self, message: impl Into<String>) {
        self.send(Directive::Fail, Some(message.into()), None);
    }
}

// ---------------------------------------------------------------------------
// Step and hooks
// ---------------------------------------------------------------------------

/// Async unit of pipeline work over a context `C`.
#[async_trait]
pub trait Step<C: Send>: Send + Sync {
    /// Name used in spans, logs and outcomes.
    fn name(&self) -> &'static str;

    /// Performs the step and reports through `next`.
    async fn run(&self, ctx: &mut C, payload: Option<Value>, next: Advance);
}

/// Lifecycle callbacks of one pipeline run. All default to no-ops.
#[async_trait]
pub trait PipelineHooks<C: Send>: Send + Sync {
    /// The queue drained without a halt or failure.
    async fn on_complete(&self, _ctx: &mut C) {}

    /// A step failed, or broke the advance contract.
    async fn on_fail(&self, _ctx: &mut C, _message: Option<&str>) {}

    /// Always runs last, whatever the outcome.
    async fn on_finally(&self, _ctx: &mut C) {}
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl<C: Send> PipelineHooks<C> for NoHooks {}

// ---------------------------------------------------------------------------
// Sequencer
// ---------------------------------------------------------------------------

/// FIFO step executor. See the module docs.
pub struct Sequencer<C: Send> {
    name: &'static str,
    queue: VecDeque<Box<dyn Step<C>>>,
    hooks: Box<dyn PipelineHooks<C>>,
    status: Arc<dyn StatusDisplay>,
    step_timeout: Option<Duration>,
    running: bool,
}

impl<C: Send> Sequencer<C> {
    /// Empty sequencer named `name` reporting to `status`.
    pub fn new(name: &'static str, status: Arc<dyn StatusDisplay>) -> Self {
        Self {
            name,
            queue: VecDeque::new(),
            hooks: Box::new(NoHooks),
            status,
            step_timeout: None,
            running: false,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.step_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: impl PipelineHooks<C> + 'static) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    /// Replaces the pending queue with `steps`.
    pub fn enqueue(&mut self, steps: Vec<Box<dyn Step<C>>>) {
        self.queue = steps.into();
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Starts the pipeline with an initial status message.
    ///
    /// # Errors
    ///
    /// See [`Sequencer::run`].
    pub async fn start(
        &mut self,
        ctx: &mut C,
        message: impl Into<String>,
    ) -> Result<PipelineOutcome, SequencerError> {
        self.run(ctx, Some(message.into())).await
    }

    /// Runs queued steps until the queue drains, a step halts or fails, or
    /// a step breaks the advance contract. `on_finally` runs in every case.
    ///
    /// # Errors
    ///
    /// [`SequencerError::StepAbandoned`] or [`SequencerError::StepTimedOut`].
    pub async fn run(
        &mut self,
        ctx: &mut C,
        start_message: Option<String>,
    ) -> Result<PipelineOutcome, SequencerError> {
        self.running = true;
        if let Some(message) = &start_message {
            self.status.show(true, message);
        }

        let result = self.drain(ctx).await;
        match &result {
            Ok(PipelineOutcome::Completed { steps_run }) => {
                info!(pipeline = self.name, steps_run, "pipeline completed");
                self.hooks.on_complete(ctx).await;
            }
            Ok(PipelineOutcome::Halted { step, message }) => {
                info!(pipeline = self.name, step, message = ?message, "pipeline halted");
            }
            Ok(PipelineOutcome::Failed { step, message }) => {
                warn!(pipeline = self.name, step, message = ?message, "pipeline failed");
                self.hooks.on_fail(ctx, message.as_deref()).await;
            }
            Err(e) => {
                warn!(pipeline = self.name, error = %e, "pipeline aborted");
                self.hooks.on_fail(ctx, Some(&e.to_string())).await;
            }
        }
        self.hooks.on_finally(ctx).await;
        self.running = false;
        result
    }

    async fn drain(&mut self, ctx: &mut C) -> Result<PipelineOutcome, SequencerError> {
        let mut payload = None;
        let mut steps_run = 0;

        while let Some(step) = self.queue.pop_front() {
            let step_name = step.name();
            let span = info_span!("step", pipeline = self.name, step = step_name);
            let report = match self
                .invoke(step.as_ref(), ctx, payload.take())
                .instrument(span)
                .await
            {
                Ok(report) => report,
                Err(e) => {
                    self.queue.clear();
                    return Err(e);
                }
            };
            steps_run += 1;

            if let Some(message) = &report.message {
                let success = matches!(report.directive, Directive::Continue | Directive::Halt);
                self.status.show(success, message);
            }

            match report.directive {
                Directive::Continue => payload = report.payload,
                Directive::Recover => {
                    warn!(pipeline = self.name, step = step_name, message = ?report.message, "step recovered");
                    payload = report.payload;
                }
                Directive::Halt => {
                    self.queue.clear();
                    return Ok(PipelineOutcome::Halted {
                        step: step_name,
                        message: report.message,
                    });
                }
                Directive::Fail => {
                    self.queue.clear();
                    return Ok(PipelineOutcome::Failed {
                        step: step_name,
                        message: report.message,
                    });
                }
            }
        }
        Ok(PipelineOutcome::Completed { steps_run })
    }

    async fn invoke(
        &self,
        step: &dyn Step<C>,
        ctx: &mut C,
        payload: Option<Value>,
    ) -> Result<Report, SequencerError> {
        let step_name = step.name();
        let (tx, rx) = oneshot::channel();
        let work = async move {
            step.run(ctx, payload, Advance { tx }).await;
            rx.await
        };
        debug!("step started");
        let received = match self.step_timeout {
            Some(limit) => tokio::time::timeout(limit, work).await.map_err(|_| {
                SequencerError::StepTimedOut {
                    step: step_name,
                    timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                }
            })?,
            None => work.await,
        };
        received.map_err(|_| SequencerError::StepAbandoned { step: step_name })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::status::MemoryStatus;

    #[derive(Default)]
    struct Trace {
        seen: Vec<usize>,
        payloads: Vec<Option<Value>>,
        completed: usize,
        failed: Vec<Option<String>>,
        finally: usize,
    }

    #[derive(Clone, Copy)]
    enum Behavior {
        Ok,
        Fail,
        Halt,
        Recover,
        Drop,
        Hang,
        Payload,
    }

    struct Scripted {
        index: usize,
        behavior: Behavior,
    }

    #[async_trait]
    impl Step<Trace> for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn run(&self, ctx: &mut Trace, payload: Option<Value>, next: Advance) {
            ctx.seen.push(self.index);
            ctx.payloads.push(payload);
            match self.behavior {
                Behavior::Ok => next.ok(),
                Behavior::Fail => next.fail(format!("step {} failed", self.index)),
                Behavior::Halt => next.halt(None),
                Behavior::Recover => next.recover("optional part missing"),
                Behavior::Drop => drop(next),
                Behavior::Hang => {
                    let _held = next;
                    std::future::pending::<()>().await;
                }
                Behavior::Payload => next.ok_payload(Value::from(self.index)),
            }
        }
    }

    struct CountingHooks;

    #[async_trait]
    impl PipelineHooks<Trace> for CountingHooks {
        async fn on_complete(&self, ctx: &mut Trace) {
            ctx.completed += 1;
        }

        async fn on_fail(&self, ctx: &mut Trace, message: Option<&str>) {
            ctx.failed.push(message.map(ToString::to_string));
        }

        async fn on_finally(&self, ctx: &mut Trace) {
            ctx.finally += 1;
        }
    }

    fn steps(behaviors: &[Behavior]) -> Vec<Box<dyn Step<Trace>>> {
        behaviors
            .iter()
            .enumerate()
            .map(|(index, &behavior)| Box::new(Scripted { index, behavior }) as Box<dyn Step<Trace>>)
            .collect()
    }

    fn sequencer(status: Arc<MemoryStatus>) -> Sequencer<Trace> {
        Sequencer::new("test", status)
            .with_hooks(CountingHooks)
            .with_timeout(Some(Duration::from_millis(500)))
    }

    #[tokio::test]
    async fn runs_steps_in_order_and_completes_once() {
        let status = Arc::new(MemoryStatus::default());
        let mut seq = sequencer(status.clone());
        seq.enqueue(steps(&[Behavior::Ok, Behavior::Ok, Behavior::Ok]));
        let mut trace = Trace::default();

        let outcome = seq.start(&mut trace, "Loading...").await.unwrap();
        assert_eq!(outcome, PipelineOutcome::Completed { steps_run: 3 });
        assert_eq!(trace.seen, [0, 1, 2]);
        assert_eq!(trace.completed, 1);
        assert_eq!(trace.finally, 1);
        assert_eq!(status.shown(), [(true, "Loading...".to_string())]);
        assert!(!seq.is_running());
        assert_eq!(seq.pending(), 0);
    }

    #[tokio::test]
    async fn failure_stops_and_surfaces_message() {
        let status = Arc::new(MemoryStatus::default());
        let mut seq = sequencer(status.clone());
        seq.enqueue(steps(&[Behavior::Ok, Behavior::Fail, Behavior::Ok]));
        let mut trace = Trace::default();

        let outcome = seq.run(&mut trace, None).await.unwrap();
        assert!(matches!(outcome, PipelineOutcome::Failed { .. }));
        assert_eq!(trace.seen, [0, 1]);
        assert_eq!(trace.completed, 0);
        assert_eq!(trace.failed, [Some("step 1 failed".to_string())]);
        assert_eq!(trace.finally, 1);
        assert_eq!(status.shown(), [(false, "step 1 failed".to_string())]);
    }

    #[tokio::test]
    async fn halt_is_silent_and_skips_the_rest() {
        let mut seq = sequencer(Arc::new(MemoryStatus::default()));
        seq.enqueue(steps(&[Behavior::Halt, Behavior::Ok]));
        let mut trace = Trace::default();

        let outcome = seq.run(&mut trace, None).await.unwrap();
        assert_eq!(
            outcome,
            PipelineOutcome::Halted {
                step: "scripted",
                message: None
            }
        );
        assert_eq!(trace.seen, [0]);
        assert!(trace.failed.is_empty());
        assert_eq!(trace.completed, 0);
        assert_eq!(trace.finally, 1);
    }

    #[tokio::test]
    async fn recover_surfaces_failure_and_continues() {
        let status = Arc::new(MemoryStatus::default());
        let mut seq = sequencer(status.clone());
        seq.enqueue(steps(&[Behavior::Recover, Behavior::Ok]));
        let mut trace = Trace::default();

        let outcome = seq.run(&mut trace, None).await.unwrap();
        assert_eq!(outcome, PipelineOutcome::Completed { steps_run: 2 });
        assert_eq!(trace.seen, [0, 1]);
        assert_eq!(status.shown(), [(false, "optional part missing".to_string())]);
    }

    #[tokio::test]
    async fn payload_flows_to_the_next_step_only() {
        let mut seq = sequencer(Arc::new(MemoryStatus::default()));
        seq.enqueue(steps(&[Behavior::Payload, Behavior::Ok, Behavior::Ok]));
        let mut trace = Trace::default();

        seq.run(&mut trace, None).await.unwrap();
        assert_eq!(trace.payloads, [None, Some(Value::from(0)), None]);
    }

    #[tokio::test]
    async fn dropped_token_is_abandonment_and_finally_runs() {
        let mut seq = sequencer(Arc::new(MemoryStatus::default()));
        seq.enqueue(steps(&[Behavior::Drop, Behavior::Ok]));
        let mut trace = Trace::default();

        let err = seq.run(&mut trace, None).await.unwrap_err();
        assert_eq!(err, SequencerError::StepAbandoned { step: "scripted" });
        assert_eq!(trace.seen, [0]);
        assert_eq!(trace.failed.len(), 1);
        assert_eq!(trace.finally, 1);
        assert_eq!(seq.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_step_times_out_and_finally_runs() {
        let mut seq = sequencer(Arc::new(MemoryStatus::default()));
        seq.enqueue(steps(&[Behavior::Hang, Behavior::Ok]));
        let mut trace = Trace::default();

        let err = seq.run(&mut trace, None).await.unwrap_err();
        assert_eq!(
            err,
            SequencerError::StepTimedOut {
                step: "scripted",
                timeout_ms: 500
            }
        );
        assert_eq!(trace.seen, [0]);
        assert_eq!(trace.finally, 1);
    }

    #[tokio::test]
    async fn enqueue_replaces_pending_steps() {
        let mut seq = sequencer(Arc::new(MemoryStatus::default()));
        seq.enqueue(steps(&[Behavior::Ok, Behavior::Ok, Behavior::Ok]));
        seq.enqueue(steps(&[Behavior::Ok]));
        assert_eq!(seq.pending(), 1);

        let mut trace = Trace::default();
        let outcome = seq.run(&mut trace, None).await.unwrap();
        assert_eq!(outcome, PipelineOutcome::Completed { steps_run: 1 });
    }

    fn block_on<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap()
            .block_on(fut)
    }

    proptest! {
        #[test]
        fn all_succeeding_steps_run_in_order(n in 0usize..24) {
            let mut seq = sequencer(Arc::new(MemoryStatus::default()));
            seq.enqueue(steps(&vec![Behavior::Ok; n]));
            let mut trace = Trace::default();
            let outcome = block_on(seq.run(&mut trace, None)).unwrap();

            prop_assert_eq!(outcome, PipelineOutcome::Completed { steps_run: n });
            prop_assert_eq!(trace.seen, (0..n).collect::<Vec<_>>());
            prop_assert_eq!(trace.completed, 1);
            prop_assert_eq!(trace.finally, 1);
        }

        #[test]
        fn steps_after_a_failure_never_run(n in 1usize..24, k in 0usize..24) {
            let k = k % n;
            let mut behaviors = vec![Behavior::Ok; n];
            behaviors[k] = Behavior::Fail;
            let mut seq = sequencer(Arc::new(MemoryStatus::default()));
            seq.enqueue(steps(&behaviors));
            let mut trace = Trace::default();
            let outcome = block_on(seq.run(&mut trace, None)).unwrap();

            prop_assert!(
                matches!(outcome, PipelineOutcome::Failed { .. }),
                "expected failure, got {:?}",
                outcome
            );
            prop_assert_eq!(trace.seen, (0..=k).collect::<Vec<_>>());
            prop_assert_eq!(trace.completed, 0);
            prop_assert_eq!(trace.finally, 1);
        }
    }
}
