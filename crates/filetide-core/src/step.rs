use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::args::StepArgs;
use crate::data::PipelineData;
use crate::error::{Error, Result};

/// Bound on carriers queued between a fan-out producer and its consumer.
const OUTPUT_CHANNEL_CAPACITY: usize = 4;

/// Resource caps applied while a pipeline runs.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Cap for buffering a non-seekable input into memory.
    pub max_buffer_bytes: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_buffer_bytes: 100 * 1024 * 1024,
        }
    }
}

/// Shared services handed to every step of one pipeline run.
pub struct StepContext {
    http: reqwest::Client,
    cancel: CancellationToken,
    limits: Limits,
}

impl StepContext {
    pub fn new(http: reqwest::Client, limits: Limits) -> Self {
        Self {
            http,
            cancel: CancellationToken::new(),
            limits,
        }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Spawn a producer task tied to the run's cancellation token.
    ///
    /// Cancelling the run drops the task's future, which closes any channel
    /// handles it owns and so unblocks consumers with [`Error::Cancelled`].
    pub fn spawn<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {},
                _ = task => {},
            }
        });
    }
}

/// Producer side of a step's output sequence.
pub struct OutputSender {
    tx: mpsc::Sender<PipelineData>,
}

impl OutputSender {
    /// Hand one carrier to the consumer; fails with [`Error::Cancelled`]
    /// once the consumer is gone.
    pub async fn send(&self, data: PipelineData) -> Result<()> {
        self.tx.send(data).await.map_err(|_| Error::Cancelled)
    }
}

/// Lazy asynchronous sequence of carriers produced by one step.
pub struct StepOutputs {
    rx: mpsc::Receiver<PipelineData>,
}

impl StepOutputs {
    pub fn channel() -> (OutputSender, Self) {
        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        (OutputSender { tx }, Self { rx })
    }

    /// Sequence containing exactly one carrier.
    pub fn single(data: PipelineData) -> Self {
        let (tx, rx) = mpsc::channel(1);
        // Capacity one on a fresh channel; the send cannot fail.
        let _ = tx.try_send(data);
        Self { rx }
    }

    pub fn empty() -> Self {
        let (_tx, rx) = mpsc::channel(1);
        Self { rx }
    }

    pub async fn next(&mut self) -> Option<PipelineData> {
        self.rx.recv().await
    }
}

/// One transformer in a pipeline, instantiated fresh per run.
#[async_trait]
pub trait PipelineStep: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether `process` yields more than one carrier.
    fn produces_multiple_outputs(&self) -> bool {
        false
    }

    /// Whether a `source_url` argument is tolerated (and ignored) when the
    /// step is not first in the pipeline. Crypt4GH steps opt in.
    fn accepts_chained_source_url(&self) -> bool {
        false
    }

    /// Transform the input sequence into an output sequence.
    ///
    /// `inputs` is `None` for the first step, which then reads its source
    /// from `args.source_url`. Outputs must become available without waiting
    /// for upstream exhaustion; long-running work belongs in producer tasks
    /// spawned through [`StepContext::spawn`].
    async fn process(
        &self,
        inputs: Option<StepOutputs>,
        args: StepArgs,
        ctx: &StepContext,
    ) -> Result<StepOutputs>;
}

/// Obtain the step's single input carrier: the first piped carrier, or a
/// fresh URL carrier built from `args.source_url` for a leading step.
pub async fn resolve_input(
    step_name: &str,
    inputs: Option<StepOutputs>,
    args: &StepArgs,
    ctx: &StepContext,
) -> Result<PipelineData> {
    match inputs {
        Some(mut outputs) => {
            let Some(data) = outputs.next().await else {
                return Err(Error::invalid_arguments(format!(
                    "step `{step_name}` received an empty input sequence"
                )));
            };
            if args.contains("source_url") {
                tracing::warn!(
                    step = step_name,
                    "ignoring source_url because the step receives piped input"
                );
            }
            Ok(data)
        },
        None => {
            let raw = args.require_str("source_url").map_err(|_| {
                Error::invalid_arguments(format!(
                    "step `{step_name}` needs piped input or a source_url argument"
                ))
            })?;
            let url = url::Url::parse(raw)
                .map_err(|error| Error::invalid_arguments(format!("invalid source_url: {error}")))?;
            Ok(PipelineData::from_url(url, ctx.http().clone()))
        },
    }
}
