use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::args::StepArgs;
use crate::data::PipelineData;
use crate::error::{Error, Result};
use crate::metadata::Metadata;
use crate::registry::{CREATE_ZIP_STEP, StepRegistry};
use crate::step::{Limits, PipelineStep, StepContext, StepOutputs};

/// One `(type, arguments)` pair out of the request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

/// Pipeline request envelope as produced by the auth collaborator.
///
/// The executor consumes only `pipeline_steps`; token lifetime claims are
/// validated upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRequest {
    #[serde(default)]
    pub iat: i64,
    #[serde(default)]
    pub exp: i64,
    pub pipeline_steps: Vec<StepSpec>,
}

/// Runs ordered step lists against the shared registry and HTTP client.
pub struct PipelineExecutor {
    registry: Arc<StepRegistry>,
    http: reqwest::Client,
    limits: Limits,
}

impl PipelineExecutor {
    pub fn new(registry: Arc<StepRegistry>, http: reqwest::Client, limits: Limits) -> Self {
        Self {
            registry,
            http,
            limits,
        }
    }

    /// Execute the pipeline and hand back the terminal carrier.
    ///
    /// Steps run pipelined: each one returns as soon as its producer tasks
    /// are spawned, so downstream reads progress while upstream still
    /// writes. On any failure every producer task is cancelled before the
    /// error surfaces.
    pub async fn run(&self, steps: Vec<StepSpec>) -> Result<PipelineRun> {
        if steps.is_empty() {
            return Err(Error::pipeline_shape("pipeline has no steps"));
        }

        // Resolve every step up front so bad names and illegal shapes fail
        // before any I/O starts.
        let mut resolved: Vec<(Box<dyn PipelineStep>, StepArgs)> = Vec::with_capacity(steps.len());
        for spec in &steps {
            let step = self.registry.create(&spec.step_type)?;
            resolved.push((step, StepArgs::new(spec.arguments.clone())));
        }

        let last = resolved.len() - 1;
        for (index, (step, args)) in resolved.iter().enumerate() {
            if step.produces_multiple_outputs() && index != last {
                return Err(Error::pipeline_shape(format!(
                    "fan-out step `{}` must be the final step",
                    step.name()
                )));
            }
            if index > 0 && args.contains("source_url") && !step.accepts_chained_source_url() {
                return Err(Error::invalid_arguments(format!(
                    "step `{}` cannot take a source_url after another step",
                    step.name()
                )));
            }
        }

        let ctx = StepContext::new(self.http.clone(), self.limits);
        match self.drive(resolved, &ctx).await {
            Ok(output) => Ok(PipelineRun {
                output,
                cancel: ctx.cancellation_token().clone(),
            }),
            Err(error) => {
                ctx.cancellation_token().cancel();
                Err(error)
            },
        }
    }

    async fn drive(
        &self,
        steps: Vec<(Box<dyn PipelineStep>, StepArgs)>,
        ctx: &StepContext,
    ) -> Result<PipelineData> {
        let mut current: Option<StepOutputs> = None;
        let mut fan_out = false;
        for (index, (step, args)) in steps.into_iter().enumerate() {
            tracing::debug!(step = step.name(), index, "running pipeline step");
            fan_out = step.produces_multiple_outputs();
            current = Some(step.process(current.take(), args, ctx).await?);
        }

        let Some(mut outputs) = current else {
            return Err(Error::pipeline_shape("pipeline produced no output"));
        };

        if fan_out {
            tracing::debug!("finalizing fan-out with an implicit create_zip");
            let finalizer = self.registry.create(CREATE_ZIP_STEP)?;
            outputs = finalizer
                .process(Some(outputs), StepArgs::empty(), ctx)
                .await?;
        }

        match outputs.next().await {
            Some(output) => Ok(output),
            None => Err(Error::pipeline_shape("pipeline produced no output")),
        }
    }
}

/// Handle over a completed pipeline's terminal carrier.
///
/// Dropping the handle cancels every producer task still feeding the
/// pipeline, so abandoning a response mid-stream tears the run down.
pub struct PipelineRun {
    output: PipelineData,
    cancel: CancellationToken,
}

impl PipelineRun {
    pub fn metadata(&self) -> &Metadata {
        self.output.metadata()
    }

    pub fn data_mut(&mut self) -> &mut PipelineData {
        &mut self.output
    }

    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        self.output.next_chunk().await
    }

    pub async fn read_to_end(&mut self) -> Result<Bytes> {
        self.output.read_to_end().await
    }
}

impl Drop for PipelineRun {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::sync::Notify;

    use super::{PipelineExecutor, StepSpec};
    use crate::args::StepArgs;
    use crate::data::PipelineData;
    use crate::error::Error;
    use crate::metadata::Metadata;
    use crate::registry::StepRegistry;
    use crate::step::{PipelineStep, StepContext, StepOutputs};

    /// Emits `count` carriers labeled `part-{i}`, streamed through queues.
    struct EmitParts {
        count: usize,
    }

    #[async_trait]
    impl PipelineStep for EmitParts {
        fn name(&self) -> &'static str {
            "emit_parts"
        }

        fn produces_multiple_outputs(&self) -> bool {
            self.count != 1
        }

        async fn process(
            &self,
            _inputs: Option<StepOutputs>,
            _args: StepArgs,
            ctx: &StepContext,
        ) -> crate::Result<StepOutputs> {
            let (outputs_tx, outputs) = StepOutputs::channel();
            let count = self.count;
            ctx.spawn(async move {
                for index in 0..count {
                    let (tx, carrier) = PipelineData::queue(Metadata::new());
                    if outputs_tx.send(carrier).await.is_err() {
                        return;
                    }
                    let _ = tx.send(Bytes::from(format!("part-{index}"))).await;
                    tx.finish().await;
                }
            });
            Ok(outputs)
        }
    }

    /// Uppercases its input stream chunk by chunk.
    struct Uppercase;

    #[async_trait]
    impl PipelineStep for Uppercase {
        fn name(&self) -> &'static str {
            "uppercase"
        }

        async fn process(
            &self,
            inputs: Option<StepOutputs>,
            args: StepArgs,
            ctx: &StepContext,
        ) -> crate::Result<StepOutputs> {
            let mut input = crate::step::resolve_input(self.name(), inputs, &args, ctx).await?;
            let (tx, output) = PipelineData::queue(Metadata::new());
            ctx.spawn(async move {
                loop {
                    match input.next_chunk().await {
                        Ok(Some(chunk)) => {
                            let upper = chunk.to_ascii_uppercase();
                            if tx.send(Bytes::from(upper)).await.is_err() {
                                return;
                            }
                        },
                        Ok(None) => {
                            tx.finish().await;
                            return;
                        },
                        Err(error) => {
                            tx.fail(error).await;
                            return;
                        },
                    }
                }
            });
            Ok(StepOutputs::single(output))
        }
    }

    /// Stand-in finalizer: concatenates all inputs with `|` separators.
    struct ConcatInputs;

    #[async_trait]
    impl PipelineStep for ConcatInputs {
        fn name(&self) -> &'static str {
            "create_zip"
        }

        async fn process(
            &self,
            inputs: Option<StepOutputs>,
            _args: StepArgs,
            _ctx: &StepContext,
        ) -> crate::Result<StepOutputs> {
            let Some(mut inputs) = inputs else {
                return Err(Error::invalid_arguments("finalizer needs inputs"));
            };
            let mut out = Vec::new();
            while let Some(mut input) = inputs.next().await {
                if !out.is_empty() {
                    out.push(b'|');
                }
                out.extend_from_slice(&input.read_to_end().await?);
            }
            Ok(StepOutputs::single(PipelineData::from_bytes(
                Metadata::new(),
                out,
            )))
        }
    }

    /// Sets a flag when its producer task is torn down.
    struct SignalOnDrop {
        dropped: Arc<AtomicBool>,
        notify: Arc<Notify>,
    }

    struct DropFlag {
        dropped: Arc<AtomicBool>,
        notify: Arc<Notify>,
    }

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
            self.notify.notify_one();
        }
    }

    #[async_trait]
    impl PipelineStep for SignalOnDrop {
        fn name(&self) -> &'static str {
            "endless"
        }

        async fn process(
            &self,
            _inputs: Option<StepOutputs>,
            _args: StepArgs,
            ctx: &StepContext,
        ) -> crate::Result<StepOutputs> {
            let (tx, output) = PipelineData::queue(Metadata::new());
            let flag = DropFlag {
                dropped: Arc::clone(&self.dropped),
                notify: Arc::clone(&self.notify),
            };
            ctx.spawn(async move {
                let _flag = flag;
                loop {
                    if tx.send(Bytes::from_static(&[0u8; 1024])).await.is_err() {
                        return;
                    }
                }
            });
            Ok(StepOutputs::single(output))
        }
    }

    fn spec(step_type: &str) -> StepSpec {
        StepSpec {
            step_type: step_type.to_string(),
            arguments: serde_json::Map::new(),
        }
    }

    fn executor(registry: StepRegistry) -> PipelineExecutor {
        PipelineExecutor::new(
            Arc::new(registry),
            reqwest::Client::new(),
            crate::step::Limits::default(),
        )
    }

    #[tokio::test]
    async fn empty_pipeline_is_a_shape_error() {
        let executor = executor(StepRegistry::new());
        assert!(matches!(
            executor.run(Vec::new()).await,
            Err(Error::PipelineShape { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_step_names_fail_before_running() {
        let executor = executor(StepRegistry::new());
        assert!(matches!(
            executor.run(vec![spec("mystery")]).await,
            Err(Error::UnknownStep { .. })
        ));
    }

    #[tokio::test]
    async fn non_final_fan_out_is_rejected() {
        let mut registry = StepRegistry::new();
        registry
            .register("emit_parts", || Box::new(EmitParts { count: 2 }))
            .register("uppercase", || Box::new(Uppercase))
            .register("create_zip", || Box::new(ConcatInputs));
        let executor = executor(registry);

        assert!(matches!(
            executor.run(vec![spec("emit_parts"), spec("uppercase")]).await,
            Err(Error::PipelineShape { .. })
        ));
    }

    #[tokio::test]
    async fn chained_source_url_is_rejected_for_ordinary_steps() {
        let mut registry = StepRegistry::new();
        registry
            .register("emit_parts", || Box::new(EmitParts { count: 1 }))
            .register("uppercase", || Box::new(Uppercase));
        let executor = executor(registry);

        let mut tail = spec("uppercase");
        tail.arguments.insert(
            "source_url".to_string(),
            serde_json::Value::String("http://example.com/f".to_string()),
        );
        assert!(matches!(
            executor.run(vec![spec("emit_parts"), tail]).await,
            Err(Error::InvalidArguments { .. })
        ));
    }

    #[tokio::test]
    async fn steps_chain_and_stream_through_queues() {
        let mut registry = StepRegistry::new();
        registry
            .register("emit_parts", || Box::new(EmitParts { count: 1 }))
            .register("uppercase", || Box::new(Uppercase));
        let executor = executor(registry);

        let mut run = executor
            .run(vec![spec("emit_parts"), spec("uppercase")])
            .await
            .expect("run");
        assert_eq!(run.read_to_end().await.expect("drain"), &b"PART-0"[..]);
    }

    #[tokio::test]
    async fn final_fan_out_gets_an_implicit_finalizer() {
        let mut registry = StepRegistry::new();
        registry
            .register("emit_parts", || Box::new(EmitParts { count: 3 }))
            .register("create_zip", || Box::new(ConcatInputs));
        let executor = executor(registry);

        let mut run = executor.run(vec![spec("emit_parts")]).await.expect("run");
        assert_eq!(
            run.read_to_end().await.expect("drain"),
            &b"part-0|part-1|part-2"[..]
        );
    }

    #[tokio::test]
    async fn empty_fan_out_finalizes_into_an_empty_archive() {
        let mut registry = StepRegistry::new();
        registry
            .register("emit_parts", || Box::new(EmitParts { count: 0 }))
            .register("create_zip", || Box::new(ConcatInputs));
        let executor = executor(registry);

        let mut run = executor.run(vec![spec("emit_parts")]).await.expect("run");
        assert!(run.read_to_end().await.expect("drain").is_empty());
    }

    #[tokio::test]
    async fn dropping_the_run_tears_down_producers() {
        let dropped = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let mut registry = StepRegistry::new();
        {
            let dropped = Arc::clone(&dropped);
            let notify = Arc::clone(&notify);
            registry.register("endless", move || {
                Box::new(SignalOnDrop {
                    dropped: Arc::clone(&dropped),
                    notify: Arc::clone(&notify),
                })
            });
        }
        let executor = executor(registry);

        let mut run = executor.run(vec![spec("endless")]).await.expect("run");
        // The producer is alive and feeding the queue.
        assert!(run.next_chunk().await.expect("chunk").is_some());
        drop(run);

        tokio::time::timeout(Duration::from_secs(5), notify.notified())
            .await
            .expect("producer released after drop");
        assert!(dropped.load(Ordering::SeqCst));
    }
}
