//! Core of the filetide pipeline engine: the byte-stream carriers flowing
//! between steps, the step contract and registry, and the executor that
//! chains steps with back-pressured channels and structured cancellation.

pub mod args;
pub mod data;
pub mod error;
pub mod executor;
pub mod metadata;
pub mod registry;
pub mod step;

pub use args::StepArgs;
pub use data::{ChunkSender, PipelineData, QUEUE_CAPACITY, STREAM_CHUNK_SIZE};
pub use error::{Error, Result};
pub use executor::{PipelineExecutor, PipelineRequest, PipelineRun, StepSpec};
pub use metadata::Metadata;
pub use registry::{CREATE_ZIP_STEP, StepFactory, StepRegistry};
pub use step::{Limits, OutputSender, PipelineStep, StepContext, StepOutputs, resolve_input};
