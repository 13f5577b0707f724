use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::step::PipelineStep;

/// Step type name of the implicit fan-out finalizer.
pub const CREATE_ZIP_STEP: &str = "create_zip";

pub type StepFactory = Box<dyn Fn() -> Box<dyn PipelineStep> + Send + Sync>;

/// Maps step type names to factories; steps are built fresh per run.
#[derive(Default)]
pub struct StepRegistry {
    factories: HashMap<&'static str, StepFactory>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &'static str, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn PipelineStep> + Send + Sync + 'static,
    {
        self.factories.insert(name, Box::new(factory));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn PipelineStep>> {
        match self.factories.get(name) {
            Some(factory) => Ok(factory()),
            None => Err(Error::unknown_step(name)),
        }
    }
}
