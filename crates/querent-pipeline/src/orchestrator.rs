//! The pipeline driver.
//!
//! [`Orchestrator::run`] walks the state machine from `Start` to `End`,
//! dispatching to the stage that owns each state. All branching lives in the
//! pure transition function; the driver itself is a straight loop.

use std::sync::Arc;
use std::time::Duration;

use querent_llm::TextGeneration;
use querent_store::QueryExecution;
use querent_types::{AskReport, SchemaSnapshot};

use crate::context::PipelineContext;
use crate::stage::{
    AnswerStage, ExecuteStage, GenerateStage, RepairStage, Stage, ValidateStage,
};
use crate::state::{next_state, State};

// ---------------------------------------------------------------------------
// PipelineConfig
// ---------------------------------------------------------------------------

/// Deadlines for the external calls made by the stages. The query engine's
/// own timeout is configured on the engine handle.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub generation_deadline: Duration,
    pub answer_deadline: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            generation_deadline: Duration::from_secs(60),
            answer_deadline: Duration::from_secs(60),
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives one request through the stage sequence. The orchestrator holds
/// only shared handles, so one instance serves any number of concurrent
/// requests, each with its own context and task.
pub struct Orchestrator {
    generate: GenerateStage,
    validate: ValidateStage,
    repair: RepairStage,
    execute: ExecuteStage,
    answer: AnswerStage,
}

impl Orchestrator {
    pub fn new(
        generator: Arc<dyn TextGeneration>,
        engine: Arc<dyn QueryExecution>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            generate: GenerateStage::new(generator.clone(), config.generation_deadline),
            validate: ValidateStage::new(),
            repair: RepairStage::new(generator.clone(), config.generation_deadline),
            execute: ExecuteStage::new(engine),
            answer: AnswerStage::new(generator, config.answer_deadline),
        }
    }

    /// Run the state machine to completion and return the finished context.
    ///
    /// If the caller's task is dropped mid-run, the in-flight stage call is
    /// allowed to resolve on its own and the context simply never surfaces —
    /// nothing is persisted beyond this function.
    pub async fn run(&self, question: &str, schema: Arc<SchemaSnapshot>) -> PipelineContext {
        let mut ctx = PipelineContext::new(question, schema);
        let mut state = State::Start;

        loop {
            state = next_state(state, &ctx);
            let stage: Option<&dyn Stage> = match state {
                State::Generate => Some(&self.generate),
                State::Validate => Some(&self.validate),
                State::Repair => Some(&self.repair),
                State::Execute => Some(&self.execute),
                State::Answer => Some(&self.answer),
                State::Start | State::End => None,
            };
            let Some(stage) = stage else { break };

            tracing::debug!(stage = stage.name(), repair_count = ctx.repair_count, "stage");
            stage.run(&mut ctx).await;
        }

        ctx
    }

    /// Run the pipeline and project the result into the caller contract.
    pub async fn ask(&self, question: &str, schema: Arc<SchemaSnapshot>) -> AskReport {
        self.run(question, schema).await.into_report()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
