//! Question-to-answer orchestration.
//!
//! One request flows through an explicit finite-state machine:
//!
//! ```text
//! START → GENERATE → VALIDATE → {REPAIR | EXECUTE} → ANSWER → END
//!                        ↑           |
//!                        └───────────┘  (bounded by the repair budget)
//! ```
//!
//! Each stage reads and writes a fixed set of [`PipelineContext`] fields and
//! absorbs its own failures into `sql_error`; nothing a stage does can abort
//! the run. The only cycle, VALIDATE↔REPAIR, terminates because every REPAIR
//! visit increments `repair_count` and [`MAX_REPAIRS`] is finite.

pub mod context;
pub mod orchestrator;
pub mod stage;
pub mod state;

pub use context::PipelineContext;
pub use orchestrator::{Orchestrator, PipelineConfig};
pub use stage::{
    AnswerStage, ExecuteStage, GenerateStage, RepairStage, Stage, ValidateStage,
};
pub use state::{next_state, State, MAX_REPAIRS};
