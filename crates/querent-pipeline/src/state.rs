use crate::context::PipelineContext;

/// How many automated SQL-fix attempts the pipeline may spend before it gives
/// up and surfaces the error.
pub const MAX_REPAIRS: u32 = 2;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// The states of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Start,
    Generate,
    Validate,
    Repair,
    Execute,
    Answer,
    End,
}

impl State {
    pub fn name(&self) -> &'static str {
        match self {
            State::Start => "start",
            State::Generate => "generate",
            State::Validate => "validate",
            State::Repair => "repair",
            State::Execute => "execute",
            State::Answer => "answer",
            State::End => "end",
        }
    }
}

// ---------------------------------------------------------------------------
// Transition function
// ---------------------------------------------------------------------------

/// The pure transition function of the pipeline.
///
/// | Current  | Condition                              | Next     |
/// |----------|----------------------------------------|----------|
/// | Start    | always                                 | Generate |
/// | Generate | always                                 | Validate |
/// | Validate | accepted                               | Execute  |
/// | Validate | rejected, repair budget remaining      | Repair   |
/// | Validate | rejected, budget exhausted             | Execute  |
/// | Repair   | always (success or transport failure)  | Validate |
/// | Execute  | always                                 | Answer   |
/// | Answer   | always                                 | End      |
///
/// "Accepted" means validation stored a `validated_sql`. When the budget is
/// exhausted with no accepted statement, Execute is still entered so that it
/// can record the short-circuit failure on the context; it never calls the
/// engine in that case.
pub fn next_state(current: State, ctx: &PipelineContext) -> State {
    match current {
        State::Start => State::Generate,
        State::Generate => State::Validate,
        State::Validate => {
            if ctx.validated_sql.is_some() || ctx.repair_count >= MAX_REPAIRS {
                State::Execute
            } else {
                State::Repair
            }
        }
        State::Repair => State::Validate,
        State::Execute => State::Answer,
        State::Answer => State::End,
        State::End => State::End,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
