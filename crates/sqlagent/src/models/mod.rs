pub mod candidate;
pub mod instructions;
pub mod outcome;
pub mod record;
pub mod schema;
pub mod trace;

pub use candidate::{Candidate, CandidateOrigin};
pub use instructions::{
    Exemplar, Guidance, GuidanceExample, InstructionSet, Stage, StageInstructions,
};
pub use outcome::{CellValue, ExecutionErrorKind, ExecutionOutcome};
pub use record::{RESULT_RECORD_SCHEMA_VERSION, ResultRecord, result_record_json_schema};
pub use schema::{
    ColumnSpec, ForeignKey, ReducedSchema, ReducedTable, SchemaDescription, SelectionReason,
    TableSpec,
};
pub use trace::{Trace, TraceBuilder, TraceEntry, TraceStage, TraceStep};
