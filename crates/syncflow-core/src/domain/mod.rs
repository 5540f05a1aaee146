//! Domain model (task definitions, checkpoints, run logs, flows, errors).
//!
//! 副作用を持たない型だけを置く。外部システムとのやり取りは `ports`、
//! 実行ロジックは `sync` に置く。

pub mod checkpoint;
pub mod dates;
pub mod errors;
pub mod flow;
pub mod ids;
pub mod state;
pub mod task_config;
pub mod template;

pub use checkpoint::{Checkpoint, RunLog, RunStatus};
pub use dates::{DateContext, format_date, parse_date};
pub use errors::{SyncError, ValidationError};
pub use flow::{FlowRun, FlowStatus, TaskOutcome, TaskRunState, TaskSelection};
pub use ids::{RunId, RunLogId};
pub use state::ExecutionPhase;
pub use task_config::{ColumnDef, Schedule, SyncMode, SyncType, TableSchema, TaskConfig};
pub use template::{Params, TemplateVars, render_params};

/// One record as returned by the data API and written to storage.
pub type Row = serde_json::Map<String, serde_json::Value>;
