mod control;
mod options;
mod progress;
mod replay;

pub use control::{Cancelled, RunControl, RunState};
pub use options::{PartialOptions, ReplayLimits, ReplayOptions, RetryPolicy, scaled_delay_ms};
pub use progress::{
    ActionError, ListenerId, ReplayCheckpoint, ReplayOutcome, ReplayProgress, ReplayResult,
    ReplayStatus,
};
pub use replay::{ActionExecutor, ExecuteError, NO_ACTIVE_DESTINATION, ReplayEngine};
