//! Loop detection over a recorded history
//!
//! A loop is a run of one non-initial phase that grows past its threshold:
//!
//! ```text
//! pos:    1  2  3  4 ...  11 12
//! phase:  I  U  U  U ...  U  U
//!            └──────── run ─────┘  length 11 > 10 → violation(start 2, end 12)
//! ```
//!
//! Initial events end every run. A different non-initial phase ends the run
//! of the other one.

mod detector;
mod report;

pub use detector::{detect_loops, detect_loops_in_phases};
pub use report::{
    DEFAULT_MAX_CONSECUTIVE, DetectError, LoopOptions, LoopReport, LoopViolation, MAX_LISTED_POSITIONS, MaxRuns,
};
