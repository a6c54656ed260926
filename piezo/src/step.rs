use std::fmt;

use crate::axis::PerAxis;

/// What a relative step did on one axis.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum StepOutcome {
    /// No delta was requested, or the delta was zero.
    #[default]
    Skipped,
    Moved { from: f64, to: f64 },
    /// The target fell outside the travel range; the axis was left alone.
    OutOfRange { target: f64 },
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Skipped => write!(f, "skipped"),
            StepOutcome::Moved { to, .. } => write!(f, "{to:.3}"),
            StepOutcome::OutOfRange { target } => write!(f, "out_of_range({target:.3})"),
        }
    }
}

pub type StepReport = PerAxis<StepOutcome>;
