//! Per-sequence phase bookkeeping for the dual-phase block.

use serde::{Serialize, Deserialize};

/// Which sub-cell a sequence is routed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Consuming the query (encoder).
    Reading,
    /// Emitting the response (decoder).
    Writing,
}

impl Phase {
    pub fn is_reading(self) -> bool {
        self == Phase::Reading
    }

    pub fn from_reading(reading: bool) -> Self {
        if reading { Phase::Reading } else { Phase::Writing }
    }

    /// Phase for the next timestep. A sequence keeps reading only while it
    /// is reading and the input it just consumed carries no terminator.
    /// Writing is absorbing.
    pub fn advance(self, saw_terminator: bool) -> Self {
        match self {
            Phase::Reading if !saw_terminator => Phase::Reading,
            _ => Phase::Writing,
        }
    }
}

/// Block state for one sequence: its phase plus the inner cell state.
#[derive(Clone, Debug, PartialEq)]
pub struct PhaseState<S> {
    pub phase: Phase,
    pub inner: S,
}

impl<S> PhaseState<S> {
    pub fn reading(inner: S) -> Self {
        PhaseState { phase: Phase::Reading, inner }
    }
}

/// Gradient of a `PhaseState`, tagged with the phase of the state it
/// belongs to so that routing can be checked against the forward pass.
#[derive(Clone, Debug, PartialEq)]
pub struct PhaseStateGrad<G> {
    pub phase: Phase,
    pub inner: G,
}
