/// Recurrent cell contract, generic over the computation mode.
///
/// A cell is an opaque batched step function. Calling `step` returns the
/// per-sequence outputs, the next states and a tape; the tape later routes
/// upstream signals back into parameter gradients and input-state gradients.
///
/// Two modes share the contract:
///   - `Reverse`: plain values, back-propagated gradients.
///   - `Forward`: every value carries a tangent along a parameter-space
///     direction (R-operator), and back-propagation also yields the
///     directional derivative of the gradient.
///
/// Code that only routes values (partitioning, joining, phase bookkeeping)
/// is written once against `Mode` and works for both.

use std::fmt;

use thiserror::Error;

use crate::gradient::{Direction, Gradient};

/// Errors from stepping or back-propagating through a cell.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StepError {
    /// Malformed call: batch lengths disagree, wrong vector width, etc.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Gradient batch does not match the partition recorded on the forward
    /// pass. Indicates value and gradient paths drifted apart; not recoverable.
    #[error("partition mismatch: {0}")]
    PartitionMismatch(String),
}

// ── Modes ───────────────────────────────────────────────────────────────

/// A computation mode: what flows through a cell and what accumulates.
pub trait Mode {
    /// Per-call context shared by every sequence in the batch.
    type Context;
    /// Per-sequence input and output vector.
    type Vector: Clone + fmt::Debug;
    /// Per-sequence upstream signal for an output vector.
    type OutputGrad: Clone + fmt::Debug;
    /// Parameter-gradient sink shared by every cell of a model.
    type Accumulator;

    /// The plain value of a vector, without any derivative companion.
    fn primal(v: &Self::Vector) -> &[f32];
}

/// Reverse mode: values in, gradients back.
#[derive(Clone, Copy, Debug)]
pub enum Reverse {}

/// Forward mode (R-operator) along a `Direction` in parameter space.
#[derive(Clone, Copy, Debug)]
pub enum Forward {}

impl Mode for Reverse {
    type Context = ();
    type Vector = Vec<f32>;
    type OutputGrad = Vec<f32>;
    type Accumulator = Gradient;

    fn primal(v: &Vec<f32>) -> &[f32] {
        v
    }
}

impl Mode for Forward {
    type Context = Direction;
    type Vector = DualVector;
    type OutputGrad = DualVector;
    type Accumulator = ForwardAccumulator;

    fn primal(v: &DualVector) -> &[f32] {
        &v.value
    }
}

/// A value paired with its directional derivative.
///
/// Also used for forward-mode upstream signals, where `value` is the
/// gradient and `tangent` its R-derivative.
#[derive(Clone, Debug, PartialEq)]
pub struct DualVector {
    pub value: Vec<f32>,
    pub tangent: Vec<f32>,
}

impl DualVector {
    pub fn new(value: Vec<f32>, tangent: Vec<f32>) -> Self {
        debug_assert_eq!(value.len(), tangent.len());
        DualVector { value, tangent }
    }

    /// A value that does not move along the direction (zero tangent).
    pub fn constant(value: Vec<f32>) -> Self {
        let tangent = vec![0.0; value.len()];
        DualVector { value, tangent }
    }

    pub fn zeros(n: usize) -> Self {
        DualVector { value: vec![0.0; n], tangent: vec![0.0; n] }
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

/// Forward-mode sink: the gradient and its directional derivative.
#[derive(Clone, Debug, Default)]
pub struct ForwardAccumulator {
    pub grad: Gradient,
    pub r_grad: Gradient,
}

impl ForwardAccumulator {
    pub fn new() -> Self {
        Self::default()
    }
}

// ── Cell contract ───────────────────────────────────────────────────────

/// Output of one batched step: outputs and next states are in batch order.
#[derive(Debug)]
pub struct CellStep<V, S, T> {
    pub outputs: Vec<V>,
    pub states: Vec<S>,
    pub tape: T,
}

/// Per-step record that routes upstream signals back through the step.
pub trait CellTape<M: Mode> {
    type StateGrad;

    /// Back-propagate one step.
    ///
    /// `upstream[i]` is the signal for output i and `state_grads[i]` the
    /// signal for next state i (`None`: nothing flows back from later steps).
    /// Parameter gradients go into `acc`. Returns the gradients of the
    /// step's input states, in batch order.
    fn propagate_gradient(
        &self,
        upstream: Vec<M::OutputGrad>,
        state_grads: Option<Vec<Self::StateGrad>>,
        acc: &mut M::Accumulator,
    ) -> Result<Vec<Self::StateGrad>, StepError>;
}

/// The recurrent cell contract.
pub trait RecurrentCell<M: Mode> {
    type State: Clone + fmt::Debug;
    type StateGrad: Clone + fmt::Debug;
    /// Step record; may borrow the cell and the call context.
    type Tape<'a>: CellTape<M, StateGrad = Self::StateGrad>
    where
        Self: 'a,
        M::Context: 'a;

    /// Initial state for one sequence.
    fn start_state(&self, ctx: &M::Context) -> Self::State;

    /// Initial states for a whole batch.
    fn start_states(&self, ctx: &M::Context, batch: usize) -> Vec<Self::State> {
        (0..batch).map(|_| self.start_state(ctx)).collect()
    }

    /// A gradient of zero for `state`, for sequences with nothing flowing back.
    fn zero_state_grad(&self, state: &Self::State) -> Self::StateGrad;

    /// Push gradients of the start states into the accumulator.
    fn propagate_start(
        &self,
        ctx: &M::Context,
        grads: &[Self::StateGrad],
        acc: &mut M::Accumulator,
    ) -> Result<(), StepError>;

    /// Advance every sequence in the batch by one timestep.
    /// Callers must not pass an empty batch.
    fn step<'a>(
        &'a self,
        ctx: &'a M::Context,
        states: Vec<Self::State>,
        inputs: Vec<M::Vector>,
    ) -> Result<CellStep<M::Vector, Self::State, Self::Tape<'a>>, StepError>;
}

/// Check that a batch of states and inputs line up and is non-empty.
pub fn check_batch<S, V>(states: &[S], inputs: &[V]) -> Result<(), StepError> {
    if states.is_empty() {
        return Err(StepError::InvalidArgument("empty batch".into()));
    }
    if states.len() != inputs.len() {
        return Err(StepError::InvalidArgument(format!(
            "{} states but {} inputs",
            states.len(),
            inputs.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primal_forward_drops_tangent() {
        let v = DualVector::new(vec![1.0, 2.0], vec![3.0, 4.0]);
        assert_eq!(Forward::primal(&v), &[1.0, 2.0]);
        assert_eq!(Reverse::primal(&vec![5.0]), &[5.0]);
    }

    #[test]
    fn test_check_batch() {
        assert!(check_batch(&[1, 2], &[3, 4]).is_ok());
        assert!(matches!(check_batch::<u8, u8>(&[], &[]), Err(StepError::InvalidArgument(_))));
        assert!(matches!(check_batch(&[1], &[3, 4]), Err(StepError::InvalidArgument(_))));
    }
}
