/// Unrolling a cell over variable-length sequences, and back-propagation
/// through time.
///
/// At timestep t only the sequences longer than t are stepped, in batch
/// order; the others keep their last state. Backward walks the recorded
/// steps in reverse. A sequence whose last step is the current one gets a
/// zero gradient for its final state, and the start-state gradients are
/// handed to `propagate_start` at the end.

use log::debug;

use crate::cell::{CellTape, Mode, RecurrentCell, StepError};

struct UnrolledStep<'a, M: Mode, C: RecurrentCell<M> + 'a>
where
    M::Context: 'a,
{
    /// Batch indices stepped at this timestep, ascending.
    active: Vec<usize>,
    tape: C::Tape<'a>,
    next_states: Vec<C::State>,
}

/// A recorded unroll: outputs per sequence plus every step's tape.
pub struct Unrolled<'a, M: Mode, C: RecurrentCell<M> + 'a>
where
    M::Context: 'a,
{
    cell: &'a C,
    ctx: &'a M::Context,
    lengths: Vec<usize>,
    start_states: Vec<C::State>,
    final_states: Vec<C::State>,
    outputs: Vec<Vec<M::Vector>>,
    steps: Vec<UnrolledStep<'a, M, C>>,
}

/// Run `cell` over a batch of input sequences of possibly different length.
pub fn unroll<'a, M: Mode, C: RecurrentCell<M>>(
    cell: &'a C,
    ctx: &'a M::Context,
    sequences: Vec<Vec<M::Vector>>,
) -> Result<Unrolled<'a, M, C>, StepError>
where
    C: 'a,
    M::Context: 'a,
{
    if sequences.is_empty() {
        return Err(StepError::InvalidArgument("unroll over an empty batch".into()));
    }
    let n = sequences.len();
    let lengths: Vec<usize> = sequences.iter().map(|s| s.len()).collect();
    let max_len = lengths.iter().copied().max().unwrap_or(0);

    let start_states = cell.start_states(ctx, n);
    let mut current: Vec<Option<C::State>> = start_states.iter().cloned().map(Some).collect();
    let mut inputs: Vec<_> = sequences.into_iter().map(|s| s.into_iter()).collect();
    let mut outputs: Vec<Vec<M::Vector>> = lengths.iter().map(|&l| Vec::with_capacity(l)).collect();
    let mut steps = Vec::with_capacity(max_len);

    for t in 0..max_len {
        let active: Vec<usize> = (0..n).filter(|&i| lengths[i] > t).collect();
        let mut states = Vec::with_capacity(active.len());
        let mut xs = Vec::with_capacity(active.len());
        for &i in &active {
            let (state, x) = match (current[i].take(), inputs[i].next()) {
                (Some(s), Some(x)) => (s, x),
                _ => return Err(StepError::InvalidArgument(format!("sequence {i} lost at step {t}"))),
            };
            states.push(state);
            xs.push(x);
        }

        let step = cell.step(ctx, states, xs)?;
        if step.outputs.len() != active.len() || step.states.len() != active.len() {
            return Err(StepError::InvalidArgument(format!(
                "step {t}: {} sequences in, {} outputs and {} states out",
                active.len(),
                step.outputs.len(),
                step.states.len()
            )));
        }
        for ((&i, y), s) in active.iter().zip(step.outputs).zip(&step.states) {
            outputs[i].push(y);
            current[i] = Some(s.clone());
        }
        steps.push(UnrolledStep { active, tape: step.tape, next_states: step.states });
    }

    let final_states = current
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.ok_or_else(|| StepError::InvalidArgument(format!("sequence {i} has no final state"))))
        .collect::<Result<Vec<_>, _>>()?;
    debug!("unrolled {n} sequences over {max_len} steps");

    Ok(Unrolled { cell, ctx, lengths, start_states, final_states, outputs, steps })
}

impl<'a, M: Mode, C: RecurrentCell<M> + 'a> Unrolled<'a, M, C>
where
    M::Context: 'a,
{
    /// Outputs of each sequence, one per input.
    pub fn outputs(&self) -> &[Vec<M::Vector>] {
        &self.outputs
    }

    pub fn into_outputs(self) -> Vec<Vec<M::Vector>> {
        self.outputs
    }

    /// State of each sequence after its last input.
    pub fn final_states(&self) -> &[C::State] {
        &self.final_states
    }

    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    /// Number of recorded timesteps (the longest sequence's length).
    pub fn num_steps(&self) -> usize {
        self.steps.len()
    }

    /// Back-propagate through time. `upstream[i][t]` is the signal for
    /// output t of sequence i; shapes must match `outputs()`.
    pub fn backward(&self, upstream: Vec<Vec<M::OutputGrad>>, acc: &mut M::Accumulator) -> Result<(), StepError> {
        if upstream.len() != self.lengths.len() {
            return Err(StepError::InvalidArgument(format!(
                "{} upstream sequences for {} unrolled",
                upstream.len(),
                self.lengths.len()
            )));
        }
        let mut upstream = upstream;
        for (i, (u, &l)) in upstream.iter().zip(&self.lengths).enumerate() {
            if u.len() != l {
                return Err(StepError::InvalidArgument(format!(
                    "sequence {i}: {} upstream signals for {l} outputs",
                    u.len()
                )));
            }
        }

        let mut carried: Vec<Option<C::StateGrad>> = vec![None; self.lengths.len()];
        for step in self.steps.iter().rev() {
            let mut ups = Vec::with_capacity(step.active.len());
            let mut state_grads = Vec::with_capacity(step.active.len());
            for (&i, next) in step.active.iter().zip(&step.next_states) {
                let u = upstream[i]
                    .pop()
                    .ok_or_else(|| StepError::InvalidArgument(format!("sequence {i} ran out of upstream")))?;
                ups.push(u);
                let g = match carried[i].take() {
                    Some(g) => g,
                    None => self.cell.zero_state_grad(next),
                };
                state_grads.push(g);
            }
            let down = step.tape.propagate_gradient(ups, Some(state_grads), acc)?;
            if down.len() != step.active.len() {
                return Err(StepError::PartitionMismatch(format!(
                    "{} state gradients back for {} sequences",
                    down.len(),
                    step.active.len()
                )));
            }
            for (&i, g) in step.active.iter().zip(down) {
                carried[i] = Some(g);
            }
        }

        let start_grads: Vec<C::StateGrad> = carried
            .into_iter()
            .zip(&self.start_states)
            .map(|(g, s)| g.unwrap_or_else(|| self.cell.zero_state_grad(s)))
            .collect();
        self.cell.propagate_start(self.ctx, &start_grads, acc)
    }
}
