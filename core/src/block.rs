/// Dual-phase recurrent block.
///
/// Owns a reader and a writer cell. Each sequence starts out reading; the
/// step after it consumes an input with a non-zero terminator component it
/// switches to writing and stays there. Every step partitions the batch by
/// phase, runs each non-empty partition through its cell, and joins the
/// results back into batch order.
///
/// The routing is written once, generically over `Mode`, so the block is a
/// `RecurrentCell` in every mode its inner cell supports and can itself be
/// nested wherever a cell is expected.

use log::trace;

use crate::cell::{
    check_batch, CellStep, CellTape, DualVector, Forward, Mode, RecurrentCell, Reverse, StepError,
};
use crate::codec::SymbolCodec;
use crate::config::BlockConfig;
use crate::gradient::{Direction, Param, Parameterized};
use crate::partition;
use crate::phase::{Phase, PhaseState, PhaseStateGrad};
use crate::runner;
use crate::tanh_cell::TanhCell;

#[derive(Clone, Debug)]
pub struct DualPhaseBlock<C> {
    reader: C,
    writer: C,
    codec: SymbolCodec,
    max_response_len: usize,
}

impl<C> DualPhaseBlock<C> {
    pub fn new(reader: C, writer: C, codec: SymbolCodec) -> Self {
        DualPhaseBlock {
            reader,
            writer,
            codec,
            max_response_len: runner::DEFAULT_MAX_RESPONSE_LEN,
        }
    }

    /// Builder: cap on symbols decoded by `query`.
    pub fn with_max_response_len(mut self, max_response_len: usize) -> Self {
        self.max_response_len = max_response_len;
        self
    }

    pub fn max_response_len(&self) -> usize {
        self.max_response_len
    }

    pub fn reader(&self) -> &C {
        &self.reader
    }

    pub fn writer(&self) -> &C {
        &self.writer
    }

    pub fn codec(&self) -> &SymbolCodec {
        &self.codec
    }
}

impl DualPhaseBlock<TanhCell> {
    /// Independently initialised tanh reader and writer over the
    /// configured alphabet.
    pub fn from_config(cfg: &BlockConfig) -> Self {
        let codec = cfg.codec();
        let n = codec.char_count();
        let reader = TanhCell::new(n, cfg.hidden_size, n, cfg.seed);
        let writer = TanhCell::new(n, cfg.hidden_size, n, cfg.seed.wrapping_add(1));
        DualPhaseBlock::new(reader, writer, codec).with_max_response_len(cfg.max_response_len)
    }
}

impl<C: Parameterized> Parameterized for DualPhaseBlock<C> {
    fn params(&self) -> Vec<&Param> {
        let mut res = self.reader.params();
        res.extend(self.writer.params());
        res
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut res = self.reader.params_mut();
        res.extend(self.writer.params_mut());
        res
    }

    fn validate(&self) -> Result<(), String> {
        self.reader.validate().map_err(|e| format!("reader: {e}"))?;
        self.writer.validate().map_err(|e| format!("writer: {e}"))
    }
}

// ── Step record ─────────────────────────────────────────────────────────

/// What a block step remembers for back-propagation: which sequences went
/// to which sub-cell, the phases it handed on, and each sub-cell's tape.
/// A sub-cell that received an empty partition has no tape and is skipped.
#[derive(Debug)]
pub struct BlockTape<T> {
    reading: Vec<bool>,
    next_phases: Vec<Phase>,
    reader: Option<T>,
    writer: Option<T>,
}

impl<T> BlockTape<T> {
    /// Phase each sequence was in when the step ran.
    pub fn phases(&self) -> Vec<Phase> {
        self.reading.iter().map(|&r| Phase::from_reading(r)).collect()
    }

    /// Phase each sequence carries into the next step.
    pub fn next_phases(&self) -> &[Phase] {
        &self.next_phases
    }

    pub fn reader_invoked(&self) -> bool {
        self.reader.is_some()
    }

    pub fn writer_invoked(&self) -> bool {
        self.writer.is_some()
    }
}

impl<M: Mode, T: CellTape<M>> CellTape<M> for BlockTape<T> {
    type StateGrad = PhaseStateGrad<T::StateGrad>;

    fn propagate_gradient(
        &self,
        upstream: Vec<M::OutputGrad>,
        state_grads: Option<Vec<Self::StateGrad>>,
        acc: &mut M::Accumulator,
    ) -> Result<Vec<Self::StateGrad>, StepError> {
        let n = self.reading.len();
        if upstream.len() != n {
            return Err(StepError::PartitionMismatch(format!(
                "{} output gradients for a step over {n} sequences",
                upstream.len()
            )));
        }
        let inner_grads = match state_grads {
            None => None,
            Some(grads) => {
                if grads.len() != n {
                    return Err(StepError::PartitionMismatch(format!(
                        "{} state gradients for a step over {n} sequences",
                        grads.len()
                    )));
                }
                let mut inner = Vec::with_capacity(n);
                for (i, (g, &produced)) in grads.into_iter().zip(&self.next_phases).enumerate() {
                    if g.phase != produced {
                        return Err(StepError::PartitionMismatch(format!(
                            "sequence {i}: gradient tagged {:?} but step produced {:?}",
                            g.phase, produced
                        )));
                    }
                    inner.push(g.inner);
                }
                Some(inner)
            }
        };

        let (read_up, write_up) = partition::split(&self.reading, upstream)?;
        let (read_sg, write_sg) = match inner_grads {
            Some(g) => {
                let (r, w) = partition::split(&self.reading, g)?;
                (Some(r), Some(w))
            }
            None => (None, None),
        };

        let read_down = propagate_partition(self.reader.as_ref(), read_up, read_sg, acc)?;
        let write_down = propagate_partition(self.writer.as_ref(), write_up, write_sg, acc)?;

        let down = partition::join(&self.reading, read_down, write_down)?;
        Ok(down
            .into_iter()
            .zip(&self.reading)
            .map(|(inner, &r)| PhaseStateGrad { phase: Phase::from_reading(r), inner })
            .collect())
    }
}

fn propagate_partition<M: Mode, T: CellTape<M>>(
    tape: Option<&T>,
    upstream: Vec<M::OutputGrad>,
    state_grads: Option<Vec<T::StateGrad>>,
    acc: &mut M::Accumulator,
) -> Result<Vec<T::StateGrad>, StepError> {
    match tape {
        Some(t) => t.propagate_gradient(upstream, state_grads, acc),
        None if upstream.is_empty() => Ok(Vec::new()),
        None => Err(StepError::PartitionMismatch(format!(
            "{} gradients routed to a sub-cell that did not run",
            upstream.len()
        ))),
    }
}

/// Run one partition through its cell; an empty partition never reaches it.
fn step_partition<'a, M: Mode, C: RecurrentCell<M>>(
    cell: &'a C,
    ctx: &'a M::Context,
    states: Vec<C::State>,
    inputs: Vec<M::Vector>,
) -> Result<(Vec<M::Vector>, Vec<C::State>, Option<C::Tape<'a>>), StepError>
where
    C: 'a,
    M::Context: 'a,
{
    if states.is_empty() {
        return Ok((Vec::new(), Vec::new(), None));
    }
    let step = cell.step(ctx, states, inputs)?;
    Ok((step.outputs, step.states, Some(step.tape)))
}

// ── Cell contract ───────────────────────────────────────────────────────

impl<M: Mode, C: RecurrentCell<M>> RecurrentCell<M> for DualPhaseBlock<C> {
    type State = PhaseState<C::State>;
    type StateGrad = PhaseStateGrad<C::StateGrad>;
    type Tape<'a> = BlockTape<C::Tape<'a>>
    where
        Self: 'a,
        M::Context: 'a;

    fn start_state(&self, ctx: &M::Context) -> Self::State {
        PhaseState::reading(self.reader.start_state(ctx))
    }

    fn zero_state_grad(&self, state: &Self::State) -> Self::StateGrad {
        let inner = match state.phase {
            Phase::Reading => self.reader.zero_state_grad(&state.inner),
            Phase::Writing => self.writer.zero_state_grad(&state.inner),
        };
        PhaseStateGrad { phase: state.phase, inner }
    }

    /// Start states always belong to the reader.
    fn propagate_start(
        &self,
        ctx: &M::Context,
        grads: &[Self::StateGrad],
        acc: &mut M::Accumulator,
    ) -> Result<(), StepError> {
        if let Some(i) = grads.iter().position(|g| g.phase != Phase::Reading) {
            return Err(StepError::PartitionMismatch(format!(
                "start gradient {i} tagged {:?}",
                grads[i].phase
            )));
        }
        let inner: Vec<C::StateGrad> = grads.iter().map(|g| g.inner.clone()).collect();
        self.reader.propagate_start(ctx, &inner, acc)
    }

    fn step<'a>(
        &'a self,
        ctx: &'a M::Context,
        states: Vec<Self::State>,
        inputs: Vec<M::Vector>,
    ) -> Result<CellStep<M::Vector, Self::State, Self::Tape<'a>>, StepError> {
        check_batch(&states, &inputs)?;
        let n = states.len();
        let terminator = self.codec.terminator();

        let mut reading = Vec::with_capacity(n);
        let mut next_phases = Vec::with_capacity(n);
        let mut inner = Vec::with_capacity(n);
        for (state, input) in states.into_iter().zip(&inputs) {
            let x = M::primal(input);
            if x.len() <= terminator {
                return Err(StepError::InvalidArgument(format!(
                    "input width {} has no terminator component {terminator}",
                    x.len()
                )));
            }
            reading.push(state.phase.is_reading());
            next_phases.push(state.phase.advance(self.codec.carries_terminator(x)));
            inner.push(state.inner);
        }

        let (read_states, write_states) = partition::split(&reading, inner)?;
        let (read_inputs, write_inputs) = partition::split(&reading, inputs)?;
        trace!(
            "dual-phase step: {} reading, {} writing",
            read_states.len(),
            write_states.len()
        );

        let (read_out, read_next, read_tape) =
            step_partition(&self.reader, ctx, read_states, read_inputs)?;
        let (write_out, write_next, write_tape) =
            step_partition(&self.writer, ctx, write_states, write_inputs)?;

        let outputs = partition::join(&reading, read_out, write_out)?;
        let inner_next = partition::join(&reading, read_next, write_next)?;
        let states = inner_next
            .into_iter()
            .zip(&next_phases)
            .map(|(inner, &phase)| PhaseState { phase, inner })
            .collect();

        Ok(CellStep {
            outputs,
            states,
            tape: BlockTape { reading, next_phases, reader: read_tape, writer: write_tape },
        })
    }
}

// ── Mode-specific entry points ──────────────────────────────────────────

impl<C: RecurrentCell<Reverse>> DualPhaseBlock<C> {
    /// Reading start states for a batch.
    pub fn start(&self, batch: usize) -> Vec<PhaseState<C::State>> {
        RecurrentCell::<Reverse>::start_states(self, &(), batch)
    }

    /// One reverse-mode step.
    pub fn apply<'a>(
        &'a self,
        states: Vec<PhaseState<C::State>>,
        inputs: Vec<Vec<f32>>,
    ) -> Result<CellStep<Vec<f32>, PhaseState<C::State>, BlockTape<C::Tape<'a>>>, StepError> {
        RecurrentCell::<Reverse>::step(self, &(), states, inputs)
    }

    /// Decode a response for `text`, capped at `max_response_len` symbols.
    pub fn query(&self, text: &str) -> Result<String, StepError> {
        self.query_with_limit(text, self.max_response_len)
    }

    pub fn query_with_limit(&self, text: &str, max_len: usize) -> Result<String, StepError> {
        runner::query(self, &self.codec, text, max_len)
    }
}

impl<C: RecurrentCell<Forward>> DualPhaseBlock<C> {
    /// Reading start states carrying tangents along `direction`.
    pub fn start_forward(&self, direction: &Direction, batch: usize) -> Vec<PhaseState<C::State>> {
        RecurrentCell::<Forward>::start_states(self, direction, batch)
    }

    /// One forward-mode step along `direction`.
    pub fn apply_forward<'a>(
        &'a self,
        direction: &'a Direction,
        states: Vec<PhaseState<C::State>>,
        inputs: Vec<DualVector>,
    ) -> Result<CellStep<DualVector, PhaseState<C::State>, BlockTape<C::Tape<'a>>>, StepError> {
        RecurrentCell::<Forward>::step(self, direction, states, inputs)
    }
}
