// Shared stub cells for block and runner tests.
//
// A `StubCell` counts its invocations, records the symbols it was fed and
// emits one-hot outputs: scripted symbols first, then its default symbol.
// Its state is the number of steps a sequence has taken; its tape turns
// each upstream vector into sum(upstream) + carried state gradient.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use algebrain_core::cell::{check_batch, CellStep, CellTape, RecurrentCell, Reverse, StepError};
use algebrain_core::gradient::{Gradient, Param};
use algebrain_core::tensor::argmax_f32;

pub struct StubCell {
    width: usize,
    default_symbol: usize,
    script: RefCell<VecDeque<usize>>,
    calls: Cell<usize>,
    batch_sizes: RefCell<Vec<usize>>,
    seen: RefCell<Vec<usize>>,
    pub weight: Param,
}

impl StubCell {
    pub fn new(width: usize, default_symbol: usize) -> Self {
        StubCell {
            width,
            default_symbol,
            script: RefCell::new(VecDeque::new()),
            calls: Cell::new(0),
            batch_sizes: RefCell::new(Vec::new()),
            seen: RefCell::new(Vec::new()),
            weight: Param::zeros(1),
        }
    }

    /// Emit `symbols` in order before falling back to the default symbol.
    pub fn scripted(width: usize, default_symbol: usize, symbols: &[usize]) -> Self {
        let cell = Self::new(width, default_symbol);
        cell.script.borrow_mut().extend(symbols.iter().copied());
        cell
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.borrow().clone()
    }

    /// Argmax of every input this cell was fed, in call order.
    pub fn seen(&self) -> Vec<usize> {
        self.seen.borrow().clone()
    }

    fn next_symbol(&self) -> usize {
        self.script.borrow_mut().pop_front().unwrap_or(self.default_symbol)
    }
}

pub fn one_hot(width: usize, k: usize) -> Vec<f32> {
    let mut v = vec![0.0; width];
    v[k] = 1.0;
    v
}

#[derive(Debug)]
pub struct StubTape<'a> {
    weight: &'a Param,
    n: usize,
}

impl<'a> CellTape<Reverse> for StubTape<'a> {
    type StateGrad = f32;

    fn propagate_gradient(
        &self,
        upstream: Vec<Vec<f32>>,
        state_grads: Option<Vec<f32>>,
        acc: &mut Gradient,
    ) -> Result<Vec<f32>, StepError> {
        if upstream.len() != self.n {
            return Err(StepError::InvalidArgument("stub: upstream length".into()));
        }
        let carried = state_grads.unwrap_or_else(|| vec![0.0; self.n]);
        let sums: Vec<f32> = upstream.iter().map(|u| u.iter().sum()).collect();
        acc.accumulate(self.weight, &[sums.iter().sum()]);
        Ok(sums.iter().zip(&carried).map(|(s, c)| s + c).collect())
    }
}

impl RecurrentCell<Reverse> for StubCell {
    type State = usize;
    type StateGrad = f32;
    type Tape<'a> = StubTape<'a>;

    fn start_state(&self, _ctx: &()) -> usize {
        0
    }

    fn zero_state_grad(&self, _state: &usize) -> f32 {
        0.0
    }

    fn propagate_start(&self, _ctx: &(), grads: &[f32], acc: &mut Gradient) -> Result<(), StepError> {
        acc.accumulate(&self.weight, &[grads.iter().sum()]);
        Ok(())
    }

    fn step<'a>(
        &'a self,
        _ctx: &'a (),
        states: Vec<usize>,
        inputs: Vec<Vec<f32>>,
    ) -> Result<CellStep<Vec<f32>, usize, StubTape<'a>>, StepError> {
        check_batch(&states, &inputs)?;
        self.calls.set(self.calls.get() + 1);
        self.batch_sizes.borrow_mut().push(states.len());
        let n = states.len();
        let mut outputs = Vec::with_capacity(n);
        for x in &inputs {
            self.seen.borrow_mut().push(argmax_f32(x).unwrap_or(usize::MAX));
            outputs.push(one_hot(self.width, self.next_symbol()));
        }
        Ok(CellStep {
            outputs,
            states: states.into_iter().map(|s| s + 1).collect(),
            tape: StubTape { weight: &self.weight, n },
        })
    }
}
