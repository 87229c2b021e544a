/// Single-layer tanh recurrent cell with a log-softmax read-out.
///
/// Forward (per sequence):
///   a   = W_in @ x + W_rec @ h + b
///   h'  = tanh(a)
///   z   = W_out @ h' + b_out
///   y   = log_softmax(z)
///
/// The start state h0 is learnable. Implements both computation modes;
/// the forward-mode step carries tangents along a parameter direction and
/// its tape back-propagates the R-derivative of every gradient alongside
/// the gradient itself.

use serde::{Serialize, Deserialize};

use crate::cell::{
    check_batch, CellStep, CellTape, DualVector, Forward, ForwardAccumulator, RecurrentCell,
    Reverse, StepError,
};
use crate::gradient::{Direction, Gradient, Param, Parameterized};
use crate::tensor::{
    add_assign_f32, dot_f32, log_softmax_f32, matvec_acc_f32, matvec_t_acc_f32, outer_acc_f32,
    SimpleRng,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TanhCell {
    input_size: usize,
    hidden_size: usize,
    output_size: usize,
    /// [hidden, input]
    pub w_in: Param,
    /// [hidden, hidden]
    pub w_rec: Param,
    /// [hidden]
    pub b: Param,
    /// [output, hidden]
    pub w_out: Param,
    /// [output]
    pub b_out: Param,
    /// [hidden]
    pub h0: Param,
}

impl TanhCell {
    /// Uniform init in ±1/sqrt(fan_in); biases and h0 start at zero.
    pub fn new(input_size: usize, hidden_size: usize, output_size: usize, seed: u64) -> Self {
        assert!(input_size > 0 && hidden_size > 0 && output_size > 0, "cell sizes must be non-zero");
        let mut rng = SimpleRng::new(seed);
        let mut init = |rows: usize, cols: usize| {
            let mut data = vec![0.0f32; rows * cols];
            rng.fill_uniform(&mut data, 1.0 / (cols as f32).sqrt());
            Param::new(data)
        };
        let w_in = init(hidden_size, input_size);
        let w_rec = init(hidden_size, hidden_size);
        let w_out = init(output_size, hidden_size);
        TanhCell {
            input_size,
            hidden_size,
            output_size,
            w_in,
            w_rec,
            b: Param::zeros(hidden_size),
            w_out,
            b_out: Param::zeros(output_size),
            h0: Param::zeros(hidden_size),
        }
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    fn check_shapes(&self, h: &[f32], x: &[f32]) -> Result<(), StepError> {
        if x.len() != self.input_size {
            return Err(StepError::InvalidArgument(format!(
                "input width {} != {}",
                x.len(),
                self.input_size
            )));
        }
        if h.len() != self.hidden_size {
            return Err(StepError::InvalidArgument(format!(
                "state width {} != {}",
                h.len(),
                self.hidden_size
            )));
        }
        Ok(())
    }

    /// Returns (h', y).
    fn forward_one(&self, h: &[f32], x: &[f32]) -> (Vec<f32>, Vec<f32>) {
        let (hs, is, os) = (self.hidden_size, self.input_size, self.output_size);
        let mut a = self.b.data.clone();
        matvec_acc_f32(&self.w_in.data, x, &mut a, hs, is);
        matvec_acc_f32(&self.w_rec.data, h, &mut a, hs, hs);
        let h_next: Vec<f32> = a.iter().map(|v| v.tanh()).collect();

        let mut z = self.b_out.data.clone();
        matvec_acc_f32(&self.w_out.data, &h_next, &mut z, os, hs);
        let mut y = vec![0.0f32; os];
        log_softmax_f32(&z, &mut y);
        (h_next, y)
    }
}

impl Parameterized for TanhCell {
    fn params(&self) -> Vec<&Param> {
        vec![&self.w_in, &self.w_rec, &self.b, &self.w_out, &self.b_out, &self.h0]
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        vec![
            &mut self.w_in,
            &mut self.w_rec,
            &mut self.b,
            &mut self.w_out,
            &mut self.b_out,
            &mut self.h0,
        ]
    }

    fn validate(&self) -> Result<(), String> {
        let (hs, is, os) = (self.hidden_size, self.input_size, self.output_size);
        if hs == 0 || is == 0 || os == 0 {
            return Err(format!("zero size: input {is}, hidden {hs}, output {os}"));
        }
        let expected = [
            ("w_in", &self.w_in, hs * is),
            ("w_rec", &self.w_rec, hs * hs),
            ("b", &self.b, hs),
            ("w_out", &self.w_out, os * hs),
            ("b_out", &self.b_out, os),
            ("h0", &self.h0, hs),
        ];
        for (name, p, len) in expected {
            if p.len() != len {
                return Err(format!("{name} has {} values, expected {len}", p.len()));
            }
        }
        Ok(())
    }
}

/// Per-parameter gradient buffers summed over a batch before accumulation.
struct GradBuffers {
    w_in: Vec<f32>,
    w_rec: Vec<f32>,
    b: Vec<f32>,
    w_out: Vec<f32>,
    b_out: Vec<f32>,
}

impl GradBuffers {
    fn zeros(cell: &TanhCell) -> Self {
        GradBuffers {
            w_in: vec![0.0; cell.w_in.len()],
            w_rec: vec![0.0; cell.w_rec.len()],
            b: vec![0.0; cell.b.len()],
            w_out: vec![0.0; cell.w_out.len()],
            b_out: vec![0.0; cell.b_out.len()],
        }
    }

    fn flush(self, cell: &TanhCell, acc: &mut Gradient) {
        acc.accumulate(&cell.w_in, &self.w_in);
        acc.accumulate(&cell.w_rec, &self.w_rec);
        acc.accumulate(&cell.b, &self.b);
        acc.accumulate(&cell.w_out, &self.w_out);
        acc.accumulate(&cell.b_out, &self.b_out);
    }
}

fn check_upstream(n: usize, upstream: usize, state_grads: Option<usize>) -> Result<(), StepError> {
    if upstream != n || state_grads.is_some_and(|s| s != n) {
        return Err(StepError::InvalidArgument(format!(
            "tape recorded {n} sequences, got {upstream} output grads and {:?} state grads",
            state_grads
        )));
    }
    Ok(())
}

// ── Reverse mode ────────────────────────────────────────────────────────

#[derive(Debug)]
struct Record {
    x: Vec<f32>,
    h: Vec<f32>,
    h_next: Vec<f32>,
    probs: Vec<f32>,
}

#[derive(Debug)]
pub struct TanhTape<'a> {
    cell: &'a TanhCell,
    records: Vec<Record>,
}

impl RecurrentCell<Reverse> for TanhCell {
    type State = Vec<f32>;
    type StateGrad = Vec<f32>;
    type Tape<'a> = TanhTape<'a>;

    fn start_state(&self, _ctx: &()) -> Vec<f32> {
        self.h0.data.clone()
    }

    fn zero_state_grad(&self, _state: &Vec<f32>) -> Vec<f32> {
        vec![0.0; self.hidden_size]
    }

    fn propagate_start(&self, _ctx: &(), grads: &[Vec<f32>], acc: &mut Gradient) -> Result<(), StepError> {
        let mut total = vec![0.0f32; self.hidden_size];
        for g in grads {
            if g.len() != self.hidden_size {
                return Err(StepError::InvalidArgument("start gradient width".into()));
            }
            add_assign_f32(&mut total, g);
        }
        acc.accumulate(&self.h0, &total);
        Ok(())
    }

    fn step<'a>(
        &'a self,
        _ctx: &'a (),
        states: Vec<Vec<f32>>,
        inputs: Vec<Vec<f32>>,
    ) -> Result<CellStep<Vec<f32>, Vec<f32>, TanhTape<'a>>, StepError> {
        check_batch(&states, &inputs)?;
        let mut outputs = Vec::with_capacity(states.len());
        let mut next = Vec::with_capacity(states.len());
        let mut records = Vec::with_capacity(states.len());
        for (h, x) in states.into_iter().zip(inputs) {
            self.check_shapes(&h, &x)?;
            let (h_next, y) = self.forward_one(&h, &x);
            let probs = y.iter().map(|v| v.exp()).collect();
            outputs.push(y);
            next.push(h_next.clone());
            records.push(Record { x, h, h_next, probs });
        }
        Ok(CellStep { outputs, states: next, tape: TanhTape { cell: self, records } })
    }
}

impl<'a> CellTape<Reverse> for TanhTape<'a> {
    type StateGrad = Vec<f32>;

    fn propagate_gradient(
        &self,
        upstream: Vec<Vec<f32>>,
        state_grads: Option<Vec<Vec<f32>>>,
        acc: &mut Gradient,
    ) -> Result<Vec<Vec<f32>>, StepError> {
        let cell = self.cell;
        let (hs, is, os) = (cell.hidden_size, cell.input_size, cell.output_size);
        check_upstream(self.records.len(), upstream.len(), state_grads.as_ref().map(|s| s.len()))?;

        let mut bufs = GradBuffers::zeros(cell);
        let mut down = Vec::with_capacity(self.records.len());
        let mut state_grads = state_grads.map(|s| s.into_iter());

        for (rec, u) in self.records.iter().zip(upstream) {
            if u.len() != os {
                return Err(StepError::InvalidArgument("output gradient width".into()));
            }
            // d/dz of log_softmax: u - p * sum(u)
            let su: f32 = u.iter().sum();
            let gz: Vec<f32> = u.iter().zip(&rec.probs).map(|(ui, pi)| ui - pi * su).collect();
            outer_acc_f32(&gz, &rec.h_next, &mut bufs.w_out);
            add_assign_f32(&mut bufs.b_out, &gz);

            let mut gh_next = match state_grads.as_mut().and_then(|it| it.next()) {
                Some(s) if s.len() == hs => s,
                Some(_) => return Err(StepError::InvalidArgument("state gradient width".into())),
                None => vec![0.0; hs],
            };
            matvec_t_acc_f32(&cell.w_out.data, &gz, &mut gh_next, os, hs);

            let ga: Vec<f32> = rec
                .h_next
                .iter()
                .zip(&gh_next)
                .map(|(h, g)| (1.0 - h * h) * g)
                .collect();
            outer_acc_f32(&ga, &rec.x, &mut bufs.w_in);
            outer_acc_f32(&ga, &rec.h, &mut bufs.w_rec);
            add_assign_f32(&mut bufs.b, &ga);

            let mut gh = vec![0.0f32; hs];
            matvec_t_acc_f32(&cell.w_rec.data, &ga, &mut gh, hs, hs);
            down.push(gh);
        }
        debug_assert_eq!(bufs.w_in.len(), hs * is);
        bufs.flush(cell, acc);
        Ok(down)
    }
}

// ── Forward mode ────────────────────────────────────────────────────────

struct ForwardRecord {
    x: DualVector,
    h: DualVector,
    h_next: DualVector,
    probs: Vec<f32>,
    dy: Vec<f32>,
}

pub struct TanhForwardTape<'a> {
    cell: &'a TanhCell,
    direction: &'a Direction,
    records: Vec<ForwardRecord>,
}

impl RecurrentCell<Forward> for TanhCell {
    type State = DualVector;
    type StateGrad = DualVector;
    type Tape<'a> = TanhForwardTape<'a>;

    fn start_state(&self, direction: &Direction) -> DualVector {
        match direction.get(&self.h0) {
            Some(d) => DualVector::new(self.h0.data.clone(), d.to_vec()),
            None => DualVector::constant(self.h0.data.clone()),
        }
    }

    fn zero_state_grad(&self, _state: &DualVector) -> DualVector {
        DualVector::zeros(self.hidden_size)
    }

    fn propagate_start(
        &self,
        _direction: &Direction,
        grads: &[DualVector],
        acc: &mut ForwardAccumulator,
    ) -> Result<(), StepError> {
        let mut total = vec![0.0f32; self.hidden_size];
        let mut r_total = vec![0.0f32; self.hidden_size];
        for g in grads {
            if g.len() != self.hidden_size {
                return Err(StepError::InvalidArgument("start gradient width".into()));
            }
            add_assign_f32(&mut total, &g.value);
            add_assign_f32(&mut r_total, &g.tangent);
        }
        acc.grad.accumulate(&self.h0, &total);
        acc.r_grad.accumulate(&self.h0, &r_total);
        Ok(())
    }

    fn step<'a>(
        &'a self,
        direction: &'a Direction,
        states: Vec<DualVector>,
        inputs: Vec<DualVector>,
    ) -> Result<CellStep<DualVector, DualVector, TanhForwardTape<'a>>, StepError> {
        check_batch(&states, &inputs)?;
        let (hs, is, os) = (self.hidden_size, self.input_size, self.output_size);
        let d_w_in = direction.get(&self.w_in);
        let d_w_rec = direction.get(&self.w_rec);
        let d_w_out = direction.get(&self.w_out);

        let mut outputs = Vec::with_capacity(states.len());
        let mut next = Vec::with_capacity(states.len());
        let mut records = Vec::with_capacity(states.len());
        for (h, x) in states.into_iter().zip(inputs) {
            self.check_shapes(&h.value, &x.value)?;
            if h.tangent.len() != hs || x.tangent.len() != is {
                return Err(StepError::InvalidArgument("tangent width".into()));
            }
            let (h_next, y) = self.forward_one(&h.value, &x.value);

            let mut da = match direction.get(&self.b) {
                Some(d) => d.to_vec(),
                None => vec![0.0; hs],
            };
            if let Some(d) = d_w_in {
                matvec_acc_f32(d, &x.value, &mut da, hs, is);
            }
            matvec_acc_f32(&self.w_in.data, &x.tangent, &mut da, hs, is);
            if let Some(d) = d_w_rec {
                matvec_acc_f32(d, &h.value, &mut da, hs, hs);
            }
            matvec_acc_f32(&self.w_rec.data, &h.tangent, &mut da, hs, hs);
            let dh_next: Vec<f32> = h_next.iter().zip(&da).map(|(v, d)| (1.0 - v * v) * d).collect();

            let mut dz = match direction.get(&self.b_out) {
                Some(d) => d.to_vec(),
                None => vec![0.0; os],
            };
            if let Some(d) = d_w_out {
                matvec_acc_f32(d, &h_next, &mut dz, os, hs);
            }
            matvec_acc_f32(&self.w_out.data, &dh_next, &mut dz, os, hs);

            let probs: Vec<f32> = y.iter().map(|v| v.exp()).collect();
            let mean_dz = dot_f32(&probs, &dz);
            let dy: Vec<f32> = dz.iter().map(|d| d - mean_dz).collect();

            let h_next = DualVector::new(h_next, dh_next);
            outputs.push(DualVector::new(y, dy.clone()));
            next.push(h_next.clone());
            records.push(ForwardRecord { x, h, h_next, probs, dy });
        }
        Ok(CellStep {
            outputs,
            states: next,
            tape: TanhForwardTape { cell: self, direction, records },
        })
    }
}

impl<'a> CellTape<Forward> for TanhForwardTape<'a> {
    type StateGrad = DualVector;

    fn propagate_gradient(
        &self,
        upstream: Vec<DualVector>,
        state_grads: Option<Vec<DualVector>>,
        acc: &mut ForwardAccumulator,
    ) -> Result<Vec<DualVector>, StepError> {
        let cell = self.cell;
        let (hs, os) = (cell.hidden_size, cell.output_size);
        check_upstream(self.records.len(), upstream.len(), state_grads.as_ref().map(|s| s.len()))?;
        let d_w_rec = self.direction.get(&cell.w_rec);
        let d_w_out = self.direction.get(&cell.w_out);

        let mut bufs = GradBuffers::zeros(cell);
        let mut r_bufs = GradBuffers::zeros(cell);
        let mut down = Vec::with_capacity(self.records.len());
        let mut state_grads = state_grads.map(|s| s.into_iter());

        for (rec, u) in self.records.iter().zip(upstream) {
            if u.len() != os || u.tangent.len() != os {
                return Err(StepError::InvalidArgument("output gradient width".into()));
            }
            let h_next = &rec.h_next;

            // Log-softmax: gz = u - p Σu, with R(p) = p ⊙ dy.
            let su: f32 = u.value.iter().sum();
            let su_r: f32 = u.tangent.iter().sum();
            let mut gz = vec![0.0f32; os];
            let mut r_gz = vec![0.0f32; os];
            for i in 0..os {
                let p = rec.probs[i];
                gz[i] = u.value[i] - p * su;
                r_gz[i] = u.tangent[i] - p * rec.dy[i] * su - p * su_r;
            }
            outer_acc_f32(&gz, &h_next.value, &mut bufs.w_out);
            outer_acc_f32(&r_gz, &h_next.value, &mut r_bufs.w_out);
            outer_acc_f32(&gz, &h_next.tangent, &mut r_bufs.w_out);
            add_assign_f32(&mut bufs.b_out, &gz);
            add_assign_f32(&mut r_bufs.b_out, &r_gz);

            let mut gh_next = match state_grads.as_mut().and_then(|it| it.next()) {
                Some(s) if s.len() == hs && s.tangent.len() == hs => s,
                Some(_) => return Err(StepError::InvalidArgument("state gradient width".into())),
                None => DualVector::zeros(hs),
            };
            matvec_t_acc_f32(&cell.w_out.data, &gz, &mut gh_next.value, os, hs);
            matvec_t_acc_f32(&cell.w_out.data, &r_gz, &mut gh_next.tangent, os, hs);
            if let Some(d) = d_w_out {
                matvec_t_acc_f32(d, &gz, &mut gh_next.tangent, os, hs);
            }

            // tanh: g = 1 - h'^2, R(g) = -2 h' dh'
            let mut ga = vec![0.0f32; hs];
            let mut r_ga = vec![0.0f32; hs];
            for i in 0..hs {
                let v = h_next.value[i];
                let g = 1.0 - v * v;
                let r_g = -2.0 * v * h_next.tangent[i];
                ga[i] = g * gh_next.value[i];
                r_ga[i] = r_g * gh_next.value[i] + g * gh_next.tangent[i];
            }
            outer_acc_f32(&ga, &rec.x.value, &mut bufs.w_in);
            outer_acc_f32(&r_ga, &rec.x.value, &mut r_bufs.w_in);
            outer_acc_f32(&ga, &rec.x.tangent, &mut r_bufs.w_in);
            outer_acc_f32(&ga, &rec.h.value, &mut bufs.w_rec);
            outer_acc_f32(&r_ga, &rec.h.value, &mut r_bufs.w_rec);
            outer_acc_f32(&ga, &rec.h.tangent, &mut r_bufs.w_rec);
            add_assign_f32(&mut bufs.b, &ga);
            add_assign_f32(&mut r_bufs.b, &r_ga);

            let mut gh = DualVector::zeros(hs);
            matvec_t_acc_f32(&cell.w_rec.data, &ga, &mut gh.value, hs, hs);
            matvec_t_acc_f32(&cell.w_rec.data, &r_ga, &mut gh.tangent, hs, hs);
            if let Some(d) = d_w_rec {
                matvec_t_acc_f32(d, &ga, &mut gh.tangent, hs, hs);
            }
            down.push(gh);
        }
        bufs.flush(cell, &mut acc.grad);
        r_bufs.flush(cell, &mut acc.r_grad);
        Ok(down)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outputs_are_log_probabilities() {
        let cell = TanhCell::new(4, 3, 5, 11);
        let h = RecurrentCell::<Reverse>::start_states(&cell, &(), 2);
        let x = vec![vec![1.0, 0.0, 0.0, 0.0], vec![0.0, 0.0, 1.0, 0.0]];
        let step = RecurrentCell::<Reverse>::step(&cell, &(), h, x).unwrap();
        for y in &step.outputs {
            assert_eq!(y.len(), 5);
            let total: f32 = y.iter().map(|v| v.exp()).sum();
            assert!((total - 1.0).abs() < 1e-5);
        }
        assert!(step.states.iter().all(|h| h.len() == 3));
    }

    #[test]
    fn test_validate_catches_short_buffers() {
        let mut cell = TanhCell::new(4, 3, 5, 11);
        assert!(cell.validate().is_ok());
        assert_eq!(cell.num_params(), 12 + 9 + 3 + 15 + 5 + 3);
        cell.w_rec.data.pop();
        let err = cell.validate().unwrap_err();
        assert!(err.contains("w_rec"), "{err}");
    }

    #[test]
    fn test_rejects_wrong_input_width() {
        let cell = TanhCell::new(4, 3, 5, 11);
        let h = RecurrentCell::<Reverse>::start_states(&cell, &(), 1);
        let err = RecurrentCell::<Reverse>::step(&cell, &(), h, vec![vec![1.0; 3]]).unwrap_err();
        assert!(matches!(err, StepError::InvalidArgument(_)));
    }

    #[test]
    fn test_forward_mode_values_match_reverse() {
        let cell = TanhCell::new(4, 3, 5, 7);
        let direction = Direction::new();
        let x = vec![0.0, 1.0, 0.0, 0.0];
        let h = RecurrentCell::<Reverse>::start_states(&cell, &(), 1);
        let plain = RecurrentCell::<Reverse>::step(&cell, &(), h, vec![x.clone()]).unwrap();
        let h = RecurrentCell::<Forward>::start_states(&cell, &direction, 1);
        let dual =
            RecurrentCell::<Forward>::step(&cell, &direction, h, vec![DualVector::constant(x)]).unwrap();
        assert_eq!(plain.outputs[0], dual.outputs[0].value);
        // Zero direction and constant input: nothing moves.
        assert!(dual.outputs[0].tangent.iter().all(|&t| t.abs() < 1e-7));
    }
}
