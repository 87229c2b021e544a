/// Parameters, gradient accumulation and finite-difference verification.
///
/// Provides:
/// - `Param`: a flat learnable buffer with a process-unique id
/// - `ParamMap`: id → vector map used for gradients, R-gradients and
///   forward-mode directions
/// - `Parameterized`: enumeration of a model's parameters
/// - `finite_diff_param` / `relative_error`: central-difference checks

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Serialize, Deserialize};

/// Identity of a parameter buffer. Gradients are keyed by it, so two cells
/// holding the same id share one gradient entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(u64);

impl ParamId {
    pub fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ParamId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A learnable flat buffer. Cloning keeps the id (shared parameter);
/// deserializing assigns a fresh one.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Param {
    #[serde(skip, default = "ParamId::fresh")]
    id: ParamId,
    pub data: Vec<f32>,
}

impl Param {
    pub fn new(data: Vec<f32>) -> Self {
        Param { id: ParamId::fresh(), data }
    }

    pub fn zeros(n: usize) -> Self {
        Self::new(vec![0.0; n])
    }

    pub fn id(&self) -> ParamId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Sparse map from parameter id to a vector of the parameter's length.
#[derive(Clone, Debug, Default)]
pub struct ParamMap {
    entries: HashMap<ParamId, Vec<f32>>,
}

/// Parameter gradients (reverse mode) and R-gradients (forward mode).
pub type Gradient = ParamMap;

/// A direction in parameter space for forward-mode differentiation.
/// Parameters without an entry do not move.
pub type Direction = ParamMap;

impl ParamMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `delta` into the entry for `param`, creating a zero entry first.
    pub fn accumulate(&mut self, param: &Param, delta: &[f32]) {
        debug_assert_eq!(param.len(), delta.len());
        let entry = self
            .entries
            .entry(param.id())
            .or_insert_with(|| vec![0.0; param.len()]);
        for (e, &d) in entry.iter_mut().zip(delta) {
            *e += d;
        }
    }

    /// Replace the entry for `param`.
    pub fn set(&mut self, param: &Param, value: Vec<f32>) {
        debug_assert_eq!(param.len(), value.len());
        self.entries.insert(param.id(), value);
    }

    pub fn get(&self, param: &Param) -> Option<&[f32]> {
        self.entries.get(&param.id()).map(|v| v.as_slice())
    }

    /// Sum another map into this one (merging per-branch partial accumulators).
    pub fn merge(&mut self, other: ParamMap) {
        for (id, v) in other.entries {
            match self.entries.get_mut(&id) {
                Some(e) => {
                    for (a, b) in e.iter_mut().zip(&v) {
                        *a += b;
                    }
                }
                None => {
                    self.entries.insert(id, v);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Models that expose their learnable buffers.
pub trait Parameterized {
    fn params(&self) -> Vec<&Param>;
    fn params_mut(&mut self) -> Vec<&mut Param>;

    fn num_params(&self) -> usize {
        self.params().iter().map(|p| p.len()).sum()
    }

    /// Check every buffer against the model's declared sizes. Models built
    /// by their constructors always pass; deserialized ones may not.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Central finite difference of a scalar function with respect to one
/// element of one parameter: (f(x+eps) - f(x-eps)) / (2*eps).
///
/// `param_index` indexes into `model.params()`.
pub fn finite_diff_param<P, F>(
    model: &P,
    param_index: usize,
    elem: usize,
    eps: f32,
    f: F,
) -> f32
where
    P: Parameterized + Clone,
    F: Fn(&P) -> f32,
{
    let mut plus = model.clone();
    plus.params_mut()[param_index].data[elem] += eps;
    let mut minus = model.clone();
    minus.params_mut()[param_index].data[elem] -= eps;
    (f(&plus) - f(&minus)) / (2.0 * eps)
}

/// Central finite difference of a vector-valued function along `direction`:
/// (f(θ + eps·d) - f(θ - eps·d)) / (2*eps), element-wise.
pub fn finite_diff_direction<P, F>(model: &P, direction: &Direction, eps: f32, f: F) -> Vec<f32>
where
    P: Parameterized + Clone,
    F: Fn(&P) -> Vec<f32>,
{
    let shift = |sign: f32| {
        let mut m = model.clone();
        for p in m.params_mut() {
            if let Some(d) = direction.get(p) {
                for (x, dx) in p.data.iter_mut().zip(d) {
                    *x += sign * eps * dx;
                }
            }
        }
        m
    };
    let plus = f(&shift(1.0));
    let minus = f(&shift(-1.0));
    plus.iter().zip(&minus).map(|(a, b)| (a - b) / (2.0 * eps)).collect()
}

/// Relative error with denominator max(|a|, |b|, abs_threshold).
/// Values where both sides are below `abs_threshold` count as equal.
pub fn relative_error(analytical: f32, numerical: f32, abs_threshold: f32) -> f32 {
    let diff = (analytical - numerical).abs();
    if analytical.abs() < abs_threshold && numerical.abs() < abs_threshold {
        return 0.0;
    }
    diff / analytical.abs().max(numerical.abs()).max(abs_threshold)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_ids_unique() {
        let a = Param::zeros(2);
        let b = Param::zeros(2);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn test_accumulate_sums() {
        let p = Param::zeros(3);
        let mut g = Gradient::new();
        g.accumulate(&p, &[1.0, 2.0, 3.0]);
        g.accumulate(&p, &[1.0, 1.0, 1.0]);
        assert_eq!(g.get(&p), Some(&[2.0, 3.0, 4.0][..]));
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn test_merge_partial_accumulators() {
        let p = Param::zeros(2);
        let q = Param::zeros(1);
        let mut left = Gradient::new();
        left.accumulate(&p, &[1.0, 1.0]);
        let mut right = Gradient::new();
        right.accumulate(&p, &[0.5, -1.0]);
        right.accumulate(&q, &[2.0]);
        left.merge(right);
        assert_eq!(left.get(&p), Some(&[1.5, 0.0][..]));
        assert_eq!(left.get(&q), Some(&[2.0][..]));
    }

    #[test]
    fn test_deserialize_assigns_fresh_id() {
        let p = Param::new(vec![1.0, 2.0]);
        let json = serde_json::to_string(&p).unwrap();
        let q: Param = serde_json::from_str(&json).unwrap();
        assert_eq!(q.data, p.data);
        assert_ne!(q.id(), p.id());
    }

    #[test]
    fn test_relative_error() {
        assert_eq!(relative_error(1e-6, 2e-6, 1e-4), 0.0);
        assert!((relative_error(1.0, 1.1, 1e-4) - 0.1 / 1.1).abs() < 1e-6);
    }
}
