/// Minimal vector utilities for the recurrent cells.
///
/// All operations are free functions on flat f32 slices with explicit dimensions.
/// Row-major layout throughout: a matrix W[rows, cols] stores W[i, j] at i * cols + j.

/// Matrix-vector product with accumulation: out[M] += W[M,N] @ x[N].
pub fn matvec_acc_f32(w: &[f32], x: &[f32], out: &mut [f32], m: usize, n: usize) {
    debug_assert_eq!(w.len(), m * n);
    debug_assert_eq!(x.len(), n);
    debug_assert_eq!(out.len(), m);

    for i in 0..m {
        let row = &w[i * n..(i + 1) * n];
        let mut sum = 0.0f32;
        for j in 0..n {
            sum += row[j] * x[j];
        }
        out[i] += sum;
    }
}

/// Transposed product with accumulation: out[N] += W[M,N]^T @ g[M].
pub fn matvec_t_acc_f32(w: &[f32], g: &[f32], out: &mut [f32], m: usize, n: usize) {
    debug_assert_eq!(w.len(), m * n);
    debug_assert_eq!(g.len(), m);
    debug_assert_eq!(out.len(), n);

    for i in 0..m {
        let gi = g[i];
        if gi == 0.0 {
            continue;
        }
        let row = &w[i * n..(i + 1) * n];
        for j in 0..n {
            out[j] += row[j] * gi;
        }
    }
}

/// Outer product with accumulation: out[M,N] += a[M] ⊗ b[N].
pub fn outer_acc_f32(a: &[f32], b: &[f32], out: &mut [f32]) {
    let n = b.len();
    debug_assert_eq!(out.len(), a.len() * n);
    for (i, &ai) in a.iter().enumerate() {
        if ai == 0.0 {
            continue;
        }
        let row = &mut out[i * n..(i + 1) * n];
        for j in 0..n {
            row[j] += ai * b[j];
        }
    }
}

/// Element-wise accumulate: out[i] += a[i].
pub fn add_assign_f32(out: &mut [f32], a: &[f32]) {
    debug_assert_eq!(out.len(), a.len());
    for (o, &x) in out.iter_mut().zip(a) {
        *o += x;
    }
}

/// Numerically stable log-softmax over a single row.
pub fn log_softmax_f32(logits: &[f32], out: &mut [f32]) {
    debug_assert_eq!(logits.len(), out.len());
    let max_val = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum_exp = 0.0f32;
    for &z in logits {
        sum_exp += (z - max_val).exp();
    }
    let log_norm = max_val + sum_exp.ln();
    for (o, &z) in out.iter_mut().zip(logits) {
        *o = z - log_norm;
    }
}

/// Index of the largest component; ties resolve to the lowest index.
/// NaN components never win. Returns None for an empty slice.
pub fn argmax_f32(a: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in a.iter().enumerate() {
        match best {
            Some((_, b)) if !(v > b) => {}
            _ if v.is_nan() => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Dot product of two equal-length slices.
pub fn dot_f32(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Simple xorshift64 PRNG for deterministic weight init. Not crypto-safe.
pub struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    pub fn new(seed: u64) -> Self {
        SimpleRng { state: seed.max(1) } // avoid zero state
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    /// Uniform in [-scale, scale].
    pub fn uniform(&mut self, scale: f32) -> f32 {
        let u = (self.next_u64() as f64) / (u64::MAX as f64);
        (2.0 * u as f32 - 1.0) * scale
    }

    /// Fill slice with uniform random values in [-scale, scale].
    pub fn fill_uniform(&mut self, buf: &mut [f32], scale: f32) {
        for v in buf.iter_mut() {
            *v = self.uniform(scale);
        }
    }
}
