//! Separable B-spline resampling of 3D volumes
//!
//! Spline interpolation over a tensor-product grid factors into independent
//! 1D passes, so a volume is resampled one axis at a time. Orders 2..=5 run a
//! recursive prefilter first so the spline interpolates the samples; order 0
//! is nearest neighbour and order 1 is linear. Input coordinates are
//! `out_index * (in_len - 1) / (out_len - 1)`, which maps the first and last
//! samples onto each other, and borders are mirrored.

use ndarray::{Array3, ArrayView1, ArrayView3, ArrayViewMut1, Axis, Zip};

/// Highest supported spline order
pub const MAX_ORDER: usize = 5;

/// Poles of the interpolating B-spline prefilter of a given order
fn prefilter_poles(order: usize) -> Vec<f64> {
    match order {
        2 => vec![8f64.sqrt() - 3.0],
        3 => vec![3f64.sqrt() - 2.0],
        4 => vec![
            (664.0 - 438976f64.sqrt()).sqrt() + 304f64.sqrt() - 19.0,
            (664.0 + 438976f64.sqrt()).sqrt() - 304f64.sqrt() - 19.0,
        ],
        5 => vec![
            (67.5 - 4436.25f64.sqrt()).sqrt() + 26.25f64.sqrt() - 6.5,
            (67.5 + 4436.25f64.sqrt()).sqrt() - 26.25f64.sqrt() - 6.5,
        ],
        _ => Vec::new(),
    }
}

/// First causal coefficient under mirror boundary conditions
fn causal_init(c: &[f64], z: f64) -> f64 {
    let n = c.len();
    let horizon = (1e-12f64.ln() / z.abs().ln()).ceil() as usize;
    if horizon < n {
        let mut zn = z;
        let mut sum = c[0];
        for value in c.iter().take(horizon).skip(1) {
            sum += zn * value;
            zn *= z;
        }
        return sum;
    }

    let iz = 1.0 / z;
    let mut zn = z;
    let mut z2n = z.powi(n as i32 - 1);
    let mut sum = c[0] + z2n * c[n - 1];
    z2n *= z2n * iz;
    for value in c.iter().take(n - 1).skip(1) {
        sum += (zn + z2n) * value;
        zn *= z;
        z2n *= iz;
    }
    sum / (1.0 - zn * zn)
}

/// Last anti-causal coefficient under mirror boundary conditions
fn anticausal_init(c: &[f64], z: f64) -> f64 {
    let n = c.len();
    (z / (z * z - 1.0)) * (z * c[n - 2] + c[n - 1])
}

/// Turn samples into B-spline coefficients in place
fn prefilter(c: &mut [f64], poles: &[f64]) {
    let n = c.len();
    if n < 2 || poles.is_empty() {
        return;
    }
    let gain: f64 = poles.iter().map(|z| (1.0 - z) * (1.0 - 1.0 / z)).product();
    c.iter_mut().for_each(|v| *v *= gain);

    for &z in poles {
        c[0] = causal_init(c, z);
        for k in 1..n {
            c[k] += z * c[k - 1];
        }
        c[n - 1] = anticausal_init(c, z);
        for k in (0..n - 1).rev() {
            c[k] = z * (c[k + 1] - c[k]);
        }
    }
}

/// Centered B-spline basis of degree `order` evaluated at `x`
fn bspline(order: usize, x: f64) -> f64 {
    let half = (order + 1) as f64 / 2.0;
    let mut sum = 0.0;
    let mut binom = 1.0;
    let mut factorial = 1.0;
    for k in 1..=order {
        factorial *= k as f64;
    }
    for k in 0..=order + 1 {
        let t = x + half - k as f64;
        if t > 0.0 {
            let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
            sum += sign * binom * t.powi(order as i32);
        }
        binom = binom * (order + 1 - k) as f64 / (k + 1) as f64;
    }
    sum / factorial
}

/// Mirror an index onto `0..len` without repeating the border sample
fn mirror(index: i64, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len as i64 - 1);
    let k = index.rem_euclid(period);
    if k >= len as i64 {
        (period - k) as usize
    } else {
        k as usize
    }
}

/// Precomputed taps of one output sample
struct Taps {
    indices: Vec<usize>,
    weights: Vec<f64>,
}

/// Sampling plan shared by every lane along one axis
struct AxisPlan {
    taps: Vec<Taps>,
    poles: Vec<f64>,
}

impl AxisPlan {
    fn new(in_len: usize, out_len: usize, order: usize) -> Self {
        let scale = if out_len > 1 {
            (in_len as f64 - 1.0) / (out_len as f64 - 1.0)
        } else {
            0.0
        };

        let taps = (0..out_len)
            .map(|j| {
                let x = j as f64 * scale;
                if order == 0 {
                    let nearest = (x.round() as usize).min(in_len - 1);
                    return Taps {
                        indices: vec![nearest],
                        weights: vec![1.0],
                    };
                }
                let start = if order % 2 == 1 {
                    x.floor() as i64 - (order / 2) as i64
                } else {
                    (x + 0.5).floor() as i64 - (order / 2) as i64
                };
                let mut indices = Vec::with_capacity(order + 1);
                let mut weights = Vec::with_capacity(order + 1);
                for i in start..=start + order as i64 {
                    indices.push(mirror(i, in_len));
                    weights.push(bspline(order, x - i as f64));
                }
                Taps { indices, weights }
            })
            .collect();

        Self {
            taps,
            poles: prefilter_poles(order),
        }
    }

    fn apply(&self, src: ArrayView1<'_, f32>, mut dst: ArrayViewMut1<'_, f32>, scratch: &mut Vec<f64>) {
        scratch.clear();
        scratch.extend(src.iter().map(|&v| v as f64));
        prefilter(scratch, &self.poles);

        for (out, taps) in dst.iter_mut().zip(&self.taps) {
            let value: f64 = taps
                .indices
                .iter()
                .zip(&taps.weights)
                .map(|(&i, &w)| scratch[i] * w)
                .sum();
            *out = value as f32;
        }
    }
}

/// Resample one axis of `volume` to `new_len` samples
pub fn resample_axis(
    volume: ArrayView3<'_, f32>,
    axis: usize,
    new_len: usize,
    order: usize,
) -> Array3<f32> {
    let mut shape = volume.raw_dim();
    let in_len = shape[axis];
    shape[axis] = new_len;
    let mut output = Array3::<f32>::zeros(shape);
    if in_len == 0 || new_len == 0 {
        return output;
    }

    let plan = AxisPlan::new(in_len, new_len, order.min(MAX_ORDER));
    let mut scratch = Vec::with_capacity(in_len);
    Zip::from(volume.lanes(Axis(axis)))
        .and(output.lanes_mut(Axis(axis)))
        .for_each(|src, dst| plan.apply(src, dst, &mut scratch));
    output
}

/// Resample a whole volume to `shape` with a spline of the given order.
///
/// Axes whose length already matches are passed through untouched, which
/// is exact because an interpolating spline reproduces its samples.
pub fn resize_volume(volume: ArrayView3<'_, f32>, shape: [usize; 3], order: usize) -> Array3<f32> {
    let mut current = volume.to_owned();
    for (axis, &len) in shape.iter().enumerate() {
        if current.len_of(Axis(axis)) != len {
            current = resample_axis(current.view(), axis, len, order);
        }
    }
    current
}
