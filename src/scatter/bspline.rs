//! Interpolation of coarsely sampled scatter estimates onto full sinogram
//! resolution.

use crate::error::BSplineError;
use crate::matrix::Matrix;

/// Uniform cubic b-spline basis function
fn cubic_basis(t: f64) -> f64 {
    let t = t.abs();
    if t < 1.0 {
        2.0 / 3.0 - t * t + t * t * t / 2.0
    } else if t < 2.0 {
        let u = 2.0 - t;
        u * u * u / 6.0
    } else {
        0.0
    }
}

/// Cubic b-spline interpolation matrix.
///
/// `samples` control values sit at elements `offset + k * interval`. The
/// returned `elements x samples` matrix maps those values to the interpolated
/// value at every element `0..elements`, passing exactly through the control
/// values.
///
/// With `pad > 0`, `pad` virtual control points are added beyond each end of
/// the sample range, linearly extrapolated from the two outermost samples.
/// This suppresses ringing at the edges and makes the interpolant reproduce
/// linear (in particular constant) signals everywhere within `pad` intervals
/// of the sampled range.
pub fn bspline(
    elements: usize,
    samples : usize,
    interval: usize,
    offset  : usize,
    pad     : usize,
) -> Result<Matrix<f64>, BSplineError> {
    let needed = if pad > 0 { 2 } else { 1 };
    if samples < needed { return Err(BSplineError::TooFewSamples { samples, needed }) }
    if interval == 0 || (samples - 1) * interval + 1 + offset > elements {
        return Err(BSplineError::Infeasible { elements, samples, interval, offset })
    }

    // Control-point coefficients c solve T c = v, with T tridiagonal
    let n = samples;
    let mut t: Matrix<f64> = Matrix::identity(n);
    t *= 2.0 / 3.0;
    let mut off: Matrix<f64> = Matrix::zeros(n, n);
    for i in 1..n {
        off[(i, i - 1)] = 1.0 / 6.0;
        off[(i - 1, i)] = 1.0 / 6.0;
    }
    t += &off;
    if pad > 0 {
        // Linear extrapolation of the first virtual point pins the outermost
        // coefficients to the outermost values
        for (row, col) in [(0, 1), (n - 1, n - 2)] {
            t[(row, row)] = 1.0;
            t[(row, col)] = 0.0;
        }
    }
    let t_inv = t.invert().ok_or(BSplineError::Singular(n))?;

    // Evaluation of the basis at every element, virtual points folded into
    // the outermost two columns
    let step = interval as f64;
    let mut eval: Matrix<f64> = Matrix::zeros(elements, n);
    let (first, last) = (-(pad as isize), (n + pad) as isize);
    for x in 0..elements {
        for k in first..last {
            let knot = offset as f64 + k as f64 * step;
            let b = cubic_basis((x as f64 - knot) / step);
            if b == 0.0 { continue }
            if k < 0 {
                let j = -k as f64;
                eval[(x, 0)] += (1.0 + j) * b;
                eval[(x, 1)] -=        j  * b;
            } else if k as usize >= n {
                let j = (k as usize - (n - 1)) as f64;
                eval[(x, n - 1)] += (1.0 + j) * b;
                eval[(x, n - 2)] -=        j  * b;
            } else {
                eval[(x, k as usize)] += b;
            }
        }
    }
    Ok(&eval * &t_inv)
}

/// Linear resampling of `data`, laid out as `old_positions.len()` samples of
/// `rows` values each, at `new_positions`. Both position lists must be
/// increasing; positions outside the old range take the nearest end sample.
pub fn interpol(new_positions: &[f32], old_positions: &[f32], rows: usize, data: &[f32]) -> Vec<f32> {
    let old_n = old_positions.len();
    assert!(old_n > 0, "interpol needs at least one source sample");
    assert_eq!(data.len(), old_n * rows, "interpol data does not match {old_n} samples of {rows}");
    let mut out = Vec::with_capacity(new_positions.len() * rows);
    let row = |i: usize| &data[i * rows .. (i + 1) * rows];
    let mut i = 0;
    for &p in new_positions {
        while i + 2 < old_n && p > old_positions[i + 1] { i += 1 }
        if old_n == 1 {
            out.extend_from_slice(row(0));
            continue
        }
        let (a, b) = (old_positions[i], old_positions[i + 1]);
        let t = if b > a { ((p - a) / (b - a)).clamp(0.0, 1.0) } else { 0.0 };
        out.extend(row(i).iter().zip(row(i + 1)).map(|(&x, &y)| x + t * (y - x)));
    }
    out
}
