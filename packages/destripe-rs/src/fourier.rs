//! Spectral helpers shared by the filters and the detector: FFT frequency
//! scales, window functions, FFT convolution, fractional sample shifting and
//! Welch power spectral density estimation.

use crate::error::{DestripeError, Result};
use ndarray::{Array2, Axis};
use rustfft::{num_complex::Complex, FftPlanner};
use std::cell::RefCell;
use std::f64::consts::PI;

// FFT planners are reused across calls within a worker thread.
thread_local! {
    static PLANNER_F32: RefCell<FftPlanner<f32>> = RefCell::new(FftPlanner::new());
    static PLANNER_F64: RefCell<FftPlanner<f64>> = RefCell::new(FftPlanner::new());
}

/// Discrete Fourier transform sample frequencies, in cycles per unit of `d`.
pub fn fftfreq(n: usize, d: f64) -> Vec<f64> {
    let mut freqs = Vec::with_capacity(n);
    let scale = 1.0 / (n as f64 * d);
    let half = (n + 1) / 2;
    for k in 0..half {
        freqs.push(k as f64 * scale);
    }
    for k in half..n {
        freqs.push((k as isize - n as isize) as f64 * scale);
    }
    freqs
}

/// Symmetric Hann window, zero at both ends.
pub fn hann(n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / (n - 1) as f64).cos())
        .collect()
}

/// Raised-cosine ramp: 0 below `bounds[0]`, 1 above `bounds[1]`.
pub fn raised_cosine(bounds: [f64; 2]) -> impl Fn(f64) -> f64 {
    move |x: f64| {
        if x <= bounds[0] {
            0.0
        } else if x >= bounds[1] {
            1.0
        } else {
            let t = (x - bounds[0]) / (bounds[1] - bounds[0]);
            0.5 * (1.0 - (PI * t).cos())
        }
    }
}

fn next_pow2(n: usize) -> usize {
    let mut p = 1;
    while p < n {
        p <<= 1;
    }
    p
}

/// FFT linear convolution truncated to the input length, centered on the
/// kernel midpoint (numpy `mode="same"` for an odd kernel).
pub fn convolve_same(x: &[f32], w: &[f64]) -> Vec<f32> {
    let n = x.len();
    let m = w.len();
    if n == 0 || m == 0 {
        return vec![0.0; n];
    }
    let n_fft = next_pow2(n + m - 1);

    let mut xb: Vec<Complex<f32>> = x
        .iter()
        .map(|&v| Complex { re: v, im: 0.0 })
        .chain(std::iter::repeat(Complex::default()))
        .take(n_fft)
        .collect();
    let mut wb: Vec<Complex<f32>> = w
        .iter()
        .map(|&v| Complex {
            re: v as f32,
            im: 0.0,
        })
        .chain(std::iter::repeat(Complex::default()))
        .take(n_fft)
        .collect();

    let (fwd, inv) = PLANNER_F32.with(|p| {
        let mut p = p.borrow_mut();
        (p.plan_fft_forward(n_fft), p.plan_fft_inverse(n_fft))
    });
    fwd.process(&mut xb);
    fwd.process(&mut wb);
    for (a, b) in xb.iter_mut().zip(wb.iter()) {
        *a *= *b;
    }
    inv.process(&mut xb);

    let norm = 1.0 / n_fft as f32;
    let start = (m - 1) / 2;
    (start..start + n).map(|i| xb[i].re * norm).collect()
}

/// Shift every row of `x` by a per-row fractional number of samples through a
/// pure phase rotation of its spectrum.
pub fn fshift(x: &mut Array2<f32>, shifts: &[f64]) -> Result<()> {
    let (n_rows, n) = x.dim();
    if shifts.len() != n_rows {
        return Err(DestripeError::DimensionMismatch(format!(
            "{} shifts supplied for {} rows",
            shifts.len(),
            n_rows
        )));
    }
    if n == 0 {
        return Ok(());
    }

    let (fwd, inv) = PLANNER_F32.with(|p| {
        let mut p = p.borrow_mut();
        (p.plan_fft_forward(n), p.plan_fft_inverse(n))
    });
    let freqs = fftfreq(n, 1.0);
    let norm = 1.0 / n as f32;
    let mut buf: Vec<Complex<f32>> = vec![Complex::default(); n];

    for (row, &shift) in x.axis_iter_mut(Axis(0)).zip(shifts.iter()) {
        if shift == 0.0 {
            continue;
        }
        let mut row = row;
        for (b, &v) in buf.iter_mut().zip(row.iter()) {
            *b = Complex { re: v, im: 0.0 };
        }
        fwd.process(&mut buf);
        for (b, &f) in buf.iter_mut().zip(freqs.iter()) {
            let phase = (-2.0 * PI * f * shift) as f32;
            *b *= Complex {
                re: phase.cos(),
                im: phase.sin(),
            };
        }
        inv.process(&mut buf);
        for (v, b) in row.iter_mut().zip(buf.iter()) {
            *v = b.re * norm;
        }
    }
    Ok(())
}

/// In-place 2-D forward FFT (rows first, then columns).
pub fn fft2_forward(x: &mut Array2<Complex<f32>>) {
    let (n_rows, n_cols) = x.dim();
    if n_rows == 0 || n_cols == 0 {
        return;
    }
    let (fft_rows, fft_cols) = PLANNER_F32.with(|p| {
        let mut p = p.borrow_mut();
        (p.plan_fft_forward(n_cols), p.plan_fft_forward(n_rows))
    });
    let mut scratch: Vec<Complex<f32>> = vec![Complex::default(); n_cols.max(n_rows)];
    for mut row in x.axis_iter_mut(Axis(0)) {
        for (s, &v) in scratch.iter_mut().zip(row.iter()) {
            *s = v;
        }
        fft_rows.process(&mut scratch[..n_cols]);
        for (v, &s) in row.iter_mut().zip(scratch.iter()) {
            *v = s;
        }
    }
    for mut col in x.axis_iter_mut(Axis(1)) {
        for (s, &v) in scratch.iter_mut().zip(col.iter()) {
            *s = v;
        }
        fft_cols.process(&mut scratch[..n_rows]);
        for (v, &s) in col.iter_mut().zip(scratch.iter()) {
            *v = s;
        }
    }
}

/// In-place 2-D inverse FFT, normalized so that `ifft2(fft2(x)) == x`.
pub fn fft2_inverse(x: &mut Array2<Complex<f32>>) {
    let (n_rows, n_cols) = x.dim();
    if n_rows == 0 || n_cols == 0 {
        return;
    }
    let (ifft_rows, ifft_cols) = PLANNER_F32.with(|p| {
        let mut p = p.borrow_mut();
        (p.plan_fft_inverse(n_cols), p.plan_fft_inverse(n_rows))
    });
    let mut scratch: Vec<Complex<f32>> = vec![Complex::default(); n_cols.max(n_rows)];
    for mut row in x.axis_iter_mut(Axis(0)) {
        for (s, &v) in scratch.iter_mut().zip(row.iter()) {
            *s = v;
        }
        ifft_rows.process(&mut scratch[..n_cols]);
        for (v, &s) in row.iter_mut().zip(scratch.iter()) {
            *v = s;
        }
    }
    let norm = 1.0 / (n_rows as f32 * n_cols as f32);
    for mut col in x.axis_iter_mut(Axis(1)) {
        for (s, &v) in scratch.iter_mut().zip(col.iter()) {
            *s = v;
        }
        ifft_cols.process(&mut scratch[..n_rows]);
        for (v, &s) in col.iter_mut().zip(scratch.iter()) {
            *v = s * norm;
        }
    }
}

/// Welch power spectral density: Hann window, 50% overlap, per-segment mean
/// removal, one-sided density scaling. Returns `(frequencies, psd)`.
pub fn welch(x: &[f64], fs: f64, nperseg: usize) -> (Vec<f64>, Vec<f64>) {
    if x.is_empty() || nperseg == 0 {
        return (vec![], vec![]);
    }
    let nperseg = if nperseg > x.len() {
        log::warn!(
            "welch segment ({}) longer than signal ({}), using the signal length",
            nperseg,
            x.len()
        );
        x.len()
    } else {
        nperseg
    };
    let step = (nperseg / 2).max(1);
    let window = hann(nperseg);
    let win_ssq: f64 = window.iter().map(|w| w * w).sum();
    let scale = 1.0 / (fs * win_ssq);

    let n_freq = nperseg / 2 + 1;
    let freqs: Vec<f64> = (0..n_freq).map(|k| k as f64 * fs / nperseg as f64).collect();

    let fft = PLANNER_F64.with(|p| p.borrow_mut().plan_fft_forward(nperseg));
    let mut psd = vec![0.0_f64; n_freq];
    let mut buf: Vec<Complex<f64>> = vec![Complex::default(); nperseg];
    let mut n_segments = 0usize;

    let mut start = 0usize;
    while start + nperseg <= x.len() {
        let seg = &x[start..start + nperseg];
        let mean = seg.iter().sum::<f64>() / nperseg as f64;
        for ((b, &v), w) in buf.iter_mut().zip(seg.iter()).zip(window.iter()) {
            *b = Complex {
                re: (v - mean) * w,
                im: 0.0,
            };
        }
        fft.process(&mut buf);
        for (k, p) in psd.iter_mut().enumerate() {
            *p += buf[k].norm_sqr() * scale;
        }
        n_segments += 1;
        start += step;
    }

    if n_segments == 0 {
        return (freqs, vec![0.0; n_freq]);
    }
    for (k, p) in psd.iter_mut().enumerate() {
        *p /= n_segments as f64;
        let is_nyquist = nperseg % 2 == 0 && k == n_freq - 1;
        if k != 0 && !is_nyquist {
            *p *= 2.0;
        }
    }
    (freqs, psd)
}
