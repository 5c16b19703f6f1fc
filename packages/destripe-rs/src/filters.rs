//! Butterworth IIR design and zero-phase application.
//!
//! Filters are built as cascaded second-order sections (biquads) for
//! numerical stability, with a first-order tail section for odd orders.
//! Zero-phase filtering runs the cascade forward and backward over an
//! odd-reflection extension of the signal, seeding each section with its
//! steady-state initial conditions so no startup transient leaks in.

use crate::error::{DestripeError, Result};
use crate::types::BandMode;
use ndarray::{Array2, Axis};
use std::f64::consts::PI;

/// Second-order section coefficients.
/// Transfer function: H(z) = (b0 + b1*z^-1 + b2*z^-2) / (1 + a1*z^-1 + a2*z^-2)
#[derive(Debug, Clone, Copy)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl BiquadCoeffs {
    fn dc_gain(&self) -> f64 {
        (self.b0 + self.b1 + self.b2) / (1.0 + self.a1 + self.a2)
    }

    /// Steady-state Direct Form II Transposed state for a unit constant input.
    fn steady_state(&self) -> (f64, f64) {
        let k = self.dc_gain();
        (k - self.b0, self.b2 - self.a2 * k)
    }
}

/// Design a Butterworth filter of the given order as second-order sections.
///
/// `wn` is the cutoff as a fraction of the Nyquist frequency, in (0, 1).
pub fn butter_sos(mode: BandMode, order: usize, wn: f64) -> Result<Vec<BiquadCoeffs>> {
    if order == 0 {
        return Err(DestripeError::InvalidConfig(
            "filter order must be at least 1".into(),
        ));
    }
    if wn <= 0.0 || wn >= 1.0 {
        return Err(DestripeError::InvalidConfig(format!(
            "normalized cutoff ({}) must lie in (0, 1)",
            wn
        )));
    }
    // Prewarp for the bilinear transform.
    let warped = (PI * wn / 2.0).tan();

    let num_sections = (order + 1) / 2;
    let mut sections = Vec::with_capacity(num_sections);
    for k in 0..num_sections {
        if order % 2 == 1 && k == num_sections - 1 {
            sections.push(first_order_section(mode, warped));
        } else {
            // Conjugate pole pair of the analog prototype: s^2 + alpha*s + 1.
            let theta = PI * (2.0 * k as f64 + 1.0) / (2.0 * order as f64);
            let alpha = 2.0 * theta.sin();
            sections.push(second_order_section(mode, warped, alpha));
        }
    }
    Ok(sections)
}

/// Highpass design with the cutoff given in Hz.
pub fn butter_highpass(order: usize, cutoff_hz: f64, sample_rate: f64) -> Result<Vec<BiquadCoeffs>> {
    let nyquist = sample_rate / 2.0;
    if cutoff_hz >= nyquist {
        return Err(DestripeError::InvalidConfig(format!(
            "cutoff ({} Hz) must be less than Nyquist ({} Hz)",
            cutoff_hz, nyquist
        )));
    }
    butter_sos(BandMode::Highpass, order, cutoff_hz / nyquist)
}

/// Lowpass design with the cutoff given in Hz.
pub fn butter_lowpass(order: usize, cutoff_hz: f64, sample_rate: f64) -> Result<Vec<BiquadCoeffs>> {
    let nyquist = sample_rate / 2.0;
    if cutoff_hz >= nyquist {
        return Err(DestripeError::InvalidConfig(format!(
            "cutoff ({} Hz) must be less than Nyquist ({} Hz)",
            cutoff_hz, nyquist
        )));
    }
    butter_sos(BandMode::Lowpass, order, cutoff_hz / nyquist)
}

fn second_order_section(mode: BandMode, wn: f64, alpha: f64) -> BiquadCoeffs {
    let wn2 = wn * wn;
    let denom = 1.0 + alpha * wn + wn2;
    match mode {
        BandMode::Lowpass => BiquadCoeffs {
            b0: wn2 / denom,
            b1: 2.0 * wn2 / denom,
            b2: wn2 / denom,
            a1: 2.0 * (wn2 - 1.0) / denom,
            a2: (1.0 - alpha * wn + wn2) / denom,
        },
        BandMode::Highpass => BiquadCoeffs {
            b0: 1.0 / denom,
            b1: -2.0 / denom,
            b2: 1.0 / denom,
            a1: 2.0 * (wn2 - 1.0) / denom,
            a2: (1.0 - alpha * wn + wn2) / denom,
        },
    }
}

fn first_order_section(mode: BandMode, wn: f64) -> BiquadCoeffs {
    match mode {
        BandMode::Lowpass => {
            let k = wn / (1.0 + wn);
            BiquadCoeffs {
                b0: k,
                b1: k,
                b2: 0.0,
                a1: (wn - 1.0) / (wn + 1.0),
                a2: 0.0,
            }
        }
        BandMode::Highpass => {
            let k = 1.0 / (1.0 + wn);
            BiquadCoeffs {
                b0: k,
                b1: -k,
                b2: 0.0,
                a1: (wn - 1.0) / (wn + 1.0),
                a2: 0.0,
            }
        }
    }
}

/// Run the cascade once over `x` in place. `x0` seeds the steady-state
/// initial conditions so a constant input produces a constant output.
fn sos_forward(sos: &[BiquadCoeffs], x: &mut [f64], x0: f64) {
    let mut dc_in = x0;
    for c in sos {
        let (zi1, zi2) = c.steady_state();
        let mut z1 = zi1 * dc_in;
        let mut z2 = zi2 * dc_in;
        for v in x.iter_mut() {
            let y = c.b0 * *v + z1;
            z1 = c.b1 * *v - c.a1 * y + z2;
            z2 = c.b2 * *v - c.a2 * y;
            *v = y;
        }
        dc_in *= c.dc_gain();
    }
}

/// Zero-phase filtering: forward and backward passes over an odd-reflection
/// extension of the signal. Output length equals input length.
pub fn sosfiltfilt(sos: &[BiquadCoeffs], x: &[f64]) -> Vec<f64> {
    let n = x.len();
    if n == 0 || sos.is_empty() {
        return x.to_vec();
    }
    let padlen = (6 * sos.len() + 3).min(n - 1);

    let mut ext = Vec::with_capacity(n + 2 * padlen);
    for i in (1..=padlen).rev() {
        ext.push(2.0 * x[0] - x[i]);
    }
    ext.extend_from_slice(x);
    for i in 1..=padlen {
        ext.push(2.0 * x[n - 1] - x[n - 1 - i]);
    }

    let x0 = ext[0];
    sos_forward(sos, &mut ext, x0);
    ext.reverse();
    let x0 = ext[0];
    sos_forward(sos, &mut ext, x0);
    ext.reverse();

    ext[padlen..padlen + n].to_vec()
}

/// Zero-phase filter every row (time axis) of a block.
pub fn sosfiltfilt_rows(sos: &[BiquadCoeffs], x: &mut Array2<f32>) {
    let mut buf: Vec<f64> = Vec::new();
    for mut row in x.axis_iter_mut(Axis(0)) {
        buf.clear();
        buf.extend(row.iter().map(|&v| v as f64));
        let filtered = sosfiltfilt(sos, &buf);
        for (v, f) in row.iter_mut().zip(filtered.iter()) {
            *v = *f as f32;
        }
    }
}

/// Zero-phase filter every column (channel axis) of a block.
pub fn sosfiltfilt_cols(sos: &[BiquadCoeffs], x: &mut Array2<f32>) {
    let mut buf: Vec<f64> = Vec::new();
    for mut col in x.axis_iter_mut(Axis(1)) {
        buf.clear();
        buf.extend(col.iter().map(|&v| v as f64));
        let filtered = sosfiltfilt(sos, &buf);
        for (v, f) in col.iter_mut().zip(filtered.iter()) {
            *v = *f as f32;
        }
    }
}
