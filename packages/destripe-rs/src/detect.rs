//! Automated bad-channel classification.
//!
//! Works on a representative raw sample block, once per recording. Channels
//! are compared against the across-channel median trace at zero lag, in the
//! raw band and after a 1 kHz highpass, and against their power density above
//! the high-frequency band edge. The resulting labels feed the spike sorter
//! and can mask channels in the spatial filter.

use crate::error::{DestripeError, Result};
use crate::filters::{butter_highpass, butter_sos, sosfiltfilt, BiquadCoeffs};
use crate::fourier::welch;
use crate::types::{BandMode, ChannelFeatures, ChannelLabel, DetectionThresholds};
use ndarray::{Array2, Axis};

const WELCH_SEGMENT: usize = 256;

/// Classify every channel of a raw sample block.
///
/// `raw` is `[n_channels, n_samples]` in volts. Returns one label per channel
/// plus the feature table the labels were derived from. Constant channels are
/// forced to NOISY so undefined correlations never reach the thresholds.
pub fn detect_bad_channels(
    raw: &Array2<f32>,
    sample_rate: f64,
    thresholds: &DetectionThresholds,
) -> Result<(Vec<ChannelLabel>, ChannelFeatures)> {
    thresholds.validate(sample_rate)?;
    let (nc, ns) = raw.dim();
    if nc == 0 || ns == 0 {
        return Err(DestripeError::DimensionMismatch(
            "detection requires a non-empty sample block".into(),
        ));
    }

    // DC-removed copy in double precision
    let mut x = raw.mapv(|v| v as f64);
    let mut degenerate = vec![false; nc];
    for (i, mut row) in x.axis_iter_mut(Axis(0)).enumerate() {
        let mean = row.sum() / ns as f64;
        row.mapv_inplace(|v| v - mean);
        let var = row.iter().map(|v| v * v).sum::<f64>() / ns as f64;
        if var <= f64::EPSILON {
            degenerate[i] = true;
        }
    }

    let xcor = channels_similarity(&x);
    let xcor_hf = detrend(&xcor, thresholds.detrend_window);

    let sos = butter_highpass(3, thresholds.highpass_hz, sample_rate)?;
    let mut hf = x.clone();
    let mut buf: Vec<f64> = Vec::with_capacity(ns);
    for mut row in hf.axis_iter_mut(Axis(0)) {
        buf.clear();
        buf.extend(row.iter());
        let filtered = sosfiltfilt(&sos, &buf);
        for (v, f) in row.iter_mut().zip(filtered.iter()) {
            *v = *f;
        }
    }
    let xcorf = channels_similarity(&hf);
    let xcorf_detrended = detrend(&xcorf, thresholds.detrend_window);
    let xcor_lf: Vec<f64> = xcorf
        .iter()
        .zip(xcorf_detrended.iter())
        .map(|(&full, &detrended)| full - detrended - 1.0)
        .collect();

    let mut psd_hf = vec![0.0_f64; nc];
    let mut band_empty = false;
    for (i, row) in x.axis_iter(Axis(0)).enumerate() {
        let micro: Vec<f64> = row.iter().map(|&v| v * 1e6).collect();
        let (freqs, psd) = welch(&micro, sample_rate, WELCH_SEGMENT);
        let band: Vec<f64> = freqs
            .iter()
            .zip(psd.iter())
            .filter(|(&f, _)| f > thresholds.psd_band_hz)
            .map(|(_, &p)| p)
            .collect();
        if band.is_empty() {
            band_empty = true;
        } else {
            psd_hf[i] = band.iter().sum::<f64>() / band.len() as f64;
        }
    }
    if band_empty {
        log::warn!(
            "no spectral bins above {} Hz at fs={} Hz, high-frequency power set to 0",
            thresholds.psd_band_hz,
            sample_rate
        );
    }

    let rms_raw: Vec<f64> = x
        .axis_iter(Axis(0))
        .map(|row| (row.iter().map(|v| v * v).sum::<f64>() / ns as f64).sqrt())
        .collect();

    let features = ChannelFeatures {
        ind: (0..nc).collect(),
        rms_raw,
        xcor_hf,
        xcor_lf,
        psd_hf,
    };

    let mut labels = label_channels(&features, thresholds);
    for (i, &flat) in degenerate.iter().enumerate() {
        if flat {
            log::warn!("channel {} has constant signal, forcing NOISY", i);
            labels[i] = ChannelLabel::Noisy;
        }
    }
    Ok((labels, features))
}

/// Apply the labeling rules to a feature table.
///
/// Rules are evaluated dead, noisy, outside-brain, each overriding the
/// previous. Outside-brain only applies to the contiguous sub-threshold run
/// ending at the last channel; channels are ordered by depth, so only a tail
/// run marks the anatomical boundary.
pub fn label_channels(features: &ChannelFeatures, thresholds: &DetectionThresholds) -> Vec<ChannelLabel> {
    let nc = features.xcor_hf.len();
    let mut labels = vec![ChannelLabel::Good; nc];

    for i in 0..nc {
        if features.xcor_hf[i] < thresholds.dead_similarity {
            labels[i] = ChannelLabel::Dead;
        }
    }
    for i in 0..nc {
        if features.psd_hf[i] > thresholds.psd_hf
            || features.xcor_hf[i] > thresholds.noisy_similarity
        {
            labels[i] = ChannelLabel::Noisy;
        }
    }

    if nc > 0 && features.xcor_lf[nc - 1] < thresholds.outside_similarity {
        let mut first = nc - 1;
        while first > 0 && features.xcor_lf[first - 1] < thresholds.outside_similarity {
            first -= 1;
        }
        for label in labels.iter_mut().take(nc).skip(first) {
            *label = ChannelLabel::OutsideBrain;
        }
    }
    labels
}

/// Zero-lag cross-correlation of each channel with the across-channel median
/// trace, normalized by the median trace's zero-lag autocorrelation.
fn channels_similarity(x: &Array2<f64>) -> Vec<f64> {
    let (nc, ns) = x.dim();
    let mut column = vec![0.0_f64; nc];
    let mut reference = vec![0.0_f64; ns];
    for t in 0..ns {
        for c in 0..nc {
            column[c] = x[[c, t]];
        }
        reference[t] = median(&mut column);
    }
    let mean = reference.iter().sum::<f64>() / ns as f64;
    for r in reference.iter_mut() {
        *r -= mean;
    }
    let apeak: f64 = reference.iter().map(|v| v * v).sum();
    if apeak <= f64::EPSILON {
        log::warn!("median trace has no variance, channel similarity undefined");
        return vec![0.0; nc];
    }

    x.axis_iter(Axis(0))
        .map(|row| {
            let row_mean = row.sum() / ns as f64;
            let dot: f64 = row
                .iter()
                .zip(reference.iter())
                .map(|(&v, &r)| (v - row_mean) * r)
                .sum();
            dot / apeak
        })
        .collect()
}

/// Remove the slow spatial trend of a per-channel feature with a median filter.
fn detrend(x: &[f64], nmed: usize) -> Vec<f64> {
    let n = x.len();
    if n == 0 {
        return vec![];
    }
    let ntap = (nmed + 1) / 2;
    let mut padded = Vec::with_capacity(n + 2 * ntap);
    padded.extend(std::iter::repeat(x[0]).take(ntap));
    padded.extend_from_slice(x);
    padded.extend(std::iter::repeat(x[n - 1]).take(ntap));
    let trend = medfilt(&padded, nmed);
    x.iter()
        .zip(trend[ntap..ntap + n].iter())
        .map(|(&v, &t)| v - t)
        .collect()
}

/// Sliding median of odd length `k`, zero-padded at the boundaries.
fn medfilt(x: &[f64], k: usize) -> Vec<f64> {
    let n = x.len();
    let half = k / 2;
    let mut window = Vec::with_capacity(k);
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        window.clear();
        for j in 0..k {
            let idx = i as isize + j as isize - half as isize;
            if idx < 0 || idx >= n as isize {
                window.push(0.0);
            } else {
                window.push(x[idx as usize]);
            }
        }
        out.push(median(&mut window));
    }
    out
}

fn median(values: &mut [f64]) -> f64 {
    let n = values.len();
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

/// Row-wise Pearson correlation of a block against a reference trace.
/// Rows without variance correlate to 0.
pub fn rcoeff(x: &Array2<f64>, y: &[f64]) -> Vec<f64> {
    let (_, ns) = x.dim();
    let y_mean = y.iter().sum::<f64>() / ns as f64;
    let yn: Vec<f64> = y.iter().map(|&v| v - y_mean).collect();
    let y_ssq: f64 = yn.iter().map(|v| v * v).sum();
    x.axis_iter(Axis(0))
        .map(|row| {
            let mean = row.sum() / ns as f64;
            let mut dot = 0.0;
            let mut ssq = 0.0;
            for (&v, &r) in row.iter().zip(yn.iter()) {
                let vn = v - mean;
                dot += vn * r;
                ssq += vn * vn;
            }
            let denom = (ssq * y_ssq).sqrt();
            if denom > 0.0 {
                dot / denom
            } else {
                0.0
            }
        })
        .collect()
}

/// Correlate each trace against the median of its `trx` neighbours on each
/// side (mirror-extended at the probe edges) and threshold the result into a
/// keep mask. An optional `(order, wn)` zero-phase Butterworth lowpass is
/// applied first.
pub fn reject_channels(
    x: &Array2<f32>,
    trx: usize,
    lowpass: Option<(usize, f64)>,
    threshold: f64,
) -> Result<(Vec<bool>, Vec<f64>)> {
    let (nc, ns) = x.dim();
    if nc < trx + 3 {
        return Err(DestripeError::InvalidConfig(format!(
            "{} channels is too few for {} neighbours each side",
            nc, trx
        )));
    }

    let mut padded = Array2::<f64>::zeros((nc + 2 * trx, ns));
    for i in 0..trx {
        let src = x.row(1 + i).mapv(|v| v as f64);
        padded.row_mut(i).assign(&src);
    }
    for i in 0..nc {
        let src = x.row(i).mapv(|v| v as f64);
        padded.row_mut(trx + i).assign(&src);
    }
    for i in 0..trx {
        let src = x.row(nc - 2 - trx + i).mapv(|v| v as f64);
        padded.row_mut(trx + nc + i).assign(&src);
    }

    if let Some((order, wn)) = lowpass {
        let sos: Vec<BiquadCoeffs> = butter_sos(BandMode::Lowpass, order, wn)?;
        let mut buf: Vec<f64> = Vec::with_capacity(ns);
        for mut row in padded.axis_iter_mut(Axis(0)) {
            buf.clear();
            buf.extend(row.iter());
            let filtered = sosfiltfilt(&sos, &buf);
            for (v, f) in row.iter_mut().zip(filtered.iter()) {
                *v = *f;
            }
        }
    }

    let width = 2 * trx + 1;
    let mut column = vec![0.0_f64; width];
    let mut r = Vec::with_capacity(nc);
    for ix in 0..nc {
        let mut reference = vec![0.0_f64; ns];
        for t in 0..ns {
            for (w, value) in column.iter_mut().enumerate() {
                *value = padded[[ix + w, t]];
            }
            reference[t] = median(&mut column);
        }
        let row = padded.row(ix + trx).to_owned().insert_axis(Axis(0));
        r.push(rcoeff(&row, &reference)[0]);
    }
    let keep: Vec<bool> = r.iter().map(|&v| v >= threshold).collect();
    Ok((keep, r))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f32::consts::PI;

    fn features_from_xcor_lf(xcor_lf: Vec<f64>) -> ChannelFeatures {
        let nc = xcor_lf.len();
        ChannelFeatures {
            ind: (0..nc).collect(),
            rms_raw: vec![1.0; nc],
            xcor_hf: vec![0.0; nc],
            xcor_lf,
            psd_hf: vec![0.0; nc],
        }
    }

    #[test]
    fn test_outside_brain_requires_tail_run() {
        let mut xcor_lf = vec![0.0_f64; 13];
        xcor_lf[3] = -0.9;
        xcor_lf[10] = -0.9;
        xcor_lf[11] = -0.8;
        xcor_lf[12] = -0.95;
        let features = features_from_xcor_lf(xcor_lf);
        let labels = label_channels(&features, &DetectionThresholds::default());
        assert_eq!(labels[3], ChannelLabel::Good);
        assert_eq!(labels[10], ChannelLabel::OutsideBrain);
        assert_eq!(labels[11], ChannelLabel::OutsideBrain);
        assert_eq!(labels[12], ChannelLabel::OutsideBrain);
        for (i, label) in labels.iter().enumerate() {
            if !(10..=12).contains(&i) {
                assert_eq!(*label, ChannelLabel::Good, "channel {}", i);
            }
        }
    }

    #[test]
    fn test_no_outside_brain_without_tail_contact() {
        let mut xcor_lf = vec![0.0_f64; 13];
        xcor_lf[9] = -0.9;
        xcor_lf[10] = -0.9;
        let features = features_from_xcor_lf(xcor_lf);
        let labels = label_channels(&features, &DetectionThresholds::default());
        assert!(labels.iter().all(|&l| l == ChannelLabel::Good));
    }

    #[test]
    fn test_label_precedence() {
        let mut features = features_from_xcor_lf(vec![0.0; 4]);
        features.xcor_hf = vec![-0.9, 0.0, 1.5, -0.9];
        features.psd_hf = vec![0.0, 0.05, 0.0, 0.05];
        let labels = label_channels(&features, &DetectionThresholds::default());
        assert_eq!(labels[0], ChannelLabel::Dead);
        assert_eq!(labels[1], ChannelLabel::Noisy);
        assert_eq!(labels[2], ChannelLabel::Noisy);
        // noisy overrides dead
        assert_eq!(labels[3], ChannelLabel::Noisy);
    }

    #[test]
    fn test_detrend_removes_ramp() {
        let x: Vec<f64> = (0..40).map(|i| i as f64 * 0.5).collect();
        let residual = detrend(&x, 11);
        for v in residual.iter().skip(6).take(28) {
            assert_abs_diff_eq!(*v, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_median_even_odd() {
        assert_abs_diff_eq!(median(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_abs_diff_eq!(median(&mut [4.0, 1.0, 2.0, 3.0]), 2.5);
    }

    fn synthetic_recording(nc: usize, ns: usize, fs: f64) -> Array2<f32> {
        let mut x = Array2::<f32>::zeros((nc, ns));
        for ((c, t), v) in x.indexed_iter_mut() {
            let common = (2.0 * PI * 2000.0 * t as f32 / fs as f32).sin() * 1e-4;
            let jitter = ((c * 7919 + t * 104729) % 1000) as f32 / 1000.0 - 0.5;
            *v = common + jitter * 2e-6;
        }
        x
    }

    #[test]
    fn test_dead_channel_detected() {
        let fs = 30_000.0;
        let mut x = synthetic_recording(12, 6000, fs);
        // channel 5 loses the common signal, keeps a whisper of noise
        for t in 0..6000 {
            x[[5, t]] = ((t * 31) % 97) as f32 * 1e-9;
        }
        let (labels, features) =
            detect_bad_channels(&x, fs, &DetectionThresholds::default()).unwrap();
        assert_eq!(labels[5], ChannelLabel::Dead);
        assert_eq!(labels[0], ChannelLabel::Good);
        assert!(features.xcor_hf.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_noisy_channel_detected_by_hf_power() {
        let fs = 30_000.0;
        let mut x = synthetic_recording(12, 6000, fs);
        for t in 0..6000 {
            x[[7, t]] += (2.0 * PI * 13_000.0 * t as f32 / fs as f32).sin() * 2e-5;
        }
        let (labels, features) =
            detect_bad_channels(&x, fs, &DetectionThresholds::default()).unwrap();
        assert_eq!(labels[7], ChannelLabel::Noisy);
        assert!(features.psd_hf[7] > features.psd_hf[0] * 10.0);
    }

    #[test]
    fn test_degenerate_channel_forced_noisy() {
        let fs = 30_000.0;
        let mut x = synthetic_recording(8, 4000, fs);
        for t in 0..4000 {
            x[[2, t]] = 0.42;
        }
        let (labels, features) =
            detect_bad_channels(&x, fs, &DetectionThresholds::default()).unwrap();
        assert_eq!(labels[2], ChannelLabel::Noisy);
        for v in features
            .xcor_hf
            .iter()
            .chain(features.xcor_lf.iter())
            .chain(features.psd_hf.iter())
        {
            assert!(v.is_finite());
        }
    }

    #[test]
    fn test_rcoeff_perfect_and_inverted() {
        let mut x = Array2::<f64>::zeros((2, 100));
        let y: Vec<f64> = (0..100).map(|t| (t as f64 * 0.3).sin()).collect();
        for t in 0..100 {
            x[[0, t]] = y[t] * 2.0 + 1.0;
            x[[1, t]] = -y[t];
        }
        let r = rcoeff(&x, &y);
        assert_abs_diff_eq!(r[0], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(r[1], -1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_reject_channels_keeps_coherent_traces() {
        let fs = 1000.0;
        let mut x = Array2::<f32>::zeros((8, 2000));
        for ((c, t), v) in x.indexed_iter_mut() {
            *v = (2.0 * PI * 10.0 * t as f32 / fs).sin()
                + ((c * 13 + t * 7) % 100) as f32 * 1e-4;
        }
        let (keep, r) = reject_channels(&x, 1, None, 0.6).unwrap();
        assert!(keep.iter().all(|&k| k));
        assert!(r.iter().all(|&v| v > 0.9));
    }

    #[test]
    fn test_reject_channels_too_few_traces() {
        let x = Array2::<f32>::zeros((3, 100));
        assert!(reject_channels(&x, 1, None, 0.5).is_err());
    }
}
