//! Cross-channel window filters: automatic gain control, the spatial
//! Butterworth highpass used for destriping, and the frequency-wavenumber
//! velocity filter.
//!
//! All operations treat axis 0 as the channel (spatial) axis and axis 1 as
//! time. When a `collection` vector is supplied, each unique collection value
//! is filtered independently and the results are scattered back, so distinct
//! channel groups (separate shanks or probes) never contaminate each other.

use crate::error::{DestripeError, Result};
use crate::filters::{butter_sos, sosfiltfilt_cols};
use crate::fourier::{convolve_same, fft2_forward, fft2_inverse, fftfreq, hann, raised_cosine};
use crate::types::{BandMode, FkFilterSpec, SpatialFilterSpec};
use ndarray::{s, Array2, Axis};
use rustfft::num_complex::Complex;

/// Automatic gain control along the time axis of every channel.
///
/// The envelope is the square root of `x^2` convolved with a normalized Hann
/// window of `round(wl/si/2)*2 + 1` samples; `epsilon` scales a bias added to
/// the envelope before inversion so quiet stretches do not blow up. Returns
/// the normalized array together with the gain that was applied, so that
/// `normalized / gain == x` up to floating-point error. Samples whose
/// envelope is exactly zero keep unit gain.
pub fn agc(x: &Array2<f32>, wl: f64, si: f64, epsilon: f64) -> (Array2<f32>, Array2<f32>) {
    let (n_rows, n_t) = x.dim();
    let ns_win = ((wl / si / 2.0).round() as usize) * 2 + 1;
    let mut window = hann(ns_win);
    let sum: f64 = window.iter().sum();
    for w in window.iter_mut() {
        *w /= sum;
    }

    let mut gain = Array2::<f32>::zeros((n_rows, n_t));
    let mut flat_seen = false;
    let mut sq: Vec<f32> = Vec::with_capacity(n_t);
    for (i, row) in x.axis_iter(Axis(0)).enumerate() {
        sq.clear();
        sq.extend(row.iter().map(|&v| v * v));
        let env = convolve_same(&sq, &window);
        let mut env: Vec<f32> = env.iter().map(|&v| v.max(0.0).sqrt()).collect();
        let bias = env.iter().map(|&v| v as f64).sum::<f64>() * epsilon / n_t as f64;
        for e in env.iter_mut() {
            *e += bias as f32;
        }
        for (t, &e) in env.iter().enumerate() {
            if e > 0.0 {
                gain[[i, t]] = 1.0 / e;
            } else {
                gain[[i, t]] = 1.0;
                flat_seen = true;
            }
        }
    }
    if flat_seen {
        log::warn!("agc: zero envelope encountered, affected samples keep unit gain");
    }
    (x * &gain, gain)
}

/// Mirror `pad` rows onto each spatial edge of a block.
fn mirror_pad(x: &Array2<f32>, pad: usize) -> Array2<f32> {
    let (nx, nt) = x.dim();
    let mut padded = Array2::<f32>::zeros((nx + 2 * pad, nt));
    for i in 0..pad {
        padded.row_mut(i).assign(&x.row(pad - 1 - i));
    }
    padded.slice_mut(s![pad..pad + nx, ..]).assign(x);
    for i in 0..pad {
        padded.row_mut(pad + nx + i).assign(&x.row(nx - 1 - i));
    }
    padded
}

/// Raised-cosine apodization of `taper` rows at each spatial edge, in place.
fn taper_rows(x: &mut Array2<f32>, taper: usize) {
    let nxp = x.nrows();
    if taper == 0 || nxp == 0 {
        return;
    }
    let up = raised_cosine([0.0, taper as f64]);
    let down = raised_cosine([(nxp - taper) as f64, nxp as f64]);
    for (i, mut row) in x.axis_iter_mut(Axis(0)).enumerate() {
        let factor = (up(i as f64) * (1.0 - down(i as f64))) as f32;
        if factor != 1.0 {
            row.mapv_inplace(|v| v * factor);
        }
    }
}

fn unique_sorted(collection: &[u32]) -> Vec<u32> {
    let mut values: Vec<u32> = collection.to_vec();
    values.sort_unstable();
    values.dedup();
    values
}

fn check_collection(len: usize, collection: Option<&[u32]>) -> Result<()> {
    if let Some(c) = collection {
        if c.len() != len {
            return Err(DestripeError::DimensionMismatch(format!(
                "collection vector length {} does not match {} channels",
                c.len(),
                len
            )));
        }
    }
    Ok(())
}

/// Zero-phase Butterworth highpass along the channel axis with mirror
/// padding, optional edge apodization and optional time-domain AGC.
pub fn spatial_highpass(
    x: &Array2<f32>,
    spec: &SpatialFilterSpec,
    epsilon: f64,
    collection: Option<&[u32]>,
) -> Result<Array2<f32>> {
    let (nx, _nt) = x.dim();
    check_collection(nx, collection)?;
    if let Some(coll) = collection {
        let mut out = Array2::<f32>::zeros(x.raw_dim());
        for value in unique_sorted(coll) {
            let idx: Vec<usize> = coll
                .iter()
                .enumerate()
                .filter(|(_, &c)| c == value)
                .map(|(i, _)| i)
                .collect();
            let sub = x.select(Axis(0), &idx);
            let filtered = spatial_highpass(&sub, spec, epsilon, None)?;
            for (row_out, &i) in filtered.axis_iter(Axis(0)).zip(idx.iter()) {
                out.row_mut(i).assign(&row_out);
            }
        }
        return Ok(out);
    }

    if nx == 0 {
        return Ok(x.clone());
    }

    let (mut xf, gain) = if spec.agc_window_samples > 0 {
        let (xf, gain) = agc(x, spec.agc_window_samples as f64, 1.0, epsilon);
        (xf, Some(gain))
    } else {
        (x.clone(), None)
    };

    let pad = spec.pad_channels.min(nx - 1);
    if pad > 0 {
        xf = mirror_pad(&xf, pad);
    }
    let taper = spec.taper_channels.min(xf.nrows() / 2);
    taper_rows(&mut xf, taper);

    let sos = butter_sos(BandMode::Highpass, spec.order, spec.cutoff)?;
    sosfiltfilt_cols(&sos, &mut xf);

    let mut out = xf.slice(s![pad..pad + nx, ..]).to_owned();
    if let Some(gain) = gain {
        out.zip_mut_with(&gain, |v, &g| *v /= g);
    }
    Ok(out)
}

/// Frequency-wavenumber filter: attenuates plane waves by apparent velocity
/// `v = f/k` across the (channel, time) plane, with an optional composed
/// wavenumber-only mask.
pub fn fk_velocity_filter(
    x: &Array2<f32>,
    spec: &FkFilterSpec,
    si: f64,
    epsilon: f64,
    collection: Option<&[u32]>,
) -> Result<Array2<f32>> {
    let (nx, nt) = x.dim();
    check_collection(nx, collection)?;
    if let Some(coll) = collection {
        let mut out = Array2::<f32>::zeros(x.raw_dim());
        for value in unique_sorted(coll) {
            let idx: Vec<usize> = coll
                .iter()
                .enumerate()
                .filter(|(_, &c)| c == value)
                .map(|(i, _)| i)
                .collect();
            let sub = x.select(Axis(0), &idx);
            let filtered = fk_velocity_filter(&sub, spec, si, epsilon, None)?;
            for (row_out, &i) in filtered.axis_iter(Axis(0)).zip(idx.iter()) {
                out.row_mut(i).assign(&row_out);
            }
        }
        return Ok(out);
    }

    if nx == 0 || nt == 0 {
        return Ok(x.clone());
    }

    let (mut xf, gain) = if spec.agc_window_s > 0.0 {
        let (xf, gain) = agc(x, spec.agc_window_s, si, epsilon);
        (xf, Some(gain))
    } else {
        (x.clone(), None)
    };

    let pad = spec.pad_channels.min(nx - 1);
    if pad > 0 {
        xf = mirror_pad(&xf, pad);
    }
    let nxp = xf.nrows();
    let taper = spec.taper_channels.unwrap_or(pad).min(nxp / 2);
    taper_rows(&mut xf, taper);

    let fscale = fftfreq(nt, si);
    let mut kscale = fftfreq(nxp, spec.spatial_interval);
    // guard the zero-wavenumber bin against division by zero
    kscale[0] = 1e-6;

    let velocity_ramp = raised_cosine(spec.velocity_bounds);
    let k_mask: Option<Vec<f64>> = spec.kfilt.as_ref().map(|kf| {
        let ramp = raised_cosine(kf.bounds);
        kscale
            .iter()
            .map(|&k| match kf.mode {
                BandMode::Highpass => ramp(k.abs()),
                BandMode::Lowpass => 1.0 - ramp(k.abs()),
            })
            .collect()
    });

    let mut spectrum = Array2::<Complex<f32>>::zeros((nxp, nt));
    for ((r, c), v) in spectrum.indexed_iter_mut() {
        *v = Complex {
            re: xf[[r, c]],
            im: 0.0,
        };
    }
    fft2_forward(&mut spectrum);

    for ((r, c), v) in spectrum.indexed_iter_mut() {
        let velocity = (fscale[c] / kscale[r]).abs();
        let mut att = match spec.mode {
            BandMode::Highpass => velocity_ramp(velocity),
            BandMode::Lowpass => 1.0 - velocity_ramp(velocity),
        };
        if let Some(ref k_mask) = k_mask {
            att *= k_mask[r];
        }
        *v *= att as f32;
    }

    fft2_inverse(&mut spectrum);
    let mut out = Array2::<f32>::zeros((nx, nt));
    for ((r, c), v) in out.indexed_iter_mut() {
        *v = spectrum[[r + pad, c]].re;
    }
    if let Some(gain) = gain {
        out.zip_mut_with(&gain, |v, &g| *v /= g);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn test_block(nx: usize, nt: usize) -> Array2<f32> {
        let mut x = Array2::<f32>::zeros((nx, nt));
        for ((r, c), v) in x.indexed_iter_mut() {
            *v = ((r * 31 + c * 7) as f32 * 0.61).sin() + 0.1 * (c as f32 * 0.013).cos();
        }
        x
    }

    #[test]
    fn test_agc_is_invertible() {
        let x = test_block(4, 512);
        let (normalized, gain) = agc(&x, 50.0, 1.0, 1e-8);
        for ((r, c), &v) in x.indexed_iter() {
            let restored = normalized[[r, c]] / gain[[r, c]];
            assert_abs_diff_eq!(restored, v, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_agc_flattens_loud_sections() {
        let mut x = Array2::<f32>::zeros((1, 1024));
        for t in 0..1024 {
            let amp = if t < 512 { 1.0 } else { 10.0 };
            x[[0, t]] = amp * (t as f32 * 0.5).sin();
        }
        let (normalized, _) = agc(&x, 100.0, 1.0, 1e-8);
        let quiet: f32 = normalized.slice(s![0, 100..400]).mapv(|v| v.abs()).mean().unwrap();
        let loud: f32 = normalized.slice(s![0, 600..900]).mapv(|v| v.abs()).mean().unwrap();
        assert!((quiet / loud) > 0.5 && (quiet / loud) < 2.0);
    }

    #[test]
    fn test_agc_zero_signal_stays_finite() {
        let x = Array2::<f32>::zeros((2, 256));
        let (normalized, gain) = agc(&x, 50.0, 1.0, 1e-8);
        for &v in normalized.iter() {
            assert!(v.is_finite());
        }
        for &g in gain.iter() {
            assert!(g.is_finite());
        }
    }

    #[test]
    fn test_spatial_highpass_removes_common_stripe() {
        let nx = 16;
        let nt = 1024;
        let mut x = Array2::<f32>::zeros((nx, nt));
        for ((_, c), v) in x.indexed_iter_mut() {
            *v = (2.0 * std::f32::consts::PI * c as f32 / 32.0).sin();
        }
        let spec = SpatialFilterSpec {
            order: 3,
            cutoff: 0.01,
            pad_channels: 8,
            taper_channels: 0,
            agc_window_samples: 0,
        };
        let out = spatial_highpass(&x, &spec, 1e-8, None).unwrap();
        let in_rms = (x.mapv(|v| v * v).sum() / (nx * nt) as f32).sqrt();
        let out_rms = (out.mapv(|v| v * v).sum() / (nx * nt) as f32).sqrt();
        assert!(
            out_rms < in_rms / 20.0,
            "stripe not removed: in={} out={}",
            in_rms,
            out_rms
        );
    }

    #[test]
    fn test_spatial_highpass_group_isolation() {
        let x = test_block(8, 256);
        let collection: Vec<u32> = vec![0, 0, 0, 0, 1, 1, 1, 1];
        let spec = SpatialFilterSpec {
            order: 3,
            cutoff: 0.1,
            pad_channels: 2,
            taper_channels: 0,
            agc_window_samples: 32,
        };
        let joint = spatial_highpass(&x, &spec, 1e-8, Some(&collection)).unwrap();

        let top = x.slice(s![..4, ..]).to_owned();
        let bottom = x.slice(s![4.., ..]).to_owned();
        let top_alone = spatial_highpass(&top, &spec, 1e-8, None).unwrap();
        let bottom_alone = spatial_highpass(&bottom, &spec, 1e-8, None).unwrap();

        for r in 0..4 {
            for c in 0..256 {
                assert_abs_diff_eq!(joint[[r, c]], top_alone[[r, c]], epsilon = 1e-6);
                assert_abs_diff_eq!(joint[[r + 4, c]], bottom_alone[[r, c]], epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_spatial_highpass_pad_clamped_on_small_probe() {
        let x = test_block(3, 128);
        let spec = SpatialFilterSpec {
            pad_channels: 60,
            agc_window_samples: 0,
            ..Default::default()
        };
        let out = spatial_highpass(&x, &spec, 1e-8, None).unwrap();
        assert_eq!(out.dim(), (3, 128));
    }

    #[test]
    fn test_fk_passes_fast_attenuates_slow() {
        // a slow apparent-velocity wave (steep moveout across channels)
        // against a flat (infinite velocity) arrival
        let nx = 32;
        let nt = 256;
        let si = 0.002;
        let dx = 1.0;
        let mut slow = Array2::<f32>::zeros((nx, nt));
        let mut flat = Array2::<f32>::zeros((nx, nt));
        for ((r, c), v) in slow.indexed_iter_mut() {
            // moveout of 4 samples per trace: v = dx / (4 * si) = 125 m/s
            let t = c as f32 - 4.0 * r as f32;
            *v = (2.0 * std::f32::consts::PI * t / 32.0).sin();
        }
        for ((_, c), v) in flat.indexed_iter_mut() {
            *v = (2.0 * std::f32::consts::PI * c as f32 / 32.0).sin();
        }
        let spec = FkFilterSpec {
            velocity_bounds: [300.0, 500.0],
            mode: BandMode::Highpass,
            pad_channels: 8,
            taper_channels: None,
            agc_window_s: 0.0,
            spatial_interval: dx,
            kfilt: None,
        };
        let slow_out = fk_velocity_filter(&slow, &spec, si, 1e-8, None).unwrap();
        let flat_out = fk_velocity_filter(&flat, &spec, si, 1e-8, None).unwrap();

        let rms = |a: &Array2<f32>| (a.mapv(|v| v * v).sum() / (nx * nt) as f32).sqrt();
        let slow_ratio = rms(&slow_out) / rms(&slow);
        let flat_ratio = rms(&flat_out) / rms(&flat);
        assert!(slow_ratio < 0.3, "slow wave kept: {}", slow_ratio);
        assert!(flat_ratio > 0.7, "flat wave lost: {}", flat_ratio);
    }

    #[test]
    fn test_fk_group_isolation() {
        let x = test_block(8, 128);
        let collection: Vec<u32> = vec![0, 0, 0, 0, 1, 1, 1, 1];
        let spec = FkFilterSpec {
            velocity_bounds: [100.0, 200.0],
            mode: BandMode::Highpass,
            pad_channels: 2,
            taper_channels: None,
            agc_window_s: 0.01,
            spatial_interval: 1.0,
            kfilt: None,
        };
        let joint = fk_velocity_filter(&x, &spec, 0.001, 1e-8, Some(&collection)).unwrap();
        let top = x.slice(s![..4, ..]).to_owned();
        let top_alone = fk_velocity_filter(&top, &spec, 0.001, 1e-8, None).unwrap();
        for r in 0..4 {
            for c in 0..128 {
                assert_abs_diff_eq!(joint[[r, c]], top_alone[[r, c]], epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_collection_length_mismatch_rejected() {
        let x = test_block(8, 64);
        let collection: Vec<u32> = vec![0, 1];
        let spec = SpatialFilterSpec::default();
        assert!(spatial_highpass(&x, &spec, 1e-8, Some(&collection)).is_err());
    }
}
