//! Single-batch destriping transform: zero-phase temporal highpass,
//! fractional-sample ADC realignment, then spatial filtering across
//! channels. Stateless given a `FilterSpec` and a `ProbeGeometry`, so every
//! pipeline worker can run its own instance without coordination.

use crate::error::{DestripeError, Result};
use crate::filters::{butter_highpass, sosfiltfilt_rows, BiquadCoeffs};
use crate::fourier::fshift;
use crate::spatial::{fk_velocity_filter, spatial_highpass};
use crate::types::{
    ChannelLabel, FilterSpec, ProbeGeometry, NATIVE_SAMPLE_RATE, SHIFT_SCALE_RATIO,
};
use ndarray::{s, Array2, Axis};

pub struct Destriper<'a> {
    spec: &'a FilterSpec,
    geometry: &'a ProbeGeometry,
    sample_rate: f64,
    sos_temporal: Vec<BiquadCoeffs>,
    shifts: Vec<f64>,
}

impl<'a> Destriper<'a> {
    pub fn new(spec: &'a FilterSpec, geometry: &'a ProbeGeometry, sample_rate: f64) -> Result<Self> {
        spec.validate(sample_rate)?;
        let sos_temporal =
            butter_highpass(spec.temporal.order, spec.temporal.cutoff_hz, sample_rate)?;
        // Shifts are expressed at the native acquisition rate. Heavily
        // decimated recordings carry proportionally smaller sub-sample skews.
        let shifts: Vec<f64> = if NATIVE_SAMPLE_RATE / sample_rate >= SHIFT_SCALE_RATIO {
            geometry
                .sample_shift
                .iter()
                .map(|s| s * sample_rate / NATIVE_SAMPLE_RATE)
                .collect()
        } else {
            geometry.sample_shift.clone()
        };
        Ok(Self {
            spec,
            geometry,
            sample_rate,
            sos_temporal,
            shifts,
        })
    }

    /// Filter one analog block `[n_channels, n_samples]` in place.
    ///
    /// `labels`, when supplied, confine the spatial stage to channels labeled
    /// GOOD; masked channels still receive the temporal filter and the ADC
    /// shift but are passed around the spatial filter unchanged.
    pub fn process(&self, x: &mut Array2<f32>, labels: Option<&[ChannelLabel]>) -> Result<()> {
        let nc = x.nrows();
        self.geometry.validate(nc)?;

        sosfiltfilt_rows(&self.sos_temporal, x);
        fshift(x, &self.shifts)?;

        let collection = self.geometry.collection.as_deref();
        let good: Option<Vec<usize>> = match labels {
            None => None,
            Some(labels) => {
                if labels.len() != nc {
                    return Err(DestripeError::DimensionMismatch(format!(
                        "{} labels supplied for {} channels",
                        labels.len(),
                        nc
                    )));
                }
                let good: Vec<usize> = labels
                    .iter()
                    .enumerate()
                    .filter(|(_, &l)| l == ChannelLabel::Good)
                    .map(|(i, _)| i)
                    .collect();
                if good.len() == nc {
                    None
                } else {
                    Some(good)
                }
            }
        };

        match good {
            None => {
                let filtered = self.spatial_stage(x, collection)?;
                x.assign(&filtered);
            }
            Some(good) if good.is_empty() => {
                log::warn!("no GOOD channels left, skipping the spatial stage");
            }
            Some(good) => {
                let sub = x.select(Axis(0), &good);
                let sub_collection: Option<Vec<u32>> =
                    collection.map(|c| good.iter().map(|&i| c[i]).collect());
                let filtered = self.spatial_stage(&sub, sub_collection.as_deref())?;
                for (row, &i) in filtered.axis_iter(Axis(0)).zip(good.iter()) {
                    x.row_mut(i).assign(&row);
                }
            }
        }
        Ok(())
    }

    fn spatial_stage(
        &self,
        x: &Array2<f32>,
        collection: Option<&[u32]>,
    ) -> Result<Array2<f32>> {
        if let Some(ref fk) = self.spec.fk {
            fk_velocity_filter(
                x,
                fk,
                1.0 / self.sample_rate,
                self.spec.agc_epsilon,
                collection,
            )
        } else {
            spatial_highpass(x, &self.spec.spatial, self.spec.agc_epsilon, collection)
        }
    }
}

/// Destripe a block that still carries `n_sync` auxiliary rows at the bottom.
/// Sync rows bypass every stage and come back untouched.
pub fn destripe(
    x: &mut Array2<f32>,
    sample_rate: f64,
    geometry: &ProbeGeometry,
    spec: &FilterSpec,
    n_sync: usize,
    labels: Option<&[ChannelLabel]>,
) -> Result<()> {
    let nc = x.nrows();
    if n_sync > nc {
        return Err(DestripeError::DimensionMismatch(format!(
            "{} sync channels in a {} channel block",
            n_sync, nc
        )));
    }
    let ncv = nc - n_sync;
    let destriper = Destriper::new(spec, geometry, sample_rate)?;
    let mut analog = x.slice(s![..ncv, ..]).to_owned();
    destriper.process(&mut analog, labels)?;
    x.slice_mut(s![..ncv, ..]).assign(&analog);
    Ok(())
}
