use ndarray::{Array4, s};
use rayon::prelude::*;
use std::sync::Arc;
use tracing::info;

use crate::assembler::{AssembleOutcome, Assembler, AssemblyError, Sample};

/// Streaming per-channel accumulator: count, sum, sum of squares plus
/// running min/max.
#[derive(Debug, Clone, Copy)]
struct Accum {
    count: f64,
    sum: f64,
    sum_sq: f64,
    min: f32,
    max: f32,
}

impl Accum {
    fn empty() -> Self {
        Self {
            count: 0.0,
            sum: 0.0,
            sum_sq: 0.0,
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
        }
    }

    fn push(&mut self, v: f32) {
        self.count += 1.0;
        self.sum += v as f64;
        self.sum_sq += (v as f64) * (v as f64);
        self.min = self.min.min(v);
        self.max = self.max.max(v);
    }

    fn merge(mut self, other: Accum) -> Accum {
        self.count += other.count;
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self
    }

    fn finish(self) -> ChannelStats {
        let mean = (self.sum / self.count) as f32;
        let variance = (self.sum_sq / self.count - (self.sum / self.count).powi(2)).max(0.0);
        let std = variance.sqrt() as f32;
        // A constant channel would otherwise divide by zero and break
        // invertibility.
        let scale = if std.is_finite() && std > 1e-12 { std } else { 1.0 };
        ChannelStats {
            mean,
            scale,
            min: self.min,
            max: self.max,
        }
    }
}

/// Fitted statistics of one (parameter, level) channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelStats {
    pub mean: f32,
    pub scale: f32,
    pub min: f32,
    pub max: f32,
}

/// Per-channel mean/scale for the input and target channel layouts.
/// Fitted once from the designated period, then shared read-only.
#[derive(Debug, Clone)]
pub struct StandardizationStats {
    pub inputs: Vec<ChannelStats>,
    pub outputs: Vec<ChannelStats>,
}

impl StandardizationStats {
    /// Two-sided streaming fit over raw (unstandardized) samples at the
    /// given center positions, assembled in parallel.
    pub fn fit(
        assembler: &Assembler,
        positions: &[usize],
        num_input_steps: usize,
        num_pred_steps: usize,
    ) -> Result<Self, AssemblyError> {
        let n_in = assembler.registry().input_channels().len();
        let n_out = assembler.registry().output_channels().len();

        let (inputs, outputs) = positions
            .par_iter()
            .map(|&center| -> Result<(Vec<Accum>, Vec<Accum>), AssemblyError> {
                match assembler.assemble(center, num_input_steps, num_pred_steps)? {
                    AssembleOutcome::Sample(sample) => Ok((
                        accumulate(&sample.inputs, n_in),
                        accumulate(&sample.targets, n_out),
                    )),
                    AssembleOutcome::SkippedBoundary => Err(AssemblyError::OutOfRange(center)),
                }
            })
            .try_reduce(
                || (vec![Accum::empty(); n_in], vec![Accum::empty(); n_out]),
                |a, b| Ok((merge_all(a.0, b.0), merge_all(a.1, b.1))),
            )?;

        info!(
            samples = positions.len(),
            input_channels = n_in,
            output_channels = n_out,
            "fitted standardization statistics"
        );
        Ok(Self {
            inputs: inputs.into_iter().map(Accum::finish).collect(),
            outputs: outputs.into_iter().map(Accum::finish).collect(),
        })
    }
}

fn accumulate(tensor: &Array4<f32>, n_channels: usize) -> Vec<Accum> {
    let mut accums = vec![Accum::empty(); n_channels];
    for (c, accum) in accums.iter_mut().enumerate() {
        for &v in tensor.slice(s![.., c, .., ..]).iter() {
            accum.push(v);
        }
    }
    accums
}

fn merge_all(a: Vec<Accum>, b: Vec<Accum>) -> Vec<Accum> {
    a.into_iter().zip(b).map(|(x, y)| x.merge(y)).collect()
}

/// Applies `(x - mean) / scale` per channel, or the identity when
/// standardization is disabled.
#[derive(Clone)]
pub struct Standardizer {
    stats: Option<Arc<StandardizationStats>>,
}

impl Standardizer {
    pub fn identity() -> Self {
        Self { stats: None }
    }

    pub fn new(stats: Arc<StandardizationStats>) -> Self {
        Self { stats: Some(stats) }
    }

    pub fn is_identity(&self) -> bool {
        self.stats.is_none()
    }

    pub fn stats(&self) -> Option<&StandardizationStats> {
        self.stats.as_deref()
    }

    /// Standardize both tensors of a sample in place.
    pub fn apply(&self, mut sample: Sample) -> Sample {
        if let Some(stats) = &self.stats {
            forward(&mut sample.inputs, &stats.inputs);
            forward(&mut sample.targets, &stats.outputs);
        }
        sample
    }

    /// Exact algebraic inverse of [`Standardizer::apply`] for an input
    /// tensor, used to recover physical units from predictions.
    pub fn invert_inputs(&self, tensor: &mut Array4<f32>) {
        if let Some(stats) = &self.stats {
            backward(tensor, &stats.inputs);
        }
    }

    /// Exact algebraic inverse of [`Standardizer::apply`] for a target
    /// tensor.
    pub fn invert_outputs(&self, tensor: &mut Array4<f32>) {
        if let Some(stats) = &self.stats {
            backward(tensor, &stats.outputs);
        }
    }
}

fn forward(tensor: &mut Array4<f32>, stats: &[ChannelStats]) {
    for (c, st) in stats.iter().enumerate() {
        tensor
            .slice_mut(s![.., c, .., ..])
            .mapv_inplace(|v| (v - st.mean) / st.scale);
    }
}

fn backward(tensor: &mut Array4<f32>, stats: &[ChannelStats]) {
    for (c, st) in stats.iter().enumerate() {
        tensor
            .slice_mut(s![.., c, .., ..])
            .mapv_inplace(|v| v * st.scale + st.mean);
    }
}
