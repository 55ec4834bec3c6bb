use chrono::{DateTime, Utc};
use ndarray::{Array4, s};
use std::sync::Arc;
use thiserror::Error;

use crate::grid::GridSpec;
use crate::params::{Channel, ParameterRegistry};
use crate::period::PeriodIndex;
use crate::storage::{FieldError, FieldSource};

/// Errors raised while assembling one sample. Boundary conditions are
/// not errors; see [`AssembleOutcome::SkippedBoundary`].
#[derive(Error, Debug)]
pub enum AssemblyError {
    /// An expected raw field is absent. Fatal for the sample and
    /// propagated to the caller: a silent gap would corrupt statistics
    /// or the training signal.
    #[error("missing data: {param} level {level} at {stamp}")]
    MissingData {
        param: String,
        level: i64,
        stamp: DateTime<Utc>,
    },

    #[error("field {param} at {stamp} has shape {got:?}, native grid is {expected:?}")]
    ShapeMismatch {
        param: String,
        stamp: DateTime<Utc>,
        got: (usize, usize),
        expected: (usize, usize),
    },

    #[error("storage error: {0}")]
    Storage(FieldError),

    #[error("sample window out of range at position {0}")]
    OutOfRange(usize),
}

/// A fully assembled training sample. Tensor layout is
/// [step, channel, row, col]; channels follow registry insertion order,
/// then level order within each parameter.
#[derive(Debug, Clone)]
pub struct Sample {
    /// The timestamp the input window ends at.
    pub reference: DateTime<Utc>,
    pub inputs: Array4<f32>,
    pub targets: Array4<f32>,
}

/// Result of one assembly request.
#[derive(Debug)]
pub enum AssembleOutcome {
    Sample(Sample),
    /// The requested window runs off an end of the period. Expected at
    /// period boundaries; the sample is silently excluded.
    SkippedBoundary,
}

/// Gathers parameter/level fields across a timestamp window, crops them
/// to the resolved grid window and stacks them into tensors.
///
/// Holds only shared read-only state, so one assembler is safely used
/// from many worker threads at once.
pub struct Assembler {
    grid: Arc<GridSpec>,
    registry: Arc<ParameterRegistry>,
    index: Arc<PeriodIndex>,
    source: Arc<dyn FieldSource>,
    input_channels: Vec<Channel>,
    output_channels: Vec<Channel>,
}

impl Assembler {
    pub fn new(
        grid: Arc<GridSpec>,
        registry: Arc<ParameterRegistry>,
        index: Arc<PeriodIndex>,
        source: Arc<dyn FieldSource>,
    ) -> Self {
        let input_channels = registry.input_channels();
        let output_channels = registry.output_channels();
        Self {
            grid,
            registry,
            index,
            source,
            input_channels,
            output_channels,
        }
    }

    pub fn index(&self) -> &PeriodIndex {
        &self.index
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn registry(&self) -> &ParameterRegistry {
        &self.registry
    }

    /// Whether the input and prediction windows around `center` both fit
    /// inside the period.
    pub fn window_fits(&self, center: usize, num_input_steps: usize, num_pred_steps: usize) -> bool {
        center < self.index.len()
            && center + 1 >= num_input_steps
            && num_input_steps >= 1
            && self.index.len() - center > num_pred_steps
    }

    /// Assemble the sample centered at timestamp position `center`.
    ///
    /// Inputs are the `num_input_steps` timestamps ending at `center`;
    /// targets are the `num_pred_steps` timestamps immediately after.
    pub fn assemble(
        &self,
        center: usize,
        num_input_steps: usize,
        num_pred_steps: usize,
    ) -> Result<AssembleOutcome, AssemblyError> {
        if !self.window_fits(center, num_input_steps, num_pred_steps) {
            return Ok(AssembleOutcome::SkippedBoundary);
        }

        let input_stamps: Vec<DateTime<Utc>> = (center + 1 - num_input_steps..=center)
            .map(|i| self.index.get(i).ok_or(AssemblyError::OutOfRange(i)))
            .collect::<Result<_, _>>()?;
        let target_stamps: Vec<DateTime<Utc>> = (center + 1..=center + num_pred_steps)
            .map(|i| self.index.get(i).ok_or(AssemblyError::OutOfRange(i)))
            .collect::<Result<_, _>>()?;

        let inputs = self.stack(&input_stamps, &self.input_channels)?;
        let targets = self.stack(&target_stamps, &self.output_channels)?;

        Ok(AssembleOutcome::Sample(Sample {
            reference: input_stamps[num_input_steps - 1],
            inputs,
            targets,
        }))
    }

    fn stack(
        &self,
        stamps: &[DateTime<Utc>],
        channels: &[Channel],
    ) -> Result<Array4<f32>, AssemblyError> {
        let (rows, cols) = self.grid.cropped_shape();
        let mut out = Array4::zeros((stamps.len(), channels.len(), rows, cols));

        for (t, &stamp) in stamps.iter().enumerate() {
            for (c, channel) in channels.iter().enumerate() {
                let field = self
                    .source
                    .load_field(&channel.param, channel.level, stamp)
                    .map_err(|e| match e {
                        FieldError::Missing { param, level, stamp } => {
                            AssemblyError::MissingData { param, level, stamp }
                        }
                        other => AssemblyError::Storage(other),
                    })?;
                if field.dim() != self.grid.native_shape {
                    return Err(AssemblyError::ShapeMismatch {
                        param: channel.param.clone(),
                        stamp,
                        got: field.dim(),
                        expected: self.grid.native_shape,
                    });
                }
                let mut cropped = self.grid.crop(field.view());
                // Missing values come through as NaN in some archives.
                cropped.mapv_inplace(|v| if v.is_nan() { 0.0 } else { v });
                out.slice_mut(s![t, c, .., ..]).assign(&cropped);
            }
        }
        Ok(out)
    }
}
