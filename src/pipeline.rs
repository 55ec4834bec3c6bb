use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::assembler::{Assembler, AssemblyError};
use crate::config::{ConfigError, RunConfig};
use crate::grid::GridSpec;
use crate::params::ParameterRegistry;
use crate::period::{PeriodIndex, PeriodName, PeriodSpec, parse_stamp};
use crate::sequencer::{BatchSequencer, SequencerSettings};
use crate::standardize::{StandardizationStats, Standardizer};
use crate::storage::FieldSource;

/// Errors aborting pipeline construction.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Raised while fitting standardization statistics from the train
    /// period: the data itself is broken, not the configuration.
    #[error("statistics fit failed: {0}")]
    StatsFit(#[from] AssemblyError),
}

/// The assembled dataset pipeline: one batch sequencer per period, plus
/// the shared standardization statistics.
pub struct DatasetPipeline {
    grid: Arc<GridSpec>,
    registry: Arc<ParameterRegistry>,
    stats: Option<Arc<StandardizationStats>>,
    train: BatchSequencer,
    valid: BatchSequencer,
    test: BatchSequencer,
}

impl std::fmt::Debug for DatasetPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetPipeline").finish_non_exhaustive()
    }
}

impl DatasetPipeline {
    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn registry(&self) -> &ParameterRegistry {
        &self.registry
    }

    pub fn stats(&self) -> Option<&StandardizationStats> {
        self.stats.as_deref()
    }

    pub fn train(&self) -> &BatchSequencer {
        &self.train
    }

    pub fn valid(&self) -> &BatchSequencer {
        &self.valid
    }

    pub fn test(&self) -> &BatchSequencer {
        &self.test
    }

    pub fn sequencer(&self, period: PeriodName) -> &BatchSequencer {
        match period {
            PeriodName::Train => &self.train,
            PeriodName::Valid => &self.valid,
            PeriodName::Test => &self.test,
        }
    }
}

/// Single entry point: resolve the grid, register the parameters, build
/// the period indices and wire up one batch sequencer per period.
///
/// When standardization is enabled the statistics are fitted from the
/// train period before any sequencer hands out a batch, so they are
/// write-once and strictly precede iteration.
pub fn build_pipeline(
    config: &RunConfig,
    source: Arc<dyn FieldSource>,
) -> Result<DatasetPipeline, PipelineError> {
    let grid_conf = &config.dataset_conf.grid;
    let grid = Arc::new(GridSpec::resolve(
        &grid_conf.name,
        grid_conf.border_size,
        grid_conf.subdomain,
        grid_conf.proj_name.as_deref(),
        grid_conf.projection_kwargs_text(),
    )?);

    let mut registry = ParameterRegistry::new();
    for (id, param) in &config.dataset_conf.params {
        registry.register(id, param.levels.clone(), param.kind)?;
    }
    let registry = Arc::new(registry);

    info!(
        grid = %grid.name,
        window = ?grid.cropped_shape(),
        params = registry.len(),
        input_channels = registry.input_channels().len(),
        output_channels = registry.output_channels().len(),
        "resolved dataset configuration"
    );

    let build_index = |name: PeriodName| -> Result<Arc<PeriodIndex>, ConfigError> {
        let conf = config.period(&name.to_string())?;
        let spec = PeriodSpec {
            name,
            start: parse_stamp(&conf.start.as_text())?,
            end: parse_stamp(&conf.end.as_text())?,
            obs_step_secs: conf.obs_step,
        };
        Ok(Arc::new(PeriodIndex::build(&spec)?))
    };

    let assembler_for = |index: Arc<PeriodIndex>| -> Arc<Assembler> {
        Arc::new(Assembler::new(
            Arc::clone(&grid),
            Arc::clone(&registry),
            index,
            Arc::clone(&source),
        ))
    };

    let train_assembler = assembler_for(build_index(PeriodName::Train)?);
    let valid_assembler = assembler_for(build_index(PeriodName::Valid)?);
    let test_assembler = assembler_for(build_index(PeriodName::Test)?);

    let stats = if config.dataset_conf.settings.standardize {
        let positions: Vec<usize> = (0..train_assembler.index().len())
            .filter(|&c| {
                train_assembler.window_fits(c, config.num_input_steps, config.num_pred_steps_train)
            })
            .collect();
        if positions.is_empty() {
            return Err(ConfigError::Invalid(
                "train period has no valid samples to fit statistics from".to_string(),
            )
            .into());
        }
        let stats = StandardizationStats::fit(
            &train_assembler,
            &positions,
            config.num_input_steps,
            config.num_pred_steps_train,
        )?;
        Some(Arc::new(stats))
    } else {
        None
    };

    let standardizer = Arc::new(match &stats {
        Some(stats) => Standardizer::new(Arc::clone(stats)),
        None => Standardizer::identity(),
    });

    let settings = |shuffle: bool, num_pred_steps: usize| SequencerSettings {
        batch_size: config.batch_size,
        shuffle,
        num_input_steps: config.num_input_steps,
        num_pred_steps,
        num_workers: config.num_workers,
        prefetch_factor: config.prefetch_factor,
        pin_memory: config.pin_memory,
        base_seed: config.seed,
    };

    let train = BatchSequencer::new(
        train_assembler,
        Arc::clone(&standardizer),
        PeriodName::Train,
        settings(true, config.num_pred_steps_train),
    );
    let valid = BatchSequencer::new(
        valid_assembler,
        Arc::clone(&standardizer),
        PeriodName::Valid,
        settings(false, config.num_pred_steps_val_test),
    );
    let test = BatchSequencer::new(
        test_assembler,
        Arc::clone(&standardizer),
        PeriodName::Test,
        settings(false, config.num_pred_steps_val_test),
    );

    info!(
        train_samples = train.num_samples(),
        valid_samples = valid.num_samples(),
        test_samples = test.num_samples(),
        standardize = config.dataset_conf.settings.standardize,
        "dataset pipeline ready"
    );

    Ok(DatasetPipeline {
        grid,
        registry,
        stats,
        train,
        valid,
        test,
    })
}
