use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, bounded};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, warn};

use crate::assembler::{AssembleOutcome, Assembler, AssemblyError, Sample};
use crate::period::PeriodName;
use crate::standardize::Standardizer;

/// Tuning knobs of one batch sequencer.
#[derive(Debug, Clone)]
pub struct SequencerSettings {
    pub batch_size: usize,
    pub shuffle: bool,
    pub num_input_steps: usize,
    pub num_pred_steps: usize,
    pub num_workers: usize,
    pub prefetch_factor: usize,
    pub pin_memory: bool,
    pub base_seed: u64,
}

/// A fixed-cardinality group of samples. The final batch of an epoch may
/// be shorter.
#[derive(Debug)]
pub struct Batch {
    pub index: usize,
    pub samples: Vec<Sample>,
    /// Device-transfer hint carried through for the downstream consumer.
    pub pin_memory: bool,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.samples.iter().map(|s| s.reference).collect()
    }
}

/// Drives repeated assembler calls to fill batches.
///
/// Valid center positions (those whose windows fit inside the period)
/// are precomputed once; boundary positions are counted and excluded.
/// Each epoch is a fresh, restartable iteration. Workers are handed
/// contiguous pre-computed index ranges, so non-shuffled ordering is
/// preserved regardless of worker count.
pub struct BatchSequencer {
    assembler: Arc<Assembler>,
    standardizer: Arc<Standardizer>,
    period: PeriodName,
    settings: SequencerSettings,
    positions: Vec<usize>,
    skipped: usize,
    pool: Arc<ThreadPool>,
}

impl BatchSequencer {
    pub fn new(
        assembler: Arc<Assembler>,
        standardizer: Arc<Standardizer>,
        period: PeriodName,
        settings: SequencerSettings,
    ) -> Self {
        let total = assembler.index().len();
        let positions: Vec<usize> = (0..total)
            .filter(|&c| {
                assembler.window_fits(c, settings.num_input_steps, settings.num_pred_steps)
            })
            .collect();
        let skipped = total - positions.len();
        debug!(
            period = %period,
            samples = positions.len(),
            skipped,
            "built sample position index"
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.num_workers.max(1))
            .build()
            .expect("failed to build worker pool");

        Self {
            assembler,
            standardizer,
            period,
            settings,
            positions,
            skipped,
            pool: Arc::new(pool),
        }
    }

    pub fn period(&self) -> PeriodName {
        self.period
    }

    /// Number of emittable samples per epoch.
    pub fn num_samples(&self) -> usize {
        self.positions.len()
    }

    /// Boundary positions excluded from every epoch.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn num_batches(&self) -> usize {
        self.positions.len().div_ceil(self.settings.batch_size)
    }

    pub fn settings(&self) -> &SequencerSettings {
        &self.settings
    }

    /// The exact sample positions of one epoch, shuffled when the
    /// sequencer is. Exposed so callers can reason about coverage.
    pub fn epoch_order(&self, epoch: u64) -> Vec<usize> {
        let mut order = self.positions.clone();
        if self.settings.shuffle {
            let mut rng = StdRng::seed_from_u64(self.settings.base_seed ^ epoch);
            order.shuffle(&mut rng);
        }
        order
    }

    /// Start one epoch of batch production. Batches are assembled ahead
    /// of consumption through a bounded prefetch queue; dropping the
    /// returned iterator cancels outstanding work.
    pub fn epoch(&self, epoch: u64) -> BatchIter {
        let order = self.epoch_order(epoch);
        let assembler = Arc::clone(&self.assembler);
        let standardizer = Arc::clone(&self.standardizer);
        let pool = Arc::clone(&self.pool);
        let period = self.period;
        let SequencerSettings {
            batch_size,
            num_input_steps,
            num_pred_steps,
            prefetch_factor,
            pin_memory,
            ..
        } = self.settings;

        let (tx, rx) = bounded(prefetch_factor.max(1));
        let handle = std::thread::spawn(move || {
            let chunks: Vec<&[usize]> = order.chunks(batch_size).collect();
            for (batch_index, chunk) in chunks.into_iter().enumerate() {
                let assembled: Result<Vec<Sample>, AssemblyError> = pool.install(|| {
                    chunk
                        .par_iter()
                        .map(|&center| {
                            match assembler.assemble(center, num_input_steps, num_pred_steps)? {
                                AssembleOutcome::Sample(s) => Ok(standardizer.apply(s)),
                                // Positions were pre-filtered; hitting a
                                // boundary here is a logic error.
                                AssembleOutcome::SkippedBoundary => {
                                    Err(AssemblyError::OutOfRange(center))
                                }
                            }
                        })
                        .collect()
                });
                let item = assembled.map(|samples| Batch {
                    index: batch_index,
                    samples,
                    pin_memory,
                });
                let failed = item.is_err();
                if failed {
                    warn!(period = %period, batch = batch_index, "batch assembly failed");
                }
                if tx.send(item).is_err() {
                    // Consumer dropped the iterator; stop issuing work.
                    break;
                }
                if failed {
                    break;
                }
            }
        });

        BatchIter {
            rx: Some(rx),
            handle: Some(handle),
        }
    }
}

/// Lazy, finite stream of batches for one epoch. Assembly errors are
/// surfaced as `Err` items and terminate the epoch.
pub struct BatchIter {
    rx: Option<Receiver<Result<Batch, AssemblyError>>>,
    handle: Option<JoinHandle<()>>,
}

impl Iterator for BatchIter {
    type Item = Result<Batch, AssemblyError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.as_ref()?.recv().ok()
    }
}

impl Drop for BatchIter {
    fn drop(&mut self) {
        // Disconnect first so a producer blocked on a full queue wakes
        // up, then reap the thread.
        drop(self.rx.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
