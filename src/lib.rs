pub mod assembler;
pub mod config;
pub mod grid;
pub mod params;
pub mod period;
pub mod pipeline;
pub mod sequencer;
pub mod standardize;
pub mod storage;

pub use pipeline::{DatasetPipeline, PipelineError, build_pipeline};
