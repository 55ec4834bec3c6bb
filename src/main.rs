use clap::{Arg, ArgMatches, Command, value_parser};
use meteoset::{
    build_pipeline,
    config::RunConfig,
    period::PeriodName,
    storage::NpyDirSource,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() {
    let matches = build_cli().get_matches();
    init_tracing(matches.get_flag("verbose"));

    match matches.subcommand() {
        Some(("inspect", sub_matches)) => {
            if let Err(e) = run_inspect(sub_matches) {
                eprintln!("Inspect error: {}", e);
                std::process::exit(1);
            }
        }
        Some(("iterate", sub_matches)) => {
            if let Err(e) = run_iterate(sub_matches) {
                eprintln!("Iteration error: {}", e);
                std::process::exit(1);
            }
        }
        _ => {
            eprintln!("Please specify a subcommand. Use --help for more information.");
            std::process::exit(1);
        }
    }
}

fn build_cli() -> Command {
    Command::new("meteoset")
        .version("0.1.0")
        .about("Dataset preparation engine for gridded weather forecasting models")
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging")
                .action(clap::ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("inspect")
                .about("Resolve a configuration and print the pipeline summary")
                .arg(config_arg())
                .arg(data_dir_arg()),
        )
        .subcommand(
            Command::new("iterate")
                .about("Run batch iteration over one period")
                .arg(config_arg())
                .arg(data_dir_arg())
                .arg(
                    Arg::new("period")
                        .short('p')
                        .long("period")
                        .value_name("PERIOD")
                        .help("Period to iterate")
                        .value_parser(["train", "valid", "test"])
                        .default_value("train"),
                )
                .arg(
                    Arg::new("epochs")
                        .short('e')
                        .long("epochs")
                        .value_name("COUNT")
                        .help("Number of epochs to iterate")
                        .value_parser(value_parser!(u64))
                        .default_value("1"),
                ),
        )
}

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .help("YAML configuration file")
        .required(true)
}

fn data_dir_arg() -> Arg {
    Arg::new("data-dir")
        .short('d')
        .long("data-dir")
        .value_name("DIR")
        .help("Directory holding the raw npy fields")
        .default_value("./data")
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load(matches: &ArgMatches) -> Result<(RunConfig, Arc<NpyDirSource>), String> {
    let config_path = matches.get_one::<String>("config").unwrap();
    let data_dir = matches.get_one::<String>("data-dir").unwrap();
    let config = RunConfig::from_yaml_file(config_path).map_err(|e| e.to_string())?;
    Ok((config, Arc::new(NpyDirSource::new(data_dir))))
}

fn run_inspect(matches: &ArgMatches) -> Result<(), String> {
    let (config, source) = load(matches)?;
    let pipeline = build_pipeline(&config, source).map_err(|e| e.to_string())?;

    let grid = pipeline.grid();
    println!("Grid: {} (native {:?})", grid.name, grid.native_shape);
    println!(
        "  window rows {}..{} cols {}..{} -> {:?}",
        grid.window.row_min, grid.window.row_max, grid.window.col_min, grid.window.col_max,
        grid.cropped_shape()
    );
    println!("  projection: {} {:?}", grid.proj_name, grid.projection_kwargs);

    println!("Parameters:");
    for param in pipeline.registry().iter() {
        println!("  {} {:?} ({})", param.id, param.levels, param.kind);
    }
    println!(
        "Channels: {} input, {} output",
        pipeline.registry().input_channels().len(),
        pipeline.registry().output_channels().len()
    );

    for period in [PeriodName::Train, PeriodName::Valid, PeriodName::Test] {
        let seq = pipeline.sequencer(period);
        println!(
            "{}: {} samples, {} batches, {} skipped at boundaries",
            period,
            seq.num_samples(),
            seq.num_batches(),
            seq.skipped()
        );
    }

    if let Some(stats) = pipeline.stats() {
        println!("Standardization (input channels):");
        for (channel, st) in pipeline
            .registry()
            .input_channels()
            .iter()
            .zip(&stats.inputs)
        {
            println!(
                "  {}: mean={:.4} scale={:.4} min={:.4} max={:.4}",
                channel, st.mean, st.scale, st.min, st.max
            );
        }
    } else {
        println!("Standardization disabled");
    }
    Ok(())
}

fn run_iterate(matches: &ArgMatches) -> Result<(), String> {
    let (config, source) = load(matches)?;
    let period = PeriodName::parse(matches.get_one::<String>("period").unwrap())
        .map_err(|e| e.to_string())?;
    let epochs = *matches.get_one::<u64>("epochs").unwrap();

    let pipeline = build_pipeline(&config, source).map_err(|e| e.to_string())?;
    let sequencer = pipeline.sequencer(period);

    for epoch in 0..epochs {
        let mut batches = 0usize;
        let mut samples = 0usize;
        for batch in sequencer.epoch(epoch) {
            let batch = batch.map_err(|e| e.to_string())?;
            batches += 1;
            samples += batch.len();
        }
        info!(%period, epoch, batches, samples, "epoch complete");
    }
    Ok(())
}
