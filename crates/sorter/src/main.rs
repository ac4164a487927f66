use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Arg, ArgAction, Command};
use pipeline::{Component, LabelSource, Pipeline, StageRegistry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod report;

use config::{apply_overrides, load_config, Overrides};
use report::Report;

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spike_sort=info,pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // --- Argument Parsing ---
    let matches = Command::new("spike_sort")
        .about("Offline spike sorting driven by a pipeline configuration")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_parser(clap::value_parser!(PathBuf))
                .default_value("pipelines/default.yaml")
                .help("Pipeline configuration (YAML or JSON)"),
        )
        .arg(
            Arg::new("mock")
                .long("mock")
                .action(ArgAction::SetTrue)
                .help("Use a synthetic recording instead of recording files"),
        )
        .arg(
            Arg::new("k")
                .long("k")
                .value_parser(clap::value_parser!(usize))
                .help("Number of clusters"),
        )
        .arg(
            Arg::new("stage")
                .long("stage")
                .help("Stage whose labels are reported (defaults to the last stage)"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print the report as JSON"),
        )
        .get_matches();

    let config_path = matches
        .get_one::<PathBuf>("config")
        .ok_or_else(|| anyhow!("missing --config"))?;
    let overrides = Overrides {
        mock: matches.get_flag("mock"),
        k: matches.get_one::<usize>("k").copied(),
    };

    let mut pipeline_config = load_config(config_path)?;
    apply_overrides(&mut pipeline_config, &overrides)?;

    let registry = pipeline::global();
    let stages = StageRegistry::with_builtin();
    let pipeline = Pipeline::build(&pipeline_config, &stages, registry).context("Failed to build pipeline")?;

    let component = match matches.get_one::<String>("stage") {
        Some(name) => pipeline.component(name)?,
        None => pipeline.terminal()?,
    };
    let labels = component
        .as_label_source()
        .ok_or_else(|| anyhow!("stage '{}' does not produce cluster labels", component.kind()))?
        .labels()
        .context("Sorting failed")?;

    let report = Report::from_labels(&pipeline_config.metadata.name, &labels);
    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }

    registry.reset();
    Ok(())
}
