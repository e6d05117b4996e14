use crate::cli::Cli;
use crate::exit_codes;
use crate::output;
use anyhow::Context;
use bids_rs::convert::PROGRAM_NAME;
use bids_rs::{
    find_program, load_experiments, BuildReport, ConverterDispatch, DatasetBuilder, EventSink,
    ExperimentRecord, ExternalProgram, LogSink, ModalityRegistry, ProjectConfig, SourceConfig,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Serialize)]
struct SegmentSummary {
    segment_key: String,
    segment_id: String,
    final_path: Option<String>,
    final_raw_data_path: Option<PathBuf>,
    converter: Option<String>,
}

#[derive(Serialize)]
struct ExperimentSummary {
    participant_id: String,
    session_id: Option<String>,
    data_dir: PathBuf,
    segments: Vec<SegmentSummary>,
    converted: Vec<PathBuf>,
}

#[derive(Serialize)]
struct BuildSummary {
    root: PathBuf,
    experiments: Vec<ExperimentSummary>,
}

impl From<&BuildReport> for BuildSummary {
    fn from(report: &BuildReport) -> Self {
        let experiments = report
            .experiments
            .iter()
            .map(|e| ExperimentSummary {
                participant_id: e.participant_id.clone(),
                session_id: e.session_id.clone(),
                data_dir: e.data_dir.clone(),
                segments: e
                    .resolution
                    .iter()
                    .map(|b| SegmentSummary {
                        segment_key: b.segment_key.clone(),
                        segment_id: b.segment_id.clone(),
                        final_path: b.final_path.clone(),
                        final_raw_data_path: b.final_raw_data_path.clone(),
                        converter: b.converter.clone(),
                    })
                    .collect(),
                converted: e.converted.clone(),
            })
            .collect();
        Self {
            root: report.root.clone(),
            experiments,
        }
    }
}

pub fn execute(args: Cli) -> i32 {
    let sink = LogSink::new("build_bids");

    let (builder, experiments) = match prepare(&args, &sink) {
        Ok(prepared) => prepared,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return exit_codes::INPUT_ERROR;
        }
    };

    let root = args.output_dir.join(&args.tag);
    let report = match builder
        .build(&root, &experiments)
        .with_context(|| format!("Failed to build dataset at {}", root.display()))
    {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    };

    if args.json {
        let written = output::to_json(&BuildSummary::from(&report)).and_then(|json| output::write_stdout(&json));
        if let Err(e) = written {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    } else {
        println!("Dataset written to {}", report.root.display());
        for experiment in &report.experiments {
            println!(
                "  {}: {} segment(s), {} converted file(s)",
                experiment.participant_id,
                experiment.resolution.len(),
                experiment.converted.len()
            );
        }
    }

    exit_codes::SUCCESS
}

/// Load every input and wire the builder. Any failure here is an input error.
fn prepare<'a>(args: &Cli, sink: &'a dyn EventSink) -> anyhow::Result<(DatasetBuilder<'a>, Vec<ExperimentRecord>)> {
    let source = SourceConfig::load(&args.config_file)
        .with_context(|| format!("Failed to read configuration file {}", args.config_file.display()))?;
    let config = ProjectConfig::load(&args.project_config)
        .with_context(|| format!("Failed to read project config {}", args.project_config.display()))?;

    let mut experiments = load_experiments(&args.metadata_file)
        .with_context(|| format!("Failed to read metadata file {}", args.metadata_file.display()))?;
    for experiment in &mut experiments {
        experiment.apply_source_config(&source);
    }

    let program = find_program(args.eye2bids.as_deref());
    match program {
        Some(ref path) => log::info!("Using {} at {}", PROGRAM_NAME, path.display()),
        None => log::warn!("{} not found, .edf conversion will fail", PROGRAM_NAME),
    }
    let dispatch = ConverterDispatch::with_defaults(config.modality(), Arc::new(ExternalProgram::new(program)));

    let project = config.project_name().to_string();
    let builder = DatasetBuilder::new(config, &ModalityRegistry::builtin(), dispatch, sink)
        .with_context(|| format!("Invalid project config for '{}'", project))?;
    Ok((builder, experiments))
}
