use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "build-bids",
    version,
    about = "Generate a BIDS dataset using Elab configuration and metadata files",
    long_about = "Generate a BIDS dataset using Elab configuration and metadata files.\n\
                  Eye-tracking recordings (.edf) are converted with eye2bids. \
                  Set $EYE2BIDS_PATH or use --eye2bids.",
    after_help = "Example:\n  build-bids -f elab_config.json -m metadata.CSV -o output/ -t v1 -p project_config.yml"
)]
pub struct Cli {
    /// Path to the Elab configuration JSON file
    #[arg(short = 'f', long)]
    pub config_file: PathBuf,

    /// Path to the metadata file to be processed (CSV, JSON or YAML)
    #[arg(short, long)]
    pub metadata_file: PathBuf,

    /// Output directory for the BIDS dataset
    #[arg(short, long)]
    pub output_dir: PathBuf,

    /// Tag for the output dataset, used as the dataset directory name
    #[arg(short, long)]
    pub tag: String,

    /// Project YAML config file
    #[arg(short, long)]
    pub project_config: PathBuf,

    /// Explicit path to the eye2bids program
    #[arg(long)]
    pub eye2bids: Option<String>,

    /// Print a JSON build summary to stdout
    #[arg(long)]
    pub json: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
