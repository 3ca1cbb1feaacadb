use clap::Parser;
use std::path::PathBuf;

/// X-ray acquisition console core service.
#[derive(Parser, Debug, Clone)]
#[command(version, about)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    pub config: PathBuf,
}

/// Arguments of the config generator binary.
#[derive(Parser, Debug, Clone)]
#[command(version, about = "Writes a commented default configuration")]
pub struct GeneratorCli {
    /// Where to write the configuration file
    #[arg(short, long, default_value = "console.toml")]
    pub output: PathBuf,
}
