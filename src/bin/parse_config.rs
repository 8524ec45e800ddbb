//! Print the component settings derived from a correction config.

use std::error::Error;
use std::path::PathBuf;

use clap::Parser;

use petacs::config::read_config_file;
use petacs::scatter::ScatterEstimator;
use petacs::utils::group_digits;

#[derive(clap::Parser, Debug, Clone)]
#[clap(name = "parse_config", about = "Check a correction config file")]
struct Cli {
    /// Configuration file
    config_file: PathBuf,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Cli::parse();
    let config = read_config_file(&args.config_file)?;

    let g = config.geometry();
    println!("Sinogram: {} axes, {} planes of {} angles x {} bins ({} values)",
             g.axes.len(), g.planes(), g.angles, g.bins, group_digits(g.len()));
    match config.rebin_plan() {
        Some(plan) => println!("{plan:#?}"),
        None       => println!("No rebinning"),
    }
    println!("{:#?}", config.attenuation_config());

    // Reports any adjustment of the subsets
    let scatter = ScatterEstimator::new(config.scatter_config())?;
    println!("{:#?}", scatter.config());
    Ok(())
}
