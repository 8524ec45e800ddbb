//! Resample raw sinograms to the in-plane size given in the `[rebin]` section
//! of a correction config.

use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use petacs::arena::BufferArena;
use petacs::config::read_config_file;
use petacs::io::raw::{read_sinogram, write_sinogram};
use petacs::rebin::Rebinner;
use petacs::utils::{group_digits, timing::Progress};

#[derive(clap::Parser, Debug, Clone)]
#[clap(name = "rebin", about = "Resample raw sinograms to new radial and angular sizes")]
pub struct Cli {
    /// Correction config with `[sinogram]` and `[rebin]` sections
    #[clap(short, long)]
    pub config: PathBuf,

    /// Raw little-endian f32 sinograms
    pub infiles: Vec<PathBuf>,

    /// Directory of the resampled sinograms, written with their input names
    #[clap(short, long, default_value = "rebinned")]
    pub out: PathBuf,

    /// Maximum number of worker threads; overrides the config
    #[clap(short = 'j', long)]
    pub threads: Option<usize>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Cli::parse();
    let mut progress = Progress::new();

    progress.start("Preparing rebinner");
    let config = read_config_file(&args.config)?;
    let plan = config.rebin_plan().ok_or("config has no [rebin] section")?;
    let threads = args.threads
        .or_else(|| config.rebin.as_ref().map(|r| r.max_threads))
        .unwrap_or(1);
    let rebinner = Rebinner::new(plan, threads)?;
    progress.done();

    std::fs::create_dir_all(&args.out)?;
    let arena = BufferArena::new();
    let geometry = config.geometry();
    let bar = ProgressBar::new(args.infiles.len() as u64);
    bar.set_style(ProgressStyle::default_bar()
                  .template("Rebinning: {msg}\n[{elapsed_precise}] {wide_bar} {pos}/{len} ({eta_precise})")?);

    for file in &args.infiles {
        bar.set_message(file.display().to_string());
        let name = file.file_name().ok_or_else(|| format!("`{}` names no file", file.display()))?;
        let sinogram = read_sinogram(&arena, file, geometry.clone())?;
        let rebinned = rebinner.rebin_sinogram(&arena, &sinogram, None)?;
        write_sinogram(&rebinned, &args.out.join(name))?;
        bar.inc(1);
    }
    bar.finish();

    progress.done_with_message(&format!(
        "Rebinned {} files of {} planes from {} x {} to {} x {} ({} values each)",
        args.infiles.len(), geometry.planes(),
        plan.height, plan.width, plan.new_height, plan.new_width,
        group_digits(geometry.planes() * plan.new_plane_len()),
    ));
    Ok(())
}
