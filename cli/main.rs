#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, Parser, Subcommand};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use std::error::Error;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process;
use std::time::Instant;

use pixel_ilc::{
    DustMaps, HealpixRing, IlcConfig, InversionPolicy, PixelFailurePolicy, PixelWeights,
    SpherePixelization, disc_covariance_ilc, dust_deprojected_ilc, smoothed_covariance_ilc,
};

type CliResult = Result<(), Box<dyn Error + Send + Sync>>;

#[derive(Parser)]
#[command(
    name = "pixel-ilc",
    about = "Per-pixel needlet ILC weights for multi-frequency sky maps",
    long_about = "Computes minimum-variance internal linear combination weights pixel by pixel. \
                 The synth command exercises the solvers on a simulated sky."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate a sky, then solve it with the disc and packed estimators
    Synth(SynthArgs),
    /// Write a configuration file with default settings
    InitConfig(InitConfigArgs),
}

#[derive(Args)]
struct SynthArgs {
    /// HEALPix resolution of the simulated maps
    #[arg(long, default_value = "8")]
    nside: usize,

    /// Comma-separated channel frequencies in GHz
    #[arg(long, value_delimiter = ',', default_value = "30,44,70,100,143,217,353")]
    freqs: Vec<f64>,

    /// Worker threads; required unless --config is given
    #[arg(long, required_unless_present = "config")]
    workers: Option<NonZeroUsize>,

    /// TOML configuration; --workers overrides its worker count
    #[arg(long)]
    config: Option<PathBuf>,

    /// Disc radius of the covariance estimate, in degrees
    #[arg(long, default_value = "15.0")]
    fwhm_deg: f64,

    /// White-noise level of the first channel relative to the signal
    #[arg(long, default_value = "0.5")]
    noise: f64,

    /// Seed of the simulation
    #[arg(long, default_value = "42")]
    seed: u64,
}

#[derive(Args)]
struct InitConfigArgs {
    /// Where to write the configuration
    path: PathBuf,

    #[arg(long)]
    workers: NonZeroUsize,

    /// Add this relative ridge to singular covariances instead of failing
    #[arg(long)]
    ridge: Option<f64>,

    /// Zero the weights of failing pixels instead of aborting
    #[arg(long)]
    zero_failed: bool,
}

fn resolve_config(args: &SynthArgs) -> Result<IlcConfig, Box<dyn Error + Send + Sync>> {
    let config = match (&args.config, args.workers) {
        (Some(path), workers) => {
            let loaded = IlcConfig::load(path)?;
            match workers {
                Some(workers) => IlcConfig { workers, ..loaded },
                None => loaded,
            }
        }
        (None, Some(workers)) => IlcConfig::new(workers),
        (None, None) => return Err("either --workers or --config is required".into()),
    };
    config.validate()?;
    Ok(config)
}

/// Common CMB-like signal plus independent white noise per channel. Noise
/// grows linearly across the channel list.
fn simulate_maps(
    nfreqs: usize,
    npix: usize,
    noise: f64,
    seed: u64,
) -> Result<Array2<f64>, Box<dyn Error + Send + Sync>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let unit = Normal::new(0.0, 1.0)?;
    let signal: Array1<f64> = (0..npix).map(|_| unit.sample(&mut rng)).collect();
    let mut maps = Array2::zeros((nfreqs, npix));
    for (n, mut channel) in maps.axis_iter_mut(Axis(0)).enumerate() {
        let sigma = noise * (1.0 + n as f64);
        for (value, &s) in channel.iter_mut().zip(signal.iter()) {
            *value = s + sigma * unit.sample(&mut rng);
        }
    }
    Ok(maps)
}

fn report(label: &str, result: &PixelWeights, target: &Array1<f64>) {
    let mean = result
        .weights
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(target.len()));
    let worst = result
        .weights
        .dot(target)
        .iter()
        .map(|r| (r - 1.0).abs())
        .fold(0.0_f64, f64::max);
    let formatted: Vec<String> = mean.iter().map(|w| format!("{w:+.4}")).collect();
    println!("{label}");
    println!("  mean weights:  [{}]", formatted.join(", "));
    println!("  max |w.a - 1|: {worst:.3e}");
    if !result.is_complete() {
        println!("  zeroed pixels: {}", result.failed_pixels.len());
    }
}

fn max_abs_difference(a: ArrayView2<'_, f64>, b: ArrayView2<'_, f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0_f64, f64::max)
}

fn run_synth(args: SynthArgs) -> CliResult {
    let config = resolve_config(&args)?;
    let grid = HealpixRing::new(args.nside).ok_or("--nside must be at least 1")?;
    let npix = grid.npix();
    let nfreqs = args.freqs.len();
    if nfreqs == 0 {
        return Err("--freqs must name at least one channel".into());
    }
    log::info!(
        "Simulating {nfreqs} channels at nside {} ({npix} pixels), {} workers",
        args.nside,
        config.workers
    );

    let start = Instant::now();
    let maps = simulate_maps(nfreqs, npix, args.noise, args.seed)?;
    let mask = Array1::ones(npix);
    let target = Array1::ones(nfreqs);
    let pixels: Vec<usize> = (0..npix).collect();
    let radius = args.fwhm_deg.to_radians();

    let disc = disc_covariance_ilc(
        maps.view(),
        mask.view(),
        args.nside,
        target.view(),
        radius,
        &pixels,
        &config,
    )?;
    report("disc covariance ILC", &disc, &target);

    // The work list is every map pixel, so the kept rows are indexed by pixel.
    let packed = disc
        .covariance
        .as_ref()
        .ok_or("the disc estimator returned no covariances")?;
    let smoothed =
        smoothed_covariance_ilc(packed.view(), nfreqs, target.view(), &pixels, &config)?;
    report("packed covariance ILC", &smoothed, &target);

    if nfreqs >= 2 {
        let beta = Array1::from_elem(npix, 1.54);
        let temperature = Array1::from_elem(npix, 19.6);
        let freqs = Array1::from(args.freqs.clone());
        let dust = DustMaps {
            beta: beta.view(),
            temperature: temperature.view(),
        };
        let deprojected =
            dust_deprojected_ilc(packed.view(), target.view(), dust, freqs.view(), &pixels, &config)?;
        report("dust-deprojected packed ILC", &deprojected, &target);
    }

    println!(
        "max |disc - packed| weight difference: {:.3e}",
        max_abs_difference(disc.weights.view(), smoothed.weights.view())
    );
    log::info!("Finished in {:.2?}", start.elapsed());
    Ok(())
}

fn run_init_config(args: InitConfigArgs) -> CliResult {
    let mut config = IlcConfig::new(args.workers);
    if let Some(relative_ridge) = args.ridge {
        config = config.with_inversion(InversionPolicy::Regularize { relative_ridge });
    }
    if args.zero_failed {
        config = config.with_pixel_failure(PixelFailurePolicy::ZeroRow);
    }
    config.validate()?;
    config.save(&args.path)?;
    println!("Wrote {}", args.path.display());
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let Cli { command } = Cli::parse();

    let result = match command {
        Commands::Synth(args) => run_synth(args),
        Commands::InitConfig(args) => run_init_config(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
