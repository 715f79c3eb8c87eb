//! Command-line front end for peakrow.
//!
//! ```bash
//! # Convert mzML to a peakrow bundle
//! peakrow convert input.mzML output.peakrow
//!
//! # Inspect a bundle
//! peakrow info output.peakrow
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use peakrow::reader::StoreReader;
use peakrow::writer::WriterConfig;

/// peakrow - columnar mass spectrometry peak storage
#[derive(Parser)]
#[command(name = "peakrow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Conversion profile trading speed against compression.
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum ProfileArg {
    /// Prioritize write speed
    Fast,
    /// Balance speed and compression
    #[default]
    Balanced,
    /// Maximum compression, slower conversion
    MaxCompression,
}

impl From<ProfileArg> for WriterConfig {
    fn from(arg: ProfileArg) -> Self {
        match arg {
            ProfileArg::Fast => WriterConfig::fast_write(),
            ProfileArg::Balanced => WriterConfig::balanced(),
            ProfileArg::MaxCompression => WriterConfig::max_compression(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Convert an mzML file to a peakrow bundle
    #[cfg(feature = "mzml")]
    Convert {
        /// Input mzML file path
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output bundle path (defaults to INPUT with a .peakrow extension)
        #[arg(value_name = "OUTPUT")]
        output: Option<PathBuf>,

        /// Conversion profile
        #[arg(short, long, value_enum, default_value_t = ProfileArg::Balanced)]
        profile: ProfileArg,
    },

    /// Print summary information about a bundle
    Info {
        /// Bundle path
        #[arg(value_name = "BUNDLE")]
        bundle: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        #[cfg(feature = "mzml")]
        Commands::Convert {
            input,
            output,
            profile,
        } => run_convert(input, output, profile),
        Commands::Info { bundle } => run_info(bundle),
    }
}

#[cfg(feature = "mzml")]
fn run_convert(input: PathBuf, output: Option<PathBuf>, profile: ProfileArg) -> Result<()> {
    use peakrow::mzml::{ConvertConfig, MzmlConverter};

    let output = output.unwrap_or_else(|| input.with_extension("peakrow"));

    let converter = MzmlConverter::with_config(ConvertConfig {
        writer_config: profile.into(),
        cancel: None,
    });
    let stats = converter
        .convert(&input, &output)
        .with_context(|| format!("converting {}", input.display()))?;

    println!("Wrote {}", output.display());
    println!(
        "  spectra: {} (MS1 {}, MS2 {})",
        stats.spectra_count, stats.ms1_spectra, stats.ms2_spectra
    );
    println!("  peaks: {}", stats.peak_count);
    println!("  chromatograms: {}", stats.chromatogram_count);
    if stats.skipped_records > 0 {
        println!("  skipped malformed records: {}", stats.skipped_records);
    }
    println!("  elapsed: {:.2?}", stats.elapsed);
    Ok(())
}

fn run_info(bundle: PathBuf) -> Result<()> {
    let reader = StoreReader::open(&bundle)
        .with_context(|| format!("opening bundle {}", bundle.display()))?;

    println!("{}", reader.summary());
    println!("row groups: {}", reader.num_row_groups());
    Ok(())
}
