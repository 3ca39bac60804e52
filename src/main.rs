use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dicom_volume_io::{ReadOptions, Rescale, VolumeIo, WriteOptions};

/// Read a DICOM file or series and report the reconstructed volume
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// DICOM file or directory holding one series
    input: PathBuf,

    /// File name pattern for directory inputs
    #[arg(long, default_value = "*")]
    glob: String,

    /// Use an identity affine when a multi-frame file has no geometry
    #[arg(long)]
    allow_default_affine: bool,

    /// Move color samples to this axis
    #[arg(long)]
    channels_axis: Option<usize>,

    /// Apply RescaleSlope/RescaleIntercept when they are not trivial
    #[arg(long)]
    rescale: bool,

    /// List the parsed header elements (single files only)
    #[arg(long)]
    header: bool,

    /// Write the volume back into this file, using the input as template
    #[arg(long)]
    rewrite: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut options = ReadOptions::default()
        .with_globber(&cli.glob)
        .with_header(cli.header)
        .with_default_affine(cli.allow_default_affine);
    if let Some(axis) = cli.channels_axis {
        options = options.with_channels_axis(axis);
    }
    if cli.rescale {
        options = options.with_rescale(Rescale::Auto);
    }

    let (volume, metadata) = match VolumeIo::read_image(&cli.input, &options) {
        Ok(result) => result,
        Err(e) => {
            error!("Failed to read {}: {}", cli.input.display(), e);
            return ExitCode::FAILURE;
        }
    };

    info!("shape: {:?} ({})", volume.shape(), volume.dtype());
    info!("spacing: {:?}", metadata.spacing());
    info!("origin: {:?}", metadata.origin());
    info!("affine ({}):\n{}", metadata.coord_sys, metadata.affine.matrix());
    if let Some(header) = &metadata.header {
        for (tag, element) in header {
            info!("{} {:?}", tag, element.vr());
        }
    }

    if let Some(output) = cli.rewrite {
        if cli.input.is_dir() {
            error!("--rewrite needs a single file as template");
            return ExitCode::FAILURE;
        }
        let write_options = WriteOptions::default().with_keep_rescale(!cli.rescale);
        let written = VolumeIo::write_image(&output, &cli.input, &volume, &write_options);
        if let Err(e) = written {
            error!("Failed to write {}: {}", output.display(), e);
            return ExitCode::FAILURE;
        }
        info!("written to {}", output.display());
    }

    ExitCode::SUCCESS
}

fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "dicom_volume_io=debug"
    } else {
        "dicom_volume_io=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
