use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use strum_macros::Display;

use flim_cube::output::writer::{create_output_file, CubeWriter, ZSliceDims};
use flim_cube::pipeline::{build_cube_from_file, now_local, PipelineConfig};

#[derive(Debug, Parser)]
#[command(name = "flim_cube")]
#[command(about = "Reconstructs FLIM data cubes from TCSPC TTTR FIFO photon-event streams.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Reconstruct a cube from a PicoQuant T3 FIFO file and write it to the
    /// self-describing binary container format.
    Build {
        /// Path to the input FIFO (`.pt3`) file.
        input: PathBuf,

        /// Path the cube container will be written to.
        #[arg(long, default_value_os_t = PathBuf::from("cube.bin"))]
        output: PathBuf,

        /// Element type of the output cube.
        #[arg(long, default_value_t = CubeDataType::default())]
        data_type: CubeDataType,

        /// Number of successive acquired lines that make up one image row.
        #[arg(long, default_value_t = 1)]
        line_averaging: u32,

        /// Number of Z-planes interleaved in the raw frame stream.
        #[arg(long, default_value_t = 1)]
        n_z: u32,

        /// Number of consecutive raw frames accumulated into one output frame.
        #[arg(long, default_value_t = 1)]
        frame_binning: u32,

        /// Right-shift applied to the native micro-time axis before histogramming.
        #[arg(long, default_value_t = 0)]
        downsampling_shift: u32,

        /// Laser repetition period, in picoseconds. 0 if the acquisition is not periodic.
        #[arg(long, default_value_t = 0)]
        t_rep_ps: u64,

        /// Detector channels to keep. Omit to keep every channel the acquisition reports.
        #[arg(long, value_delimiter = ',')]
        channels: Vec<u32>,

        /// Run the background intensity-frame realignment worker while building the cube.
        #[arg(long, default_value_t = false)]
        realign: bool,
    },
}

#[derive(Copy, Clone, Debug, Default, Display, PartialEq, Eq, ValueEnum)]
#[strum(serialize_all = "kebab-case")]
enum CubeDataType {
    #[default]
    Uint16,
    Float,
    Double,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Build {
            input,
            output,
            data_type,
            line_averaging,
            n_z,
            frame_binning,
            downsampling_shift,
            t_rep_ps,
            channels,
            realign,
        } => build(
            &input,
            &output,
            data_type,
            PipelineConfig {
                line_averaging,
                n_z,
                frame_binning,
                downsampling_shift,
                t_rep_ps,
                requested_channels: channels,
                realign_in_flight: realign,
                ..PipelineConfig::default()
            },
        ),
    }
}

fn build(input: &PathBuf, output: &PathBuf, data_type: CubeDataType, config: PipelineConfig) -> Result<()> {
    let progress = ProgressBar::new_spinner()
        .with_style(ProgressStyle::with_template("{spinner} {msg}")?)
        .with_message(format!("Reconstructing cube from {}...", input.display()));
    progress.enable_steady_tick(std::time::Duration::from_millis(100));

    let created_at = now_local();

    let result = match data_type {
        CubeDataType::Uint16 => write_cube::<u16>(input, output, config, created_at),
        CubeDataType::Float => write_cube::<f32>(input, output, config, created_at),
        CubeDataType::Double => write_cube::<f64>(input, output, config, created_at),
    };

    match &result {
        Ok(()) => progress.finish_with_message(format!("Wrote {}", output.display())),
        Err(_) => progress.finish_with_message("Failed"),
    }
    result
}

fn write_cube<T>(
    input: &PathBuf,
    output: &PathBuf,
    config: PipelineConfig,
    created_at: chrono::DateTime<chrono::Local>,
) -> Result<()>
where
    T: flim_cube::cube::model::CubeElement,
{
    let pipeline_output = build_cube_from_file::<T>(input, &config)
        .with_context(|| format!("failed to reconstruct a cube from {}", input.display()))?;

    let dims = ZSliceDims {
        n_t: pipeline_output.cube.dims.n_t,
        n_chan: pipeline_output.cube.dims.n_chan,
        n_y: pipeline_output.cube.dims.n_y,
        n_x: pipeline_output.cube.dims.n_x,
    };
    let n_z = pipeline_output.cube.dims.n_z;

    for z in 0..n_z {
        let path = z_slice_path(output, z, n_z);
        let file = create_output_file(&path)
            .with_context(|| format!("failed to create output file {}", path.display()))?;
        let mut writer = BufWriter::new(file);

        CubeWriter::write(
            &mut writer,
            dims,
            &pipeline_output.cube.z_slice(z),
            &pipeline_output.timepoints_ps,
            &pipeline_output.original_tags,
            created_at,
            &[],
        )
        .with_context(|| format!("failed to write cube container to {}", path.display()))?;
    }

    Ok(())
}

/// `output` unchanged for a single-plane cube; otherwise `_z<index>` is
/// inserted before the extension, since [`CubeWriter`] writes one Z-slice
/// per file.
fn z_slice_path(output: &Path, z: u32, n_z: u32) -> PathBuf {
    if n_z <= 1 {
        return output.to_path_buf();
    }
    let stem = output.file_stem().and_then(|s| s.to_str()).unwrap_or("cube");
    let suffixed = match output.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}_z{z}.{ext}"),
        None => format!("{stem}_z{z}"),
    };
    output.with_file_name(suffixed)
}
