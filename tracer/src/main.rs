//! `tracer`: assembles the shading kernel for one profile and renders frames
//! with it on the worker pool.

mod config;
mod kernel;
mod scene;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;
use simd_assembler::*;
use tracer_pool::{AddressWindow, FrameBuffer, WorkerPool};
use tracing::{error, info, info_span, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use config::TracerConfig;
use scene::SphereScene;

/// Tracer command line.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase output verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// JSON configuration file.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Target profile, e.g. `x64_256` or `a64_512`. Any catalogued profile is
    /// selectable here at runtime; the cargo `arch-*`/`simd-*` features only
    /// choose the default.
    #[arg(long)]
    profile: Option<String>,
    /// Use 64-bit lanes.
    #[arg(long)]
    fp64: bool,
    /// Vector register budget, 8 or 16. Defaults to the build's budget.
    #[arg(long)]
    registers: Option<u8>,
    /// Worker threads.
    #[arg(long)]
    threads: Option<usize>,
    /// Frames to render.
    #[arg(long)]
    frames: Option<u32>,
    /// Print the kernel's per-member encodings.
    #[arg(long)]
    listing: bool,
}

impl Cli {
    fn resolve(&self) -> anyhow::Result<TracerConfig> {
        let mut config = match &self.config {
            Some(path) => TracerConfig::load(path)?,
            None => TracerConfig::default(),
        };
        if let Some(profile) = &self.profile {
            config.profile = profile.clone();
        }
        if self.fp64 {
            config.fp64 = true;
        }
        if let Some(registers) = self.registers {
            config.registers = registers;
        }
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        if let Some(frames) = self.frames {
            config.frames = frames;
        }
        config.validate()?;
        Ok(config)
    }
}

/// What one run produced.
#[derive(Debug)]
struct Summary {
    profile: &'static str,
    code_bytes: usize,
    kernel_digest: blake3::Hash,
    frame_digest: blake3::Hash,
    faults: usize,
}

fn render<T: Target>(config: &TracerConfig, listing: bool) -> anyhow::Result<Summary> {
    let span = info_span!("render", profile = T::NAME);
    let _guard = span.enter();

    let kernel = kernel::shade::<T>().with_context(|| format!("assembling kernel for {}", T::NAME))?;
    info!(
        bytes = kernel.code().len(),
        ops = kernel.program().len(),
        digest = %kernel.digest().to_hex(),
        "kernel ready"
    );
    if listing {
        print!("{}", kernel.listing());
    }

    let threads = config.worker_count();
    let window = AddressWindow::anonymous(config.address_mode.into());
    let frame = FrameBuffer::alloc(&window, config.x_res, config.y_res, config.row_pitch())
        .context("allocating frame buffer")?;
    let scene = Arc::new(SphereScene::new::<T>(kernel.program().to_vec(), frame, threads));
    let pool = WorkerPool::new(threads, scene.clone()).context("starting worker pool")?;

    for n in 0..config.frames {
        let phase = (n % 256) as u8;
        pool.update_scene(phase);
        pool.render_scene(phase);
        if pool.failed() {
            break;
        }
        info!(frame = n, digest = %scene.frame_digest().to_hex(), "frame done");
    }

    let faults = pool.terminate();
    for fault in &faults {
        error!(worker = fault.index, cause = %fault.cause, "slice fault");
    }

    Ok(Summary {
        profile: T::NAME,
        code_bytes: kernel.code().len(),
        kernel_digest: kernel.digest(),
        frame_digest: scene.frame_digest(),
        faults: faults.len(),
    })
}

macro_rules! by_profile {
    ($config:expr, $listing:expr; $($label:literal => $profile:ident),* $(,)?) => {
        match ($config.profile.as_str(), $config.fp64, $config.registers) {
            $(
                ($label, false, 16) => render::<$profile<Fp32, R16>>($config, $listing),
                ($label, true, 16) => render::<$profile<Fp64, R16>>($config, $listing),
                ($label, false, 8) => render::<$profile<Fp32, R8>>($config, $listing),
                ($label, true, 8) => render::<$profile<Fp64, R8>>($config, $listing),
            )*
            ($($label)|*, _, registers) => Err(anyhow!("no {registers}-register build of `{}`", $config.profile)),
            (other, _, _) => Err(anyhow!("unknown profile `{other}`")),
        }
    };
}

fn run(cli: &Cli) -> anyhow::Result<Summary> {
    let config = cli.resolve()?;
    info!(
        profile = %config.profile,
        fp64 = config.fp64,
        registers = config.registers,
        threads = config.worker_count(),
        x_res = config.x_res,
        y_res = config.y_res,
        "configuration loaded"
    );
    by_profile!(&config, cli.listing;
        "x64_128" => X64_128,
        "x64_256" => X64_256,
        "x64_512" => X64_512,
        "x64_1024" => X64_1024,
        "a64_128" => A64_128,
        "a64_256" => A64_256,
        "a64_512" => A64_512,
        "p64_128" => P64_128,
        "p64_256" => P64_256,
        "m64_128" => M64_128,
        "m64_256" => M64_256,
        "m64_512" => M64_512,
    )
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_env_filter(env_filter)
        .finish();
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("tracer: failed to install logger: {err}");
    }

    match run(&cli) {
        Ok(summary) => {
            println!(
                "{}: kernel {} bytes {} frame {}",
                summary.profile,
                summary.code_bytes,
                summary.kernel_digest.to_hex(),
                summary.frame_digest.to_hex()
            );
            if summary.faults == 0 {
                ExitCode::SUCCESS
            } else {
                eprintln!("tracer: {} slice fault(s), see log", summary.faults);
                ExitCode::FAILURE
            }
        }
        Err(err) => {
            eprintln!("tracer: {err:#}");
            ExitCode::FAILURE
        }
    }
}
