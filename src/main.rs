//! pcm-rings - ring buffer 诊断工具
//!
//! - `info`: 列出常用 PCM 格式的流描述
//! - `stress`: 在选定的 ring 上运行生产者/消费者压力测试

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use pcm_rings::audio::{CommonPcmFormat, SampleLayout, StreamDescription};
use pcm_rings::stress::{self, RingKind, StressConfig};

/// pcm-rings - Lock-free PCM ring buffer diagnostics
#[derive(Parser)]
#[command(name = "pcm-rings")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Describe the common PCM stream formats
    Info {
        /// Sample rate in Hz
        #[arg(short, long, default_value = "44100")]
        sample_rate: f64,

        /// Channel count
        #[arg(short, long, default_value = "2")]
        channels: u32,
    },

    /// Run a producer/consumer stress test over a ring buffer
    Stress {
        /// Ring buffer to exercise
        #[arg(short, long, value_enum, default_value = "audio")]
        ring: RingArg,

        /// Requested capacity in frames (rounded up to a power of two)
        #[arg(long, default_value = "4096")]
        capacity: usize,

        /// Channel count
        #[arg(short, long, default_value = "2")]
        channels: u32,

        /// Sample format
        #[arg(short, long, value_enum, default_value = "f32")]
        format: FormatArg,

        /// Run time in seconds
        #[arg(short, long, default_value = "5")]
        seconds: u64,

        /// Maximum frames per read or write
        #[arg(long, default_value = "512")]
        max_chunk: usize,

        /// Lock ring memory with mlock
        #[arg(long)]
        lock_memory: bool,

        /// Seed for chunk sizes
        #[arg(long, default_value = "24301")]
        seed: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RingArg {
    Byte,
    Audio,
    Timestamped,
}

impl From<RingArg> for RingKind {
    fn from(arg: RingArg) -> Self {
        match arg {
            RingArg::Byte => RingKind::Byte,
            RingArg::Audio => RingKind::Audio,
            RingArg::Timestamped => RingKind::Timestamped,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    F32,
    F64,
    I16,
    I32,
}

impl From<FormatArg> for CommonPcmFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::F32 => CommonPcmFormat::Float32,
            FormatArg::F64 => CommonPcmFormat::Float64,
            FormatArg::I16 => CommonPcmFormat::Int16,
            FormatArg::I32 => CommonPcmFormat::Int32,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    match cli.command {
        Commands::Info {
            sample_rate,
            channels,
        } => show_format_info(sample_rate, channels)?,
        Commands::Stress {
            ring,
            capacity,
            channels,
            format,
            seconds,
            max_chunk,
            lock_memory,
            seed,
        } => {
            let config = StressConfig {
                ring: ring.into(),
                capacity_frames: capacity,
                channels,
                format: format.into(),
                duration: Duration::from_secs(seconds),
                max_chunk_frames: max_chunk,
                lock_memory,
                seed,
                ..StressConfig::default()
            };
            run_stress(&config)?;
        }
    }

    Ok(())
}

/// 显示常用格式的流描述
fn show_format_info(sample_rate: f64, channels: u32) -> anyhow::Result<()> {
    println!("=== PCM Stream Formats ({} Hz, {} ch) ===\n", sample_rate, channels);

    for format in CommonPcmFormat::ALL {
        for layout in [SampleLayout::Interleaved, SampleLayout::NonInterleaved] {
            let desc = StreamDescription::new(format, sample_rate, channels, layout);
            let planar = desc.non_interleaved_equivalent()?;

            println!("{:?} {:?}", format, layout);
            println!("  {}", desc);
            println!(
                "  {} stream(s), {} bytes/frame, {} bytes/sample",
                desc.channel_stream_count(),
                desc.bytes_per_frame,
                desc.sample_word_size()?
            );
            if layout == SampleLayout::Interleaved {
                println!("  planar: {}", planar);
            }
            println!();
        }
    }

    Ok(())
}

/// 运行压力测试，Ctrl+C 提前结束
fn run_stress(config: &StressConfig) -> anyhow::Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    let s = stop.clone();
    ctrlc::set_handler(move || {
        s.store(true, Ordering::SeqCst);
    })?;

    println!(
        "Running {} ring stress test for {:?}. Press Ctrl+C to stop.\n",
        config.ring, config.duration
    );

    let report = stress::run(config, &stop)?;
    println!("{}", report);

    if !report.is_clean() {
        anyhow::bail!("{} frames failed verification", report.mismatches);
    }
    Ok(())
}
