//! `periph`: exercise the transfer sessions and the SmartTimer.
//!
//! ```text
//! USAGE:
//!   periph run --mode bulk --samples 1024     One transfer, verified
//!   periph compare --samples 65536            Scalar vs bulk timing
//!   periph timer --period 200 --wraps 5       Wait for timer wraps
//!   periph fir --taps 8192,8192 1 2 3         Filter samples through the FIR
//!   periph regs                               Print the block map
//! ```
//!
//! Transfers run on the simulated platform. `timer --uio <node>` drives a
//! real SmartTimer through its UIO device.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use periph_chip::Block;
use periph_driver::sim::{SimCompletion, SimPlatform};
use periph_driver::{
    FirFilter, IrqPump, SessionConfig, SharedIrqLine, SmartTimer, StrategyKind, TransferSession,
    UioDevice,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "periph", about = "Peripheral transfer session exerciser", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Square a ramp of samples and verify the results.
    Run {
        /// Transfer strategy: scalar (mmio) or bulk (dma).
        #[arg(long, default_value = "bulk")]
        mode: StrategyKind,
        /// Number of samples.
        #[arg(long, default_value_t = 1024)]
        samples: usize,
        /// Collect timeout in milliseconds (default from PERIPH_TIMEOUT_MS).
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Simulated DMA completion latency in microseconds (0 = immediate).
        #[arg(long, default_value_t = 0)]
        latency_us: u64,
    },
    /// Time the same input through both strategies.
    Compare {
        /// Number of samples.
        #[arg(long, default_value_t = 65_536)]
        samples: usize,
        /// Repetitions per strategy.
        #[arg(long, default_value_t = 10)]
        runs: u32,
    },
    /// Configure the SmartTimer and wait for wrap interrupts.
    Timer {
        /// PERIOD register value.
        #[arg(long, default_value_t = 0xFF)]
        period: u32,
        /// DUTY register value.
        #[arg(long, default_value_t = 0xAA)]
        duty: u32,
        /// Number of wraps to wait for.
        #[arg(long, default_value_t = 5)]
        wraps: u32,
        /// Simulated wrap interval in milliseconds.
        #[arg(long, default_value_t = 50)]
        interval_ms: u64,
        /// UIO node of a real SmartTimer (e.g. /dev/uio0).
        #[arg(long)]
        uio: Option<PathBuf>,
    },
    /// Run samples through the simulated FIR filter.
    Fir {
        /// Q15 taps, comma separated (at most 4).
        #[arg(
            long,
            value_delimiter = ',',
            allow_negative_numbers = true,
            default_value = "32767"
        )]
        taps: Vec<i16>,
        /// Input samples (at most 32).
        #[arg(required = true, allow_negative_numbers = true)]
        samples: Vec<i16>,
    },
    /// Print the peripheral block map.
    Regs,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Run {
            mode,
            samples,
            timeout_ms,
            latency_us,
        } => cmd_run(mode, samples, timeout_ms, latency_us)?,
        Cmd::Compare { samples, runs } => cmd_compare(samples, runs)?,
        Cmd::Timer {
            period,
            duty,
            wraps,
            interval_ms,
            uio,
        } => cmd_timer(period, duty, wraps, Duration::from_millis(interval_ms), uio)?,
        Cmd::Fir { taps, samples } => cmd_fir(&taps, &samples)?,
        Cmd::Regs => cmd_regs(),
    }

    Ok(())
}

/// Deterministic input covering negative values and the i16 extremes.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn ramp(samples: usize) -> Vec<i16> {
    (0..samples)
        .map(|i| match i {
            0 => i16::MIN,
            1 => i16::MAX,
            _ => (i as u16).wrapping_mul(7919) as i16,
        })
        .collect()
}

fn verify(input: &[i16], output: &[i32]) -> Result<()> {
    if let Some((i, (x, y))) = input
        .iter()
        .zip(output)
        .enumerate()
        .find(|(_, (x, y))| i32::from(**x) * i32::from(**x) != **y)
    {
        bail!("sample {i}: {y} is not the square of {x}");
    }
    Ok(())
}

/// Submit, start and collect once; returns the elapsed time.
fn transfer(session: &TransferSession, input: &[i16], output: &mut [i32]) -> Result<Duration> {
    let t0 = Instant::now();
    session.submit_input(input)?;
    session.start()?;
    let n = session.read(output)?;
    let elapsed = t0.elapsed();
    if n != input.len() {
        bail!("collected {n} of {} samples", input.len());
    }
    Ok(elapsed)
}

fn cmd_run(
    mode: StrategyKind,
    samples: usize,
    timeout_ms: Option<u64>,
    latency_us: u64,
) -> Result<()> {
    let completion = if latency_us == 0 {
        SimCompletion::Immediate
    } else {
        SimCompletion::Deferred(Duration::from_micros(latency_us))
    };
    let mut config = SessionConfig::from_env().with_max_elements(samples.max(1));
    if let Some(ms) = timeout_ms {
        config = config.with_timeout(Duration::from_millis(ms));
    }

    let platform = SimPlatform::new(completion);
    let session = platform.open(mode, config)?;

    let input = ramp(samples);
    let mut output = vec![0i32; samples];
    let elapsed = transfer(&session, &input, &mut output)?;
    verify(&input, &output)?;

    println!("Mode        : {mode}");
    println!("Samples     : {samples}");
    println!("Elapsed     : {:.1} µs", elapsed.as_secs_f64() * 1e6);
    println!("Completions : {}", session.completions());
    println!(
        "Irq raised  : {} ({} spurious)",
        platform.line().raised(),
        platform.line().spurious()
    );
    println!("Result      : OK");
    Ok(())
}

fn cmd_compare(samples: usize, runs: u32) -> Result<()> {
    if runs == 0 {
        bail!("--runs must be at least 1");
    }
    let platform = SimPlatform::new(SimCompletion::Immediate);
    let config = SessionConfig::from_env().with_max_elements(samples.max(1));
    let input = ramp(samples);
    let mut output = vec![0i32; samples];

    let mut totals = Vec::with_capacity(2);
    for kind in [StrategyKind::Scalar, StrategyKind::Bulk] {
        let session = platform.open(kind, config.clone())?;
        let mut total = Duration::ZERO;
        for _ in 0..runs {
            total += transfer(&session, &input, &mut output)?;
            verify(&input, &output)?;
        }
        let mean = total / runs;
        println!(
            "{:<7} {samples} samples  mean {:.1} µs",
            kind.to_string(),
            mean.as_secs_f64() * 1e6
        );
        totals.push(mean);
    }

    let (scalar, bulk) = (totals[0], totals[1]);
    if !bulk.is_zero() {
        println!("speedup {:.2}×", scalar.as_secs_f64() / bulk.as_secs_f64());
    }
    Ok(())
}

fn cmd_timer(
    period: u32,
    duty: u32,
    wraps: u32,
    interval: Duration,
    uio: Option<PathBuf>,
) -> Result<()> {
    match uio {
        Some(path) => {
            let size = UioDevice::map_size(&path)
                .unwrap_or_else(|_| Block::SmartTimer.size());
            let device = UioDevice::open(&path, size)
                .with_context(|| format!("opening {}", path.display()))?;
            let line = SharedIrqLine::new(0);
            let mut timer = SmartTimer::new(device.registers())?;
            timer.attach(&line);
            let _pump = IrqPump::spawn(device, line)?;
            wait_wraps(&timer, period, duty, wraps, interval)
        }
        None => {
            let platform = SimPlatform::new(SimCompletion::Immediate);
            let mut timer = SmartTimer::new(platform.registers(Block::SmartTimer))?;
            timer.attach(platform.line());

            let stop = Arc::new(AtomicBool::new(false));
            let ticker = {
                let sim = platform.timer().clone();
                let stop = stop.clone();
                std::thread::Builder::new()
                    .name("sim-timer".into())
                    .spawn(move || {
                        while !stop.load(Ordering::Acquire) {
                            std::thread::sleep(interval);
                            sim.wrap();
                        }
                    })?
            };

            let result = wait_wraps(&timer, period, duty, wraps, interval);
            stop.store(true, Ordering::Release);
            if ticker.join().is_err() {
                tracing::error!("timer thread panicked");
            }
            result
        }
    }
}

fn wait_wraps(
    timer: &SmartTimer,
    period: u32,
    duty: u32,
    wraps: u32,
    interval: Duration,
) -> Result<()> {
    timer.configure(period, duty)?;
    timer.reset_counter();
    timer.enable();

    // Generous bound: a missed wrap shows up as a timeout, not a hang
    let timeout = (interval * 4).max(Duration::from_secs(1));
    let t0 = Instant::now();
    for _ in 0..wraps {
        let count = timer.wait_wrap(timeout)?;
        println!(
            "wrap {count:>4}  t={:>8.1} ms  period={} duty={}",
            t0.elapsed().as_secs_f64() * 1e3,
            timer.period(),
            timer.duty()
        );
    }
    timer.disable();
    Ok(())
}

fn cmd_fir(taps: &[i16], samples: &[i16]) -> Result<()> {
    let platform = SimPlatform::new(SimCompletion::Immediate);
    let mut filter = FirFilter::new(platform.registers(Block::Fir))?;
    filter.attach(platform.line());
    filter.set_taps(taps)?;

    let mut out = vec![0i16; samples.len()];
    let n = filter.filter(samples, &mut out, Duration::from_secs(1))?;
    println!("taps   {:?}", filter.taps());
    println!("input  {samples:?}");
    println!("output {:?}", &out[..n]);
    Ok(())
}

fn cmd_regs() {
    println!("Block       Base          Size    IRQ");
    for block in Block::ALL {
        println!(
            "{:<11} {:#012x}  {:>5}   {}",
            block.to_string(),
            block.typical_base(),
            block.size(),
            if block.has_irq() { "yes" } else { "no" }
        );
    }
}
