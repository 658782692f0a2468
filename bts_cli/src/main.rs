use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;
use xxhash_rust::xxh3::Xxh3;

use bts_core::format::COMPONENTS;
use bts_core::{
    payload_offset, read_header, PeriodicityCheck, PeriodicityTolerance, TurbulenceBox,
    FORMAT_PERIODIC,
};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "bts",
    about = "TurbSim binary turbulence boxes: inspect, round-trip, and make periodic",
    version
)]
struct Cli {
    /// Log filter used when RUST_LOG is unset (e.g. "debug", "bts_core=debug")
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print header fields, axes, hub values, and per-component ranges
    Inspect {
        /// BTS file to inspect
        file: PathBuf,
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
        /// Add an xxh3-64 fingerprint of the sample payload (header excluded)
        #[arg(long)]
        digest: bool,
    },
    /// Test whether the streamwise component wraps around smoothly
    ///
    /// Exits with an error when the box is not periodic.
    Check {
        /// BTS file to check
        file: PathBuf,
        #[command(flatten)]
        tol: TolArgs,
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Mirror a box in time so that it repeats seamlessly
    Periodic {
        /// Source BTS file
        input: PathBuf,
        /// Destination BTS file
        output: PathBuf,
        #[command(flatten)]
        tol: TolArgs,
    },
    /// Decode and re-encode a box, reporting the re-quantization error
    Roundtrip {
        /// Source BTS file
        input: PathBuf,
        /// Destination BTS file
        output: PathBuf,
    },
}

#[derive(clap::Args)]
struct TolArgs {
    /// Bound on the seam jump relative to the temporal standard deviation
    #[arg(long, default_value_t = 1.5)]
    sigma_tol: f64,
    /// Bound on the grid-averaged seam jump [m/s]
    #[arg(long, default_value_t = 0.5)]
    abs_tol: f64,
}

impl From<&TolArgs> for PeriodicityTolerance {
    fn from(a: &TolArgs) -> Self {
        Self {
            sigma: a.sigma_tol,
            abs: a.abs_tol,
        }
    }
}

// ── Helpers ────────────────────────────────────────────────────────────────

const COMPONENT_NAMES: [&str; COMPONENTS] = ["u", "v", "w"];

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

fn load(path: &Path) -> anyhow::Result<TurbulenceBox> {
    let t0 = Instant::now();
    let b = TurbulenceBox::read(path).with_context(|| format!("reading {:?}", path))?;
    let elapsed_ms = t0.elapsed().as_millis() as u64;
    info!(path = %path.display(), nt = b.nt(), elapsed_ms, "decoded box");
    Ok(b)
}

fn save(b: &TurbulenceBox, path: &Path) -> anyhow::Result<u64> {
    let t0 = Instant::now();
    let written = b.write(path).with_context(|| format!("writing {:?}", path))?;
    let elapsed_ms = t0.elapsed().as_millis() as u64;
    info!(path = %path.display(), bytes = written, elapsed_ms, "encoded box");
    Ok(written)
}

/// xxh3-64 over everything after the header, so boxes that differ only in
/// their info string hash the same.
fn payload_digest(path: &Path) -> anyhow::Result<u64> {
    let start = payload_offset(path).with_context(|| format!("locating samples in {:?}", path))?;
    let file = File::open(path).with_context(|| format!("opening {:?}", path))?;
    let mut src = BufReader::new(file);
    src.seek(SeekFrom::Start(start))?;
    let mut hasher = Xxh3::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = src.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.digest())
}

fn axis_span(axis: &[f64]) -> String {
    match (axis.first(), axis.last()) {
        (Some(a), Some(b)) => format!("[{:.3} ... {:.3}], n: {}", a, b, axis.len()),
        _ => "(empty)".to_string(),
    }
}

fn print_check(check: &PeriodicityCheck, tol: &PeriodicityTolerance) {
    println!(
        "  periodic       : {}",
        if check.periodic { "yes" } else { "no" }
    );
    println!(
        "  max |du|/sigma : {:.4} (tolerance {})",
        check.max_rel_sigma, tol.sigma
    );
    println!(
        "  mean |du|      : {:.4} m/s (tolerance {})",
        check.mean_abs_diff, tol.abs
    );
    if check.zero_variance_points > 0 {
        println!("  constant points: {} (left out of max)", check.zero_variance_points);
    }
}

// ── Subcommand implementations ─────────────────────────────────────────────

fn run_inspect(file: PathBuf, as_json: bool, with_digest: bool) -> anyhow::Result<()> {
    let header = read_header(&file).with_context(|| format!("reading header of {:?}", file))?;
    let b = load(&file)?;
    let hub = b.hub_values()?;
    let file_size = std::fs::metadata(&file)?.len();
    let digest = if with_digest {
        Some(payload_digest(&file)?)
    } else {
        None
    };
    let ranges: Vec<Option<(f64, f64)>> = (0..COMPONENTS).map(|k| b.u.component_range(k)).collect();
    let mid = b.mid_indices().map(|(iy, iz)| {
        let u_mid = b.u.time_series(0, iy, iz).sum::<f64>() / b.nt().max(1) as f64;
        (iy, iz, b.y[iy], b.z[iz], u_mid)
    });

    if as_json {
        let report = json!({
            "file": file,
            "file_size": file_size,
            "header": header,
            "hub": hub,
            "ranges": ranges,
            "mid": mid.map(|(iy, iz, y, z, u)| {
                json!({"iy": iy, "iz": iz, "y": y, "z": z, "u_mean": u})
            }),
            "digest": digest.map(|d| format!("{:016x}", d)),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("=== BTS File: {:?} ===", file);
    println!();
    let kind = if header.format_id == FORMAT_PERIODIC { "periodic" } else { "standard" };
    println!("  format id      : {} ({})", header.format_id, kind);
    println!("  grid           : {} (y) x {} (z), {} steps", b.ny(), b.nz(), b.nt());
    println!("  tower points   : {}", b.n_twr());
    println!("  y              : {},  dy: {}", axis_span(&b.y), header.dy);
    println!("  z              : {},  dz: {}", axis_span(&b.z), header.dz);
    println!("  t              : {},  dt: {}", axis_span(&b.t), header.dt);
    if b.n_twr() > 0 {
        println!("  zTwr           : {}", axis_span(&b.z_twr));
    }
    let tag = |stored: bool| if stored { "stored" } else { "derived" };
    println!("  zHub           : {:.3} ({})", hub.z_hub, tag(hub.z_hub_stored));
    println!("  uHub           : {:.3} ({})", hub.u_hub, tag(hub.u_hub_stored));
    if let Some((iy, iz, y, z, u_mid)) = mid {
        println!(
            "  mid point      : y={:.3} z={:.3} (iy={}, iz={}), mean u {:.3} (nearest neighbour)",
            y, z, iy, iz, u_mid
        );
    }
    for k in 0..COMPONENTS {
        let range = match ranges[k] {
            Some((lo, hi)) => format!("min {:>9.4}  max {:>9.4}", lo, hi),
            None => "(no samples)".to_string(),
        };
        println!(
            "  {}              : {}  scale {:>11.4}  offset {:>12.4}",
            COMPONENT_NAMES[k], range, header.scale[k], header.offset[k]
        );
    }
    println!("  info           : {}", header.info);
    println!("  file on disk   : {}", human_bytes(file_size));
    if let Some(d) = digest {
        println!("  payload xxh3   : {:016x}", d);
    }
    Ok(())
}

fn run_check(file: PathBuf, tol: PeriodicityTolerance, as_json: bool) -> anyhow::Result<()> {
    let b = load(&file)?;
    let check = b.check_periodic(tol);

    if as_json {
        println!("{}", serde_json::to_string_pretty(&json!({ "tolerance": tol, "check": check }))?);
    } else {
        println!("=== Periodicity: {:?} ===", file);
        print_check(&check, &tol);
    }

    if !check.periodic {
        anyhow::bail!("{:?} is not periodic", file);
    }
    Ok(())
}

fn run_periodic(input: PathBuf, output: PathBuf, tol: PeriodicityTolerance) -> anyhow::Result<()> {
    let mut b = load(&input)?;
    let nt0 = b.nt();
    b.make_periodic().with_context(|| format!("extending {:?}", input))?;
    let written = save(&b, &output)?;

    eprintln!("  time steps  : {} -> {}", nt0, b.nt());
    eprintln!("  duration    : {:.3} s", b.t.last().copied().unwrap_or(0.0));
    eprintln!("  written     : {}", human_bytes(written));
    print_check(&b.check_periodic(tol), &tol);
    Ok(())
}

fn run_roundtrip(input: PathBuf, output: PathBuf) -> anyhow::Result<()> {
    let original = load(&input)?;
    let t0 = Instant::now();
    let written = save(&original, &output)?;
    let elapsed = t0.elapsed();
    let header = read_header(&output)?;
    let decoded = load(&output)?;
    let quant = header.quantization();

    eprintln!("  written     : {}", human_bytes(written));
    eprintln!(
        "  throughput  : {}/s",
        human_bytes((written as f64 / elapsed.as_secs_f64().max(1e-9)) as u64)
    );
    for k in 0..COMPONENTS {
        let err = |a: &[f64], b: &[f64]| {
            a.iter()
                .zip(b)
                .skip(k)
                .step_by(COMPONENTS)
                .map(|(x, y)| (x - y).abs())
                .fold(0.0, f64::max)
        };
        let grid = err(original.u.as_slice(), decoded.u.as_slice());
        let tower = err(original.u_twr.as_slice(), decoded.u_twr.as_slice());
        let step = quant.step(k);
        println!(
            "  {}: max error grid {:.3e}, tower {:.3e}, step {:.3e}{}",
            COMPONENT_NAMES[k],
            grid,
            tower,
            step,
            if grid.max(tower) > step { "  (exceeds step)" } else { "" }
        );
    }
    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { file, json, digest } => run_inspect(file, json, digest),
        Commands::Check { file, tol, json } => run_check(file, (&tol).into(), json),
        Commands::Periodic { input, output, tol } => run_periodic(input, output, (&tol).into()),
        Commands::Roundtrip { input, output } => run_roundtrip(input, output),
    }
}
