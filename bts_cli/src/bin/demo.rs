//! BTS codec demo
//!
//! Synthesises a gusty inflow box with a tower, writes it as a BTS file,
//! reads it back to measure the quantization error, then mirrors it in time
//! and runs the periodicity test on both the original and the extended box.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Result;

use bts_core::turbulence_box::{lateral_axis, time_axis, vertical_axis};
use bts_core::{read_header, PeriodicityTolerance, TurbulenceBox, VectorField};

// ── constants ──────────────────────────────────────────────────────────────

const NT: usize = 2400;
const NY: usize = 25;
const NZ: usize = 25;
const N_TWR: usize = 8;
const DT: f64 = 0.05;
const SPACING: f64 = 5.0;
const Z_BOTTOM: f64 = 30.0;
const U_REF: f64 = 11.4;
const SHEAR_EXPONENT: f64 = 0.14;

// ── data generator ─────────────────────────────────────────────────────────

/// Deterministic LCG noise in [-1, 1). The same seed always gives the same box.
struct Lcg(u64);

impl Lcg {
    fn next_f64(&mut self) -> f64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((self.0 >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
    }
}

/// Power-law shear profile plus slow gusts and white noise.
fn generate_box() -> Result<TurbulenceBox> {
    let z = vertical_axis(NZ, SPACING, Z_BOTTOM);
    let z_ref = z[NZ / 2];
    let mut rng = Lcg(0x5eed);
    let u = VectorField::from_fn(NT, NY, NZ, |k, it, iy, iz| {
        let t = it as f64 * DT;
        let gust = (t * 0.35 + iy as f64 * 0.2).sin() + 0.5 * (t * 1.1 + iz as f64 * 0.3).cos();
        let noise = rng.next_f64();
        match k {
            0 => U_REF * (z[iz] / z_ref).powf(SHEAR_EXPONENT) + 1.2 * gust + 0.15 * noise,
            1 => 0.8 * gust + 0.4 * noise,
            _ => 0.3 * gust + 0.25 * noise,
        }
    });
    let tower = VectorField::from_fn(NT, N_TWR, 1, |k, it, ip, _| {
        let t = it as f64 * DT;
        let base = if k == 0 { U_REF * 0.7 } else { 0.0 };
        base + 0.3 * (t * 0.5 + ip as f64).sin() * (N_TWR - ip) as f64 / N_TWR as f64
    });

    let mut b = TurbulenceBox::new(u, lateral_axis(NY, SPACING), z, time_axis(NT, DT))?
        .with_tower(tower)?;
    b.info = "bts-demo: synthetic shear + gusts".to_string();
    Ok(b)
}

// ── timing ─────────────────────────────────────────────────────────────────

fn human_bytes(n: u64) -> String {
    const U: &[&str] = &["B", "KB", "MB", "GB"];
    let mut v = n as f64;
    let mut u = 0;
    while v >= 1024.0 && u < U.len() - 1 {
        v /= 1024.0;
        u += 1;
    }
    if u == 0 { format!("{n} B") } else { format!("{v:.2} {}", U[u]) }
}

fn fmt_duration(d: Duration) -> String {
    let ms = d.as_secs_f64() * 1000.0;
    if ms < 1.0 {
        format!("{:.1} µs", ms * 1000.0)
    } else if ms < 1000.0 {
        format!("{ms:.1} ms")
    } else {
        format!("{:.2} s", d.as_secs_f64())
    }
}

fn timed<T>(f: impl FnOnce() -> Result<T>) -> Result<(T, Duration)> {
    let t0 = Instant::now();
    let v = f()?;
    Ok((v, t0.elapsed()))
}

// ── report helpers ─────────────────────────────────────────────────────────

fn max_error(a: &VectorField, b: &VectorField, k: usize) -> f64 {
    a.as_slice()
        .iter()
        .zip(b.as_slice())
        .skip(k)
        .step_by(3)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

fn report_error(original: &TurbulenceBox, path: &Path) -> Result<()> {
    let decoded = TurbulenceBox::read(path)?;
    let quant = read_header(path)?.quantization();
    println!("  {:<10} {:>12}  {:>12}  {:>12}", "component", "grid error", "tower error", "step");
    println!("  {}", "─".repeat(52));
    for (k, name) in ["u", "v", "w"].iter().enumerate() {
        println!(
            "  {:<10} {:>12.3e}  {:>12.3e}  {:>12.3e}",
            name,
            max_error(&original.u, &decoded.u, k),
            max_error(&original.u_twr, &decoded.u_twr, k),
            quant.step(k)
        );
    }
    Ok(())
}

// ── main ───────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let out_dir = std::env::temp_dir().join("bts_demo");
    std::fs::create_dir_all(&out_dir)?;
    let box_path = out_dir.join("inflow.bts");
    let periodic_path = out_dir.join("inflow_periodic.bts");

    println!();
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║          BTS — TurbSim binary turbulence box  ·  Demo           ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    let (b, gen_time) = timed(generate_box)?;
    println!("  grid           : {NY} (y) x {NZ} (z), {NT} steps, {N_TWR} tower points");
    println!("  samples        : {}", 3 * NT * (NY * NZ + N_TWR));
    println!("  generated in   : {}", fmt_duration(gen_time));
    println!();

    // ── 1. encode / decode ─────────────────────────────────────────────────
    println!("  [1] Encode and decode");
    let (written, enc_time) = timed(|| Ok(b.write(&box_path)?))?;
    let (decoded, dec_time) = timed(|| Ok(TurbulenceBox::read(&box_path)?))?;
    println!("  file           : {}", box_path.display());
    println!("  size           : {}", human_bytes(written));
    println!("  encode         : {}", fmt_duration(enc_time));
    println!("  decode         : {}", fmt_duration(dec_time));
    let hub = decoded.hub_values()?;
    println!("  hub            : z {:.2} m, u {:.3} m/s", hub.z_hub, hub.u_hub);
    println!();
    report_error(&b, &box_path)?;
    println!();

    // ── 2. periodic extension ──────────────────────────────────────────────
    println!("  [2] Periodic extension");
    let tol = PeriodicityTolerance::default();
    let before = decoded.check_periodic(tol);
    let mut periodic = decoded;
    let (_, ext_time) = timed(|| Ok(periodic.make_periodic()?))?;
    let after = periodic.check_periodic(tol);
    let written = periodic.write(&periodic_path)?;

    println!(
        "  {:<14} {:>8}  {:>14}  {:>12}  {:>9}",
        "", "steps", "max |du|/sig", "mean |du|", "periodic"
    );
    println!("  {}", "─".repeat(64));
    println!(
        "  {:<14} {:>8}  {:>14.4}  {:>12.4}  {:>9}",
        "original", NT, before.max_rel_sigma, before.mean_abs_diff, before.periodic
    );
    println!(
        "  {:<14} {:>8}  {:>14.4}  {:>12.4}  {:>9}",
        "mirrored",
        periodic.nt(),
        after.max_rel_sigma,
        after.mean_abs_diff,
        after.periodic
    );
    println!();
    println!("  extension      : {}", fmt_duration(ext_time));
    println!("  periodic file  : {} ({})", periodic_path.display(), human_bytes(written));
    println!("  format id      : {}", read_header(&periodic_path)?.format_id);
    println!();

    Ok(())
}
