use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use rayon::prelude::*;
use tracing::debug;

use crate::error::BtsError;
use crate::format::{BtsHeader, SAMPLE_SIZE};
use crate::quant::Quantization;
use crate::turbulence_box::{spacing, TurbulenceBox};

/// Time steps quantized together before being written out.
const STEPS_PER_BATCH: usize = 64;

/// Encode `b` into a BTS file at `path`, replacing any existing file.
///
/// # Write sequence
/// ```text
/// validate box, fit scale/offset over grid + tower   ← nothing touches disk yet
/// [HEADER: 70 bytes + info]
/// [STEP 0: grid block, tower block] ... [STEP nt-1]
/// ```
///
/// Returns the number of bytes written.
pub fn write(b: &TurbulenceBox, path: impl AsRef<Path>) -> Result<u64, BtsError> {
    let (header, quant) = prepare(b)?;
    let mut dst = BufWriter::new(File::create(path)?);
    let written = write_prepared(b, &header, &quant, &mut dst)?;
    dst.flush()?;
    Ok(written)
}

/// Encode `b` into any writer. Returns the number of bytes written.
pub fn write_to<W: Write>(b: &TurbulenceBox, mut dst: W) -> Result<u64, BtsError> {
    let (header, quant) = prepare(b)?;
    let written = write_prepared(b, &header, &quant, &mut dst)?;
    dst.flush()?;
    Ok(written)
}

/// Build the header that `write` would emit for `b`, scale/offset included.
pub fn encode_header(b: &TurbulenceBox) -> Result<BtsHeader, BtsError> {
    prepare(b).map(|(header, _)| header)
}

impl TurbulenceBox {
    /// Encode into a BTS file; see [`write`].
    pub fn write(&self, path: impl AsRef<Path>) -> Result<u64, BtsError> {
        write(self, path)
    }
}

fn prepare(b: &TurbulenceBox) -> Result<(BtsHeader, Quantization), BtsError> {
    b.validate()?;
    // Complete min/max pass before any sample is quantized.
    let quant = Quantization::fit(&b.u, &b.u_twr);
    let hub = b.hub_values()?;

    let header = BtsHeader {
        format_id: b.format_id,
        nz: b.nz(),
        ny: b.ny(),
        n_twr: b.n_twr(),
        nt: b.nt(),
        dz: spacing(&b.z) as f32,
        dy: spacing(&b.y) as f32,
        dt: spacing(&b.t) as f32,
        u_hub: hub.u_hub as f32,
        z_hub: hub.z_hub as f32,
        z_bottom: b.z.first().copied().unwrap_or(0.0) as f32,
        scale: quant.scale,
        offset: quant.offset,
        info: b.info.clone(),
    };
    if let Some(msg) = header.dimension_error() {
        return Err(BtsError::invariant(msg));
    }
    debug!(
        scale = ?quant.scale,
        offset = ?quant.offset,
        z_hub_stored = hub.z_hub_stored,
        u_hub_stored = hub.u_hub_stored,
        "fitted quantization"
    );
    Ok((header, quant))
}

fn write_prepared<W: Write>(
    b: &TurbulenceBox,
    header: &BtsHeader,
    quant: &Quantization,
    dst: &mut W,
) -> Result<u64, BtsError> {
    let head = header.to_bytes()?;
    dst.write_all(&head)?;

    let grid_bytes = header.grid_samples_per_step() * SAMPLE_SIZE;
    let step_bytes = grid_bytes + header.tower_samples_per_step() * SAMPLE_SIZE;
    let nt = header.nt;
    let mut written = head.len() as u64;
    if step_bytes == 0 {
        return Ok(written);
    }

    let mut batch = vec![0u8; step_bytes * STEPS_PER_BATCH.min(nt)];
    for start in (0..nt).step_by(STEPS_PER_BATCH) {
        let end = (start + STEPS_PER_BATCH).min(nt);
        let buf = &mut batch[..(end - start) * step_bytes];
        // Steps are independent once the coefficients are known.
        buf.par_chunks_mut(step_bytes)
            .enumerate()
            .try_for_each(|(i, out)| {
                let it = start + i;
                let (grid, tower) = out.split_at_mut(grid_bytes);
                quant.quantize_block(b.u.step(it), grid)?;
                quant.quantize_block(b.u_twr.step(it), tower)
            })?;
        dst.write_all(buf)?;
        written += buf.len() as u64;
    }

    debug!(nt, bytes = written, "encoded BTS stream");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::VectorField;
    use crate::format::{FIXED_HEADER_SIZE, FORMAT_STANDARD};
    use crate::turbulence_box::{lateral_axis, time_axis, vertical_axis};

    fn gusty_box(nt: usize, ny: usize, nz: usize) -> TurbulenceBox {
        let u = VectorField::from_fn(nt, ny, nz, |k, it, iy, iz| {
            let phase = it as f64 * 0.21 + iy as f64 * 0.7 + iz as f64 * 1.3;
            match k {
                0 => 9.0 + 2.0 * phase.sin(),
                1 => 0.8 * (phase * 1.7).cos(),
                _ => -0.4 + 0.3 * (phase * 0.5).sin(),
            }
        });
        TurbulenceBox::new(
            u,
            lateral_axis(ny, 4.0),
            vertical_axis(nz, 4.0, 70.0),
            time_axis(nt, 0.05),
        )
        .unwrap()
    }

    #[test]
    fn stream_length_matches_layout() {
        let b = gusty_box(7, 3, 4).with_tower(VectorField::tower(7, 2)).unwrap();
        let mut out = Vec::new();
        let n = write_to(&b, &mut out).unwrap();
        assert_eq!(n as usize, out.len());
        // 70-byte header, empty info, 7 steps of (36 grid + 6 tower) samples
        assert_eq!(out.len(), FIXED_HEADER_SIZE + 7 * (36 + 6) * 2);
    }

    #[test]
    fn header_carries_axes_and_hub() {
        let mut b = gusty_box(5, 3, 5);
        b.info = "gust".into();
        let h = encode_header(&b).unwrap();
        assert_eq!(h.format_id, FORMAT_STANDARD);
        assert_eq!((h.nt, h.ny, h.nz, h.n_twr), (5, 3, 5, 0));
        assert_eq!((h.dy, h.dz, h.dt), (4.0, 4.0, 0.05));
        assert_eq!(h.z_bottom, 70.0);
        // derived: nearest z to the midpoint 78
        assert_eq!(h.z_hub, 78.0);
        assert_eq!(h.info, "gust");
    }

    #[test]
    fn stored_samples_span_the_integer_range() {
        let b = gusty_box(30, 4, 4);
        let mut out = Vec::new();
        write_to(&b, &mut out).unwrap();
        let samples: Vec<i16> = out[FIXED_HEADER_SIZE..]
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        for k in 0..3 {
            let comp = samples.iter().skip(k).step_by(3);
            assert_eq!(comp.clone().min(), Some(&i16::MIN), "component {k}");
            assert_eq!(comp.max(), Some(&i16::MAX), "component {k}");
        }
    }

    #[test]
    fn batches_cover_every_step() {
        // more steps than one batch, with a partial final batch
        let b = gusty_box(STEPS_PER_BATCH * 2 + 5, 2, 2);
        let mut out = Vec::new();
        write_to(&b, &mut out).unwrap();
        let back = crate::reader::read_from(out.as_slice()).unwrap();
        assert_eq!(back.nt(), b.nt());
        let last = b.nt() - 1;
        assert!((back.u.get(0, last, 1, 1) - b.u.get(0, last, 1, 1)).abs() < 1e-3);
    }

    #[test]
    fn grid_without_time_steps_is_rejected() {
        let mut b = TurbulenceBox::new(
            VectorField::zeros(0, 2, 2),
            lateral_axis(2, 1.0),
            vertical_axis(2, 1.0, 10.0),
            Vec::new(),
        )
        .unwrap();
        b.z_hub = Some(10.5);
        b.u_hub = Some(8.0);
        let err = write_to(&b, Vec::new()).unwrap_err();
        assert!(
            matches!(err, BtsError::Invariant(ref m) if m.contains("without time steps")),
            "got {err:?}"
        );
    }

    #[test]
    fn invalid_box_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.bts");
        let mut b = gusty_box(4, 2, 2);
        b.t.pop();
        let err = write(&b, &path).unwrap_err();
        assert!(matches!(err, BtsError::Invariant(_)), "got {err:?}");
        assert!(!path.exists());
    }
}
