use serde::Serialize;

use crate::error::BtsError;
use crate::quant::Quantization;

/// Size of the fixed part of a BTS header in bytes.
///   format_id:i16 + nz,ny,n_twr,nt:i32 + dz,dy,dt,u_hub,z_hub,z_bottom:f32
///   + (scale,offset)x3:f32 + info_len:i32
///   = 2 + 16 + 24 + 24 + 4 = 70
pub const FIXED_HEADER_SIZE: usize = 70;

/// Number of velocity components per sample (streamwise u, lateral v, vertical w).
pub const COMPONENTS: usize = 3;

/// Size of one stored sample in bytes.
pub const SAMPLE_SIZE: usize = 2;

// ── Format tags ─────────────────────────────────────────────────────────────

/// Standard (non-periodic) turbulence box.
pub const FORMAT_STANDARD: i16 = 7;

/// Periodic turbulence box.
pub const FORMAT_PERIODIC: i16 = 8;

// ── Quantization range ──────────────────────────────────────────────────────

/// Lowest stored integer.
pub const INT_MIN: f64 = -32768.0;

/// Width of the stored integer range (`i16::MAX - i16::MIN`).
pub const INT_RANGE: f64 = 65535.0;

// ── Header ─────────────────────────────────────────────────────────────────

/// Decoded representation of a BTS header, including the trailing info string.
///
/// Grid sizes are held as `usize`; they are stored on disk as `i32` and
/// rejected on decode when negative.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BtsHeader {
    pub format_id: i16,
    pub nz: usize,
    pub ny: usize,
    pub n_twr: usize,
    pub nt: usize,
    pub dz: f32,
    pub dy: f32,
    pub dt: f32,
    /// Reference wind speed. Advisory only.
    pub u_hub: f32,
    /// Reference height. Advisory only.
    pub z_hub: f32,
    /// z-coordinate of the lowest grid row.
    pub z_bottom: f32,
    pub scale: [f32; COMPONENTS],
    pub offset: [f32; COMPONENTS],
    pub info: String,
}

impl BtsHeader {
    /// Serialize the fixed part plus the info string.
    pub fn to_bytes(&self) -> Result<Vec<u8>, BtsError> {
        let info = self.info.as_bytes();
        let mut buf = Vec::with_capacity(FIXED_HEADER_SIZE + info.len());
        buf.extend_from_slice(&self.format_id.to_le_bytes());
        for (name, n) in [("nz", self.nz), ("ny", self.ny), ("nTwr", self.n_twr), ("nt", self.nt)] {
            buf.extend_from_slice(&to_i32(name, n)?.to_le_bytes());
        }
        for v in [self.dz, self.dy, self.dt, self.u_hub, self.z_hub, self.z_bottom] {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        // scale and offset are interleaved per component
        for k in 0..COMPONENTS {
            buf.extend_from_slice(&self.scale[k].to_le_bytes());
            buf.extend_from_slice(&self.offset[k].to_le_bytes());
        }
        buf.extend_from_slice(&to_i32("info length", info.len())?.to_le_bytes());
        buf.extend_from_slice(info);
        Ok(buf)
    }

    /// Deserialize the fixed part of the header.
    ///
    /// Returns the header with an empty `info` and the declared info length;
    /// the caller reads that many bytes next and fills `info` in.
    pub fn from_fixed_bytes(buf: &[u8; FIXED_HEADER_SIZE]) -> Result<(Self, usize), BtsError> {
        let format_id = i16::from_le_bytes([buf[0], buf[1]]);
        let nz = from_i32("nz", le_i32(buf, 2))?;
        let ny = from_i32("ny", le_i32(buf, 6))?;
        let n_twr = from_i32("nTwr", le_i32(buf, 10))?;
        let nt = from_i32("nt", le_i32(buf, 14))?;

        let mut scale = [0f32; COMPONENTS];
        let mut offset = [0f32; COMPONENTS];
        for k in 0..COMPONENTS {
            scale[k] = le_f32(buf, 42 + 8 * k);
            offset[k] = le_f32(buf, 46 + 8 * k);
        }
        let info_len = from_i32("info length", le_i32(buf, 66))?;

        let header = Self {
            format_id,
            nz,
            ny,
            n_twr,
            nt,
            dz: le_f32(buf, 18),
            dy: le_f32(buf, 22),
            dt: le_f32(buf, 26),
            u_hub: le_f32(buf, 30),
            z_hub: le_f32(buf, 34),
            z_bottom: le_f32(buf, 38),
            scale,
            offset,
            info: String::new(),
        };
        Ok((header, info_len))
    }

    /// Reason the declared sizes cannot describe a stored box, if any.
    ///
    /// Every declared point has to be backed by samples in the payload: the
    /// grid has both or neither of `ny`, `nz`, time steps carry at least one
    /// sample, and grid or tower points come with at least one time step.
    pub fn dimension_error(&self) -> Option<String> {
        let (ny, nz, n_twr, nt) = (self.ny, self.nz, self.n_twr, self.nt);
        if (ny == 0) != (nz == 0) {
            return Some(format!("grid of {ny} x {nz} points has an empty dimension"));
        }
        let points = ny > 0 || n_twr > 0;
        if nt > 0 && !points {
            return Some(format!("{nt} time steps declared without grid or tower points"));
        }
        if nt == 0 && points {
            return Some(format!(
                "{ny} x {nz} grid and {n_twr} tower points declared without time steps"
            ));
        }
        None
    }

    /// Total header length on disk, info string included.
    pub fn encoded_len(&self) -> usize {
        FIXED_HEADER_SIZE + self.info.len()
    }

    /// Grid samples (all components) stored per time step.
    pub fn grid_samples_per_step(&self) -> usize {
        COMPONENTS * self.ny * self.nz
    }

    /// Tower samples (all components) stored per time step.
    pub fn tower_samples_per_step(&self) -> usize {
        COMPONENTS * self.n_twr
    }

    /// Bytes of sample data following the header, or `None` if the declared
    /// sizes overflow `u64`.
    pub fn payload_len(&self) -> Option<u64> {
        let grid = (self.ny as u64).checked_mul(self.nz as u64)?;
        let per_step = grid
            .checked_add(self.n_twr as u64)?
            .checked_mul((COMPONENTS * SAMPLE_SIZE) as u64)?;
        per_step.checked_mul(self.nt as u64)
    }

    /// De-quantization coefficients carried by this header.
    pub fn quantization(&self) -> Quantization {
        Quantization {
            scale: self.scale,
            offset: self.offset,
        }
    }
}

fn le_i32(buf: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn le_f32(buf: &[u8], at: usize) -> f32 {
    f32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn from_i32(name: &str, v: i32) -> Result<usize, BtsError> {
    usize::try_from(v).map_err(|_| BtsError::format(format!("negative {name} in header: {v}")))
}

fn to_i32(name: &str, v: usize) -> Result<i32, BtsError> {
    i32::try_from(v).map_err(|_| {
        BtsError::invariant(format!("{name} = {v} does not fit in a 32-bit header field"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> BtsHeader {
        BtsHeader {
            format_id: FORMAT_STANDARD,
            nz: 4,
            ny: 5,
            n_twr: 2,
            nt: 10,
            dz: 2.5,
            dy: 3.0,
            dt: 0.05,
            u_hub: 11.4,
            z_hub: 90.0,
            z_bottom: 82.5,
            scale: [100.0, 200.0, 300.0],
            offset: [-1.0, -2.0, -3.0],
            info: "synthetic box".to_string(),
        }
    }

    #[test]
    fn layout_is_little_endian_and_interleaved() {
        let bytes = sample_header().to_bytes().unwrap();
        assert_eq!(bytes.len(), FIXED_HEADER_SIZE + "synthetic box".len());
        assert_eq!(&bytes[0..2], &7i16.to_le_bytes());
        assert_eq!(&bytes[2..6], &4i32.to_le_bytes());
        assert_eq!(&bytes[14..18], &10i32.to_le_bytes());
        assert_eq!(&bytes[38..42], &82.5f32.to_le_bytes());
        // scale_u, offset_u, scale_v, ...
        assert_eq!(&bytes[42..46], &100f32.to_le_bytes());
        assert_eq!(&bytes[46..50], &(-1f32).to_le_bytes());
        assert_eq!(&bytes[50..54], &200f32.to_le_bytes());
        assert_eq!(&bytes[66..70], &13i32.to_le_bytes());
        assert_eq!(&bytes[70..], b"synthetic box");
    }

    #[test]
    fn fixed_part_decodes_back() {
        let original = sample_header();
        let bytes = original.to_bytes().unwrap();
        let fixed: [u8; FIXED_HEADER_SIZE] = bytes[..FIXED_HEADER_SIZE].try_into().unwrap();
        let (decoded, info_len) = BtsHeader::from_fixed_bytes(&fixed).unwrap();
        assert_eq!(info_len, 13);
        assert_eq!(decoded.info, "");
        assert_eq!(decoded, BtsHeader { info: String::new(), ..original });
    }

    #[test]
    fn negative_dimension_is_format_error() {
        let mut fixed: [u8; FIXED_HEADER_SIZE] =
            sample_header().to_bytes().unwrap()[..FIXED_HEADER_SIZE].try_into().unwrap();
        fixed[6..10].copy_from_slice(&(-3i32).to_le_bytes());
        let err = BtsHeader::from_fixed_bytes(&fixed).unwrap_err();
        assert!(matches!(err, BtsError::Format(_)), "got {err:?}");
    }

    #[test]
    fn payload_len_counts_grid_and_tower() {
        let h = sample_header();
        // (3*5*4 + 3*2) samples * 2 bytes * 10 steps
        assert_eq!(h.payload_len(), Some(((60 + 6) * 2 * 10) as u64));
        assert_eq!(h.grid_samples_per_step(), 60);
        assert_eq!(h.tower_samples_per_step(), 6);
    }
}
