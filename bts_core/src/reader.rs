use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use tracing::{debug, warn};

use crate::error::BtsError;
use crate::field::VectorField;
use crate::format::{BtsHeader, FIXED_HEADER_SIZE, SAMPLE_SIZE};
use crate::turbulence_box::TurbulenceBox;

/// Decode a BTS file.
///
/// # Read sequence
/// 1. Reject a missing path ([`BtsError::NotFound`]) or a zero-length file
///    ([`BtsError::EmptyInput`]) before parsing anything.
/// 2. Decode the 70-byte fixed header and the info string, rejecting sizes
///    that declare points without samples.
/// 3. Check the file length against the declared payload so a corrupt header
///    fails here instead of allocating a field it cannot fill.
/// 4. Stream `nt` time steps, each a grid block then a tower block, through
///    one scratch buffer, de-quantizing straight into the field.
///
/// The file handle is dropped on every exit path.
pub fn read(path: impl AsRef<Path>) -> Result<TurbulenceBox, BtsError> {
    let path = path.as_ref();
    let (file, file_len) = open_checked(path)?;
    let mut src = BufReader::new(file);

    let (header, header_len) = decode_header(&mut src)?;
    let expected = header
        .payload_len()
        .and_then(|p| p.checked_add(header_len as u64))
        .ok_or_else(|| BtsError::format("declared grid sizes overflow"))?;
    if file_len < expected {
        return Err(BtsError::format(format!(
            "file holds {file_len} bytes but its header declares {expected}"
        )));
    }
    if file_len > expected {
        warn!(
            path = %path.display(),
            trailing = file_len - expected,
            "ignoring bytes after the last time step"
        );
    }

    read_samples(&mut src, header)
}

/// Decode a BTS stream from any reader.
///
/// Unlike [`read`] the payload length cannot be checked up front; a short
/// stream is reported when the missing time step is reached, and memory
/// grows only with the samples actually read.
pub fn read_from<R: Read>(mut src: R) -> Result<TurbulenceBox, BtsError> {
    let header = read_header_from(&mut src)?;
    read_samples(&mut src, header)
}

/// Decode only the header (fixed part and info string) of a BTS file.
pub fn read_header(path: impl AsRef<Path>) -> Result<BtsHeader, BtsError> {
    let (file, _) = open_checked(path.as_ref())?;
    read_header_from(&mut BufReader::new(file))
}

/// Decode the header from the current position of `src`.
pub fn read_header_from<R: Read>(src: &mut R) -> Result<BtsHeader, BtsError> {
    decode_header(src).map(|(header, _)| header)
}

/// Byte offset of the first sample in a BTS file, i.e. the stored header
/// length. Taken from the raw info length, not from the decoded string.
pub fn payload_offset(path: impl AsRef<Path>) -> Result<u64, BtsError> {
    let (file, _) = open_checked(path.as_ref())?;
    decode_header(&mut BufReader::new(file)).map(|(_, len)| len as u64)
}

/// Header plus the number of bytes it occupied on disk. The info string is
/// decoded lossily, so its in-memory length may differ from the stored one.
fn decode_header<R: Read>(src: &mut R) -> Result<(BtsHeader, usize), BtsError> {
    let mut fixed = [0u8; FIXED_HEADER_SIZE];
    let n = read_full(src, &mut fixed)?;
    if n == 0 {
        return Err(BtsError::EmptyInput);
    }
    if n < FIXED_HEADER_SIZE {
        return Err(BtsError::format(format!(
            "stream ends after {n} bytes, inside the {FIXED_HEADER_SIZE}-byte header"
        )));
    }
    let (mut header, info_len) = BtsHeader::from_fixed_bytes(&fixed)?;
    if let Some(msg) = header.dimension_error() {
        return Err(BtsError::Format(msg));
    }

    // Grow with the data rather than trusting info_len for the allocation.
    let mut info = Vec::new();
    src.by_ref().take(info_len as u64).read_to_end(&mut info)?;
    if info.len() < info_len {
        return Err(BtsError::format(format!(
            "info string declares {info_len} bytes but only {} remain",
            info.len()
        )));
    }
    header.info = String::from_utf8_lossy(&info).into_owned();

    debug!(
        format_id = header.format_id,
        nt = header.nt,
        ny = header.ny,
        nz = header.nz,
        n_twr = header.n_twr,
        "decoded BTS header"
    );
    Ok((header, FIXED_HEADER_SIZE + info_len))
}

impl TurbulenceBox {
    /// Decode a BTS file; see [`read`].
    pub fn read(path: impl AsRef<Path>) -> Result<Self, BtsError> {
        read(path)
    }
}

fn open_checked(path: &Path) -> Result<(File, u64), BtsError> {
    let meta = std::fs::metadata(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => BtsError::NotFound(path.to_path_buf()),
        _ => BtsError::Io(e),
    })?;
    if meta.len() == 0 {
        return Err(BtsError::EmptyInput);
    }
    Ok((File::open(path)?, meta.len()))
}

/// Sample buffers and axes are sized from data already read, never from the
/// declared counts alone; a header is only trusted once its samples arrive.
fn read_samples<R: Read>(src: &mut R, header: BtsHeader) -> Result<TurbulenceBox, BtsError> {
    header
        .payload_len()
        .filter(|p| usize::try_from(*p).is_ok())
        .ok_or_else(|| BtsError::format("declared grid sizes overflow"))?;

    let quant = header.quantization();
    let grid_samples = header.grid_samples_per_step();
    let tower_samples = header.tower_samples_per_step();
    let mut grid = Vec::new();
    let mut tower = Vec::new();
    // One time step at a time; the scratch buffer never escapes this function.
    let mut scratch = Vec::new();

    for it in 0..header.nt {
        read_block(src, &mut scratch, grid_samples, it, "grid")?;
        let start = grid.len();
        grid.resize(start + grid_samples, 0.0);
        quant.dequantize_block(&scratch, &mut grid[start..]);

        read_block(src, &mut scratch, tower_samples, it, "tower")?;
        let start = tower.len();
        tower.resize(start + tower_samples, 0.0);
        quant.dequantize_block(&scratch, &mut tower[start..]);
    }

    let u = VectorField::from_vec(header.nt, header.ny, header.nz, grid)?;
    let u_twr = VectorField::from_vec(header.nt, header.n_twr, 1, tower)?;
    Ok(TurbulenceBox::from_header(&header, u, u_twr))
}

/// Read `samples` stored samples into `buf`, growing it with the data.
fn read_block<R: Read>(
    src: &mut R,
    buf: &mut Vec<u8>,
    samples: usize,
    it: usize,
    what: &str,
) -> Result<(), BtsError> {
    let len = samples * SAMPLE_SIZE;
    buf.clear();
    src.by_ref().take(len as u64).read_to_end(buf)?;
    if buf.len() < len {
        return Err(BtsError::format(format!(
            "stream ends inside the {what} block of time step {it} ({} of {len} bytes)",
            buf.len()
        )));
    }
    Ok(())
}

/// Fill `buf` as far as the stream allows; returns the number of bytes read.
fn read_full<R: Read>(src: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FORMAT_STANDARD;

    /// Header from the worked example: 2x2 grid, one step, unit scale.
    fn example_bytes() -> Vec<u8> {
        let header = BtsHeader {
            format_id: FORMAT_STANDARD,
            nz: 2,
            ny: 2,
            n_twr: 0,
            nt: 1,
            dz: 1.0,
            dy: 1.0,
            dt: 0.05,
            u_hub: 10.0,
            z_hub: 90.0,
            z_bottom: 0.0,
            scale: [1.0; 3],
            offset: [0.0; 3],
            info: String::new(),
        };
        let mut bytes = header.to_bytes().unwrap();
        for s in [100i16, -100, 50, -50, 25, -25, 10, -10, 5, -5, 2, -2] {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn decodes_worked_example() {
        let b = read_from(example_bytes().as_slice()).unwrap();
        assert_eq!(b.u.shape(), [3, 1, 2, 2]);
        assert_eq!(b.u.get(0, 0, 0, 0), 100.0);
        assert_eq!(b.u.get(1, 0, 0, 0), -100.0);
        assert_eq!(b.u.get(2, 0, 0, 0), 50.0);
        // second y point, first z point
        assert_eq!(b.u.get(0, 0, 1, 0), -50.0);
        // first y point, second z point
        assert_eq!(b.u.get(0, 0, 0, 1), 10.0);
        assert_eq!(b.u.get(2, 0, 1, 1), -2.0);
        assert_eq!(b.y, vec![-0.5, 0.5]);
        assert_eq!(b.z, vec![0.0, 1.0]);
        assert_eq!(b.t, vec![0.0]);
        assert!(b.z_twr.is_empty());
        assert_eq!(b.n_twr(), 0);
        assert_eq!(b.z_hub, Some(90.0));
        assert_eq!(b.u_hub, Some(10.0));
        assert_eq!(b.format_id, FORMAT_STANDARD);
    }

    #[test]
    fn empty_stream_is_empty_input() {
        let err = read_from(io::empty()).unwrap_err();
        assert!(matches!(err, BtsError::EmptyInput), "got {err:?}");
    }

    #[test]
    fn short_header_is_format_error() {
        let bytes = example_bytes();
        let err = read_from(&bytes[..40]).unwrap_err();
        assert!(matches!(err, BtsError::Format(_)), "got {err:?}");
    }

    #[test]
    fn info_longer_than_stream_is_format_error() {
        let mut bytes = example_bytes();
        bytes[66..70].copy_from_slice(&1_000_000i32.to_le_bytes());
        let err = read_from(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, BtsError::Format(ref m) if m.contains("info")), "got {err:?}");
    }

    #[test]
    fn truncated_samples_are_format_error() {
        let bytes = example_bytes();
        let err = read_from(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, BtsError::Format(ref m) if m.contains("grid block")), "got {err:?}");
    }

    fn declared(nt: usize, ny: usize, nz: usize, n_twr: usize) -> Vec<u8> {
        BtsHeader {
            format_id: FORMAT_STANDARD,
            nz,
            ny,
            n_twr,
            nt,
            dz: 1.0,
            dy: 1.0,
            dt: 0.05,
            u_hub: 10.0,
            z_hub: 90.0,
            z_bottom: 0.0,
            scale: [1.0; 3],
            offset: [0.0; 3],
            info: String::new(),
        }
        .to_bytes()
        .unwrap()
    }

    #[test]
    fn points_without_samples_are_format_error() {
        let max = i32::MAX as usize;
        for (bytes, what) in [
            (declared(max, 0, 0, 0), "steps without points"),
            (declared(4, max, 0, 0), "empty grid dimension"),
            (declared(0, max, max, max), "points without steps"),
        ] {
            let err = read_from(bytes.as_slice()).unwrap_err();
            assert!(matches!(err, BtsError::Format(_)), "{what}: got {err:?}");
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steps_only.bts");
        std::fs::write(&path, declared(max, 0, 0, 0)).unwrap();
        let err = read(&path).unwrap_err();
        assert!(matches!(err, BtsError::Format(_)), "got {err:?}");
    }

    #[test]
    fn huge_declared_grid_fails_on_missing_samples() {
        // 3 * 40000^2 samples would need gigabytes; only the header is present
        let err = read_from(declared(1, 40_000, 40_000, 0).as_slice()).unwrap_err();
        assert!(matches!(err, BtsError::Format(ref m) if m.contains("grid block")), "got {err:?}");
    }

    #[test]
    fn payload_offset_uses_stored_info_length() {
        let mut bytes = example_bytes();
        bytes[66..70].copy_from_slice(&3i32.to_le_bytes());
        bytes.splice(70..70, [0xff, 0xfe, b'x']);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latin1.bts");
        std::fs::write(&path, &bytes).unwrap();

        assert_eq!(payload_offset(&path).unwrap(), 73);
        // the decoded string is longer than what is stored
        assert!(read_header(&path).unwrap().encoded_len() > 73);
    }

    #[test]
    fn invalid_utf8_info_is_replaced() {
        let mut bytes = example_bytes();
        bytes[66..70].copy_from_slice(&2i32.to_le_bytes());
        bytes.splice(70..70, [0xff, b'a']);
        let b = read_from(bytes.as_slice()).unwrap();
        assert_eq!(b.info, "\u{fffd}a");
        assert_eq!(b.u.get(0, 0, 0, 0), 100.0);
    }

    #[test]
    fn header_only_read_leaves_samples() {
        let bytes = example_bytes();
        let mut src = bytes.as_slice();
        let h = read_header_from(&mut src).unwrap();
        assert_eq!((h.nt, h.ny, h.nz, h.n_twr), (1, 2, 2, 0));
        assert_eq!(src.len(), 24);
    }
}
