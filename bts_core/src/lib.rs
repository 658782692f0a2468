//! # bts_core
//!
//! Reader and writer for TurbSim binary turbulence boxes (`.bts`), the 3-D
//! time-series wind fields used to drive aero-elastic wind-turbine simulations.
//!
//! ```text
//! [HEADER: 70 bytes, little-endian]   format_id, nz, ny, nTwr, nt, dz, dy, dt,
//!                                     uHub, zHub, zBottom, (scale, offset) x 3,
//!                                     info length
//! [INFO: info length bytes]
//! [STEP 0]  grid block  3*ny*nz i16   (component, y, z), component fastest
//!           tower block 3*nTwr  i16   (component, tower point)
//! ...
//! [STEP nt-1]
//! ```
//!
//! Samples are quantized per component with an affine scale/offset pair
//! (see [`quant`]); a decoded box reproduces the encoded one to within one
//! quantization step.
//!
//! ```no_run
//! use bts_core::{PeriodicityTolerance, TurbulenceBox};
//!
//! let mut b = TurbulenceBox::read("inflow.bts")?;
//! b.make_periodic()?;
//! assert!(b.check_periodic(PeriodicityTolerance::default()).periodic);
//! b.write("inflow_periodic.bts")?;
//! # Ok::<(), bts_core::BtsError>(())
//! ```

pub mod error;
pub mod field;
pub mod format;
pub mod periodic;
pub mod quant;
pub mod reader;
pub mod turbulence_box;
pub mod writer;

pub use error::BtsError;
pub use field::VectorField;
pub use format::{BtsHeader, FIXED_HEADER_SIZE, FORMAT_PERIODIC, FORMAT_STANDARD};
pub use periodic::{PeriodicityCheck, PeriodicityTolerance};
pub use quant::Quantization;
pub use reader::{payload_offset, read, read_from, read_header, read_header_from};
pub use turbulence_box::{HubValues, TurbulenceBox};
pub use writer::{encode_header, write, write_to};
