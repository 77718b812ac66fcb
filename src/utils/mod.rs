//! # Utility Functions and Types
//!
//! ## CRC Calculation
//!
//! The crc module provides the MPEG-2 CRC32 used by PSI sections:
//!
//! ```rust
//! use peca_ingest::utils::Crc32Mpeg2;
//!
//! # fn main() {
//! let crc = Crc32Mpeg2::new();
//! assert_eq!(crc.calculate(b"123456789"), 0x0376E6E7);
//! # }
//! ```

/// CRC calculation implementations
pub mod crc;

pub use crc::Crc32Mpeg2;
