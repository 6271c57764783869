//! MRC header reader.
//!
//! Only the leading 1024-byte header is read. Frame size comes from
//! `nx, ny, nz`; pixel spacing is `cella.x / mx` (Å per pixel).

use std::io::Read;
use std::path::Path;

use crate::ParseError;

/// MRC header length in bytes.
pub const HEADER_LEN: usize = 1024;

/// The header words tomoalign uses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MrcHeader {
    pub nx: i32,
    pub ny: i32,
    pub nz: i32,
    pub mx: i32,
    pub my: i32,
    pub mz: i32,
    /// Cell dimensions in Å.
    pub cella: [f32; 3],
}

impl MrcHeader {
    /// Å per pixel along x, if the header defines one.
    pub fn pixel_spacing(&self) -> Option<f64> {
        if self.mx <= 0 || self.cella[0] <= 0.0 {
            return None;
        }
        Some(self.cella[0] as f64 / self.mx as f64)
    }

    /// `(nx, ny, nz)` as unsigned sizes.
    pub fn size(&self) -> Result<[usize; 3], ParseError> {
        let dims = [self.nx, self.ny, self.nz];
        if dims.iter().any(|d| *d <= 0) {
            return Err(ParseError::FormatError {
                line: 0,
                message: format!("MRC header has non-positive dimensions {:?}", dims),
            });
        }
        Ok([self.nx as usize, self.ny as usize, self.nz as usize])
    }
}

/// Decode a header from its raw bytes.
///
/// The machine stamp at byte 212 selects the byte order; anything other than
/// the big-endian stamp `0x11 0x11` is read as little-endian.
pub fn parse_mrc_header(bytes: &[u8]) -> Result<MrcHeader, ParseError> {
    if bytes.len() < HEADER_LEN {
        return Err(ParseError::FormatError {
            line: 0,
            message: format!("MRC header truncated: {} of {} bytes", bytes.len(), HEADER_LEN),
        });
    }
    let big_endian = bytes[212] == 0x11 && bytes[213] == 0x11;

    let word = |offset: usize| -> [u8; 4] {
        [bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]]
    };
    let int = |offset: usize| {
        if big_endian {
            i32::from_be_bytes(word(offset))
        } else {
            i32::from_le_bytes(word(offset))
        }
    };
    let float = |offset: usize| {
        if big_endian {
            f32::from_be_bytes(word(offset))
        } else {
            f32::from_le_bytes(word(offset))
        }
    };

    Ok(MrcHeader {
        nx: int(0),
        ny: int(4),
        nz: int(8),
        mx: int(28),
        my: int(32),
        mz: int(36),
        cella: [float(40), float(44), float(48)],
    })
}

/// Read the header of the MRC file at `path`.
pub fn read_mrc_header(path: &Path) -> Result<MrcHeader, ParseError> {
    let mut file = std::fs::File::open(path)?;
    let mut buf = Vec::with_capacity(HEADER_LEN);
    file.by_ref().take(HEADER_LEN as u64).read_to_end(&mut buf)?;
    let header = parse_mrc_header(&buf)?;
    log::debug!(
        "MRC {}: {}x{}x{}, cell {:?}",
        path.display(),
        header.nx,
        header.ny,
        header.nz,
        header.cella
    );
    Ok(header)
}
