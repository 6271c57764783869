//! Parser for AreTomo3 `.aln` alignment files.
//!
//! Layout:
//! ```text
//! # AreTomo Alignment / Priims bprmMn
//! # RawSize = 2032 2032 90
//! # NumPatches = 16
//! # DarkFrame =     0    0   -66.00
//! # AlphaOffset =     0.00
//! # BetaOffset =     0.00
//! # SEC     ROT         GMAG       TX          TY      SMEAN     SFIT    SCALE     BASE     TILT
//!     0   -12.6611    1.00000     24.786     -2.677     1.00     1.00     1.00     0.00    -61.50
//! # Local Alignment
//!    0   0  -928.63   -906.24     -2.87     -3.77   1.0
//! ```
//!
//! `DarkFrame` indices refer to the raw stack; `SEC` in the global and local
//! blocks counts only the sections kept for reconstruction.

use crate::{parse_f64, parse_fields, ParseError};

pub const DEFAULT_HEADER: &str = "# AreTomo Alignment / Priims bprmMn";

const COLUMN_HEADER: &str =
    "# SEC     ROT         GMAG       TX          TY      SMEAN     SFIT    SCALE     BASE     TILT";

/// A raw section AreTomo3 discarded before reconstruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DarkFrame {
    /// Index in the raw stack (0-based).
    pub section: usize,
    pub flag: i32,
    pub tilt_angle: f64,
}

/// Global alignment of one kept section.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlobalRecord {
    /// Index among kept sections (0-based).
    pub sec: usize,
    /// Tilt axis rotation (degrees).
    pub rot: f64,
    pub gmag: f64,
    pub tx: f64,
    pub ty: f64,
    pub smean: f64,
    pub sfit: f64,
    pub scale: f64,
    pub base: f64,
    pub tilt: f64,
}

impl GlobalRecord {
    /// Record with AreTomo3's neutral values for the fit statistics.
    pub fn new(sec: usize, rot: f64, gmag: f64, tx: f64, ty: f64, tilt: f64) -> Self {
        Self {
            sec,
            rot,
            gmag,
            tx,
            ty,
            smean: 1.0,
            sfit: 1.0,
            scale: 1.0,
            base: 0.0,
            tilt,
        }
    }
}

/// Local (patch) alignment of one kept section.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalRecord {
    pub sec: usize,
    pub patch: usize,
    pub center_x: f64,
    pub center_y: f64,
    pub shift_x: f64,
    pub shift_y: f64,
    pub reliable: f64,
}

/// Contents of an `.aln` file.
#[derive(Debug, Clone, PartialEq)]
pub struct AlnFile {
    pub header: String,
    pub raw_size: [usize; 3],
    pub num_patches: usize,
    pub dark_frames: Vec<DarkFrame>,
    pub alpha_offset: f64,
    pub beta_offset: f64,
    pub global: Vec<GlobalRecord>,
    pub local: Vec<LocalRecord>,
}

impl AlnFile {
    /// Number of raw sections (`RawSize` z).
    pub fn number_of_tilts(&self) -> usize {
        self.raw_size[2]
    }

    /// Raw section indices that have a global record, in order.
    pub fn kept_sections(&self) -> Vec<usize> {
        let dark: std::collections::HashSet<usize> =
            self.dark_frames.iter().map(|d| d.section).collect();
        (0..self.raw_size[2]).filter(|i| !dark.contains(i)).collect()
    }

    /// Render in AreTomo3's fixed-width layout.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.header);
        out.push('\n');
        out.push_str(&format!(
            "# RawSize = {} {} {}\n",
            self.raw_size[0], self.raw_size[1], self.raw_size[2]
        ));
        out.push_str(&format!("# NumPatches = {}\n", self.num_patches));
        for d in &self.dark_frames {
            out.push_str(&format!(
                "# DarkFrame ={:>6}{:>5}{:>9.2}\n",
                d.section, d.flag, d.tilt_angle
            ));
        }
        out.push_str(&format!("# AlphaOffset ={:>9.2}\n", self.alpha_offset));
        out.push_str(&format!("# BetaOffset ={:>9.2}\n", self.beta_offset));
        out.push_str(COLUMN_HEADER);
        out.push('\n');
        for g in &self.global {
            out.push_str(&format!(
                "{:>5}{:>11.4}{:>11.5}{:>11.3}{:>11.3}{:>9.2}{:>9.2}{:>9.2}{:>9.2}{:>10.2}\n",
                g.sec, g.rot, g.gmag, g.tx, g.ty, g.smean, g.sfit, g.scale, g.base, g.tilt
            ));
        }
        out.push_str("# Local Alignment\n");
        for l in &self.local {
            out.push_str(&format!(
                "{:>4}{:>4}{:>9.2}{:>10.2}{:>10.2}{:>10.2}{:>6.1}\n",
                l.sec, l.patch, l.center_x, l.center_y, l.shift_x, l.shift_y, l.reliable
            ));
        }
        out
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Block {
    Header,
    Global,
    Local,
}

/// Parse an `.aln` file.
pub fn parse_aln(content: &str) -> Result<AlnFile, ParseError> {
    let mut header = None;
    let mut raw_size = None;
    let mut num_patches = 0;
    let mut dark_frames = Vec::new();
    let mut alpha_offset = 0.0;
    let mut beta_offset = 0.0;
    let mut global = Vec::new();
    let mut local = Vec::new();
    let mut block = Block::Header;

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix('#') {
            let rest = rest.trim();
            if rest.starts_with("AreTomo Alignment") {
                header = Some(line.to_string());
            } else if let Some(value) = directive(rest, "RawSize") {
                let v = parse_usizes(value, line_no, "RawSize")?;
                if v.len() != 3 {
                    return Err(ParseError::FormatError {
                        line: line_no,
                        message: format!("RawSize needs 3 values, got {}", v.len()),
                    });
                }
                raw_size = Some([v[0], v[1], v[2]]);
            } else if let Some(value) = directive(rest, "NumPatches") {
                num_patches = parse_usize(value.trim(), line_no, "NumPatches")?;
            } else if let Some(value) = directive(rest, "DarkFrame") {
                let parts: Vec<&str> = value.split_whitespace().collect();
                if parts.len() < 3 {
                    return Err(ParseError::FormatError {
                        line: line_no,
                        message: format!("DarkFrame needs 3 values, got {}", parts.len()),
                    });
                }
                let section = parse_usize(parts[0], line_no, "DarkFrame section")?;
                if dark_frames.iter().any(|d: &DarkFrame| d.section == section) {
                    return Err(ParseError::FormatError {
                        line: line_no,
                        message: format!("DarkFrame section {} listed twice", section),
                    });
                }
                dark_frames.push(DarkFrame {
                    section,
                    flag: parts[1].parse().map_err(|_| ParseError::FormatError {
                        line: line_no,
                        message: format!("Invalid DarkFrame flag: {}", parts[1]),
                    })?,
                    tilt_angle: parse_f64(parts[2], line_no, "DarkFrame angle")?,
                });
            } else if let Some(value) = directive(rest, "AlphaOffset") {
                alpha_offset = parse_f64(value.trim(), line_no, "AlphaOffset")?;
            } else if let Some(value) = directive(rest, "BetaOffset") {
                beta_offset = parse_f64(value.trim(), line_no, "BetaOffset")?;
            } else if rest.starts_with("SEC") {
                block = Block::Global;
            } else if rest.starts_with("Local Alignment") {
                block = Block::Local;
            }
            continue;
        }

        match block {
            Block::Header => {
                return Err(ParseError::FormatError {
                    line: line_no,
                    message: "Data row before the '# SEC' column header".into(),
                })
            }
            Block::Global => {
                let v = parse_fields(line, line_no, 10)?;
                global.push(GlobalRecord {
                    sec: to_index(v[0], line_no, "SEC")?,
                    rot: v[1],
                    gmag: v[2],
                    tx: v[3],
                    ty: v[4],
                    smean: v[5],
                    sfit: v[6],
                    scale: v[7],
                    base: v[8],
                    tilt: v[9],
                });
            }
            Block::Local => {
                let v = parse_fields(line, line_no, 7)?;
                local.push(LocalRecord {
                    sec: to_index(v[0], line_no, "SEC")?,
                    patch: to_index(v[1], line_no, "patch")?,
                    center_x: v[2],
                    center_y: v[3],
                    shift_x: v[4],
                    shift_y: v[5],
                    reliable: v[6],
                });
            }
        }
    }

    let raw_size = raw_size.ok_or_else(|| ParseError::MissingField("RawSize".into()))?;
    Ok(AlnFile {
        header: header.unwrap_or_else(|| DEFAULT_HEADER.to_string()),
        raw_size,
        num_patches,
        dark_frames,
        alpha_offset,
        beta_offset,
        global,
        local,
    })
}

/// Value part of `Key = value`, if `rest` starts with `key`.
fn directive<'a>(rest: &'a str, key: &str) -> Option<&'a str> {
    let tail = rest.strip_prefix(key)?.trim_start();
    tail.strip_prefix('=')
}

fn parse_usize(token: &str, line: usize, what: &str) -> Result<usize, ParseError> {
    token.parse().map_err(|_| ParseError::FormatError {
        line,
        message: format!("Invalid {}: {}", what, token),
    })
}

fn parse_usizes(value: &str, line: usize, what: &str) -> Result<Vec<usize>, ParseError> {
    value
        .split_whitespace()
        .map(|t| parse_usize(t, line, what))
        .collect()
}

fn to_index(value: f64, line: usize, what: &str) -> Result<usize, ParseError> {
    if value < 0.0 || value.fract() != 0.0 {
        return Err(ParseError::FormatError {
            line,
            message: format!("Invalid {}: {}", what, value),
        });
    }
    Ok(value as usize)
}
