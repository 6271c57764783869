//! Parser for IMOD `.xf` transform files.
//!
//! One line per projection, six numbers:
//! ```text
//! a11 a12 a21 a22 dx dy
//! ```
//! The 2x2 matrix and shift (pixels) map each raw projection onto the
//! aligned stack, about the image centre.

use crate::{parse_fields, ParseError};

/// A single `.xf` row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XfRow {
    pub a11: f64,
    pub a12: f64,
    pub a21: f64,
    pub a22: f64,
    pub dx: f64,
    pub dy: f64,
}

impl XfRow {
    pub fn identity() -> Self {
        Self {
            a11: 1.0,
            a12: 0.0,
            a21: 0.0,
            a22: 1.0,
            dx: 0.0,
            dy: 0.0,
        }
    }

    /// Row-major 2x2 matrix.
    pub fn matrix(&self) -> [[f64; 2]; 2] {
        [[self.a11, self.a12], [self.a21, self.a22]]
    }

    pub fn shift(&self) -> [f64; 2] {
        [self.dx, self.dy]
    }

    pub fn from_parts(matrix: [[f64; 2]; 2], shift: [f64; 2]) -> Self {
        Self {
            a11: matrix[0][0],
            a12: matrix[0][1],
            a21: matrix[1][0],
            a22: matrix[1][1],
            dx: shift[0],
            dy: shift[1],
        }
    }
}

/// Parse an `.xf` file from a string. Blank lines are skipped.
pub fn parse_xf(content: &str) -> Result<Vec<XfRow>, ParseError> {
    let mut rows = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let v = parse_fields(line, idx + 1, 6)?;
        rows.push(XfRow {
            a11: v[0],
            a12: v[1],
            a21: v[2],
            a22: v[3],
            dx: v[4],
            dy: v[5],
        });
    }
    Ok(rows)
}

/// Render rows in IMOD's fixed-width layout.
pub fn render_xf(rows: &[XfRow]) -> String {
    let mut out = String::with_capacity(rows.len() * 72);
    for r in rows {
        out.push_str(&format!(
            "{:>12.7}{:>12.7}{:>12.7}{:>12.7}{:>12.3}{:>12.3}\n",
            r.a11, r.a12, r.a21, r.a22, r.dx, r.dy
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "   0.9803519  -0.1972494   0.1972494   0.9803519      22.751      -0.799
   0.9803793  -0.1979111   0.1979111   0.9803793       6.676       1.969
   0.9796340  -0.1974376   0.1974376   0.9796341      13.633      -3.543
";

    #[test]
    fn test_parse_imod_xf() {
        let rows = parse_xf(SAMPLE).unwrap();
        assert_eq!(rows.len(), 3);
        assert!((rows[0].a11 - 0.9803519).abs() < 1e-12);
        assert!((rows[2].a22 - 0.9796341).abs() < 1e-12);
        assert!((rows[1].dy - 1.969).abs() < 1e-12);
    }

    #[test]
    fn test_render_matches_imod_layout() {
        let rows = parse_xf(SAMPLE).unwrap();
        assert_eq!(render_xf(&rows), SAMPLE);
    }

    #[test]
    fn test_short_row_is_an_error() {
        let err = parse_xf("1 0 0 1 0.5\n").unwrap_err().to_string();
        assert!(err.contains("line 1"), "{}", err);
        assert!(err.contains("Expected 6 fields"), "{}", err);
    }

    #[test]
    fn test_bad_number_reports_line() {
        let err = parse_xf("1 0 0 1 0 0\n1 0 0 x 0 0\n").unwrap_err().to_string();
        assert!(err.contains("line 2"), "{}", err);
        assert!(err.contains("Invalid"), "{}", err);
    }
}
