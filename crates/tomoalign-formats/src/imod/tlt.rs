//! Parser for IMOD angle lists (`.tlt`, `.rawtlt`, `.xtilt`).
//!
//! One angle in degrees per line, in stack order.

use crate::{parse_f64, ParseError};

/// Parse an angle list. Blank lines are skipped.
pub fn parse_angles(content: &str) -> Result<Vec<f64>, ParseError> {
    let mut angles = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let token = line.split_whitespace().next().unwrap_or(line);
        angles.push(parse_f64(token, idx + 1, "angle")?);
    }
    Ok(angles)
}

/// Render angles one per line with two decimals, as tiltalign writes them.
pub fn render_angles(angles: &[f64]) -> String {
    let mut out = String::with_capacity(angles.len() * 10);
    for a in angles {
        out.push_str(&format!("{:>9.2}\n", a));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rawtlt() {
        let angles = parse_angles("-66.0\n-64.5\n-63.0\n").unwrap();
        assert_eq!(angles, vec![-66.0, -64.5, -63.0]);
    }

    #[test]
    fn test_parse_skips_blank_lines() {
        let angles = parse_angles("\n   -60.00\n\n    0.00\n   60.00\n\n").unwrap();
        assert_eq!(angles.len(), 3);
    }

    #[test]
    fn test_render_round_trip() {
        let angles = vec![-60.0, -1.5, 0.0, 12.25];
        let text = render_angles(&angles);
        assert_eq!(text.lines().next(), Some("   -60.00"));
        assert_eq!(parse_angles(&text).unwrap(), angles);
    }

    #[test]
    fn test_bad_angle() {
        let err = parse_angles("1.0\nnan?\n").unwrap_err().to_string();
        assert!(err.contains("line 2"), "{}", err);
    }
}
