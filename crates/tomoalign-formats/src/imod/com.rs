//! IMOD command files (`tilt.com`, `newst.com`).
//!
//! Command files are shell-like scripts: lines starting with `$` are
//! commands, `#` starts a comment, and every other line is a directive
//! `KEY value...` for the program started by the preceding `$` line.
//! Only the directives that affect alignment geometry are kept:
//!
//! | Directive | Meaning |
//! |-----------|---------|
//! | `XAXISTILT` | series-wide x-axis tilt (degrees) |
//! | `THICKNESS` | reconstruction thickness (unbinned pixels) |
//! | `OFFSET` | tilt angle offset (degrees) |
//! | `SHIFT` | volume shift in X and Z (pixels) |
//! | `FULLIMAGE` | raw frame width and height (pixels) |
//! | `EXCLUDELIST2` | excluded views, 1-based IMOD range list |
//!
//! On the write side `tilt.com` carries the directives above, and
//! `newst.com` names the raw stack, the `.xf` file and the aligned stack
//! that `tilt.com` reconstructs from.

use crate::{parse_f64, ParseError, MAX_SECTIONS};

/// Geometry-relevant directives of an IMOD command file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComParams {
    pub x_axis_tilt: Option<f64>,
    pub thickness: Option<f64>,
    pub offset: Option<f64>,
    pub shift: Option<[f64; 2]>,
    pub full_image: Option<[u32; 2]>,
    /// Excluded views, 1-based.
    pub exclude: Vec<usize>,
    pub input_projections: Option<String>,
    pub output_file: Option<String>,
    pub tilt_file: Option<String>,
    pub xtilt_file: Option<String>,
}

impl ComParams {
    /// Fill every field missing here from `fallback`.
    pub fn merged_with(mut self, fallback: &ComParams) -> ComParams {
        self.x_axis_tilt = self.x_axis_tilt.or(fallback.x_axis_tilt);
        self.thickness = self.thickness.or(fallback.thickness);
        self.offset = self.offset.or(fallback.offset);
        self.shift = self.shift.or(fallback.shift);
        self.full_image = self.full_image.or(fallback.full_image);
        if self.exclude.is_empty() {
            self.exclude = fallback.exclude.clone();
        }
        self.input_projections = self.input_projections.or_else(|| fallback.input_projections.clone());
        self.output_file = self.output_file.or_else(|| fallback.output_file.clone());
        self.tilt_file = self.tilt_file.or_else(|| fallback.tilt_file.clone());
        self.xtilt_file = self.xtilt_file.or_else(|| fallback.xtilt_file.clone());
        self
    }

    /// Whether any geometry directive is set.
    pub fn has_geometry(&self) -> bool {
        self.x_axis_tilt.is_some()
            || self.thickness.is_some()
            || self.offset.is_some()
            || self.shift.is_some()
            || self.full_image.is_some()
            || !self.exclude.is_empty()
    }
}

/// Parse a command file.
pub fn parse_com(content: &str) -> Result<ComParams, ParseError> {
    let mut params = ComParams::default();

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('$') || line.starts_with('#') {
            continue;
        }

        let (key, value) = match line.split_once(char::is_whitespace) {
            Some((k, v)) => (k, v.trim()),
            None => (line, ""),
        };
        let values: Vec<&str> = value
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .collect();

        match key {
            "XAXISTILT" => params.x_axis_tilt = Some(first_f64(&values, line_no, key)?),
            "THICKNESS" => params.thickness = Some(first_f64(&values, line_no, key)?),
            "OFFSET" => params.offset = Some(first_f64(&values, line_no, key)?),
            "SHIFT" => {
                let v = n_f64(&values, 2, line_no, key)?;
                params.shift = Some([v[0], v[1]]);
            }
            "FULLIMAGE" => {
                let v = n_f64(&values, 2, line_no, key)?;
                if v.iter().any(|d| *d < 0.0 || d.fract() != 0.0 || *d > f64::from(u32::MAX)) {
                    return Err(ParseError::FormatError {
                        line: line_no,
                        message: format!("FULLIMAGE must be two non-negative integers, got '{}'", value),
                    });
                }
                params.full_image = Some([v[0] as u32, v[1] as u32]);
            }
            "EXCLUDELIST2" | "EXCLUDELIST" | "EXCLUDE" => {
                params.exclude.extend(parse_range_list(value, line_no)?);
            }
            "InputProjections" | "InputFile" => params.input_projections = Some(value.to_string()),
            "OutputFile" => params.output_file = Some(value.to_string()),
            "TILTFILE" => params.tilt_file = Some(value.to_string()),
            "XTILTFILE" => params.xtilt_file = Some(value.to_string()),
            _ => {}
        }
    }

    params.exclude.sort_unstable();
    params.exclude.dedup();
    Ok(params)
}

fn first_f64(values: &[&str], line: usize, key: &str) -> Result<f64, ParseError> {
    Ok(n_f64(values, 1, line, key)?[0])
}

fn n_f64(values: &[&str], n: usize, line: usize, key: &str) -> Result<Vec<f64>, ParseError> {
    if values.len() < n {
        return Err(ParseError::FormatError {
            line,
            message: format!("{} expects {} value(s), got {}", key, n, values.len()),
        });
    }
    values[..n].iter().map(|v| parse_f64(v, line, key)).collect()
}

/// Expand an IMOD range list such as `1,4-6,9` into `[1, 4, 5, 6, 9]`.
pub fn parse_range_list(text: &str, line: usize) -> Result<Vec<usize>, ParseError> {
    let mut out = Vec::new();
    for part in text.split(|c: char| c == ',' || c.is_whitespace()) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let bad = || ParseError::FormatError {
            line,
            message: format!("Invalid range entry: {}", part),
        };
        match part.split_once('-') {
            Some((start, end)) => {
                let start: usize = start.trim().parse().map_err(|_| bad())?;
                let end: usize = end.trim().parse().map_err(|_| bad())?;
                if end < start {
                    return Err(bad());
                }
                check_view(end, part, line)?;
                out.extend(start..=end);
            }
            None => {
                let view = part.parse().map_err(|_| bad())?;
                check_view(view, part, line)?;
                out.push(view);
            }
        }
    }
    Ok(out)
}

fn check_view(view: usize, part: &str, line: usize) -> Result<(), ParseError> {
    if view > MAX_SECTIONS {
        return Err(ParseError::FormatError {
            line,
            message: format!("Range entry {} is beyond {} views", part, MAX_SECTIONS),
        });
    }
    Ok(())
}

/// Compress sorted 1-based indices into IMOD range syntax.
pub fn render_range_list(values: &[usize]) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut i = 0;
    while i < values.len() {
        let start = values[i];
        let mut end = start;
        while i + 1 < values.len() && values[i + 1] == end + 1 {
            i += 1;
            end = values[i];
        }
        if end > start {
            parts.push(format!("{}-{}", start, end));
        } else {
            parts.push(start.to_string());
        }
        i += 1;
    }
    parts.join(",")
}

/// Render a `tilt.com` carrying the geometry directives of `params`.
pub fn render_tilt_com(params: &ComParams) -> String {
    let mut out = String::from("$setenv IMOD_OUTPUT_FORMAT MRC\n$tilt -StandardInput\n");
    if let Some(v) = &params.input_projections {
        out.push_str(&format!("InputProjections {}\n", v));
    }
    if let Some(v) = &params.output_file {
        out.push_str(&format!("OutputFile {}\n", v));
    }
    if let Some(v) = &params.tilt_file {
        out.push_str(&format!("TILTFILE {}\n", v));
    }
    if let Some(v) = &params.xtilt_file {
        out.push_str(&format!("XTILTFILE {}\n", v));
    }
    if let Some(v) = params.thickness {
        out.push_str(&format!("THICKNESS {}\n", v.round() as i64));
    }
    if let Some(v) = params.x_axis_tilt {
        out.push_str(&format!("XAXISTILT {}\n", v));
    }
    if let Some([w, h]) = params.full_image {
        out.push_str(&format!("FULLIMAGE {} {}\n", w, h));
    }
    if let Some(v) = params.offset {
        out.push_str(&format!("OFFSET {}\n", v));
    }
    if let Some([x, z]) = params.shift {
        out.push_str(&format!("SHIFT {} {}\n", x, z));
    }
    if !params.exclude.is_empty() {
        out.push_str(&format!("EXCLUDELIST2 {}\n", render_range_list(&params.exclude)));
    }
    out.push_str("$if (-e ./savework) ./savework\n");
    out
}

/// The `newstack` run that produces the aligned stack.
#[derive(Debug, Clone, PartialEq)]
pub struct NewstParams {
    /// Raw tilt-series stack.
    pub input_file: String,
    /// Aligned stack, the input of `tilt.com`.
    pub output_file: String,
    pub transform_file: String,
    pub bin_by_factor: u32,
}

impl NewstParams {
    /// The usual names for a series called `stem`, unbinned.
    pub fn for_stem(stem: &str) -> Self {
        Self {
            input_file: format!("{}.mrc", stem),
            output_file: format!("{}_ali.mrc", stem),
            transform_file: format!("{}.xf", stem),
            bin_by_factor: 1,
        }
    }
}

/// Render a `newst.com` applying the `.xf` transforms to the raw stack.
pub fn render_newst_com(params: &NewstParams) -> String {
    let mut out = String::from("$setenv IMOD_OUTPUT_FORMAT MRC\n$newstack -StandardInput\n");
    out.push_str("AntialiasFilter\t-1\n");
    out.push_str(&format!("InputFile\t{}\n", params.input_file));
    out.push_str(&format!("OutputFile\t{}\n", params.output_file));
    out.push_str(&format!("TransformFile\t{}\n", params.transform_file));
    out.push_str("TaperAtFill\t0,0\n");
    out.push_str("AdjustOrigin\n");
    out.push_str("OffsetsInXandY\t0.0,0.0\n");
    out.push_str("ImagesAreBinned\t1.0\n");
    out.push_str(&format!("BinByFactor\t{}\n", params.bin_by_factor));
    out.push_str("$if (-e ./savework) ./savework\n");
    out
}
