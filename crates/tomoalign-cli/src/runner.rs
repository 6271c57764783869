//! Conversion runner: ties together MRC context, the facade and output.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use tomoalign_core::facade::{self, infer_format, required_context, Direction};
use tomoalign_core::{
    CanonicalAlignment, ConversionContext, ConversionReport, Format, LossyPolicy, NativeAlignment,
    TiltSeriesSize,
};
use tomoalign_formats::mrc::read_mrc_header;

use crate::config::JobConfig;

/// A fully specified conversion, from flags or a job file.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub input: PathBuf,
    pub input_format: Option<Format>,
    pub output: PathBuf,
    pub output_format: Option<Format>,
    pub context: ConversionContext,
    pub mrc: Option<PathBuf>,
    pub policy: LossyPolicy,
}

impl ConversionJob {
    pub fn from_config(job: &JobConfig) -> Self {
        Self {
            input: job.input.path.clone(),
            input_format: job.input.format,
            output: job.output.path.clone(),
            output_format: job.output.format,
            context: job.context.explicit(),
            mrc: job.context.mrc.clone(),
            policy: job.policy.lossy_policy(),
        }
    }

    pub fn target_format(&self) -> Format {
        self.output_format
            .unwrap_or_else(|| infer_format(&self.output))
    }
}

/// Results from a conversion run.
#[derive(Debug)]
pub struct ConversionOutcome {
    pub source: Format,
    pub target: Format,
    pub projections: usize,
    pub report: ConversionReport,
    /// Files written, or the files that would be written on a dry run.
    pub files: Vec<PathBuf>,
}

/// Fill the gaps in `explicit` from the MRC header at `mrc`.
///
/// Explicitly supplied values always win over header values.
pub fn resolve_context(explicit: ConversionContext, mrc: Option<&Path>) -> Result<ConversionContext> {
    let Some(mrc) = mrc else {
        return Ok(explicit);
    };
    let header = read_mrc_header(mrc)
        .with_context(|| format!("Failed to read MRC header {}", mrc.display()))?;
    let [x, y, z] = header.size()?;
    let from_header = ConversionContext {
        ts_size: Some(TiltSeriesSize::new(x, y, z)),
        pixel_spacing: header.pixel_spacing(),
    };
    log::debug!(
        "MRC {}: {} at {:?} Å/px",
        mrc.display(),
        TiltSeriesSize::new(x, y, z),
        from_header.pixel_spacing
    );
    Ok(explicit.or(&from_header))
}

/// Read the input, convert it and write the output.
///
/// With `dry_run` every output file is rendered but nothing is written.
pub fn run_conversion(job: &ConversionJob, dry_run: bool) -> Result<ConversionOutcome> {
    let ctx = resolve_context(job.context, job.mrc.as_deref())?;
    let native = facade::read(&job.input, job.input_format)
        .with_context(|| format!("Failed to read {}", job.input.display()))?;
    let target = job.target_format();

    let converted = facade::convert(&native, target, &ctx, job.policy)
        .with_context(|| format!("Cannot convert {} to {}", native.format(), target))?;

    let files = if dry_run {
        facade::render(&converted.native, &job.output)?
            .into_iter()
            .map(|(path, _)| path)
            .collect()
    } else {
        facade::write(&converted.native, &job.output)
            .with_context(|| format!("Failed to write {}", job.output.display()))?
    };

    Ok(ConversionOutcome {
        source: native.format(),
        target,
        projections: native.number_of_tilts(),
        report: converted.report,
        files,
    })
}

/// Read `input` into the canonical model, filling context from its own hint.
pub fn load_canonical(
    input: &Path,
    format: Option<Format>,
    explicit: ConversionContext,
) -> Result<(NativeAlignment, CanonicalAlignment)> {
    let native = facade::read(input, format)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let ctx = explicit.or(&native.context_hint());
    let canonical = facade::to_canonical(&native, &ctx)?;
    Ok((native, canonical))
}

/// Print what a conversion approximated or left out.
pub fn print_report(report: &ConversionReport) {
    if let Some(axis) = &report.tilt_axis {
        if axis.deviating.is_empty() {
            println!("  tilt axis: {:.4}°", axis.value);
        } else {
            println!(
                "  tilt axis: {:.4}° (mean; {} projections deviate)",
                axis.value,
                axis.deviating.len()
            );
        }
    }
    for note in &report.lossy {
        println!(
            "  lossy {}: {} ({} projections)",
            note.field,
            note.detail,
            note.projections.len()
        );
    }
    for omitted in &report.omitted {
        println!("  omitted: {}", omitted);
    }
}

/// Human-readable summary of a canonical alignment.
pub fn summarize(canonical: &CanonicalAlignment) -> String {
    let mut lines = Vec::new();
    lines.push(format!("Source format:   {}", canonical.source_format()));
    lines.push(format!(
        "Projections:     {} ({} included)",
        canonical.len(),
        canonical.included_count()
    ));

    let excluded = canonical.excluded_indices();
    if !excluded.is_empty() {
        let list: Vec<String> = excluded.iter().map(|i| i.to_string()).collect();
        lines.push(format!("Excluded:        {}", list.join(", ")));
    }

    let tilts = canonical.tilt_angles();
    let (lo, hi) = tilts
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), t| (lo.min(*t), hi.max(*t)));
    lines.push(format!("Tilt range:      {:.2}° to {:.2}°", lo, hi));

    let axes: Vec<f64> = canonical
        .projections()
        .iter()
        .map(|p| p.tilt_axis_angle)
        .collect();
    let (axis_lo, axis_hi) = axes
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), a| (lo.min(*a), hi.max(*a)));
    if axis_hi - axis_lo > 1e-6 {
        lines.push(format!("Tilt axis:       {:.4}° to {:.4}°", axis_lo, axis_hi));
    } else {
        lines.push(format!("Tilt axis:       {:.4}°", axis_lo));
    }

    if let Some(thickness) = canonical.volume_thickness() {
        lines.push(format!("Thickness:       {:?}", thickness));
    }
    if let Some(offset) = canonical.tilt_axis_offset() {
        lines.push(format!("Tilt offset:     {:.2}°", offset));
    }
    if let Some([x, z]) = canonical.volume_shift() {
        lines.push(format!("Volume shift:    ({:.2}, {:.2}) px", x, z));
    }
    lines.push(format!(
        "Local alignment: {}",
        if canonical.has_local_alignment() { "yes" } else { "no" }
    ));
    lines.join("\n")
}

/// One line per format: name, description and the context it needs.
pub fn format_table() -> Vec<String> {
    let keys = |format, direction| {
        let keys: Vec<String> = required_context(format, direction)
            .iter()
            .map(|k| k.to_string())
            .collect();
        if keys.is_empty() {
            "-".to_string()
        } else {
            keys.join(", ")
        }
    };
    Format::ALL
        .iter()
        .map(|&f| {
            format!(
                "  {:<9} {}\n            read needs: {}; write needs: {}",
                f.name(),
                f.description(),
                keys(f, Direction::Read),
                keys(f, Direction::Write)
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::fs;

    const ALN: &str = "# AreTomo Alignment / Priims bprmMn
# RawSize = 1024 1024 3
# NumPatches = 0
# DarkFrame =     1    0     0.00
# AlphaOffset =     0.00
# BetaOffset =     0.00
# SEC     ROT         GMAG       TX          TY      SMEAN     SFIT    SCALE     BASE     TILT
    0    85.1000    1.00000      3.000     -1.000     1.00     1.00     1.00     0.00    -3.00
    2    85.1000    1.00000     -2.000      0.500     1.00     1.00     1.00     0.00     3.00
";

    /// A little-endian MRC header for a `nx × ny × nz` stack at `spacing` Å/px.
    fn mrc_bytes(nx: i32, ny: i32, nz: i32, spacing: f32) -> Vec<u8> {
        let mut bytes = vec![0u8; 1024];
        for (word, value) in [(0, nx), (1, ny), (2, nz), (7, nx), (8, ny), (9, nz)] {
            bytes[word * 4..word * 4 + 4].copy_from_slice(&value.to_le_bytes());
        }
        bytes[40..44].copy_from_slice(&(nx as f32 * spacing).to_le_bytes());
        bytes[212] = 0x44;
        bytes[213] = 0x44;
        bytes
    }

    fn job(dir: &Path, output: &str) -> ConversionJob {
        let input = dir.join("TS_01.aln");
        fs::write(&input, ALN).unwrap();
        ConversionJob {
            input,
            input_format: None,
            output: dir.join(output),
            output_format: None,
            context: ConversionContext::new(),
            mrc: None,
            policy: LossyPolicy::Reject,
        }
    }

    #[test]
    fn test_explicit_context_wins_over_mrc() {
        let dir = tempfile::tempdir().unwrap();
        let mrc = dir.path().join("TS_01.mrc");
        fs::write(&mrc, mrc_bytes(1024, 1024, 3, 2.5)).unwrap();

        let from_header = resolve_context(ConversionContext::new(), Some(&mrc)).unwrap();
        assert_eq!(from_header.ts_size, Some(TiltSeriesSize::new(1024, 1024, 3)));
        assert_abs_diff_eq!(from_header.pixel_spacing.unwrap(), 2.5, epsilon = 1e-6);

        let explicit = ConversionContext::new().with_pixel_spacing(1.54);
        let merged = resolve_context(explicit, Some(&mrc)).unwrap();
        assert_eq!(merged.pixel_spacing, Some(1.54));
        assert_eq!(merged.ts_size, Some(TiltSeriesSize::new(1024, 1024, 3)));
    }

    #[test]
    fn test_missing_mrc_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.mrc");
        assert!(resolve_context(ConversionContext::new(), Some(&missing)).is_err());
    }

    #[test]
    fn test_run_conversion_to_imod() {
        let dir = tempfile::tempdir().unwrap();
        let job = job(dir.path(), "imod/TS_01");
        let outcome = run_conversion(&job, false).unwrap();
        assert_eq!(outcome.source, Format::AreTomo3);
        assert_eq!(outcome.target, Format::Imod);
        assert_eq!(outcome.projections, 3);
        assert!(outcome.files.iter().all(|f| f.exists()));
        assert!(dir.path().join("imod/TS_01.tlt").exists());
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = job(dir.path(), "TS_01.json");
        job.context = ConversionContext::new().with_pixel_spacing(1.0);
        let outcome = run_conversion(&job, true).unwrap();
        assert_eq!(outcome.target, Format::Portal);
        assert_eq!(outcome.files, vec![dir.path().join("TS_01.json")]);
        assert!(!dir.path().join("TS_01.json").exists());
    }

    #[test]
    fn test_portal_output_without_spacing_fails() {
        let dir = tempfile::tempdir().unwrap();
        let job = job(dir.path(), "TS_01.json");
        let err = run_conversion(&job, false).unwrap_err();
        assert!(format!("{:#}", err).contains("pixel_spacing"), "{:#}", err);
    }

    #[test]
    fn test_summary_lists_exclusions() {
        let dir = tempfile::tempdir().unwrap();
        let job = job(dir.path(), "unused");
        let (_, canonical) = load_canonical(&job.input, None, ConversionContext::new()).unwrap();
        let text = summarize(&canonical);
        assert!(text.contains("3 (2 included)"), "{}", text);
        assert!(text.contains("Excluded:        1"), "{}", text);
        assert!(text.contains("85.1000°"), "{}", text);
    }

    #[test]
    fn test_format_table_names_context() {
        let table = format_table().join("\n");
        assert!(table.contains("aretomo3"));
        assert!(table.contains("write needs: ts_size"));
        assert!(table.contains("read needs: pixel_spacing"));
    }
}
