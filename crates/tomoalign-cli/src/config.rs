//! TOML configuration deserialisation for conversion jobs.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use tomoalign_core::{ConversionContext, Format, LossyPolicy};

/// Top-level job configuration.
#[derive(Debug, Deserialize)]
pub struct JobConfig {
    pub input: EndpointConfig,
    pub output: EndpointConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
}

/// One side of a conversion.
#[derive(Debug, Deserialize)]
pub struct EndpointConfig {
    /// File path, or the basename for IMOD.
    pub path: PathBuf,
    /// Inferred from the path when omitted.
    #[serde(default)]
    pub format: Option<Format>,
}

/// Tilt-series information the alignment files may not carry.
#[derive(Debug, Default, Deserialize)]
pub struct ContextConfig {
    /// `[x, y, z]`: frame width, frame height, number of tilts.
    #[serde(default)]
    pub ts_size: Option<[usize; 3]>,
    /// Å per pixel.
    #[serde(default)]
    pub pixel_spacing: Option<f64>,
    /// MRC stack whose header fills in whatever is not given above.
    #[serde(default)]
    pub mrc: Option<PathBuf>,
}

impl ContextConfig {
    /// The explicitly configured values, without the MRC header.
    pub fn explicit(&self) -> ConversionContext {
        ConversionContext {
            ts_size: self
                .ts_size
                .map(|[x, y, z]| tomoalign_core::TiltSeriesSize::new(x, y, z)),
            pixel_spacing: self.pixel_spacing,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub accept_lossy: bool,
}

impl PolicyConfig {
    pub fn lossy_policy(&self) -> LossyPolicy {
        if self.accept_lossy {
            LossyPolicy::Accept
        } else {
            LossyPolicy::Reject
        }
    }
}

impl JobConfig {
    /// Resolve relative paths against `base`, the directory of the job file.
    pub fn resolve_paths(&mut self, base: &Path) {
        for path in [&mut self.input.path, &mut self.output.path] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        if let Some(mrc) = self.context.mrc.as_mut().filter(|p| p.is_relative()) {
            *mrc = base.join(&*mrc);
        }
    }
}

/// Parse a job configuration from TOML text.
pub fn parse_config(content: &str) -> anyhow::Result<JobConfig> {
    let config: JobConfig = toml::from_str(content)?;
    if let Some(spacing) = config.context.pixel_spacing {
        anyhow::ensure!(
            spacing.is_finite() && spacing > 0.0,
            "context.pixel_spacing must be positive, got {}",
            spacing
        );
    }
    if let Some(size) = config.context.ts_size {
        anyhow::ensure!(
            size.iter().all(|d| *d > 0),
            "context.ts_size must be positive, got {:?}",
            size
        );
    }
    Ok(config)
}

/// Load and parse a TOML job configuration file.
///
/// Relative paths inside the file are taken relative to the file itself.
pub fn load_config(path: &Path) -> anyhow::Result<JobConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job file {}", path.display()))?;
    let mut config = parse_config(&content)
        .with_context(|| format!("Invalid job file {}", path.display()))?;
    if let Some(dir) = path.parent() {
        config.resolve_paths(dir);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
[input]
path = "TS_01.aln"
format = "aretomo"

[output]
path = "out/TS_01"
format = "imod"

[context]
ts_size = [4096, 4096, 41]
pixel_spacing = 1.54
mrc = "TS_01.mrc"

[policy]
accept_lossy = true
"#;

    #[test]
    fn test_full_config() {
        let job = parse_config(FULL).unwrap();
        assert_eq!(job.input.format, Some(Format::AreTomo3));
        assert_eq!(job.output.format, Some(Format::Imod));
        assert_eq!(job.context.ts_size, Some([4096, 4096, 41]));
        assert_eq!(job.context.mrc, Some(PathBuf::from("TS_01.mrc")));
        assert_eq!(job.policy.lossy_policy(), LossyPolicy::Accept);

        let ctx = job.context.explicit();
        assert_eq!(ctx.ts_size.map(|s| s.z), Some(41));
        assert_eq!(ctx.pixel_spacing, Some(1.54));
    }

    #[test]
    fn test_minimal_config_defaults() {
        let job = parse_config(
            r#"
[input]
path = "TS_01"
[output]
path = "TS_01.json"
"#,
        )
        .unwrap();
        assert_eq!(job.input.format, None);
        assert_eq!(job.policy.lossy_policy(), LossyPolicy::Reject);
        assert_eq!(job.context.explicit(), ConversionContext::new());
    }

    #[test]
    fn test_rejects_bad_values() {
        let bad_format = r#"
[input]
path = "a"
format = "mrc"
[output]
path = "b"
"#;
        assert!(parse_config(bad_format).is_err());

        let bad_spacing = r#"
[input]
path = "a"
[output]
path = "b"
[context]
pixel_spacing = -1.0
"#;
        assert!(parse_config(bad_spacing).is_err());
    }

    #[test]
    fn test_relative_paths_follow_job_file() {
        let mut job = parse_config(FULL).unwrap();
        job.resolve_paths(Path::new("/data/run1"));
        assert_eq!(job.input.path, PathBuf::from("/data/run1/TS_01.aln"));
        assert_eq!(job.output.path, PathBuf::from("/data/run1/out/TS_01"));
        assert_eq!(job.context.mrc, Some(PathBuf::from("/data/run1/TS_01.mrc")));
    }
}
