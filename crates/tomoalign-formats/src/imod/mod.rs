//! IMOD alignment files.
//!
//! An IMOD alignment is spread over several files sharing a basename:
//! `<base>.xf`, `<base>.tlt`, an optional `<base>.xtilt`, and the
//! `tilt.com`/`newst.com` command files in the same directory.

pub mod com;
pub mod tlt;
pub mod xf;

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::{write_files, ParseError};
pub use com::{parse_com, render_newst_com, render_tilt_com, ComParams, NewstParams};
pub use tlt::{parse_angles, render_angles};
pub use xf::{parse_xf, render_xf, XfRow};

/// Every IMOD file that contributes to an alignment.
#[derive(Debug, Clone, PartialEq)]
pub struct ImodAlignment {
    pub xf: Vec<XfRow>,
    pub tlt: Vec<f64>,
    pub xtilt: Option<Vec<f64>>,
    /// `tilt.com` directives, with geometry gaps filled from `newst.com`.
    pub com: Option<ComParams>,
}

impl ImodAlignment {
    /// Number of projections, as counted by the `.xf` file.
    pub fn number_of_tilts(&self) -> usize {
        self.xf.len()
    }

    /// Read all files belonging to `basename`.
    ///
    /// `.xf` and `.tlt` are required; `.xtilt`, `tilt.com` and `newst.com`
    /// are read when present.
    pub fn read_basename(basename: &Path) -> Result<Self, ParseError> {
        let xf = parse_xf(&std::fs::read_to_string(with_suffix(basename, ".xf"))?)?;
        let tlt = parse_angles(&std::fs::read_to_string(with_suffix(basename, ".tlt"))?)?;

        let xtilt_path = with_suffix(basename, ".xtilt");
        let xtilt = if xtilt_path.is_file() {
            Some(parse_angles(&std::fs::read_to_string(&xtilt_path)?)?)
        } else {
            None
        };

        let dir = parent_dir(basename);
        let tilt_com = read_com(&dir.join("tilt.com"))?;
        // newst.com file names describe the raw and aligned stacks, not tilt.com's.
        let newst_com = read_com(&dir.join("newst.com"))?
            .map(|n| ComParams {
                input_projections: None,
                output_file: None,
                ..n
            })
            .filter(ComParams::has_geometry);
        let com = match (tilt_com, newst_com) {
            (Some(t), Some(n)) => Some(t.merged_with(&n)),
            (t, n) => t.or(n),
        };

        log::debug!(
            "Read IMOD alignment {}: {} xf rows, {} tilts, xtilt {}, com {}",
            basename.display(),
            xf.len(),
            tlt.len(),
            if xtilt.is_some() { "present" } else { "absent" },
            if com.is_some() { "present" } else { "absent" },
        );

        Ok(Self { xf, tlt, xtilt, com })
    }

    /// Render every file for `basename` without touching the disk.
    ///
    /// File names inside `tilt.com` are rewritten to match `basename`.
    /// `newst.com` is always written; its aligned stack is the one
    /// `tilt.com` reads.
    pub fn render_files(&self, basename: &Path) -> Vec<(PathBuf, String)> {
        let stem = basename
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut files = vec![
            (with_suffix(basename, ".xf"), render_xf(&self.xf)),
            (with_suffix(basename, ".tlt"), render_angles(&self.tlt)),
        ];
        if let Some(xtilt) = &self.xtilt {
            files.push((with_suffix(basename, ".xtilt"), render_angles(xtilt)));
        }
        let mut newst = NewstParams::for_stem(&stem);
        if let Some(com) = &self.com {
            let mut com = com.clone();
            com.tilt_file = Some(format!("{}.tlt", stem));
            com.xtilt_file = self.xtilt.as_ref().map(|_| format!("{}.xtilt", stem));
            newst.output_file = com
                .input_projections
                .get_or_insert_with(|| newst.output_file.clone())
                .clone();
            com.output_file
                .get_or_insert_with(|| format!("{}_full_rec.mrc", stem));
            files.push((parent_dir(basename).join("tilt.com"), render_tilt_com(&com)));
        }
        files.push((parent_dir(basename).join("newst.com"), render_newst_com(&newst)));
        files
    }

    /// Write every file for `basename`, creating the directory if needed.
    ///
    /// No file is replaced unless all of them could be written.
    pub fn write_basename(&self, basename: &Path) -> Result<Vec<PathBuf>, ParseError> {
        Ok(write_files(&self.render_files(basename))?)
    }
}

/// `TS_01` + `.xf` -> `TS_01.xf`, keeping any dots already in the name.
pub fn with_suffix(basename: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(basename.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn parent_dir(basename: &Path) -> PathBuf {
    match basename.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn read_com(path: &Path) -> Result<Option<ComParams>, ParseError> {
    if !path.is_file() {
        return Ok(None);
    }
    Ok(Some(parse_com(&std::fs::read_to_string(path)?)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_suffix_keeps_dots() {
        let p = with_suffix(Path::new("/data/TS_01.st"), ".xf");
        assert_eq!(p, PathBuf::from("/data/TS_01.st.xf"));
    }

    #[test]
    fn test_parent_of_bare_name_is_cwd() {
        assert_eq!(parent_dir(Path::new("TS_01")), PathBuf::from("."));
    }

    #[test]
    fn test_render_files_names() {
        let aln = ImodAlignment {
            xf: vec![XfRow::identity()],
            tlt: vec![0.0],
            xtilt: Some(vec![0.0]),
            com: Some(ComParams {
                thickness: Some(300.0),
                ..Default::default()
            }),
        };
        let files = aln.render_files(Path::new("out/TS_07"));
        let names: Vec<_> = files.iter().map(|(p, _)| p.clone()).collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("out/TS_07.xf"),
                PathBuf::from("out/TS_07.tlt"),
                PathBuf::from("out/TS_07.xtilt"),
                PathBuf::from("out/tilt.com"),
                PathBuf::from("out/newst.com"),
            ]
        );
        let com = &files[3].1;
        assert!(com.contains("TILTFILE TS_07.tlt"));
        assert!(com.contains("XTILTFILE TS_07.xtilt"));
        assert!(com.contains("THICKNESS 300"));
        assert!(com.contains("InputProjections TS_07_ali.mrc"));
        let newst = &files[4].1;
        assert!(newst.contains("InputFile\tTS_07.mrc"));
        assert!(newst.contains("OutputFile\tTS_07_ali.mrc"));
        assert!(newst.contains("TransformFile\tTS_07.xf"));
    }

    #[test]
    fn test_newst_output_follows_tilt_input() {
        let aln = ImodAlignment {
            xf: vec![XfRow::identity()],
            tlt: vec![0.0],
            xtilt: None,
            com: Some(ComParams {
                input_projections: Some("binned_ali.mrc".into()),
                ..Default::default()
            }),
        };
        let files = aln.render_files(Path::new("TS"));
        let newst = &files.last().unwrap().1;
        assert!(newst.contains("OutputFile\tbinned_ali.mrc"), "{}", newst);
    }

    #[test]
    fn test_no_com_means_no_tilt_com() {
        let aln = ImodAlignment {
            xf: vec![XfRow::identity()],
            tlt: vec![0.0],
            xtilt: None,
            com: None,
        };
        let names: Vec<_> = aln
            .render_files(Path::new("TS"))
            .into_iter()
            .map(|(p, _)| p)
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("TS.xf"),
                PathBuf::from("TS.tlt"),
                PathBuf::from("./newst.com"),
            ]
        );
    }
}
