//! AreTomo3 adapter.
//!
//! An `.aln` global record stores the inverse of the IMOD image transform
//! as a similarity: `GMAG · R(ROT)` with shift `(TX, TY)`. `ROT` is the
//! tilt-axis angle. Dark frames are raw sections without a global record;
//! they come back as excluded projections in raw-stack order.

use tomoalign_formats::aretomo::{AlnFile, DarkFrame, GlobalRecord, LocalRecord, DEFAULT_HEADER};
use tomoalign_formats::MAX_SECTIONS;
use tomoalign_geometry::{change_origin, similarity_decompose, Affine2, FrameOrigin};

use super::{
    included_spread, nonzero, ConversionError, ConversionReport, Converted, FormatAdapter, LossyNote,
    LossyPolicy,
};
use crate::context::{ContextKey, ConversionContext};
use crate::types::{CanonicalAlignment, Format, LocalPatch, ProjectionAlignment, SeriesParameters};

/// Reads and writes AreTomo3 `.aln` files.
pub struct AreTomo3Adapter;

impl AreTomo3Adapter {
    fn native_transform(record: &GlobalRecord) -> Affine2 {
        let mut t = Affine2::rotation(record.rot);
        t.matrix *= record.gmag;
        t.translation.x = record.tx;
        t.translation.y = record.ty;
        t
    }
}

impl FormatAdapter for AreTomo3Adapter {
    type Native = AlnFile;

    const FORMAT: Format = Format::AreTomo3;
    const ORIGIN: FrameOrigin = FrameOrigin::Center;
    const READ_REQUIRES: &'static [ContextKey] = &[];
    const WRITE_REQUIRES: &'static [ContextKey] = &[ContextKey::TsSize];

    fn from_native(
        native: &AlnFile,
        _ctx: &ConversionContext,
    ) -> Result<CanonicalAlignment, ConversionError> {
        let n = native.number_of_tilts();
        if n > MAX_SECTIONS {
            return Err(ConversionError::InvalidField {
                projection: None,
                field: "RawSize".into(),
                message: format!("z = {} is beyond {} sections", n, MAX_SECTIONS),
            });
        }
        if native.dark_frames.len() + native.global.len() != n {
            return Err(ConversionError::InconsistentProjectionCount {
                format: Self::FORMAT,
                counts: vec![
                    ("RawSize z".to_string(), n),
                    ("DarkFrame".to_string(), native.dark_frames.len()),
                    ("global records".to_string(), native.global.len()),
                ],
            });
        }

        let mut dark = vec![false; n];
        for d in &native.dark_frames {
            if d.section >= n {
                return Err(ConversionError::InvalidField {
                    projection: Some(d.section),
                    field: "DarkFrame".into(),
                    message: format!("section {} is outside RawSize z = {}", d.section, n),
                });
            }
            if std::mem::replace(&mut dark[d.section], true) {
                return Err(ConversionError::InvalidField {
                    projection: Some(d.section),
                    field: "DarkFrame".into(),
                    message: "listed more than once".into(),
                });
            }
        }

        let kept = native.kept_sections();

        let frame = tomoalign_geometry::FrameSize::new(
            native.raw_size[0] as f64,
            native.raw_size[1] as f64,
        );
        let default_axis = native.global.first().map_or(0.0, |g| g.rot);
        let mut slots: Vec<Option<ProjectionAlignment>> = vec![None; n];

        for (record, &section) in native.global.iter().zip(&kept) {
            let transform = change_origin(
                &Self::native_transform(record),
                Self::ORIGIN,
                FrameOrigin::Center,
                frame,
                1.0,
            );
            let full = transform
                .invert()
                .map_err(|e| ConversionError::from_geometry(section, e))?;
            let p = ProjectionAlignment::from_image_transform(record.tilt, record.rot, &full)
                .with_x_tilt(native.beta_offset);
            slots[section] = Some(p);
        }

        for local in &native.local {
            let section = *kept.get(local.sec).ok_or_else(|| ConversionError::InvalidField {
                projection: None,
                field: "Local Alignment".into(),
                message: format!("SEC {} has no global record", local.sec),
            })?;
            if let Some(p) = slots[section].as_mut() {
                p.local_alignment.get_or_insert_with(Vec::new).push(LocalPatch {
                    patch_index: local.patch,
                    center: [local.center_x, local.center_y],
                    shift: [local.shift_x, local.shift_y],
                    reliability: local.reliable,
                });
            }
        }

        for dark in &native.dark_frames {
            slots[dark.section] = Some(
                ProjectionAlignment::new(dark.tilt_angle, default_axis)
                    .with_x_tilt(native.beta_offset)
                    .excluded(),
            );
        }

        let projections: Vec<ProjectionAlignment> = slots.into_iter().flatten().collect();

        let series = SeriesParameters {
            volume_thickness: None,
            tilt_axis_offset: nonzero(native.alpha_offset),
            volume_shift: None,
        };

        log::debug!(
            "AreTomo3: {} sections, {} dark, {} local patches",
            n,
            native.dark_frames.len(),
            native.local.len()
        );
        CanonicalAlignment::new(projections, series, Self::FORMAT)
    }

    fn to_native(
        alignment: &CanonicalAlignment,
        ctx: &ConversionContext,
        policy: LossyPolicy,
    ) -> Result<Converted<AlnFile>, ConversionError> {
        let ts = ctx.require_ts_size(Self::FORMAT)?;
        if ts.z != alignment.len() {
            return Err(ConversionError::InconsistentProjectionCount {
                format: Self::FORMAT,
                counts: vec![
                    ("ts_size z".to_string(), ts.z),
                    ("projections".to_string(), alignment.len()),
                ],
            });
        }

        let mut report = ConversionReport::default();
        let projections = alignment.projections();

        // Dark frames take BetaOffset back on reading, so only included
        // projections have to agree on it.
        let beta = match included_spread(projections, |p| p.x_tilt) {
            Some(agg) if !agg.deviating.is_empty() => {
                report.lossy(
                    Self::FORMAT,
                    policy,
                    LossyNote {
                        field: "x_tilt".into(),
                        detail: format!(
                            "varies across projections; BetaOffset holds one value, writing the mean {:.4}",
                            agg.value
                        ),
                        projections: agg.deviating,
                    },
                )?;
                agg.value
            }
            Some(agg) => agg.value,
            None => 0.0,
        };

        if let Some(shift) = alignment.volume_shift().filter(|s| s.iter().any(|v| *v != 0.0)) {
            report.lossy(
                Self::FORMAT,
                policy,
                LossyNote {
                    field: "volume_shift".into(),
                    detail: format!("AreTomo3 has no volume shift; dropped ({}, {})", shift[0], shift[1]),
                    projections: Vec::new(),
                },
            )?;
        }

        let orphaned: Vec<usize> = projections
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.included && p.local_alignment.is_some())
            .map(|(i, _)| i)
            .collect();
        if !orphaned.is_empty() {
            report.lossy(
                Self::FORMAT,
                policy,
                LossyNote {
                    field: "local_alignment".into(),
                    detail: "dark frames carry no patch records; dropped".into(),
                    projections: orphaned,
                },
            )?;
        }

        if let Some(t) = alignment.volume_thickness() {
            report.omit(Self::FORMAT, format!("volume_thickness {:?}", t));
        }

        let mut dark_frames = Vec::new();
        let mut global = Vec::new();
        let mut local = Vec::new();
        let mut num_patches = 0;

        for (i, p) in projections.iter().enumerate() {
            if !p.included {
                dark_frames.push(DarkFrame {
                    section: i,
                    flag: 0,
                    tilt_angle: p.tilt_angle,
                });
                continue;
            }

            let sec = global.len();
            let native = p
                .image_transform()
                .invert()
                .map_err(|e| ConversionError::from_geometry(i, e))?;
            let native = change_origin(&native, FrameOrigin::Center, Self::ORIGIN, ts.frame(), 1.0);
            let (rot, gmag) = similarity_decompose(&native.matrix)
                .map_err(|e| ConversionError::from_geometry(i, e))?;
            global.push(GlobalRecord::new(
                sec,
                rot,
                gmag,
                native.translation.x,
                native.translation.y,
                p.tilt_angle,
            ));

            if let Some(patches) = &p.local_alignment {
                num_patches = num_patches.max(patches.len());
                local.extend(patches.iter().map(|patch| LocalRecord {
                    sec,
                    patch: patch.patch_index,
                    center_x: patch.center[0],
                    center_y: patch.center[1],
                    shift_x: patch.shift[0],
                    shift_y: patch.shift[1],
                    reliable: patch.reliability,
                }));
            }
        }

        Ok(Converted {
            native: AlnFile {
                header: DEFAULT_HEADER.to_string(),
                raw_size: [ts.x, ts.y, ts.z],
                num_patches,
                dark_frames,
                alpha_offset: alignment.tilt_axis_offset().unwrap_or(0.0),
                beta_offset: beta,
                global,
                local,
            },
            report,
        })
    }
}
