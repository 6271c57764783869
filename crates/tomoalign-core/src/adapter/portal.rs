//! cryoET Data Portal adapter.
//!
//! Each section stores the same inverse image transform as AreTomo3, but
//! as a full 2x2 matrix with offsets in Å. Sections left out of
//! reconstruction are simply absent from `per_section_alignment_parameters`.
//! The x-axis tilt shared by all included sections is written once as
//! `x_rotation_offset`; each section keeps only its difference from it.

use tomoalign_formats::portal::{PortalAlignment, SectionParameters, Xyz};
use tomoalign_formats::MAX_SECTIONS;
use tomoalign_geometry::{change_origin, similarity_decompose, Affine2, FrameOrigin};

use super::{
    included_spread, nonzero, ConversionError, ConversionReport, Converted, FormatAdapter,
    LossyNote, LossyPolicy,
};
use crate::context::{ContextKey, ConversionContext};
use crate::types::{CanonicalAlignment, Format, Length, ProjectionAlignment, SeriesParameters};

/// Reads and writes portal alignment JSON.
pub struct PortalAdapter;

impl FormatAdapter for PortalAdapter {
    type Native = PortalAlignment;

    const FORMAT: Format = Format::Portal;
    const ORIGIN: FrameOrigin = FrameOrigin::Center;
    const READ_REQUIRES: &'static [ContextKey] = &[ContextKey::PixelSpacing];
    const WRITE_REQUIRES: &'static [ContextKey] = &[ContextKey::PixelSpacing];

    fn from_native(
        native: &PortalAlignment,
        ctx: &ConversionContext,
    ) -> Result<CanonicalAlignment, ConversionError> {
        let spacing = ctx.require_pixel_spacing(Self::FORMAT)?;
        let sections = &native.per_section_alignment_parameters;
        if let Some(s) = sections.iter().find(|s| s.z_index >= MAX_SECTIONS) {
            return Err(ConversionError::InvalidField {
                projection: Some(s.z_index),
                field: "z_index".into(),
                message: format!("beyond {} sections", MAX_SECTIONS),
            });
        }
        let n = match ctx.ts_size {
            Some(ts) if ts.z > MAX_SECTIONS => {
                return Err(ConversionError::InvalidField {
                    projection: None,
                    field: "ts_size".into(),
                    message: format!("z = {} is beyond {} sections", ts.z, MAX_SECTIONS),
                });
            }
            Some(ts) => ts.z,
            None => native.number_of_tilts(),
        };
        if let Some(s) = sections.iter().find(|s| s.z_index >= n) {
            return Err(ConversionError::InvalidField {
                projection: Some(s.z_index),
                field: "z_index".into(),
                message: format!("outside ts_size z = {}", n),
            });
        }

        let mut slots: Vec<Option<ProjectionAlignment>> = vec![None; n];
        let mut first_axis = None;
        for s in sections {
            if slots[s.z_index].is_some() {
                return Err(ConversionError::InvalidField {
                    projection: Some(s.z_index),
                    field: "z_index".into(),
                    message: "listed more than once".into(),
                });
            }
            let transform = Affine2::from_parts(
                s.in_plane_rotation,
                [s.x_offset / spacing, s.y_offset / spacing],
            );
            let (axis, _) = similarity_decompose(&transform.matrix)
                .map_err(|e| ConversionError::from_geometry(s.z_index, e))?;
            let full = transform
                .invert()
                .map_err(|e| ConversionError::from_geometry(s.z_index, e))?;
            first_axis.get_or_insert(axis);

            slots[s.z_index] = Some(
                ProjectionAlignment::from_image_transform(s.tilt_angle, axis, &full)
                    .with_x_tilt(s.volume_x_rotation + native.x_rotation_offset),
            );
        }

        let axis = first_axis.unwrap_or(0.0);
        let projections: Vec<ProjectionAlignment> = slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    ProjectionAlignment::new(0.0, axis)
                        .with_x_tilt(native.x_rotation_offset)
                        .excluded()
                })
            })
            .collect();

        if native.volume_offset.y != 0.0 {
            log::warn!(
                "portal: volume_offset.y = {} has no canonical counterpart; ignored",
                native.volume_offset.y
            );
        }
        let offset = native.volume_offset;
        let series = SeriesParameters {
            volume_thickness: (native.volume_dimension.z > 0.0)
                .then_some(Length::Angstroms(native.volume_dimension.z)),
            tilt_axis_offset: nonzero(native.tilt_offset),
            volume_shift: (offset.x != 0.0 || offset.z != 0.0)
                .then(|| [offset.x / spacing, offset.z / spacing]),
        };

        let source = native.format.parse().unwrap_or(Self::FORMAT);
        log::debug!(
            "portal: {} sections of {} ({} listed), source {}",
            n,
            native.format,
            sections.len(),
            source
        );
        CanonicalAlignment::new(projections, series, source)
    }

    fn to_native(
        alignment: &CanonicalAlignment,
        ctx: &ConversionContext,
        policy: LossyPolicy,
    ) -> Result<Converted<PortalAlignment>, ConversionError> {
        let spacing = ctx.require_pixel_spacing(Self::FORMAT)?;
        let mut report = ConversionReport::default();
        let projections = alignment.projections();

        let with_local: Vec<usize> = projections
            .iter()
            .enumerate()
            .filter(|(_, p)| p.local_alignment.is_some())
            .map(|(i, _)| i)
            .collect();
        if !with_local.is_empty() {
            report.lossy(
                Self::FORMAT,
                policy,
                LossyNote {
                    field: "local_alignment".into(),
                    detail: "portal alignments are global only; dropped".into(),
                    projections: with_local,
                },
            )?;
        }

        let x_rotation_offset = match included_spread(projections, |p| p.x_tilt) {
            Some(agg) if agg.deviating.is_empty() => agg.value,
            _ => 0.0,
        };

        let dropped = alignment.excluded_indices();
        if !dropped.is_empty() {
            report.omit(
                Self::FORMAT,
                format!("tilt angles of {} excluded projections", dropped.len()),
            );
        }

        let mut sections = Vec::with_capacity(alignment.included_count());
        for (i, p) in projections.iter().enumerate().filter(|(_, p)| p.included) {
            let native = p
                .image_transform()
                .invert()
                .map_err(|e| ConversionError::from_geometry(i, e))?;
            let native = match ctx.ts_size {
                Some(ts) => change_origin(&native, FrameOrigin::Center, Self::ORIGIN, ts.frame(), 1.0),
                None => native,
            };
            sections.push(SectionParameters {
                z_index: i,
                tilt_angle: p.tilt_angle,
                volume_x_rotation: p.x_tilt - x_rotation_offset,
                in_plane_rotation: native.matrix_rows(),
                x_offset: native.translation.x * spacing,
                y_offset: native.translation.y * spacing,
            });
        }

        let shift = alignment.volume_shift().unwrap_or([0.0, 0.0]);
        let thickness = alignment
            .volume_thickness()
            .and_then(|t| t.to_angstroms(Some(spacing)))
            .unwrap_or(0.0);
        let volume_dimension = Xyz {
            x: ctx.ts_size.map_or(0.0, |ts| ts.x as f64 * spacing),
            y: ctx.ts_size.map_or(0.0, |ts| ts.y as f64 * spacing),
            z: thickness,
        };

        Ok(Converted {
            native: PortalAlignment {
                affine_transformation_matrix: PortalAlignment::IDENTITY_4X4,
                alignment_type: "GLOBAL".into(),
                format: alignment.source_format().label().into(),
                is_canonical: true,
                tilt_offset: alignment.tilt_axis_offset().unwrap_or(0.0),
                volume_offset: Xyz {
                    x: shift[0] * spacing,
                    y: 0.0,
                    z: shift[1] * spacing,
                },
                x_rotation_offset,
                per_section_alignment_parameters: sections,
                volume_dimension,
            },
            report,
        })
    }
}
