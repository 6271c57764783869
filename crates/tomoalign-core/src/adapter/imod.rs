//! IMOD adapter.
//!
//! `.xf` rows are the image transforms of the canonical model directly.
//! IMOD holds the tilt-axis angle as the single `XAXISTILT` directive, so a
//! series whose projections disagree on it can only be written lossily:
//! every `.xf` row still folds its own angle, but `XAXISTILT` carries the
//! mean.

use tomoalign_formats::imod::{ComParams, ImodAlignment, XfRow};
use tomoalign_geometry::{change_origin, Affine2, FrameOrigin};

use super::{
    included_spread, ConversionError, ConversionReport, Converted, FormatAdapter, LossyNote,
    LossyPolicy, TiltAxisAggregate,
};
use crate::context::{ContextKey, ConversionContext};
use crate::types::{CanonicalAlignment, Format, Length, ProjectionAlignment, SeriesParameters};

/// Reads and writes IMOD basenames.
pub struct ImodAdapter;

impl FormatAdapter for ImodAdapter {
    type Native = ImodAlignment;

    const FORMAT: Format = Format::Imod;
    const ORIGIN: FrameOrigin = FrameOrigin::Center;
    const READ_REQUIRES: &'static [ContextKey] = &[];
    const WRITE_REQUIRES: &'static [ContextKey] = &[];

    fn from_native(
        native: &ImodAlignment,
        _ctx: &ConversionContext,
    ) -> Result<CanonicalAlignment, ConversionError> {
        let n = native.xf.len();
        let xtilt_len = native.xtilt.as_ref().map(Vec::len);
        if native.tlt.len() != n || xtilt_len.is_some_and(|len| len != n) {
            let mut counts = vec![(".xf".to_string(), n), (".tlt".to_string(), native.tlt.len())];
            if let Some(len) = xtilt_len {
                counts.push((".xtilt".to_string(), len));
            }
            return Err(ConversionError::InconsistentProjectionCount {
                format: Self::FORMAT,
                counts,
            });
        }

        let com = native.com.clone().unwrap_or_default();
        let axis = com.x_axis_tilt.unwrap_or(0.0);

        let mut excluded = vec![false; n];
        for &view in &com.exclude {
            if view == 0 || view > n {
                return Err(ConversionError::InvalidField {
                    projection: None,
                    field: "EXCLUDELIST2".into(),
                    message: format!("view {} is outside 1..={}", view, n),
                });
            }
            excluded[view - 1] = true;
        }

        let mut projections = Vec::with_capacity(n);
        for (i, row) in native.xf.iter().enumerate() {
            let full = Affine2::from_parts(row.matrix(), row.shift());
            if full.is_singular() {
                return Err(ConversionError::SingularTransform {
                    projection: i,
                    determinant: full.determinant(),
                });
            }
            let mut p = ProjectionAlignment::from_image_transform(native.tlt[i], axis, &full);
            p.x_tilt = native.xtilt.as_ref().map_or(0.0, |x| x[i]);
            p.included = !excluded[i];
            projections.push(p);
        }

        let series = SeriesParameters {
            volume_thickness: com.thickness.map(Length::Pixels),
            tilt_axis_offset: com.offset,
            volume_shift: com.shift,
        };

        log::debug!(
            "IMOD: {} projections, XAXISTILT {}, {} excluded",
            n,
            axis,
            com.exclude.len()
        );
        CanonicalAlignment::new(projections, series, Self::FORMAT)
    }

    fn to_native(
        alignment: &CanonicalAlignment,
        ctx: &ConversionContext,
        policy: LossyPolicy,
    ) -> Result<Converted<ImodAlignment>, ConversionError> {
        ctx.require(Self::FORMAT, Self::WRITE_REQUIRES)?;
        let mut report = ConversionReport::default();
        let projections = alignment.projections();

        // Excluded views do not enter the reconstruction, so only included
        // ones have to agree on the axis.
        let aggregate =
            included_spread(projections, |p| p.tilt_axis_angle).unwrap_or(TiltAxisAggregate {
                value: 0.0,
                deviating: Vec::new(),
            });
        if !aggregate.deviating.is_empty() {
            report.lossy(
                Self::FORMAT,
                policy,
                LossyNote {
                    field: "tilt_axis_angle".into(),
                    detail: format!(
                        "varies across projections; XAXISTILT holds one value, writing the mean {:.4}",
                        aggregate.value
                    ),
                    projections: aggregate.deviating.clone(),
                },
            )?;
        }
        report.tilt_axis = Some(aggregate.clone());

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
                    detail: "IMOD alignment files hold no patch corrections; dropped".into(),
                    projections: with_local,
                },
            )?;
        }

        let thickness = match alignment.volume_thickness() {
            Some(t) => Some(t.to_pixels(ctx.pixel_spacing).ok_or(
                ConversionError::MissingContext {
                    format: Self::FORMAT,
                    key: ContextKey::PixelSpacing,
                },
            )?),
            None => None,
        };

        let xf = projections
            .iter()
            .map(|p| {
                let full = match ctx.ts_size {
                    Some(ts) => change_origin(
                        &p.image_transform(),
                        FrameOrigin::Center,
                        Self::ORIGIN,
                        ts.frame(),
                        1.0,
                    ),
                    None => p.image_transform(),
                };
                XfRow::from_parts(full.matrix_rows(), full.shift())
            })
            .collect();
        let tlt = alignment.tilt_angles();
        let xtilt = projections
            .iter()
            .any(|p| p.x_tilt != 0.0)
            .then(|| projections.iter().map(|p| p.x_tilt).collect());

        let com = ComParams {
            x_axis_tilt: Some(aggregate.value),
            thickness,
            offset: alignment.tilt_axis_offset(),
            shift: alignment.volume_shift(),
            full_image: full_image(ctx)?,
            exclude: alignment.excluded_indices().iter().map(|i| i + 1).collect(),
            ..Default::default()
        };
        let com = (com.has_geometry() && com != x_axis_only(0.0)).then_some(com);

        Ok(Converted {
            native: ImodAlignment {
                xf,
                tlt,
                xtilt,
                com,
            },
            report,
        })
    }
}

/// `FULLIMAGE` from the context frame size, which must fit IMOD's integers.
fn full_image(ctx: &ConversionContext) -> Result<Option<[u32; 2]>, ConversionError> {
    let Some(ts) = ctx.ts_size else {
        return Ok(None);
    };
    match (u32::try_from(ts.x), u32::try_from(ts.y)) {
        (Ok(x), Ok(y)) => Ok(Some([x, y])),
        _ => Err(ConversionError::InvalidField {
            projection: None,
            field: "FULLIMAGE".into(),
            message: format!("frame {} x {} does not fit IMOD's integer size", ts.x, ts.y),
        }),
    }
}

fn x_axis_only(value: f64) -> ComParams {
    ComParams {
        x_axis_tilt: Some(value),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn native(xf: Vec<XfRow>, tlt: Vec<f64>) -> ImodAlignment {
        ImodAlignment {
            xf,
            tlt,
            xtilt: None,
            com: None,
        }
    }

    #[test]
    fn test_missing_xtilt_defaults_to_zero() {
        let aln = native(vec![XfRow::identity(); 3], vec![-3.0, 0.0, 3.0]);
        let c = ImodAdapter::from_native(&aln, &ConversionContext::new()).unwrap();
        assert!(c.projections().iter().all(|p| p.x_tilt == 0.0));
        assert!(c.projections().iter().all(|p| p.tilt_axis_angle == 0.0));
    }

    #[test]
    fn test_count_mismatch_is_fatal() {
        let mut aln = native(vec![XfRow::identity(); 3], vec![-3.0, 0.0, 3.0]);
        aln.xtilt = Some(vec![0.0, 0.0]);
        let err = ImodAdapter::from_native(&aln, &ConversionContext::new()).unwrap_err();
        match err {
            ConversionError::InconsistentProjectionCount { counts, .. } => {
                assert_eq!(counts.len(), 3);
                assert_eq!(counts[2], (".xtilt".to_string(), 2));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_exclude_list_marks_projections() {
        let mut aln = native(vec![XfRow::identity(); 4], vec![-6.0, -3.0, 0.0, 3.0]);
        aln.com = Some(ComParams {
            exclude: vec![1, 4],
            ..Default::default()
        });
        let c = ImodAdapter::from_native(&aln, &ConversionContext::new()).unwrap();
        assert_eq!(c.excluded_indices(), vec![0, 3]);

        let back = ImodAdapter::to_native(&c, &ConversionContext::new(), LossyPolicy::Reject)
            .unwrap()
            .native;
        assert_eq!(back.com.unwrap().exclude, vec![1, 4]);
    }

    #[test]
    fn test_exclude_out_of_range() {
        let mut aln = native(vec![XfRow::identity(); 2], vec![0.0, 3.0]);
        aln.com = Some(ComParams {
            exclude: vec![3],
            ..Default::default()
        });
        assert!(matches!(
            ImodAdapter::from_native(&aln, &ConversionContext::new()),
            Err(ConversionError::InvalidField { .. })
        ));
    }

    #[test]
    fn test_singular_row_reports_index() {
        let mut rows = vec![XfRow::identity(); 3];
        rows[2] = XfRow::from_parts([[0.0, 0.0], [0.0, 0.0]], [1.0, 1.0]);
        let err = ImodAdapter::from_native(&native(rows, vec![0.0; 3]), &ConversionContext::new())
            .unwrap_err();
        assert!(matches!(err, ConversionError::SingularTransform { projection: 2, .. }));
    }

    #[test]
    fn test_axis_is_factored_out_and_restored() {
        let row = XfRow::from_parts([[0.9803519, -0.1972494], [0.1972494, 0.9803519]], [22.751, -0.799]);
        let mut aln = native(vec![row], vec![-60.0]);
        aln.com = Some(x_axis_only(11.0));
        let c = ImodAdapter::from_native(&aln, &ConversionContext::new()).unwrap();
        let p = &c.projections()[0];
        assert_eq!(p.tilt_axis_angle, 11.0);

        let back = ImodAdapter::to_native(&c, &ConversionContext::new(), LossyPolicy::Reject)
            .unwrap()
            .native;
        assert_abs_diff_eq!(back.xf[0].a12, row.a12, epsilon = 1e-12);
        assert_abs_diff_eq!(back.xf[0].dx, row.dx, epsilon = 1e-12);
        assert_eq!(back.com.unwrap().x_axis_tilt, Some(11.0));
    }

    #[test]
    fn test_angstrom_thickness_needs_spacing() {
        let c = CanonicalAlignment::new(
            vec![ProjectionAlignment::new(0.0, 0.0)],
            SeriesParameters {
                volume_thickness: Some(Length::Angstroms(1540.0)),
                ..Default::default()
            },
            Format::Portal,
        )
        .unwrap();

        let err = ImodAdapter::to_native(&c, &ConversionContext::new(), LossyPolicy::Reject)
            .unwrap_err();
        assert!(matches!(
            err,
            ConversionError::MissingContext { key: ContextKey::PixelSpacing, .. }
        ));

        let ctx = ConversionContext::new().with_pixel_spacing(1.54);
        let out = ImodAdapter::to_native(&c, &ctx, LossyPolicy::Reject).unwrap();
        assert_abs_diff_eq!(out.native.com.unwrap().thickness.unwrap(), 1000.0, epsilon = 1e-9);
    }

    #[test]
    fn test_plain_series_writes_no_com() {
        let aln = native(vec![XfRow::identity(); 2], vec![0.0, 3.0]);
        let c = ImodAdapter::from_native(&aln, &ConversionContext::new()).unwrap();
        let out = ImodAdapter::to_native(&c, &ConversionContext::new(), LossyPolicy::Reject).unwrap();
        assert!(out.native.com.is_none());
        assert!(out.native.xtilt.is_none());
        assert!(out.report.is_exact());
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let aln = native(vec![XfRow::identity()], vec![0.0]);
        let c = ImodAdapter::from_native(&aln, &ConversionContext::new()).unwrap();

        let ctx = ConversionContext::new().with_ts_size(u32::MAX as usize + 1, 2048, 1);
        let err = ImodAdapter::to_native(&c, &ctx, LossyPolicy::Accept).unwrap_err();
        assert!(
            matches!(err, ConversionError::InvalidField { ref field, .. } if field == "FULLIMAGE"),
            "{}",
            err
        );

        let ctx = ConversionContext::new().with_ts_size(4096, 2048, 1);
        let com = ImodAdapter::to_native(&c, &ctx, LossyPolicy::Reject).unwrap().native.com;
        assert_eq!(com.unwrap().full_image, Some([4096, 2048]));
    }
}
