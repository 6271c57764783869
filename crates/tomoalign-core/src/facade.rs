//! Conversion facade.
//!
//! Reads native files, dispatches to the matching adapter by [`Format`] and
//! writes the result. Every conversion goes native → canonical → native;
//! there are no direct format-to-format paths.

use std::path::{Path, PathBuf};

use tomoalign_formats::aretomo::{parse_aln, AlnFile};
use tomoalign_formats::imod::ImodAlignment;
use tomoalign_formats::portal::PortalAlignment;
use tomoalign_formats::write_files;

use crate::adapter::{
    AreTomo3Adapter, ConversionError, Converted, FormatAdapter, ImodAdapter, LossyPolicy,
    PortalAdapter,
};
use crate::context::{ContextKey, ConversionContext, TiltSeriesSize};
use crate::types::{CanonicalAlignment, Format};

/// A native alignment of any supported format.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeAlignment {
    Imod(ImodAlignment),
    AreTomo3(AlnFile),
    Portal(PortalAlignment),
}

impl NativeAlignment {
    pub fn format(&self) -> Format {
        match self {
            NativeAlignment::Imod(_) => Format::Imod,
            NativeAlignment::AreTomo3(_) => Format::AreTomo3,
            NativeAlignment::Portal(_) => Format::Portal,
        }
    }

    /// Number of projections the native files describe, excluded ones included.
    pub fn number_of_tilts(&self) -> usize {
        match self {
            NativeAlignment::Imod(a) => a.number_of_tilts(),
            NativeAlignment::AreTomo3(a) => a.number_of_tilts(),
            NativeAlignment::Portal(a) => a.number_of_tilts(),
        }
    }

    /// Context the native files record about themselves.
    pub fn context_hint(&self) -> ConversionContext {
        let ts_size = match self {
            NativeAlignment::Imod(a) => a
                .com
                .as_ref()
                .and_then(|c| c.full_image)
                .and_then(|[x, y]| Some((usize::try_from(x).ok()?, usize::try_from(y).ok()?)))
                .map(|(x, y)| TiltSeriesSize::new(x, y, a.number_of_tilts())),
            NativeAlignment::AreTomo3(a) => {
                let [x, y, z] = a.raw_size;
                Some(TiltSeriesSize::new(x, y, z))
            }
            NativeAlignment::Portal(_) => None,
        };
        ConversionContext {
            ts_size,
            pixel_spacing: None,
        }
    }
}

/// Direction of a conversion relative to the canonical model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Native → canonical.
    Read,
    /// Canonical → native.
    Write,
}

/// Context keys `format` cannot work without in `direction`.
pub fn required_context(format: Format, direction: Direction) -> &'static [ContextKey] {
    match (format, direction) {
        (Format::Imod, Direction::Read) => ImodAdapter::READ_REQUIRES,
        (Format::Imod, Direction::Write) => ImodAdapter::WRITE_REQUIRES,
        (Format::AreTomo3, Direction::Read) => AreTomo3Adapter::READ_REQUIRES,
        (Format::AreTomo3, Direction::Write) => AreTomo3Adapter::WRITE_REQUIRES,
        (Format::Portal, Direction::Read) => PortalAdapter::READ_REQUIRES,
        (Format::Portal, Direction::Write) => PortalAdapter::WRITE_REQUIRES,
    }
}

/// Guess the format of `path`: `.aln` is AreTomo3, `.json` the portal,
/// anything else an IMOD basename.
pub fn infer_format(path: &Path) -> Format {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("aln") => Format::AreTomo3,
        Some("json") => Format::Portal,
        _ => Format::Imod,
    }
}

/// IMOD basename for `path`, dropping a trailing `.xf`.
pub fn imod_basename(path: &Path) -> PathBuf {
    match path.extension().and_then(|e| e.to_str()) {
        Some("xf") => path.with_extension(""),
        _ => path.to_path_buf(),
    }
}

/// Read the native alignment at `path`.
pub fn read(path: &Path, format: Option<Format>) -> Result<NativeAlignment, ConversionError> {
    let format = format.unwrap_or_else(|| infer_format(path));
    log::debug!("Reading {} as {}", path.display(), format);
    let native = match format {
        Format::Imod => NativeAlignment::Imod(ImodAlignment::read_basename(&imod_basename(path))?),
        Format::AreTomo3 => NativeAlignment::AreTomo3(parse_aln(&std::fs::read_to_string(path)?)?),
        Format::Portal => {
            NativeAlignment::Portal(PortalAlignment::from_json(&std::fs::read_to_string(path)?)?)
        }
    };
    Ok(native)
}

/// Render every output file for `native` at `path` without writing.
pub fn render(
    native: &NativeAlignment,
    path: &Path,
) -> Result<Vec<(PathBuf, String)>, ConversionError> {
    Ok(match native {
        NativeAlignment::Imod(a) => a.render_files(&imod_basename(path)),
        NativeAlignment::AreTomo3(a) => vec![(path.to_path_buf(), a.render())],
        NativeAlignment::Portal(a) => vec![(path.to_path_buf(), a.to_json()?)],
    })
}

/// Write `native` to `path`, returning the files created.
///
/// All files are rendered first and staged next to their targets; none is
/// replaced unless every one of them could be written.
pub fn write(native: &NativeAlignment, path: &Path) -> Result<Vec<PathBuf>, ConversionError> {
    let files = render(native, path)?;
    Ok(write_files(&files)?)
}

/// Convert a native alignment into the canonical model.
pub fn to_canonical(
    native: &NativeAlignment,
    ctx: &ConversionContext,
) -> Result<CanonicalAlignment, ConversionError> {
    let format = native.format();
    ctx.require(format, required_context(format, Direction::Read))?;
    match native {
        NativeAlignment::Imod(a) => ImodAdapter::from_native(a, ctx),
        NativeAlignment::AreTomo3(a) => AreTomo3Adapter::from_native(a, ctx),
        NativeAlignment::Portal(a) => PortalAdapter::from_native(a, ctx),
    }
}

/// Convert a canonical alignment into `format`.
pub fn from_canonical(
    alignment: &CanonicalAlignment,
    format: Format,
    ctx: &ConversionContext,
    policy: LossyPolicy,
) -> Result<Converted<NativeAlignment>, ConversionError> {
    ctx.require(format, required_context(format, Direction::Write))?;
    Ok(match format {
        Format::Imod => ImodAdapter::to_native(alignment, ctx, policy)?.map(NativeAlignment::Imod),
        Format::AreTomo3 => {
            AreTomo3Adapter::to_native(alignment, ctx, policy)?.map(NativeAlignment::AreTomo3)
        }
        Format::Portal => {
            PortalAdapter::to_native(alignment, ctx, policy)?.map(NativeAlignment::Portal)
        }
    })
}

/// Convert `native` into `target` via the canonical model.
///
/// Context missing from `ctx` is taken from what the source files record
/// about themselves (see [`NativeAlignment::context_hint`]).
pub fn convert(
    native: &NativeAlignment,
    target: Format,
    ctx: &ConversionContext,
    policy: LossyPolicy,
) -> Result<Converted<NativeAlignment>, ConversionError> {
    let ctx = ctx.or(&native.context_hint());
    ctx.require(target, required_context(target, Direction::Write))?;

    let canonical = to_canonical(native, &ctx)?;
    let converted = from_canonical(&canonical, target, &ctx, policy)?;
    log::info!(
        "Converted {} projections from {} to {}{}",
        canonical.len(),
        native.format(),
        target,
        if converted.report.is_exact() { "" } else { " (lossy)" }
    );
    Ok(converted)
}
