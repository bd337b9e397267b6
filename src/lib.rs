//! GPU develop engine for a RAW photo editor.
//!
//! The crate renders a display-ready sRGB image from a float-RGB input
//! (scene-linear for RAW files, sRGB-encoded otherwise) and a fixed-layout
//! bundle of adjustments. All shading happens in a single compute kernel
//! ([`dispatch::Dispatcher`]); the host owns every texture and calls the
//! dispatcher once per tile. Up to eight spatial masks, each carrying its own
//! nested adjustment stack, composite on top of the global stack in slot
//! order.
//!
//! The engine consumes four precomputed blurred copies of the input
//! (sharpness, tonal, clarity, structure radii) but does not produce them;
//! likewise mask influence textures and the optional 3D LUT and flare map are
//! host-provided inputs.

use thiserror::Error;

pub mod dispatch;
pub mod lut;
pub mod params;

pub use dispatch::{
    create_input_texture, create_lut_texture, create_mask_texture, create_output_texture,
    Dispatcher, FlareInput, GpuContext, LutTexture, TileInputs,
};
pub use lut::Lut;
pub use params::{
    all_adjustments_from_json, AllAdjustments, ColorCalibrationSettings, ColorGradeSettings,
    CurvePoint, GlobalAdjustments, HslBand, MaskAdjustments, MAX_MASKS,
};

pub type RenderResult<T> = Result<T, RenderError>;

/// Failures surfaced on the host side before or around a dispatch. The
/// kernel itself is total: it clamps and guards every divisor and never
/// raises.
#[derive(Debug, Error)]
pub enum RenderError {
    /// A binding the uniform claims to use was not supplied (LUT, flare
    /// texture, or a mask slot).
    #[error("missing resource: {0}")]
    MissingResource(&'static str),
    /// Input, blur, mask, or output textures disagree on extent.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),
    /// A tone curve has an out-of-range point count or non-monotonic x
    /// coordinates. The host should repair the curve and retry.
    #[error("invalid curve: {0}")]
    InvalidCurve(String),
    /// Adapter, device, poll, or buffer-map failure. The host may retry the
    /// dispatch after recreating resources.
    #[error("gpu device error: {0}")]
    Device(String),
}
