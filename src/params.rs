//! The uniform parameter bundle and its host-side construction.
//!
//! The shader reads a single fixed-layout uniform: global adjustments, up to
//! eight per-mask adjustment records, the valid mask count, the tile offset,
//! and a reserved atlas-columns field. Every struct here is `#[repr(C)]` with
//! explicit padding so the Rust offsets equal the WGSL uniform offsets;
//! struct-typed members and array elements sit on 16-byte boundaries as the
//! uniform address space requires.

use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::{RenderError, RenderResult};

/// Mask slots addressable by the kernel. More masks must be flattened by the
/// host before dispatch.
pub const MAX_MASKS: usize = 8;

/// Control points per tone curve. A valid curve uses between 2 and 16 of
/// them, sorted strictly ascending in x with endpoints pinned to 0 and 255.
pub const MAX_CURVE_POINTS: usize = 16;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Pod, Zeroable, Default, PartialEq)]
#[repr(C)]
pub struct CurvePoint {
    pub x: f32,
    pub y: f32,
    _pad0: f32,
    _pad1: f32,
}

impl CurvePoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            _pad0: 0.0,
            _pad1: 0.0,
        }
    }
}

/// The two-point identity curve `(0,0)-(255,255)`.
pub fn identity_curve() -> [CurvePoint; MAX_CURVE_POINTS] {
    let mut points = [CurvePoint::default(); MAX_CURVE_POINTS];
    points[0] = CurvePoint::new(0.0, 0.0);
    points[1] = CurvePoint::new(255.0, 255.0);
    points
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Pod, Zeroable, Default)]
#[repr(C)]
pub struct HslBand {
    pub hue: f32,
    pub saturation: f32,
    pub luminance: f32,
    _pad: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Pod, Zeroable, Default)]
#[repr(C)]
pub struct ColorGradeSettings {
    pub hue: f32,
    pub saturation: f32,
    pub luminance: f32,
    _pad: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Pod, Zeroable, Default)]
#[repr(C)]
pub struct ColorCalibrationSettings {
    pub shadows_tint: f32,
    pub red_hue: f32,
    pub red_saturation: f32,
    pub green_hue: f32,
    pub green_saturation: f32,
    pub blue_hue: f32,
    pub blue_saturation: f32,
    _pad: f32,
}

/// A 3x3 matrix stored as three vec4 columns, the layout `mat3x3<f32>` has
/// in a WGSL uniform.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct GpuMat3 {
    col0: [f32; 4],
    col1: [f32; 4],
    col2: [f32; 4],
}

impl Default for GpuMat3 {
    fn default() -> Self {
        Self {
            col0: [1.0, 0.0, 0.0, 0.0],
            col1: [0.0, 1.0, 0.0, 0.0],
            col2: [0.0, 0.0, 1.0, 0.0],
        }
    }
}

impl From<Mat3> for GpuMat3 {
    fn from(m: Mat3) -> Self {
        Self {
            col0: [m.x_axis.x, m.x_axis.y, m.x_axis.z, 0.0],
            col1: [m.y_axis.x, m.y_axis.y, m.y_axis.z, 0.0],
            col2: [m.z_axis.x, m.z_axis.y, m.z_axis.z, 0.0],
        }
    }
}

/// Tone-mapper selector values for [`GlobalAdjustments::tonemapper_mode`].
pub const TONEMAPPER_LINEAR: u32 = 0;
pub const TONEMAPPER_FILMIC: u32 = 1;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct GlobalAdjustments {
    pub exposure: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub highlights: f32,
    pub shadows: f32,
    pub whites: f32,
    pub blacks: f32,
    pub saturation: f32,
    pub temperature: f32,
    pub tint: f32,
    pub vibrance: f32,

    pub sharpness: f32,
    pub luma_noise_reduction: f32,
    pub color_noise_reduction: f32,
    pub clarity: f32,
    pub dehaze: f32,
    pub structure: f32,
    pub centre: f32,
    pub vignette_amount: f32,
    pub vignette_midpoint: f32,
    pub vignette_roundness: f32,
    pub vignette_feather: f32,
    pub grain_amount: f32,
    pub grain_size: f32,
    pub grain_roughness: f32,

    pub chromatic_aberration_red_cyan: f32,
    pub chromatic_aberration_blue_yellow: f32,

    pub show_clipping: u32,
    pub is_raw_image: u32,
    _pad0: u32,

    pub has_lut: u32,
    pub lut_intensity: f32,
    pub tonemapper_mode: u32,

    pub glow_amount: f32,
    pub halation_amount: f32,
    pub flare_amount: f32,

    pub agx_pipe_to_rendering: GpuMat3,
    pub agx_rendering_to_pipe: GpuMat3,

    pub color_grading_shadows: ColorGradeSettings,
    pub color_grading_midtones: ColorGradeSettings,
    pub color_grading_highlights: ColorGradeSettings,
    pub color_grading_blending: f32,
    pub color_grading_balance: f32,
    _pad1: f32,
    _pad2: f32,

    pub color_calibration: ColorCalibrationSettings,

    pub hsl: [HslBand; 8],

    pub luma_curve: [CurvePoint; MAX_CURVE_POINTS],
    pub red_curve: [CurvePoint; MAX_CURVE_POINTS],
    pub green_curve: [CurvePoint; MAX_CURVE_POINTS],
    pub blue_curve: [CurvePoint; MAX_CURVE_POINTS],
    pub luma_curve_count: u32,
    pub red_curve_count: u32,
    pub green_curve_count: u32,
    pub blue_curve_count: u32,
}

impl Default for GlobalAdjustments {
    fn default() -> Self {
        let (pipe_to_rendering, rendering_to_pipe) = calculate_agx_matrices();
        Self {
            exposure: 0.0,
            brightness: 0.0,
            contrast: 0.0,
            highlights: 0.0,
            shadows: 0.0,
            whites: 0.0,
            blacks: 0.0,
            saturation: 0.0,
            temperature: 0.0,
            tint: 0.0,
            vibrance: 0.0,
            sharpness: 0.0,
            luma_noise_reduction: 0.0,
            color_noise_reduction: 0.0,
            clarity: 0.0,
            dehaze: 0.0,
            structure: 0.0,
            centre: 0.0,
            vignette_amount: 0.0,
            vignette_midpoint: 0.5,
            vignette_roundness: 0.0,
            vignette_feather: 0.5,
            grain_amount: 0.0,
            grain_size: 0.5,
            grain_roughness: 0.5,
            chromatic_aberration_red_cyan: 0.0,
            chromatic_aberration_blue_yellow: 0.0,
            show_clipping: 0,
            is_raw_image: 0,
            _pad0: 0,
            has_lut: 0,
            lut_intensity: 1.0,
            tonemapper_mode: TONEMAPPER_LINEAR,
            glow_amount: 0.0,
            halation_amount: 0.0,
            flare_amount: 0.0,
            agx_pipe_to_rendering: pipe_to_rendering,
            agx_rendering_to_pipe: rendering_to_pipe,
            color_grading_shadows: ColorGradeSettings::default(),
            color_grading_midtones: ColorGradeSettings::default(),
            color_grading_highlights: ColorGradeSettings::default(),
            color_grading_blending: 0.5,
            color_grading_balance: 0.0,
            _pad1: 0.0,
            _pad2: 0.0,
            color_calibration: ColorCalibrationSettings::default(),
            hsl: [HslBand::default(); 8],
            luma_curve: identity_curve(),
            red_curve: identity_curve(),
            green_curve: identity_curve(),
            blue_curve: identity_curve(),
            luma_curve_count: 2,
            red_curve_count: 2,
            green_curve_count: 2,
            blue_curve_count: 2,
        }
    }
}

/// The subset of adjustments a mask may carry. No vignette, LUT, chromatic
/// aberration, grain, or tone-mapper selection; those remain global.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct MaskAdjustments {
    pub exposure: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub highlights: f32,
    pub shadows: f32,
    pub whites: f32,
    pub blacks: f32,
    pub saturation: f32,
    pub temperature: f32,
    pub tint: f32,
    pub vibrance: f32,

    pub sharpness: f32,
    pub luma_noise_reduction: f32,
    pub color_noise_reduction: f32,
    pub clarity: f32,
    pub dehaze: f32,
    pub structure: f32,

    pub glow_amount: f32,
    pub halation_amount: f32,
    pub flare_amount: f32,

    pub color_grading_shadows: ColorGradeSettings,
    pub color_grading_midtones: ColorGradeSettings,
    pub color_grading_highlights: ColorGradeSettings,
    pub color_grading_blending: f32,
    pub color_grading_balance: f32,
    _pad0: f32,
    _pad1: f32,

    pub hsl: [HslBand; 8],

    pub luma_curve: [CurvePoint; MAX_CURVE_POINTS],
    pub red_curve: [CurvePoint; MAX_CURVE_POINTS],
    pub green_curve: [CurvePoint; MAX_CURVE_POINTS],
    pub blue_curve: [CurvePoint; MAX_CURVE_POINTS],
    pub luma_curve_count: u32,
    pub red_curve_count: u32,
    pub green_curve_count: u32,
    pub blue_curve_count: u32,
}

impl Default for MaskAdjustments {
    fn default() -> Self {
        Self {
            exposure: 0.0,
            brightness: 0.0,
            contrast: 0.0,
            highlights: 0.0,
            shadows: 0.0,
            whites: 0.0,
            blacks: 0.0,
            saturation: 0.0,
            temperature: 0.0,
            tint: 0.0,
            vibrance: 0.0,
            sharpness: 0.0,
            luma_noise_reduction: 0.0,
            color_noise_reduction: 0.0,
            clarity: 0.0,
            dehaze: 0.0,
            structure: 0.0,
            glow_amount: 0.0,
            halation_amount: 0.0,
            flare_amount: 0.0,
            color_grading_shadows: ColorGradeSettings::default(),
            color_grading_midtones: ColorGradeSettings::default(),
            color_grading_highlights: ColorGradeSettings::default(),
            color_grading_blending: 0.5,
            color_grading_balance: 0.0,
            _pad0: 0.0,
            _pad1: 0.0,
            hsl: [HslBand::default(); 8],
            luma_curve: identity_curve(),
            red_curve: identity_curve(),
            green_curve: identity_curve(),
            blue_curve: identity_curve(),
            luma_curve_count: 2,
            red_curve_count: 2,
            green_curve_count: 2,
            blue_curve_count: 2,
        }
    }
}

/// The complete per-dispatch uniform. Rebuilt by the host whenever inputs
/// change and passed by value; `tile_offset_*` positions the tile inside the
/// full image so center-weighted effects, vignette, grain, flare UV, and the
/// chromatic-aberration radial math see absolute coordinates.
#[derive(Debug, Clone, Copy, Pod, Zeroable, Default)]
#[repr(C)]
pub struct AllAdjustments {
    pub global: GlobalAdjustments,
    pub mask_adjustments: [MaskAdjustments; MAX_MASKS],
    pub mask_count: u32,
    pub tile_offset_x: u32,
    pub tile_offset_y: u32,
    /// Reserved for mask-atlas addressing; not consumed by the kernel.
    pub mask_atlas_cols: u32,
}

impl AllAdjustments {
    /// Checks curve invariants and the mask count. Resource presence and
    /// texture extents are checked by the dispatcher, which can see the
    /// bindings.
    pub fn validate(&self) -> RenderResult<()> {
        if self.mask_count as usize > MAX_MASKS {
            return Err(RenderError::MissingResource(
                "mask_count exceeds the eight mask slots",
            ));
        }
        validate_curve(&self.global.luma_curve, self.global.luma_curve_count, "global luma")?;
        validate_curve(&self.global.red_curve, self.global.red_curve_count, "global red")?;
        validate_curve(&self.global.green_curve, self.global.green_curve_count, "global green")?;
        validate_curve(&self.global.blue_curve, self.global.blue_curve_count, "global blue")?;
        for (i, mask) in self
            .mask_adjustments
            .iter()
            .take(self.mask_count as usize)
            .enumerate()
        {
            validate_curve(&mask.luma_curve, mask.luma_curve_count, &format!("mask {i} luma"))?;
            validate_curve(&mask.red_curve, mask.red_curve_count, &format!("mask {i} red"))?;
            validate_curve(&mask.green_curve, mask.green_curve_count, &format!("mask {i} green"))?;
            validate_curve(&mask.blue_curve, mask.blue_curve_count, &format!("mask {i} blue"))?;
        }
        Ok(())
    }
}

fn validate_curve(
    points: &[CurvePoint; MAX_CURVE_POINTS],
    count: u32,
    label: &str,
) -> RenderResult<()> {
    let count = count as usize;
    if !(2..=MAX_CURVE_POINTS).contains(&count) {
        return Err(RenderError::InvalidCurve(format!(
            "{label} curve has {count} points, expected 2..=16"
        )));
    }
    if points[0].x != 0.0 || points[count - 1].x != 255.0 {
        return Err(RenderError::InvalidCurve(format!(
            "{label} curve endpoints must sit at x=0 and x=255"
        )));
    }
    for pair in points[..count].windows(2) {
        if pair[1].x <= pair[0].x {
            return Err(RenderError::InvalidCurve(format!(
                "{label} curve x coordinates must be strictly ascending"
            )));
        }
    }
    Ok(())
}

// --- AgX rendering-space matrices -----------------------------------------
//
// The filmic tone-mapper runs in an inset/rotated Rec.2020-derived space.
// The forward and return matrices differ (the return leg applies the outset,
// not the inverse of the inset), so both are carried in the uniform.

const WP_D65: Vec2 = Vec2::new(0.3127, 0.3290);
const PRIMARIES_SRGB: [Vec2; 3] = [
    Vec2::new(0.64, 0.33),
    Vec2::new(0.30, 0.60),
    Vec2::new(0.15, 0.06),
];
const PRIMARIES_REC2020: [Vec2; 3] = [
    Vec2::new(0.708, 0.292),
    Vec2::new(0.170, 0.797),
    Vec2::new(0.131, 0.046),
];

fn xy_to_xyz(xy: Vec2) -> Vec3 {
    if xy.y < 1e-6 {
        Vec3::ZERO
    } else {
        Vec3::new(xy.x / xy.y, 1.0, (1.0 - xy.x - xy.y) / xy.y)
    }
}

fn primaries_to_xyz_matrix(primaries: &[Vec2; 3], white_point: Vec2) -> Mat3 {
    let r_xyz = xy_to_xyz(primaries[0]);
    let g_xyz = xy_to_xyz(primaries[1]);
    let b_xyz = xy_to_xyz(primaries[2]);
    let primaries_matrix = Mat3::from_cols(r_xyz, g_xyz, b_xyz);
    let white_point_xyz = xy_to_xyz(white_point);
    let s = primaries_matrix.inverse() * white_point_xyz;
    Mat3::from_cols(r_xyz * s.x, g_xyz * s.y, b_xyz * s.z)
}

fn rotate_and_scale_primary(primary: Vec2, white_point: Vec2, scale: f32, rotation: f32) -> Vec2 {
    let p_rel = primary - white_point;
    let p_scaled = p_rel * scale;
    let (sin_r, cos_r) = rotation.sin_cos();
    let p_rotated = Vec2::new(
        p_scaled.x * cos_r - p_scaled.y * sin_r,
        p_scaled.x * sin_r + p_scaled.y * cos_r,
    );
    white_point + p_rotated
}

/// Builds the working-space-to-AgX-rendering matrix and its return leg.
pub fn calculate_agx_matrices() -> (GpuMat3, GpuMat3) {
    let pipe_work_profile_to_xyz = primaries_to_xyz_matrix(&PRIMARIES_SRGB, WP_D65);
    let base_profile_to_xyz = primaries_to_xyz_matrix(&PRIMARIES_REC2020, WP_D65);
    let xyz_to_base_profile = base_profile_to_xyz.inverse();
    let pipe_to_base = xyz_to_base_profile * pipe_work_profile_to_xyz;

    let inset = [0.29462451, 0.25861925, 0.14641371];
    let rotation = [0.03540329, -0.02108586, -0.06305724];
    let outset = [0.290776401758, 0.263155400753, 0.045810721815];
    let unrotation = [0.03540329, -0.02108586, -0.06305724];
    let master_outset_ratio = 1.0;
    let master_unrotation_ratio = 0.0;

    let mut inset_primaries = [Vec2::ZERO; 3];
    for i in 0..3 {
        inset_primaries[i] =
            rotate_and_scale_primary(PRIMARIES_REC2020[i], WP_D65, 1.0 - inset[i], rotation[i]);
    }
    let rendering_to_xyz = primaries_to_xyz_matrix(&inset_primaries, WP_D65);
    let base_to_rendering = xyz_to_base_profile * rendering_to_xyz;

    let mut outset_primaries = [Vec2::ZERO; 3];
    for i in 0..3 {
        outset_primaries[i] = rotate_and_scale_primary(
            PRIMARIES_REC2020[i],
            WP_D65,
            1.0 - master_outset_ratio * outset[i],
            master_unrotation_ratio * unrotation[i],
        );
    }
    let outset_to_xyz = primaries_to_xyz_matrix(&outset_primaries, WP_D65);
    let rendering_to_base = (xyz_to_base_profile * outset_to_xyz).inverse();

    let pipe_to_rendering = base_to_rendering * pipe_to_base;
    let rendering_to_pipe = pipe_to_base.inverse() * rendering_to_base;

    (pipe_to_rendering.into(), rendering_to_pipe.into())
}

// --- JSON builder ----------------------------------------------------------
//
// Sidecar adjustment JSON stores slider values in UI units; the table below
// maps each slider to the uniform's contract range.

struct AdjustmentScales {
    exposure: f32,
    brightness: f32,
    contrast: f32,
    highlights: f32,
    shadows: f32,
    whites: f32,
    blacks: f32,
    saturation: f32,
    temperature: f32,
    tint: f32,
    vibrance: f32,
    sharpness: f32,
    luma_noise_reduction: f32,
    color_noise_reduction: f32,
    clarity: f32,
    dehaze: f32,
    structure: f32,
    centre: f32,
    vignette_amount: f32,
    vignette_midpoint: f32,
    vignette_roundness: f32,
    vignette_feather: f32,
    grain_amount: f32,
    grain_size: f32,
    grain_roughness: f32,
    chromatic_aberration: f32,
    hsl_hue_multiplier: f32,
    hsl_saturation: f32,
    hsl_luminance: f32,
    color_grading_saturation: f32,
    color_grading_luminance: f32,
    color_grading_blending: f32,
    color_grading_balance: f32,
    color_calibration_hue: f32,
    color_calibration_saturation: f32,
    glow: f32,
    halation: f32,
    flares: f32,
}

const SCALES: AdjustmentScales = AdjustmentScales {
    exposure: 0.8,
    brightness: 0.8,
    contrast: 100.0,
    highlights: 120.0,
    shadows: 100.0,
    whites: 30.0,
    blacks: 60.0,
    saturation: 100.0,
    temperature: 25.0,
    tint: 100.0,
    vibrance: 100.0,
    sharpness: 40.0,
    luma_noise_reduction: 100.0,
    color_noise_reduction: 100.0,
    clarity: 200.0,
    dehaze: 750.0,
    structure: 200.0,
    centre: 250.0,
    vignette_amount: 100.0,
    vignette_midpoint: 100.0,
    vignette_roundness: 100.0,
    vignette_feather: 100.0,
    grain_amount: 200.0,
    grain_size: 50.0,
    grain_roughness: 100.0,
    chromatic_aberration: 10000.0,
    hsl_hue_multiplier: 0.3,
    hsl_saturation: 100.0,
    hsl_luminance: 100.0,
    color_grading_saturation: 500.0,
    color_grading_luminance: 500.0,
    color_grading_blending: 100.0,
    color_grading_balance: 200.0,
    color_calibration_hue: 400.0,
    color_calibration_saturation: 120.0,
    glow: 100.0,
    halation: 100.0,
    flares: 100.0,
};

fn scaled(adjustments: &serde_json::Value, key: &str, scale: f32, default: f64) -> f32 {
    adjustments[key].as_f64().unwrap_or(default) as f32 / scale
}

fn parse_hsl_bands(js_hsl: &serde_json::Value) -> [HslBand; 8] {
    let mut bands = [HslBand::default(); 8];
    let Some(hsl_map) = js_hsl.as_object() else {
        return bands;
    };
    let band_names = [
        ("reds", 0),
        ("oranges", 1),
        ("yellows", 2),
        ("greens", 3),
        ("aquas", 4),
        ("blues", 5),
        ("purples", 6),
        ("magentas", 7),
    ];
    for (name, index) in band_names {
        if let Some(band) = hsl_map.get(name) {
            bands[index] = HslBand {
                hue: band["hue"].as_f64().unwrap_or(0.0) as f32 * SCALES.hsl_hue_multiplier,
                saturation: band["saturation"].as_f64().unwrap_or(0.0) as f32
                    / SCALES.hsl_saturation,
                luminance: band["luminance"].as_f64().unwrap_or(0.0) as f32 / SCALES.hsl_luminance,
                _pad: 0.0,
            };
        }
    }
    bands
}

fn parse_color_grade(js_cg: &serde_json::Value) -> ColorGradeSettings {
    if js_cg.is_null() {
        return ColorGradeSettings::default();
    }
    ColorGradeSettings {
        hue: js_cg["hue"].as_f64().unwrap_or(0.0) as f32,
        saturation: js_cg["saturation"].as_f64().unwrap_or(0.0) as f32
            / SCALES.color_grading_saturation,
        luminance: js_cg["luminance"].as_f64().unwrap_or(0.0) as f32
            / SCALES.color_grading_luminance,
        _pad: 0.0,
    }
}

/// Converts frontend curve points into the fixed uniform array. An absent or
/// empty list yields the identity curve.
fn parse_curve(curve: &serde_json::Value) -> ([CurvePoint; MAX_CURVE_POINTS], u32) {
    let Some(list) = curve.as_array().filter(|l| !l.is_empty()) else {
        return (identity_curve(), 2);
    };
    let mut points = [CurvePoint::default(); MAX_CURVE_POINTS];
    let mut count = 0u32;
    for point in list.iter().take(MAX_CURVE_POINTS) {
        if let (Some(x), Some(y)) = (point["x"].as_f64(), point["y"].as_f64()) {
            points[count as usize] = CurvePoint::new(x as f32, y as f32);
            count += 1;
        }
    }
    if count < 2 {
        return (identity_curve(), 2);
    }
    (points, count)
}

fn parse_curves(
    adjustments: &serde_json::Value,
) -> (
    [CurvePoint; MAX_CURVE_POINTS],
    u32,
    [CurvePoint; MAX_CURVE_POINTS],
    u32,
    [CurvePoint; MAX_CURVE_POINTS],
    u32,
    [CurvePoint; MAX_CURVE_POINTS],
    u32,
) {
    let curves = adjustments.get("curves").cloned().unwrap_or_default();
    let (luma, luma_count) = parse_curve(&curves["luma"]);
    let (red, red_count) = parse_curve(&curves["red"]);
    let (green, green_count) = parse_curve(&curves["green"]);
    let (blue, blue_count) = parse_curve(&curves["blue"]);
    (luma, luma_count, red, red_count, green, green_count, blue, blue_count)
}

pub fn global_adjustments_from_json(
    js_adjustments: &serde_json::Value,
    is_raw: bool,
) -> GlobalAdjustments {
    let cg = js_adjustments.get("colorGrading").cloned().unwrap_or_default();
    let cal = js_adjustments.get("colorCalibration").cloned().unwrap_or_default();
    let (luma_curve, luma_curve_count, red_curve, red_curve_count, green_curve, green_curve_count, blue_curve, blue_curve_count) =
        parse_curves(js_adjustments);
    let tone_mapper = js_adjustments["toneMapper"].as_str().unwrap_or("basic");
    let (pipe_to_rendering, rendering_to_pipe) = calculate_agx_matrices();

    GlobalAdjustments {
        exposure: scaled(js_adjustments, "exposure", SCALES.exposure, 0.0),
        brightness: scaled(js_adjustments, "brightness", SCALES.brightness, 0.0),
        contrast: scaled(js_adjustments, "contrast", SCALES.contrast, 0.0),
        highlights: scaled(js_adjustments, "highlights", SCALES.highlights, 0.0),
        shadows: scaled(js_adjustments, "shadows", SCALES.shadows, 0.0),
        whites: scaled(js_adjustments, "whites", SCALES.whites, 0.0),
        blacks: scaled(js_adjustments, "blacks", SCALES.blacks, 0.0),
        saturation: scaled(js_adjustments, "saturation", SCALES.saturation, 0.0),
        temperature: scaled(js_adjustments, "temperature", SCALES.temperature, 0.0),
        tint: scaled(js_adjustments, "tint", SCALES.tint, 0.0),
        vibrance: scaled(js_adjustments, "vibrance", SCALES.vibrance, 0.0),
        sharpness: scaled(js_adjustments, "sharpness", SCALES.sharpness, 0.0),
        luma_noise_reduction: scaled(
            js_adjustments,
            "lumaNoiseReduction",
            SCALES.luma_noise_reduction,
            0.0,
        ),
        color_noise_reduction: scaled(
            js_adjustments,
            "colorNoiseReduction",
            SCALES.color_noise_reduction,
            0.0,
        ),
        clarity: scaled(js_adjustments, "clarity", SCALES.clarity, 0.0),
        dehaze: scaled(js_adjustments, "dehaze", SCALES.dehaze, 0.0),
        structure: scaled(js_adjustments, "structure", SCALES.structure, 0.0),
        centre: scaled(js_adjustments, "centre", SCALES.centre, 0.0),
        vignette_amount: scaled(js_adjustments, "vignetteAmount", SCALES.vignette_amount, 0.0),
        vignette_midpoint: scaled(
            js_adjustments,
            "vignetteMidpoint",
            SCALES.vignette_midpoint,
            50.0,
        ),
        vignette_roundness: scaled(
            js_adjustments,
            "vignetteRoundness",
            SCALES.vignette_roundness,
            0.0,
        ),
        vignette_feather: scaled(
            js_adjustments,
            "vignetteFeather",
            SCALES.vignette_feather,
            50.0,
        ),
        grain_amount: scaled(js_adjustments, "grainAmount", SCALES.grain_amount, 0.0),
        grain_size: scaled(js_adjustments, "grainSize", SCALES.grain_size, 25.0),
        grain_roughness: scaled(js_adjustments, "grainRoughness", SCALES.grain_roughness, 50.0),
        chromatic_aberration_red_cyan: scaled(
            js_adjustments,
            "chromaticAberrationRedCyan",
            SCALES.chromatic_aberration,
            0.0,
        ),
        chromatic_aberration_blue_yellow: scaled(
            js_adjustments,
            "chromaticAberrationBlueYellow",
            SCALES.chromatic_aberration,
            0.0,
        ),
        show_clipping: js_adjustments["showClipping"].as_bool().unwrap_or(false) as u32,
        is_raw_image: is_raw as u32,
        _pad0: 0,
        has_lut: js_adjustments["lutPath"].is_string() as u32,
        lut_intensity: js_adjustments["lutIntensity"].as_f64().unwrap_or(100.0) as f32 / 100.0,
        tonemapper_mode: if tone_mapper == "agx" {
            TONEMAPPER_FILMIC
        } else {
            TONEMAPPER_LINEAR
        },
        glow_amount: scaled(js_adjustments, "glowAmount", SCALES.glow, 0.0),
        halation_amount: scaled(js_adjustments, "halationAmount", SCALES.halation, 0.0),
        flare_amount: scaled(js_adjustments, "flareAmount", SCALES.flares, 0.0),
        agx_pipe_to_rendering: pipe_to_rendering,
        agx_rendering_to_pipe: rendering_to_pipe,
        color_grading_shadows: parse_color_grade(&cg["shadows"]),
        color_grading_midtones: parse_color_grade(&cg["midtones"]),
        color_grading_highlights: parse_color_grade(&cg["highlights"]),
        color_grading_blending: cg["blending"].as_f64().unwrap_or(50.0) as f32
            / SCALES.color_grading_blending,
        color_grading_balance: cg["balance"].as_f64().unwrap_or(0.0) as f32
            / SCALES.color_grading_balance,
        _pad1: 0.0,
        _pad2: 0.0,
        color_calibration: ColorCalibrationSettings {
            shadows_tint: cal["shadowsTint"].as_f64().unwrap_or(0.0) as f32
                / SCALES.color_calibration_hue,
            red_hue: cal["redHue"].as_f64().unwrap_or(0.0) as f32 / SCALES.color_calibration_hue,
            red_saturation: cal["redSaturation"].as_f64().unwrap_or(0.0) as f32
                / SCALES.color_calibration_saturation,
            green_hue: cal["greenHue"].as_f64().unwrap_or(0.0) as f32
                / SCALES.color_calibration_hue,
            green_saturation: cal["greenSaturation"].as_f64().unwrap_or(0.0) as f32
                / SCALES.color_calibration_saturation,
            blue_hue: cal["blueHue"].as_f64().unwrap_or(0.0) as f32 / SCALES.color_calibration_hue,
            blue_saturation: cal["blueSaturation"].as_f64().unwrap_or(0.0) as f32
                / SCALES.color_calibration_saturation,
            _pad: 0.0,
        },
        hsl: parse_hsl_bands(&js_adjustments.get("hsl").cloned().unwrap_or_default()),
        luma_curve,
        red_curve,
        green_curve,
        blue_curve,
        luma_curve_count,
        red_curve_count,
        green_curve_count,
        blue_curve_count,
    }
}

pub fn mask_adjustments_from_json(adj: &serde_json::Value) -> MaskAdjustments {
    if adj.is_null() {
        return MaskAdjustments::default();
    }
    let cg = adj.get("colorGrading").cloned().unwrap_or_default();
    let (luma_curve, luma_curve_count, red_curve, red_curve_count, green_curve, green_curve_count, blue_curve, blue_curve_count) =
        parse_curves(adj);

    MaskAdjustments {
        exposure: scaled(adj, "exposure", SCALES.exposure, 0.0),
        brightness: scaled(adj, "brightness", SCALES.brightness, 0.0),
        contrast: scaled(adj, "contrast", SCALES.contrast, 0.0),
        highlights: scaled(adj, "highlights", SCALES.highlights, 0.0),
        shadows: scaled(adj, "shadows", SCALES.shadows, 0.0),
        whites: scaled(adj, "whites", SCALES.whites, 0.0),
        blacks: scaled(adj, "blacks", SCALES.blacks, 0.0),
        saturation: scaled(adj, "saturation", SCALES.saturation, 0.0),
        temperature: scaled(adj, "temperature", SCALES.temperature, 0.0),
        tint: scaled(adj, "tint", SCALES.tint, 0.0),
        vibrance: scaled(adj, "vibrance", SCALES.vibrance, 0.0),
        sharpness: scaled(adj, "sharpness", SCALES.sharpness, 0.0),
        luma_noise_reduction: scaled(adj, "lumaNoiseReduction", SCALES.luma_noise_reduction, 0.0),
        color_noise_reduction: scaled(
            adj,
            "colorNoiseReduction",
            SCALES.color_noise_reduction,
            0.0,
        ),
        clarity: scaled(adj, "clarity", SCALES.clarity, 0.0),
        dehaze: scaled(adj, "dehaze", SCALES.dehaze, 0.0),
        structure: scaled(adj, "structure", SCALES.structure, 0.0),
        glow_amount: scaled(adj, "glowAmount", SCALES.glow, 0.0),
        halation_amount: scaled(adj, "halationAmount", SCALES.halation, 0.0),
        flare_amount: scaled(adj, "flareAmount", SCALES.flares, 0.0),
        color_grading_shadows: parse_color_grade(&cg["shadows"]),
        color_grading_midtones: parse_color_grade(&cg["midtones"]),
        color_grading_highlights: parse_color_grade(&cg["highlights"]),
        color_grading_blending: cg["blending"].as_f64().unwrap_or(50.0) as f32
            / SCALES.color_grading_blending,
        color_grading_balance: cg["balance"].as_f64().unwrap_or(0.0) as f32
            / SCALES.color_grading_balance,
        _pad0: 0.0,
        _pad1: 0.0,
        hsl: parse_hsl_bands(&adj.get("hsl").cloned().unwrap_or_default()),
        luma_curve,
        red_curve,
        green_curve,
        blue_curve,
        luma_curve_count,
        red_curve_count,
        green_curve_count,
        blue_curve_count,
    }
}

/// Builds the full uniform from sidecar adjustment JSON. Masks come from the
/// `masks` array in slot order; entries past [`MAX_MASKS`] are dropped (the
/// host flattens overflow before dispatch).
pub fn all_adjustments_from_json(
    js_adjustments: &serde_json::Value,
    is_raw: bool,
) -> AllAdjustments {
    let global = global_adjustments_from_json(js_adjustments, is_raw);
    let mut mask_adjustments = [MaskAdjustments::default(); MAX_MASKS];
    let mut mask_count = 0u32;

    if let Some(masks) = js_adjustments.get("masks").and_then(|m| m.as_array()) {
        for mask_def in masks
            .iter()
            .filter(|m| m["visible"].as_bool().unwrap_or(true))
            .take(MAX_MASKS)
        {
            mask_adjustments[mask_count as usize] =
                mask_adjustments_from_json(&mask_def["adjustments"]);
            mask_count += 1;
        }
    }

    AllAdjustments {
        global,
        mask_adjustments,
        mask_count,
        tile_offset_x: 0,
        tile_offset_y: 0,
        mask_atlas_cols: 1,
    }
}
