//! Device acquisition, texture upload, and the per-tile compute dispatch.
//!
//! The dispatcher is stateless between calls: it validates the bindings
//! against the uniform, uploads the bundle, encodes one 8x8-workgroup compute
//! pass over the tile extent, and submits. Output only becomes visible to the
//! host through [`Dispatcher::read_output`], which fences on the copy.

use std::sync::Arc;
use std::time::Instant;

use half::f16;
use image::{DynamicImage, GenericImageView, ImageBuffer, Luma};
use wgpu::util::{DeviceExt, TextureDataOrder};

use crate::lut::Lut;
use crate::params::{AllAdjustments, MAX_MASKS};
use crate::{RenderError, RenderResult};

#[derive(Clone)]
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub limits: wgpu::Limits,
}

impl GpuContext {
    /// Acquires a high-performance adapter and a device with the adapter's
    /// own limits, so large inputs are bounded by the hardware rather than
    /// the wgpu defaults.
    pub fn new() -> RenderResult<Self> {
        let mut instance_desc = wgpu::InstanceDescriptor::from_env_or_default();

        #[cfg(target_os = "windows")]
        if std::env::var("WGPU_BACKEND").is_err() {
            instance_desc.backends = wgpu::Backends::PRIMARY;
        }

        let instance = wgpu::Instance::new(&instance_desc);
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            ..Default::default()
        }))
        .map_err(|e| RenderError::Device(format!("failed to find a wgpu adapter: {e}")))?;

        let mut required_features = wgpu::Features::empty();
        if adapter
            .features()
            .contains(wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES)
        {
            required_features |= wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES;
        }

        let limits = adapter.limits();
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Develop Device"),
            required_features,
            required_limits: limits.clone(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| RenderError::Device(e.to_string()))?;

        log::info!("develop engine device ready: {:?}", adapter.get_info().name);

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            limits,
        })
    }
}

fn to_rgba_f16(img: &DynamicImage) -> Vec<f16> {
    let rgba_f32 = img.to_rgba32f();
    rgba_f32.into_raw().into_iter().map(f16::from_f32).collect()
}

/// Uploads an image as the full-extent `rgba16float` input texture. The
/// pixel values are carried through untouched; whether they are scene-linear
/// or sRGB-encoded is declared by `is_raw_image` in the uniform.
pub fn create_input_texture(
    context: &GpuContext,
    image: &DynamicImage,
) -> RenderResult<wgpu::Texture> {
    let (width, height) = image.dimensions();
    let max_dim = context.limits.max_texture_dimension_2d;
    if width > max_dim || height > max_dim {
        return Err(RenderError::DimensionMismatch(format!(
            "input {width}x{height} exceeds the device texture limit of {max_dim}"
        )));
    }
    let data = to_rgba_f16(image);
    Ok(context.device.create_texture_with_data(
        &context.queue,
        &wgpu::TextureDescriptor {
            label: Some("Input Texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba16Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        },
        TextureDataOrder::MipMajor,
        bytemuck::cast_slice(&data),
    ))
}

/// Uploads a grayscale influence bitmap as an `r8unorm` mask texture. Masks
/// span the full image and are read at absolute coordinates.
pub fn create_mask_texture(
    context: &GpuContext,
    mask: &ImageBuffer<Luma<u8>, Vec<u8>>,
) -> wgpu::Texture {
    context.device.create_texture_with_data(
        &context.queue,
        &wgpu::TextureDescriptor {
            label: Some("Mask Texture"),
            size: wgpu::Extent3d {
                width: mask.width(),
                height: mask.height(),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        },
        TextureDataOrder::MipMajor,
        mask,
    )
}

/// Creates the tile-extent `rgba8unorm` output storage texture.
pub fn create_output_texture(context: &GpuContext, width: u32, height: u32) -> wgpu::Texture {
    context.device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Output Tile Texture"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    })
}

/// A bound 3D LUT: the cube texture plus the nearest/clamp sampler its
/// tetrahedral lookup expects.
pub struct LutTexture {
    view: wgpu::TextureView,
    sampler: wgpu::Sampler,
}

pub fn create_lut_texture(context: &GpuContext, lut: &Lut) -> LutTexture {
    let mut rgba_f16 = Vec::with_capacity(lut.data.len() / 3 * 4);
    for chunk in lut.data.chunks_exact(3) {
        rgba_f16.push(f16::from_f32(chunk[0]));
        rgba_f16.push(f16::from_f32(chunk[1]));
        rgba_f16.push(f16::from_f32(chunk[2]));
        rgba_f16.push(f16::ONE);
    }
    let texture = context.device.create_texture_with_data(
        &context.queue,
        &wgpu::TextureDescriptor {
            label: Some("LUT 3D Texture"),
            size: wgpu::Extent3d {
                width: lut.size,
                height: lut.size,
                depth_or_array_layers: lut.size,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D3,
            format: wgpu::TextureFormat::Rgba16Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        },
        TextureDataOrder::MipMajor,
        bytemuck::cast_slice(&rgba_f16),
    );
    let sampler = context.device.create_sampler(&wgpu::SamplerDescriptor {
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Nearest,
        min_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    });
    LutTexture {
        view: texture.create_view(&Default::default()),
        sampler,
    }
}

/// A host-provided flare map sampled at normalized image UV.
#[derive(Clone, Copy)]
pub struct FlareInput<'a> {
    pub texture: &'a wgpu::Texture,
    pub sampler: &'a wgpu::Sampler,
}

/// Everything one tile dispatch reads and writes. The input and mask
/// textures span the full image; the four blur textures and the output cover
/// at least the tile extent (the output's own extent *is* the tile extent).
pub struct TileInputs<'a> {
    pub input: &'a wgpu::Texture,
    pub output: &'a wgpu::Texture,
    pub sharpness_blur: &'a wgpu::Texture,
    pub tonal_blur: &'a wgpu::Texture,
    pub clarity_blur: &'a wgpu::Texture,
    pub structure_blur: &'a wgpu::Texture,
    pub masks: &'a [&'a wgpu::Texture],
    pub lut: Option<&'a LutTexture>,
    pub flare: Option<FlareInput<'a>>,
}

pub struct Dispatcher {
    context: GpuContext,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
    adjustments_buffer: wgpu::Buffer,
    dummy_mask_view: wgpu::TextureView,
    dummy_lut_view: wgpu::TextureView,
    dummy_lut_sampler: wgpu::Sampler,
    dummy_flare_view: wgpu::TextureView,
    dummy_flare_sampler: wgpu::Sampler,
}

impl Dispatcher {
    pub fn new(context: GpuContext) -> RenderResult<Self> {
        let device = &context.device;

        let shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Develop Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/pipeline.wgsl").into()),
        });

        let texture_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };

        let mut entries = vec![
            texture_entry(0),
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::StorageTexture {
                    access: wgpu::StorageTextureAccess::WriteOnly,
                    format: wgpu::TextureFormat::Rgba8Unorm,
                    view_dimension: wgpu::TextureViewDimension::D2,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ];
        for i in 0..MAX_MASKS as u32 {
            entries.push(texture_entry(3 + i));
        }
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: 11,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: wgpu::TextureViewDimension::D3,
                multisampled: false,
            },
            count: None,
        });
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: 12,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
            count: None,
        });
        for binding in 13..17 {
            entries.push(texture_entry(binding));
        }
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: 17,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: 18,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Develop BGL"),
            entries: &entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Develop Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Develop Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader_module,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let adjustments_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Adjustments Buffer"),
            size: std::mem::size_of::<AllAdjustments>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let dummy_desc = wgpu::TextureDescriptor {
            label: Some("Dummy Texture"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba16Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        };
        let dummy_mask = device.create_texture(&wgpu::TextureDescriptor {
            format: wgpu::TextureFormat::R8Unorm,
            ..dummy_desc
        });
        let dummy_lut = device.create_texture(&wgpu::TextureDescriptor {
            dimension: wgpu::TextureDimension::D3,
            ..dummy_desc
        });
        let dummy_flare = device.create_texture(&dummy_desc);

        Ok(Self {
            bind_group_layout,
            pipeline,
            adjustments_buffer,
            dummy_mask_view: dummy_mask.create_view(&Default::default()),
            dummy_lut_view: dummy_lut.create_view(&Default::default()),
            dummy_lut_sampler: device.create_sampler(&wgpu::SamplerDescriptor::default()),
            dummy_flare_view: dummy_flare.create_view(&Default::default()),
            dummy_flare_sampler: device.create_sampler(&wgpu::SamplerDescriptor {
                mag_filter: wgpu::FilterMode::Linear,
                min_filter: wgpu::FilterMode::Linear,
                ..Default::default()
            }),
            context,
        })
    }

    /// Validates the bindings against the uniform and returns the tile
    /// extent. Nothing is dispatched when this fails.
    fn validate(&self, inputs: &TileInputs, adjustments: &AllAdjustments) -> RenderResult<(u32, u32)> {
        adjustments.validate()?;

        let input_w = inputs.input.width();
        let input_h = inputs.input.height();
        let tile_w = inputs.output.width();
        let tile_h = inputs.output.height();

        if tile_w == 0 || tile_h == 0 {
            return Err(RenderError::DimensionMismatch(
                "output texture has zero extent".into(),
            ));
        }
        if adjustments.tile_offset_x as u64 + tile_w as u64 > input_w as u64
            || adjustments.tile_offset_y as u64 + tile_h as u64 > input_h as u64
        {
            return Err(RenderError::DimensionMismatch(format!(
                "tile {}x{} at offset ({}, {}) extends past the {}x{} input",
                tile_w, tile_h, adjustments.tile_offset_x, adjustments.tile_offset_y, input_w, input_h
            )));
        }

        for (name, blur) in [
            ("sharpness", inputs.sharpness_blur),
            ("tonal", inputs.tonal_blur),
            ("clarity", inputs.clarity_blur),
            ("structure", inputs.structure_blur),
        ] {
            if blur.width() < tile_w || blur.height() < tile_h {
                return Err(RenderError::DimensionMismatch(format!(
                    "{name} blur is {}x{}, smaller than the {tile_w}x{tile_h} tile",
                    blur.width(),
                    blur.height()
                )));
            }
        }

        if (adjustments.mask_count as usize) > inputs.masks.len() {
            return Err(RenderError::MissingResource(
                "mask_count claims more mask textures than were bound",
            ));
        }
        for mask in inputs.masks.iter().take(adjustments.mask_count as usize) {
            if mask.width() != input_w || mask.height() != input_h {
                return Err(RenderError::DimensionMismatch(format!(
                    "mask is {}x{}, input is {input_w}x{input_h}",
                    mask.width(),
                    mask.height()
                )));
            }
        }

        if adjustments.global.has_lut == 1 && inputs.lut.is_none() {
            return Err(RenderError::MissingResource("has_lut is set but no LUT is bound"));
        }

        let flare_used = adjustments.global.flare_amount > 0.0
            || adjustments
                .mask_adjustments
                .iter()
                .take(adjustments.mask_count as usize)
                .any(|m| m.flare_amount > 0.0);
        if flare_used && inputs.flare.is_none() {
            return Err(RenderError::MissingResource(
                "flare_amount is positive but no flare texture is bound",
            ));
        }

        Ok((tile_w, tile_h))
    }

    /// Uploads the uniform, binds the tile, and submits one compute pass.
    /// The call is pure with respect to its inputs: identical textures and
    /// uniform produce an identical tile.
    pub fn dispatch(&self, inputs: &TileInputs, adjustments: &AllAdjustments) -> RenderResult<()> {
        let (tile_w, tile_h) = self.validate(inputs, adjustments)?;
        let device = &self.context.device;

        self.context
            .queue
            .write_buffer(&self.adjustments_buffer, 0, bytemuck::bytes_of(adjustments));

        let input_view = inputs.input.create_view(&Default::default());
        let output_view = inputs.output.create_view(&Default::default());
        let sharpness_view = inputs.sharpness_blur.create_view(&Default::default());
        let tonal_view = inputs.tonal_blur.create_view(&Default::default());
        let clarity_view = inputs.clarity_blur.create_view(&Default::default());
        let structure_view = inputs.structure_blur.create_view(&Default::default());
        let mask_views: Vec<wgpu::TextureView> = inputs
            .masks
            .iter()
            .map(|m| m.create_view(&Default::default()))
            .collect();
        let flare_view = inputs.flare.map(|f| f.texture.create_view(&Default::default()));

        let (lut_view, lut_sampler) = match inputs.lut {
            Some(lut) => (&lut.view, &lut.sampler),
            None => (&self.dummy_lut_view, &self.dummy_lut_sampler),
        };
        let (flare_texture_view, flare_sampler) = match (&flare_view, inputs.flare) {
            (Some(view), Some(flare)) => (view, flare.sampler),
            _ => (&self.dummy_flare_view, &self.dummy_flare_sampler),
        };

        let mut bind_entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&input_view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(&output_view),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: self.adjustments_buffer.as_entire_binding(),
            },
        ];
        for i in 0..MAX_MASKS {
            let view = mask_views.get(i).unwrap_or(&self.dummy_mask_view);
            bind_entries.push(wgpu::BindGroupEntry {
                binding: 3 + i as u32,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        bind_entries.push(wgpu::BindGroupEntry {
            binding: 11,
            resource: wgpu::BindingResource::TextureView(lut_view),
        });
        bind_entries.push(wgpu::BindGroupEntry {
            binding: 12,
            resource: wgpu::BindingResource::Sampler(lut_sampler),
        });
        for (binding, view) in [
            (13u32, &sharpness_view),
            (14, &tonal_view),
            (15, &clarity_view),
            (16, &structure_view),
        ] {
            bind_entries.push(wgpu::BindGroupEntry {
                binding,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        bind_entries.push(wgpu::BindGroupEntry {
            binding: 17,
            resource: wgpu::BindingResource::TextureView(flare_texture_view),
        });
        bind_entries.push(wgpu::BindGroupEntry {
            binding: 18,
            resource: wgpu::BindingResource::Sampler(flare_sampler),
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Tile Bind Group"),
            layout: &self.bind_group_layout,
            entries: &bind_entries,
        });

        let mut encoder = device.create_command_encoder(&Default::default());
        {
            let mut pass = encoder.begin_compute_pass(&Default::default());
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(tile_w.div_ceil(8), tile_h.div_ceil(8), 1);
        }
        self.context.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    /// Copies the output texture into host memory, fencing on completion.
    /// Rows are unpadded to `width * 4` bytes of RGBA8.
    pub fn read_output(&self, texture: &wgpu::Texture) -> RenderResult<Vec<u8>> {
        let device = &self.context.device;
        let queue = &self.context.queue;
        let size = texture.size();

        let unpadded_bytes_per_row = 4 * size.width;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = (unpadded_bytes_per_row + align - 1) & !(align - 1);
        let buffer_size = (padded_bytes_per_row * size.height) as u64;

        let readback_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: buffer_size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&Default::default());
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback_buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(size.height),
                },
            },
            size,
        );
        queue.submit(Some(encoder.finish()));

        let buffer_slice = readback_buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: Some(std::time::Duration::from_secs(60)),
            })
            .map_err(|e| RenderError::Device(format!("failed while polling mapped buffer: {e}")))?;
        rx.recv()
            .map_err(|e| RenderError::Device(format!("failed receiving map result: {e}")))?
            .map_err(|e| RenderError::Device(e.to_string()))?;

        let padded = buffer_slice.get_mapped_range().to_vec();
        readback_buffer.unmap();

        if padded_bytes_per_row == unpadded_bytes_per_row {
            Ok(padded)
        } else {
            let mut unpadded =
                Vec::with_capacity((unpadded_bytes_per_row * size.height) as usize);
            for chunk in padded.chunks(padded_bytes_per_row as usize) {
                unpadded.extend_from_slice(&chunk[..unpadded_bytes_per_row as usize]);
            }
            Ok(unpadded)
        }
    }

    /// Dispatches one tile and reads it back. Convenience for hosts that
    /// process tiles synchronously.
    pub fn render_tile(
        &self,
        inputs: &TileInputs,
        adjustments: &AllAdjustments,
    ) -> RenderResult<Vec<u8>> {
        let start = Instant::now();
        self.dispatch(inputs, adjustments)?;
        let pixels = self.read_output(inputs.output)?;
        log::debug!(
            "tile {}x{} at ({}, {}) took {:?}",
            inputs.output.width(),
            inputs.output.height(),
            adjustments.tile_offset_x,
            adjustments.tile_offset_y,
            start.elapsed()
        );
        Ok(pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{CurvePoint, TONEMAPPER_FILMIC};

    fn test_gpu_context() -> Option<GpuContext> {
        GpuContext::new().ok()
    }

    fn constant_image(width: u32, height: u32, rgba: [f32; 4]) -> DynamicImage {
        let img = image::Rgba32FImage::from_pixel(width, height, image::Rgba(rgba));
        DynamicImage::ImageRgba32F(img)
    }

    fn srgb_encode(v: f32) -> f32 {
        if v <= 0.0031308 {
            v * 12.92
        } else {
            1.055 * v.powf(1.0 / 2.4) - 0.055
        }
    }

    fn srgb_decode(v: f32) -> f32 {
        if v <= 0.04045 {
            v / 12.92
        } else {
            ((v + 0.055) / 1.055).powf(2.4)
        }
    }

    /// A constant sRGB-encoded image whose decoded value is `linear`.
    fn constant_linear_srgb(width: u32, height: u32, linear: [f32; 3]) -> DynamicImage {
        constant_image(
            width,
            height,
            [
                srgb_encode(linear[0]),
                srgb_encode(linear[1]),
                srgb_encode(linear[2]),
                1.0,
            ],
        )
    }

    fn make_mask<F: Fn(u32, u32) -> u8>(
        width: u32,
        height: u32,
        f: F,
    ) -> ImageBuffer<Luma<u8>, Vec<u8>> {
        let mut mask = ImageBuffer::from_pixel(width, height, Luma([0]));
        for y in 0..height {
            for x in 0..width {
                mask.put_pixel(x, y, Luma([f(x, y)]));
            }
        }
        mask
    }

    struct Rig {
        context: GpuContext,
        dispatcher: Dispatcher,
    }

    impl Rig {
        fn new() -> Option<Self> {
            let context = test_gpu_context()?;
            let dispatcher = Dispatcher::new(context.clone()).ok()?;
            Some(Self { context, dispatcher })
        }

        /// Renders the whole image as a single tile, binding the input as
        /// its own blur inputs (exact for the constant images these tests
        /// use, since any blur of a constant image is the image itself).
        fn render(
            &self,
            image: &DynamicImage,
            adjustments: &AllAdjustments,
            masks: &[&ImageBuffer<Luma<u8>, Vec<u8>>],
            lut: Option<&LutTexture>,
        ) -> RenderResult<Vec<u8>> {
            let input = create_input_texture(&self.context, image)?;
            let output = create_output_texture(&self.context, image.width(), image.height());
            let mask_textures: Vec<wgpu::Texture> = masks
                .iter()
                .map(|m| create_mask_texture(&self.context, m))
                .collect();
            let mask_refs: Vec<&wgpu::Texture> = mask_textures.iter().collect();
            let inputs = TileInputs {
                input: &input,
                output: &output,
                sharpness_blur: &input,
                tonal_blur: &input,
                clarity_blur: &input,
                structure_blur: &input,
                masks: &mask_refs,
                lut,
                flare: None,
            };
            self.dispatcher.render_tile(&inputs, adjustments)
        }
    }

    fn assert_channel_near(actual: u8, expected: f32, tolerance: i32, what: &str) {
        let expected = (expected * 255.0).round() as i32;
        let diff = (actual as i32 - expected).abs();
        assert!(
            diff <= tolerance,
            "{what}: got {actual}, expected {expected} +/- {tolerance}"
        );
    }

    #[test]
    fn identity_parameters_pass_input_through() {
        let Some(rig) = Rig::new() else {
            return;
        };
        let image = constant_linear_srgb(64, 64, [0.5, 0.5, 0.5]);
        let adjustments = AllAdjustments::default();
        let pixels = rig.render(&image, &adjustments, &[], None).unwrap();
        let expected = srgb_encode(0.5);
        for px in pixels.chunks_exact(4) {
            assert_channel_near(px[0], expected, 2, "identity red");
            assert_channel_near(px[1], expected, 2, "identity green");
            assert_channel_near(px[2], expected, 2, "identity blue");
            assert_eq!(px[3], 255);
        }
    }

    #[test]
    fn exposure_one_stop_saturates_mid_gray() {
        let Some(rig) = Rig::new() else {
            return;
        };
        let image = constant_linear_srgb(64, 64, [0.5, 0.5, 0.5]);
        let mut adjustments = AllAdjustments::default();
        adjustments.global.exposure = 1.0;
        let pixels = rig.render(&image, &adjustments, &[], None).unwrap();
        for px in pixels.chunks_exact(4) {
            assert!(px[0] >= 253, "exposed red {} below 253", px[0]);
            assert!(px[1] >= 253);
            assert!(px[2] >= 253);
        }
    }

    #[test]
    fn contrast_keeps_mid_gray_fixed() {
        let Some(rig) = Rig::new() else {
            return;
        };
        let image = constant_linear_srgb(64, 64, [0.5, 0.5, 0.5]);
        let mut adjustments = AllAdjustments::default();
        adjustments.global.contrast = 0.5;
        let pixels = rig.render(&image, &adjustments, &[], None).unwrap();
        let expected = srgb_encode(0.5);
        for px in pixels.chunks_exact(4) {
            assert_channel_near(px[0], expected, 2, "contrast red");
            assert_channel_near(px[1], expected, 2, "contrast green");
            assert_channel_near(px[2], expected, 2, "contrast blue");
        }
    }

    #[test]
    fn contrast_darkens_below_and_lifts_above_mid_gray() {
        let Some(rig) = Rig::new() else {
            return;
        };
        let mut adjustments = AllAdjustments::default();
        adjustments.global.contrast = 0.5;

        let dark = constant_linear_srgb(16, 16, [0.15, 0.15, 0.15]);
        let dark_pixels = rig.render(&dark, &adjustments, &[], None).unwrap();
        let dark_reference = (srgb_encode(0.15) * 255.0).round() as i32;
        assert!((dark_pixels[0] as i32) < dark_reference - 3);

        let bright = constant_linear_srgb(16, 16, [0.8, 0.8, 0.8]);
        let bright_pixels = rig.render(&bright, &adjustments, &[], None).unwrap();
        let bright_reference = (srgb_encode(0.8) * 255.0).round() as i32;
        assert!((bright_pixels[0] as i32) > bright_reference + 3);
    }

    #[test]
    fn hsl_red_luminance_darkens_red_input() {
        let Some(rig) = Rig::new() else {
            return;
        };
        let image = constant_linear_srgb(64, 64, [0.8, 0.05, 0.05]);
        let mut adjustments = AllAdjustments::default();
        adjustments.global.hsl[0].luminance = -1.0;
        let pixels = rig.render(&image, &adjustments, &[], None).unwrap();

        let input_luma = 0.2126 * 0.8 + 0.7152 * 0.05 + 0.0722 * 0.05;
        let out_linear = [
            srgb_decode(pixels[0] as f32 / 255.0),
            srgb_decode(pixels[1] as f32 / 255.0),
            srgb_decode(pixels[2] as f32 / 255.0),
        ];
        let out_luma = 0.2126 * out_linear[0] + 0.7152 * out_linear[1] + 0.0722 * out_linear[2];
        assert!(
            out_luma < input_luma - 0.02,
            "luma {out_luma} not darkened from {input_luma}"
        );
        let input_red = (srgb_encode(0.8) * 255.0).round() as i32;
        assert!((pixels[0] as i32) < input_red - 10);
    }

    #[test]
    fn vignette_darkens_corners_not_center() {
        let Some(rig) = Rig::new() else {
            return;
        };
        let image = constant_linear_srgb(64, 64, [1.0, 1.0, 1.0]);
        let mut adjustments = AllAdjustments::default();
        adjustments.global.vignette_amount = -1.0;
        adjustments.global.vignette_midpoint = 0.3;
        adjustments.global.vignette_feather = 0.3;
        adjustments.global.vignette_roundness = 0.0;
        let pixels = rig.render(&image, &adjustments, &[], None).unwrap();

        let corner = &pixels[0..4];
        assert!(corner[0] <= 2 && corner[1] <= 2 && corner[2] <= 2);
        let center_idx = ((32 * 64 + 32) * 4) as usize;
        let center = &pixels[center_idx..center_idx + 4];
        assert!(center[0] >= 253, "center red {} dimmed", center[0]);
    }

    #[test]
    fn mask_exposure_splits_at_mask_boundary() {
        let Some(rig) = Rig::new() else {
            return;
        };
        let image = constant_linear_srgb(64, 64, [0.25, 0.25, 0.25]);
        let mask = make_mask(64, 64, |_, y| if y >= 32 { 255 } else { 0 });
        let mut adjustments = AllAdjustments::default();
        adjustments.mask_count = 1;
        adjustments.mask_adjustments[0].exposure = 1.0;
        let pixels = rig.render(&image, &adjustments, &[&mask], None).unwrap();

        let top_expected = srgb_encode(0.25);
        let bottom_expected = srgb_encode(0.5);
        for &(x, y) in &[(5u32, 0u32), (40, 15), (63, 31)] {
            let idx = ((y * 64 + x) * 4) as usize;
            assert_channel_near(pixels[idx], top_expected, 2, "unmasked half");
        }
        for &(x, y) in &[(5u32, 32u32), (40, 48), (63, 63)] {
            let idx = ((y * 64 + x) * 4) as usize;
            assert_channel_near(pixels[idx], bottom_expected, 2, "masked half");
        }
    }

    #[test]
    fn zero_influence_mask_is_a_noop() {
        let Some(rig) = Rig::new() else {
            return;
        };
        let image = constant_linear_srgb(48, 48, [0.4, 0.3, 0.2]);
        let mask = make_mask(48, 48, |_, _| 0);

        let baseline = rig.render(&image, &AllAdjustments::default(), &[], None).unwrap();

        let mut adjustments = AllAdjustments::default();
        adjustments.mask_count = 1;
        adjustments.mask_adjustments[0].exposure = 2.0;
        adjustments.mask_adjustments[0].saturation = -1.0;
        let masked = rig.render(&image, &adjustments, &[&mask], None).unwrap();
        assert_eq!(baseline, masked);
    }

    #[test]
    fn tiled_dispatch_matches_single_dispatch() {
        let Some(rig) = Rig::new() else {
            return;
        };
        let image = constant_linear_srgb(64, 64, [0.5, 0.5, 0.5]);
        let mut adjustments = AllAdjustments::default();
        adjustments.global.contrast = 0.3;
        adjustments.global.vignette_amount = -0.5;
        adjustments.global.centre = 0.4;
        adjustments.global.grain_amount = 0.3;

        let whole = rig.render(&image, &adjustments, &[], None).unwrap();

        let input = create_input_texture(&rig.context, &image).unwrap();
        let mut assembled = vec![0u8; 64 * 64 * 4];
        for (offset_x, offset_y) in [(0u32, 0u32), (32, 0), (0, 32), (32, 32)] {
            let output = create_output_texture(&rig.context, 32, 32);
            let mut tile_adjustments = adjustments;
            tile_adjustments.tile_offset_x = offset_x;
            tile_adjustments.tile_offset_y = offset_y;
            let inputs = TileInputs {
                input: &input,
                output: &output,
                sharpness_blur: &input,
                tonal_blur: &input,
                clarity_blur: &input,
                structure_blur: &input,
                masks: &[],
                lut: None,
                flare: None,
            };
            let tile = rig.dispatcher.render_tile(&inputs, &tile_adjustments).unwrap();
            for row in 0..32u32 {
                let src = (row * 32 * 4) as usize;
                let dst = (((offset_y + row) * 64 + offset_x) * 4) as usize;
                assembled[dst..dst + 32 * 4].copy_from_slice(&tile[src..src + 32 * 4]);
            }
        }
        assert_eq!(whole, assembled);
    }

    #[test]
    fn filmic_tonemap_is_positive_and_monotone_on_grays() {
        let Some(rig) = Rig::new() else {
            return;
        };
        // Achromatic ramp, one luminance per row, scene-linear.
        let width = 16u32;
        let height = 64u32;
        let mut img = image::Rgba32FImage::new(width, height);
        let mut levels = Vec::new();
        for y in 0..height {
            let v = 0.01 + (y as f32 / (height - 1) as f32).powi(2) * 4.0;
            levels.push(v);
            for x in 0..width {
                img.put_pixel(x, y, image::Rgba([v, v, v, 1.0]));
            }
        }
        let image = DynamicImage::ImageRgba32F(img);
        let mut adjustments = AllAdjustments::default();
        adjustments.global.is_raw_image = 1;
        adjustments.global.tonemapper_mode = TONEMAPPER_FILMIC;
        let pixels = rig.render(&image, &adjustments, &[], None).unwrap();

        let mut previous_mean = -1.0f32;
        for y in 0..height {
            let mut sum = 0.0;
            for x in 0..width {
                let idx = ((y * width + x) * 4) as usize;
                sum += pixels[idx] as f32;
            }
            let mean = sum / width as f32;
            assert!(mean > 0.0, "row {y} (level {}) mapped to zero", levels[y as usize]);
            assert!(
                mean >= previous_mean - 2.0,
                "row {y} mean {mean} fell below previous {previous_mean}"
            );
            previous_mean = previous_mean.max(mean);
        }
    }

    #[test]
    fn clipping_indicator_paints_exact_colors() {
        let Some(rig) = Rig::new() else {
            return;
        };
        let mut adjustments = AllAdjustments::default();
        adjustments.global.show_clipping = 1;

        let white = constant_linear_srgb(16, 16, [1.0, 1.0, 1.0]);
        let white_pixels = rig.render(&white, &adjustments, &[], None).unwrap();
        for px in white_pixels.chunks_exact(4) {
            assert_eq!(&px[0..3], &[255, 0, 0], "blown pixel not painted red");
        }

        let black = constant_linear_srgb(16, 16, [0.0, 0.0, 0.0]);
        let black_pixels = rig.render(&black, &adjustments, &[], None).unwrap();
        for px in black_pixels.chunks_exact(4) {
            assert_eq!(&px[0..3], &[0, 0, 255], "crushed pixel not painted blue");
        }
    }

    #[test]
    fn output_alpha_follows_input_alpha() {
        let Some(rig) = Rig::new() else {
            return;
        };
        let image = constant_image(16, 16, [0.5, 0.5, 0.5, 0.6]);
        let pixels = rig.render(&image, &AllAdjustments::default(), &[], None).unwrap();
        for px in pixels.chunks_exact(4) {
            let alpha = px[3] as i32;
            assert!((alpha - 153).abs() <= 1, "alpha {alpha} drifted from input");
        }
    }

    #[test]
    fn luma_curve_lifts_midtones() {
        let Some(rig) = Rig::new() else {
            return;
        };
        let image = constant_linear_srgb(16, 16, [0.5, 0.5, 0.5]);
        let mut adjustments = AllAdjustments::default();
        adjustments.global.luma_curve[0] = CurvePoint::new(0.0, 0.0);
        adjustments.global.luma_curve[1] = CurvePoint::new(128.0, 200.0);
        adjustments.global.luma_curve[2] = CurvePoint::new(255.0, 255.0);
        adjustments.global.luma_curve_count = 3;
        let pixels = rig.render(&image, &adjustments, &[], None).unwrap();
        // Identity would land near 188; the lifted curve stays above 200
        // everywhere past its second control point.
        assert!(pixels[0] >= 200, "curved value {} not lifted", pixels[0]);
    }

    #[test]
    fn identity_lut_is_transparent() {
        let Some(rig) = Rig::new() else {
            return;
        };
        let image = constant_linear_srgb(32, 32, [0.6, 0.4, 0.2]);
        let baseline = rig.render(&image, &AllAdjustments::default(), &[], None).unwrap();

        let lut = Lut::identity(8).unwrap();
        let lut_texture = create_lut_texture(&rig.context, &lut);
        let mut adjustments = AllAdjustments::default();
        adjustments.global.has_lut = 1;
        adjustments.global.lut_intensity = 1.0;
        let with_lut = rig.render(&image, &adjustments, &[], Some(&lut_texture)).unwrap();

        for (a, b) in baseline.iter().zip(with_lut.iter()) {
            assert!((*a as i32 - *b as i32).abs() <= 2);
        }
    }

    #[test]
    fn dispatch_requires_lut_when_claimed() {
        let Some(rig) = Rig::new() else {
            return;
        };
        let image = constant_linear_srgb(8, 8, [0.5, 0.5, 0.5]);
        let mut adjustments = AllAdjustments::default();
        adjustments.global.has_lut = 1;
        let result = rig.render(&image, &adjustments, &[], None);
        assert!(matches!(result, Err(RenderError::MissingResource(_))));
    }

    #[test]
    fn dispatch_requires_flare_texture() {
        let Some(rig) = Rig::new() else {
            return;
        };
        let image = constant_linear_srgb(8, 8, [0.5, 0.5, 0.5]);
        let mut adjustments = AllAdjustments::default();
        adjustments.global.flare_amount = 0.5;
        let result = rig.render(&image, &adjustments, &[], None);
        assert!(matches!(result, Err(RenderError::MissingResource(_))));
    }

    #[test]
    fn dispatch_requires_claimed_mask_textures() {
        let Some(rig) = Rig::new() else {
            return;
        };
        let image = constant_linear_srgb(8, 8, [0.5, 0.5, 0.5]);
        let mut adjustments = AllAdjustments::default();
        adjustments.mask_count = 1;
        let result = rig.render(&image, &adjustments, &[], None);
        assert!(matches!(result, Err(RenderError::MissingResource(_))));
    }

    #[test]
    fn dispatch_rejects_invalid_curves() {
        let Some(rig) = Rig::new() else {
            return;
        };
        let image = constant_linear_srgb(8, 8, [0.5, 0.5, 0.5]);
        let mut adjustments = AllAdjustments::default();
        adjustments.global.luma_curve_count = 1;
        let result = rig.render(&image, &adjustments, &[], None);
        assert!(matches!(result, Err(RenderError::InvalidCurve(_))));
    }

    #[test]
    fn dispatch_rejects_undersized_blur() {
        let Some(rig) = Rig::new() else {
            return;
        };
        let image = constant_linear_srgb(64, 64, [0.5, 0.5, 0.5]);
        let small = constant_linear_srgb(16, 16, [0.5, 0.5, 0.5]);
        let input = create_input_texture(&rig.context, &image).unwrap();
        let small_blur = create_input_texture(&rig.context, &small).unwrap();
        let output = create_output_texture(&rig.context, 64, 64);
        let inputs = TileInputs {
            input: &input,
            output: &output,
            sharpness_blur: &small_blur,
            tonal_blur: &input,
            clarity_blur: &input,
            structure_blur: &input,
            masks: &[],
            lut: None,
            flare: None,
        };
        let result = rig.dispatcher.dispatch(&inputs, &AllAdjustments::default());
        assert!(matches!(result, Err(RenderError::DimensionMismatch(_))));
    }

    #[test]
    fn dispatch_rejects_tile_past_input_edge() {
        let Some(rig) = Rig::new() else {
            return;
        };
        let image = constant_linear_srgb(32, 32, [0.5, 0.5, 0.5]);
        let input = create_input_texture(&rig.context, &image).unwrap();
        let output = create_output_texture(&rig.context, 32, 32);
        let mut adjustments = AllAdjustments::default();
        adjustments.tile_offset_x = 16;
        let inputs = TileInputs {
            input: &input,
            output: &output,
            sharpness_blur: &input,
            tonal_blur: &input,
            clarity_blur: &input,
            structure_blur: &input,
            masks: &[],
            lut: None,
            flare: None,
        };
        let result = rig.dispatcher.dispatch(&inputs, &adjustments);
        assert!(matches!(result, Err(RenderError::DimensionMismatch(_))));
    }
}
