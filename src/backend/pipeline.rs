// Graphics pipeline creation and management
//
// One pipeline per sample: vertex + fragment stage, fixed viewport and
// scissor, back-face culling with counter-clockwise front faces, one sample,
// no blending. Layout and a fresh (never persisted) cache are owned by the
// same aggregate so a failed build releases whatever it created.

use ash::vk;

use super::gpu::{FixedFunction, Gpu, PipelineDesc};
use super::shader::load_shader_module;
use crate::assets::Assets;
use crate::error::{GpuError, GpuResult};

/// Interleaved vertex input: one binding, per-vertex rate
#[derive(Debug, Clone)]
pub struct VertexLayout {
    pub stride: u32,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

impl VertexLayout {
    /// Build from (format, offset) pairs; locations are assigned in order
    pub fn new(stride: u32, attributes: &[(vk::Format, u32)]) -> Self {
        Self {
            stride,
            attributes: attributes
                .iter()
                .enumerate()
                .map(|(location, &(format, offset))| vk::VertexInputAttributeDescription {
                    location: location as u32,
                    binding: 0,
                    format,
                    offset,
                })
                .collect(),
        }
    }

    pub fn binding(&self) -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: self.stride,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }
}

/// Fixed-function state for a full-window draw
pub fn fixed_function(extent: vk::Extent2D) -> FixedFunction {
    FixedFunction {
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::BACK,
        front_face: vk::FrontFace::COUNTER_CLOCKWISE,
        samples: vk::SampleCountFlags::TYPE_1,
        blend_enable: false,
        viewport: vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        },
        scissor: vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        },
    }
}

/// Shader asset names for one pipeline
#[derive(Debug, Clone, Copy)]
pub struct ShaderNames {
    pub vertex: &'static str,
    pub fragment: &'static str,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GraphicsPipeline {
    pub pipeline: vk::Pipeline,
    pub cache: vk::PipelineCache,
    pub layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    pub fn new<G: Gpu>(
        gpu: &mut G,
        assets: &Assets,
        shaders: ShaderNames,
        render_pass: vk::RenderPass,
        set_layout: vk::DescriptorSetLayout,
        extent: vk::Extent2D,
        vertex_layout: &VertexLayout,
    ) -> GpuResult<Self> {
        log::info!("Creating graphics pipeline ({}, {})", shaders.vertex, shaders.fragment);

        let mut pipeline = Self::default();
        match pipeline.build(gpu, assets, shaders, render_pass, set_layout, extent, vertex_layout) {
            Ok(()) => Ok(pipeline),
            Err(e) => {
                pipeline.destroy(gpu);
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build<G: Gpu>(
        &mut self,
        gpu: &mut G,
        assets: &Assets,
        shaders: ShaderNames,
        render_pass: vk::RenderPass,
        set_layout: vk::DescriptorSetLayout,
        extent: vk::Extent2D,
        vertex_layout: &VertexLayout,
    ) -> GpuResult<()> {
        self.layout = gpu
            .create_pipeline_layout(set_layout)
            .map_err(GpuError::call("vkCreatePipelineLayout"))?;
        self.cache = gpu
            .create_pipeline_cache()
            .map_err(GpuError::call("vkCreatePipelineCache"))?;

        let vertex_shader = load_shader_module(gpu, assets, shaders.vertex)?;
        let fragment_shader = match load_shader_module(gpu, assets, shaders.fragment) {
            Ok(module) => module,
            Err(e) => {
                gpu.destroy_shader_module(vertex_shader);
                return Err(e);
            }
        };

        let desc = PipelineDesc {
            render_pass,
            layout: self.layout,
            vertex_shader,
            fragment_shader,
            vertex_binding: vertex_layout.binding(),
            vertex_attributes: vertex_layout.attributes.clone(),
            fixed: fixed_function(extent),
        };
        let result = gpu.create_graphics_pipeline(self.cache, &desc);

        // Modules are only needed while the pipeline is being built
        gpu.destroy_shader_module(vertex_shader);
        gpu.destroy_shader_module(fragment_shader);

        self.pipeline = result.map_err(GpuError::call("vkCreateGraphicsPipelines"))?;
        Ok(())
    }

    /// Pipeline, cache, layout
    pub fn destroy<G: Gpu>(&self, gpu: &mut G) {
        if self.pipeline != vk::Pipeline::null() {
            gpu.destroy_pipeline(self.pipeline);
        }
        if self.cache != vk::PipelineCache::null() {
            gpu.destroy_pipeline_cache(self.cache);
        }
        if self.layout != vk::PipelineLayout::null() {
            gpu.destroy_pipeline_layout(self.layout);
        }
    }
}
