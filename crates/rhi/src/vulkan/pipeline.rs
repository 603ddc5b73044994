//! Graphics pipeline creation for the Vulkan backend.
//!
//! Pipelines use dynamic rendering (no VkRenderPass objects), dynamic
//! viewport and scissor, and a single push-descriptor set holding the
//! fragment stage's sampled images followed by its storage buffers. Stages
//! that declare a uniform slot share one push constant block.

use std::ffi::CString;

use ash::vk;
use tracing::{debug, info};

use crate::error::{RhiError, RhiResult};
use crate::pipeline::{PipelineDesc, PrimitiveTopology, StageDesc, VertexFormat};
use crate::shader::{ShaderStage, validate_spirv};

/// Size of the push constant block shared by uniform stages.
///
/// 128 bytes is the minimum every Vulkan implementation guarantees.
pub const PUSH_CONSTANT_BYTES: u32 = 128;

impl ShaderStage {
    /// Converts the shader stage to Vulkan shader stage flags.
    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }
}

impl PrimitiveTopology {
    /// Converts to Vulkan primitive topology.
    pub fn to_vk(self) -> vk::PrimitiveTopology {
        match self {
            PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
            PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
            PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
        }
    }
}

impl VertexFormat {
    /// Converts to the Vulkan attribute format.
    pub fn to_vk(self) -> vk::Format {
        match self {
            VertexFormat::Float2 => vk::Format::R32G32_SFLOAT,
            VertexFormat::Float3 => vk::Format::R32G32B32_SFLOAT,
            VertexFormat::Float4 => vk::Format::R32G32B32A32_SFLOAT,
            VertexFormat::Unorm8x4 => vk::Format::R8G8B8A8_UNORM,
        }
    }
}

/// Vulkan graphics pipeline with its layout objects.
pub struct VulkanPipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    set_layout: Option<vk::DescriptorSetLayout>,
    push_stages: vk::ShaderStageFlags,
    name: String,
}

impl VulkanPipeline {
    /// Creates a pipeline rendering into one color attachment of `color_format`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytecode is not valid SPIR-V, or if any shader
    /// module, layout or pipeline creation fails. Everything created before
    /// the failure is destroyed.
    pub(crate) fn new(
        device: &ash::Device,
        desc: &PipelineDesc<'_>,
        color_format: vk::Format,
    ) -> RhiResult<Self> {
        let fragment = desc.fragment.resources;
        let mut bindings = Vec::new();
        for slot in 0..fragment.samplers {
            bindings.push(
                vk::DescriptorSetLayoutBinding::default()
                    .binding(slot)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::FRAGMENT),
            );
        }
        for slot in 0..fragment.storage_buffers {
            bindings.push(
                vk::DescriptorSetLayoutBinding::default()
                    .binding(fragment.samplers + slot)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::FRAGMENT),
            );
        }

        let mut objects = PartialPipeline {
            device,
            set_layout: None,
            layout: None,
            modules: Vec::new(),
        };

        if !bindings.is_empty() {
            let set_info = vk::DescriptorSetLayoutCreateInfo::default()
                .flags(vk::DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR_KHR)
                .bindings(&bindings);
            objects.set_layout = Some(unsafe { device.create_descriptor_set_layout(&set_info, None)? });
        }

        let push_stages = desc
            .uniform_stages()
            .fold(vk::ShaderStageFlags::empty(), |flags, stage| {
                flags | stage.to_vk_stage()
            });
        let push_ranges: Vec<vk::PushConstantRange> = if push_stages.is_empty() {
            Vec::new()
        } else {
            vec![vk::PushConstantRange {
                stage_flags: push_stages,
                offset: 0,
                size: PUSH_CONSTANT_BYTES,
            }]
        };

        let set_layouts: Vec<vk::DescriptorSetLayout> = objects.set_layout.into_iter().collect();
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_ranges);
        let layout = unsafe { device.create_pipeline_layout(&layout_info, None)? };
        objects.layout = Some(layout);

        let vertex_module = objects.shader_module(&desc.vertex)?;
        let fragment_module = objects.shader_module(&desc.fragment)?;
        let vertex_entry = entry_point(&desc.vertex)?;
        let fragment_entry = entry_point(&desc.fragment)?;

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_module)
                .name(&vertex_entry),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_module)
                .name(&fragment_entry),
        ];

        let vertex_bindings: Vec<vk::VertexInputBindingDescription> = desc
            .vertex_buffers
            .iter()
            .enumerate()
            .map(|(binding, layout)| vk::VertexInputBindingDescription {
                binding: binding as u32,
                stride: layout.stride,
                input_rate: vk::VertexInputRate::VERTEX,
            })
            .collect();
        let vertex_attributes: Vec<vk::VertexInputAttributeDescription> = desc
            .vertex_buffers
            .iter()
            .enumerate()
            .flat_map(|(binding, layout)| {
                layout
                    .attributes
                    .iter()
                    .map(move |attribute| vk::VertexInputAttributeDescription {
                        location: attribute.location,
                        binding: binding as u32,
                        format: attribute.format.to_vk(),
                        offset: attribute.offset,
                    })
            })
            .collect();

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(desc.topology.to_vk())
            .primitive_restart_enable(false);

        // Viewport state (dynamic)
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default();

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA)];
        let color_blend_state =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        // Dynamic rendering info (Vulkan 1.3)
        let color_formats = [color_format];
        let mut rendering_info =
            vk::PipelineRenderingCreateInfo::default().color_attachment_formats(&color_formats);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .push_next(&mut rendering_info);

        let pipeline = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        }
        .map_err(|(_, e)| RhiError::PipelineError(format!("'{}': {}", desc.name, e)))?
        .into_iter()
        .next()
        .ok_or_else(|| RhiError::PipelineError(format!("'{}': no pipeline returned", desc.name)))?;

        // Shader modules are no longer needed once the pipeline exists
        let (set_layout, layout) = objects.finish();

        info!("Created graphics pipeline '{}'", desc.name);

        Ok(Self {
            pipeline,
            layout,
            set_layout,
            push_stages,
            name: desc.name.to_string(),
        })
    }

    /// Destroys the pipeline and its layouts.
    pub(crate) fn destroy(self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
            if let Some(set_layout) = self.set_layout {
                device.destroy_descriptor_set_layout(set_layout, None);
            }
        }
        debug!("Destroyed graphics pipeline '{}'", self.name);
    }

    /// Returns the Vulkan pipeline handle.
    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Returns the pipeline layout handle.
    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Returns true if the pipeline has a push-descriptor set.
    #[inline]
    pub fn has_descriptors(&self) -> bool {
        self.set_layout.is_some()
    }

    /// Stages that receive pushed constants.
    #[inline]
    pub fn push_stages(&self) -> vk::ShaderStageFlags {
        self.push_stages
    }
}

/// Objects created while building a pipeline, destroyed unless finished.
struct PartialPipeline<'a> {
    device: &'a ash::Device,
    set_layout: Option<vk::DescriptorSetLayout>,
    layout: Option<vk::PipelineLayout>,
    modules: Vec<vk::ShaderModule>,
}

impl PartialPipeline<'_> {
    fn shader_module(&mut self, stage: &StageDesc<'_>) -> RhiResult<vk::ShaderModule> {
        validate_spirv(stage.code)?;
        // Copies into u32 storage; the byte slice carries no alignment guarantee.
        let code: Vec<u32> = bytemuck::pod_collect_to_vec(stage.code);

        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { self.device.create_shader_module(&create_info, None)? };
        self.modules.push(module);
        debug!("Created {} shader module", stage.stage);
        Ok(module)
    }

    /// Keeps the layouts alive and releases the shader modules.
    fn finish(mut self) -> (Option<vk::DescriptorSetLayout>, vk::PipelineLayout) {
        let set_layout = self.set_layout.take();
        let layout = self.layout.take().unwrap_or_default();
        (set_layout, layout)
    }
}

impl Drop for PartialPipeline<'_> {
    fn drop(&mut self) {
        unsafe {
            for module in self.modules.drain(..) {
                self.device.destroy_shader_module(module, None);
            }
            if let Some(layout) = self.layout.take() {
                self.device.destroy_pipeline_layout(layout, None);
            }
            if let Some(set_layout) = self.set_layout.take() {
                self.device.destroy_descriptor_set_layout(set_layout, None);
            }
        }
    }
}

fn entry_point(stage: &StageDesc<'_>) -> RhiResult<CString> {
    CString::new(stage.entry_point)
        .map_err(|e| RhiError::ShaderError(format!("Invalid entry point name: {}", e)))
}
