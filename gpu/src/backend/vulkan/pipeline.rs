//! Render passes, descriptor layouts and pipeline objects.

use std::ffi::CString;

use ash::vk;

use crate::descriptor::{DescriptorBinding, DescriptorPoolSize};
use crate::error::{GraphicsError, GraphicsResult};
use crate::pipeline::{BlendMode, GraphicsPipelineState, PushConstantRange};
use crate::render_target::{LoadOp, RenderPassLayout};
use crate::types::TextureLayout;

use super::conversion::{
    convert_blend_mode, convert_compare_function, convert_cull_mode, convert_descriptor_type,
    convert_front_face, convert_layout, convert_load_op, convert_polygon_mode,
    convert_shader_stages, convert_step_mode, convert_texture_format, convert_topology,
    convert_vertex_format,
};

fn creation_error(what: &str, e: vk::Result) -> GraphicsError {
    match e {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            GraphicsError::OutOfMemory
        }
        other => GraphicsError::ResourceCreationFailed(format!(
            "Failed to create {}: {:?}",
            what, other
        )),
    }
}

/// Create a single-subpass render pass.
///
/// Color attachments start in the layout implied by the load op and end in
/// `final_color_layout`; the depth attachment stays in its attachment layout.
pub fn create_render_pass(
    device: &ash::Device,
    layout: &RenderPassLayout,
) -> GraphicsResult<vk::RenderPass> {
    let load_op = convert_load_op(layout.load_op);
    let initial_color = convert_layout(layout.initial_color_layout());
    let final_color = convert_layout(layout.final_color_layout);

    let mut attachments: Vec<vk::AttachmentDescription> = layout
        .color_formats
        .iter()
        .map(|format| {
            vk::AttachmentDescription::default()
                .format(convert_texture_format(*format))
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(load_op)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(initial_color)
                .final_layout(final_color)
        })
        .collect();

    let color_refs: Vec<vk::AttachmentReference> = (0..layout.color_formats.len() as u32)
        .map(|index| {
            vk::AttachmentReference::default()
                .attachment(index)
                .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        })
        .collect();

    let depth_ref = layout.depth_format.map(|format| {
        let depth_layout = convert_layout(TextureLayout::DepthStencilAttachment);
        let initial = if layout.load_op == LoadOp::Load {
            depth_layout
        } else {
            vk::ImageLayout::UNDEFINED
        };
        attachments.push(
            vk::AttachmentDescription::default()
                .format(convert_texture_format(format))
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(load_op)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(load_op)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(initial)
                .final_layout(depth_layout),
        );
        vk::AttachmentReference::default()
            .attachment(layout.color_formats.len() as u32)
            .layout(depth_layout)
    });

    let mut subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs);
    if let Some(depth_ref) = depth_ref.as_ref() {
        subpass = subpass.depth_stencil_attachment(depth_ref);
    }

    let attachment_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    let attachment_access = vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
    let dependencies = [
        vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(attachment_stages | vk::PipelineStageFlags::FRAGMENT_SHADER)
            .dst_stage_mask(attachment_stages)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(attachment_access),
        vk::SubpassDependency::default()
            .src_subpass(0)
            .dst_subpass(vk::SUBPASS_EXTERNAL)
            .src_stage_mask(attachment_stages)
            .dst_stage_mask(
                vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::COMPUTE_SHADER,
            )
            .src_access_mask(attachment_access)
            .dst_access_mask(vk::AccessFlags::SHADER_READ),
    ];

    let subpasses = [subpass];
    let create_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { device.create_render_pass(&create_info, None) }
        .map_err(|e| creation_error("render pass", e))
}

pub fn create_descriptor_set_layout(
    device: &ash::Device,
    bindings: &[DescriptorBinding],
) -> GraphicsResult<vk::DescriptorSetLayout> {
    let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
        .iter()
        .map(|binding| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding.binding)
                .descriptor_type(convert_descriptor_type(binding.ty))
                .descriptor_count(binding.count)
                .stage_flags(convert_shader_stages(binding.stages))
        })
        .collect();

    let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);
    unsafe { device.create_descriptor_set_layout(&create_info, None) }
        .map_err(|e| creation_error("descriptor set layout", e))
}

pub fn create_descriptor_pool(
    device: &ash::Device,
    max_sets: u32,
    sizes: &[DescriptorPoolSize],
) -> GraphicsResult<vk::DescriptorPool> {
    let pool_sizes: Vec<vk::DescriptorPoolSize> = sizes
        .iter()
        .filter(|size| size.count > 0)
        .map(|size| {
            vk::DescriptorPoolSize::default()
                .ty(convert_descriptor_type(size.ty))
                .descriptor_count(size.count)
        })
        .collect();

    let create_info = vk::DescriptorPoolCreateInfo::default()
        .max_sets(max_sets)
        .pool_sizes(&pool_sizes);
    unsafe { device.create_descriptor_pool(&create_info, None) }
        .map_err(|e| creation_error("descriptor pool", e))
}

pub fn create_pipeline_layout(
    device: &ash::Device,
    set_layouts: &[vk::DescriptorSetLayout],
    push_constants: &[PushConstantRange],
) -> GraphicsResult<vk::PipelineLayout> {
    let ranges: Vec<vk::PushConstantRange> = push_constants
        .iter()
        .map(|range| {
            vk::PushConstantRange::default()
                .stage_flags(convert_shader_stages(range.stages))
                .offset(range.offset)
                .size(range.size)
        })
        .collect();

    let create_info = vk::PipelineLayoutCreateInfo::default()
        .set_layouts(set_layouts)
        .push_constant_ranges(&ranges);
    unsafe { device.create_pipeline_layout(&create_info, None) }
        .map_err(|e| creation_error("pipeline layout", e))
}

fn entry_point_name(entry: &str) -> GraphicsResult<CString> {
    CString::new(entry).map_err(|e| {
        GraphicsError::InvalidParameter(format!(
            "Invalid entry point name (contains null byte): {}",
            e
        ))
    })
}

fn sample_count(samples: u32) -> vk::SampleCountFlags {
    match samples {
        2 => vk::SampleCountFlags::TYPE_2,
        4 => vk::SampleCountFlags::TYPE_4,
        8 => vk::SampleCountFlags::TYPE_8,
        _ => vk::SampleCountFlags::TYPE_1,
    }
}

/// Create a graphics pipeline with dynamic viewport and scissor.
pub fn create_graphics_pipeline(
    device: &ash::Device,
    state: &GraphicsPipelineState<'_>,
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
    modules: &[vk::ShaderModule],
) -> GraphicsResult<vk::Pipeline> {
    let entry_names = state
        .stages
        .iter()
        .map(|stage| entry_point_name(&stage.entry_point))
        .collect::<GraphicsResult<Vec<_>>>()?;

    let shader_stages: Vec<vk::PipelineShaderStageCreateInfo> = state
        .stages
        .iter()
        .zip(modules)
        .zip(&entry_names)
        .map(|((stage, module), name)| {
            vk::PipelineShaderStageCreateInfo::default()
                .stage(convert_shader_stages(stage.stage))
                .module(*module)
                .name(name)
        })
        .collect();

    let vertex_layout = state.vertex_layout;
    let binding_descriptions: Vec<vk::VertexInputBindingDescription> =
        if vertex_layout.attributes.is_empty() {
            Vec::new()
        } else {
            vec![
                vk::VertexInputBindingDescription::default()
                    .binding(0)
                    .stride(vertex_layout.stride)
                    .input_rate(convert_step_mode(vertex_layout.step_mode)),
            ]
        };
    let attribute_descriptions: Vec<vk::VertexInputAttributeDescription> = vertex_layout
        .attributes
        .iter()
        .map(|attr| {
            vk::VertexInputAttributeDescription::default()
                .location(attr.location)
                .binding(attr.binding)
                .format(convert_vertex_format(attr.format))
                .offset(attr.offset)
        })
        .collect();

    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&binding_descriptions)
        .vertex_attribute_descriptions(&attribute_descriptions);

    let fixed = state.fixed_function;
    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(convert_topology(fixed.topology))
        .primitive_restart_enable(false);

    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(convert_polygon_mode(fixed.polygon_mode))
        .line_width(1.0)
        .cull_mode(convert_cull_mode(fixed.cull_mode))
        .front_face(convert_front_face(fixed.front_face))
        .depth_bias_enable(false);

    let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
        .sample_shading_enable(false)
        .rasterization_samples(sample_count(fixed.sample_count));

    let depth = fixed.depth.filter(|_| state.pass.has_depth);
    let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(depth.is_some())
        .depth_write_enable(depth.is_some_and(|d| d.write))
        .depth_compare_op(
            depth
                .map(|d| convert_compare_function(d.compare))
                .unwrap_or(vk::CompareOp::ALWAYS),
        )
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    // One blend state per color attachment; the last entry repeats.
    let color_blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = (0..state
        .pass
        .color_attachment_count
        as usize)
        .map(|index| {
            let mode = fixed
                .color_blend
                .get(index)
                .or(fixed.color_blend.last())
                .copied()
                .unwrap_or(BlendMode::Opaque);
            convert_blend_mode(mode)
        })
        .collect();

    let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

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
        .render_pass(render_pass)
        .subpass(0);

    let pipelines = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    }
    .map_err(|(_, e)| creation_error("graphics pipeline", e))?;

    pipelines
        .into_iter()
        .next()
        .ok_or_else(|| GraphicsError::Internal("driver returned no pipeline".to_string()))
}

pub fn create_compute_pipeline(
    device: &ash::Device,
    layout: vk::PipelineLayout,
    module: vk::ShaderModule,
    entry_point: &str,
) -> GraphicsResult<vk::Pipeline> {
    let name = entry_point_name(entry_point)?;
    let stage = vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(module)
        .name(&name);
    let pipeline_info = vk::ComputePipelineCreateInfo::default()
        .stage(stage)
        .layout(layout);

    let pipelines = unsafe {
        device.create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    }
    .map_err(|(_, e)| creation_error("compute pipeline", e))?;

    pipelines
        .into_iter()
        .next()
        .ok_or_else(|| GraphicsError::Internal("driver returned no pipeline".to_string()))
}
