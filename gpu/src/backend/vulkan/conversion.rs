//! Conversions between crate types and Vulkan enums and flags.

use ash::vk;

use crate::command::{CommandBufferLevel, CommandBufferUsage, ResetMode};
use crate::descriptor::DescriptorType;
use crate::device::QueueFlags;
use crate::instance::AdapterType;
use crate::pipeline::{
    BlendMode, CullMode, FrontFace, PipelineBindPoint, PolygonMode, PrimitiveTopology,
    VertexFormat, VertexStepMode,
};
use crate::render_target::LoadOp;
use crate::swapchain::{
    ColorSpace, CompositeAlpha, CompositeAlphaModes, PresentMode, SurfaceTransform,
    SurfaceTransforms,
};
use crate::types::{
    AccessFlags, AddressMode, BufferUsage, ClearValue, CompareFunction, FilterMode,
    FormatFeatures, IndexType, PipelineStages, ShaderStages, TextureFormat, TextureLayout,
    TextureUsage,
};

pub fn convert_texture_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::R8Unorm => vk::Format::R8_UNORM,
        TextureFormat::Rg8Unorm => vk::Format::R8G8_UNORM,
        TextureFormat::R32Float => vk::Format::R32_SFLOAT,
        TextureFormat::R32Uint => vk::Format::R32_UINT,
        TextureFormat::Rg16Float => vk::Format::R16G16_SFLOAT,
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
        TextureFormat::Rgb10a2Unorm => vk::Format::A2B10G10R10_UNORM_PACK32,
        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::Rg32Float => vk::Format::R32G32_SFLOAT,
        TextureFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        TextureFormat::Depth16Unorm => vk::Format::D16_UNORM,
        TextureFormat::Depth24PlusStencil8 => vk::Format::D24_UNORM_S8_UINT,
        TextureFormat::Depth32Float => vk::Format::D32_SFLOAT,
        TextureFormat::Depth32FloatStencil8 => vk::Format::D32_SFLOAT_S8_UINT,
    }
}

/// Map a native surface format back to a crate format.
///
/// Returns `None` for formats the crate cannot describe; such surface
/// formats are skipped during negotiation.
pub fn texture_format_from_vk(format: vk::Format) -> Option<TextureFormat> {
    Some(match format {
        vk::Format::R8G8B8A8_UNORM => TextureFormat::Rgba8Unorm,
        vk::Format::R8G8B8A8_SRGB => TextureFormat::Rgba8UnormSrgb,
        vk::Format::B8G8R8A8_UNORM => TextureFormat::Bgra8Unorm,
        vk::Format::B8G8R8A8_SRGB => TextureFormat::Bgra8UnormSrgb,
        vk::Format::A2B10G10R10_UNORM_PACK32 => TextureFormat::Rgb10a2Unorm,
        vk::Format::R16G16B16A16_SFLOAT => TextureFormat::Rgba16Float,
        _ => return None,
    })
}

pub fn aspect_mask(format: TextureFormat) -> vk::ImageAspectFlags {
    if format.has_stencil() {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else if format.is_depth_stencil() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

pub fn convert_buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    if usage.contains(BufferUsage::VERTEX) {
        flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::STORAGE) {
        flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::INDIRECT) {
        flags |= vk::BufferUsageFlags::INDIRECT_BUFFER;
    }
    if usage.contains(BufferUsage::COPY_SRC) {
        flags |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        flags |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    flags
}

pub fn convert_texture_usage(usage: TextureUsage, format: TextureFormat) -> vk::ImageUsageFlags {
    let mut flags = vk::ImageUsageFlags::empty();
    if usage.contains(TextureUsage::COPY_SRC) {
        flags |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(TextureUsage::COPY_DST) {
        flags |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(TextureUsage::TEXTURE_BINDING) {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(TextureUsage::STORAGE_BINDING) {
        flags |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
        if format.is_depth_stencil() {
            flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        } else {
            flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
    }
    flags
}

pub fn texture_usage_from_vk(flags: vk::ImageUsageFlags) -> TextureUsage {
    let mut usage = TextureUsage::empty();
    if flags.contains(vk::ImageUsageFlags::TRANSFER_SRC) {
        usage |= TextureUsage::COPY_SRC;
    }
    if flags.contains(vk::ImageUsageFlags::TRANSFER_DST) {
        usage |= TextureUsage::COPY_DST;
    }
    if flags.contains(vk::ImageUsageFlags::SAMPLED) {
        usage |= TextureUsage::TEXTURE_BINDING;
    }
    if flags.contains(vk::ImageUsageFlags::STORAGE) {
        usage |= TextureUsage::STORAGE_BINDING;
    }
    if flags.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT) {
        usage |= TextureUsage::RENDER_ATTACHMENT;
    }
    usage
}

pub fn format_features_from_vk(flags: vk::FormatFeatureFlags) -> FormatFeatures {
    let mut features = FormatFeatures::empty();
    if flags.contains(vk::FormatFeatureFlags::SAMPLED_IMAGE) {
        features |= FormatFeatures::SAMPLED;
    }
    if flags.contains(vk::FormatFeatureFlags::STORAGE_IMAGE) {
        features |= FormatFeatures::STORAGE;
    }
    if flags.contains(vk::FormatFeatureFlags::COLOR_ATTACHMENT) {
        features |= FormatFeatures::COLOR_ATTACHMENT;
    }
    if flags.contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT) {
        features |= FormatFeatures::DEPTH_STENCIL_ATTACHMENT;
    }
    features
}

pub fn convert_layout(layout: TextureLayout) -> vk::ImageLayout {
    match layout {
        TextureLayout::Undefined => vk::ImageLayout::UNDEFINED,
        TextureLayout::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        TextureLayout::DepthStencilAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        TextureLayout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        TextureLayout::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        TextureLayout::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        TextureLayout::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
        TextureLayout::General => vk::ImageLayout::GENERAL,
    }
}

pub fn convert_access(access: AccessFlags) -> vk::AccessFlags {
    let mut flags = vk::AccessFlags::empty();
    if access.contains(AccessFlags::SHADER_READ) {
        flags |= vk::AccessFlags::SHADER_READ;
    }
    if access.contains(AccessFlags::SHADER_WRITE) {
        flags |= vk::AccessFlags::SHADER_WRITE;
    }
    if access.contains(AccessFlags::COLOR_ATTACHMENT_WRITE) {
        flags |= vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
    }
    if access.contains(AccessFlags::DEPTH_STENCIL_WRITE) {
        flags |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
    }
    if access.contains(AccessFlags::TRANSFER_READ) {
        flags |= vk::AccessFlags::TRANSFER_READ;
    }
    if access.contains(AccessFlags::TRANSFER_WRITE) {
        flags |= vk::AccessFlags::TRANSFER_WRITE;
    }
    if access.contains(AccessFlags::HOST_WRITE) {
        flags |= vk::AccessFlags::HOST_WRITE;
    }
    flags
}

pub fn convert_stages(stages: PipelineStages) -> vk::PipelineStageFlags {
    let mut flags = vk::PipelineStageFlags::empty();
    if stages.contains(PipelineStages::TOP_OF_PIPE) {
        flags |= vk::PipelineStageFlags::TOP_OF_PIPE;
    }
    if stages.contains(PipelineStages::VERTEX_SHADER) {
        flags |= vk::PipelineStageFlags::VERTEX_SHADER;
    }
    if stages.contains(PipelineStages::FRAGMENT_SHADER) {
        flags |= vk::PipelineStageFlags::FRAGMENT_SHADER;
    }
    if stages.contains(PipelineStages::FRAGMENT_TESTS) {
        flags |= vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    }
    if stages.contains(PipelineStages::COLOR_ATTACHMENT_OUTPUT) {
        flags |= vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
    }
    if stages.contains(PipelineStages::COMPUTE_SHADER) {
        flags |= vk::PipelineStageFlags::COMPUTE_SHADER;
    }
    if stages.contains(PipelineStages::TRANSFER) {
        flags |= vk::PipelineStageFlags::TRANSFER;
    }
    if stages.contains(PipelineStages::BOTTOM_OF_PIPE) {
        flags |= vk::PipelineStageFlags::BOTTOM_OF_PIPE;
    }
    if stages.contains(PipelineStages::ALL_COMMANDS) {
        flags |= vk::PipelineStageFlags::ALL_COMMANDS;
    }
    if flags.is_empty() {
        // An empty stage mask is invalid in a barrier.
        vk::PipelineStageFlags::TOP_OF_PIPE
    } else {
        flags
    }
}

pub fn convert_shader_stages(stages: ShaderStages) -> vk::ShaderStageFlags {
    let mut flags = vk::ShaderStageFlags::empty();
    if stages.contains(ShaderStages::VERTEX) {
        flags |= vk::ShaderStageFlags::VERTEX;
    }
    if stages.contains(ShaderStages::FRAGMENT) {
        flags |= vk::ShaderStageFlags::FRAGMENT;
    }
    if stages.contains(ShaderStages::COMPUTE) {
        flags |= vk::ShaderStageFlags::COMPUTE;
    }
    flags
}

pub fn convert_descriptor_type(ty: DescriptorType) -> vk::DescriptorType {
    match ty {
        DescriptorType::Sampler => vk::DescriptorType::SAMPLER,
        DescriptorType::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        DescriptorType::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
        DescriptorType::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
        DescriptorType::UniformTexelBuffer => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
        DescriptorType::StorageTexelBuffer => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
        DescriptorType::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorType::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        DescriptorType::UniformBufferDynamic => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        DescriptorType::StorageBufferDynamic => vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
        DescriptorType::InputAttachment => vk::DescriptorType::INPUT_ATTACHMENT,
    }
}

pub fn convert_vertex_format(format: VertexFormat) -> vk::Format {
    match format {
        VertexFormat::Float32 => vk::Format::R32_SFLOAT,
        VertexFormat::Float32x2 => vk::Format::R32G32_SFLOAT,
        VertexFormat::Float32x3 => vk::Format::R32G32B32_SFLOAT,
        VertexFormat::Float32x4 => vk::Format::R32G32B32A32_SFLOAT,
        VertexFormat::Unorm8x4 => vk::Format::R8G8B8A8_UNORM,
        VertexFormat::Uint8x4 => vk::Format::R8G8B8A8_UINT,
        VertexFormat::Uint16x4 => vk::Format::R16G16B16A16_UINT,
        VertexFormat::Uint32 => vk::Format::R32_UINT,
    }
}

pub fn convert_step_mode(mode: VertexStepMode) -> vk::VertexInputRate {
    match mode {
        VertexStepMode::Vertex => vk::VertexInputRate::VERTEX,
        VertexStepMode::Instance => vk::VertexInputRate::INSTANCE,
    }
}

pub fn convert_topology(topology: PrimitiveTopology) -> vk::PrimitiveTopology {
    match topology {
        PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
        PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveTopology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
    }
}

pub fn convert_cull_mode(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
    }
}

pub fn convert_front_face(face: FrontFace) -> vk::FrontFace {
    match face {
        FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
        FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
    }
}

pub fn convert_polygon_mode(mode: PolygonMode) -> vk::PolygonMode {
    match mode {
        PolygonMode::Fill => vk::PolygonMode::FILL,
        PolygonMode::Line => vk::PolygonMode::LINE,
    }
}

/// Color blend state for one attachment.
pub fn convert_blend_mode(mode: BlendMode) -> vk::PipelineColorBlendAttachmentState {
    let base = vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA);
    match mode {
        BlendMode::Opaque => base.blend_enable(false),
        BlendMode::Alpha => base
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD),
        BlendMode::Additive => base
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::ONE)
            .dst_color_blend_factor(vk::BlendFactor::ONE)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE)
            .alpha_blend_op(vk::BlendOp::ADD),
    }
}

pub fn convert_compare_function(compare: CompareFunction) -> vk::CompareOp {
    match compare {
        CompareFunction::Never => vk::CompareOp::NEVER,
        CompareFunction::Less => vk::CompareOp::LESS,
        CompareFunction::Equal => vk::CompareOp::EQUAL,
        CompareFunction::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareFunction::Greater => vk::CompareOp::GREATER,
        CompareFunction::NotEqual => vk::CompareOp::NOT_EQUAL,
        CompareFunction::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
        CompareFunction::Always => vk::CompareOp::ALWAYS,
    }
}

pub fn convert_filter(filter: FilterMode) -> vk::Filter {
    match filter {
        FilterMode::Nearest => vk::Filter::NEAREST,
        FilterMode::Linear => vk::Filter::LINEAR,
    }
}

pub fn convert_mipmap_mode(filter: FilterMode) -> vk::SamplerMipmapMode {
    match filter {
        FilterMode::Nearest => vk::SamplerMipmapMode::NEAREST,
        FilterMode::Linear => vk::SamplerMipmapMode::LINEAR,
    }
}

pub fn convert_address_mode(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::MirrorRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        AddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
    }
}

pub fn convert_load_op(op: LoadOp) -> vk::AttachmentLoadOp {
    match op {
        LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
        LoadOp::Load => vk::AttachmentLoadOp::LOAD,
        LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
    }
}

pub fn convert_clear_value(value: &ClearValue) -> vk::ClearValue {
    match *value {
        ClearValue::Color { r, g, b, a } => vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [r, g, b, a],
            },
        },
        ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
        },
        ClearValue::None => vk::ClearValue::default(),
    }
}

pub fn convert_index_type(ty: IndexType) -> vk::IndexType {
    match ty {
        IndexType::U16 => vk::IndexType::UINT16,
        IndexType::U32 => vk::IndexType::UINT32,
    }
}

pub fn convert_bind_point(point: PipelineBindPoint) -> vk::PipelineBindPoint {
    match point {
        PipelineBindPoint::Graphics => vk::PipelineBindPoint::GRAPHICS,
        PipelineBindPoint::Compute => vk::PipelineBindPoint::COMPUTE,
    }
}

pub fn convert_command_buffer_level(level: CommandBufferLevel) -> vk::CommandBufferLevel {
    match level {
        CommandBufferLevel::Primary => vk::CommandBufferLevel::PRIMARY,
        CommandBufferLevel::Secondary => vk::CommandBufferLevel::SECONDARY,
    }
}

pub fn convert_command_buffer_usage(usage: CommandBufferUsage) -> vk::CommandBufferUsageFlags {
    match usage {
        CommandBufferUsage::OneTimeSubmit => vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
        CommandBufferUsage::RenderPassContinue => {
            vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE
        }
        CommandBufferUsage::SimultaneousUse => vk::CommandBufferUsageFlags::SIMULTANEOUS_USE,
    }
}

pub fn command_pool_flags(reset_mode: ResetMode) -> vk::CommandPoolCreateFlags {
    if reset_mode.resets_individually() {
        vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
    } else {
        vk::CommandPoolCreateFlags::TRANSIENT
    }
}

pub fn queue_flags_from_vk(flags: vk::QueueFlags) -> QueueFlags {
    let mut result = QueueFlags::empty();
    if flags.contains(vk::QueueFlags::GRAPHICS) {
        result |= QueueFlags::GRAPHICS;
    }
    if flags.contains(vk::QueueFlags::COMPUTE) {
        result |= QueueFlags::COMPUTE;
    }
    // Graphics and compute families implicitly support transfers.
    if flags.intersects(vk::QueueFlags::TRANSFER | vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
    {
        result |= QueueFlags::TRANSFER;
    }
    result
}

pub fn adapter_type_from_vk(ty: vk::PhysicalDeviceType) -> AdapterType {
    match ty {
        vk::PhysicalDeviceType::DISCRETE_GPU => AdapterType::Discrete,
        vk::PhysicalDeviceType::INTEGRATED_GPU => AdapterType::Integrated,
        vk::PhysicalDeviceType::VIRTUAL_GPU => AdapterType::Virtual,
        vk::PhysicalDeviceType::CPU => AdapterType::Software,
        _ => AdapterType::Unknown,
    }
}

pub fn convert_present_mode(mode: PresentMode) -> vk::PresentModeKHR {
    match mode {
        PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
        PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentMode::Fifo => vk::PresentModeKHR::FIFO,
        PresentMode::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
    }
}

pub fn present_mode_from_vk(mode: vk::PresentModeKHR) -> Option<PresentMode> {
    match mode {
        vk::PresentModeKHR::IMMEDIATE => Some(PresentMode::Immediate),
        vk::PresentModeKHR::MAILBOX => Some(PresentMode::Mailbox),
        vk::PresentModeKHR::FIFO => Some(PresentMode::Fifo),
        vk::PresentModeKHR::FIFO_RELAXED => Some(PresentMode::FifoRelaxed),
        _ => None,
    }
}

pub fn convert_color_space(space: ColorSpace) -> vk::ColorSpaceKHR {
    match space {
        ColorSpace::SrgbNonlinear => vk::ColorSpaceKHR::SRGB_NONLINEAR,
        ColorSpace::DisplayP3Nonlinear => vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT,
        ColorSpace::ExtendedSrgbLinear => vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
    }
}

pub fn color_space_from_vk(space: vk::ColorSpaceKHR) -> Option<ColorSpace> {
    match space {
        vk::ColorSpaceKHR::SRGB_NONLINEAR => Some(ColorSpace::SrgbNonlinear),
        vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT => Some(ColorSpace::DisplayP3Nonlinear),
        vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT => Some(ColorSpace::ExtendedSrgbLinear),
        _ => None,
    }
}

const TRANSFORM_PAIRS: [(SurfaceTransform, vk::SurfaceTransformFlagsKHR); 9] = [
    (SurfaceTransform::Identity, vk::SurfaceTransformFlagsKHR::IDENTITY),
    (SurfaceTransform::Rotate90, vk::SurfaceTransformFlagsKHR::ROTATE_90),
    (SurfaceTransform::Rotate180, vk::SurfaceTransformFlagsKHR::ROTATE_180),
    (SurfaceTransform::Rotate270, vk::SurfaceTransformFlagsKHR::ROTATE_270),
    (
        SurfaceTransform::HorizontalMirror,
        vk::SurfaceTransformFlagsKHR::HORIZONTAL_MIRROR,
    ),
    (
        SurfaceTransform::HorizontalMirrorRotate90,
        vk::SurfaceTransformFlagsKHR::HORIZONTAL_MIRROR_ROTATE_90,
    ),
    (
        SurfaceTransform::HorizontalMirrorRotate180,
        vk::SurfaceTransformFlagsKHR::HORIZONTAL_MIRROR_ROTATE_180,
    ),
    (
        SurfaceTransform::HorizontalMirrorRotate270,
        vk::SurfaceTransformFlagsKHR::HORIZONTAL_MIRROR_ROTATE_270,
    ),
    (SurfaceTransform::Inherit, vk::SurfaceTransformFlagsKHR::INHERIT),
];

pub fn convert_transform(transform: SurfaceTransform) -> vk::SurfaceTransformFlagsKHR {
    TRANSFORM_PAIRS
        .iter()
        .find(|(t, _)| *t == transform)
        .map(|(_, flag)| *flag)
        .unwrap_or(vk::SurfaceTransformFlagsKHR::IDENTITY)
}

pub fn transform_from_vk(flag: vk::SurfaceTransformFlagsKHR) -> SurfaceTransform {
    TRANSFORM_PAIRS
        .iter()
        .find(|(_, f)| *f == flag)
        .map(|(t, _)| *t)
        .unwrap_or_default()
}

pub fn transforms_from_vk(flags: vk::SurfaceTransformFlagsKHR) -> SurfaceTransforms {
    TRANSFORM_PAIRS
        .iter()
        .filter(|(_, f)| flags.contains(*f))
        .fold(SurfaceTransforms::empty(), |acc, (t, _)| acc | t.flag())
}

pub fn convert_composite_alpha(alpha: CompositeAlpha) -> vk::CompositeAlphaFlagsKHR {
    match alpha {
        CompositeAlpha::Opaque => vk::CompositeAlphaFlagsKHR::OPAQUE,
        CompositeAlpha::PreMultiplied => vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        CompositeAlpha::PostMultiplied => vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        CompositeAlpha::Inherit => vk::CompositeAlphaFlagsKHR::INHERIT,
    }
}

pub fn composite_alpha_from_vk(flags: vk::CompositeAlphaFlagsKHR) -> CompositeAlphaModes {
    CompositeAlpha::PRIORITY
        .iter()
        .filter(|alpha| flags.contains(convert_composite_alpha(**alpha)))
        .fold(CompositeAlphaModes::empty(), |acc, alpha| acc | alpha.flag())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_formats_round_trip() {
        for format in [
            TextureFormat::Bgra8UnormSrgb,
            TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba16Float,
        ] {
            assert_eq!(
                texture_format_from_vk(convert_texture_format(format)),
                Some(format)
            );
        }
        assert_eq!(texture_format_from_vk(vk::Format::R5G6B5_UNORM_PACK16), None);
    }

    #[test]
    fn test_depth_aspect() {
        assert_eq!(
            aspect_mask(TextureFormat::Depth32Float),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_mask(TextureFormat::Depth24PlusStencil8),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            convert_texture_usage(TextureUsage::RENDER_ATTACHMENT, TextureFormat::Depth32Float),
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
        );
    }

    #[test]
    fn test_transfer_implied_by_graphics() {
        let flags = queue_flags_from_vk(vk::QueueFlags::GRAPHICS);
        assert!(flags.contains(QueueFlags::TRANSFER));
    }

    #[test]
    fn test_transform_masks() {
        let transforms = transforms_from_vk(
            vk::SurfaceTransformFlagsKHR::IDENTITY | vk::SurfaceTransformFlagsKHR::ROTATE_90,
        );
        assert_eq!(
            transforms,
            SurfaceTransforms::IDENTITY | SurfaceTransforms::ROTATE_90
        );
        assert_eq!(
            transform_from_vk(vk::SurfaceTransformFlagsKHR::ROTATE_180),
            SurfaceTransform::Rotate180
        );
    }

    #[test]
    fn test_empty_stage_mask() {
        assert_eq!(
            convert_stages(PipelineStages::empty()),
            vk::PipelineStageFlags::TOP_OF_PIPE
        );
    }
}
