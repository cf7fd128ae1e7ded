//! GPU integration tests for the lifecycle manager.
//!
//! Tests are parameterized using `rstest` to run against every backend. The
//! dummy backend always runs; Vulkan cases skip themselves when no device can
//! be created on the machine.
//!
//! # Test Categories
//!
//! - **Resource Tests**: buffer and texture uploads through staging
//! - **Pool Tests**: command buffer, fence, semaphore and descriptor recycling
//! - **Timeline Tests**: split recording and timeline-gated reuse
//! - **Lifetime Tests**: deferred destruction and render target resizing
//! - **Frame Loop Tests**: the swapchain frame loop on the dummy backend
//!
//! # Running Tests
//!
//! ```bash
//! cargo test --test gpu_tests
//! RUST_LOG=redlilium_gpu=debug cargo test --test gpu_tests -- --nocapture
//! ```

mod common;

use rstest::rstest;

use common::{Backend, TestContext, device_parameters, pattern, storage_compute_shader, textured_shader};
use redlilium_gpu::backend::dummy::DummyCommand;
use redlilium_gpu::descriptor::{
    DESCRIPTOR_PACK_SIZE, DescriptorBinding, DescriptorPoolSize, object_identity,
};
use redlilium_gpu::pipeline::VertexElement;
use redlilium_gpu::types::{BufferCopy, PipelineStages, ShaderStages};
use redlilium_gpu::{
    BufferDescriptor, BufferUsage, ClearValue, CommandBufferLevel, CommandBufferUsage,
    DescriptorPool, DescriptorSetCache, DescriptorType, Extent2d, PipelineDescriptor,
    PresentStatus, QueueRole, RenderContext, RenderTargetDescriptor, ResetMode,
    SamplerDescriptor, Submission, SwapchainConfig, TextureDescriptor, TextureFormat,
    TextureLayout, TextureUsage,
};

macro_rules! context_or_skip {
    ($backend:expr) => {
        context_or_skip!($backend, device_parameters(2))
    };
    ($backend:expr, $params:expr) => {
        match TestContext::with_params($backend, $params) {
            Some(ctx) => ctx,
            None => {
                eprintln!("Backend {:?} not available, skipping", $backend);
                return;
            }
        }
    };
}

// ============================================================================
// Resource Tests
// ============================================================================

/// Upload into a device-local buffer, copy it back to a host buffer and
/// compare.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_buffer_upload_roundtrip(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);
    let data = pattern(256);

    let gpu = ctx
        .device
        .create_buffer(
            &BufferDescriptor::new(256, BufferUsage::STORAGE | BufferUsage::COPY_SRC)
                .with_label("gpu"),
            Some(&data),
        )
        .expect("Failed to create device-local buffer");
    let readback = ctx.create_host_buffer(256, BufferUsage::COPY_DST);

    ctx.device
        .transfer(|cmd| {
            cmd.copy_buffer(
                gpu.handle(),
                readback.handle(),
                &[BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size: 256,
                }],
            );
            Ok(())
        })
        .expect("Transfer failed");

    assert_eq!(ctx.read(&readback), data);
    assert_eq!(
        ctx.device
            .active_command_buffers(QueueRole::Transfer, CommandBufferLevel::Primary),
        0
    );
}

/// Host-visible buffers are written directly, at any in-bounds offset.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_host_buffer_partial_write(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);
    let buffer = ctx.create_host_buffer(16, BufferUsage::UNIFORM);

    buffer.write(0, &[0u8; 16]).unwrap();
    buffer.write(4, &[1, 2, 3, 4]).unwrap();
    assert!(buffer.write(14, &[9, 9, 9, 9]).is_err());

    let bytes = ctx.read(&buffer);
    assert_eq!(&bytes[..8], &[0, 0, 0, 0, 1, 2, 3, 4]);
    assert_eq!(&bytes[8..], &[0u8; 8]);
}

/// Textures created with data end up shader-readable.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_texture_upload_layout(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);
    let descriptor = TextureDescriptor::new_2d(
        4,
        4,
        TextureFormat::Rgba8Unorm,
        TextureUsage::TEXTURE_BINDING,
    )
    .with_label("checker");

    let texture = ctx
        .device
        .create_texture(&descriptor, Some(&pattern(64)))
        .expect("Failed to create texture");
    assert_eq!(texture.layout(), TextureLayout::ShaderReadOnly);
    assert!(texture.descriptor().usage.contains(TextureUsage::COPY_DST));

    let wrong_size = ctx.device.create_texture(&descriptor, Some(&pattern(10)));
    assert!(wrong_size.is_err());

    if let Some(dummy) = &ctx.dummy {
        assert_eq!(
            dummy.image_transitions(texture.image()),
            vec![
                (TextureLayout::Undefined, TextureLayout::TransferDst),
                (TextureLayout::TransferDst, TextureLayout::ShaderReadOnly),
            ]
        );
    }
}

// ============================================================================
// Pool Tests
// ============================================================================

/// Discarded buffers are reused instead of allocating new ones.
#[rstest]
#[case::dummy(Backend::Dummy, ResetMode::ResetIndividually)]
#[case::dummy_always_allocated(Backend::Dummy, ResetMode::AlwaysAllocated)]
#[case::vulkan(Backend::Vulkan, ResetMode::ResetIndividually)]
fn test_command_pool_recycles(#[case] backend: Backend, #[case] mode: ResetMode) {
    let ctx = context_or_skip!(backend);
    let mut pool = ctx
        .device
        .create_command_pool(QueueRole::Graphics, mode)
        .unwrap();

    for _ in 0..4 {
        let buffers: Vec<_> = (0..3)
            .map(|_| pool.request(CommandBufferLevel::Primary).unwrap())
            .collect();
        assert_eq!(pool.active_count(CommandBufferLevel::Primary), 3);
        for buffer in buffers {
            pool.discard(buffer).unwrap();
        }
    }

    assert_eq!(pool.active_count(CommandBufferLevel::Primary), 0);
    assert_eq!(pool.allocated_count(CommandBufferLevel::Primary), 3);
    assert_eq!(pool.allocated_count(CommandBufferLevel::Secondary), 0);
}

/// Pool-wide reset only succeeds once every lease is back.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_command_pool_reset_mode(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);
    let mut pool = ctx
        .device
        .create_command_pool(QueueRole::Graphics, ResetMode::ResetPool)
        .unwrap();

    let mut first = pool.request(CommandBufferLevel::Primary).unwrap();
    first.begin(CommandBufferUsage::OneTimeSubmit).unwrap();
    first.end().unwrap();
    let second = pool.request(CommandBufferLevel::Secondary).unwrap();

    pool.discard(first).unwrap();
    assert!(pool.reset().is_err());
    pool.discard(second).unwrap();
    pool.reset().unwrap();

    let reused = pool.request(CommandBufferLevel::Primary).unwrap();
    assert_eq!(reused.index(), 0);
    assert_eq!(pool.allocated_count(CommandBufferLevel::Primary), 1);
    pool.discard(reused).unwrap();
}

/// Fences and semaphores go back to their pools and come out again.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_sync_object_recycling(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);
    let device = &ctx.device;

    let fence = device.request_fence().unwrap();
    let mut cmd = device
        .request_command_buffer(QueueRole::Graphics, CommandBufferLevel::Primary)
        .unwrap();
    cmd.begin(CommandBufferUsage::OneTimeSubmit).unwrap();
    cmd.end().unwrap();
    let mut submission = Submission::new();
    submission.push(&mut cmd).unwrap();
    device
        .submit(QueueRole::Graphics, &submission, Some(fence))
        .unwrap();
    device.wait_fence(fence).unwrap();
    device.discard_fence(fence).unwrap();
    device
        .discard_command_buffer(QueueRole::Graphics, cmd)
        .unwrap();

    assert_eq!(device.request_fence().unwrap(), fence);

    let semaphore = device.request_semaphore().unwrap();
    device.discard_semaphore(semaphore).unwrap();
    assert!(device.discard_semaphore(semaphore).is_err());
    assert!(device.discard_fence(fence).is_ok());
    assert!(device.discard_fence(fence).is_err());
    assert_eq!(device.request_semaphore().unwrap(), semaphore);
}

/// Descriptor pools grow by chaining new links instead of failing.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_descriptor_pool_chaining(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);
    let raw = ctx.raw();
    let layout = raw
        .create_descriptor_set_layout(&[DescriptorBinding::new(
            0,
            "camera",
            DescriptorType::UniformBuffer,
            ShaderStages::VERTEX,
        )])
        .unwrap();

    {
        let mut pool = DescriptorPool::new(
            raw.clone(),
            4,
            vec![DescriptorPoolSize {
                ty: DescriptorType::UniformBuffer,
                count: 4,
            }],
        )
        .unwrap();

        let sets = pool.allocate(&[layout; 10]).unwrap();
        assert_eq!(sets.len(), 10);
        assert_eq!(pool.chain_len(), 3);
        assert_eq!(pool.allocated_in_current(), 2);
        assert_eq!(pool.total_allocated(), 10);

        let mut cache = DescriptorSetCache::new(layout);
        let identity = object_identity(7, 0);
        let first = cache.allocate(identity, &mut pool).unwrap();
        for _ in 1..DESCRIPTOR_PACK_SIZE {
            assert_ne!(cache.allocate(identity, &mut pool).unwrap(), first);
        }
        // The pack wraps around.
        assert_eq!(cache.allocate(identity, &mut pool).unwrap(), first);

        assert!(cache.free(identity));
        let allocated = pool.total_allocated();
        cache.allocate(object_identity(8, 0), &mut pool).unwrap();
        assert_eq!(pool.total_allocated(), allocated);
        assert_eq!(cache.len(), 1);
    }

    raw.destroy_descriptor_set_layout(layout);
}

// ============================================================================
// Timeline Tests
// ============================================================================

/// Recording splits into several buffers, and they return to the pool once
/// the timeline passes their value.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_timeline_command_buffer(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend, device_parameters(2).with_max_commands_per_buffer(2));
    let device = &ctx.device;

    let src = ctx.create_host_buffer(64, BufferUsage::COPY_SRC);
    let dst = ctx.create_host_buffer(64, BufferUsage::COPY_DST);
    src.write(0, &pattern(64)).unwrap();

    let mut timeline = device.create_timeline(0).unwrap();
    let mut recorder = device
        .create_timeline_command_buffer(QueueRole::Graphics)
        .unwrap();

    for chunk in 0..5u64 {
        recorder
            .record(|cmd| {
                cmd.copy_buffer(
                    src.handle(),
                    dst.handle(),
                    &[BufferCopy {
                        src_offset: chunk * 8,
                        dst_offset: chunk * 8,
                        size: 8,
                    }],
                )
            })
            .unwrap();
    }

    let value = timeline.next_value();
    let mut submission = Submission::new().signal_timeline(timeline.handle(), value);
    assert_eq!(recorder.flush(&mut submission, value).unwrap(), 3);
    assert!(submission.has_timeline_values());
    device.submit(QueueRole::Graphics, &submission, None).unwrap();

    assert!(timeline.wait(value, u64::MAX).unwrap());
    assert!(timeline.completed_value().unwrap() >= value);
    assert_eq!(recorder.in_flight_len(), 1);

    recorder
        .discard_completed(timeline.completed_value().unwrap())
        .unwrap();
    assert_eq!(recorder.in_flight_len(), 0);
    assert_eq!(recorder.pool().active_count(CommandBufferLevel::Primary), 0);
    assert_eq!(recorder.pool().allocated_count(CommandBufferLevel::Primary), 3);

    assert_eq!(&ctx.read(&dst)[..40], &pattern(64)[..40]);
}

/// Host signals advance the timeline without any submission.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_timeline_host_signal(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);
    let mut timeline = ctx.device.create_timeline(5).unwrap();
    assert_eq!(timeline.completed_value().unwrap(), 5);
    assert_eq!(timeline.next_value(), 6);

    timeline.signal(6).unwrap();
    assert!(timeline.wait(6, 0).unwrap());
    assert_eq!(timeline.last_value(), 6);
}

// ============================================================================
// Lifetime Tests
// ============================================================================

/// Dropped resources survive `frames_in_flight` frames.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_deferred_destruction(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend, device_parameters(3));
    let device = &ctx.device;

    let buffer = ctx.create_host_buffer(32, BufferUsage::VERTEX);
    let handle = buffer.handle();
    drop(buffer);
    assert_eq!(device.pending_destruction_count(), 1);

    device.advance_frame();
    device.advance_frame();
    if let Some(dummy) = &ctx.dummy {
        assert!(dummy.is_alive(handle.raw()));
    }
    assert_eq!(device.advance_frame(), 1);
    assert_eq!(device.pending_destruction_count(), 0);
    if let Some(dummy) = &ctx.dummy {
        assert!(!dummy.is_alive(handle.raw()));
    }
}

/// Resizing rebuilds the attachments and defers the old ones.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_render_target_resize(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);
    let device = &ctx.device;

    let descriptor = RenderTargetDescriptor::color(Extent2d::new(64, 32), TextureFormat::Rgba8Unorm)
        .with_depth(TextureFormat::Depth32Float)
        .with_label("offscreen");
    let mut target = device.create_render_target(&descriptor).unwrap();
    assert_eq!(target.color_attachments().len(), 1);
    assert!(target.depth_attachment().is_some());
    assert!(target.pass_info().has_depth);

    let begin = target.begin_info(&[ClearValue::color(0.0, 0.0, 0.0, 1.0), ClearValue::depth(1.0)]);
    device
        .submit_once(QueueRole::Graphics, |cmd| {
            cmd.begin_render_pass(&begin);
            cmd.end_render_pass();
            Ok(())
        })
        .unwrap();

    let old_pass = target.render_pass();
    assert!(!target.resize(Extent2d::new(64, 32)).unwrap());
    assert!(target.resize(Extent2d::new(128, 128)).unwrap());
    assert_eq!(target.extent(), Extent2d::new(128, 128));
    assert_ne!(target.render_pass(), old_pass);
    assert!(device.pending_destruction_count() > 0);

    if let Some(dummy) = &ctx.dummy {
        assert!(dummy.is_alive(old_pass.raw()));
        let color = target.color_attachments()[0];
        assert_eq!(dummy.image_extent(color.image), Some(Extent2d::new(128, 128)));
    }
    device.wait_idle().unwrap();
}

/// Dropping everything leaves no native objects behind.
#[test]
fn test_no_leaks_after_teardown() {
    let ctx = TestContext::new(Backend::Dummy).expect("dummy backend is always available");
    let TestContext {
        instance,
        device,
        dummy,
        ..
    } = ctx;
    let dummy = dummy.expect("dummy context keeps its backend");

    {
        let _buffer = device
            .create_buffer(&BufferDescriptor::new(64, BufferUsage::VERTEX), Some(&pattern(64)))
            .unwrap();
        let _sampler = device.create_sampler(&SamplerDescriptor::linear()).unwrap();
        let _target = device
            .create_render_target(&RenderTargetDescriptor::color(
                Extent2d::new(8, 8),
                TextureFormat::Bgra8Unorm,
            ))
            .unwrap();
        let _timeline = device.create_timeline(0).unwrap();
    }
    assert!(device.pending_destruction_count() > 0);

    drop(device);
    drop(instance);
    assert_eq!(dummy.live_object_count(), 0);
}

// ============================================================================
// Pipeline Tests (dummy: the shader code is a placeholder)
// ============================================================================

/// A compute dispatch is skipped until every binding has a resource.
#[test]
fn test_compute_dispatch_requires_bindings() {
    let ctx = TestContext::new(Backend::Dummy).expect("dummy backend is always available");
    let dummy = ctx.dummy.clone().expect("dummy context keeps its backend");
    let device = &ctx.device;

    let mut pipeline = device
        .create_compute_pipeline(&storage_compute_shader())
        .unwrap();
    let data = device
        .create_buffer(&BufferDescriptor::new(128, BufferUsage::STORAGE), None)
        .unwrap();

    let skipped = device
        .compute(|cmd| pipeline.dispatch(cmd, object_identity(1, 0), 4, 1, 1))
        .unwrap();
    assert!(!skipped);

    pipeline.bind_buffer_by_name("data", &data).unwrap();
    let dispatched = device
        .compute(|cmd| pipeline.dispatch(cmd, object_identity(1, 0), 4, 1, 1))
        .unwrap();
    assert!(dispatched);

    let executed = dummy.executed_commands();
    let dispatches = executed
        .iter()
        .filter(|c| matches!(c, DummyCommand::Dispatch { x: 4, y: 1, z: 1 }))
        .count();
    assert_eq!(dispatches, 1);
}

// ============================================================================
// Frame Loop Tests (dummy only: needs a window surface)
// ============================================================================

/// Draw a textured object for several frames through the render context.
#[test]
fn test_frame_loop_draws() {
    let ctx = TestContext::new(Backend::Dummy).expect("dummy backend is always available");
    let dummy = ctx.dummy.clone().expect("dummy context keeps its backend");
    let device = ctx.device.clone();

    let surface = ctx.fake_surface().expect("dummy backend creates surfaces");
    let mut context = RenderContext::new(&device, surface, SwapchainConfig::new()).unwrap();

    let mut pipeline = device
        .create_graphics_pipeline(
            &textured_shader(),
            &PipelineDescriptor::new(Vec::<VertexElement>::new()).with_label("textured"),
            context.present_pass_info(),
        )
        .unwrap();
    let camera = device
        .create_buffer(
            &BufferDescriptor::new(64, BufferUsage::UNIFORM | BufferUsage::MAP_WRITE),
            None,
        )
        .unwrap();
    let albedo = device
        .create_texture(
            &TextureDescriptor::new_2d(2, 2, TextureFormat::Rgba8UnormSrgb, TextureUsage::TEXTURE_BINDING),
            Some(&pattern(16)),
        )
        .unwrap();
    let sampler = device.create_sampler(&SamplerDescriptor::linear()).unwrap();

    pipeline.bind_buffer_by_name("camera", &camera).unwrap();
    pipeline
        .bind_texture_by_name("albedo", &albedo, Some(&sampler))
        .unwrap();

    let identity = object_identity(42, 0);
    for frame in 0..4u8 {
        assert_eq!(context.prepare_frame().unwrap(), PresentStatus::Optimal);
        camera.write(0, &[frame; 64]).unwrap();
        context
            .begin_swapchain(&[ClearValue::color(0.1, 0.1, 0.1, 1.0)])
            .unwrap();
        let cmd = context.command_buffer().expect("frame is prepared");
        pipeline.bind(cmd);
        assert!(pipeline.bind_descriptors(cmd, identity).unwrap());
        cmd.draw(3, 1, 0, 0);
        context.end().unwrap();
        assert_eq!(context.swap_buffers().unwrap(), PresentStatus::Optimal);
    }

    assert_eq!(pipeline.cached_identities(), 1);
    let draws = dummy
        .executed_commands()
        .iter()
        .filter(|c| matches!(c, DummyCommand::Draw { vertex_count: 3, .. }))
        .count();
    assert_eq!(draws, 4);

    drop(pipeline);
    drop(context);
    device.wait_idle().unwrap();
}

/// A surface reported out of date is rebuilt by `update_surface`.
#[test]
fn test_frame_loop_recovers_from_out_of_date() {
    let ctx = TestContext::new(Backend::Dummy).expect("dummy backend is always available");
    let dummy = ctx.dummy.clone().expect("dummy context keeps its backend");

    let surface = ctx.fake_surface().expect("dummy backend creates surfaces");
    let mut context = RenderContext::new(
        &ctx.device,
        surface,
        SwapchainConfig::new().with_extent(800, 600),
    )
    .unwrap();
    assert_eq!(context.extent(), Extent2d::new(800, 600));

    dummy.set_out_of_date(true);
    assert!(context.prepare_frame().unwrap().needs_recreate());
    context.update_surface(Extent2d::new(1024, 768)).unwrap();

    assert_eq!(context.prepare_frame().unwrap(), PresentStatus::Optimal);
    context.swap_buffers().unwrap();
    assert_eq!(context.extent(), Extent2d::new(1024, 768));
}

/// Semaphore waits carry the stage they block.
#[test]
fn test_submission_builder() {
    let ctx = TestContext::new(Backend::Dummy).expect("dummy backend is always available");
    let acquire = ctx.device.request_semaphore().unwrap();
    let finished = ctx.device.request_semaphore().unwrap();

    let submission = Submission::new()
        .wait(acquire, PipelineStages::COLOR_ATTACHMENT_OUTPUT)
        .signal(finished);
    assert_eq!(submission.waits().len(), 1);
    assert_eq!(submission.waits()[0].stage, PipelineStages::COLOR_ATTACHMENT_OUTPUT);
    assert_eq!(submission.signals().len(), 1);
    assert!(!submission.has_timeline_values());
    assert!(submission.is_empty());
}
