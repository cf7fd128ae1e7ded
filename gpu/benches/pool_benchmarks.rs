use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use redlilium_gpu::descriptor::{DescriptorBinding, DescriptorPoolSize, object_identity};
use redlilium_gpu::types::ShaderStages;
use redlilium_gpu::{
    BufferDescriptor, BufferUsage, CheckPolicy, CommandBufferLevel, DescriptorPool,
    DescriptorSetCache, DescriptorType, DeviceParameters, DummyBackend, GraphicsDevice,
    QueueRole, RenderBackend, ResetMode,
};

fn dummy_device() -> Arc<GraphicsDevice> {
    GraphicsDevice::new(
        Arc::new(DummyBackend::new()),
        DeviceParameters::new().with_check_policy(CheckPolicy::Propagate),
    )
    .unwrap()
}

// ---------------------------------------------------------------------------
// Command and sync pools
// ---------------------------------------------------------------------------

fn bench_command_pool_recycle(c: &mut Criterion) {
    let device = dummy_device();
    let mut pool = device
        .create_command_pool(QueueRole::Graphics, ResetMode::ResetIndividually)
        .unwrap();
    c.bench_function("command_pool_request_discard_8", |b| {
        b.iter(|| {
            let buffers: Vec<_> = (0..8)
                .map(|_| pool.request(CommandBufferLevel::Primary).unwrap())
                .collect();
            for buffer in buffers {
                pool.discard(black_box(buffer)).unwrap();
            }
        });
    });
}

fn bench_fence_recycle(c: &mut Criterion) {
    let device = dummy_device();
    c.bench_function("fence_request_discard", |b| {
        b.iter(|| {
            let fence = device.request_fence().unwrap();
            device.discard_fence(black_box(fence)).unwrap();
        });
    });
}

fn bench_submit_once(c: &mut Criterion) {
    let device = dummy_device();
    c.bench_function("submit_once_empty", |b| {
        b.iter(|| {
            device
                .submit_once(QueueRole::Graphics, |_| Ok(()))
                .unwrap();
        });
    });
}

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

fn bench_descriptor_pool_chain(c: &mut Criterion) {
    let backend: Arc<dyn RenderBackend> = Arc::new(DummyBackend::new());
    let layout = backend
        .create_descriptor_set_layout(&[DescriptorBinding::new(
            0,
            "camera",
            DescriptorType::UniformBuffer,
            ShaderStages::VERTEX,
        )])
        .unwrap();
    c.bench_function("descriptor_pool_allocate_256_sets", |b| {
        b.iter_with_setup(
            || DescriptorPool::new(backend.clone(), 64, DescriptorPoolSize::default_sizes()).unwrap(),
            |mut pool| {
                black_box(pool.allocate(&[layout; 256]).unwrap());
                pool
            },
        );
    });
}

fn bench_descriptor_cache_rotation(c: &mut Criterion) {
    let device = dummy_device();
    let layout = device
        .backend()
        .create_descriptor_set_layout(&[DescriptorBinding::new(
            0,
            "object",
            DescriptorType::UniformBuffer,
            ShaderStages::VERTEX,
        )])
        .unwrap();
    let mut pool = device.new_descriptor_pool().unwrap();
    let mut cache = DescriptorSetCache::new(layout);
    c.bench_function("descriptor_cache_rotate_1000_objects", |b| {
        b.iter(|| {
            for object in 0..1000 {
                black_box(cache.allocate(object_identity(object, 0), &mut pool).unwrap());
            }
        });
    });
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

fn bench_deferred_buffer_churn(c: &mut Criterion) {
    let device = dummy_device();
    c.bench_function("buffer_create_drop_advance", |b| {
        b.iter(|| {
            let buffer = device
                .create_buffer(
                    &BufferDescriptor::new(1024, BufferUsage::UNIFORM | BufferUsage::MAP_WRITE),
                    None,
                )
                .unwrap();
            drop(black_box(buffer));
            device.advance_frame();
        });
    });
}

criterion_group!(
    benches,
    bench_command_pool_recycle,
    bench_fence_recycle,
    bench_submit_once,
    bench_descriptor_pool_chain,
    bench_descriptor_cache_rotation,
    bench_deferred_buffer_churn,
);
criterion_main!(benches);
