//! Growable command pool.

use std::sync::Arc;

use crate::backend::{CommandBufferHandle, CommandPoolHandle, RenderBackend};
use crate::error::{GraphicsError, GraphicsResult};

use super::{CommandBuffer, CommandBufferLevel, ResetMode};

/// Per-level storage of a pool.
#[derive(Debug, Default)]
struct LevelStorage {
    /// Every slot ever allocated; the index is the buffer's identity.
    buffers: Vec<CommandBufferHandle>,
    /// Slots ready for the next request.
    free: Vec<usize>,
    /// Slots discarded under `ResetPool`, waiting for the pool reset.
    pending_reset: Vec<usize>,
    /// Slots currently leased out.
    active: usize,
}

/// A command pool bound to one queue family.
///
/// Buffers are leased with [`request`](Self::request) and returned with
/// [`discard`](Self::discard). Slots are reused by index, so steady-state
/// frames allocate nothing.
pub struct CommandPool {
    backend: Arc<dyn RenderBackend>,
    handle: CommandPoolHandle,
    queue_family: u32,
    reset_mode: ResetMode,
    levels: [LevelStorage; 2],
}

impl CommandPool {
    /// Create a pool for `queue_family` with a fixed reset mode.
    pub fn new(
        backend: Arc<dyn RenderBackend>,
        queue_family: u32,
        reset_mode: ResetMode,
    ) -> GraphicsResult<Self> {
        let handle = backend.create_command_pool(queue_family, reset_mode)?;
        log::debug!(
            "Created command pool for queue family {} ({:?})",
            queue_family,
            reset_mode
        );
        Ok(Self {
            backend,
            handle,
            queue_family,
            reset_mode,
            levels: Default::default(),
        })
    }

    /// Native handle.
    pub fn handle(&self) -> CommandPoolHandle {
        self.handle
    }

    /// Queue family the pool allocates for.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Reset mode fixed at creation.
    pub fn reset_mode(&self) -> ResetMode {
        self.reset_mode
    }

    /// Buffers of `level` currently leased out.
    pub fn active_count(&self, level: CommandBufferLevel) -> usize {
        self.levels[level.index()].active
    }

    /// Slots of `level` ever allocated.
    pub fn allocated_count(&self, level: CommandBufferLevel) -> usize {
        self.levels[level.index()].buffers.len()
    }

    /// Lease a buffer, reusing a free slot when one exists.
    pub fn request(&mut self, level: CommandBufferLevel) -> GraphicsResult<CommandBuffer> {
        let storage = &mut self.levels[level.index()];
        let (index, handle) = match storage.free.pop() {
            Some(index) if self.reset_mode == ResetMode::AlwaysAllocated => {
                let handle = self.backend.allocate_command_buffer(self.handle, level)?;
                storage.buffers[index] = handle;
                (index, handle)
            }
            Some(index) => (index, storage.buffers[index]),
            None => {
                let handle = self.backend.allocate_command_buffer(self.handle, level)?;
                storage.buffers.push(handle);
                log::debug!(
                    "Command pool {:?}: grew {:?} buffers to {}",
                    self.handle,
                    level,
                    storage.buffers.len()
                );
                (storage.buffers.len() - 1, handle)
            }
        };
        storage.active += 1;
        Ok(CommandBuffer::new(
            self.backend.clone(),
            self.handle,
            handle,
            level,
            index,
        ))
    }

    /// Take back a leased buffer.
    ///
    /// The buffer must not be pending on the GPU. Depending on the reset mode
    /// it is reset now, parked until [`reset`](Self::reset), or freed.
    pub fn discard(&mut self, mut buffer: CommandBuffer) -> GraphicsResult<()> {
        let storage = &mut self.levels[buffer.level().index()];
        let index = buffer.index();
        if buffer.pool() != self.handle
            || storage.buffers.get(index) != Some(&buffer.handle())
        {
            return Err(GraphicsError::InvalidParameter(format!(
                "command buffer {:?} does not belong to pool {:?}",
                buffer.handle(),
                self.handle
            )));
        }

        match self.reset_mode {
            ResetMode::ResetIndividually => {
                self.backend.reset_command_buffer(buffer.handle())?;
                buffer.mark_initial();
                storage.free.push(index);
            }
            ResetMode::ResetPool => storage.pending_reset.push(index),
            ResetMode::AlwaysAllocated => {
                self.backend
                    .free_command_buffers(self.handle, &[buffer.handle()]);
                storage.free.push(index);
            }
        }
        storage.active -= 1;
        Ok(())
    }

    /// Reset the whole native pool, making parked buffers reusable.
    ///
    /// Fails with [`GraphicsError::NotReady`] while buffers are still leased.
    pub fn reset(&mut self) -> GraphicsResult<()> {
        let active: usize = self.levels.iter().map(|l| l.active).sum();
        if active > 0 {
            return Err(GraphicsError::NotReady(format!(
                "command pool {:?} has {} buffers in use",
                self.handle, active
            )));
        }
        self.backend.reset_command_pool(self.handle)?;
        for storage in &mut self.levels {
            let parked = std::mem::take(&mut storage.pending_reset);
            storage.free.extend(parked);
        }
        Ok(())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        let leased: usize = self.levels.iter().map(|l| l.active).sum();
        if leased > 0 {
            log::warn!(
                "Command pool {:?} dropped with {} buffers still leased",
                self.handle,
                leased
            );
        }
        // Destroying the pool frees every buffer allocated from it.
        self.backend.destroy_command_pool(self.handle);
    }
}

impl std::fmt::Debug for CommandPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandPool")
            .field("handle", &self.handle)
            .field("queue_family", &self.queue_family)
            .field("reset_mode", &self.reset_mode)
            .field("levels", &self.levels)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::backend::DummyBackend;
    use crate::command::CommandBufferUsage;

    fn pool(mode: ResetMode) -> CommandPool {
        let backend: Arc<dyn RenderBackend> = Arc::new(DummyBackend::new());
        CommandPool::new(backend, 0, mode).unwrap()
    }

    #[test]
    fn test_reuse_by_index() {
        let mut pool = pool(ResetMode::ResetIndividually);
        let a = pool.request(CommandBufferLevel::Primary).unwrap();
        let (index, handle) = (a.index(), a.handle());
        pool.discard(a).unwrap();
        let b = pool.request(CommandBufferLevel::Primary).unwrap();
        assert_eq!(b.index(), index);
        assert_eq!(b.handle(), handle);
        assert_eq!(pool.allocated_count(CommandBufferLevel::Primary), 1);
        pool.discard(b).unwrap();
    }

    #[test]
    fn test_levels_are_independent() {
        let mut pool = pool(ResetMode::ResetIndividually);
        let primary = pool.request(CommandBufferLevel::Primary).unwrap();
        let secondary = pool.request(CommandBufferLevel::Secondary).unwrap();
        assert_eq!(primary.index(), 0);
        assert_eq!(secondary.index(), 0);
        assert_eq!(pool.active_count(CommandBufferLevel::Primary), 1);
        assert_eq!(pool.active_count(CommandBufferLevel::Secondary), 1);
        pool.discard(primary).unwrap();
        pool.discard(secondary).unwrap();
    }

    #[test]
    fn test_reset_pool_parks_until_reset() {
        let mut pool = pool(ResetMode::ResetPool);
        let a = pool.request(CommandBufferLevel::Primary).unwrap();
        pool.discard(a).unwrap();
        // Parked, so a second request grows the pool.
        let b = pool.request(CommandBufferLevel::Primary).unwrap();
        assert_eq!(b.index(), 1);
        assert!(pool.reset().is_err());
        pool.discard(b).unwrap();
        pool.reset().unwrap();
        let c = pool.request(CommandBufferLevel::Primary).unwrap();
        assert!(c.index() < 2);
        assert_eq!(pool.allocated_count(CommandBufferLevel::Primary), 2);
        pool.discard(c).unwrap();
    }

    #[test]
    fn test_always_allocated_gets_fresh_handles() {
        let mut pool = pool(ResetMode::AlwaysAllocated);
        let a = pool.request(CommandBufferLevel::Primary).unwrap();
        let first = a.handle();
        pool.discard(a).unwrap();
        let b = pool.request(CommandBufferLevel::Primary).unwrap();
        assert_eq!(b.index(), 0);
        assert_ne!(b.handle(), first);
        pool.discard(b).unwrap();
    }

    #[test]
    fn test_discard_resets_state() {
        let mut pool = pool(ResetMode::ResetIndividually);
        let mut a = pool.request(CommandBufferLevel::Primary).unwrap();
        a.begin(CommandBufferUsage::OneTimeSubmit).unwrap();
        a.end().unwrap();
        pool.discard(a).unwrap();
        let mut b = pool.request(CommandBufferLevel::Primary).unwrap();
        b.begin(CommandBufferUsage::OneTimeSubmit).unwrap();
        pool.discard(b).unwrap();
    }

    #[test]
    fn test_foreign_buffer_rejected() {
        let mut first = pool(ResetMode::ResetIndividually);
        let mut second = pool(ResetMode::ResetIndividually);
        let a = first.request(CommandBufferLevel::Primary).unwrap();
        assert!(second.discard(a).is_err());
    }

    #[test]
    fn test_active_never_exceeds_allocated() {
        let mut pool = pool(ResetMode::ResetIndividually);
        let mut leased: Vec<CommandBuffer> = Vec::new();
        // Deterministic interleaving of requests and discards.
        let pattern = [1, 1, 1, 0, 1, 0, 0, 1, 1, 1, 0, 1, 0, 0, 0, 1];
        for (step, op) in pattern.iter().enumerate() {
            if *op == 1 || leased.is_empty() {
                leased.push(pool.request(CommandBufferLevel::Primary).unwrap());
            } else {
                let victim = leased.remove(step % leased.len());
                pool.discard(victim).unwrap();
            }
            let active = pool.active_count(CommandBufferLevel::Primary);
            assert_eq!(active, leased.len());
            assert!(active <= pool.allocated_count(CommandBufferLevel::Primary));
            let indices: HashSet<usize> = leased.iter().map(|b| b.index()).collect();
            assert_eq!(indices.len(), leased.len());
        }
        for buffer in leased {
            pool.discard(buffer).unwrap();
        }
    }
}
