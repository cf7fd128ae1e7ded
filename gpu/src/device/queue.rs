//! Queue families, queue roles and family selection.

use bitflags::bitflags;

use crate::backend::QueueHandle;

bitflags! {
    /// Capabilities advertised by a queue family.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct QueueFlags: u32 {
        const GRAPHICS = 1 << 0;
        const COMPUTE = 1 << 1;
        const TRANSFER = 1 << 2;
    }
}

/// One queue family as reported by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    /// Family index.
    pub index: u32,
    /// Advertised capabilities.
    pub flags: QueueFlags,
    /// Number of queues in the family.
    pub count: u32,
}

impl QueueFamilyInfo {
    /// Create a family description.
    pub fn new(index: u32, flags: QueueFlags, count: u32) -> Self {
        Self {
            index,
            flags,
            count,
        }
    }
}

/// What a queue is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueRole {
    /// Rendering and presentation.
    Graphics,
    /// Asynchronous compute.
    Compute,
    /// Uploads and copies.
    Transfer,
}

impl QueueRole {
    /// All roles, in the order the device stores them.
    pub const ALL: [QueueRole; 3] = [Self::Graphics, Self::Compute, Self::Transfer];

    /// Capability a family must expose to serve this role.
    pub fn required_flags(self) -> QueueFlags {
        match self {
            Self::Graphics => QueueFlags::GRAPHICS,
            Self::Compute => QueueFlags::COMPUTE,
            Self::Transfer => QueueFlags::TRANSFER,
        }
    }

    /// Index into per-role arrays.
    pub fn index(self) -> usize {
        match self {
            Self::Graphics => 0,
            Self::Compute => 1,
            Self::Transfer => 2,
        }
    }
}

/// A queue assigned to a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueInfo {
    /// Family the queue belongs to.
    pub family: u32,
    /// Native queue.
    pub handle: QueueHandle,
}

/// Pick the family that exposes `required` with the fewest extra capabilities.
///
/// A compute-only family is preferred over a graphics+compute one when only
/// compute is requested, so work can overlap across queues. Ties go to the
/// lowest family index.
pub fn select_queue_family(families: &[QueueFamilyInfo], required: QueueFlags) -> Option<u32> {
    families
        .iter()
        .filter(|family| family.count > 0 && family.flags.contains(required))
        .min_by_key(|family| ((family.flags - required).bits().count_ones(), family.index))
        .map(|family| family.index)
}

/// Family index for each role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    /// Graphics family.
    pub graphics: u32,
    /// Compute family.
    pub compute: u32,
    /// Transfer family.
    pub transfer: u32,
}

impl QueueFamilies {
    /// Resolve a family for every role.
    ///
    /// Graphics is mandatory. Compute and transfer fall back to the graphics
    /// family with a warning when no family advertises them.
    pub fn resolve(families: &[QueueFamilyInfo]) -> Option<Self> {
        let graphics = select_queue_family(families, QueueFlags::GRAPHICS)?;
        let resolve_role = |role: QueueRole| {
            select_queue_family(families, role.required_flags()).unwrap_or_else(|| {
                log::warn!(
                    "No queue family found for {:?}, falling back to graphics family {}",
                    role,
                    graphics
                );
                graphics
            })
        };
        let compute = resolve_role(QueueRole::Compute);
        let transfer = resolve_role(QueueRole::Transfer);
        Some(Self {
            graphics,
            compute,
            transfer,
        })
    }

    /// Family serving `role`.
    pub fn family(&self, role: QueueRole) -> u32 {
        match role {
            QueueRole::Graphics => self.graphics,
            QueueRole::Compute => self.compute,
            QueueRole::Transfer => self.transfer,
        }
    }

    /// Distinct family indices, in role order.
    pub fn unique(&self) -> Vec<u32> {
        let mut unique = Vec::with_capacity(3);
        for family in [self.graphics, self.compute, self.transfer] {
            if !unique.contains(&family) {
                unique.push(family);
            }
        }
        unique
    }
}
