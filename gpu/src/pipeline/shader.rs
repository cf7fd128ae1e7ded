//! Shader programs and their reflected interface.
//!
//! Compilation and reflection happen outside this crate; a [`Shader`] simply
//! carries SPIR-V per stage together with the binding and push-constant
//! metadata a reflection tool reported for it.

use crate::descriptor::DescriptorBinding;
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::ShaderStages;

/// Largest push-constant block every implementation must support, in bytes.
pub const PUSH_CONSTANT_MAX_SIZE: u32 = 128;

/// A push-constant byte range visible to some stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PushConstantRange {
    /// Stages that read the range.
    pub stages: ShaderStages,
    /// Byte offset.
    pub offset: u32,
    /// Byte size.
    pub size: u32,
}

impl PushConstantRange {
    /// Create a range.
    pub fn new(stages: ShaderStages, offset: u32, size: u32) -> Self {
        Self {
            stages,
            offset,
            size,
        }
    }

    /// One past the last byte.
    pub fn end(&self) -> u32 {
        self.offset + self.size
    }

    /// Whether `[offset, offset + len)` lies inside the range.
    pub fn contains(&self, offset: u32, len: u32) -> bool {
        offset >= self.offset && offset + len <= self.end()
    }
}

/// SPIR-V for one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderStageSource {
    /// The single stage this code runs in.
    pub stage: ShaderStages,
    /// SPIR-V words.
    pub spirv: Vec<u32>,
    /// Entry point name.
    pub entry_point: String,
}

/// A complete shader program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Shader {
    /// Debug label.
    pub label: Option<String>,
    /// Code per stage.
    pub stages: Vec<ShaderStageSource>,
    /// Bindings of descriptor set 0.
    pub bindings: Vec<DescriptorBinding>,
    /// Push-constant ranges as reflected, possibly several per stage.
    pub push_constants: Vec<PushConstantRange>,
}

impl Shader {
    /// Create an empty program.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Add the code of one stage with a `main` entry point.
    pub fn with_stage(mut self, stage: ShaderStages, spirv: Vec<u32>) -> Self {
        self.stages.push(ShaderStageSource {
            stage,
            spirv,
            entry_point: "main".to_string(),
        });
        self
    }

    /// Add a reflected binding.
    pub fn with_binding(mut self, binding: DescriptorBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Add a reflected push-constant range.
    pub fn with_push_constant(mut self, range: PushConstantRange) -> Self {
        self.push_constants.push(range);
        self
    }

    /// Code of `stage`, if present.
    pub fn stage(&self, stage: ShaderStages) -> Option<&ShaderStageSource> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Whether the program is a compute program.
    pub fn is_compute(&self) -> bool {
        self.stage(ShaderStages::COMPUTE).is_some()
    }

    /// Check the program is a complete graphics or compute program with a
    /// consistent interface.
    pub fn validate(&self) -> GraphicsResult<()> {
        let has_vertex = self.stage(ShaderStages::VERTEX).is_some();
        if !has_vertex && !self.is_compute() {
            return Err(GraphicsError::InvalidParameter(
                "shader has neither a vertex nor a compute stage".to_string(),
            ));
        }
        if has_vertex && self.is_compute() {
            return Err(GraphicsError::InvalidParameter(
                "shader mixes graphics and compute stages".to_string(),
            ));
        }
        for (i, binding) in self.bindings.iter().enumerate() {
            if self.bindings[..i].iter().any(|b| b.binding == binding.binding) {
                return Err(GraphicsError::InvalidParameter(format!(
                    "duplicate descriptor binding {}",
                    binding.binding
                )));
            }
        }
        Ok(())
    }

    /// Push-constant ranges merged per stage set.
    ///
    /// Ranges with identical stage flags are widened to cover each other.
    /// Fails if any merged range ends beyond [`PUSH_CONSTANT_MAX_SIZE`].
    pub fn merged_push_constants(&self) -> GraphicsResult<Vec<PushConstantRange>> {
        let mut merged: Vec<PushConstantRange> = Vec::new();
        for range in &self.push_constants {
            match merged.iter_mut().find(|m| m.stages == range.stages) {
                Some(existing) => {
                    let end = existing.end().max(range.end());
                    existing.offset = existing.offset.min(range.offset);
                    existing.size = end - existing.offset;
                }
                None => merged.push(*range),
            }
        }
        if let Some(range) = merged.iter().find(|r| r.end() > PUSH_CONSTANT_MAX_SIZE) {
            return Err(GraphicsError::InvalidParameter(format!(
                "push constants for {:?} end at byte {}, limit is {}",
                range.stages,
                range.end(),
                PUSH_CONSTANT_MAX_SIZE
            )));
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorType;

    #[test]
    fn test_merge_same_stage() {
        let shader = Shader::new()
            .with_stage(ShaderStages::VERTEX, vec![0x0723_0203])
            .with_push_constant(PushConstantRange::new(ShaderStages::VERTEX, 0, 16))
            .with_push_constant(PushConstantRange::new(ShaderStages::VERTEX, 32, 16))
            .with_push_constant(PushConstantRange::new(ShaderStages::FRAGMENT, 64, 8));
        let merged = shader.merged_push_constants().unwrap();
        assert_eq!(
            merged,
            vec![
                PushConstantRange::new(ShaderStages::VERTEX, 0, 48),
                PushConstantRange::new(ShaderStages::FRAGMENT, 64, 8),
            ]
        );
    }

    #[test]
    fn test_push_constant_limit() {
        let shader = Shader::new()
            .with_stage(ShaderStages::COMPUTE, vec![0x0723_0203])
            .with_push_constant(PushConstantRange::new(ShaderStages::COMPUTE, 120, 16));
        assert!(shader.merged_push_constants().is_err());
    }

    #[test]
    fn test_validate() {
        assert!(Shader::new().validate().is_err());
        let duplicate = Shader::new()
            .with_stage(ShaderStages::VERTEX, vec![0x0723_0203])
            .with_binding(DescriptorBinding::new(0, "a", DescriptorType::UniformBuffer, ShaderStages::VERTEX))
            .with_binding(DescriptorBinding::new(0, "b", DescriptorType::UniformBuffer, ShaderStages::VERTEX));
        assert!(duplicate.validate().is_err());
        let compute = Shader::new().with_stage(ShaderStages::COMPUTE, vec![0x0723_0203]);
        assert!(compute.validate().is_ok());
        assert!(compute.is_compute());
    }
}
