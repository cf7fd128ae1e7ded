//! Vertex input layout derived from element descriptions.

/// Meaning of a vertex element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexSemantic {
    /// Object-space position.
    Position,
    /// Surface normal.
    Normal,
    /// Surface tangent.
    Tangent,
    /// Vertex color.
    Color,
    /// First texture coordinate set.
    TexCoord0,
    /// Second texture coordinate set.
    TexCoord1,
    /// Skinning joint indices.
    Joints,
    /// Skinning weights.
    Weights,
}

/// Data format of a vertex element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    /// One 32-bit float.
    Float32,
    /// Two 32-bit floats.
    Float32x2,
    /// Three 32-bit floats.
    Float32x3,
    /// Four 32-bit floats.
    Float32x4,
    /// Four normalized bytes.
    Unorm8x4,
    /// Four unsigned bytes.
    Uint8x4,
    /// Four unsigned 16-bit integers.
    Uint16x4,
    /// One unsigned 32-bit integer.
    Uint32,
}

impl VertexFormat {
    /// Size in bytes.
    pub fn size(self) -> u32 {
        match self {
            Self::Float32 | Self::Unorm8x4 | Self::Uint8x4 | Self::Uint32 => 4,
            Self::Float32x2 | Self::Uint16x4 => 8,
            Self::Float32x3 => 12,
            Self::Float32x4 => 16,
        }
    }
}

/// One user-supplied element: what it is and how it is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexElement {
    /// Meaning.
    pub semantic: VertexSemantic,
    /// Storage format.
    pub format: VertexFormat,
}

impl VertexElement {
    /// Create an element.
    pub fn new(semantic: VertexSemantic, format: VertexFormat) -> Self {
        Self { semantic, format }
    }
}

/// A derived attribute: where the shader reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    /// Shader input location.
    pub location: u32,
    /// Vertex buffer binding.
    pub binding: u32,
    /// Storage format.
    pub format: VertexFormat,
    /// Byte offset inside one vertex.
    pub offset: u32,
}

/// How often the vertex buffer advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VertexStepMode {
    /// Once per vertex.
    #[default]
    Vertex,
    /// Once per instance.
    Instance,
}

/// A single interleaved vertex buffer layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    /// Bytes between consecutive vertices.
    pub stride: u32,
    /// Attributes in location order.
    pub attributes: Vec<VertexAttribute>,
    /// Step rate of binding 0.
    pub step_mode: VertexStepMode,
}

impl VertexLayout {
    /// Interleave `elements` into binding 0, one location per element in
    /// order, stepping per vertex.
    pub fn from_elements(elements: &[VertexElement]) -> Self {
        let mut offset = 0;
        let attributes = elements
            .iter()
            .enumerate()
            .map(|(location, element)| {
                let attribute = VertexAttribute {
                    location: location as u32,
                    binding: 0,
                    format: element.format,
                    offset,
                };
                offset += element.format.size();
                attribute
            })
            .collect();
        Self {
            stride: offset,
            attributes,
            step_mode: VertexStepMode::Vertex,
        }
    }

    /// Whether there are no attributes.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interleaved_offsets() {
        let layout = VertexLayout::from_elements(&[
            VertexElement::new(VertexSemantic::Position, VertexFormat::Float32x3),
            VertexElement::new(VertexSemantic::Normal, VertexFormat::Float32x3),
            VertexElement::new(VertexSemantic::TexCoord0, VertexFormat::Float32x2),
            VertexElement::new(VertexSemantic::Color, VertexFormat::Unorm8x4),
        ]);
        assert_eq!(layout.stride, 36);
        let offsets: Vec<u32> = layout.attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24, 32]);
        let locations: Vec<u32> = layout.attributes.iter().map(|a| a.location).collect();
        assert_eq!(locations, vec![0, 1, 2, 3]);
        assert!(layout.attributes.iter().all(|a| a.binding == 0));
        assert_eq!(layout.step_mode, VertexStepMode::Vertex);
    }

    #[test]
    fn test_empty_layout() {
        let layout = VertexLayout::from_elements(&[]);
        assert!(layout.is_empty());
        assert_eq!(layout.stride, 0);
    }
}
