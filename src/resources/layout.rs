//! Vertex input layout

use crate::backend::VertexFormat;
use crate::error::{ModelError, ModelResult};
use crate::format::Attribute;

/// One vertex input element: which attribute, how it is encoded, and which
/// vertex buffer slot it is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputElement {
    pub semantic: Attribute,
    pub format: VertexFormat,
    pub slot: u32,
}

/// Ordered input layout of a mesh, in attribute taxonomy order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VertexLayout {
    elements: Vec<InputElement>,
}

impl VertexLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_element(mut self, semantic: Attribute, format: VertexFormat, slot: u32) -> Self {
        self.push(semantic, format, slot);
        self
    }

    pub fn push(&mut self, semantic: Attribute, format: VertexFormat, slot: u32) {
        self.elements.push(InputElement {
            semantic,
            format,
            slot,
        });
    }

    pub fn elements(&self) -> &[InputElement] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn element(&self, semantic: Attribute) -> Option<&InputElement> {
        self.elements.iter().find(|e| e.semantic == semantic)
    }

    /// Number of distinct vertex buffer slots referenced.
    pub fn slot_count(&self) -> usize {
        self.elements
            .iter()
            .map(|e| e.slot as usize + 1)
            .max()
            .unwrap_or(0)
    }

    /// Vertex buffer slot holding positions.
    ///
    /// The scan starts at the second element; when nothing matches there,
    /// slot 0 is assumed.
    pub fn position_slot(&self) -> u32 {
        self.elements
            .iter()
            .skip(1)
            .find(|e| e.semantic == Attribute::Position)
            .map(|e| e.slot)
            .unwrap_or(0)
    }

    /// Byte offset of the position within an interleaved vertex of `slot`.
    ///
    /// Sums the sizes of the elements before the position element that share
    /// `slot`; elements in other slots do not contribute.
    pub fn position_offset(&self, slot: u32) -> ModelResult<u32> {
        let mut offset = 0;
        for element in &self.elements {
            if element.semantic == Attribute::Position {
                break;
            }
            if element.slot == slot {
                offset += element.format.float_size().ok_or_else(|| {
                    ModelError::UnsupportedFormat(format!(
                        "{:?} for {}",
                        element.format,
                        element.semantic.semantic_name()
                    ))
                })?;
            }
        }
        Ok(offset)
    }
}
