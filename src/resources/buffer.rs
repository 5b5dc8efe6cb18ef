//! Owned byte arena and validated views into it

use std::borrow::Cow;

use crate::error::{ModelError, ModelResult};
use bytemuck::Pod;

/// The single contiguous byte buffer every mesh stream points into.
///
/// Storage is word-aligned so that typed streams at 4-byte aligned offsets
/// can be reinterpreted in place. Streams at other offsets are copied out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawBuffer {
    words: Vec<u32>,
    len: usize,
}

impl RawBuffer {
    pub fn zeroed(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(4)],
            len,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buffer = Self::zeroed(bytes.len());
        buffer.as_bytes_mut().copy_from_slice(bytes);
        buffer
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u32, u8>(&self.words)[..self.len]
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<u32, u8>(&mut self.words)[..self.len]
    }

    /// Bytes covered by `view`. Views are validated against this buffer when resolved.
    pub fn slice(&self, view: &StreamView) -> &[u8] {
        &self.as_bytes()[view.range()]
    }

    /// Elements covered by a view resolved with [`StreamView::typed`].
    ///
    /// Borrowed when the view's offset suits `T`'s alignment, copied otherwise.
    pub fn typed<T: Pod>(&self, view: &StreamView) -> Cow<'_, [T]> {
        let bytes = self.slice(view);
        match bytemuck::try_cast_slice(bytes) {
            Ok(elements) => Cow::Borrowed(elements),
            Err(_) => Cow::Owned(
                bytes
                    .chunks_exact(std::mem::size_of::<T>())
                    .map(bytemuck::pod_read_unaligned)
                    .collect(),
            ),
        }
    }
}

/// A byte range of a [`RawBuffer`] with its element layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamView {
    pub offset: usize,
    pub len: usize,
    pub stride: u32,
    pub count: u32,
}

impl StreamView {
    /// The empty view used for absent streams.
    pub const EMPTY: StreamView = StreamView {
        offset: 0,
        len: 0,
        stride: 0,
        count: 0,
    };

    /// A raw byte range, checked against `buffer_len`.
    pub fn bytes(
        offset: usize,
        len: usize,
        stride: u32,
        count: u32,
        buffer_len: usize,
        what: &str,
    ) -> ModelResult<Self> {
        match offset.checked_add(len) {
            Some(end) if end <= buffer_len => Ok(Self {
                offset,
                len,
                stride,
                count,
            }),
            _ => Err(ModelError::corrupt(format!(
                "{what} range {offset}+{len} exceeds buffer of {buffer_len} bytes"
            ))),
        }
    }

    /// `count` elements of `T` starting at `offset`, checked for bounds.
    ///
    /// The offset need not be aligned for `T`.
    pub fn typed<T: Pod>(offset: usize, count: u32, buffer_len: usize, what: &str) -> ModelResult<Self> {
        let size = std::mem::size_of::<T>();
        let len = size
            .checked_mul(count as usize)
            .ok_or_else(|| ModelError::corrupt(format!("{what} element count {count} overflows")))?;
        Self::bytes(offset, len, size as u32, count, buffer_len, what)
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
