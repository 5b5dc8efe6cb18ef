//! Container deserialization

use super::{Accessor, BufferView, FileHeader, MeshHeader, MeshHeaderRecord, CURRENT_VERSION, PROLOG};
use crate::config::ModelConfig;
use crate::error::{ModelError, ModelResult};
use crate::resources::RawBuffer;
use bytemuck::{Pod, Zeroable};
use std::io::{ErrorKind, Read};

/// Parsed container tables and the raw buffer they index into.
#[derive(Debug)]
pub struct Container {
    pub header: FileHeader,
    pub meshes: Vec<MeshHeader>,
    pub accessors: Vec<Accessor>,
    pub buffer_views: Vec<BufferView>,
    pub buffer: RawBuffer,
}

/// Read a complete container from `reader`.
///
/// Sections are read in order (header, mesh table, accessor table,
/// buffer-view table, raw buffer) and the input must end exactly after the
/// raw buffer.
pub fn read_container<R: Read>(reader: &mut R, config: &ModelConfig) -> ModelResult<Container> {
    let mut header = FileHeader::zeroed();
    read_section(reader, bytemuck::bytes_of_mut(&mut header), "file header")?;

    if header.prolog != PROLOG {
        return Err(ModelError::Format {
            found: header.prolog,
        });
    }
    if header.version != CURRENT_VERSION {
        return Err(ModelError::Version {
            found: header.version,
            expected: CURRENT_VERSION,
        });
    }

    log::debug!(
        "Container: {} meshes, {} accessors, {} buffer views, {} byte buffer",
        header.mesh_count,
        header.accessor_count,
        header.buffer_view_count,
        header.buffer_size
    );

    let records: Vec<MeshHeaderRecord> =
        read_table(reader, header.mesh_count, "mesh table", config)?;
    let accessors: Vec<Accessor> =
        read_table(reader, header.accessor_count, "accessor table", config)?;
    let buffer_views: Vec<BufferView> =
        read_table(reader, header.buffer_view_count, "buffer view table", config)?;

    if u64::from(header.buffer_size) > config.max_buffer_size {
        return Err(ModelError::corrupt(format!(
            "raw buffer size {} exceeds limit {}",
            header.buffer_size, config.max_buffer_size
        )));
    }
    let mut buffer = RawBuffer::zeroed(header.buffer_size as usize);
    read_section(reader, buffer.as_bytes_mut(), "raw buffer")?;

    expect_end_of_input(reader)?;

    let meshes = records
        .iter()
        .map(|record| MeshHeader::from_record(record, header.accessor_count))
        .collect::<ModelResult<Vec<_>>>()?;

    Ok(Container {
        header,
        meshes,
        accessors,
        buffer_views,
        buffer,
    })
}

fn read_table<T: Pod, R: Read>(
    reader: &mut R,
    count: u32,
    section: &'static str,
    config: &ModelConfig,
) -> ModelResult<Vec<T>> {
    let bytes = u64::from(count) * std::mem::size_of::<T>() as u64;
    if bytes > config.max_buffer_size {
        return Err(ModelError::corrupt(format!(
            "{section} of {count} entries exceeds limit {}",
            config.max_buffer_size
        )));
    }

    let mut records = vec![T::zeroed(); count as usize];
    read_section(reader, bytemuck::cast_slice_mut(&mut records), section)?;
    Ok(records)
}

fn read_section<R: Read>(reader: &mut R, dst: &mut [u8], section: &'static str) -> ModelResult<()> {
    reader.read_exact(dst).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => ModelError::Truncated { section },
        _ => ModelError::Io(e),
    })
}

fn expect_end_of_input<R: Read>(reader: &mut R) -> ModelResult<()> {
    let mut trailing = [0u8; 1];
    loop {
        match reader.read(&mut trailing) {
            Ok(0) => return Ok(()),
            Ok(_) => return Err(ModelError::corrupt("trailing data after raw buffer")),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(ModelError::Io(e)),
        }
    }
}
