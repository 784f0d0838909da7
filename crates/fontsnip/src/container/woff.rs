//! WOFF 1.0 container: per-table zlib compression around sfnt data.

use miniz_oxide::{deflate, inflate};

use super::{flavor_from_version, parse_sfnt_tables, WOFF_SIGNATURE};
use crate::{
    errors::SubsetError,
    font::{Cursor, TableTag},
    write::{padded_len, write_u16, write_u32, TableSet},
};

const HEADER_LEN: usize = 44;
const DIRECTORY_ENTRY_LEN: usize = 20;

/// Wraps a serialized sfnt font into a WOFF 1.0 container.
///
/// Each table is deflate-compressed independently; a table is stored
/// uncompressed when compression would not shrink it.
pub(crate) fn encode(sfnt: &[u8]) -> Result<Vec<u8>, SubsetError> {
    let (flavor, mut tables) = parse_sfnt_tables(sfnt)?;
    // Directory entries must be ordered by tag.
    tables.sort_by_key(|table| table.tag);

    let compressed: Vec<Vec<u8>> = tables
        .iter()
        .map(|table| deflate::compress_to_vec_zlib(table.data, 9))
        .collect();

    let total_sfnt_size = 12
        + 16 * tables.len()
        + tables
            .iter()
            .map(|table| padded_len(table.data.len()))
            .sum::<usize>();

    let mut total_len = HEADER_LEN + DIRECTORY_ENTRY_LEN * tables.len();
    let mut offsets = Vec::with_capacity(tables.len());
    for (table, compressed) in tables.iter().zip(&compressed) {
        offsets.push(total_len);
        let stored_len = compressed.len().min(table.data.len());
        total_len += padded_len(stored_len);
    }

    let mut buffer = Vec::with_capacity(total_len);
    write_u32(&mut buffer, WOFF_SIGNATURE);
    write_u32(&mut buffer, flavor);
    write_u32(
        &mut buffer,
        u32::try_from(total_len).map_err(|_| SubsetError::Overflow)?,
    );
    write_u16(
        &mut buffer,
        u16::try_from(tables.len()).map_err(|_| SubsetError::Overflow)?,
    );
    write_u16(&mut buffer, 0); // reserved
    write_u32(
        &mut buffer,
        u32::try_from(total_sfnt_size).map_err(|_| SubsetError::Overflow)?,
    );
    write_u16(&mut buffer, 0); // majorVersion
    write_u16(&mut buffer, 0); // minorVersion
    write_u32(&mut buffer, 0); // metaOffset
    write_u32(&mut buffer, 0); // metaLength
    write_u32(&mut buffer, 0); // metaOrigLength
    write_u32(&mut buffer, 0); // privOffset
    write_u32(&mut buffer, 0); // privLength
    debug_assert_eq!(buffer.len(), HEADER_LEN);

    for ((table, compressed), &offset) in tables.iter().zip(&compressed).zip(&offsets) {
        let stored_len = compressed.len().min(table.data.len());
        buffer.extend_from_slice(&table.tag.0);
        write_u32(&mut buffer, u32::try_from(offset).map_err(|_| SubsetError::Overflow)?);
        write_u32(
            &mut buffer,
            u32::try_from(stored_len).map_err(|_| SubsetError::Overflow)?,
        );
        write_u32(
            &mut buffer,
            u32::try_from(table.data.len()).map_err(|_| SubsetError::Overflow)?,
        );
        write_u32(&mut buffer, table.checksum);
    }

    for (table, compressed) in tables.iter().zip(&compressed) {
        if compressed.len() < table.data.len() {
            buffer.extend_from_slice(compressed);
        } else {
            buffer.extend_from_slice(table.data);
        }
        buffer.resize(padded_len(buffer.len()), 0);
    }
    debug_assert_eq!(buffer.len(), total_len);
    Ok(buffer)
}

/// Unwraps a WOFF 1.0 container back into a serialized sfnt font.
pub(crate) fn decode(input: &[u8]) -> Result<Vec<u8>, SubsetError> {
    let mut cursor = Cursor::new(input);
    let signature = cursor.read_u32()?;
    if signature != WOFF_SIGNATURE {
        return Err(SubsetError::UnsupportedFormat {
            detail: "missing `wOFF` signature",
        });
    }
    let flavor = flavor_from_version(cursor.read_u32()?)?;
    let declared_len = cursor.read_u32()? as usize;
    if declared_len != input.len() {
        return Err(SubsetError::CorruptContainer {
            detail: "declared length disagrees with the buffer length",
        });
    }
    let num_tables = cursor.read_u16()?;
    cursor.skip(2)?; // reserved
    cursor.skip(4)?; // totalSfntSize: advisory, recomputed on reassembly
    cursor.skip(4)?; // majorVersion, minorVersion
    cursor.skip(20)?; // metadata and private block ranges

    let mut table_set = TableSet::new(flavor);
    for _ in 0..num_tables {
        let tag = TableTag(cursor.read_byte_array::<4>()?);
        let offset = cursor.read_u32()? as usize;
        let comp_length = cursor.read_u32()? as usize;
        let orig_length = cursor.read_u32()? as usize;
        cursor.skip(4)?; // origChecksum: recomputed on reassembly

        let compressed = offset
            .checked_add(comp_length)
            .and_then(|end| input.get(offset..end))
            .ok_or(SubsetError::CorruptContainer {
                detail: "table data range exceeds the buffer",
            })?;
        let data = if comp_length == orig_length {
            compressed.to_vec()
        } else if comp_length < orig_length {
            let data = inflate::decompress_to_vec_zlib_with_limit(compressed, orig_length)
                .map_err(|_| SubsetError::CorruptContainer {
                    detail: "zlib-compressed table fails to decompress",
                })?;
            if data.len() != orig_length {
                return Err(SubsetError::CorruptContainer {
                    detail: "decompressed table length disagrees with origLength",
                });
            }
            data
        } else {
            return Err(SubsetError::CorruptContainer {
                detail: "compressed table longer than its original",
            });
        };
        table_set.tables.push((tag, data));
    }

    table_set.sort_for_layout();
    table_set.to_sfnt()
}
