//! WOFF 2.0 container: flag-byte table directory and one Brotli stream over
//! all table data.
//!
//! Encoding stores `glyf` and `loca` with the null transform, with the
//! transform-version bits saying so; this trades compression ratio for
//! framing simplicity. Decoding handles both the null transform and fully
//! transformed `glyf` / `loca` / `hmtx` tables, reconstructing the original
//! table bytes.

use std::io;

use super::{flavor_from_version, parse_sfnt_tables, RawTable, WOFF2_SIGNATURE};
use crate::{
    errors::SubsetError,
    font::{Cursor, TableTag},
    write::{padded_len, write_u16, write_u32, TableSet},
};

const HEADER_LEN: usize = 48;
/// Transform version 3 in the two high flag bits: no transform for
/// `glyf` / `loca`.
const NULL_TRANSFORM: u8 = 0b1100_0000;
const ARBITRARY_TAG: u8 = 63;

/// Known-tag table of the WOFF2 directory; a flag byte below 63 indexes
/// into this array.
const KNOWN_TAGS: [TableTag; 63] = [
    TableTag(*b"cmap"),
    TableTag(*b"head"),
    TableTag(*b"hhea"),
    TableTag(*b"hmtx"),
    TableTag(*b"maxp"),
    TableTag(*b"name"),
    TableTag(*b"OS/2"),
    TableTag(*b"post"),
    TableTag(*b"cvt "),
    TableTag(*b"fpgm"),
    TableTag(*b"glyf"),
    TableTag(*b"loca"),
    TableTag(*b"prep"),
    TableTag(*b"CFF "),
    TableTag(*b"VORG"),
    TableTag(*b"EBDT"),
    TableTag(*b"EBLC"),
    TableTag(*b"gasp"),
    TableTag(*b"hdmx"),
    TableTag(*b"kern"),
    TableTag(*b"LTSH"),
    TableTag(*b"PCLT"),
    TableTag(*b"VDMX"),
    TableTag(*b"vhea"),
    TableTag(*b"vmtx"),
    TableTag(*b"BASE"),
    TableTag(*b"GDEF"),
    TableTag(*b"GPOS"),
    TableTag(*b"GSUB"),
    TableTag(*b"EBSC"),
    TableTag(*b"JSTF"),
    TableTag(*b"MATH"),
    TableTag(*b"CBDT"),
    TableTag(*b"CBLC"),
    TableTag(*b"COLR"),
    TableTag(*b"CPAL"),
    TableTag(*b"SVG "),
    TableTag(*b"sbix"),
    TableTag(*b"acnt"),
    TableTag(*b"avar"),
    TableTag(*b"bdat"),
    TableTag(*b"bloc"),
    TableTag(*b"bsln"),
    TableTag(*b"cvar"),
    TableTag(*b"fdsc"),
    TableTag(*b"feat"),
    TableTag(*b"fmtx"),
    TableTag(*b"fvar"),
    TableTag(*b"gvar"),
    TableTag(*b"hsty"),
    TableTag(*b"just"),
    TableTag(*b"lcar"),
    TableTag(*b"mort"),
    TableTag(*b"morx"),
    TableTag(*b"opbd"),
    TableTag(*b"prop"),
    TableTag(*b"trak"),
    TableTag(*b"Zapf"),
    TableTag(*b"Silf"),
    TableTag(*b"Glat"),
    TableTag(*b"Gloc"),
    TableTag(*b"Feat"),
    TableTag(*b"Sill"),
];

fn known_tag_index(tag: TableTag) -> Option<u8> {
    KNOWN_TAGS
        .iter()
        .position(|&known| known == tag)
        .map(|idx| u8::try_from(idx).unwrap())
}

fn uint_base128_len(val: u32) -> usize {
    if val == 0 {
        1
    } else {
        val.ilog2() as usize / 7 + 1
    }
}

#[allow(clippy::cast_possible_truncation)] // intentional 7-bit chunking
fn write_uint_base128(buffer: &mut Vec<u8>, val: u32) {
    if val >= 1 << 28 {
        buffer.push(0x80 | (val >> 28) as u8);
    }
    if val >= 1 << 21 {
        buffer.push(0x80 | (val >> 21) as u8);
    }
    if val >= 1 << 14 {
        buffer.push(0x80 | (val >> 14) as u8);
    }
    if val >= 1 << 7 {
        buffer.push(0x80 | (val >> 7) as u8);
    }
    buffer.push((val & 127) as u8);
}

fn read_uint_base128(cursor: &mut Cursor<'_>) -> Result<u32, SubsetError> {
    let mut result = 0_u32;
    for idx in 0..5 {
        let byte = cursor.read_u8()?;
        if idx == 0 && byte == 0x80 {
            return Err(SubsetError::CorruptContainer {
                detail: "base-128 number with a leading zero byte",
            });
        }
        if result & 0xFE00_0000 != 0 {
            return Err(SubsetError::CorruptContainer {
                detail: "base-128 number exceeds 32 bits",
            });
        }
        result = result << 7 | u32::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            return Ok(result);
        }
    }
    Err(SubsetError::CorruptContainer {
        detail: "base-128 number longer than 5 bytes",
    })
}

fn read_255_u16(cursor: &mut Cursor<'_>) -> Result<u16, SubsetError> {
    let code = cursor.read_u8()?;
    Ok(match code {
        253 => cursor.read_u16()?,
        254 => u16::from(cursor.read_u8()?) + 253 * 2,
        255 => u16::from(cursor.read_u8()?) + 253,
        other => u16::from(other),
    })
}

/// Streams the unpadded data of the listed tables in order, avoiding one
/// whole-font copy ahead of compression.
struct TableDataStream<'a> {
    tables: &'a [RawTable<'a>],
    table_idx: usize,
    pos_in_table: usize,
}

impl<'a> TableDataStream<'a> {
    fn new(tables: &'a [RawTable<'a>]) -> Self {
        Self {
            tables,
            table_idx: 0,
            pos_in_table: 0,
        }
    }
}

impl io::Read for TableDataStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut total_read = 0;
        while total_read < buf.len() {
            let Some(table) = self.tables.get(self.table_idx) else {
                break; // nothing left to stream
            };
            let remaining = &table.data[self.pos_in_table..];
            if remaining.is_empty() {
                self.table_idx += 1;
                self.pos_in_table = 0;
                continue;
            }
            let to_copy = remaining.len().min(buf.len() - total_read);
            buf[total_read..total_read + to_copy].copy_from_slice(&remaining[..to_copy]);
            total_read += to_copy;
            self.pos_in_table += to_copy;
        }
        Ok(total_read)
    }
}

/// Wraps a serialized sfnt font into a WOFF2 container.
pub(crate) fn encode(sfnt: &[u8]) -> Result<Vec<u8>, SubsetError> {
    let (flavor, mut tables) = parse_sfnt_tables(sfnt)?;
    // The directory order must match the order of table data in the stream,
    // and `loca` must directly follow `glyf` regardless of physical layout.
    tables.sort_by_key(|table| table.offset);
    let glyf_pos = tables.iter().position(|table| table.tag == TableTag::GLYF);
    let loca_pos = tables.iter().position(|table| table.tag == TableTag::LOCA);
    if let (Some(glyf_pos), Some(loca_pos)) = (glyf_pos, loca_pos) {
        let loca = tables.remove(loca_pos);
        let glyf_pos = glyf_pos - usize::from(loca_pos < glyf_pos);
        tables.insert(glyf_pos + 1, loca);
    }

    let mut directory = Vec::new();
    for table in &tables {
        match known_tag_index(table.tag) {
            Some(idx) => {
                let transform = if table.tag == TableTag::GLYF || table.tag == TableTag::LOCA {
                    NULL_TRANSFORM
                } else {
                    0
                };
                directory.push(idx | transform);
            }
            None => {
                directory.push(ARBITRARY_TAG);
                directory.extend_from_slice(&table.tag.0);
            }
        }
        let orig_len = u32::try_from(table.data.len()).map_err(|_| SubsetError::Overflow)?;
        write_uint_base128(&mut directory, orig_len);
    }

    let mut compressed = Vec::new();
    let mut stream = TableDataStream::new(&tables);
    let params = brotli::enc::BrotliEncoderParams::default();
    brotli::BrotliCompress(&mut stream, &mut compressed, &params)
        .expect("compressing into a Vec never fails");

    let total_sfnt_size = 12
        + 16 * tables.len()
        + tables
            .iter()
            .map(|table| padded_len(table.data.len()))
            .sum::<usize>();
    let total_len = padded_len(HEADER_LEN + directory.len() + compressed.len());

    let mut buffer = Vec::with_capacity(total_len);
    write_u32(&mut buffer, WOFF2_SIGNATURE);
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
    write_u32(
        &mut buffer,
        u32::try_from(compressed.len()).map_err(|_| SubsetError::Overflow)?,
    );
    write_u32(&mut buffer, 0); // majorVersion, minorVersion
    write_u32(&mut buffer, 0); // metaOffset
    write_u32(&mut buffer, 0); // metaLength
    write_u32(&mut buffer, 0); // metaOrigLength
    write_u32(&mut buffer, 0); // privOffset
    write_u32(&mut buffer, 0); // privLength
    debug_assert_eq!(buffer.len(), HEADER_LEN);

    buffer.extend_from_slice(&directory);
    buffer.extend_from_slice(&compressed);
    buffer.resize(total_len, 0);
    Ok(buffer)
}

#[derive(Debug, Clone, Copy)]
struct DirectoryEntry {
    tag: TableTag,
    transformed: bool,
    orig_len: usize,
    /// Bytes this table occupies in the decompressed stream.
    stream_len: usize,
}

/// Unwraps a WOFF2 container back into a serialized sfnt font,
/// reconstructing transformed tables.
pub(crate) fn decode(input: &[u8]) -> Result<Vec<u8>, SubsetError> {
    let mut cursor = Cursor::new(input);
    let signature = cursor.read_u32()?;
    if signature != WOFF2_SIGNATURE {
        return Err(SubsetError::UnsupportedFormat {
            detail: "missing `wOF2` signature",
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
    let total_compressed = cursor.read_u32()? as usize;
    cursor.skip(4)?; // majorVersion, minorVersion
    cursor.skip(20)?; // metadata and private block ranges

    let mut entries = Vec::with_capacity(usize::from(num_tables));
    for _ in 0..num_tables {
        let flags = cursor.read_u8()?;
        let tag = if flags & 0x3F == ARBITRARY_TAG {
            TableTag(cursor.read_byte_array::<4>()?)
        } else {
            KNOWN_TAGS[usize::from(flags & 0x3F)]
        };
        let version = flags >> 6;
        let transformed = match tag {
            TableTag::GLYF | TableTag::LOCA => match version {
                0 => true,
                3 => false,
                _ => {
                    return Err(SubsetError::UnsupportedFormat {
                        detail: "reserved glyf/loca transform version",
                    });
                }
            },
            TableTag::HMTX => match version {
                0 => false,
                1 => true,
                _ => {
                    return Err(SubsetError::UnsupportedFormat {
                        detail: "reserved hmtx transform version",
                    });
                }
            },
            _ => {
                if version != 0 {
                    return Err(SubsetError::UnsupportedFormat {
                        detail: "reserved table transform version",
                    });
                }
                false
            }
        };
        let orig_len = read_uint_base128(&mut cursor)? as usize;
        let stream_len = if transformed {
            read_uint_base128(&mut cursor)? as usize
        } else {
            orig_len
        };
        entries.push(DirectoryEntry {
            tag,
            transformed,
            orig_len,
            stream_len,
        });
    }

    let data_start = cursor.position();
    let compressed = data_start
        .checked_add(total_compressed)
        .and_then(|end| input.get(data_start..end))
        .ok_or(SubsetError::CorruptContainer {
            detail: "compressed data range exceeds the buffer",
        })?;
    let mut stream = Vec::new();
    brotli::BrotliDecompress(&mut &compressed[..], &mut stream).map_err(|_| {
        SubsetError::CorruptContainer {
            detail: "Brotli stream fails to decompress",
        }
    })?;
    let expected_len: usize = entries.iter().map(|entry| entry.stream_len).sum();
    if stream.len() != expected_len {
        return Err(SubsetError::CorruptContainer {
            detail: "decompressed size disagrees with the table directory",
        });
    }

    let glyf_transformed = entries
        .iter()
        .any(|entry| entry.tag == TableTag::GLYF && entry.transformed);

    let mut table_set = TableSet::new(flavor);
    let mut reconstructed: Option<ReconstructedGlyf> = None;
    let mut transformed_hmtx: Option<&[u8]> = None;
    let mut stream_offset = 0;
    for entry in &entries {
        let data = &stream[stream_offset..stream_offset + entry.stream_len];
        stream_offset += entry.stream_len;
        match entry.tag {
            TableTag::GLYF if entry.transformed => {
                let glyf = reconstruct_glyf(data)?;
                table_set.tables.push((TableTag::GLYF, glyf.glyf.clone()));
                reconstructed = Some(glyf);
            }
            TableTag::LOCA if entry.transformed => {
                if entry.stream_len != 0 {
                    return Err(SubsetError::CorruptContainer {
                        detail: "transformed loca with non-empty stream data",
                    });
                }
                let Some(glyf) = &reconstructed else {
                    return Err(SubsetError::CorruptContainer {
                        detail: "transformed loca without a preceding transformed glyf",
                    });
                };
                if glyf.loca.len() != entry.orig_len {
                    return Err(SubsetError::CorruptContainer {
                        detail: "reconstructed loca length disagrees with origLength",
                    });
                }
                table_set.tables.push((TableTag::LOCA, glyf.loca.clone()));
            }
            TableTag::LOCA if glyf_transformed => {
                return Err(SubsetError::CorruptContainer {
                    detail: "transformed glyf with untransformed loca",
                });
            }
            TableTag::HMTX if entry.transformed => transformed_hmtx = Some(data),
            _ => table_set.tables.push((entry.tag, data.to_vec())),
        }
    }

    if let Some(data) = transformed_hmtx {
        let Some(glyf) = &reconstructed else {
            return Err(SubsetError::UnsupportedFormat {
                detail: "transformed hmtx without a transformed glyf",
            });
        };
        let num_h_metrics = table_set
            .get(TableTag::HHEA)
            .and_then(|hhea| hhea.get(34..36))
            .map(|bytes| u16::from_be_bytes([bytes[0], bytes[1]]))
            .ok_or(SubsetError::CorruptContainer {
                detail: "transformed hmtx without a usable hhea",
            })?;
        let hmtx = reconstruct_hmtx(data, glyf, num_h_metrics)?;
        table_set.tables.push((TableTag::HMTX, hmtx));
    }

    table_set.sort_for_layout();
    table_set.to_sfnt()
}

#[derive(Debug)]
struct ReconstructedGlyf {
    glyf: Vec<u8>,
    loca: Vec<u8>,
    x_mins: Vec<i16>,
}

#[derive(Debug, Clone, Copy)]
struct GlyfPoint {
    x: i32,
    y: i32,
    on_curve: bool,
}

// Composite component flags, as in the glyf table itself.
const ARG_1_AND_2_ARE_WORDS: u16 = 1 << 0;
const WE_HAVE_A_SCALE: u16 = 1 << 3;
const MORE_COMPONENTS: u16 = 1 << 5;
const WE_HAVE_AN_X_AND_Y_SCALE: u16 = 1 << 6;
const WE_HAVE_A_TWO_BY_TWO: u16 = 1 << 7;
const WE_HAVE_INSTRUCTIONS: u16 = 1 << 8;

// Simple glyph point flags.
const ON_CURVE: u8 = 0x01;
const X_SHORT: u8 = 0x02;
const Y_SHORT: u8 = 0x04;
const REPEAT: u8 = 0x08;
const X_SAME_OR_POSITIVE: u8 = 0x10;
const Y_SAME_OR_POSITIVE: u8 = 0x20;
const OVERLAP_SIMPLE: u8 = 0x40;

/// Presence of the overlap-simple bitmap after the seven substreams.
const OPTION_OVERLAP_SIMPLE_BITMAP: u16 = 1 << 0;

/// Rebuilds the original `glyf` and `loca` tables from the transformed
/// representation: per-glyph contour counts, point counts, flag and
/// coordinate-triplet streams, and an on-demand bounding-box stream.
fn reconstruct_glyf(data: &[u8]) -> Result<ReconstructedGlyf, SubsetError> {
    let mut cursor = Cursor::for_table(data, TableTag::GLYF, 0);
    cursor.skip(2)?; // reserved
    let option_flags = cursor.read_u16()?;
    let num_glyphs = cursor.read_u16()?;
    let index_format = cursor.read_u16()?;

    let n_contour_len = cursor.read_u32()? as usize;
    let n_points_len = cursor.read_u32()? as usize;
    let flag_len = cursor.read_u32()? as usize;
    let glyph_len = cursor.read_u32()? as usize;
    let composite_len = cursor.read_u32()? as usize;
    let bbox_len = cursor.read_u32()? as usize;
    let instruction_len = cursor.read_u32()? as usize;

    let mut n_contour_stream = cursor.split_at(n_contour_len)?;
    let mut n_points_stream = cursor.split_at(n_points_len)?;
    let mut flag_stream = cursor.split_at(flag_len)?;
    let mut glyph_stream = cursor.split_at(glyph_len)?;
    let mut composite_stream = cursor.split_at(composite_len)?;
    let mut bbox_stream = cursor.split_at(bbox_len)?;
    let mut instruction_stream = cursor.split_at(instruction_len)?;

    let bitmap_len = ((usize::from(num_glyphs) + 31) >> 5) << 2;
    let bbox_bitmap = bbox_stream.split_at(bitmap_len)?;
    let overlap_bitmap = if option_flags & OPTION_OVERLAP_SIMPLE_BITMAP != 0 {
        Some(cursor.split_at((usize::from(num_glyphs) + 7) / 8)?)
    } else {
        None
    };

    let mut glyf = Vec::new();
    let mut locations = Vec::with_capacity(usize::from(num_glyphs) + 1);
    locations.push(0_usize);
    let mut x_mins = Vec::with_capacity(usize::from(num_glyphs));

    for glyph_idx in 0..usize::from(num_glyphs) {
        let n_contours = n_contour_stream.read_i16()?;
        let has_bbox = bbox_bitmap.bytes[glyph_idx >> 3] & (0x80 >> (glyph_idx & 7)) != 0;

        if n_contours == 0 {
            if has_bbox {
                return Err(SubsetError::CorruptContainer {
                    detail: "explicit bounding box for an empty glyph",
                });
            }
            x_mins.push(0);
        } else if n_contours > 0 {
            // Simple glyph.
            let mut end_points = Vec::with_capacity(n_contours as usize);
            let mut total_points = 0_usize;
            for _ in 0..n_contours {
                let contour_points = usize::from(read_255_u16(&mut n_points_stream)?);
                total_points += contour_points;
                let end = total_points
                    .checked_sub(1)
                    .ok_or(SubsetError::CorruptContainer {
                        detail: "contour with zero points",
                    })?;
                end_points.push(u16::try_from(end).map_err(|_| {
                    SubsetError::CorruptContainer {
                        detail: "glyph exceeds 65535 points",
                    }
                })?);
            }

            let flags = flag_stream.split_at(total_points)?;
            let overlap = overlap_bitmap.as_ref().is_some_and(|bitmap| {
                bitmap.bytes[glyph_idx >> 3] & (0x80 >> (glyph_idx & 7)) != 0
            });
            let points = decode_triplets(flags.bytes, &mut glyph_stream)?;
            let instruction_count = usize::from(read_255_u16(&mut glyph_stream)?);
            let instructions = instruction_stream.split_at(instruction_count)?;

            let bbox = if has_bbox {
                bbox_stream.read_byte_array::<8>()?
            } else {
                compute_bbox(&points)?
            };
            x_mins.push(i16::from_be_bytes([bbox[0], bbox[1]]));

            glyf.extend_from_slice(&n_contours.to_be_bytes());
            glyf.extend_from_slice(&bbox);
            for end in &end_points {
                glyf.extend_from_slice(&end.to_be_bytes());
            }
            glyf.extend_from_slice(
                &u16::try_from(instruction_count)
                    .map_err(|_| SubsetError::CorruptContainer {
                        detail: "oversized instruction count",
                    })?
                    .to_be_bytes(),
            );
            glyf.extend_from_slice(instructions.bytes);
            encode_points(&points, overlap, &mut glyf);
        } else {
            // Composite glyph: its bounding box cannot be derived here.
            if !has_bbox {
                return Err(SubsetError::CorruptContainer {
                    detail: "composite glyph without an explicit bounding box",
                });
            }
            let bbox = bbox_stream.read_byte_array::<8>()?;
            x_mins.push(i16::from_be_bytes([bbox[0], bbox[1]]));
            let (components, have_instructions) = composite_span(&mut composite_stream)?;

            glyf.extend_from_slice(&n_contours.to_be_bytes());
            glyf.extend_from_slice(&bbox);
            glyf.extend_from_slice(components);
            if have_instructions {
                let instruction_count = usize::from(read_255_u16(&mut glyph_stream)?);
                let instructions = instruction_stream.split_at(instruction_count)?;
                glyf.extend_from_slice(
                    &u16::try_from(instruction_count)
                        .map_err(|_| SubsetError::CorruptContainer {
                            detail: "oversized instruction count",
                        })?
                        .to_be_bytes(),
                );
                glyf.extend_from_slice(instructions.bytes);
            }
        }

        // Short loca offsets are halved, so keep them even.
        if index_format == 0 && glyf.len() % 2 != 0 {
            glyf.push(0);
        }
        locations.push(glyf.len());
    }

    let mut loca = Vec::new();
    for &location in &locations {
        if index_format == 0 {
            let halved = location / 2;
            let halved = u16::try_from(halved).map_err(|_| SubsetError::CorruptContainer {
                detail: "short loca offset overflow",
            })?;
            loca.extend_from_slice(&halved.to_be_bytes());
        } else {
            let location = u32::try_from(location).map_err(|_| SubsetError::Overflow)?;
            loca.extend_from_slice(&location.to_be_bytes());
        }
    }

    Ok(ReconstructedGlyf { glyf, loca, x_mins })
}

fn with_sign(flag: u8, base: i32) -> i32 {
    if flag & 1 != 0 {
        base
    } else {
        -base
    }
}

/// Decodes the per-point coordinate triplets of one simple glyph, consuming
/// exactly the bytes the flags call for.
fn decode_triplets(
    flags: &[u8],
    glyph_stream: &mut Cursor<'_>,
) -> Result<Vec<GlyfPoint>, SubsetError> {
    let mut points = Vec::with_capacity(flags.len());
    let mut x = 0_i32;
    let mut y = 0_i32;
    for &raw_flag in flags {
        let on_curve = raw_flag >> 7 == 0;
        let flag = raw_flag & 0x7F;

        let (dx, dy) = if flag < 10 {
            let b0 = i32::from(glyph_stream.read_u8()?);
            (0, with_sign(flag, (i32::from(flag & 14) << 7) + b0))
        } else if flag < 20 {
            let b0 = i32::from(glyph_stream.read_u8()?);
            (
                with_sign(flag, ((i32::from(flag - 10) & 14) << 7) + b0),
                0,
            )
        } else if flag < 84 {
            let b0 = i32::from(flag - 20);
            let b1 = i32::from(glyph_stream.read_u8()?);
            (
                with_sign(flag, 1 + (b0 & 0x30) + (b1 >> 4)),
                with_sign(flag >> 1, 1 + ((b0 & 0x0c) << 2) + (b1 & 0x0f)),
            )
        } else if flag < 120 {
            let b0 = i32::from(flag - 84);
            let b1 = i32::from(glyph_stream.read_u8()?);
            let b2 = i32::from(glyph_stream.read_u8()?);
            (
                with_sign(flag, 1 + (b0 / 12 << 8) + b1),
                with_sign(flag >> 1, 1 + ((b0 % 12) >> 2 << 8) + b2),
            )
        } else if flag < 124 {
            let b1 = i32::from(glyph_stream.read_u8()?);
            let b2 = i32::from(glyph_stream.read_u8()?);
            let b3 = i32::from(glyph_stream.read_u8()?);
            (
                with_sign(flag, (b1 << 4) + (b2 >> 4)),
                with_sign(flag >> 1, ((b2 & 0x0f) << 8) + b3),
            )
        } else {
            let b1 = i32::from(glyph_stream.read_u8()?);
            let b2 = i32::from(glyph_stream.read_u8()?);
            let b3 = i32::from(glyph_stream.read_u8()?);
            let b4 = i32::from(glyph_stream.read_u8()?);
            (
                with_sign(flag, (b1 << 8) + b2),
                with_sign(flag >> 1, (b3 << 8) + b4),
            )
        };
        x = x.checked_add(dx).ok_or(SubsetError::CorruptContainer {
            detail: "coordinate overflow in triplet stream",
        })?;
        y = y.checked_add(dy).ok_or(SubsetError::CorruptContainer {
            detail: "coordinate overflow in triplet stream",
        })?;
        points.push(GlyfPoint { x, y, on_curve });
    }
    Ok(points)
}

fn compute_bbox(points: &[GlyfPoint]) -> Result<[u8; 8], SubsetError> {
    let (mut x_min, mut y_min, mut x_max, mut y_max) = (0, 0, 0, 0);
    if let Some(first) = points.first() {
        (x_min, y_min, x_max, y_max) = (first.x, first.y, first.x, first.y);
    }
    for point in points.iter().skip(1) {
        x_min = x_min.min(point.x);
        y_min = y_min.min(point.y);
        x_max = x_max.max(point.x);
        y_max = y_max.max(point.y);
    }
    let mut bbox = [0_u8; 8];
    for (slot, value) in [x_min, y_min, x_max, y_max].into_iter().enumerate() {
        let value = i16::try_from(value).map_err(|_| SubsetError::CorruptContainer {
            detail: "glyph coordinate outside the 16-bit range",
        })?;
        bbox[slot * 2..slot * 2 + 2].copy_from_slice(&value.to_be_bytes());
    }
    Ok(bbox)
}

/// Re-encodes decoded points as standard glyf flag and coordinate arrays,
/// with flag run-length compression.
fn encode_points(points: &[GlyfPoint], overlap: bool, out: &mut Vec<u8>) {
    let mut flags = Vec::with_capacity(points.len());
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    let (mut last_x, mut last_y) = (0_i32, 0_i32);

    for (idx, point) in points.iter().enumerate() {
        let mut flag = if point.on_curve { ON_CURVE } else { 0 };
        if overlap && idx == 0 {
            flag |= OVERLAP_SIMPLE;
        }

        let dx = point.x - last_x;
        if dx == 0 {
            flag |= X_SAME_OR_POSITIVE;
        } else if (-255..=255).contains(&dx) {
            flag |= X_SHORT;
            if dx > 0 {
                flag |= X_SAME_OR_POSITIVE;
            }
            xs.push(dx.unsigned_abs() as u8);
        } else {
            #[allow(clippy::cast_possible_truncation)] // bbox computation bounds coordinates
            xs.extend_from_slice(&(dx as i16).to_be_bytes());
        }

        let dy = point.y - last_y;
        if dy == 0 {
            flag |= Y_SAME_OR_POSITIVE;
        } else if (-255..=255).contains(&dy) {
            flag |= Y_SHORT;
            if dy > 0 {
                flag |= Y_SAME_OR_POSITIVE;
            }
            ys.push(dy.unsigned_abs() as u8);
        } else {
            #[allow(clippy::cast_possible_truncation)] // bbox computation bounds coordinates
            ys.extend_from_slice(&(dy as i16).to_be_bytes());
        }

        flags.push(flag);
        last_x = point.x;
        last_y = point.y;
    }

    let mut idx = 0;
    while idx < flags.len() {
        let flag = flags[idx];
        let mut run = 1;
        while idx + run < flags.len() && flags[idx + run] == flag && run < 256 {
            run += 1;
        }
        if run == 1 {
            out.push(flag);
        } else {
            out.push(flag | REPEAT);
            #[allow(clippy::cast_possible_truncation)] // run is capped at 256
            out.push((run - 1) as u8);
        }
        idx += run;
    }
    out.extend_from_slice(&xs);
    out.extend_from_slice(&ys);
}

/// Walks the component records of one composite glyph and returns the bytes
/// they occupy, plus whether an instruction block follows.
fn composite_span<'a>(
    composite_stream: &mut Cursor<'a>,
) -> Result<(&'a [u8], bool), SubsetError> {
    let start = composite_stream.bytes;
    let mut have_instructions = false;
    loop {
        let flags = composite_stream.read_u16()?;
        if flags & WE_HAVE_INSTRUCTIONS != 0 {
            have_instructions = true;
        }
        let mut arg_size = 2; // glyph index
        arg_size += if flags & ARG_1_AND_2_ARE_WORDS != 0 { 4 } else { 2 };
        if flags & WE_HAVE_A_SCALE != 0 {
            arg_size += 2;
        } else if flags & WE_HAVE_AN_X_AND_Y_SCALE != 0 {
            arg_size += 4;
        } else if flags & WE_HAVE_A_TWO_BY_TWO != 0 {
            arg_size += 8;
        }
        composite_stream.skip(arg_size)?;
        if flags & MORE_COMPONENTS == 0 {
            break;
        }
    }
    let consumed = start.len() - composite_stream.len();
    Ok((&start[..consumed], have_instructions))
}

/// Rebuilds the original `hmtx` table; omitted side bearings are recovered
/// from the reconstructed glyph bounding boxes.
fn reconstruct_hmtx(
    data: &[u8],
    glyf: &ReconstructedGlyf,
    num_h_metrics: u16,
) -> Result<Vec<u8>, SubsetError> {
    const PROPORTIONAL_LSBS_OMITTED: u8 = 0x01;
    const MONOSPACE_LSBS_OMITTED: u8 = 0x02;

    let num_glyphs = glyf.x_mins.len();
    let num_h_metrics = usize::from(num_h_metrics);
    if num_h_metrics > num_glyphs || num_h_metrics == 0 {
        return Err(SubsetError::CorruptContainer {
            detail: "hhea metric count disagrees with the glyph count",
        });
    }

    let mut cursor = Cursor::for_table(data, TableTag::HMTX, 0);
    let flags = cursor.read_u8()?;
    if flags & !(PROPORTIONAL_LSBS_OMITTED | MONOSPACE_LSBS_OMITTED) != 0 {
        return Err(SubsetError::CorruptContainer {
            detail: "reserved bits set in the hmtx transform flags",
        });
    }

    let mut advances = Vec::with_capacity(num_h_metrics);
    for _ in 0..num_h_metrics {
        advances.push(cursor.read_u16()?);
    }
    let mut proportional_lsbs = Vec::with_capacity(num_h_metrics);
    if flags & PROPORTIONAL_LSBS_OMITTED == 0 {
        for _ in 0..num_h_metrics {
            proportional_lsbs.push(cursor.read_i16()?);
        }
    } else {
        proportional_lsbs.extend_from_slice(&glyf.x_mins[..num_h_metrics]);
    }
    let mut monospace_lsbs = Vec::with_capacity(num_glyphs - num_h_metrics);
    if flags & MONOSPACE_LSBS_OMITTED == 0 {
        for _ in num_h_metrics..num_glyphs {
            monospace_lsbs.push(cursor.read_i16()?);
        }
    } else {
        monospace_lsbs.extend_from_slice(&glyf.x_mins[num_h_metrics..]);
    }

    let mut hmtx = Vec::with_capacity(num_glyphs * 4);
    for (advance, lsb) in advances.iter().zip(&proportional_lsbs) {
        hmtx.extend_from_slice(&advance.to_be_bytes());
        hmtx.extend_from_slice(&lsb.to_be_bytes());
    }
    for lsb in &monospace_lsbs {
        hmtx.extend_from_slice(&lsb.to_be_bytes());
    }
    Ok(hmtx)
}
