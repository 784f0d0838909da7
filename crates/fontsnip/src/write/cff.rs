//! Rewriting the `CFF ` table for a glyph subset.

use crate::{
    errors::{ParseErrorKind, SubsetError},
    font::{
        cff::{
            CffTable, Dict, DictValue, Index, SubrScan, OP_CHARSET, OP_CHARSTRINGS, OP_ENCODING,
            OP_PRIVATE, OP_SUBRS,
        },
        TableTag,
    },
    ParseError,
};

/// A bare `return`, left in place of a pruned subroutine so that the
/// numbering (and therefore the bias and operand bytes of surviving
/// charstrings) stays valid.
const PRUNED_SUBR: &[u8] = &[0x0b];

/// Builds the subset `CFF ` table: retained charstrings re-indexed in new
/// glyph order, a rewritten charset, re-serialized DICTs and pruned
/// subroutine indices.
pub(crate) fn build(cff: &CffTable<'_>, kept: &[u16]) -> Result<Vec<u8>, SubsetError> {
    let charstrings = kept
        .iter()
        .map(|&old_idx| {
            cff.charstrings.get(usize::from(old_idx)).ok_or_else(|| ParseError {
                kind: ParseErrorKind::OffsetOutOfBounds(usize::from(old_idx)),
                offset: 0,
                table: Some(TableTag::CFF),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let empty_subrs = Index::default();
    let local_subrs = cff
        .private
        .as_ref()
        .map_or(&empty_subrs, |private| &private.local_subrs);
    let mut scan = SubrScan::new(&cff.global_subrs, local_subrs);
    for charstring in &charstrings {
        scan.scan(charstring)?;
    }

    let global_subrs = prune_subrs(&cff.global_subrs, &scan.global_used);
    let local_subrs = prune_subrs(local_subrs, &scan.local_used);

    let charset = build_charset(cff, kept)?;
    let charstrings_index = serialize_index(&charstrings);
    let global_index = serialize_index(&global_subrs);

    let private = cff.private.as_ref().map(|private| {
        let has_subrs = !local_subrs.is_empty();
        let dict = serialize_private_dict(&private.dict, has_subrs);
        let subrs = if has_subrs {
            serialize_index(&local_subrs)
        } else {
            Vec::new()
        };
        (dict, subrs)
    });

    // Offset-bearing Top DICT operands use a fixed-width encoding, so the
    // DICT length is identical across both serialization passes.
    let measure = TopDictOffsets {
        charset: 0,
        charstrings: 0,
        private: private.as_ref().map(|(dict, _)| (dict.len(), 0)),
    };
    let top_dict_len = serialize_top_dict(&cff.top_dict, &measure).len();
    let top_index_overhead = index_overhead(1, top_dict_len);

    let mut offset = cff.header.len()
        + cff.name_index.raw.len()
        + top_index_overhead
        + top_dict_len
        + cff.string_index.raw.len()
        + global_index.len();
    let mut offsets = TopDictOffsets::default();
    offsets.charset = offset;
    offset += charset.len();
    offsets.charstrings = offset;
    offset += charstrings_index.len();
    if let Some((dict, _)) = &private {
        offsets.private = Some((dict.len(), offset));
    }

    let top_dict = serialize_top_dict(&cff.top_dict, &offsets);
    debug_assert_eq!(top_dict.len(), top_dict_len);

    let mut buffer = Vec::new();
    buffer.extend_from_slice(cff.header);
    buffer.extend_from_slice(cff.name_index.raw);
    write_index_of_one(&top_dict, &mut buffer);
    buffer.extend_from_slice(cff.string_index.raw);
    buffer.extend_from_slice(&global_index);
    buffer.extend_from_slice(&charset);
    buffer.extend_from_slice(&charstrings_index);
    if let Some((dict, subrs)) = private {
        buffer.extend_from_slice(&dict);
        buffer.extend_from_slice(&subrs);
    }
    Ok(buffer)
}

/// Replaces unreachable subroutine bodies with a bare `return`. When nothing
/// is reachable, the whole index collapses to an empty one.
fn prune_subrs<'a>(
    subrs: &Index<'a>,
    used: &std::collections::BTreeSet<usize>,
) -> Vec<&'a [u8]> {
    if used.is_empty() {
        return Vec::new();
    }
    subrs
        .iter()
        .enumerate()
        .map(|(idx, body)| if used.contains(&idx) { body } else { PRUNED_SUBR })
        .collect()
}

/// Format 0 charset: one SID per retained glyph after `.notdef`, in new
/// glyph order.
fn build_charset(cff: &CffTable<'_>, kept: &[u16]) -> Result<Vec<u8>, SubsetError> {
    let mut buffer = Vec::with_capacity(1 + 2 * kept.len());
    buffer.push(0); // format
    for &old_idx in &kept[1..] {
        let sid = cff
            .charset
            .get(usize::from(old_idx))
            .copied()
            .ok_or_else(|| ParseError {
                kind: ParseErrorKind::OffsetOutOfBounds(usize::from(old_idx)),
                offset: 0,
                table: Some(TableTag::CFF),
            })?;
        buffer.extend_from_slice(&sid.to_be_bytes());
    }
    Ok(buffer)
}

#[derive(Debug, Default)]
struct TopDictOffsets {
    charset: usize,
    charstrings: usize,
    /// (size, offset) of the Private DICT.
    private: Option<(usize, usize)>,
}

fn serialize_top_dict(dict: &Dict, offsets: &TopDictOffsets) -> Vec<u8> {
    let mut buffer = Vec::new();
    for entry in &dict.entries {
        match entry.op {
            // The default (standard) encoding applies; `cmap` does the
            // character mapping in an sfnt-wrapped CFF anyway.
            OP_ENCODING => continue,
            OP_CHARSET => {
                encode_offset(&mut buffer, offsets.charset);
            }
            OP_CHARSTRINGS => {
                encode_offset(&mut buffer, offsets.charstrings);
            }
            OP_PRIVATE => {
                let Some((size, offset)) = offsets.private else {
                    continue;
                };
                encode_offset(&mut buffer, size);
                encode_offset(&mut buffer, offset);
            }
            _ => {
                for value in &entry.values {
                    encode_value(&mut buffer, value);
                }
            }
        }
        encode_op(&mut buffer, entry.op);
    }
    buffer
}

/// Re-serializes the Private DICT; the local subroutine index, when kept, is
/// placed immediately after the DICT, so the `Subrs` operand equals the DICT
/// length.
fn serialize_private_dict(dict: &Dict, has_subrs: bool) -> Vec<u8> {
    let mut len = 0;
    for pass in 0..2 {
        let mut buffer = Vec::new();
        for entry in &dict.entries {
            match entry.op {
                OP_SUBRS => {
                    if !has_subrs {
                        continue;
                    }
                    encode_offset(&mut buffer, len);
                }
                _ => {
                    for value in &entry.values {
                        encode_value(&mut buffer, value);
                    }
                }
            }
            encode_op(&mut buffer, entry.op);
        }
        if pass == 1 {
            return buffer;
        }
        len = buffer.len();
    }
    unreachable!("two-pass serialization always returns on the second pass");
}

fn encode_value(buffer: &mut Vec<u8>, value: &DictValue) {
    match value {
        DictValue::Int(val) => encode_int(buffer, *val),
        DictValue::Real(nibbles) => {
            buffer.push(30);
            buffer.extend_from_slice(nibbles);
        }
    }
}

fn encode_op(buffer: &mut Vec<u8>, op: u16) {
    if op >= 0x0c00 {
        buffer.push(12);
        #[allow(clippy::cast_possible_truncation)] // low byte by construction
        buffer.push((op & 0xff) as u8);
    } else {
        #[allow(clippy::cast_possible_truncation)] // single-byte operator range
        buffer.push(op as u8);
    }
}

/// Canonical (shortest) DICT integer encoding.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // masked byte extraction
fn encode_int(buffer: &mut Vec<u8>, val: i32) {
    if (-107..=107).contains(&val) {
        buffer.push((val + 139) as u8);
    } else if (108..=1131).contains(&val) {
        let val = val - 108;
        buffer.push((val >> 8) as u8 + 247);
        buffer.push((val & 0xff) as u8);
    } else if (-1131..=-108).contains(&val) {
        let val = -val - 108;
        buffer.push((val >> 8) as u8 + 251);
        buffer.push((val & 0xff) as u8);
    } else if let Ok(val) = i16::try_from(val) {
        buffer.push(28);
        buffer.extend_from_slice(&val.to_be_bytes());
    } else {
        buffer.push(29);
        buffer.extend_from_slice(&val.to_be_bytes());
    }
}

/// Fixed-width (5-byte) integer encoding, used for every operand whose value
/// is an offset resolved during layout.
fn encode_offset(buffer: &mut Vec<u8>, val: usize) {
    buffer.push(29);
    let val = u32::try_from(val).expect("CFF offset overflow");
    #[allow(clippy::cast_possible_wrap)] // raw byte reinterpretation
    buffer.extend_from_slice(&(val as i32).to_be_bytes());
}

const fn offset_size(max_offset: usize) -> u8 {
    if max_offset < 0x100 {
        1
    } else if max_offset < 0x1_0000 {
        2
    } else if max_offset < 0x100_0000 {
        3
    } else {
        4
    }
}

/// Byte length of an INDEX minus its object data.
fn index_overhead(count: usize, data_len: usize) -> usize {
    if count == 0 {
        return 2;
    }
    let off_size = usize::from(offset_size(data_len + 1));
    2 + 1 + (count + 1) * off_size
}

fn serialize_index(objects: &[&[u8]]) -> Vec<u8> {
    let mut buffer = Vec::new();
    write_index(objects, &mut buffer);
    buffer
}

fn write_index_of_one(object: &[u8], buffer: &mut Vec<u8>) {
    write_index(&[object], buffer);
}

fn write_index(objects: &[&[u8]], buffer: &mut Vec<u8>) {
    let count = u16::try_from(objects.len()).expect("INDEX count overflow");
    buffer.extend_from_slice(&count.to_be_bytes());
    if count == 0 {
        return;
    }

    let data_len: usize = objects.iter().map(|object| object.len()).sum();
    let off_size = offset_size(data_len + 1);
    buffer.push(off_size);

    let mut offset = 1_usize;
    let mut write_offset = |buffer: &mut Vec<u8>, offset: usize| {
        let bytes = offset.to_be_bytes();
        buffer.extend_from_slice(&bytes[bytes.len() - usize::from(off_size)..]);
    };
    write_offset(buffer, offset);
    for object in objects {
        offset += object.len();
        write_offset(buffer, offset);
    }
    for object in objects {
        buffer.extend_from_slice(object);
    }
}
