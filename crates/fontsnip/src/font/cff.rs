//! `CFF ` table processing: header, INDEX structures, DICTs, charset and
//! charstrings, plus Type 2 subroutine-reference scanning.

use std::collections::BTreeSet;

use super::{Cursor, TableTag};
use crate::{
    errors::{ParseError, ParseErrorKind},
};

pub(crate) const OP_CHARSET: u16 = 15;
pub(crate) const OP_ENCODING: u16 = 16;
pub(crate) const OP_CHARSTRINGS: u16 = 17;
pub(crate) const OP_PRIVATE: u16 = 18;
pub(crate) const OP_SUBRS: u16 = 19;
pub(crate) const OP_ROS: u16 = 0x0c1e;

/// CFF INDEX: a counted sequence of variable-length byte objects.
#[derive(Debug, Default)]
pub(crate) struct Index<'a> {
    pub(crate) raw: &'a [u8],
    objects: Vec<&'a [u8]>,
}

impl<'a> Index<'a> {
    /// Parses an INDEX, advancing `cursor` past it.
    pub(crate) fn parse(cursor: &mut Cursor<'a>) -> Result<Self, ParseError> {
        let start = *cursor;
        let count = usize::from(cursor.read_u16()?);
        if count == 0 {
            return Ok(Self {
                raw: &start.bytes[..2],
                objects: Vec::new(),
            });
        }
        let off_size = cursor.read_u8()?;
        if !(1..=4).contains(&off_size) {
            return Err(cursor.err(ParseErrorKind::UnexpectedTableFormat(off_size.into())));
        }

        let mut offsets = Vec::with_capacity(count + 1);
        for _ in 0..=count {
            let mut offset = 0_usize;
            for _ in 0..off_size {
                offset = offset << 8 | usize::from(cursor.read_u8()?);
            }
            // Offsets are 1-based relative to the byte preceding the data.
            let offset = offset
                .checked_sub(1)
                .ok_or_else(|| cursor.err(ParseErrorKind::OffsetOutOfBounds(0)))?;
            if offsets.last().is_some_and(|&prev| offset < prev) {
                return Err(cursor.err(ParseErrorKind::OffsetOutOfBounds(offset)));
            }
            offsets.push(offset);
        }

        let data_len = *offsets.last().unwrap();
        let data = cursor.split_at(data_len)?;
        let objects = offsets
            .windows(2)
            .map(|pair| &data.bytes[pair[0]..pair[1]])
            .collect();
        let total_len = start.len() - cursor.len();
        Ok(Self {
            raw: &start.bytes[..total_len],
            objects,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.objects.len()
    }

    pub(crate) fn get(&self, idx: usize) -> Option<&'a [u8]> {
        self.objects.get(idx).copied()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &'a [u8]> + '_ {
        self.objects.iter().copied()
    }
}

/// A single operand of a DICT entry.
#[derive(Debug, Clone)]
pub(crate) enum DictValue {
    Int(i32),
    /// Raw nibble bytes of a real number (without the leading `0x1e`).
    Real(Vec<u8>),
}

#[derive(Debug, Clone)]
pub(crate) struct DictEntry {
    pub(crate) op: u16,
    pub(crate) values: Vec<DictValue>,
}

/// Parsed CFF DICT: ordered operator entries with their operands.
#[derive(Debug, Clone, Default)]
pub(crate) struct Dict {
    pub(crate) entries: Vec<DictEntry>,
}

impl Dict {
    pub(crate) fn parse(mut cursor: Cursor<'_>) -> Result<Self, ParseError> {
        let mut entries = Vec::new();
        let mut values = Vec::new();
        while cursor.len() > 0 {
            let b0 = cursor.read_u8()?;
            match b0 {
                0..=21 => {
                    let op = if b0 == 12 {
                        0x0c00 | u16::from(cursor.read_u8()?)
                    } else {
                        u16::from(b0)
                    };
                    entries.push(DictEntry {
                        op,
                        values: core::mem::take(&mut values),
                    });
                }
                28 => {
                    let val = i16::from_be_bytes(cursor.read_byte_array::<2>()?);
                    values.push(DictValue::Int(val.into()));
                }
                29 => {
                    let val = i32::from_be_bytes(cursor.read_byte_array::<4>()?);
                    values.push(DictValue::Int(val));
                }
                30 => {
                    let mut nibbles = Vec::new();
                    loop {
                        let byte = cursor.read_u8()?;
                        nibbles.push(byte);
                        if byte >> 4 == 0xf || byte & 0xf == 0xf {
                            break;
                        }
                    }
                    values.push(DictValue::Real(nibbles));
                }
                32..=246 => values.push(DictValue::Int(i32::from(b0) - 139)),
                247..=250 => {
                    let b1 = cursor.read_u8()?;
                    values.push(DictValue::Int(
                        (i32::from(b0) - 247) * 256 + i32::from(b1) + 108,
                    ));
                }
                251..=254 => {
                    let b1 = cursor.read_u8()?;
                    values.push(DictValue::Int(
                        -(i32::from(b0) - 251) * 256 - i32::from(b1) - 108,
                    ));
                }
                other => {
                    return Err(cursor.err(ParseErrorKind::UnexpectedTableFormat(other.into())));
                }
            }
        }
        Ok(Self { entries })
    }

    pub(crate) fn get(&self, op: u16) -> Option<&[DictValue]> {
        self.entries
            .iter()
            .find(|entry| entry.op == op)
            .map(|entry| entry.values.as_slice())
    }

    pub(crate) fn get_int(&self, op: u16) -> Option<i32> {
        match self.get(op)? {
            [DictValue::Int(val)] => Some(*val),
            _ => None,
        }
    }

    fn get_two_ints(&self, op: u16) -> Option<(i32, i32)> {
        match self.get(op)? {
            [DictValue::Int(first), DictValue::Int(second)] => Some((*first, *second)),
            _ => None,
        }
    }
}

/// Private DICT together with its local subroutine INDEX.
#[derive(Debug, Default)]
pub(crate) struct PrivateData<'a> {
    pub(crate) dict: Dict,
    pub(crate) local_subrs: Index<'a>,
}

/// Decoded `CFF ` table.
#[derive(Debug)]
pub(crate) struct CffTable<'a> {
    pub(crate) header: &'a [u8],
    pub(crate) name_index: Index<'a>,
    pub(crate) top_dict: Dict,
    pub(crate) string_index: Index<'a>,
    pub(crate) global_subrs: Index<'a>,
    pub(crate) charstrings: Index<'a>,
    /// SID per glyph ID; entry 0 is always 0 (`.notdef`).
    pub(crate) charset: Vec<u16>,
    pub(crate) private: Option<PrivateData<'a>>,
}

impl<'a> CffTable<'a> {
    pub(super) fn parse(table: Cursor<'a>, num_glyphs: u16) -> Result<Self, ParseError> {
        let mut cursor = table;
        cursor.skip(2)?; // major, minor version
        let header_size = usize::from(cursor.read_u8()?);
        cursor.skip(1)?; // offSize hint, unused
        let header = table.range(0..header_size)?.bytes;

        let mut cursor = table.range(header_size..table.len())?;
        let name_index = Index::parse(&mut cursor)?;
        let top_dict_index = Index::parse(&mut cursor)?;
        let string_index = Index::parse(&mut cursor)?;
        let global_subrs = Index::parse(&mut cursor)?;

        let top_dict_bytes = top_dict_index
            .get(0)
            .ok_or_else(|| cursor.err(ParseErrorKind::Unsupported("CFF without a Top DICT")))?;
        let top_dict = Dict::parse(table.range(0..0)?.with_bytes(top_dict_bytes))?;
        if top_dict.get(OP_ROS).is_some() {
            return Err(cursor.err(ParseErrorKind::Unsupported("CID-keyed CFF")));
        }

        let charstrings_offset = top_dict
            .get_int(OP_CHARSTRINGS)
            .and_then(|offset| usize::try_from(offset).ok())
            .ok_or_else(|| cursor.err(ParseErrorKind::Unsupported("CFF without charstrings")))?;
        let mut charstrings_cursor = table.range(charstrings_offset..table.len())?;
        let charstrings = Index::parse(&mut charstrings_cursor)?;
        if charstrings.len() != usize::from(num_glyphs) {
            return Err(charstrings_cursor.err(ParseErrorKind::UnexpectedTableLen {
                expected: usize::from(num_glyphs),
                actual: charstrings.len(),
            }));
        }

        let charset = Self::parse_charset(table, &top_dict, num_glyphs)?;

        let private = if let Some((size, offset)) = top_dict.get_two_ints(OP_PRIVATE) {
            let (size, offset) = (
                usize::try_from(size)
                    .map_err(|_| table.err(ParseErrorKind::OffsetOutOfBounds(0)))?,
                usize::try_from(offset)
                    .map_err(|_| table.err(ParseErrorKind::OffsetOutOfBounds(0)))?,
            );
            let end = offset
                .checked_add(size)
                .ok_or_else(|| table.err(ParseErrorKind::OffsetOutOfBounds(offset)))?;
            let dict = Dict::parse(table.range(offset..end)?)?;
            let local_subrs = if let Some(subrs_offset) = dict.get_int(OP_SUBRS) {
                let subrs_offset = offset
                    .checked_add_signed(subrs_offset as isize)
                    .ok_or_else(|| table.err(ParseErrorKind::OffsetOutOfBounds(offset)))?;
                let mut subrs_cursor = table.range(subrs_offset..table.len())?;
                Index::parse(&mut subrs_cursor)?
            } else {
                Index::default()
            };
            Some(PrivateData { dict, local_subrs })
        } else {
            None
        };

        Ok(Self {
            header,
            name_index,
            top_dict,
            string_index,
            global_subrs,
            charstrings,
            charset,
            private,
        })
    }

    fn parse_charset(
        table: Cursor<'a>,
        top_dict: &Dict,
        num_glyphs: u16,
    ) -> Result<Vec<u16>, ParseError> {
        let offset = top_dict.get_int(OP_CHARSET).unwrap_or(0);
        match offset {
            // ISOAdobe: glyph ID and SID coincide.
            0 => return Ok((0..num_glyphs).collect()),
            1 | 2 => {
                return Err(table.err(ParseErrorKind::Unsupported("predefined Expert charsets")));
            }
            _ => {}
        }
        let offset = usize::try_from(offset)
            .map_err(|_| table.err(ParseErrorKind::OffsetOutOfBounds(0)))?;
        let mut cursor = table.range(offset..table.len())?;

        let mut charset = Vec::with_capacity(usize::from(num_glyphs));
        charset.push(0); // .notdef
        let format = cursor.read_u8()?;
        match format {
            0 => {
                while charset.len() < usize::from(num_glyphs) {
                    charset.push(cursor.read_u16()?);
                }
            }
            1 | 2 => {
                while charset.len() < usize::from(num_glyphs) {
                    let first = cursor.read_u16()?;
                    let n_left = if format == 1 {
                        u16::from(cursor.read_u8()?)
                    } else {
                        cursor.read_u16()?
                    };
                    for delta in 0..=n_left {
                        if charset.len() == usize::from(num_glyphs) {
                            break;
                        }
                        charset.push(first.wrapping_add(delta));
                    }
                }
            }
            other => {
                return Err(cursor.err(ParseErrorKind::UnexpectedTableFormat(other.into())));
            }
        }
        Ok(charset)
    }
}

impl<'a> Cursor<'a> {
    /// Rebinds this cursor (keeping its error context) to different bytes.
    pub(crate) fn with_bytes(mut self, bytes: &'a [u8]) -> Self {
        self.bytes = bytes;
        self
    }
}

const fn subr_bias(count: usize) -> i32 {
    if count < 1240 {
        107
    } else if count < 33900 {
        1131
    } else {
        32768
    }
}

/// Shared state of a Type 2 charstring scan.
#[derive(Debug)]
pub(crate) struct SubrScan<'a, 'b> {
    global: &'b Index<'a>,
    local: &'b Index<'a>,
    pub(crate) global_used: BTreeSet<usize>,
    pub(crate) local_used: BTreeSet<usize>,
    stack: Vec<i32>,
    num_stems: usize,
}

impl<'a, 'b> SubrScan<'a, 'b> {
    const MAX_DEPTH: usize = 10; // nesting limit of Type 2 interpreters

    pub(crate) fn new(global: &'b Index<'a>, local: &'b Index<'a>) -> Self {
        Self {
            global,
            local,
            global_used: BTreeSet::new(),
            local_used: BTreeSet::new(),
            stack: Vec::new(),
            num_stems: 0,
        }
    }

    /// Records all subroutines transitively reachable from `charstring`.
    ///
    /// The scan tracks the operand stack only as far as needed to resolve
    /// subroutine numbers and `hintmask` data sizes.
    pub(crate) fn scan(&mut self, charstring: &[u8]) -> Result<(), ParseError> {
        self.stack.clear();
        self.num_stems = 0;
        self.scan_inner(charstring, 0)
    }

    fn scan_inner(&mut self, charstring: &[u8], depth: usize) -> Result<(), ParseError> {
        if depth > Self::MAX_DEPTH {
            log::warn!("charstring subroutine nesting exceeds {}; truncating scan", Self::MAX_DEPTH);
            return Ok(());
        }

        let mut cursor = Cursor::for_table(charstring, TableTag::CFF, 0);
        while cursor.len() > 0 {
            let b0 = cursor.read_u8()?;
            match b0 {
                // hstem, vstem, hstemhm, vstemhm
                1 | 3 | 18 | 23 => {
                    self.num_stems += self.stack.len() / 2;
                    self.stack.clear();
                }
                // hintmask, cntrmask carry (numStems + 7) / 8 mask bytes
                19 | 20 => {
                    self.num_stems += self.stack.len() / 2;
                    self.stack.clear();
                    cursor.skip((self.num_stems + 7) / 8)?;
                }
                // callsubr
                10 => {
                    if let Some(num) = self.stack.pop() {
                        let idx = num + subr_bias(self.local.len());
                        if let Ok(idx) = usize::try_from(idx) {
                            if self.local_used.insert(idx) {
                                if let Some(subr) = self.local.get(idx) {
                                    self.scan_inner(subr, depth + 1)?;
                                }
                            }
                        }
                    }
                }
                // callgsubr
                29 => {
                    if let Some(num) = self.stack.pop() {
                        let idx = num + subr_bias(self.global.len());
                        if let Ok(idx) = usize::try_from(idx) {
                            if self.global_used.insert(idx) {
                                if let Some(subr) = self.global.get(idx) {
                                    self.scan_inner(subr, depth + 1)?;
                                }
                            }
                        }
                    }
                }
                // return
                11 => return Ok(()),
                // endchar
                14 => return Ok(()),
                // two-byte (escape) operators
                12 => {
                    cursor.skip(1)?;
                    self.stack.clear();
                }
                28 => {
                    let val = i16::from_be_bytes(cursor.read_byte_array::<2>()?);
                    self.stack.push(val.into());
                }
                // 16.16 fixed-point operand; only its integer part can name a subr
                255 => {
                    let val = i32::from_be_bytes(cursor.read_byte_array::<4>()?);
                    self.stack.push(val >> 16);
                }
                32..=246 => self.stack.push(i32::from(b0) - 139),
                247..=250 => {
                    let b1 = cursor.read_u8()?;
                    self.stack.push((i32::from(b0) - 247) * 256 + i32::from(b1) + 108);
                }
                251..=254 => {
                    let b1 = cursor.read_u8()?;
                    self.stack.push(-(i32::from(b0) - 251) * 256 - i32::from(b1) - 108);
                }
                // any other operator consumes its operands
                _ => self.stack.clear(),
            }
        }
        Ok(())
    }
}
