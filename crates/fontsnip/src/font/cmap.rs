//! `cmap` table processing.

use std::collections::BTreeSet;

use super::Cursor;
use crate::{
    errors::{MapError, ParseErrorKind},
    ParseError,
};

#[derive(Debug, Clone, Copy)]
pub(crate) struct SegmentWithDelta {
    pub(crate) start_code: u16,
    pub(crate) end_code: u16,
    pub(crate) id_delta: u16,
    pub(crate) id_range_offset: u16,
}

/// Segment mapping to delta values (format 4) subtable of the `cmap` table.
#[derive(Debug, Clone)]
pub(crate) struct SegmentDeltas<'a> {
    pub(crate) segments: Vec<SegmentWithDelta>,
    pub(crate) glyph_id_array: &'a [u8],
}

impl<'a> SegmentDeltas<'a> {
    fn parse(mut cursor: Cursor<'a>) -> Result<Self, ParseError> {
        cursor.read_u16_checked(|format| {
            if format != 4 {
                return Err(ParseErrorKind::UnexpectedTableFormat(format));
            }
            Ok(())
        })?;

        let remaining_len = cursor.read_u16_checked(|subtable_len| {
            Ok(subtable_len
                .checked_sub(4)
                .ok_or(ParseErrorKind::UnexpectedEof)? as usize)
        })?;
        cursor = cursor.range(0..remaining_len)?;

        cursor.skip(2)?; // language
        let segment_count = cursor.read_u16()? / 2;
        cursor.skip(6)?; // searchRange, entrySelector, rangeShift

        let vec_len = 2 * usize::from(segment_count);
        let mut end_codes = cursor.split_at(vec_len)?;
        cursor.skip(2)?; // reserved padding
        let mut start_codes = cursor.split_at(vec_len)?;
        let mut id_deltas = cursor.split_at(vec_len)?;
        let mut id_range_offsets = cursor.split_at(vec_len)?;

        let segments = (0..segment_count).map(|_| {
            Ok(SegmentWithDelta {
                start_code: start_codes.read_u16()?,
                end_code: end_codes.read_u16()?,
                id_delta: id_deltas.read_u16()?,
                id_range_offset: id_range_offsets.read_u16()?,
            })
        });

        Ok(Self {
            segments: segments.collect::<Result<_, ParseError>>()?,
            glyph_id_array: cursor.bytes,
        })
    }

    fn lookup(&self, segment_idx: usize, c: u16) -> Result<u16, MapError> {
        let Some(segment) = self.segments.get(segment_idx) else {
            return Ok(0); // `c` exceeds `end_code` of the last segment
        };
        if segment.start_code > c {
            return Ok(0); // missing glyph
        }

        if segment.id_range_offset == 0 {
            Ok(segment.id_delta.wrapping_add(c))
        } else {
            // Offset is counted from the start of `idRangeOffsets`
            let mut byte_offset = 2 * segment_idx;
            byte_offset += usize::from(segment.id_range_offset);
            byte_offset += 2 * usize::from(c - segment.start_code);

            if byte_offset < 2 * self.segments.len() {
                return Err(MapError::InvalidOffset);
            }
            // Shift the offset to count from the start of `glyphIdArray`
            byte_offset -= 2 * self.segments.len();
            let glyph_id_bytes = self
                .glyph_id_array
                .get(byte_offset..(byte_offset + 2))
                .ok_or(MapError::InvalidOffset)?;
            let glyph_id = u16::from_be_bytes(glyph_id_bytes.try_into().unwrap());
            if glyph_id == 0 {
                return Ok(0);
            }
            Ok(segment.id_delta.wrapping_add(glyph_id))
        }
    }

    fn map_char(&self, c: char) -> Result<u16, MapError> {
        let c = u16::try_from(c as u32).map_err(|_| MapError::CharTooLarge)?;
        let segment_idx = self
            .segments
            .binary_search_by_key(&c, |segment| segment.end_code)
            .unwrap_or_else(|pos| pos);
        self.lookup(segment_idx, c)
    }

    fn collect_chars(&self, chars: &mut BTreeSet<char>) {
        for (idx, segment) in self.segments.iter().enumerate() {
            for c in segment.start_code..=segment.end_code {
                let Ok(glyph_id) = self.lookup(idx, c) else {
                    continue;
                };
                if glyph_id != 0 {
                    if let Some(ch) = char::from_u32(u32::from(c)) {
                        chars.insert(ch);
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SequentialMapGroup {
    pub(crate) start_char_code: u32,
    pub(crate) end_char_code: u32,
    pub(crate) start_glyph_id: u32,
}

impl SequentialMapGroup {
    pub(crate) fn map_unchecked(&self, ch: char) -> u32 {
        u32::from(ch) - self.start_char_code + self.start_glyph_id
    }
}

/// Segmented coverage (format 12) subtable of the `cmap` table.
#[derive(Debug, Default, Clone)]
pub(crate) struct SegmentedCoverage {
    pub(crate) groups: Vec<SequentialMapGroup>,
}

impl SegmentedCoverage {
    fn parse(mut cursor: Cursor<'_>) -> Result<Self, ParseError> {
        cursor.read_u16_checked(|format| {
            if format != 12 {
                return Err(ParseErrorKind::UnexpectedTableFormat(format));
            }
            Ok(())
        })?;

        cursor.skip(2)?; // reserved

        let remaining_len = cursor.read_u32_checked(|subtable_len| {
            Ok(subtable_len
                .checked_sub(8)
                .ok_or(ParseErrorKind::UnexpectedEof)? as usize)
        })?;
        cursor = cursor.range(0..remaining_len)?;

        cursor.skip(4)?; // language
        let num_groups = cursor.read_u32()?;
        let groups = (0..num_groups).map(|_| {
            Ok(SequentialMapGroup {
                start_char_code: cursor.read_u32()?,
                end_char_code: cursor.read_u32()?,
                start_glyph_id: cursor.read_u32()?,
            })
        });

        Ok(Self {
            groups: groups.collect::<Result<_, ParseError>>()?,
        })
    }

    fn map_char(&self, ch: char) -> Result<u16, MapError> {
        let ch = u32::from(ch);
        let group_idx = self
            .groups
            .binary_search_by_key(&ch, |group| group.end_char_code)
            .unwrap_or_else(|pos| pos);
        let Some(group) = self.groups.get(group_idx) else {
            return Ok(0); // `ch` exceeds `end_char_code` for the last group
        };
        if group.start_char_code > ch {
            return Ok(0); // missing glyph
        }
        let glyph_id = ch - group.start_char_code + group.start_glyph_id;
        glyph_id.try_into().map_err(|_| MapError::InvalidOffset)
    }

    fn collect_chars(&self, chars: &mut BTreeSet<char>) {
        for group in &self.groups {
            for c in group.start_char_code..=group.end_char_code {
                let glyph_id = c - group.start_char_code + group.start_glyph_id;
                if glyph_id != 0 {
                    if let Some(ch) = char::from_u32(c) {
                        chars.insert(ch);
                    }
                }
            }
        }
    }
}

/// Byte encoding (format 0) subtable, used by legacy Mac fonts.
#[derive(Debug, Clone)]
pub(crate) struct ByteEncoding<'a> {
    glyph_ids: &'a [u8],
}

impl<'a> ByteEncoding<'a> {
    fn parse(mut cursor: Cursor<'a>) -> Result<Self, ParseError> {
        cursor.read_u16_checked(|format| {
            if format != 0 {
                return Err(ParseErrorKind::UnexpectedTableFormat(format));
            }
            Ok(())
        })?;
        cursor.skip(4)?; // length, language
        let glyph_ids = cursor.split_at(256)?;
        Ok(Self {
            glyph_ids: glyph_ids.bytes,
        })
    }

    fn map_char(&self, ch: char) -> u16 {
        usize::try_from(u32::from(ch))
            .ok()
            .and_then(|idx| self.glyph_ids.get(idx))
            .map_or(0, |&id| u16::from(id))
    }

    fn collect_chars(&self, chars: &mut BTreeSet<char>) {
        for (idx, &glyph_id) in self.glyph_ids.iter().enumerate() {
            if glyph_id != 0 {
                if let Some(ch) = char::from_u32(idx as u32) {
                    chars.insert(ch);
                }
            }
        }
    }
}

/// Trimmed table mapping (format 6) subtable.
#[derive(Debug, Clone)]
pub(crate) struct TrimmedTable<'a> {
    first_code: u16,
    glyph_ids: Cursor<'a>,
}

impl<'a> TrimmedTable<'a> {
    fn parse(mut cursor: Cursor<'a>) -> Result<Self, ParseError> {
        cursor.read_u16_checked(|format| {
            if format != 6 {
                return Err(ParseErrorKind::UnexpectedTableFormat(format));
            }
            Ok(())
        })?;
        cursor.skip(4)?; // length, language
        let first_code = cursor.read_u16()?;
        let entry_count = cursor.read_u16()?;
        let glyph_ids = cursor.split_at(2 * usize::from(entry_count))?;
        Ok(Self {
            first_code,
            glyph_ids,
        })
    }

    fn entry(&self, idx: usize) -> u16 {
        let mut bytes = self.glyph_ids;
        if bytes.skip(idx * 2).is_err() {
            return 0;
        }
        bytes.read_u16().unwrap_or(0)
    }

    fn map_char(&self, ch: char) -> u16 {
        let Ok(c) = u16::try_from(u32::from(ch)) else {
            return 0;
        };
        let Some(idx) = c.checked_sub(self.first_code) else {
            return 0;
        };
        if usize::from(idx) * 2 >= self.glyph_ids.len() {
            return 0;
        }
        self.entry(usize::from(idx))
    }

    fn collect_chars(&self, chars: &mut BTreeSet<char>) {
        let entry_count = self.glyph_ids.len() / 2;
        for idx in 0..entry_count {
            if self.entry(idx) != 0 {
                if let Some(ch) = char::from_u32(u32::from(self.first_code) + idx as u32) {
                    chars.insert(ch);
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
enum Subtable<'a> {
    ByteEncoding(ByteEncoding<'a>),
    Deltas(SegmentDeltas<'a>),
    Trimmed(TrimmedTable<'a>),
    Coverage(SegmentedCoverage),
}

/// Decoded `cmap` table: the best supported subtable of the font.
#[derive(Debug, Clone)]
pub(crate) struct CmapTable<'a> {
    subtable: Subtable<'a>,
}

impl<'a> CmapTable<'a> {
    pub(crate) const UNICODE_PLATFORM: u16 = 0;
    pub(crate) const MACINTOSH_PLATFORM: u16 = 1;
    pub(crate) const WINDOWS_PLATFORM: u16 = 3;

    pub(super) fn parse(cursor: Cursor<'a>) -> Result<Self, ParseError> {
        let table_cursor = cursor;
        let mut cursor = cursor;
        cursor.read_u16_checked(|version| {
            if version != 0 {
                return Err(ParseErrorKind::UnexpectedTableVersion(version.into()));
            }
            Ok(())
        })?;

        let num_tables = cursor.read_u16()?;
        let mut candidates = Vec::with_capacity(usize::from(num_tables));
        for _ in 0..num_tables {
            let platform_id = cursor.read_u16()?;
            let encoding_id = cursor.read_u16()?;
            let offset = cursor.read_u32()? as usize;
            let preference = match (platform_id, encoding_id) {
                (Self::WINDOWS_PLATFORM, 10) => 0_u8,
                (Self::WINDOWS_PLATFORM, 1) => 1,
                (Self::UNICODE_PLATFORM, _) => 2,
                (Self::MACINTOSH_PLATFORM, 0) => 3,
                _ => continue, // non-Unicode encoding
            };
            candidates.push((preference, offset));
        }
        candidates.sort_by_key(|&(preference, _)| preference);

        for (_, offset) in candidates {
            let Ok(subtable) = table_cursor.range(offset..table_cursor.len()) else {
                log::debug!("skipping cmap subtable with out-of-bounds offset {offset}");
                continue;
            };
            match Self::parse_subtable(subtable) {
                Ok(Some(subtable)) => return Ok(Self { subtable }),
                Ok(None) => { /* unsupported format; try the next candidate */ }
                Err(err) => log::debug!("skipping malformed cmap subtable: {err}"),
            }
        }
        Err(cursor.err(ParseErrorKind::NoSupportedCmap))
    }

    fn parse_subtable(cursor: Cursor<'a>) -> Result<Option<Subtable<'a>>, ParseError> {
        let format = {
            let mut peek = cursor;
            peek.read_u16()?
        };
        Ok(match format {
            0 => Some(Subtable::ByteEncoding(ByteEncoding::parse(cursor)?)),
            4 => Some(Subtable::Deltas(SegmentDeltas::parse(cursor)?)),
            6 => Some(Subtable::Trimmed(TrimmedTable::parse(cursor)?)),
            12 => Some(Subtable::Coverage(SegmentedCoverage::parse(cursor)?)),
            other => {
                log::debug!("skipping cmap subtable format {other}");
                None
            }
        })
    }

    pub(super) fn map_char(&self, ch: char) -> Result<u16, MapError> {
        match &self.subtable {
            Subtable::ByteEncoding(bytes) => Ok(bytes.map_char(ch)),
            Subtable::Deltas(deltas) => deltas.map_char(ch),
            Subtable::Trimmed(trimmed) => Ok(trimmed.map_char(ch)),
            Subtable::Coverage(coverage) => coverage.map_char(ch),
        }
    }

    pub(super) fn mapped_chars(&self) -> BTreeSet<char> {
        let mut chars = BTreeSet::new();
        match &self.subtable {
            Subtable::ByteEncoding(bytes) => bytes.collect_chars(&mut chars),
            Subtable::Deltas(deltas) => deltas.collect_chars(&mut chars),
            Subtable::Trimmed(trimmed) => trimmed.collect_chars(&mut chars),
            Subtable::Coverage(coverage) => coverage.collect_chars(&mut chars),
        }
        chars
    }
}
