//! Rewriting retained tables and serializing them in sfnt format.

use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::{
    errors::{ParseErrorKind, SubsetError},
    font::{
        cmap::{SegmentWithDelta, SequentialMapGroup},
        glyph::{Glyph, GlyphComponent},
        Flavor, Font, HeadTable, HheaTable, LocaFormat, NameTable, Outlines, TableTag,
    },
    subset::{AxisClip, FontSubset, SubsetOptions},
    ParseError,
};

pub(crate) mod cff;

pub(crate) fn write_u16(writer: &mut Vec<u8>, value: u16) {
    writer.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn write_u32(writer: &mut Vec<u8>, value: u32) {
    writer.extend_from_slice(&value.to_be_bytes());
}

/// Sums the data as big-endian `u32` words, zero-padding the final partial
/// word.
pub(crate) fn checksum(data: &[u8]) -> u32 {
    let mut sum = 0_u32;
    for chunk in data.chunks(4) {
        let mut word = [0_u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        sum = sum.wrapping_add(u32::from_be_bytes(word));
    }
    sum
}

/// Physical layout rank of a table; the serializer lays data out in this
/// order regardless of directory (tag) order.
fn layout_rank(tag: TableTag) -> u8 {
    match tag {
        TableTag::HEAD => 0,
        TableTag::HHEA => 1,
        TableTag::MAXP => 2,
        TableTag::OS2 => 3,
        TableTag::HMTX => 4,
        TableTag::CMAP => 5,
        TableTag::FPGM => 6,
        TableTag::PREP => 7,
        TableTag::CVT => 8,
        TableTag::GASP => 9,
        TableTag::FVAR => 10,
        TableTag::LOCA => 11,
        TableTag::GLYF => 12,
        TableTag::CFF => 13,
        TableTag::NAME => 14,
        TableTag::POST => 15,
        _ => u8::MAX,
    }
}

/// Rewritten tables of one font, ready for serialization into any container.
///
/// Table data is kept unpadded; padding and checksums are applied during
/// serialization.
#[derive(Debug)]
pub struct TableSet {
    pub(crate) flavor: Flavor,
    pub(crate) tables: Vec<(TableTag, Vec<u8>)>,
}

impl TableSet {
    pub(crate) fn new(flavor: Flavor) -> Self {
        Self {
            flavor,
            tables: Vec::new(),
        }
    }

    fn push(&mut self, tag: TableTag, data: Vec<u8>) {
        debug_assert!(
            !self.tables.iter().any(|(existing, _)| *existing == tag),
            "duplicate {tag} table"
        );
        self.tables.push((tag, data));
    }

    fn push_raw(&mut self, tag: TableTag, data: &[u8]) {
        self.push(tag, data.to_vec());
    }

    pub(crate) fn get(&self, tag: TableTag) -> Option<&[u8]> {
        self.tables
            .iter()
            .find(|(existing, _)| *existing == tag)
            .map(|(_, data)| data.as_slice())
    }

    /// Restores the physical layout order after tables were collected in
    /// directory order (container decoding).
    pub(crate) fn sort_for_layout(&mut self) {
        self.tables.sort_by_key(|&(tag, _)| layout_rank(tag));
    }

    /// Serializes the tables as an sfnt font.
    ///
    /// Pads every table to a 4-byte boundary, recomputes the directory
    /// search fields and all checksums, and patches
    /// `head.checkSumAdjustment` via the standard two-pass scheme.
    ///
    /// # Errors
    ///
    /// Returns [`SubsetError::Overflow`] if the serialized font would exceed
    /// the 32-bit addressable range.
    pub fn to_sfnt(&self) -> Result<Vec<u8>, SubsetError> {
        let num_tables = u16::try_from(self.tables.len()).map_err(|_| SubsetError::Overflow)?;

        // The adjustment must be zero while checksumming.
        let normalized: Vec<(TableTag, Cow<'_, [u8]>)> = self
            .tables
            .iter()
            .map(|(tag, data)| {
                if *tag == TableTag::HEAD && data.len() >= HeadTable::CHECKSUM_ADJUSTMENT_OFFSET + 4
                {
                    let mut head = data.clone();
                    head[HeadTable::CHECKSUM_ADJUSTMENT_OFFSET
                        ..HeadTable::CHECKSUM_ADJUSTMENT_OFFSET + 4]
                        .fill(0);
                    (*tag, Cow::Owned(head))
                } else {
                    (*tag, Cow::Borrowed(data.as_slice()))
                }
            })
            .collect();

        let data_start = 12 + 16 * normalized.len();
        let mut offset = data_start;
        let mut records = Vec::with_capacity(normalized.len());
        let mut head_adjustment_offset = None;
        for (tag, data) in &normalized {
            if *tag == TableTag::HEAD && data.len() >= HeadTable::CHECKSUM_ADJUSTMENT_OFFSET + 4 {
                head_adjustment_offset = Some(offset + HeadTable::CHECKSUM_ADJUSTMENT_OFFSET);
            }
            records.push(TableRecord {
                tag: *tag,
                checksum: checksum(data),
                offset: u32::try_from(offset).map_err(|_| SubsetError::Overflow)?,
                length: u32::try_from(data.len()).map_err(|_| SubsetError::Overflow)?,
            });
            offset = offset
                .checked_add(padded_len(data.len()))
                .ok_or(SubsetError::Overflow)?;
        }
        u32::try_from(offset).map_err(|_| SubsetError::Overflow)?;

        let mut buffer = Vec::with_capacity(offset);
        write_u32(&mut buffer, self.flavor.sfnt_version());
        write_u16(&mut buffer, num_tables);
        let entry_selector = if num_tables == 0 {
            0
        } else {
            u16::try_from(num_tables.ilog2()).unwrap()
        };
        let search_range = if num_tables == 0 {
            0
        } else {
            1_u16 << (4 + entry_selector)
        };
        write_u16(&mut buffer, search_range);
        write_u16(&mut buffer, entry_selector);
        write_u16(&mut buffer, 16 * num_tables - search_range);

        // Directory records are sorted by tag for binary search.
        let mut directory = records;
        directory.sort_unstable_by_key(|record| record.tag);
        for record in &directory {
            record.write(&mut buffer);
        }
        for (_, data) in &normalized {
            buffer.extend_from_slice(data);
            buffer.resize(padded_len(buffer.len() - data_start) + data_start, 0);
        }
        debug_assert_eq!(buffer.len(), offset);

        if let Some(adjustment_offset) = head_adjustment_offset {
            let adjustment = Font::SFNT_CHECKSUM.wrapping_sub(checksum(&buffer));
            buffer[adjustment_offset..adjustment_offset + 4]
                .copy_from_slice(&adjustment.to_be_bytes());
        }
        Ok(buffer)
    }
}

pub(crate) fn padded_len(len: usize) -> usize {
    len + (4 - len % 4) % 4
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TableRecord {
    pub(crate) tag: TableTag,
    pub(crate) checksum: u32,
    pub(crate) offset: u32,
    pub(crate) length: u32,
}

impl TableRecord {
    fn write(&self, writer: &mut Vec<u8>) {
        writer.extend_from_slice(&self.tag.0);
        write_u32(writer, self.checksum);
        write_u32(writer, self.offset);
        write_u32(writer, self.length);
    }
}

/// Builds the full rewritten table set for a subset.
pub(crate) fn build_tables(
    subset: &FontSubset<'_>,
    options: &SubsetOptions,
) -> Result<TableSet, SubsetError> {
    let font = &subset.font;
    let mut tables = TableSet::new(font.flavor);

    let outline_tables = match &font.outlines {
        Outlines::TrueType { .. } => {
            let (glyf, locations) = build_glyf(subset)?;
            let (loca, loca_format) = build_loca(&locations);
            OutlineTables::TrueType {
                glyf,
                loca,
                loca_format,
            }
        }
        Outlines::Cff(table) => OutlineTables::Cff(cff::build(table, &subset.kept)?),
    };

    let loca_format = match &outline_tables {
        OutlineTables::TrueType { loca_format, .. } => Some(*loca_format),
        OutlineTables::Cff(_) => None,
    };
    tables.push(TableTag::HEAD, build_head(font.head.raw, loca_format));
    tables.push(
        TableTag::HHEA,
        build_hhea(font.hhea.raw, subset.num_glyphs()),
    );
    tables.push(
        TableTag::MAXP,
        build_maxp(font.maxp.raw, subset.num_glyphs()),
    );
    if let Some(os2) = font.os2 {
        tables.push_raw(TableTag::OS2, os2);
    }
    tables.push(TableTag::HMTX, build_hmtx(subset)?);
    tables.push(TableTag::CMAP, build_cmap(&subset.char_map));
    if let Some(fpgm) = font.fpgm {
        tables.push_raw(TableTag::FPGM, fpgm);
    }
    if let Some(prep) = font.prep {
        tables.push_raw(TableTag::PREP, prep);
    }
    if let Some(cvt) = font.cvt {
        tables.push_raw(TableTag::CVT, cvt);
    }
    if let Some(gasp) = font.gasp {
        tables.push_raw(TableTag::GASP, gasp);
    }
    if let Some(fvar) = font.fvar {
        tables.push(
            TableTag::FVAR,
            build_fvar(fvar, &options.variation_axes),
        );
    } else if !options.variation_axes.is_empty() {
        log::warn!("variation axis clips requested, but the font has no fvar table");
    }
    match outline_tables {
        OutlineTables::TrueType { glyf, loca, .. } => {
            tables.push(TableTag::LOCA, loca);
            tables.push(TableTag::GLYF, glyf);
        }
        OutlineTables::Cff(cff) => tables.push(TableTag::CFF, cff),
    }
    if options.preserve_metadata {
        tables.push_raw(TableTag::NAME, font.name.raw);
    } else {
        tables.push(TableTag::NAME, build_name(&font.name));
    }
    tables.push(TableTag::POST, build_post(font.post)?);

    Ok(tables)
}

enum OutlineTables {
    TrueType {
        glyf: Vec<u8>,
        loca: Vec<u8>,
        loca_format: LocaFormat,
    },
    Cff(Vec<u8>),
}

/// Writes retained glyph outlines in new glyph ID order, rewriting composite
/// component references through the remap. Returns the glyph data plus the
/// end offset of every glyph.
fn build_glyf(subset: &FontSubset<'_>) -> Result<(Vec<u8>, Vec<usize>), ParseError> {
    let mut buffer = Vec::new();
    let mut locations = vec![0];
    for &old_idx in &subset.kept {
        let glyph = subset.font.glyph(old_idx)?;
        write_glyph(&glyph.inner, &subset.remap, &mut buffer);
        // Keep every glyph offset even so the short loca format stays usable.
        if buffer.len() % 2 != 0 {
            buffer.push(0);
        }
        locations.push(buffer.len());
    }
    Ok((buffer, locations))
}

fn write_glyph(glyph: &Glyph<'_>, remap: &BTreeMap<u16, u16>, writer: &mut Vec<u8>) {
    match glyph {
        Glyph::Empty => { /* zero-length entry */ }
        Glyph::Simple(bytes) => writer.extend_from_slice(bytes),
        Glyph::Composite {
            header,
            components,
            instructions,
        } => {
            write_u16(writer, 0xFFFF); // numberOfContours = -1
            writer.extend_from_slice(header);
            for component in components {
                write_component(component, remap, writer);
            }
            writer.extend_from_slice(instructions);
        }
    }
}

fn write_component(
    component: &GlyphComponent<'_>,
    remap: &BTreeMap<u16, u16>,
    writer: &mut Vec<u8>,
) {
    let new_idx = remap.get(&component.glyph_idx).copied().unwrap_or_else(|| {
        log::warn!(
            "component glyph {} is outside the retained set; mapping to .notdef",
            component.glyph_idx
        );
        0
    });
    write_u16(writer, component.flags);
    write_u16(writer, new_idx);
    writer.extend_from_slice(component.trailer);
}

fn build_loca(locations: &[usize]) -> (Vec<u8>, LocaFormat) {
    let mut buffer = Vec::new();
    let all_even = locations.iter().all(|&loc| loc % 2 == 0);
    let in_bounds = locations
        .last()
        .is_none_or(|&loc| loc <= usize::from(u16::MAX) * 2);
    if all_even && in_bounds {
        for &loc in locations {
            #[allow(clippy::cast_possible_truncation)] // bounded by the preceding check
            write_u16(&mut buffer, (loc / 2) as u16);
        }
        (buffer, LocaFormat::Short)
    } else {
        for &loc in locations {
            write_u32(
                &mut buffer,
                u32::try_from(loc).expect("glyph location overflow"),
            );
        }
        (buffer, LocaFormat::Long)
    }
}

fn build_head(original: &[u8], loca_format: Option<LocaFormat>) -> Vec<u8> {
    let mut head = original.to_vec();
    head[HeadTable::CHECKSUM_ADJUSTMENT_OFFSET..HeadTable::CHECKSUM_ADJUSTMENT_OFFSET + 4].fill(0);
    if let Some(format) = loca_format {
        let raw_format: u16 = match format {
            LocaFormat::Short => 0,
            LocaFormat::Long => 1,
        };
        head[HeadTable::LOCA_FORMAT_OFFSET..HeadTable::LOCA_FORMAT_OFFSET + 2]
            .copy_from_slice(&raw_format.to_be_bytes());
    }
    head
}

fn build_hhea(original: &[u8], num_glyphs: u16) -> Vec<u8> {
    let mut hhea = original.to_vec();
    // Every glyph gets an explicit hmtx entry.
    hhea[HheaTable::NUM_H_METRICS_OFFSET..HheaTable::NUM_H_METRICS_OFFSET + 2]
        .copy_from_slice(&num_glyphs.to_be_bytes());
    hhea
}

fn build_maxp(original: &[u8], num_glyphs: u16) -> Vec<u8> {
    let mut maxp = original.to_vec();
    maxp[4..6].copy_from_slice(&num_glyphs.to_be_bytes());
    maxp
}

/// Emits one explicit (advance, lsb) pair per retained glyph, in new glyph
/// ID order. The monospace tail optimization is intentionally not
/// reproduced: correctness over minimal size.
fn build_hmtx(subset: &FontSubset<'_>) -> Result<Vec<u8>, ParseError> {
    let mut buffer = Vec::with_capacity(subset.kept.len() * 4);
    for &old_idx in &subset.kept {
        let (advance, lsb) = subset.font.hmtx.advance_and_lsb(old_idx)?;
        write_u16(&mut buffer, advance);
        write_u16(&mut buffer, lsb);
    }
    Ok(buffer)
}

/// Truncates `post` to version 3.0: the glyph name data of versions 1.0 and
/// 2.0 has a glyph-index dependency and is dropped wholesale.
fn build_post(original: &[u8]) -> Result<Vec<u8>, ParseError> {
    let header = original.get(4..32).ok_or(ParseError {
        kind: ParseErrorKind::UnexpectedTableLen {
            expected: 32,
            actual: original.len(),
        },
        offset: 0,
        table: Some(TableTag::POST),
    })?;
    let mut buffer = Vec::with_capacity(32);
    write_u32(&mut buffer, 0x0003_0000); // version
    buffer.extend_from_slice(header);
    Ok(buffer)
}

/// Reduces the `name` table to the essential records (IDs 1–6).
fn build_name(name: &NameTable<'_>) -> Vec<u8> {
    let mut records: Vec<_> = name
        .records
        .iter()
        .filter(|record| NameTable::ESSENTIAL_NAME_IDS.contains(&record.name_id))
        .collect();
    records.sort_by_key(|record| {
        (
            record.platform_id,
            record.encoding_id,
            record.language_id,
            record.name_id,
        )
    });

    let count = u16::try_from(records.len()).expect("name record count overflow");
    let mut buffer = Vec::new();
    write_u16(&mut buffer, 0); // format
    write_u16(&mut buffer, count);
    write_u16(&mut buffer, 6 + 12 * count); // stringOffset

    let mut strings = Vec::new();
    for record in &records {
        write_u16(&mut buffer, record.platform_id);
        write_u16(&mut buffer, record.encoding_id);
        write_u16(&mut buffer, record.language_id);
        write_u16(&mut buffer, record.name_id);
        write_u16(&mut buffer, u16::try_from(record.bytes.len()).expect("name string overflow"));
        write_u16(&mut buffer, u16::try_from(strings.len()).expect("name storage overflow"));
        strings.extend_from_slice(record.bytes);
    }
    buffer.extend_from_slice(&strings);
    buffer
}

/// Builds the subset `cmap`: a format 4 subtable for the BMP, plus a format
/// 12 subtable when any retained code point is supplementary.
fn build_cmap(char_map: &[(char, u16)]) -> Vec<u8> {
    let bmp: Vec<(u32, u16)> = char_map
        .iter()
        .filter(|&&(ch, _)| u32::from(ch) < 0xFFFF)
        .map(|&(ch, idx)| (u32::from(ch), idx))
        .collect();
    let all: Vec<(u32, u16)> = char_map
        .iter()
        .map(|&(ch, idx)| (u32::from(ch), idx))
        .collect();
    let needs_coverage = all.len() != bmp.len();

    let segments = format4_segments(&group_consecutive(&bmp));

    let mut buffer = Vec::new();
    write_u16(&mut buffer, 0); // table version
    let num_subtables: u16 = if needs_coverage { 2 } else { 1 };
    write_u16(&mut buffer, num_subtables);

    let header_len = 4 + 8 * u32::from(num_subtables);
    write_u16(&mut buffer, 3); // Windows platform
    write_u16(&mut buffer, 1); // Unicode BMP
    write_u32(&mut buffer, header_len);
    let format4_len = 16 + 8 * segments.len();
    if needs_coverage {
        write_u16(&mut buffer, 3); // Windows platform
        write_u16(&mut buffer, 10); // Unicode full repertoire
        write_u32(
            &mut buffer,
            header_len + u32::try_from(format4_len).expect("cmap subtable overflow"),
        );
    }

    write_format4(&segments, &mut buffer);
    if needs_coverage {
        write_format12(&group_consecutive(&all), &mut buffer);
    }
    buffer
}

/// Groups an ascending (code point, glyph ID) list into runs where both
/// advance by 1.
fn group_consecutive(map: &[(u32, u16)]) -> Vec<SequentialMapGroup> {
    let mut groups: Vec<SequentialMapGroup> = Vec::new();
    for &(code, glyph_idx) in map {
        if let Some(group) = groups.last_mut() {
            if code == group.end_char_code + 1
                && u32::from(glyph_idx) == group.start_glyph_id + (code - group.start_char_code)
            {
                group.end_char_code = code;
                continue;
            }
        }
        groups.push(SequentialMapGroup {
            start_char_code: code,
            end_char_code: code,
            start_glyph_id: glyph_idx.into(),
        });
    }
    groups
}

fn format4_segments(groups: &[SequentialMapGroup]) -> Vec<SegmentWithDelta> {
    #[allow(clippy::cast_possible_truncation)] // groups hold BMP code points only
    let segments = groups.iter().map(|group| {
        let start_code = group.start_char_code as u16;
        SegmentWithDelta {
            start_code,
            end_code: group.end_char_code as u16,
            id_delta: (group.start_glyph_id as u16).wrapping_sub(start_code),
            id_range_offset: 0,
        }
    });
    // Terminal segment with start == end == 0xffff, mapping to glyph 0.
    segments
        .chain([SegmentWithDelta {
            start_code: u16::MAX,
            end_code: u16::MAX,
            id_delta: 1,
            id_range_offset: 0,
        }])
        .collect()
}

fn write_format4(segments: &[SegmentWithDelta], writer: &mut Vec<u8>) {
    write_u16(writer, 4); // subtable format
    let subtable_len = 16 + 8 * segments.len();
    write_u16(writer, subtable_len.try_into().expect("subtable_len overflow"));
    write_u16(writer, 0); // language

    let segment_count = u16::try_from(segments.len()).expect("segments.len() overflow");
    write_u16(writer, 2 * segment_count);
    let entry_selector = u16::try_from(segment_count.ilog2()).unwrap();
    let search_range = 1 << (entry_selector + 1);
    write_u16(writer, search_range);
    write_u16(writer, entry_selector);
    write_u16(writer, 2 * segment_count - search_range);

    for segment in segments {
        write_u16(writer, segment.end_code);
    }
    write_u16(writer, 0); // reserved padding
    for segment in segments {
        write_u16(writer, segment.start_code);
    }
    for segment in segments {
        write_u16(writer, segment.id_delta);
    }
    for segment in segments {
        write_u16(writer, segment.id_range_offset);
    }
}

fn write_format12(groups: &[SequentialMapGroup], writer: &mut Vec<u8>) {
    write_u16(writer, 12); // subtable format
    write_u16(writer, 0); // reserved
    let subtable_len = 16 + 12 * groups.len();
    write_u32(writer, subtable_len.try_into().expect("subtable_len overflow"));
    write_u32(writer, 0); // language
    write_u32(writer, groups.len().try_into().expect("groups.len() overflow"));
    for group in groups {
        write_u32(writer, group.start_char_code);
        write_u32(writer, group.end_char_code);
        write_u32(writer, group.start_glyph_id);
    }
}

/// Applies axis range clips to a copy of the `fvar` table.
fn build_fvar(original: &[u8], clips: &BTreeMap<[u8; 4], AxisClip>) -> Vec<u8> {
    let mut fvar = original.to_vec();
    if clips.is_empty() {
        return fvar;
    }
    if original.len() < 16 {
        log::warn!("fvar table too short for axis clipping; copying it unchanged");
        return fvar;
    }
    let axes_offset = usize::from(u16::from_be_bytes([original[4], original[5]]));
    let axis_count = usize::from(u16::from_be_bytes([original[8], original[9]]));
    let axis_size = usize::from(u16::from_be_bytes([original[10], original[11]]));

    let mut matched = std::collections::BTreeSet::new();
    for axis_idx in 0..axis_count {
        let base = axes_offset + axis_idx * axis_size;
        let Some(record) = fvar.get(base..base + 20) else {
            log::warn!("fvar axis record {axis_idx} is out of bounds; stopping axis clipping");
            break;
        };
        let tag: [u8; 4] = record[..4].try_into().unwrap();
        let Some(clip) = clips.get(&tag) else {
            continue;
        };
        matched.insert(tag);

        let read_fixed =
            |bytes: &[u8], at: usize| i32::from_be_bytes(bytes[at..at + 4].try_into().unwrap());
        let mut min = read_fixed(record, 4);
        let mut default = read_fixed(record, 8);
        let mut max = read_fixed(record, 12);

        if let Some(clip_min) = clip.min {
            min = min.max(to_fixed(clip_min));
        }
        if let Some(clip_max) = clip.max {
            max = max.min(to_fixed(clip_max));
        }
        if min > max {
            log::warn!(
                "axis clip for {:?} produces an empty range; leaving the axis unclipped",
                String::from_utf8_lossy(&tag)
            );
            continue;
        }
        if let Some(clip_default) = clip.default {
            default = to_fixed(clip_default);
        }
        default = default.clamp(min, max);

        fvar[base + 4..base + 8].copy_from_slice(&min.to_be_bytes());
        fvar[base + 8..base + 12].copy_from_slice(&default.to_be_bytes());
        fvar[base + 12..base + 16].copy_from_slice(&max.to_be_bytes());
    }

    for tag in clips.keys() {
        if !matched.contains(tag) {
            log::warn!(
                "axis clip for {:?} matches no axis in the font",
                String::from_utf8_lossy(tag)
            );
        }
    }
    fvar
}

#[allow(clippy::cast_possible_truncation)] // axis values are small by construction
fn to_fixed(value: f32) -> i32 {
    (f64::from(value) * 65536.0).round() as i32
}
