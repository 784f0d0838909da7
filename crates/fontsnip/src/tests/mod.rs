use std::{env, io::Write as _, process::Command, sync::OnceLock};

use allsorts::{binary::read::ReadScope, font::MatchingPresentation, font_data::FontData};
use test_casing::{test_casing, Product};

use crate::{
    container,
    font::Outlines,
    subset_font,
    write::{self, write_u16, write_u32},
    ContainerFormat, Flavor, Font, FontSubset, OutlineSubsetter, SubsetError, SubsetErrorKind,
    SubsetOptions, SubsetStrategy, TableSet,
};

pub(crate) fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ---- synthetic font fixtures ----
//
// The TrueType fixture has five glyphs: .notdef (empty), three simple box
// glyphs for 'A'..'C', and a composite glyph for 'D' built from the 'C'
// glyph. The PostScript fixture has .notdef plus charstrings for 'A'..'C'
// exercising global and local subroutines.

fn simple_glyph() -> Vec<u8> {
    let mut glyph = Vec::new();
    write_u16(&mut glyph, 1); // numberOfContours
    for value in [50_i16, 0, 400, 700] {
        glyph.extend_from_slice(&value.to_be_bytes()); // bbox
    }
    write_u16(&mut glyph, 3); // endPtsOfContours
    write_u16(&mut glyph, 0); // instructionLength
    glyph.extend_from_slice(&[0x01; 4]); // on-curve, long coords
    for dx in [50_i16, 0, 350, 0] {
        glyph.extend_from_slice(&dx.to_be_bytes());
    }
    for dy in [0_i16, 700, 0, -700] {
        glyph.extend_from_slice(&dy.to_be_bytes());
    }
    assert_eq!(glyph.len(), 34);
    glyph
}

fn composite_glyph(component: u16) -> Vec<u8> {
    let mut glyph = Vec::new();
    glyph.extend_from_slice(&(-1_i16).to_be_bytes()); // numberOfContours
    for value in [50_i16, 0, 400, 700] {
        glyph.extend_from_slice(&value.to_be_bytes()); // bbox
    }
    write_u16(&mut glyph, 0x0003); // ARG_1_AND_2_ARE_WORDS | ARGS_ARE_XY_VALUES
    write_u16(&mut glyph, component);
    write_u16(&mut glyph, 0); // arg1
    write_u16(&mut glyph, 0); // arg2
    assert_eq!(glyph.len(), 18);
    glyph
}

fn glyf_and_loca() -> (Vec<u8>, Vec<u8>) {
    let mut glyf = Vec::new();
    let mut locations = vec![0_usize, 0]; // .notdef is empty
    for _ in 0..3 {
        glyf.extend_from_slice(&simple_glyph());
        locations.push(glyf.len());
    }
    glyf.extend_from_slice(&composite_glyph(3));
    locations.push(glyf.len());

    let mut loca = Vec::new();
    for location in locations {
        #[allow(clippy::cast_possible_truncation)]
        write_u16(&mut loca, (location / 2) as u16);
    }
    (glyf, loca)
}

fn cmap_format4() -> Vec<u8> {
    let mut cmap = Vec::new();
    write_u16(&mut cmap, 0); // version
    write_u16(&mut cmap, 1); // numTables
    write_u16(&mut cmap, 3); // Windows platform
    write_u16(&mut cmap, 1); // Unicode BMP
    write_u32(&mut cmap, 12); // subtable offset

    write_u16(&mut cmap, 4); // format
    write_u16(&mut cmap, 32); // length
    write_u16(&mut cmap, 0); // language
    write_u16(&mut cmap, 4); // segCountX2
    write_u16(&mut cmap, 4); // searchRange
    write_u16(&mut cmap, 1); // entrySelector
    write_u16(&mut cmap, 0); // rangeShift
    write_u16(&mut cmap, 0x0044); // endCode: 'D'
    write_u16(&mut cmap, 0xFFFF);
    write_u16(&mut cmap, 0); // reserved
    write_u16(&mut cmap, 0x0041); // startCode: 'A'
    write_u16(&mut cmap, 0xFFFF);
    write_u16(&mut cmap, 1_u16.wrapping_sub(0x0041)); // idDelta: 'A' -> glyph 1
    write_u16(&mut cmap, 1);
    write_u16(&mut cmap, 0); // idRangeOffset
    write_u16(&mut cmap, 0);
    cmap
}

/// Byte encoding (format 0) cmap under the legacy Mac Roman platform.
fn cmap_format0() -> Vec<u8> {
    let mut cmap = Vec::new();
    write_u16(&mut cmap, 0); // version
    write_u16(&mut cmap, 1); // numTables
    write_u16(&mut cmap, 1); // Macintosh platform
    write_u16(&mut cmap, 0); // Roman encoding
    write_u32(&mut cmap, 12); // subtable offset

    write_u16(&mut cmap, 0); // format
    write_u16(&mut cmap, 262); // length
    write_u16(&mut cmap, 0); // language
    let mut glyph_ids = [0_u8; 256];
    for (idx, glyph_id) in (0x41..=0x44).zip(1..) {
        glyph_ids[idx] = glyph_id;
    }
    cmap.extend_from_slice(&glyph_ids);
    cmap
}

/// Trimmed table (format 6) cmap covering 'A'..'D'.
fn cmap_format6() -> Vec<u8> {
    let mut cmap = Vec::new();
    write_u16(&mut cmap, 0); // version
    write_u16(&mut cmap, 1); // numTables
    write_u16(&mut cmap, 1); // Macintosh platform
    write_u16(&mut cmap, 0); // Roman encoding
    write_u32(&mut cmap, 12); // subtable offset

    write_u16(&mut cmap, 6); // format
    write_u16(&mut cmap, 18); // length
    write_u16(&mut cmap, 0); // language
    write_u16(&mut cmap, 0x0041); // firstCode
    write_u16(&mut cmap, 4); // entryCount
    for glyph_id in 1..=4 {
        write_u16(&mut cmap, glyph_id);
    }
    cmap
}

/// Format 12 cmap mapping 'A'..'D' to glyphs 1..4 and U+10000 to glyph 2.
fn cmap_format12() -> Vec<u8> {
    let mut cmap = Vec::new();
    write_u16(&mut cmap, 0); // version
    write_u16(&mut cmap, 1); // numTables
    write_u16(&mut cmap, 3); // Windows platform
    write_u16(&mut cmap, 10); // Unicode full repertoire
    write_u32(&mut cmap, 12); // subtable offset

    write_u16(&mut cmap, 12); // format
    write_u16(&mut cmap, 0); // reserved
    write_u32(&mut cmap, 16 + 12 * 2); // length
    write_u32(&mut cmap, 0); // language
    write_u32(&mut cmap, 2); // numGroups
    for (start, end, glyph) in [(0x41_u32, 0x44_u32, 1_u32), (0x1_0000, 0x1_0000, 2)] {
        write_u32(&mut cmap, start);
        write_u32(&mut cmap, end);
        write_u32(&mut cmap, glyph);
    }
    cmap
}

fn head_table() -> Vec<u8> {
    let mut head = Vec::new();
    write_u32(&mut head, 0x0001_0000); // version
    write_u32(&mut head, 0x0001_0000); // fontRevision
    write_u32(&mut head, 0); // checkSumAdjustment
    write_u32(&mut head, 0x5F0F_3CF5); // magicNumber
    write_u16(&mut head, 0); // flags
    write_u16(&mut head, 1000); // unitsPerEm
    head.extend_from_slice(&[0; 16]); // created, modified
    for value in [0_i16, 0, 500, 700] {
        head.extend_from_slice(&value.to_be_bytes()); // bbox
    }
    write_u16(&mut head, 0); // macStyle
    write_u16(&mut head, 8); // lowestRecPPEM
    head.extend_from_slice(&2_i16.to_be_bytes()); // fontDirectionHint
    write_u16(&mut head, 0); // indexToLocFormat: short
    write_u16(&mut head, 0); // glyphDataFormat
    assert_eq!(head.len(), 54);
    head
}

pub(crate) fn hhea_table(num_h_metrics: u16) -> Vec<u8> {
    let mut hhea = Vec::new();
    write_u32(&mut hhea, 0x0001_0000); // version
    hhea.extend_from_slice(&800_i16.to_be_bytes()); // ascender
    hhea.extend_from_slice(&(-200_i16).to_be_bytes()); // descender
    hhea.extend_from_slice(&0_i16.to_be_bytes()); // lineGap
    write_u16(&mut hhea, 500); // advanceWidthMax
    hhea.extend_from_slice(&0_i16.to_be_bytes()); // minLeftSideBearing
    hhea.extend_from_slice(&0_i16.to_be_bytes()); // minRightSideBearing
    hhea.extend_from_slice(&400_i16.to_be_bytes()); // xMaxExtent
    hhea.extend_from_slice(&1_i16.to_be_bytes()); // caretSlopeRise
    hhea.extend_from_slice(&0_i16.to_be_bytes()); // caretSlopeRun
    hhea.extend_from_slice(&0_i16.to_be_bytes()); // caretOffset
    hhea.extend_from_slice(&[0; 8]); // reserved
    hhea.extend_from_slice(&0_i16.to_be_bytes()); // metricDataFormat
    write_u16(&mut hhea, num_h_metrics);
    assert_eq!(hhea.len(), 36);
    hhea
}

fn hmtx_table(num_glyphs: u16) -> Vec<u8> {
    let mut hmtx = Vec::new();
    for _ in 0..num_glyphs {
        write_u16(&mut hmtx, 500); // advanceWidth
        write_u16(&mut hmtx, 50); // leftSideBearing
    }
    hmtx
}

fn maxp_table(version: u32, num_glyphs: u16) -> Vec<u8> {
    let mut maxp = Vec::new();
    write_u32(&mut maxp, version);
    write_u16(&mut maxp, num_glyphs);
    if version == 0x0001_0000 {
        maxp.extend_from_slice(&[0; 26]); // profile upper bounds, unused here
    }
    maxp
}

fn os2_table() -> Vec<u8> {
    let mut os2 = Vec::new();
    write_u16(&mut os2, 4); // version
    os2.extend_from_slice(&500_i16.to_be_bytes()); // xAvgCharWidth
    write_u16(&mut os2, 400); // usWeightClass
    write_u16(&mut os2, 5); // usWidthClass
    write_u16(&mut os2, 0); // fsType
    os2.extend_from_slice(&[0; 20]); // subscript/superscript/strikeout metrics
    os2.extend_from_slice(&0_i16.to_be_bytes()); // sFamilyClass
    os2.extend_from_slice(&[2, 0, 5, 3, 0, 0, 0, 0, 0, 0]); // panose
    os2.extend_from_slice(&[0; 16]); // unicode ranges
    os2.extend_from_slice(b"TEST"); // achVendID
    write_u16(&mut os2, 0x40); // fsSelection: REGULAR
    write_u16(&mut os2, 0x41); // usFirstCharIndex
    write_u16(&mut os2, 0x44); // usLastCharIndex
    os2.extend_from_slice(&800_i16.to_be_bytes()); // sTypoAscender
    os2.extend_from_slice(&(-200_i16).to_be_bytes()); // sTypoDescender
    os2.extend_from_slice(&0_i16.to_be_bytes()); // sTypoLineGap
    write_u16(&mut os2, 800); // usWinAscent
    write_u16(&mut os2, 200); // usWinDescent
    os2.extend_from_slice(&[0; 8]); // codepage ranges
    os2.extend_from_slice(&500_i16.to_be_bytes()); // sxHeight
    os2.extend_from_slice(&700_i16.to_be_bytes()); // sCapHeight
    write_u16(&mut os2, 0); // usDefaultChar
    write_u16(&mut os2, 0x41); // usBreakChar
    write_u16(&mut os2, 0); // usMaxContext
    assert_eq!(os2.len(), 96);
    os2
}

fn post_table() -> Vec<u8> {
    let mut post = Vec::new();
    write_u32(&mut post, 0x0003_0000); // version
    write_u32(&mut post, 0); // italicAngle
    post.extend_from_slice(&(-75_i16).to_be_bytes()); // underlinePosition
    post.extend_from_slice(&50_i16.to_be_bytes()); // underlineThickness
    write_u32(&mut post, 0); // isFixedPitch
    post.extend_from_slice(&[0; 16]); // memory usage hints
    assert_eq!(post.len(), 32);
    post
}

fn utf16be(text: &str) -> Vec<u8> {
    text.encode_utf16()
        .flat_map(|unit| unit.to_be_bytes())
        .collect()
}

fn name_table() -> Vec<u8> {
    let entries: [(u16, &str); 8] = [
        (0, "Copyright 2024 Nobody"),
        (1, "Snip Sans"),
        (2, "Regular"),
        (3, "SnipSans:2024"),
        (4, "Snip Sans Regular"),
        (5, "Version 1.0"),
        (6, "SnipSans-Regular"),
        (13, "Licensed to no one"),
    ];
    let mut name = Vec::new();
    write_u16(&mut name, 0); // format
    write_u16(&mut name, entries.len() as u16);
    write_u16(&mut name, 6 + 12 * entries.len() as u16); // stringOffset
    let mut strings = Vec::new();
    for (name_id, text) in entries {
        let encoded = utf16be(text);
        write_u16(&mut name, 3); // Windows platform
        write_u16(&mut name, 1); // Unicode BMP
        write_u16(&mut name, 0x0409); // en-US
        write_u16(&mut name, name_id);
        write_u16(&mut name, encoded.len() as u16);
        write_u16(&mut name, strings.len() as u16);
        strings.extend_from_slice(&encoded);
    }
    name.extend_from_slice(&strings);
    name
}

fn fvar_table() -> Vec<u8> {
    let mut fvar = Vec::new();
    write_u16(&mut fvar, 1); // majorVersion
    write_u16(&mut fvar, 0); // minorVersion
    write_u16(&mut fvar, 16); // axesArrayOffset
    write_u16(&mut fvar, 2); // reserved
    write_u16(&mut fvar, 2); // axisCount
    write_u16(&mut fvar, 20); // axisSize
    write_u16(&mut fvar, 0); // instanceCount
    write_u16(&mut fvar, 12); // instanceSize
    for (tag, min, default, max, name_id) in [
        (*b"wght", 100_i32, 400, 900, 256_u16),
        (*b"wdth", 75, 100, 125, 257),
    ] {
        fvar.extend_from_slice(&tag);
        write_u32(&mut fvar, (min << 16) as u32);
        write_u32(&mut fvar, (default << 16) as u32);
        write_u32(&mut fvar, (max << 16) as u32);
        write_u16(&mut fvar, 0); // flags
        write_u16(&mut fvar, name_id);
    }
    fvar
}

/// Lays the tables out as an sfnt file. Directory checksums are left zero;
/// they are advisory on input.
pub(crate) fn assemble_sfnt(version: u32, tables: &[([u8; 4], Vec<u8>)]) -> Vec<u8> {
    let mut offsets = Vec::new();
    let mut offset = 12 + 16 * tables.len();
    for (_, data) in tables {
        offsets.push(offset);
        offset += data.len() + (4 - data.len() % 4) % 4;
    }

    let mut buffer = Vec::with_capacity(offset);
    write_u32(&mut buffer, version);
    write_u16(&mut buffer, tables.len() as u16);
    write_u16(&mut buffer, 16); // searchRange: unused on input
    write_u16(&mut buffer, 0); // entrySelector
    write_u16(&mut buffer, 0); // rangeShift

    let mut directory: Vec<_> = tables.iter().zip(&offsets).collect();
    directory.sort_by_key(|((tag, _), _)| *tag);
    for ((tag, data), &offset) in directory {
        buffer.extend_from_slice(tag);
        write_u32(&mut buffer, 0); // checksum
        write_u32(&mut buffer, offset as u32);
        write_u32(&mut buffer, data.len() as u32);
    }
    for (_, data) in tables {
        buffer.extend_from_slice(data);
        while buffer.len() % 4 != 0 {
            buffer.push(0);
        }
    }
    buffer
}

fn truetype_font(cmap: Vec<u8>, fvar: Option<Vec<u8>>) -> Vec<u8> {
    let (glyf, loca) = glyf_and_loca();
    let mut tables = vec![
        (*b"cmap", cmap),
        (*b"glyf", glyf),
        (*b"head", head_table()),
        (*b"hhea", hhea_table(5)),
        (*b"hmtx", hmtx_table(5)),
        (*b"loca", loca),
        (*b"maxp", maxp_table(0x0001_0000, 5)),
        (*b"name", name_table()),
        (*b"OS/2", os2_table()),
        (*b"post", post_table()),
    ];
    if let Some(fvar) = fvar {
        tables.push((*b"fvar", fvar));
    }
    assemble_sfnt(0x0001_0000, &tables)
}

// ---- CFF fixture ----

fn cff_index(objects: &[&[u8]]) -> Vec<u8> {
    let mut index = Vec::new();
    write_u16(&mut index, objects.len() as u16);
    if objects.is_empty() {
        return index;
    }
    index.push(1); // offSize
    let mut offset = 1_usize;
    index.push(offset as u8);
    for object in objects {
        offset += object.len();
        index.push(offset as u8);
    }
    for object in objects {
        index.extend_from_slice(object);
    }
    index
}

fn cff_offset_operand(buffer: &mut Vec<u8>, value: u32) {
    buffer.push(29);
    buffer.extend_from_slice(&value.to_be_bytes());
}

/// Four glyphs: `.notdef`, 'A' (calls global subr 0), 'B' (calls local subr
/// 0), 'C' (self-contained). Each subroutine index also has one unused
/// entry to exercise pruning.
fn cff_table() -> Vec<u8> {
    let header = [1_u8, 0, 4, 4];
    let name_index = cff_index(&[&b"SnipSerif"[..]]);
    let string_index = cff_index(&[]);
    let global_subrs = cff_index(&[&[0x8b, 0x8b, 0x15, 0x0b][..], &[0x8b, 0x0b][..]]);
    // SIDs 34..36 are the standard strings "A".."C".
    let charset = {
        let mut charset = vec![0_u8]; // format
        for sid in [34_u16, 35, 36] {
            charset.extend_from_slice(&sid.to_be_bytes());
        }
        charset
    };
    let charstrings = cff_index(&[
        &[0x0e][..],
        &[0x20, 0x1d, 0x0e][..], // -107 callgsubr endchar
        &[0x20, 0x0a, 0x0e][..], // -107 callsubr endchar
        &[0x8b, 0x8b, 0x15, 0x0e][..],
    ]);
    let private_dict = {
        let mut private = Vec::new();
        cff_offset_operand(&mut private, 6); // Subrs follows the dict
        private.push(19);
        assert_eq!(private.len(), 6);
        private
    };
    let local_subrs = cff_index(&[&[0x8b, 0x8b, 0x15, 0x0b][..], &[0x8b, 0x0b][..]]);

    // Top DICT operands use fixed-width offsets, so its size is stable.
    let top_dict_len = 6 + 6 + 11;
    let top_index_len = 2 + 1 + 2 + top_dict_len;
    let mut offset = header.len() + name_index.len() + top_index_len + string_index.len()
        + global_subrs.len();
    let charset_offset = offset;
    offset += charset.len();
    let charstrings_offset = offset;
    offset += charstrings.len();
    let private_offset = offset;

    let mut top_dict = Vec::new();
    cff_offset_operand(&mut top_dict, charset_offset as u32);
    top_dict.push(15);
    cff_offset_operand(&mut top_dict, charstrings_offset as u32);
    top_dict.push(17);
    cff_offset_operand(&mut top_dict, private_dict.len() as u32);
    cff_offset_operand(&mut top_dict, private_offset as u32);
    top_dict.push(18);
    assert_eq!(top_dict.len(), top_dict_len);

    let mut cff = Vec::new();
    cff.extend_from_slice(&header);
    cff.extend_from_slice(&name_index);
    cff.extend_from_slice(&cff_index(&[top_dict.as_slice()]));
    cff.extend_from_slice(&string_index);
    cff.extend_from_slice(&global_subrs);
    cff.extend_from_slice(&charset);
    cff.extend_from_slice(&charstrings);
    cff.extend_from_slice(&private_dict);
    cff.extend_from_slice(&local_subrs);
    cff
}

fn postscript_font() -> Vec<u8> {
    let cmap = {
        // Same layout as the TrueType fixture, minus the 'D' mapping.
        let mut cmap = Vec::new();
        write_u16(&mut cmap, 0);
        write_u16(&mut cmap, 1);
        write_u16(&mut cmap, 3);
        write_u16(&mut cmap, 1);
        write_u32(&mut cmap, 12);
        write_u16(&mut cmap, 4);
        write_u16(&mut cmap, 32);
        write_u16(&mut cmap, 0);
        write_u16(&mut cmap, 4);
        write_u16(&mut cmap, 4);
        write_u16(&mut cmap, 1);
        write_u16(&mut cmap, 0);
        write_u16(&mut cmap, 0x0043); // endCode: 'C'
        write_u16(&mut cmap, 0xFFFF);
        write_u16(&mut cmap, 0);
        write_u16(&mut cmap, 0x0041);
        write_u16(&mut cmap, 0xFFFF);
        write_u16(&mut cmap, 1_u16.wrapping_sub(0x0041));
        write_u16(&mut cmap, 1);
        write_u16(&mut cmap, 0);
        write_u16(&mut cmap, 0);
        cmap
    };
    assemble_sfnt(
        0x4F54_544F,
        &[
            (*b"CFF ", cff_table()),
            (*b"cmap", cmap),
            (*b"head", head_table()),
            (*b"hhea", hhea_table(4)),
            (*b"hmtx", hmtx_table(4)),
            (*b"maxp", maxp_table(0x0000_5000, 4)),
            (*b"name", name_table()),
            (*b"OS/2", os2_table()),
            (*b"post", post_table()),
        ],
    )
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum TestFont {
    Basic,
    Coverage12,
}

impl TestFont {
    pub(crate) fn bytes(self) -> Vec<u8> {
        match self {
            Self::Basic => truetype_font(cmap_format4(), None),
            Self::Coverage12 => truetype_font(cmap_format12(), None),
        }
    }
}

pub(crate) const FONTS: [TestFont; 2] = [TestFont::Basic, TestFont::Coverage12];

#[derive(Debug, Clone, Copy)]
pub(crate) struct TestChars(pub(crate) &'static str);

pub(crate) const SUBSET_CHARS: [TestChars; 5] = [
    TestChars("A"),
    TestChars("AB"),
    TestChars("ABCD"),
    TestChars("BD"),
    TestChars("DA"),
];

// ---- external validation ----

#[derive(Debug)]
struct OpenTypeSanitizer {
    path: Option<String>,
}

impl Default for OpenTypeSanitizer {
    fn default() -> Self {
        let Ok(path) = env::var("OTS_SANITIZER") else {
            return Self { path: None };
        };
        let output = Command::new(&path)
            .arg("--version")
            .output()
            .unwrap_or_else(|err| {
                panic!("failed getting version for ots-sanitize at {path}: {err}");
            });
        assert!(
            output.status.success(),
            "failed getting version for ots-sanitize at {path}: non-zero exit code"
        );
        let version = String::from_utf8(output.stdout).unwrap_or_else(|err| {
            panic!("failed getting version for ots-sanitize at {path}: {err}");
        });
        println!("ots-sanitize version: {version}");
        Self { path: Some(path) }
    }
}

impl OpenTypeSanitizer {
    fn get() -> &'static Self {
        static SANITIZER: OnceLock<OpenTypeSanitizer> = OnceLock::new();
        SANITIZER.get_or_init(Self::default)
    }

    fn validate(&self, content: &[u8]) {
        let Some(path) = &self.path else {
            println!("OTS_SANITIZER env var is missing; skipping checks");
            return;
        };

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.as_file_mut().write_all(content).unwrap();
        file.as_file_mut().flush().unwrap();
        let file_path = file.into_temp_path();

        let output = Command::new(path)
            .arg(&file_path)
            .output()
            .expect("failed running ots-sanitize");
        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            panic!("ots-sanitize failed:\n--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}");
        }
    }
}

/// Cross-checks emitted bytes with an independent parser and (when
/// configured) the external sanitizer.
pub(crate) fn assert_valid_font(raw: &[u8], expected_chars: &str) {
    let font_file = ReadScope::new(raw).read::<FontData>().unwrap();
    let font_provider = font_file.table_provider(0).unwrap();
    let mut font = allsorts::Font::new(font_provider).unwrap();
    for ch in expected_chars.chars() {
        let (glyph_id, _) = font.lookup_glyph_index(ch, MatchingPresentation::NotRequired, None);
        assert_ne!(glyph_id, 0, "no glyph for {ch:?}");
    }

    OpenTypeSanitizer::get().validate(raw);
}

// ---- end-to-end tests ----

#[test]
fn subsetting_to_requested_characters() {
    init_logs();
    let font = TestFont::Basic.bytes();
    let result = subset_font(&font, "AB", &SubsetOptions::default()).unwrap();

    assert!(result.missing_characters.is_empty());
    assert_eq!(result.retained_character_count, 2);
    assert_eq!(result.actual_format, ContainerFormat::Sfnt);

    let subset = Font::parse(&result.data).unwrap();
    assert_eq!(subset.num_glyphs(), 3); // .notdef, A, B
    assert_eq!(subset.map_char('A').unwrap(), 1);
    assert_eq!(subset.map_char('B').unwrap(), 2);
    assert_eq!(subset.map_char('C').unwrap(), 0);
    assert_valid_font(&result.data, "AB");
}

#[test]
fn missing_characters_are_reported_not_fatal() {
    init_logs();
    let font = TestFont::Basic.bytes();
    let result = subset_font(&font, "AZ", &SubsetOptions::default()).unwrap();

    assert_eq!(result.missing_characters, vec!['Z']);
    assert_eq!(result.retained_character_count, 1);

    let subset = Font::parse(&result.data).unwrap();
    assert_eq!(subset.num_glyphs(), 2);
    assert_eq!(subset.map_char('Z').unwrap(), 0);
    assert_valid_font(&result.data, "A");
}

#[test]
fn empty_character_set_is_rejected() {
    let font = TestFont::Basic.bytes();
    let err = subset_font(&font, "", &SubsetOptions::default()).unwrap_err();
    assert_eq!(err.kind(), SubsetErrorKind::NoCharactersSpecified);
}

#[test]
fn unknown_signature_is_rejected() {
    let err = subset_font(b"not a font at all", "A", &SubsetOptions::default()).unwrap_err();
    assert_eq!(err.kind(), SubsetErrorKind::UnsupportedFormat);
}

#[test]
fn font_collections_are_rejected() {
    let mut font = TestFont::Basic.bytes();
    font[..4].copy_from_slice(b"ttcf");
    let err = subset_font(&font, "A", &SubsetOptions::default()).unwrap_err();
    assert_eq!(err.kind(), SubsetErrorKind::UnsupportedFormat);
}

#[test]
fn truncated_font_is_rejected() {
    let font = TestFont::Basic.bytes();
    let err = subset_font(&font[..font.len() - 8], "A", &SubsetOptions::default()).unwrap_err();
    assert_eq!(err.kind(), SubsetErrorKind::TruncatedFile);
}

#[test]
fn font_without_usable_cmap_is_rejected() {
    init_logs();
    // A lone format 2 (high-byte mapping) subtable is skipped as unsupported.
    let mut cmap = Vec::new();
    write_u16(&mut cmap, 0); // version
    write_u16(&mut cmap, 1); // numTables
    write_u16(&mut cmap, 3); // Windows platform
    write_u16(&mut cmap, 1); // Unicode BMP
    write_u32(&mut cmap, 12); // subtable offset
    write_u16(&mut cmap, 2); // format
    write_u16(&mut cmap, 6); // length
    write_u16(&mut cmap, 0); // language
    let font = truetype_font(cmap, None);
    let err = subset_font(&font, "A", &SubsetOptions::default()).unwrap_err();
    assert_eq!(err.kind(), SubsetErrorKind::NoUsableCmap);
}

#[test]
fn legacy_byte_encoding_cmap_is_supported() {
    init_logs();
    let font = truetype_font(cmap_format0(), None);
    let result = subset_font(&font, "AD", &SubsetOptions::default()).unwrap();
    assert!(result.missing_characters.is_empty());

    let subset = Font::parse(&result.data).unwrap();
    // .notdef, A, D and D's component C.
    assert_eq!(subset.num_glyphs(), 4);
    assert_valid_font(&result.data, "AD");
}

#[test]
fn legacy_trimmed_cmap_is_supported() {
    init_logs();
    let font = truetype_font(cmap_format6(), None);
    let result = subset_font(&font, "ABX", &SubsetOptions::default()).unwrap();
    assert_eq!(result.missing_characters, vec!['X']);

    let subset = Font::parse(&result.data).unwrap();
    assert_eq!(subset.map_char('A').unwrap(), 1);
    assert_eq!(subset.map_char('B').unwrap(), 2);
    assert_valid_font(&result.data, "AB");
}

#[test]
fn composite_components_are_retained() {
    init_logs();
    let font = TestFont::Basic.bytes();
    let result = subset_font(&font, "D", &SubsetOptions::default()).unwrap();

    let subset = Font::parse(&result.data).unwrap();
    // 'C' has no cmap entry in the subset but its glyph must survive as a
    // component of 'D'.
    assert_eq!(subset.num_glyphs(), 3);
    let composite_idx = subset.map_char('D').unwrap();
    assert_eq!(composite_idx, 2);
    let glyph = subset.glyph(composite_idx).unwrap();
    assert_eq!(glyph.inner.component_ids(), vec![1]);
    assert_valid_font(&result.data, "D");
}

#[test]
fn rewrite_strategy_is_pluggable() {
    use std::cell::Cell;

    /// Wraps the production strategy and records that it was used; only the
    /// seam itself is under test here.
    struct Recording<'a>(&'a Cell<bool>);

    impl SubsetStrategy for Recording<'_> {
        fn rewrite(
            &self,
            subset: &FontSubset<'_>,
            options: &SubsetOptions,
        ) -> Result<TableSet, SubsetError> {
            self.0.set(true);
            OutlineSubsetter.rewrite(subset, options)
        }
    }

    let bytes = TestFont::Basic.bytes();
    let font = Font::parse(&bytes).unwrap();
    let subset = FontSubset::new(font, "AB".chars()).unwrap();
    let called = Cell::new(false);
    let tables = Recording(&called)
        .rewrite(&subset, &SubsetOptions::default())
        .unwrap();
    assert!(called.get());
    Font::parse(&tables.to_sfnt().unwrap()).unwrap();
}

#[test]
fn closure_is_monotonic() {
    let bytes = TestFont::Basic.bytes();
    let mut previous = 0;
    for chars in ["A", "AB", "ABD"] {
        let font = Font::parse(&bytes).unwrap();
        let subset = FontSubset::new(font, chars.chars()).unwrap();
        assert!(subset.num_glyphs() >= previous, "closure shrank for {chars:?}");
        previous = subset.num_glyphs();
    }
}

#[test]
fn subsetting_is_idempotent() {
    init_logs();
    let font = TestFont::Basic.bytes();
    let first = subset_font(&font, "AB", &SubsetOptions::default()).unwrap();
    let second = subset_font(&first.data, "AB", &SubsetOptions::default()).unwrap();

    assert!(second.missing_characters.is_empty());
    assert_eq!(first.data, second.data);
}

#[test]
fn full_charset_round_trip_keeps_all_glyphs() {
    init_logs();
    let bytes = TestFont::Basic.bytes();
    let font = Font::parse(&bytes).unwrap();
    let all_chars: String = font.charset().into_iter().collect();
    assert_eq!(all_chars, "ABCD");

    let result = subset_font(&bytes, &all_chars, &SubsetOptions::default()).unwrap();
    assert!(result.missing_characters.is_empty());

    let subset = Font::parse(&result.data).unwrap();
    assert_eq!(subset.num_glyphs(), 5);
    assert_eq!(subset.charset(), font.charset());
    // Advance widths survive the rewrite.
    for glyph_idx in 0..subset.num_glyphs() {
        assert_eq!(subset.hmtx.advance_and_lsb(glyph_idx).unwrap(), (500, 50));
    }
}

#[test]
fn output_checksums_satisfy_the_adjustment_identity() {
    let font = TestFont::Basic.bytes();
    let result = subset_font(&font, "ABCD", &SubsetOptions::default()).unwrap();
    assert_eq!(write::checksum(&result.data), Font::SFNT_CHECKSUM);
}

#[test_casing(10, Product((FONTS, SUBSET_CHARS)))]
#[test]
fn subsetting_fixture_fonts(font: TestFont, chars: TestChars) {
    init_logs();
    let bytes = font.bytes();
    let result = subset_font(&bytes, chars.0, &SubsetOptions::default()).unwrap();

    assert!(result.missing_characters.is_empty());
    assert!(result.compression_rate >= 0.0 && result.compression_rate <= 100.0);
    let subset = Font::parse(&result.data).unwrap();
    assert!(subset.num_glyphs() >= 2); // .notdef plus at least one glyph
    assert_eq!(write::checksum(&result.data), Font::SFNT_CHECKSUM);
    assert_valid_font(&result.data, chars.0);
}

#[test]
fn supplementary_characters_get_a_coverage_subtable() {
    init_logs();
    let bytes = TestFont::Coverage12.bytes();
    let text = "A\u{10000}";
    let result = subset_font(&bytes, text, &SubsetOptions::default()).unwrap();
    assert!(result.missing_characters.is_empty());

    let subset = Font::parse(&result.data).unwrap();
    assert_ne!(subset.map_char('\u{10000}').unwrap(), 0);
    assert_ne!(subset.map_char('A').unwrap(), 0);

    // The emitted cmap carries both a BMP and a full-repertoire subtable.
    let (_, tables) = container::parse_sfnt_tables(&result.data).unwrap();
    let cmap = tables
        .iter()
        .find(|table| &table.tag.0 == b"cmap")
        .unwrap()
        .data;
    assert_eq!(u16::from_be_bytes([cmap[2], cmap[3]]), 2);
    assert_valid_font(&result.data, text);
}

#[test]
fn metadata_reduction_keeps_essential_names_only() {
    init_logs();
    let font = TestFont::Basic.bytes();
    let options = SubsetOptions {
        preserve_metadata: false,
        ..SubsetOptions::default()
    };
    let result = subset_font(&font, "A", &options).unwrap();

    let subset = Font::parse(&result.data).unwrap();
    let ids: Vec<u16> = subset.name.records.iter().map(|record| record.name_id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(subset.info().family_name.as_deref(), Some("Snip Sans"));
}

#[test]
fn metadata_is_preserved_by_default() {
    let font = TestFont::Basic.bytes();
    let result = subset_font(&font, "A", &SubsetOptions::default()).unwrap();
    let subset = Font::parse(&result.data).unwrap();
    assert!(subset.name.records.iter().any(|record| record.name_id == 13));
}

#[test]
fn variation_axes_are_clipped() {
    init_logs();
    let bytes = truetype_font(cmap_format4(), Some(fvar_table()));
    let mut options = SubsetOptions::default();
    options.variation_axes.insert(
        *b"wght",
        crate::AxisClip {
            min: Some(300.0),
            max: Some(700.0),
            default: Some(500.0),
        },
    );
    let result = subset_font(&bytes, "A", &options).unwrap();

    let (_, tables) = container::parse_sfnt_tables(&result.data).unwrap();
    let fvar = tables
        .iter()
        .find(|table| &table.tag.0 == b"fvar")
        .unwrap()
        .data;
    let axis = &fvar[16..36];
    assert_eq!(&axis[..4], b"wght");
    assert_eq!(i32::from_be_bytes(axis[4..8].try_into().unwrap()), 300 << 16);
    assert_eq!(i32::from_be_bytes(axis[8..12].try_into().unwrap()), 500 << 16);
    assert_eq!(i32::from_be_bytes(axis[12..16].try_into().unwrap()), 700 << 16);
    // The second axis is untouched.
    let axis = &fvar[36..56];
    assert_eq!(&axis[..4], b"wdth");
    assert_eq!(i32::from_be_bytes(axis[8..12].try_into().unwrap()), 100 << 16);
}

#[test]
fn font_info_reports_names_and_metrics() {
    let bytes = TestFont::Basic.bytes();
    let font = Font::parse(&bytes).unwrap();
    let info = font.info();
    assert_eq!(info.family_name.as_deref(), Some("Snip Sans"));
    assert_eq!(info.style_name.as_deref(), Some("Regular"));
    assert_eq!(info.units_per_em, 1000);
    assert_eq!(info.ascender, 800);
    assert_eq!(info.descender, -200);
    assert_eq!(info.glyph_count, 5);
    assert_eq!(info.flavor, Flavor::TrueType);
}

// ---- container tests ----

#[test]
fn woff_round_trips_byte_exactly() {
    init_logs();
    let font = TestFont::Basic.bytes();
    let sfnt = subset_font(&font, "ABCD", &SubsetOptions::default())
        .unwrap()
        .data;
    let woff = container::woff::encode(&sfnt).unwrap();
    assert_eq!(&woff[..4], b"wOFF");
    assert_eq!(container::woff::decode(&woff).unwrap(), sfnt);
    assert_valid_font(&woff, "ABCD");
}

#[test]
fn woff2_round_trips_byte_exactly() {
    init_logs();
    let font = TestFont::Basic.bytes();
    let sfnt = subset_font(&font, "ABCD", &SubsetOptions::default())
        .unwrap()
        .data;
    let woff2 = container::woff2::encode(&sfnt).unwrap();
    assert_eq!(&woff2[..4], b"wOF2");
    assert_eq!(container::woff2::decode(&woff2).unwrap(), sfnt);
    assert_valid_font(&woff2, "ABCD");
}

#[test_casing(2, [ContainerFormat::Woff, ContainerFormat::Woff2])]
#[test]
fn web_container_output_is_readable_input(output_format: ContainerFormat) {
    init_logs();
    let font = TestFont::Basic.bytes();
    let options = SubsetOptions {
        output_format,
        ..SubsetOptions::default()
    };
    let result = subset_font(&font, "AB", &options).unwrap();
    assert_eq!(result.actual_format, output_format);

    // The emitted container is itself accepted as subsetting input.
    let reparsed = subset_font(&result.data, "AB", &SubsetOptions::default()).unwrap();
    assert!(reparsed.missing_characters.is_empty());
    assert_valid_font(&result.data, "AB");
}

#[test]
fn woff_with_wrong_declared_length_is_rejected() {
    let font = TestFont::Basic.bytes();
    let sfnt = subset_font(&font, "A", &SubsetOptions::default()).unwrap().data;
    let mut woff = container::woff::encode(&sfnt).unwrap();
    woff.truncate(woff.len() - 4);
    let err = container::woff::decode(&woff).unwrap_err();
    assert_eq!(err.kind(), SubsetErrorKind::CorruptContainer);
}

// ---- CFF tests ----

#[test]
fn subsetting_postscript_outlines() {
    init_logs();
    let bytes = postscript_font();
    let result = subset_font(&bytes, "AB", &SubsetOptions::default()).unwrap();
    assert!(result.missing_characters.is_empty());

    let subset = Font::parse(&result.data).unwrap();
    assert_eq!(subset.flavor(), Flavor::Cff);
    assert_eq!(subset.num_glyphs(), 3);
    assert_eq!(subset.map_char('A').unwrap(), 1);
    assert_eq!(subset.map_char('B').unwrap(), 2);

    let Outlines::Cff(cff) = &subset.outlines else {
        panic!("expected CFF outlines");
    };
    assert_eq!(cff.charset, vec![0, 34, 35]);
    assert_eq!(cff.charstrings.get(1), Some(&[0x20, 0x1d, 0x0e][..]));
    // Subroutine 0 is reachable from 'A'/'B'; subroutine 1 is pruned to a
    // bare return in both indices.
    assert_eq!(cff.global_subrs.get(0), Some(&[0x8b, 0x8b, 0x15, 0x0b][..]));
    assert_eq!(cff.global_subrs.get(1), Some(&[0x0b][..]));
    let private = cff.private.as_ref().unwrap();
    assert_eq!(private.local_subrs.get(0), Some(&[0x8b, 0x8b, 0x15, 0x0b][..]));
    assert_eq!(private.local_subrs.get(1), Some(&[0x0b][..]));
    assert_valid_font(&result.data, "AB");
}

#[test]
fn unreferenced_subroutine_indices_collapse() {
    init_logs();
    let bytes = postscript_font();
    let result = subset_font(&bytes, "C", &SubsetOptions::default()).unwrap();

    let subset = Font::parse(&result.data).unwrap();
    let Outlines::Cff(cff) = &subset.outlines else {
        panic!("expected CFF outlines");
    };
    assert_eq!(subset.num_glyphs(), 2);
    assert_eq!(cff.global_subrs.len(), 0);
    let private = cff.private.as_ref().unwrap();
    assert_eq!(private.local_subrs.len(), 0);
    assert_eq!(cff.charset, vec![0, 36]);
}
