//! OpenType parsing logic: table directory, metric tables and the cursor
//! all decoders are built on.

use core::{fmt, ops};

pub(crate) use self::{
    cff::CffTable,
    cmap::CmapTable,
    glyph::{Glyph, GlyphWithMetrics},
    name::NameTable,
};
use crate::errors::{MapError, ParseError, ParseErrorKind};

pub(crate) mod cff;
pub(crate) mod cmap;
pub(crate) mod glyph;
pub(crate) mod name;

/// 4-byte tag identifying an sfnt table.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableTag(pub [u8; 4]);

impl TableTag {
    pub(crate) const CMAP: Self = Self(*b"cmap");
    pub(crate) const HEAD: Self = Self(*b"head");
    pub(crate) const HHEA: Self = Self(*b"hhea");
    pub(crate) const HMTX: Self = Self(*b"hmtx");
    pub(crate) const MAXP: Self = Self(*b"maxp");
    pub(crate) const NAME: Self = Self(*b"name");
    pub(crate) const OS2: Self = Self(*b"OS/2");
    pub(crate) const POST: Self = Self(*b"post");
    pub(crate) const LOCA: Self = Self(*b"loca");
    pub(crate) const GLYF: Self = Self(*b"glyf");
    pub(crate) const CFF: Self = Self(*b"CFF ");
    pub(crate) const CVT: Self = Self(*b"cvt ");
    pub(crate) const FPGM: Self = Self(*b"fpgm");
    pub(crate) const PREP: Self = Self(*b"prep");
    pub(crate) const GASP: Self = Self(*b"gasp");
    pub(crate) const FVAR: Self = Self(*b"fvar");
}

impl fmt::Display for TableTag {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &byte in &self.0 {
            if byte.is_ascii_graphic() || byte == b' ' {
                write!(formatter, "{}", char::from(byte))?;
            } else {
                write!(formatter, "\\x{byte:02x}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for TableTag {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "TableTag({self})")
    }
}

/// Bounds-checked big-endian reader over a borrowed byte buffer.
///
/// Carries the absolute offset of its first byte and (optionally) the table
/// it was derived from, so that errors point into the original font file.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Cursor<'a> {
    pub(crate) bytes: &'a [u8],
    offset: usize,
    table: Option<TableTag>,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            offset: 0,
            table: None,
        }
    }

    pub(crate) fn for_table(bytes: &'a [u8], tag: TableTag, offset: usize) -> Self {
        Self {
            bytes,
            offset,
            table: Some(tag),
        }
    }

    pub(crate) fn err(&self, kind: ParseErrorKind) -> ParseError {
        ParseError {
            kind,
            offset: self.offset,
            table: self.table,
        }
    }

    fn eof(&self) -> ParseError {
        self.err(ParseErrorKind::UnexpectedEof)
    }

    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Absolute offset of the next unread byte.
    pub(crate) fn position(&self) -> usize {
        self.offset
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, ParseError> {
        let [first, rest @ ..] = self.bytes else {
            return Err(self.eof());
        };
        self.bytes = rest;
        self.offset += 1;
        Ok(*first)
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, ParseError> {
        Ok(u16::from_be_bytes(self.read_byte_array::<2>()?))
    }

    pub(crate) fn read_i16(&mut self) -> Result<i16, ParseError> {
        Ok(i16::from_be_bytes(self.read_byte_array::<2>()?))
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, ParseError> {
        Ok(u32::from_be_bytes(self.read_byte_array::<4>()?))
    }

    pub(crate) fn read_byte_array<const N: usize>(&mut self) -> Result<[u8; N], ParseError> {
        if self.bytes.len() < N {
            return Err(self.eof());
        }
        let (head, tail) = self.bytes.split_at(N);
        self.bytes = tail;
        self.offset += N;
        Ok(head.try_into().unwrap())
    }

    pub(crate) fn skip(&mut self, n: usize) -> Result<(), ParseError> {
        if self.bytes.len() < n {
            return Err(self.eof());
        }
        self.bytes = &self.bytes[n..];
        self.offset += n;
        Ok(())
    }

    /// Splits off a cursor over the next `len` bytes and advances past them.
    pub(crate) fn split_at(&mut self, len: usize) -> Result<Cursor<'a>, ParseError> {
        if self.bytes.len() < len {
            return Err(self.eof());
        }
        let (head, tail) = self.bytes.split_at(len);
        let split = Self {
            bytes: head,
            offset: self.offset,
            table: self.table,
        };
        self.bytes = tail;
        self.offset += len;
        Ok(split)
    }

    /// Returns a sub-cursor restricted to `range` of the remaining bytes.
    pub(crate) fn range(&self, range: ops::Range<usize>) -> Result<Cursor<'a>, ParseError> {
        let bytes = self.bytes.get(range.clone()).ok_or_else(|| {
            self.err(ParseErrorKind::RangeOutOfBounds {
                range: range.clone(),
                len: self.bytes.len(),
            })
        })?;
        Ok(Self {
            bytes,
            offset: self.offset + range.start,
            table: self.table,
        })
    }

    pub(crate) fn read_u16_checked<T>(
        &mut self,
        check: impl FnOnce(u16) -> Result<T, ParseErrorKind>,
    ) -> Result<T, ParseError> {
        let here = *self;
        let value = self.read_u16()?;
        check(value).map_err(|kind| here.err(kind))
    }

    pub(crate) fn read_u32_checked<T>(
        &mut self,
        check: impl FnOnce(u32) -> Result<T, ParseErrorKind>,
    ) -> Result<T, ParseError> {
        let here = *self;
        let value = self.read_u32()?;
        check(value).map_err(|kind| here.err(kind))
    }
}

/// Outline flavor of a parsed font.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    /// TrueType outlines (`glyf` / `loca` tables).
    TrueType,
    /// PostScript outlines (`CFF ` table).
    Cff,
}

impl Flavor {
    pub(crate) const fn sfnt_version(self) -> u32 {
        match self {
            Self::TrueType => Font::SFNT_VERSION_TRUETYPE,
            Self::Cff => Font::SFNT_VERSION_OTTO,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct HeadTable<'a> {
    pub(crate) raw: &'a [u8],
    pub(crate) units_per_em: u16,
    pub(crate) loca_format: LocaFormat,
}

impl<'a> HeadTable<'a> {
    pub(crate) const EXPECTED_LEN: usize = 54;
    pub(crate) const CHECKSUM_ADJUSTMENT_OFFSET: usize = 8;
    pub(crate) const LOCA_FORMAT_OFFSET: usize = 50;

    fn parse(cursor: Cursor<'a>) -> Result<Self, ParseError> {
        let raw = cursor.bytes;
        if raw.len() != Self::EXPECTED_LEN {
            return Err(cursor.err(ParseErrorKind::UnexpectedTableLen {
                expected: Self::EXPECTED_LEN,
                actual: raw.len(),
            }));
        }
        let mut cursor = cursor;
        cursor.read_u32_checked(|version| {
            if version == 0x0001_0000 {
                Ok(())
            } else {
                Err(ParseErrorKind::UnexpectedTableVersion(version))
            }
        })?;
        cursor.skip(14)?; // fontRevision, checkSumAdjustment, magicNumber, flags
        let units_per_em = cursor.read_u16()?;
        cursor.skip(30)?; // created, modified, bounding box, macStyle, lowestRecPPEM, fontDirectionHint
        let loca_format = match cursor.read_u16()? {
            0 => LocaFormat::Short,
            1 => LocaFormat::Long,
            other => {
                return Err(cursor.err(ParseErrorKind::UnexpectedTableFormat(other)));
            }
        };
        Ok(Self {
            raw,
            units_per_em,
            loca_format,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct MaxpTable<'a> {
    pub(crate) raw: &'a [u8],
    pub(crate) num_glyphs: u16,
}

impl<'a> MaxpTable<'a> {
    fn parse(mut cursor: Cursor<'a>) -> Result<Self, ParseError> {
        let raw = cursor.bytes;
        cursor.read_u32_checked(|version| {
            if version == 0x0000_5000 || version == 0x0001_0000 {
                Ok(())
            } else {
                Err(ParseErrorKind::UnexpectedTableVersion(version))
            }
        })?;
        let num_glyphs = cursor.read_u16()?;
        Ok(Self { raw, num_glyphs })
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct HheaTable<'a> {
    pub(crate) raw: &'a [u8],
    pub(crate) ascender: i16,
    pub(crate) descender: i16,
    pub(crate) number_of_h_metrics: u16,
}

impl<'a> HheaTable<'a> {
    pub(crate) const EXPECTED_LEN: usize = 36; // 18 words
    pub(crate) const NUM_H_METRICS_OFFSET: usize = Self::EXPECTED_LEN - 2;

    fn parse(cursor: Cursor<'a>) -> Result<Self, ParseError> {
        let raw = cursor.bytes;
        if raw.len() != Self::EXPECTED_LEN {
            return Err(cursor.err(ParseErrorKind::UnexpectedTableLen {
                expected: Self::EXPECTED_LEN,
                actual: raw.len(),
            }));
        }
        let mut cursor = cursor;
        cursor.skip(4)?; // version
        let ascender = cursor.read_i16()?;
        let descender = cursor.read_i16()?;
        let number_of_h_metrics =
            u16::from_be_bytes([raw[Self::NUM_H_METRICS_OFFSET], raw[Self::NUM_H_METRICS_OFFSET + 1]]);
        Ok(Self {
            raw,
            ascender,
            descender,
            number_of_h_metrics,
        })
    }
}

#[derive(Debug)]
pub(crate) struct HmtxTable<'a> {
    cursor: Cursor<'a>,
    number_of_h_metrics: u16,
}

impl HmtxTable<'_> {
    pub(crate) fn advance_and_lsb(&self, glyph_idx: u16) -> Result<(u16, u16), ParseError> {
        let (advance, lsb);
        if glyph_idx < self.number_of_h_metrics {
            let offset = usize::from(glyph_idx) * 4;
            let mut bytes = self.cursor.range(offset..self.cursor.len())?;
            advance = bytes.read_u16()?;
            lsb = bytes.read_u16()?;
        } else {
            // Trailing glyphs share the last advance and have a bare lsb entry.
            let advance_offset = usize::from(self.number_of_h_metrics.saturating_sub(1)) * 4;
            let mut bytes = self.cursor.range(advance_offset..self.cursor.len())?;
            advance = bytes.read_u16()?;

            let lsb_offset = usize::from(self.number_of_h_metrics) * 4
                + usize::from(glyph_idx - self.number_of_h_metrics) * 2;
            let mut bytes = self.cursor.range(lsb_offset..self.cursor.len())?;
            lsb = bytes.read_u16()?;
        }
        Ok((advance, lsb))
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum LocaFormat {
    Short,
    Long,
}

impl LocaFormat {
    pub(crate) const fn bytes_per_offset(self) -> usize {
        match self {
            Self::Short => 2,
            Self::Long => 4,
        }
    }
}

#[derive(Debug)]
pub(crate) struct LocaTable<'a> {
    format: LocaFormat,
    cursor: Cursor<'a>,
}

impl<'a> LocaTable<'a> {
    fn new(format: LocaFormat, glyph_count: u16, cursor: Cursor<'a>) -> Result<Self, ParseError> {
        let expected_len = format.bytes_per_offset() * (usize::from(glyph_count) + 1);
        if cursor.len() < expected_len {
            return Err(cursor.err(ParseErrorKind::UnexpectedTableLen {
                expected: expected_len,
                actual: cursor.len(),
            }));
        }
        Ok(Self { format, cursor })
    }

    pub(crate) fn glyph_range(&self, glyph_idx: u16) -> Result<ops::Range<usize>, ParseError> {
        let glyph_idx = usize::from(glyph_idx);
        Ok(match self.format {
            LocaFormat::Short => {
                let mut bytes = self.cursor;
                bytes.skip(glyph_idx * 2)?;
                let start_offset = usize::from(bytes.read_u16()?) * 2;
                let end_offset = usize::from(bytes.read_u16()?) * 2;
                start_offset..end_offset
            }
            LocaFormat::Long => {
                let mut bytes = self.cursor;
                bytes.skip(glyph_idx * 4)?;
                let start_offset = bytes.read_u32()? as usize;
                let end_offset = bytes.read_u32()? as usize;
                start_offset..end_offset
            }
        })
    }
}

/// Glyph outline source of a font.
#[derive(Debug)]
pub(crate) enum Outlines<'a> {
    TrueType {
        loca: LocaTable<'a>,
        glyf: Cursor<'a>,
    },
    Cff(CffTable<'a>),
}

/// Parsed, in-memory representation of one sfnt font.
///
/// Borrows the input buffer; table payloads are only copied when subset
/// tables are constructed.
#[derive(Debug)]
pub struct Font<'a> {
    pub(crate) flavor: Flavor,
    pub(crate) cmap: CmapTable<'a>,
    pub(crate) head: HeadTable<'a>,
    pub(crate) hhea: HheaTable<'a>,
    pub(crate) hmtx: HmtxTable<'a>,
    pub(crate) maxp: MaxpTable<'a>,
    pub(crate) name: NameTable<'a>,
    pub(crate) post: &'a [u8],
    pub(crate) os2: Option<&'a [u8]>,
    pub(crate) outlines: Outlines<'a>,
    pub(crate) cvt: Option<&'a [u8]>,
    pub(crate) fpgm: Option<&'a [u8]>,
    pub(crate) prep: Option<&'a [u8]>,
    pub(crate) gasp: Option<&'a [u8]>,
    pub(crate) fvar: Option<&'a [u8]>,
}

impl<'a> Font<'a> {
    pub(crate) const SFNT_VERSION_TRUETYPE: u32 = 0x0001_0000;
    pub(crate) const SFNT_VERSION_APPLE_TRUE: u32 = 0x7472_7565; // `true`
    pub(crate) const SFNT_VERSION_OTTO: u32 = 0x4F54_544F; // `OTTO`
    pub(crate) const SFNT_VERSION_COLLECTION: u32 = 0x7474_6366; // `ttcf`
    pub(crate) const SFNT_CHECKSUM: u32 = 0xB1B0_AFBA;

    /// Parses a font from raw sfnt bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is not a well-formed sfnt font with the
    /// tables required for subsetting.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, ParseError> {
        let mut cursor = Cursor::new(bytes);
        let flavor = cursor.read_u32_checked(|version| match version {
            Self::SFNT_VERSION_TRUETYPE | Self::SFNT_VERSION_APPLE_TRUE => Ok(Flavor::TrueType),
            Self::SFNT_VERSION_OTTO => Ok(Flavor::Cff),
            Self::SFNT_VERSION_COLLECTION => {
                Err(ParseErrorKind::Unsupported("font collections (`ttcf`)"))
            }
            other => Err(ParseErrorKind::UnexpectedFontVersion(other)),
        })?;
        let table_count = cursor.read_u16()?;
        cursor.skip(6)?; // searchRange, entrySelector, rangeShift: derived, never trusted

        let (mut cmap, mut head, mut hhea, mut maxp, mut hmtx) = (None, None, None, None, None);
        let (mut name, mut os2, mut post, mut loca, mut glyf) = (None, None, None, None, None);
        let (mut cff, mut cvt, mut fpgm, mut prep) = (None, None, None, None);
        let (mut gasp, mut fvar) = (None, None);
        for _ in 0..table_count {
            let (tag, table) = Self::parse_table_record(&mut cursor, bytes)?;
            match tag {
                TableTag::CMAP => cmap = Some(CmapTable::parse(table)?),
                TableTag::HEAD => head = Some(HeadTable::parse(table)?),
                TableTag::HHEA => hhea = Some(HheaTable::parse(table)?),
                TableTag::HMTX => hmtx = Some(table),
                TableTag::MAXP => maxp = Some(MaxpTable::parse(table)?),
                TableTag::NAME => name = Some(NameTable::parse(table)?),
                TableTag::OS2 => os2 = Some(table.bytes),
                TableTag::POST => post = Some(table.bytes),
                TableTag::LOCA => loca = Some(table),
                TableTag::GLYF => glyf = Some(table),
                TableTag::CFF => cff = Some(table),
                TableTag::CVT => cvt = Some(table.bytes),
                TableTag::FPGM => fpgm = Some(table.bytes),
                TableTag::PREP => prep = Some(table.bytes),
                TableTag::GASP => gasp = Some(table.bytes),
                TableTag::FVAR => fvar = Some(table.bytes),
                _ => { /* skip table */ }
            }
        }

        let head = head.ok_or_else(|| ParseError::missing_table(TableTag::HEAD))?;
        let maxp = maxp.ok_or_else(|| ParseError::missing_table(TableTag::MAXP))?;
        let hhea = hhea.ok_or_else(|| ParseError::missing_table(TableTag::HHEA))?;
        let hmtx = HmtxTable {
            cursor: hmtx.ok_or_else(|| ParseError::missing_table(TableTag::HMTX))?,
            number_of_h_metrics: hhea.number_of_h_metrics,
        };

        let outlines = match flavor {
            Flavor::TrueType => {
                let loca = loca.ok_or_else(|| ParseError::missing_table(TableTag::LOCA))?;
                let loca = LocaTable::new(head.loca_format, maxp.num_glyphs, loca)?;
                let glyf = glyf.ok_or_else(|| ParseError::missing_table(TableTag::GLYF))?;
                Outlines::TrueType { loca, glyf }
            }
            Flavor::Cff => {
                let cff = cff.ok_or_else(|| ParseError::missing_table(TableTag::CFF))?;
                Outlines::Cff(CffTable::parse(cff, maxp.num_glyphs)?)
            }
        };

        Ok(Self {
            flavor,
            cmap: cmap.ok_or_else(|| ParseError::missing_table(TableTag::CMAP))?,
            head,
            hhea,
            hmtx,
            maxp,
            name: name.ok_or_else(|| ParseError::missing_table(TableTag::NAME))?,
            post: post.ok_or_else(|| ParseError::missing_table(TableTag::POST))?,
            os2,
            outlines,
            cvt,
            fpgm,
            prep,
            gasp,
            fvar,
        })
    }

    fn parse_table_record(
        directory: &mut Cursor<'_>,
        font_bytes: &'a [u8],
    ) -> Result<(TableTag, Cursor<'a>), ParseError> {
        let tag = TableTag(directory.read_byte_array::<4>()?);
        directory.skip(4)?; // checksum: informational only, recomputed on output
        let offset = directory.read_u32()? as usize;
        let len = directory.read_u32()? as usize;
        let end = offset.checked_add(len).ok_or_else(|| {
            directory.err(ParseErrorKind::OffsetOutOfBounds(offset))
        })?;
        let table_bytes = font_bytes.get(offset..end).ok_or_else(|| {
            directory.err(ParseErrorKind::RangeOutOfBounds {
                range: offset..end,
                len: font_bytes.len(),
            })
        })?;
        Ok((tag, Cursor::for_table(table_bytes, tag, offset)))
    }

    /// Returns the outline flavor of this font.
    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    /// Returns the number of glyphs in this font.
    pub fn num_glyphs(&self) -> u16 {
        self.maxp.num_glyphs
    }

    /// Returns all characters mapped to a non-zero glyph by this font.
    pub fn charset(&self) -> std::collections::BTreeSet<char> {
        self.cmap.mapped_chars()
    }

    /// Returns general information about this font.
    pub fn info(&self) -> FontInfo {
        FontInfo {
            family_name: self.name.string(NameTable::FAMILY_NAME_ID),
            style_name: self.name.string(NameTable::SUBFAMILY_NAME_ID),
            units_per_em: self.head.units_per_em,
            ascender: self.hhea.ascender,
            descender: self.hhea.descender,
            glyph_count: self.maxp.num_glyphs,
            flavor: self.flavor,
        }
    }

    pub(crate) fn map_char(&self, ch: char) -> Result<u16, MapError> {
        self.cmap.map_char(ch)
    }

    /// Loads a TrueType glyph together with its horizontal metrics.
    pub(crate) fn glyph(&self, glyph_idx: u16) -> Result<GlyphWithMetrics<'a>, ParseError> {
        let Outlines::TrueType { loca, glyf } = &self.outlines else {
            return Err(ParseError {
                kind: ParseErrorKind::Unsupported("`glyf` outlines in a CFF font"),
                offset: 0,
                table: Some(TableTag::GLYF),
            });
        };
        let range = loca.glyph_range(glyph_idx)?;
        let raw = glyf.range(range)?;
        let inner = Glyph::new(raw)?;
        let (advance, lsb) = self.hmtx.advance_and_lsb(glyph_idx)?;
        Ok(GlyphWithMetrics {
            inner,
            advance,
            lsb,
        })
    }
}

/// General information about a parsed font, read from its `name`, `head` and
/// `hhea` tables.
#[derive(Debug, Clone)]
pub struct FontInfo {
    /// Font family name (name ID 1), if present.
    pub family_name: Option<String>,
    /// Font subfamily (style) name (name ID 2), if present.
    pub style_name: Option<String>,
    /// Units per em.
    pub units_per_em: u16,
    /// Typographic ascender.
    pub ascender: i16,
    /// Typographic descender.
    pub descender: i16,
    /// Number of glyphs.
    pub glyph_count: u16,
    /// Outline flavor.
    pub flavor: Flavor,
}
