//! TrueType glyph records.

use super::Cursor;
use crate::ParseError;

const ARG_1_AND_2_ARE_WORDS: u16 = 0x0001;
const WE_HAVE_A_SCALE: u16 = 0x0008;
const MORE_COMPONENTS: u16 = 0x0020;
const WE_HAVE_AN_X_AND_Y_SCALE: u16 = 0x0040;
const WE_HAVE_A_TWO_BY_TWO: u16 = 0x0080;

/// One `glyf` entry. Simple glyphs are carried verbatim; composite glyphs are
/// split into component records so their glyph references can be rewritten.
#[derive(Debug)]
pub(crate) enum Glyph<'a> {
    Empty,
    Simple(&'a [u8]),
    Composite {
        /// xMin, yMin, xMax, yMax
        header: [u8; 8],
        components: Vec<GlyphComponent<'a>>,
        /// Optional instructions after the last component descriptor
        instructions: &'a [u8],
    },
}

impl<'a> Glyph<'a> {
    pub(super) fn new(raw: Cursor<'a>) -> Result<Self, ParseError> {
        if raw.bytes.is_empty() {
            return Ok(Self::Empty);
        }

        let mut cursor = raw;
        let number_of_contours = cursor.read_i16()?;
        if number_of_contours >= 0 {
            return Ok(Self::Simple(raw.bytes));
        }

        let header = cursor.read_byte_array::<8>()?;
        let mut components = Vec::with_capacity(1);
        loop {
            let (component, more) = GlyphComponent::parse(&mut cursor)?;
            components.push(component);
            if !more {
                break;
            }
        }
        Ok(Self::Composite {
            header,
            components,
            instructions: cursor.bytes,
        })
    }

    /// Glyph IDs of the components of a composite glyph (empty otherwise).
    pub(crate) fn component_ids(&self) -> Vec<u16> {
        match self {
            Self::Empty | Self::Simple(_) => Vec::new(),
            Self::Composite { components, .. } => {
                components.iter().map(|component| component.glyph_idx).collect()
            }
        }
    }
}

/// One component record of a composite glyph. Everything after the glyph
/// index (positioning args and the optional transform) is opaque to
/// subsetting and kept as raw bytes.
#[derive(Debug)]
pub(crate) struct GlyphComponent<'a> {
    pub(crate) flags: u16,
    pub(crate) glyph_idx: u16,
    pub(crate) trailer: &'a [u8],
}

impl<'a> GlyphComponent<'a> {
    fn parse(cursor: &mut Cursor<'a>) -> Result<(Self, bool), ParseError> {
        let flags = cursor.read_u16()?;
        let glyph_idx = cursor.read_u16()?;

        let mut trailer_len = if flags & ARG_1_AND_2_ARE_WORDS == 0 { 2 } else { 4 };
        if flags & WE_HAVE_A_SCALE != 0 {
            trailer_len += 2;
        } else if flags & WE_HAVE_AN_X_AND_Y_SCALE != 0 {
            trailer_len += 4;
        } else if flags & WE_HAVE_A_TWO_BY_TWO != 0 {
            trailer_len += 8;
        }
        let trailer = cursor.split_at(trailer_len)?;

        let this = Self {
            flags,
            glyph_idx,
            trailer: trailer.bytes,
        };
        Ok((this, flags & MORE_COMPONENTS != 0))
    }
}

/// [`Glyph`] together with metrics read from the `hmtx` table.
#[derive(Debug)]
pub(crate) struct GlyphWithMetrics<'a> {
    pub(crate) inner: Glyph<'a>,
    pub(crate) advance: u16,
    pub(crate) lsb: u16,
}
