//! Error types for parsing and subsetting.

use core::{fmt, ops};

use crate::font::TableTag;

/// Kind of a font [`ParseError`].
#[derive(Debug)]
#[non_exhaustive]
pub enum ParseErrorKind {
    /// Unexpected end of the font data.
    UnexpectedEof,
    /// Unexpected sfnt version (not TrueType, `true` or `OTTO`).
    UnexpectedFontVersion(u32),
    /// Missing required font table (e.g., `head`).
    MissingTable,
    /// No supported subtable in the `cmap` table.
    NoSupportedCmap,
    /// Offset inferred from the table data is out of bounds.
    OffsetOutOfBounds(usize),
    /// Range inferred from the table data is out of bounds.
    RangeOutOfBounds {
        /// Inferred range.
        range: ops::Range<usize>,
        /// Length of the indexed data.
        len: usize,
    },
    /// Unexpected table version.
    UnexpectedTableVersion(u32),
    /// Unexpected table length.
    UnexpectedTableLen {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },
    /// Unexpected table format (e.g., for a `cmap` subtable).
    UnexpectedTableFormat(u16),
    /// A table variant this crate does not process (e.g., CID-keyed CFF).
    Unsupported(&'static str),
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => formatter.write_str("unexpected end of the font data"),
            Self::UnexpectedFontVersion(version) => {
                write!(formatter, "unexpected sfnt version ({version:#010x})")
            }
            Self::MissingTable => formatter.write_str("missing required font table"),
            Self::NoSupportedCmap => {
                formatter.write_str("no supported subtable in the `cmap` table")
            }
            Self::OffsetOutOfBounds(val) => {
                write!(
                    formatter,
                    "offset ({val}) inferred from the table data is out of bounds"
                )
            }
            Self::RangeOutOfBounds { range, len } => {
                write!(
                    formatter,
                    "range ({range:?}) inferred from the table data is out of bounds (..{len})"
                )
            }
            Self::UnexpectedTableVersion(val) => {
                write!(formatter, "unexpected table version ({val})")
            }
            Self::UnexpectedTableLen { expected, actual } => {
                write!(
                    formatter,
                    "unexpected table length: expected {expected}, got {actual}"
                )
            }
            Self::UnexpectedTableFormat(val) => {
                write!(formatter, "unexpected table format ({val})")
            }
            Self::Unsupported(what) => write!(formatter, "unsupported font data: {what}"),
        }
    }
}

impl std::error::Error for ParseErrorKind {}

/// Errors that can occur when parsing an OpenType [`Font`](crate::Font).
#[derive(Debug)]
pub struct ParseError {
    pub(crate) kind: ParseErrorKind,
    pub(crate) offset: usize,
    pub(crate) table: Option<TableTag>,
}

impl fmt::Display for ParseError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(table) = self.table {
            write!(formatter, "[{table}] ")?;
        }
        if self.offset > 0 {
            write!(formatter, "{}: ", self.offset)?;
        }
        fmt::Display::fmt(&self.kind, formatter)
    }
}

impl std::error::Error for ParseError {}

impl ParseError {
    pub(crate) fn missing_table(tag: TableTag) -> Self {
        Self {
            kind: ParseErrorKind::MissingTable,
            offset: 0,
            table: Some(tag),
        }
    }

    /// Gets the error kind.
    pub fn kind(&self) -> &ParseErrorKind {
        &self.kind
    }

    /// Gets the table this error relates to.
    pub fn table(&self) -> Option<TableTag> {
        self.table
    }

    /// Gets the offset in the font data.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Errors that can occur when mapping a char to a glyph using the `cmap` table.
#[derive(Debug)]
#[non_exhaustive]
pub enum MapError {
    /// Char is too large to be mapped by the subtable.
    CharTooLarge,
    /// Invalid offset into the glyph ID array.
    InvalidOffset,
}

impl fmt::Display for MapError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CharTooLarge => formatter.write_str("char is too large to be mapped"),
            Self::InvalidOffset => formatter.write_str("invalid offset into the glyph ID array"),
        }
    }
}

impl std::error::Error for MapError {}

/// Broad failure category of a [`SubsetError`], for programmatic matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SubsetErrorKind {
    /// The input signature is not a supported font or container format.
    UnsupportedFormat,
    /// Declared lengths or offsets exceed the provided buffer.
    TruncatedFile,
    /// A WOFF / WOFF2 container contradicts its own framing.
    CorruptContainer,
    /// The font has no decodable character map subtable.
    NoUsableCmap,
    /// The requested character set is empty.
    NoCharactersSpecified,
    /// The serialized font would exceed the 32-bit addressable range.
    SerializationOverflow,
    /// The font data is structurally invalid in some other way.
    MalformedFont,
}

/// Error returned by the subsetting pipeline.
///
/// Every fatal error aborts the whole operation; no partial output is ever
/// produced alongside an error. Missing requested characters are *not* an
/// error and are reported via
/// [`SubsetResult::missing_characters`](crate::SubsetResult).
#[derive(Debug)]
#[non_exhaustive]
pub enum SubsetError {
    /// The requested character set is empty.
    NoCharacters,
    /// The input is not in a supported font or container format.
    UnsupportedFormat {
        /// What exactly is unsupported.
        detail: &'static str,
    },
    /// A web-font container disagrees with its own declared framing.
    CorruptContainer {
        /// What exactly is inconsistent.
        detail: &'static str,
    },
    /// The font data failed to parse.
    Parse(ParseError),
    /// The serialized output would exceed the 32-bit addressable range.
    Overflow,
}

impl SubsetError {
    /// Returns the broad failure category of this error.
    pub fn kind(&self) -> SubsetErrorKind {
        match self {
            Self::NoCharacters => SubsetErrorKind::NoCharactersSpecified,
            Self::UnsupportedFormat { .. } => SubsetErrorKind::UnsupportedFormat,
            Self::CorruptContainer { .. } => SubsetErrorKind::CorruptContainer,
            Self::Overflow => SubsetErrorKind::SerializationOverflow,
            Self::Parse(err) => match err.kind() {
                ParseErrorKind::UnexpectedEof
                | ParseErrorKind::OffsetOutOfBounds(_)
                | ParseErrorKind::RangeOutOfBounds { .. } => SubsetErrorKind::TruncatedFile,
                ParseErrorKind::NoSupportedCmap => SubsetErrorKind::NoUsableCmap,
                ParseErrorKind::UnexpectedFontVersion(_) | ParseErrorKind::Unsupported(_) => {
                    SubsetErrorKind::UnsupportedFormat
                }
                _ => SubsetErrorKind::MalformedFont,
            },
        }
    }
}

impl fmt::Display for SubsetError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCharacters => formatter.write_str("no characters specified for subsetting"),
            Self::UnsupportedFormat { detail } => {
                write!(formatter, "unsupported input format: {detail}")
            }
            Self::CorruptContainer { detail } => write!(formatter, "corrupt container: {detail}"),
            Self::Parse(err) => write!(formatter, "failed parsing font: {err}"),
            Self::Overflow => formatter.write_str("serialized font exceeds the addressable range"),
        }
    }
}

impl std::error::Error for SubsetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ParseError> for SubsetError {
    fn from(err: ParseError) -> Self {
        Self::Parse(err)
    }
}
