//! Web-font containers: format sniffing plus WOFF and WOFF2 codecs.
//!
//! The container format is resolved once from the input signature into a
//! closed set of variants; unsupported variants fail fast instead of
//! degrading.

use std::borrow::Cow;

use crate::{
    errors::SubsetError,
    font::{Cursor, Flavor, Font, TableTag},
};

pub(crate) mod woff;
pub(crate) mod woff2;

/// Container format of font bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    /// Raw sfnt (TTF / OTF).
    Sfnt,
    /// WOFF 1.0: per-table zlib compression.
    Woff,
    /// WOFF 2.0: whole-font Brotli compression.
    Woff2,
}

pub(crate) const WOFF_SIGNATURE: u32 = 0x774F_4646; // `wOFF`
pub(crate) const WOFF2_SIGNATURE: u32 = 0x774F_4632; // `wOF2`

impl ContainerFormat {
    /// Sniffs the container format from the leading 4-byte signature.
    ///
    /// # Errors
    ///
    /// Returns [`SubsetError::UnsupportedFormat`] for unrecognized
    /// signatures and for font collections.
    pub fn sniff(bytes: &[u8]) -> Result<Self, SubsetError> {
        let signature = bytes
            .get(..4)
            .map(|sig| u32::from_be_bytes(sig.try_into().unwrap()))
            .ok_or(SubsetError::UnsupportedFormat {
                detail: "input shorter than a format signature",
            })?;
        match signature {
            Font::SFNT_VERSION_TRUETYPE | Font::SFNT_VERSION_APPLE_TRUE
            | Font::SFNT_VERSION_OTTO => Ok(Self::Sfnt),
            WOFF_SIGNATURE => Ok(Self::Woff),
            WOFF2_SIGNATURE => Ok(Self::Woff2),
            Font::SFNT_VERSION_COLLECTION => Err(SubsetError::UnsupportedFormat {
                detail: "font collections (`ttcf`)",
            }),
            _ => Err(SubsetError::UnsupportedFormat {
                detail: "unrecognized signature",
            }),
        }
    }
}

/// Unwraps input bytes into raw sfnt data, decoding a web container first
/// when the signature calls for it.
pub(crate) fn decode(input: &[u8]) -> Result<Cow<'_, [u8]>, SubsetError> {
    Ok(match ContainerFormat::sniff(input)? {
        ContainerFormat::Sfnt => Cow::Borrowed(input),
        ContainerFormat::Woff => Cow::Owned(woff::decode(input)?),
        ContainerFormat::Woff2 => Cow::Owned(woff2::decode(input)?),
    })
}

/// A table of an existing sfnt file, as read back from its directory.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawTable<'a> {
    pub(crate) tag: TableTag,
    pub(crate) checksum: u32,
    pub(crate) offset: usize,
    pub(crate) data: &'a [u8],
}

/// Reads the directory of a serialized sfnt font. Used by the container
/// encoders, which wrap a finished sfnt byte-exactly.
pub(crate) fn parse_sfnt_tables(sfnt: &[u8]) -> Result<(u32, Vec<RawTable<'_>>), SubsetError> {
    let mut cursor = Cursor::new(sfnt);
    let flavor = cursor.read_u32()?;
    let num_tables = cursor.read_u16()?;
    cursor.skip(6)?; // searchRange, entrySelector, rangeShift

    let mut tables = Vec::with_capacity(usize::from(num_tables));
    for _ in 0..num_tables {
        let tag = TableTag(cursor.read_byte_array::<4>()?);
        let checksum = cursor.read_u32()?;
        let offset = cursor.read_u32()? as usize;
        let length = cursor.read_u32()? as usize;
        let data = offset
            .checked_add(length)
            .and_then(|end| sfnt.get(offset..end))
            .ok_or(SubsetError::CorruptContainer {
                detail: "sfnt table range exceeds the buffer",
            })?;
        tables.push(RawTable {
            tag,
            checksum,
            offset,
            data,
        });
    }
    Ok((flavor, tables))
}

pub(crate) fn flavor_from_version(version: u32) -> Result<Flavor, SubsetError> {
    match version {
        Font::SFNT_VERSION_TRUETYPE | Font::SFNT_VERSION_APPLE_TRUE => Ok(Flavor::TrueType),
        Font::SFNT_VERSION_OTTO => Ok(Flavor::Cff),
        Font::SFNT_VERSION_COLLECTION => Err(SubsetError::UnsupportedFormat {
            detail: "collection flavor inside a web container",
        }),
        _ => Err(SubsetError::UnsupportedFormat {
            detail: "unrecognized sfnt flavor inside a web container",
        }),
    }
}
