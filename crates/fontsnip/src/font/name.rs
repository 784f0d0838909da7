//! `name` table processing.

use super::{CmapTable, Cursor};
use crate::ParseError;

/// One record of the `name` table, with its string payload still encoded.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NameRecord<'a> {
    pub(crate) platform_id: u16,
    pub(crate) encoding_id: u16,
    pub(crate) language_id: u16,
    pub(crate) name_id: u16,
    pub(crate) bytes: &'a [u8],
}

impl NameRecord<'_> {
    /// Decodes the record payload to text, if the encoding is known.
    fn decode(&self) -> Option<String> {
        match (self.platform_id, self.encoding_id) {
            (CmapTable::WINDOWS_PLATFORM, _) | (CmapTable::UNICODE_PLATFORM, _) => {
                let units = self
                    .bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
                Some(char::decode_utf16(units).map(|ch| ch.unwrap_or('\u{fffd}')).collect())
            }
            (CmapTable::MACINTOSH_PLATFORM, 0) => {
                // Mac Roman is ASCII-compatible; anything beyond is approximated.
                Some(self.bytes.iter().map(|&byte| char::from(byte)).collect())
            }
            _ => None,
        }
    }
}

/// Decoded `name` table.
#[derive(Debug)]
pub(crate) struct NameTable<'a> {
    pub(crate) raw: &'a [u8],
    pub(crate) records: Vec<NameRecord<'a>>,
}

impl<'a> NameTable<'a> {
    pub(crate) const FAMILY_NAME_ID: u16 = 1;
    pub(crate) const SUBFAMILY_NAME_ID: u16 = 2;
    /// Name IDs that metadata reduction keeps: family, subfamily, unique
    /// identifier, full name, version, PostScript name.
    pub(crate) const ESSENTIAL_NAME_IDS: core::ops::RangeInclusive<u16> = 1..=6;

    pub(super) fn parse(cursor: Cursor<'a>) -> Result<Self, ParseError> {
        let raw = cursor.bytes;
        let mut header = cursor;
        header.skip(2)?; // format; the record array reads the same in formats 0 and 1
        let count = header.read_u16()?;
        let string_offset = usize::from(header.read_u16()?);

        let mut records = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let platform_id = header.read_u16()?;
            let encoding_id = header.read_u16()?;
            let language_id = header.read_u16()?;
            let name_id = header.read_u16()?;
            let length = usize::from(header.read_u16()?);
            let offset = usize::from(header.read_u16()?);

            let start = string_offset + offset;
            let Some(bytes) = raw.get(start..start + length) else {
                // Tolerated: fonts in the wild carry dangling name records.
                log::debug!("skipping name record (ID {name_id}) with out-of-bounds string");
                continue;
            };
            records.push(NameRecord {
                platform_id,
                encoding_id,
                language_id,
                name_id,
                bytes,
            });
        }
        Ok(Self { raw, records })
    }

    /// Looks up a name string by ID, preferring Windows, then Unicode, then
    /// Mac records.
    pub(crate) fn string(&self, name_id: u16) -> Option<String> {
        let mut best: Option<(u8, &NameRecord<'_>)> = None;
        for record in &self.records {
            if record.name_id != name_id {
                continue;
            }
            let rank = match record.platform_id {
                CmapTable::WINDOWS_PLATFORM => 0,
                CmapTable::UNICODE_PLATFORM => 1,
                CmapTable::MACINTOSH_PLATFORM => 2,
                _ => continue,
            };
            if best.is_none_or(|(best_rank, _)| rank < best_rank) {
                best = Some((rank, record));
            }
        }
        best.and_then(|(_, record)| record.decode())
    }
}
