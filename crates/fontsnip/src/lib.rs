//! Deterministic OpenType / TrueType font subsetting.
//!
//! Given a font and a set of characters, this crate computes the glyph
//! closure (composite components included), remaps the retained glyphs to a
//! dense ID range, rewrites every glyph-dependent table, and serializes a
//! valid sfnt font, optionally wrapped into a WOFF or WOFF2 container.
//! WOFF and WOFF2 input is unwrapped transparently.
//!
//! The pipeline is a pure, synchronous computation over an immutable input
//! buffer: one call owns its parsed font and scratch state exclusively, so
//! callers decide the concurrency strategy.
//!
//! ```
//! use fontsnip::{subset_font, SubsetOptions};
//!
//! fn shrink(font_bytes: &[u8]) -> Result<Vec<u8>, fontsnip::SubsetError> {
//!     let result = subset_font(font_bytes, "Hello world", &SubsetOptions::default())?;
//!     for missing in &result.missing_characters {
//!         eprintln!("font has no glyph for {missing:?}");
//!     }
//!     Ok(result.data)
//! }
//! ```

mod container;
mod errors;
mod font;
mod subset;
#[cfg(test)]
pub(crate) mod tests;
mod write;

pub use crate::{
    container::ContainerFormat,
    errors::{MapError, ParseError, ParseErrorKind, SubsetError, SubsetErrorKind},
    font::{Flavor, Font, FontInfo, TableTag},
    subset::{
        subset_font, AxisClip, FontSubset, OutlineSubsetter, SubsetOptions, SubsetResult,
        SubsetStrategy,
    },
    write::TableSet,
};
