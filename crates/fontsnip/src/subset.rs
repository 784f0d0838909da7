//! Glyph closure, glyph ID remapping and the subsetting entry point.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    container::{self, ContainerFormat},
    errors::SubsetError,
    font::{Font, Outlines},
    write::{self, TableSet},
    ParseError,
};

/// Clip range for one variation axis of a variable font.
///
/// Unset bounds leave the corresponding end of the axis range untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct AxisClip {
    /// New lower bound of the axis, in axis units.
    pub min: Option<f32>,
    /// New upper bound of the axis, in axis units.
    pub max: Option<f32>,
    /// New default value of the axis, in axis units.
    pub default: Option<f32>,
}

/// Configuration of one subsetting request.
#[derive(Debug, Clone)]
pub struct SubsetOptions {
    /// Container format of the output bytes.
    pub output_format: ContainerFormat,
    /// Whether to keep the `name` table as is. When `false`, the table is
    /// reduced to the essential records (name IDs 1–6).
    pub preserve_metadata: bool,
    /// Axis range clips applied to the `fvar` table of a variable font,
    /// keyed by 4-byte axis tag. Clips naming axes the font does not have
    /// are ignored. Variation deltas themselves are not subset.
    pub variation_axes: BTreeMap<[u8; 4], AxisClip>,
}

impl Default for SubsetOptions {
    fn default() -> Self {
        Self {
            output_format: ContainerFormat::Sfnt,
            preserve_metadata: true,
            variation_axes: BTreeMap::new(),
        }
    }
}

/// Outcome of a successful subsetting request.
#[derive(Debug)]
pub struct SubsetResult {
    /// The subset font, in the requested container format.
    pub data: Vec<u8>,
    /// Size of the input, in bytes.
    pub original_size: usize,
    /// Size of [`Self::data`], in bytes.
    pub subset_size: usize,
    /// Size reduction in percent (0–100, two decimals).
    pub compression_rate: f64,
    /// Number of distinct requested characters present in the font.
    pub retained_character_count: usize,
    /// Requested characters the font has no glyph for, in request order.
    /// These are reported, never silently dropped.
    pub missing_characters: Vec<char>,
    /// Container format of [`Self::data`].
    pub actual_format: ContainerFormat,
}

/// Subset of a [`Font`]: the glyph closure of a requested character set plus
/// the dense glyph ID remap derived from it.
#[derive(Debug)]
pub struct FontSubset<'a> {
    pub(crate) font: Font<'a>,
    /// Retained characters mapped to *new* glyph IDs, ascending by char.
    pub(crate) char_map: Vec<(char, u16)>,
    pub(crate) missing: Vec<char>,
    /// Old glyph IDs sorted ascending; the index is the new glyph ID.
    pub(crate) kept: Vec<u16>,
    pub(crate) remap: BTreeMap<u16, u16>,
}

impl<'a> FontSubset<'a> {
    /// Computes the glyph closure and remap for the given characters.
    ///
    /// Characters are deduplicated; those without a glyph are recorded as
    /// missing rather than failing the operation.
    ///
    /// # Errors
    ///
    /// Returns an error if glyph data referenced by the closure cannot be
    /// parsed.
    pub fn new(
        font: Font<'a>,
        chars: impl IntoIterator<Item = char>,
    ) -> Result<Self, ParseError> {
        let mut requested = Vec::new();
        let mut seen = BTreeSet::new();
        for ch in chars {
            if seen.insert(ch) {
                requested.push(ch);
            }
        }

        let mut mapped = BTreeMap::new();
        let mut missing = Vec::new();
        for &ch in &requested {
            match font.map_char(ch) {
                Ok(0) => missing.push(ch),
                Ok(glyph_idx) if glyph_idx >= font.num_glyphs() => {
                    log::warn!("cmap maps {ch:?} to out-of-range glyph {glyph_idx}");
                    missing.push(ch);
                }
                Ok(glyph_idx) => {
                    mapped.insert(ch, glyph_idx);
                }
                Err(err) => {
                    log::debug!("treating unmappable {ch:?} as missing: {err}");
                    missing.push(ch);
                }
            }
        }

        let closure = resolve_closure(&font, mapped.values().copied())?;
        let kept: Vec<u16> = closure.into_iter().collect();
        let remap: BTreeMap<u16, u16> = kept
            .iter()
            .enumerate()
            .map(|(new_idx, &old_idx)| {
                // The closure cannot outgrow the source glyph count.
                (old_idx, u16::try_from(new_idx).expect("too many glyphs"))
            })
            .collect();
        let char_map = mapped
            .into_iter()
            .map(|(ch, old_idx)| (ch, remap[&old_idx]))
            .collect();

        Ok(Self {
            font,
            char_map,
            missing,
            kept,
            remap,
        })
    }

    /// Requested characters the font has no glyph for, in request order.
    pub fn missing_characters(&self) -> &[char] {
        &self.missing
    }

    /// Number of glyphs retained by this subset, `.notdef` included.
    pub fn num_glyphs(&self) -> u16 {
        #[allow(clippy::cast_possible_truncation)] // bounded by the source glyph count
        {
            self.kept.len() as u16
        }
    }

    /// Number of distinct requested characters present in the font.
    pub fn retained_character_count(&self) -> usize {
        self.char_map.len()
    }
}

/// Computes the transitive set of glyph IDs needed for the seed glyphs.
///
/// `.notdef` (glyph 0) is always included. For TrueType outlines, composite
/// glyphs pull in their components; a component cycle (malformed font) is
/// reported and truncated instead of looping.
fn resolve_closure(
    font: &Font<'_>,
    seeds: impl Iterator<Item = u16>,
) -> Result<BTreeSet<u16>, ParseError> {
    let mut visited = BTreeSet::from([0_u16]);
    if matches!(font.outlines, Outlines::Cff(_)) {
        // Type 2 charstrings reference subroutines, not other glyphs.
        visited.extend(seeds);
        return Ok(visited);
    }

    struct Frame {
        glyph_idx: u16,
        components: Vec<u16>,
        next: usize,
    }

    let mut stack = Vec::new();
    for seed in seeds {
        if !visited.insert(seed) {
            continue;
        }
        stack.push(Frame {
            glyph_idx: seed,
            components: font.glyph(seed)?.inner.component_ids(),
            next: 0,
        });
        while let Some(frame) = stack.last_mut() {
            if frame.next == frame.components.len() {
                stack.pop();
                continue;
            }
            let component = frame.components[frame.next];
            frame.next += 1;

            if stack.iter().any(|frame| frame.glyph_idx == component) {
                log::warn!(
                    "cyclic composite reference to glyph {component}; truncating its expansion"
                );
                continue;
            }
            if component >= font.num_glyphs() {
                log::warn!("composite references out-of-range glyph {component}; skipping it");
                continue;
            }
            if visited.insert(component) {
                stack.push(Frame {
                    glyph_idx: component,
                    components: font.glyph(component)?.inner.component_ids(),
                    next: 0,
                });
            }
        }
    }
    Ok(visited)
}

/// Strategy for turning a computed subset into rewritten font tables.
///
/// There is exactly one production implementation, [`OutlineSubsetter`];
/// the seam exists so embedders and tests can substitute the rewrite step
/// without touching closure computation or serialization.
pub trait SubsetStrategy {
    /// Produces the rewritten table set for the given subset.
    ///
    /// # Errors
    ///
    /// Returns an error if a table cannot be rewritten.
    fn rewrite(
        &self,
        subset: &FontSubset<'_>,
        options: &SubsetOptions,
    ) -> Result<TableSet, SubsetError>;
}

/// The production subsetting strategy: rewrites every glyph-dependent table
/// through the glyph ID remap.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutlineSubsetter;

impl SubsetStrategy for OutlineSubsetter {
    fn rewrite(
        &self,
        subset: &FontSubset<'_>,
        options: &SubsetOptions,
    ) -> Result<TableSet, SubsetError> {
        write::build_tables(subset, options)
    }
}

/// Subsets a font to the given characters.
///
/// Accepts raw sfnt (TTF / OTF), WOFF or WOFF2 input; the format is sniffed
/// from the signature. The output container is chosen by
/// [`SubsetOptions::output_format`].
///
/// Requested characters absent from the font are reported through
/// [`SubsetResult::missing_characters`] and do not fail the operation.
///
/// # Errors
///
/// Fails fast on unsupported or malformed input and on an empty character
/// set; see [`SubsetError`] for the taxonomy. No partial output is produced
/// on the error path.
pub fn subset_font(
    input: &[u8],
    characters: &str,
    options: &SubsetOptions,
) -> Result<SubsetResult, SubsetError> {
    if characters.is_empty() {
        return Err(SubsetError::NoCharacters);
    }
    let original_size = input.len();

    let sfnt = container::decode(input)?;
    let font = Font::parse(&sfnt)?;
    let subset = FontSubset::new(font, characters.chars())?;

    let tables = OutlineSubsetter.rewrite(&subset, options)?;
    let sfnt_out = tables.to_sfnt()?;
    let data = match options.output_format {
        ContainerFormat::Sfnt => sfnt_out,
        ContainerFormat::Woff => container::woff::encode(&sfnt_out)?,
        ContainerFormat::Woff2 => container::woff2::encode(&sfnt_out)?,
    };

    let subset_size = data.len();
    Ok(SubsetResult {
        data,
        original_size,
        subset_size,
        compression_rate: compression_rate(original_size, subset_size),
        retained_character_count: subset.char_map.len(),
        missing_characters: subset.missing,
        actual_format: options.output_format,
    })
}

#[allow(clippy::cast_precision_loss)] // font sizes are far below 2^52
fn compression_rate(original_size: usize, subset_size: usize) -> f64 {
    if original_size == 0 {
        return 0.0;
    }
    let saved = original_size.saturating_sub(subset_size);
    let rate = saved as f64 / original_size as f64 * 100.0;
    (rate * 100.0).round() / 100.0
}
