use crate::error::FillError;
use crate::print::FontDescriptor;
use crate::types::Pt;
use crate::virtualization::{ReadHook, VirtualObject};
use rustybuzz::{Direction as HbDirection, Face as HbFace, UnicodeBuffer};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use ttf_parser::GlyphId;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct TextWidthKey {
    font_index: usize,
    size_milli: i64,
    text: String,
}

#[derive(Debug)]
struct TextWidthCache {
    map: HashMap<TextWidthKey, Pt>,
    order: VecDeque<TextWidthKey>,
    max_entries: usize,
}

impl TextWidthCache {
    fn new(max_entries: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            max_entries,
        }
    }

    fn get(&self, key: &TextWidthKey) -> Option<Pt> {
        self.map.get(key).copied()
    }

    fn insert(&mut self, key: TextWidthKey, value: Pt) {
        if self.map.contains_key(&key) {
            return;
        }
        self.map.insert(key.clone(), value);
        self.order.push_back(key);
        while self.map.len() > self.max_entries {
            let Some(old) = self.order.pop_front() else {
                break;
            };
            self.map.remove(&old);
        }
    }
}

/// Fonts available to text measurement. Unregistered names measure with
/// fixed fallback metrics: `0.6 * size` per character, `1.2 * size` per line.
#[derive(Debug)]
pub struct FontRegistry {
    fonts: Vec<RegisteredFont>,
    lookup: HashMap<String, usize>,
    use_full_unicode_metrics: bool,
    text_width_cache: Mutex<TextWidthCache>,
}

#[derive(Debug)]
struct RegisteredFont {
    name: String,
    data: Vec<u8>,
    metrics: FontMetrics,
}

#[derive(Debug)]
struct FontMetrics {
    first_char: u8,
    last_char: u8,
    widths: Vec<u16>,
    glyph_ids: Vec<u16>,
    ascent: i16,
    descent: i16,
    line_gap: i16,
    missing_width: u16,
    kerning: HashMap<(u16, u16), i16>,
}

impl Default for FontRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FontRegistry {
    pub fn new() -> Self {
        Self {
            fonts: Vec::new(),
            lookup: HashMap::new(),
            use_full_unicode_metrics: true,
            text_width_cache: Mutex::new(TextWidthCache::new(20_000)),
        }
    }

    pub fn set_use_full_unicode_metrics(&mut self, enabled: bool) {
        self.use_full_unicode_metrics = enabled;
    }

    pub fn len(&self) -> usize {
        self.fonts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fonts.is_empty()
    }

    pub fn register_dir(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let Ok(entries) = fs::read_dir(path) else {
            log::warn!("font directory {} is not readable", path.display());
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() {
                self.register_file(path);
            }
        }
    }

    pub fn register_file(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let Some(ext) = path.extension().and_then(|v| v.to_str()) else {
            return;
        };
        let ext = ext.to_ascii_lowercase();
        if ext != "ttf" && ext != "otf" {
            return;
        }
        let Ok(data) = fs::read(path) else {
            return;
        };
        if let Err(err) = self.register_with_source(data, path) {
            log::warn!("skipping font {}: {err}", path.display());
        }
    }

    pub fn register_bytes(
        &mut self,
        data: Vec<u8>,
        source_name: Option<&str>,
    ) -> Result<String, FillError> {
        let source = source_name.unwrap_or("EmbeddedFont");
        self.register_with_source(data, Path::new(source))
    }

    fn register_with_source(&mut self, data: Vec<u8>, source: &Path) -> Result<String, FillError> {
        let (name, aliases, metrics) = {
            let Ok(face) = ttf_parser::Face::parse(&data, 0) else {
                return Err(FillError::Font(format!(
                    "invalid font data for {}",
                    source.display()
                )));
            };
            let (name, aliases) = font_names(&face, source);
            (name, aliases, FontMetrics::from_face(&face))
        };
        let index = self.fonts.len();
        self.fonts.push(RegisteredFont {
            name: name.clone(),
            data,
            metrics,
        });
        for alias in std::iter::once(name.clone()).chain(aliases) {
            let key = normalize_name(&alias);
            if key.is_empty() || self.lookup.contains_key(&key) {
                continue;
            }
            self.lookup.insert(key, index);
        }
        Ok(name)
    }

    fn registered(&self, name: &str) -> Option<&RegisteredFont> {
        let key = normalize_name(name);
        self.lookup
            .get(&key)
            .and_then(|index| self.fonts.get(*index))
    }

    /// Registered primary name for any alias of a font.
    pub fn canonical_name(&self, name: &str) -> Option<&str> {
        self.registered(name).map(|font| font.name.as_str())
    }

    pub fn measure_text_width(&self, font: &FontDescriptor, text: &str) -> Pt {
        let font_size = font.size;
        let key = normalize_name(&font.name);
        let Some(index) = self.lookup.get(&key).copied() else {
            return fallback_width(font_size, text);
        };
        let cache_key = TextWidthKey {
            font_index: index,
            size_milli: font_size.to_milli_i64(),
            text: text.to_string(),
        };
        if let Ok(cache) = self.text_width_cache.lock() {
            if let Some(value) = cache.get(&cache_key) {
                return value;
            }
        }
        let Some(registered) = self.fonts.get(index) else {
            return fallback_width(font_size, text);
        };
        let value = if !self.use_full_unicode_metrics
            || registered.metrics.is_within_basic_latin(text)
        {
            registered.metrics.measure_text_width(font_size, text)
        } else {
            measure_text_width_full(registered, font_size, text)
                .unwrap_or_else(|| registered.metrics.measure_text_width(font_size, text))
        };
        if let Ok(mut cache) = self.text_width_cache.lock() {
            cache.insert(cache_key, value);
        }
        value
    }

    pub fn line_height(&self, font: &FontDescriptor) -> Pt {
        let fallback = font.size.mul_ratio(6, 5);
        let Some(registered) = self.registered(&font.name) else {
            return fallback;
        };
        let measured = registered.metrics.line_height(font.size);
        if measured <= Pt::ZERO {
            fallback
        } else {
            measured
        }
    }
}

impl ReadHook for FontRegistry {
    fn resolve(&self, object: VirtualObject) -> VirtualObject {
        match object {
            VirtualObject::Font(font) => match self.canonical_name(&font.name) {
                Some(canonical) if canonical != font.name => {
                    let mut rebound = font.as_ref().clone();
                    rebound.name = canonical.to_string();
                    VirtualObject::Font(Arc::new(rebound))
                }
                _ => VirtualObject::Font(font),
            },
            other => other,
        }
    }
}

fn fallback_width(font_size: Pt, text: &str) -> Pt {
    let char_width = font_size.mul_ratio(3, 5).max(Pt::from_i32(1));
    char_width * (text.chars().count() as i32)
}

impl FontMetrics {
    fn from_face(face: &ttf_parser::Face<'_>) -> Self {
        let units_per_em = face.units_per_em().max(1);
        let scale = 1000.0 / units_per_em as f32;
        let first_char = 32u8;
        let last_char = 255u8;
        let glyph_ids = (first_char..=last_char)
            .map(|code| {
                char::from_u32(code as u32)
                    .and_then(|ch| face.glyph_index(ch))
                    .map(|gid| gid.0)
                    .unwrap_or(0)
            })
            .collect::<Vec<_>>();
        let widths = glyph_ids
            .iter()
            .map(|gid| {
                let width = if *gid == 0 {
                    0
                } else {
                    face.glyph_hor_advance(GlyphId(*gid)).unwrap_or(0)
                };
                let scaled = (width as f32 * scale).round() as i32;
                scaled.clamp(0, u16::MAX as i32) as u16
            })
            .collect::<Vec<_>>();
        let missing_width = widths
            .get((b' ' - first_char) as usize)
            .copied()
            .unwrap_or(0);
        let kerning = build_kerning_pairs(face, &glyph_ids, scale);
        Self {
            first_char,
            last_char,
            widths,
            glyph_ids,
            ascent: scale_i16(face.ascender(), scale),
            descent: scale_i16(face.descender(), scale),
            line_gap: scale_i16(face.line_gap(), scale),
            missing_width,
            kerning,
        }
    }

    fn glyph_id_for_char(&self, ch: char) -> u16 {
        let code = ch as u32;
        if code < self.first_char as u32 || code > self.last_char as u32 {
            return 0;
        }
        let idx = (code - self.first_char as u32) as usize;
        self.glyph_ids.get(idx).copied().unwrap_or(0)
    }

    fn advance_for_char(&self, ch: char) -> u16 {
        let code = ch as u32;
        if code < self.first_char as u32 || code > self.last_char as u32 {
            return self.missing_width;
        }
        let idx = (code - self.first_char as u32) as usize;
        self.widths.get(idx).copied().unwrap_or(self.missing_width)
    }

    fn measure_text_width(&self, font_size: Pt, text: &str) -> Pt {
        let mut total_units: i64 = 0;
        let mut prev: Option<u16> = None;
        for ch in text.chars() {
            let gid = self.glyph_id_for_char(ch);
            total_units = total_units.saturating_add(self.advance_for_char(ch) as i64);
            if let Some(k) = prev.and_then(|prev_gid| self.kerning.get(&(prev_gid, gid))) {
                total_units = total_units.saturating_add(*k as i64);
            }
            prev = Some(gid);
        }
        if total_units <= 0 {
            return Pt::ZERO;
        }
        font_size.mul_ratio(total_units, 1000)
    }

    fn is_within_basic_latin(&self, text: &str) -> bool {
        let first = self.first_char as u32;
        let last = self.last_char as u32;
        text.chars().all(|ch| (first..=last).contains(&(ch as u32)))
    }

    fn line_height(&self, font_size: Pt) -> Pt {
        let height_1000 = self.ascent as i64 - self.descent as i64 + self.line_gap as i64;
        if height_1000 <= 0 {
            return Pt::ZERO;
        }
        font_size.mul_ratio(height_1000, 1000)
    }
}

fn build_kerning_pairs(
    face: &ttf_parser::Face<'_>,
    glyph_ids: &[u16],
    scale: f32,
) -> HashMap<(u16, u16), i16> {
    let mut out = HashMap::new();
    let Some(kern) = face.tables().kern else {
        return out;
    };
    let subtables: Vec<_> = kern
        .subtables
        .into_iter()
        .filter(|s| s.horizontal && !s.has_cross_stream && !s.has_state_machine)
        .collect();
    if subtables.is_empty() {
        return out;
    }
    for &left in glyph_ids.iter().filter(|gid| **gid != 0) {
        for &right in glyph_ids.iter().filter(|gid| **gid != 0) {
            let total: i32 = subtables
                .iter()
                .filter_map(|sub| sub.glyphs_kerning(GlyphId(left), GlyphId(right)))
                .map(|v| v as i32)
                .sum();
            if total == 0 {
                continue;
            }
            let clamped = total.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
            let scaled = scale_i16(clamped, scale);
            if scaled != 0 {
                out.insert((left, right), scaled);
            }
        }
    }
    out
}

fn measure_text_width_full(font: &RegisteredFont, font_size: Pt, text: &str) -> Option<Pt> {
    let face = HbFace::from_slice(&font.data, 0)?;
    let units_per_em = face.units_per_em().max(1) as i64;

    let mut buffer = UnicodeBuffer::new();
    buffer.set_direction(detect_direction(text));
    buffer.push_str(text);
    let output = rustybuzz::shape(&face, &[], buffer);
    let positions = output.glyph_positions();
    if positions.is_empty() {
        return None;
    }
    let total_units: i64 = positions
        .iter()
        .map(|pos| ((pos.x_advance as i64) * 1000 + (units_per_em / 2)) / units_per_em)
        .sum();
    if total_units <= 0 {
        return Some(Pt::ZERO);
    }
    Some(font_size.mul_ratio(total_units, 1000))
}

fn detect_direction(text: &str) -> HbDirection {
    let rtl = text.chars().any(|ch| {
        matches!(
            ch as u32,
            0x0590..=0x08FF | 0xFB1D..=0xFDFF | 0xFE70..=0xFEFF | 0x1EE00..=0x1EEFF
        )
    });
    if rtl {
        HbDirection::RightToLeft
    } else {
        HbDirection::LeftToRight
    }
}

fn scale_i16(value: i16, scale: f32) -> i16 {
    let scaled = (value as f32 * scale).round() as i32;
    scaled.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

fn font_names(face: &ttf_parser::Face<'_>, path: &Path) -> (String, Vec<String>) {
    use ttf_parser::name::name_id;

    let mut family = None;
    let mut full = None;
    let mut post = None;
    for entry in face.names() {
        let Some(name) = entry.to_string() else {
            continue;
        };
        let slot = match entry.name_id {
            name_id::TYPOGRAPHIC_FAMILY | name_id::FAMILY => &mut family,
            name_id::FULL_NAME => &mut full,
            name_id::POST_SCRIPT_NAME => &mut post,
            _ => continue,
        };
        slot.get_or_insert(name);
    }

    let stem = path
        .file_stem()
        .and_then(|v| v.to_str())
        .map(|v| v.to_string());
    let primary = post
        .clone()
        .or_else(|| full.clone())
        .or_else(|| family.clone())
        .or_else(|| stem.clone())
        .unwrap_or_else(|| "EmbeddedFont".to_string());
    let aliases = [family, full, post, stem]
        .into_iter()
        .flatten()
        .filter(|candidate| *candidate != primary)
        .collect();
    (primary, aliases)
}

fn normalize_name(name: &str) -> String {
    name.trim()
        .trim_matches('"')
        .trim_matches('\'')
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_fonts_use_fallback_metrics() {
        let registry = FontRegistry::new();
        let font = FontDescriptor::new("NoSuchFont", 10.0);
        assert_eq!(registry.measure_text_width(&font, "abcd"), Pt::from_i32(24));
        assert_eq!(registry.line_height(&font), Pt::from_i32(12));
        assert!(registry.canonical_name("NoSuchFont").is_none());
    }

    #[test]
    fn invalid_font_bytes_are_rejected() {
        let mut registry = FontRegistry::new();
        let err = registry
            .register_bytes(vec![0, 1, 2, 3], Some("broken.ttf"))
            .unwrap_err();
        assert!(matches!(err, FillError::Font(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn read_hook_leaves_unknown_fonts_alone() {
        let registry = FontRegistry::new();
        let font = Arc::new(FontDescriptor::new("Mystery", 9.0));
        match registry.resolve(VirtualObject::Font(font.clone())) {
            VirtualObject::Font(out) => assert!(Arc::ptr_eq(&out, &font)),
            other => panic!("unexpected {other:?}"),
        }
    }
}
