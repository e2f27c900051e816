//! Canonicalization of scraped text fields.
//!
//! Fullwidth ASCII letters, digits and punctuation become halfwidth while kana
//! and ideographs are left alone. Line breaks are dropped, and the wave dash is
//! kept in its fullwidth form.

/// First and last code points of the fullwidth ASCII block.
const FULLWIDTH_START: char = '\u{FF01}';
const FULLWIDTH_END: char = '\u{FF5E}';

/// Distance between a fullwidth ASCII variant and its halfwidth form.
const FULLWIDTH_OFFSET: u32 = 0xFEE0;

const IDEOGRAPHIC_SPACE: char = '\u{3000}';

/// Canonical wave dash (U+301C).
const WAVE_DASH: char = '〜';

/// Normalizes an optional field. `None` passes through.
pub fn normalize(text: Option<&str>) -> Option<String> {
    text.map(normalize_str)
}

/// Normalizes a single field value.
pub fn normalize_str(text: &str) -> String {
    let mut out = String::with_capacity(text.len());

    for c in text.chars() {
        match c {
            '\r' | '\n' => {}
            // Field separator of the registry file
            '\t' | IDEOGRAPHIC_SPACE => out.push(' '),
            // Fullwidth tilde would otherwise become '~'
            '~' | '\u{FF5E}' => out.push(WAVE_DASH),
            FULLWIDTH_START..=FULLWIDTH_END => out.push(to_halfwidth(c)),
            _ => out.push(c),
        }
    }

    out.trim().to_string()
}

fn to_halfwidth(c: char) -> char {
    char::from_u32(c as u32 - FULLWIDTH_OFFSET).unwrap_or(c)
}
