//! Instrument name normalization and classification.
//!
//! Header text from the text layer or the header-label pass is noisy:
//! "Flute 1", "1st Bb Clarinet", "FLUTE  2". Normalization reduces it to a
//! canonical instrument key plus an optional part number; classification maps
//! the key to a section and written transposition.

use lazy_static::lazy_static;
use regex::Regex;

/// Labels that carry no information and must never survive as instrument
/// names.
const FORBIDDEN_LABELS: &[&str] = &["unknown", "none", "n/a", "-", ""];

/// Replacement label for pages and parts whose instrument cannot be named.
pub const UNLABELLED: &str = "Unlabelled";

pub fn is_forbidden_label(label: &str) -> bool {
    let normalized = label.trim().to_ascii_lowercase();
    FORBIDDEN_LABELS.contains(&normalized.as_str())
}

/// A normalized part header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedHeader {
    /// Canonical lowercase instrument key, numbering stripped ("flute").
    pub instrument_key: String,
    /// Title-cased display name without numbering ("Flute").
    pub display_name: String,
    /// Part number parsed from the header, when present.
    pub part_number: Option<u32>,
}

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
    // Trailing "1", "2nd", "III." style numbering. The separator is required
    // so names ending in a roman-numeral letter ("timpani") survive intact.
    static ref TRAILING_NUMBER: Regex =
        Regex::new(r"(?i)[\s.,-]+((?P<arabic>\d+)(st|nd|rd|th)?|(?P<roman>[ivx]{1,4}))\.?$").unwrap();
    // Leading "1st ", "2. " style numbering.
    static ref LEADING_NUMBER: Regex =
        Regex::new(r"(?i)^(?P<arabic>\d+)(st|nd|rd|th)?[\s.,-]+").unwrap();
}

fn roman_to_number(roman: &str) -> Option<u32> {
    match roman.to_ascii_lowercase().as_str() {
        "i" => Some(1),
        "ii" => Some(2),
        "iii" => Some(3),
        "iv" => Some(4),
        _ => None,
    }
}

/// Normalize raw header text. Returns `None` for empty or forbidden labels.
pub fn normalize_header(raw: &str) -> Option<NormalizedHeader> {
    let collapsed = WHITESPACE.replace_all(raw.trim(), " ").to_string();
    if is_forbidden_label(&collapsed) {
        return None;
    }

    let mut name = collapsed.to_ascii_lowercase();
    let mut part_number: Option<u32> = None;

    if let Some(captures) = LEADING_NUMBER.captures(&name) {
        if let Some(arabic) = captures.name("arabic") {
            part_number = arabic.as_str().parse().ok();
        }
        name = LEADING_NUMBER.replace(&name, "").to_string();
    }
    if let Some(captures) = TRAILING_NUMBER.captures(&name) {
        let parsed = if let Some(arabic) = captures.name("arabic") {
            arabic.as_str().parse().ok()
        } else {
            captures.name("roman").and_then(|m| roman_to_number(m.as_str()))
        };
        // Only strip when it parsed as a number; "horn in f" must keep its f.
        if let Some(n) = parsed {
            part_number = Some(n);
            name = TRAILING_NUMBER.replace(&name, "").to_string();
        }
    }

    let name = name.trim().to_string();
    if name.is_empty() || is_forbidden_label(&name) {
        return None;
    }

    Some(NormalizedHeader {
        display_name: title_case(&name),
        instrument_key: name,
        part_number,
    })
}

fn title_case(name: &str) -> String {
    name.split(' ')
        .map(|word| {
            // Keep transposition letters conventional: "bb" -> "Bb", "eb" -> "Eb".
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Deterministic section + transposition lookup over normalized names.
///
/// Ordered most-specific-first: "bass clarinet" must match before "clarinet".
const CLASSIFICATION_TABLE: &[(&str, &str, &str)] = &[
    ("full score", "Score", "C"),
    ("conductor", "Score", "C"),
    ("score", "Score", "C"),
    ("piccolo", "Woodwinds", "C"),
    ("flute", "Woodwinds", "C"),
    ("oboe", "Woodwinds", "C"),
    ("english horn", "Woodwinds", "F"),
    ("bassoon", "Woodwinds", "C"),
    ("eb clarinet", "Woodwinds", "Eb"),
    ("bass clarinet", "Woodwinds", "Bb"),
    ("alto clarinet", "Woodwinds", "Eb"),
    ("clarinet", "Woodwinds", "Bb"),
    ("soprano sax", "Woodwinds", "Bb"),
    ("alto sax", "Woodwinds", "Eb"),
    ("tenor sax", "Woodwinds", "Bb"),
    ("baritone sax", "Woodwinds", "Eb"),
    ("piccolo trumpet", "Brass", "A"),
    ("trumpet", "Brass", "Bb"),
    ("cornet", "Brass", "Bb"),
    ("flugelhorn", "Brass", "Bb"),
    ("french horn", "Brass", "F"),
    ("horn in f", "Brass", "F"),
    ("horn", "Brass", "F"),
    ("bass trombone", "Brass", "C"),
    ("trombone", "Brass", "C"),
    ("euphonium", "Brass", "C"),
    ("baritone t.c.", "Brass", "Bb"),
    ("baritone", "Brass", "C"),
    ("tuba", "Brass", "C"),
    ("sousaphone", "Brass", "C"),
    ("timpani", "Percussion", "C"),
    ("mallet", "Percussion", "C"),
    ("xylophone", "Percussion", "C"),
    ("glockenspiel", "Percussion", "C"),
    ("bells", "Percussion", "C"),
    ("snare", "Percussion", "C"),
    ("bass drum", "Percussion", "C"),
    ("cymbal", "Percussion", "C"),
    ("drum", "Percussion", "C"),
    ("percussion", "Percussion", "C"),
    ("violin", "Strings", "C"),
    ("viola", "Strings", "C"),
    ("violoncello", "Strings", "C"),
    ("cello", "Strings", "C"),
    ("double bass", "Strings", "C"),
    ("string bass", "Strings", "C"),
    ("harp", "Strings", "C"),
    ("piano", "Other", "C"),
];

/// Section and written transposition for a normalized instrument key.
/// Unknown instruments classify as ("Other", "C").
pub fn classify(instrument_key: &str) -> (&'static str, &'static str) {
    for (needle, section, transposition) in CLASSIFICATION_TABLE {
        if instrument_key.contains(needle) {
            return (section, transposition);
        }
    }
    ("Other", "C")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_numbers_become_part_numbers() {
        let header = normalize_header("Flute 2").unwrap();
        assert_eq!(header.instrument_key, "flute");
        assert_eq!(header.display_name, "Flute");
        assert_eq!(header.part_number, Some(2));
    }

    #[test]
    fn ordinal_prefixes_are_stripped() {
        let header = normalize_header("1st Bb Clarinet").unwrap();
        assert_eq!(header.instrument_key, "bb clarinet");
        assert_eq!(header.part_number, Some(1));
    }

    #[test]
    fn roman_numerals_parse() {
        let header = normalize_header("Trombone III").unwrap();
        assert_eq!(header.instrument_key, "trombone");
        assert_eq!(header.part_number, Some(3));
    }

    #[test]
    fn names_ending_in_roman_letters_survive() {
        let header = normalize_header("Timpani").unwrap();
        assert_eq!(header.instrument_key, "timpani");
        assert_eq!(header.part_number, None);
    }

    #[test]
    fn horn_in_f_keeps_its_pitch_letter() {
        let header = normalize_header("Horn in F").unwrap();
        assert_eq!(header.instrument_key, "horn in f");
        assert_eq!(header.part_number, None);
    }

    #[test]
    fn whitespace_and_case_are_normalized() {
        let a = normalize_header("FLUTE   1").unwrap();
        let b = normalize_header("flute 1").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn forbidden_labels_normalize_to_none() {
        for label in ["unknown", "  NONE ", "n/a", "-", ""] {
            assert!(normalize_header(label).is_none(), "{:?}", label);
            assert!(is_forbidden_label(label), "{:?}", label);
        }
        assert!(!is_forbidden_label("Flute"));
    }

    #[test]
    fn classification_matches_spec_examples() {
        assert_eq!(classify("bb clarinet"), ("Woodwinds", "Bb"));
        assert_eq!(classify("flute"), ("Woodwinds", "C"));
        assert_eq!(classify("french horn"), ("Brass", "F"));
        assert_eq!(classify("full score"), ("Score", "C"));
        assert_eq!(classify("alto sax"), ("Woodwinds", "Eb"));
    }

    #[test]
    fn specific_entries_win_over_general_ones() {
        assert_eq!(classify("bass clarinet"), ("Woodwinds", "Bb"));
        assert_eq!(classify("eb clarinet"), ("Woodwinds", "Eb"));
        assert_eq!(classify("bass trombone"), ("Brass", "C"));
    }

    #[test]
    fn unknown_instruments_fall_back_to_other() {
        assert_eq!(classify("theremin"), ("Other", "C"));
    }
}
