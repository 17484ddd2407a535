//! Stem display-name detection from filenames

use std::path::Path;

// Common stem keywords, in priority order
const KEYWORDS: &[(&str, &str)] = &[
    ("vocals", "Vocals"),
    ("vox", "Vox"),
    ("drums", "Drums"),
    ("bass", "Bass"),
    ("keys", "Keys"),
    ("keyboard", "Keyboard"),
    ("piano", "Piano"),
    ("guitar", "Guitar"),
    ("synth", "Synth"),
    ("pad", "Pad"),
    ("strings", "Strings"),
    ("orchestra", "Orchestra"),
    ("click", "Click"),
    ("guide", "Guide"),
];

/// Detect a stem display name from a filename using known keywords
///
/// Tries "Song - Vocals.wav", "song_vocals.wav", "Song (Vocals).wav", then a
/// plain substring match, and falls back to a cleaned-up filename.
pub fn detect_stem_name(filename: &str) -> String {
    let name_without_ext = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);

    let lowercase = name_without_ext.to_lowercase();

    // "Song Name - Vocals.wav"
    if let Some(after_dash) = lowercase.split(" - ").nth(1) {
        for (keyword, display) in KEYWORDS {
            if after_dash.contains(keyword) {
                return display.to_string();
            }
        }
    }

    // "Song Name_Vocals.wav"
    if let Some(after_underscore) = lowercase.split('_').last() {
        for (keyword, display) in KEYWORDS {
            if after_underscore.contains(keyword) {
                return display.to_string();
            }
        }
    }

    // "Song Name (Vocals).wav"
    if let (Some(start), Some(end)) = (lowercase.find('('), lowercase.find(')')) {
        if end > start {
            let in_parens = &lowercase[start + 1..end];
            for (keyword, display) in KEYWORDS {
                if in_parens.contains(keyword) {
                    return display.to_string();
                }
            }
        }
    }

    // Anywhere in the filename
    for (keyword, display) in KEYWORDS {
        if lowercase.contains(keyword) {
            return display.to_string();
        }
    }

    clean_filename(name_without_ext)
}

/// Append " 2", " 3", ... to names that occur more than once
pub fn deduplicate_names(names: &mut [String]) {
    use std::collections::HashMap;

    let mut totals: HashMap<String, usize> = HashMap::new();
    for name in names.iter() {
        *totals.entry(name.clone()).or_insert(0) += 1;
    }

    let mut seen: HashMap<String, usize> = HashMap::new();
    for name in names.iter_mut() {
        if totals[name.as_str()] > 1 {
            let n = seen.entry(name.clone()).or_insert(0);
            *n += 1;
            *name = format!("{} {}", name, n);
        }
    }
}

fn clean_filename(name: &str) -> String {
    let mut result = name
        .trim_end_matches(|c: char| c.is_numeric() || c == '_' || c == ' ')
        .to_string();

    if result.len() < 2 {
        result = name.to_string();
    }

    let mut chars = result.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_basic_keywords() {
        assert_eq!(detect_stem_name("vocals.wav"), "Vocals");
        assert_eq!(detect_stem_name("drums.mp3"), "Drums");
        assert_eq!(detect_stem_name("bass.flac"), "Bass");
        assert_eq!(detect_stem_name("click.wav"), "Click");
    }

    #[test]
    fn test_detect_with_dash_pattern() {
        assert_eq!(detect_stem_name("Way Maker - Vocals.wav"), "Vocals");
        assert_eq!(detect_stem_name("Way Maker - Drums 01.wav"), "Drums");
    }

    #[test]
    fn test_detect_with_underscore_pattern() {
        assert_eq!(detect_stem_name("song_vocals.wav"), "Vocals");
        assert_eq!(detect_stem_name("track_guide.mp3"), "Guide");
    }

    #[test]
    fn test_detect_with_parentheses() {
        assert_eq!(detect_stem_name("Song (Vocals).wav"), "Vocals");
        assert_eq!(detect_stem_name("Track (Strings).mp3"), "Strings");
    }

    #[test]
    fn test_detect_case_insensitive() {
        assert_eq!(detect_stem_name("VOCALS.wav"), "Vocals");
        assert_eq!(detect_stem_name("DrUmS.mp3"), "Drums");
    }

    #[test]
    fn test_fallback_cleans_filename() {
        assert_eq!(detect_stem_name("choir_01.wav"), "Choir");
        assert_eq!(detect_stem_name("tambourine.wav"), "Tambourine");
    }

    #[test]
    fn test_deduplicate_names() {
        let mut names = vec![
            "Vocals".to_string(),
            "Guitar".to_string(),
            "Vocals".to_string(),
            "Vocals".to_string(),
        ];
        deduplicate_names(&mut names);
        assert_eq!(names, vec!["Vocals 1", "Guitar", "Vocals 2", "Vocals 3"]);
    }
}
