//! Artist credit decomposition
//!
//! Splits a raw artist credit and a track title into the individual artist
//! names they mention. Pure string handling, no I/O.

/// Feature markers, matched ASCII case-insensitively; the abbreviations may
/// run straight into the first name
const FEATURE_MARKERS: &[&str] = &["featuring ", "feat.", "ft."];

/// Separator of multi-artist credits without a feature clause
const CREDIT_SEPARATOR: &str = " · ";

/// A feature clause cut out of a string
struct FeatureClause {
    /// The string with the clause removed
    remainder: String,
    /// Raw list following the marker
    features: String,
}

/// Names of every artist mentioned in `artist` and `title`
///
/// Artist-string names come first, then names from feature clauses in the
/// title. When the artist string has a feature clause, what is left of it is
/// kept whole as the base artist; otherwise it is split on `" · "` only.
/// Duplicates are dropped case-sensitively, keeping the first occurrence.
pub fn parse_artists(artist: &str, title: &str) -> Vec<String> {
    let mut names = Vec::new();

    let (base, artist_features) = extract_features(artist);
    if artist_features.is_empty() {
        names.extend(
            artist
                .split(CREDIT_SEPARATOR)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        );
    } else {
        let base = base.trim();
        if !base.is_empty() {
            names.push(base.to_string());
        }
        names.extend(artist_features);
    }

    let (_, title_features) = extract_features(title);
    names.extend(title_features);

    let mut unique: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        if !unique.contains(&name) {
            unique.push(name);
        }
    }
    unique
}

/// Remove every feature clause from `input`, returning what is left and the
/// featured names in order of appearance
fn extract_features(input: &str) -> (String, Vec<String>) {
    let mut remaining = input.to_string();
    let mut features = Vec::new();

    while let Some(clause) = find_bracketed(&remaining).or_else(|| find_inline(&remaining)) {
        features.extend(split_feature_list(&clause.features));
        remaining = clause.remainder;
    }

    (remaining, features)
}

fn marker_len(text: &str) -> Option<usize> {
    let lower = text.to_ascii_lowercase();
    FEATURE_MARKERS
        .iter()
        .find(|marker| lower.starts_with(*marker))
        .map(|marker| marker.len())
}

/// `(feat. X)` or `[feat. X]`
fn find_bracketed(input: &str) -> Option<FeatureClause> {
    for (open, ch) in input.char_indices() {
        let close_ch = match ch {
            '(' => ')',
            '[' => ']',
            _ => continue,
        };

        let inner_start = open + ch.len_utf8();
        let Some(close_rel) = input[inner_start..].find(close_ch) else {
            continue;
        };
        let inner = &input[inner_start..inner_start + close_rel];
        let trimmed = inner.trim_start();
        let Some(len) = marker_len(trimmed) else {
            continue;
        };

        let after = inner_start + close_rel + close_ch.len_utf8();
        let remainder = format!("{} {}", input[..open].trim_end(), input[after..].trim_start());
        return Some(FeatureClause {
            remainder: remainder.trim().to_string(),
            features: trimmed[len..].trim_start().to_string(),
        });
    }
    None
}

/// Trailing ` feat. X`
fn find_inline(input: &str) -> Option<FeatureClause> {
    let lower = input.to_ascii_lowercase();
    FEATURE_MARKERS
        .iter()
        .filter_map(|marker| {
            lower
                .find(&format!(" {}", marker))
                .map(|pos| (pos, marker.len() + 1))
        })
        .min_by_key(|(pos, _)| *pos)
        .map(|(pos, len)| FeatureClause {
            remainder: input[..pos].trim().to_string(),
            features: input[pos + len..].trim_start().to_string(),
        })
}

/// Split on `,` `&` `·` and the word `and`
fn split_feature_list(list: &str) -> Vec<String> {
    list.split([',', '&', '·'])
        .flat_map(split_on_and)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn split_on_and(part: &str) -> Vec<&str> {
    let lower = part.to_ascii_lowercase();
    let mut pieces = Vec::new();
    let mut start = 0;
    while let Some(rel) = lower[start..].find(" and ") {
        pieces.push(&part[start..start + rel]);
        start += rel + " and ".len();
    }
    pieces.push(&part[start..]);
    pieces
}
