// src/chefext/runlist.rs — Run-list normalization
// Maintained by the chef-extension contributors | © 2025 | MIT licensed
// Free-form "a,recipe[b],\"role[c]\"" input becomes canonical recipe[...] / role[...] tokens.

/// Split on commas outside brackets, unquote, and wrap bare names as recipes.
pub fn normalize(raw: &str) -> Vec<String> {
    split_top_level(raw)
        .into_iter()
        .map(|segment| segment.trim().trim_matches('"').trim())
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            if is_qualified(segment) {
                segment.to_string()
            } else {
                format!("recipe[{}]", segment)
            }
        })
        .collect()
}

fn split_top_level(raw: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut depth: usize = 0;
    let mut start = 0;

    for (idx, ch) in raw.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                segments.push(&raw[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    segments.push(&raw[start..]);
    segments
}

fn is_qualified(segment: &str) -> bool {
    ["recipe[", "role["].iter().any(|prefix| {
        segment
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix(']'))
            .map_or(false, |inner| !inner.is_empty() && !inner.contains(['[', ']']))
    })
}
