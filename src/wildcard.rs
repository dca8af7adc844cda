//! Case-insensitive `*`/`?` wildcard matching against `FNAME.FTYPE`
//! (spec §2, §6 "pattern").

/// Match `text` against `pattern`, where `*` matches any run of zero or
/// more characters and `?` matches exactly one character. Comparison is
/// case-insensitive, matching OASIS's uppercase-folded filenames.
pub fn matches(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.to_ascii_uppercase().chars().collect();
    let text: Vec<char> = text.to_ascii_uppercase().chars().collect();
    matches_chars(&pattern, &text)
}

fn matches_chars(pattern: &[char], text: &[char]) -> bool {
    // Standard greedy-backtracking glob match; table sizes here are the
    // length of an 8.3-ish filename so the O(n*m) worst case is trivial.
    let (mut p, mut t) = (0usize, 0usize);
    let (mut star_p, mut star_t) = (None, 0usize);

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star_p = Some(p);
            star_t = t;
            p += 1;
        } else if let Some(sp) = star_p {
            p = sp + 1;
            star_t += 1;
            t = star_t;
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

/// True when `pattern` is one of the "match everything" sentinels
/// recognized by the CLI surface (spec §6): absent, `*`, or `*.*`.
pub fn is_match_all(pattern: Option<&str>) -> bool {
    matches!(pattern, None | Some("*") | Some("*.*"))
}
