//! Mention extraction from message bodies.

/// Extract `@name` tokens from a message body, deduplicated in order of
/// first appearance. A mention starts at an `@` that is not glued to a
/// preceding word (so `code@example` is not a mention) and runs over
/// `[A-Za-z0-9_-]`.
pub fn parse_mentions(body: &str) -> Vec<String> {
    let bytes = body.as_bytes();
    let mut found: Vec<String> = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'@' {
            let preceded_by_word = i > 0 && is_name_byte(bytes[i - 1]);
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && is_name_byte(bytes[end]) {
                end += 1;
            }
            if !preceded_by_word && end > start {
                let name = &body[start..end];
                if !found.iter().any(|existing| existing == name) {
                    found.push(name.to_string());
                }
            }
            i = end.max(i + 1);
        } else {
            i += 1;
        }
    }

    found
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

/// Union of explicit mentions and those parsed from the body, deduplicated
/// with the explicit list first.
pub fn mention_union(explicit: &[String], body: &str) -> Vec<String> {
    let mut union: Vec<String> = Vec::new();
    for name in explicit.iter().cloned().chain(parse_mentions(body)) {
        if !union.contains(&name) {
            union.push(name);
        }
    }
    union
}
