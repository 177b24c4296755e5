use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as epoch milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Normalized sort name: leading "The ", "A " or "An " moved to the end.
///
/// "The Beatles" -> "Beatles, The". Names without an article are unchanged.
pub fn sort_name(name: &str) -> String {
    let trimmed = name.trim();
    for article in ["The ", "A ", "An "] {
        if trimmed.len() > article.len()
            && trimmed[..article.len()].eq_ignore_ascii_case(article)
        {
            let rest = &trimmed[article.len()..];
            return format!("{}, {}", rest, &trimmed[..article.len() - 1]);
        }
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_name_moves_articles() {
        assert_eq!(sort_name("The Beatles"), "Beatles, The");
        assert_eq!(sort_name("A Tribe Called Quest"), "Tribe Called Quest, A");
        assert_eq!(sort_name("An Autumn for Crippled Children"), "Autumn for Crippled Children, An");
    }

    #[test]
    fn sort_name_keeps_plain_names() {
        assert_eq!(sort_name("Radiohead"), "Radiohead");
        assert_eq!(sort_name("  Nina Simone "), "Nina Simone");
        // "Theory" starts with "The" but not "The " as a word
        assert_eq!(sort_name("Theory of a Deadman"), "Theory of a Deadman");
    }

    #[test]
    fn now_ms_is_recent() {
        // Sanity: after 2020-01-01 in epoch milliseconds.
        assert!(now_ms() > 1_577_836_800_000);
    }
}
