//! Text processing utilities

use std::borrow::Cow;

pub struct TextUtils;

impl TextUtils {
    /// Case-insensitive substring check. An empty pattern matches everything.
    pub fn contains_ignore_case(text: &str, pattern: &str) -> bool {
        if pattern.is_empty() {
            return true;
        }
        if text.is_ascii() && pattern.is_ascii() {
            if pattern.len() > text.len() {
                return false;
            }
            return text
                .as_bytes()
                .windows(pattern.len())
                .any(|window| window.eq_ignore_ascii_case(pattern.as_bytes()));
        }
        text.to_lowercase().contains(&pattern.to_lowercase())
    }

    /// Collapse runs of whitespace (including newlines) into single spaces.
    pub fn normalize_whitespace(text: &str) -> Cow<'_, str> {
        let needs_work = text.trim() != text
            || text.chars().any(|c| c.is_whitespace() && c != ' ')
            || text.contains("  ");
        if needs_work {
            Cow::Owned(text.split_whitespace().collect::<Vec<_>>().join(" "))
        } else {
            Cow::Borrowed(text)
        }
    }

    /// Truncate to at most `max_chars` characters, the `...` suffix included.
    pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> Cow<'_, str> {
        if text.chars().count() <= max_chars {
            Cow::Borrowed(text)
        } else if max_chars <= 3 {
            Cow::Borrowed("...")
        } else {
            let mut result: String = text.chars().take(max_chars - 3).collect();
            result.truncate(result.trim_end().len());
            result.push_str("...");
            Cow::Owned(result)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_ignore_case_handles_ascii_and_unicode() {
        assert!(TextUtils::contains_ignore_case("My Name is Frank", "name IS"));
        assert!(!TextUtils::contains_ignore_case("short", "much longer pattern"));
        assert!(TextUtils::contains_ignore_case("Straße in MÜNCHEN", "münchen"));
        assert!(TextUtils::contains_ignore_case("anything", ""));
    }

    #[test]
    fn normalize_whitespace_borrows_clean_text() {
        assert!(matches!(TextUtils::normalize_whitespace("already clean"), Cow::Borrowed(_)));
        assert_eq!(TextUtils::normalize_whitespace("  two\n\nlines\t here "), "two lines here");
    }

    #[test]
    fn truncate_counts_characters_not_bytes() {
        assert_eq!(TextUtils::truncate_with_ellipsis("My name is Frank", 50), "My name is Frank");

        let long = "é".repeat(60);
        let cut = TextUtils::truncate_with_ellipsis(&long, 50);
        assert_eq!(cut.chars().count(), 50);
        assert!(cut.ends_with("..."));

        assert_eq!(TextUtils::truncate_with_ellipsis("abcdef", 3), "...");
    }

    #[test]
    fn truncate_does_not_leave_space_before_ellipsis() {
        let text = format!("{} tail", "a".repeat(46));
        assert_eq!(TextUtils::truncate_with_ellipsis(&text, 50), format!("{}...", "a".repeat(46)));
    }
}
