//! Ingest filename sanitization (§6.4: path-invalid chars replaced, trailing
//! dots/whitespace trimmed, repeated underscores collapsed, truncated to 245
//! Unicode characters).

const NAME_MAX_CHARS: usize = 245;
const INVALID_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Sanitizes a candidate filename for safe use in the ingest directory.
///
/// Idempotent: `sanitize(sanitize(s)) == sanitize(s)` for all `s`, and the
/// result never contains any of `\/:*?"<>|`.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;

    for c in name.chars() {
        let is_invalid = INVALID_CHARS.contains(&c) || c == '\0' || c.is_control();
        if is_invalid || c == '_' {
            if !prev_underscore {
                out.push('_');
            }
            prev_underscore = true;
        } else {
            out.push(c);
            prev_underscore = false;
        }
    }

    let trimmed = trim_trailing(&out);
    let truncated: String = trimmed.chars().take(NAME_MAX_CHARS).collect();
    trim_trailing(&truncated).to_string()
}

fn trim_trailing(s: &str) -> &str {
    s.trim_end_matches(|c: char| c == '.' || c.is_whitespace())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_invalid_chars() {
        assert_eq!(
            sanitize_filename("a/b\\c:d*e?f\"g<h>i|j.txt"),
            "a_b_c_d_e_f_g_h_i_j.txt"
        );
    }

    #[test]
    fn trims_trailing_dots_and_whitespace() {
        assert_eq!(sanitize_filename("file.txt...  "), "file.txt");
    }

    #[test]
    fn leading_dots_preserved() {
        assert_eq!(sanitize_filename("..hidden.txt"), "..hidden.txt");
    }

    #[test]
    fn collapses_underscores() {
        assert_eq!(sanitize_filename("file///name.txt"), "file_name.txt");
    }

    #[test]
    fn collapses_preexisting_underscore_runs() {
        assert_eq!(sanitize_filename("Foo__Bar___Baz.txt"), "Foo_Bar_Baz.txt");
    }

    #[test]
    fn control_chars() {
        assert_eq!(sanitize_filename("file\x00name.txt"), "file_name.txt");
    }

    #[test]
    fn truncates_to_245_unicode_chars() {
        let long = "a".repeat(300);
        let result = sanitize_filename(&long);
        assert_eq!(result.chars().count(), 245);
    }

    #[test]
    fn truncation_does_not_leave_trailing_dot() {
        let mut s = "x".repeat(244);
        s.push('.');
        s.push_str(&"y".repeat(10));
        let result = sanitize_filename(&s);
        assert!(!result.ends_with('.'));
    }

    #[test]
    fn sanitize_is_idempotent() {
        let cases = [
            "a/b\\c:d*e?f\"g<h>i|j.txt".to_string(),
            "  ..file..  ".to_string(),
            "plain_name.epub".to_string(),
            "z".repeat(500),
            "file___name...".to_string(),
        ];
        for s in cases {
            let once = sanitize_filename(&s);
            let twice = sanitize_filename(&once);
            assert_eq!(once, twice, "not idempotent for {s:?}");
        }
    }

    #[test]
    fn no_invalid_chars_remain() {
        let result = sanitize_filename("a/b\\c:d*e?f\"g<h>i|j");
        for c in INVALID_CHARS {
            assert!(!result.contains(*c));
        }
    }
}
