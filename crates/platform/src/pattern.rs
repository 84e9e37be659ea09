//! Glob-to-regex conversion shared by both adapters.
//!
//! Supported syntax: `*` and `?` match within a path segment, `**` crosses
//! segment boundaries, `[...]`/`[!...]` are character classes. Everything
//! else is literal.

use regex::Regex;

use crate::error::AdapterError;

/// Compile a glob pattern into an anchored [`Regex`] over `/`-separated
/// relative paths.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, AdapterError> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');

    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    // `**/` may match zero directories
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        re.push_str("(?:.*/)?");
                    } else {
                        re.push_str(".*");
                    }
                } else {
                    re.push_str("[^/]*");
                }
            }
            '?' => re.push_str("[^/]"),
            '[' => {
                re.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    re.push('^');
                }
                let mut closed = false;
                for c in chars.by_ref() {
                    match c {
                        ']' => {
                            closed = true;
                            break;
                        }
                        '\\' => re.push_str("\\\\"),
                        _ => re.push(c),
                    }
                }
                if !closed {
                    return Err(AdapterError::InvalidPattern {
                        pattern: pattern.to_string(),
                        message: "unclosed character class".to_string(),
                    });
                }
                re.push(']');
            }
            // regex metacharacters taken literally in globs
            '.' | '+' | '(' | ')' | '{' | '}' | '^' | '$' | '|' | '\\' => {
                re.push('\\');
                re.push(c);
            }
            _ => re.push(c),
        }
    }

    re.push('$');
    Regex::new(&re).map_err(|e| AdapterError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, path: &str) -> bool {
        glob_to_regex(pattern).unwrap().is_match(path)
    }

    #[test]
    fn star_stays_within_segment() {
        assert!(matches("*.txt", "hello.txt"));
        assert!(!matches("*.txt", "sub/hello.txt"));
    }

    #[test]
    fn double_star_crosses_segments() {
        assert!(matches("**/*.txt", "a/b/c.txt"));
        assert!(matches("**/*.txt", "c.txt"));
        assert!(matches("src/**", "src/a/b"));
    }

    #[test]
    fn question_mark_single_char() {
        assert!(matches("?.rs", "a.rs"));
        assert!(!matches("?.rs", "ab.rs"));
    }

    #[test]
    fn character_class() {
        assert!(matches("[ab].txt", "a.txt"));
        assert!(!matches("[!ab].txt", "a.txt"));
        assert!(matches("[!ab].txt", "c.txt"));
    }

    #[test]
    fn literal_dots_are_escaped() {
        assert!(!matches("a.txt", "axtxt"));
    }

    #[test]
    fn unclosed_class_is_an_error() {
        assert!(glob_to_regex("[abc").is_err());
    }
}
