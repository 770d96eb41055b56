//! Wildcard matching for role and permission names
//!
//! Shell-style (`fnmatch`) semantics over the whole name:
//! - `*` - Matches any run of characters, including `.` (e.g., `project.*`)
//! - `?` - Matches exactly one character
//! - `[abc]`, `[a-z]`, `[!abc]` - Character classes
//! - `\x` - Escapes the next character
//!
//! Unlike path matching there is no segment structure: `project.*` matches
//! both `project.1` and `project.1.task.5`.

/// Single compiled pattern element
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyChar,
    Star,
    Class { negated: bool, items: Vec<ClassItem> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ClassItem {
    Char(char),
    Range(char, char),
}

impl Token {
    fn matches_char(&self, c: char) -> bool {
        match self {
            Token::Literal(l) => *l == c,
            Token::AnyChar => true,
            Token::Star => true,
            Token::Class { negated, items } => {
                let hit = items.iter().any(|item| match item {
                    ClassItem::Char(x) => *x == c,
                    ClassItem::Range(lo, hi) => *lo <= c && c <= *hi,
                });
                hit != *negated
            }
        }
    }
}

/// Pattern matcher for role and permission names
pub struct PatternMatcher;

impl PatternMatcher {
    /// Check if a name matches a wildcard pattern
    ///
    /// # Examples
    /// ```
    /// use rolegate::PatternMatcher;
    ///
    /// assert!(PatternMatcher::matches("project.*", "project.1"));
    /// assert!(PatternMatcher::matches("project.*", "project.1.task.5"));
    /// assert!(!PatternMatcher::matches("project.*", "projectx"));
    /// ```
    pub fn matches(pattern: &str, name: &str) -> bool {
        // Exact match
        if pattern == name {
            return true;
        }

        if !Self::is_pattern(pattern) {
            return false;
        }

        let tokens = Self::compile(pattern);
        let chars: Vec<char> = name.chars().collect();
        Self::match_tokens(&tokens, &chars)
    }

    /// Match two names where either side may carry wildcards
    ///
    /// Held names like `project.*` cover concrete lookups, and lookups like
    /// `users-*` cover concrete held names.
    pub fn names_match(lookup: &str, held: &str) -> bool {
        Self::matches(held, lookup) || Self::matches(lookup, held)
    }

    /// Name and guard match together; an unspecified guard matches any guard
    pub fn matches_scoped(lookup: &str, guard: Option<&str>, held: &str, held_guard: &str) -> bool {
        if let Some(guard) = guard {
            if guard != held_guard {
                return false;
            }
        }
        Self::names_match(lookup, held)
    }

    /// True if the string contains any wildcard metacharacter
    pub fn is_pattern(s: &str) -> bool {
        s.contains(['*', '?', '[', '\\'])
    }

    /// Compile a pattern string into tokens
    fn compile(pattern: &str) -> Vec<Token> {
        let chars: Vec<char> = pattern.chars().collect();
        let mut tokens = Vec::with_capacity(chars.len());
        let mut i = 0;

        while i < chars.len() {
            match chars[i] {
                '*' => {
                    // Collapse runs of stars
                    if tokens.last() != Some(&Token::Star) {
                        tokens.push(Token::Star);
                    }
                    i += 1;
                }
                '?' => {
                    tokens.push(Token::AnyChar);
                    i += 1;
                }
                '\\' if i + 1 < chars.len() => {
                    tokens.push(Token::Literal(chars[i + 1]));
                    i += 2;
                }
                '[' => match Self::compile_class(&chars, i) {
                    Some((token, next)) => {
                        tokens.push(token);
                        i = next;
                    }
                    // Unterminated class is a literal bracket
                    None => {
                        tokens.push(Token::Literal('['));
                        i += 1;
                    }
                },
                c => {
                    tokens.push(Token::Literal(c));
                    i += 1;
                }
            }
        }

        tokens
    }

    /// Compile a `[...]` class starting at `start`; returns the token and the index after `]`
    fn compile_class(chars: &[char], start: usize) -> Option<(Token, usize)> {
        let mut i = start + 1;
        let mut negated = false;
        if i < chars.len() && (chars[i] == '!' || chars[i] == '^') {
            negated = true;
            i += 1;
        }

        let mut items = Vec::new();
        let mut first = true;
        while i < chars.len() {
            let c = chars[i];
            // `]` directly after the opening bracket is a literal member
            if c == ']' && !first {
                return Some((Token::Class { negated, items }, i + 1));
            }
            first = false;

            if i + 2 < chars.len() && chars[i + 1] == '-' && chars[i + 2] != ']' {
                items.push(ClassItem::Range(c, chars[i + 2]));
                i += 3;
            } else {
                items.push(ClassItem::Char(c));
                i += 1;
            }
        }

        None
    }

    /// Greedy match with single-star backtracking
    fn match_tokens(tokens: &[Token], name: &[char]) -> bool {
        let mut t = 0;
        let mut n = 0;
        let mut star: Option<(usize, usize)> = None;

        while n < name.len() {
            if t < tokens.len() && tokens[t] == Token::Star {
                star = Some((t, n));
                t += 1;
            } else if t < tokens.len() && tokens[t].matches_char(name[n]) {
                t += 1;
                n += 1;
            } else if let Some((star_t, star_n)) = star {
                // Let the last star swallow one more character
                t = star_t + 1;
                n = star_n + 1;
                star = Some((star_t, star_n + 1));
            } else {
                return false;
            }
        }

        tokens[t..].iter().all(|token| *token == Token::Star)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(PatternMatcher::matches("users-manage", "users-manage"));
        assert!(!PatternMatcher::matches("users-manage", "users-view"));
    }

    #[test]
    fn test_star_spans_dots() {
        assert!(PatternMatcher::matches("project.*", "project.1"));
        assert!(PatternMatcher::matches("project.*", "project.1.task.5"));
        assert!(PatternMatcher::matches("project.*", "project."));
        assert!(!PatternMatcher::matches("project.*", "projectx"));
        assert!(!PatternMatcher::matches("project.*", "project"));
    }

    #[test]
    fn test_star_positions() {
        assert!(PatternMatcher::matches("*-manage", "users-manage"));
        assert!(PatternMatcher::matches("users-*", "users-manage"));
        assert!(PatternMatcher::matches("a*b*c", "abc"));
        assert!(PatternMatcher::matches("a*b*c", "aXXbYYc"));
        assert!(!PatternMatcher::matches("a*b*c", "acb"));
        assert!(PatternMatcher::matches("*", ""));
        assert!(PatternMatcher::matches("**", "anything.at.all"));
    }

    #[test]
    fn test_question_mark() {
        assert!(PatternMatcher::matches("project.?", "project.1"));
        assert!(!PatternMatcher::matches("project.?", "project.12"));
    }

    #[test]
    fn test_character_classes() {
        assert!(PatternMatcher::matches("report-[abc]", "report-b"));
        assert!(!PatternMatcher::matches("report-[abc]", "report-d"));
        assert!(PatternMatcher::matches("level-[0-9]", "level-7"));
        assert!(!PatternMatcher::matches("level-[!0-9]", "level-7"));
        assert!(PatternMatcher::matches("level-[!0-9]", "level-x"));
        assert!(PatternMatcher::matches("x[]]y", "x]y"));
    }

    #[test]
    fn test_unterminated_class_is_literal() {
        assert!(PatternMatcher::matches("weird[name", "weird[name"));
        assert!(!PatternMatcher::matches("weird[name", "weirdxname"));
    }

    #[test]
    fn test_escape() {
        assert!(PatternMatcher::matches(r"literal\*", "literal*"));
        assert!(!PatternMatcher::matches(r"literal\*", "literalx"));
    }

    #[test]
    fn test_ip_style_patterns() {
        assert!(PatternMatcher::matches("192.168.1.*", "192.168.1.20"));
        assert!(!PatternMatcher::matches("192.168.1.*", "192.168.2.20"));
        assert!(PatternMatcher::matches("10.*", "10.0.0.1"));
    }

    #[test]
    fn test_names_match_is_bidirectional() {
        assert!(PatternMatcher::names_match("project.1", "project.*"));
        assert!(PatternMatcher::names_match("users-*", "users-manage"));
        assert!(!PatternMatcher::names_match("users-*", "roles-manage"));
    }

    #[test]
    fn test_guard_scoping() {
        assert!(PatternMatcher::matches_scoped("edit", None, "edit", "api"));
        assert!(PatternMatcher::matches_scoped("edit", Some("web"), "edit", "web"));
        assert!(!PatternMatcher::matches_scoped("edit", Some("web"), "edit", "api"));
    }
}
