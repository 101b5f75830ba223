//! Signature filters for filter-driven runs.
//!
//! Patterns are anchored globs: `*` matches any run of characters, `?`
//! matches one character, everything else matches itself ignoring case.

/// Case-insensitive anchored glob match.
pub fn glob_matches(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().flat_map(char::to_lowercase).collect();
    let t: Vec<char> = text.chars().flat_map(char::to_lowercase).collect();

    let (mut pi, mut ti) = (0usize, 0usize);
    // Last `*` seen and the text position it is currently absorbing up to.
    let mut backtrack: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            backtrack = Some((pi, ti));
            pi += 1;
        } else if let Some((star, absorbed)) = backtrack {
            pi = star + 1;
            ti = absorbed + 1;
            backtrack = Some((star, absorbed + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}

/// A set of glob patterns; a signature passes if any pattern matches.
#[derive(Debug, Clone, Default)]
pub struct GlobFilter {
    patterns: Vec<String>,
}

impl GlobFilter {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { patterns: patterns.into_iter().map(Into::into).collect() }
    }

    pub fn matches(&self, signature: &str) -> bool {
        self.patterns.iter().any(|p| glob_matches(p, signature))
    }
}
