//! Glob to SQL `LIKE` translation.
//!
//! `*` matches any run of characters and `?` exactly one. A backslash makes
//! the next character literal (`\*`, `\?`, `\\`); a trailing lone backslash is
//! itself literal. Everything `LIKE` would otherwise treat specially (`%`,
//! `_`, and the escape character `\`) is escaped.

const ESCAPE: char = '\\';

/// Translate one glob into a `LIKE` pattern using `\` as the escape character.
pub fn compile(glob: &str) -> String {
    let mut pattern = String::with_capacity(glob.len() + 4);
    let mut chars = glob.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => pattern.push('%'),
            '?' => pattern.push('_'),
            ESCAPE => push_literal(&mut pattern, chars.next().unwrap_or(ESCAPE)),
            other => push_literal(&mut pattern, other),
        }
    }
    pattern
}

fn push_literal(pattern: &mut String, c: char) {
    if matches!(c, '%' | '_' | ESCAPE) {
        pattern.push(ESCAPE);
    }
    pattern.push(c);
}

/// OR-combination of globs over the `filename` column.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Filter {
    patterns: Vec<String>,
}

impl Filter {
    pub fn new<I, S>(globs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: globs.into_iter().map(|glob| compile(glob.as_ref())).collect(),
        }
    }

    /// No globs: everything matches.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Compiled patterns, in the order their placeholders appear.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// A ` WHERE ...` clause with one placeholder per pattern, or an empty
    /// string when there are no patterns.
    pub fn where_clause(&self) -> String {
        if self.patterns.is_empty() {
            return String::new();
        }
        let conditions = vec!["filename LIKE ? ESCAPE '\\'"; self.patterns.len()];
        format!(" WHERE {}", conditions.join(" OR "))
    }
}
