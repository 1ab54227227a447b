//! Line-oriented `key=value` ledger text
//!
//! Format (compatible with Java properties files):
//! ```text
//! # Port reservations
//! # 2026-10-18T09:30:00.000+00:00
//! 56001=1792315800000
//! 56002=1792315801250
//! ```
//!
//! Blank lines and `#`/`!` comments are ignored. A key ends at the first
//! unescaped `=`, `:` or whitespace. Leading whitespace of a value is skipped,
//! trailing whitespace is kept. Lines that don't fit are kept as a key with an
//! empty value rather than rejected.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};

/// Header comment written on every rewrite
pub const LEDGER_HEADER: &str = "Port reservations";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse ledger text; never fails
    pub fn parse(text: &str) -> Self {
        let mut entries = BTreeMap::new();

        for raw in text.lines() {
            let line = raw.trim_start();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }

            let (key, value) = split_line(line);
            if key.is_empty() {
                continue;
            }
            entries.insert(key, value);
        }

        Properties { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Keep only the entries for which `keep` returns true
    ///
    /// # Returns
    /// Number of entries removed
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&str, &str) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|k, v| keep(k, v));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_map(self) -> BTreeMap<String, String> {
        self.entries
    }

    /// Serialize with a header comment and a timestamp comment
    pub fn to_text(&self, header: &str) -> String {
        let mut out = String::new();
        out.push('#');
        out.push_str(header);
        out.push('\n');
        out.push('#');
        out.push_str(&Utc::now().to_rfc3339_opts(SecondsFormat::Millis, false));
        out.push('\n');

        for (key, value) in &self.entries {
            out.push_str(&escape(key, true));
            out.push('=');
            out.push_str(&escape(value, false));
            out.push('\n');
        }
        out
    }
}

fn split_line(line: &str) -> (String, String) {
    let mut key = String::new();
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    key.push(unescape_char(escaped));
                }
            }
            '=' | ':' => {
                let rest: String = chars.collect();
                return (key, unescape(rest.trim_start()));
            }
            c if c.is_whitespace() => {
                let rest: String = chars.collect();
                let rest = rest.trim_start();
                // "key = value" and "key value" both separate here
                let rest = rest
                    .strip_prefix('=')
                    .or_else(|| rest.strip_prefix(':'))
                    .unwrap_or(rest);
                return (key, unescape(rest.trim_start()));
            }
            c => key.push(c),
        }
    }

    (key, String::new())
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(unescape_char(escaped));
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn unescape_char(c: char) -> char {
    match c {
        't' => '\t',
        'n' => '\n',
        'r' => '\r',
        'f' => '\u{000C}',
        other => other,
    }
}

fn escape(s: &str, is_key: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for (i, c) in s.chars().enumerate() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '=' | ':' | '#' | '!' => {
                out.push('\\');
                out.push(c);
            }
            ' ' if is_key || i == 0 => out.push_str("\\ "),
            c => out.push(c),
        }
    }
    out
}
