//! Masking of secret-like content before entries are persisted.
//!
//! Two passes over free text:
//!
//! 1. `name=value`, `name: value` and `"name":"value"` pairs whose name is
//!    sensitive have the value replaced by [`MASK`].
//! 2. Every remaining deny-listed word is replaced by [`REDACTED_WORD`],
//!    case-insensitively.
//!
//! After masking, no deny-listed word appears in the text in any case.

use std::collections::BTreeMap;

use tillvault_core::AuditEntry;

/// Words that mark a field or fragment as secret.
pub const DEFAULT_DENY_LIST: &[&str] = &[
    "password",
    "passwd",
    "pwd",
    "secret",
    "key",
    "token",
    "credential",
    "connectionstring",
    "apikey",
];

/// Replacement for a masked value.
pub const MASK: &str = "[MASKED]";

/// Replacement for a deny-listed word.
pub const REDACTED_WORD: &str = "***";

/// Applies the deny list to audit entries.
#[derive(Debug, Clone)]
pub struct Masker {
    /// Lowercased, longest first.
    deny: Vec<String>,
}

impl Default for Masker {
    fn default() -> Self {
        Self::new(DEFAULT_DENY_LIST.iter().copied())
    }
}

impl Masker {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut deny: Vec<String> = words
            .into_iter()
            .map(|w| w.as_ref().trim().to_ascii_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        deny.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        deny.dedup();
        Self { deny }
    }

    pub fn deny_list(&self) -> &[String] {
        &self.deny
    }

    /// Whether a field name looks secret. Separators are ignored, so
    /// `Connection_String` and `api-key` both match.
    pub fn is_sensitive(&self, name: &str) -> bool {
        let normalized: String = name
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' ' | '.'))
            .collect::<String>()
            .to_ascii_lowercase();
        self.deny.iter().any(|w| normalized.contains(w.as_str()))
    }

    /// Mask free text: secret pairs first, then deny-listed words.
    pub fn mask_text(&self, text: &str) -> String {
        let mut out = self.mask_pairs(text);
        for word in &self.deny {
            out = replace_ignore_case(&out, word);
        }
        out
    }

    /// Mask a details map. Values under sensitive names are replaced whole;
    /// everything else goes through [`Masker::mask_text`].
    ///
    /// Distinct names can mask to the same text (`token` and `secret` both
    /// become `***`). Repeats get a numeric suffix, `***#2`, `***#3`, in
    /// name order, so no entry is lost.
    pub fn mask_details(&self, details: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for (name, value) in details {
            let value = if self.is_sensitive(name) {
                MASK.to_string()
            } else {
                self.mask_text(value)
            };
            let masked = self.mask_text(name);
            let mut key = masked.clone();
            let mut n = 2;
            while out.contains_key(&key) {
                key = format!("{masked}#{n}");
                n += 1;
            }
            out.insert(key, value);
        }
        out
    }

    /// Mask an entry's free-text fields in place.
    ///
    /// Path, principal and operation are identifiers and stay verbatim.
    pub fn mask_entry(&self, entry: &mut AuditEntry) {
        if let Some(ref error) = entry.error {
            entry.error = Some(self.mask_text(error));
        }
        entry.details = self.mask_details(&entry.details);
    }

    fn mask_pairs(&self, text: &str) -> String {
        let bytes = text.as_bytes();
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        let mut i = 0;

        while i < bytes.len() {
            if bytes[i] == b'=' || bytes[i] == b':' {
                if let Some((start, end)) = value_span(bytes, i) {
                    let name = name_before(bytes, cursor, i);
                    if !name.is_empty() && self.is_sensitive(&text[name]) {
                        out.push_str(&text[cursor..start]);
                        out.push_str(MASK);
                        cursor = end;
                        i = end;
                        continue;
                    }
                }
            }
            i += 1;
        }

        out.push_str(&text[cursor..]);
        out
    }
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.')
}

fn is_value_end(b: u8) -> bool {
    b.is_ascii_whitespace() || matches!(b, b';' | b',' | b'&' | b'}' | b')' | b']' | b'"' | b'\'')
}

/// Byte range of the name preceding a separator at `sep`, not reaching
/// back past `floor`. Skips one closing quote and spaces.
fn name_before(bytes: &[u8], floor: usize, sep: usize) -> std::ops::Range<usize> {
    let mut end = sep;
    while end > floor && bytes[end - 1] == b' ' {
        end -= 1;
    }
    if end > floor && bytes[end - 1] == b'"' {
        end -= 1;
    }
    let mut start = end;
    while start > floor && is_name_byte(bytes[start - 1]) {
        start -= 1;
    }
    start..end
}

/// Byte range of the value following a separator at `sep`. `None` if the
/// value is empty.
fn value_span(bytes: &[u8], sep: usize) -> Option<(usize, usize)> {
    let mut start = sep + 1;
    while start < bytes.len() && bytes[start] == b' ' {
        start += 1;
    }

    let end = if start < bytes.len() && bytes[start] == b'"' {
        start += 1;
        let mut e = start;
        while e < bytes.len() && bytes[e] != b'"' {
            if bytes[e] == b'\\' {
                e += 1;
            }
            e += 1;
        }
        e.min(bytes.len())
    } else {
        let mut e = start;
        while e < bytes.len() && !is_value_end(bytes[e]) {
            e += 1;
        }
        e
    };

    (end > start).then_some((start, end))
}

/// Replace every ASCII-case-insensitive occurrence of `word` (lowercase).
fn replace_ignore_case(text: &str, word: &str) -> String {
    let lower = text.to_ascii_lowercase();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (idx, _) in lower.match_indices(word) {
        out.push_str(&text[last..idx]);
        out.push_str(REDACTED_WORD);
        last = idx + word.len();
    }
    out.push_str(&text[last..]);
    out
}
