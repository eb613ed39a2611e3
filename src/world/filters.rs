//! Chat and character-name filters.
//!
//! Both are pure: they hold an immutable word list and share no state with the
//! world beyond the call.

use std::collections::HashSet;

/// `Filter(text) -> (filtered_text, matched)`
pub trait ChatFilter: Send + Sync {
    fn filter(&self, text: &str) -> (String, bool);
}

/// `Check(name) -> (allowed, reason)`; `reason` is empty when allowed.
pub trait NameFilter: Send + Sync {
    fn check(&self, name: &str) -> (bool, String);
}

pub const MIN_NAME_LEN: usize = 3;
pub const MAX_NAME_LEN: usize = 16;

fn reserved_names() -> HashSet<&'static str> {
    [
        "admin", "administrator", "root", "system", "sysop", "operator", "guest",
        "anonymous", "god", "wizard", "server", "someone", "nobody", "all", "self",
        "north", "south", "east", "west", "up", "down", "look", "say", "shout", "tell",
        "quit", "help", "who",
    ]
    .iter()
    .copied()
    .collect()
}

/// Banned-word list applied to both chat text and names.
#[derive(Debug, Clone, Default)]
pub struct WordListFilter {
    banned: Vec<String>,
    banned_names: Vec<String>,
}

impl WordListFilter {
    pub fn new<I, S>(banned_words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            banned: banned_words
                .into_iter()
                .map(|w| w.as_ref().trim().to_ascii_lowercase())
                .filter(|w| !w.is_empty())
                .collect(),
            banned_names: Vec::new(),
        }
    }

    pub fn with_banned_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.banned_names = names
            .into_iter()
            .map(|w| w.as_ref().trim().to_ascii_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        self
    }
}

impl ChatFilter for WordListFilter {
    fn filter(&self, text: &str) -> (String, bool) {
        let mut matched = false;
        let words: Vec<String> = text
            .split(' ')
            .map(|word| {
                let bare: String = word
                    .chars()
                    .filter(|c| c.is_alphanumeric())
                    .collect::<String>()
                    .to_ascii_lowercase();
                if !bare.is_empty() && self.banned.iter().any(|b| *b == bare) {
                    matched = true;
                    "*".repeat(word.chars().count())
                } else {
                    word.to_string()
                }
            })
            .collect();
        (words.join(" "), matched)
    }
}

impl NameFilter for WordListFilter {
    fn check(&self, name: &str) -> (bool, String) {
        let trimmed = name.trim();
        let len = trimmed.chars().count();
        if len < MIN_NAME_LEN {
            return (false, format!("Names need at least {} letters.", MIN_NAME_LEN));
        }
        if len > MAX_NAME_LEN {
            return (false, format!("Names can have at most {} letters.", MAX_NAME_LEN));
        }
        if !trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
            return (false, "Names may only contain letters.".to_string());
        }
        let lower = trimmed.to_ascii_lowercase();
        if reserved_names().contains(lower.as_str()) {
            return (false, "That name is reserved.".to_string());
        }
        if self
            .banned
            .iter()
            .chain(self.banned_names.iter())
            .any(|b| lower.contains(b.as_str()))
        {
            return (false, "That name is not allowed.".to_string());
        }
        (true, String::new())
    }
}

/// Capitalise a validated name for display ("aDA" -> "Ada").
pub fn canonical_name(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}
