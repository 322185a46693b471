use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Bidirectional string <-> id table for labels and feature names.
///
/// Ids are dense and assigned in insertion order.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Alphabet {
    symbols: Vec<String>,
    ids: HashMap<String, usize>,
}

impl Alphabet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_or_insert(&mut self, key: &str) -> usize {
        if let Some(&id) = self.ids.get(key) {
            return id;
        }
        let id = self.symbols.len();
        self.ids.insert(key.to_string(), id);
        self.symbols.push(key.to_string());
        id
    }

    pub fn id_of(&self, key: &str) -> Option<usize> {
        self.ids.get(key).copied()
    }

    pub fn symbol(&self, id: usize) -> Option<&str> {
        self.symbols.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.symbols.iter().map(String::as_str)
    }
}

impl From<Vec<String>> for Alphabet {
    fn from(symbols: Vec<String>) -> Self {
        let mut alphabet = Alphabet::default();
        for s in &symbols {
            alphabet.find_or_insert(s);
        }
        alphabet
    }
}

impl From<Alphabet> for Vec<String> {
    fn from(alphabet: Alphabet) -> Self {
        alphabet.symbols
    }
}

impl<'a> FromIterator<&'a str> for Alphabet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut alphabet = Alphabet::default();
        for s in iter {
            alphabet.find_or_insert(s);
        }
        alphabet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_stable() {
        let mut alphabet = Alphabet::new();
        for (s, id) in [("O", 0), ("PER", 1), ("LOC", 2), ("PER", 1), ("O", 0), ("ORG", 3)] {
            assert_eq!(id, alphabet.find_or_insert(s), "{} != {}", s, id);
        }
        assert_eq!(alphabet.len(), 4);
    }

    #[test]
    fn lookup_both_ways() {
        let alphabet: Alphabet = ["O", "PER"].into_iter().collect();
        assert_eq!(alphabet.symbol(1), Some("PER"));
        assert_eq!(alphabet.symbol(2), None);
        assert_eq!(alphabet.id_of("O"), Some(0));
        assert_eq!(alphabet.id_of("LOC"), None);
    }

    #[test]
    fn json_round_trip_keeps_order() {
        let alphabet: Alphabet = ["O", "B-PER", "I-PER"].into_iter().collect();
        let s = serde_json::to_string(&alphabet).unwrap();
        assert_eq!(s, r#"["O","B-PER","I-PER"]"#);
        let back: Alphabet = serde_json::from_str(&s).unwrap();
        assert_eq!(back.id_of("I-PER"), Some(2));
    }
}
