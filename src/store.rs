// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeSet;
use std::rc::Rc;

use serde::Serialize;

/// A derived `(subject, predicate, object)` tuple. The object is the
/// string encoding of a scalar or quantity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Triple {
    pub s: Rc<str>,
    pub p: Rc<str>,
    pub o: Rc<str>,
}

impl Triple {
    pub fn new(s: Rc<str>, p: Rc<str>, o: Rc<str>) -> Triple {
        Triple { s, p, o }
    }
}

/// In-memory triple container. Inserts are idempotent by tuple
/// equality; insertion order is preserved for deterministic iteration.
#[derive(Debug, Default)]
pub struct TripleStore {
    triples: Vec<Triple>,
    seen: BTreeSet<Triple>,
}

impl TripleStore {
    pub fn new() -> TripleStore {
        TripleStore::default()
    }

    pub fn add(&mut self, triple: Triple) {
        if self.seen.insert(triple.clone()) {
            self.triples.push(triple);
        }
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Triple> {
        self.triples.iter()
    }

    /// Wildcard match: each given position must be equal, each absent
    /// position matches anything.
    pub fn match_pattern(
        &self,
        s: Option<&str>,
        p: Option<&str>,
        o: Option<&str>,
    ) -> Vec<&Triple> {
        self.triples
            .iter()
            .filter(|t| {
                s.map_or(true, |s| t.s.as_ref() == s)
                    && p.map_or(true, |p| t.p.as_ref() == p)
                    && o.map_or(true, |o| t.o.as_ref() == o)
            })
            .collect()
    }

    pub fn into_triples(self) -> Vec<Triple> {
        self.triples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str, p: &str, o: &str) -> Triple {
        Triple::new(s.into(), p.into(), o.into())
    }

    #[test]
    fn idempotent_insert() {
        let mut store = TripleStore::new();
        store.add(t("a", "b", "c"));
        store.add(t("a", "b", "c"));
        store.add(t("a", "b", "d"));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn wildcard_match() {
        let mut store = TripleStore::new();
        store.add(t("s1", "p1", "o1"));
        store.add(t("s1", "p2", "o2"));
        store.add(t("s2", "p1", "o3"));

        assert_eq!(store.match_pattern(Some("s1"), None, None).len(), 2);
        assert_eq!(store.match_pattern(None, Some("p1"), None).len(), 2);
        assert_eq!(store.match_pattern(Some("s2"), Some("p1"), None).len(), 1);
        assert_eq!(store.match_pattern(None, None, None).len(), 3);
        assert_eq!(store.match_pattern(Some("x"), None, None).len(), 0);
    }
}
