// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::value::Value;

use std::rc::Rc;

use anyhow::{bail, Result};

/// Prefix-to-IRI-base mapping from `@context`, kept in insertion order:
/// a plain key with no prefix expands against the first entry.
#[derive(Debug, Clone, Default)]
pub struct ContextMap {
    entries: Vec<(Rc<str>, Rc<str>)>,
}

impl ContextMap {
    pub fn from_json(v: &serde_json::Value) -> ContextMap {
        let mut entries = vec![];
        if let serde_json::Value::Object(map) = v {
            for (k, v) in map {
                if let serde_json::Value::String(base) = v {
                    entries.push((k.as_str().into(), base.as_str().into()));
                }
            }
        }
        ContextMap { entries }
    }

    pub fn default_base(&self) -> Option<&Rc<str>> {
        self.entries.first().map(|(_, base)| base)
    }

    fn base_of(&self, prefix: &str) -> Option<&Rc<str>> {
        self.entries
            .iter()
            .find(|(p, _)| p.as_ref() == prefix)
            .map(|(_, base)| base)
    }

    /// Expand a CURIE or plain key to an IRI. Absolute IRIs and CURIEs
    /// with unknown prefixes pass through unchanged.
    pub fn expand(&self, key: &str) -> Rc<str> {
        if key.contains("://") {
            return key.into();
        }
        if let Some((prefix, local)) = key.split_once(':') {
            if let Some(base) = self.base_of(prefix) {
                return format!("{base}{local}").into();
            }
            return key.into();
        }
        match self.default_base() {
            Some(base) => format!("{base}{key}").into(),
            _ => key.into(),
        }
    }
}

/// A parsed input document. `raw` preserves the exact supplied shape
/// for the signable payload; `body` is the evaluator's working view.
#[derive(Debug, Clone)]
pub struct Document {
    pub raw: serde_json::Value,
    pub context: ContextMap,
    pub subject: Rc<str>,
    pub body: Value,
}

impl Document {
    pub fn from_json(raw: serde_json::Value) -> Result<Document> {
        let map = match raw.as_object() {
            Some(m) => m,
            _ => bail!("schema_error: document must be an object"),
        };

        let context = match map.get("@context") {
            Some(c) => ContextMap::from_json(c),
            _ => ContextMap::default(),
        };

        let subject = match map.get("@id") {
            Some(serde_json::Value::String(id)) => context.expand(id),
            Some(_) => bail!("schema_error: `@id` must be a string"),
            _ => match context.default_base() {
                Some(base) => base.clone(),
                _ => "urn:doc".into(),
            },
        };

        let body = Value::from(&raw);
        Ok(Document {
            raw,
            context,
            subject,
            body,
        })
    }

    pub fn from_json_str(json: &str) -> Result<Document> {
        let raw: serde_json::Value = serde_json::from_str(json)?;
        Self::from_json(raw)
    }

    /// Synthetic subject for a value nested under the root.
    pub fn synthetic_subject(&self, path: &[&str]) -> Rc<str> {
        let mut s = self.subject.to_string();
        for seg in path {
            s.push('/');
            s.push_str(seg);
        }
        s.into()
    }
}
