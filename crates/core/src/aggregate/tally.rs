//! Field/value frequency tallying.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::flatten::flatten;

/// How often one value appeared for one field, and in which documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FieldValueFrequency {
    pub count: u64,
    /// Distinct identifiers of contributing documents, in first-seen order.
    pub ids: Vec<String>,
}

/// field -> value -> frequency.
pub type AggregatedMap = BTreeMap<String, BTreeMap<String, FieldValueFrequency>>;

/// Allow + rename table for flattened field names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelevanceTable {
    fields: BTreeMap<String, String>,
}

impl RelevanceTable {
    pub fn new(fields: BTreeMap<String, String>) -> Self {
        Self { fields }
    }

    /// Display name for a flattened field, or `None` if it is not relevant.
    pub fn resolve(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, String)> for RelevanceTable {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self { fields: iter.into_iter().collect() }
    }
}

/// Text form of a scalar used as a tally key. Absent and empty values yield
/// `None`.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Identifier for a document: its own scalar `id`, else its position in the
/// batch.
pub fn document_id(document: &Value, position: usize) -> String {
    document
        .get("id")
        .and_then(scalar_text)
        .unwrap_or_else(|| format!("#{position}"))
}

/// Accumulates one search's documents into an [`AggregatedMap`].
#[derive(Debug)]
pub struct Tally<'a> {
    separator: &'a str,
    relevance: Option<&'a RelevanceTable>,
    fields: AggregatedMap,
    documents: u64,
}

impl<'a> Tally<'a> {
    /// `relevance` restricts and renames fields when set; otherwise every
    /// flattened field is kept under its own name.
    pub fn new(separator: &'a str, relevance: Option<&'a RelevanceTable>) -> Self {
        Self { separator, relevance, fields: AggregatedMap::new(), documents: 0 }
    }

    pub fn add_document(&mut self, document_id: &str, document: &Value) {
        self.documents += 1;

        for (field, value) in flatten(document, self.separator) {
            let Some(value) = scalar_text(&value) else {
                continue;
            };

            let field = match self.relevance {
                Some(table) => match table.resolve(&field) {
                    Some(renamed) => renamed.to_string(),
                    None => continue,
                },
                None => field,
            };

            let entry = self.fields.entry(field).or_default().entry(value).or_default();
            entry.count += 1;
            if !entry.ids.iter().any(|id| id == document_id) {
                entry.ids.push(document_id.to_string());
            }
        }
    }

    pub fn documents(&self) -> u64 {
        self.documents
    }

    pub fn finish(self) -> AggregatedMap {
        self.fields
    }
}
