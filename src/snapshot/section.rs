//! Snapshot construction.

use crate::error::{Result, StoreError};
use crate::types::{Field, FieldValue, Model, ValueKind};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Identity of a section.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SectionKey {
    Text(String),
    Bool(bool),
    Integer(i64),
}

impl SectionKey {
    /// Key of the single section used when nothing is grouped.
    pub fn ungrouped() -> Self {
        SectionKey::Integer(0)
    }

    fn kind(&self) -> ValueKind {
        match self {
            SectionKey::Text(_) => ValueKind::Text,
            SectionKey::Bool(_) => ValueKind::Bool,
            SectionKey::Integer(_) => ValueKind::Integer,
        }
    }
}

impl From<FieldValue> for SectionKey {
    fn from(value: FieldValue) -> Self {
        match value {
            FieldValue::Text(s) => SectionKey::Text(s),
            FieldValue::Bool(b) => SectionKey::Bool(b),
            FieldValue::Integer(i) => SectionKey::Integer(i),
            FieldValue::Id(id) => SectionKey::Integer(id as i64),
            FieldValue::Timestamp(ts) => SectionKey::Integer(ts.0),
        }
    }
}

impl From<&str> for SectionKey {
    fn from(v: &str) -> Self {
        SectionKey::Text(v.to_string())
    }
}

impl From<bool> for SectionKey {
    fn from(v: bool) -> Self {
        SectionKey::Bool(v)
    }
}

impl From<i64> for SectionKey {
    fn from(v: i64) -> Self {
        SectionKey::Integer(v)
    }
}

impl fmt::Display for SectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SectionKey::Text(s) => f.write_str(s),
            SectionKey::Bool(b) => write!(f, "{}", b),
            SectionKey::Integer(i) => write!(f, "{}", i),
        }
    }
}

/// How a result is split into sections.
#[derive(Clone, Debug, PartialEq)]
pub struct Sectioning<F> {
    /// Field whose value picks an item's section. `None` puts every item in
    /// one section.
    pub group_by: Option<F>,
    /// Fixed section order with display labels. Keys not listed here still
    /// get sections, after the listed ones.
    pub custom: Vec<(SectionKey, String)>,
    /// Direction for computed section order, by the key's text form.
    pub ascending: bool,
}

impl<F> Default for Sectioning<F> {
    fn default() -> Self {
        Self {
            group_by: None,
            custom: Vec::new(),
            ascending: true,
        }
    }
}

impl<F: Field> Sectioning<F> {
    pub fn grouped_by(field: F) -> Self {
        Self {
            group_by: Some(field),
            ..Default::default()
        }
    }

    pub fn with_sections<K, L>(mut self, sections: impl IntoIterator<Item = (K, L)>) -> Self
    where
        K: Into<SectionKey>,
        L: Into<String>,
    {
        self.custom = sections
            .into_iter()
            .map(|(k, l)| (k.into(), l.into()))
            .collect();
        self
    }

    pub fn ascending(mut self, ascending: bool) -> Self {
        self.ascending = ascending;
        self
    }

    /// Checked once when a subscription is set up, never per item.
    pub fn validate(&self) -> Result<()> {
        let Some(field) = self.group_by else {
            if !self.custom.is_empty() {
                return Err(StoreError::Configuration(
                    "custom sections require a grouping field".into(),
                ));
            }
            return Ok(());
        };

        if !field.kind().is_groupable() {
            return Err(StoreError::Configuration(format!(
                "cannot group by `{}`: {} values are not discrete",
                field.name(),
                field.kind()
            )));
        }

        let mut keys = HashSet::new();
        let mut labels = HashSet::new();
        for (key, label) in &self.custom {
            if key.kind() != field.kind() {
                return Err(StoreError::Configuration(format!(
                    "section key `{}` is not a {} value of `{}`",
                    key,
                    field.kind(),
                    field.name()
                )));
            }
            if !keys.insert(key) {
                return Err(StoreError::Configuration(format!(
                    "duplicate section key `{}`",
                    key
                )));
            }
            if !labels.insert(label.as_str()) {
                return Err(StoreError::Configuration(format!(
                    "duplicate section label `{}`",
                    label
                )));
            }
        }
        Ok(())
    }

    /// Split an ordered result into sections.
    pub fn build<M: Model<Field = F>>(&self, ordered: &[M]) -> Snapshot<M::Id> {
        let Some(field) = self.group_by else {
            if ordered.is_empty() {
                return Snapshot::empty();
            }
            return Snapshot {
                sections: vec![Section {
                    key: SectionKey::ungrouped(),
                    label: String::new(),
                    items: ordered.iter().map(|r| r.id()).collect(),
                }],
            };
        };

        // Buckets keep the item-level sort order.
        let mut buckets: HashMap<SectionKey, Vec<M::Id>> = HashMap::new();
        for record in ordered {
            buckets
                .entry(SectionKey::from(record.value(field)))
                .or_default()
                .push(record.id());
        }

        let mut sections = Vec::with_capacity(buckets.len());
        for (key, label) in &self.custom {
            if let Some(items) = buckets.remove(key) {
                sections.push(Section {
                    key: key.clone(),
                    label: label.clone(),
                    items,
                });
            }
        }

        let mut rest: Vec<(String, SectionKey, Vec<M::Id>)> = buckets
            .into_iter()
            .map(|(key, items)| (key.to_string(), key, items))
            .collect();
        rest.sort_by(|a, b| a.0.cmp(&b.0));
        if !self.ascending {
            rest.reverse();
        }
        sections.extend(rest.into_iter().map(|(label, key, items)| Section {
            key,
            label,
            items,
        }));

        Snapshot { sections }
    }
}

/// One section of a snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section<I> {
    pub key: SectionKey,
    pub label: String,
    pub items: Vec<I>,
}

/// An immutable, sectioned view of a query result at one point in time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot<I> {
    pub sections: Vec<Section<I>>,
}

impl<I: Copy + PartialEq> Snapshot<I> {
    pub fn empty() -> Self {
        Self {
            sections: Vec::new(),
        }
    }

    /// Total number of items across all sections.
    pub fn len(&self) -> usize {
        self.sections.iter().map(|s| s.items.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// All items in display order.
    pub fn ids(&self) -> impl Iterator<Item = I> + '_ {
        self.sections.iter().flat_map(|s| s.items.iter().copied())
    }

    pub fn section(&self, key: &SectionKey) -> Option<&Section<I>> {
        self.sections.iter().find(|s| &s.key == key)
    }
}
