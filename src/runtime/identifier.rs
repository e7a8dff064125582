use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::runtime::storage::{Transaction, WriteIntent};

/// 令牌 (Token)
/// A case identifier. Children of a case (multi-instance sub-tokens) extend the
/// parent id with a dotted ordinal: `case`, `case.1`, `case.1.2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh root identifier for a new case.
    pub fn case(case_id: Uuid) -> Self {
        Self(case_id.simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn parent(&self) -> Option<Identifier> {
        self.0.rsplit_once('.').map(|(parent, _)| Identifier(parent.to_string()))
    }

    pub fn is_child_of(&self, other: &Identifier) -> bool {
        self.parent().as_ref() == Some(other)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tracks where each identifier currently sits and hands out child ids.
#[derive(Debug, Clone, Default)]
pub struct IdentifierRegistry {
    locations: HashMap<Identifier, Vec<String>>,
    next_child: HashMap<Identifier, usize>,
}

impl IdentifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_child(&mut self, tx: &mut Transaction, parent: &Identifier) -> Identifier {
        let ordinal = self.next_child.entry(parent.clone()).or_insert(0);
        *ordinal += 1;
        let child = Identifier(format!("{}.{}", parent, ordinal));
        tx.record(WriteIntent::ChildCreated {
            parent: parent.clone(),
            child: child.clone(),
        });
        child
    }

    pub fn add_location(&mut self, tx: &mut Transaction, identifier: &Identifier, element: &str) {
        self.locations
            .entry(identifier.clone())
            .or_default()
            .push(element.to_string());
        tx.record(WriteIntent::LocationAdded {
            identifier: identifier.clone(),
            element: element.to_string(),
        });
    }

    /// Removes one occurrence of `element` from the identifier's locations.
    pub fn remove_location(&mut self, tx: &mut Transaction, identifier: &Identifier, element: &str) {
        let Some(locations) = self.locations.get_mut(identifier) else {
            return;
        };
        if let Some(pos) = locations.iter().position(|l| l == element) {
            locations.remove(pos);
            tx.record(WriteIntent::LocationRemoved {
                identifier: identifier.clone(),
                element: element.to_string(),
            });
        }
        if locations.is_empty() {
            self.locations.remove(identifier);
        }
    }

    pub fn locations(&self, identifier: &Identifier) -> &[String] {
        self.locations.get(identifier).map(|v| v.as_slice()).unwrap_or(&[])
    }
}
