use crate::nodes::Cancellable;
use crate::runtime::identifier::{Identifier, IdentifierRegistry};
use crate::runtime::storage::{Transaction, WriteIntent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKind {
    /// Where a case starts.
    Input,
    /// Reaching this place completes the case.
    Output,
    Explicit,
    /// Inserted by the compiler between two directly connected tasks.
    Implicit,
}

/// 库所 (Place)
/// Holds a multiset of identifiers waiting to be consumed by a task.
#[derive(Debug, Clone)]
pub struct Condition {
    id: String,
    name: Option<String>,
    kind: ConditionKind,
    tokens: Vec<Identifier>,
    preset: Vec<String>,
    postset: Vec<String>,
}

impl Condition {
    pub fn new(id: impl Into<String>, kind: ConditionKind) -> Self {
        Self {
            id: id.into(),
            name: None,
            kind,
            tokens: Vec::new(),
            preset: Vec::new(),
            postset: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub fn set_name(&mut self, name: Option<String>) {
        self.name = name;
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn kind(&self) -> ConditionKind {
        self.kind
    }

    /// Tasks flowing into this condition.
    pub fn preset(&self) -> &[String] {
        &self.preset
    }

    /// Tasks this condition flows into.
    pub fn postset(&self) -> &[String] {
        &self.postset
    }

    pub(crate) fn add_preset(&mut self, task: &str) {
        if !self.preset.iter().any(|t| t == task) {
            self.preset.push(task.to_string());
        }
    }

    pub(crate) fn add_postset(&mut self, task: &str) {
        if !self.postset.iter().any(|t| t == task) {
            self.postset.push(task.to_string());
        }
    }

    pub fn contains_identifier(&self) -> bool {
        !self.tokens.is_empty()
    }

    pub fn contains(&self, identifier: &Identifier) -> bool {
        self.tokens.contains(identifier)
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn tokens(&self) -> &[Identifier] {
        &self.tokens
    }

    pub fn first_token(&self) -> Option<&Identifier> {
        self.tokens.first()
    }

    pub fn add(&mut self, tx: &mut Transaction, identifier: Identifier) {
        tx.record(WriteIntent::TokenAdded {
            condition: self.id.clone(),
            identifier: identifier.clone(),
        });
        self.tokens.push(identifier);
    }

    pub fn remove_one(&mut self, tx: &mut Transaction) -> Option<Identifier> {
        if self.tokens.is_empty() {
            return None;
        }
        let identifier = self.tokens.remove(0);
        tx.record(WriteIntent::TokenRemoved {
            condition: self.id.clone(),
            identifier: identifier.clone(),
        });
        Some(identifier)
    }

    /// Removes one occurrence of `identifier`. Returns false if it was not here.
    pub fn remove(&mut self, tx: &mut Transaction, identifier: &Identifier) -> bool {
        let Some(pos) = self.tokens.iter().position(|t| t == identifier) else {
            return false;
        };
        self.tokens.remove(pos);
        tx.record(WriteIntent::TokenRemoved {
            condition: self.id.clone(),
            identifier: identifier.clone(),
        });
        true
    }
}

impl Cancellable for Condition {
    fn cancel(&mut self, tx: &mut Transaction, identifiers: &mut IdentifierRegistry) {
        while let Some(identifier) = self.remove_one(tx) {
            identifiers.remove_location(tx, &identifier, &self.id);
        }
    }
}
