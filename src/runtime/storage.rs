use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::nodes::multi_instance::InstanceState;
use crate::runtime::identifier::Identifier;

/// One durable change to a case. Every in-memory mutation made by the token
/// game records exactly one of these into the current [`Transaction`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WriteIntent {
    TokenAdded { condition: String, identifier: Identifier },
    TokenRemoved { condition: String, identifier: Identifier },
    LocationAdded { identifier: Identifier, element: String },
    LocationRemoved { identifier: Identifier, element: String },
    ChildCreated { parent: Identifier, child: Identifier },
    TaskBound { task: String, identifier: Identifier },
    TaskReleased { task: String },
    InstanceRegistered { task: String, identifier: Identifier },
    InstanceState { task: String, identifier: Identifier, state: InstanceState },
    InstanceCancelled { task: String, identifier: Identifier },
    VariableSet { name: String, value: Value },
    TimerClosed { task: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Savepoint(usize);

/// Unit of work. Mutators append write-intents; the caller commits once per step.
/// Dropping an uncommitted transaction leaves the case purely in memory.
#[derive(Debug, Clone)]
pub struct Transaction {
    id: Uuid,
    intents: Vec<WriteIntent>,
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            intents: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn record(&mut self, intent: WriteIntent) {
        self.intents.push(intent);
    }

    pub fn savepoint(&self) -> Savepoint {
        Savepoint(self.intents.len())
    }

    /// Discards every intent recorded after `savepoint`.
    pub fn rollback_to(&mut self, savepoint: Savepoint) {
        self.intents.truncate(savepoint.0);
    }

    pub fn intents(&self) -> &[WriteIntent] {
        &self.intents
    }

    pub fn len(&self) -> usize {
        self.intents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }

    /// Appends all intents to the journal atomically. Returns the number written.
    pub async fn commit(self, journal: &dyn Journal, case_id: Uuid) -> Result<usize> {
        let count = self.intents.len();
        if count > 0 {
            journal.append(case_id, self.id, self.intents).await?;
        }
        Ok(count)
    }
}

// --- Interfaces ---

#[async_trait]
pub trait Journal: Send + Sync {
    async fn append(&self, case_id: Uuid, tx_id: Uuid, intents: Vec<WriteIntent>) -> Result<()>;
    /// All intents committed for a case, in commit order.
    async fn replay(&self, case_id: Uuid) -> Result<Vec<WriteIntent>>;
}

// --- In-Memory Implementation ---

#[derive(Default)]
pub struct InMemoryJournal {
    // Map<CaseID, Vec<(TxID, Intent)>>
    entries: DashMap<Uuid, Vec<(Uuid, WriteIntent)>>,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transaction_count(&self, case_id: Uuid) -> usize {
        self.entries
            .get(&case_id)
            .map(|entries| {
                let mut ids: Vec<Uuid> = entries.iter().map(|(tx, _)| *tx).collect();
                ids.dedup();
                ids.len()
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl Journal for InMemoryJournal {
    async fn append(&self, case_id: Uuid, tx_id: Uuid, intents: Vec<WriteIntent>) -> Result<()> {
        let mut case = self.entries.entry(case_id).or_default();
        case.extend(intents.into_iter().map(|i| (tx_id, i)));
        Ok(())
    }

    async fn replay(&self, case_id: Uuid) -> Result<Vec<WriteIntent>> {
        Ok(self
            .entries
            .get(&case_id)
            .map(|entries| entries.iter().map(|(_, i)| i.clone()).collect())
            .unwrap_or_default())
    }
}
