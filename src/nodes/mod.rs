pub mod condition;
pub mod flow;
pub mod mapping;
pub mod multi_instance;
pub mod task;
pub mod timer;

use crate::runtime::identifier::IdentifierRegistry;
use crate::runtime::storage::Transaction;
use condition::Condition;
use task::Task;

/// Anything a cancellation region can purge.
pub trait Cancellable {
    /// Discards all tokens or execution state held by the element.
    fn cancel(&mut self, tx: &mut Transaction, identifiers: &mut IdentifierRegistry);
}

/// 网元素
#[derive(Debug, Clone)]
pub enum NetElement {
    Task(Task),
    Condition(Condition),
}

impl NetElement {
    pub fn id(&self) -> &str {
        match self {
            NetElement::Task(t) => t.id(),
            NetElement::Condition(c) => c.id(),
        }
    }

    pub fn as_task(&self) -> Option<&Task> {
        match self {
            NetElement::Task(t) => Some(t),
            NetElement::Condition(_) => None,
        }
    }

    pub fn as_condition(&self) -> Option<&Condition> {
        match self {
            NetElement::Condition(c) => Some(c),
            NetElement::Task(_) => None,
        }
    }

    pub fn as_condition_mut(&mut self) -> Option<&mut Condition> {
        match self {
            NetElement::Condition(c) => Some(c),
            NetElement::Task(_) => None,
        }
    }
}

impl Cancellable for NetElement {
    fn cancel(&mut self, tx: &mut Transaction, identifiers: &mut IdentifierRegistry) {
        match self {
            NetElement::Task(t) => t.cancel(tx, identifiers),
            NetElement::Condition(c) => c.cancel(tx, identifiers),
        }
    }
}
