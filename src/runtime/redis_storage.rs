use anyhow::Result;
use async_trait::async_trait;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::runtime::storage::{Journal, WriteIntent};

/// Journal backed by one Redis list per case. Each entry is a JSON-encoded
/// [`WriteIntent`]; a transaction is appended with a single RPUSH.
pub struct RedisJournal {
    client: redis::Client,
    prefix: String,
}

impl RedisJournal {
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            prefix: "tasknet".to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn journal_key(&self, case_id: Uuid) -> String {
        format!("{}:case:{}:journal", self.prefix, case_id)
    }
}

#[async_trait]
impl Journal for RedisJournal {
    async fn append(&self, case_id: Uuid, tx_id: Uuid, intents: Vec<WriteIntent>) -> Result<()> {
        if intents.is_empty() {
            return Ok(());
        }
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let entries = intents
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;
        let _: () = conn.rpush(self.journal_key(case_id), entries).await?;
        tracing::debug!(case = %case_id, tx = %tx_id, "transaction journaled");
        Ok(())
    }

    async fn replay(&self, case_id: Uuid) -> Result<Vec<WriteIntent>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Vec<String> = conn.lrange(self.journal_key(case_id), 0, -1).await?;
        let mut intents = Vec::with_capacity(raw.len());
        for entry in raw {
            intents.push(serde_json::from_str(&entry)?);
        }
        Ok(intents)
    }
}
