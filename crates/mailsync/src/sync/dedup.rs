//! Candidate ID deduplication

use anyhow::Result;
use std::collections::HashSet;

use crate::models::MessageId;
use crate::storage::MessageStore;

/// Drop repeated IDs, keeping the first occurrence and provider order
pub fn dedupe_ids<I>(ids: I) -> Vec<MessageId>
where
    I: IntoIterator<Item = MessageId>,
{
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

/// IDs not yet stored for the account, via one batched existence lookup
pub fn filter_new(
    store: &dyn MessageStore,
    account_id: i64,
    ids: Vec<MessageId>,
) -> Result<Vec<MessageId>> {
    if ids.is_empty() {
        return Ok(ids);
    }
    let existing = store.existing_ids(account_id, &ids)?;
    Ok(ids.into_iter().filter(|id| !existing.contains(id)).collect())
}
