use feature_plugin::{ConfigStore, HostError, message::HistoryEntry};

pub const HISTORY_KEY: &str = "summaryHistory";
pub const HISTORY_CAPACITY: usize = 50;

/// Bounded, newest-first list of past summaries kept in the config store.
#[derive(Clone, Debug)]
pub struct SummaryHistory {
    store: ConfigStore,
}

impl SummaryHistory {
    pub fn new(store: ConfigStore) -> Self {
        Self { store }
    }

    pub async fn entries(&self) -> Result<Vec<HistoryEntry>, HostError> {
        self.store.get_as(HISTORY_KEY, Vec::new()).await
    }

    /// Insert at the front; anything past the capacity falls off the end.
    pub async fn append(&self, entry: HistoryEntry) -> Result<(), HostError> {
        let mut entries = self.entries().await?;
        entries.insert(0, entry);
        entries.truncate(HISTORY_CAPACITY);
        self.store.set_as(HISTORY_KEY, &entries).await
    }

    pub async fn clear(&self) -> Result<(), HostError> {
        self.store.set_as(HISTORY_KEY, &Vec::<HistoryEntry>::new()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_capacity_and_order() {
        let history = SummaryHistory::new(ConfigStore::in_memory());
        for i in 0..(HISTORY_CAPACITY + 7) {
            history
                .append(HistoryEntry::new("https://example.com", &format!("input {i}"), &format!("out {i}")))
                .await
                .unwrap();
        }

        let entries = history.entries().await.unwrap();
        assert_eq!(entries.len(), HISTORY_CAPACITY);
        assert_eq!(entries[0].output, format!("out {}", HISTORY_CAPACITY + 6));
        assert_eq!(entries[HISTORY_CAPACITY - 1].output, "out 7");
    }

    #[tokio::test]
    async fn test_clear() {
        let history = SummaryHistory::new(ConfigStore::in_memory());
        history.append(HistoryEntry::new("", "a", "b")).await.unwrap();
        history.clear().await.unwrap();
        assert!(history.entries().await.unwrap().is_empty());
    }
}
