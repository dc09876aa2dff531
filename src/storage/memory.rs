use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use super::types::{require_user_and_url, StoreError};

type UserUrls = Arc<Mutex<Vec<String>>>;

/// Volatile subscription store kept in process memory.
///
/// The outer map lock is only held long enough to find or create a user's
/// entry; each user's list has its own mutex, so mutations for one user are
/// serialized while different users proceed in parallel.
#[derive(Clone, Default)]
pub struct MemoryStore {
    users: Arc<RwLock<HashMap<String, UserUrls>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn existing(&self, user: &str) -> Result<Option<UserUrls>, StoreError> {
        let users = self.users.read().map_err(|_| StoreError::Poisoned)?;
        Ok(users.get(user).cloned())
    }

    fn entry(&self, user: &str) -> Result<UserUrls, StoreError> {
        if let Some(urls) = self.existing(user)? {
            return Ok(urls);
        }
        let mut users = self.users.write().map_err(|_| StoreError::Poisoned)?;
        Ok(users.entry(user.to_string()).or_default().clone())
    }

    /// Subscribed URLs in subscription order. Unknown users list as empty.
    pub fn list_urls(&self, user: &str) -> Result<Vec<String>, StoreError> {
        match self.existing(user)? {
            Some(urls) => Ok(urls.lock().map_err(|_| StoreError::Poisoned)?.clone()),
            None => Ok(Vec::new()),
        }
    }

    pub fn add_url(&self, user: &str, url: &str) -> Result<(), StoreError> {
        require_user_and_url(user, url)?;

        let entry = self.entry(user)?;
        let mut urls = entry.lock().map_err(|_| StoreError::Poisoned)?;
        if !urls.iter().any(|u| u == url) {
            urls.push(url.to_string());
        }
        Ok(())
    }

    /// Removing an absent URL, or from an unknown user, is a no-op.
    pub fn remove_url(&self, user: &str, url: &str) -> Result<(), StoreError> {
        require_user_and_url(user, url)?;

        if let Some(entry) = self.existing(user)? {
            entry
                .lock()
                .map_err(|_| StoreError::Poisoned)?
                .retain(|u| u != url);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_unknown_user_lists_empty() {
        let store = MemoryStore::new();
        assert!(store.list_urls("nobody").unwrap().is_empty());
    }

    #[test]
    fn test_add_twice_keeps_one() {
        let store = MemoryStore::new();
        store.add_url("alice", "https://example.com/rss").unwrap();
        store.add_url("alice", "https://example.com/rss").unwrap();
        assert_eq!(store.list_urls("alice").unwrap(), vec!["https://example.com/rss"]);
    }

    #[test]
    fn test_remove_never_subscribed_is_noop() {
        let store = MemoryStore::new();
        store.add_url("alice", "https://example.com/a").unwrap();
        store.remove_url("alice", "https://example.com/zzz").unwrap();
        store.remove_url("ghost", "https://example.com/a").unwrap();
        assert_eq!(store.list_urls("alice").unwrap(), vec!["https://example.com/a"]);
    }

    #[test]
    fn test_validation_errors() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.add_url("alice", ""),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            store.remove_url("", "https://example.com/a"),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn test_clones_share_state() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.add_url("alice", "https://example.com/a").unwrap();
        assert_eq!(other.list_urls("alice").unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_adds_for_same_user_are_not_lost() {
        let store = MemoryStore::new();
        let handles: Vec<_> = (0..16)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        store
                            .add_url("alice", &format!("https://example.com/{t}/{i}"))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.list_urls("alice").unwrap().len(), 16 * 25);
    }
}
