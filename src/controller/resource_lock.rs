//! Named exclusive locks keyed by device URI.
//!
//! A controller takes the lock for its device at start and gives it back at
//! stop. Locks are reentrant per owner token: instruments in one sync
//! cluster share a token and may both hold the URI.

use crate::error::{AcqError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
struct Holder {
    owner: String,
    count: u32,
}

/// Process-wide registry of held device URIs. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct ResourceManager {
    held: Arc<Mutex<HashMap<String, Holder>>>,
}

impl ResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> MutexGuard<'_, HashMap<String, Holder>> {
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take `uri` for `owner`.
    ///
    /// Fails with [`AcqError::ResourceBusy`] if a different owner holds it.
    pub fn try_lock(&self, uri: &str, owner: &str) -> Result<()> {
        let mut held = self.held();
        match held.get_mut(uri) {
            Some(holder) if holder.owner == owner => {
                holder.count += 1;
                Ok(())
            }
            Some(holder) => Err(AcqError::ResourceBusy {
                uri: uri.to_string(),
                holder: holder.owner.clone(),
            }),
            None => {
                held.insert(
                    uri.to_string(),
                    Holder {
                        owner: owner.to_string(),
                        count: 1,
                    },
                );
                tracing::debug!("resource {} locked by {}", uri, owner);
                Ok(())
            }
        }
    }

    /// Give back one hold of `uri`. Returns false if `owner` did not hold it.
    pub fn unlock(&self, uri: &str, owner: &str) -> bool {
        let mut held = self.held();
        let Some(holder) = held.get_mut(uri) else {
            return false;
        };
        if holder.owner != owner {
            return false;
        }
        holder.count -= 1;
        if holder.count == 0 {
            held.remove(uri);
            tracing::debug!("resource {} released by {}", uri, owner);
        }
        true
    }

    pub fn holder(&self, uri: &str) -> Option<String> {
        self.held().get(uri).map(|h| h.owner.clone())
    }

    pub fn is_locked(&self, uri: &str) -> bool {
        self.held().contains_key(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusive_between_owners() {
        let rm = ResourceManager::new();
        rm.try_lock("ip:10.0.0.2", "adc_time").unwrap();

        let err = rm.try_lock("ip:10.0.0.2", "adc_fft").unwrap_err();
        match err {
            AcqError::ResourceBusy { uri, holder } => {
                assert_eq!(uri, "ip:10.0.0.2");
                assert_eq!(holder, "adc_time");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_reentrant_for_same_owner() {
        let rm = ResourceManager::new();
        rm.try_lock("local:0", "sync").unwrap();
        rm.try_lock("local:0", "sync").unwrap();

        assert!(rm.unlock("local:0", "sync"));
        assert!(rm.is_locked("local:0"));
        assert!(rm.unlock("local:0", "sync"));
        assert!(!rm.is_locked("local:0"));
    }

    #[test]
    fn test_unlock_by_stranger_is_noop() {
        let rm = ResourceManager::new();
        rm.try_lock("local:0", "a").unwrap();
        assert!(!rm.unlock("local:0", "b"));
        assert!(!rm.unlock("local:1", "a"));
        assert_eq!(rm.holder("local:0").as_deref(), Some("a"));
    }

    #[test]
    fn test_clones_share_state() {
        let rm = ResourceManager::new();
        let other = rm.clone();
        rm.try_lock("local:0", "a").unwrap();
        assert!(other.try_lock("local:0", "b").is_err());
    }
}
