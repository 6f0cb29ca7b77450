//! Control-Owner Lock (C5, §4.5): per (agent, tab) identity of the current
//! write-capable subscriber. `try_gain_control` always succeeds, overwriting
//! any existing owner -- a deliberate "steal" semantics preserved per the
//! open question in §9, not a bug to be fixed.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct ControlLock {
    owners: Mutex<HashMap<(String, String), String>>,
}

impl ControlLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconditionally claims ownership of `(agent_id, tab_id)` for
    /// `subscriber_id`, returning the previous owner if any (so the caller
    /// can notify them via `control-changed {hasControl:false}`).
    pub fn gain(&self, agent_id: &str, tab_id: &str, subscriber_id: &str) -> Option<String> {
        let key = (agent_id.to_string(), tab_id.to_string());
        let mut owners = self.owners.lock().expect("control lock mutex poisoned");
        owners.insert(key, subscriber_id.to_string())
    }

    /// Claims ownership only if the tab is currently unowned. Returns
    /// `true` if ownership was claimed.
    pub fn claim_if_vacant(&self, agent_id: &str, tab_id: &str, subscriber_id: &str) -> bool {
        let key = (agent_id.to_string(), tab_id.to_string());
        let mut owners = self.owners.lock().expect("control lock mutex poisoned");
        if owners.contains_key(&key) {
            false
        } else {
            owners.insert(key, subscriber_id.to_string());
            true
        }
    }

    /// Releases ownership only if `subscriber_id` currently holds it.
    /// Returns `true` if a release occurred.
    pub fn release(&self, agent_id: &str, tab_id: &str, subscriber_id: &str) -> bool {
        let key = (agent_id.to_string(), tab_id.to_string());
        let mut owners = self.owners.lock().expect("control lock mutex poisoned");
        if owners.get(&key).map(String::as_str) == Some(subscriber_id) {
            owners.remove(&key);
            true
        } else {
            false
        }
    }

    /// Releases every tab owned by `subscriber_id` (on disconnect).
    /// Returns the `(agent_id, tab_id)` keys that were released.
    pub fn release_all(&self, subscriber_id: &str) -> Vec<(String, String)> {
        let mut owners = self.owners.lock().expect("control lock mutex poisoned");
        let released: Vec<_> = owners
            .iter()
            .filter(|(_, owner)| owner.as_str() == subscriber_id)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &released {
            owners.remove(key);
        }
        released
    }

    /// Unconditionally clears ownership of `(agent_id, tab_id)`, regardless
    /// of who holds it. Used when a tab is closed outright.
    pub fn force_release(&self, agent_id: &str, tab_id: &str) {
        let key = (agent_id.to_string(), tab_id.to_string());
        self.owners.lock().expect("control lock mutex poisoned").remove(&key);
    }

    pub fn owner(&self, agent_id: &str, tab_id: &str) -> Option<String> {
        let key = (agent_id.to_string(), tab_id.to_string());
        self.owners
            .lock()
            .expect("control lock mutex poisoned")
            .get(&key)
            .cloned()
    }

    pub fn is_owner(&self, agent_id: &str, tab_id: &str, subscriber_id: &str) -> bool {
        self.owner(agent_id, tab_id).as_deref() == Some(subscriber_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_if_vacant_only_succeeds_once() {
        let lock = ControlLock::new();
        assert!(lock.claim_if_vacant("a", "t", "s1"));
        assert!(!lock.claim_if_vacant("a", "t", "s2"));
        assert_eq!(lock.owner("a", "t").as_deref(), Some("s1"));
    }

    #[test]
    fn gain_always_steals() {
        let lock = ControlLock::new();
        lock.claim_if_vacant("a", "t", "s1");
        let previous = lock.gain("a", "t", "s2");
        assert_eq!(previous.as_deref(), Some("s1"));
        assert_eq!(lock.owner("a", "t").as_deref(), Some("s2"));
    }

    #[test]
    fn release_requires_current_ownership() {
        let lock = ControlLock::new();
        lock.claim_if_vacant("a", "t", "s1");
        assert!(!lock.release("a", "t", "s2"));
        assert!(lock.release("a", "t", "s1"));
        assert_eq!(lock.owner("a", "t"), None);
    }

    #[test]
    fn force_release_clears_regardless_of_owner() {
        let lock = ControlLock::new();
        lock.claim_if_vacant("a", "t", "s1");
        lock.force_release("a", "t");
        assert_eq!(lock.owner("a", "t"), None);
    }

    #[test]
    fn release_all_clears_every_tab_for_subscriber() {
        let lock = ControlLock::new();
        lock.claim_if_vacant("a", "t1", "s1");
        lock.claim_if_vacant("a", "t2", "s1");
        lock.claim_if_vacant("a", "t3", "s2");
        let mut released = lock.release_all("s1");
        released.sort();
        assert_eq!(
            released,
            vec![
                ("a".to_string(), "t1".to_string()),
                ("a".to_string(), "t2".to_string()),
            ]
        );
        assert_eq!(lock.owner("a", "t3").as_deref(), Some("s2"));
    }
}
