use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use relay_core::lock_unpoisoned;

#[derive(Debug, Default)]
struct RegistryState {
    next_generation: u64,
    entries: HashMap<String, (u64, CancellationToken)>,
}

/// Session-scoped map from request id to the token cancelling its execution.
///
/// The lock is held only for map lookups and updates; tokens are cancelled
/// after the entry has been removed and the lock released.
#[derive(Debug, Clone, Default)]
pub struct RpcCancellationRegistry {
    state: Arc<Mutex<RegistryState>>,
}

/// Scoped registration; dropping it removes the entry it created, if still present.
#[derive(Debug)]
pub struct RpcCancelRegistration {
    state: Arc<Mutex<RegistryState>>,
    key: String,
    generation: u64,
    released: bool,
}

/// Returns the registry key for a scalar request id, or `None` when the id
/// cannot be targeted (absent, null, empty string, array, or object).
pub fn rpc_cancellation_key(id: &Value) -> Option<String> {
    match id {
        Value::String(text) => (!text.trim().is_empty()).then(|| text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

impl RpcCancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `token` under the request id. Returns `None` without touching
    /// the registry when the id cannot be targeted.
    ///
    /// A later registration under the same key replaces the earlier one.
    pub fn register(
        &self,
        id: Option<&Value>,
        token: CancellationToken,
    ) -> Option<RpcCancelRegistration> {
        let key = rpc_cancellation_key(id?)?;
        let mut state = lock_unpoisoned(&self.state);
        state.next_generation = state.next_generation.saturating_add(1);
        let generation = state.next_generation;
        state.entries.insert(key.clone(), (generation, token));
        Some(RpcCancelRegistration {
            state: Arc::clone(&self.state),
            key,
            generation,
            released: false,
        })
    }

    /// Removes whatever is registered under `key`; returns whether an entry existed.
    pub fn unregister(&self, key: &str) -> bool {
        lock_unpoisoned(&self.state).entries.remove(key).is_some()
    }

    /// Atomically takes the entry for `key` and cancels it.
    ///
    /// Only the first cancel for a registration returns `true`.
    pub fn cancel(&self, key: &str) -> bool {
        let removed = lock_unpoisoned(&self.state).entries.remove(key);
        match removed {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RpcCancelRegistration {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Removes this registration. Returns `false` when the entry is already
    /// gone, either taken by a `cancel` or replaced by a later registration
    /// under the same key.
    pub fn release(mut self) -> bool {
        self.released = true;
        remove_generation(&self.state, &self.key, self.generation)
    }
}

impl Drop for RpcCancelRegistration {
    fn drop(&mut self) {
        if !self.released {
            remove_generation(&self.state, &self.key, self.generation);
        }
    }
}

fn remove_generation(state: &Mutex<RegistryState>, key: &str, generation: u64) -> bool {
    let mut state = lock_unpoisoned(state);
    match state.entries.get(key) {
        Some((current, _)) if *current == generation => {
            state.entries.remove(key);
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::{rpc_cancellation_key, RpcCancellationRegistry};

    #[test]
    fn unit_cancellation_key_uses_string_form_of_scalar_ids() {
        assert_eq!(rpc_cancellation_key(&json!(1)), Some("1".to_string()));
        assert_eq!(rpc_cancellation_key(&json!("1")), Some("1".to_string()));
        assert_eq!(rpc_cancellation_key(&json!(true)), Some("true".to_string()));
        assert_eq!(rpc_cancellation_key(&json!("  ")), None);
        assert_eq!(rpc_cancellation_key(&json!(" job")), Some(" job".to_string()));
        assert_eq!(rpc_cancellation_key(&json!(null)), None);
        assert_eq!(rpc_cancellation_key(&json!([1])), None);
        assert_eq!(rpc_cancellation_key(&json!({"id": 1})), None);
    }

    #[test]
    fn unit_register_is_noop_for_untargetable_ids() {
        let registry = RpcCancellationRegistry::new();
        assert!(registry.register(None, CancellationToken::new()).is_none());
        assert!(registry
            .register(Some(&json!("")), CancellationToken::new())
            .is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn functional_cancel_applies_once_and_fires_token() {
        let registry = RpcCancellationRegistry::new();
        let token = CancellationToken::new();
        let registration = registry
            .register(Some(&json!("job")), token.clone())
            .expect("registered");
        assert_eq!(registration.key(), "job");

        assert!(registry.cancel("job"));
        assert!(token.is_cancelled());
        assert!(!registry.cancel("job"));
        assert!(!registration.release());
        assert!(registry.is_empty());
    }

    #[test]
    fn functional_release_and_drop_remove_registration() {
        let registry = RpcCancellationRegistry::new();
        let released = registry
            .register(Some(&json!(1)), CancellationToken::new())
            .expect("registered");
        assert!(released.release());
        assert!(!registry.cancel("1"));

        {
            let _scoped = registry
                .register(Some(&json!(2)), CancellationToken::new())
                .expect("registered");
            assert_eq!(registry.len(), 1);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn regression_duplicate_id_cleanup_keeps_newer_registration() {
        let registry = RpcCancellationRegistry::new();
        let older_token = CancellationToken::new();
        let newer_token = CancellationToken::new();
        let older = registry
            .register(Some(&json!(5)), older_token.clone())
            .expect("older");
        let newer = registry
            .register(Some(&json!("5")), newer_token.clone())
            .expect("newer");

        older.release();
        assert_eq!(registry.len(), 1);
        assert!(registry.cancel("5"));
        assert!(newer_token.is_cancelled());
        assert!(!older_token.is_cancelled());
        drop(newer);
        assert!(registry.is_empty());
    }

    #[test]
    fn unit_unregister_removes_any_registration_under_key() {
        let registry = RpcCancellationRegistry::new();
        let registration = registry
            .register(Some(&json!("a")), CancellationToken::new())
            .expect("registered");
        assert!(registry.unregister("a"));
        assert!(!registry.unregister("a"));
        assert!(!registration.release());
    }
}
