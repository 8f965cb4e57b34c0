//! In-memory, time-bounded store of pending actions.
//!
//! One mutex guards the whole map. Every mutating operation (creation,
//! lazy eviction, denial, token redemption, sweeping) runs under it, which
//! is what makes identifiers unique and tokens single-use. Nothing here
//! awaits while holding the lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::action::{ActionId, NewAction, PendingAction};
use crate::clock::{Clock, SystemClock};
use crate::obs;

/// Default lifetime of a pending action.
pub const DEFAULT_TTL_MINUTES: i64 = 5;

struct Slot {
    seq: u64,
    action: PendingAction,
}

#[derive(Default)]
struct Inner {
    actions: HashMap<ActionId, Slot>,
    next_seq: u64,
}

impl Inner {
    fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.actions.len();
        self.actions.retain(|_, slot| !slot.action.is_expired_at(now));
        before - self.actions.len()
    }

    /// Live entry for `id`, evicting it first if it has expired.
    fn live_mut(&mut self, id: &ActionId, now: DateTime<Utc>) -> Option<&mut PendingAction> {
        let expired = self.actions.get(id)?.action.is_expired_at(now);
        if expired {
            self.actions.remove(id);
            obs::emit_actions_expired(1);
            return None;
        }
        self.actions.get_mut(id).map(|slot| &mut slot.action)
    }
}

/// Process-lifetime store of pending actions.
///
/// Construct one at startup and share it by `Arc`.
pub struct PendingActionStore {
    inner: Mutex<Inner>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for PendingActionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingActionStore")
            .field("ttl", &self.ttl)
            .field("len", &self.lock().actions.len())
            .finish()
    }
}

impl Default for PendingActionStore {
    fn default() -> Self {
        Self::new(Duration::minutes(DEFAULT_TTL_MINUTES))
    }
}

impl PendingActionStore {
    /// A store using wall-clock time.
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every mutation is a single insert, remove or field store, so a
        // poisoned map is still consistent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sweep expired entries, then insert a new action under a fresh
    /// identifier.
    pub fn create(&self, spec: NewAction) -> PendingAction {
        let now = self.clock.now();
        let mut inner = self.lock();
        obs::emit_actions_expired(inner.sweep(now));

        let mut action_id = ActionId::generate();
        while inner.actions.contains_key(&action_id) {
            action_id = ActionId::generate();
        }

        let action = PendingAction::new(action_id.clone(), spec, now, self.ttl);
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.actions.insert(
            action_id,
            Slot {
                seq,
                action: action.clone(),
            },
        );
        drop(inner);

        obs::emit_action_created(&action);
        action
    }

    /// Look up a live action. Expired entries are evicted and reported as
    /// absent.
    pub fn get(&self, action_id: &ActionId) -> Option<PendingAction> {
        let now = self.clock.now();
        self.lock().live_mut(action_id, now).map(|a| a.clone())
    }

    /// Remove a live action. Returns whether anything was removed; an
    /// expired entry is evicted as expired and reported as absent.
    /// Authorization is the caller's concern.
    pub fn deny(&self, action_id: &ActionId) -> bool {
        let now = self.clock.now();
        let mut inner = self.lock();
        if inner.live_mut(action_id, now).is_none() {
            return false;
        }
        inner.actions.remove(action_id).is_some()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let removed = self.lock().sweep(now);
        obs::emit_actions_expired(removed);
        removed
    }

    /// Live actions in creation order, optionally only those requested by
    /// `requester`.
    pub fn list_pending(&self, requester: Option<&str>) -> Vec<PendingAction> {
        let now = self.clock.now();
        let mut inner = self.lock();
        obs::emit_actions_expired(inner.sweep(now));

        let mut slots: Vec<&Slot> = inner
            .actions
            .values()
            .filter(|slot| requester.map_or(true, |r| slot.action.requester_identity == r))
            .collect();
        slots.sort_by_key(|slot| slot.seq);
        slots.into_iter().map(|slot| slot.action.clone()).collect()
    }

    /// Redeem a confirmation token for `tool_name`.
    ///
    /// On a match the action is removed in the same critical section and a
    /// copy of its arguments returned, so a token is redeemable once.
    pub fn validate_token(&self, tool_name: &str, token: &str) -> Option<Value> {
        let now = self.clock.now();
        let mut inner = self.lock();

        let matched = inner
            .actions
            .iter()
            .find(|(_, slot)| {
                let a = &slot.action;
                !a.is_expired_at(now)
                    && a.tool_name == tool_name
                    && a.confirm_token.as_ref().is_some_and(|t| t.matches(token))
            })
            .map(|(id, _)| id.clone());

        let Some(action_id) = matched else {
            drop(inner);
            obs::emit_token_rejected(tool_name);
            return None;
        };

        let slot = inner.actions.remove(&action_id)?;
        drop(inner);
        obs::emit_token_consumed(&action_id, tool_name);
        Some(slot.action.tool_args)
    }

    /// Apply `f` to a live action under the store lock.
    ///
    /// Returns `None` when the action is absent or expired (and evicts it in
    /// the latter case).
    pub(crate) fn update<R>(
        &self,
        action_id: &ActionId,
        f: impl FnOnce(&mut PendingAction) -> R,
    ) -> Option<R> {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.live_mut(action_id, now).map(f)
    }

    /// Number of entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.lock().actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
