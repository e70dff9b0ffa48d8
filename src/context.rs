//! Action identity and the per-chain context stack

use crate::ContextError;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Opaque identifier of a long-running action, allocated by the coordinator
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionId(Arc<str>);

impl ActionId {
    /// Wrap a coordinator-issued identifier
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Parse an identifier received on the wire; blank values are rejected
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| Self::new(trimmed))
    }

    /// Get the raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ActionId({})", self.0)
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered stack of the actions active on one call chain, innermost last.
///
/// Also carries arbitrary scratch state that lives exactly as long as the
/// frame does.
#[derive(Default)]
pub struct ContextFrame {
    ids: Vec<ActionId>,
    state: HashMap<Box<str>, Box<dyn Any + Send>>,
}

impl ContextFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push `id` unless it is already active in this frame.
    ///
    /// Returns whether the frame changed.
    pub fn push(&mut self, id: ActionId) -> bool {
        if self.ids.contains(&id) {
            return false;
        }
        self.ids.push(id);
        true
    }

    /// Remove and return the innermost id
    pub fn pop(&mut self) -> Option<ActionId> {
        let id = self.ids.pop();
        if self.ids.is_empty() {
            self.state.clear();
        }
        id
    }

    /// Remove `id` wherever it sits in the stack
    pub fn remove(&mut self, id: &ActionId) -> bool {
        let Some(pos) = self.ids.iter().position(|active| active == id) else {
            return false;
        };
        self.ids.remove(pos);
        if self.ids.is_empty() {
            self.state.clear();
        }
        true
    }

    /// Innermost id
    pub fn peek(&self) -> Option<&ActionId> {
        self.ids.last()
    }

    /// All active ids, outermost first
    pub fn snapshot(&self) -> Vec<ActionId> {
        self.ids.clone()
    }

    pub fn contains(&self, id: &ActionId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Attach scratch state; returns the previous value for `key`
    pub fn put_state<T: Any + Send>(
        &mut self,
        key: &str,
        value: T,
    ) -> Option<Box<dyn Any + Send>> {
        self.state.insert(key.into(), Box::new(value))
    }

    pub fn get_state<T: Any + Send>(&self, key: &str) -> Option<&T> {
        self.state.get(key).and_then(|v| v.downcast_ref::<T>())
    }
}

impl std::fmt::Debug for ContextFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextFrame")
            .field("ids", &self.ids)
            .field("state_keys", &self.state.keys().collect::<Vec<_>>())
            .finish()
    }
}

tokio::task_local! {
    static CHAIN: RefCell<Option<ContextFrame>>;
}

/// Access to the context frame of the calling chain.
///
/// A chain is a `scope`/`sync_scope` invocation; every task or thread that
/// enters its own scope gets a private slot, so two independent chains never
/// observe each other's frame. The frame itself is created on first push and
/// retired (with its scratch state) when its last id is removed.
pub struct Current;

impl Current {
    /// Run `fut` as a new call chain with an empty context
    pub async fn scope<F: Future>(fut: F) -> F::Output {
        CHAIN.scope(RefCell::new(None), fut).await
    }

    /// Synchronous variant of [`Current::scope`]
    pub fn sync_scope<R>(f: impl FnOnce() -> R) -> R {
        CHAIN.sync_scope(RefCell::new(None), f)
    }

    /// Run `fut` inside the caller's chain, opening a fresh one if there is none
    pub async fn ensure_scope<F: Future>(fut: F) -> F::Output {
        if Self::in_chain() {
            fut.await
        } else {
            Self::scope(fut).await
        }
    }

    /// Whether the caller runs inside a chain scope
    pub fn in_chain() -> bool {
        CHAIN.try_with(|_| ()).is_ok()
    }

    fn with_slot<R>(f: impl FnOnce(&mut Option<ContextFrame>) -> R) -> Result<R, ContextError> {
        CHAIN
            .try_with(|slot| f(&mut slot.borrow_mut()))
            .map_err(|_| ContextError::NoActiveChain)
    }

    fn read_slot<R>(f: impl FnOnce(&Option<ContextFrame>) -> R) -> Result<R, ContextError> {
        CHAIN
            .try_with(|slot| f(&slot.borrow()))
            .map_err(|_| ContextError::NoActiveChain)
    }

    /// Push `id` onto the chain's frame, creating the frame if absent
    pub fn push(id: ActionId) -> Result<(), ContextError> {
        Self::with_slot(|slot| {
            slot.get_or_insert_with(ContextFrame::new).push(id);
        })
    }

    /// Pop the innermost id; an empty chain is an error
    pub fn pop() -> Result<ActionId, ContextError> {
        Self::with_slot(|slot| {
            let frame = slot.as_mut().ok_or(ContextError::EmptyFrame)?;
            let id = frame.pop().ok_or(ContextError::EmptyFrame)?;
            if frame.is_empty() {
                *slot = None;
            }
            Ok(id)
        })?
    }

    /// Remove a specific id; returns whether it was active
    pub fn pop_id(id: &ActionId) -> bool {
        Self::with_slot(|slot| {
            let Some(frame) = slot.as_mut() else {
                return false;
            };
            let removed = frame.remove(id);
            if frame.is_empty() {
                *slot = None;
            }
            removed
        })
        .unwrap_or(false)
    }

    /// Drop the whole frame including scratch state
    pub fn pop_all() {
        let _ = Self::with_slot(|slot| *slot = None);
    }

    /// Innermost active id
    pub fn peek() -> Option<ActionId> {
        Self::read_slot(|slot| slot.as_ref().and_then(|f| f.peek().cloned()))
            .ok()
            .flatten()
    }

    /// All active ids, outermost first; empty outside a chain
    pub fn snapshot() -> Vec<ActionId> {
        Self::read_slot(|slot| slot.as_ref().map(ContextFrame::snapshot).unwrap_or_default())
            .unwrap_or_default()
    }

    /// Attach scratch state to the live frame.
    ///
    /// Without an active frame there is nothing to attach to and the value is
    /// dropped; returns whether it was stored.
    pub fn put_state<T: Any + Send>(key: &str, value: T) -> bool {
        Self::with_slot(|slot| match slot.as_mut() {
            Some(frame) => {
                frame.put_state(key, value);
                true
            }
            None => false,
        })
        .unwrap_or(false)
    }

    /// Copy of the scratch value under `key`; `None` when absent or of another type
    pub fn get_state<T: Any + Send + Clone>(key: &str) -> Option<T> {
        Self::read_slot(|slot| slot.as_ref().and_then(|frame| frame.get_state::<T>(key).cloned()))
            .ok()
            .flatten()
    }

    /// Read scratch state through `f`.
    ///
    /// `f` runs on a copy taken outside the chain borrow, so it may use the
    /// rest of the `Current` API.
    pub fn with_state<T: Any + Send + Clone, R>(key: &str, f: impl FnOnce(&T) -> R) -> Option<R> {
        Self::get_state::<T>(key).map(|value| f(&value))
    }
}
