//! Non-owning parent back references.
//!
//! Parents own their children through `Arc`; a child only remembers its owner
//! through an [`OwnerSlot`] holding a `Weak`, so the tree never forms a strong
//! cycle. Moving a child between owners is two-phase: the current owner
//! releases it, then the new owner claims it. Both steps notify the child's
//! listeners with [`ComponentEvent::OwnerChanged`].

use crate::error::ContainerError;
use bindlet_core::{ComponentEvent, LifecycleManager, LifecycleState};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};

struct Owner<P> {
    name: String,
    parent: Weak<P>,
}

/// Weak reference from a child to the component that owns it
pub struct OwnerSlot<P> {
    owner: RwLock<Option<Owner<P>>>,
}

impl<P> OwnerSlot<P> {
    /// An unowned slot
    #[must_use]
    pub const fn new() -> Self {
        Self {
            owner: RwLock::new(None),
        }
    }

    /// The owner, while it is alive
    #[must_use]
    pub fn get(&self) -> Option<Arc<P>> {
        self.owner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|owner| owner.parent.upgrade())
    }

    /// Name of the owner, while it is alive
    #[must_use]
    pub fn owner_name(&self) -> Option<String> {
        self.owner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|owner| owner.parent.strong_count() > 0)
            .map(|owner| owner.name.clone())
    }

    /// Whether `parent` is the current owner
    #[must_use]
    pub fn is_owned_by(&self, parent: &Arc<P>) -> bool {
        self.owner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|owner| std::ptr::eq(owner.parent.as_ptr(), Arc::as_ptr(parent)))
    }

    /// Claim the child for `parent`
    ///
    /// Returns `false` when `parent` already owns it. A slot whose owner has
    /// been dropped counts as empty.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::OwnershipConflict`] when another live owner
    /// holds the child, or the child is being destroyed.
    pub fn claim(
        &self,
        child: &LifecycleManager,
        parent_name: &str,
        parent: &Arc<P>,
    ) -> Result<bool, ContainerError> {
        let state = child.state();
        if matches!(state, LifecycleState::Destroying | LifecycleState::Destroyed) {
            return Err(conflict(child, parent_name, format!("component is {state}")));
        }

        {
            let mut slot = self.owner.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(current) = slot.as_ref() {
                if std::ptr::eq(current.parent.as_ptr(), Arc::as_ptr(parent)) {
                    return Ok(false);
                }
                if current.parent.strong_count() > 0 {
                    return Err(conflict(
                        child,
                        parent_name,
                        format!("already owned by '{}'", current.name),
                    ));
                }
            }
            *slot = Some(Owner {
                name: parent_name.to_string(),
                parent: Arc::downgrade(parent),
            });
        }

        tracing::info!(component = %child.component(), owner = %parent_name, "Component attached");
        child.notify(&ComponentEvent::OwnerChanged {
            component: child.component().to_string(),
            previous: None,
            current: Some(parent_name.to_string()),
        });
        Ok(true)
    }

    /// Give the child up, if `parent` owns it
    ///
    /// Returns `false` when `parent` was not the owner.
    pub fn release(&self, child: &LifecycleManager, parent: &Arc<P>) -> bool {
        let previous = {
            let mut slot = self.owner.write().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(current) if std::ptr::eq(current.parent.as_ptr(), Arc::as_ptr(parent)) => {
                    slot.take().map(|owner| owner.name)
                },
                _ => None,
            }
        };

        let Some(previous) = previous else {
            return false;
        };

        tracing::info!(component = %child.component(), owner = %previous, "Component detached");
        child.notify(&ComponentEvent::OwnerChanged {
            component: child.component().to_string(),
            previous: Some(previous),
            current: None,
        });
        true
    }
}

impl<P> Default for OwnerSlot<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> fmt::Debug for OwnerSlot<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnerSlot")
            .field("owner", &self.owner_name())
            .finish()
    }
}

fn conflict(child: &LifecycleManager, owner: &str, reason: String) -> ContainerError {
    tracing::warn!(component = %child.component(), owner, reason = %reason, "Ownership refused");
    ContainerError::OwnershipConflict {
        child: child.component().to_string(),
        owner: owner.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::sync::Mutex;

    struct Parent;

    fn recorded(manager: &LifecycleManager) -> Arc<Mutex<Vec<ComponentEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        manager.add_listener(Arc::new(move |event: &ComponentEvent| {
            sink.lock().unwrap().push(event.clone());
        }));
        events
    }

    #[test]
    fn test_claim_release_claim() {
        let child = LifecycleManager::new("ctx");
        let events = recorded(&child);
        let slot = OwnerSlot::new();
        let first = Arc::new(Parent);
        let second = Arc::new(Parent);

        assert!(slot.claim(&child, "first", &first).unwrap());
        assert!(!slot.claim(&child, "first", &first).unwrap());
        assert!(slot.is_owned_by(&first));

        let err = slot.claim(&child, "second", &second).unwrap_err();
        assert!(matches!(err, ContainerError::OwnershipConflict { .. }));

        assert!(!slot.release(&child, &second));
        assert!(slot.release(&child, &first));
        assert!(slot.claim(&child, "second", &second).unwrap());
        assert_eq!(slot.owner_name().as_deref(), Some("second"));

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[1],
            ComponentEvent::OwnerChanged {
                component: "ctx".to_string(),
                previous: Some("first".to_string()),
                current: None,
            }
        );
    }

    #[test]
    fn test_dropped_owner_frees_slot() {
        let child = LifecycleManager::new("ctx");
        let slot = OwnerSlot::new();
        let gone = Arc::new(Parent);
        slot.claim(&child, "gone", &gone).unwrap();
        drop(gone);

        assert!(slot.get().is_none());
        assert!(slot.owner_name().is_none());
        assert!(slot.claim(&child, "next", &Arc::new(Parent)).unwrap());
    }

    #[test]
    fn test_destroyed_child_cannot_be_claimed() {
        let child = LifecycleManager::new("ctx");
        child.change_state(LifecycleState::Destroyed).unwrap();

        let slot = OwnerSlot::new();
        assert!(slot.claim(&child, "svc", &Arc::new(Parent)).is_err());
    }
}
