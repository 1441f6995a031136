use std::collections::BTreeMap;

use foundation::LayerId;
use parking_lot::RwLock;
use runtime::{EventBus, SubscriptionId};
use serde::{Deserialize, Serialize};

/// Actor that last decided a layer's visibility.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisibilitySource {
    Theme,
    User,
    Filter,
    System,
}

/// Full per-layer record, owned by [`LayerVisibilityManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerVisibilityState {
    pub layer_id: LayerId,
    pub current: bool,
    pub source: VisibilitySource,
    /// Set by a USER write; cleared only by `reset_all_user_overrides`.
    pub user_override_active: bool,
}

impl LayerVisibilityState {
    fn hidden(layer_id: LayerId) -> Self {
        Self {
            layer_id,
            current: false,
            source: VisibilitySource::System,
            user_override_active: false,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VisibilityState {
    pub current: bool,
    pub source: VisibilitySource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisibilityEvent {
    Changed {
        layer_id: LayerId,
        visible: bool,
        source: VisibilitySource,
    },
    OverridesReset {
        cleared: usize,
    },
}

/// Single source of truth for layer visibility and override precedence.
///
/// Shared by reference (`Arc`) between the theme cascade, user toggles and
/// filters. All mutation goes through [`set_visibility`] and
/// [`reset_all_user_overrides`]; both are total.
///
/// [`set_visibility`]: LayerVisibilityManager::set_visibility
/// [`reset_all_user_overrides`]: LayerVisibilityManager::reset_all_user_overrides
#[derive(Debug)]
pub struct LayerVisibilityManager {
    states: RwLock<BTreeMap<LayerId, LayerVisibilityState>>,
    events: EventBus<VisibilityEvent>,
}

impl Default for LayerVisibilityManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerVisibilityManager {
    pub fn new() -> Self {
        Self {
            states: RwLock::new(BTreeMap::new()),
            events: EventBus::new(),
        }
    }

    /// Keeps the last `capacity` events in the bus journal.
    pub fn with_event_journal(capacity: usize) -> Self {
        Self {
            states: RwLock::new(BTreeMap::new()),
            events: EventBus::with_journal_capacity(capacity),
        }
    }

    /// Records a visibility decision.
    ///
    /// Returns `false` when the write was rejected: a THEME write against a
    /// layer whose user override is still active.
    pub fn set_visibility(&self, layer_id: &LayerId, visible: bool, source: VisibilitySource) -> bool {
        {
            let mut states = self.states.write();
            let state = states
                .entry(layer_id.clone())
                .or_insert_with(|| LayerVisibilityState::hidden(layer_id.clone()));

            if source == VisibilitySource::Theme && state.user_override_active {
                tracing::debug!(
                    layer_id = %layer_id,
                    visible,
                    "theme write ignored: user override active"
                );
                return false;
            }

            state.current = visible;
            state.source = source;
            if source == VisibilitySource::User {
                state.user_override_active = true;
            }
        }

        self.events.emit(VisibilityEvent::Changed {
            layer_id: layer_id.clone(),
            visible,
            source,
        });
        true
    }

    /// Clears every user override without touching `current` or `source`.
    pub fn reset_all_user_overrides(&self) {
        let cleared = {
            let mut states = self.states.write();
            let mut cleared = 0usize;
            for state in states.values_mut() {
                if state.user_override_active {
                    state.user_override_active = false;
                    cleared += 1;
                }
            }
            cleared
        };
        if cleared > 0 {
            tracing::debug!(cleared, "user visibility overrides reset");
        }
        self.events.emit(VisibilityEvent::OverridesReset { cleared });
    }

    pub fn visibility_state(&self, layer_id: &str) -> Option<VisibilityState> {
        self.states.read().get(layer_id).map(|s| VisibilityState {
            current: s.current,
            source: s.source,
        })
    }

    pub fn layer_state(&self, layer_id: &str) -> Option<LayerVisibilityState> {
        self.states.read().get(layer_id).cloned()
    }

    /// Unknown layers are hidden.
    pub fn is_visible(&self, layer_id: &str) -> bool {
        self.states
            .read()
            .get(layer_id)
            .map(|s| s.current)
            .unwrap_or(false)
    }

    pub fn user_override_active(&self, layer_id: &str) -> bool {
        self.states
            .read()
            .get(layer_id)
            .map(|s| s.user_override_active)
            .unwrap_or(false)
    }

    /// Tracked layers in id order.
    pub fn tracked_layers(&self) -> Vec<LayerId> {
        self.states.read().keys().cloned().collect()
    }

    pub fn visible_layers(&self) -> Vec<LayerId> {
        self.states
            .read()
            .values()
            .filter(|s| s.current)
            .map(|s| s.layer_id.clone())
            .collect()
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&VisibilityEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.events.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn events(&self) -> &EventBus<VisibilityEvent> {
        &self.events
    }
}
