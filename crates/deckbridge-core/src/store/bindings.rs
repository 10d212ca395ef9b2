//! The authoritative mapping from physical buttons to plugin actions.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::geometry::Grid;

/// A button's association with a plugin action.
///
/// Exists only for buttons explicitly bound to an action. The surrounding
/// device configuration (external) persists these alongside its own button
/// state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ButtonBinding {
    pub action: String,
    /// Scaffold of the `willAppear` announcement for this button, including
    /// the name/icon visibility flags the plugin reads from `payload.settings`.
    pub init_data: Value,
    /// Explicit per-action settings. `None` means never set: defaults may be
    /// synthesized. `Some` — even when empty — means the user overrode them
    /// and defaults must not be reapplied.
    pub action_settings: Option<Map<String, Value>>,
}

fn seed_init_data(action: &str) -> Value {
    json!({
        "event": "willAppear",
        "action": action,
        "payload": {
            "settings": {
                "displayName": true,
                "displayIcon": true,
            },
        },
    })
}

/// In-memory overlay of button bindings, keyed by (page, button index).
///
/// One coarse mutex is enough here: mutations arrive at human button-press and
/// UI-edit rates.
pub struct BindingStore {
    grid: Grid,
    bindings: Mutex<HashMap<(u16, u16), ButtonBinding>>,
}

impl BindingStore {
    pub fn new(grid: Grid) -> Self {
        Self {
            grid,
            bindings: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(u16, u16), ButtonBinding>> {
        self.bindings.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, page: u16, index: u16) -> Option<ButtonBinding> {
        self.lock().get(&(page, index)).cloned()
    }

    /// Bind a button to an action, preserving any explicit settings already
    /// recorded for the slot. The `willAppear` scaffold is reseeded either way.
    pub fn bind(&self, page: u16, index: u16, action: &str) {
        let mut bindings = self.lock();
        let binding = bindings
            .entry((page, index))
            .or_insert_with(|| ButtonBinding {
                action: action.to_owned(),
                init_data: seed_init_data(action),
                action_settings: None,
            });
        binding.action = action.to_owned();
        binding.init_data = seed_init_data(action);
    }

    /// Remove the binding for a slot, returning the action it carried.
    pub fn unbind(&self, page: u16, index: u16) -> Option<String> {
        self.lock().remove(&(page, index)).map(|b| b.action)
    }

    /// Record explicit settings for a bound slot. An empty object counts as an
    /// explicit override.
    pub fn set_action_settings(&self, page: u16, index: u16, settings: Map<String, Value>) {
        if let Some(binding) = self.lock().get_mut(&(page, index)) {
            binding.action_settings = Some(settings);
        }
    }

    /// Resolve the settings to embed in an outbound payload for `action` on
    /// the given slot: the explicit settings when present, otherwise
    /// action-specific defaults. Synthesis is a pure read; nothing is stored.
    pub fn settings_for(&self, action: &str, page: u16, index: u16) -> Map<String, Value> {
        if let Some(binding) = self.lock().get(&(page, index)) {
            if let Some(settings) = &binding.action_settings {
                return settings.clone();
            }
        }

        let mut settings = Map::new();
        match action {
            // Buttons number their targets 1-based, hence index + 1.
            "soundboard" => {
                settings.insert(
                    "soundNr".to_owned(),
                    json!(self.grid.to_context(index + 1, page)),
                );
            }
            "macro" => {
                settings.insert("macroMode".to_owned(), json!("macroBoard"));
                settings.insert(
                    "macroNumber".to_owned(),
                    json!(self.grid.to_context(index + 1, page)),
                );
            }
            _ => {}
        }
        settings
    }

    /// Bound slots on one page, in index order.
    pub fn bound_on_page(&self, page: u16) -> Vec<(u16, ButtonBinding)> {
        let mut slots: Vec<_> = self
            .lock()
            .iter()
            .filter(|((p, _), _)| *p == page)
            .map(|((_, index), binding)| (*index, binding.clone()))
            .collect();
        slots.sort_by_key(|(index, _)| *index);
        slots
    }

    /// Every bound slot across all pages.
    pub fn bound_buttons(&self) -> Vec<(u16, u16, ButtonBinding)> {
        let mut slots: Vec<_> = self
            .lock()
            .iter()
            .map(|((page, index), binding)| (*page, *index, binding.clone()))
            .collect();
        slots.sort_by_key(|(page, index, _)| (*page, *index));
        slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_lifecycle_with_soundboard_defaults() {
        let store = BindingStore::new(Grid::default());

        store.bind(0, 5, "soundboard");
        let binding = store.get(0, 5).unwrap();
        assert_eq!(binding.action, "soundboard");
        assert_eq!(binding.init_data["event"], "willAppear");
        assert_eq!(
            binding.init_data["payload"]["settings"]["displayName"],
            json!(true)
        );

        let settings = store.settings_for("soundboard", 0, 5);
        assert_eq!(settings["soundNr"], json!(6));

        assert_eq!(store.unbind(0, 5).as_deref(), Some("soundboard"));
        assert!(store.get(0, 5).is_none());
    }

    #[test]
    fn macro_defaults_account_for_the_page_offset() {
        let store = BindingStore::new(Grid::default());
        store.bind(2, 3, "macro");
        let settings = store.settings_for("macro", 2, 3);
        assert_eq!(settings["macroMode"], json!("macroBoard"));
        // index 4 on page 2 of a 32-key grid.
        assert_eq!(settings["macroNumber"], json!(68));
    }

    #[test]
    fn explicit_empty_settings_suppress_defaults() {
        let store = BindingStore::new(Grid::default());
        store.bind(0, 1, "soundboard");
        store.set_action_settings(0, 1, Map::new());

        let settings = store.settings_for("soundboard", 0, 1);
        assert!(settings.is_empty());
    }

    #[test]
    fn rebinding_preserves_explicit_settings() {
        let store = BindingStore::new(Grid::default());
        store.bind(0, 1, "soundboard");
        let mut custom = Map::new();
        custom.insert("soundNr".to_owned(), json!(42));
        store.set_action_settings(0, 1, custom);

        store.bind(0, 1, "macro");
        let binding = store.get(0, 1).unwrap();
        assert_eq!(binding.action, "macro");
        assert_eq!(
            binding.action_settings.as_ref().unwrap()["soundNr"],
            json!(42)
        );
        assert_eq!(binding.init_data["action"], "macro");
    }

    #[test]
    fn unknown_actions_get_no_defaults() {
        let store = BindingStore::new(Grid::default());
        assert!(store.settings_for("mysterious", 0, 0).is_empty());
    }

    #[test]
    fn page_enumeration_is_ordered_and_scoped() {
        let store = BindingStore::new(Grid::default());
        store.bind(0, 9, "macro");
        store.bind(0, 2, "soundboard");
        store.bind(1, 4, "macro");

        let page0: Vec<u16> = store.bound_on_page(0).into_iter().map(|(i, _)| i).collect();
        assert_eq!(page0, vec![2, 9]);

        let all: Vec<(u16, u16)> = store
            .bound_buttons()
            .into_iter()
            .map(|(p, i, _)| (p, i))
            .collect();
        assert_eq!(all, vec![(0, 2), (0, 9), (1, 4)]);
    }
}
