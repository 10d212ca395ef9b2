//! Seam to the device-management layer.
//!
//! The real deck library owns button rendering and config persistence; the
//! bridge only needs the narrow surface below. [`VirtualDeck`] is an in-memory
//! implementation backed by a JSON store, used for headless runs and tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::store::Store;

/// Callback invoked after the deck switches pages, with (old, new).
pub type PageObserver = Box<dyn Fn(u16, u16) + Send + Sync>;

pub trait DeckApi: Send + Sync {
    fn devices(&self) -> Vec<String>;

    fn current_page(&self, device: &str) -> u16;
    /// Switch the visible page. Registered page observers run after the
    /// switch; this is the hook the bridge uses to emit disappear/appear
    /// replays.
    fn set_page(&self, device: &str, page: u16);
    fn register_page_observer(&self, observer: PageObserver);

    fn button_text(&self, device: &str, page: u16, index: u16) -> String;
    fn set_button_text(&self, device: &str, page: u16, index: u16, text: &str);
    fn button_icon(&self, device: &str, page: u16, index: u16) -> String;
    fn set_button_icon(&self, device: &str, page: u16, index: u16, icon: &str);
    fn button_command(&self, device: &str, page: u16, index: u16) -> String;
    fn set_button_command(&self, device: &str, page: u16, index: u16, command: &str);

    /// Persist the device configuration (delegated to the config layer).
    fn export_config(&self) -> Result<(), anyhow::Error>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct ButtonState {
    text: String,
    icon: String,
    command: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DeckState {
    device: String,
    page: u16,
    /// page -> index -> button state.
    buttons: HashMap<u16, HashMap<u16, ButtonState>>,
}

pub struct VirtualDeck {
    store: Mutex<Store<DeckState>>,
    observers: Mutex<Vec<PageObserver>>,
}

impl VirtualDeck {
    pub fn new(device: &str, config_dir: &Path) -> Result<Self, anyhow::Error> {
        let mut store = Store::new(
            "deck",
            config_dir,
            DeckState {
                device: device.to_owned(),
                ..DeckState::default()
            },
        )?;
        // The configured device id wins over whatever an old state file says.
        store.value.device = device.to_owned();
        Ok(Self {
            store: Mutex::new(store),
            observers: Mutex::new(Vec::new()),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Store<DeckState>> {
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_button<R>(
        &self,
        page: u16,
        index: u16,
        f: impl FnOnce(&mut ButtonState) -> R,
    ) -> R {
        let mut store = self.lock();
        let button = store
            .value
            .buttons
            .entry(page)
            .or_default()
            .entry(index)
            .or_default();
        f(button)
    }
}

impl DeckApi for VirtualDeck {
    fn devices(&self) -> Vec<String> {
        vec![self.lock().value.device.clone()]
    }

    fn current_page(&self, _device: &str) -> u16 {
        self.lock().value.page
    }

    fn set_page(&self, _device: &str, page: u16) {
        let old = {
            let mut store = self.lock();
            let old = store.value.page;
            store.value.page = page;
            old
        };
        if old == page {
            return;
        }
        // Observers run outside the store lock: they call back into the deck.
        let observers = self.observers.lock().unwrap_or_else(|p| p.into_inner());
        for observer in observers.iter() {
            observer(old, page);
        }
    }

    fn register_page_observer(&self, observer: PageObserver) {
        self.observers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(observer);
    }

    fn button_text(&self, _device: &str, page: u16, index: u16) -> String {
        self.with_button(page, index, |b| b.text.clone())
    }

    fn set_button_text(&self, _device: &str, page: u16, index: u16, text: &str) {
        self.with_button(page, index, |b| text.clone_into(&mut b.text));
    }

    fn button_icon(&self, _device: &str, page: u16, index: u16) -> String {
        self.with_button(page, index, |b| b.icon.clone())
    }

    fn set_button_icon(&self, _device: &str, page: u16, index: u16, icon: &str) {
        self.with_button(page, index, |b| icon.clone_into(&mut b.icon));
    }

    fn button_command(&self, _device: &str, page: u16, index: u16) -> String {
        self.with_button(page, index, |b| b.command.clone())
    }

    fn set_button_command(&self, _device: &str, page: u16, index: u16, command: &str) {
        self.with_button(page, index, |b| command.clone_into(&mut b.command));
    }

    fn export_config(&self) -> Result<(), anyhow::Error> {
        self.lock().save()
    }
}
