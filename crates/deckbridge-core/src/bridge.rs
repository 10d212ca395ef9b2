//! The translator between the device layer's addressing and the plugin
//! protocol.
//!
//! One `Bridge` is constructed at startup and shared by reference with the
//! pipe listener, the session manager, and the UI-facing callbacks; it owns
//! the binding store and the image cache handle, everything else is a seam.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use log::{info, warn};
use serde_json::{Map, Value};

use crate::deck::DeckApi;
use crate::events::{OutboundSender, inbound, outbound};
use crate::geometry::Grid;
use crate::image_cache::ImageCache;
use crate::shared::{BridgeConfig, Paths};
use crate::store::bindings::BindingStore;
use crate::ui::{UiEmitter, UiEvent};

pub struct Bridge {
    pub(crate) deck: Arc<dyn DeckApi>,
    pub(crate) device: String,
    pub(crate) grid: Grid,
    pub(crate) bindings: BindingStore,
    pub(crate) cache: ImageCache,
    pub(crate) outbound: OutboundSender,
    pub(crate) pipe_path: PathBuf,
    pub(crate) trampoline: PathBuf,
    pub(crate) placeholder_icon: PathBuf,
    pub(crate) ui: UiEmitter,
}

impl Bridge {
    /// Bind to the first attached device. Erroring here (instead of guarding
    /// every later call behind an "initialised" flag) keeps the rest of the
    /// bridge free of partially-constructed states.
    pub fn new(
        deck: Arc<dyn DeckApi>,
        paths: &Paths,
        config: &BridgeConfig,
        outbound: OutboundSender,
        ui: UiEmitter,
    ) -> Result<Arc<Self>, anyhow::Error> {
        let device = deck
            .devices()
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no deck devices attached"))?;
        info!("Bridging device {}", device);

        Ok(Arc::new(Self {
            deck,
            device,
            grid: config.grid,
            bindings: BindingStore::new(config.grid),
            cache: ImageCache::new(paths.image_cache_dir.clone()),
            outbound,
            pipe_path: config.pipe_path.clone(),
            trampoline: paths.trampoline(),
            placeholder_icon: paths.placeholder_icon(),
            ui,
        }))
    }

    /// Register the page-change observer on the deck layer so page switches
    /// emit the disappear/appear replay.
    pub fn attach(self: &Arc<Self>) {
        let bridge = Arc::clone(self);
        self.deck.register_page_observer(Box::new(move |old_page, new_page| {
            bridge.on_page_changed(old_page, new_page);
        }));
    }

    /// Decode and apply one frame from the plugin, returning the reply frame
    /// when the protocol calls for one.
    pub async fn handle_message(&self, raw: &str) -> Result<Option<String>, anyhow::Error> {
        inbound::process_message(self, raw).await
    }

    /// Key release from the device layer; bound buttons relay a `keyUp`.
    pub fn handle_key_up(&self, index: u16, page: u16) -> Result<(), anyhow::Error> {
        outbound::key_up(self, index, page)
    }

    /// Action assignment from the UI; an empty action clears the binding.
    pub fn handle_action_assigned(
        &self,
        index: u16,
        page: u16,
        action: &str,
    ) -> Result<(), anyhow::Error> {
        outbound::action_assigned(self, index, page, action)
    }

    /// Action bound to a slot, empty when unbound. The UI reads this to
    /// populate its action selector.
    pub fn action_of(&self, index: u16, page: u16) -> String {
        self.bindings
            .get(page, index)
            .map(|binding| binding.action)
            .unwrap_or_default()
    }

    /// Explicit action settings of a slot as JSON text, `{}` when none were
    /// recorded. The UI reads this to populate its settings editor.
    pub fn action_settings_of(&self, index: u16, page: u16) -> String {
        self.bindings
            .get(page, index)
            .and_then(|binding| binding.action_settings)
            .map(|settings| Value::Object(settings).to_string())
            .unwrap_or_else(|| "{}".to_owned())
    }

    /// Explicit action settings from the UI, an empty object included.
    pub fn set_action_settings(
        &self,
        index: u16,
        page: u16,
        settings: Map<String, Value>,
    ) -> Result<(), anyhow::Error> {
        outbound::action_settings_changed(self, index, page, settings)
    }

    /// Re-announce the bound buttons of one page to the plugin.
    pub fn replay(&self, page: u16) -> Result<(), anyhow::Error> {
        outbound::replay(self, page)
    }

    /// Re-announce the page the device currently shows; the session manager
    /// calls this for every fresh plugin connection.
    pub fn replay_active_page(&self) -> Result<(), anyhow::Error> {
        self.replay(self.deck.current_page(&self.device))
    }

    pub fn on_page_changed(&self, old_page: u16, new_page: u16) {
        if let Err(err) = outbound::page_changed(self, old_page, new_page) {
            warn!(
                "Failed to replay page switch {} -> {}: {:#}",
                old_page, new_page, err
            );
        }
    }

    /// Visual reset after the disconnect grace period: placeholder icons
    /// everywhere, bindings untouched.
    pub fn disconnect(&self) {
        info!("Plugin gone; resetting bound buttons to the placeholder icon");
        outbound::disconnect(self);
    }

    pub(crate) fn reset_button(&self, page: u16, index: u16, icon: &str) {
        self.deck.set_button_text(&self.device, page, index, "");
        self.deck.set_button_command(&self.device, page, index, "");
        self.deck.set_button_icon(&self.device, page, index, icon);
    }

    pub(crate) fn refresh_ui(&self) {
        self.ui.emit(UiEvent::RedrawButtons);
    }

    /// Persist the surrounding device configuration and refresh the UI, after
    /// any binding mutation.
    pub(crate) fn commit(&self) {
        if let Err(err) = self.deck.export_config() {
            warn!("Failed to export deck configuration: {:#}", err);
        }
        self.refresh_ui();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::deck::VirtualDeck;
    use crate::events::{OutboundReceiver, outbound_queue};

    fn test_bridge(dir: &std::path::Path) -> (Arc<Bridge>, OutboundReceiver) {
        let paths = Paths {
            config_dir: dir.to_path_buf(),
            image_cache_dir: dir.join("image_cache"),
        };
        let config = BridgeConfig::default();
        let deck = Arc::new(VirtualDeck::new("deck-0", dir).unwrap());
        let (tx, rx) = outbound_queue(config.queue_capacity);
        let bridge = Bridge::new(deck, &paths, &config, tx, UiEmitter::new(8)).unwrap();
        bridge.attach();
        (bridge, rx)
    }

    fn drain(rx: &mut OutboundReceiver) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Some(raw) = rx.try_next() {
            frames.push(serde_json::from_str(&raw).unwrap());
        }
        frames
    }

    #[test]
    fn assigning_an_action_announces_the_button() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, mut rx) = test_bridge(dir.path());

        bridge.handle_action_assigned(3, 0, "macro").unwrap();

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        let appear = &frames[0];
        assert_eq!(appear["event"], "willAppear");
        assert_eq!(appear["action"], "macro");
        assert_eq!(appear["context"], 3);
        assert_eq!(appear["deviceIteration"], 0);
        assert_eq!(appear["size"]["columns"], 8);
        assert_eq!(appear["size"]["rows"], 4);
        assert_eq!(appear["payload"]["coordinates"]["column"], 3);
        assert_eq!(appear["payload"]["coordinates"]["row"], 0);
        assert_eq!(appear["payload"]["settings"]["macroMode"], "macroBoard");
        assert_eq!(appear["payload"]["settings"]["macroNumber"], 4);
        assert_eq!(appear["payload"]["settings"]["displayName"], true);

        // The physical button now triggers the trampoline with a keyDown frame.
        let command = bridge.deck.button_command("deck-0", 0, 3);
        assert!(command.starts_with(&bridge.trampoline.to_string_lossy().into_owned()));
        assert!(command.contains("keyDown"));
        assert!(command.contains(&bridge.pipe_path.to_string_lossy().into_owned()));
    }

    #[test]
    fn clearing_an_action_retracts_the_button() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, mut rx) = test_bridge(dir.path());

        bridge.handle_action_assigned(5, 1, "soundboard").unwrap();
        drain(&mut rx);

        bridge.handle_action_assigned(5, 1, "").unwrap();
        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        let disappear = &frames[0];
        assert_eq!(disappear["event"], "willDisappear");
        assert_eq!(disappear["action"], "soundboard");
        assert_eq!(disappear["context"], 32 + 5);
        assert_eq!(disappear["payload"]["coordinates"]["column"], 5);
        assert_eq!(disappear["payload"]["coordinates"]["row"], 0);
        assert!(disappear.get("size").is_none());

        assert!(bridge.bindings.get(1, 5).is_none());
    }

    #[test]
    fn ui_accessors_reflect_the_binding_state() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, _rx) = test_bridge(dir.path());

        assert_eq!(bridge.action_of(6, 0), "");
        assert_eq!(bridge.action_settings_of(6, 0), "{}");

        bridge.handle_action_assigned(6, 0, "soundboard").unwrap();
        assert_eq!(bridge.action_of(6, 0), "soundboard");
        // Defaults are synthesized on demand, never recorded as explicit.
        assert_eq!(bridge.action_settings_of(6, 0), "{}");

        let mut custom = Map::new();
        custom.insert("soundNr".to_owned(), serde_json::json!(12));
        bridge.set_action_settings(6, 0, custom).unwrap();
        assert_eq!(bridge.action_settings_of(6, 0), r#"{"soundNr":12}"#);
    }

    #[test]
    fn key_up_is_relayed_only_for_bound_buttons() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, mut rx) = test_bridge(dir.path());

        bridge.handle_key_up(4, 0).unwrap();
        assert!(drain(&mut rx).is_empty());

        bridge.handle_action_assigned(4, 0, "soundboard").unwrap();
        drain(&mut rx);

        bridge.handle_key_up(4, 0).unwrap();
        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        let key_up = &frames[0];
        assert_eq!(key_up["event"], "keyUp");
        assert_eq!(key_up["action"], "soundboard");
        assert_eq!(key_up["payload"]["settings"]["soundNr"], 5);
        assert_eq!(key_up["payload"]["deviceIteration"], 0);
        assert_eq!(key_up["payload"]["device"], "deck-0");
        assert!(key_up.get("size").is_none());
        assert!(key_up.get("deviceIteration").is_none());
    }

    #[test]
    fn page_switch_retracts_old_page_and_announces_new_one() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, mut rx) = test_bridge(dir.path());

        bridge.handle_action_assigned(0, 0, "macro").unwrap();
        bridge.handle_action_assigned(7, 1, "soundboard").unwrap();
        drain(&mut rx);

        bridge.deck.set_page("deck-0", 1);

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["event"], "willDisappear");
        assert_eq!(frames[0]["context"], 0);
        assert_eq!(frames[1]["event"], "willAppear");
        assert_eq!(frames[1]["context"], 32 + 7);

        // The old page's button was visually cleared but stays bound.
        assert_eq!(bridge.deck.button_icon("deck-0", 0, 0), "");
        assert!(bridge.bindings.get(0, 0).is_some());
    }

    #[test]
    fn disconnect_resets_icons_but_keeps_bindings() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, mut rx) = test_bridge(dir.path());

        bridge.handle_action_assigned(2, 0, "macro").unwrap();
        bridge.handle_action_assigned(9, 3, "soundboard").unwrap();
        drain(&mut rx);

        bridge.disconnect();

        let placeholder = bridge.placeholder_icon.to_string_lossy().into_owned();
        assert_eq!(bridge.deck.button_icon("deck-0", 0, 2), placeholder);
        assert_eq!(bridge.deck.button_icon("deck-0", 3, 9), placeholder);
        assert!(bridge.bindings.get(0, 2).is_some());
        assert!(bridge.bindings.get(3, 9).is_some());
    }

    #[tokio::test]
    async fn handshake_and_init_get_fixed_replies() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, _rx) = test_bridge(dir.path());

        let reply = bridge
            .handle_message(r#"{"target":"server"}"#)
            .await
            .unwrap()
            .unwrap();
        let reply: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply["target"], "MD");
        assert_eq!(reply["type"], "connected");
        assert_eq!(reply["data"], "SD");

        let reply = bridge
            .handle_message(r#"{"target":"SD","type":"init"}"#)
            .await
            .unwrap()
            .unwrap();
        let reply: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply["source"], "SD");
        assert_eq!(reply["type"], "version");
        assert_eq!(reply["version"], crate::shared::PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn set_title_updates_the_addressed_button_without_a_reply() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, _rx) = test_bridge(dir.path());

        let reply = bridge
            .handle_message(r#"{"target":"SD","event":"setTitle","context":3,"payload":{"title":"Cast"}}"#)
            .await
            .unwrap();
        assert!(reply.is_none());
        assert_eq!(bridge.deck.button_text("deck-0", 0, 3), "Cast");

        // Context on a later page resolves through the grid.
        bridge
            .handle_message(r#"{"target":"SD","event":"setTitle","context":35,"payload":{"title":"Roll"}}"#)
            .await
            .unwrap();
        assert_eq!(bridge.deck.button_text("deck-0", 1, 3), "Roll");
    }

    #[tokio::test]
    async fn buffer_image_never_fetches_and_requires_a_cache_hit() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, _rx) = test_bridge(dir.path());

        bridge
            .handle_message(
                r#"{"target":"SD","event":"setBufferImage","context":0,"payload":{"id":"img-1"}}"#,
            )
            .await
            .unwrap();
        assert_eq!(bridge.deck.button_icon("deck-0", 0, 0), "");

        // Prime the cache by hand, then the same frame applies.
        std::fs::create_dir_all(dir.path().join("image_cache")).unwrap();
        std::fs::write(dir.path().join("image_cache").join("img-1"), b"png").unwrap();
        bridge
            .handle_message(
                r#"{"target":"SD","event":"setBufferImage","context":0,"payload":{"id":"img-1"}}"#,
            )
            .await
            .unwrap();
        let icon = bridge.deck.button_icon("deck-0", 0, 0);
        assert!(icon.ends_with("img-1"));
    }

    #[tokio::test]
    async fn failed_image_fetch_leaves_the_icon_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, _rx) = test_bridge(dir.path());

        bridge.deck.set_button_icon("deck-0", 0, 1, "before.png");
        // Nothing listens on this port; the fetch fails and the frame is dropped.
        let result = bridge
            .handle_message(
                r#"{"target":"SD","event":"setImage","context":1,"payload":{"id":"img-x","image":"http://127.0.0.1:9/none"}}"#,
            )
            .await;
        assert!(result.is_ok());
        assert_eq!(bridge.deck.button_icon("deck-0", 0, 1), "before.png");
        assert!(!bridge.cache.contains("img-x"));
    }

    #[tokio::test]
    async fn unknown_events_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, mut rx) = test_bridge(dir.path());

        let reply = bridge
            .handle_message(r#"{"target":"SD","event":"fancyNewThing","context":1}"#)
            .await
            .unwrap();
        assert!(reply.is_none());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn malformed_json_is_an_error_for_the_caller() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, _rx) = test_bridge(dir.path());
        assert!(bridge.handle_message("{not json").await.is_err());
    }
}
