//! Decoding and dispatch of frames arriving from the plugin.

use anyhow::anyhow;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::bridge::Bridge;
use crate::image_cache;
use crate::shared::PROTOCOL_VERSION;

/// Envelope shared by every inbound frame; which fields are present depends on
/// the message kind.
#[derive(Deserialize)]
pub struct InboundMessage {
    pub target: Option<String>,
    #[serde(rename = "type")]
    pub message_type: Option<String>,
    pub event: Option<String>,
    pub context: Option<u32>,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Deserialize)]
struct TitlePayload {
    title: Option<String>,
}

#[derive(Deserialize)]
struct ImagePayload {
    id: String,
    image: Option<String>,
}

fn connected_reply() -> String {
    json!({"target": "MD", "type": "connected", "data": "SD"}).to_string()
}

fn version_reply() -> String {
    json!({"source": "SD", "type": "version", "version": PROTOCOL_VERSION}).to_string()
}

/// Decode one frame and apply it, returning the reply frame when the protocol
/// calls for one. Unrecognised events are ignored without a reply.
pub async fn process_message(
    bridge: &Bridge,
    raw: &str,
) -> Result<Option<String>, anyhow::Error> {
    let message: InboundMessage = serde_json::from_str(raw)?;

    if message.target.as_deref() == Some("server") {
        return Ok(Some(connected_reply()));
    }
    if message.target.as_deref() != Some("SD") {
        debug!("Ignoring message with target {:?}", message.target);
        return Ok(None);
    }
    if message.message_type.as_deref() == Some("init") {
        return Ok(Some(version_reply()));
    }

    match message.event.as_deref() {
        Some("setTitle") => set_title(bridge, &message)?,
        Some("setImage") => set_image(bridge, &message).await?,
        Some("setBufferImage") => set_buffer_image(bridge, &message)?,
        event => debug!("Ignoring unrecognised event {:?}", event),
    }

    Ok(None)
}

/// Resolve the (page, index) slot a frame addresses through its context id.
fn slot_of(bridge: &Bridge, message: &InboundMessage) -> Result<(u16, u16), anyhow::Error> {
    let context = message.context.ok_or_else(|| anyhow!("frame without context"))?;
    let page = bridge.grid.to_page(context);
    let index = bridge.grid.to_button_index(context, page);
    Ok((page, index))
}

fn set_title(bridge: &Bridge, message: &InboundMessage) -> Result<(), anyhow::Error> {
    let payload: TitlePayload = serde_json::from_value(message.payload.clone())?;
    let (page, index) = slot_of(bridge, message)?;

    let title = payload.title.unwrap_or_default();
    if title != bridge.deck.button_text(&bridge.device, page, index) {
        bridge.deck.set_button_text(&bridge.device, page, index, &title);
        bridge.refresh_ui();
    }
    Ok(())
}

async fn set_image(bridge: &Bridge, message: &InboundMessage) -> Result<(), anyhow::Error> {
    let payload: ImagePayload = serde_json::from_value(message.payload.clone())?;
    let (page, index) = slot_of(bridge, message)?;

    let cache_path = bridge.cache.path_for(&payload.id)?;
    let display = cache_path.to_string_lossy().into_owned();
    if bridge.deck.button_icon(&bridge.device, page, index) == display {
        return Ok(());
    }

    let url = payload
        .image
        .ok_or_else(|| anyhow!("setImage without an image url"))?;
    // A failed fetch drops this setImage; the icon keeps its previous value.
    if let Err(err) = bridge
        .cache
        .ensure(&payload.id, image_cache::fetch_url(&url))
        .await
    {
        warn!("Dropping setImage for {}: {:#}", payload.id, err);
        return Ok(());
    }

    bridge.deck.set_button_icon(&bridge.device, page, index, &display);
    bridge.refresh_ui();
    Ok(())
}

/// Buffer images reference content a prior `setImage` already cached; this
/// never fetches.
fn set_buffer_image(bridge: &Bridge, message: &InboundMessage) -> Result<(), anyhow::Error> {
    let payload: ImagePayload = serde_json::from_value(message.payload.clone())?;
    let (page, index) = slot_of(bridge, message)?;

    let cache_path = bridge.cache.path_for(&payload.id)?;
    let display = cache_path.to_string_lossy().into_owned();
    if bridge.deck.button_icon(&bridge.device, page, index) != display
        && bridge.cache.contains(&payload.id)
    {
        bridge.deck.set_button_icon(&bridge.device, page, index, &display);
        bridge.refresh_ui();
    }
    Ok(())
}
