//! Construction of the frames the bridge sends to the plugin, and the
//! stateful operations that enqueue them.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::bridge::Bridge;
use crate::geometry::Coordinates;
use crate::store::bindings::ButtonBinding;

#[derive(Serialize)]
pub struct Size {
    pub columns: u8,
    pub rows: u8,
}

#[derive(Serialize)]
struct AppearPayload {
    settings: Map<String, Value>,
    coordinates: Coordinates,
}

/// `willAppear`/`willDisappear` announcement for a bound button.
#[derive(Serialize)]
#[allow(non_snake_case)]
struct AppearEvent<'a> {
    event: &'a str,
    action: &'a str,
    context: u32,
    device: &'a str,
    size: Size,
    deviceIteration: u16,
    payload: AppearPayload,
}

#[derive(Serialize)]
#[allow(non_snake_case)]
struct CommandPayload {
    coordinates: Coordinates,
    settings: Map<String, Value>,
    deviceIteration: u16,
    device: String,
}

/// `keyDown`/`keyUp` command relayed for a physical press.
#[derive(Serialize)]
struct CommandEvent<'a> {
    action: &'a str,
    event: &'a str,
    context: u32,
    device: &'a str,
    payload: CommandPayload,
}

#[derive(Serialize)]
struct RemovedPayload {
    coordinates: Coordinates,
}

/// Minimal `willDisappear` sent when a binding is destroyed, carrying the
/// action name the slot used to have.
#[derive(Serialize)]
struct RemovedEvent<'a> {
    event: &'a str,
    action: &'a str,
    context: u32,
    device: &'a str,
    payload: RemovedPayload,
}

/// Build an appear/disappear frame from a binding's stored scaffold: the
/// scaffold's visibility flags merged with the resolved action settings.
fn appear_message(
    bridge: &Bridge,
    binding: &ButtonBinding,
    index: u16,
    page: u16,
    event: &str,
) -> Result<String, anyhow::Error> {
    let mut settings = binding.init_data["payload"]["settings"]
        .as_object()
        .cloned()
        .unwrap_or_default();
    for (name, value) in bridge.bindings.settings_for(&binding.action, page, index) {
        settings.insert(name, value);
    }

    Ok(serde_json::to_string(&AppearEvent {
        event,
        action: &binding.action,
        context: bridge.grid.to_context(index, page),
        device: &bridge.device,
        size: Size {
            columns: bridge.grid.columns,
            rows: bridge.grid.rows,
        },
        deviceIteration: page,
        payload: AppearPayload {
            settings,
            coordinates: bridge.grid.to_coordinates(index),
        },
    })?)
}

pub(crate) fn command_message(
    bridge: &Bridge,
    action: &str,
    event: &str,
    index: u16,
    page: u16,
) -> Result<String, anyhow::Error> {
    Ok(serde_json::to_string(&CommandEvent {
        action,
        event,
        context: bridge.grid.to_context(index, page),
        device: &bridge.device,
        payload: CommandPayload {
            coordinates: bridge.grid.to_coordinates(index),
            settings: bridge.bindings.settings_for(action, page, index),
            deviceIteration: page,
            device: bridge.device.clone(),
        },
    })?)
}

fn removed_message(
    bridge: &Bridge,
    action: &str,
    index: u16,
    page: u16,
) -> Result<String, anyhow::Error> {
    Ok(serde_json::to_string(&RemovedEvent {
        event: "willDisappear",
        action,
        context: bridge.grid.to_context(index, page),
        device: &bridge.device,
        payload: RemovedPayload {
            coordinates: bridge.grid.to_coordinates(index),
        },
    })?)
}

/// Point the physical button's command at the trampoline so a key-down relays
/// a `keyDown` frame through the pipe.
fn rewire_command(bridge: &Bridge, action: &str, index: u16, page: u16) -> Result<(), anyhow::Error> {
    let key_down = command_message(bridge, action, "keyDown", index, page)?;
    let command = format!(
        "{} '{}' '{}'",
        bridge.trampoline.display(),
        bridge.pipe_path.display(),
        key_down
    );
    bridge
        .deck
        .set_button_command(&bridge.device, page, index, &command);
    Ok(())
}

/// Relay a key release for a bound button to the plugin.
pub fn key_up(bridge: &Bridge, index: u16, page: u16) -> Result<(), anyhow::Error> {
    if let Some(binding) = bridge.bindings.get(page, index) {
        bridge
            .outbound
            .push(command_message(bridge, &binding.action, "keyUp", index, page)?);
    }
    Ok(())
}

/// Apply an action assignment from the UI: bind and announce, or unbind and
/// retract when `action` is empty.
pub fn action_assigned(
    bridge: &Bridge,
    index: u16,
    page: u16,
    action: &str,
) -> Result<(), anyhow::Error> {
    if !action.is_empty() {
        bridge.bindings.bind(page, index, action);
        rewire_command(bridge, action, index, page)?;
        let binding = bridge
            .bindings
            .get(page, index)
            .ok_or_else(|| anyhow::anyhow!("binding vanished during assignment"))?;
        bridge
            .outbound
            .push(appear_message(bridge, &binding, index, page, "willAppear")?);
    } else if let Some(previous) = bridge.bindings.unbind(page, index) {
        bridge.reset_button(page, index, "");
        bridge.outbound.push(removed_message(bridge, &previous, index, page)?);
    }
    bridge.commit();
    Ok(())
}

/// Record explicit action settings for a slot and re-announce it so the plugin
/// picks them up.
pub fn action_settings_changed(
    bridge: &Bridge,
    index: u16,
    page: u16,
    settings: Map<String, Value>,
) -> Result<(), anyhow::Error> {
    bridge.bindings.set_action_settings(page, index, settings);
    if let Some(binding) = bridge.bindings.get(page, index) {
        bridge
            .outbound
            .push(appear_message(bridge, &binding, index, page, "willAppear")?);
    }
    bridge.commit();
    Ok(())
}

/// Re-announce every bound button on a page and rewire its trampoline
/// command. Used at plugin connect time and after a page switch.
pub fn replay(bridge: &Bridge, page: u16) -> Result<(), anyhow::Error> {
    for (index, binding) in bridge.bindings.bound_on_page(page) {
        rewire_command(bridge, &binding.action, index, page)?;
        bridge
            .outbound
            .push(appear_message(bridge, &binding, index, page, "willAppear")?);
    }
    Ok(())
}

/// Retract the old page's buttons and announce the new one's.
pub fn page_changed(bridge: &Bridge, old_page: u16, new_page: u16) -> Result<(), anyhow::Error> {
    for (index, binding) in bridge.bindings.bound_on_page(old_page) {
        bridge
            .outbound
            .push(appear_message(bridge, &binding, index, old_page, "willDisappear")?);
        bridge.reset_button(old_page, index, "");
    }
    replay(bridge, new_page)
}

/// Visually reset every bound button to the placeholder icon, keeping the
/// bindings themselves intact. Runs when the disconnect grace period expires.
pub fn disconnect(bridge: &Bridge) {
    let placeholder = bridge.placeholder_icon.to_string_lossy().into_owned();
    for (page, index, _) in bridge.bindings.bound_buttons() {
        bridge.reset_button(page, index, &placeholder);
    }
    bridge.refresh_ui();
}
