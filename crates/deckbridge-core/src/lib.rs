//! deckbridge backend core.
//!
//! This crate contains everything between the two I/O edges of the bridge: the
//! named-pipe listener fed by the device layer's trampoline script, and the
//! loopback WebSocket server the remote plugin connects to. The desktop UI and
//! the device-management library sit behind the seams in [`ui`] and [`deck`].

pub mod bridge;
pub mod deck;
pub mod events;
pub mod geometry;
pub mod image_cache;
#[cfg(unix)]
pub mod pipe;
pub mod server;
pub mod shared;
pub mod store;
pub mod ui;
