//! # Home Assistant link for Stream Deck style control surfaces
//!
//! This library keeps a persistent, authenticated websocket connection to a
//! Home Assistant instance and turns entity state changes into rendered
//! button output (SVG icon or text) for a host application that owns the
//! physical buttons.
//!
//! ## Features
//!
//! - Dual-channel websocket connection (commands + push events) with the
//!   token auth handshake and a real liveness probe
//! - State-change trigger subscriptions, reference-counted per button
//! - Domain / entity / service catalog for settings forms
//! - Entity- and service-driven icon resolution with active/inactive tints
//! - A synchronous facade that host applications can call from any thread;
//!   all I/O runs on one background worker
//!
//! The host side is abstracted behind the [`DeckHost`] trait: set an icon,
//! set a text label, redraw, and read back per-button settings.

pub mod button;
pub mod client;
pub mod config;
pub mod error;
pub mod host;
pub mod icons;
pub mod protocol;

mod catalog;
mod connection;
mod registry;
mod render;

// Re-export main types for convenience
pub use button::ButtonRef;
pub use client::HomeAssistant;
pub use config::{ButtonSettings, HassSettings};
pub use error::Error;
pub use host::{DeckHost, PLUGIN_NAME};
pub use icons::{should_render_as_icon, IconResolver};
pub use protocol::{EntityAttributes, EntityState};
