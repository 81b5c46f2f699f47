//! Boundary to the host application that owns the physical buttons.

use async_trait::async_trait;

use crate::button::ButtonRef;
use crate::config::ButtonSettings;

/// Name under which the host stores this plugin's per-button settings.
pub const PLUGIN_NAME: &str = "home-assistant";

/// The surface this core needs from its host: push rendered output to a
/// button, trigger a redraw, and read back per-button configuration.
///
/// Setting an icon or text does not repaint anything by itself; the host
/// repaints on [`request_redraw`](Self::request_redraw).
#[async_trait]
pub trait DeckHost: Send + Sync {
    /// Replace a button's icon with SVG markup. An empty string clears it.
    async fn set_button_icon(&self, button: &ButtonRef, svg: &str);

    /// Replace a button's text label. An empty string clears it.
    async fn set_button_text(&self, button: &ButtonRef, text: &str);

    /// Ask the host to repaint dirty buttons.
    async fn request_redraw(&self);

    /// Settings the host stores for one button under `plugin_name`, or
    /// `None` when the button carries none.
    async fn button_settings(&self, button: &ButtonRef, plugin_name: &str)
        -> Option<ButtonSettings>;

    /// Snapshot of every configured button, for bulk re-initialization.
    async fn buttons(&self) -> Vec<ButtonRef>;
}
