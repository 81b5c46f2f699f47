//! Pushes a resolved entity state onto a host button.

use tracing::trace;

use crate::button::ButtonRef;
use crate::host::DeckHost;
use crate::icons::{should_render_as_icon, IconResolver};
use crate::protocol::EntityState;

/// Render one entity state onto one button.
///
/// Exactly one of {icon, text} ends up set; the other slot is cleared so a
/// button flipping between icon and text never shows both.
pub(crate) async fn render_button(
    host: &dyn DeckHost,
    resolver: &IconResolver,
    button: &ButtonRef,
    service: &str,
    state: &EntityState,
    icon_hint: &str,
) {
    if should_render_as_icon(&state.state, state.domain()) {
        let svg = resolver.resolve(&state.entity_id, service, &state.state, icon_hint);
        host.set_button_icon(button, &svg).await;
        host.set_button_text(button, "").await;
    } else {
        let text = match state.attributes.unit_of_measurement.as_deref() {
            Some(unit) if !unit.is_empty() => format!("{}\n{unit}", state.state),
            _ => state.state.clone(),
        };
        host.set_button_icon(button, "").await;
        host.set_button_text(button, &text).await;
    }
    trace!(button = %button, entity = %state.entity_id, "rendered");
}

/// Clear both slots of a button that is no longer bound to an entity.
pub(crate) async fn clear_button(host: &dyn DeckHost, button: &ButtonRef) {
    host.set_button_icon(button, "").await;
    host.set_button_text(button, "").await;
}
