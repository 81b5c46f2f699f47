//! Icon table and entity/service/state to SVG resolution.

use std::collections::HashMap;

use tracing::warn;

use crate::protocol::domain_of;

/// Bundled icon-name → path-data table.
const MDI_SVG_JSON: &str = include_str!("../assets/mdi-svg.json");

/// Fill color for "active" renders ("on" states and media player buttons).
const COLOR_ACTIVE: &str = "#eeff1b";
/// Fill color for everything else.
const COLOR_INACTIVE: &str = "#bebebe";

/// Glyphs are drawn at two thirds size, offset to stay centered.
const ICON_SCALE: &str = "0.66";
const ICON_TRANSLATE: &str = "4.5, 5";

/// Path used when an icon hint is empty or unknown (lightning bolt).
const FALLBACK_PATH: &str = "M7,2V13H10V22L17,10H13L17,2H7Z";

/// Icon shown for an unrecognized media player service.
const FALLBACK_MEDIA_ICON: &str = "alert-circle";

/// Domain whose icons are selected by service instead of entity state.
const MEDIA_PLAYER: &str = "media_player";

/// Immutable icon-name → SVG-path table, loaded once from the bundled
/// asset.
#[derive(Debug)]
pub struct IconLibrary {
    paths: HashMap<String, String>,
}

impl IconLibrary {
    /// Parses the bundled asset. The asset ships inside the binary, so a
    /// parse failure is a build defect; it degrades to an empty table
    /// (every lookup then falls back) rather than failing the caller.
    pub fn bundled() -> Self {
        let paths = serde_json::from_str(MDI_SVG_JSON).unwrap_or_else(|e| {
            warn!(error = %e, "bundled icon table unreadable, using fallback glyph only");
            HashMap::new()
        });
        Self { paths }
    }

    pub fn path(&self, name: &str) -> Option<&str> {
        self.paths.get(name).map(String::as_str)
    }
}

/// Resolves an entity/service/state triple into tinted SVG markup.
#[derive(Debug)]
pub struct IconResolver {
    library: IconLibrary,
}

impl IconResolver {
    pub fn new(library: IconLibrary) -> Self {
        Self { library }
    }

    pub fn bundled() -> Self {
        Self::new(IconLibrary::bundled())
    }

    /// Resolve to SVG markup.
    ///
    /// Media player buttons pick their icon from the service the button
    /// invokes (one entity commonly backs several buttons with different
    /// actions) and always render active. Every other domain uses the
    /// entity's `icon_hint` (an `mdi:` prefix is stripped) and renders
    /// active only while the state is `"on"`.
    pub fn resolve(&self, entity_id: &str, service: &str, state: &str, icon_hint: &str) -> String {
        if entity_id.is_empty() {
            return String::new();
        }

        let (name, color) = if domain_of(entity_id) == MEDIA_PLAYER {
            (media_player_icon(service, state), COLOR_ACTIVE)
        } else {
            let color = if state == "on" {
                COLOR_ACTIVE
            } else {
                COLOR_INACTIVE
            };
            (icon_hint.strip_prefix("mdi:").unwrap_or(icon_hint), color)
        };

        self.markup(name, color)
    }

    fn markup(&self, name: &str, color: &str) -> String {
        let path = self.library.path(name).unwrap_or(FALLBACK_PATH);
        format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 24 24"><title>{name}</title><path fill="{color}" transform="translate({ICON_TRANSLATE}) scale({ICON_SCALE})" d="{path}" /></svg>"#
        )
    }
}

/// Service-driven icon selection for the media player domain.
fn media_player_icon(service: &str, state: &str) -> &'static str {
    match service {
        "media_play_pause" => {
            if state == "playing" {
                "pause"
            } else {
                "play"
            }
        }
        "media_stop" => "stop",
        "volume_up" => "volume-plus",
        "volume_down" => "volume-minus",
        "media_next_track" => "skip-next",
        "media_previous_track" => "skip-previous",
        _ => {
            warn!(service, "no media player icon for service");
            FALLBACK_MEDIA_ICON
        }
    }
}

/// Whether a button should render an icon rather than a text label.
///
/// Binary-ish states and the media player domain render icons; everything
/// else (sensor readings and the like) renders the raw state as text.
pub fn should_render_as_icon(state: &str, domain: &str) -> bool {
    matches!(state, "on" | "off" | "unavailable") || domain == MEDIA_PLAYER
}

#[cfg(test)]
mod tests {
    use super::*;

    fn title_of(markup: &str) -> &str {
        let start = markup.find("<title>").unwrap() + "<title>".len();
        let end = markup.find("</title>").unwrap();
        &markup[start..end]
    }

    #[test]
    fn bundled_table_loads() {
        let library = IconLibrary::bundled();
        assert!(library.path("play").is_some());
        assert!(library.path("alert-circle").is_some());
        assert!(library.path("definitely-missing").is_none());
    }

    #[test]
    fn resolution_is_deterministic() {
        let resolver = IconResolver::bundled();
        let first = resolver.resolve("light.kitchen", "", "on", "mdi:lightbulb");
        let second = resolver.resolve("light.kitchen", "", "on", "mdi:lightbulb");
        assert_eq!(first, second);
    }

    #[test]
    fn empty_entity_resolves_to_nothing() {
        let resolver = IconResolver::bundled();
        assert_eq!(resolver.resolve("", "turn_on", "on", "mdi:lightbulb"), "");
    }

    #[test]
    fn entity_hint_drives_icon_outside_media_player() {
        let resolver = IconResolver::bundled();
        let markup = resolver.resolve("light.kitchen", "toggle", "on", "mdi:lightbulb");
        assert_eq!(title_of(&markup), "lightbulb");
        assert!(markup.contains(COLOR_ACTIVE));

        let markup = resolver.resolve("light.kitchen", "toggle", "off", "mdi:lightbulb");
        assert!(markup.contains(COLOR_INACTIVE));
    }

    #[test]
    fn empty_or_unknown_hint_falls_back_to_default_glyph() {
        let resolver = IconResolver::bundled();
        for hint in ["", "mdi:not-a-real-icon"] {
            let markup = resolver.resolve("light.kitchen", "", "on", hint);
            assert!(markup.contains(FALLBACK_PATH), "hint {hint:?}");
            assert!(markup.contains(COLOR_ACTIVE), "hint {hint:?}");
        }
    }

    #[test]
    fn media_play_pause_follows_playback_state() {
        let resolver = IconResolver::bundled();
        let playing = resolver.resolve("media_player.kitchen", "media_play_pause", "playing", "");
        assert_eq!(title_of(&playing), "pause");
        assert!(playing.contains(COLOR_ACTIVE));

        let paused = resolver.resolve("media_player.kitchen", "media_play_pause", "paused", "");
        assert_eq!(title_of(&paused), "play");
        assert!(paused.contains(COLOR_ACTIVE));
    }

    #[test]
    fn media_player_service_icon_table() {
        for (service, icon) in [
            ("media_stop", "stop"),
            ("volume_up", "volume-plus"),
            ("volume_down", "volume-minus"),
            ("media_next_track", "skip-next"),
            ("media_previous_track", "skip-previous"),
        ] {
            assert_eq!(media_player_icon(service, "playing"), icon);
        }
    }

    #[test]
    fn unknown_media_player_service_gets_alert_icon() {
        let resolver = IconResolver::bundled();
        let markup = resolver.resolve("media_player.kitchen", "shuffle_set", "playing", "");
        assert_eq!(title_of(&markup), "alert-circle");
    }

    #[test]
    fn icon_vs_text_decision() {
        assert!(should_render_as_icon("on", "light"));
        assert!(should_render_as_icon("off", "switch"));
        assert!(should_render_as_icon("unavailable", "switch"));
        assert!(should_render_as_icon("anything", "media_player"));
        assert!(!should_render_as_icon("72", "sensor"));
        assert!(!should_render_as_icon("idle", "vacuum"));
    }
}
