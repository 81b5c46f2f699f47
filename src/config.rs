//! Configuration types for the Home Assistant link.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Websocket API path on the hub.
const API_PATH: &str = "/api/websocket?latest";

/// Connection settings for a Home Assistant instance.
///
/// Usually supplied by the host's settings form; can also be loaded from a
/// YAML file with [`load_settings`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub struct HassSettings {
    /// Hostname or address, with an optional scheme prefix that is stripped
    /// (e.g. "homeassistant.local" or "https://homeassistant.local").
    pub url: String,
    /// Websocket API port (8123 on a default install).
    pub port: u16,
    /// Long-lived access token.
    pub token: String,
    /// Connect with TLS (`wss://`) instead of plain `ws://`.
    #[serde(default = "default_ssl")]
    pub ssl: bool,
}

fn default_ssl() -> bool {
    true
}

impl HassSettings {
    /// The configured host with any `scheme://` prefix stripped.
    pub fn host(&self) -> &str {
        match self.url.split_once("//") {
            Some((_, rest)) => rest,
            None => &self.url,
        }
    }

    /// Full websocket endpoint URL for both channels.
    pub fn websocket_url(&self) -> Result<String, Error> {
        if self.host().is_empty() || self.token.is_empty() {
            return Err(Error::Settings(
                "url and token must both be set".to_string(),
            ));
        }
        let scheme = if self.ssl { "wss" } else { "ws" };
        Ok(format!(
            "{scheme}://{}:{}{API_PATH}",
            self.host(),
            self.port
        ))
    }
}

/// Per-button settings stored by the host under this plugin's name.
///
/// Empty strings mean "not configured"; the settings form writes all three
/// fields, older configurations may miss some.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ButtonSettings {
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub entity: String,
    #[serde(default)]
    pub service: String,
}

impl ButtonSettings {
    /// True when the button is bound to an entity.
    pub fn is_bound(&self) -> bool {
        !self.domain.is_empty() && !self.entity.is_empty()
    }
}

/// Loads connection settings from a YAML file.
///
/// # Example
///
/// ```no_run
/// use streamdeck_hass_link::config;
///
/// let settings = config::load_settings("hass.yaml").expect("Failed to load settings");
/// println!("Connecting to: {}", settings.host());
/// ```
pub fn load_settings<S: Into<String>>(arg: S) -> Result<HassSettings, Box<dyn std::error::Error>> {
    let file = std::fs::File::open(arg.into())?;
    let reader = std::io::BufReader::new(file);
    let settings: HassSettings = serde_yaml::from_reader(reader)?;
    Ok(settings)
}
