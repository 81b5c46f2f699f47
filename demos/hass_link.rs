use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use streamdeck_hass_link::{config, ButtonRef, ButtonSettings, DeckHost, HomeAssistant};

/// Host stub that prints what the core asks for instead of painting keys.
struct StdoutHost;

#[async_trait]
impl DeckHost for StdoutHost {
    async fn set_button_icon(&self, button: &ButtonRef, svg: &str) {
        println!("[{button}] icon ({} bytes of svg)", svg.len());
    }

    async fn set_button_text(&self, button: &ButtonRef, text: &str) {
        println!("[{button}] text {text:?}");
    }

    async fn request_redraw(&self) {
        println!("redraw requested");
    }

    async fn button_settings(
        &self,
        _button: &ButtonRef,
        _plugin_name: &str,
    ) -> Option<ButtonSettings> {
        None
    }

    async fn buttons(&self) -> Vec<ButtonRef> {
        Vec::new()
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let settings_path = args.next().unwrap_or_else(|| "hass.yaml".to_string());
    let settings = config::load_settings(settings_path)?;

    let link = HomeAssistant::new(Arc::new(StdoutHost));
    link.initialize(settings);

    if !link.is_connected() {
        return Err("could not connect to Home Assistant".into());
    }

    for domain in link.get_domains() {
        println!("{domain}: {} entities", link.get_entities(&domain).len());
    }

    // With an entity id on the command line, watch it until interrupted.
    if let Some(entity_id) = args.next() {
        link.track(&entity_id, ButtonRef::new("demo", 0, 0));
        println!("tracking {entity_id}; interrupt to quit");
        loop {
            std::thread::sleep(Duration::from_secs(60));
        }
    }

    Ok(())
}
