//! Consumer tokens identifying a single physical button.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Separator used in the encoded token form.
const SEPARATOR: char = '-';

/// Address of one physical button: controller serial, page, button index.
///
/// Encodes to `<controller>-<page>-<button>` for use as an opaque consumer
/// token. Decoding anchors on the two trailing numeric fields, so a
/// controller id that itself contains the separator still round-trips.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ButtonRef {
    pub controller: String,
    pub page: u32,
    pub button: u32,
}

impl ButtonRef {
    pub fn new(controller: impl Into<String>, page: u32, button: u32) -> Self {
        Self {
            controller: controller.into(),
            page,
            button,
        }
    }

    /// Encode into the opaque token form.
    pub fn encode(&self) -> String {
        format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            self.controller, self.page, self.button
        )
    }

    /// Decode a token produced by [`encode`](Self::encode).
    ///
    /// Rejects tokens without two trailing numeric fields or with an empty
    /// controller id.
    pub fn decode(token: &str) -> Result<Self, Error> {
        let mut parts = token.rsplitn(3, SEPARATOR);
        let button = parts.next().and_then(|p| p.parse().ok());
        let page = parts.next().and_then(|p| p.parse().ok());
        let controller = parts.next().filter(|c| !c.is_empty());

        match (controller, page, button) {
            (Some(controller), Some(page), Some(button)) => Ok(Self {
                controller: controller.to_string(),
                page,
                button,
            }),
            _ => Err(Error::Token(token.to_string())),
        }
    }
}

impl fmt::Display for ButtonRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let button = ButtonRef::new("AL123XYZ", 2, 7);
        assert_eq!(ButtonRef::decode(&button.encode()).unwrap(), button);
    }

    #[test]
    fn round_trip_with_separator_in_controller_id() {
        let button = ButtonRef::new("deck-mk2-01", 0, 14);
        assert_eq!(button.encode(), "deck-mk2-01-0-14");
        assert_eq!(ButtonRef::decode(&button.encode()).unwrap(), button);
    }

    #[test]
    fn decode_rejects_malformed_tokens() {
        for token in ["", "justdeck", "deck-1", "deck-a-b", "-1-2", "deck-1-"] {
            assert!(ButtonRef::decode(token).is_err(), "accepted {token:?}");
        }
    }

    #[test]
    fn distinct_buttons_encode_distinctly() {
        let a = ButtonRef::new("deck", 1, 2).encode();
        let b = ButtonRef::new("deck", 2, 1).encode();
        let c = ButtonRef::new("deck-1", 2, 2).encode();
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }
}
