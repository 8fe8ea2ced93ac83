use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};

/// Last-known state of one hub entity.
///
/// Rows are replaced wholesale on every update; there is no merging of
/// attributes between versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub last_changed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl EntityState {
    /// The part of the entity id before the first dot.
    pub fn domain(&self) -> &str {
        domain_of(&self.entity_id)
    }

    pub fn category(&self) -> EntityCategory {
        EntityCategory::from_entity_id(&self.entity_id)
    }

    /// `friendly_name` attribute, falling back to the entity id.
    pub fn friendly_name(&self) -> &str {
        self.attributes
            .get("friendly_name")
            .and_then(Value::as_str)
            .unwrap_or(&self.entity_id)
    }

    /// Numeric attribute, accepting both JSON numbers and numeric strings.
    pub fn attribute_f64(&self, key: &str) -> Option<f64> {
        match self.attributes.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn is_on(&self) -> bool {
        matches!(self.state.as_str(), "on" | "open" | "playing" | "home")
    }
}

pub(crate) fn domain_of(entity_id: &str) -> &str {
    entity_id
        .split_once('.')
        .map_or(entity_id, |(domain, _)| domain)
}

/// Entity domains with special toggle behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum EntityCategory {
    Script,
    InputBoolean,
    Cover,
    #[strum(disabled)]
    Other,
}

impl EntityCategory {
    pub fn from_entity_id(entity_id: &str) -> Self {
        domain_of(entity_id).parse().unwrap_or(Self::Other)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(id: &str, attributes: Value) -> EntityState {
        EntityState {
            entity_id: id.into(),
            state: "on".into(),
            attributes: attributes.as_object().cloned().unwrap_or_default(),
            last_changed: None,
            last_updated: None,
        }
    }

    #[test]
    fn domain_and_category() {
        assert_eq!(entity("light.kitchen", json!({})).domain(), "light");
        assert_eq!(
            EntityCategory::from_entity_id("input_boolean.guest_mode"),
            EntityCategory::InputBoolean
        );
        assert_eq!(EntityCategory::from_entity_id("script.goodnight"), EntityCategory::Script);
        assert_eq!(EntityCategory::from_entity_id("cover.blinds"), EntityCategory::Cover);
        assert_eq!(EntityCategory::from_entity_id("switch.fan"), EntityCategory::Other);
        assert_eq!(EntityCategory::from_entity_id("other.thing"), EntityCategory::Other);
        assert_eq!(EntityCategory::from_entity_id("nodot"), EntityCategory::Other);
    }

    #[test]
    fn friendly_name_falls_back_to_id() {
        assert_eq!(
            entity("light.kitchen", json!({ "friendly_name": "Kitchen" })).friendly_name(),
            "Kitchen"
        );
        assert_eq!(entity("light.kitchen", json!({})).friendly_name(), "light.kitchen");
    }

    #[test]
    fn numeric_attributes() {
        let e = entity(
            "cover.blinds",
            json!({ "current_tilt_position": 40, "temp": "21.5", "name": "x" }),
        );
        assert_eq!(e.attribute_f64("current_tilt_position"), Some(40.0));
        assert_eq!(e.attribute_f64("temp"), Some(21.5));
        assert_eq!(e.attribute_f64("name"), None);
        assert_eq!(e.attribute_f64("missing"), None);
    }
}
