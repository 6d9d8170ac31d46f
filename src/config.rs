use serde::Deserialize;

use crate::core::Result;

/// Schema registry configuration
///
/// Controls naming conventions applied while model schemas are finalized.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OdmConfig {
    /// Name given to the synthesized identifier field
    pub default_pk_name: String,

    /// Suffix appended to the declaring model name to build the reverse
    /// related name of a many-to-many relation
    pub related_name_suffix: String,

    /// Suffix disambiguating the second side of a self-referencing relation
    pub self_relation_suffix: String,

    /// App label applied when a model does not declare one
    pub default_app_label: Option<String>,

    /// Lower-case model names (`Person` -> `person`)
    pub lowercase_names: bool,
}

impl Default for OdmConfig {
    fn default() -> Self {
        Self {
            default_pk_name: "id".to_string(),
            related_name_suffix: "_set".to_string(),
            self_relation_suffix: "2".to_string(),
            default_app_label: None,
            lowercase_names: true,
        }
    }
}

impl OdmConfig {
    /// Create a configuration with default conventions
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the synthesized primary key name
    pub fn default_pk_name(mut self, name: &str) -> Self {
        self.default_pk_name = name.to_string();
        self
    }

    /// Set the reverse related name suffix
    pub fn related_name_suffix(mut self, suffix: &str) -> Self {
        self.related_name_suffix = suffix.to_string();
        self
    }

    /// Set the self-relation suffix
    pub fn self_relation_suffix(mut self, suffix: &str) -> Self {
        self.self_relation_suffix = suffix.to_string();
        self
    }

    /// Set the default app label
    pub fn default_app_label(mut self, label: &str) -> Self {
        self.default_app_label = Some(label.to_string());
        self
    }

    /// Keep model names exactly as declared
    pub fn preserve_case(mut self) -> Self {
        self.lowercase_names = false;
        self
    }

    /// Parse from a JSON document. Missing keys keep their defaults.
    ///
    /// # Examples
    ///
    /// ```
    /// use lux_odm::OdmConfig;
    ///
    /// let config = OdmConfig::from_json_str(r#"{"default_pk_name": "key"}"#).unwrap();
    /// assert_eq!(config.default_pk_name, "key");
    /// assert_eq!(config.related_name_suffix, "_set");
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Canonical model name for a declared type name
    pub fn model_name(&self, name: &str) -> String {
        if self.lowercase_names {
            name.to_lowercase()
        } else {
            name.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = OdmConfig::new()
            .default_pk_name("key")
            .related_name_suffix("_all")
            .default_app_label("blog")
            .preserve_case();

        assert_eq!(config.default_pk_name, "key");
        assert_eq!(config.related_name_suffix, "_all");
        assert_eq!(config.default_app_label.as_deref(), Some("blog"));
        assert_eq!(config.model_name("Person"), "Person");
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(OdmConfig::from_json_str("not json").is_err());
        let config = OdmConfig::from_json_str("{}").unwrap();
        assert_eq!(config, OdmConfig::default());
        assert_eq!(config.model_name("Person"), "person");
    }
}
