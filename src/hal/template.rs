use axum::http::Method;
use serde::{Deserialize, Serialize};

use super::HAL_JSON;

/// A HAL-FORMS template: one state-changing affordance the caller may use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub properties: Vec<Property>,
}

impl Template {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            title: None,
            method: method.as_str().to_string(),
            target: Some(target.into()),
            content_type: Some(HAL_JSON.to_string()),
            properties: Vec::new(),
        }
    }

    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    /// The declared method, `GET` when the template omits or garbles it.
    pub fn http_method(&self) -> Method {
        Method::from_bytes(self.method.to_ascii_uppercase().as_bytes()).unwrap_or(Method::GET)
    }
}

/// One input of a [`Template`] and the constraints a client checks before submitting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<PropertyOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Property {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn min_length(mut self, min: usize) -> Self {
        self.min_length = Some(min);
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    pub fn range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn regex(mut self, pattern: impl Into<String>) -> Self {
        self.regex = Some(pattern.into());
        self
    }

    pub fn one_of<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = Some(PropertyOptions {
            inline: values
                .into_iter()
                .map(|v| OptionItem::Value(v.into()))
                .collect(),
        });
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyOptions {
    #[serde(default)]
    pub inline: Vec<OptionItem>,
}

/// An inline option: either a bare value or a prompt/value pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionItem {
    Value(String),
    Pair { prompt: String, value: String },
}

impl OptionItem {
    pub fn value(&self) -> &str {
        match self {
            OptionItem::Value(v) => v,
            OptionItem::Pair { value, .. } => value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_serializes_hal_forms_names() {
        let template = Template::new(Method::POST, "/users/1/api-keys")
            .titled("Create API key")
            .property(Property::new("label").required().max_length(255));

        let json: serde_json::Value =
            serde_json::from_str(&sonic_rs::to_string(&template).unwrap()).unwrap();

        assert_eq!(json["contentType"], HAL_JSON);
        assert_eq!(json["properties"][0]["name"], "label");
        assert_eq!(json["properties"][0]["required"], true);
        assert_eq!(json["properties"][0]["maxLength"], 255);
        assert!(json["properties"][0].get("readOnly").is_none());
    }

    #[test]
    fn test_http_method_falls_back_to_get() {
        let mut template = Template::new(Method::DELETE, "/x");
        assert_eq!(template.http_method(), Method::DELETE);

        template.method = "delete".to_string();
        assert_eq!(template.http_method(), Method::DELETE);

        template.method = "not a method".to_string();
        assert_eq!(template.http_method(), Method::GET);
    }

    #[test]
    fn test_inline_options_accept_pairs() {
        let options: PropertyOptions = sonic_rs::from_str(
            r#"{"inline":["base",{"prompt":"Administrator","value":"admin"}]}"#,
        )
        .unwrap();

        let values: Vec<&str> = options.inline.iter().map(OptionItem::value).collect();
        assert_eq!(values, vec!["base", "admin"]);
    }
}
