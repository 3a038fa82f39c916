//! Request bodies: JSON, multipart form or raw text.
//!
//! Besides conversion to a `reqwest` request this module owns the two body
//! operations the dispatcher relies on: the stable signature used as part of
//! the coalescing key, and injection of the session identity.

use reqwest::multipart::{Form, Part};
use serde_json::{Map, Value};

pub const IDENTITY_FIELD: &str = "users_uuid";

/// Field a raw text body is moved into when it has to become a form.
const RAW_TEXT_FIELD: &str = "data";

#[derive(Debug, Clone, PartialEq)]
pub struct FilePart {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    Text(String),
    File(FilePart),
}

/// Multipart form payload. Field order is kept for the wire but does not
/// affect the signature.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormBody {
    fields: Vec<(String, FormValue)>,
}

impl FormBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields
            .push((name.into(), FormValue::Text(value.into())));
        self
    }

    pub fn file(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        self.fields.push((
            name.into(),
            FormValue::File(FilePart {
                file_name: file_name.into(),
                content_type: content_type.into(),
                bytes,
            }),
        ));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|(n, _)| n == name)
    }

    pub fn fields(&self) -> &[(String, FormValue)] {
        &self.fields
    }

    /// Sorted `[name, value]` pairs as a JSON array, so no field value can
    /// forge a separator.
    fn signature(&self) -> String {
        let mut pairs: Vec<(String, String)> = self
            .fields
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    FormValue::Text(text) => Value::String(text.clone()),
                    // Identical re-uploads coalesce without hashing contents.
                    FormValue::File(file) => serde_json::json!({
                        "file": file.content_type,
                        "size": file.bytes.len(),
                    }),
                };
                (Value::String(name.clone()).to_string(), value.to_string())
            })
            .collect();
        pairs.sort();
        let pairs: Vec<String> = pairs
            .into_iter()
            .map(|(name, value)| format!("[{name},{value}]"))
            .collect();
        format!("[{}]", pairs.join(","))
    }

    pub(crate) fn into_multipart(self) -> Result<Form, reqwest::Error> {
        let mut form = Form::new();
        for (name, value) in self.fields {
            form = match value {
                FormValue::Text(text) => form.text(name, text),
                FormValue::File(file) => {
                    let part = Part::bytes(file.bytes)
                        .file_name(file.file_name)
                        .mime_str(&file.content_type)?;
                    form.part(name, part)
                }
            };
        }
        Ok(form)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Form(FormBody),
    Text(String),
}

impl From<Value> for RequestBody {
    fn from(value: Value) -> Self {
        RequestBody::Json(value)
    }
}

impl From<FormBody> for RequestBody {
    fn from(form: FormBody) -> Self {
        RequestBody::Form(form)
    }
}

impl RequestBody {
    pub fn is_empty(&self) -> bool {
        matches!(self, RequestBody::Empty)
    }

    /// Stable serialization used in the coalescing key: form fields sorted,
    /// JSON with sorted keys, raw text as-is.
    /// Prefixed by body kind so a text body never matches a form or JSON
    /// body with the same rendering.
    pub fn signature(&self) -> String {
        match self {
            RequestBody::Empty => String::new(),
            RequestBody::Json(value) => format!("json:{}", canonical_json(value)),
            RequestBody::Form(form) => format!("form:{}", form.signature()),
            RequestBody::Text(text) => format!("text:{text}"),
        }
    }

    /// Attach the session identity.
    ///
    /// - no body: a JSON body carrying only the identity
    /// - JSON object: key merged in unless already present
    /// - form: field appended unless already present
    /// - text holding a JSON object: parsed and merged
    /// - any other text or JSON: upgraded to a form with the original under
    ///   `data`
    pub fn with_identity(self, users_uuid: &str) -> RequestBody {
        match self {
            RequestBody::Empty => {
                let mut map = Map::new();
                map.insert(IDENTITY_FIELD.into(), Value::String(users_uuid.into()));
                RequestBody::Json(Value::Object(map))
            }
            RequestBody::Json(Value::Object(mut map)) => {
                map.entry(IDENTITY_FIELD)
                    .or_insert_with(|| Value::String(users_uuid.into()));
                RequestBody::Json(Value::Object(map))
            }
            RequestBody::Json(other) => RequestBody::Form(
                FormBody::new()
                    .text(RAW_TEXT_FIELD, other.to_string())
                    .text(IDENTITY_FIELD, users_uuid),
            ),
            RequestBody::Form(form) => {
                if form.contains(IDENTITY_FIELD) {
                    RequestBody::Form(form)
                } else {
                    RequestBody::Form(form.text(IDENTITY_FIELD, users_uuid))
                }
            }
            RequestBody::Text(text) => match serde_json::from_str::<Value>(&text) {
                Ok(value @ Value::Object(_)) => RequestBody::Json(value).with_identity(users_uuid),
                _ => RequestBody::Form(
                    FormBody::new()
                        .text(RAW_TEXT_FIELD, text)
                        .text(IDENTITY_FIELD, users_uuid),
                ),
            },
        }
    }

    /// JSON view of the body for request logs. Files are described, not
    /// dumped.
    pub fn summary(&self) -> Value {
        match self {
            RequestBody::Empty => Value::Null,
            RequestBody::Json(value) => value.clone(),
            RequestBody::Text(text) => Value::String(text.clone()),
            RequestBody::Form(form) => {
                let mut map = Map::new();
                for (name, value) in form.fields() {
                    let value = match value {
                        FormValue::Text(text) => Value::String(text.clone()),
                        FormValue::File(file) => Value::String(format!(
                            "[file {} {} bytes]",
                            file.file_name,
                            file.bytes.len()
                        )),
                    };
                    map.insert(name.clone(), value);
                }
                Value::Object(map)
            }
        }
    }
}

/// JSON serialization with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|key| {
                    format!(
                        "{}:{}",
                        Value::String(key.clone()),
                        canonical_json(&map[key])
                    )
                })
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}
