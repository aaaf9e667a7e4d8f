/// Wire types: the `model` field of inbound requests, and the backend's deployment and model
/// listings that the `/v1/models` endpoint is assembled from.
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Requests to model-bound endpoints are routed to a deployment named after the `model`
/// field in the JSON body.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ExtractedModel<'a> {
    #[serde(borrow)]
    pub(crate) model: Cow<'a, str>,
}

/// Pull the `model` form field out of a buffered `multipart/form-data` body.
pub(crate) fn model_from_multipart(content_type: &str, body: &[u8]) -> Option<String> {
    let boundary = content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        key.eq_ignore_ascii_case("boundary")
            .then(|| value.trim_matches('"').to_owned())
    })?;
    let delimiter = format!("--{boundary}");
    let body = String::from_utf8_lossy(body);

    body.split(delimiter.as_str()).find_map(|part| {
        let (headers, value) = part.split_once("\r\n\r\n")?;
        let is_model_field = headers.lines().any(is_model_disposition);
        let value = value.trim_end_matches("\r\n").trim();
        (is_model_field && !value.is_empty()).then(|| value.to_owned())
    })
}

/// Whether a part header line is `Content-Disposition: form-data; name="model"`.
fn is_model_disposition(line: &str) -> bool {
    let Some((header, value)) = line.split_once(':') else {
        return false;
    };
    header.trim().eq_ignore_ascii_case("content-disposition")
        && value.split(';').skip(1).any(|param| {
            param.split_once('=').is_some_and(|(key, value)| {
                key.trim().eq_ignore_ascii_case("name") && value.trim().trim_matches('"') == "model"
            })
        })
}

/// One entry of the backend's deployment listing. Only the served model matters here.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Deployment {
    #[serde(default)]
    pub id: Option<String>,
    pub model: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Capabilities {
    #[serde(default)]
    pub fine_tune: bool,
    #[serde(default)]
    pub inference: bool,
    #[serde(default)]
    pub completion: bool,
    #[serde(default)]
    pub chat_completion: bool,
    #[serde(default)]
    pub embeddings: bool,
}

/// Unix timestamps after which a capability is withdrawn.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Deprecation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fine_tune: Option<i64>,
    #[serde(default)]
    pub inference: Option<i64>,
}

/// A model as described by the backend's model listing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Model {
    pub id: String,
    #[serde(default = "default_model_object")]
    pub object: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub lifecycle_status: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub deprecation: Deprecation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fine_tune: Option<String>,
}

fn default_model_object() -> String {
    "model".into()
}

/// The response from the /v1/models endpoint, which is a list of models.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ModelList {
    /// The object type, which is always "list".
    pub object: String,
    pub data: Vec<Model>,
}

impl ModelList {
    pub fn new(data: Vec<Model>) -> Self {
        ModelList {
            object: "list".into(),
            data,
        }
    }
}

/// Envelope shared by both backend listings. Entries stay as raw JSON so that one
/// malformed entry can be skipped without losing the rest.
#[derive(Deserialize, Debug)]
pub(crate) struct Listing {
    #[serde(default)]
    pub(crate) data: Vec<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_model_from_multipart() {
        let body = concat!(
            "--abc123\r\n",
            "Content-Disposition: form-data; name=\"file\"; filename=\"a.wav\"\r\n",
            "Content-Type: audio/wav\r\n\r\n",
            "RIFF....\r\n",
            "--abc123\r\n",
            "Content-Disposition: form-data; name=\"model\"\r\n\r\n",
            "whisper-1\r\n",
            "--abc123--\r\n"
        );
        assert_eq!(
            model_from_multipart("multipart/form-data; boundary=abc123", body.as_bytes()),
            Some("whisper-1".to_string())
        );
        assert_eq!(
            model_from_multipart("multipart/form-data; boundary=\"abc123\"", body.as_bytes()),
            Some("whisper-1".to_string())
        );
    }

    #[test]
    fn test_file_named_model_is_not_the_model_field() {
        let body = concat!(
            "--b\r\n",
            "Content-Disposition: form-data; name=\"file\"; filename=\"model\"\r\n",
            "Content-Type: audio/wav\r\n\r\n",
            "AUDIOBYTES\r\n",
            "--b\r\n",
            "content-disposition: form-data; name=model\r\n\r\n",
            "whisper-1\r\n",
            "--b--\r\n"
        );
        assert_eq!(
            model_from_multipart("multipart/form-data; boundary=b", body.as_bytes()),
            Some("whisper-1".to_string())
        );
    }

    #[test]
    fn test_escaped_model_name_is_decoded() {
        let extracted: ExtractedModel =
            serde_json::from_slice(br#"{"model": "gpt\u002d4", "messages": []}"#).unwrap();
        assert_eq!(extracted.model, "gpt-4");

        let extracted: ExtractedModel = serde_json::from_slice(br#"{"model": "gpt-4o"}"#).unwrap();
        assert!(matches!(extracted.model, Cow::Borrowed("gpt-4o")));
    }

    #[test]
    fn test_model_from_multipart_without_model_field() {
        let body = concat!(
            "--b\r\n",
            "Content-Disposition: form-data; name=\"language\"\r\n\r\n",
            "en\r\n",
            "--b--\r\n"
        );
        assert_eq!(
            model_from_multipart("multipart/form-data; boundary=b", body.as_bytes()),
            None
        );
        assert_eq!(model_from_multipart("multipart/form-data", body.as_bytes()), None);
    }

    #[test]
    fn test_model_defaults_for_sparse_entries() {
        let model: Model = serde_json::from_value(json!({"id": "gpt-4"})).unwrap();
        assert_eq!(model.object, "model");
        assert_eq!(model.capabilities, Capabilities::default());
        assert_eq!(model.fine_tune, None);

        let rendered = serde_json::to_value(&model).unwrap();
        assert!(rendered.get("fine_tune").is_none());
        assert!(rendered["deprecation"].get("fine_tune").is_none());
    }

    #[test]
    fn test_model_list_shape() {
        let list = ModelList::new(vec![]);
        assert_eq!(
            serde_json::to_value(list).unwrap(),
            json!({"object": "list", "data": []})
        );
    }
}
