//! Feedback delivery: multipart form construction and the HTTP transport

use base64::Engine as _;
use futures::future::BoxFuture;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::SubmitError,
    state::{FeedbackPayload, MANUAL_SOURCE, TIMEOUT_SOURCE},
};

pub const SUBMIT_PATH: &str = "/submit_feedback";
pub const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

/// Response body of `POST /submit_feedback`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SubmitResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionKind {
    Timeout,
    Manual,
}

impl SubmissionKind {
    pub fn for_source(source: &str) -> Self {
        if source == MANUAL_SOURCE {
            SubmissionKind::Manual
        } else {
            SubmissionKind::Timeout
        }
    }
}

/// An image decoded into a binary attachment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Multipart request contents, built once and replayed on every attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionForm {
    pub fields: Vec<(String, String)>,
    pub images: Vec<FilePart>,
    pub csrf_token: Option<String>,
}

impl SubmissionForm {
    pub fn from_payload(
        payload: &FeedbackPayload,
        csrf_token: Option<&str>,
    ) -> Result<Self, SubmitError> {
        let kind = SubmissionKind::for_source(&payload.source);
        let (is_timeout, source_event) = match kind {
            SubmissionKind::Timeout => ("true", TIMEOUT_SOURCE),
            SubmissionKind::Manual => ("false", MANUAL_SOURCE),
        };

        let mut fields = vec![
            ("is_timeout_capture".to_string(), is_timeout.to_string()),
            ("source_event".to_string(), source_event.to_string()),
        ];
        let csrf_token = csrf_token.filter(|t| !t.is_empty()).map(str::to_string);
        if let Some(token) = &csrf_token {
            fields.push(("csrf_token".to_string(), token.clone()));
        }
        if !payload.text.is_empty() {
            fields.push(("textFeedback".to_string(), payload.text.clone()));
        }
        fields.push(("timestamp".to_string(), payload.timestamp.clone()));

        let images = payload
            .images
            .iter()
            .enumerate()
            .map(|(index, image)| {
                let (mime_type, bytes) = decode_data_url(&image.data).map_err(|reason| {
                    SubmitError::InvalidImage {
                        name: image.name.clone().unwrap_or_else(|| format!("#{}", index)),
                        reason,
                    }
                })?;
                let file_name = image.name.clone().unwrap_or_else(|| {
                    format!("timeout_capture_{}{}", index, extension_for(&mime_type))
                });
                Ok(FilePart {
                    file_name,
                    mime_type,
                    bytes,
                })
            })
            .collect::<Result<Vec<_>, SubmitError>>()?;

        Ok(Self {
            fields,
            images,
            csrf_token,
        })
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Fresh reqwest form; reqwest consumes forms, so one is built per attempt
    pub fn to_multipart(&self) -> Result<Form, SubmitError> {
        let mut form = Form::new();
        for (name, value) in &self.fields {
            form = form.text(name.clone(), value.clone());
        }
        for image in &self.images {
            let part = Part::bytes(image.bytes.clone())
                .file_name(image.file_name.clone())
                .mime_str(&image.mime_type)
                .map_err(|e| SubmitError::InvalidImage {
                    name: image.file_name.clone(),
                    reason: e.to_string(),
                })?;
            form = form.part("images", part);
        }
        Ok(form)
    }
}

/// Split a `data:<mime>;base64,<payload>` URL into MIME type and bytes
pub fn decode_data_url(data: &str) -> Result<(String, Vec<u8>), String> {
    let (header, encoded) = data
        .split_once(',')
        .ok_or_else(|| "missing data URL separator".to_string())?;
    let mime_type = header
        .strip_prefix("data:")
        .and_then(|rest| rest.strip_suffix(";base64"))
        .filter(|mime| !mime.is_empty() && !mime.contains(';'))
        .unwrap_or(DEFAULT_IMAGE_MIME)
        .to_string();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| format!("invalid base64: {}", e))?;
    Ok((mime_type, bytes))
}

pub fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => ".png",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        _ => ".jpg",
    }
}

/// Delivery channel for feedback submissions
pub trait Transport: Send + Sync {
    /// Perform one submission attempt
    fn submit<'a>(
        &'a self,
        form: &'a SubmissionForm,
    ) -> BoxFuture<'a, Result<SubmitResponse, SubmitError>>;

    /// Tell the receiver the session was closed
    fn session_closed(&self) -> BoxFuture<'_, Result<(), SubmitError>>;
}

/// Posts to `<base_url>/submit_feedback`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Result<Self, SubmitError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            url: format!("{}{}", base_url.trim_end_matches('/'), SUBMIT_PATH),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Transport for HttpTransport {
    fn submit<'a>(
        &'a self,
        form: &'a SubmissionForm,
    ) -> BoxFuture<'a, Result<SubmitResponse, SubmitError>> {
        Box::pin(async move {
            debug!(
                "POST {} ({} fields, {} images)",
                self.url,
                form.fields.len(),
                form.images.len()
            );
            let response = self
                .client
                .post(&self.url)
                .header("X-CSRFToken", form.csrf_token.as_deref().unwrap_or(""))
                .multipart(form.to_multipart()?)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                return Err(SubmitError::Http {
                    status: status.as_u16(),
                });
            }
            response
                .json::<SubmitResponse>()
                .await
                .map_err(|e| SubmitError::Decode(e.to_string()))
        })
    }

    fn session_closed(&self) -> BoxFuture<'_, Result<(), SubmitError>> {
        Box::pin(async move {
            self.client
                .post(&self.url)
                .json(&serde_json::json!({ "status": "session_closed" }))
                .send()
                .await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ImageAttachment;

    fn payload(text: &str, images: Vec<ImageAttachment>) -> FeedbackPayload {
        FeedbackPayload {
            text: text.to_string(),
            images,
            timestamp: "2024-03-01T10:00:00.000Z".to_string(),
            source: TIMEOUT_SOURCE.to_string(),
        }
    }

    #[test]
    fn form_carries_marker_fields_in_order() {
        let form = SubmissionForm::from_payload(&payload("hi", vec![]), Some("tok")).unwrap();
        let names: Vec<&str> = form.fields.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            names,
            ["is_timeout_capture", "source_event", "csrf_token", "textFeedback", "timestamp"]
        );
        assert_eq!(form.field("is_timeout_capture"), Some("true"));
        assert_eq!(form.field("source_event"), Some("frontend_timeout"));
    }

    #[test]
    fn empty_text_and_token_are_omitted() {
        let form = SubmissionForm::from_payload(&payload("", vec![]), Some("")).unwrap();
        assert!(form.field("textFeedback").is_none());
        assert!(form.field("csrf_token").is_none());
        assert!(form.csrf_token.is_none());
    }

    #[test]
    fn images_get_generated_names_from_mime() {
        let images = vec![
            ImageAttachment {
                name: None,
                data: "data:image/png;base64,aGVsbG8=".into(),
            },
            ImageAttachment {
                name: None,
                data: "data:image/bmp;base64,aGVsbG8=".into(),
            },
            ImageAttachment {
                name: Some("kept.webp".into()),
                data: "data:image/webp;base64,aGVsbG8=".into(),
            },
        ];
        let form = SubmissionForm::from_payload(&payload("", images), None).unwrap();
        let names: Vec<&str> = form.images.iter().map(|i| i.file_name.as_str()).collect();
        assert_eq!(names, ["timeout_capture_0.png", "timeout_capture_1.jpg", "kept.webp"]);
        assert_eq!(form.images[0].bytes, b"hello");
        assert_eq!(form.images[1].mime_type, "image/bmp");
    }

    #[test]
    fn data_url_without_mime_defaults_to_jpeg() {
        let (mime, bytes) = decode_data_url("data:;base64,aGk=").unwrap();
        assert_eq!(mime, DEFAULT_IMAGE_MIME);
        assert_eq!(bytes, b"hi");
        assert!(decode_data_url("no separator").is_err());
        assert!(decode_data_url("data:image/png;base64,@@@").is_err());
    }

    #[test]
    fn manual_payload_is_not_marked_as_timeout() {
        let mut manual = payload("done", vec![]);
        manual.source = MANUAL_SOURCE.to_string();
        let form = SubmissionForm::from_payload(&manual, None).unwrap();
        assert_eq!(form.field("is_timeout_capture"), Some("false"));
        assert_eq!(form.field("source_event"), Some("manual_submit"));
    }

    #[test]
    fn submit_url_is_joined_once() {
        let transport = HttpTransport::new("http://localhost:5000/").unwrap();
        assert_eq!(transport.url(), "http://localhost:5000/submit_feedback");
    }
}
