//! Shared plumbing for the HTTP model clients.

use std::io::Cursor;

use cropscan_core::error::Service;
use image::{ImageFormat, RgbImage};
use reqwest::multipart::{Form, Part};

use crate::error::ModelError;

/// Send a prepared request, classifying transport failures.
pub(crate) async fn send(
    service: Service,
    request: reqwest::RequestBuilder,
) -> Result<reqwest::Response, ModelError> {
    request
        .send()
        .await
        .map_err(|e| ModelError::from_request(service, e))
}

/// Ensure the response has a success status code. Returns the response
/// unchanged on success, or a classified [`ModelError`] carrying the status
/// and body text on failure.
pub(crate) async fn ensure_success(
    service: Service,
    response: reqwest::Response,
) -> Result<reqwest::Response, ModelError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(ModelError::from_status(service, status.as_u16(), &body));
    }
    Ok(response)
}

/// Parse a successful JSON response body into the expected type.
pub(crate) async fn parse_response<T: serde::de::DeserializeOwned>(
    service: Service,
    response: reqwest::Response,
) -> Result<T, ModelError> {
    let response = ensure_success(service, response).await?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ModelError::from_request(service, e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ModelError::rejected(service, format!("malformed response body: {e}")))
}

/// Encode `image` and wrap it as a single-part multipart form.
pub(crate) fn image_form(
    service: Service,
    field: &'static str,
    image: &RgbImage,
    format: ImageFormat,
) -> Result<Form, ModelError> {
    let (file_name, mime) = match format {
        ImageFormat::Jpeg => ("image.jpg", "image/jpeg"),
        _ => ("image.png", "image/png"),
    };

    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, format)
        .map_err(|e| ModelError::rejected(service, format!("failed to encode image: {e}")))?;

    let part = Part::bytes(buf.into_inner())
        .file_name(file_name)
        .mime_str(mime)
        .map_err(|e| ModelError::rejected(service, e.to_string()))?;
    Ok(Form::new().part(field, part))
}
