//! HTTP response classification shared by the REST adapters

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::metrics;

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return classify_status(status, &e.to_string());
        }
        if e.is_timeout() || e.is_connect() || e.is_request() {
            Error::transient(e.to_string())
        } else {
            Error::permanent(e.to_string())
        }
    }
}

/// Map an HTTP status onto the error taxonomy
pub(crate) fn classify_status(status: StatusCode, detail: &str) -> Error {
    let message = format!("HTTP {}: {}", status.as_u16(), detail);
    match status {
        StatusCode::NOT_FOUND => Error::not_found(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS | StatusCode::CONFLICT => {
            Error::transient(message)
        }
        s if s.is_server_error() => Error::transient(message),
        _ => Error::permanent(message),
    }
}

/// Pass successful responses through, turn the rest into classified errors
pub(crate) async fn check(response: Response, operation: &'static str) -> Result<Response> {
    let status = response.status();
    let outcome = if status.is_success() { "success" } else { "failure" };
    metrics::BACKEND_CALLS
        .with_label_values(&[operation, outcome])
        .inc();

    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, body.trim()))
}

/// Decode a JSON body; an unexpected shape is a permanent failure
pub(crate) async fn json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::permanent(format!("unexpected response body: {e}")))
}

/// Like [`check`] but a 404 becomes `None`
pub(crate) async fn check_optional(
    response: Response,
    operation: &'static str,
) -> Result<Option<Response>> {
    match check(response, operation).await {
        Ok(resp) => Ok(Some(resp)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;

    #[test]
    fn statuses_map_onto_classes() {
        let class = |code: u16| classify_status(StatusCode::from_u16(code).unwrap(), "x").class();

        assert_eq!(class(404), ErrorClass::NotFound);
        assert_eq!(class(429), ErrorClass::Transient);
        assert_eq!(class(503), ErrorClass::Transient);
        assert_eq!(class(409), ErrorClass::Transient);
        assert_eq!(class(400), ErrorClass::Permanent);
        assert_eq!(class(403), ErrorClass::Permanent);
    }

    #[test]
    fn message_carries_status_and_detail() {
        let err = classify_status(StatusCode::FORBIDDEN, "missing role");
        assert!(err.to_string().contains("HTTP 403: missing role"));
    }
}
