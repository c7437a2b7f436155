// Copyright 2024-2026 Piping Relay Developers
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Projection of sender request headers onto receiver responses

use http::header::{
    HeaderMap, HeaderName, HeaderValue, ALLOW, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE,
};
use http_body_util::{BodyExt, Empty};
use hyper::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE,
};
use hyper::{Response, StatusCode};

use minserve::response::{self, GenericResponse};

/// Application-defined header relayed verbatim from sender to receivers.
pub const X_PIPING: HeaderName = HeaderName::from_static("x-piping");

/// Header whose presence marks a Service Worker registration fetch.
pub const SERVICE_WORKER: HeaderName = HeaderName::from_static("service-worker");

const X_ROBOTS_TAG: HeaderName = HeaderName::from_static("x-robots-tag");

const ALLOWED_METHODS: &str = "GET, HEAD, POST, PUT, OPTIONS";

/// Compute the response headers a receiver sees from the sender's headers.
///
/// `source` is either the sender's request headers or, for an unwrapped multipart
/// upload, the headers of the body's first part.
pub fn receiver_headers(source: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(content_type) = source.get(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, degrade_html(content_type));
    }
    if let Some(content_length) = source.get(CONTENT_LENGTH) {
        headers.insert(CONTENT_LENGTH, content_length.clone());
    }
    if let Some(disposition) = source.get(CONTENT_DISPOSITION) {
        headers.insert(CONTENT_DISPOSITION, disposition.clone());
    }
    let mut relayed_any = false;
    for value in source.get_all(&X_PIPING) {
        headers.append(X_PIPING, value.clone());
        relayed_any = true;
    }
    if relayed_any {
        headers.insert(
            ACCESS_CONTROL_EXPOSE_HEADERS,
            HeaderValue::from_static("X-Piping"),
        );
    }
    headers.insert(X_ROBOTS_TAG, HeaderValue::from_static("none"));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers
}

/// Rewrite `text/html` to `text/plain`, preserving any parameters.
///
/// A receiver's browser must never interpret relayed bytes as markup; everything else
/// passes through untouched.
fn degrade_html(content_type: &HeaderValue) -> HeaderValue {
    let Ok(text) = content_type.to_str() else {
        return content_type.clone();
    };
    let prefix_len = "text/html".len();
    if text.len() >= prefix_len && text[..prefix_len].eq_ignore_ascii_case("text/html") {
        let parameters = &text[prefix_len..];
        if parameters.is_empty() || parameters.starts_with(';') || parameters.starts_with(' ') {
            if let Ok(rewritten) = HeaderValue::from_str(&format!("text/plain{parameters}")) {
                return rewritten;
            }
        }
    }
    content_type.clone()
}

/// Make sure a response allows any origin.
pub fn add_cors_headers(headers: &mut HeaderMap) {
    headers
        .entry(ACCESS_CONTROL_ALLOW_ORIGIN)
        .or_insert(HeaderValue::from_static("*"));
}

/// The CORS preflight response.
pub fn preflight() -> GenericResponse {
    Response::builder()
        .status(StatusCode::OK)
        .header(ACCESS_CONTROL_ALLOW_METHODS, ALLOWED_METHODS)
        .header(
            ACCESS_CONTROL_ALLOW_HEADERS,
            "Content-Type, Content-Disposition, X-Piping",
        )
        .header(ACCESS_CONTROL_MAX_AGE, "86400")
        .header(CONTENT_LENGTH, 0)
        .body(Empty::new().map_err(anyhow::Error::from).boxed())
        .unwrap()
}

/// 405 for anything outside GET/HEAD/POST/PUT/OPTIONS.
pub fn method_not_allowed() -> GenericResponse {
    let mut response = response::text(StatusCode::METHOD_NOT_ALLOWED, "405 method not allowed");
    response
        .headers_mut()
        .insert(ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        headers
    }

    #[test]
    fn projection_echoes_length_and_disposition() {
        let headers = receiver_headers(&source(&[
            ("content-length", "17"),
            ("content-disposition", "attachment; filename=\"f.txt\""),
        ]));
        assert_eq!(headers.get(CONTENT_LENGTH).unwrap(), "17");
        assert_eq!(
            headers.get(CONTENT_DISPOSITION).unwrap(),
            "attachment; filename=\"f.txt\""
        );
        assert!(headers.get(CONTENT_TYPE).is_none());
        assert_eq!(headers.get("x-robots-tag").unwrap(), "none");
        assert_eq!(headers.get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
    }

    #[test]
    fn html_is_degraded_to_plain_text() {
        let headers = receiver_headers(&source(&[("content-type", "text/html")]));
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "text/plain");

        let headers = receiver_headers(&source(&[("content-type", "text/html; charset=utf-8")]));
        assert_eq!(
            headers.get(CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );

        let headers = receiver_headers(&source(&[("content-type", "TEXT/HTML; charset=utf-8")]));
        assert_eq!(
            headers.get(CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
    }

    #[test]
    fn non_html_content_types_pass_through() {
        for passthrough in ["text/htmlx", "application/octet-stream", "text/plain"] {
            let headers = receiver_headers(&source(&[("content-type", passthrough)]));
            assert_eq!(headers.get(CONTENT_TYPE).unwrap(), passthrough);
        }
    }

    #[test]
    fn x_piping_keeps_multiplicity_and_order() {
        let headers = receiver_headers(&source(&[
            ("x-piping", "a"),
            ("x-piping", "b"),
            ("x-piping", "c"),
        ]));
        let values: Vec<_> = headers.get_all(&X_PIPING).iter().collect();
        assert_eq!(values, ["a", "b", "c"]);
        assert_eq!(
            headers.get(ACCESS_CONTROL_EXPOSE_HEADERS).unwrap(),
            "X-Piping"
        );
    }

    #[test]
    fn expose_headers_absent_without_x_piping() {
        let headers = receiver_headers(&source(&[("content-length", "1")]));
        assert!(headers.get(ACCESS_CONTROL_EXPOSE_HEADERS).is_none());
    }

    #[test]
    fn preflight_advertises_the_relay_surface() {
        let response = preflight();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(
            headers.get(ACCESS_CONTROL_ALLOW_METHODS).unwrap(),
            "GET, HEAD, POST, PUT, OPTIONS"
        );
        assert_eq!(
            headers.get(ACCESS_CONTROL_ALLOW_HEADERS).unwrap(),
            "Content-Type, Content-Disposition, X-Piping"
        );
        assert_eq!(headers.get(ACCESS_CONTROL_MAX_AGE).unwrap(), "86400");
        assert_eq!(headers.get(CONTENT_LENGTH).unwrap(), "0");
    }

    #[test]
    fn method_not_allowed_lists_the_allowed_set() {
        let response = method_not_allowed();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            response.headers().get(ALLOW).unwrap(),
            "GET, HEAD, POST, PUT, OPTIONS"
        );
    }
}
