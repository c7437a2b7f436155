// Copyright 2024-2026 Piping Relay Developers
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Unwrapping of `multipart/form-data` uploads
//!
//! A sender that POSTs a form (e.g. through the `/noscript` page) wraps the payload in
//! a multipart body. The relay streams the *first part* as if it were the request
//! body itself: the part's headers feed the header projection and the part's bytes
//! feed the multicast.

use http::header::{HeaderMap, HeaderValue, CONTENT_DISPOSITION, CONTENT_TYPE};

/// The sender declared a multipart content-type the parser cannot work with.
#[derive(Debug, thiserror::Error)]
#[error("invalid multipart content-type: {0}")]
pub struct BoundaryError(multer::Error);

/// Extract the multipart boundary if (and only if) this is a form-data upload.
///
/// `Ok(None)` means the body is not multipart and streams as-is. A multipart
/// content-type with an unusable boundary is an error here, before any participant
/// attaches, rather than a mid-stream failure.
pub fn boundary(headers: &HeaderMap) -> Result<Option<String>, BoundaryError> {
    let Some(content_type) = headers.get(CONTENT_TYPE) else {
        return Ok(None);
    };
    let Ok(content_type) = content_type.to_str() else {
        return Ok(None);
    };
    if !content_type
        .trim_start()
        .to_ascii_lowercase()
        .starts_with("multipart/form-data")
    {
        return Ok(None);
    }
    multer::parse_boundary(content_type)
        .map(Some)
        .map_err(BoundaryError)
}

/// The headers of a part, as the header projection should see them.
///
/// `multer` keeps a part's raw header block available; when `Content-Disposition` is
/// missing from it, one is reassembled from the parsed field name and filename so
/// receivers still learn what the sender called the file.
pub fn part_headers(field: &multer::Field<'_>) -> HeaderMap {
    let mut headers = field.headers().clone();
    if !headers.contains_key(CONTENT_DISPOSITION) {
        let mut disposition = String::from("form-data");
        if let Some(name) = field.name() {
            disposition.push_str(&format!("; name=\"{}\"", escape_quoted(name)));
        }
        if let Some(file_name) = field.file_name() {
            disposition.push_str(&format!("; filename=\"{}\"", escape_quoted(file_name)));
        }
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            headers.insert(CONTENT_DISPOSITION, value);
        }
    }
    headers
}

fn escape_quoted(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use futures::stream;

    fn headers_with_content_type(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn non_multipart_bodies_have_no_boundary() {
        assert!(boundary(&HeaderMap::new()).unwrap().is_none());
        assert!(boundary(&headers_with_content_type("text/plain"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn form_data_boundary_is_extracted() {
        let headers = headers_with_content_type("multipart/form-data; boundary=XBOUNDX");
        assert_eq!(boundary(&headers).unwrap().as_deref(), Some("XBOUNDX"));
    }

    #[test]
    fn form_data_without_boundary_is_rejected() {
        let headers = headers_with_content_type("multipart/form-data");
        assert!(boundary(&headers).is_err());
    }

    #[tokio::test]
    async fn first_part_headers_and_bytes_are_exposed() {
        let body = "--XBOUNDX\r\n\
                    Content-Disposition: form-data; name=\"dummy form name\"; filename=\"myfile.txt\"\r\n\
                    \r\n\
                    this is a content\r\n\
                    --XBOUNDX--\r\n";
        let chunks = stream::iter([Ok::<_, anyhow::Error>(Bytes::from(body))]);
        let mut parts = multer::Multipart::new(chunks, "XBOUNDX");

        let field = parts.next_field().await.unwrap().unwrap();
        let headers = part_headers(&field);
        assert_eq!(
            headers.get(CONTENT_DISPOSITION).unwrap(),
            "form-data; name=\"dummy form name\"; filename=\"myfile.txt\""
        );
        assert!(headers.get(CONTENT_TYPE).is_none());
        assert_eq!(field.bytes().await.unwrap(), "this is a content");
    }

    #[test]
    fn synthesized_dispositions_escape_quotes() {
        assert_eq!(escape_quoted(r#"my "file""#), r#"my \"file\""#);
    }
}
