// Copyright 2024-2026 Piping Relay Developers
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Static handlers for the relay's reserved paths

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http_body_util::{BodyExt, Empty, Full};
use hyper::{Method, Response, StatusCode, Uri};

use minserve::response::{self, GenericResponse};

use crate::params;

/// Paths served by the relay itself rather than relayed.
pub const RESERVED_PATHS: &[&str] = &[
    "",
    "/",
    "/noscript",
    "/version",
    "/help",
    "/favicon.ico",
    "/robots.txt",
];

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
const TEXT_CONTENT_TYPE: &str = "text/plain";

const INDEX_PAGE: &str = "<!DOCTYPE html>\n\
<html>\n\
<head>\n\
<meta charset=\"utf-8\">\n\
<title>Piping Relay</title>\n\
</head>\n\
<body>\n\
<h1>Piping Relay</h1>\n\
<p>Streams data from one sender to receivers over plain HTTP.</p>\n\
<h2>Transfer</h2>\n\
<pre># send\n\
curl -T myfile https://example.com/mypath\n\
\n\
# receive\n\
curl https://example.com/mypath &gt; myfile</pre>\n\
<p>Pick any path. The transfer starts once both ends have connected;\n\
nothing is stored on the server.</p>\n\
<p>No JavaScript? Use <a href=\"/noscript?path=mypath\">the no-script form</a>.</p>\n\
</body>\n\
</html>\n";

const HELP_PAGE: &str = "Piping Relay: stream data between two or more HTTP clients.\n\
\n\
Send a stream:\n\
  curl -T myfile https://example.com/mypath\n\
  echo hello | curl -T - https://example.com/mypath\n\
\n\
Receive it:\n\
  curl https://example.com/mypath > myfile\n\
\n\
Multicast to three receivers:\n\
  curl -T myfile 'https://example.com/mypath?n=3'\n\
  curl 'https://example.com/mypath?n=3' > copy   # three times\n\
\n\
The sender and all receivers must agree on n (default 1). Paths are\n\
first come, first served and forgotten as soon as the transfer ends.\n";

/// Is `path` served by a static handler (and therefore unavailable for relaying)?
pub fn is_reserved(path: &str) -> bool {
    RESERVED_PATHS.contains(&path)
}

/// Respond to a GET or HEAD of a reserved path.
///
/// HEAD responses are synthesized with the same headers a GET would produce (exact
/// `Content-Length` included) and an empty body, rather than running the GET path
/// and discarding its output.
pub fn respond(method: &Method, path: &str, uri: &Uri) -> GenericResponse {
    let head = *method == Method::HEAD;
    match path {
        "" | "/" => page(head, StatusCode::OK, HTML_CONTENT_TYPE, INDEX_PAGE.into()),
        "/noscript" => page(head, StatusCode::OK, HTML_CONTENT_TYPE, noscript_page(uri)),
        "/version" => {
            let version = concat!(env!("CARGO_PKG_VERSION"), "\n");
            page(head, StatusCode::OK, TEXT_CONTENT_TYPE, version.into())
        }
        "/help" => page(head, StatusCode::OK, TEXT_CONTENT_TYPE, HELP_PAGE.into()),
        "/favicon.ico" => no_content(),
        "/robots.txt" => page(
            head,
            StatusCode::NOT_FOUND,
            TEXT_CONTENT_TYPE,
            "404 not found\n".into(),
        ),
        _ => response::not_found(),
    }
}

/// A static page with its exact byte length declared up front.
fn page(
    head: bool,
    status: StatusCode,
    content_type: &'static str,
    content: String,
) -> GenericResponse {
    let content = Bytes::from(content);
    let body = if head {
        Empty::new().map_err(anyhow::Error::from).boxed()
    } else {
        Full::new(content.clone()).map_err(anyhow::Error::from).boxed()
    };
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, content_type)
        .header(CONTENT_LENGTH, content.len())
        .body(body)
        .unwrap()
}

fn no_content() -> GenericResponse {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .body(Empty::new().map_err(anyhow::Error::from).boxed())
        .unwrap()
}

/// The HTML form used to send a file from a browser with JavaScript disabled.
///
/// The target path arrives as the `path` query parameter and is reflected into the
/// form's `action`, HTML-escaped.
fn noscript_page(uri: &Uri) -> String {
    let path = params::str_param(uri, "path").unwrap_or_default();
    format!(
        "<!DOCTYPE html>\n\
<html>\n\
<head>\n\
<meta charset=\"utf-8\">\n\
<title>Piping Relay</title>\n\
</head>\n\
<body>\n\
<h1>Send a file</h1>\n\
<form action=\"{}\" method=\"POST\" enctype=\"multipart/form-data\">\n\
<input type=\"file\" name=\"input_file\">\n\
<input type=\"submit\" value=\"Send\">\n\
</form>\n\
</body>\n\
</html>\n",
        escape_html(&path)
    )
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_bytes(response: GenericResponse) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    fn get(path: &str, uri: &str) -> GenericResponse {
        respond(&Method::GET, path, &uri.parse().unwrap())
    }

    #[test]
    fn the_reserved_set_is_exact() {
        for path in ["", "/", "/noscript", "/version", "/help", "/favicon.ico", "/robots.txt"] {
            assert!(is_reserved(path), "{path:?} should be reserved");
        }
        assert!(!is_reserved("/mypath"));
        assert!(!is_reserved("/version/x"));
    }

    #[tokio::test]
    async fn index_mentions_piping_and_declares_its_length() {
        let response = get("/", "/");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "text/html; charset=utf-8"
        );
        let declared: usize = response
            .headers()
            .get(CONTENT_LENGTH)
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        let body = body_bytes(response).await;
        assert_eq!(declared, body.len());
        assert!(std::str::from_utf8(&body).unwrap().contains("Piping"));
    }

    #[tokio::test]
    async fn version_is_the_crate_version_plus_newline() {
        let response = get("/version", "/version");
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "text/plain"
        );
        let body = body_bytes(response).await;
        assert_eq!(body, format!("{}\n", env!("CARGO_PKG_VERSION")));
    }

    #[tokio::test]
    async fn noscript_reflects_the_escaped_path() {
        let response = get("/noscript", "/noscript?path=/my%20path");
        let body = body_bytes(response).await;
        let body = std::str::from_utf8(&body).unwrap();
        assert!(body.contains("action=\"/my path\""));

        let response = get("/noscript", "/noscript?path=%22%3E%3Cscript%3E");
        let body = body_bytes(response).await;
        let body = std::str::from_utf8(&body).unwrap();
        assert!(!body.contains("<script>"));
        assert!(body.contains("action=\"&quot;&gt;&lt;script&gt;\""));
    }

    #[tokio::test]
    async fn head_headers_match_get_headers() {
        for path in ["/", "/noscript", "/version", "/help", "/robots.txt"] {
            let get_response = respond(&Method::GET, path, &path.parse().unwrap());
            let head_response = respond(&Method::HEAD, path, &path.parse().unwrap());
            assert_eq!(get_response.status(), head_response.status());
            assert_eq!(get_response.headers(), head_response.headers());
            assert!(body_bytes(head_response).await.is_empty());
        }
    }

    #[tokio::test]
    async fn favicon_has_no_content() {
        let response = get("/favicon.ico", "/favicon.ico");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(body_bytes(response).await.is_empty());
    }

    #[test]
    fn robots_is_not_found() {
        assert_eq!(get("/robots.txt", "/robots.txt").status(), StatusCode::NOT_FOUND);
    }
}
