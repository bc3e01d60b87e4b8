//! Utilities for testing applications through the server boundary.
//!

use crate::mapper::Mapper;
use crate::request::Environ;
use crate::response::Headers;
use std::io::Cursor;
use std::sync::Arc;

/// Wraps an application under test.
///
/// Builds a plausible environment for each request, runs it through
/// [`Mapper::wsgi`](../mapper/struct.Mapper.html#method.wsgi) and collects
/// the response.
///
/// ```
/// use rhino::{testing::TestClient, Mapper, Resource};
///
/// let mut hello = Resource::new();
/// hello.get(|_req, _ctx, _args| Ok("hello"));
/// let mut app = Mapper::new();
/// app.add("/", hello).unwrap();
///
/// let client = TestClient::new(app);
/// let response = client.get("/");
/// assert_eq!(response.code(), 200);
/// assert_eq!(response.text(), "hello");
/// ```
///
pub struct TestClient {
    app: Arc<Mapper>,
}

impl TestClient {
    pub fn new(app: impl Into<Arc<Mapper>>) -> Self {
        Self { app: app.into() }
    }

    /// Send a request. A `?` in `path` separates the query string;
    /// `headers` become request headers.
    ///
    pub fn request(
        &self,
        method: &str,
        path: &str,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        self.send(method, path, headers, None)
    }

    /// Send a request with a body.
    ///
    pub fn request_with_body(
        &self,
        method: &str,
        path: &str,
        headers: &[(&str, &str)],
        content_type: &str,
        body: &[u8],
    ) -> TestResponse {
        self.send(method, path, headers, Some((content_type, body.to_vec())))
    }

    pub fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, &[])
    }

    pub fn head(&self, path: &str) -> TestResponse {
        self.request("HEAD", path, &[])
    }

    pub fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, &[])
    }

    pub fn options(&self, path: &str) -> TestResponse {
        self.request("OPTIONS", path, &[])
    }

    pub fn post(
        &self,
        path: &str,
        content_type: &str,
        body: &[u8],
    ) -> TestResponse {
        self.request_with_body("POST", path, &[], content_type, body)
    }

    /// Send a `POST` with the fields as a url-encoded form body.
    ///
    pub fn post_form(
        &self,
        path: &str,
        fields: &[(&str, &str)],
    ) -> TestResponse {
        let body = fields
            .iter()
            .map(|(k, v)| {
                format!("{}={}", urlencoding::encode(k), urlencoding::encode(v))
            })
            .collect::<Vec<_>>()
            .join("&");
        self.post(path, "application/x-www-form-urlencoded", body.as_bytes())
    }

    pub fn put(
        &self,
        path: &str,
        content_type: &str,
        body: &[u8],
    ) -> TestResponse {
        self.request_with_body("PUT", path, &[], content_type, body)
    }

    fn send(
        &self,
        method: &str,
        path: &str,
        headers: &[(&str, &str)],
        body: Option<(&str, Vec<u8>)>,
    ) -> TestResponse {
        let (path, query) = path.split_once('?').unwrap_or((path, ""));
        let mut environ = Environ::new();
        environ.set("REQUEST_METHOD", method);
        environ.set("SCRIPT_NAME", "");
        environ.set("PATH_INFO", path);
        environ.set("QUERY_STRING", query);
        environ.set("SERVER_NAME", "localhost");
        environ.set("SERVER_PORT", "80");
        environ.set("SERVER_PROTOCOL", "HTTP/1.1");
        environ.set("REMOTE_ADDR", "127.0.0.1");
        environ.set("url.scheme", "http");
        environ.set_errors(std::io::sink());
        for (name, value) in headers {
            environ.set_header(name, value);
        }
        if let Some((content_type, bytes)) = body {
            environ.set("CONTENT_TYPE", content_type);
            environ.set("CONTENT_LENGTH", &bytes.len().to_string());
            environ.set_input(Cursor::new(bytes));
        }

        let mut status = String::new();
        let mut header_list: Vec<(String, String)> = Vec::new();
        let mut body_iter =
            self.app.clone().wsgi(environ, &mut |wire_status, wire_headers| {
                status = wire_status.to_string();
                header_list = wire_headers.to_vec();
            });
        let mut body = Vec::new();
        for chunk in &mut body_iter {
            body.extend(chunk);
        }
        body_iter.close();

        let mut headers = Headers::new();
        for (name, value) in header_list {
            headers.add(&name, &value);
        }
        TestResponse { status, headers, body }
    }
}

/// A collected response: status line, headers, and the drained body.
///
#[derive(Debug)]
pub struct TestResponse {
    pub status: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl TestResponse {
    /// The numeric status code.
    ///
    pub fn code(&self) -> u16 {
        self.status
            .split_whitespace()
            .next()
            .and_then(|c| c.parse().ok())
            .unwrap_or(0)
    }

    /// The value of the first header with `name`, case insensitive.
    ///
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// The body decoded as UTF-8.
    ///
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}
