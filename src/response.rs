//! The HTTP response model: headers, body modes, cookies, conditional
//! reduction, and emission over the server boundary.
//!

use crate::http::{
    datetime_to_httpdate, httpdate_to_timestamp, match_etag, reason_phrase,
    timestamp_to_httpdate, HttpStatus,
};
use crate::request::Request;
use crate::Error;
use chrono::{DateTime, Duration, Utc};
use percent_encoding::{percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value as JsonValue;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;
use url::Url;

/// Transforms the raw body value into a body at emission time. Installed
/// by the resource from a handler's `produces` registration.
///
pub type BodyWriter =
    Arc<dyn Fn(JsonValue) -> Result<Body, Error> + Send + Sync>;

// Characters preserved when escaping a Location header value.
const LOCATION_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b';')
    .remove(b'/')
    .remove(b'?')
    .remove(b':')
    .remove(b'@')
    .remove(b'&')
    .remove(b'=')
    .remove(b'+')
    .remove(b'$')
    .remove(b',')
    .remove(b'#');

// Headers retained when reducing a response to "304 Not Modified".
const INCLUDE_IN_304: [&str; 6] = [
    "date",
    "etag",
    "content-location",
    "expires",
    "cache-control",
    "vary",
];

// --- Headers ---------------------------------------------------------------

/// A case-insensitive header multimap that preserves the original casing
/// and insertion order for emission.
///
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Headers {
    items: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// The value of the first header with `name`.
    ///
    pub fn get(&self, name: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name`.
    ///
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.items
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Add a header. Any previous header with the same name is kept.
    ///
    pub fn add(&mut self, name: &str, value: &str) {
        self.items.push((name.to_string(), value.to_string()));
    }

    /// Set a header, replacing any previous headers with the same name.
    ///
    pub fn set(&mut self, name: &str, value: &str) {
        self.items.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.items.push((name.to_string(), value.to_string()));
    }

    /// Add a header unless one with the same name exists. Returns whether
    /// the header was added.
    ///
    pub fn set_default(&mut self, name: &str, value: &str) -> bool {
        if self.contains(name) {
            false
        } else {
            self.add(name, value);
            true
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.items.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.items.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// The headers as `(name, value)` pairs, for emission.
    ///
    pub fn items(&self) -> &[(String, String)] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// --- Body ------------------------------------------------------------------

/// One chunk of a streamed response body.
///
pub enum Chunk {
    Text(String),
    Bytes(Vec<u8>),
}

impl Chunk {
    fn into_bytes(self, encoding: &str) -> Vec<u8> {
        match self {
            Self::Text(s) => encode_text(s, encoding),
            Self::Bytes(b) => b,
        }
    }
}

impl From<String> for Chunk {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Chunk {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

/// A response body.
///
/// The body is serialized lazily, when the response is emitted over the
/// server boundary.
///
pub enum Body {
    /// No body.
    Empty,
    /// Emitted directly, encoded with the response's `default_encoding`.
    Text(String),
    /// Emitted as-is.
    Bytes(Vec<u8>),
    /// A value for the response-body serializer. Without one it is emitted
    /// as compact JSON.
    Json(JsonValue),
    /// Streamed chunk by chunk; text chunks are encoded on the fly.
    Iter(Box<dyn Iterator<Item = Chunk> + Send>),
    /// Invoked after conditional-request handling, when no "304 Not
    /// Modified" short-circuit happened. Its return value is subject to
    /// the same rules.
    Thunk(Box<dyn FnOnce() -> Body + Send>),
}

impl Body {
    /// A streaming body from an iterator of chunks.
    ///
    pub fn iter<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        I::IntoIter: Send + 'static,
        C: Into<Chunk> + 'static,
    {
        Self::Iter(Box::new(chunks.into_iter().map(Into::into)))
    }

    /// A body produced on demand, after conditional-request handling.
    ///
    pub fn thunk<F>(f: F) -> Self
    where
        F: FnOnce() -> Body + Send + 'static,
    {
        Self::Thunk(Box::new(f))
    }
}

impl Debug for Body {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Body::Empty"),
            Self::Text(s) => write!(f, "Body::Text({:?})", s),
            Self::Bytes(b) => write!(f, "Body::Bytes({} bytes)", b.len()),
            Self::Json(v) => write!(f, "Body::Json({})", v),
            Self::Iter(_) => write!(f, "Body::Iter(..)"),
            Self::Thunk(_) => write!(f, "Body::Thunk(..)"),
        }
    }
}

impl From<&str> for Body {
    /// The empty string indicates an empty response body.
    ///
    fn from(s: &str) -> Self {
        if s.is_empty() {
            Self::Empty
        } else {
            Self::Text(s.to_string())
        }
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        if s.is_empty() {
            Self::Empty
        } else {
            Self::Text(s)
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(b: Vec<u8>) -> Self {
        if b.is_empty() {
            Self::Empty
        } else {
            Self::Bytes(b)
        }
    }
}

impl From<JsonValue> for Body {
    fn from(v: JsonValue) -> Self {
        Self::Json(v)
    }
}

impl From<()> for Body {
    fn from(_: ()) -> Self {
        Self::Empty
    }
}

fn encode_text(s: String, encoding: &str) -> Vec<u8> {
    match encoding.to_lowercase().as_str() {
        "latin-1" | "latin1" | "iso-8859-1" => s
            .chars()
            .map(|c| if (c as u32) < 256 { c as u8 } else { b'?' })
            .collect(),
        _ => s.into_bytes(),
    }
}

// --- Entity ----------------------------------------------------------------

/// A response body with entity headers.
///
/// When assigned as a response body, the entity headers are merged into
/// the response without overriding existing headers of the same name.
///
#[derive(Debug)]
pub struct Entity {
    pub body: Body,
    pub headers: Headers,
}

impl Entity {
    pub fn new(body: impl Into<Body>) -> Self {
        Self { body: body.into(), headers: Headers::new() }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.add(name, value);
        self
    }

    /// Set an `ETag` header. Double quotes are added unless the tag starts
    /// and ends with one.
    ///
    pub fn etag(mut self, tag: &str) -> Self {
        self.headers.set("ETag", &quote_etag(tag));
        self
    }

    pub fn last_modified(mut self, dt: DateTime<Utc>) -> Self {
        self.headers.set("Last-Modified", &datetime_to_httpdate(dt));
        self
    }

    pub fn last_modified_timestamp(mut self, timestamp: i64) -> Self {
        self.headers
            .set("Last-Modified", &timestamp_to_httpdate(timestamp));
        self
    }
}

fn quote_etag(tag: &str) -> String {
    if tag.starts_with('"') && tag.ends_with('"') && tag.len() >= 2 {
        tag.to_string()
    } else {
        format!("\"{}\"", tag)
    }
}

// --- Status ----------------------------------------------------------------

/// An HTTP status line: a code and its reason phrase.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Status {
    code: u16,
    line: String,
}

impl Status {
    pub fn code(&self) -> u16 {
        self.code
    }

    /// The status line, e.g. `"200 OK"`.
    ///
    pub fn line(&self) -> &str {
        &self.line
    }
}

impl From<u16> for Status {
    /// A valid status integer maps to its canonical reason phrase,
    /// anything else to `"Unknown"`.
    ///
    fn from(code: u16) -> Self {
        Self { code, line: format!("{} {}", code, reason_phrase(code)) }
    }
}

impl From<HttpStatus> for Status {
    fn from(status: HttpStatus) -> Self {
        Self::from(status.code())
    }
}

impl TryFrom<&str> for Status {
    type Error = Error;

    /// Parse a `"code reason"` string, keeping the given reason phrase.
    ///
    fn try_from(s: &str) -> Result<Self, Error> {
        let code = s
            .split_whitespace()
            .next()
            .and_then(|c| c.parse::<u16>().ok())
            .ok_or_else(|| {
                Error::argument(format!("not a status line: '{}'", s))
            })?;
        Ok(Self { code, line: s.trim().to_string() })
    }
}

// --- Cookie ----------------------------------------------------------------

/// A response cookie for [`Response::set_cookie`
/// ](struct.Response.html#method.set_cookie).
///
#[derive(Clone, Debug)]
pub struct Cookie {
    name: String,
    value: String,
    max_age: Option<i64>,
    path: Option<String>,
    domain: Option<String>,
    secure: bool,
    http_only: bool,
    expires: Option<i64>,
}

impl Cookie {
    /// A cookie restricted to path `/` by default.
    ///
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            max_age: None,
            path: Some("/".to_string()),
            domain: None,
            secure: false,
            http_only: false,
            expires: None,
        }
    }

    /// The maximum age in seconds.
    ///
    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    /// The maximum age as a duration.
    ///
    pub fn max_age_for(mut self, d: Duration) -> Self {
        self.max_age = Some(d.num_seconds());
        self
    }

    pub fn path(mut self, path: &str) -> Self {
        self.path = Some(path.to_string());
        self
    }

    pub fn domain(mut self, domain: &str) -> Self {
        self.domain = Some(domain.to_string());
        self
    }

    /// Instruct the client to only send the cookie over HTTPS.
    ///
    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    /// Instruct the client to disallow script access to the cookie.
    ///
    pub fn http_only(mut self) -> Self {
        self.http_only = true;
        self
    }

    /// Expire `seconds` in the future. Another way of specifying the
    /// maximum age.
    ///
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.expires = Some(Utc::now().timestamp() + seconds);
        self
    }

    /// Expire after `d`.
    ///
    pub fn expires_for(self, d: Duration) -> Self {
        self.expires_in(d.num_seconds())
    }

    /// Expire at an absolute time.
    ///
    pub fn expires_at(mut self, dt: DateTime<Utc>) -> Self {
        self.expires = Some(dt.timestamp());
        self
    }

    fn render(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        if let Some(expires) = self.expires {
            out += &format!("; expires={}", timestamp_to_httpdate(expires));
        }
        if let Some(path) = &self.path {
            out += &format!("; Path={}", path);
        }
        if let Some(domain) = &self.domain {
            out += &format!("; Domain={}", domain);
        }
        if let Some(max_age) = self.max_age {
            out += &format!("; Max-Age={}", max_age);
        }
        if self.secure {
            out += "; Secure";
        }
        if self.http_only {
            out += "; HttpOnly";
        }
        out
    }
}

// --- Response --------------------------------------------------------------

/// Represents an HTTP response.
///
pub struct Response {
    status: Status,
    pub headers: Headers,
    body: Body,
    body_writer: Option<BodyWriter>,
    callbacks: Vec<Box<dyn FnOnce()>>,
    /// Used to encode text bodies at emission (default `utf-8`).
    pub default_encoding: String,
    /// The `Content-Type` set at emission when none is present and the
    /// body is not empty (default `text/plain; charset=utf-8`).
    pub default_content_type: String,
}

impl Response {
    /// An empty response with the given status.
    ///
    pub fn new(status: impl Into<Status>) -> Self {
        Self::with_body(status, Body::Empty)
    }

    pub fn with_body(status: impl Into<Status>, body: impl Into<Body>) -> Self {
        Self {
            status: status.into(),
            headers: Headers::new(),
            body: body.into(),
            body_writer: None,
            callbacks: Vec::new(),
            default_encoding: "utf-8".to_string(),
            default_content_type: "text/plain; charset=utf-8".to_string(),
        }
    }

    /// The status line, e.g. `"200 OK"`.
    ///
    pub fn status(&self) -> &str {
        self.status.line()
    }

    /// The status code.
    ///
    pub fn code(&self) -> u16 {
        self.status.code()
    }

    pub fn set_status(&mut self, status: impl Into<Status>) {
        self.status = status.into();
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Body>) {
        self.body = body.into();
    }

    /// Add a header. Any previous header with the same name is kept.
    ///
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.add(name, value);
        self
    }

    /// Set a header, replacing any previous headers with the same name.
    ///
    pub fn set_header(mut self, name: &str, value: &str) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Set an `ETag` header. Double quotes are added unless the tag starts
    /// and ends with one.
    ///
    pub fn etag(mut self, tag: &str) -> Self {
        self.headers.set("ETag", &quote_etag(tag));
        self
    }

    pub fn last_modified(mut self, dt: DateTime<Utc>) -> Self {
        self.headers.set("Last-Modified", &datetime_to_httpdate(dt));
        self
    }

    pub fn last_modified_timestamp(mut self, timestamp: i64) -> Self {
        self.headers
            .set("Last-Modified", &timestamp_to_httpdate(timestamp));
        self
    }

    /// Set an `Expires` header `d` in the future.
    ///
    pub fn expires_in(mut self, d: Duration) -> Self {
        self.headers.set(
            "Expires",
            &timestamp_to_httpdate(Utc::now().timestamp() + d.num_seconds()),
        );
        self
    }

    /// Set an `Expires` header at an absolute time.
    ///
    pub fn expires_at(mut self, dt: DateTime<Utc>) -> Self {
        self.headers.set("Expires", &datetime_to_httpdate(dt));
        self
    }

    /// Assign an entity as the response body. The entity headers are
    /// merged without overriding existing response headers.
    ///
    pub fn entity(mut self, entity: Entity) -> Self {
        for (name, value) in entity.headers.iter() {
            self.headers.set_default(name, value);
        }
        self.body = entity.body;
        self
    }

    /// Add a callback to be executed when the response body is closed.
    ///
    pub fn add_callback(&mut self, f: impl FnOnce() + 'static) {
        self.callbacks.push(Box::new(f));
    }

    pub(crate) fn push_callback(&mut self, f: Box<dyn FnOnce()>) {
        self.callbacks.push(f);
    }

    pub(crate) fn set_body_writer(&mut self, writer: BodyWriter) {
        self.body_writer = Some(writer);
    }

    /// Set a response cookie.
    ///
    pub fn set_cookie(&mut self, cookie: Cookie) {
        self.headers.add("Set-Cookie", &cookie.render());
    }

    /// Delete a cookie by setting it to a blank value that expired at the
    /// epoch. The path and domain must match those of the original cookie.
    ///
    pub fn delete_cookie(
        &mut self,
        name: &str,
        path: Option<&str>,
        domain: Option<&str>,
    ) {
        let mut cookie = Cookie::new(name, "")
            .max_age(0)
            .expires_at(DateTime::<Utc>::from_timestamp(0, 0).unwrap_or_default());
        if let Some(path) = path {
            cookie = cookie.path(path);
        }
        if let Some(domain) = domain {
            cookie = cookie.domain(domain);
        }
        self.set_cookie(cookie);
    }

    /// Return a response that is conditional to a given request.
    ///
    /// Applies only to `200` responses. Evaluates `If-None-Match` against
    /// `ETag` (weak comparison) and `If-Modified-Since` against
    /// `Last-Modified`. If a conditional header was sent and none of its
    /// conditions matched, the response is returned unchanged; if at least
    /// one matched, a new `304 Not Modified` response is returned carrying
    /// only the headers that remain meaningful for it.
    ///
    pub fn conditional_to(self, request: &Request) -> Response {
        if self.code() != 200 {
            return self;
        }

        let if_none_match = request.header("If-None-Match");
        let if_modified_since = request.header("If-Modified-Since");

        let mut etag_ok = false;
        let mut date_ok = false;

        if let Some(if_none_match) = if_none_match {
            if let Some(etag) = self.headers.get("ETag") {
                etag_ok = match_etag(etag, if_none_match, true);
            }
        }

        if let Some(if_modified_since) = if_modified_since {
            if let Some(last_modified) = self.headers.get("Last-Modified") {
                if let (Ok(modified), Ok(last_valid)) = (
                    httpdate_to_timestamp(last_modified),
                    httpdate_to_timestamp(if_modified_since),
                ) {
                    date_ok = modified <= last_valid;
                }
            }
        }

        if (if_none_match.is_some() && !etag_ok)
            || (if_modified_since.is_some() && !date_ok)
        {
            return self;
        }
        if !(etag_ok || date_ok) {
            return self;
        }

        let mut headers = Headers::new();
        for (name, value) in self.headers.iter() {
            if INCLUDE_IN_304.contains(&name.to_lowercase().as_str()) {
                headers.add(name, value);
            }
        }
        if !headers.contains("Date") {
            headers.add(
                "Date",
                &timestamp_to_httpdate(Utc::now().timestamp()),
            );
        }
        let mut reduced = Response::new(304u16);
        reduced.headers = headers;
        reduced.callbacks = self.callbacks;
        reduced
    }

    /// Finalize the response and hand it to the server.
    ///
    /// Resolves the body (thunk, then serializer), computes
    /// `Content-Length` for single-string bodies, sets the default
    /// `Content-Type` if missing, normalizes `Location` against the
    /// request's application URI, calls `start_response` with the status
    /// line and header list, and returns the body iterator. For status
    /// codes 204 and 304 and for `HEAD` requests, the emitted body is
    /// empty.
    ///
    pub fn emit(
        mut self,
        request: &Request,
        start_response: &mut dyn FnMut(&str, &[(String, String)]),
    ) -> Result<ResponseBody, Error> {
        let code = self.code();

        let mut pending = std::mem::replace(&mut self.body, Body::Empty);
        let mut body = loop {
            pending = match pending {
                Body::Thunk(f) => f(),
                Body::Json(value) => match &self.body_writer {
                    Some(writer) => writer(value)?,
                    None => {
                        let text = serde_json::to_string(&value)
                            .map_err(|e| Error::other(e.to_string()))?;
                        Body::Text(text)
                    }
                },
                other => break other,
            };
        };
        if let Body::Text(text) = body {
            body = Body::Bytes(encode_text(text, &self.default_encoding));
        }

        // Content-Length is only known for single-string bodies; streamed
        // bodies go without one.
        if code != 304 {
            let length = match &body {
                Body::Empty => Some(0),
                Body::Bytes(bytes) => Some(bytes.len()),
                _ => None,
            };
            if let Some(length) = length {
                self.headers
                    .set_default("Content-Length", &length.to_string());
            }
            let default_content_type = self.default_content_type.clone();
            self.headers
                .set_default("Content-Type", &default_content_type);
        }

        if let Some(location) = self.headers.get("Location").map(String::from) {
            let quoted =
                percent_encode(location.as_bytes(), LOCATION_SAFE).to_string();
            let resolved = Url::parse(&request.application_uri())
                .ok()
                .and_then(|base| base.join(&quoted).ok())
                .map(|url| url.to_string())
                .unwrap_or(quoted);
            self.headers.set("Location", &resolved);
        }

        if code == 204 || code == 304 || request.method_str() == "HEAD" {
            body = Body::Empty;
        }

        start_response(self.status.line(), self.headers.items());
        Ok(ResponseBody::new(
            body,
            self.default_encoding,
            self.callbacks,
        ))
    }
}

impl Debug for Response {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status.line())
            .field("headers", &self.headers)
            .field("body", &self.body)
            .finish()
    }
}

/// Coercion of handler return values into responses. A plain value becomes
/// the body of a `200` response.
///
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response {
        self
    }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response {
        Response::with_body(200u16, self)
    }
}

impl IntoResponse for String {
    fn into_response(self) -> Response {
        Response::with_body(200u16, self)
    }
}

impl IntoResponse for Vec<u8> {
    fn into_response(self) -> Response {
        Response::with_body(200u16, self)
    }
}

impl IntoResponse for JsonValue {
    fn into_response(self) -> Response {
        Response::with_body(200u16, self)
    }
}

impl IntoResponse for Body {
    fn into_response(self) -> Response {
        Response::with_body(200u16, self)
    }
}

impl IntoResponse for Entity {
    fn into_response(self) -> Response {
        Response::new(200u16).entity(self)
    }
}

// --- Shortcuts -------------------------------------------------------------

/// A `200 OK` response.
///
pub fn ok(body: impl Into<Body>) -> Response {
    Response::with_body(200u16, body)
}

/// A `201 Created` response.
///
pub fn created(body: impl Into<Body>) -> Response {
    Response::with_body(201u16, body)
}

/// A `204 No Content` response.
///
pub fn no_content() -> Response {
    Response::new(204u16)
}

/// A redirect. The status code must be in the 3xx range.
///
pub fn redirect(location: &str, code: u16) -> Result<Response, Error> {
    if !(300..400).contains(&code) {
        return Err(Error::argument(format!(
            "not a 3xx status code: '{}'",
            code
        )));
    }
    Ok(Response::new(code).set_header("Location", location))
}

// --- ResponseBody ----------------------------------------------------------

enum BodyState {
    Done,
    Single(Vec<u8>),
    Iter(Box<dyn Iterator<Item = Chunk> + Send>),
}

/// The body iterator handed to the server: an iterator of byte chunks
/// supporting `close()`.
///
/// The close callbacks fire exactly once, when the server calls `close()`
/// or when the iterator is dropped.
///
pub struct ResponseBody {
    state: BodyState,
    encoding: String,
    callbacks: Vec<Box<dyn FnOnce()>>,
    closed: bool,
}

impl ResponseBody {
    fn new(
        body: Body,
        encoding: String,
        callbacks: Vec<Box<dyn FnOnce()>>,
    ) -> Self {
        let state = match body {
            Body::Empty => BodyState::Done,
            Body::Bytes(bytes) => BodyState::Single(bytes),
            Body::Text(text) => {
                BodyState::Single(encode_text(text, &encoding))
            }
            Body::Iter(chunks) => BodyState::Iter(chunks),
            // Already resolved during emission.
            Body::Json(_) | Body::Thunk(_) => BodyState::Done,
        };
        Self { state, encoding, callbacks, closed: false }
    }

    pub(crate) fn empty() -> Self {
        Self {
            state: BodyState::Done,
            encoding: "utf-8".to_string(),
            callbacks: Vec::new(),
            closed: false,
        }
    }

    /// Run the close callbacks.
    ///
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.state = BodyState::Done;
            for callback in self.callbacks.drain(..) {
                callback();
            }
        }
    }

    /// Collect the remaining chunks into one byte vector.
    ///
    pub fn into_bytes(mut self) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in &mut self {
            out.extend(chunk);
        }
        out
    }
}

impl Iterator for ResponseBody {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        match &mut self.state {
            BodyState::Done => None,
            BodyState::Single(_) => {
                let state = std::mem::replace(&mut self.state, BodyState::Done);
                match state {
                    BodyState::Single(bytes) => Some(bytes),
                    _ => None,
                }
            }
            BodyState::Iter(chunks) => {
                chunks.next().map(|c| c.into_bytes(&self.encoding))
            }
        }
    }
}

impl Drop for ResponseBody {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Environ;
    use std::cell::Cell;
    use std::rc::Rc;

    fn get_request(headers: &[(&str, &str)]) -> Request {
        let mut environ = Environ::new();
        environ.set("REQUEST_METHOD", "GET");
        environ.set("SERVER_NAME", "localhost");
        environ.set("SERVER_PORT", "80");
        environ.set("url.scheme", "http");
        for (name, value) in headers {
            environ.set_header(name, value);
        }
        Request::new(environ)
    }

    fn emitted(
        response: Response,
        request: &Request,
    ) -> (String, Vec<(String, String)>, Vec<u8>) {
        let mut status = String::new();
        let mut headers = Vec::new();
        let body = response
            .emit(request, &mut |s, h| {
                status = s.to_string();
                headers = h.to_vec();
            })
            .unwrap()
            .into_bytes();
        (status, headers, body)
    }

    #[test]
    fn test_headers_case_insensitive() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "text/plain");
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        headers.set("CONTENT-TYPE", "text/html");
        assert_eq!(headers.get_all("content-type"), vec!["text/html"]);
        assert!(!headers.set_default("Content-Type", "text/css"));
        headers.remove("content-Type");
        assert!(!headers.contains("Content-Type"));
    }

    #[test]
    fn test_status_coercion() {
        assert_eq!(Status::from(200u16).line(), "200 OK");
        assert_eq!(Status::from(599u16).line(), "599 Unknown");
        let status = Status::try_from("418 I'm a teapot").unwrap();
        assert_eq!(status.code(), 418);
        assert!(Status::try_from("teapot").is_err());
    }

    #[test]
    fn test_emit_single_string_body() {
        let request = get_request(&[]);
        let (status, headers, body) = emitted(ok("hello"), &request);
        assert_eq!(status, "200 OK");
        assert_eq!(body, b"hello");
        assert!(headers
            .contains(&("Content-Length".to_string(), "5".to_string())));
        assert!(headers.contains(&(
            "Content-Type".to_string(),
            "text/plain; charset=utf-8".to_string()
        )));
    }

    #[test]
    fn test_emit_head_suppresses_body() {
        let mut environ = Environ::new();
        environ.set("REQUEST_METHOD", "HEAD");
        let request = Request::new(environ);
        let (_, headers, body) = emitted(ok("hello"), &request);
        assert!(body.is_empty());
        // The headers still describe the suppressed entity.
        assert!(headers
            .contains(&("Content-Length".to_string(), "5".to_string())));
    }

    #[test]
    fn test_emit_streamed_body() {
        let request = get_request(&[]);
        let response =
            Response::with_body(200u16, Body::iter(vec!["a", "b", "c"]));
        let (_, headers, body) = emitted(response, &request);
        assert_eq!(body, b"abc");
        assert!(!headers.iter().any(|(n, _)| n == "Content-Length"));
    }

    #[test]
    fn test_emit_thunk_body() {
        let request = get_request(&[]);
        let response =
            Response::with_body(200u16, Body::thunk(|| Body::from("lazy")));
        let (_, _, body) = emitted(response, &request);
        assert_eq!(body, b"lazy");
    }

    #[test]
    fn test_emit_json_body_without_writer() {
        let request = get_request(&[]);
        let response =
            Response::with_body(200u16, serde_json::json!({"a": 1}));
        let (_, _, body) = emitted(response, &request);
        assert_eq!(body, br#"{"a":1}"#);
    }

    #[test]
    fn test_emit_resolves_location() {
        let request = get_request(&[]);
        let response = redirect("/else where", 302).unwrap();
        let (status, headers, _) = emitted(response, &request);
        assert_eq!(status, "302 Found");
        assert!(headers.contains(&(
            "Location".to_string(),
            "http://localhost/else%20where".to_string()
        )));
    }

    #[test]
    fn test_entity_headers_do_not_override() {
        let entity = Entity::new("x")
            .etag("abc")
            .header("Content-Type", "text/html");
        let response = ok("").set_header("Content-Type", "text/css").entity(entity);
        assert_eq!(response.headers.get("Content-Type"), Some("text/css"));
        assert_eq!(response.headers.get("ETag"), Some("\"abc\""));
    }

    #[test]
    fn test_conditional_etag_match() {
        let request = get_request(&[("If-None-Match", "\"abc\"")]);
        let response = ok("payload").etag("abc").header("X-Custom", "1");
        let reduced = response.conditional_to(&request);
        assert_eq!(reduced.code(), 304);
        assert_eq!(reduced.headers.get("ETag"), Some("\"abc\""));
        assert!(reduced.headers.contains("Date"));
        assert!(!reduced.headers.contains("X-Custom"));
        let (_, headers, body) = emitted(reduced, &request);
        assert!(body.is_empty());
        assert!(!headers.iter().any(|(n, _)| n == "Content-Length"));
        assert!(!headers.iter().any(|(n, _)| n == "Content-Type"));
    }

    #[test]
    fn test_conditional_etag_mismatch() {
        let request = get_request(&[("If-None-Match", "\"xyz\"")]);
        let response = ok("payload").etag("abc");
        assert_eq!(response.conditional_to(&request).code(), 200);
    }

    #[test]
    fn test_conditional_modified_since() {
        let date = "Sun, 06 Nov 1994 08:49:37 GMT";
        let request = get_request(&[("If-Modified-Since", date)]);
        let reduced = ok("payload")
            .last_modified_timestamp(784111777)
            .conditional_to(&request);
        assert_eq!(reduced.code(), 304);

        let reduced = ok("payload")
            .last_modified_timestamp(784111778)
            .conditional_to(&request);
        assert_eq!(reduced.code(), 200);
    }

    #[test]
    fn test_conditional_requires_every_sent_header_to_match() {
        // An ETag match alone does not reduce when If-Modified-Since was
        // also sent and does not match.
        let request = get_request(&[
            ("If-None-Match", "\"abc\""),
            ("If-Modified-Since", "Sun, 06 Nov 1994 08:49:37 GMT"),
        ]);
        let response = ok("payload")
            .etag("abc")
            .last_modified_timestamp(784111778);
        assert_eq!(response.conditional_to(&request).code(), 200);
    }

    #[test]
    fn test_conditional_only_applies_to_200() {
        let request = get_request(&[("If-None-Match", "\"abc\"")]);
        let response = created("payload").etag("abc");
        assert_eq!(response.conditional_to(&request).code(), 201);
    }

    #[test]
    fn test_cookies() {
        let mut response = ok("x");
        response.set_cookie(
            Cookie::new("sid", "123").max_age(60).http_only(),
        );
        let value = response.headers.get("Set-Cookie").unwrap();
        assert_eq!(value, "sid=123; Path=/; Max-Age=60; HttpOnly");

        response.delete_cookie("sid", None, None);
        let values = response.headers.get_all("Set-Cookie");
        assert_eq!(
            values[1],
            "sid=; expires=Thu, 01 Jan 1970 00:00:00 GMT; Path=/; Max-Age=0",
        );
    }

    #[test]
    fn test_close_callbacks_fire_once() {
        let request = get_request(&[]);
        let mut response = ok("x");
        let fired = Rc::new(Cell::new(0));
        let fired_in_callback = fired.clone();
        response.add_callback(move || {
            fired_in_callback.set(fired_in_callback.get() + 1)
        });
        let mut body = response
            .emit(&request, &mut |_, _| {})
            .unwrap();
        body.close();
        body.close();
        drop(body);
        assert_eq!(fired.get(), 1);
    }
}
