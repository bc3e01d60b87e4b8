//! The request side of the server boundary: the environment record handed
//! over by the server, and the read-mostly request view built on top of it.
//!

use crate::http::{HeaderVal, Method};
use crate::mapper::{Route, UrlTarget};
use crate::urls::{build_url, RoutingFrame};
use crate::Error;
use percent_encoding::{percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::io::{Read, Write};
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use url::{form_urlencoded, Url};

/// Reads the raw request body on first access. Installed by the resource
/// from a handler's `consumes` registration.
///
pub type BodyReader =
    Arc<dyn Fn(&[u8]) -> Result<JsonValue, Error> + Send + Sync>;

// python-style quote() with safe '/'
const SCRIPT_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

// quote() with safe '/;=,' for the path part of a request URI
const PATH_INFO_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/')
    .remove(b';')
    .remove(b'=')
    .remove(b',');

// --- Environ ---------------------------------------------------------------

/// The environment record handed over by the HTTP server.
///
/// Variables use the CGI key shapes: `REQUEST_METHOD`, `SCRIPT_NAME`,
/// `PATH_INFO`, `QUERY_STRING`, `CONTENT_TYPE`, `CONTENT_LENGTH`,
/// `SERVER_NAME`, `SERVER_PORT`, `url.scheme`, and request headers folded
/// into `HTTP_*` keys. Besides the variables, the record carries the byte
/// input stream of the request body and the server's error stream.
///
#[derive(Default)]
pub struct Environ {
    vars: HashMap<String, String>,
    input: Option<Box<dyn Read + Send>>,
    errors: Option<Box<dyn Write + Send>>,
}

impl Environ {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|v| v.as_str())
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.vars.insert(key.to_string(), value.to_string());
    }

    /// Set a request header, folding the name into its `HTTP_*` key
    /// (`CONTENT_TYPE` and `CONTENT_LENGTH` keep their bare keys).
    ///
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.vars.insert(Self::header_key(name), value.to_string());
    }

    pub fn set_input(&mut self, input: impl Read + Send + 'static) {
        self.input = Some(Box::new(input));
    }

    pub fn set_errors(&mut self, errors: impl Write + Send + 'static) {
        self.errors = Some(Box::new(errors));
    }

    fn header_key(name: &str) -> String {
        let key = name.to_uppercase().replace('-', "_");
        if key == "CONTENT_TYPE" || key == "CONTENT_LENGTH" {
            key
        } else {
            format!("HTTP_{}", key)
        }
    }

    fn header_name(key: &str) -> String {
        let key = key.strip_prefix("HTTP_").unwrap_or(key);
        key.split('_')
            .map(|part| {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => {
                        first.to_uppercase().collect::<String>()
                            + &chars.as_str().to_lowercase()
                    }
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join("-")
    }

    fn header_keys(&self) -> impl Iterator<Item = &String> {
        self.vars.keys().filter(|k| {
            k.starts_with("HTTP_")
                || *k == "CONTENT_TYPE"
                || *k == "CONTENT_LENGTH"
        })
    }
}

impl Debug for Environ {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Environ").field("vars", &self.vars).finish()
    }
}

// --- RequestHeaders --------------------------------------------------------

/// A read-only, case-insensitive view of the request headers in the
/// environment.
///
pub struct RequestHeaders<'req> {
    environ: &'req Environ,
}

impl<'req> RequestHeaders<'req> {
    pub fn get(&self, name: &str) -> Option<&'req str> {
        self.environ.get(&Environ::header_key(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (String, &'req str)> {
        let environ = self.environ;
        environ.header_keys().map(move |key| {
            (Environ::header_name(key), environ.get(key).unwrap_or(""))
        })
    }

    pub fn len(&self) -> usize {
        self.environ.header_keys().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// --- QueryDict -------------------------------------------------------------

/// An ordered multimap of query or form parameters.
///
/// Plain access returns the first value for a key; `get_all` returns every
/// value in order.
///
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct QueryDict {
    items: Vec<(String, String)>,
}

impl QueryDict {
    pub fn from_pairs(items: Vec<(String, String)>) -> Self {
        Self { items }
    }

    /// The first value for `key`.
    ///
    pub fn get(&self, key: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All values for `key`, in order.
    ///
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.items
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// The first value for `key`, deserialized from its string form. A
    /// value that does not convert counts as absent.
    ///
    pub fn get_as<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        self.get(key).and_then(decode_value)
    }

    /// All values for `key` that convert; the rest are skipped.
    ///
    pub fn get_all_as<T>(&self, key: &str) -> Vec<T>
    where
        T: DeserializeOwned,
    {
        self.get_all(key).into_iter().filter_map(decode_value).collect()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.items.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn decode_value<T: DeserializeOwned>(s: &str) -> Option<T> {
    serde_json::from_str(s)
        .or_else(|_| serde_json::from_str(&format!("\"{}\"", s)))
        .ok()
}

// --- FormField -------------------------------------------------------------

/// One field of a parsed form body.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FormField {
    pub name: String,
    pub value: String,
    /// The original filename for file-upload fields.
    pub filename: Option<String>,
    /// The part's `Content-Type`, for multipart fields that carry one.
    pub content_type: Option<String>,
}

// --- UrlParams -------------------------------------------------------------

/// Parameters for [`Request::url_for`](struct.Request.html#method.url_for).
///
/// Positional values are consumed by template parameters not supplied by
/// name, in template-declared order. Query pairs are appended as a query
/// string. By default the built URL is absolute; `relative()` strips the
/// scheme and host.
///
#[derive(Debug, Default)]
pub struct UrlParams {
    args: Vec<String>,
    kw: HashMap<String, String>,
    query: Vec<(String, String)>,
    relative: bool,
}

impl UrlParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl ToString) -> Self {
        self.args.push(value.to_string());
        self
    }

    pub fn set(mut self, name: &str, value: impl ToString) -> Self {
        self.kw.insert(name.to_string(), value.to_string());
        self
    }

    pub fn query(mut self, name: &str, value: impl ToString) -> Self {
        self.query.push((name.to_string(), value.to_string()));
        self
    }

    pub fn relative(mut self) -> Self {
        self.relative = true;
        self
    }
}

// --- Request ---------------------------------------------------------------

/// An HTTP request built from an environment record.
///
pub struct Request {
    environ: Environ,
    routing_args: HashMap<String, String>,
    frames: Vec<RoutingFrame>,
    query: Option<QueryDict>,
    raw_body: Option<Vec<u8>>,
    content: Option<JsonValue>,
    body_reader: Option<BodyReader>,
    form: Option<Vec<FormField>>,
    cookies: Option<HashMap<String, String>>,
}

impl Request {
    pub fn new(environ: Environ) -> Self {
        Self {
            environ,
            routing_args: HashMap::new(),
            frames: Vec::new(),
            query: None,
            raw_body: None,
            content: None,
            body_reader: None,
            form: None,
            cookies: None,
        }
    }

    /// The request method, uppercased. Defaults to `GET`.
    ///
    pub fn method_str(&self) -> String {
        self.environ
            .get("REQUEST_METHOD")
            .unwrap_or("GET")
            .to_uppercase()
    }

    /// The request method as a [`Method`](../http/enum.Method.html).
    ///
    pub fn method(&self) -> Result<Method, Error> {
        Method::from_str(&self.method_str())
    }

    /// The URL prefix consumed by routing so far.
    ///
    pub fn script_name(&self) -> &str {
        self.environ.get("SCRIPT_NAME").unwrap_or("")
    }

    /// The part of the URL path that remains to be routed.
    ///
    pub fn path_info(&self) -> &str {
        self.environ.get("PATH_INFO").unwrap_or("")
    }

    pub(crate) fn set_script_name(&mut self, value: &str) {
        self.environ.set("SCRIPT_NAME", value);
    }

    pub(crate) fn set_path_info(&mut self, value: &str) {
        self.environ.set("PATH_INFO", value);
    }

    pub fn query_string(&self) -> &str {
        self.environ.get("QUERY_STRING").unwrap_or("")
    }

    /// The query parameters as an ordered multimap.
    ///
    pub fn query(&mut self) -> &QueryDict {
        if self.query.is_none() {
            let items = form_urlencoded::parse(self.query_string().as_bytes())
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            self.query = Some(QueryDict::from_pairs(items));
        }
        self.query.get_or_insert_with(QueryDict::default)
    }

    /// The value of a request header, case insensitive.
    ///
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers().get(name)
    }

    /// A request header parsed into a value and its `;`-separated
    /// parameters.
    ///
    pub fn header_val(&self, name: &str) -> Option<HeaderVal> {
        self.header(name).map(HeaderVal::parse)
    }

    /// The case-insensitive view of all request headers.
    ///
    pub fn headers(&self) -> RequestHeaders {
        RequestHeaders { environ: &self.environ }
    }

    /// The value of the `Content-Type` header, if any.
    ///
    pub fn content_type(&self) -> Option<&str> {
        self.environ.get("CONTENT_TYPE")
    }

    /// The value of the `Content-Length` header as an integer, if any.
    ///
    pub fn content_length(&self) -> Option<usize> {
        self.environ
            .get("CONTENT_LENGTH")
            .and_then(|v| v.parse().ok())
    }

    pub fn server_name(&self) -> Option<&str> {
        self.environ.get("SERVER_NAME")
    }

    pub fn server_port(&self) -> Option<u16> {
        self.environ.get("SERVER_PORT").and_then(|p| p.parse().ok())
    }

    pub fn remote_addr(&self) -> Option<&str> {
        self.environ.get("REMOTE_ADDR")
    }

    /// The URL scheme, usually `http` or `https`.
    ///
    pub fn scheme(&self) -> &str {
        self.environ.get("url.scheme").unwrap_or("http")
    }

    /// The base URI of the application: scheme, host, and the consumed
    /// script name.
    ///
    pub fn application_uri(&self) -> String {
        let scheme = self.scheme();
        let mut uri = format!("{}://", scheme);
        match self.environ.get("HTTP_HOST") {
            Some(host) => uri += host,
            None => {
                uri += self.environ.get("SERVER_NAME").unwrap_or("localhost");
                let default_port =
                    if scheme == "https" { "443" } else { "80" };
                if let Some(port) = self.environ.get("SERVER_PORT") {
                    if !port.is_empty() && port != default_port {
                        uri += &format!(":{}", port);
                    }
                }
            }
        }
        let script = self.script_name();
        if script.is_empty() {
            uri.push('/');
        } else {
            uri += &percent_encode(script.as_bytes(), SCRIPT_SAFE).to_string();
        }
        uri
    }

    /// The reconstructed absolute request URL, including the query string.
    ///
    pub fn url(&self) -> String {
        let mut url = self.application_uri();
        let path = percent_encode(self.path_info().as_bytes(), PATH_INFO_SAFE)
            .to_string();
        if self.script_name().is_empty() {
            // application_uri already ends with a slash
            url += path.strip_prefix('/').unwrap_or(&path);
        } else {
            url += &path;
        }
        let query = self.query_string();
        if !query.is_empty() {
            url = url + "?" + query;
        }
        url
    }

    /// Named parameters extracted from the URL during routing.
    ///
    pub fn routing_args(&self) -> &HashMap<String, String> {
        &self.routing_args
    }

    pub(crate) fn routing_args_mut(&mut self) -> &mut HashMap<String, String> {
        &mut self.routing_args
    }

    /// A routing parameter deserialized from its string form.
    /// ```no_run
    /// # fn demo(request: &rhino::Request) {
    /// // With a route template "/users/{id:digits}" matched on /users/42:
    /// assert_eq!(request.routing_arg::<u32>("id"), Some(42));
    /// # }
    /// ```
    pub fn routing_arg<T>(&self, name: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        self.routing_args.get(name).and_then(|s| decode_value(s))
    }

    /// Read and return the entire request body.
    ///
    /// On first access, reads exactly `Content-Length` bytes from the
    /// input stream; a short read is an error. On subsequent access,
    /// returns the cached value.
    ///
    pub fn body(&mut self) -> Result<&[u8], Error> {
        if self.raw_body.is_none() {
            let len = self.content_length().unwrap_or(0);
            let mut buf = vec![0u8; len];
            if len > 0 {
                let input = self.environ.input.as_mut().ok_or_else(|| {
                    Error::other("no request input stream")
                })?;
                input.read_exact(&mut buf).map_err(|e| {
                    Error::other(format!(
                        "unexpected end of file while reading request: {}",
                        e
                    ))
                })?;
            }
            self.raw_body = Some(buf);
        }
        match &self.raw_body {
            Some(body) => Ok(body),
            None => Err(Error::other("request body not available")),
        }
    }

    /// The request body passed through the installed deserializer.
    ///
    /// Available when the dispatched handler was registered with
    /// `consumes`; the result is memoized.
    ///
    pub fn content(&mut self) -> Result<&JsonValue, Error> {
        if self.content.is_none() {
            let reader = match &self.body_reader {
                Some(reader) => reader.clone(),
                None => {
                    return Err(Error::other(
                        "no request body deserializer installed",
                    ))
                }
            };
            let value = reader(self.body()?)?;
            self.content = Some(value);
        }
        match &self.content {
            Some(value) => Ok(value),
            None => Err(Error::other("request body not available")),
        }
    }

    pub(crate) fn set_body_reader(&mut self, reader: BodyReader) {
        self.body_reader = Some(reader);
    }

    /// Parse the request body as a web form.
    ///
    /// Supports `application/x-www-form-urlencoded` and
    /// `multipart/form-data` bodies; anything else is treated as
    /// url-encoded. The query string never contaminates the result.
    ///
    pub fn form(&mut self) -> Result<&[FormField], Error> {
        if self.form.is_none() {
            let content_type =
                self.environ.get("CONTENT_TYPE").map(HeaderVal::parse);
            let body = self.body()?.to_vec();
            let fields = match content_type {
                Some(hv)
                    if hv.value.eq_ignore_ascii_case("multipart/form-data") =>
                {
                    let boundary = hv.param("boundary").ok_or_else(|| {
                        Error::other("multipart form without a boundary")
                    })?;
                    parse_multipart(&body, &boundary)
                }
                _ => form_urlencoded::parse(&body)
                    .map(|(k, v)| FormField {
                        name: k.to_string(),
                        value: v.to_string(),
                        filename: None,
                        content_type: None,
                    })
                    .collect(),
            };
            self.form = Some(fields);
        }
        match &self.form {
            Some(fields) => Ok(fields),
            None => Err(Error::other("request form not available")),
        }
    }

    /// The cookies sent with the request.
    ///
    pub fn cookies(&mut self) -> &HashMap<String, String> {
        if self.cookies.is_none() {
            let mut cookies = HashMap::new();
            if let Some(header) = self.environ.get("HTTP_COOKIE") {
                for part in header.split(';') {
                    if let Some((name, value)) = part.split_once('=') {
                        let value = value.trim();
                        let value = value
                            .strip_prefix('"')
                            .and_then(|v| v.strip_suffix('"'))
                            .unwrap_or(value);
                        cookies.insert(
                            name.trim().to_string(),
                            value.to_string(),
                        );
                    }
                }
            }
            self.cookies = Some(cookies);
        }
        self.cookies.get_or_insert_with(HashMap::new)
    }

    /// Build the URL for a target route using the current routing-context
    /// stack. See [`build_url`](../urls/fn.build_url.html) for the
    /// accepted targets.
    ///
    pub fn url_for(
        &self,
        target: impl Into<UrlTarget>,
        params: UrlParams,
    ) -> Result<String, Error> {
        let UrlParams { mut args, mut kw, query, relative } = params;
        let target = target.into();
        let mut url = build_url(&self.frames, &target, &mut args, &mut kw)?;
        if !query.is_empty() {
            let encoded = query
                .iter()
                .map(|(k, v)| {
                    format!(
                        "{}={}",
                        urlencoding::encode(k),
                        urlencoding::encode(v)
                    )
                })
                .collect::<Vec<_>>()
                .join("&");
            let separator = if url.contains('?') { '&' } else { '?' };
            url = format!("{}{}{}", url, separator, encoded);
        }
        if relative {
            return Ok(url);
        }
        Ok(Url::parse(&self.application_uri())
            .ok()
            .and_then(|base| base.join(&url).ok())
            .map(|joined| joined.to_string())
            .unwrap_or(url))
    }

    pub(crate) fn push_frame(&mut self, frame: RoutingFrame) {
        self.frames.push(frame);
    }

    pub(crate) fn set_frame_route(&mut self, route: Arc<Route>) {
        if let Some(frame) = self.frames.last_mut() {
            frame.route = Some(route);
        }
    }

    pub(crate) fn frames(&self) -> &[RoutingFrame] {
        &self.frames
    }

    /// Write a line to the environment's error stream.
    ///
    pub fn log_error(&mut self, message: &str) {
        if let Some(errors) = self.environ.errors.as_mut() {
            let _ = writeln!(errors, "{}", message);
            let _ = errors.flush();
        }
    }
}

impl Debug for Request {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method_str())
            .field("script_name", &self.script_name())
            .field("path_info", &self.path_info())
            .field("routing_args", &self.routing_args)
            .finish()
    }
}

// --- Form parsing ----------------------------------------------------------

fn find(haystack: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

fn parse_multipart(body: &[u8], boundary: &str) -> Vec<FormField> {
    let marker_string = format!("--{}", boundary);
    let marker = marker_string.as_bytes();
    let mut fields = Vec::new();
    let mut start = 0usize;
    loop {
        let Some(found) = find(body, start, marker) else {
            break;
        };
        let mut part_end = found;
        let marker_end = found + marker.len();
        if part_end >= start + 2 && &body[part_end - 2..part_end] == b"\r\n" {
            // remove trailing CRLF from the preceding contents
            part_end -= 2;
        }
        if start > 0 {
            if let Some(field) = parse_part(&body[start..part_end]) {
                fields.push(field);
            }
        }
        if body.len() < marker_end + 2
            || &body[marker_end..marker_end + 2] == b"--"
        {
            break;
        }
        start = marker_end;
    }
    fields
}

fn parse_part(part: &[u8]) -> Option<FormField> {
    static FOLDEX: OnceLock<Regex> = OnceLock::new();
    let foldex = FOLDEX.get_or_init(|| Regex::new(r"\r\n\s+").unwrap());

    let header_end = find(part, 0, b"\r\n\r\n")?;
    let header_start =
        if part.len() >= 2 && &part[..2] == b"\r\n" { 2 } else { 0 };
    let headers =
        std::str::from_utf8(&part[header_start..header_end + 2]).unwrap_or("");
    let headers = foldex.replace_all(headers, " ");
    let contents = &part[header_end + 4..];

    let mut name = String::new();
    let mut filename = None;
    let mut content_type = None;
    for header in headers.split("\r\n") {
        let Some((header_name, value)) = header.split_once(':') else {
            continue;
        };
        match header_name.trim().to_lowercase().as_str() {
            "content-disposition" => {
                let hv = HeaderVal::parse(value);
                if hv.value == "form-data" {
                    name = hv.param("name").unwrap_or_default();
                    filename = hv.param("filename").filter(|f| !f.is_empty());
                }
            }
            "content-type" => content_type = Some(HeaderVal::parse(value).value),
            _ => {}
        }
    }
    Some(FormField {
        name,
        value: String::from_utf8_lossy(contents).to_string(),
        filename,
        content_type,
    })
}
