//! HTTP protocol vocabulary: request methods, status codes, HTTP-dates,
//! entity tags, and small header-value helpers.
//!

use crate::Error;
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::OnceLock;

// --- Method ----------------------------------------------------------------

/// An HTTP request method.
///
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
        }
    }
}

impl FromStr for Method {
    type Err = Error;

    /// Case insensitive.
    ///
    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "HEAD" => Ok(Self::Head),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            "OPTIONS" => Ok(Self::Options),
            _ => Err(Error::other(format!("unknown request method '{}'", s))),
        }
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// --- HttpStatus ------------------------------------------------------------

/// The HTTP status codes as an `enum` that can be cast to the corresponding
/// integer:
/// ```
/// assert_eq!(rhino::HttpStatus::Ok as u16, 200u16);
/// assert_eq!(rhino::HttpStatus::Ok.to_string(), "200 OK");
/// ```
/// It also implements `TryFrom<u16>`.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HttpStatus {
    Continue = 100,
    SwitchingProtocols = 101,
    Ok = 200,
    Created = 201,
    Accepted = 202,
    NonAuthoritativeInformation = 203,
    NoContent = 204,
    ResetContent = 205,
    PartialContent = 206,
    MultipleChoices = 300,
    MovedPermanently = 301,
    Found = 302,
    SeeOther = 303,
    NotModified = 304,
    UseProxy = 305,
    TemporaryRedirect = 307,
    PermanentRedirect = 308,
    BadRequest = 400,
    Unauthorized = 401,
    PaymentRequired = 402,
    Forbidden = 403,
    NotFound = 404,
    MethodNotAllowed = 405,
    NotAcceptable = 406,
    ProxyAuthenticationRequired = 407,
    RequestTimeout = 408,
    Conflict = 409,
    Gone = 410,
    LengthRequired = 411,
    PreconditionFailed = 412,
    RequestEntityTooLarge = 413,
    RequestUriTooLong = 414,
    UnsupportedMediaType = 415,
    RequestedRangeNotSatisfiable = 416,
    ExpectationFailed = 417,
    MisdirectedRequest = 421,
    UnprocessableEntity = 422,
    TooManyRequests = 429,
    InternalServerError = 500,
    NotImplemented = 501,
    BadGateway = 502,
    ServiceUnavailable = 503,
    GatewayTimeout = 504,
    HttpVersionNotSupported = 505,
}

impl HttpStatus {
    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// The canonical reason phrase.
    ///
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Continue => "Continue",
            Self::SwitchingProtocols => "Switching Protocols",
            Self::Ok => "OK",
            Self::Created => "Created",
            Self::Accepted => "Accepted",
            Self::NonAuthoritativeInformation => {
                "Non-Authoritative Information"
            }
            Self::NoContent => "No Content",
            Self::ResetContent => "Reset Content",
            Self::PartialContent => "Partial Content",
            Self::MultipleChoices => "Multiple Choices",
            Self::MovedPermanently => "Moved Permanently",
            Self::Found => "Found",
            Self::SeeOther => "See Other",
            Self::NotModified => "Not Modified",
            Self::UseProxy => "Use Proxy",
            Self::TemporaryRedirect => "Temporary Redirect",
            Self::PermanentRedirect => "Permanent Redirect",
            Self::BadRequest => "Bad Request",
            Self::Unauthorized => "Unauthorized",
            Self::PaymentRequired => "Payment Required",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "Not Found",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::NotAcceptable => "Not Acceptable",
            Self::ProxyAuthenticationRequired => {
                "Proxy Authentication Required"
            }
            Self::RequestTimeout => "Request Timeout",
            Self::Conflict => "Conflict",
            Self::Gone => "Gone",
            Self::LengthRequired => "Length Required",
            Self::PreconditionFailed => "Precondition Failed",
            Self::RequestEntityTooLarge => "Request Entity Too Large",
            Self::RequestUriTooLong => "Request-URI Too Long",
            Self::UnsupportedMediaType => "Unsupported Media Type",
            Self::RequestedRangeNotSatisfiable => {
                "Requested Range Not Satisfiable"
            }
            Self::ExpectationFailed => "Expectation Failed",
            Self::MisdirectedRequest => "Misdirected Request",
            Self::UnprocessableEntity => "Unprocessable Entity",
            Self::TooManyRequests => "Too Many Requests",
            Self::InternalServerError => "Internal Server Error",
            Self::NotImplemented => "Not Implemented",
            Self::BadGateway => "Bad Gateway",
            Self::ServiceUnavailable => "Service Unavailable",
            Self::GatewayTimeout => "Gateway Timeout",
            Self::HttpVersionNotSupported => "HTTP Version Not Supported",
        }
    }
}

impl TryFrom<u16> for HttpStatus {
    type Error = Error;

    fn try_from(code: u16) -> Result<Self, Error> {
        let status = match code {
            100 => Self::Continue,
            101 => Self::SwitchingProtocols,
            200 => Self::Ok,
            201 => Self::Created,
            202 => Self::Accepted,
            203 => Self::NonAuthoritativeInformation,
            204 => Self::NoContent,
            205 => Self::ResetContent,
            206 => Self::PartialContent,
            300 => Self::MultipleChoices,
            301 => Self::MovedPermanently,
            302 => Self::Found,
            303 => Self::SeeOther,
            304 => Self::NotModified,
            305 => Self::UseProxy,
            307 => Self::TemporaryRedirect,
            308 => Self::PermanentRedirect,
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            402 => Self::PaymentRequired,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            405 => Self::MethodNotAllowed,
            406 => Self::NotAcceptable,
            407 => Self::ProxyAuthenticationRequired,
            408 => Self::RequestTimeout,
            409 => Self::Conflict,
            410 => Self::Gone,
            411 => Self::LengthRequired,
            412 => Self::PreconditionFailed,
            413 => Self::RequestEntityTooLarge,
            414 => Self::RequestUriTooLong,
            415 => Self::UnsupportedMediaType,
            416 => Self::RequestedRangeNotSatisfiable,
            417 => Self::ExpectationFailed,
            421 => Self::MisdirectedRequest,
            422 => Self::UnprocessableEntity,
            429 => Self::TooManyRequests,
            500 => Self::InternalServerError,
            501 => Self::NotImplemented,
            502 => Self::BadGateway,
            503 => Self::ServiceUnavailable,
            504 => Self::GatewayTimeout,
            505 => Self::HttpVersionNotSupported,
            _ => {
                return Err(Error::other(format!(
                    "unknown status code {}",
                    code
                )))
            }
        };
        Ok(status)
    }
}

impl Display for HttpStatus {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.reason())
    }
}

/// The canonical reason phrase for `code`, or `"Unknown"`.
///
pub fn reason_phrase(code: u16) -> &'static str {
    HttpStatus::try_from(code)
        .map(|s| s.reason())
        .unwrap_or("Unknown")
}

// --- HTTP-dates ------------------------------------------------------------

const HTTPDATE_FMT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Convert a Unix timestamp to an HTTP-date (RFC 1123 format).
///
pub fn timestamp_to_httpdate(timestamp: i64) -> String {
    match Utc.timestamp_opt(timestamp, 0).single() {
        Some(dt) => dt.format(HTTPDATE_FMT).to_string(),
        None => Utc
            .timestamp_opt(0, 0)
            .single()
            .map(|dt| dt.format(HTTPDATE_FMT).to_string())
            .unwrap_or_default(),
    }
}

/// Convert a `chrono` datetime to an HTTP-date.
///
pub fn datetime_to_httpdate(dt: DateTime<Utc>) -> String {
    timestamp_to_httpdate(dt.timestamp())
}

/// Convert an HTTP-date to a Unix timestamp.
///
/// Accepts the RFC 1123 format as well as the obsolete RFC 850 and asctime
/// formats.
///
pub fn httpdate_to_timestamp(s: &str) -> Result<i64, Error> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Ok(dt.timestamp());
    }
    for fmt in ["%A, %d-%b-%y %H:%M:%S GMT", "%a %b %e %H:%M:%S %Y"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc().timestamp());
        }
    }
    Err(Error::other(format!("not an HTTP-date: '{}'", s)))
}

// --- Entity tags -----------------------------------------------------------

/// A parsed `If-None-Match` (or `If-Match`) header value.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EtagHeader {
    /// The wildcard `*`, which matches any entity tag.
    Star,
    /// `(weak, tag)` pairs. `tag` is the quoted string with any weak prefix
    /// stripped off.
    Tags(Vec<(bool, String)>),
}

fn etag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // The "unrolled" quoted-string is faster by about a factor of 2.
    RE.get_or_init(|| {
        Regex::new(r#"([Ww]/)?("[^"\\]*(?:\\.[^\\"]*)*")"#).unwrap()
    })
}

fn etag_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"^(?:(\*)|(?:(?:[Ww]/)?"[^"\\]*(?:\\.[^\\"]*)*"(?:\s*,\s*|$))+)$"#,
        )
        .unwrap()
    })
}

/// Parse a header containing one or more entity tags or a wildcard (`*`).
///
/// Returns [`EtagHeader::Tags`] with an empty list if the header could not
/// be parsed.
/// ```
/// use rhino::http::{parse_etag_header, EtagHeader};
///
/// assert_eq!(parse_etag_header("*"), EtagHeader::Star);
/// assert_eq!(
///     parse_etag_header(r#""foo", W/"bar""#),
///     EtagHeader::Tags(vec![
///         (false, r#""foo""#.to_string()),
///         (true, r#""bar""#.to_string()),
///     ]),
/// );
/// assert_eq!(parse_etag_header("invalid"), EtagHeader::Tags(vec![]));
/// ```
pub fn parse_etag_header(header: &str) -> EtagHeader {
    let header = header.trim();
    match etag_header_re().captures(header) {
        None => EtagHeader::Tags(Vec::new()),
        Some(caps) => {
            if caps.get(1).is_some() {
                EtagHeader::Star
            } else {
                EtagHeader::Tags(
                    etag_re()
                        .captures_iter(header)
                        .filter_map(|c| {
                            c.get(2).map(|tag| {
                                (c.get(1).is_some(), tag.as_str().to_string())
                            })
                        })
                        .collect(),
                )
            }
        }
    }
}

/// Try to match an entity tag against a header value.
///
/// If `weak` is `true`, uses the weak comparison function. A malformed
/// `etag` never matches.
///
pub fn match_etag(etag: &str, header: &str, weak: bool) -> bool {
    let caps = match etag_re().captures(etag.trim()) {
        Some(caps) if caps.get(0).map(|m| m.as_str().len()) == Some(etag.trim().len()) => caps,
        _ => return false,
    };
    let is_weak = caps.get(1).is_some();
    let tag = match caps.get(2) {
        Some(m) => m.as_str(),
        None => return false,
    };
    match parse_etag_header(header) {
        EtagHeader::Star => true,
        EtagHeader::Tags(_) if is_weak && !weak => false,
        EtagHeader::Tags(tags) => tags
            .iter()
            .any(|(tag_weak, t)| (weak || !tag_weak) && t == tag),
    }
}

// --- Cache-Control ---------------------------------------------------------

/// Generate the value for a `Cache-Control` header.
/// ```
/// use rhino::http::CacheControl;
///
/// let value = CacheControl::new()
///     .public()
///     .max_age(chrono::Duration::hours(1))
///     .value()
///     .unwrap();
/// assert_eq!(value, "public, max-age=3600");
/// ```
#[derive(Clone, Debug, Default)]
pub struct CacheControl {
    public: bool,
    private: bool,
    max_age: Option<i64>,
    s_maxage: Option<i64>,
    no_cache: bool,
    no_store: bool,
    must_revalidate: bool,
    proxy_revalidate: bool,
}

impl CacheControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn public(mut self) -> Self {
        self.public = true;
        self
    }

    pub fn private(mut self) -> Self {
        self.private = true;
        self
    }

    pub fn max_age(mut self, d: Duration) -> Self {
        self.max_age = Some(d.num_seconds());
        self
    }

    pub fn max_age_seconds(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn s_maxage(mut self, d: Duration) -> Self {
        self.s_maxage = Some(d.num_seconds());
        self
    }

    pub fn no_cache(mut self) -> Self {
        self.no_cache = true;
        self
    }

    pub fn no_store(mut self) -> Self {
        self.no_store = true;
        self
    }

    pub fn must_revalidate(mut self) -> Self {
        self.must_revalidate = true;
        self
    }

    pub fn proxy_revalidate(mut self) -> Self {
        self.proxy_revalidate = true;
        self
    }

    /// Render the header value.
    ///
    /// `private` and `public` are mutually exclusive.
    ///
    pub fn value(&self) -> Result<String, Error> {
        if self.public && self.private {
            return Err(Error::argument(
                "'private' and 'public' are mutually exclusive",
            ));
        }
        let mut directives = Vec::new();
        if self.public {
            directives.push("public".to_string());
        }
        if self.private {
            directives.push("private".to_string());
        }
        if let Some(age) = self.max_age {
            directives.push(format!("max-age={}", age));
        }
        if let Some(age) = self.s_maxage {
            directives.push(format!("s-maxage={}", age));
        }
        if self.no_cache {
            directives.push("no-cache".to_string());
        }
        if self.no_store {
            directives.push("no-store".to_string());
        }
        if self.must_revalidate {
            directives.push("must-revalidate".to_string());
        }
        if self.proxy_revalidate {
            directives.push("proxy-revalidate".to_string());
        }
        Ok(directives.join(", "))
    }
}

// --- Server-sent events ----------------------------------------------------

/// Encode a Server-Sent Event (SSE).
///
/// At least one field must be present. The `event` and `id` fields can not
/// contain newlines.
///
#[derive(Clone, Debug, Default)]
pub struct SseEvent {
    event: Option<String>,
    data: Option<String>,
    id: Option<String>,
    retry: Option<u64>,
    comment: Option<String>,
}

fn sse_encode(key: &str, value: &str) -> String {
    // Append an unambiguous newline so that the presence or absence of a
    // trailing newline in the input is preserved by lines().
    let value = value.to_string() + "\r\n";
    value
        .lines()
        .map(|line| format!("{}: {}\n", key, line))
        .collect()
}

impl SseEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event(mut self, event: &str) -> Self {
        self.event = Some(event.to_string());
        self
    }

    pub fn data(mut self, data: &str) -> Self {
        self.data = Some(data.to_string());
        self
    }

    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn retry(mut self, retry: u64) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string());
        self
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        if self.event.is_none()
            && self.data.is_none()
            && self.id.is_none()
            && self.retry.is_none()
            && self.comment.is_none()
        {
            return Err(Error::argument("event must have at least one field"));
        }
        for (name, value) in
            [("event", &self.event), ("id", &self.id)]
        {
            if let Some(v) = value {
                if v.contains('\r') || v.contains('\n') {
                    return Err(Error::argument(format!(
                        "'{}' can not contain newlines: '{}'",
                        name, v
                    )));
                }
            }
        }
        let mut out = String::new();
        if let Some(c) = &self.comment {
            out += &sse_encode("", c);
        }
        if let Some(id) = &self.id {
            out += &sse_encode("id", id);
        }
        if let Some(event) = &self.event {
            out += &sse_encode("event", event);
        }
        if let Some(retry) = self.retry {
            out += &sse_encode("retry", &retry.to_string());
        }
        if let Some(data) = &self.data {
            out += &sse_encode("data", data);
        }
        out.push('\n');
        Ok(out.into_bytes())
    }
}

// --- Header values ---------------------------------------------------------

/// The part after the `':'` in an HTTP header, structured as a value
/// followed by `; name=value` parameters.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HeaderVal {
    /// The text before the first `;`.
    pub value: String,
    /// `(`lowercase name`, `value`)` pairs from `; name=value` sequences.
    pub params: Vec<(String, String)>,
}

impl HeaderVal {
    /// Partition a header value, unfolding folded lines first.
    ///
    pub fn parse(val_pars: &str) -> Self {
        static FOLDEX: OnceLock<Regex> = OnceLock::new();
        let foldex =
            FOLDEX.get_or_init(|| Regex::new(r"\r\n\s+").unwrap());
        let val_pars = foldex.replace_all(val_pars, " ").trim().to_string();
        let mut parts = val_pars.split(';');
        let value = parts.next().unwrap_or("").trim().to_string();
        let mut params = Vec::new();
        for nam_val in parts {
            let mut nam_val = nam_val.trim().splitn(2, '=');
            let nam =
                nam_val.next().unwrap_or("").trim().to_lowercase();
            if nam.is_empty() {
                continue;
            }
            params.push((
                nam,
                nam_val.next().map(|v| v.trim().to_string()).unwrap_or_default(),
            ));
        }
        Self { value, params }
    }

    /// Get the parameter with name `name`, unquoting a quoted value.
    ///
    pub fn param(&self, name: &str) -> Option<String> {
        let name = name.to_lowercase();
        self.params.iter().find(|(n, _)| *n == name).map(|(_, v)| {
            let b = v.as_bytes();
            if b.len() >= 2 && b[0] == b'"' && b[b.len() - 1] == b'"' {
                v[1..v.len() - 1].to_string()
            } else {
                v.clone()
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_phrases() {
        assert_eq!(reason_phrase(200), "OK");
        assert_eq!(reason_phrase(404), "Not Found");
        assert_eq!(reason_phrase(599), "Unknown");
    }

    #[test]
    fn test_httpdate_round_trip() {
        let date = "Sun, 06 Nov 1994 08:49:37 GMT";
        let ts = httpdate_to_timestamp(date).unwrap();
        assert_eq!(ts, 784111777);
        assert_eq!(timestamp_to_httpdate(ts), date);
    }

    #[test]
    fn test_httpdate_obsolete_formats() {
        let ts = 784111777;
        assert_eq!(
            httpdate_to_timestamp("Sunday, 06-Nov-94 08:49:37 GMT").unwrap(),
            ts,
        );
        assert_eq!(
            httpdate_to_timestamp("Sun Nov  6 08:49:37 1994").unwrap(),
            ts,
        );
        assert!(httpdate_to_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_parse_etag_header() {
        assert_eq!(parse_etag_header("*"), EtagHeader::Star);
        assert_eq!(
            parse_etag_header(r#""foo"  "#),
            EtagHeader::Tags(vec![(false, r#""foo""#.to_string())]),
        );
        assert_eq!(
            parse_etag_header(r#""foo", w/"bar", W/"baz""#),
            EtagHeader::Tags(vec![
                (false, r#""foo""#.to_string()),
                (true, r#""bar""#.to_string()),
                (true, r#""baz""#.to_string()),
            ]),
        );
        assert_eq!(parse_etag_header("invalid"), EtagHeader::Tags(vec![]));
    }

    #[test]
    fn test_match_etag() {
        assert!(match_etag(r#""foo""#, "*", false));
        assert!(match_etag(r#""foo""#, r#""foo", "bar""#, false));
        assert!(!match_etag(r#""foo""#, r#"W/"foo""#, false));
        assert!(match_etag(r#""foo""#, r#"W/"foo""#, true));
        assert!(!match_etag(r#"W/"foo""#, r#""foo""#, false));
        assert!(match_etag(r#"W/"foo""#, r#""foo""#, true));
        assert!(!match_etag("unquoted", r#""unquoted""#, true));
    }

    #[test]
    fn test_cache_control_exclusive() {
        assert!(CacheControl::new().public().private().value().is_err());
        assert_eq!(
            CacheControl::new()
                .private()
                .no_cache()
                .no_store()
                .value()
                .unwrap(),
            "private, no-cache, no-store",
        );
    }

    #[test]
    fn test_sse_event() {
        let encoded = SseEvent::new()
            .id("1")
            .event("greeting")
            .data("hello\nworld")
            .encode()
            .unwrap();
        assert_eq!(
            String::from_utf8(encoded).unwrap(),
            "id: 1\nevent: greeting\ndata: hello\ndata: world\n\n",
        );
        assert!(SseEvent::new().encode().is_err());
        assert!(SseEvent::new().event("a\nb").encode().is_err());
    }

    #[test]
    fn test_header_val() {
        let hv = HeaderVal::parse(
            "\t value; \n p1=foo ;P2 ;p3=\"bar   \" ",
        );
        assert_eq!(hv.value, "value");
        assert_eq!(hv.param("p1").unwrap(), "foo");
        assert_eq!(hv.param("p2").unwrap(), "");
        assert_eq!(hv.param("p3").unwrap(), "bar   ");
        assert_eq!(hv.param("p4"), None);
    }
}
