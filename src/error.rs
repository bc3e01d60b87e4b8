//! The rhino error type and the HTTP exception taxonomy.
//!

use crate::http::{reason_phrase, HttpStatus};
use crate::response::Response;
use std::fmt::{self, Display, Formatter};

/// Rhino's error type.
///
/// [`Template`](#variant.Template) and [`Argument`](#variant.Argument)
/// errors are programming errors and propagate to the caller; they are
/// never converted into a response. [`Http`](#variant.Http) errors carry a
/// canonical response and are caught once, at the mapper's server boundary.
/// Everything else becomes a generic `500` there.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// A URL template violates the template grammar. Raised when routes are
    /// added, never during request handling.
    ///
    Template(String),

    /// A URL could not be built from the given arguments, or a route or
    /// target could not be resolved.
    ///
    Argument(String),

    /// An HTTP exception with a canonical response.
    ///
    Http(HttpError),

    /// Unspecified error.
    ///
    Other(String),
}

impl Error {
    /// Create an `Error::Template`.
    ///
    pub fn template<T: Display>(text: T) -> Self {
        Self::Template(text.to_string())
    }

    /// Create an `Error::Argument`.
    ///
    pub fn argument<T: Display>(text: T) -> Self {
        Self::Argument(text.to_string())
    }

    /// Create an `Error::Other`.
    ///
    pub fn other<T: Display>(text: T) -> Self {
        Self::Other(text.to_string())
    }

    /// The status code if the variant is [`Http`](#variant.Http).
    ///
    pub fn status(&self) -> Option<HttpStatus> {
        match self {
            Self::Http(e) => Some(e.status),
            _ => None,
        }
    }
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Template(text) => write!(f, "template error: {}", text),
            Self::Argument(text) => write!(f, "argument error: {}", text),
            Self::Http(e) => write!(f, "{}", e),
            Self::Other(text) => write!(f, "{}", text),
        }
    }
}

/// Create an `Error::Other`.
///
impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Self::Other(err.to_string())
    }
}

/// Create an `Error::Other`.
///
impl From<String> for Error {
    fn from(err: String) -> Self {
        Self::Other(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Other(err.to_string())
    }
}

impl From<HttpError> for Error {
    fn from(err: HttpError) -> Self {
        Self::Http(err)
    }
}

// --- HttpError -------------------------------------------------------------

// Default HTML error page, inspired by Django.
const HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <title>{status}</title>
    <style type="text/css">
      html { font-family: sans-serif; font-size: small; color: #333; }
      html, body { margin: 0; padding: 0; }
      body > * { margin: 0; padding: 10px; }
      h1 { font-size: 180%; font-weight: normal; background: wheat; border-bottom: 1px solid #ccc; }
      h1 small { font-size: 60%; color: #777; }
      p { background: #eee; border-bottom: 1px solid #ccc; }
      p + p { background: #fff; border: 0; }
    </style>
  </head>
  <body>
    <h1>{status} <small>({code})</small></h1>
    <p>{message}</p>
    <p>{details}</p>
  </body>
</html>
"#;

/// An HTTP exception.
///
/// Carries a status code and produces a canonical pre-built response. When
/// a message is present, the response body is an HTML error page with the
/// message HTML-escaped.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HttpError {
    status: HttpStatus,
    headers: Vec<(String, String)>,
    message: Option<String>,
    details: Option<String>,
}

impl HttpError {
    fn new(status: HttpStatus, message: Option<&str>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            message: message.map(|m| m.to_string()),
            details: None,
        }
    }

    /// 301 Moved Permanently. `location` populates the `Location` header.
    ///
    pub fn moved_permanently(location: &str) -> Self {
        Self::new(HttpStatus::MovedPermanently, None).header("Location", location)
    }

    /// 302 Found. `location` populates the `Location` header.
    ///
    pub fn found(location: &str) -> Self {
        Self::new(HttpStatus::Found, None).header("Location", location)
    }

    /// 303 See Other. `location` populates the `Location` header.
    ///
    pub fn see_other(location: &str) -> Self {
        Self::new(HttpStatus::SeeOther, None).header("Location", location)
    }

    /// 307 Temporary Redirect. `location` populates the `Location` header.
    ///
    pub fn temporary_redirect(location: &str) -> Self {
        Self::new(HttpStatus::TemporaryRedirect, None)
            .header("Location", location)
    }

    /// 400 Bad Request.
    ///
    pub fn bad_request() -> Self {
        Self::new(
            HttpStatus::BadRequest,
            Some("The server could not understand the request."),
        )
    }

    /// 401 Unauthorized.
    ///
    /// `scheme` is the authentication scheme, e.g. `"Basic"`; `params` are
    /// rendered into the `WWW-Authenticate` header, e.g.
    /// `realm="my website"`.
    ///
    pub fn unauthorized(scheme: &str, params: &[(&str, &str)]) -> Self {
        let mut params: Vec<_> = params.to_vec();
        params.sort();
        let param_str = params
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, v))
            .collect::<Vec<_>>()
            .join(", ");
        Self::new(HttpStatus::Unauthorized, None).header(
            "WWW-Authenticate",
            &format!("{} {}", scheme, param_str),
        )
    }

    /// 403 Forbidden.
    ///
    pub fn forbidden() -> Self {
        Self::new(
            HttpStatus::Forbidden,
            Some("The server is refusing to fulfill the request."),
        )
    }

    /// 404 Not Found.
    ///
    pub fn not_found() -> Self {
        Self::new(
            HttpStatus::NotFound,
            Some("The requested resource could not be found."),
        )
    }

    /// 405 Method Not Allowed.
    ///
    /// `allow` is the value for the `Allow` header, a list of
    /// comma-separated HTTP method names.
    ///
    pub fn method_not_allowed(allow: &str) -> Self {
        Self::new(
            HttpStatus::MethodNotAllowed,
            Some("The request method is not allowed for this resource."),
        )
        .header("Allow", allow)
    }

    /// 406 Not Acceptable.
    ///
    pub fn not_acceptable() -> Self {
        Self::new(
            HttpStatus::NotAcceptable,
            Some(
                "The resource is not capable of generating a response \
                 entity in an acceptable format.",
            ),
        )
    }

    /// 410 Gone.
    ///
    pub fn gone() -> Self {
        let mut e = Self::new(
            HttpStatus::Gone,
            Some("The requested resource is no longer available."),
        );
        e.details = Some(
            r#"<q style="font-style: italic; quotes: none;">Embracing HTTP
            error code 410 means embracing the impermanence of all
            things.</q> &mdash; Mark Pilgrim"#
                .to_string(),
        );
        e
    }

    /// 415 Unsupported Media Type.
    ///
    pub fn unsupported_media_type() -> Self {
        Self::new(
            HttpStatus::UnsupportedMediaType,
            Some(
                "The request entity is in a format that is not supported \
                 by this resource.",
            ),
        )
    }

    /// 500 Internal Server Error.
    ///
    pub fn internal_server_error() -> Self {
        Self::new(
            HttpStatus::InternalServerError,
            Some("The server encountered an error while processing the request."),
        )
    }

    /// Replace the default message.
    ///
    pub fn message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }

    /// Add a header to the canonical response.
    ///
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Replace any headers with `name`, case insensitive.
    ///
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers
            .retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
    }

    /// The value of the first header with `name`, case insensitive.
    ///
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn status(&self) -> HttpStatus {
        self.status
    }

    /// Build the canonical response.
    ///
    pub fn response(&self) -> Response {
        let mut response = match &self.message {
            Some(message) => {
                let body = HTML_TEMPLATE
                    .replace("{status}", self.status.reason())
                    .replace("{code}", &self.status.code().to_string())
                    .replace(
                        "{message}",
                        &v_htmlescape::escape(message).to_string(),
                    )
                    .replace(
                        "{details}",
                        self.details.as_deref().unwrap_or(""),
                    );
                Response::with_body(self.status, body)
                    .set_header("Content-Type", "text/html")
            }
            None => Response::new(self.status),
        };
        for (name, value) in &self.headers {
            response.headers.add(name, value);
        }
        response
    }
}

impl Display for HttpError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{} {}", self.status.code(), reason_phrase(self.status.code()))?;
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}
