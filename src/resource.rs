//! REST resources: per-resource handler tables, verb and view resolution,
//! and media-type content negotiation.
//!

use crate::context::Context;
use crate::http::{HttpStatus, Method};
use crate::mapper::PathBuilder;
use crate::mime::{self, MediaRange, NO_MATCH};
use crate::request::{BodyReader, Request};
use crate::response::{Body, BodyWriter, IntoResponse, Response};
use crate::{Error, HttpError};
use itertools::Itertools;
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

const VIEW_SEPARATOR: char = ';';

/// The uniform shape handlers are stored in. Registration accepts any
/// closure returning a `Result` of something that converts into a
/// response.
///
pub type HandlerFn = Arc<
    dyn Fn(
            &mut Request,
            &mut Context,
            &HashMap<String, String>,
        ) -> Result<Response, Error>
        + Send
        + Sync,
>;

/// Filters the routing parameters before they are passed to a handler.
///
pub type UrlArgsFilter = Arc<
    dyn Fn(
            &mut Request,
            HashMap<String, String>,
        ) -> Result<HashMap<String, String>, Error>
        + Send
        + Sync,
>;

/// A resource's override for URL construction. Receives the route's
/// template builder and the named parameters.
///
pub type MakeUrlFn = Arc<
    dyn Fn(&PathBuilder, &HashMap<String, String>) -> Result<String, Error>
        + Send
        + Sync,
>;

// --- HandlerSpec -----------------------------------------------------------

/// Metadata for one handler registration: the verb, an optional view
/// name, the accepted media range, the provided media type, and optional
/// body transformers.
///
/// `accepts` and `consumes` are mutually exclusive, as are `provides` and
/// `produces`.
///
#[derive(Clone)]
pub struct HandlerSpec {
    verb: Method,
    view: Option<String>,
    accepts: Option<String>,
    provides: Option<String>,
    consumes: Option<(String, BodyReader)>,
    produces: Option<(String, BodyWriter)>,
}

impl HandlerSpec {
    pub fn new(verb: Method) -> Self {
        Self {
            verb,
            view: None,
            accepts: None,
            provides: None,
            consumes: None,
            produces: None,
        }
    }

    /// Attach the handler to a view. Selected via a `;`-suffix on the
    /// matched route's name.
    ///
    pub fn view(mut self, name: &str) -> Self {
        self.view = Some(name.to_string());
        self
    }

    /// The media range this handler accepts as request `Content-Type`.
    ///
    pub fn accepts(mut self, media_range: &str) -> Self {
        self.accepts = Some(media_range.to_string());
        self
    }

    /// The media type this handler provides, matched against the request
    /// `Accept` header and set as the response `Content-Type` if unset.
    ///
    pub fn provides(mut self, media_type: &str) -> Self {
        self.provides = Some(media_type.to_string());
        self
    }

    /// Like [`accepts`](#method.accepts), plus a deserializer that is
    /// installed as the request-body reader when this handler is chosen.
    ///
    pub fn consumes<F>(mut self, media_range: &str, deserialize: F) -> Self
    where
        F: Fn(&[u8]) -> Result<JsonValue, Error> + Send + Sync + 'static,
    {
        self.consumes =
            Some((media_range.to_string(), Arc::new(deserialize)));
        self
    }

    /// Like [`provides`](#method.provides), plus a serializer that is
    /// installed as the response-body writer when this handler is chosen.
    ///
    pub fn produces<F>(mut self, media_type: &str, serialize: F) -> Self
    where
        F: Fn(JsonValue) -> Result<Body, Error> + Send + Sync + 'static,
    {
        self.produces = Some((media_type.to_string(), Arc::new(serialize)));
        self
    }

    fn build(self) -> Result<HandlerMeta, Error> {
        if self.accepts.is_some() && self.consumes.is_some() {
            return Err(Error::argument(
                "accepts and consumes are mutually exclusive",
            ));
        }
        if self.provides.is_some() && self.produces.is_some() {
            return Err(Error::argument(
                "provides and produces are mutually exclusive",
            ));
        }
        if let Some(view) = &self.view {
            if view.contains(VIEW_SEPARATOR) {
                return Err(Error::argument(format!(
                    "view name cannot contain '{}': {}",
                    VIEW_SEPARATOR, view
                )));
            }
        }
        let (accepts, deserializer) = match self.consumes {
            Some((media_range, deserialize)) => {
                (media_range, Some(deserialize))
            }
            None => (
                self.accepts.unwrap_or_else(|| "*/*".to_string()),
                None,
            ),
        };
        let (provides, serializer) = match self.produces {
            Some((media_type, serialize)) => {
                (Some(media_type), Some(serialize))
            }
            None => (self.provides, None),
        };
        Ok(HandlerMeta {
            verb: self.verb,
            view: self.view,
            accepts,
            provides,
            deserializer,
            serializer,
        })
    }
}

/// Mark a handler spec for `GET` requests.
///
pub fn get() -> HandlerSpec {
    HandlerSpec::new(Method::Get)
}

/// Mark a handler spec for `POST` requests.
///
pub fn post() -> HandlerSpec {
    HandlerSpec::new(Method::Post)
}

/// Mark a handler spec for `PUT` requests.
///
pub fn put() -> HandlerSpec {
    HandlerSpec::new(Method::Put)
}

/// Mark a handler spec for `DELETE` requests.
///
pub fn delete() -> HandlerSpec {
    HandlerSpec::new(Method::Delete)
}

/// Mark a handler spec for `PATCH` requests.
///
pub fn patch() -> HandlerSpec {
    HandlerSpec::new(Method::Patch)
}

/// Mark a handler spec for `OPTIONS` requests.
///
pub fn options() -> HandlerSpec {
    HandlerSpec::new(Method::Options)
}

#[derive(Clone)]
struct HandlerMeta {
    verb: Method,
    view: Option<String>,
    accepts: String,
    provides: Option<String>,
    deserializer: Option<BodyReader>,
    serializer: Option<BodyWriter>,
}

struct HandlerEntry {
    meta: HandlerMeta,
    f: HandlerFn,
}

// --- Resource --------------------------------------------------------------

/// Represents a REST resource: a table of `(view, verb)` → handlers with
/// content negotiation.
///
/// Handlers are added through a registration step and the table is
/// immutable once the resource is routed to:
///
/// ```
/// use rhino::{resource, Resource};
///
/// let mut greeting = Resource::new();
/// greeting.get(|_req, _ctx, _args| Ok("hello"));
/// greeting
///     .add(
///         resource::get().provides("text/html"),
///         |_req, _ctx, _args| Ok("<p>hello</p>"),
///     )
///     .unwrap();
/// ```
///
#[derive(Default)]
pub struct Resource {
    handlers: HashMap<Option<String>, HashMap<Method, Vec<HandlerEntry>>>,
    from_url: Option<UrlArgsFilter>,
    make_url: Option<MakeUrlFn>,
}

impl Resource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a handler for a full [`HandlerSpec`](struct.HandlerSpec.html).
    ///
    /// One callable may be added several times under different specs.
    ///
    pub fn add<F, R>(&mut self, spec: HandlerSpec, f: F) -> Result<&mut Self, Error>
    where
        F: Fn(
                &mut Request,
                &mut Context,
                &HashMap<String, String>,
            ) -> Result<R, Error>
            + Send
            + Sync
            + 'static,
        R: IntoResponse,
    {
        let meta = spec.build()?;
        self.push(meta, wrap(f));
        Ok(self)
    }

    /// Install a handler for `GET` requests.
    ///
    pub fn get<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(
                &mut Request,
                &mut Context,
                &HashMap<String, String>,
            ) -> Result<R, Error>
            + Send
            + Sync
            + 'static,
        R: IntoResponse,
    {
        self.route(Method::Get, f)
    }

    /// Install a handler for `POST` requests.
    ///
    pub fn post<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(
                &mut Request,
                &mut Context,
                &HashMap<String, String>,
            ) -> Result<R, Error>
            + Send
            + Sync
            + 'static,
        R: IntoResponse,
    {
        self.route(Method::Post, f)
    }

    /// Install a handler for `PUT` requests.
    ///
    pub fn put<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(
                &mut Request,
                &mut Context,
                &HashMap<String, String>,
            ) -> Result<R, Error>
            + Send
            + Sync
            + 'static,
        R: IntoResponse,
    {
        self.route(Method::Put, f)
    }

    /// Install a handler for `DELETE` requests.
    ///
    pub fn delete<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(
                &mut Request,
                &mut Context,
                &HashMap<String, String>,
            ) -> Result<R, Error>
            + Send
            + Sync
            + 'static,
        R: IntoResponse,
    {
        self.route(Method::Delete, f)
    }

    /// Install a handler for `PATCH` requests.
    ///
    pub fn patch<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(
                &mut Request,
                &mut Context,
                &HashMap<String, String>,
            ) -> Result<R, Error>
            + Send
            + Sync
            + 'static,
        R: IntoResponse,
    {
        self.route(Method::Patch, f)
    }

    /// Install a handler for `OPTIONS` requests.
    ///
    pub fn options<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(
                &mut Request,
                &mut Context,
                &HashMap<String, String>,
            ) -> Result<R, Error>
            + Send
            + Sync
            + 'static,
        R: IntoResponse,
    {
        self.route(Method::Options, f)
    }

    fn route<F, R>(&mut self, verb: Method, f: F) -> &mut Self
    where
        F: Fn(
                &mut Request,
                &mut Context,
                &HashMap<String, String>,
            ) -> Result<R, Error>
            + Send
            + Sync
            + 'static,
        R: IntoResponse,
    {
        let meta = HandlerMeta {
            verb,
            view: None,
            accepts: "*/*".to_string(),
            provides: None,
            deserializer: None,
            serializer: None,
        };
        self.push(meta, wrap(f));
        self
    }

    fn push(&mut self, meta: HandlerMeta, f: HandlerFn) {
        self.handlers
            .entry(meta.view.clone())
            .or_default()
            .entry(meta.verb)
            .or_default()
            .push(HandlerEntry { meta, f });
    }

    /// Install a filter for URL parameters, called before any handler with
    /// the routing parameters; its return value is what the handler sees.
    ///
    pub fn from_url<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(
                &mut Request,
                HashMap<String, String>,
            ) -> Result<HashMap<String, String>, Error>
            + Send
            + Sync
            + 'static,
    {
        self.from_url = Some(Arc::new(f));
        self
    }

    /// Install an override for URL construction. Routes bound to this
    /// resource call it with the template builder and the named
    /// parameters instead of building the path themselves.
    ///
    pub fn make_url<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&PathBuilder, &HashMap<String, String>) -> Result<String, Error>
            + Send
            + Sync
            + 'static,
    {
        self.make_url = Some(Arc::new(f));
        self
    }

    pub(crate) fn make_url_fn(&self) -> Option<&MakeUrlFn> {
        self.make_url.as_ref()
    }

    /// Dispatch a request to the matching handler.
    ///
    pub(crate) fn call(
        &self,
        request: &mut Request,
        ctx: &mut Context,
    ) -> Result<Response, Error> {
        let (entry, vary) = match self.resolve(request) {
            Ok(resolved) => resolved,
            Err(Error::Http(e))
                if e.status() == HttpStatus::MethodNotAllowed =>
            {
                // Handle 'OPTIONS' requests by default.
                let allow = {
                    let mut methods: Vec<String> = e
                        .get_header("Allow")
                        .unwrap_or("")
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect();
                    if !methods.iter().any(|m| m == "OPTIONS") {
                        methods.push("OPTIONS".to_string());
                    }
                    methods.iter().sorted().join(", ")
                };
                if request.method_str() == "OPTIONS" {
                    return Ok(
                        Response::new(200u16).set_header("Allow", &allow)
                    );
                }
                let mut e = e;
                e.set_header("Allow", &allow);
                return Err(e.into());
            }
            Err(e) => return Err(e),
        };

        if let Some(deserializer) = &entry.meta.deserializer {
            request.set_body_reader(deserializer.clone());
        }

        ctx.run_enter(request);

        let mut kwargs = request.routing_args().clone();
        if let Some(filter) = &self.from_url {
            kwargs = filter(request, kwargs)?;
        }

        let mut response = (entry.f)(request, ctx, &kwargs)?;

        ctx.run_leave(request, &mut response);

        if let Some(serializer) = &entry.meta.serializer {
            response.set_body_writer(serializer.clone());
        }
        if let Some(provides) = &entry.meta.provides {
            response.headers.set_default("Content-Type", provides);
        }
        if !vary.is_empty() {
            let mut merged: Vec<String> = response
                .headers
                .get("Vary")
                .unwrap_or("")
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .chain(vary.iter().map(|s| s.to_string()))
                .collect();
            merged.sort_by_key(|s| s.to_lowercase());
            merged.dedup_by(|a, b| a.eq_ignore_ascii_case(b));
            response.headers.set("Vary", &merged.join(", "));
        }
        Ok(response)
    }

    /// Select a suitable handler for the request.
    ///
    /// Returns the handler and the header names that took part in content
    /// negotiation (to be merged into the response `Vary` header).
    ///
    fn resolve<'rsrc>(
        &'rsrc self,
        request: &Request,
    ) -> Result<(&'rsrc HandlerEntry, Vec<&'static str>), Error> {
        // The view is the ';'-suffix of the matched route's name, if any.
        let view = request
            .frames()
            .last()
            .and_then(|frame| frame.route.as_ref())
            .and_then(|route| route.name())
            .and_then(|name| name.split_once(VIEW_SEPARATOR))
            .map(|(_, suffix)| suffix)
            .filter(|suffix| !suffix.is_empty())
            .map(str::to_string);

        let method_handlers = self
            .handlers
            .get(&view)
            .ok_or_else(|| Error::from(HttpError::not_found()))?;

        let verb = Method::from_str(&request.method_str()).ok();
        let verb = match verb {
            Some(verb) if method_handlers.contains_key(&verb) => verb,
            Some(Method::Head)
                if method_handlers.contains_key(&Method::Get) =>
            {
                Method::Get
            }
            _ => {
                let mut allowed: Vec<&str> = method_handlers
                    .keys()
                    .map(|m| m.as_str())
                    .collect();
                if !allowed.contains(&"HEAD") && allowed.contains(&"GET") {
                    allowed.push("HEAD");
                }
                let allow = allowed.iter().sorted().join(", ");
                return Err(HttpError::method_not_allowed(&allow).into());
            }
        };
        let candidates = match method_handlers.get(&verb) {
            Some(candidates) => candidates,
            None => return Err(HttpError::not_found().into()),
        };

        // Record up front which headers negotiation will depend on.
        let mut vary = Vec::new();
        let provides_count = candidates
            .iter()
            .filter_map(|h| h.meta.provides.as_deref())
            .unique()
            .count();
        if provides_count > 1 {
            vary.push("Accept");
        }
        let accepts_count =
            candidates.iter().map(|h| h.meta.accepts.as_str()).unique().count();
        if accepts_count > 1 {
            vary.push("Content-Type");
        }

        let mut remaining: Vec<&HandlerEntry> = candidates.iter().collect();
        if let Some(content_type) = request.content_type() {
            if !content_type.is_empty() {
                remaining = negotiate_content_type(content_type, remaining);
                if remaining.is_empty() {
                    return Err(
                        HttpError::unsupported_media_type().into()
                    );
                }
            }
        }
        if let Some(accept) = request.header("Accept") {
            if !accept.is_empty() {
                remaining = negotiate_accept(accept, remaining);
                if remaining.is_empty() {
                    return Err(HttpError::not_acceptable().into());
                }
            }
        }
        remaining
            .first()
            .map(|entry| (*entry, vary))
            .ok_or_else(|| HttpError::not_found().into())
    }
}

fn wrap<F, R>(f: F) -> HandlerFn
where
    F: Fn(
            &mut Request,
            &mut Context,
            &HashMap<String, String>,
        ) -> Result<R, Error>
        + Send
        + Sync
        + 'static,
    R: IntoResponse,
{
    Arc::new(move |request, ctx, args| {
        f(request, ctx, args).map(IntoResponse::into_response)
    })
}

/// Filter handlers that accept a given content type, keeping those that
/// accept the most specific matching media range.
///
fn negotiate_content_type<'h>(
    content_type: &str,
    handlers: Vec<&'h HandlerEntry>,
) -> Vec<&'h HandlerEntry> {
    let mut scored: Vec<((i32, f32), &str)> = handlers
        .iter()
        .map(|h| {
            let ranges = [MediaRange::parse(&h.meta.accepts)];
            (
                mime::fitness_and_quality(content_type, &ranges),
                h.meta.accepts.as_str(),
            )
        })
        .collect();
    scored.sort_by(|a, b| {
        b.0 .0
            .cmp(&a.0 .0)
            .then(b.0 .1.partial_cmp(&a.0 .1).unwrap_or(Ordering::Equal))
            .then(b.1.cmp(a.1))
    });
    let (best_score, best_range) = match scored.first() {
        Some((score, range)) => (*score, *range),
        None => return Vec::new(),
    };
    if best_score == NO_MATCH || best_score.1 == 0.0 {
        return Vec::new();
    }
    handlers
        .into_iter()
        .filter(|h| h.meta.accepts == best_range)
        .collect()
}

/// Filter handlers that provide an acceptable media type.
///
fn negotiate_accept<'h>(
    accept: &str,
    handlers: Vec<&'h HandlerEntry>,
) -> Vec<&'h HandlerEntry> {
    if handlers.iter().any(|h| h.meta.provides.is_none()) {
        // Not all handlers are annotated: disable negotiation on Accept.
        return handlers
            .into_iter()
            .filter(|h| h.meta.provides.is_none())
            .collect();
    }
    // The supported types are expected in ascending desirability; added
    // earlier means preferred, hence the reversal.
    let provided: Vec<&str> =
        handlers.iter().filter_map(|h| h.meta.provides.as_deref()).collect();
    match mime::best_match(provided.into_iter().rev(), accept) {
        Some(best) => handlers
            .into_iter()
            .filter(|h| h.meta.provides.as_deref() == Some(best.as_str()))
            .collect(),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Environ;

    fn request(method: &str, headers: &[(&str, &str)]) -> Request {
        let mut environ = Environ::new();
        environ.set("REQUEST_METHOD", method);
        for (name, value) in headers {
            environ.set_header(name, value);
        }
        Request::new(environ)
    }

    fn text_resource() -> Resource {
        let mut resource = Resource::new();
        resource.get(|_req, _ctx, _args| Ok("OK"));
        resource
    }

    #[test]
    fn test_simple_dispatch() {
        let resource = text_resource();
        let mut req = request("GET", &[]);
        let mut ctx = Context::new();
        let response = resource.call(&mut req, &mut ctx).unwrap();
        assert_eq!(response.code(), 200);
    }

    #[test]
    fn test_head_falls_back_to_get() {
        let resource = text_resource();
        let mut req = request("HEAD", &[]);
        let mut ctx = Context::new();
        let response = resource.call(&mut req, &mut ctx).unwrap();
        assert_eq!(response.code(), 200);
    }

    #[test]
    fn test_method_not_allowed_lists_verbs() {
        let resource = text_resource();
        let mut req = request("DELETE", &[]);
        let mut ctx = Context::new();
        let err = resource.call(&mut req, &mut ctx).unwrap_err();
        match err {
            Error::Http(e) => {
                assert_eq!(e.status().code(), 405);
                assert_eq!(
                    e.get_header("Allow"),
                    Some("GET, HEAD, OPTIONS"),
                );
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_options_default() {
        let resource = text_resource();
        let mut req = request("OPTIONS", &[]);
        let mut ctx = Context::new();
        let response = resource.call(&mut req, &mut ctx).unwrap();
        assert_eq!(response.code(), 200);
        assert_eq!(
            response.headers.get("Allow"),
            Some("GET, HEAD, OPTIONS"),
        );
    }

    #[test]
    fn test_unknown_view_is_not_found() {
        let resource = Resource::new();
        let mut req = request("GET", &[]);
        let mut ctx = Context::new();
        let err = resource.call(&mut req, &mut ctx).unwrap_err();
        assert_eq!(err.status().map(|s| s.code()), Some(404));
    }

    #[test]
    fn test_content_type_negotiation() {
        let mut resource = Resource::new();
        resource
            .add(post().accepts("application/json"), |_r, _c, _a| Ok("json"))
            .unwrap();
        resource
            .add(post().accepts("text/plain"), |_r, _c, _a| Ok("plain"))
            .unwrap();

        let mut req =
            request("POST", &[("Content-Type", "application/json")]);
        let mut ctx = Context::new();
        let response = resource.call(&mut req, &mut ctx).unwrap();
        assert_eq!(response.headers.get("Vary"), Some("Content-Type"));
        match response.body() {
            Body::Text(s) => assert_eq!(s, "json"),
            other => panic!("unexpected body: {:?}", other),
        }

        let mut req = request("POST", &[("Content-Type", "image/png")]);
        let err = resource.call(&mut req, &mut ctx).unwrap_err();
        assert_eq!(err.status().map(|s| s.code()), Some(415));
    }

    #[test]
    fn test_accept_negotiation() {
        let mut resource = Resource::new();
        resource
            .add(get().provides("application/json"), |_r, _c, _a| {
                Ok(r#"{"ok":true}"#)
            })
            .unwrap();
        resource
            .add(get().provides("text/html"), |_r, _c, _a| Ok("<p>ok</p>"))
            .unwrap();

        let mut req = request("GET", &[("Accept", "text/html")]);
        let mut ctx = Context::new();
        let response = resource.call(&mut req, &mut ctx).unwrap();
        assert_eq!(
            response.headers.get("Content-Type"),
            Some("text/html"),
        );
        assert_eq!(response.headers.get("Vary"), Some("Accept"));

        let mut req = request("GET", &[("Accept", "image/png")]);
        let err = resource.call(&mut req, &mut ctx).unwrap_err();
        assert_eq!(err.status().map(|s| s.code()), Some(406));
    }

    #[test]
    fn test_accept_negotiation_prefers_earlier_added() {
        let mut resource = Resource::new();
        resource
            .add(get().provides("application/json"), |_r, _c, _a| Ok("json"))
            .unwrap();
        resource
            .add(get().provides("text/html"), |_r, _c, _a| Ok("html"))
            .unwrap();

        let mut req = request("GET", &[("Accept", "*/*")]);
        let mut ctx = Context::new();
        let response = resource.call(&mut req, &mut ctx).unwrap();
        assert_eq!(
            response.headers.get("Content-Type"),
            Some("application/json"),
        );
    }

    #[test]
    fn test_unannotated_handlers_disable_accept_negotiation() {
        let mut resource = Resource::new();
        resource.get(|_r, _c, _a| Ok("plain"));
        let mut req = request("GET", &[("Accept", "application/json")]);
        let mut ctx = Context::new();
        let response = resource.call(&mut req, &mut ctx).unwrap();
        assert_eq!(response.code(), 200);
    }

    #[test]
    fn test_consumes_installs_deserializer() {
        use std::io::Cursor;

        let mut resource = Resource::new();
        resource
            .add(
                post().consumes("application/json", |bytes| {
                    serde_json::from_slice(bytes)
                        .map_err(|e| Error::other(e.to_string()))
                }),
                |req: &mut Request, _ctx: &mut Context, _args: &_| {
                    let n = req.content()?["n"].as_i64().unwrap_or(0);
                    Ok(format!("n={}", n))
                },
            )
            .unwrap();

        let body = br#"{"n": 41}"#;
        let mut environ = Environ::new();
        environ.set("REQUEST_METHOD", "POST");
        environ.set("CONTENT_TYPE", "application/json");
        environ.set("CONTENT_LENGTH", &body.len().to_string());
        environ.set_input(Cursor::new(body.to_vec()));
        let mut req = Request::new(environ);
        let mut ctx = Context::new();
        let response = resource.call(&mut req, &mut ctx).unwrap();
        match response.body() {
            Body::Text(s) => assert_eq!(s, "n=41"),
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn test_spec_exclusivity() {
        let mut resource = Resource::new();
        let spec = get()
            .accepts("text/plain")
            .consumes("application/json", |_| Ok(JsonValue::Null));
        assert!(resource.add(spec, |_r, _c, _a| Ok("x")).is_err());

        let spec = get().view("a;b");
        assert!(resource.add(spec, |_r, _c, _a| Ok("x")).is_err());
    }

    #[test]
    fn test_enter_and_leave_callbacks_fire_in_order() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc as StdArc;

        let order = StdArc::new(AtomicUsize::new(0));
        let enter_seen = order.clone();
        let leave_seen = order.clone();

        let mut resource = Resource::new();
        let handler_seen = order.clone();
        resource.get(move |_r: &mut Request, _c: &mut Context, _a: &_| {
            assert_eq!(handler_seen.fetch_add(1, Ordering::SeqCst), 1);
            Ok("x")
        });

        let mut req = request("GET", &[]);
        let mut ctx = Context::new();
        ctx.add_callback(crate::Callback::Enter(Box::new(move |_| {
            assert_eq!(enter_seen.fetch_add(1, Ordering::SeqCst), 0);
        })));
        ctx.add_callback(crate::Callback::Leave(Box::new(move |_, _| {
            assert_eq!(leave_seen.fetch_add(1, Ordering::SeqCst), 2);
        })));
        resource.call(&mut req, &mut ctx).unwrap();
        assert_eq!(order.load(Ordering::SeqCst), 3);
    }
}
