//! The mapper dispatches incoming requests based on URL templates and
//! provides the server-boundary entry point.
//!
//! The request path is matched against the routes in the order they were
//! added; the first match wins. Route templates may contain named
//! parameters (`{name}`, `{name:range}`), optional groups (`[...]`) and a
//! trailing `|` marking a prefix template, see the [`template`
//! ](../template/index.html) module.
//!
//! The trailing `|` is what makes nesting work:
//!
//! ```
//! use rhino::{Mapper, Resource};
//!
//! let mut foo = Mapper::new();
//! let mut bar = Resource::new();
//! bar.get(|_req, _ctx, _args| Ok("bar"));
//! foo.add("/bar", bar).unwrap();
//!
//! let mut app = Mapper::new();
//! app.add("/foo|", foo).unwrap();
//! // A request to /foo/bar is now dispatched through both mappers.
//! ```
//!
//! Default ranges can be extended or overridden per mapper:
//!
//! ```
//! // match numbers in engineering format
//! let mut mapper = rhino::Mapper::with_ranges(&[
//!     ("real", r"(\+|-)?[1-9]\.[0-9]*E(\+|-)?[0-9]+"),
//! ]);
//! ```

use crate::context::{ConfigMap, Context, PropertyFactory};
use crate::request::{Environ, Request};
use crate::resource::Resource;
use crate::response::{Response, ResponseBody};
use crate::template::{default_ranges, template_to_path, template_to_regex};
use crate::urls::RoutingFrame;
use crate::{Error, HttpError};
use regex::Regex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

// --- PathBuilder -----------------------------------------------------------

/// Builds the path for one route's template. Handed to a resource's
/// `make_url` override as the default way of constructing the path.
///
pub struct PathBuilder<'route> {
    template: &'route str,
    ranges: &'route HashMap<String, String>,
}

impl PathBuilder<'_> {
    pub fn template(&self) -> &str {
        self.template
    }

    pub fn build(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<String, Error> {
        template_to_path(self.template, params, self.ranges)
    }
}

// --- Target ----------------------------------------------------------------

/// What a route points at: a resource, or a nested mapper for `|`-suffixed
/// prefix templates.
///
#[derive(Clone)]
pub enum Target {
    Mapper(Arc<Mapper>),
    Resource(Arc<Resource>),
}

impl Target {
    // Identity for the target-to-route index.
    pub(crate) fn addr(&self) -> usize {
        match self {
            Self::Mapper(m) => Arc::as_ptr(m) as *const () as usize,
            Self::Resource(r) => Arc::as_ptr(r) as *const () as usize,
        }
    }

    pub(crate) fn call(
        &self,
        request: &mut Request,
        ctx: &mut Context,
    ) -> Result<Response, Error> {
        match self {
            Self::Mapper(m) => Arc::clone(m).call(request, ctx),
            Self::Resource(r) => r.call(request, ctx),
        }
    }
}

impl From<Mapper> for Target {
    fn from(mapper: Mapper) -> Self {
        Self::Mapper(Arc::new(mapper))
    }
}

impl From<Arc<Mapper>> for Target {
    fn from(mapper: Arc<Mapper>) -> Self {
        Self::Mapper(mapper)
    }
}

impl From<Resource> for Target {
    fn from(resource: Resource) -> Self {
        Self::Resource(Arc::new(resource))
    }
}

impl From<Arc<Resource>> for Target {
    fn from(resource: Arc<Resource>) -> Self {
        Self::Resource(resource)
    }
}

// --- UrlTarget -------------------------------------------------------------

/// What the URL reverser accepts: a route name (possibly `:`-chained or
/// `.`/`/`-prefixed), a route object, or a target added to the mapper.
///
#[derive(Clone)]
pub enum UrlTarget {
    Name(String),
    Route(Arc<Route>),
    Target(Target),
}

impl From<&str> for UrlTarget {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for UrlTarget {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<Arc<Route>> for UrlTarget {
    fn from(route: Arc<Route>) -> Self {
        Self::Route(route)
    }
}

impl From<&Arc<Route>> for UrlTarget {
    fn from(route: &Arc<Route>) -> Self {
        Self::Route(route.clone())
    }
}

impl From<&Target> for UrlTarget {
    fn from(target: &Target) -> Self {
        Self::Target(target.clone())
    }
}

impl From<&Arc<Resource>> for UrlTarget {
    fn from(resource: &Arc<Resource>) -> Self {
        Self::Target(Target::Resource(resource.clone()))
    }
}

impl From<&Arc<Mapper>> for UrlTarget {
    fn from(mapper: &Arc<Mapper>) -> Self {
        Self::Target(Target::Mapper(mapper.clone()))
    }
}

// --- Wrapper ---------------------------------------------------------------

/// The continuation passed to a [`Wrapper`](trait.Wrapper.html).
///
pub type Next<'next> =
    dyn FnMut(&mut Request, &mut Context) -> Result<Response, Error> + 'next;

/// Middleware around the dispatch function.
///
/// A wrapper has full control over the execution: it can pass the request
/// on via `next`, modify the returned response, or short-circuit with its
/// own. Wrappers nest; the one added last runs outermost.
///
pub trait Wrapper: Send + Sync {
    fn around(
        &self,
        request: &mut Request,
        ctx: &mut Context,
        next: &mut Next,
    ) -> Result<Response, Error>;
}

impl<F> Wrapper for F
where
    F: Fn(&mut Request, &mut Context, &mut Next) -> Result<Response, Error>
        + Send
        + Sync,
{
    fn around(
        &self,
        request: &mut Request,
        ctx: &mut Context,
        next: &mut Next,
    ) -> Result<Response, Error> {
        self(request, ctx, next)
    }
}

// --- Route -----------------------------------------------------------------

/// A route links a URL template and an optional name to a target.
///
pub struct Route {
    template: String,
    regex: Regex,
    params: Vec<String>,
    name: Option<String>,
    target: Target,
    anchored: bool,
    ranges: Arc<HashMap<String, String>>,
}

impl Route {
    fn new(
        template: &str,
        target: Target,
        name: Option<&str>,
        ranges: Arc<HashMap<String, String>>,
    ) -> Result<Self, Error> {
        if let Some(name) = name {
            if name.is_empty() {
                return Err(Error::argument("route name cannot be empty"));
            }
            for c in [':', '/'] {
                if name.contains(c) {
                    return Err(Error::argument(format!(
                        "route name cannot contain '{}': {}",
                        c, name
                    )));
                }
            }
            if name.starts_with('.') {
                return Err(Error::argument(format!(
                    "route name cannot start with '.': {}",
                    name
                )));
            }
        }
        let (source, params) = template_to_regex(template, &ranges)?;
        let regex = Regex::new(&source).map_err(|e| {
            Error::template(format!(
                "cannot compile template {}: {}",
                template, e
            ))
        })?;
        if params.iter().any(|p| p == "ctx") {
            return Err(Error::argument(
                "the name 'ctx' is not allowed as a parameter name",
            ));
        }
        if params.iter().any(|p| p.starts_with('_')) {
            return Err(Error::argument(
                "parameter names must not start with underscores",
            ));
        }
        Ok(Self {
            anchored: !template.is_empty() && !template.ends_with('|'),
            template: template.to_string(),
            regex,
            params,
            name: name.map(str::to_string),
            target,
            ranges,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn target(&self) -> &Target {
        &self.target
    }

    pub(crate) fn anchored(&self) -> bool {
        self.anchored
    }

    /// Try to match a path. Returns the named parameters and the length of
    /// the consumed prefix.
    ///
    pub(crate) fn matches(
        &self,
        path: &str,
    ) -> Option<(HashMap<String, String>, usize)> {
        let caps = self.regex.captures(path)?;
        let consumed = caps.get(0).map(|m| m.end()).unwrap_or(0);
        let mut vars = HashMap::new();
        for name in self.regex.capture_names().flatten() {
            if let Some(m) = caps.name(name) {
                vars.insert(name.to_string(), m.as_str().to_string());
            }
        }
        Some((vars, consumed))
    }

    /// Consume this route's parameters from `kw` first, then from `args`
    /// in template-declared order.
    ///
    pub(crate) fn pop_params(
        &self,
        args: &mut Vec<String>,
        kw: &mut HashMap<String, String>,
    ) -> HashMap<String, String> {
        let mut params = HashMap::new();
        for name in &self.params {
            if let Some(value) = kw.remove(name) {
                params.insert(name.clone(), value);
            } else if !args.is_empty() {
                params.insert(name.clone(), args.remove(0));
            }
        }
        params
    }

    pub(crate) fn build_path(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<String, Error> {
        let builder =
            PathBuilder { template: &self.template, ranges: &self.ranges };
        if let Target::Resource(resource) = &self.target {
            if let Some(make_url) = resource.make_url_fn() {
                return make_url(&builder, params);
            }
        }
        builder.build(params)
    }

    /// Build the URL path fragment for this route.
    ///
    /// Leftover positional values are an argument error; leftover keyed
    /// values are ignored (they may belong to a query string or to other
    /// segments of a route chain).
    ///
    pub(crate) fn path(
        &self,
        args: &mut Vec<String>,
        kw: &mut HashMap<String, String>,
    ) -> Result<String, Error> {
        let mut params = self.pop_params(args, kw);
        if !args.is_empty() {
            return Err(Error::argument(format!(
                "extra positional parameters {:?} when building path for {}",
                args, self.template
            )));
        }
        if let Target::Resource(resource) = &self.target {
            if resource.make_url_fn().is_some() {
                // The override sees the remaining named parameters too.
                params.extend(kw.drain());
            }
        }
        self.build_path(&params)
    }
}

// --- Mapper ----------------------------------------------------------------

/// An ordered route table with nested dispatch and a URL reverser.
///
/// The mapper is built up front (routes, wrappers, context properties)
/// and is read-only while serving; share it between threads behind an
/// `Arc`.
///
pub struct Mapper {
    /// Copied into the context of every request entering this mapper.
    pub config: ConfigMap,
    /// When set, overrides the `default_encoding` of outgoing responses.
    /// Does not affect responses returned via errors.
    pub default_encoding: Option<String>,
    /// When set, overrides the `default_content_type` of outgoing
    /// responses. Does not affect responses returned via errors.
    pub default_content_type: Option<String>,
    ranges: Arc<HashMap<String, String>>,
    routes: Vec<Arc<Route>>,
    named_routes: HashMap<String, usize>,
    by_target: HashMap<usize, usize>,
    ctx_properties: Vec<(String, PropertyFactory, bool)>,
    wrappers: Vec<Box<dyn Wrapper>>,
}

impl Default for Mapper {
    fn default() -> Self {
        Self::new()
    }
}

impl Mapper {
    pub fn new() -> Self {
        Self::with_ranges(&[])
    }

    /// Create a mapper with the default ranges extended or overridden by
    /// `ranges` (name, regex pattern).
    ///
    pub fn with_ranges(ranges: &[(&str, &str)]) -> Self {
        let mut table = default_ranges();
        for (name, pattern) in ranges {
            table.insert(name.to_string(), pattern.to_string());
        }
        Self {
            config: ConfigMap::new(),
            default_encoding: None,
            default_content_type: None,
            ranges: Arc::new(table),
            routes: Vec::new(),
            named_routes: HashMap::new(),
            by_target: HashMap::new(),
            ctx_properties: Vec::new(),
            wrappers: Vec::new(),
        }
    }

    /// Put a value into the configuration passed to request contexts.
    ///
    pub fn set_config<T>(&mut self, key: &str, value: T)
    where
        T: Any + Send + Sync,
    {
        self.config.insert(key.to_string(), Arc::new(value));
    }

    /// Add a route to a target.
    ///
    pub fn add(
        &mut self,
        template: &str,
        target: impl Into<Target>,
    ) -> Result<(), Error> {
        self.add_route(template, None, target.into())
    }

    /// Add a named route to a target. The name can be used when building
    /// URLs and must be unique within this mapper.
    ///
    pub fn add_named(
        &mut self,
        template: &str,
        name: &str,
        target: impl Into<Target>,
    ) -> Result<(), Error> {
        self.add_route(template, Some(name), target.into())
    }

    fn add_route(
        &mut self,
        template: &str,
        name: Option<&str>,
        target: Target,
    ) -> Result<(), Error> {
        if let Some(name) = name {
            if self.named_routes.contains_key(name) {
                return Err(Error::argument(format!(
                    "a route named '{}' already exists in this mapper",
                    name
                )));
            }
        }
        let index = self.routes.len();
        let route = Arc::new(Route::new(
            template,
            target.clone(),
            name,
            self.ranges.clone(),
        )?);
        // Multiple routes may share a target; lookups return the first.
        self.by_target.entry(target.addr()).or_insert(index);
        if let Some(name) = name {
            self.named_routes.insert(name.to_string(), index);
        }
        self.routes.push(route);
        Ok(())
    }

    /// Install a wrapper around the dispatch function. The wrapper added
    /// last runs outermost.
    ///
    pub fn add_wrapper(&mut self, wrapper: impl Wrapper + 'static) {
        self.wrappers.push(Box::new(wrapper));
    }

    /// Install a context property.
    ///
    /// The factory's return value is available under `name` on the
    /// contexts of requests passing through this mapper. The result is
    /// computed on first access and cached unless `cached` is false.
    ///
    pub fn add_ctx_property<F>(
        &mut self,
        name: &str,
        factory: F,
        cached: bool,
    ) -> Result<(), Error>
    where
        F: Fn(&Context) -> Box<dyn Any + Send + Sync> + Send + Sync + 'static,
    {
        if self.ctx_properties.iter().any(|(n, _, _)| n == name) {
            return Err(Error::argument(format!(
                "a context property named '{}' already exists",
                name
            )));
        }
        self.ctx_properties
            .push((name.to_string(), Arc::new(factory), cached));
        Ok(())
    }

    fn named_route(&self, name: &str) -> Result<&Arc<Route>, Error> {
        self.named_routes
            .get(name)
            .and_then(|&index| self.routes.get(index))
            .ok_or_else(|| {
                Error::argument(format!(
                    "no route named '{}' in this mapper",
                    name
                ))
            })
    }

    /// Build a URL path fragment for a route or target.
    ///
    /// Accepts a route name, a colon-chained name walking into nested
    /// mappers, a route object, or a target added to this mapper (the
    /// first route bound to it is used).
    ///
    pub fn path(
        &self,
        target: &UrlTarget,
        args: &mut Vec<String>,
        kw: &mut HashMap<String, String>,
    ) -> Result<String, Error> {
        match target {
            UrlTarget::Name(name) => {
                if let Some((prefix, rest)) = name.split_once(':') {
                    // Walk into a nested mapper segment by segment.
                    let route = self.named_route(prefix)?;
                    let prefix_params = route.pop_params(args, kw);
                    let prefix_path = route.build_path(&prefix_params)?;
                    match route.target() {
                        Target::Mapper(next) => Ok(prefix_path
                            + &next.path(
                                &UrlTarget::Name(rest.to_string()),
                                args,
                                kw,
                            )?),
                        Target::Resource(_) => Err(Error::argument(format!(
                            "route '{}' does not point to a nested mapper",
                            prefix
                        ))),
                    }
                } else {
                    self.named_route(name)?.path(args, kw)
                }
            }
            UrlTarget::Route(route) => {
                for candidate in &self.routes {
                    if Arc::ptr_eq(candidate, route) {
                        return candidate.path(args, kw);
                    }
                }
                Err(Error::argument(format!(
                    "route for template '{}' not found in this mapper",
                    route.template()
                )))
            }
            UrlTarget::Target(target) => self
                .by_target
                .get(&target.addr())
                .and_then(|&index| self.routes.get(index))
                .ok_or_else(|| {
                    Error::argument(
                        "no route found for target in this mapper",
                    )
                })?
                .path(args, kw),
        }
    }

    /// Run a request through this mapper: set up the context and pass
    /// through the wrapper chain into dispatch.
    ///
    pub fn call(
        self: Arc<Self>,
        request: &mut Request,
        ctx: &mut Context,
    ) -> Result<Response, Error> {
        ctx.config = self.config.clone();
        for (name, factory, cached) in &self.ctx_properties {
            ctx.add_property(name, factory.clone(), *cached)?;
        }
        Self::call_wrapped(&self, self.wrappers.len(), request, ctx)
    }

    fn call_wrapped(
        this: &Arc<Self>,
        depth: usize,
        request: &mut Request,
        ctx: &mut Context,
    ) -> Result<Response, Error> {
        match depth.checked_sub(1).and_then(|i| this.wrappers.get(i)) {
            None => Self::dispatch(this, request, ctx),
            Some(wrapper) => wrapper.around(
                request,
                ctx,
                &mut |request, ctx| {
                    Self::call_wrapped(this, depth - 1, request, ctx)
                },
            ),
        }
    }

    fn dispatch(
        this: &Arc<Self>,
        request: &mut Request,
        ctx: &mut Context,
    ) -> Result<Response, Error> {
        request.push_frame(RoutingFrame {
            root: request.script_name().to_string(),
            mapper: this.clone(),
            route: None,
        });
        let path = request.path_info().to_string();
        for route in &this.routes {
            let Some((vars, consumed)) = route.matches(&path) else {
                continue;
            };
            log::debug!(
                "route '{}' matched path '{}'",
                route.template(),
                path
            );
            request.set_frame_route(route.clone());
            request.routing_args_mut().extend(vars);
            if !route.anchored() {
                let script =
                    request.script_name().to_string() + &path[..consumed];
                request.set_script_name(&script);
                request.set_path_info(&path[consumed..]);
            }
            let mut response = route.target().call(request, ctx)?;
            if let Some(encoding) = &this.default_encoding {
                response.default_encoding = encoding.clone();
            }
            if let Some(content_type) = &this.default_content_type {
                response.default_content_type = content_type.clone();
            }
            return Ok(response);
        }
        Err(HttpError::not_found().into())
    }

    /// The server-boundary entry point.
    ///
    /// Builds the request and context, dispatches, applies the
    /// conditional-request engine, converts errors into responses, fires
    /// the lifecycle callbacks, calls `start_response` with the status
    /// line and header list, and returns the response body iterator.
    ///
    /// Any error that is not an HTTP error is written to the
    /// environment's error stream and becomes a generic `500`.
    ///
    pub fn wsgi(
        self: Arc<Self>,
        environ: Environ,
        start_response: &mut dyn FnMut(&str, &[(String, String)]),
    ) -> ResponseBody {
        let mut request = Request::new(environ);
        let mut ctx = Context::new();
        let mut response = match self.call(&mut request, &mut ctx) {
            Ok(response) => response.conditional_to(&request),
            Err(Error::Http(e)) => e.response(),
            Err(e) => {
                log::error!("unhandled error during dispatch: {}", e);
                request
                    .log_error(&format!("unhandled error during dispatch: {}", e));
                HttpError::internal_server_error().response()
            }
        };
        ctx.run_finalize(&request, &mut response);
        for callback in ctx.take_close() {
            response.push_callback(callback);
        }
        let body = match response.emit(&request, start_response) {
            Ok(body) => body,
            Err(e) => {
                log::error!("error finalizing response: {}", e);
                request
                    .log_error(&format!("error finalizing response: {}", e));
                HttpError::internal_server_error()
                    .response()
                    .emit(&request, start_response)
                    .unwrap_or_else(|_| ResponseBody::empty())
            }
        };
        ctx.run_teardown();
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Body;

    fn get_request(path: &str) -> Request {
        let mut environ = Environ::new();
        environ.set("REQUEST_METHOD", "GET");
        environ.set("SCRIPT_NAME", "");
        environ.set("PATH_INFO", path);
        Request::new(environ)
    }

    fn ok_resource(body: &'static str) -> Resource {
        let mut resource = Resource::new();
        resource.get(move |_req, _ctx, _args| Ok(body));
        resource
    }

    fn dispatch(app: &Arc<Mapper>, path: &str) -> Result<Response, Error> {
        let mut request = get_request(path);
        let mut ctx = Context::new();
        app.clone().call(&mut request, &mut ctx)
    }

    fn body_text(response: &Response) -> String {
        match response.body() {
            Body::Text(s) => s.clone(),
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn test_first_match_wins() {
        let mut mapper = Mapper::new();
        mapper.add("/a/{x}", ok_resource("first")).unwrap();
        mapper.add("/a/{x:digits}", ok_resource("second")).unwrap();
        let app = Arc::new(mapper);
        let response = dispatch(&app, "/a/1").unwrap();
        assert_eq!(body_text(&response), "first");
    }

    #[test]
    fn test_no_match_is_not_found() {
        let mut mapper = Mapper::new();
        mapper.add("/a", ok_resource("a")).unwrap();
        let app = Arc::new(mapper);
        let err = dispatch(&app, "/b").unwrap_err();
        assert_eq!(err.status().map(|s| s.code()), Some(404));
    }

    #[test]
    fn test_routing_args_are_extracted() {
        let mut resource = Resource::new();
        resource.get(|req: &mut Request, _ctx: &mut Context, args: &_| {
            assert_eq!(req.routing_arg::<u32>("id"), Some(7));
            let args: &HashMap<String, String> = args;
            Ok(format!("id={}", args["id"]))
        });
        let mut mapper = Mapper::new();
        mapper.add("/users/{id:digits}", resource).unwrap();
        let app = Arc::new(mapper);
        let response = dispatch(&app, "/users/7").unwrap();
        assert_eq!(body_text(&response), "id=7");
    }

    #[test]
    fn test_nested_dispatch_shifts_paths() {
        let mut inner_resource = Resource::new();
        inner_resource.get(|req: &mut Request, _ctx: &mut Context, _args: &_| {
            assert_eq!(req.script_name(), "/foo");
            assert_eq!(req.path_info(), "/bar");
            Ok("OK")
        });
        let mut inner = Mapper::new();
        inner.add("/bar", inner_resource).unwrap();
        let mut outer = Mapper::new();
        outer.add("/foo|", inner).unwrap();
        let app = Arc::new(outer);
        let response = dispatch(&app, "/foo/bar").unwrap();
        assert_eq!(body_text(&response), "OK");
    }

    #[test]
    fn test_reserved_parameter_names_are_rejected() {
        let mut mapper = Mapper::new();
        assert!(mapper.add("/{ctx}", ok_resource("x")).is_err());
        assert!(mapper.add("/{_private}", ok_resource("x")).is_err());
    }

    #[test]
    fn test_route_name_validation() {
        let mut mapper = Mapper::new();
        let resource = Arc::new(ok_resource("x"));
        assert!(mapper.add_named("/a", "a:b", resource.clone()).is_err());
        assert!(mapper.add_named("/a", "a/b", resource.clone()).is_err());
        assert!(mapper.add_named("/a", ".a", resource.clone()).is_err());
        mapper.add_named("/a", "a", resource.clone()).unwrap();
        assert!(mapper.add_named("/b", "a", resource).is_err());
    }

    #[test]
    fn test_path_for_named_route() {
        let mut mapper = Mapper::new();
        mapper
            .add_named("/users/{id:digits}[/edit]", "user", ok_resource("u"))
            .unwrap();
        let mut kw = HashMap::new();
        kw.insert("id".to_string(), "7".to_string());
        let path = mapper
            .path(&UrlTarget::from("user"), &mut Vec::new(), &mut kw)
            .unwrap();
        assert_eq!(path, "/users/7");
    }

    #[test]
    fn test_path_consumes_positional_in_template_order() {
        let mut mapper = Mapper::new();
        mapper
            .add_named("/{a}/{b}", "pair", ok_resource("x"))
            .unwrap();
        let mut args = vec!["1".to_string(), "2".to_string()];
        let path = mapper
            .path(&UrlTarget::from("pair"), &mut args, &mut HashMap::new())
            .unwrap();
        assert_eq!(path, "/1/2");
    }

    #[test]
    fn test_path_extra_positional_is_an_error() {
        let mut mapper = Mapper::new();
        mapper.add_named("/{a}", "one", ok_resource("x")).unwrap();
        let mut args = vec!["1".to_string(), "2".to_string()];
        assert!(matches!(
            mapper.path(&UrlTarget::from("one"), &mut args, &mut HashMap::new()),
            Err(Error::Argument(_)),
        ));
    }

    #[test]
    fn test_path_extra_keyed_is_ignored() {
        let mut mapper = Mapper::new();
        mapper
            .add_named("/users/{id:digits}[/edit]", "user", ok_resource("u"))
            .unwrap();
        let mut kw = HashMap::new();
        kw.insert("id".to_string(), "7".to_string());
        kw.insert("edit".to_string(), "true".to_string());
        let path = mapper
            .path(&UrlTarget::from("user"), &mut Vec::new(), &mut kw)
            .unwrap();
        assert_eq!(path, "/users/7");
    }

    #[test]
    fn test_path_through_nested_mappers() {
        let mut inner = Mapper::new();
        inner
            .add_named("/{item}", "item", ok_resource("i"))
            .unwrap();
        let mut outer = Mapper::new();
        outer
            .add_named("/box/{id:digits}|", "box", inner)
            .unwrap();
        let mut kw = HashMap::new();
        kw.insert("id".to_string(), "3".to_string());
        kw.insert("item".to_string(), "pen".to_string());
        let path = outer
            .path(&UrlTarget::from("box:item"), &mut Vec::new(), &mut kw)
            .unwrap();
        assert_eq!(path, "/box/3/pen");
    }

    #[test]
    fn test_path_by_target_identity() {
        let resource = Arc::new(ok_resource("x"));
        let mut mapper = Mapper::new();
        mapper.add("/first/{n}", resource.clone()).unwrap();
        mapper.add("/second/{n}", resource.clone()).unwrap();
        let mut kw = HashMap::new();
        kw.insert("n".to_string(), "1".to_string());
        // The first route bound to the target wins.
        let path = mapper
            .path(&UrlTarget::from(&resource), &mut Vec::new(), &mut kw)
            .unwrap();
        assert_eq!(path, "/first/1");

        let stranger = Arc::new(ok_resource("y"));
        assert!(mapper
            .path(&UrlTarget::from(&stranger), &mut Vec::new(), &mut HashMap::new())
            .is_err());
    }

    #[test]
    fn test_make_url_override() {
        let mut resource = Resource::new();
        resource.get(|_r, _c, _a| Ok("x"));
        resource.make_url(|builder, params| {
            let mut params = params.clone();
            params
                .entry("id".to_string())
                .or_insert_with(|| "0".to_string());
            builder.build(&params)
        });
        let mut mapper = Mapper::new();
        mapper
            .add_named("/things/{id:digits}", "thing", resource)
            .unwrap();
        let path = mapper
            .path(
                &UrlTarget::from("thing"),
                &mut Vec::new(),
                &mut HashMap::new(),
            )
            .unwrap();
        assert_eq!(path, "/things/0");
    }

    #[test]
    fn test_wrappers_compose_last_added_outermost() {
        let mut resource = Resource::new();
        resource.get(|_r, _c, _a| Ok("core"));
        let mut mapper = Mapper::new();
        mapper.add("/", resource).unwrap();
        mapper.add_wrapper(
            |req: &mut Request, ctx: &mut Context, next: &mut Next| {
                let response = next(req, ctx)?;
                Ok(response.header("X-Trace", "inner"))
            },
        );
        mapper.add_wrapper(
            |req: &mut Request, ctx: &mut Context, next: &mut Next| {
                let response = next(req, ctx)?;
                Ok(response.header("X-Trace", "outer"))
            },
        );
        let app = Arc::new(mapper);
        let response = dispatch(&app, "/").unwrap();
        assert_eq!(
            response.headers.get_all("X-Trace"),
            vec!["inner", "outer"],
        );
    }

    #[test]
    fn test_wrapper_can_short_circuit() {
        let mut mapper = Mapper::new();
        mapper.add("/", ok_resource("unreached")).unwrap();
        mapper.add_wrapper(
            |_req: &mut Request, _ctx: &mut Context, _next: &mut Next| {
                Ok(Response::with_body(403u16, "blocked"))
            },
        );
        let app = Arc::new(mapper);
        let response = dispatch(&app, "/").unwrap();
        assert_eq!(response.code(), 403);
    }

    #[test]
    fn test_ctx_properties_are_installed() {
        let mut resource = Resource::new();
        resource.get(|_req: &mut Request, ctx: &mut Context, _args: &_| {
            Ok(format!("{}", ctx.get::<u32>("answer")?))
        });
        let mut mapper = Mapper::new();
        mapper.add("/", resource).unwrap();
        mapper
            .add_ctx_property("answer", |_| Box::new(42u32), true)
            .unwrap();
        let app = Arc::new(mapper);
        let response = dispatch(&app, "/").unwrap();
        assert_eq!(body_text(&response), "42");
    }

    #[test]
    fn test_default_overrides_apply_to_dispatched_responses() {
        let mut mapper = Mapper::new();
        mapper.add("/", ok_resource("x")).unwrap();
        mapper.default_content_type =
            Some("application/json".to_string());
        let app = Arc::new(mapper);
        let response = dispatch(&app, "/").unwrap();
        assert_eq!(response.default_content_type, "application/json");
    }

    #[test]
    fn test_mapper_is_shareable_between_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Arc<Mapper>>();
    }

    #[test]
    fn test_match_build_round_trip() {
        let templates = [
            ("/users/{id:digits}", &[("id", "17")][..]),
            ("/files/{path:any}", &[("path", "a/b/c.txt")][..]),
            ("/{a}[/{b}]", &[("a", "x"), ("b", "y")][..]),
            ("/{a}[/{b}]", &[("a", "x")][..]),
        ];
        for (template, params) in templates {
            let mut mapper = Mapper::new();
            mapper
                .add_named(template, "t", ok_resource("x"))
                .unwrap();
            let mut kw: HashMap<String, String> = params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            let path = mapper
                .path(&UrlTarget::from("t"), &mut Vec::new(), &mut kw)
                .unwrap();
            let route = mapper.named_route("t").unwrap();
            let (vars, consumed) = route.matches(&path).unwrap();
            assert_eq!(consumed, path.len());
            let expected: HashMap<String, String> = params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            assert_eq!(vars, expected);
        }
    }
}
