//! Request dispatch based on URL templates, with view-based content
//! negotiation and conditional request handling.
//!
//! A [`Mapper`](mapper/struct.Mapper.html) routes each incoming request
//! through its ordered route table to a [`Resource`
//! ](resource/struct.Resource.html) (or a nested mapper), which selects a
//! handler by verb, view and media type. The handler's return value is
//! coerced into a [`Response`](response/struct.Response.html), reduced to
//! `304 Not Modified` when the request's validators allow it, and handed
//! back to the server as a byte-chunk iterator.

pub mod context;
pub mod error;
pub mod http;
pub mod mapper;
pub mod mime;
pub mod request;
pub mod resource;
pub mod response;
pub mod template;
pub mod testing;
pub mod urls;

pub use context::{Callback, ConfigMap, Context, PropertyFactory};
pub use error::{Error, HttpError};
pub use http::{CacheControl, HeaderVal, HttpStatus, Method, SseEvent};
pub use mapper::{
    Mapper, Next, PathBuilder, Route, Target, UrlTarget, Wrapper,
};
pub use request::{
    BodyReader, Environ, FormField, QueryDict, Request, RequestHeaders,
    UrlParams,
};
pub use resource::{HandlerFn, HandlerSpec, Resource};
pub use response::{
    created, no_content, ok, redirect, Body, BodyWriter, Chunk, Cookie,
    Entity, Headers, IntoResponse, Response, ResponseBody, Status,
};
pub use urls::{build_url, RoutingFrame};
