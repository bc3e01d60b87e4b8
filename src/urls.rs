//! Symbolic URL construction against the routing-context stack.
//!

use crate::mapper::{Mapper, Route, UrlTarget};
use crate::Error;
use std::collections::HashMap;
use std::sync::Arc;

/// One frame of the routing-context stack. A frame is appended when a
/// request enters a mapper and amended when one of its routes matches.
///
#[derive(Clone)]
pub struct RoutingFrame {
    /// The script name at mapper entry.
    pub root: String,
    pub mapper: Arc<Mapper>,
    pub route: Option<Arc<Route>>,
}

/// Build the URL path for a target, resolved against a routing-context
/// stack.
///
/// In addition to everything [`Mapper::path`
/// ](../mapper/struct.Mapper.html#method.path) accepts, the target can be
/// one of:
///
/// `"."`
///   : The current route (top of the stack).
///
/// `"/"`
///   : The root of the top-of-stack mapper, or `/` if it is empty.
///
/// `"/name"`, `"/name:sub"`, …
///   : A named route resolved against the bottom-of-stack mapper.
///
/// `".name"`, `"..name"`, …
///   : A named route relative to the current mapper; each additional
///     leading `.` starts one frame higher in the stack of nested mappers
///     (`".name"` is equivalent to `"name"`).
///
pub fn build_url(
    frames: &[RoutingFrame],
    target: &UrlTarget,
    args: &mut Vec<String>,
    kw: &mut HashMap<String, String>,
) -> Result<String, Error> {
    let current = frames
        .last()
        .ok_or_else(|| Error::other("no routing context present"))?;
    if let UrlTarget::Name(name) = target {
        if name == "." {
            // The current route.
            let route = current.route.clone().ok_or_else(|| {
                Error::argument("no route matched in the current context")
            })?;
            let path = current
                .mapper
                .path(&UrlTarget::Route(route), args, kw)?;
            return Ok(current.root.clone() + &path);
        }
        if name == "/" {
            // The root mapper instance.
            let root = &frames[0].root;
            return Ok(if root.is_empty() {
                "/".to_string()
            } else {
                root.clone()
            });
        }
        if let Some(rest) = name.strip_prefix('/') {
            // A route name anchored at the root.
            let frame = &frames[0];
            let path = frame
                .mapper
                .path(&UrlTarget::Name(rest.to_string()), args, kw)?;
            return Ok(frame.root.clone() + &path);
        }
        if name.starts_with('.') {
            // A route name relative to the current mapper; more dots walk
            // up the stack.
            let rel_name = name.trim_start_matches('.');
            let dots = name.len() - rel_name.len();
            if dots > frames.len() {
                return Err(Error::argument(format!(
                    "'{}' points above the routing context", name
                )));
            }
            let frame = &frames[frames.len() - dots];
            let path = frame
                .mapper
                .path(&UrlTarget::Name(rel_name.to_string()), args, kw)?;
            return Ok(frame.root.clone() + &path);
        }
    }
    // Resolve the target via the current mapper.
    let path = current.mapper.path(target, args, kw)?;
    Ok(current.root.clone() + &path)
}
