//! The per-request context: configuration, lazily computed properties, and
//! phase-ordered callbacks.
//!

use crate::{Error, Request, Response};
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared configuration values, copied from the mapper into every context.
///
pub type ConfigMap = HashMap<String, Arc<dyn Any + Send + Sync>>;

/// A context-property factory. Invoked with the context on first access
/// (every access for uncached properties).
///
pub type PropertyFactory =
    Arc<dyn Fn(&Context) -> Box<dyn Any + Send + Sync> + Send + Sync>;

/// A callback to run at a given phase of the request lifecycle.
///
/// The phases fire in this order:
///
/// `Enter`
///   : From the resource, after a handler for the current request has been
///     resolved, but before the handler is called.
///
/// `Leave`
///   : From the resource, after the handler has returned successfully.
///
/// `Finalize`
///   : From the mapper, after conditional-request handling, before the
///     response is emitted.
///
/// `Teardown`
///   : From the mapper, after the response headers have been sent and the
///     body iterator handed to the server.
///
/// `Close`
///   : When the server closes the response body iterator.
///
pub enum Callback {
    Enter(Box<dyn FnMut(&Request)>),
    Leave(Box<dyn FnMut(&Request, &mut Response)>),
    Finalize(Box<dyn FnMut(&Request, &mut Response)>),
    Teardown(Box<dyn FnOnce()>),
    Close(Box<dyn FnOnce()>),
}

struct PropertySlot {
    factory: PropertyFactory,
    cached: bool,
    value: Option<Arc<dyn Any + Send + Sync>>,
}

/// A per-request value carrying configuration, properties and callbacks.
///
/// Created by the mapper when a request enters and destroyed after the
/// `Close` callbacks have fired.
///
#[derive(Default)]
pub struct Context {
    /// Configuration inherited from the dispatching mapper.
    pub config: ConfigMap,
    properties: RefCell<HashMap<String, PropertySlot>>,
    enter: Vec<Box<dyn FnMut(&Request)>>,
    leave: Vec<Box<dyn FnMut(&Request, &mut Response)>>,
    finalize: Vec<Box<dyn FnMut(&Request, &mut Response)>>,
    teardown: Vec<Box<dyn FnOnce()>>,
    close: Vec<Box<dyn FnOnce()>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a callback to the context. Within one phase, callbacks run in
    /// the order they were added.
    ///
    pub fn add_callback(&mut self, callback: Callback) {
        match callback {
            Callback::Enter(f) => self.enter.push(f),
            Callback::Leave(f) => self.leave.push(f),
            Callback::Finalize(f) => self.finalize.push(f),
            Callback::Teardown(f) => self.teardown.push(f),
            Callback::Close(f) => self.close.push(f),
        }
    }

    /// Add a property to the context.
    ///
    /// See [`Mapper::add_ctx_property`
    /// ](../mapper/struct.Mapper.html#method.add_ctx_property), which uses
    /// this to install the properties added on the mapper level.
    ///
    pub fn add_property(
        &mut self,
        name: &str,
        factory: PropertyFactory,
        cached: bool,
    ) -> Result<(), Error> {
        let mut properties = self.properties.borrow_mut();
        if properties.contains_key(name) {
            return Err(Error::argument(format!(
                "a context property named '{}' already exists",
                name
            )));
        }
        properties.insert(
            name.to_string(),
            PropertySlot { factory, cached, value: None },
        );
        Ok(())
    }

    /// Get a property value, invoking its factory if necessary.
    ///
    /// A cached property returns the exact same value on every access; an
    /// uncached one re-invokes the factory each time. Unknown names and
    /// type mismatches are argument errors.
    ///
    pub fn get<T>(&self, name: &str) -> Result<Arc<T>, Error>
    where
        T: Any + Send + Sync,
    {
        let (factory, cached) = {
            let properties = self.properties.borrow();
            let slot = properties.get(name).ok_or_else(|| {
                Error::argument(format!("no context property named '{}'", name))
            })?;
            if let Some(value) = &slot.value {
                return value.clone().downcast::<T>().map_err(|_| {
                    Error::argument(format!(
                        "context property '{}' has another type",
                        name
                    ))
                });
            }
            (slot.factory.clone(), slot.cached)
        };
        // The borrow is released here so the factory may read other
        // properties through the same context.
        let value: Arc<dyn Any + Send + Sync> = Arc::from(factory(self));
        if cached {
            if let Some(slot) = self.properties.borrow_mut().get_mut(name) {
                slot.value = Some(value.clone());
            }
        }
        value.downcast::<T>().map_err(|_| {
            Error::argument(format!(
                "context property '{}' has another type",
                name
            ))
        })
    }

    /// Get a configuration value by key.
    ///
    pub fn config_get<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.config
            .get(key)
            .and_then(|v| v.clone().downcast::<T>().ok())
    }

    pub(crate) fn run_enter(&mut self, request: &Request) {
        for callback in &mut self.enter {
            callback(request);
        }
    }

    pub(crate) fn run_leave(
        &mut self,
        request: &Request,
        response: &mut Response,
    ) {
        for callback in &mut self.leave {
            callback(request, response);
        }
    }

    pub(crate) fn run_finalize(
        &mut self,
        request: &Request,
        response: &mut Response,
    ) {
        for callback in &mut self.finalize {
            callback(request, response);
        }
    }

    pub(crate) fn run_teardown(&mut self) {
        for callback in self.teardown.drain(..) {
            callback();
        }
    }

    pub(crate) fn take_close(&mut self) -> Vec<Box<dyn FnOnce()>> {
        std::mem::take(&mut self.close)
    }
}
