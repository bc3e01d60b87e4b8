//! Request lifecycle: callback phases, wrappers, and error logging at the
//! server boundary.

use rhino::{
    testing::TestClient, Body, Callback, Context, Environ, Error, Mapper,
    Next, Request, Resource,
};
use std::io::Write;
use std::sync::{Arc, Mutex};

type Log = Arc<Mutex<Vec<&'static str>>>;

fn record(log: &Log, entry: &'static str) {
    if let Ok(mut entries) = log.lock() {
        entries.push(entry);
    }
}

#[test]
fn callbacks_fire_in_phase_order() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    let mut resource = Resource::new();
    let handler_log = log.clone();
    resource.get(move |_r: &mut Request, _c: &mut Context, _a: &_| {
        record(&handler_log, "handler");
        Ok("done")
    });

    let mut app = Mapper::new();
    app.add("/", resource).unwrap();
    let wrapper_log = log.clone();
    app.add_wrapper(
        move |req: &mut Request, ctx: &mut Context, next: &mut Next| {
            let enter_log = wrapper_log.clone();
            ctx.add_callback(Callback::Enter(Box::new(move |_| {
                record(&enter_log, "enter");
            })));
            let leave_log = wrapper_log.clone();
            ctx.add_callback(Callback::Leave(Box::new(move |_, _| {
                record(&leave_log, "leave");
            })));
            let finalize_log = wrapper_log.clone();
            ctx.add_callback(Callback::Finalize(Box::new(move |_, _| {
                record(&finalize_log, "finalize");
            })));
            let teardown_log = wrapper_log.clone();
            ctx.add_callback(Callback::Teardown(Box::new(move || {
                record(&teardown_log, "teardown");
            })));
            let close_log = wrapper_log.clone();
            ctx.add_callback(Callback::Close(Box::new(move || {
                record(&close_log, "close");
            })));
            next(req, ctx)
        },
    );

    let client = TestClient::new(app);
    assert_eq!(client.get("/").code(), 200);
    assert_eq!(
        *log.lock().unwrap(),
        vec!["enter", "handler", "leave", "finalize", "teardown", "close"],
    );
}

#[test]
fn close_fires_for_streamed_bodies() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    let mut resource = Resource::new();
    resource.get(|_r: &mut Request, _c: &mut Context, _a: &_| {
        Ok(Body::iter(vec!["chunk1", "chunk2"]))
    });
    let mut app = Mapper::new();
    app.add("/stream", resource).unwrap();
    let wrapper_log = log.clone();
    app.add_wrapper(
        move |req: &mut Request, ctx: &mut Context, next: &mut Next| {
            let close_log = wrapper_log.clone();
            ctx.add_callback(Callback::Close(Box::new(move || {
                record(&close_log, "close");
            })));
            next(req, ctx)
        },
    );

    let client = TestClient::new(app);
    let response = client.get("/stream");
    assert_eq!(response.text(), "chunk1chunk2");
    assert_eq!(*log.lock().unwrap(), vec!["close"]);
}

#[test]
fn wrappers_can_replace_error_responses() {
    let mut broken = Resource::new();
    broken.get(|_r, _c, _a| -> Result<&'static str, Error> {
        Err(rhino::HttpError::forbidden().into())
    });
    let mut app = Mapper::new();
    app.add("/x", broken).unwrap();
    app.add_wrapper(
        |req: &mut Request, ctx: &mut Context, next: &mut Next| {
            match next(req, ctx) {
                Err(Error::Http(e)) if e.status().code() == 403 => {
                    Ok(rhino::ok("shadowed"))
                }
                other => other,
            }
        },
    );

    let client = TestClient::new(app);
    let response = client.get("/x");
    assert_eq!(response.code(), 200);
    assert_eq!(response.text(), "shadowed");
}

#[test]
fn context_properties_cache_per_request() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let calls = Arc::new(AtomicUsize::new(0));
    let factory_calls = calls.clone();

    let mut resource = Resource::new();
    resource.get(|_r: &mut Request, ctx: &mut Context, _a: &_| {
        let first = *ctx.get::<usize>("counter")?;
        let second = *ctx.get::<usize>("counter")?;
        Ok(format!("{}/{}", first, second))
    });
    let mut app = Mapper::new();
    app.add("/", resource).unwrap();
    app.add_ctx_property(
        "counter",
        move |_| Box::new(factory_calls.fetch_add(1, Ordering::SeqCst)),
        true,
    )
    .unwrap();

    let client = TestClient::new(app);
    // Cached within one request, recomputed for the next.
    assert_eq!(client.get("/").text(), "0/0");
    assert_eq!(client.get("/").text(), "1/1");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn mapper_config_reaches_the_context() {
    let mut resource = Resource::new();
    resource.get(|_r: &mut Request, ctx: &mut Context, _a: &_| {
        let greeting = ctx
            .config_get::<String>("greeting")
            .map(|g| g.to_string())
            .unwrap_or_default();
        Ok(greeting)
    });
    let mut app = Mapper::new();
    app.add("/", resource).unwrap();
    app.set_config("greeting", "hello".to_string());

    let client = TestClient::new(app);
    assert_eq!(client.get("/").text(), "hello");
}

// Captures the server error stream.
#[derive(Clone)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Ok(mut bytes) = self.0.lock() {
            bytes.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn unhandled_errors_are_logged_to_the_error_stream() {
    let mut broken = Resource::new();
    broken.get(|_r, _c, _a| -> Result<&'static str, Error> {
        Err(Error::other("the database is on fire"))
    });
    let mut app = Mapper::new();
    app.add("/broken", broken).unwrap();
    let app = Arc::new(app);

    let errors = SharedBuffer(Arc::new(Mutex::new(Vec::new())));
    let mut environ = Environ::new();
    environ.set("REQUEST_METHOD", "GET");
    environ.set("PATH_INFO", "/broken");
    environ.set("SERVER_NAME", "localhost");
    environ.set("SERVER_PORT", "80");
    environ.set("url.scheme", "http");
    environ.set_errors(errors.clone());

    let mut status = String::new();
    let body = app.wsgi(environ, &mut |wire_status, _| {
        status = wire_status.to_string();
    });
    drop(body);

    assert_eq!(status, "500 Internal Server Error");
    let logged = String::from_utf8(errors.0.lock().unwrap().clone()).unwrap();
    assert!(logged.contains("the database is on fire"));
}
