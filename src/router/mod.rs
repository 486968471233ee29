//! Request routing: map method + exact path to an async handler.
//!
//! Paths are matched exactly after trailing-slash normalization. A request
//! whose path is registered under a different method gets
//! `405 Method Not Allowed` with an `Allow` header; an unregistered path gets
//! `404 Not Found`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::time::Instant;

use crate::context::Context;
use crate::http::{Method, Request, Response, StatusCode};

/// Type-erased, heap-allocated async handler.
pub type Handler =
    Arc<dyn Fn(Context) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Context) -> impl Future<Output = Response> + Send` that is also
/// `Send + Sync + 'static` implements this trait via the blanket impl below.
pub trait IntoHandler: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin((self)(ctx))
    }
}

struct Route {
    method: Method,
    path: String,
    handler: Handler,
}

/// Dispatches requests to the first route registered for their method and path.
///
/// # Examples
///
/// ```rust,no_run
/// use taskpool::context::Context;
/// use taskpool::http::{Response, StatusCode};
/// use taskpool::router::Router;
///
/// let mut router = Router::new();
/// router.get("/healthz", |_ctx: Context| async { Response::text(StatusCode::Ok, "OK") });
/// assert_eq!(router.len(), 1);
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for `GET` requests to `path`.
    pub fn get(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Get, path, handler);
    }

    /// Registers a handler for `POST` requests to `path`.
    pub fn post(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Post, path, handler);
    }

    fn add_route(&mut self, method: Method, path: &str, handler: impl IntoHandler) {
        let handler: Handler = Arc::new(move |ctx: Context| handler.call(ctx));
        self.routes.push(Route {
            method,
            path: normalize(path).to_owned(),
            handler,
        });
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Dispatches `request` and logs method, path, status and latency.
    pub async fn route(&self, request: Request) -> Response {
        let start = Instant::now();
        let method = request.method().clone();
        let path = request.path().to_owned();

        let response = self.dispatch(request).await;

        tracing::info!(
            %method,
            path = %path,
            status = response.status().as_u16(),
            elapsed = ?start.elapsed(),
            "request handled"
        );
        response
    }

    async fn dispatch(&self, request: Request) -> Response {
        let path = normalize(request.path()).to_owned();
        let mut allowed = Vec::new();

        for route in self.routes.iter().filter(|r| r.path == path) {
            if &route.method == request.method() {
                let handler = Arc::clone(&route.handler);
                return handler(Context::new(request)).await;
            }
            allowed.push(route.method.as_str());
        }

        if allowed.is_empty() {
            Response::text(StatusCode::NotFound, "Not Found")
        } else {
            Response::text(StatusCode::MethodNotAllowed, "Method not allowed")
                .header("Allow", allowed.join(", "))
        }
    }
}

fn normalize(path: &str) -> &str {
    match path.strip_suffix('/') {
        Some(trimmed) if !trimmed.is_empty() => trimmed,
        _ => path,
    }
}
