//! Middleware chain for call processing.
//!
//! Every middleware sees three hooks around a dispatched call:
//! `before_call` may rewrite or reject the request, `after_call` may rewrite
//! a successful response, and `on_error` may supply a replacement response
//! for a failure. All three run in registration order.

use std::future::Future;
use std::pin::Pin;

use relay_protocol::{HandlerError, Request, Response};

/// Trait for call middleware.
pub trait Middleware: Send + Sync {
    /// Runs before parameter binding. Returning `Err` aborts the call; the
    /// error is then handed to the `on_error` chain.
    fn before_call(
        &self,
        request: Request,
    ) -> impl Future<Output = Result<Request, HandlerError>> + Send {
        async move { Ok(request) }
    }

    /// Runs after a successful call, outermost response last.
    fn after_call(
        &self,
        _request: &Request,
        response: Response,
    ) -> impl Future<Output = Response> + Send {
        async move { response }
    }

    /// Runs after a failed call. The first middleware to return a response
    /// wins; if none does, the error is mapped to its default error object.
    fn on_error(
        &self,
        _request: &Request,
        _error: &HandlerError,
    ) -> impl Future<Output = Option<Response>> + Send {
        async { None }
    }

    /// Middleware name for debugging.
    fn name(&self) -> &str;
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe version of `Middleware`; all refs share lifetime `'a`.
trait MiddlewareDyn: Send + Sync {
    fn before_dyn<'a>(&'a self, request: Request) -> BoxFuture<'a, Result<Request, HandlerError>>;

    fn after_dyn<'a>(&'a self, request: &'a Request, response: Response) -> BoxFuture<'a, Response>;

    fn on_error_dyn<'a>(
        &'a self,
        request: &'a Request,
        error: &'a HandlerError,
    ) -> BoxFuture<'a, Option<Response>>;

    fn name_dyn(&self) -> &str;
}

impl<T: Middleware> MiddlewareDyn for T {
    fn before_dyn<'a>(&'a self, request: Request) -> BoxFuture<'a, Result<Request, HandlerError>> {
        Box::pin(self.before_call(request))
    }

    fn after_dyn<'a>(&'a self, request: &'a Request, response: Response) -> BoxFuture<'a, Response> {
        Box::pin(self.after_call(request, response))
    }

    fn on_error_dyn<'a>(
        &'a self,
        request: &'a Request,
        error: &'a HandlerError,
    ) -> BoxFuture<'a, Option<Response>> {
        Box::pin(self.on_error(request, error))
    }

    fn name_dyn(&self) -> &str {
        self.name()
    }
}

/// A `before_call` hook rejected the request.
///
/// Carries the request as it stood before the rejecting hook ran, so the
/// `on_error` chain still sees it.
#[derive(Debug)]
pub struct Rejected {
    pub request: Request,
    pub error: HandlerError,
}

/// An append-only chain of middleware executed in registration order.
pub struct MiddlewareChain {
    middlewares: Vec<Box<dyn MiddlewareDyn>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self {
            middlewares: Vec::new(),
        }
    }

    pub fn add<M: Middleware + 'static>(&mut self, middleware: M) {
        self.middlewares.push(Box::new(middleware));
    }

    /// Run the before-chain. Returns the (possibly rewritten) request, or
    /// the first rejection.
    pub async fn run_before(&self, mut request: Request) -> Result<Request, Rejected> {
        for mw in &self.middlewares {
            match mw.before_dyn(request.clone()).await {
                Ok(next) => request = next,
                Err(error) => return Err(Rejected { request, error }),
            }
        }
        Ok(request)
    }

    /// Run the after-chain, threading the response through every hook.
    pub async fn run_after(&self, request: &Request, mut response: Response) -> Response {
        for mw in &self.middlewares {
            response = mw.after_dyn(request, response).await;
        }
        response
    }

    /// Run the error-chain until a middleware supplies a response.
    pub async fn run_on_error(&self, request: &Request, error: &HandlerError) -> Option<Response> {
        for mw in &self.middlewares {
            if let Some(response) = mw.on_error_dyn(request, error).await {
                return Some(response);
            }
        }
        None
    }

    pub fn names(&self) -> Vec<&str> {
        self.middlewares.iter().map(|m| m.name_dyn()).collect()
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }
}

impl Default for MiddlewareChain {
    fn default() -> Self {
        Self::new()
    }
}
