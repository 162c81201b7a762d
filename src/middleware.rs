//! Middleware chain: user-registered middleware folded around a routing core.
//!
//! A middleware is anything that can inspect a request, optionally touch the
//! response, and decide whether to call onward into the rest of the chain
//! via [`Next`]. The chain is composed once at startup (see
//! [`Chain::new`]) into a fixed right-to-left nesting, so the first
//! middleware registered is the outermost one a request passes through.

use crate::{
    http::{request::Request, response::Response},
    server::connection::ConnectionData,
    Handled,
};
use std::{future::Future, pin::Pin, sync::Arc};

/// A boxed, `Send` future - the common denominator needed to make
/// [`Middleware`] and [`Core`] usable as trait objects.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A single link in the middleware chain.
///
/// Implementations decide, per request, whether to call `next` (continuing
/// the chain), short-circuit by returning `Handled` directly, or run logic
/// both before and after the inner call.
pub trait Middleware<S = ()>: Send + Sync + 'static
where
    S: ConnectionData,
{
    fn call<'a>(
        &'a self,
        data: &'a mut S,
        request: &'a Request,
        response: &'a mut Response,
        next: Next<S>,
    ) -> BoxFuture<'a, Handled>;
}

/// The routing core a [`Chain`] is built around: resolves `request` to a
/// handler and invokes it, or produces an error response if no route
/// matches. Supplied by the application controller at startup.
pub trait Core<S>: Send + Sync + 'static
where
    S: ConnectionData,
{
    fn call<'a>(
        &'a self,
        data: &'a mut S,
        request: &'a Request,
        response: &'a mut Response,
    ) -> BoxFuture<'a, Handled>;
}

/// The remaining portion of a chain, handed to a [`Middleware`] so it can
/// call onward. Owns `Arc` clones rather than borrowing the chain, so it
/// carries no lifetime of its own and can be moved into a boxed future
/// without dangling references back to the [`Chain`] that produced it.
pub struct Next<S: ConnectionData> {
    middlewares: Arc<[Arc<dyn Middleware<S>>]>,
    core: Arc<dyn Core<S>>,
    index: usize,
}

impl<S: ConnectionData> Next<S> {
    fn new(middlewares: Arc<[Arc<dyn Middleware<S>>]>, core: Arc<dyn Core<S>>) -> Self {
        Self {
            middlewares,
            core,
            index: 0,
        }
    }

    /// Calls the next middleware in line, or the routing core once the
    /// chain is exhausted.
    pub async fn run(mut self, data: &mut S, request: &Request, response: &mut Response) -> Handled {
        match self.middlewares.get(self.index).cloned() {
            Some(middleware) => {
                self.index += 1;
                middleware.call(data, request, response, self).await
            }
            None => self.core.call(data, request, response).await,
        }
    }
}

/// The installed, request-ready middleware chain.
///
/// Built once at server startup via [`Chain::new`] and shared across
/// connections behind an `Arc`. Because the routing core is mandatory,
/// there is no representable "chain without a core" state - dispatch
/// always bottoms out in a real handler lookup or a routing error
/// response, never a silent no-op.
pub struct Chain<S: ConnectionData> {
    middlewares: Arc<[Arc<dyn Middleware<S>>]>,
    core: Arc<dyn Core<S>>,
}

impl<S: ConnectionData> Chain<S> {
    /// Composes `middlewares`, in registration order, around `core`.
    ///
    /// `middlewares[0]` is outermost: it runs first on the way in and last
    /// on the way out, matching how most request-pipeline frameworks order
    /// registration.
    pub fn new(middlewares: Vec<Arc<dyn Middleware<S>>>, core: Arc<dyn Core<S>>) -> Self {
        Self {
            middlewares: Arc::from(middlewares),
            core,
        }
    }

    /// Runs a request through the full chain.
    pub async fn dispatch(&self, data: &mut S, request: &Request, response: &mut Response) -> Handled {
        let next = Next::new(Arc::clone(&self.middlewares), Arc::clone(&self.core));
        next.run(data, request, response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::{ReqLimits, RespLimits};

    struct RecordingMiddleware {
        label: &'static str,
        log: std::sync::Arc<std::sync::Mutex<Vec<&'static str>>>,
    }

    impl Middleware for RecordingMiddleware {
        fn call<'a>(
            &'a self,
            data: &'a mut (),
            request: &'a Request,
            response: &'a mut Response,
            next: Next<()>,
        ) -> BoxFuture<'a, Handled> {
            Box::pin(async move {
                self.log.lock().unwrap().push(self.label);
                let handled = next.run(data, request, response).await;
                self.log.lock().unwrap().push(self.label);
                handled
            })
        }
    }

    struct OkCore;

    impl Core<()> for OkCore {
        fn call<'a>(
            &'a self,
            _data: &'a mut (),
            _request: &'a Request,
            response: &'a mut Response,
        ) -> BoxFuture<'a, Handled> {
            Box::pin(async move { response.status(crate::StatusCode::Ok).body("ok") })
        }
    }

    struct ShortCircuitMiddleware;

    impl Middleware for ShortCircuitMiddleware {
        fn call<'a>(
            &'a self,
            _data: &'a mut (),
            _request: &'a Request,
            response: &'a mut Response,
            _next: Next<()>,
        ) -> BoxFuture<'a, Handled> {
            Box::pin(async move { response.status(crate::StatusCode::Forbidden).body("nope") })
        }
    }

    fn request() -> Request {
        Request::new(&ReqLimits::default())
    }

    fn response() -> Response {
        Response::new(&RespLimits::default())
    }

    #[tokio::test]
    async fn chain_runs_middlewares_outermost_first_and_unwinds_in_reverse() {
        let log = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let outer = Arc::new(RecordingMiddleware {
            label: "outer",
            log: log.clone(),
        });
        let inner = Arc::new(RecordingMiddleware {
            label: "inner",
            log: log.clone(),
        });

        let chain = Chain::new(vec![outer, inner], Arc::new(OkCore));

        let req = request();
        let mut resp = response();
        let mut data = ();

        chain.dispatch(&mut data, &req, &mut resp).await;

        assert_eq!(*log.lock().unwrap(), vec!["outer", "inner", "inner", "outer"]);
    }

    #[tokio::test]
    async fn middleware_can_short_circuit_before_the_core_runs() {
        let chain: Chain<()> = Chain::new(vec![Arc::new(ShortCircuitMiddleware)], Arc::new(OkCore));

        let req = request();
        let mut resp = response();
        let mut data = ();

        chain.dispatch(&mut data, &req, &mut resp).await;

        let head = String::from_utf8(resp.buffer().clone()).unwrap();
        assert!(head.starts_with("HTTP/1.1 403 "));
    }

    #[tokio::test]
    async fn empty_chain_falls_straight_through_to_core() {
        let chain: Chain<()> = Chain::new(vec![], Arc::new(OkCore));

        let req = request();
        let mut resp = response();
        let mut data = ();

        chain.dispatch(&mut data, &req, &mut resp).await;

        let head = String::from_utf8(resp.buffer().clone()).unwrap();
        assert!(head.starts_with("HTTP/1.1 200 "));
    }
}
