//! forge_web - a pre-allocated, connection-pooled HTTP server for microservices
//!
//! A performance-oriented HTTP server with comprehensive configuration
//! for memory management, connection handling, and protocol support.
//! Designed for microservices requiring fine-grained control over resources.
//!
//! # Protocol Support
//!
//! - **HTTP/1.1**: Full protocol with persistent connections and chunked encoding
//! - **HTTP/1.0**: Basic protocol support for legacy clients and simple requests
//!
//! # Features
//!
//! ## Security & Protection
//! - **Fully configurable limits and timeouts** for requests, responses, and connections.
//! - **Bounded connection pool** - a fixed number of pre-allocated connection slots is
//!   the crate's admission control; once exhausted, new sockets are dropped rather than
//!   queued unbounded.
//!
//! ## Performance & Memory
//! - **Pre-allocated per-connection buffers** - reused across requests and across
//!   connections via the pool, rather than allocated fresh each time.
//! - **Dedicated I/O worker pool** - a fixed set of pinned OS threads, each running its
//!   own tokio runtime, alongside the default loop the server was started from.
//!
//! ## Routing & Middleware
//! - **Radix-tree router** with literal and `{name}` dynamic path segments.
//! - **Composable middleware chain** - each [`Middleware`] can inspect, short-circuit,
//!   or wrap the call into the rest of the chain.
//! - **`multipart/form-data` parsing** - available to every handler via [`Context`].
//!
//! ## Production Ready
//! - **Structured JSON or plain-text error bodies** - see
//!   [`ServerLimits::json_errors`](limits::ServerLimits::json_errors).
//! - **Graceful shutdown** - [`Server::stop`] gives in-flight connections a grace period
//!   before forcing the I/O pool down.
//!
//! # Quick Start
//!
//! ## 1. Installation
//!
//! Add `forge_web` and [`tokio`](https://crates.io/crates/tokio) to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! forge_web = "0.1"
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! ## 2. Usage example
//! ```no_run
//! use forge_web::{Context, Handled, Handler, Response, Server, StatusCode};
//!
//! struct Hello;
//!
//! impl Handler for Hello {
//!     fn call<'a>(
//!         &'a self,
//!         _: &'a mut (),
//!         _: Context<'a>,
//!         resp: &'a mut Response,
//!     ) -> forge_web::middleware::BoxFuture<'a, Handled> {
//!         Box::pin(async move { resp.status(StatusCode::Ok).body("Hello World!") })
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = Server::builder().handler(Hello).build().unwrap();
//!     server.launch().await.unwrap();
//! }
//! ```
//!
//! # Use Cases
//!
//! - **High-throughput microservices** - configurable for specific workloads
//! - **Resource-constrained environments** - predictable memory usage
//! - **Internal APIs** - security-conscious defaults
pub(crate) mod http {
    pub mod context;
    pub mod cookie;
    pub mod mime;
    pub(crate) mod multipart;
    pub mod query;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod acceptor;
    pub(crate) mod connection;
    pub(crate) mod controller;
    pub(crate) mod io_pool;
    pub(crate) mod pool;
}
pub(crate) mod errors;
pub mod limits;
pub mod middleware;
pub(crate) mod route;

pub use crate::{
    http::{
        context::{Context, UploadedFile},
        query,
        request::Request,
        response::{
            write::{BodyWriter, WriteBuffer},
            Handled, Response,
        },
        types::{Method, StatusCode, Url, Version},
    },
    middleware::{Chain, Core, Middleware, Next},
    route::Params,
    server::{
        connection::ConnectionData,
        controller::{Handler, Server, ServerBuilder},
    },
};

#[doc(hidden)]
pub fn run_test<F: FnOnce(&Request, &mut Response) -> Handled>(f: F) {
    f(
        &Request::new(&crate::limits::ReqLimits::default()),
        &mut Response::new(&crate::limits::RespLimits::default()),
    );
}

#[doc(hidden)]
#[macro_export]
macro_rules! impt_default_handler {
    ($name:ident) => {
        use forge_web::{Context, Handled, Handler, Response, StatusCode};
        struct $name;

        // `<()>` to check functionality
        impl Handler<()> for $name {
            fn call<'a>(
                &'a self,
                _: &'a mut (),
                _: Context<'a>,
                resp: &'a mut Response,
            ) -> forge_web::middleware::BoxFuture<'a, Handled> {
                Box::pin(async move { resp.status(StatusCode::Ok).body("Hello world!") })
            }
        }
    };
}
