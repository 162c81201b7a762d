//! Bounded pool of reusable per-connection buffers.
//!
//! Filled once at startup with `server.max_connections` [`PooledConnection`]s,
//! each pre-allocating its request/response/parser buffers so that accepting
//! a new TCP connection never has to grow them from scratch. The acceptor
//! [`Pool::acquire`]s one per accepted socket and [`Pool::release`]s it back
//! once the connection task using it exits; an empty pool is admission
//! control, not an error - the acceptor simply drops the socket.

use crate::{
    errors::ConfigError,
    http::request::{Parser, Request},
    http::response::Response,
    limits::{Config, RespLimits},
};
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU8, Ordering};

const IDLE: u8 = 0;
const ACTIVE: u8 = 1;

/// One connection's worth of reusable request/response/parser state.
pub(crate) struct PooledConnection {
    pub(crate) request: Request,
    pub(crate) response: Response,
    pub(crate) parser: Parser,
    state: AtomicU8,
}

impl PooledConnection {
    fn new(cfg: &Config) -> Self {
        Self {
            request: Request::new(&cfg.request),
            response: Response::new(&cfg.response),
            parser: Parser::new(&cfg.request),
            state: AtomicU8::new(IDLE),
        }
    }

    fn reset(&mut self, resp_limits: &RespLimits) {
        self.request.reset();
        self.response.reset(resp_limits);
        self.parser.reset();
    }
}

pub(crate) struct Pool {
    slots: ArrayQueue<PooledConnection>,
}

impl Pool {
    /// Fills a new pool with `cfg.server.max_connections` connection objects.
    ///
    /// Returns [`ConfigError::PoolInit`] if not even one could be created -
    /// an empty pool can never admit a connection, so it is a startup
    /// failure rather than something the acceptor can degrade through.
    pub(crate) fn new(cfg: &Config) -> Result<Self, ConfigError> {
        let capacity = cfg.server.max_connections.max(1);
        let slots = ArrayQueue::new(capacity);

        for _ in 0..capacity {
            if slots.push(PooledConnection::new(cfg)).is_err() {
                break;
            }
        }

        if slots.is_empty() {
            return Err(ConfigError::PoolInit);
        }

        Ok(Self { slots })
    }

    /// Pops an idle connection object, retrying up to 3 times if a popped
    /// object is found not to be idle (requeuing it rather than dropping
    /// it). Returns `None` if the pool is empty or stays contended across
    /// all 3 attempts - callers treat this as admission control.
    pub(crate) fn acquire(&self) -> Option<PooledConnection> {
        for _ in 0..3 {
            let conn = self.slots.pop()?;
            if conn
                .state
                .compare_exchange(IDLE, ACTIVE, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(conn);
            }
            let _ = self.slots.push(conn);
        }
        None
    }

    /// Resets `conn`'s buffers and returns it to the pool. Silently drops it
    /// if the pool is somehow already full (it never should be, since every
    /// object originates from exactly one pool and it was just taken out of
    /// this one).
    pub(crate) fn release(&self, mut conn: PooledConnection, resp_limits: &RespLimits) {
        conn.reset(resp_limits);
        conn.state.store(IDLE, Ordering::Release);
        let _ = self.slots.push(conn);
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_to_configured_capacity() {
        let mut cfg = Config::default();
        cfg.server.max_connections = 4;
        let pool = Pool::new(&cfg).unwrap();

        assert_eq!(pool.len(), 4);
        assert_eq!(pool.capacity(), 4);
    }

    #[test]
    fn acquire_drains_and_release_refills() {
        let mut cfg = Config::default();
        cfg.server.max_connections = 2;
        let pool = Pool::new(&cfg).unwrap();

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert!(pool.acquire().is_none());
        assert_eq!(pool.len(), 0);

        pool.release(a, &cfg.response);
        assert_eq!(pool.len(), 1);
        pool.release(b, &cfg.response);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn zero_configured_connections_still_yields_one_slot() {
        let mut cfg = Config::default();
        cfg.server.max_connections = 0;
        let pool = Pool::new(&cfg).unwrap();
        assert_eq!(pool.capacity(), 1);
    }
}
