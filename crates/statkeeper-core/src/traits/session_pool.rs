//! Session pool abstraction for executing work on pooled database handles.

use std::fmt;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::debug;

use crate::error::AppError;
use crate::result::AppResult;

/// A pool of session handles.
///
/// A handle obtained with [`get`](SessionPool::get) must be handed back
/// through exactly one of [`put`](SessionPool::put) (reusable) or
/// [`destroy`](SessionPool::destroy) (state unknown, must not be reused).
#[async_trait]
pub trait SessionPool: Send + Sync + 'static {
    /// The pooled handle type.
    type Session: Send + 'static;

    /// Take a session from the pool.
    async fn get(&self) -> AppResult<Self::Session>;

    /// Return a healthy session for reuse.
    fn put(&self, session: Self::Session);

    /// Discard a session whose state can no longer be trusted.
    fn destroy(&self, session: Self::Session);
}

/// Run `f` with a session from `pool`.
///
/// The session goes back to the pool when `f` succeeds and is destroyed
/// when it fails, so every exit path releases the handle.
pub async fn call_with_session<P, T, E, F>(pool: &P, f: F) -> Result<T, E>
where
    P: SessionPool + ?Sized,
    E: From<AppError> + fmt::Display,
    F: for<'s> FnOnce(&'s mut P::Session) -> BoxFuture<'s, Result<T, E>>,
{
    let mut session = pool.get().await.map_err(E::from)?;
    let result = f(&mut session).await;

    match &result {
        Ok(_) => pool.put(session),
        Err(e) => {
            debug!(error = %e, "Destroying session after failed call");
            pool.destroy(session);
        }
    }

    result
}
