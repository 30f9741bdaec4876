//! Command and query handlers with explicit middleware composition.
//!
//! A handler is wrapped once, at construction time, by an ordered list of
//! layers. The first layer in the list is the outermost one: it sees the
//! command first and the result last.

use async_trait::async_trait;
use std::fmt::{Debug, Display};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

#[async_trait]
pub trait CommandHandler<C>: Send + Sync
where
    C: Send + 'static,
{
    type Output: Send + 'static;
    type Error: Send + 'static;

    async fn handle(&self, cmd: C) -> Result<Self::Output, Self::Error>;
}

pub type BoxedHandler<C, R, E> = Arc<dyn CommandHandler<C, Output = R, Error = E>>;

pub type Middleware<C, R, E> = Box<dyn FnOnce(BoxedHandler<C, R, E>) -> BoxedHandler<C, R, E>>;

pub fn apply_middleware<C, R, E, H>(handler: H, layers: Vec<Middleware<C, R, E>>) -> BoxedHandler<C, R, E>
where
    C: Send + 'static,
    H: CommandHandler<C, Output = R, Error = E> + 'static,
{
    let mut wrapped: BoxedHandler<C, R, E> = Arc::new(handler);
    for layer in layers.into_iter().rev() {
        wrapped = layer(wrapped);
    }
    wrapped
}

/// The stack every service applies: logging outside, timing inside.
pub fn standard_layers<C, R, E>(name: &'static str) -> Vec<Middleware<C, R, E>>
where
    C: Debug + Send + Sync + 'static,
    R: Send + 'static,
    E: Display + Send + 'static,
{
    vec![logging(name), timing(name)]
}

pub fn logging<C, R, E>(name: &'static str) -> Middleware<C, R, E>
where
    C: Debug + Send + Sync + 'static,
    R: Send + 'static,
    E: Display + Send + 'static,
{
    Box::new(move |inner| Arc::new(Logging { name, inner }))
}

pub fn timing<C, R, E>(name: &'static str) -> Middleware<C, R, E>
where
    C: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    Box::new(move |inner| Arc::new(Timing { name, inner }))
}

struct Logging<C, R, E> {
    name: &'static str,
    inner: BoxedHandler<C, R, E>,
}

#[async_trait]
impl<C, R, E> CommandHandler<C> for Logging<C, R, E>
where
    C: Debug + Send + Sync + 'static,
    R: Send + 'static,
    E: Display + Send + 'static,
{
    type Output = R;
    type Error = E;

    async fn handle(&self, cmd: C) -> Result<R, E> {
        debug!(command = self.name, body = ?cmd, "Executing command");
        let result = self.inner.handle(cmd).await;
        match &result {
            Ok(_) => info!(command = self.name, "Command executed successfully"),
            Err(e) => error!(command = self.name, error = %e, "Failed to execute command"),
        }
        result
    }
}

struct Timing<C, R, E> {
    name: &'static str,
    inner: BoxedHandler<C, R, E>,
}

#[async_trait]
impl<C, R, E> CommandHandler<C> for Timing<C, R, E>
where
    C: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    type Output = R;
    type Error = E;

    async fn handle(&self, cmd: C) -> Result<R, E> {
        let start = Instant::now();
        let result = self.inner.handle(cmd).await;
        debug!(
            command = self.name,
            success = result.is_ok(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Command timing"
        );
        result
    }
}
