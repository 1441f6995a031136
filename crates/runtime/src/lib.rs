use std::future::Future;
use std::pin::Pin;

pub mod cancel;
pub mod event_bus;
pub mod retry;

pub use cancel::*;
pub use event_bus::*;
pub use retry::*;

/// Boxed future used at dyn-compatible async seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
