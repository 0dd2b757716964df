//! Result type aliases for Larder.

use crate::LarderError;

/// A specialized `Result` type for Larder operations.
pub type LarderResult<T> = Result<T, LarderError>;

/// A boxed future returning a `LarderResult`.
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = LarderResult<T>> + Send + 'a>>;
