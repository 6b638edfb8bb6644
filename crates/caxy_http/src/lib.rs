use tokio::io::{AsyncRead, AsyncWrite};

pub mod responses;

/// Byte stream connected to a client. Boxed so handlers stay agnostic of
/// the concrete socket type (and so tests can drive them in memory).
pub trait ClientStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ClientStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}
