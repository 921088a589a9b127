//! ModelGateway trait definition.
//!
//! Uses RPITIT for `complete` and `Pin<Box<dyn Stream>>` for `stream` so the
//! trait can be wrapped by `BoxModelGateway` for runtime selection.

use std::pin::Pin;

use futures_util::Stream;

use waypoint_types::gateway::{GatewayChunk, GatewayError, GatewayRequest, GatewayResponse};

/// External AI model gateway.
///
/// Failures are classified by the gateway itself (see
/// [`GatewayError::is_retryable`]); node handlers pass that classification
/// through unchanged.
pub trait ModelGateway: Send + Sync {
    /// Human-readable gateway name.
    fn name(&self) -> &str;

    /// Send a completion request and receive the full response.
    fn complete(
        &self,
        request: &GatewayRequest,
    ) -> impl std::future::Future<Output = Result<GatewayResponse, GatewayError>> + Send;

    /// Send a streaming completion request. Returns a stream of chunks ending
    /// with [`GatewayChunk::Finished`].
    fn stream(
        &self,
        request: GatewayRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<GatewayChunk, GatewayError>> + Send + 'static>>;
}
