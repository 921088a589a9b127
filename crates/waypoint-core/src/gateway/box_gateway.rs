//! BoxModelGateway -- object-safe dynamic dispatch wrapper for ModelGateway.
//!
//! 1. `ModelGatewayDyn` is object-safe with boxed futures
//! 2. Blanket impl of `ModelGatewayDyn` for all `T: ModelGateway`
//! 3. `BoxModelGateway` wraps `Box<dyn ModelGatewayDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use futures_util::Stream;

use waypoint_types::gateway::{GatewayChunk, GatewayError, GatewayRequest, GatewayResponse};

use super::provider::ModelGateway;

/// Object-safe version of [`ModelGateway`] with boxed futures.
pub trait ModelGatewayDyn: Send + Sync {
    fn name(&self) -> &str;

    fn complete_boxed<'a>(
        &'a self,
        request: &'a GatewayRequest,
    ) -> Pin<Box<dyn Future<Output = Result<GatewayResponse, GatewayError>> + Send + 'a>>;

    fn stream_boxed(
        &self,
        request: GatewayRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<GatewayChunk, GatewayError>> + Send + 'static>>;
}

impl<T: ModelGateway> ModelGatewayDyn for T {
    fn name(&self) -> &str {
        ModelGateway::name(self)
    }

    fn complete_boxed<'a>(
        &'a self,
        request: &'a GatewayRequest,
    ) -> Pin<Box<dyn Future<Output = Result<GatewayResponse, GatewayError>> + Send + 'a>> {
        Box::pin(self.complete(request))
    }

    fn stream_boxed(
        &self,
        request: GatewayRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<GatewayChunk, GatewayError>> + Send + 'static>> {
        self.stream(request)
    }
}

/// Type-erased model gateway for runtime gateway selection.
///
/// `BoxModelGateway` itself implements [`ModelGateway`], so it can be used
/// anywhere a concrete gateway is expected (e.g. `PromptHandler<BoxModelGateway>`).
pub struct BoxModelGateway {
    inner: Box<dyn ModelGatewayDyn + Send + Sync>,
}

impl BoxModelGateway {
    pub fn new<T: ModelGateway + 'static>(gateway: T) -> Self {
        Self {
            inner: Box::new(gateway),
        }
    }
}

impl ModelGateway for BoxModelGateway {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(&self, request: &GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        self.inner.complete_boxed(request).await
    }

    fn stream(
        &self,
        request: GatewayRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<GatewayChunk, GatewayError>> + Send + 'static>> {
        self.inner.stream_boxed(request)
    }
}
