//! Offline gateway that echoes the rendered prompt back.
//!
//! Used for dry runs: prompt nodes execute end to end (templating, streaming,
//! metering, routing) without a network call. Token counts are estimated at
//! four characters per token.

use std::pin::Pin;

use futures_util::Stream;
use waypoint_types::gateway::{GatewayChunk, GatewayError, GatewayRequest, GatewayResponse};

use super::provider::ModelGateway;

#[derive(Debug, Clone, Default)]
pub struct EchoGateway;

fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

fn echo(request: &GatewayRequest) -> GatewayResponse {
    let text = match &request.system {
        Some(system) => format!("[{system}] {}", request.prompt),
        None => request.prompt.clone(),
    };
    GatewayResponse {
        tokens_in: estimate_tokens(&request.prompt)
            + request.system.as_deref().map_or(0, estimate_tokens),
        tokens_out: estimate_tokens(&text),
        model: request.model.clone(),
        text,
    }
}

impl ModelGateway for EchoGateway {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, request: &GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        if request.prompt.is_empty() {
            return Err(GatewayError::InvalidRequest("empty prompt".to_string()));
        }
        Ok(echo(request))
    }

    fn stream(
        &self,
        request: GatewayRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<GatewayChunk, GatewayError>> + Send + 'static>> {
        Box::pin(async_stream::stream! {
            if request.prompt.is_empty() {
                yield Err(GatewayError::InvalidRequest("empty prompt".to_string()));
                return;
            }
            let response = echo(&request);
            for word in response.text.split_inclusive(' ') {
                yield Ok(GatewayChunk::TextDelta { text: word.to_string() });
            }
            yield Ok(GatewayChunk::Finished {
                model: response.model,
                tokens_in: response.tokens_in,
                tokens_out: response.tokens_out,
            });
        })
    }
}
