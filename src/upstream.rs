use crate::constants::GEMINI_API_KEY_HEADER;
use crate::main_helper::RelayConfig;
use crate::specs::gemini::GeminiRequest;
use crate::types::*;

/// Opens the provider stream. A single attempt; a non-2xx status comes back
/// as [`RelayError::Upstream`] with the error body for logging.
pub async fn open_stream(
    client: &reqwest::Client,
    config: &RelayConfig,
    request: &GeminiRequest,
) -> Result<reqwest::Response> {
    tracing::debug!(
        "[⚙️  -> ☁️ ] Opening stream: model={} turns={}",
        config.model,
        request.contents.len()
    );

    let response = client
        .post(config.stream_url())
        .header(GEMINI_API_KEY_HEADER, &config.api_key)
        .json(request)
        .send()
        .await
        .map_err(RelayError::Network)?;

    let status = response.status();
    tracing::info!("[☁️  -> ⚙️ ] Status: {}", status);

    if status.is_success() {
        return Ok(response);
    }

    let error_body = match response.text().await {
        Ok(text) => text,
        Err(e) => format!("Upstream error (body unreadable): {}", e),
    };
    Err(RelayError::Upstream(status, error_body).into())
}

/// The record sent downstream when the stream could not be opened.
pub fn failure_record(err: &ObservedError) -> StreamRecord {
    match &err.inner {
        RelayError::Upstream(status, _) => {
            StreamRecord::error(format!("Gemini API error: {}", status.as_u16()))
        }
        _ => StreamRecord::error(crate::constants::GENERIC_FAILURE_MESSAGE),
    }
}
