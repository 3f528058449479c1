use serde::ser::Serializer;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Write rejected by the upstream service; the message is surfaced verbatim.
    #[error("{message}")]
    Upstream { status: u16, message: String },
    #[error("request error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("websocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("json decode error: {0}")]
    SimdJson(#[from] simd_json::Error),
    #[error("payload error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(value))
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_error_displays_message_only() {
        let error = AppError::Upstream {
            status: 400,
            message: "Position not found".to_string(),
        };
        assert_eq!(error.to_string(), "Position not found");
    }

    #[test]
    fn serializes_as_display_string() {
        let error = AppError::InvalidArgument("orderId must not be empty".to_string());
        let encoded = serde_json::to_string(&error).expect("error should serialize");
        assert_eq!(encoded, "\"invalid argument: orderId must not be empty\"");
    }

    #[test]
    fn decode_failures_convert_into_payload_variants() {
        let json_error = serde_json::from_str::<serde_json::Value>("{")
            .expect_err("truncated json should fail");
        let mut bytes = b"{".to_vec();
        let simd_error = simd_json::serde::from_slice::<serde_json::Value>(&mut bytes)
            .expect_err("truncated json should fail");

        for error in [AppError::from(json_error), AppError::from(simd_error)] {
            let kind = match error {
                AppError::InvalidArgument(_) => "argument",
                AppError::Upstream { .. } => "upstream",
                AppError::Reqwest(_) | AppError::WebSocket(_) => "transport",
                AppError::SimdJson(_) | AppError::Json(_) => "payload",
            };
            assert_eq!(kind, "payload");
        }
    }
}
