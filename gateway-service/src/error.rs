//! Gateway-side error types.
//!
//! `streetlight_core::CoreError` covers the control-plane failures; the
//! rest of this enum is `gateway-service`'s own transport and persistence
//! glue, following the same `thiserror`-derived enum pattern used
//! throughout the control plane rather than `anyhow` at this layer, so
//! callers can match on a specific failure when deciding whether to retry.

use streetlight_core::{CoreError, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("control plane error: {0:?}")]
    Core(CoreError),

    #[error("persistent config store error: {0:?}")]
    Store(StoreError),

    #[error("mqtt client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("mqtt connection error: {0}")]
    MqttConnection(#[from] rumqttc::ConnectionError),

    #[error("lora serial link error: {0}")]
    Serial(#[from] std::io::Error),
}

impl From<CoreError> for GatewayError {
    fn from(e: CoreError) -> Self {
        GatewayError::Core(e)
    }
}

impl From<StoreError> for GatewayError {
    fn from(e: StoreError) -> Self {
        GatewayError::Store(e)
    }
}
