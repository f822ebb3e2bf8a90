use std::sync::Arc;

use application::{ChatApi, CredentialProvider, RealtimeChannel, StaticCredentials};
use config::ClientConfig;
use thiserror::Error;

use crate::{
    http_api::{ApiError, HttpChatApi},
    ws_channel::{WsChannelOptions, WsRealtimeChannel},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("http client error: {0}")]
    Http(#[from] ApiError),
}

/// 按配置装配好的网络适配器
#[derive(Clone)]
pub struct Infrastructure {
    pub api: Arc<HttpChatApi>,
    pub channel: Arc<WsRealtimeChannel>,
}

impl Infrastructure {
    pub fn from_config(config: &ClientConfig) -> Result<Self, InfrastructureError> {
        let credentials: Arc<dyn CredentialProvider> = match &config.api.auth_token {
            Some(token) => Arc::new(StaticCredentials::new(token.clone())),
            None => Arc::new(StaticCredentials::anonymous()),
        };
        Self::with_credentials(config, credentials)
    }

    pub fn with_credentials(
        config: &ClientConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, InfrastructureError> {
        let api = Arc::new(HttpChatApi::from_config(&config.api, credentials.clone())?);
        let channel = Arc::new(WsRealtimeChannel::new(
            WsChannelOptions::from_config(&config.realtime),
            credentials,
        ));
        Ok(Self { api, channel })
    }

    pub fn api_trait(&self) -> Arc<dyn ChatApi> {
        self.api.clone()
    }

    pub fn channel_trait(&self) -> Arc<dyn RealtimeChannel> {
        self.channel.clone()
    }
}
