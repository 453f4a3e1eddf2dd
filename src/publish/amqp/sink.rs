// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::config::AmqpSinkConfig;
use crate::document::Document;
use crate::errors::PublishError;
use crate::publish::amqp::{AmqpSettings, MessageBrokerClient};
use crate::traits::{Rendering, Sink};

/// Publishes each document to the broker exchange.
///
/// Deliveries are serialized through one client, so failover state and the
/// warm connection are shared by every document of the step.
pub struct AmqpSink {
    settings: AmqpSettings,
    client: Mutex<MessageBrokerClient>,
}

impl AmqpSink {
    pub fn new(settings: AmqpSettings) -> Self {
        let client = MessageBrokerClient::new(settings.clone());
        Self {
            settings,
            client: Mutex::new(client),
        }
    }

    pub fn from_config(config: &AmqpSinkConfig) -> Self {
        Self::new(AmqpSettings::from_config(config))
    }

    pub async fn failovers(&self) -> u64 {
        self.client.lock().await.failovers()
    }
}

#[async_trait]
impl Sink for AmqpSink {
    fn kind(&self) -> &'static str {
        "amqp"
    }

    fn render(&self, document: &Document) -> Rendering {
        self.settings.render(document)
    }

    async fn deliver(&self, document: &Document) -> Result<(), PublishError> {
        let rendering = self.render(document);
        self.client.lock().await.publish(&document.id, &rendering).await
    }

    async fn shutdown(&self) {
        self.client.lock().await.close().await;
    }
}
