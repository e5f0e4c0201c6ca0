use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{message::Delivery, options::*, types::FieldTable, BasicProperties, Channel};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::connection::ConnectionManager;
use crate::error::Result;
use crate::message::{ReplyEnvelope, CONTENT_TYPE_JSON};
use crate::topology;

/// Server identity used when none is configured. Kept in case more than one
/// server id is ever deployed; instances sharing an id share the durable
/// request queues and are load-balanced round-robin by the broker.
pub const DEFAULT_SERVER_ID: &str = "main";

/// Error code carried in the reply envelope when a handler fails
const HANDLER_ERROR_CODE: &str = "HANDLER_ERROR";

/// Domain handler for one operation: request payload bytes in, response
/// payload bytes out.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, payload: &[u8]) -> Result<Vec<u8>>;

    /// Handler name for logging
    fn name(&self) -> &'static str {
        "RpcHandler"
    }
}

/// Adapter turning a plain async function into an [`RpcHandler`]
pub struct FunctionHandler<F> {
    name: &'static str,
    handler: F,
}

impl<F> FunctionHandler<F> {
    pub fn new(name: &'static str, handler: F) -> Self {
        Self { name, handler }
    }
}

#[async_trait]
impl<F, Fut> RpcHandler for FunctionHandler<F>
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<u8>>> + Send,
{
    async fn handle(&self, payload: &[u8]) -> Result<Vec<u8>> {
        (self.handler)(payload.to_vec()).await
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Service-side listener: consumes requests from durable per-operation
/// queues and publishes each handler's result back to the caller's reply
/// routing key.
///
/// One long-lived worker task runs per (domain, operation) pair; start each
/// with [`serve`](Self::serve). Every worker gets its own channel with
/// prefetch=1, so it processes requests strictly one at a time and the
/// broker withholds the next delivery until the current one is
/// acknowledged.
///
/// Requests are delivered at least once: a worker that dies after receiving
/// but before acknowledging leaves the request in the durable queue for
/// redelivery, so handlers must be idempotent.
pub struct RpcServer {
    connection: Arc<ConnectionManager>,
    server_id: String,
}

impl RpcServer {
    /// Create a server with the default server identity
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self::with_server_id(connection, DEFAULT_SERVER_ID)
    }

    /// Create a server with an explicit identity. The identity prefixes
    /// every request queue name, so restarts reattach to the same backlog.
    pub fn with_server_id(connection: Arc<ConnectionManager>, server_id: impl Into<String>) -> Self {
        Self {
            connection,
            server_id: server_id.into(),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Start a worker for `operation` on `domain`.
    ///
    /// Declares the durable request queue, binds it under the operation's
    /// routing key, and spawns the consume loop. The returned handle runs
    /// until the consumer stream ends (process shutdown or connection
    /// loss); there is no restart logic beyond process supervision.
    pub async fn serve<H>(&self, domain: &str, operation: &str, handler: H) -> Result<JoinHandle<()>>
    where
        H: RpcHandler + 'static,
    {
        let channel = topology::server_channel(&self.connection, domain).await?;
        let queue_name = topology::service_queue_name(&self.server_id, operation);

        channel
            .queue_declare(
                &queue_name,
                QueueDeclareOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_bind(
                &queue_name,
                domain,
                operation,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let mut consumer = channel
            .basic_consume(
                &queue_name,
                &topology::worker_tag(operation),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!("{} handler registered on {}", operation, domain);

        let operation = operation.to_string();
        let handle = tokio::spawn(async move {
            // Deliveries are handled sequentially: together with prefetch=1
            // this bounds the worker to one in-flight request and preserves
            // arrival order for this consumer.
            while let Some(delivery) = consumer.next().await {
                match delivery {
                    Ok(delivery) => {
                        if let Err(e) = respond(&channel, &operation, &handler, delivery).await {
                            error!("failed to respond on {}: {}", operation, e);
                        }
                    }
                    Err(e) => error!("error receiving delivery on {}: {}", operation, e),
                }
            }
            warn!("consumer stream ended for {}", operation);
        });

        Ok(handle)
    }

    /// Convenience wrapper for serving a plain async function
    pub async fn serve_fn<F, Fut>(
        &self,
        domain: &str,
        operation: &str,
        handler: F,
    ) -> Result<JoinHandle<()>>
    where
        F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<u8>>> + Send + 'static,
    {
        let handler = FunctionHandler::new(Box::leak(operation.to_owned().into_boxed_str()), handler);
        self.serve(domain, operation, handler).await
    }
}

/// Invoke the handler on one delivery and publish the result to the
/// caller's reply routing key on the same exchange, echoing the
/// correlation id.
///
/// The inbound delivery is acknowledged after the reply is published, even
/// when the handler fails: a failed request is answered with an error
/// envelope, never redelivered.
async fn respond<H: RpcHandler>(
    channel: &Channel,
    operation: &str,
    handler: &H,
    delivery: Delivery,
) -> Result<()> {
    let correlation_id = delivery.properties.correlation_id().clone();
    let reply_to = delivery.properties.reply_to().clone();

    let (Some(correlation_id), Some(reply_to)) = (correlation_id, reply_to) else {
        // Without reply metadata there is nowhere to route a response.
        warn!("delivery on {} missing reply metadata, dropping", operation);
        delivery.ack(BasicAckOptions::default()).await?;
        return Ok(());
    };

    debug!(
        "received request for {} with correlation-id: {}",
        operation,
        correlation_id.as_str()
    );

    let envelope = match handler.handle(&delivery.data).await {
        Ok(payload) => ReplyEnvelope::success(&payload)
            .unwrap_or_else(|e| ReplyEnvelope::failure(HANDLER_ERROR_CODE, e.to_string())),
        Err(e) => {
            error!("handler {} failed: {}", handler.name(), e);
            ReplyEnvelope::failure(HANDLER_ERROR_CODE, e.to_string())
        }
    };

    channel
        .basic_publish(
            delivery.exchange.as_str(),
            reply_to.as_str(),
            BasicPublishOptions::default(),
            &envelope.to_bytes()?,
            BasicProperties::default()
                .with_content_type(CONTENT_TYPE_JSON.into())
                .with_correlation_id(correlation_id),
        )
        .await?
        .await?;

    delivery.ack(BasicAckOptions::default()).await?;
    Ok(())
}

impl std::fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcServer")
            .field("server_id", &self.server_id)
            .finish()
    }
}
