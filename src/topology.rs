//! Broker topology: one durable topic exchange per service domain, plus the
//! deterministic naming scheme for queues and routing keys.
//!
//! Both sides declare the exchange idempotently; repeat declaration with the
//! same properties is a broker-level no-op.

use lapin::{options::*, types::FieldTable, Channel, ExchangeKind};
use tracing::debug;

use crate::connection::ConnectionManager;
use crate::error::Result;
use crate::message::CorrelationId;

/// Prefetch applied to service channels: at most one unacknowledged
/// delivery in flight per consumer. This is the system's only concurrency
/// throttle and backpressure mechanism.
pub const SERVICE_PREFETCH: u16 = 1;

/// Open a channel scoped to `domain`, declaring the domain's topic exchange
/// if it does not exist yet.
///
/// The caller owns the returned channel and closes it when the call or the
/// listener finishes.
pub async fn open_channel(connection: &ConnectionManager, domain: &str) -> Result<Channel> {
    let channel = connection.create_channel().await?;

    channel
        .exchange_declare(
            domain,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                auto_delete: false,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    debug!("declared topic exchange: {}", domain);
    Ok(channel)
}

/// Open a channel for a service listener: declares the exchange and applies
/// the prefetch=1 QoS limit globally to the channel.
pub async fn server_channel(connection: &ConnectionManager, domain: &str) -> Result<Channel> {
    let channel = open_channel(connection, domain).await?;

    channel
        .basic_qos(SERVICE_PREFETCH, BasicQosOptions { global: true })
        .await?;

    Ok(channel)
}

/// Base routing key for replies to `operation`, e.g. `getByEmail` ->
/// `getByEmailRsp`.
pub fn reply_base(operation: &str) -> String {
    format!("{operation}Rsp")
}

/// Routing key for the reply to one in-flight call: the reply base suffixed
/// with the live correlation id. Globally unique for the lifetime of the
/// call; never reused.
pub fn reply_routing_key(operation: &str, correlation_id: &CorrelationId) -> String {
    format!("{}-{}", reply_base(operation), correlation_id)
}

/// Name of the durable request queue for `operation`, shared by every
/// instance of the service identified by `server_id`.
pub fn service_queue_name(server_id: &str, operation: &str) -> String {
    format!("{server_id}_{operation}")
}

/// Consumer tag used by the service-side worker for `operation`
pub fn worker_tag(operation: &str) -> String {
    format!("{operation}Worker")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_key_carries_operation_and_correlation() {
        let corr = CorrelationId::from("corr-1");
        assert_eq!(reply_base("getByEmail"), "getByEmailRsp");
        assert_eq!(
            reply_routing_key("getByEmail", &corr),
            "getByEmailRsp-corr-1"
        );
    }

    #[test]
    fn reply_keys_are_unique_per_call() {
        let a = reply_routing_key("processPayment", &CorrelationId::mint());
        let b = reply_routing_key("processPayment", &CorrelationId::mint());
        assert_ne!(a, b);
    }

    #[test]
    fn service_queue_names_are_deterministic() {
        assert_eq!(service_queue_name("main", "getByEmail"), "main_getByEmail");
        assert_eq!(worker_tag("getByEmail"), "getByEmailWorker");
    }
}
