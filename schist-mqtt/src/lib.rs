/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

/*!
schist-mqtt is a thread-based MQTT 3.1/3.1.1 client engine.

The client owns a single non-blocking TCP (optionally TLS) connection and a message store that
carries QoS 1 and QoS 2 flows across reconnects.  Applications either drive the connection
themselves with [`MqttClient::loop_once`] or hand it to a background network thread with
[`MqttClient::loop_start`].  Outcomes are reported twice: through the blocking result handle
each operation returns and through an optional [`ClientEventListener`].

# Example

```no_run
use schist_mqtt::*;
use std::sync::Arc;
use std::time::Duration;

let listener = ClientEventListener::Callback(Arc::new(|event| {
    println!("client event: {}", event);
}));

let client = ClientBuilder::new("localhost", 1883)
    .with_connect_options(ConnectOptions::builder().with_client_id("example").build().unwrap())
    .with_event_listener(listener)
    .build()
    .unwrap();

client.loop_start().unwrap();
client.connect().unwrap().recv_timeout(Duration::from_secs(10));

let publish = client.publish(PublishPacket::new("hello/world", QualityOfService::AtLeastOnce, b"hi")).unwrap();
publish.recv_timeout(Duration::from_secs(10));

client.disconnect().unwrap();
client.loop_stop(false).unwrap();
```
 */

pub mod client;
pub mod config;
mod decode;
mod encode;
pub mod error;
pub mod features;
mod logging;
pub mod mqtt;
mod protocol;
mod queue;
mod store;
mod topic;
mod transport;

#[cfg(test)]
mod testing;

pub use client::*;
pub use config::*;
pub use error::{SchistError, SchistResult};
pub use features::threaded::{ThreadedClientOptions, ThreadedClientOptionsBuilder};
pub use protocol::ConnectionState;
pub use topic::{normalize_topic, topic_matches_sub};

/* Re-export all packet types at the root level */
pub use mqtt::QualityOfService;
pub use mqtt::ProtocolVersion;
pub use mqtt::ConnectReturnCode;
pub use mqtt::SubackReturnCode;
pub use mqtt::PacketType;
pub use mqtt::Subscription;
pub use mqtt::ConnectPacket;
pub use mqtt::ConnackPacket;
pub use mqtt::PublishPacket;
pub use mqtt::PublishPacketBuilder;
pub use mqtt::PubackPacket;
pub use mqtt::PubrecPacket;
pub use mqtt::PubrelPacket;
pub use mqtt::PubcompPacket;
pub use mqtt::SubscribePacket;
pub use mqtt::SubscribePacketBuilder;
pub use mqtt::SubackPacket;
pub use mqtt::UnsubscribePacket;
pub use mqtt::UnsubscribePacketBuilder;
pub use mqtt::UnsubackPacket;
pub use mqtt::PingreqPacket;
pub use mqtt::PingrespPacket;
pub use mqtt::DisconnectPacket;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a mutex, recovering the guard if a listener panicked while another thread held it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
