/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

/*!
Module containing the public MQTT client and associated types necessary to invoke operations on it.

A client can be driven two ways:
* manually, by calling [`MqttClient::loop_once`] (or the finer grained `loop_read`, `loop_write`
  and `loop_misc`) at a short, regular interval
* by a background network thread started with [`MqttClient::loop_start`], which also reconnects
  with backoff after a connection loss

Operations may be submitted from any thread in either mode.
 */

#![warn(missing_docs)]

pub(crate) mod shared_impl;
pub mod synchronous;

pub use synchronous::*;

use crate::client::shared_impl::ClientCore;
use crate::error::{SchistError, SchistResult};
use crate::features::threaded::{NetworkThread, ThreadedClientOptions};
use crate::lock;
use crate::mqtt::*;
use crate::protocol::ConnectionState;

use log::*;

use std::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Result of a connect attempt: the broker's return code on acceptance, an error otherwise
pub type ConnectResult = SchistResult<ConnectReturnCode>;

/// Result of a publish: the message id once the publish has completed its QoS handshake (or,
/// for QoS 0, once it has been written to the socket)
pub type PublishResult = SchistResult<u16>;

/// Result of a subscribe: the broker's Suback
pub type SubscribeResult = SchistResult<SubackPacket>;

/// Result of an unsubscribe: the broker's Unsuback
pub type UnsubscribeResult = SchistResult<UnsubackPacket>;

/// An event emitted when the broker answers a Connect packet
#[derive(Debug, Eq, PartialEq)]
pub struct ConnectionResultEvent {

    /// Return code from the broker's Connack
    pub return_code: ConnectReturnCode,

    /// Whether the broker resumed an existing session
    pub session_present: bool,
}

/// Why a connection ended
#[derive(Debug)]
pub enum DisconnectReason {

    /// The application called `disconnect()` and the Disconnect packet was written
    Requested,

    /// The connection failed or was dropped
    Unexpected(SchistError),
}

/// An event emitted whenever a connection that had been handed a Connect packet is closed
#[derive(Debug)]
pub struct DisconnectionEvent {

    /// Why the connection ended
    pub reason: DisconnectReason,
}

/// An event emitted when an outbound publish completes
#[derive(Debug, Eq, PartialEq)]
pub struct PublishCompletedEvent {

    /// Message id of the completed publish
    pub mid: u16,
}

/// An event emitted when a publish arrives from the broker
#[derive(Debug, Eq, PartialEq)]
pub struct PublishReceivedEvent {

    /// The received publish, topic normalized
    pub publish: PublishPacket,
}

/// An event emitted when the broker acknowledges a subscribe
#[derive(Debug, Eq, PartialEq)]
pub struct SubscribeCompletedEvent {

    /// The broker's Suback
    pub suback: SubackPacket,
}

/// An event emitted when the broker acknowledges an unsubscribe
#[derive(Debug, Eq, PartialEq)]
pub struct UnsubscribeCompletedEvent {

    /// The broker's Unsuback
    pub unsuback: UnsubackPacket,
}

/// Union of all events that a client can emit
#[derive(Debug)]
pub enum ClientEvent {

    /// The broker answered a Connect
    ConnectionResult(ConnectionResultEvent),

    /// A connection was closed
    Disconnection(DisconnectionEvent),

    /// An outbound publish completed
    PublishCompleted(PublishCompletedEvent),

    /// A publish was received
    PublishReceived(PublishReceivedEvent),

    /// A subscribe was acknowledged
    SubscribeCompleted(SubscribeCompletedEvent),

    /// An unsubscribe was acknowledged
    UnsubscribeCompleted(UnsubscribeCompletedEvent),
}

impl Display for ClientEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ClientEvent::ConnectionResult(event) => {
                write!(f, "ConnectionResult {{ return_code: {}, session_present: {} }}", event.return_code, event.session_present)
            }
            ClientEvent::Disconnection(event) => {
                match &event.reason {
                    DisconnectReason::Requested => { write!(f, "Disconnection {{ Requested }}") }
                    DisconnectReason::Unexpected(error) => { write!(f, "Disconnection {{ Unexpected: {} }}", error) }
                }
            }
            ClientEvent::PublishCompleted(event) => {
                write!(f, "PublishCompleted {{ mid: {} }}", event.mid)
            }
            ClientEvent::PublishReceived(event) => {
                write!(f, "PublishReceived {{ {} }}", event.publish)
            }
            ClientEvent::SubscribeCompleted(event) => {
                write!(f, "SubscribeCompleted {{ {} }}", event.suback)
            }
            ClientEvent::UnsubscribeCompleted(event) => {
                write!(f, "UnsubscribeCompleted {{ {} }}", event.unsuback)
            }
        }
    }
}

/// Signature of a callback that receives client events.
///
/// Callbacks for one client never run concurrently.  A callback may call back into the client;
/// packets it submits are written by the next loop iteration rather than synchronously.
pub type ClientEventListenerCallback = dyn Fn(Arc<ClientEvent>) + Send + Sync;

/// Ways a client can report events to the application
#[derive(Clone)]
pub enum ClientEventListener {

    /// Invoke the function for every event
    Callback(Arc<ClientEventListenerCallback>)
}

impl Debug for ClientEventListener {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ClientEventListener::Callback(_) => {
                write!(f, "ClientEventListener::Callback(...)")
            }
        }
    }
}

/// A thread-safe handle to an MQTT 3.1/3.1.1 client.
///
/// Cloning is cheap; every clone drives the same connection and session.
#[derive(Clone)]
pub struct MqttClient {
    core: Arc<ClientCore>,
    network_thread: Arc<Mutex<Option<NetworkThread>>>,
    threaded_options: ThreadedClientOptions,
}

impl MqttClient {

    pub(crate) fn new(core: Arc<ClientCore>, threaded_options: ThreadedClientOptions) -> Self {
        MqttClient {
            core,
            network_thread: Arc::new(Mutex::new(None)),
            threaded_options,
        }
    }

    /// Opens a transport to the broker and sends a Connect packet built from the client's
    /// connect options.
    ///
    /// Returns once the transport exists; the returned handle resolves when the broker answers.
    pub fn connect(&self) -> SchistResult<SyncConnectResult> {
        self.core.connect()
    }

    /// Drops any existing transport and connects again with the same options.
    pub fn reconnect(&self) -> SchistResult<SyncConnectResult> {
        self.core.connect()
    }

    /// Submits a publish.  QoS 1/2 publishes are stored and sent once connected and within the
    /// in-flight limit; QoS 0 publishes need an established session.
    pub fn publish(&self, publish: PublishPacket) -> SchistResult<SyncPublishResult> {
        self.core.publish(publish)
    }

    /// Submits a subscribe.  Requires a transport.
    pub fn subscribe(&self, subscribe: SubscribePacket) -> SchistResult<SyncSubscribeResult> {
        self.core.subscribe(subscribe)
    }

    /// Submits an unsubscribe.  Requires a transport.
    pub fn unsubscribe(&self, unsubscribe: UnsubscribePacket) -> SchistResult<SyncUnsubscribeResult> {
        self.core.unsubscribe(unsubscribe)
    }

    /// Sends a Disconnect packet.  The transport is closed once it has been written and a
    /// disconnection event with `DisconnectReason::Requested` follows.  Automatic reconnection
    /// stops.
    pub fn disconnect(&self) -> SchistResult<()> {
        self.core.disconnect()
    }

    /// Services the connection (read, write, timers) until some work has been done or `timeout`
    /// elapses.
    pub fn loop_once(&self, timeout: Duration) -> SchistResult<()> {
        self.core.loop_once(timeout)
    }

    /// Reads and dispatches every packet currently available on the socket.
    pub fn loop_read(&self) -> SchistResult<()> {
        self.core.loop_read().map(|_| ())
    }

    /// Writes as much of the outbound queue as the socket accepts.
    pub fn loop_write(&self) -> SchistResult<()> {
        self.core.loop_write().map(|_| ())
    }

    /// Runs keep alive, Connack timeout and message retry checks.
    pub fn loop_misc(&self) -> SchistResult<()> {
        self.core.loop_misc().map(|_| ())
    }

    /// Starts a background thread that services the connection and reconnects after failures.
    pub fn loop_start(&self) -> SchistResult<()> {
        let mut network_thread = lock(&self.network_thread);
        if network_thread.is_some() {
            return Err(SchistError::new_invalid_argument("network thread already running"));
        }

        info!("client {} starting network thread", self.core.client_id());
        *network_thread = Some(NetworkThread::spawn(self.core.clone(), &self.threaded_options)?);

        Ok(())
    }

    /// Stops the background thread and waits for it to exit.  With `force`, the connection is
    /// closed first and automatic reconnection is disabled.
    pub fn loop_stop(&self, force: bool) -> SchistResult<()> {
        let network_thread = lock(&self.network_thread).take();
        let Some(network_thread) = network_thread else {
            return Err(SchistError::new_invalid_argument("network thread is not running"));
        };

        info!("client {} stopping network thread (force: {})", self.core.client_id(), force);
        if force {
            self.core.abandon_connection();
        }

        network_thread.stop()
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.core.connection_state()
    }

    /// Client id sent in the Connect packet
    pub fn client_id(&self) -> &str {
        self.core.client_id()
    }
}
