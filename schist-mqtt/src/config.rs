/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

/*!
Module containing types for configuring an MQTT client.
 */

use crate::client::*;
use crate::client::shared_impl::ClientCore;
use crate::encode::utils::MAXIMUM_STRING_LENGTH;
use crate::error::{SchistError, SchistResult};
use crate::features::threaded::ThreadedClientOptions;
use crate::mqtt::*;
use crate::mqtt::utils::MQTT31_MAXIMUM_CLIENT_ID_LENGTH;
use crate::topic::validate_publish_topic;

use log::*;

use std::fmt;
use std::fmt::{Debug, Formatter};
use std::fs::File;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum TlsMode {
    Standard,
    Mtls
}

#[derive(Clone)]
pub(crate) enum TlsData {
    #[cfg(feature = "threaded-rustls")]
    Rustls(Arc<rustls::ClientConfig>),

    #[cfg(feature = "threaded-native-tls")]
    NativeTls(Arc<native_tls::TlsConnector>),
}

/// Finished TLS context.  Built once and shared by every connection attempt the client makes.
#[derive(Clone)]
pub struct TlsOptions {
    pub(crate) options: TlsData
}

impl Debug for TlsOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "TlsOptions {{ ... }}")
    }
}

/// Builder for TLS configuration.  Finish with `build_rustls()` or `build_native_tls()`
/// depending on which TLS feature is enabled.
pub struct TlsOptionsBuilder {
    #[cfg_attr(not(any(feature = "threaded-rustls", feature = "threaded-native-tls")), allow(dead_code))]
    pub(crate) mode: TlsMode,
    pub(crate) root_ca_bytes: Option<Vec<u8>>,
    #[cfg_attr(not(any(feature = "threaded-rustls", feature = "threaded-native-tls")), allow(dead_code))]
    pub(crate) certificate_bytes: Option<Vec<u8>>,
    #[cfg_attr(not(any(feature = "threaded-rustls", feature = "threaded-native-tls")), allow(dead_code))]
    pub(crate) private_key_bytes: Option<Vec<u8>>,
    pub(crate) verify_peer: bool,
    pub(crate) insecure: bool,
    pub(crate) alpn: Option<Vec<u8>>
}

impl TlsOptionsBuilder {

    /// Creates a builder for server-authenticated TLS using the platform trust roots
    pub fn new() -> Self {
        TlsOptionsBuilder::default()
    }

    /// Creates a builder for mutual TLS, reading the PEM certificate and private key from files
    pub fn new_with_mtls_from_path(certificate_path: &str, private_key_path: &str) -> std::io::Result<Self> {
        let certificate_bytes = load_file(certificate_path)?;
        let private_key_bytes = load_file(private_key_path)?;

        Ok(TlsOptionsBuilder {
            mode: TlsMode::Mtls,
            certificate_bytes: Some(certificate_bytes),
            private_key_bytes: Some(private_key_bytes),
            ..Default::default()
        })
    }

    /// Creates a builder for mutual TLS from an in-memory PEM certificate and private key
    pub fn new_with_mtls_from_memory(certificate_bytes: &[u8], private_key_bytes: &[u8]) -> Self {
        TlsOptionsBuilder {
            mode: TlsMode::Mtls,
            certificate_bytes: Some(certificate_bytes.to_vec()),
            private_key_bytes: Some(private_key_bytes.to_vec()),
            ..Default::default()
        }
    }

    /// Trusts the PEM certificates in the given file instead of the platform roots
    pub fn with_root_ca_from_path(mut self, root_ca_path: &str) -> std::io::Result<Self> {
        self.root_ca_bytes = Some(load_file(root_ca_path)?);
        Ok(self)
    }

    /// Trusts the given PEM certificates instead of the platform roots
    pub fn with_root_ca_from_memory(mut self, root_ca_bytes: &[u8]) -> Self {
        self.root_ca_bytes = Some(root_ca_bytes.to_vec());
        self
    }

    /// Disabling peer verification skips certificate chain and hostname checks entirely.  Only
    /// suitable for testing.
    pub fn with_verify_peer(mut self, verify_peer: bool) -> Self {
        self.verify_peer = verify_peer;
        self
    }

    /// Insecure mode keeps chain verification but skips matching the certificate against the
    /// broker hostname.
    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Sets the single ALPN protocol to offer during the handshake
    pub fn with_alpn(mut self, alpn: &[u8]) -> Self {
        self.alpn = Some(alpn.to_vec());
        self
    }
}

impl Default for TlsOptionsBuilder {
    fn default() -> Self {
        TlsOptionsBuilder {
            mode: TlsMode::Standard,
            root_ca_bytes: None,
            certificate_bytes: None,
            private_key_bytes: None,
            verify_peer: true,
            insecure: false,
            alpn: None
        }
    }
}

fn load_file(filename: &str) -> std::io::Result<Vec<u8>> {
    let mut bytes_vec = Vec::new();
    let mut bytes_file = File::open(filename)?;
    bytes_file.read_to_end(&mut bytes_vec)?;
    Ok(bytes_vec)
}

/// Controls how the client waits between reconnect attempts
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub enum ExponentialBackoffJitterType {

    /// Wait exactly the computed reconnect period
    #[default]
    None,

    /// Wait a uniformly random duration between zero and the computed reconnect period
    Uniform
}

/// How the transport connect call behaves
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub enum ConnectMode {

    /// `connect()` returns once the TCP (and TLS) connection is established or has failed
    #[default]
    Blocking,

    /// `connect()` returns as soon as the TCP connect has been started; the event loop
    /// finishes establishing the connection
    NonBlocking,
}

pub(crate) const DEFAULT_KEEP_ALIVE_SECONDS : u16 = 60;

/// Configuration for the Connect packet the client sends on every connection attempt
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    pub(crate) client_id: String,
    pub(crate) keep_alive_interval_seconds: u16,
    pub(crate) clean_session: bool,
    pub(crate) username: Option<String>,
    pub(crate) password: Option<Vec<u8>>,
    pub(crate) will: Option<PublishPacket>,
    pub(crate) protocol_version: ProtocolVersion,
}

impl ConnectOptions {

    /// Creates a new builder for ConnectOptions
    pub fn builder() -> ConnectOptionsBuilder {
        ConnectOptionsBuilder::new()
    }

    /// Returns the client id sent in every Connect packet
    pub fn client_id(&self) -> &str { self.client_id.as_str() }

    /// Returns the keep alive interval, in seconds.  Zero disables keep alive.
    pub fn keep_alive_interval_seconds(&self) -> u16 { self.keep_alive_interval_seconds }

    /// Returns whether the broker should discard any existing session on connect
    pub fn clean_session(&self) -> bool { self.clean_session }

    /// Returns the protocol version the client speaks
    pub fn protocol_version(&self) -> ProtocolVersion { self.protocol_version }

    pub(crate) fn to_connect_packet(&self) -> ConnectPacket {
        ConnectPacket {
            protocol_version: self.protocol_version,
            keep_alive_interval_seconds: self.keep_alive_interval_seconds,
            clean_session: self.clean_session,
            client_id: self.client_id.clone(),
            will: self.will.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

/// Builder for ConnectOptions
#[derive(Default)]
pub struct ConnectOptionsBuilder {
    client_id: Option<String>,
    keep_alive_interval_seconds: Option<u16>,
    clean_session: Option<bool>,
    username: Option<String>,
    password: Option<Vec<u8>>,
    will: Option<PublishPacket>,
    protocol_version: ProtocolVersion,
}

impl ConnectOptionsBuilder {

    /// Creates a new builder with all options at their defaults
    pub fn new() -> Self {
        ConnectOptionsBuilder::default()
    }

    /// Sets the client id.  If never set, a random `schist-<hex>` id is generated.
    pub fn with_client_id(mut self, client_id: &str) -> Self {
        self.client_id = Some(client_id.to_string());
        self
    }

    /// Sets the keep alive interval in seconds (default 60, 0 disables)
    pub fn with_keep_alive_interval_seconds(mut self, keep_alive: u16) -> Self {
        self.keep_alive_interval_seconds = Some(keep_alive);
        self
    }

    /// Sets the clean session flag (default true)
    pub fn with_clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = Some(clean_session);
        self
    }

    pub fn with_username(mut self, username: &str) -> Self {
        self.username = Some(username.to_string());
        self
    }

    pub fn with_password(mut self, password: &[u8]) -> Self {
        self.password = Some(password.to_vec());
        self
    }

    /// Sets the message the broker publishes if this client disconnects unexpectedly
    pub fn with_will(mut self, will: PublishPacket) -> Self {
        self.will = Some(will);
        self
    }

    /// Removes a previously configured will
    pub fn clear_will(mut self) -> Self {
        self.will = None;
        self
    }

    /// Sets the protocol version (default MQTT 3.1)
    pub fn with_protocol_version(mut self, protocol_version: ProtocolVersion) -> Self {
        self.protocol_version = protocol_version;
        self
    }

    /// Validates the configured values and builds a new ConnectOptions
    pub fn build(self) -> SchistResult<ConnectOptions> {
        let clean_session = self.clean_session.unwrap_or(true);

        let client_id = match self.client_id {
            Some(client_id) => { client_id }
            None => { format!("schist-{:016x}", rand::random::<u64>()) }
        };

        if client_id.len() > MAXIMUM_STRING_LENGTH {
            error!("ConnectOptions - client id too long");
            return Err(SchistError::new_invalid_argument("client id is longer than 65535 bytes"));
        }

        if self.protocol_version == ProtocolVersion::Mqtt31 && client_id.len() > MQTT31_MAXIMUM_CLIENT_ID_LENGTH {
            error!("ConnectOptions - client id \"{}\" exceeds the MQTT 3.1 limit of 23 bytes", client_id);
            return Err(SchistError::new_invalid_argument("MQTT 3.1 client ids are limited to 23 bytes"));
        }

        if client_id.is_empty() && !clean_session {
            error!("ConnectOptions - empty client id requires a clean session");
            return Err(SchistError::new_invalid_argument("an empty client id requires clean session"));
        }

        if let Some(username) = &self.username {
            if username.len() > MAXIMUM_STRING_LENGTH {
                return Err(SchistError::new_invalid_argument("username is longer than 65535 bytes"));
            }
        }

        if let Some(password) = &self.password {
            if self.username.is_none() {
                error!("ConnectOptions - password set without a username");
                return Err(SchistError::new_invalid_argument("a password requires a username"));
            }

            if password.len() > MAXIMUM_STRING_LENGTH {
                return Err(SchistError::new_invalid_argument("password is longer than 65535 bytes"));
            }
        }

        if let Some(will) = &self.will {
            validate_publish_topic(&will.topic)?;
            if will.payload.len() > MAXIMUM_STRING_LENGTH {
                error!("ConnectOptions - will payload of {} bytes is too large", will.payload.len());
                return Err(SchistError::new_payload_too_large(will.payload.len()));
            }
        }

        Ok(ConnectOptions {
            client_id,
            keep_alive_interval_seconds: self.keep_alive_interval_seconds.unwrap_or(DEFAULT_KEEP_ALIVE_SECONDS),
            clean_session,
            username: self.username,
            password: self.password,
            will: self.will,
            protocol_version: self.protocol_version,
        })
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct ReconnectOptions {
    pub(crate) exponential_backoff: bool,
    pub(crate) reconnect_period_jitter: ExponentialBackoffJitterType,
    pub(crate) base_reconnect_period: Duration,
    pub(crate) max_reconnect_period: Duration,
    pub(crate) reconnect_stability_reset_period: Duration,
}

impl ReconnectOptions {
    pub(crate) fn normalize(&mut self) {
        if self.base_reconnect_period > self.max_reconnect_period {
            std::mem::swap(&mut self.base_reconnect_period, &mut self.max_reconnect_period)
        }

        if self.max_reconnect_period < Duration::from_secs(1) {
            self.max_reconnect_period = Duration::from_secs(1);
        }
    }
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        ReconnectOptions {
            exponential_backoff: true,
            reconnect_period_jitter: ExponentialBackoffJitterType::default(),
            base_reconnect_period: Duration::from_secs(1),
            max_reconnect_period: Duration::from_secs(120),
            reconnect_stability_reset_period: Duration::from_secs(30),
        }
    }
}

pub(crate) const DEFAULT_MAX_INFLIGHT_MESSAGES : usize = 20;
pub(crate) const DEFAULT_MESSAGE_RETRY_INTERVAL : Duration = Duration::from_secs(20);
pub(crate) const DEFAULT_CONNECT_TIMEOUT : Duration = Duration::from_secs(30);

/// Client behavior that is independent of the Connect packet
#[derive(Clone, Debug)]
pub struct MqttClientOptions {
    pub(crate) max_inflight_messages: usize,
    pub(crate) message_retry_interval: Duration,
    pub(crate) connect_timeout: Duration,
    pub(crate) connect_mode: ConnectMode,
    pub(crate) bind_address: Option<String>,
    pub(crate) reconnect_options: ReconnectOptions,
}

impl MqttClientOptions {

    /// Creates a new builder for MqttClientOptions
    pub fn builder() -> MqttClientOptionsBuilder {
        MqttClientOptionsBuilder::new()
    }
}

impl Default for MqttClientOptions {
    fn default() -> Self {
        MqttClientOptions {
            max_inflight_messages: DEFAULT_MAX_INFLIGHT_MESSAGES,
            message_retry_interval: DEFAULT_MESSAGE_RETRY_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            connect_mode: ConnectMode::default(),
            bind_address: None,
            reconnect_options: ReconnectOptions::default(),
        }
    }
}

/// Builder for MqttClientOptions
#[derive(Default)]
pub struct MqttClientOptionsBuilder {
    options: MqttClientOptions
}

impl MqttClientOptionsBuilder {

    /// Creates a new builder with all options at their defaults
    pub fn new() -> Self {
        MqttClientOptionsBuilder::default()
    }

    /// Maximum number of outbound QoS 1/2 publishes in flight at once (default 20, 0 = unlimited)
    pub fn with_max_inflight_messages(mut self, max_inflight_messages: usize) -> Self {
        self.options.max_inflight_messages = max_inflight_messages;
        self
    }

    /// How long an unacknowledged QoS 1/2 step waits before it is resent (default 20 seconds)
    pub fn with_message_retry_interval(mut self, message_retry_interval: Duration) -> Self {
        self.options.message_retry_interval = message_retry_interval;
        self
    }

    /// Bounds the TCP connect, the TLS handshake and the wait for a Connack (default 30 seconds)
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.options.connect_timeout = connect_timeout;
        self
    }

    pub fn with_connect_mode(mut self, connect_mode: ConnectMode) -> Self {
        self.options.connect_mode = connect_mode;
        self
    }

    /// Binds outgoing connections to a local address (hostname or ip) first
    pub fn with_bind_address(mut self, bind_address: &str) -> Self {
        self.options.bind_address = Some(bind_address.to_string());
        self
    }

    /// Doubles the reconnect wait after each consecutive failure when enabled (the default)
    pub fn with_exponential_backoff(mut self, exponential_backoff: bool) -> Self {
        self.options.reconnect_options.exponential_backoff = exponential_backoff;
        self
    }

    pub fn with_reconnect_period_jitter(mut self, reconnect_period_jitter: ExponentialBackoffJitterType) -> Self {
        self.options.reconnect_options.reconnect_period_jitter = reconnect_period_jitter;
        self
    }

    pub fn with_base_reconnect_period(mut self, base_reconnect_period: Duration) -> Self {
        self.options.reconnect_options.base_reconnect_period = base_reconnect_period;
        self
    }

    pub fn with_max_reconnect_period(mut self, max_reconnect_period: Duration) -> Self {
        self.options.reconnect_options.max_reconnect_period = max_reconnect_period;
        self
    }

    /// A connection that stays up this long resets the reconnect wait to the base period
    pub fn with_reconnect_stability_reset_period(mut self, reconnect_stability_reset_period: Duration) -> Self {
        self.options.reconnect_options.reconnect_stability_reset_period = reconnect_stability_reset_period;
        self
    }

    /// Builds a new set of client options
    pub fn build(self) -> MqttClientOptions {
        let mut options = self.options;
        options.reconnect_options.normalize();
        options
    }
}

/// Assembles connect options, client options, TLS and an event listener into an MqttClient.
pub struct ClientBuilder {
    host: String,
    port: u16,
    tls_options: Option<TlsOptions>,
    connect_options: Option<ConnectOptions>,
    client_options: Option<MqttClientOptions>,
    threaded_options: Option<ThreadedClientOptions>,
    listener: Option<ClientEventListener>,
}

impl ClientBuilder {

    /// Creates a new client builder targeting the given broker endpoint
    pub fn new(host: &str, port: u16) -> Self {
        ClientBuilder {
            host: host.to_string(),
            port,
            tls_options: None,
            connect_options: None,
            client_options: None,
            threaded_options: None,
            listener: None,
        }
    }

    pub fn with_tls_options(mut self, tls_options: TlsOptions) -> Self {
        self.tls_options = Some(tls_options);
        self
    }

    pub fn with_connect_options(mut self, connect_options: ConnectOptions) -> Self {
        self.connect_options = Some(connect_options);
        self
    }

    pub fn with_client_options(mut self, client_options: MqttClientOptions) -> Self {
        self.client_options = Some(client_options);
        self
    }

    /// Configures the network thread started by `loop_start`
    pub fn with_threaded_options(mut self, threaded_options: ThreadedClientOptions) -> Self {
        self.threaded_options = Some(threaded_options);
        self
    }

    /// Sets the listener that receives every client event
    pub fn with_event_listener(mut self, listener: ClientEventListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Builds a new client.  No connection is attempted until `connect()`.
    pub fn build(self) -> SchistResult<MqttClient> {
        if self.host.is_empty() {
            return Err(SchistError::new_invalid_argument("broker host must not be empty"));
        }

        let connect_options = match self.connect_options {
            Some(connect_options) => { connect_options }
            None => { ConnectOptionsBuilder::new().build()? }
        };

        let transport_config = crate::transport::TransportConfig {
            host: self.host,
            port: self.port,
            tls_options: self.tls_options,
            client_options: self.client_options.unwrap_or_default(),
        };

        info!("ClientBuilder - building client \"{}\" for {}:{}", connect_options.client_id, transport_config.host, transport_config.port);

        let core = ClientCore::new(transport_config, connect_options, self.listener);

        Ok(MqttClient::new(Arc::new(core), self.threaded_options.unwrap_or_default()))
    }
}
