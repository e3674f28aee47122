/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

/*!
Module containing a set of structured data types that model the MQTT 3.1 and 3.1.1 control packets.
 */

use crate::error::SchistError;

use std::fmt;

pub(crate) mod ack;
pub(crate) mod connack;
pub(crate) mod connect;
pub(crate) mod publish;
pub(crate) mod simple;
pub(crate) mod suback;
pub(crate) mod subscribe;
pub(crate) mod unsuback;
pub(crate) mod unsubscribe;
pub mod utils;

/// MQTT message delivery quality of service.
///
/// Enum values match the wire encoding of the QoS bits.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum QualityOfService {

    /// The message is delivered according to the capabilities of the underlying network. No response is sent by the
    /// receiver and no retry is performed by the sender. The message arrives at the receiver either once or not at all.
    #[default]
    AtMostOnce = 0,

    /// A level of service that ensures that the message arrives at the receiver at least once.
    AtLeastOnce = 1,

    /// A level of service that ensures that the message arrives at the receiver exactly once.
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QualityOfService {
    type Error = SchistError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        utils::convert_u8_to_quality_of_service(value)
    }
}

/// Version of the MQTT protocol announced in the Connect packet.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ProtocolVersion {

    /// MQTT 3.1; protocol name "MQIsdp", protocol level 3
    #[default]
    Mqtt31,

    /// MQTT 3.1.1; protocol name "MQTT", protocol level 4
    Mqtt311,
}

impl ProtocolVersion {
    pub(crate) fn protocol_name(&self) -> &'static str {
        match self {
            ProtocolVersion::Mqtt31 => { "MQIsdp" }
            ProtocolVersion::Mqtt311 => { "MQTT" }
        }
    }

    pub(crate) fn protocol_level(&self) -> u8 {
        match self {
            ProtocolVersion::Mqtt31 => { 3 }
            ProtocolVersion::Mqtt311 => { 4 }
        }
    }
}

/// Result code carried by a Connack packet.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ConnectReturnCode {

    /// Connection accepted
    #[default]
    Accepted = 0,

    /// The broker does not support the requested protocol level
    UnacceptableProtocolVersion = 1,

    /// The client identifier is well-formed but not allowed by the broker
    IdentifierRejected = 2,

    /// The network connection has been made but the MQTT service is unavailable
    ServerUnavailable = 3,

    /// The data in the user name or password is malformed
    BadUsernameOrPassword = 4,

    /// The client is not authorized to connect
    NotAuthorized = 5,
}

impl TryFrom<u8> for ConnectReturnCode {
    type Error = SchistError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        utils::convert_u8_to_connect_return_code(value)
    }
}

/// Per-subscription result carried by a Suback packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubackReturnCode {

    /// Subscription accepted at QoS 0
    GrantedQos0 = 0,

    /// Subscription accepted at QoS 1
    GrantedQos1 = 1,

    /// Subscription accepted at QoS 2
    GrantedQos2 = 2,

    /// Subscription rejected (MQTT 3.1.1 only)
    Failure = 128,
}

impl SubackReturnCode {

    /// Returns the granted quality of service, or None if the subscription was rejected.
    pub fn granted_qos(&self) -> Option<QualityOfService> {
        match self {
            SubackReturnCode::GrantedQos0 => { Some(QualityOfService::AtMostOnce) }
            SubackReturnCode::GrantedQos1 => { Some(QualityOfService::AtLeastOnce) }
            SubackReturnCode::GrantedQos2 => { Some(QualityOfService::ExactlyOnce) }
            SubackReturnCode::Failure => { None }
        }
    }
}

impl TryFrom<u8> for SubackReturnCode {
    type Error = SchistError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        utils::convert_u8_to_suback_return_code(value)
    }
}

/// An enum indicating the kind of MQTT packet
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PacketType {

    /// A Connect packet
    Connect,

    /// A Connack packet
    Connack,

    /// A Publish packet
    Publish,

    /// A Puback packet
    Puback,

    /// A Pubrec packet
    Pubrec,

    /// A Pubrel packet
    Pubrel,

    /// A Pubcomp packet
    Pubcomp,

    /// A Subscribe packet
    Subscribe,

    /// A Suback packet
    Suback,

    /// An Unsubscribe packet
    Unsubscribe,

    /// An Unsuback packet
    Unsuback,

    /// A Pingreq packet
    Pingreq,

    /// A Pingresp packet
    Pingresp,

    /// A Disconnect packet
    Disconnect,
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketType::Connect => { write!(f, "ConnectPacket") }
            PacketType::Connack => { write!(f, "ConnackPacket") }
            PacketType::Publish => { write!(f, "PublishPacket") }
            PacketType::Puback => { write!(f, "PubackPacket") }
            PacketType::Pubrec => { write!(f, "PubrecPacket") }
            PacketType::Pubrel => { write!(f, "PubrelPacket") }
            PacketType::Pubcomp => { write!(f, "PubcompPacket") }
            PacketType::Subscribe => { write!(f, "SubscribePacket") }
            PacketType::Suback => { write!(f, "SubackPacket") }
            PacketType::Unsubscribe => { write!(f, "UnsubscribePacket") }
            PacketType::Unsuback => { write!(f, "UnsubackPacket") }
            PacketType::Pingreq => { write!(f, "PingreqPacket") }
            PacketType::Pingresp => { write!(f, "PingrespPacket") }
            PacketType::Disconnect => { write!(f, "DisconnectPacket") }
        }
    }
}

/// Data model of a CONNECT packet.  Built by the client from its connect options.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConnectPacket {
    pub(crate) protocol_version: ProtocolVersion,
    pub(crate) keep_alive_interval_seconds: u16,
    pub(crate) clean_session: bool,
    pub(crate) client_id: String,
    pub(crate) will: Option<PublishPacket>,
    pub(crate) username: Option<String>,
    pub(crate) password: Option<Vec<u8>>,
}

impl ConnectPacket {

    /// Returns the protocol version announced by this packet
    pub fn protocol_version(&self) -> ProtocolVersion { self.protocol_version }

    /// Returns the keep alive interval, in seconds.  Zero disables keep alive.
    pub fn keep_alive_interval_seconds(&self) -> u16 { self.keep_alive_interval_seconds }

    /// Returns whether the broker should discard any existing session state
    pub fn clean_session(&self) -> bool { self.clean_session }

    /// Returns the client identifier
    pub fn client_id(&self) -> &str { self.client_id.as_str() }

    /// Returns the message the broker should publish if the connection is lost unexpectedly
    pub fn will(&self) -> Option<&PublishPacket> { self.will.as_ref() }

    /// Returns the user name used for authentication
    pub fn username(&self) -> Option<&str> { self.username.as_deref() }

    /// Returns the password used for authentication
    pub fn password(&self) -> Option<&[u8]> { self.password.as_deref() }
}

/// Data model of a CONNACK packet
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConnackPacket {
    pub(crate) session_present: bool,
    pub(crate) return_code: ConnectReturnCode,
}

impl ConnackPacket {

    /// Returns whether the broker resumed an existing session (MQTT 3.1.1; always false for 3.1)
    pub fn session_present(&self) -> bool { self.session_present }

    /// Returns the broker's verdict on the connection attempt
    pub fn return_code(&self) -> ConnectReturnCode { self.return_code }
}

/// Data model of a PUBLISH packet
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PublishPacket {
    pub(crate) packet_id: u16,
    pub(crate) topic: String,
    pub(crate) qos: QualityOfService,
    pub(crate) duplicate: bool,
    pub(crate) retain: bool,
    pub(crate) payload: Vec<u8>,
}

impl PublishPacket {

    /// Common-case constructor for PublishPackets that don't need special configuration
    pub fn new(topic: &str, qos: QualityOfService, payload: &[u8]) -> Self {
        PublishPacket {
            topic: topic.to_string(),
            qos,
            payload: payload.to_vec(),
            ..Default::default()
        }
    }

    /// Creates a new builder for a PublishPacket.
    pub fn builder(topic: String, qos: QualityOfService) -> PublishPacketBuilder {
        PublishPacketBuilder::new(topic, qos)
    }

    /// Returns the message id.  Zero for QoS 0 messages and for outbound messages that have not yet
    /// been assigned an id.
    pub fn packet_id(&self) -> u16 { self.packet_id }

    /// Sent publishes - returns the topic this message should be published to.
    ///
    /// Received publishes - returns the (normalized) topic this message was published to.
    pub fn topic(&self) -> &str { self.topic.as_str() }

    /// Returns the quality of service level of this message
    pub fn qos(&self) -> QualityOfService { self.qos }

    /// Returns whether this packet is a resend of a previously-submitted Publish
    pub fn duplicate(&self) -> bool { self.duplicate }

    /// Returns true if this is a retained message, false otherwise.
    pub fn retain(&self) -> bool { self.retain }

    /// Returns the payload of the publish message.
    pub fn payload(&self) -> &[u8] { self.payload.as_slice() }
}

/// Builder type for PublishPacket instances
pub struct PublishPacketBuilder {
    packet: PublishPacket
}

impl PublishPacketBuilder {
    pub(crate) fn new(topic: String, qos: QualityOfService) -> Self {
        PublishPacketBuilder {
            packet: PublishPacket {
                topic,
                qos,
                ..Default::default()
            }
        }
    }

    /// Sets if this should be a retained message
    pub fn with_retain(mut self, retain: bool) -> Self {
        self.packet.retain = retain;
        self
    }

    /// Sets the message payload
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.packet.payload = payload;
        self
    }

    /// Creates a new PublishPacket from the builder's current configuration
    pub fn build(self) -> PublishPacket {
        self.packet
    }
}

/// Data model of a PUBACK packet
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PubackPacket {
    pub(crate) packet_id: u16,
}

/// Data model of a PUBREC packet
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PubrecPacket {
    pub(crate) packet_id: u16,
}

/// Data model of a PUBREL packet
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PubrelPacket {
    pub(crate) packet_id: u16,
}

/// Data model of a PUBCOMP packet
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PubcompPacket {
    pub(crate) packet_id: u16,
}

/// A single topic filter and requested quality of service within a Subscribe packet
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Subscription {
    pub(crate) topic_filter: String,
    pub(crate) qos: QualityOfService,
}

impl Subscription {

    /// Creates a new subscription
    pub fn new(topic_filter: &str, qos: QualityOfService) -> Self {
        Subscription {
            topic_filter: topic_filter.to_string(),
            qos,
        }
    }

    /// Returns the topic filter to subscribe to
    pub fn topic_filter(&self) -> &str { self.topic_filter.as_str() }

    /// Returns the maximum quality of service the broker should deliver matching messages at
    pub fn qos(&self) -> QualityOfService { self.qos }
}

/// Data model of a SUBSCRIBE packet
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SubscribePacket {
    pub(crate) packet_id: u16,
    pub(crate) subscriptions: Vec<Subscription>,
}

impl SubscribePacket {

    /// Common-case constructor for a single-filter subscribe
    pub fn new(topic_filter: &str, qos: QualityOfService) -> Self {
        SubscribePacket {
            subscriptions: vec!(Subscription::new(topic_filter, qos)),
            ..Default::default()
        }
    }

    /// Creates a new builder for a SubscribePacket.
    pub fn builder() -> SubscribePacketBuilder {
        SubscribePacketBuilder::new()
    }

    /// Returns the message id of this subscribe
    pub fn packet_id(&self) -> u16 { self.packet_id }

    /// Returns the list of subscriptions requested
    pub fn subscriptions(&self) -> &[Subscription] { self.subscriptions.as_slice() }
}

/// Builder type for SubscribePacket instances
pub struct SubscribePacketBuilder {
    packet: SubscribePacket
}

impl SubscribePacketBuilder {
    pub(crate) fn new() -> Self {
        SubscribePacketBuilder {
            packet: Default::default()
        }
    }

    /// Adds a subscription to the packet
    pub fn with_subscription(mut self, subscription: Subscription) -> Self {
        self.packet.subscriptions.push(subscription);
        self
    }

    /// Adds a subscription to the packet from a topic filter and QoS
    pub fn with_subscription_simple(mut self, topic_filter: String, qos: QualityOfService) -> Self {
        self.packet.subscriptions.push(Subscription { topic_filter, qos });
        self
    }

    /// Creates a new SubscribePacket from the builder's current configuration
    pub fn build(self) -> SubscribePacket {
        self.packet
    }
}

/// Data model of a SUBACK packet
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SubackPacket {
    pub(crate) packet_id: u16,
    pub(crate) return_codes: Vec<SubackReturnCode>,
}

impl SubackPacket {

    /// Returns the id of the Subscribe this packet acknowledges
    pub fn packet_id(&self) -> u16 { self.packet_id }

    /// Returns one result per requested subscription, in request order
    pub fn return_codes(&self) -> &[SubackReturnCode] { self.return_codes.as_slice() }
}

/// Data model of an UNSUBSCRIBE packet
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UnsubscribePacket {
    pub(crate) packet_id: u16,
    pub(crate) topic_filters: Vec<String>,
}

impl UnsubscribePacket {

    /// Common-case constructor for a single-filter unsubscribe
    pub fn new(topic_filter: &str) -> Self {
        UnsubscribePacket {
            topic_filters: vec!(topic_filter.to_string()),
            ..Default::default()
        }
    }

    /// Creates a new builder for an UnsubscribePacket.
    pub fn builder() -> UnsubscribePacketBuilder {
        UnsubscribePacketBuilder::new()
    }

    /// Returns the message id of this unsubscribe
    pub fn packet_id(&self) -> u16 { self.packet_id }

    /// Returns the topic filters to remove
    pub fn topic_filters(&self) -> &[String] { self.topic_filters.as_slice() }
}

/// Builder type for UnsubscribePacket instances
pub struct UnsubscribePacketBuilder {
    packet: UnsubscribePacket
}

impl UnsubscribePacketBuilder {
    pub(crate) fn new() -> Self {
        UnsubscribePacketBuilder {
            packet: Default::default()
        }
    }

    /// Adds a topic filter to the packet
    pub fn with_topic_filter(mut self, topic_filter: String) -> Self {
        self.packet.topic_filters.push(topic_filter);
        self
    }

    /// Creates a new UnsubscribePacket from the builder's current configuration
    pub fn build(self) -> UnsubscribePacket {
        self.packet
    }
}

/// Data model of an UNSUBACK packet
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UnsubackPacket {
    pub(crate) packet_id: u16,
}

impl UnsubackPacket {

    /// Returns the id of the Unsubscribe this packet acknowledges
    pub fn packet_id(&self) -> u16 { self.packet_id }
}

/// Data model of a PINGREQ packet
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PingreqPacket {}

/// Data model of a PINGRESP packet
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PingrespPacket {}

/// Data model of a DISCONNECT packet
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DisconnectPacket {}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum MqttPacket {
    Connect(ConnectPacket),
    Connack(ConnackPacket),
    Publish(PublishPacket),
    Puback(PubackPacket),
    Pubrec(PubrecPacket),
    Pubrel(PubrelPacket),
    Pubcomp(PubcompPacket),
    Subscribe(SubscribePacket),
    Suback(SubackPacket),
    Unsubscribe(UnsubscribePacket),
    Unsuback(UnsubackPacket),
    Pingreq(PingreqPacket),
    Pingresp(PingrespPacket),
    Disconnect(DisconnectPacket),
}

impl MqttPacket {
    pub(crate) fn packet_type(&self) -> PacketType {
        match self {
            MqttPacket::Connect(_) => { PacketType::Connect }
            MqttPacket::Connack(_) => { PacketType::Connack }
            MqttPacket::Publish(_) => { PacketType::Publish }
            MqttPacket::Puback(_) => { PacketType::Puback }
            MqttPacket::Pubrec(_) => { PacketType::Pubrec }
            MqttPacket::Pubrel(_) => { PacketType::Pubrel }
            MqttPacket::Pubcomp(_) => { PacketType::Pubcomp }
            MqttPacket::Subscribe(_) => { PacketType::Subscribe }
            MqttPacket::Suback(_) => { PacketType::Suback }
            MqttPacket::Unsubscribe(_) => { PacketType::Unsubscribe }
            MqttPacket::Unsuback(_) => { PacketType::Unsuback }
            MqttPacket::Pingreq(_) => { PacketType::Pingreq }
            MqttPacket::Pingresp(_) => { PacketType::Pingresp }
            MqttPacket::Disconnect(_) => { PacketType::Disconnect }
        }
    }
}
