/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

use crate::mqtt::*;
use log::*;
use std::fmt;

impl fmt::Display for QualityOfService {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QualityOfService::AtMostOnce => { write!(f, "AtMostOnce") }
            QualityOfService::AtLeastOnce => { write!(f, "AtLeastOnce") }
            QualityOfService::ExactlyOnce => { write!(f, "ExactlyOnce") }
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProtocolVersion::Mqtt31 => { write!(f, "Mqtt31") }
            ProtocolVersion::Mqtt311 => { write!(f, "Mqtt311") }
        }
    }
}

impl fmt::Display for ConnectReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectReturnCode::Accepted => { write!(f, "Accepted") }
            ConnectReturnCode::UnacceptableProtocolVersion => { write!(f, "UnacceptableProtocolVersion") }
            ConnectReturnCode::IdentifierRejected => { write!(f, "IdentifierRejected") }
            ConnectReturnCode::ServerUnavailable => { write!(f, "ServerUnavailable") }
            ConnectReturnCode::BadUsernameOrPassword => { write!(f, "BadUsernameOrPassword") }
            ConnectReturnCode::NotAuthorized => { write!(f, "NotAuthorized") }
        }
    }
}

impl fmt::Display for SubackReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SubackReturnCode::GrantedQos0 => { write!(f, "GrantedQos0") }
            SubackReturnCode::GrantedQos1 => { write!(f, "GrantedQos1") }
            SubackReturnCode::GrantedQos2 => { write!(f, "GrantedQos2") }
            SubackReturnCode::Failure => { write!(f, "Failure") }
        }
    }
}

macro_rules! log_primitive_value {
    ($integral_value: expr, $formatter: expr, $log_field: expr) => {
        write!($formatter, " {}:{}", $log_field, $integral_value)?;
    };
}

pub(crate) use log_primitive_value;

macro_rules! log_enum {
    ($enum_value: expr, $formatter: expr, $log_field: expr, $converter: ty) => {
        write!($formatter, " {}:{}", $log_field, <$converter>::to_string(&$enum_value))?;
    };
}

pub(crate) use log_enum;

macro_rules! log_string {
    ($value: expr, $formatter: expr, $log_field: expr) => {
        write!($formatter, " {}:\"{}\"", $log_field, $value)?;
    };
}

pub(crate) use log_string;

macro_rules! log_optional_string {
    ($optional_string: expr, $formatter: expr, $log_field: expr, $value:ident) => {
        if let Some($value) = &$optional_string {
            write!($formatter, " {}:\"{}\"", $log_field, $value)?;
        }
    };
}

pub(crate) use log_optional_string;

macro_rules! log_binary_data {
    ($data: expr, $formatter: expr, $log_field: expr) => {
        write!($formatter, " {}:<{} Bytes>", $log_field, $data.len())?;
    };
}

pub(crate) use log_binary_data;

macro_rules! log_optional_binary_data_sensitive {
    ($optional_data: expr, $formatter: expr, $log_field: expr) => {
        if let Some(_) = &$optional_data {
            write!($formatter, " {}:<...redacted>", $log_field)?;
        }
    };
}

pub(crate) use log_optional_binary_data_sensitive;

macro_rules! define_ack_packet_display_trait {
    ($packet_type: ident, $packet_name: expr) => {
        impl fmt::Display for $packet_type {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{} {{", $packet_name)?;
                log_primitive_value!(self.packet_id, f, "packet_id");
                write!(f, " }}")
            }
        }
    };
}

pub(crate) use define_ack_packet_display_trait;

impl fmt::Display for MqttPacket {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MqttPacket::Connect(packet) => { packet.fmt(f) }
            MqttPacket::Connack(packet) => { packet.fmt(f) }
            MqttPacket::Publish(packet) => { packet.fmt(f) }
            MqttPacket::Puback(packet) => { packet.fmt(f) }
            MqttPacket::Pubrec(packet) => { packet.fmt(f) }
            MqttPacket::Pubrel(packet) => { packet.fmt(f) }
            MqttPacket::Pubcomp(packet) => { packet.fmt(f) }
            MqttPacket::Subscribe(packet) => { packet.fmt(f) }
            MqttPacket::Suback(packet) => { packet.fmt(f) }
            MqttPacket::Unsubscribe(packet) => { packet.fmt(f) }
            MqttPacket::Unsuback(packet) => { packet.fmt(f) }
            MqttPacket::Pingreq(packet) => { packet.fmt(f) }
            MqttPacket::Pingresp(packet) => { packet.fmt(f) }
            MqttPacket::Disconnect(packet) => { packet.fmt(f) }
        }
    }
}

/// Packet lines are debug level; nothing is formatted unless that level is enabled.
pub(crate) fn log_packet(prefix: &str, packet: &MqttPacket) {
    if log_enabled!(Level::Debug) {
        debug!("{}{}", prefix, packet);
    }
}
