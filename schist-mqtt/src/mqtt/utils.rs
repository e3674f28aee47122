/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

/*!
Module containing miscellaneous constants and conversion functions related to the MQTT 3.1/3.1.1
wire format.
 */

use crate::error::{SchistError, SchistResult};
use crate::mqtt::*;

pub(crate) const PACKET_TYPE_CONNECT: u8 = 1;
pub(crate) const PACKET_TYPE_CONNACK: u8 = 2;
pub(crate) const PACKET_TYPE_PUBLISH: u8 = 3;
pub(crate) const PACKET_TYPE_PUBACK: u8 = 4;
pub(crate) const PACKET_TYPE_PUBREC: u8 = 5;
pub(crate) const PACKET_TYPE_PUBREL: u8 = 6;
pub(crate) const PACKET_TYPE_PUBCOMP: u8 = 7;
pub(crate) const PACKET_TYPE_SUBSCRIBE: u8 = 8;
pub(crate) const PACKET_TYPE_SUBACK: u8 = 9;
pub(crate) const PACKET_TYPE_UNSUBSCRIBE: u8 = 10;
pub(crate) const PACKET_TYPE_UNSUBACK: u8 = 11;
pub(crate) const PACKET_TYPE_PINGREQ: u8 = 12;
pub(crate) const PACKET_TYPE_PINGRESP: u8 = 13;
pub(crate) const PACKET_TYPE_DISCONNECT: u8 = 14;

pub(crate) const PUBLISH_PACKET_FIXED_HEADER_DUPLICATE_FLAG : u8 = 8;
pub(crate) const PUBLISH_PACKET_FIXED_HEADER_RETAIN_FLAG : u8 = 1;
pub(crate) const QOS_MASK : u8 = 3;

pub(crate) const CONNECT_PACKET_CLEAN_SESSION_FLAG_MASK : u8 = 1 << 1;
pub(crate) const CONNECT_PACKET_HAS_WILL_FLAG_MASK : u8 = 1 << 2;
pub(crate) const CONNECT_PACKET_WILL_QOS_FLAG_SHIFT : u8 = 3;
pub(crate) const CONNECT_PACKET_WILL_RETAIN_FLAG_MASK : u8 = 1 << 5;
pub(crate) const CONNECT_PACKET_HAS_PASSWORD_FLAG_MASK : u8 = 1 << 6;
pub(crate) const CONNECT_PACKET_HAS_USERNAME_FLAG_MASK : u8 = 1 << 7;

pub(crate) const CONNACK_SESSION_PRESENT_FLAG_MASK : u8 = 1;

pub(crate) const CONNECT_FIRST_BYTE : u8 = PACKET_TYPE_CONNECT << 4;
pub(crate) const CONNACK_FIRST_BYTE : u8 = PACKET_TYPE_CONNACK << 4;
pub(crate) const PUBLISH_FIRST_BYTE : u8 = PACKET_TYPE_PUBLISH << 4;
pub(crate) const PUBACK_FIRST_BYTE : u8 = PACKET_TYPE_PUBACK << 4;
pub(crate) const PUBREC_FIRST_BYTE : u8 = PACKET_TYPE_PUBREC << 4;
pub(crate) const PUBREL_FIRST_BYTE : u8 = (PACKET_TYPE_PUBREL << 4) | (0x02u8);
pub(crate) const PUBCOMP_FIRST_BYTE : u8 = PACKET_TYPE_PUBCOMP << 4;
pub(crate) const SUBSCRIBE_FIRST_BYTE : u8 = (PACKET_TYPE_SUBSCRIBE << 4) | (0x02u8);
pub(crate) const SUBACK_FIRST_BYTE : u8 = PACKET_TYPE_SUBACK << 4;
pub(crate) const UNSUBSCRIBE_FIRST_BYTE : u8 = (PACKET_TYPE_UNSUBSCRIBE << 4) | (0x02u8);
pub(crate) const UNSUBACK_FIRST_BYTE : u8 = PACKET_TYPE_UNSUBACK << 4;
pub(crate) const PINGREQ_FIRST_BYTE : u8 = PACKET_TYPE_PINGREQ << 4;
pub(crate) const PINGRESP_FIRST_BYTE : u8 = PACKET_TYPE_PINGRESP << 4;
pub(crate) const DISCONNECT_FIRST_BYTE : u8 = PACKET_TYPE_DISCONNECT << 4;

/// Maximum client id length the MQTT 3.1 specification allows
pub(crate) const MQTT31_MAXIMUM_CLIENT_ID_LENGTH : usize = 23;

/// Converts an integer to an MQTT quality of service value.
pub fn convert_u8_to_quality_of_service(value: u8) -> SchistResult<QualityOfService> {
    match value {
        0 => { Ok(QualityOfService::AtMostOnce) }
        1 => { Ok(QualityOfService::AtLeastOnce) }
        2 => { Ok(QualityOfService::ExactlyOnce) }
        _ => {
            Err(SchistError::new_protocol_error(format!("invalid quality of service value {}", value)))
        }
    }
}

/// Converts an integer to a Connack return code.  Values outside 0-5 are protocol errors.
pub fn convert_u8_to_connect_return_code(value: u8) -> SchistResult<ConnectReturnCode> {
    match value {
        0 => { Ok(ConnectReturnCode::Accepted) }
        1 => { Ok(ConnectReturnCode::UnacceptableProtocolVersion) }
        2 => { Ok(ConnectReturnCode::IdentifierRejected) }
        3 => { Ok(ConnectReturnCode::ServerUnavailable) }
        4 => { Ok(ConnectReturnCode::BadUsernameOrPassword) }
        5 => { Ok(ConnectReturnCode::NotAuthorized) }
        _ => {
            Err(SchistError::new_protocol_error(format!("invalid connack return code {}", value)))
        }
    }
}

/// Converts an integer to a Suback return code.
pub fn convert_u8_to_suback_return_code(value: u8) -> SchistResult<SubackReturnCode> {
    match value {
        0 => { Ok(SubackReturnCode::GrantedQos0) }
        1 => { Ok(SubackReturnCode::GrantedQos1) }
        2 => { Ok(SubackReturnCode::GrantedQos2) }
        128 => { Ok(SubackReturnCode::Failure) }
        _ => {
            Err(SchistError::new_protocol_error(format!("invalid suback return code {}", value)))
        }
    }
}

pub(crate) fn packet_type_to_str(packet_type: u8) -> &'static str {
    match packet_type {
        PACKET_TYPE_CONNECT => "CONNECT",
        PACKET_TYPE_CONNACK => "CONNACK",
        PACKET_TYPE_PUBLISH => "PUBLISH",
        PACKET_TYPE_PUBACK => "PUBACK",
        PACKET_TYPE_PUBREC => "PUBREC",
        PACKET_TYPE_PUBREL => "PUBREL",
        PACKET_TYPE_PUBCOMP => "PUBCOMP",
        PACKET_TYPE_SUBSCRIBE => "SUBSCRIBE",
        PACKET_TYPE_SUBACK => "SUBACK",
        PACKET_TYPE_UNSUBSCRIBE => "UNSUBSCRIBE",
        PACKET_TYPE_UNSUBACK => "UNSUBACK",
        PACKET_TYPE_PINGREQ => "PINGREQ",
        PACKET_TYPE_PINGRESP => "PINGRESP",
        PACKET_TYPE_DISCONNECT => "DISCONNECT",
        _ => "UNKNOWN",
    }
}
