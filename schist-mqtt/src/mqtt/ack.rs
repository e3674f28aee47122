/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

/* Puback, Pubrec, Pubrel and Pubcomp share a two byte body holding only the message id */

use crate::decode::*;
use crate::decode::utils::*;
use crate::encode::*;
use crate::error::SchistResult;
use crate::logging::*;
use crate::mqtt::*;
use crate::mqtt::utils::*;

use std::fmt;

macro_rules! define_ack_packet_accessors {
    ($packet_type: ident) => {
        impl $packet_type {

            /// Creates a new acknowledgement for the given message id
            pub fn new(packet_id: u16) -> Self {
                $packet_type {
                    packet_id
                }
            }

            /// Returns the message id this packet acknowledges
            pub fn packet_id(&self) -> u16 { self.packet_id }
        }
    };
}

macro_rules! define_ack_packet_encoding_impl {
    ($function_name: ident, $packet_type: ident, $first_byte: expr) => {
        pub(crate) fn $function_name(packet: &$packet_type) -> SchistResult<OutboundPacket> {
            let mut outbound = OutboundPacket::new($first_byte, 2)?;
            outbound.write_u16(packet.packet_id);

            Ok(outbound)
        }
    };
}

pub(crate) use define_ack_packet_encoding_impl;

macro_rules! define_ack_packet_decode_function {
    ($function_name: ident, $mqtt_packet_type: ident, $packet_type: ident, $packet_type_as_string: expr, $first_byte: expr) => {
        pub(crate) fn $function_name(packet: &mut InboundPacket) -> SchistResult<MqttPacket> {
            check_first_byte(packet, $first_byte, $packet_type_as_string)?;

            let packet_id = packet.read_u16()?;

            Ok(MqttPacket::$mqtt_packet_type($packet_type { packet_id }))
        }
    };
}

pub(crate) use define_ack_packet_decode_function;

define_ack_packet_accessors!(PubackPacket);
define_ack_packet_accessors!(PubrecPacket);
define_ack_packet_accessors!(PubrelPacket);
define_ack_packet_accessors!(PubcompPacket);

define_ack_packet_encoding_impl!(encode_puback_packet, PubackPacket, PUBACK_FIRST_BYTE);
define_ack_packet_encoding_impl!(encode_pubrec_packet, PubrecPacket, PUBREC_FIRST_BYTE);
define_ack_packet_encoding_impl!(encode_pubrel_packet, PubrelPacket, PUBREL_FIRST_BYTE);
define_ack_packet_encoding_impl!(encode_pubcomp_packet, PubcompPacket, PUBCOMP_FIRST_BYTE);

define_ack_packet_decode_function!(decode_puback_packet, Puback, PubackPacket, "Puback", PUBACK_FIRST_BYTE);
define_ack_packet_decode_function!(decode_pubrec_packet, Pubrec, PubrecPacket, "Pubrec", PUBREC_FIRST_BYTE);
define_ack_packet_decode_function!(decode_pubrel_packet, Pubrel, PubrelPacket, "Pubrel", PUBREL_FIRST_BYTE);
define_ack_packet_decode_function!(decode_pubcomp_packet, Pubcomp, PubcompPacket, "Pubcomp", PUBCOMP_FIRST_BYTE);

define_ack_packet_display_trait!(PubackPacket, "PubackPacket");
define_ack_packet_display_trait!(PubrecPacket, "PubrecPacket");
define_ack_packet_display_trait!(PubrelPacket, "PubrelPacket");
define_ack_packet_display_trait!(PubcompPacket, "PubcompPacket");
