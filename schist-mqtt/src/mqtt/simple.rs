/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

/* Pingreq, Pingresp and Disconnect are a fixed header with an empty body */

use crate::decode::*;
use crate::decode::utils::*;
use crate::encode::*;
use crate::error::SchistResult;
use crate::mqtt::*;
use crate::mqtt::utils::*;

use std::fmt;

macro_rules! define_empty_packet_impls {
    ($encode_function_name: ident, $decode_function_name: ident, $mqtt_packet_type: ident, $packet_type: ident, $packet_type_as_string: expr, $first_byte: expr) => {
        pub(crate) fn $encode_function_name(_packet: &$packet_type) -> SchistResult<OutboundPacket> {
            OutboundPacket::new($first_byte, 0)
        }

        pub(crate) fn $decode_function_name(packet: &mut InboundPacket) -> SchistResult<MqttPacket> {
            check_first_byte(packet, $first_byte, $packet_type_as_string)?;

            Ok(MqttPacket::$mqtt_packet_type($packet_type {}))
        }

        impl fmt::Display for $packet_type {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{} {{ }}", stringify!($packet_type))
            }
        }
    };
}

define_empty_packet_impls!(encode_pingreq_packet, decode_pingreq_packet, Pingreq, PingreqPacket, "Pingreq", PINGREQ_FIRST_BYTE);
define_empty_packet_impls!(encode_pingresp_packet, decode_pingresp_packet, Pingresp, PingrespPacket, "Pingresp", PINGRESP_FIRST_BYTE);
define_empty_packet_impls!(encode_disconnect_packet, decode_disconnect_packet, Disconnect, DisconnectPacket, "Disconnect", DISCONNECT_FIRST_BYTE);
