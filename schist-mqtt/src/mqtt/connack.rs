/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

use crate::decode::*;
use crate::decode::utils::*;
use crate::encode::*;
use crate::error::SchistResult;
use crate::logging::*;
use crate::mqtt::*;
use crate::mqtt::utils::*;

use std::fmt;

pub(crate) fn encode_connack_packet(packet: &ConnackPacket) -> SchistResult<OutboundPacket> {
    let mut outbound = OutboundPacket::new(CONNACK_FIRST_BYTE, 2)?;
    outbound.write_u8(if packet.session_present { CONNACK_SESSION_PRESENT_FLAG_MASK } else { 0 });
    outbound.write_u8(packet.return_code as u8);

    Ok(outbound)
}

/*
 * The first body byte is reserved in 3.1 and carries the session present flag in 3.1.1; the
 * other bits are ignored.  Return codes above 5 are protocol errors.
 */
pub(crate) fn decode_connack_packet(packet: &mut InboundPacket) -> SchistResult<MqttPacket> {
    check_first_byte(packet, CONNACK_FIRST_BYTE, "Connack")?;

    let flags = packet.read_u8()?;
    let return_code = convert_u8_to_connect_return_code(packet.read_u8()?)?;

    Ok(MqttPacket::Connack(ConnackPacket {
        session_present: (flags & CONNACK_SESSION_PRESENT_FLAG_MASK) != 0,
        return_code,
    }))
}

impl fmt::Display for ConnackPacket {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ConnackPacket {{")?;
        log_primitive_value!(self.session_present, f, "session_present");
        log_enum!(self.return_code, f, "return_code", ConnectReturnCode);
        write!(f, " }}")
    }
}
