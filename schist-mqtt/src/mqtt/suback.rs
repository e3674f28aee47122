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

pub(crate) fn encode_suback_packet(packet: &SubackPacket) -> SchistResult<OutboundPacket> {
    let mut outbound = OutboundPacket::new(SUBACK_FIRST_BYTE, 2 + packet.return_codes.len())?
        .with_packet_id(packet.packet_id);

    outbound.write_u16(packet.packet_id);
    for return_code in &packet.return_codes {
        outbound.write_u8(*return_code as u8);
    }

    Ok(outbound)
}

/* one return code byte per requested subscription fills the rest of the packet */
pub(crate) fn decode_suback_packet(packet: &mut InboundPacket) -> SchistResult<MqttPacket> {
    check_first_byte(packet, SUBACK_FIRST_BYTE, "Suback")?;

    let packet_id = packet.read_u16()?;

    let mut return_codes = Vec::with_capacity(packet.remaining());
    while packet.remaining() > 0 {
        return_codes.push(convert_u8_to_suback_return_code(packet.read_u8()?)?);
    }

    Ok(MqttPacket::Suback(SubackPacket {
        packet_id,
        return_codes,
    }))
}

impl fmt::Display for SubackPacket {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SubackPacket {{")?;
        log_primitive_value!(self.packet_id, f, "packet_id");
        write!(f, " return_codes: [")?;
        for (i, return_code) in self.return_codes.iter().enumerate() {
            write!(f, " {}:{}", i, return_code)?;
        }
        write!(f, " ] }}")
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::decode::testing::*;
    use crate::error::SchistError;
    use assert_matches::assert_matches;

    #[test]
    fn suback_round_trip_encode_decode() {
        let packet = SubackPacket {
            packet_id: 1023,
            return_codes: vec!(SubackReturnCode::GrantedQos0, SubackReturnCode::GrantedQos2,
                SubackReturnCode::Failure, SubackReturnCode::GrantedQos1),
        };

        assert!(do_round_trip_encode_decode_test(&MqttPacket::Suback(packet)));
    }

    #[test]
    fn suback_decode_granted_values() {
        let packets = decode_bytes_for_test(&[0x90, 0x04, 0x00, 0x05, 0x01, 0x80]).unwrap();
        let expected = SubackPacket {
            packet_id: 5,
            return_codes: vec!(SubackReturnCode::GrantedQos1, SubackReturnCode::Failure),
        };

        assert_eq!(vec!(MqttPacket::Suback(expected)), packets);
    }

    #[test]
    fn suback_decode_failure_bad_return_code() {
        assert_matches!(decode_bytes_for_test(&[0x90, 0x03, 0x00, 0x05, 0x03]), Err(SchistError::ProtocolError(_)));
        assert_matches!(decode_bytes_for_test(&[0x90, 0x03, 0x00, 0x05, 0x81]), Err(SchistError::ProtocolError(_)));
    }

    #[test]
    fn suback_decode_failure_bad_fixed_header() {
        let packet = SubackPacket {
            packet_id: 2,
            return_codes: vec!(SubackReturnCode::GrantedQos0),
        };

        do_fixed_header_flag_decode_failure_test(&MqttPacket::Suback(packet), 2);
    }
}
