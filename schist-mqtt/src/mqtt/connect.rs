/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

use crate::decode::*;
use crate::decode::utils::*;
use crate::encode::*;
use crate::encode::utils::*;
use crate::error::{SchistError, SchistResult};
use crate::logging::*;
use crate::mqtt::*;
use crate::mqtt::utils::*;

use log::*;
use std::fmt;

fn compute_connect_flags(packet: &ConnectPacket) -> u8 {
    let mut flags: u8 = 0;
    if packet.clean_session {
        flags |= CONNECT_PACKET_CLEAN_SESSION_FLAG_MASK;
    }

    if let Some(will) = &packet.will {
        flags |= CONNECT_PACKET_HAS_WILL_FLAG_MASK;
        flags |= (will.qos as u8) << CONNECT_PACKET_WILL_QOS_FLAG_SHIFT;
        if will.retain {
            flags |= CONNECT_PACKET_WILL_RETAIN_FLAG_MASK;
        }
    }

    if packet.username.is_some() {
        flags |= CONNECT_PACKET_HAS_USERNAME_FLAG_MASK;
    }

    if packet.password.is_some() {
        flags |= CONNECT_PACKET_HAS_PASSWORD_FLAG_MASK;
    }

    flags
}

fn compute_connect_packet_remaining_length(packet: &ConnectPacket) -> usize {
    let protocol_name = packet.protocol_version.protocol_name();

    /* protocol name, protocol level, flags, keep alive */
    let mut length = compute_length_prefixed_length(protocol_name.as_bytes()) + 1 + 1 + 2;

    length += compute_length_prefixed_length(packet.client_id.as_bytes());

    if let Some(will) = &packet.will {
        length += compute_length_prefixed_length(will.topic.as_bytes());
        length += compute_length_prefixed_length(&will.payload);
    }

    if let Some(username) = &packet.username {
        length += compute_length_prefixed_length(username.as_bytes());
    }

    if let Some(password) = &packet.password {
        length += compute_length_prefixed_length(password);
    }

    length
}

fn check_connect_packet_lengths(packet: &ConnectPacket) -> SchistResult<()> {
    check_string_length(&packet.client_id, "client id")?;

    if let Some(will) = &packet.will {
        check_string_length(&will.topic, "will topic")?;
        if will.payload.len() > MAXIMUM_STRING_LENGTH {
            return Err(SchistError::new_payload_too_large(will.payload.len()));
        }
    }

    if let Some(username) = &packet.username {
        check_string_length(username, "username")?;
    }

    if let Some(password) = &packet.password {
        if password.len() > MAXIMUM_STRING_LENGTH {
            return Err(SchistError::new_invalid_argument("password length exceeds 65535 bytes"));
        }
    }

    Ok(())
}

pub(crate) fn encode_connect_packet(packet: &ConnectPacket) -> SchistResult<OutboundPacket> {
    check_connect_packet_lengths(packet)?;

    let mut outbound = OutboundPacket::new(CONNECT_FIRST_BYTE, compute_connect_packet_remaining_length(packet))?;

    outbound.write_string(packet.protocol_version.protocol_name());
    outbound.write_u8(packet.protocol_version.protocol_level());
    outbound.write_u8(compute_connect_flags(packet));
    outbound.write_u16(packet.keep_alive_interval_seconds);
    outbound.write_string(&packet.client_id);

    if let Some(will) = &packet.will {
        outbound.write_string(&will.topic);
        outbound.write_length_prefixed_bytes(&will.payload);
    }

    if let Some(username) = &packet.username {
        outbound.write_string(username);
    }

    if let Some(password) = &packet.password {
        outbound.write_length_prefixed_bytes(password);
    }

    Ok(outbound)
}

fn decode_protocol_version(name: &str, level: u8) -> SchistResult<ProtocolVersion> {
    match (name, level) {
        ("MQIsdp", 3) => { Ok(ProtocolVersion::Mqtt31) }
        ("MQTT", 4) => { Ok(ProtocolVersion::Mqtt311) }
        _ => {
            error!("ConnectPacket Decode - unsupported protocol {} level {}", name, level);
            Err(SchistError::new_protocol_error(format!("unsupported protocol {} level {}", name, level)))
        }
    }
}

pub(crate) fn decode_connect_packet(packet: &mut InboundPacket) -> SchistResult<MqttPacket> {
    check_first_byte(packet, CONNECT_FIRST_BYTE, "Connect")?;

    let protocol_name = packet.read_string()?;
    let protocol_level = packet.read_u8()?;
    let protocol_version = decode_protocol_version(&protocol_name, protocol_level)?;

    let flags = packet.read_u8()?;
    if (flags & 0x01) != 0 {
        error!("ConnectPacket Decode - reserved connect flag set");
        return Err(SchistError::new_protocol_error("reserved connect flag set"));
    }

    let keep_alive_interval_seconds = packet.read_u16()?;
    let client_id = packet.read_string()?;

    let mut will = None;
    if (flags & CONNECT_PACKET_HAS_WILL_FLAG_MASK) != 0 {
        let topic = packet.read_string()?;
        let payload = packet.read_length_prefixed_bytes()?;
        let qos = convert_u8_to_quality_of_service((flags >> CONNECT_PACKET_WILL_QOS_FLAG_SHIFT) & QOS_MASK)?;

        will = Some(PublishPacket {
            topic,
            qos,
            retain: (flags & CONNECT_PACKET_WILL_RETAIN_FLAG_MASK) != 0,
            payload,
            ..Default::default()
        });
    }

    let mut username = None;
    if (flags & CONNECT_PACKET_HAS_USERNAME_FLAG_MASK) != 0 {
        username = Some(packet.read_string()?);
    }

    let mut password = None;
    if (flags & CONNECT_PACKET_HAS_PASSWORD_FLAG_MASK) != 0 {
        password = Some(packet.read_length_prefixed_bytes()?);
    }

    Ok(MqttPacket::Connect(ConnectPacket {
        protocol_version,
        keep_alive_interval_seconds,
        clean_session: (flags & CONNECT_PACKET_CLEAN_SESSION_FLAG_MASK) != 0,
        client_id,
        will,
        username,
        password,
    }))
}

impl fmt::Display for ConnectPacket {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ConnectPacket {{")?;
        log_enum!(self.protocol_version, f, "protocol_version", ProtocolVersion);
        log_primitive_value!(self.keep_alive_interval_seconds, f, "keep_alive_interval_seconds");
        log_primitive_value!(self.clean_session, f, "clean_session");
        log_string!(self.client_id, f, "client_id");
        if let Some(will) = &self.will {
            write!(f, " will:{}", will)?;
        }
        log_optional_string!(self.username, f, "username", value);
        log_optional_binary_data_sensitive!(self.password, f, "password");
        write!(f, " }}")
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::decode::testing::*;
    use assert_matches::assert_matches;

    fn create_connect_packet_with_everything() -> ConnectPacket {
        ConnectPacket {
            protocol_version: ProtocolVersion::Mqtt311,
            keep_alive_interval_seconds: 1200,
            clean_session: false,
            client_id: "A-client-id".to_string(),
            will: Some(PublishPacket {
                topic: "last/will".to_string(),
                qos: QualityOfService::ExactlyOnce,
                retain: true,
                payload: "goodbye".as_bytes().to_vec(),
                ..Default::default()
            }),
            username: Some("MyUsername".to_string()),
            password: Some("Secret".as_bytes().to_vec()),
        }
    }

    #[test]
    fn connect_round_trip_encode_decode_default() {
        let packet = ConnectPacket {
            ..Default::default()
        };

        assert!(do_round_trip_encode_decode_test(&MqttPacket::Connect(packet)));
    }

    #[test]
    fn connect_round_trip_encode_decode_everything() {
        assert!(do_round_trip_encode_decode_test(&MqttPacket::Connect(create_connect_packet_with_everything())));
    }

    #[test]
    fn connect_round_trip_encode_decode_username_only() {
        let packet = ConnectPacket {
            protocol_version: ProtocolVersion::Mqtt31,
            keep_alive_interval_seconds: 60,
            clean_session: true,
            client_id: "mosq".to_string(),
            username: Some("user".to_string()),
            ..Default::default()
        };

        assert!(do_round_trip_encode_decode_test(&MqttPacket::Connect(packet)));
    }

    #[test]
    fn connect_mqtt31_wire_layout() {
        let packet = ConnectPacket {
            protocol_version: ProtocolVersion::Mqtt31,
            keep_alive_interval_seconds: 10,
            clean_session: true,
            client_id: "id".to_string(),
            ..Default::default()
        };

        let expected : Vec<u8> = vec!(
            0x10, 16,
            0x00, 0x06, b'M', b'Q', b'I', b's', b'd', b'p',
            3,
            0x02,
            0x00, 0x0A,
            0x00, 0x02, b'i', b'd');

        assert_eq!(expected, encode_packet_for_test(&MqttPacket::Connect(packet)));
    }

    #[test]
    fn connect_flags_layout() {
        let packet = create_connect_packet_with_everything();

        /* username, password, will retain, will qos 2, will */
        assert_eq!(0x80 | 0x40 | 0x20 | 0x10 | 0x04, compute_connect_flags(&packet));
    }

    #[test]
    fn connect_decode_failure_bad_fixed_header() {
        do_fixed_header_flag_decode_failure_test(&MqttPacket::Connect(create_connect_packet_with_everything()), 2);
    }

    #[test]
    fn connect_decode_failure_bad_protocol_level() {
        let mutator = | bytes: &[u8] | -> Vec<u8> {
            let mut clone = bytes.to_vec();
            /* fixed header (2) + "MQTT" (6) */
            clone[8] = 5;
            clone
        };

        do_mutated_decode_failure_test(&MqttPacket::Connect(create_connect_packet_with_everything()), mutator);
    }

    #[test]
    fn connect_decode_failure_reserved_flag() {
        let mutator = | bytes: &[u8] | -> Vec<u8> {
            let mut clone = bytes.to_vec();
            clone[9] |= 0x01;
            clone
        };

        do_mutated_decode_failure_test(&MqttPacket::Connect(create_connect_packet_with_everything()), mutator);
    }

    #[test]
    fn connect_encode_failure_oversized_will_payload() {
        let mut packet = create_connect_packet_with_everything();
        if let Some(will) = &mut packet.will {
            will.payload = vec!(0; 65536);
        }

        assert_matches!(encode_connect_packet(&packet), Err(SchistError::PayloadTooLarge(_)));
    }
}
