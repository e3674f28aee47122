/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

use crate::decode::utils::*;
use crate::encode::*;
use crate::encode::utils::*;
use crate::error::SchistResult;
use crate::logging::*;
use crate::mqtt::*;
use crate::mqtt::utils::*;

use log::*;
use std::fmt;

pub(crate) fn compute_publish_packet_remaining_length(packet: &PublishPacket) -> usize {
    let mut length = compute_length_prefixed_length(packet.topic.as_bytes());
    if packet.qos != QualityOfService::AtMostOnce {
        length += 2;
    }

    length + packet.payload.len()
}

pub(crate) fn compute_publish_fixed_header_first_byte(packet: &PublishPacket) -> u8 {
    let mut first_byte: u8 = PUBLISH_FIRST_BYTE | ((packet.qos as u8) << 1);

    if packet.duplicate {
        first_byte |= PUBLISH_PACKET_FIXED_HEADER_DUPLICATE_FLAG;
    }

    if packet.retain {
        first_byte |= PUBLISH_PACKET_FIXED_HEADER_RETAIN_FLAG;
    }

    first_byte
}

/*
 * The packet id of a QoS 0 publish is a client-local message id; it is recorded on the outbound
 * packet for completion tracking but never written to the wire.
 */
pub(crate) fn encode_publish_packet(packet: &PublishPacket) -> SchistResult<OutboundPacket> {
    check_string_length(&packet.topic, "publish topic")?;

    let remaining_length = compute_publish_packet_remaining_length(packet);
    let mut outbound = OutboundPacket::new(compute_publish_fixed_header_first_byte(packet), remaining_length)?
        .with_packet_id(packet.packet_id);

    outbound.write_string(&packet.topic);
    if packet.qos != QualityOfService::AtMostOnce {
        outbound.write_u16(packet.packet_id);
    }
    outbound.write_bytes(&packet.payload);

    Ok(outbound)
}

pub(crate) fn decode_publish_packet(packet: &mut InboundPacket) -> SchistResult<MqttPacket> {
    let first_byte = packet.command();

    let qos = convert_u8_to_quality_of_service((first_byte >> 1) & QOS_MASK).map_err(|err| {
        error!("PublishPacket Decode - invalid qos bits in fixed header");
        err
    })?;

    let topic = packet.read_string()?;
    let mut packet_id = 0;
    if qos != QualityOfService::AtMostOnce {
        packet_id = packet.read_u16()?;
    }

    Ok(MqttPacket::Publish(PublishPacket {
        packet_id,
        topic,
        qos,
        duplicate: (first_byte & PUBLISH_PACKET_FIXED_HEADER_DUPLICATE_FLAG) != 0,
        retain: (first_byte & PUBLISH_PACKET_FIXED_HEADER_RETAIN_FLAG) != 0,
        payload: packet.read_remaining(),
    }))
}

impl fmt::Display for PublishPacket {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PublishPacket {{")?;
        if self.qos != QualityOfService::AtMostOnce {
            log_primitive_value!(self.packet_id, f, "packet_id");
        }
        log_string!(self.topic, f, "topic");
        log_enum!(self.qos, f, "qos", QualityOfService);
        log_primitive_value!(self.duplicate, f, "duplicate");
        log_primitive_value!(self.retain, f, "retain");
        log_binary_data!(self.payload, f, "payload");
        write!(f, " }}")
    }
}
