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

fn compute_subscribe_packet_remaining_length(packet: &SubscribePacket) -> usize {
    let mut length = 2;
    for subscription in &packet.subscriptions {
        length += compute_length_prefixed_length(subscription.topic_filter.as_bytes()) + 1;
    }

    length
}

pub(crate) fn encode_subscribe_packet(packet: &SubscribePacket) -> SchistResult<OutboundPacket> {
    if packet.subscriptions.is_empty() {
        error!("SubscribePacket Encode - no subscriptions");
        return Err(SchistError::new_invalid_argument("subscribe packet must contain at least one subscription"));
    }

    for subscription in &packet.subscriptions {
        check_string_length(&subscription.topic_filter, "subscription topic filter")?;
    }

    let mut outbound = OutboundPacket::new(SUBSCRIBE_FIRST_BYTE, compute_subscribe_packet_remaining_length(packet))?
        .with_packet_id(packet.packet_id);

    outbound.write_u16(packet.packet_id);
    for subscription in &packet.subscriptions {
        outbound.write_string(&subscription.topic_filter);
        outbound.write_u8(subscription.qos as u8);
    }

    Ok(outbound)
}

pub(crate) fn decode_subscribe_packet(packet: &mut InboundPacket) -> SchistResult<MqttPacket> {
    check_first_byte(packet, SUBSCRIBE_FIRST_BYTE, "Subscribe")?;

    let packet_id = packet.read_u16()?;

    let mut subscriptions = Vec::new();
    while packet.remaining() > 0 {
        let topic_filter = packet.read_string()?;
        let qos_byte = packet.read_u8()?;
        if (qos_byte & !QOS_MASK) != 0 {
            error!("SubscribePacket Decode - reserved bits set in requested qos");
            return Err(SchistError::new_protocol_error("reserved bits set in subscription qos"));
        }

        subscriptions.push(Subscription {
            topic_filter,
            qos: convert_u8_to_quality_of_service(qos_byte)?,
        });
    }

    if subscriptions.is_empty() {
        error!("SubscribePacket Decode - no subscriptions");
        return Err(SchistError::new_protocol_error("subscribe packet contains no subscriptions"));
    }

    Ok(MqttPacket::Subscribe(SubscribePacket {
        packet_id,
        subscriptions,
    }))
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(\"{}\", {})", self.topic_filter, self.qos)
    }
}

impl fmt::Display for SubscribePacket {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SubscribePacket {{")?;
        log_primitive_value!(self.packet_id, f, "packet_id");
        write!(f, " subscriptions: [")?;
        for subscription in &self.subscriptions {
            write!(f, " {}", subscription)?;
        }
        write!(f, " ] }}")
    }
}
