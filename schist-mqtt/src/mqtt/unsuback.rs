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
use crate::mqtt::ack::*;
use crate::mqtt::utils::*;

use std::fmt;

define_ack_packet_encoding_impl!(encode_unsuback_packet, UnsubackPacket, UNSUBACK_FIRST_BYTE);
define_ack_packet_decode_function!(decode_unsuback_packet, Unsuback, UnsubackPacket, "Unsuback", UNSUBACK_FIRST_BYTE);
define_ack_packet_display_trait!(UnsubackPacket, "UnsubackPacket");
