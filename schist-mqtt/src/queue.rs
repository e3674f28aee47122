/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

use crate::encode::OutboundPacket;
use crate::error::{SchistError, SchistResult};
use crate::lock;
use crate::mqtt::utils::*;

use log::*;

use std::collections::VecDeque;
use std::io::{ErrorKind, Write};
use std::sync::Mutex;

/// What a single flush pass accomplished
#[derive(Debug, Default)]
pub(crate) struct FlushResult {

    /// message ids of QoS 0 publishes whose final byte was written
    pub(crate) qos0_completed: Vec<u16>,

    pub(crate) packets_written: usize,

    pub(crate) bytes_written: usize,

    pub(crate) disconnect_written: bool,
}

/// FIFO of encoded packets waiting to be written, plus the packet currently being written.
///
/// Lock order is `current`, then `pending`, then the transport.
pub(crate) struct OutboundQueue {
    current: Mutex<Option<OutboundPacket>>,
    pending: Mutex<VecDeque<OutboundPacket>>,
}

impl OutboundQueue {
    pub(crate) fn new() -> Self {
        OutboundQueue {
            current: Mutex::new(None),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn enqueue(&self, packet: OutboundPacket) {
        trace!("OutboundQueue - enqueueing {} ({} bytes)", packet_type_to_str(packet.packet_type()), packet.as_bytes().len());
        lock(&self.pending).push_back(packet);
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        let current = lock(&self.current);
        current.is_none() && lock(&self.pending).is_empty()
    }

    #[cfg(test)]
    pub(crate) fn pending_packet_ids(&self) -> Vec<Option<u16>> {
        lock(&self.pending).iter().map(|packet| packet.packet_id()).collect()
    }

    /// Drops everything, including a partially written packet.
    pub(crate) fn clear(&self) {
        let mut current = lock(&self.current);
        let mut pending = lock(&self.pending);

        if let Some(packet) = current.as_ref() {
            debug!("OutboundQueue - discarding partially written {}", packet_type_to_str(packet.packet_type()));
        }

        *current = None;
        pending.clear();
    }

    /// Replaces the whole queue with `packet` under a single lock acquisition, so nothing enqueued
    /// concurrently can land ahead of it.
    pub(crate) fn reset_with(&self, packet: OutboundPacket) {
        let mut current = lock(&self.current);
        let mut pending = lock(&self.pending);

        debug!("OutboundQueue - resetting with {}, dropping {} queued packets", packet_type_to_str(packet.packet_type()), pending.len() + current.iter().count());

        *current = None;
        pending.clear();
        pending.push_back(packet);
    }

    /// Writes queued bytes until the transport would block or the queue is empty, then flushes the
    /// transport.  A missing transport makes this a no-op; a flush that would block is not an error.
    pub(crate) fn flush<W: Write>(&self, transport: &Mutex<Option<W>>) -> SchistResult<FlushResult> {
        let mut current = lock(&self.current);
        let mut result = FlushResult::default();

        loop {
            if current.is_none() {
                *current = lock(&self.pending).pop_front();
            }

            let Some(packet) = current.as_mut() else {
                break;
            };

            let write_result = {
                let mut transport = lock(transport);
                let Some(stream) = transport.as_mut() else {
                    return Ok(result);
                };

                stream.write(packet.unwritten())
            };

            match write_result {
                Ok(0) => {
                    return Err(SchistError::new_connection_lost("transport accepted zero bytes"));
                }
                Ok(bytes_written) => {
                    packet.advance(bytes_written);
                    result.bytes_written += bytes_written;

                    if packet.is_fully_written() {
                        debug!("OutboundQueue - finished writing {}", packet_type_to_str(packet.packet_type()));
                        result.packets_written += 1;

                        if packet.is_qos0_publish() {
                            if let Some(mid) = packet.packet_id() {
                                result.qos0_completed.push(mid);
                            }
                        } else if packet.packet_type() == PACKET_TYPE_DISCONNECT {
                            result.disconnect_written = true;
                        }

                        *current = None;
                    }
                }
                Err(error) => {
                    match error.kind() {
                        ErrorKind::Interrupted => {}
                        ErrorKind::WouldBlock => {
                            break;
                        }
                        _ => {
                            return Err(error.into());
                        }
                    }
                }
            }
        }

        if let Some(stream) = lock(transport).as_mut() {
            if let Err(error) = stream.flush() {
                match error.kind() {
                    ErrorKind::WouldBlock | ErrorKind::Interrupted => {
                        trace!("OutboundQueue - transport flush deferred: {}", error);
                    }
                    _ => {
                        return Err(error.into());
                    }
                }
            }
        }

        Ok(result)
    }
}
