/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

/*!
Blocking result handles returned by client operations.
 */

use crate::client::*;

use log::*;

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Helper type to wait on MQTT operation results
#[derive(Debug)]
pub struct SyncResultReceiver<T> {
    result_lock: Arc<Mutex<Option<T>>>,
    result_signal: Arc<Condvar>
}

pub(crate) struct SyncResultSender<T> {
    result_lock: Arc<Mutex<Option<T>>>,
    result_signal: Arc<Condvar>
}

impl<T> Clone for SyncResultSender<T> {
    fn clone(&self) -> Self {
        SyncResultSender {
            result_lock: self.result_lock.clone(),
            result_signal: self.result_signal.clone()
        }
    }
}

impl<T> SyncResultSender<T> {

    pub(crate) fn new(result_lock: Arc<Mutex<Option<T>>>, result_signal: Arc<Condvar>) -> SyncResultSender<T> {
        SyncResultSender {
            result_lock,
            result_signal
        }
    }

    /// Completes the operation.  Only the first value is kept.
    pub(crate) fn apply(&self, value: T) {
        let mut current_value = self.result_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if current_value.is_some() {
            warn!("SyncResultSender - operation result already set; ignoring second result");
            return;
        }

        *current_value = Some(value);

        self.result_signal.notify_all();
    }
}

impl<T> SyncResultReceiver<T> {

    pub(crate) fn new(result_lock: Arc<Mutex<Option<T>>>, result_signal: Arc<Condvar>) -> SyncResultReceiver<T> {
        SyncResultReceiver {
            result_lock,
            result_signal
        }
    }

    fn lock_result(&self) -> MutexGuard<'_, Option<T>> {
        self.result_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocking.  Waits for the result of an MQTT operation.
    ///
    /// Something must be driving the client (the network thread or repeated `loop_once` calls
    /// on another thread) or this never returns.
    pub fn recv(&self) -> T {
        let mut current_value = self.lock_result();
        loop {
            if let Some(value) = current_value.take() {
                return value;
            }

            current_value = self.result_signal.wait(current_value).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Non-blocking.  Checks if the MQTT operation has produced a result yet.
    /// Returns the result value if so.
    pub fn try_recv(&self) -> Option<T> {
        self.lock_result().take()
    }

    /// Waits at most `timeout` for the result.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut current_value = self.lock_result();
        loop {
            if let Some(value) = current_value.take() {
                return Some(value);
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }

            let (guard, _) = self.result_signal.wait_timeout(current_value, deadline - now).unwrap_or_else(PoisonError::into_inner);
            current_value = guard;
        }
    }
}

pub(crate) fn new_sync_result_pair<T>() -> (SyncResultReceiver<T>, SyncResultSender<T>) {
    let lock = Arc::new(Mutex::new(None));
    let signal = Arc::new(Condvar::new());

    (SyncResultReceiver::new(lock.clone(), signal.clone()), SyncResultSender::new(lock, signal))
}

/// Return type of a connect operation.  Resolves to the broker's return code once the Connack
/// arrives.
pub type SyncConnectResult = SyncResultReceiver<ConnectResult>;

/// Return type of a Subscribe operation.  Invoke recv() on this value to wait for the
/// operation's result.
pub type SyncSubscribeResult = SyncResultReceiver<SubscribeResult>;

/// Return type of an Unsubscribe operation.  Invoke recv() on this value to wait for the
/// operation's result.
pub type SyncUnsubscribeResult = SyncResultReceiver<UnsubscribeResult>;

/// Return type of a Publish operation.  The message id is known as soon as the publish has been
/// accepted by the client.
#[derive(Debug)]
pub struct SyncPublishResult {
    mid: u16,
    receiver: SyncResultReceiver<PublishResult>,
}

impl SyncPublishResult {
    pub(crate) fn new(mid: u16, receiver: SyncResultReceiver<PublishResult>) -> Self {
        SyncPublishResult {
            mid,
            receiver
        }
    }

    /// Message id assigned to the publish
    pub fn mid(&self) -> u16 { self.mid }

    /// Blocking.  Waits for the publish to complete.
    pub fn recv(&self) -> PublishResult {
        self.receiver.recv()
    }

    /// Non-blocking check for completion
    pub fn try_recv(&self) -> Option<PublishResult> {
        self.receiver.try_recv()
    }

    /// Waits at most `timeout` for the publish to complete.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<PublishResult> {
        self.receiver.recv_timeout(timeout)
    }
}
