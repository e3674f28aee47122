/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

/*!
Background network thread that services a client's connection and reconnects with backoff.
 */

use crate::client::shared_impl::ClientCore;
use crate::error::{SchistError, SchistResult};

use log::*;

use std::sync::{Arc, Weak};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

const DEFAULT_IDLE_SERVICE_SLEEP : Duration = Duration::from_millis(10);

/// Network thread configuration
#[derive(Clone, Debug)]
pub struct ThreadedClientOptions {

    /// How long the thread sleeps after a pass that moved no bytes
    pub(crate) idle_service_sleep: Duration,
}

impl ThreadedClientOptions {

    /// Creates a new builder for ThreadedClientOptions instances
    pub fn builder() -> ThreadedClientOptionsBuilder {
        ThreadedClientOptionsBuilder::new()
    }
}

impl Default for ThreadedClientOptions {
    fn default() -> Self {
        ThreadedClientOptions {
            idle_service_sleep: DEFAULT_IDLE_SERVICE_SLEEP,
        }
    }
}

/// Builder type for ThreadedClientOptions
#[derive(Default)]
pub struct ThreadedClientOptionsBuilder {
    options: ThreadedClientOptions
}

impl ThreadedClientOptionsBuilder {

    /// Creates a new builder object for ThreadedClientOptions
    pub fn new() -> Self {
        ThreadedClientOptionsBuilder {
            options: ThreadedClientOptions::default()
        }
    }

    /// Sets the sleep between service passes that did no work (default 10 ms)
    pub fn with_idle_service_sleep(mut self, idle_service_sleep: Duration) -> Self {
        self.options.idle_service_sleep = idle_service_sleep;
        self
    }

    /// Builds a new set of threaded client options
    pub fn build(self) -> ThreadedClientOptions {
        self.options
    }
}

pub(crate) struct NetworkThread {
    stop_sender: Sender<()>,
    handle: JoinHandle<()>,
}

enum LoopControl {
    Continue,
    Stop,
}

/// Sleeps for `duration` unless a stop request arrives first.
fn wait_for_stop(stop_receiver: &Receiver<()>, duration: Duration) -> LoopControl {
    match stop_receiver.recv_timeout(duration) {
        Err(RecvTimeoutError::Timeout) => { LoopControl::Continue }
        _ => { LoopControl::Stop }
    }
}

fn service_iteration(core: &ClientCore, stop_receiver: &Receiver<()>, options: &ThreadedClientOptions) -> LoopControl {
    match stop_receiver.try_recv() {
        Err(TryRecvError::Empty) => {}
        _ => { return LoopControl::Stop; }
    }

    if core.has_transport() {
        trace!("threaded - servicing connection");
        match core.service_once() {
            Ok(true) => { LoopControl::Continue }
            Ok(false) => { wait_for_stop(stop_receiver, options.idle_service_sleep) }
            Err(error) => {
                /* teardown already happened; the next pass decides whether to reconnect */
                debug!("threaded - service pass ended the connection: {}", error);
                LoopControl::Continue
            }
        }
    } else if core.wants_connection() {
        let reconnect_period = core.next_reconnect_period();
        info!("threaded - client {} reconnecting in {:?}", core.client_id(), reconnect_period);
        if let LoopControl::Stop = wait_for_stop(stop_receiver, reconnect_period) {
            return LoopControl::Stop;
        }

        if !core.wants_connection() {
            return LoopControl::Continue;
        }

        if let Err(error) = core.reconnect_if_idle() {
            warn!("threaded - client {} reconnect attempt failed: {}", core.client_id(), error);
        }

        LoopControl::Continue
    } else {
        wait_for_stop(stop_receiver, options.idle_service_sleep)
    }
}

fn network_thread_main(core: Weak<ClientCore>, stop_receiver: Receiver<()>, options: ThreadedClientOptions) {
    debug!("threaded - network thread started");

    loop {
        let Some(core) = core.upgrade() else {
            debug!("threaded - client dropped; network thread exiting");
            return;
        };

        if let LoopControl::Stop = service_iteration(&core, &stop_receiver, &options) {
            core.set_network_thread_active(false);
            debug!("threaded - network thread stopping");
            return;
        }
    }
}

impl NetworkThread {
    pub(crate) fn spawn(core: Arc<ClientCore>, options: &ThreadedClientOptions) -> SchistResult<NetworkThread> {
        let (stop_sender, stop_receiver) = channel();
        let weak_core = Arc::downgrade(&core);
        let options = options.clone();

        core.set_network_thread_active(true);
        let handle = thread::Builder::new()
            .name(format!("schist-{}", core.client_id()))
            .spawn(move || network_thread_main(weak_core, stop_receiver, options))
            .map_err(|error| {
                core.set_network_thread_active(false);
                SchistError::new_std_io_error(error)
            })?;

        Ok(NetworkThread {
            stop_sender,
            handle,
        })
    }

    /// Asks the thread to exit and waits for it.
    pub(crate) fn stop(self) -> SchistResult<()> {
        if self.stop_sender.send(()).is_err() {
            debug!("threaded - network thread already gone");
        }

        self.handle.join().map_err(|_| SchistError::new_internal_state_error("network thread panicked"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_builder() {
        let options = ThreadedClientOptions::builder()
            .with_idle_service_sleep(Duration::from_millis(3))
            .build();
        assert_eq!(Duration::from_millis(3), options.idle_service_sleep);
        assert_eq!(DEFAULT_IDLE_SERVICE_SLEEP, ThreadedClientOptions::default().idle_service_sleep);
    }

    #[test]
    fn wait_for_stop_returns_early_on_request() {
        let (sender, receiver) = channel();
        sender.send(()).unwrap();
        assert!(matches!(wait_for_stop(&receiver, Duration::from_secs(10)), LoopControl::Stop));

        let (_sender, receiver) = channel::<()>();
        assert!(matches!(wait_for_stop(&receiver, Duration::from_millis(5)), LoopControl::Continue));
    }
}
