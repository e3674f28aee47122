/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

/*!
TCP/TLS transport.

A connection is created with `connect` and is then driven with non-blocking reads and writes.  In
non-blocking connect mode the TCP handshake may still be in progress when `connect` returns;
`Connection::poll_connected` finishes it (including any TLS handshake) once the socket becomes
writable.
 */

use crate::config::*;
use crate::error::{SchistError, SchistResult};

use log::*;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

/// Everything needed to (re)establish a connection to the broker
#[derive(Clone, Debug)]
pub(crate) struct TransportConfig {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) tls_options: Option<TlsOptions>,
    pub(crate) client_options: MqttClientOptions,
}

enum TransportStream {
    Plain(TcpStream),

    #[cfg(feature = "threaded-rustls")]
    Rustls(Box<rustls::StreamOwned<rustls::ClientConnection, TcpStream>>),

    #[cfg(feature = "threaded-native-tls")]
    NativeTls(native_tls::TlsStream<TcpStream>),
}

impl TransportStream {
    fn tcp(&self) -> &TcpStream {
        match self {
            TransportStream::Plain(stream) => { stream }
            #[cfg(feature = "threaded-rustls")]
            TransportStream::Rustls(stream) => { stream.get_ref() }
            #[cfg(feature = "threaded-native-tls")]
            TransportStream::NativeTls(stream) => { stream.get_ref() }
        }
    }

    fn shutdown(&mut self) {
        match self {
            TransportStream::Plain(_) => {}
            #[cfg(feature = "threaded-rustls")]
            TransportStream::Rustls(stream) => {
                stream.conn.send_close_notify();
                let _ = stream.conn.complete_io(&mut stream.sock);
            }
            #[cfg(feature = "threaded-native-tls")]
            TransportStream::NativeTls(stream) => {
                let _ = stream.shutdown();
            }
        }

        let _ = self.tcp().shutdown(Shutdown::Both);
    }
}

impl Read for TransportStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            TransportStream::Plain(stream) => { stream.read(buf) }
            #[cfg(feature = "threaded-rustls")]
            TransportStream::Rustls(stream) => { stream.read(buf) }
            #[cfg(feature = "threaded-native-tls")]
            TransportStream::NativeTls(stream) => { stream.read(buf) }
        }
    }
}

impl Write for TransportStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            TransportStream::Plain(stream) => { stream.write(buf) }
            #[cfg(feature = "threaded-rustls")]
            TransportStream::Rustls(stream) => { stream.write(buf) }
            #[cfg(feature = "threaded-native-tls")]
            TransportStream::NativeTls(stream) => { stream.write(buf) }
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            TransportStream::Plain(stream) => { stream.flush() }
            #[cfg(feature = "threaded-rustls")]
            TransportStream::Rustls(stream) => { stream.flush() }
            #[cfg(feature = "threaded-native-tls")]
            TransportStream::NativeTls(stream) => { stream.flush() }
        }
    }
}

enum ConnectionPhase {
    Connecting {
        socket: Socket,
        started: Instant,
    },
    Established(TransportStream),
    Closed,
}

/// A single transport connection to the broker
pub(crate) struct Connection {
    host: String,
    tls_options: Option<TlsOptions>,
    connect_timeout: Duration,
    phase: ConnectionPhase,
}

fn is_connect_in_progress(error: &std::io::Error) -> bool {
    #[cfg(unix)]
    if error.raw_os_error() == Some(libc::EINPROGRESS) {
        return true;
    }

    error.kind() == ErrorKind::WouldBlock
}

fn is_not_yet_connected(error: &std::io::Error) -> bool {
    #[cfg(unix)]
    if error.raw_os_error() == Some(libc::ENOTCONN) {
        return true;
    }

    error.kind() == ErrorKind::NotConnected
}

fn resolve(host: &str, port: u16) -> SchistResult<Vec<SocketAddr>> {
    let addresses : Vec<SocketAddr> = (host, port).to_socket_addrs()
        .map_err(|error| {
            error!("Transport - unable to resolve \"{}\": {}", host, error);
            SchistError::new_connection_establishment_failure(error)
        })?
        .collect();

    if addresses.is_empty() {
        error!("Transport - \"{}\" resolved to no addresses", host);
        return Err(SchistError::new_connection_establishment_failure(format!("no addresses found for {}", host)));
    }

    Ok(addresses)
}

/// Opens a connection to the configured broker, trying each resolved address in turn.
pub(crate) fn connect(config: &TransportConfig) -> SchistResult<Connection> {
    let remote_addresses = resolve(&config.host, config.port)?;
    let bind_addresses = match &config.client_options.bind_address {
        Some(bind_address) => { resolve(bind_address, 0)? }
        None => { Vec::new() }
    };

    let mut last_error = None;
    for remote_address in remote_addresses {
        let bind_address = if config.client_options.bind_address.is_some() {
            match bind_addresses.iter().find(|candidate| candidate.is_ipv4() == remote_address.is_ipv4()) {
                Some(bind_address) => { Some(*bind_address) }
                None => {
                    debug!("Transport - skipping {}; no bind address of the same family", remote_address);
                    continue;
                }
            }
        } else {
            None
        };

        match connect_to_address(config, remote_address, bind_address) {
            Ok(connection) => {
                return Ok(connection);
            }
            Err(error) => {
                warn!("Transport - connection attempt to {} failed: {}", remote_address, error);
                last_error = Some(error);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| SchistError::new_connection_establishment_failure("no usable remote address")))
}

fn connect_to_address(config: &TransportConfig, remote_address: SocketAddr, bind_address: Option<SocketAddr>) -> SchistResult<Connection> {
    let connect_timeout = config.client_options.connect_timeout;

    let socket = Socket::new(Domain::for_address(remote_address), Type::STREAM, Some(Protocol::TCP))
        .map_err(SchistError::new_connection_establishment_failure)?;

    if let Some(bind_address) = bind_address {
        socket.bind(&SockAddr::from(bind_address)).map_err(SchistError::new_connection_establishment_failure)?;
    }

    socket.set_nodelay(true).map_err(SchistError::new_connection_establishment_failure)?;

    let mut connection = Connection {
        host: config.host.clone(),
        tls_options: config.tls_options.clone(),
        connect_timeout,
        phase: ConnectionPhase::Closed,
    };

    let remote = SockAddr::from(remote_address);
    match config.client_options.connect_mode {
        ConnectMode::Blocking => {
            socket.connect_timeout(&remote, connect_timeout).map_err(SchistError::new_connection_establishment_failure)?;
            connection.phase = ConnectionPhase::Established(connection.finish_connect(socket)?);
        }
        ConnectMode::NonBlocking => {
            socket.set_nonblocking(true).map_err(SchistError::new_connection_establishment_failure)?;
            match socket.connect(&remote) {
                Ok(()) => {
                    connection.phase = ConnectionPhase::Established(connection.finish_connect(socket)?);
                }
                Err(error) if is_connect_in_progress(&error) => {
                    debug!("Transport - connect to {} in progress", remote_address);
                    connection.phase = ConnectionPhase::Connecting {
                        socket,
                        started: Instant::now(),
                    };
                }
                Err(error) => {
                    return Err(SchistError::new_connection_establishment_failure(error));
                }
            }
        }
    }

    info!("Transport - connection to {} started", remote_address);

    Ok(connection)
}

impl Connection {

    /// Completes a TCP connection: runs the TLS handshake if configured and leaves the socket in
    /// non-blocking mode.
    fn finish_connect(&self, socket: Socket) -> SchistResult<TransportStream> {
        let stream : TcpStream = socket.into();

        let Some(tls_options) = &self.tls_options else {
            stream.set_nonblocking(true)?;
            return Ok(TransportStream::Plain(stream));
        };

        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(self.connect_timeout))?;
        stream.set_write_timeout(Some(self.connect_timeout))?;

        let tls_stream = self.open_tls_stream(tls_options, stream)?;

        let tcp = tls_stream.tcp();
        tcp.set_read_timeout(None)?;
        tcp.set_write_timeout(None)?;
        tcp.set_nonblocking(true)?;

        info!("Transport - tls handshake with {} complete", self.host);

        Ok(tls_stream)
    }

    #[cfg_attr(not(any(feature = "threaded-rustls", feature = "threaded-native-tls")), allow(unused_variables))]
    fn open_tls_stream(&self, tls_options: &TlsOptions, stream: TcpStream) -> SchistResult<TransportStream> {
        match tls_options.options {
            #[cfg(feature = "threaded-rustls")]
            TlsData::Rustls(ref config) => {
                Ok(TransportStream::Rustls(Box::new(crate::features::schist_rustls::make_rustls_stream(config.clone(), &self.host, stream)?)))
            }
            #[cfg(feature = "threaded-native-tls")]
            TlsData::NativeTls(ref connector) => {
                Ok(TransportStream::NativeTls(crate::features::schist_native_tls::make_native_tls_stream(connector, &self.host, stream)?))
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn is_established(&self) -> bool {
        matches!(self.phase, ConnectionPhase::Established(_))
    }

    /// Drives a non-blocking connect forward.  Returns true once the connection can carry data.
    pub(crate) fn poll_connected(&mut self) -> SchistResult<bool> {
        let ready = match &self.phase {
            ConnectionPhase::Established(_) => {
                return Ok(true);
            }
            ConnectionPhase::Closed => {
                return Err(SchistError::new_no_connection());
            }
            ConnectionPhase::Connecting { socket, started } => {
                if let Some(error) = socket.take_error().map_err(SchistError::new_connection_establishment_failure)? {
                    return Err(SchistError::new_connection_establishment_failure(error));
                }

                match socket.peer_addr() {
                    Ok(_) => { true }
                    Err(error) if is_not_yet_connected(&error) => {
                        if started.elapsed() > self.connect_timeout {
                            return Err(SchistError::new_connection_establishment_failure("timed out establishing the tcp connection"));
                        }

                        false
                    }
                    Err(error) => {
                        return Err(SchistError::new_connection_establishment_failure(error));
                    }
                }
            }
        };

        if !ready {
            return Ok(false);
        }

        if let ConnectionPhase::Connecting { socket, .. } = std::mem::replace(&mut self.phase, ConnectionPhase::Closed) {
            let stream = self.finish_connect(socket)?;
            self.phase = ConnectionPhase::Established(stream);
            debug!("Transport - non-blocking connect to {} complete", self.host);
        }

        Ok(true)
    }

    /// Tears down the TLS session and the socket.  Calling it again does nothing.
    pub(crate) fn close(&mut self) {
        match std::mem::replace(&mut self.phase, ConnectionPhase::Closed) {
            ConnectionPhase::Established(mut stream) => {
                debug!("Transport - closing connection to {}", self.host);
                stream.shutdown();
            }
            ConnectionPhase::Connecting { socket, .. } => {
                let _ = socket.shutdown(Shutdown::Both);
            }
            ConnectionPhase::Closed => {}
        }
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.phase {
            ConnectionPhase::Established(stream) => { stream.read(buf) }
            ConnectionPhase::Connecting { .. } => { Err(std::io::Error::from(ErrorKind::WouldBlock)) }
            ConnectionPhase::Closed => { Err(std::io::Error::from(ErrorKind::NotConnected)) }
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.phase {
            ConnectionPhase::Established(stream) => { stream.write(buf) }
            ConnectionPhase::Connecting { .. } => { Err(std::io::Error::from(ErrorKind::WouldBlock)) }
            ConnectionPhase::Closed => { Err(std::io::Error::from(ErrorKind::NotConnected)) }
        }
    }

    /// Pushes buffered TLS records toward the socket.  May fail with `WouldBlock`.
    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.phase {
            ConnectionPhase::Established(stream) => { stream.flush() }
            _ => { Ok(()) }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phase = match &self.phase {
            ConnectionPhase::Connecting { .. } => { "connecting" }
            ConnectionPhase::Established(_) => { "established" }
            ConnectionPhase::Closed => { "closed" }
        };

        f.debug_struct("Connection")
            .field("host", &self.host)
            .field("tls", &self.tls_options.is_some())
            .field("phase", &phase)
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
