//! Byte relay between a direct-tcpip channel and a loopback socket.
//!
//! libssh2 wants a real socket under every session, so a session that has to
//! run *inside* a forwarded channel gets one end of a loopback TCP pair while
//! a relay thread shuttles bytes between the other end and the channel. The
//! carrying session is switched to non-blocking mode for the relay's lifetime;
//! its own exec and SCP calls wait out EAGAIN between the relay's turns.

use crate::TransportError;
use ssh2::{Channel, Session};
use std::io::{ErrorKind, Read, Write};
use std::net::{Ipv4Addr, Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

const RELAY_BUFFER_SIZE: usize = 32 * 1024;
const IDLE_BACKOFF: Duration = Duration::from_millis(2);

/// A running relay thread
#[derive(Debug)]
pub struct ChannelRelay {
    /// Forwarded destination, for logs
    destination: String,
    /// Set to ask the relay thread to exit
    stop: Arc<AtomicBool>,
    /// Relay thread handle
    handle: Option<JoinHandle<()>>,
}

impl ChannelRelay {
    /// Start relaying `channel`; returns the relay and the socket the inner
    /// session should be built on.
    pub fn start(
        carrier: &Session,
        channel: Channel,
        destination: String,
    ) -> Result<(Self, TcpStream), TransportError> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
        let local_addr = listener.local_addr()?;
        let inner_end = TcpStream::connect(local_addr)?;
        let (relay_end, _) = listener.accept()?;
        relay_end.set_nonblocking(true)?;
        relay_end.set_nodelay(true)?;

        carrier.set_blocking(false);

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let thread_destination = destination.clone();

        let handle = thread::Builder::new()
            .name(format!("nwkit-relay-{}", destination))
            .spawn(move || pump(channel, relay_end, thread_stop, thread_destination))?;

        debug!("Relay for {} listening on {}", destination, local_addr);

        Ok((
            Self {
                destination,
                stop,
                handle: Some(handle),
            },
            inner_end,
        ))
    }

    /// Stop the relay and wait for its thread
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Relay thread for {} panicked", self.destination);
            } else {
                debug!("Relay for {} stopped", self.destination);
            }
        }
    }
}

impl Drop for ChannelRelay {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pump(mut channel: Channel, mut socket: TcpStream, stop: Arc<AtomicBool>, destination: String) {
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    let mut to_channel: Vec<u8> = Vec::new();
    let mut to_socket: Vec<u8> = Vec::new();

    while !stop.load(Ordering::Relaxed) {
        let mut progressed = false;

        if to_channel.is_empty() {
            match socket.read(&mut buf) {
                Ok(0) => {
                    debug!("Inner session for {} closed its socket", destination);
                    break;
                }
                Ok(n) => {
                    to_channel.extend_from_slice(&buf[..n]);
                    progressed = true;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => {
                    debug!("Relay socket read for {} failed: {}", destination, e);
                    break;
                }
            }
        }

        if !to_channel.is_empty() {
            match channel.write(&to_channel) {
                Ok(n) => {
                    to_channel.drain(..n);
                    progressed = true;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => {
                    debug!("Relay channel write for {} failed: {}", destination, e);
                    break;
                }
            }
        }

        if to_socket.is_empty() {
            match channel.read(&mut buf) {
                Ok(0) => {
                    if channel.eof() {
                        debug!("Channel to {} reached EOF", destination);
                        break;
                    }
                }
                Ok(n) => {
                    to_socket.extend_from_slice(&buf[..n]);
                    progressed = true;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => {
                    debug!("Relay channel read for {} failed: {}", destination, e);
                    break;
                }
            }
        }

        if !to_socket.is_empty() {
            match socket.write(&to_socket) {
                Ok(n) => {
                    to_socket.drain(..n);
                    progressed = true;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => {
                    debug!("Relay socket write for {} failed: {}", destination, e);
                    break;
                }
            }
        }

        if !progressed {
            thread::sleep(IDLE_BACKOFF);
        }
    }

    // Non-blocking close may report EAGAIN; the carrier's teardown finishes it
    let _ = channel.close();
    let _ = socket.shutdown(Shutdown::Both);
}
