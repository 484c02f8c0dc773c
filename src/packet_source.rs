// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Datagram transport for the laser and odometry streams.
//!
//! Both streams arrive as fixed-size UDP datagrams. A [`PacketSource`]
//! yields them one at a time: [`UdpSource`] for the live robot link,
//! [`ReplaySource`] for recorded or generated traffic that eventually runs
//! out. [`pump`] feeds a source into a per-datagram handler and is the body
//! of both transport loops.
//!
//! ```ignore
//! use edgefirst_scanmap::packet_source::{ReplaySource, pump};
//!
//! let mut source: ReplaySource = packets.iter().map(|p| p.to_bytes()).collect();
//! let handled = pump(&mut source, &run, |data| {
//!     ingest.process_datagram(data)?;
//!     Ok(())
//! })
//! .await?;
//! ```

use crate::lidar::Error;
use std::{
    future::Future,
    net::SocketAddr,
    pin::Pin,
    sync::atomic::{AtomicBool, Ordering},
};

/// Receive buffer size of the transport loops, larger than any datagram
/// this crate accepts so oversized packets fail the size check instead of
/// being truncated to a valid length.
pub const RECV_BUFFER_SIZE: usize = 2048;

pub trait PacketSource: Send {
    /// Receive the next datagram into `buf`.
    ///
    /// # Returns
    /// - `Ok(Some(len))` - Number of bytes received
    /// - `Ok(None)` - A finite source is exhausted
    /// - `Err` - Socket error
    fn recv<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = Result<Option<usize>, Error>> + Send + 'a>>;
}

/// Live robot link, never exhausted.
pub struct UdpSource {
    socket: tokio::net::UdpSocket,
}

impl UdpSource {
    pub async fn bind(addr: SocketAddr) -> Result<Self, Error> {
        let socket = tokio::net::UdpSocket::bind(addr).await?;
        Ok(Self { socket })
    }

    /// Bound address, with the actual port when bound to port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.socket.local_addr()?)
    }
}

impl PacketSource for UdpSource {
    fn recv<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = Result<Option<usize>, Error>> + Send + 'a>> {
        Box::pin(async move { Ok(Some(self.socket.recv(buf).await?)) })
    }
}

/// Datagrams replayed in order from memory.
#[derive(Clone, Debug, Default)]
pub struct ReplaySource {
    datagrams: std::vec::IntoIter<Vec<u8>>,
}

impl ReplaySource {
    pub fn new(datagrams: Vec<Vec<u8>>) -> Self {
        Self {
            datagrams: datagrams.into_iter(),
        }
    }

    /// Datagrams not yet received.
    pub fn remaining(&self) -> usize {
        self.datagrams.len()
    }
}

impl FromIterator<Vec<u8>> for ReplaySource {
    fn from_iter<I: IntoIterator<Item = Vec<u8>>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl PacketSource for ReplaySource {
    fn recv<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = Result<Option<usize>, Error>> + Send + 'a>> {
        Box::pin(async move {
            Ok(self.datagrams.next().map(|datagram| {
                let len = datagram.len().min(buf.len());
                buf[..len].copy_from_slice(&datagram[..len]);
                len
            }))
        })
    }
}

/// Hand every datagram of `source` to `handle` until the source is
/// exhausted or `run` is cleared, returning how many were handled.
///
/// `run` is checked between datagrams, so a live source only notices it
/// once the next datagram arrives. A handler error ends the loop and is
/// returned as is.
pub async fn pump<S, F>(source: &mut S, run: &AtomicBool, mut handle: F) -> Result<u64, Error>
where
    S: PacketSource,
    F: FnMut(&[u8]) -> Result<(), Error>,
{
    let mut buf = [0u8; RECV_BUFFER_SIZE];
    let mut handled = 0;
    while run.load(Ordering::Relaxed) {
        let Some(len) = source.recv(&mut buf).await? else {
            break;
        };
        handle(&buf[..len])?;
        handled += 1;
    }
    Ok(handled)
}
