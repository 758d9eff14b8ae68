// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Physical RFCOMM link to the dispenser.

use std::io;

use bluer::rfcomm::{SocketAddr, Stream};
use bluer::Address;
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tracing::info;
use uuid::Uuid;

/// Standard SPP UUID. HC-05 style serial modules always advertise it.
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

/// RFCOMM channel serial modules listen on by default.
pub const DEFAULT_RFCOMM_CHANNEL: u8 = 1;

pub type LinkReader = Box<dyn AsyncRead + Send + Unpin>;
pub type LinkWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The peer a session is connected to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    /// Bluetooth address, e.g. `98:D3:31:F5:2A:10`.
    pub address: String,
    /// Human-readable name shown to the user.
    pub name: String,
}

impl DeviceHandle {
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
        }
    }
}

/// An established physical connection whose byte streams may not be ready yet.
pub trait Link: Send {
    /// Take the read and write halves. May fail transiently right after
    /// connecting, in which case the caller retries.
    fn open_streams(&mut self) -> io::Result<(LinkReader, LinkWriter)>;
}

/// Creates physical connections. Every call builds a fresh connection
/// object; a handle that failed once is never reused.
pub trait Connector: Send + Sync {
    fn connect<'a>(&'a self, device: &'a DeviceHandle) -> BoxFuture<'a, io::Result<Box<dyn Link>>>;
}

/// A link over any duplex byte stream.
pub struct StreamLink<S> {
    stream: Option<S>,
}

impl<S> StreamLink<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: Some(stream),
        }
    }
}

impl<S> Link for StreamLink<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    fn open_streams(&mut self) -> io::Result<(LinkReader, LinkWriter)> {
        let stream = self.stream.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "streams already taken")
        })?;
        let (reader, writer): (ReadHalf<S>, WriteHalf<S>) = tokio::io::split(stream);
        Ok((Box::new(reader), Box::new(writer)))
    }
}

/// Connects to the dispenser's serial port profile over BlueZ.
pub struct RfcommConnector {
    channel: u8,
}

impl RfcommConnector {
    pub fn new(channel: u8) -> Self {
        Self { channel }
    }
}

impl Default for RfcommConnector {
    fn default() -> Self {
        Self::new(DEFAULT_RFCOMM_CHANNEL)
    }
}

impl Connector for RfcommConnector {
    fn connect<'a>(&'a self, device: &'a DeviceHandle) -> BoxFuture<'a, io::Result<Box<dyn Link>>> {
        Box::pin(async move {
            let address: Address = device.address.parse().map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("invalid Bluetooth address `{}`", device.address),
                )
            })?;

            info!(
                "Opening RFCOMM channel {} to {} (SPP {})",
                self.channel, address, SPP_UUID
            );
            let stream = Stream::connect(SocketAddr::new(address, self.channel)).await?;

            Ok(Box::new(StreamLink::new(stream)) as Box<dyn Link>)
        })
    }
}
