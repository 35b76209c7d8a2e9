use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tagwire_frame::FrameConfig;

use crate::error::Result;

/// Default port for listeners and clients.
pub const DEFAULT_PORT: u16 = 2500;

/// Where to listen or connect, and the frame layout to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerConfig {
    /// Bind address (listener) or remote address (client). Default: loopback.
    pub address: IpAddr,
    /// TCP port. `0` lets a listener pick a free port.
    pub port: u16,
    /// Frame layout; both ends must agree.
    pub frame: FrameConfig,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            frame: FrameConfig::default(),
        }
    }
}

impl PeerConfig {
    /// Config for `addr` with the default frame layout.
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            address: addr.ip(),
            port: addr.port(),
            frame: FrameConfig::default(),
        }
    }

    /// Override the frame layout.
    pub fn with_frame(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        self.frame.validate()?;
        Ok(())
    }
}
