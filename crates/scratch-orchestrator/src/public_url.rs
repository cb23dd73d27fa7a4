//! Pure mapping from an allocated bind port to the URL handed to users.

use crate::port_alloc::PortRange;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlStrategy {
    /// `https://localhost:<port>`
    Localhost,
    /// `https://session<ordinal>.<domain>`, ordinal 1 at the first pool port.
    Subdomain { domain: String },
    /// `http://<host>:<port + offset>`, for a NAT that forwards with a fixed shift.
    PublicOffset { host: String, offset: u16 },
}

impl UrlStrategy {
    pub fn mode_name(&self) -> &'static str {
        match self {
            Self::Localhost => "localhost",
            Self::Subdomain { .. } => "cloudflare",
            Self::PublicOffset { .. } => "public",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublicUrls {
    strategy: UrlStrategy,
    pool: PortRange,
}

impl PublicUrls {
    pub fn new(strategy: UrlStrategy, pool: PortRange) -> Self {
        Self { strategy, pool }
    }

    pub fn strategy(&self) -> &UrlStrategy {
        &self.strategy
    }

    pub fn url_for(&self, port: u16) -> String {
        match &self.strategy {
            UrlStrategy::Localhost => format!("https://localhost:{port}"),
            UrlStrategy::Subdomain { domain } => {
                format!("https://session{}.{domain}", self.ordinal(port))
            }
            UrlStrategy::PublicOffset { host, offset } => {
                let public = u32::from(port) + u32::from(*offset);
                format!("http://{host}:{public}")
            }
        }
    }

    /// May be zero or negative for ports below the pool, which only happens
    /// for containers someone started by hand.
    fn ordinal(&self, port: u16) -> i32 {
        i32::from(port) - i32::from(self.pool.start) + 1
    }
}
