use std::{
    collections::HashMap,
    io::ErrorKind,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

/// Closed range `[start, end]` of host ports reserved for session binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> anyhow::Result<Self> {
        if start == 0 {
            anyhow::bail!("port range must not start at 0");
        }
        if start > end {
            anyhow::bail!("invalid port range: {start} > {end}");
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }

    /// Hard cap on concurrent sessions.
    pub fn len(&self) -> usize {
        usize::from(self.end - self.start) + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no free port in {start}..={end}")]
pub struct PoolExhausted {
    pub start: u16,
    pub end: u16,
}

/// Asks the operating environment whether a port is bindable right now.
#[async_trait::async_trait]
pub trait PortProbe: Send + Sync {
    async fn is_free(&self, port: u16) -> bool;
}

/// Bind-and-release on `0.0.0.0:<port>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpPortProbe;

#[async_trait::async_trait]
impl PortProbe for TcpPortProbe {
    async fn is_free(&self, port: u16) -> bool {
        match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => {
                drop(listener);
                true
            }
            Err(e) if e.kind() == ErrorKind::AddrInUse => false,
            Err(e) => {
                tracing::debug!(port, error = %e, "port probe failed; treating as busy");
                false
            }
        }
    }
}

/// A port handed out by [`PortAllocator::allocate`]. Only the holder of the
/// token can drop the reservation early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub port: u16,
    pub token: String,
}

#[derive(Debug)]
struct Held {
    token: String,
    at: Instant,
}

/// Sequential first-fit allocator over a [`PortRange`].
///
/// Availability is re-derived from the OS on every call. A short-lived
/// in-process reservation sits in front of the probe so two concurrent
/// creates never get the same candidate; the reservation is dropped on
/// failure, on destroy, or when its TTL lapses (by then the runtime holds
/// the bind and the probe reports it busy).
#[derive(Clone)]
pub struct PortAllocator {
    range: PortRange,
    probe: Arc<dyn PortProbe>,
    reservations: Arc<Mutex<HashMap<u16, Held>>>,
    ttl: Duration,
}

impl std::fmt::Debug for PortAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortAllocator")
            .field("range", &self.range)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl PortAllocator {
    pub fn new(range: PortRange, probe: Arc<dyn PortProbe>, ttl: Duration) -> Self {
        Self {
            range,
            probe,
            reservations: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    pub async fn allocate(&self) -> Result<Reservation, PoolExhausted> {
        let mut next = Some(self.range.start);
        while let Some(from) = next {
            let Some(reservation) = self.reserve_first_unreserved(from) else {
                break;
            };
            let port = reservation.port;
            if self.probe.is_free(port).await {
                tracing::debug!(port, "port allocated");
                return Ok(reservation);
            }
            self.release(&reservation);
            next = if port >= self.range.end {
                None
            } else {
                Some(port + 1)
            };
        }

        Err(PoolExhausted {
            start: self.range.start,
            end: self.range.end,
        })
    }

    /// Drops the reservation if it is still the one on its port. Returns
    /// whether anything was removed.
    pub fn release(&self, reservation: &Reservation) -> bool {
        self.release_if(reservation.port, &reservation.token)
    }

    /// Like [`release`](Self::release) for a token read back from the runtime.
    /// A reservation that expired and was handed to someone else is left alone.
    pub fn release_if(&self, port: u16, token: &str) -> bool {
        let mut reservations = self.lock();
        if reservations.get(&port).is_some_and(|h| h.token == token) {
            reservations.remove(&port);
            return true;
        }
        false
    }

    pub fn is_reserved(&self, port: u16) -> bool {
        let now = Instant::now();
        self.lock()
            .get(&port)
            .is_some_and(|h| now.duration_since(h.at) < self.ttl)
    }

    fn reserve_first_unreserved(&self, from: u16) -> Option<Reservation> {
        let now = Instant::now();
        let mut reservations = self.lock();
        reservations.retain(|_, h| now.duration_since(h.at) < self.ttl);

        let port = (from..=self.range.end).find(|p| !reservations.contains_key(p))?;
        let token = uuid::Uuid::new_v4().to_string();
        reservations.insert(
            port,
            Held {
                token: token.clone(),
                at: now,
            },
        );
        Some(Reservation { port, token })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u16, Held>> {
        // The map is always left consistent, so a poisoned lock is still usable.
        self.reservations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
