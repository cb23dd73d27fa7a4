//! Environment-driven settings, read once at boot.

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use anyhow::Context;

use crate::{
    port_alloc::PortRange,
    profile::Profile,
    public_url::UrlStrategy,
    session_manager::SessionConfig,
};

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_SETTLE_DELAY_MS: u64 = 2_000;
const DEFAULT_PROVISION_DELAY_MS: u64 = 5_000;
const DEFAULT_RESERVATION_TTL_MS: u64 = 30_000;
const DEFAULT_STOP_TIMEOUT_SEC: u64 = 10;
const DEFAULT_PUBLIC_PORT_OFFSET: u16 = 10_000;

#[derive(Debug, Clone)]
pub struct Settings {
    pub listen_addr: SocketAddr,
    pub static_dir: PathBuf,
    pub session: SessionConfig,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// `lookup` stands in for the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let profile = match env_string(&lookup, "SCRATCH_PROFILE") {
            Some(raw) => Profile::parse(&raw).context("SCRATCH_PROFILE")?,
            None => Profile::Persistent,
        };
        let mut session = SessionConfig::for_profile(profile);

        let start = env_parse::<u16>(&lookup, "SCRATCH_PORT_START")?
            .unwrap_or(session.pool.start);
        let end = env_parse::<u16>(&lookup, "SCRATCH_PORT_END")?.unwrap_or(session.pool.end);
        session.pool =
            PortRange::new(start, end).context("SCRATCH_PORT_START/SCRATCH_PORT_END")?;

        session.url_strategy = url_strategy(&lookup, session.pool)?;
        session.homepage = env_string(&lookup, "SCRATCH_HOMEPAGE");

        session.settle_delay =
            env_millis(&lookup, "SCRATCH_SETTLE_DELAY_MS", DEFAULT_SETTLE_DELAY_MS)?;
        session.provision_delay =
            env_millis(&lookup, "SCRATCH_PROVISION_DELAY_MS", DEFAULT_PROVISION_DELAY_MS)?;
        session.reservation_ttl =
            env_millis(&lookup, "SCRATCH_RESERVATION_TTL_MS", DEFAULT_RESERVATION_TTL_MS)?;
        session.stop_timeout = Duration::from_secs(
            env_parse::<u64>(&lookup, "SCRATCH_STOP_TIMEOUT_SEC")?
                .map(|v| v.clamp(1, 300))
                .unwrap_or(DEFAULT_STOP_TIMEOUT_SEC),
        );

        let listen_addr = match env_parse::<SocketAddr>(&lookup, "SCRATCH_LISTEN_ADDR")? {
            Some(addr) => addr,
            None => DEFAULT_LISTEN_ADDR
                .parse::<SocketAddr>()
                .context("default listen address")?,
        };
        let static_dir = env_string(&lookup, "SCRATCH_STATIC_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("public"));

        Ok(Self {
            listen_addr,
            static_dir,
            session,
        })
    }
}

fn url_strategy(
    lookup: &impl Fn(&str) -> Option<String>,
    pool: PortRange,
) -> anyhow::Result<UrlStrategy> {
    let mode = env_string(lookup, "SCRATCH_URL_MODE")
        .or_else(|| env_string(lookup, "MODE"))
        .unwrap_or_else(|| "localhost".to_string());

    match mode.to_ascii_lowercase().as_str() {
        "localhost" => Ok(UrlStrategy::Localhost),
        "cloudflare" => {
            let domain = env_string(lookup, "SCRATCH_DOMAIN")
                .or_else(|| env_string(lookup, "DOMAIN"))
                .unwrap_or_else(|| "localhost".to_string());
            Ok(UrlStrategy::Subdomain { domain })
        }
        "public" => {
            let host = env_string(lookup, "SCRATCH_PUBLIC_HOST")
                .unwrap_or_else(|| "127.0.0.1".to_string());
            let offset = env_parse::<u16>(lookup, "SCRATCH_PUBLIC_PORT_OFFSET")?
                .unwrap_or(DEFAULT_PUBLIC_PORT_OFFSET);
            if u32::from(pool.end) + u32::from(offset) > u32::from(u16::MAX) {
                anyhow::bail!(
                    "SCRATCH_PUBLIC_PORT_OFFSET {offset} pushes port {} past 65535",
                    pool.end
                );
            }
            Ok(UrlStrategy::PublicOffset { host, offset })
        }
        other => anyhow::bail!("unknown URL mode: {other} (expected localhost, cloudflare or public)"),
    }
}

/// Unset and blank are the same thing.
fn env_string(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = env_string(lookup, name) else {
        return Ok(None);
    };
    raw.parse::<T>()
        .map(Some)
        .map_err(|e| anyhow::anyhow!("invalid {name}={raw:?}: {e}"))
}

fn env_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default_ms: u64,
) -> anyhow::Result<Duration> {
    let ms = env_parse::<u64>(lookup, name)?
        .map(|v| v.min(600_000))
        .unwrap_or(default_ms);
    Ok(Duration::from_millis(ms))
}
