use std::collections::BTreeMap;

use crate::port_alloc::PortRange;
use crate::provisioning;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Selkies Firefox with a per-user volume and code-server provisioning.
    Persistent,
    /// Stateless noVNC Firefox opening the Scratch editor.
    Classic,
}

impl Profile {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "persistent" => Ok(Self::Persistent),
            "classic" => Ok(Self::Classic),
            other => anyhow::bail!("unknown profile: {other} (expected persistent or classic)"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Persistent => "persistent",
            Self::Classic => "classic",
        }
    }

    pub fn spec(self) -> SessionProfile {
        match self {
            Self::Persistent => persistent(),
            Self::Classic => classic(),
        }
    }
}

/// Everything about a session container that does not depend on who asked
/// for it or which port they got.
#[derive(Debug, Clone)]
pub struct SessionProfile {
    pub profile: Profile,
    pub image: String,
    /// Substring used to recognise session containers when listing.
    pub image_match: String,
    /// Port the in-container web service listens on.
    pub service_port: u16,
    pub env: Vec<(String, String)>,
    pub shm_size_bytes: Option<i64>,
    pub tmpfs: BTreeMap<String, String>,
    /// Mount point of the per-user volume, if the profile keeps state.
    pub volume_mount: Option<String>,
    /// Container path for the read-only homepage bind, if configured.
    pub homepage_target: Option<String>,
    pub provisioning_script: Option<&'static str>,
    pub default_pool: PortRange,
}

fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn persistent() -> SessionProfile {
    SessionProfile {
        profile: Profile::Persistent,
        image: "lscr.io/linuxserver/firefox:latest".to_string(),
        image_match: "linuxserver/firefox".to_string(),
        service_port: 3001,
        env: env(&[
            ("PUID", "1000"),
            ("PGID", "1000"),
            ("TZ", "Europe/Paris"),
            ("FIREFOX_CLI", "file:///config/homepage.html"),
            ("CUSTOM_RES", "1024x768"),
            ("DISABLE_IPV6", "true"),
            ("SELKIES_ENABLE_SHARING", "true"),
            ("SELKIES_ENABLE_COLLAB", "true"),
            ("SELKIES_ENABLE_SHARED", "true"),
            ("SELKIES_UI_SIDEBAR_SHOW_SHARING", "true"),
        ]),
        shm_size_bytes: Some(512 * 1024 * 1024),
        tmpfs: [("/tmp".to_string(), "rw,noexec,nosuid,size=256m".to_string())]
            .into_iter()
            .collect(),
        volume_mount: Some("/config".to_string()),
        homepage_target: Some("/config/homepage.html".to_string()),
        provisioning_script: Some(provisioning::CODE_SERVER_SCRIPT),
        default_pool: PortRange {
            start: 5801,
            end: 5810,
        },
    }
}

fn classic() -> SessionProfile {
    SessionProfile {
        profile: Profile::Classic,
        image: "jlesage/firefox".to_string(),
        image_match: "jlesage/firefox".to_string(),
        service_port: 5800,
        env: env(&[
            ("FF_OPEN_URL", "https://scratch.mit.edu/projects/editor"),
            ("DISPLAY_WIDTH", "1280"),
            ("DISPLAY_HEIGHT", "800"),
            ("WEB_AUDIO", "1"),
        ]),
        shm_size_bytes: None,
        tmpfs: BTreeMap::new(),
        volume_mount: None,
        homepage_target: None,
        provisioning_script: None,
        default_pool: PortRange {
            start: 5801,
            end: 5900,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(Profile::parse(" Classic ").unwrap(), Profile::Classic);
        assert_eq!(Profile::parse("persistent").unwrap(), Profile::Persistent);
        assert!(Profile::parse("cloud").is_err());
    }

    #[test]
    fn persistent_keeps_state_and_provisions() {
        let p = Profile::Persistent.spec();
        assert_eq!(p.service_port, 3001);
        assert_eq!(p.volume_mount.as_deref(), Some("/config"));
        assert!(p.provisioning_script.is_some());
        assert_eq!(p.default_pool.len(), 10);
        assert!(p.image.contains(&p.image_match));
    }

    #[test]
    fn classic_is_stateless() {
        let p = Profile::Classic.spec();
        assert_eq!(p.service_port, 5800);
        assert!(p.volume_mount.is_none());
        assert!(p.provisioning_script.is_none());
        assert_eq!(p.default_pool.len(), 100);
        assert!(p.image.contains(&p.image_match));
    }
}
