//! Stable device login for devices whose settings carry none.

use std::path::PathBuf;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use uuid::{Builder, Uuid};

/// Value the settings form ships with before a device ever signed up.
pub const NIL_LOGIN: &str = "00000000-0000-0000-0000-000000000000";
const NIL_MAC: &str = "00:00:00:00:00:00";

/// True when `login` must be replaced before a signup.
pub fn is_placeholder_login(login: &str) -> bool {
    let login = login.trim();
    login.is_empty() || login == NIL_LOGIN || login == NIL_MAC
}

#[async_trait]
pub trait DeviceIdentity: Send + Sync {
    async fn device_id(&self) -> String;
}

/// Derives a UUID-shaped login from the first hardware address and the CPU
/// count, so the same device gets the same login after a settings reset.
#[derive(Debug, Clone)]
pub struct HardwareIdentity {
    net_dir: PathBuf,
    cpuinfo: PathBuf,
}

impl HardwareIdentity {
    pub fn new() -> Self {
        Self::with_paths("/sys/class/net", "/proc/cpuinfo")
    }

    pub fn with_paths(net_dir: impl Into<PathBuf>, cpuinfo: impl Into<PathBuf>) -> Self {
        Self {
            net_dir: net_dir.into(),
            cpuinfo: cpuinfo.into(),
        }
    }

    async fn mac_address(&self) -> Option<String> {
        let mut dir = tokio::fs::read_dir(&self.net_dir).await.ok()?;
        let mut names = Vec::new();
        while let Ok(Some(entry)) = dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name != "lo" {
                names.push(name);
            }
        }
        names.sort();

        for name in names {
            let path = self.net_dir.join(&name).join("address");
            let Ok(raw) = tokio::fs::read_to_string(&path).await else {
                continue;
            };
            let mac = raw.trim().to_ascii_lowercase();
            if !mac.is_empty() && mac != NIL_MAC {
                return Some(mac);
            }
        }
        None
    }

    async fn cpu_count(&self) -> usize {
        tokio::fs::read_to_string(&self.cpuinfo)
            .await
            .map(|raw| {
                raw.lines()
                    .filter(|line| line.starts_with("processor"))
                    .count()
            })
            .unwrap_or(0)
    }
}

impl Default for HardwareIdentity {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceIdentity for HardwareIdentity {
    async fn device_id(&self) -> String {
        let Some(mac) = self.mac_address().await else {
            tracing::warn!(
                target: "ispapp::session",
                path = %self.net_dir.display(),
                "no hardware address found; using a random device login"
            );
            return Uuid::new_v4().hyphenated().to_string();
        };
        let fingerprint = format!("{mac}{}", self.cpu_count().await);
        fingerprint_uuid(&fingerprint)
    }
}

fn fingerprint_uuid(fingerprint: &str) -> String {
    let digest = Sha256::digest(fingerprint.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Builder::from_random_bytes(bytes)
        .into_uuid()
        .hyphenated()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn fake_host(root: &Path, macs: &[(&str, &str)], cpus: usize) -> HardwareIdentity {
        let net = root.join("net");
        for (name, mac) in macs {
            std::fs::create_dir_all(net.join(name)).unwrap();
            std::fs::write(net.join(name).join("address"), format!("{mac}\n")).unwrap();
        }
        std::fs::create_dir_all(&net).unwrap();
        let cpuinfo = root.join("cpuinfo");
        let body: String = (0..cpus)
            .map(|n| format!("processor\t: {n}\nBogoMIPS\t: 48.00\n\n"))
            .collect();
        std::fs::write(&cpuinfo, body).unwrap();
        HardwareIdentity::with_paths(net, cpuinfo)
    }

    #[test]
    fn placeholder_logins() {
        assert!(is_placeholder_login(""));
        assert!(is_placeholder_login("  "));
        assert!(is_placeholder_login(NIL_LOGIN));
        assert!(is_placeholder_login("00:00:00:00:00:00"));
        assert!(!is_placeholder_login("00:11:22:33:44:55"));
    }

    #[tokio::test]
    async fn same_hardware_gives_same_login() {
        let dir = tempfile::tempdir().unwrap();
        let identity = fake_host(
            dir.path(),
            &[("lo", "00:00:00:00:00:00"), ("eth0", "AA:BB:CC:DD:EE:FF")],
            2,
        );

        let first = identity.device_id().await;
        assert_eq!(first, identity.device_id().await);
        assert_eq!(first, fingerprint_uuid("aa:bb:cc:dd:ee:ff2"));

        let parsed = Uuid::parse_str(&first).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
        assert!(!is_placeholder_login(&first));
    }

    #[tokio::test]
    async fn different_hardware_gives_different_login() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let first = fake_host(a.path(), &[("eth0", "aa:bb:cc:dd:ee:ff")], 2);
        let second = fake_host(b.path(), &[("eth0", "aa:bb:cc:dd:ee:00")], 2);
        assert_ne!(first.device_id().await, second.device_id().await);
    }

    #[tokio::test]
    async fn missing_hardware_address_falls_back_to_random() {
        let dir = tempfile::tempdir().unwrap();
        let identity = fake_host(dir.path(), &[("eth0", "00:00:00:00:00:00")], 1);
        let login = identity.device_id().await;
        assert!(Uuid::parse_str(&login).is_ok());
        assert_ne!(login, identity.device_id().await);
    }
}
