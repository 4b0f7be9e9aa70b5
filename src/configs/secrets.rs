use std::{collections::HashMap, path::PathBuf, time::SystemTime};

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, warn};

/// Contents of `secrets.toml`.
///
/// PoW secrets are reverse-engineered material that rotates without notice,
/// and the origin-side timestamp window has shifted before. None of it is
/// compiled in; the file is re-read whenever its mtime changes so operators
/// can follow a rotation without a restart.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecretsFile {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub pow: PowSecrets,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PowSecrets {
    /// Per-provider HMAC secrets, keyed by provider id.
    #[serde(default)]
    pub secrets: HashMap<String, String>,
    #[serde(default = "default_threshold")]
    pub threshold: u64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Candidate timestamp skews (seconds in the past) probed in order when
    /// the origin rejects a key fetch. Empirically inferred, not documented.
    #[serde(default = "default_skew_candidates")]
    pub skew_candidates_secs: Vec<i64>,
}

fn default_threshold() -> u64 {
    // First 8 digest bytes as a big-endian integer; this bound makes the
    // search succeed in ~256 expected iterations.
    u64::MAX / 256
}

fn default_max_iterations() -> u32 {
    100_000
}

fn default_skew_candidates() -> Vec<i64> {
    vec![12, 30, 60]
}

impl Default for PowSecrets {
    fn default() -> Self {
        Self {
            secrets: HashMap::new(),
            threshold: default_threshold(),
            max_iterations: default_max_iterations(),
            skew_candidates_secs: default_skew_candidates(),
        }
    }
}

struct Loaded {
    file: SecretsFile,
    mtime: Option<SystemTime>,
}

/// Hot-reloadable view over `secrets.toml`.
pub struct SecretStore {
    path: PathBuf,
    state: RwLock<Loaded>,
}

impl SecretStore {
    /// Open the store. A missing or unparsable file is not fatal: built-in
    /// operational defaults apply and no provider secrets are available
    /// until the file shows up.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let loaded = match Self::read(&path) {
            Some((file, mtime)) => Loaded {
                file,
                mtime: Some(mtime),
            },
            None => {
                warn!(
                    "secrets file {} not readable; PoW-gated providers will fail auth until it exists",
                    path.display()
                );
                Loaded {
                    file: SecretsFile::default(),
                    mtime: None,
                }
            }
        };
        Self {
            path,
            state: RwLock::new(loaded),
        }
    }

    fn read(path: &PathBuf) -> Option<(SecretsFile, SystemTime)> {
        let meta = std::fs::metadata(path).ok()?;
        let mtime = meta.modified().ok()?;
        let text = std::fs::read_to_string(path).ok()?;
        match toml::from_str::<SecretsFile>(&text) {
            Ok(file) => Some((file, mtime)),
            Err(e) => {
                warn!("failed to parse {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Current contents, reloading first if the file changed on disk.
    pub fn snapshot(&self) -> SecretsFile {
        let disk_mtime = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok();

        {
            let state = self.state.read();
            if disk_mtime == state.mtime {
                return state.file.clone();
            }
        }

        let mut state = self.state.write();
        // Another task may have reloaded while we waited for the lock.
        if disk_mtime != state.mtime {
            if let Some((file, mtime)) = Self::read(&self.path) {
                debug!("reloaded secrets from {} (version {})", self.path.display(), file.version);
                state.file = file;
                state.mtime = Some(mtime);
            }
        }
        state.file.clone()
    }

    pub fn pow(&self) -> PowSecrets {
        self.snapshot().pow
    }

    pub fn pow_secret(&self, provider: &str) -> Option<String> {
        self.snapshot().pow.secrets.get(provider).cloned()
    }
}
