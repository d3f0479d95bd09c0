//! Known hosts management for SSH host key verification
//!
//! Reads and appends OpenSSH `known_hosts` files. Entries are keyed by
//! `host` for port 22 and `[host]:port` otherwise, matching OpenSSH.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use parking_lot::RwLock;
use russh::keys::{PublicKey, PublicKeyBase64};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::error::SshError;

/// Result of host key verification
#[derive(Debug, Clone, PartialEq)]
pub enum HostKeyVerification {
    /// Key matches known_hosts entry
    Verified,
    /// Host not in known_hosts (first connection)
    Unknown { fingerprint: String },
    /// Key changed from known_hosts entry (potential MITM)
    Changed {
        expected_fingerprint: String,
        actual_fingerprint: String,
    },
}

/// Entry in known_hosts: (key_type, base64_key)
#[derive(Clone, Debug)]
struct HostKeyEntry {
    key_type: String,
    key_data: String,
}

/// A known_hosts file and its parsed entries
pub struct KnownHostsStore {
    hosts: RwLock<HashMap<String, Vec<HostKeyEntry>>>,
    path: PathBuf,
}

impl KnownHostsStore {
    /// Path of the user's default known_hosts file
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .map(|h| h.join(".ssh").join("known_hosts"))
            .unwrap_or_else(|| PathBuf::from("~/.ssh/known_hosts"))
    }

    /// Load the store from `path`. A missing file yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SshError> {
        let store = Self {
            hosts: RwLock::new(HashMap::new()),
            path: path.into(),
        };
        store.load()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<(), SshError> {
        if !self.path.exists() {
            debug!("Known hosts file {:?} not found, starting empty", self.path);
            return Ok(());
        }

        let file = fs::File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut hosts = self.hosts.write();
        let mut entry_count = 0;

        for line in reader.lines() {
            let line = line?;
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            // hostname[,alias] keytype base64key [comment]
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 3 {
                continue;
            }

            let entry = HostKeyEntry {
                key_type: parts[1].to_string(),
                key_data: parts[2].to_string(),
            };

            for hostname in parts[0].split(',') {
                // Hashed hostnames (|1|...) cannot be matched without the salt
                if hostname.starts_with('|') {
                    continue;
                }
                hosts
                    .entry(hostname.to_lowercase())
                    .or_default()
                    .push(entry.clone());
                entry_count += 1;
            }
        }

        info!(
            "Loaded {} known host entries ({} unique hosts) from {:?}",
            entry_count,
            hosts.len(),
            self.path
        );
        Ok(())
    }

    /// Create lookup key for host:port
    fn make_key(host: &str, port: u16) -> String {
        let host = host.to_lowercase();
        if port == 22 {
            host
        } else {
            format!("[{}]:{}", host, port)
        }
    }

    /// Compute SHA256 fingerprint of public key
    pub fn fingerprint(key: &PublicKey) -> String {
        Self::fingerprint_bytes(&key.public_key_bytes())
    }

    fn fingerprint_bytes(bytes: &[u8]) -> String {
        let hash = Sha256::digest(bytes);
        format!("SHA256:{}", BASE64.encode(hash).trim_end_matches('='))
    }

    /// Verify a host's public key
    pub fn verify(&self, host: &str, port: u16, key: &PublicKey) -> HostKeyVerification {
        let lookup_key = Self::make_key(host, port);
        let actual_key_b64 = BASE64.encode(key.public_key_bytes());
        let actual_key_type = key.algorithm().as_str().to_string();
        let fingerprint = Self::fingerprint(key);

        let hosts = self.hosts.read();
        let Some(entries) = hosts.get(&lookup_key) else {
            debug!("Unknown host: {}", lookup_key);
            return HostKeyVerification::Unknown { fingerprint };
        };

        for entry in entries.iter().filter(|e| e.key_type == actual_key_type) {
            if entry.key_data == actual_key_b64 {
                debug!(
                    "Host key verified for {} (type: {})",
                    lookup_key, actual_key_type
                );
                return HostKeyVerification::Verified;
            }

            let expected_fingerprint = BASE64
                .decode(&entry.key_data)
                .map(|bytes| Self::fingerprint_bytes(&bytes))
                .unwrap_or_else(|_| "unknown".to_string());
            warn!(
                "HOST KEY CHANGED for {} (type: {})! Expected {}, got {}",
                lookup_key, actual_key_type, expected_fingerprint, fingerprint
            );
            return HostKeyVerification::Changed {
                expected_fingerprint,
                actual_fingerprint: fingerprint,
            };
        }

        // Host known, but not for this key type
        debug!(
            "Host {} known but no {} key stored, treating as new",
            lookup_key, actual_key_type
        );
        HostKeyVerification::Unknown { fingerprint }
    }

    /// Add a new host key, in memory and on disk
    pub fn add_host(&self, host: &str, port: u16, key: &PublicKey) -> Result<(), SshError> {
        let lookup_key = Self::make_key(host, port);
        let key_b64 = BASE64.encode(key.public_key_bytes());
        let key_type = key.algorithm().as_str().to_string();

        self.append_to_file(&lookup_key, &key_type, &key_b64)?;

        self.hosts
            .write()
            .entry(lookup_key.clone())
            .or_default()
            .push(HostKeyEntry {
                key_type: key_type.clone(),
                key_data: key_b64,
            });

        info!(
            "Added host key for {} (type: {}) to {:?}",
            lookup_key, key_type, self.path
        );
        Ok(())
    }

    fn append_to_file(&self, host: &str, key_type: &str, key_b64: &str) -> Result<(), SshError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        writeln!(file, "{} {} {}", host, key_type, key_b64)?;
        Ok(())
    }

    #[cfg(test)]
    fn entry_count(&self, host: &str, port: u16) -> usize {
        self.hosts
            .read()
            .get(&Self::make_key(host, port))
            .map(Vec::len)
            .unwrap_or(0)
    }
}
