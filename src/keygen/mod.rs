// Copyright 2025 Lablup Inc. and Jeongkyu Shin
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

//! Host identity: Ed25519 host keys in OpenSSH format.
//!
//! # Example
//!
//! ```no_run
//! use sshlist::keygen::load_or_generate;
//! use std::path::Path;
//!
//! // First start creates the key, later starts load it.
//! let key = load_or_generate(Path::new(".ssh_keys/server")).unwrap();
//! ```

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use russh::keys::ssh_key::rand_core::OsRng;
use russh::keys::ssh_key::LineEnding;
use russh::keys::{Algorithm, HashAlg, PrivateKey};

/// Result of key generation containing the key material and metadata
#[derive(Debug, Clone)]
pub struct GeneratedKey {
    /// Private key in OpenSSH PEM format
    pub private_key_pem: String,
    /// Public key in OpenSSH format (type base64 comment)
    pub public_key_openssh: String,
    /// SHA256 fingerprint of the public key
    pub fingerprint: String,
}

/// Load the host key at `path`, generating and storing a new Ed25519 key
/// if the file does not exist yet.
pub fn load_or_generate(path: &Path) -> Result<PrivateKey> {
    if path.exists() {
        tracing::debug!(path = %path.display(), "Loading host key");
        return PrivateKey::read_openssh_file(path)
            .with_context(|| format!("Failed to load host key from {}", path.display()));
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create key directory {}", parent.display()))?;
    }
    tracing::info!(path = %path.display(), "Host key not found, generating a new one");
    generate(path, Some("sshlist"))?;

    PrivateKey::read_openssh_file(path)
        .with_context(|| format!("Failed to load host key from {}", path.display()))
}

/// Generate an Ed25519 key pair and write it to `output_path` and
/// `output_path.pub`.
///
/// # Arguments
///
/// * `output_path` - Path where the private key will be written
/// * `comment` - Optional comment for the public key (defaults to "sshlist")
pub fn generate(output_path: &Path, comment: Option<&str>) -> Result<GeneratedKey> {
    let keypair =
        PrivateKey::random(&mut OsRng, Algorithm::Ed25519).context("Failed to generate Ed25519 key")?;

    let public_key = keypair.public_key();
    let fingerprint = public_key.fingerprint(HashAlg::Sha256).to_string();

    let private_key_pem = keypair
        .to_openssh(LineEnding::LF)
        .context("Failed to encode private key to OpenSSH format")?;

    let public_key_base64 = public_key
        .to_openssh()
        .context("Failed to encode public key to OpenSSH format")?;
    let public_key_openssh = format!("{} {}", public_key_base64, comment.unwrap_or("sshlist"));

    write_private_key(output_path, &private_key_pem)?;

    let pub_path = format!("{}.pub", output_path.display());
    std::fs::write(&pub_path, format!("{public_key_openssh}\n"))
        .with_context(|| format!("Failed to write public key to {pub_path}"))?;

    tracing::info!(
        path = %output_path.display(),
        fingerprint = %fingerprint,
        "Generated Ed25519 host key"
    );

    Ok(GeneratedKey {
        private_key_pem: private_key_pem.to_string(),
        public_key_openssh,
        fingerprint,
    })
}

/// Write private key file with secure permissions (0600 on Unix)
fn write_private_key(path: &Path, content: &str) -> Result<()> {
    #[cfg(unix)]
    {
        use std::fs::OpenOptions;
        use std::os::unix::fs::OpenOptionsExt;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .with_context(|| format!("Failed to create private key file: {}", path.display()))?;

        file.write_all(content.as_bytes())
            .with_context(|| format!("Failed to write private key: {}", path.display()))?;
    }

    #[cfg(not(unix))]
    {
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write private key: {}", path.display()))?;
    }

    Ok(())
}
