//! Node key persistence.
//!
//! The room's identity is its Ed25519 key. The seed lives in a small hex
//! file so the identity survives restarts; peers pin it when dialing.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use room_proto::Keypair;

/// Default key location under the user's home directory.
fn default_key_path() -> Result<PathBuf> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE")) // Windows fallback
        .context("Cannot determine home directory")?;

    Ok(Path::new(&home).join(".roomd").join("identity.key"))
}

/// Loads the node keypair, generating and persisting one on first run.
///
/// The file holds the 32-byte seed as a single hex line.
pub fn load_or_generate(path: Option<&Path>) -> Result<Keypair> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => default_key_path()?,
    };

    if path.exists() {
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read key file {}", path.display()))?;
        let bytes = hex::decode(contents.trim())
            .with_context(|| format!("Key file {} is not valid hex", path.display()))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("Key file {} must hold a 32-byte seed", path.display()))?;

        let keypair = Keypair::from_secret_bytes(&seed);
        debug!(identity = %keypair.identity(), "loaded node key from {}", path.display());
        return Ok(keypair);
    }

    let keypair = Keypair::generate();

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    fs::write(&path, hex::encode(keypair.secret_bytes()))
        .with_context(|| format!("Failed to write key file {}", path.display()))?;

    info!(identity = %keypair.identity(), "generated node key at {}", path.display());
    Ok(keypair)
}
