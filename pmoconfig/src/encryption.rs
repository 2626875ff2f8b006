//! Machine-bound encryption of stored credentials
//!
//! Passwords written to `config.yaml` are stored as `encrypted:BASE64`, where
//! the payload is `nonce (12 bytes) || AES-256-GCM ciphertext`. The key is a
//! SHA-256 digest of a machine identifier, so a copied configuration file
//! cannot be decrypted on another host.
//!
//! The nonce is derived from the plaintext: encrypting the same password
//! twice yields the same value and leaves the file untouched.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use sha2::{Digest, Sha256};

/// Prefix identifying encrypted values
const ENCRYPTED_PREFIX: &str = "encrypted:";

const KEY_SALT: &[u8] = b"pmosxm-credentials-v1";
const NONCE_SALT: &[u8] = b"pmosxm-nonce-v1";
const NONCE_LEN: usize = 12;

/// Stable identifier of the current machine
///
/// Linux: `/etc/machine-id` or `/var/lib/dbus/machine-id`.
/// macOS: `IOPlatformUUID` from `ioreg`.
/// Windows: `wmic csproduct get UUID`.
/// Elsewhere, or if those sources are missing (containers), the host name
/// and home directory are used instead.
fn machine_id() -> String {
    platform_machine_id()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(fallback_machine_id)
}

#[cfg(target_os = "linux")]
fn platform_machine_id() -> Option<String> {
    ["/etc/machine-id", "/var/lib/dbus/machine-id"]
        .iter()
        .find_map(|path| std::fs::read_to_string(path).ok())
        .map(|id| id.trim().to_string())
}

#[cfg(target_os = "macos")]
fn platform_machine_id() -> Option<String> {
    let output = std::process::Command::new("ioreg")
        .args(["-d2", "-c", "IOPlatformExpertDevice"])
        .output()
        .ok()?;

    // "IOPlatformUUID" = "XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX"
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .find(|line| line.contains("IOPlatformUUID"))
        .and_then(|line| line.split('"').nth(3))
        .map(str::to_string)
}

#[cfg(target_os = "windows")]
fn platform_machine_id() -> Option<String> {
    let output = std::process::Command::new("wmic")
        .args(["csproduct", "get", "UUID"])
        .output()
        .ok()?;

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .nth(1)
        .map(|line| line.trim().to_string())
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn platform_machine_id() -> Option<String> {
    None
}

fn fallback_machine_id() -> String {
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_default();
    let home = dirs::home_dir()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();
    format!("{}:{}", host, home)
}

fn cipher() -> Result<Aes256Gcm> {
    let mut hasher = Sha256::new();
    hasher.update(machine_id().as_bytes());
    hasher.update(KEY_SALT);
    let key = hasher.finalize();

    Aes256Gcm::new_from_slice(&key).map_err(|e| anyhow!("Failed to create cipher: {}", e))
}

fn nonce_for(password: &str) -> [u8; NONCE_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(NONCE_SALT);
    let digest = hasher.finalize();

    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&digest[..NONCE_LEN]);
    nonce
}

/// Encrypt a password into the `encrypted:BASE64` form
pub fn encrypt_password(password: &str) -> Result<String> {
    let nonce = nonce_for(password);
    let ciphertext = cipher()?
        .encrypt(Nonce::from_slice(&nonce), password.as_bytes())
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    payload.extend_from_slice(&nonce);
    payload.extend_from_slice(&ciphertext);

    Ok(format!("{}{}", ENCRYPTED_PREFIX, STANDARD.encode(payload)))
}

/// Decrypt a value produced by [`encrypt_password`]
///
/// # Errors
///
/// Fails on a missing prefix, invalid base64, or a value encrypted on
/// another machine.
pub fn decrypt_password(encrypted: &str) -> Result<String> {
    let encoded = encrypted
        .strip_prefix(ENCRYPTED_PREFIX)
        .ok_or_else(|| anyhow!("Invalid encrypted password format (missing prefix)"))?;

    let payload = STANDARD
        .decode(encoded)
        .map_err(|e| anyhow!("Invalid base64: {}", e))?;
    if payload.len() < NONCE_LEN {
        return Err(anyhow!("Invalid ciphertext (too short)"));
    }
    let (nonce, ciphertext) = payload.split_at(NONCE_LEN);

    let plaintext = cipher()?
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| anyhow!("Decryption failed (wrong machine or corrupted data): {}", e))?;

    String::from_utf8(plaintext).map_err(|e| anyhow!("Invalid UTF-8: {}", e))
}

pub fn is_encrypted(value: &str) -> bool {
    value.starts_with(ENCRYPTED_PREFIX)
}

/// Plain-text password from a stored value, encrypted or not
pub fn get_password(value: &str) -> Result<String> {
    if is_encrypted(value) {
        decrypt_password(value)
    } else {
        Ok(value.to_string())
    }
}
