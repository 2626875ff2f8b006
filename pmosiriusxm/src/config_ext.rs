//! SiriusXM settings stored in pmoconfig
//!
//! All keys live under `sources.siriusxm`:
//!
//! ```yaml
//! sources:
//!   siriusxm:
//!     username: user@example.com
//!     password: encrypted:...
//!     region: US
//!     quality: LARGE
//!     precache: true
//!     segment_cache_capacity: 10
//! ```
//!
//! Getters persist the default value when a key is missing, so the file
//! always documents the effective settings.
//!
//! # Example
//!
//! ```no_run
//! use pmoconfig::get_config;
//! use pmosiriusxm::SiriusXmConfigExt;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = get_config();
//! if let (Some(user), Some(_)) = (config.get_siriusxm_username()?, config.get_siriusxm_password()?) {
//!     println!("Logging in as {}", user);
//! }
//! # Ok(())
//! # }
//! ```

use crate::models::{Quality, Region};
use crate::proxy::ProxySettings;
use crate::segment_cache::DEFAULT_SEGMENT_CACHE_CAPACITY;
use anyhow::{anyhow, Result};
use pmoconfig::encryption;
use pmoconfig::Config;
use serde_yaml::{Number, Value};
use tracing::warn;

const SECTION: [&str; 2] = ["sources", "siriusxm"];

fn key(name: &str) -> [&str; 3] {
    [SECTION[0], SECTION[1], name]
}

/// Extension trait managing the SiriusXM settings in pmoconfig
pub trait SiriusXmConfigExt {
    /// Stored account name, if any
    fn get_siriusxm_username(&self) -> Result<Option<String>>;
    fn set_siriusxm_username(&self, username: &str) -> Result<()>;

    /// Stored password in clear text, if any
    ///
    /// Encrypted values are decrypted; a legacy plain-text value is returned
    /// as is.
    fn get_siriusxm_password(&self) -> Result<Option<String>>;

    /// Stores the password encrypted with the machine key
    fn set_siriusxm_password(&self, password: &str) -> Result<()>;

    fn get_siriusxm_region(&self) -> Result<Region>;
    fn set_siriusxm_region(&self, region: Region) -> Result<()>;

    fn get_siriusxm_quality(&self) -> Result<Quality>;
    fn set_siriusxm_quality(&self, quality: Quality) -> Result<()>;

    /// Whether a refresh loop pre-fetches segments for the active channel
    fn get_siriusxm_precache(&self) -> Result<bool>;
    fn set_siriusxm_precache(&self, enabled: bool) -> Result<()>;

    fn get_siriusxm_segment_cache_capacity(&self) -> Result<usize>;
    fn set_siriusxm_segment_cache_capacity(&self, capacity: usize) -> Result<()>;

    /// Proxy settings built from the stored values, timings left at defaults
    fn get_siriusxm_proxy_settings(&self) -> Result<ProxySettings>;
}

fn non_empty_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

impl SiriusXmConfigExt for Config {
    fn get_siriusxm_username(&self) -> Result<Option<String>> {
        Ok(self.get_value(&key("username")).ok().and_then(non_empty_string))
    }

    fn set_siriusxm_username(&self, username: &str) -> Result<()> {
        self.set_value(&key("username"), Value::String(username.to_string()))
    }

    fn get_siriusxm_password(&self) -> Result<Option<String>> {
        match self.get_value(&key("password")).ok().and_then(non_empty_string) {
            Some(stored) => encryption::get_password(&stored)
                .map(Some)
                .map_err(|e| anyhow!("Cannot read the stored SiriusXM password: {}", e)),
            None => Ok(None),
        }
    }

    fn set_siriusxm_password(&self, password: &str) -> Result<()> {
        let encrypted = encryption::encrypt_password(password)?;
        self.set_value(&key("password"), Value::String(encrypted))
    }

    fn get_siriusxm_region(&self) -> Result<Region> {
        match self.get_value(&key("region")).ok().and_then(non_empty_string) {
            Some(s) => match s.parse::<Region>() {
                Ok(region) => Ok(region),
                Err(e) => {
                    warn!("{}, using {}", e, Region::default());
                    Ok(Region::default())
                }
            },
            None => {
                self.set_siriusxm_region(Region::default())?;
                Ok(Region::default())
            }
        }
    }

    fn set_siriusxm_region(&self, region: Region) -> Result<()> {
        self.set_value(&key("region"), Value::String(region.as_str().to_string()))
    }

    fn get_siriusxm_quality(&self) -> Result<Quality> {
        match self.get_value(&key("quality")).ok().and_then(non_empty_string) {
            Some(s) => match s.parse::<Quality>() {
                Ok(quality) => Ok(quality),
                Err(e) => {
                    warn!("{}, using {}", e, Quality::default());
                    Ok(Quality::default())
                }
            },
            None => {
                self.set_siriusxm_quality(Quality::default())?;
                Ok(Quality::default())
            }
        }
    }

    fn set_siriusxm_quality(&self, quality: Quality) -> Result<()> {
        self.set_value(&key("quality"), Value::String(quality.as_str().to_string()))
    }

    fn get_siriusxm_precache(&self) -> Result<bool> {
        match self.get_value(&key("precache")) {
            Ok(Value::Bool(b)) => Ok(b),
            _ => {
                self.set_siriusxm_precache(true)?;
                Ok(true)
            }
        }
    }

    fn set_siriusxm_precache(&self, enabled: bool) -> Result<()> {
        self.set_value(&key("precache"), Value::Bool(enabled))
    }

    fn get_siriusxm_segment_cache_capacity(&self) -> Result<usize> {
        match self.get_value(&key("segment_cache_capacity")) {
            Ok(Value::Number(n)) => match n.as_u64().filter(|c| *c > 0) {
                Some(capacity) => Ok(capacity as usize),
                None => {
                    warn!(
                        "Invalid segment cache capacity {}, using {}",
                        n, DEFAULT_SEGMENT_CACHE_CAPACITY
                    );
                    Ok(DEFAULT_SEGMENT_CACHE_CAPACITY)
                }
            },
            _ => {
                self.set_siriusxm_segment_cache_capacity(DEFAULT_SEGMENT_CACHE_CAPACITY)?;
                Ok(DEFAULT_SEGMENT_CACHE_CAPACITY)
            }
        }
    }

    fn set_siriusxm_segment_cache_capacity(&self, capacity: usize) -> Result<()> {
        self.set_value(
            &key("segment_cache_capacity"),
            Value::Number(Number::from(capacity as u64)),
        )
    }

    fn get_siriusxm_proxy_settings(&self) -> Result<ProxySettings> {
        Ok(ProxySettings {
            precache: self.get_siriusxm_precache()?,
            segment_cache_capacity: self.get_siriusxm_segment_cache_capacity()?,
            ..ProxySettings::default()
        })
    }
}
