//! Memoization of prepared frequency settings.
//!
//! Preparing a setting may involve privileged driver work, so every distinct frequency is
//! prepared at most once and reused afterwards. Failed preparations are not remembered.

use crate::driver::FrequencyDriver;
use crate::{Error, Result};
use log::{debug, warn};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Frequency in Hz, compared by exact value.
pub type FrequencyValue = i64;

/// Prepared settings keyed by frequency.
///
/// Settings are owned by the cache and handed back to the driver by `release_all`.
#[derive(Debug)]
pub struct SettingCache<S> {
    /// Prepared settings.
    settings: HashMap<FrequencyValue, S>,
}

impl<S> Default for SettingCache<S> {
    fn default() -> Self {
        SettingCache {
            settings: HashMap::new(),
        }
    }
}

impl<S> SettingCache<S> {
    /// Create an empty cache.
    pub fn new() -> Self {
        SettingCache::default()
    }

    /// Number of cached settings.
    #[inline]
    pub fn len(&self) -> usize {
        self.settings.len()
    }

    /// Check if nothing is cached.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }

    /// Cached setting for `freq`, without asking the driver.
    pub fn get(&self, freq: FrequencyValue) -> Option<&S> {
        self.settings.get(&freq)
    }

    /// Cached setting for `freq`, prepared by `driver` on first use.
    pub fn get_or_prepare<D>(&mut self, driver: &mut D, freq: FrequencyValue) -> Result<&S>
    where
        D: FrequencyDriver<Setting = S>,
    {
        match self.settings.entry(freq) {
            Entry::Occupied(entry) => {
                debug!("Setting found for {}", freq);
                Ok(entry.into_mut())
            }
            Entry::Vacant(entry) => match driver.prepare(freq, 0) {
                Some(setting) => {
                    debug!("Prepared new setting for {}", freq);
                    Ok(entry.insert(setting))
                }
                None => {
                    warn!("Could not prepare the new frequency setting to {}", freq);
                    Err(Error::Prepare(freq))
                }
            },
        }
    }

    /// Hand every cached setting back to `driver` and empty the cache.
    pub fn release_all<D>(&mut self, driver: &mut D)
    where
        D: FrequencyDriver<Setting = S>,
    {
        for (freq, setting) in self.settings.drain() {
            debug!("Releasing setting for {}", freq);
            driver.unprepare(setting);
        }
    }
}
