//! A partial `ssh_config` parser that only knows about `Host` blocks
//!
//! Every non-blank line must be exactly `KEY VALUE`. This covers the output
//! of `vagrant ssh-config` and hand written files for test machines, not the
//! full `ssh_config(5)` grammar (no `Match`, no patterns, no quoting).

use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use crate::error::ConfigError;

/// One `Host` block: ordered, unique keys, `Host` first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostProfile {
    entries: Vec<(String, String)>,
}

impl HostProfile {
    fn open(name: &str) -> Self {
        Self {
            entries: vec![("Host".to_string(), name.to_string())],
        }
    }

    /// The `Host` value
    #[must_use]
    pub fn name(&self) -> &str {
        &self.entries[0].1
    }

    /// Value of `key`
    ///
    /// # Errors
    /// `ConfigError::MissingKey` if the block has no such key.
    pub fn get(&self, key: &str) -> Result<&str, ConfigError> {
        self.lookup(key).ok_or_else(|| ConfigError::MissingKey {
            host: self.name().to_string(),
            key: key.to_string(),
        })
    }

    /// Value of `key`, or `default`
    #[must_use]
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.lookup(key).unwrap_or(default)
    }

    /// Entries in file order, `Host` first
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of keys, `Host` included
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false: a profile holds at least `Host`
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn insert(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        if let Some(previous) = self.lookup(key) {
            return Err(ConfigError::DuplicateKey {
                host: self.name().to_string(),
                key: key.to_string(),
                value: value.to_string(),
                previous: previous.to_string(),
            });
        }
        self.entries.push((key.to_string(), value.to_string()));
        Ok(())
    }

    /// A block must say something besides its name
    fn close(self) -> Result<Self, ConfigError> {
        if self.entries.len() == 1 {
            return Err(ConfigError::EmptyBlock {
                host: self.name().to_string(),
            });
        }
        Ok(self)
    }
}

/// All `Host` blocks of one file, in file order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostProfiles {
    profiles: Vec<HostProfile>,
}

impl HostProfiles {
    /// Parse configuration text
    ///
    /// # Errors
    /// Any `ConfigError` parse variant; nothing is returned on error.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut profiles = Vec::new();
        let mut current: Option<HostProfile> = None;

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let [key, value] = tokens[..] else {
                return Err(ConfigError::TokenCount {
                    line: line.to_string(),
                    count: tokens.len(),
                });
            };

            current = match (current, key) {
                (None, "Host") => Some(HostProfile::open(value)),
                (None, _) => {
                    return Err(ConfigError::MissingHost {
                        line: line.to_string(),
                    });
                }
                (Some(block), "Host") => {
                    profiles.push(block.close()?);
                    Some(HostProfile::open(value))
                }
                (Some(mut block), _) => {
                    block.insert(key, value)?;
                    Some(block)
                }
            };
        }

        if let Some(block) = current {
            profiles.push(block.close()?);
        }
        if profiles.is_empty() {
            return Err(ConfigError::EmptyFile);
        }

        let mut seen = HashSet::new();
        for profile in &profiles {
            if !seen.insert(profile.name()) {
                return Err(ConfigError::DuplicateHost {
                    host: profile.name().to_string(),
                });
            }
        }

        Ok(Self { profiles })
    }

    /// Read and parse a configuration file
    ///
    /// # Errors
    /// `ConfigError::Read` if the file cannot be read, otherwise as [`HostProfiles::parse`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(&text)
    }

    /// The first block of the file
    #[must_use]
    pub fn first(&self) -> &HostProfile {
        &self.profiles[0]
    }

    /// The block whose `Host` value is `name`
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&HostProfile> {
        self.profiles.iter().find(|p| p.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HostProfile> {
        self.profiles.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Always false: parsing rejects empty files
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

impl FromStr for HostProfiles {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
