//! Geolocation collaborator
//!
//! Maps a source address to a country label plus whatever finer detail the
//! source knows. Lookups are in-memory and synchronous, so the registry can
//! call them while registering.

use std::net::IpAddr;
use std::path::Path;

use serde::Serialize;

use crate::error::{CollaboratorError, ConfigError};

/// What geolocation knows about an address
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeoInfo {
    pub country: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

impl GeoInfo {
    pub fn country(country: impl Into<String>) -> Self {
        Self {
            country: country.into(),
            region: None,
            city: None,
            timezone: None,
        }
    }

    /// Parse a `Country[;Region[;City[;Timezone]]]` label
    ///
    /// Empty fields are treated as missing. The country is required.
    fn parse_label(label: &str) -> Option<Self> {
        let mut fields = label.split(';').map(str::trim);
        let mut next = || fields.next().filter(|f| !f.is_empty()).map(str::to_string);

        let country = next()?;
        Some(Self {
            country,
            region: next(),
            city: next(),
            timezone: next(),
        })
    }
}

/// Resolves a network address to geolocation info
pub trait GeoLocator: Send + Sync {
    fn locate(&self, address: IpAddr) -> Result<GeoInfo, CollaboratorError>;
}

/// Geolocator used when no table is configured
#[derive(Debug, Default)]
pub struct NoGeoLocator;

impl GeoLocator for NoGeoLocator {
    fn locate(&self, _address: IpAddr) -> Result<GeoInfo, CollaboratorError> {
        Err(CollaboratorError::Unavailable)
    }
}

#[derive(Debug)]
struct Network {
    base: IpAddr,
    prefix: u8,
    info: GeoInfo,
}

impl Network {
    fn contains(&self, address: IpAddr) -> bool {
        match (self.base, address) {
            (IpAddr::V4(base), IpAddr::V4(addr)) => {
                let mask = u32::MAX.checked_shl(32 - self.prefix as u32).unwrap_or(0);
                u32::from(base) & mask == u32::from(addr) & mask
            }
            (IpAddr::V6(base), IpAddr::V6(addr)) => {
                let mask = u128::MAX.checked_shl(128 - self.prefix as u32).unwrap_or(0);
                u128::from(base) & mask == u128::from(addr) & mask
            }
            _ => false,
        }
    }
}

/// CIDR → geolocation lookup table
///
/// Text format, one network per line. The label is a country, optionally
/// followed by `;`-separated region, city and timezone:
///
/// ```text
/// # comment
/// 81.2.69.0/24   United Kingdom;England;London;Europe/London
/// 2001:db8::/32  Documentation
/// ```
///
/// The most specific matching network wins.
#[derive(Debug, Default)]
pub struct CountryTable {
    networks: Vec<Network>,
}

impl CountryTable {
    /// Parse a table from its text form
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut networks = Vec::new();

        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let bad = || ConfigError::GeoTable(format!("line {}: {:?}", lineno + 1, line));

            let (cidr, label) = line.split_once(char::is_whitespace).ok_or_else(bad)?;
            let (base, prefix) = cidr.split_once('/').ok_or_else(bad)?;
            let base: IpAddr = base.parse().map_err(|_| bad())?;
            let prefix: u8 = prefix.parse().map_err(|_| bad())?;

            let max = if base.is_ipv4() { 32 } else { 128 };
            if prefix > max {
                return Err(bad());
            }

            let info = GeoInfo::parse_label(label).ok_or_else(bad)?;
            networks.push(Network { base, prefix, info });
        }

        Ok(Self { networks })
    }

    /// Load a table from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::GeoTable(format!("{}: {}", path.display(), e)))?;
        Self::parse(&text)
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

impl GeoLocator for CountryTable {
    fn locate(&self, address: IpAddr) -> Result<GeoInfo, CollaboratorError> {
        self.networks
            .iter()
            .filter(|n| n.contains(address))
            .max_by_key(|n| n.prefix)
            .map(|n| n.info.clone())
            .ok_or(CollaboratorError::NotFound)
    }
}
