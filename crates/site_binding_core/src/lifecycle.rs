//! Site provisioning and removal rules.

use serde::{Deserialize, Serialize};

use crate::error::{BindError, Result};
use crate::site::Site;
use crate::types::{SiteSubType, SiteType, UniqueSite};

/// Attributes of a site to provision on a station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteSpec {
    pub name: String,
    pub index: i16,
    pub site_type: SiteType,
    pub sub_type: SiteSubType,
    #[serde(default)]
    pub limitation: Vec<String>,
}

impl SiteSpec {
    pub fn new(
        name: impl Into<String>,
        index: i16,
        site_type: SiteType,
        sub_type: SiteSubType,
    ) -> Self {
        Self {
            name: name.into(),
            index,
            site_type,
            sub_type,
            limitation: Vec::new(),
        }
    }

    pub fn with_limitation(mut self, limitation: Vec<String>) -> Self {
        self.limitation = limitation;
        self
    }

    /// Checks the identifiers and builds the empty site owned by `station`.
    pub fn build(&self, station: &str) -> Result<Site> {
        if station.trim().is_empty() {
            return Err(BindError::InvalidRequest("station id is empty".into()));
        }
        if self.name.trim().is_empty() {
            return Err(BindError::InvalidRequest("site name is empty".into()));
        }
        Ok(Site::empty(
            UniqueSite::new(station, &self.name, self.index),
            self.site_type,
            self.sub_type,
            self.limitation.clone(),
        ))
    }
}

/// A site may be deleted only by its owner, only once no other station
/// shares it, and only while its content is empty.
pub fn ensure_removable(station: &str, site: &Site, associated: &[String]) -> Result<()> {
    let key = site.key();
    if key.station != station {
        return Err(BindError::Conflict(format!(
            "site {key} is owned by {}, not {station}",
            key.station
        )));
    }
    if associated.len() >= 2 {
        return Err(BindError::Conflict(format!(
            "site {key} is still shared by {} stations",
            associated.len()
        )));
    }
    if !site.content().is_empty() {
        return Err(BindError::Conflict(format!("site {key} is not empty")));
    }
    Ok(())
}
