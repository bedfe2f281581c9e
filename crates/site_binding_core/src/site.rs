//! A site together with its current content.

use serde::{Deserialize, Serialize};

use crate::error::{BindError, Result};
use crate::topology::SiteContent;
use crate::types::{SiteSubType, SiteType, UniqueSite};

/// Site attributes plus content. The site type is not stored separately:
/// it is the content variant, so the two cannot disagree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    key: UniqueSite,
    sub_type: SiteSubType,
    limitation: Vec<String>,
    content: SiteContent,
}

impl Site {
    /// Assembles a site from separately stored attributes and content,
    /// rejecting rows whose declared type disagrees with the content.
    pub fn new(
        key: UniqueSite,
        site_type: SiteType,
        sub_type: SiteSubType,
        limitation: Vec<String>,
        content: SiteContent,
    ) -> Result<Self> {
        if content.site_type() != site_type {
            return Err(BindError::Integrity(format!(
                "site {key} declares type {site_type} but content is {}",
                content.site_type()
            )));
        }
        Ok(Self {
            key,
            sub_type,
            limitation,
            content,
        })
    }

    pub fn empty(
        key: UniqueSite,
        site_type: SiteType,
        sub_type: SiteSubType,
        limitation: Vec<String>,
    ) -> Self {
        Self {
            key,
            sub_type,
            limitation,
            content: SiteContent::empty(site_type),
        }
    }

    pub fn key(&self) -> &UniqueSite {
        &self.key
    }

    pub fn site_type(&self) -> SiteType {
        self.content.site_type()
    }

    pub fn sub_type(&self) -> SiteSubType {
        self.sub_type
    }

    pub fn limitation(&self) -> &[String] {
        &self.limitation
    }

    pub fn set_limitation(&mut self, limitation: Vec<String>) {
        self.limitation = limitation;
    }

    pub fn content(&self) -> &SiteContent {
        &self.content
    }

    /// Variant-preserving access for the orchestrator; the enum itself is
    /// never replaced.
    pub(crate) fn content_mut(&mut self) -> &mut SiteContent {
        &mut self.content
    }

    pub fn into_content(self) -> SiteContent {
        self.content
    }

    /// An empty limitation admits every product.
    pub fn allows(&self, product_id: &str) -> bool {
        self.limitation.is_empty() || self.limitation.iter().any(|p| p == product_id)
    }
}
