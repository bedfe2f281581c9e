use std::time::Duration;

use thiserror::Error;

use crate::request::BindVerb;
use crate::types::{SiteSubType, SiteType, UniqueSite};

pub type Result<T> = std::result::Result<T, BindError>;

/// Every failure aborts the whole batch; `detail` indexes are zero-based
/// positions in the submitted request.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("duplicated target sites: {0}")]
    DuplicatedSites(UniqueSite),

    #[error("site {site} has sub-type {sub_type}, only material sites accept binds")]
    SubTypeMismatch { site: UniqueSite, sub_type: SiteSubType },

    #[error("detail #{detail}: verb {verb} does not apply to {site_type} site {site}")]
    TypeMismatch {
        detail: usize,
        site: UniqueSite,
        site_type: SiteType,
        verb: BindVerb,
    },

    #[error("detail #{detail}: invalid option: {reason}")]
    InvalidOption { detail: usize, reason: String },

    #[error("detail #{detail}: {verb} does not accept unspecified quantity ({resource_id})")]
    UnspecifiedQuantity {
        detail: usize,
        resource_id: String,
        verb: BindVerb,
    },

    #[error("detail #{detail}: product {product_id} is not allowed on site {site}")]
    LimitationViolated {
        detail: usize,
        site: UniqueSite,
        product_id: String,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("site not found: {0}")]
    SiteNotFound(UniqueSite),

    #[error("site content not found: {0}")]
    SiteContentNotFound(UniqueSite),

    #[error("integrity: {0}")]
    Integrity(String),

    #[error("lock not available: {0}")]
    Contention(String),

    #[error("unknown bind verb: {0}")]
    UnknownVerb(String),

    #[error("bind exceeded deadline of {0:?}")]
    Timeout(Duration),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Coarse error class for callers that branch on kind rather than message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed or inapplicable request; fix the request and resubmit.
    Structural,
    NotFound,
    /// Site and content tables disagree; needs operator intervention.
    Integrity,
    /// Row lock was held by another transaction; retry.
    Contention,
    UnknownVerb,
    Timeout,
    Conflict,
    Internal,
}

impl BindError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::DuplicatedSites(_)
            | Self::SubTypeMismatch { .. }
            | Self::TypeMismatch { .. }
            | Self::InvalidOption { .. }
            | Self::UnspecifiedQuantity { .. }
            | Self::LimitationViolated { .. }
            | Self::InvalidRequest(_) => ErrorCategory::Structural,
            Self::SiteNotFound(_) => ErrorCategory::NotFound,
            Self::SiteContentNotFound(_) | Self::Integrity(_) => ErrorCategory::Integrity,
            Self::Contention(_) => ErrorCategory::Contention,
            Self::UnknownVerb(_) => ErrorCategory::UnknownVerb,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Conflict(_) => ErrorCategory::Conflict,
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Contention and deadline failures leave state untouched and may succeed on retry.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Contention | ErrorCategory::Timeout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> UniqueSite {
        UniqueSite::new("ST-01", "feeder", 2)
    }

    #[test]
    fn duplicated_sites_display() {
        let e = BindError::DuplicatedSites(site());
        assert_eq!(e.to_string(), "duplicated target sites: ST-01/feeder#2");
    }

    #[test]
    fn structural_errors_are_not_retriable() {
        let e = BindError::InvalidOption {
            detail: 0,
            reason: "missing queue index".into(),
        };
        assert_eq!(e.category(), ErrorCategory::Structural);
        assert!(!e.is_retriable());
    }

    #[test]
    fn missing_content_is_integrity() {
        let e = BindError::SiteContentNotFound(site());
        assert_eq!(e.category(), ErrorCategory::Integrity);
        assert!(!e.is_retriable());
    }

    #[test]
    fn contention_and_timeout_are_retriable() {
        assert!(BindError::Contention("site_contents".into()).is_retriable());
        assert!(BindError::Timeout(Duration::from_millis(10)).is_retriable());
    }

    #[test]
    fn internal_wraps_anyhow() {
        let e: BindError = anyhow::anyhow!("boom").into();
        assert_eq!(e.category(), ErrorCategory::Internal);
        assert_eq!(e.to_string(), "internal: boom");
    }

    #[test]
    fn type_mismatch_names_verb_and_type() {
        let e = BindError::TypeMismatch {
            detail: 3,
            site: site(),
            site_type: SiteType::Slot,
            verb: BindVerb::ContainerAdd,
        };
        assert_eq!(
            e.to_string(),
            "detail #3: verb container_add does not apply to slot site ST-01/feeder#2"
        );
    }
}
