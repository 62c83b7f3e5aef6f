//! Fail-open risk profile lookup
//!
//! The profile service is a remote dependency. A slow or failing lookup
//! must never block a transfer, so [`ProfileLookup`] bounds every call with
//! a timeout and substitutes an empty profile on any failure.

use crate::{Result, RiskProfile};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Source of user risk profiles
#[async_trait]
pub trait RiskProfileSource: Send + Sync {
    /// Fetch the profile of a user
    async fn fetch(&self, user_id: &str) -> Result<RiskProfile>;
}

/// In-memory profile source
#[derive(Debug, Default)]
pub struct StaticProfileSource {
    profiles: DashMap<String, RiskProfile>,
}

impl StaticProfileSource {
    /// Empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the profile of a user
    pub fn insert(&self, user_id: impl Into<String>, profile: RiskProfile) {
        self.profiles.insert(user_id.into(), profile);
    }
}

#[async_trait]
impl RiskProfileSource for StaticProfileSource {
    async fn fetch(&self, user_id: &str) -> Result<RiskProfile> {
        Ok(self
            .profiles
            .get(user_id)
            .map(|p| p.value().clone())
            .unwrap_or_default())
    }
}

/// Profile plus whether it is a fail-open substitute
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileOutcome {
    /// Profile to score against
    pub profile: RiskProfile,
    /// True if the lookup failed or timed out
    pub degraded: bool,
}

/// Timeout-bounded, fail-open profile lookup
#[derive(Clone)]
pub struct ProfileLookup {
    source: Arc<dyn RiskProfileSource>,
    timeout: Duration,
}

impl std::fmt::Debug for ProfileLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileLookup")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ProfileLookup {
    /// Create lookup
    pub fn new(source: Arc<dyn RiskProfileSource>, timeout: Duration) -> Self {
        Self { source, timeout }
    }

    /// Fetch a profile; never fails
    pub async fn fetch(&self, user_id: &str) -> ProfileOutcome {
        match tokio::time::timeout(self.timeout, self.source.fetch(user_id)).await {
            Ok(Ok(profile)) => ProfileOutcome {
                profile,
                degraded: false,
            },
            Ok(Err(e)) => {
                warn!(
                    user_id,
                    error = %e,
                    profile_degraded = true,
                    "Risk profile lookup failed, scoring with empty profile"
                );
                Self::degraded()
            }
            Err(_) => {
                warn!(
                    user_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    profile_degraded = true,
                    "Risk profile lookup timed out, scoring with empty profile"
                );
                Self::degraded()
            }
        }
    }

    fn degraded() -> ProfileOutcome {
        ProfileOutcome {
            profile: RiskProfile::empty(),
            degraded: true,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::Error;

    pub(crate) struct FailingSource;

    #[async_trait]
    impl RiskProfileSource for FailingSource {
        async fn fetch(&self, _user_id: &str) -> Result<RiskProfile> {
            Err(Error::ProfileUnavailable("connection refused".to_string()))
        }
    }

    pub(crate) struct SlowSource;

    #[async_trait]
    impl RiskProfileSource for SlowSource {
        async fn fetch(&self, _user_id: &str) -> Result<RiskProfile> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(RiskProfile::empty())
        }
    }

    #[tokio::test]
    async fn test_known_profile_is_not_degraded() {
        let source = StaticProfileSource::new();
        let mut profile = RiskProfile::empty();
        profile.known_payees.insert("ACC-2".to_string());
        source.insert("user-1", profile.clone());

        let lookup = ProfileLookup::new(Arc::new(source), Duration::from_millis(100));
        let outcome = lookup.fetch("user-1").await;

        assert!(!outcome.degraded);
        assert_eq!(outcome.profile, profile);
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_empty_profile() {
        let lookup = ProfileLookup::new(Arc::new(FailingSource), Duration::from_millis(100));
        let outcome = lookup.fetch("user-1").await;

        assert!(outcome.degraded);
        assert_eq!(outcome.profile, RiskProfile::empty());
    }

    #[tokio::test]
    async fn test_timeout_falls_back_to_empty_profile() {
        let lookup = ProfileLookup::new(Arc::new(SlowSource), Duration::from_millis(10));
        let outcome = lookup.fetch("user-1").await;

        assert!(outcome.degraded);
    }
}
