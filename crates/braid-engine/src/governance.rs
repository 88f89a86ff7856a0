//! Governance checks.
//!
//! Before a step runs, the engine asks a [`GovernanceCheck`] whether the
//! step may perform its side effect. A denial fails the step with
//! `PermissionDenied`; the executor is never called.

use std::collections::HashSet;

use async_trait::async_trait;
use braid_config::StepDef;

/// What a governance check is asked about.
#[derive(Debug, Clone, Copy)]
pub struct GovernanceRequest<'a> {
  pub execution_id: &'a str,
  pub workflow_id: &'a str,
  pub step: &'a StepDef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GovernanceDecision {
  Allow,
  Deny { reason: String },
}

#[async_trait]
pub trait GovernanceCheck: Send + Sync {
  async fn check(&self, request: &GovernanceRequest<'_>) -> GovernanceDecision;
}

/// Allows every step.
#[derive(Debug, Clone, Default)]
pub struct AllowAll;

#[async_trait]
impl GovernanceCheck for AllowAll {
  async fn check(&self, _request: &GovernanceRequest<'_>) -> GovernanceDecision {
    GovernanceDecision::Allow
  }
}

/// Denies steps whose capability is on a list.
#[derive(Debug, Clone, Default)]
pub struct CapabilityDenyList {
  denied: HashSet<String>,
}

impl CapabilityDenyList {
  pub fn new<I, S>(capabilities: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      denied: capabilities.into_iter().map(Into::into).collect(),
    }
  }
}

#[async_trait]
impl GovernanceCheck for CapabilityDenyList {
  async fn check(&self, request: &GovernanceRequest<'_>) -> GovernanceDecision {
    if self.denied.contains(&request.step.capability) {
      GovernanceDecision::Deny {
        reason: format!("capability '{}' is not permitted", request.step.capability),
      }
    } else {
      GovernanceDecision::Allow
    }
  }
}
