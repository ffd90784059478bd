//! Authority checking for gateway operations.
//!
//! A capability table maps a logical caller service to the
//! `entity:operation` keys it may exercise. Every gateway operation checks
//! authority before acquiring any lock or touching the idempotency store,
//! so a denial has zero side effects.

use crate::error::GatewayError;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Capability keys understood by the gateways.
pub mod capabilities {
    /// Post a journal entry.
    pub const JOURNAL_POST: &str = "ledger.journal:post";

    /// Post a reversing entry against a posted journal entry.
    pub const JOURNAL_REVERSE: &str = "ledger.journal:reverse";

    /// Create chart-of-accounts entries.
    pub const ACCOUNT_CREATE: &str = "ledger.account:create";

    /// Create a payroll.
    pub const PAYROLL_CREATE: &str = "payroll:create";

    /// Approve a calculated payroll.
    pub const PAYROLL_APPROVE: &str = "payroll:approve";

    /// Pay an approved payroll.
    pub const PAYROLL_PAY: &str = "payroll:pay";

    /// Cancel a calculated payroll.
    pub const PAYROLL_CANCEL: &str = "payroll:cancel";
}

/// Well-known logical caller services.
pub mod services {
    pub const PAYROLL_GATEWAY: &str = "payroll-gateway";
    pub const LEDGER_GATEWAY: &str = "ledger-gateway";
    pub const HR_PORTAL: &str = "hr-portal";
    pub const FINANCE_PORTAL: &str = "finance-portal";
}

/// Static, configuration-extensible capability table.
#[derive(Debug, Clone, Default)]
pub struct AuthorityTable {
    grants: HashMap<String, HashSet<String>>,
}

impl AuthorityTable {
    /// Empty table: everything denied.
    pub fn new() -> Self {
        Self::default()
    }

    /// The default deployment table.
    ///
    /// The payroll gateway holds the ledger capabilities it needs for its
    /// own postings; human-facing portals hold the payroll lifecycle
    /// capabilities.
    pub fn defaults() -> Self {
        use capabilities::*;
        use services::*;

        let mut table = Self::new();
        for cap in [JOURNAL_POST, JOURNAL_REVERSE, ACCOUNT_CREATE] {
            table.grant(FINANCE_PORTAL, cap);
            table.grant(PAYROLL_GATEWAY, cap);
        }
        for cap in [PAYROLL_CREATE, PAYROLL_APPROVE, PAYROLL_PAY, PAYROLL_CANCEL] {
            table.grant(HR_PORTAL, cap);
        }
        table.grant(FINANCE_PORTAL, PAYROLL_APPROVE);
        table.grant(FINANCE_PORTAL, PAYROLL_PAY);
        table
    }

    pub fn grant(&mut self, service: &str, capability: &str) {
        self.grants
            .entry(service.to_string())
            .or_default()
            .insert(capability.to_string());
    }

    pub fn revoke(&mut self, service: &str, capability: &str) {
        if let Some(caps) = self.grants.get_mut(service) {
            caps.remove(capability);
        }
    }

    pub fn is_allowed(&self, service: &str, capability: &str) -> bool {
        self.grants
            .get(service)
            .map(|caps| caps.contains(capability))
            .unwrap_or(false)
    }

    /// Check authority, raising `AuthorityViolation` on denial.
    pub fn authorize(&self, service: &str, capability: &str) -> Result<(), GatewayError> {
        if self.is_allowed(service, capability) {
            return Ok(());
        }

        warn!(
            service = service,
            capability = capability,
            "Permission denied: missing capability"
        );

        Err(GatewayError::AuthorityViolation {
            service: service.to_string(),
            capability: capability.to_string(),
        })
    }
}
