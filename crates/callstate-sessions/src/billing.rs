//! Billing collaborator.
//!
//! The state machine asks billing for a usage ceiling on Initiate/Update and
//! debits final usage on Terminate. Rating is out of scope here; the
//! in-memory engine models prepaid allowances only.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BillingError {
    #[error("billing unavailable: {0}")]
    Unavailable(String),

    #[error("billing rejected {account}: {reason}")]
    Rejected { account: String, reason: String },
}

/// One charging run's view of a session, sent to billing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRequest {
    pub tenant: String,
    pub account: String,
    pub subject: String,
    pub destination: String,
    pub run_id: String,
    #[serde(with = "callstate_types::serde_nanos")]
    pub usage: Duration,
}

/// Usage authorization and debit.
pub trait BillingEngine: Send + Sync {
    /// Returns the ceiling the caller may consume, at most `request.usage`.
    /// A zero ceiling means the call is not authorized.
    fn authorize_usage(&self, request: &UsageRequest) -> Result<Duration, BillingError>;

    /// Records final usage against the account.
    fn debit(&self, request: &UsageRequest) -> Result<(), BillingError>;
}

/// Prepaid allowances held in memory.
///
/// Accounts without an allowance are granted up to `default_ceiling` per
/// authorization and are never debited.
#[derive(Debug, Default)]
pub struct InMemoryBilling {
    balances: Mutex<HashMap<(String, String), Duration>>,
    default_ceiling: Duration,
}

impl InMemoryBilling {
    pub fn new(default_ceiling: Duration) -> Self {
        Self {
            balances: Mutex::new(HashMap::new()),
            default_ceiling,
        }
    }

    /// Sets the allowance for `tenant`/`account`.
    pub fn with_balance(
        self,
        tenant: impl Into<String>,
        account: impl Into<String>,
        balance: Duration,
    ) -> Self {
        if let Ok(mut balances) = self.balances.lock() {
            balances.insert((tenant.into(), account.into()), balance);
        }
        self
    }

    /// Remaining allowance for `tenant`/`account`, if the account is known.
    pub fn balance(&self, tenant: &str, account: &str) -> Option<Duration> {
        let balances = self.balances.lock().ok()?;
        balances
            .get(&(tenant.to_string(), account.to_string()))
            .copied()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<(String, String), Duration>>, BillingError> {
        self.balances
            .lock()
            .map_err(|_| BillingError::Unavailable("lock poisoned".to_string()))
    }
}

impl BillingEngine for InMemoryBilling {
    fn authorize_usage(&self, request: &UsageRequest) -> Result<Duration, BillingError> {
        let balances = self.lock()?;
        let available = balances
            .get(&(request.tenant.clone(), request.account.clone()))
            .copied()
            .unwrap_or(self.default_ceiling);
        Ok(request.usage.min(available))
    }

    fn debit(&self, request: &UsageRequest) -> Result<(), BillingError> {
        let mut balances = self.lock()?;
        if let Some(balance) = balances.get_mut(&(request.tenant.clone(), request.account.clone()))
        {
            *balance = balance.saturating_sub(request.usage);
            debug!(
                account = %request.account,
                run_id = %request.run_id,
                remaining_secs = balance.as_secs(),
                "debited usage"
            );
        }
        Ok(())
    }
}
