use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::keys;
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub user_id: String,
    pub active_until: DateTime<Utc>,
}

impl Subscription {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.active_until > now
    }
}

impl Store {
    pub fn get_subscription(&self, user_id: &str) -> Result<Option<Subscription>, StoreError> {
        let key = keys::subscription_key(user_id)?;
        match self.subscriptions.get(key.as_bytes())? {
            Some(raw) => Ok(Some(Self::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn set_subscription(&self, subscription: &Subscription) -> Result<(), StoreError> {
        let key = keys::subscription_key(&subscription.user_id)?;
        self.subscriptions
            .insert(key.as_bytes(), Self::serialize(subscription)?)?;
        Ok(())
    }

    pub fn clear_subscription(&self, user_id: &str) -> Result<bool, StoreError> {
        let key = keys::subscription_key(user_id)?;
        Ok(self.subscriptions.remove(key.as_bytes())?.is_some())
    }

    /// Unlimited hearts while a subscription is active.
    pub fn has_unlimited_hearts(&self, user_id: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        Ok(self
            .get_subscription(user_id)?
            .is_some_and(|sub| sub.is_active(now)))
    }
}
