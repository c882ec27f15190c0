use crate::domain::models::{AccountSnapshot, TimerConfig};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::preference_store::PreferenceStore;
use crate::infrastructure::prefs_codec::{
    PreferenceDocument, decode_account, encode_balance, encode_inventory, encode_timer_config,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::{Duration as TokioDuration, sleep};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendOutcome {
    pub balance: u64,
    pub inventory: BTreeMap<String, u32>,
    /// Names whose count crossed 0 -> 1 in this operation, in draw order.
    pub newly_unlocked: Vec<String>,
}

/// Sole writer of the account's balance, inventory and timer config. Every
/// operation re-reads the remote document before deciding and commits via a
/// full merge-write; nothing here trusts a cached balance. An operation that
/// exhausts its retries must be treated as not committed.
pub struct CurrencyLedger<P>
where
    P: PreferenceStore,
{
    store: Arc<P>,
    retry_policy: RetryPolicy,
}

impl<P> CurrencyLedger<P>
where
    P: PreferenceStore,
{
    pub fn new(store: Arc<P>) -> Self {
        Self {
            store,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub async fn read_account(&self, session_token: &str) -> Result<AccountSnapshot, InfraError> {
        let prefs = self.read_prefs_with_retry(session_token).await?;
        Ok(decode_account(&prefs))
    }

    pub async fn award(&self, session_token: &str, amount: u64) -> Result<u64, InfraError> {
        if amount == 0 {
            return Err(InfraError::InvalidConfig(
                "award amount must be > 0".to_string(),
            ));
        }

        let account = self.read_account(session_token).await?;
        let target = account.balance.saturating_add(amount);
        let confirmed = self
            .merge_write_with_retry(session_token, encode_balance(target))
            .await?;
        Ok(decode_account(&confirmed).balance)
    }

    pub async fn spend_and_unlock(
        &self,
        session_token: &str,
        cost: u64,
        unlocks: &[String],
    ) -> Result<SpendOutcome, InfraError> {
        if cost == 0 {
            return Err(InfraError::InvalidConfig(
                "spend cost must be > 0".to_string(),
            ));
        }

        // The spend decision is made against the balance re-read here, never
        // against anything the caller previously observed.
        let account = self.read_account(session_token).await?;
        if account.balance < cost {
            return Err(InfraError::InsufficientFunds {
                balance: account.balance,
                cost,
            });
        }

        let mut inventory = account.inventory.clone();
        let mut newly_unlocked = Vec::new();
        for name in unlocks {
            let count = inventory.entry(name.clone()).or_insert(0);
            if *count == 0 {
                newly_unlocked.push(name.clone());
            }
            *count = count.saturating_add(1);
        }

        let mut partial = encode_balance(account.balance - cost);
        partial.extend(encode_inventory(&inventory));
        let confirmed = self.merge_write_with_retry(session_token, partial).await?;

        let confirmed_account = decode_account(&confirmed);
        Ok(SpendOutcome {
            balance: confirmed_account.balance,
            inventory: confirmed_account.inventory,
            newly_unlocked,
        })
    }

    pub async fn save_timer_config(
        &self,
        session_token: &str,
        config: &TimerConfig,
    ) -> Result<(), InfraError> {
        config.validate().map_err(InfraError::InvalidConfig)?;
        self.merge_write_with_retry(session_token, encode_timer_config(config))
            .await?;
        Ok(())
    }

    async fn read_prefs_with_retry(
        &self,
        session_token: &str,
    ) -> Result<PreferenceDocument, InfraError> {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            match self.store.read_prefs(session_token).await {
                Ok(prefs) => return Ok(prefs),
                Err(error) if Self::should_retry(&error) && attempt + 1 < max_attempts => {
                    sleep(TokioDuration::from_millis(self.retry_policy.delay_ms)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn merge_write_with_retry(
        &self,
        session_token: &str,
        partial: PreferenceDocument,
    ) -> Result<PreferenceDocument, InfraError> {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            match self
                .store
                .merge_write_prefs(session_token, partial.clone())
                .await
            {
                Ok(confirmed) => return Ok(confirmed),
                Err(error) if Self::should_retry(&error) && attempt + 1 < max_attempts => {
                    sleep(TokioDuration::from_millis(self.retry_policy.delay_ms)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn should_retry(error: &InfraError) -> bool {
        matches!(error, InfraError::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::preference_store::InMemoryPreferenceStore;
    use proptest::prelude::*;

    fn fast_retry(max_attempts: u8) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay_ms: 1,
        }
    }

    fn store_with_balance(balance: u64) -> Arc<InMemoryPreferenceStore> {
        Arc::new(InMemoryPreferenceStore::with_prefs(encode_balance(balance)))
    }

    fn stored_balance(store: &InMemoryPreferenceStore) -> u64 {
        decode_account(&store.snapshot()).balance
    }

    #[tokio::test]
    async fn award_adds_to_the_freshly_read_balance() {
        let store = store_with_balance(100);
        let ledger = CurrencyLedger::new(Arc::clone(&store)).with_retry_policy(fast_retry(1));

        // Another session moved the balance after our last look at it.
        store.apply_external(encode_balance(300));

        let confirmed = ledger.award("session", 50).await.expect("award");
        assert_eq!(confirmed, 350);
        assert_eq!(stored_balance(&store), 350);
    }

    #[tokio::test]
    async fn award_rejects_zero_amount() {
        let store = store_with_balance(100);
        let ledger = CurrencyLedger::new(Arc::clone(&store));
        assert!(matches!(
            ledger.award("session", 0).await,
            Err(InfraError::InvalidConfig(_))
        ));
        assert_eq!(store.write_calls(), 0);
    }

    #[tokio::test]
    async fn award_retries_transient_write_failure() {
        let store = store_with_balance(10);
        store.fail_writes(1);
        let ledger = CurrencyLedger::new(Arc::clone(&store)).with_retry_policy(fast_retry(3));

        let confirmed = ledger.award("session", 5).await.expect("award after retry");
        assert_eq!(confirmed, 15);
        assert_eq!(store.write_calls(), 2);
    }

    #[tokio::test]
    async fn award_surfaces_unavailable_after_exhausting_retries() {
        let store = store_with_balance(10);
        store.fail_writes(3);
        let ledger = CurrencyLedger::new(Arc::clone(&store)).with_retry_policy(fast_retry(3));

        let result = ledger.award("session", 5).await;
        assert!(matches!(result, Err(InfraError::Unavailable(_))));
        // The optimistic value was never committed.
        assert_eq!(stored_balance(&store), 10);
        assert_eq!(store.write_calls(), 3);
    }

    #[tokio::test]
    async fn spend_rejects_insufficient_funds_without_writing() {
        let store = store_with_balance(90);
        let ledger = CurrencyLedger::new(Arc::clone(&store)).with_retry_policy(fast_retry(1));

        let result = ledger
            .spend_and_unlock("session", 100, &["learnw1Wink.png".to_string()])
            .await;
        assert!(matches!(
            result,
            Err(InfraError::InsufficientFunds {
                balance: 90,
                cost: 100
            })
        ));
        assert_eq!(stored_balance(&store), 90);
        assert_eq!(store.write_calls(), 0);
    }

    #[tokio::test]
    async fn spend_applies_multiplicity_and_reports_new_unlocks() {
        let mut prefs = encode_balance(500);
        let mut owned = BTreeMap::new();
        owned.insert("learnw1Wink.png".to_string(), 1);
        prefs.extend(encode_inventory(&owned));
        let store = Arc::new(InMemoryPreferenceStore::with_prefs(prefs));
        let ledger = CurrencyLedger::new(Arc::clone(&store)).with_retry_policy(fast_retry(1));

        let unlocks = vec![
            "learnw1Wink.png".to_string(),
            "learnw1First.png".to_string(),
            "learnw1First.png".to_string(),
        ];
        let outcome = ledger
            .spend_and_unlock("session", 300, &unlocks)
            .await
            .expect("spend");

        assert_eq!(outcome.balance, 200);
        assert_eq!(outcome.inventory.get("learnw1Wink.png"), Some(&2));
        assert_eq!(outcome.inventory.get("learnw1First.png"), Some(&2));
        assert_eq!(outcome.newly_unlocked, vec!["learnw1First.png".to_string()]);
        assert_eq!(stored_balance(&store), 200);
    }

    #[tokio::test]
    async fn spend_is_all_or_nothing_when_the_write_fails() {
        let store = store_with_balance(200);
        store.fail_writes(3);
        let ledger = CurrencyLedger::new(Arc::clone(&store)).with_retry_policy(fast_retry(3));

        let result = ledger
            .spend_and_unlock("session", 150, &["learnw1Spicy.png".to_string()])
            .await;
        assert!(matches!(result, Err(InfraError::Unavailable(_))));

        let account = decode_account(&store.snapshot());
        assert_eq!(account.balance, 200);
        assert!(account.inventory.is_empty());
    }

    #[tokio::test]
    async fn spend_sees_an_external_drain_before_committing() {
        let store = store_with_balance(500);
        let ledger = CurrencyLedger::new(Arc::clone(&store)).with_retry_policy(fast_retry(1));

        store.apply_external(encode_balance(50));

        let result = ledger
            .spend_and_unlock("session", 100, &["learnw1Nuns.png".to_string()])
            .await;
        assert!(matches!(
            result,
            Err(InfraError::InsufficientFunds {
                balance: 50,
                cost: 100
            })
        ));
    }

    #[tokio::test]
    async fn operations_preserve_unrelated_preference_fields() {
        let mut prefs = encode_balance(100);
        prefs.insert(
            "avatarUrl".to_string(),
            serde_json::Value::String("https://a/avatar.png".to_string()),
        );
        let store = Arc::new(InMemoryPreferenceStore::with_prefs(prefs));
        let ledger = CurrencyLedger::new(Arc::clone(&store)).with_retry_policy(fast_retry(1));

        ledger.award("session", 25).await.expect("award");
        ledger
            .save_timer_config("session", &TimerConfig::default())
            .await
            .expect("save config");

        let snapshot = store.snapshot();
        assert_eq!(
            snapshot.get("avatarUrl").and_then(|value| value.as_str()),
            Some("https://a/avatar.png")
        );
    }

    #[tokio::test]
    async fn save_timer_config_rejects_invalid_durations() {
        let store = store_with_balance(0);
        let ledger = CurrencyLedger::new(Arc::clone(&store));

        let mut config = TimerConfig::default();
        config.work = 0;
        assert!(matches!(
            ledger.save_timer_config("session", &config).await,
            Err(InfraError::InvalidConfig(_))
        ));
        assert_eq!(store.write_calls(), 0);
    }

    #[derive(Debug, Clone)]
    enum LedgerOp {
        Award(u64),
        Spend(u64),
        External(u64),
        FailNextWrite,
    }

    fn arb_op() -> impl Strategy<Value = LedgerOp> {
        prop_oneof![
            (1u64..200u64).prop_map(LedgerOp::Award),
            (1u64..300u64).prop_map(LedgerOp::Spend),
            (0u64..500u64).prop_map(LedgerOp::External),
            Just(LedgerOp::FailNextWrite),
        ]
    }

    // After any interleaving of awards, spends, external writes and injected
    // outages, the stored balance equals the fold of the operations that
    // actually confirmed, and a spend never drives it below zero.
    proptest! {
        #[test]
        fn balance_tracks_confirmed_deltas(ops in prop::collection::vec(arb_op(), 1..40)) {
            let runtime = tokio::runtime::Runtime::new().expect("runtime");
            runtime.block_on(async move {
                let store = store_with_balance(100);
                let ledger =
                    CurrencyLedger::new(Arc::clone(&store)).with_retry_policy(fast_retry(1));

                let mut expected: u64 = 100;
                let mut write_armed = false;
                for op in ops {
                    match op {
                        LedgerOp::FailNextWrite => {
                            store.fail_writes(1);
                            write_armed = true;
                        }
                        LedgerOp::External(value) => {
                            store.apply_external(encode_balance(value));
                            expected = value;
                        }
                        LedgerOp::Award(amount) => {
                            let result = ledger.award("session", amount).await;
                            if write_armed {
                                assert!(matches!(result, Err(InfraError::Unavailable(_))));
                                write_armed = false;
                            } else {
                                expected += amount;
                                assert_eq!(result.expect("award"), expected);
                            }
                        }
                        LedgerOp::Spend(cost) => {
                            let result = ledger
                                .spend_and_unlock(
                                    "session",
                                    cost,
                                    &["learnw1Wink.png".to_string()],
                                )
                                .await;
                            if expected < cost {
                                assert!(matches!(
                                    result,
                                    Err(InfraError::InsufficientFunds { .. })
                                ));
                            } else if write_armed {
                                assert!(matches!(result, Err(InfraError::Unavailable(_))));
                                write_armed = false;
                            } else {
                                expected -= cost;
                                assert_eq!(result.expect("spend").balance, expected);
                            }
                        }
                    }
                }

                assert_eq!(stored_balance(&store), expected);
            });
        }
    }
}
