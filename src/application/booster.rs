use crate::application::ledger::CurrencyLedger;
use crate::domain::models::StickerFile;
use crate::infrastructure::config::EconomyPolicy;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::preference_store::PreferenceStore;
use crate::infrastructure::sticker_catalog::StickerCatalog;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoosterPackOpening {
    /// One sticker per opened pack, in draw order; duplicates allowed.
    pub drawn: Vec<StickerFile>,
    pub newly_unlocked: Vec<String>,
    pub balance: u64,
    pub inventory: BTreeMap<String, u32>,
}

/// Authorizes the full batch against a fresh balance, draws uniformly over
/// the catalog, then commits cost and unlocks as a single ledger operation
/// so a failure can never charge without granting.
pub struct BoosterPackEngine<P, C>
where
    P: PreferenceStore,
    C: StickerCatalog,
{
    ledger: Arc<CurrencyLedger<P>>,
    catalog: Arc<C>,
    policy: EconomyPolicy,
}

impl<P, C> BoosterPackEngine<P, C>
where
    P: PreferenceStore,
    C: StickerCatalog,
{
    pub fn new(ledger: Arc<CurrencyLedger<P>>, catalog: Arc<C>, policy: EconomyPolicy) -> Self {
        Self {
            ledger,
            catalog,
            policy,
        }
    }

    pub async fn open(
        &self,
        session_token: &str,
        pack_count: u32,
    ) -> Result<BoosterPackOpening, InfraError> {
        if pack_count == 0 || pack_count > self.policy.max_packs_per_open {
            return Err(InfraError::InvalidConfig(format!(
                "pack count must be between 1 and {}",
                self.policy.max_packs_per_open
            )));
        }

        let cost = self
            .policy
            .booster_pack_cost
            .saturating_mul(pack_count as u64);

        // Authorization first: when funds are short nothing is drawn and the
        // catalog is never consulted.
        let account = self.ledger.read_account(session_token).await?;
        if account.balance < cost {
            return Err(InfraError::InsufficientFunds {
                balance: account.balance,
                cost,
            });
        }

        let catalog_files = self.catalog.list(session_token).await?;
        if catalog_files.is_empty() {
            return Err(InfraError::InvalidConfig(
                "sticker catalog is empty".to_string(),
            ));
        }

        let drawn: Vec<StickerFile> = {
            let mut rng = rand::rng();
            (0..pack_count)
                .map(|_| catalog_files[rng.random_range(0..catalog_files.len())].clone())
                .collect()
        };
        let drawn_names: Vec<String> = drawn.iter().map(|file| file.name.clone()).collect();

        let outcome = self
            .ledger
            .spend_and_unlock(session_token, cost, &drawn_names)
            .await?;

        Ok(BoosterPackOpening {
            drawn,
            newly_unlocked: outcome.newly_unlocked,
            balance: outcome.balance,
            inventory: outcome.inventory,
        })
    }
}
