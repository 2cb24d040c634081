//! # Unsealer
//!
//! Drives a Vault node from uninitialized/sealed to unsealed using key
//! shares held in a [`KeyStore`].
//!
//! Each attempt reads the seal status. A sealed node gets shares
//! `vault-unseal-0..` submitted until Vault reports it unsealed; an
//! unsealed node ends the run. Attempts are separated by the unseal period
//! and the run ends once the attempt budget is spent.
//!
//! With `init` enabled the first attempt is preceded by initialization:
//! the key store is probed, and an uninitialized node is only initialized
//! after confirming that no key it would write already exists.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};
use zeroize::Zeroizing;

use super::{InitRequest, VaultApi, VaultApiError};
use crate::constants::{DEFAULT_SECRET_SHARES, DEFAULT_SECRET_THRESHOLD, DEFAULT_UNSEAL_ATTEMPTS};
use crate::keystore::{unseal_key_name, KeyStore, KeyStoreError, ROOT_TOKEN_KEY, TEST_KEY};
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum UnsealError {
    #[error("key store error: {0}")]
    KeyStore(#[from] KeyStoreError),

    #[error("vault API error: {0}")]
    Vault(#[from] VaultApiError),

    #[error("key '{0}' already exists in the key store, refusing to initialize")]
    PreflightKeyExists(String),

    #[error("unseal progress was reset to 0 after submitting {submitted} key(s)")]
    ProgressReset { submitted: u32 },

    #[error("vault is still sealed after submitting {submitted} key(s)")]
    StillSealed { submitted: u32 },

    #[error("failed to initialize vault: {0}")]
    Init(#[source] Box<UnsealError>),
}

/// How the unsealer behaves for one run
#[derive(Clone)]
pub struct UnsealPolicy {
    /// Delay between attempts
    pub period: Duration,
    /// Attempt budget for the run
    pub attempts: u32,
    /// Initialize Vault when it is not yet initialized
    pub init: bool,
    /// Persist the root token under `vault-root`
    pub store_root_token: bool,
    /// Replace the generated root token with this one after init
    pub init_root_token: Option<Zeroizing<String>>,
    pub secret_shares: u32,
    pub secret_threshold: u32,
}

impl Default for UnsealPolicy {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(30),
            attempts: DEFAULT_UNSEAL_ATTEMPTS,
            init: false,
            store_root_token: true,
            init_root_token: None,
            secret_shares: DEFAULT_SECRET_SHARES,
            secret_threshold: DEFAULT_SECRET_THRESHOLD,
        }
    }
}

impl std::fmt::Debug for UnsealPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnsealPolicy")
            .field("period", &self.period)
            .field("attempts", &self.attempts)
            .field("init", &self.init)
            .field("store_root_token", &self.store_root_token)
            .field(
                "init_root_token",
                &self.init_root_token.as_ref().map(|_| "<redacted>"),
            )
            .field("secret_shares", &self.secret_shares)
            .field("secret_threshold", &self.secret_threshold)
            .finish()
    }
}

/// How a run ended
#[derive(Debug)]
pub enum RunOutcome {
    /// Vault was observed unsealed
    Unsealed { attempt: u32 },
    /// Budget spent; the final attempt submitted keys successfully
    Completed { attempts: u32 },
    /// Budget spent; the final attempt failed
    Exhausted { attempts: u32, last_error: UnsealError },
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Unsealed { .. } | RunOutcome::Completed { .. } => 0,
            RunOutcome::Exhausted { .. } => 1,
        }
    }
}

enum AttemptOutcome {
    AlreadyUnsealed,
    Submitted(u32),
}

pub struct Unsealer {
    vault: Arc<dyn VaultApi>,
    keystore: Arc<dyn KeyStore>,
    policy: UnsealPolicy,
}

impl Unsealer {
    pub fn new(vault: Arc<dyn VaultApi>, keystore: Arc<dyn KeyStore>, policy: UnsealPolicy) -> Self {
        Self {
            vault,
            keystore,
            policy,
        }
    }

    /// Run attempts until Vault is unsealed or the budget is spent.
    ///
    /// Only an initialization failure is returned as `Err`.
    pub async fn run(&self) -> Result<RunOutcome, UnsealError> {
        if self.policy.init {
            self.initialize()
                .await
                .map_err(|e| UnsealError::Init(Box::new(e)))?;
        }

        let attempts = self.policy.attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(self.policy.period).await;
            }

            match self.attempt().await {
                Ok(AttemptOutcome::AlreadyUnsealed) => {
                    metrics::increment_unseal_attempts("unsealed");
                    info!("Vault is unsealed (attempt {}/{})", attempt, attempts);
                    return Ok(RunOutcome::Unsealed { attempt });
                }
                Ok(AttemptOutcome::Submitted(submitted)) => {
                    metrics::increment_unseal_attempts("submitted");
                    info!(
                        "Submitted {} unseal key(s) (attempt {}/{})",
                        submitted, attempt, attempts
                    );
                    last_error = None;
                }
                Err(e) => {
                    metrics::increment_unseal_attempts("failed");
                    error!("Unseal attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = Some(e);
                }
            }
        }

        Ok(match last_error {
            None => RunOutcome::Completed { attempts },
            Some(last_error) => RunOutcome::Exhausted {
                attempts,
                last_error,
            },
        })
    }

    async fn attempt(&self) -> Result<AttemptOutcome, UnsealError> {
        let status = self.vault.seal_status().await?;
        if !status.sealed {
            return Ok(AttemptOutcome::AlreadyUnsealed);
        }
        info!(
            "Vault is sealed (progress {}/{}), submitting unseal keys",
            status.progress, status.threshold
        );
        self.submit_keys().await.map(AttemptOutcome::Submitted)
    }

    /// Submit stored shares in order until Vault reports unsealed.
    async fn submit_keys(&self) -> Result<u32, UnsealError> {
        let mut submitted = 0;
        for index in 0..self.policy.secret_shares {
            let name = unseal_key_name(index);
            let raw = self.keystore.get(&name).await?;
            let key = std::str::from_utf8(&raw).map_err(|e| KeyStoreError::Encoding {
                key: name.clone(),
                reason: e.to_string(),
            })?;

            let status = self.vault.unseal(key).await?;
            submitted += 1;
            if !status.sealed {
                return Ok(submitted);
            }
            if status.progress == 0 {
                return Err(UnsealError::ProgressReset { submitted });
            }
        }
        Err(UnsealError::StillSealed { submitted })
    }

    async fn initialize(&self) -> Result<(), UnsealError> {
        self.keystore.test(TEST_KEY).await?;

        if self.vault.init_status().await? {
            info!("Vault is already initialized");
            return Ok(());
        }

        self.ensure_no_existing_keys().await?;

        info!(
            "Initializing Vault with {} shares, threshold {}",
            self.policy.secret_shares, self.policy.secret_threshold
        );
        let response = self
            .vault
            .init(&InitRequest {
                secret_shares: self.policy.secret_shares,
                secret_threshold: self.policy.secret_threshold,
            })
            .await?;

        for (index, key) in (0u32..).zip(response.keys.iter()) {
            let name = unseal_key_name(index);
            self.keystore.set(&name, key.as_bytes()).await?;
            info!("Unseal key stored in key store: {}", name);
        }

        let mut root_token = Zeroizing::new(response.root_token.clone());
        if let Some(init_root_token) = &self.policy.init_root_token {
            info!("Unsealing Vault to set up the configured root token");
            self.submit_keys().await?;
            self.vault
                .create_token(&response.root_token, init_root_token)
                .await?;
            self.vault.revoke_self(&response.root_token).await?;
            root_token = init_root_token.clone();
            info!("Generated root token revoked and replaced");
        }

        if self.policy.store_root_token {
            self.keystore
                .set(ROOT_TOKEN_KEY, root_token.as_bytes())
                .await?;
            info!("Root token stored in key store: {}", ROOT_TOKEN_KEY);
        } else {
            warn!("Root token will not be stored in the key store");
        }

        Ok(())
    }

    async fn ensure_no_existing_keys(&self) -> Result<(), UnsealError> {
        let names = std::iter::once(ROOT_TOKEN_KEY.to_string())
            .chain((0..self.policy.secret_shares).map(unseal_key_name));
        for name in names {
            match self.keystore.get(&name).await {
                Ok(_) => return Err(UnsealError::PreflightKeyExists(name)),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::memory::MemoryKeyStore;
    use crate::keystore::MockKeyStore;
    use crate::vault::{InitResponse, MockVaultApi, SealStatus};

    fn sealed(progress: u32) -> SealStatus {
        SealStatus {
            sealed: true,
            initialized: true,
            threshold: 3,
            shares: 5,
            progress,
        }
    }

    fn unsealed() -> SealStatus {
        SealStatus {
            sealed: false,
            initialized: true,
            threshold: 3,
            shares: 5,
            progress: 0,
        }
    }

    /// Unseal responses for a 3-of-n threshold, starting from zero progress.
    fn threshold_responses(vault: &mut MockVaultApi, times: usize) {
        let mut calls = 0u32;
        vault.expect_unseal().times(times).returning(move |_| {
            calls += 1;
            if calls % 3 == 0 {
                Ok(unsealed())
            } else {
                Ok(sealed(calls % 3))
            }
        });
    }

    fn policy() -> UnsealPolicy {
        UnsealPolicy {
            period: Duration::from_secs(30),
            ..UnsealPolicy::default()
        }
    }

    async fn seed_shares(store: &MemoryKeyStore, count: u32) {
        for index in 0..count {
            store
                .set(&unseal_key_name(index), format!("share-{index}").as_bytes())
                .await
                .unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_persists_every_share_then_unseals() {
        let store = Arc::new(MemoryKeyStore::new());
        let mut vault = MockVaultApi::new();
        vault.expect_init_status().times(1).returning(|| Ok(false));
        vault
            .expect_init()
            .times(1)
            .withf(|request| request.secret_shares == 5 && request.secret_threshold == 3)
            .returning(|_| {
                Ok(InitResponse {
                    keys: (0..5).map(|i| format!("share-{i}")).collect(),
                    keys_base64: vec![],
                    root_token: "s.generated".to_string(),
                })
            });
        let mut statuses = vec![unsealed(), sealed(0)];
        vault
            .expect_seal_status()
            .times(2)
            .returning(move || Ok(statuses.pop().unwrap()));
        threshold_responses(&mut vault, 3);

        let unsealer = Unsealer::new(
            Arc::new(vault),
            store.clone(),
            UnsealPolicy {
                init: true,
                ..policy()
            },
        );
        let outcome = unsealer.run().await.unwrap();

        assert!(matches!(outcome, RunOutcome::Unsealed { attempt: 2 }));
        assert_eq!(outcome.exit_code(), 0);
        // five shares plus the root token
        assert_eq!(store.len().unwrap(), 6);
        assert_eq!(
            store.get(ROOT_TOKEN_KEY).await.unwrap().as_slice(),
            b"s.generated"
        );
        assert_eq!(
            store.get(&unseal_key_name(4)).await.unwrap().as_slice(),
            b"share-4"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_unsealed_submits_nothing() {
        let store = Arc::new(MemoryKeyStore::new());
        let mut vault = MockVaultApi::new();
        vault.expect_seal_status().times(1).returning(|| Ok(unsealed()));
        vault.expect_unseal().never();
        vault.expect_init().never();

        let unsealer = Unsealer::new(Arc::new(vault), store, policy());
        let outcome = unsealer.run().await.unwrap();

        assert!(matches!(outcome, RunOutcome::Unsealed { attempt: 1 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_is_spent_when_seal_status_keeps_failing() {
        let store = Arc::new(MemoryKeyStore::new());
        let mut vault = MockVaultApi::new();
        vault.expect_seal_status().times(4).returning(|| {
            Err(VaultApiError::Status {
                path: "/v1/sys/seal-status".to_string(),
                status: 503,
                message: "connection refused".to_string(),
            })
        });
        vault.expect_unseal().never();

        let unsealer = Unsealer::new(Arc::new(vault), store, policy());
        let start = tokio::time::Instant::now();
        let outcome = unsealer.run().await.unwrap();

        assert!(matches!(outcome, RunOutcome::Exhausted { attempts: 4, .. }));
        assert_ne!(outcome.exit_code(), 0);
        // three pauses between four attempts
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(90));
        assert!(elapsed < Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_reset_fails_the_attempt() {
        let store = Arc::new(MemoryKeyStore::new());
        seed_shares(&store, 5).await;
        let mut vault = MockVaultApi::new();
        vault.expect_seal_status().times(1).returning(|| Ok(sealed(0)));
        vault.expect_unseal().times(2).returning({
            let mut calls = 0;
            move |_| {
                calls += 1;
                Ok(sealed(if calls == 1 { 1 } else { 0 }))
            }
        });

        let unsealer = Unsealer::new(
            Arc::new(vault),
            store,
            UnsealPolicy {
                attempts: 1,
                ..policy()
            },
        );
        match unsealer.run().await.unwrap() {
            RunOutcome::Exhausted { last_error, .. } => {
                assert!(matches!(last_error, UnsealError::ProgressReset { submitted: 2 }));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_share_fails_the_attempt() {
        let store = Arc::new(MemoryKeyStore::new());
        seed_shares(&store, 1).await;
        let mut vault = MockVaultApi::new();
        vault.expect_seal_status().times(1).returning(|| Ok(sealed(0)));
        vault.expect_unseal().times(1).returning(|_| Ok(sealed(1)));

        let unsealer = Unsealer::new(
            Arc::new(vault),
            store,
            UnsealPolicy {
                attempts: 1,
                ..policy()
            },
        );
        match unsealer.run().await.unwrap() {
            RunOutcome::Exhausted { last_error, .. } => {
                assert!(matches!(
                    last_error,
                    UnsealError::KeyStore(KeyStoreError::NotFound { .. })
                ));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_attempt_submitting_keys_exits_zero() {
        let store = Arc::new(MemoryKeyStore::new());
        seed_shares(&store, 5).await;
        let mut vault = MockVaultApi::new();
        vault.expect_seal_status().times(1).returning(|| Ok(sealed(0)));
        threshold_responses(&mut vault, 3);

        let unsealer = Unsealer::new(
            Arc::new(vault),
            store,
            UnsealPolicy {
                attempts: 1,
                ..policy()
            },
        );
        let outcome = unsealer.run().await.unwrap();
        assert!(matches!(outcome, RunOutcome::Completed { attempts: 1 }));
        assert_eq!(outcome.exit_code(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_refuses_to_overwrite_existing_keys() {
        let store = Arc::new(MemoryKeyStore::new());
        store.set(&unseal_key_name(2), b"stale").await.unwrap();
        let mut vault = MockVaultApi::new();
        vault.expect_init_status().times(1).returning(|| Ok(false));
        vault.expect_init().never();
        vault.expect_seal_status().never();

        let unsealer = Unsealer::new(
            Arc::new(vault),
            store,
            UnsealPolicy {
                init: true,
                ..policy()
            },
        );
        let err = unsealer.run().await.unwrap_err();
        match err {
            UnsealError::Init(inner) => {
                assert!(matches!(*inner, UnsealError::PreflightKeyExists(ref key) if key == "vault-unseal-2"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_aborts_on_unreachable_key_store() {
        let mut store = MockKeyStore::new();
        store
            .expect_test()
            .times(1)
            .returning(|key| Err(KeyStoreError::backend("test", key, "connection refused")));
        store.expect_set().never();
        let mut vault = MockVaultApi::new();
        vault.expect_init_status().never();
        vault.expect_init().never();

        let unsealer = Unsealer::new(
            Arc::new(vault),
            Arc::new(store),
            UnsealPolicy {
                init: true,
                ..policy()
            },
        );
        assert!(matches!(
            unsealer.run().await.unwrap_err(),
            UnsealError::Init(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_initialized_skips_init() {
        let store = Arc::new(MemoryKeyStore::new());
        let mut vault = MockVaultApi::new();
        vault.expect_init_status().times(1).returning(|| Ok(true));
        vault.expect_init().never();
        vault.expect_seal_status().times(1).returning(|| Ok(unsealed()));

        let unsealer = Unsealer::new(
            Arc::new(vault),
            store.clone(),
            UnsealPolicy {
                init: true,
                ..policy()
            },
        );
        unsealer.run().await.unwrap();
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_root_token_replaces_generated_one() {
        let store = Arc::new(MemoryKeyStore::new());
        let mut vault = MockVaultApi::new();
        vault.expect_init_status().times(1).returning(|| Ok(false));
        vault.expect_init().times(1).returning(|_| {
            Ok(InitResponse {
                keys: (0..5).map(|i| format!("share-{i}")).collect(),
                keys_base64: vec![],
                root_token: "s.generated".to_string(),
            })
        });
        threshold_responses(&mut vault, 3);
        vault
            .expect_create_token()
            .times(1)
            .withf(|auth, id| auth == "s.generated" && id == "s.custom")
            .returning(|_, _| Ok(()));
        vault
            .expect_revoke_self()
            .times(1)
            .withf(|token| token == "s.generated")
            .returning(|_| Ok(()));
        vault.expect_seal_status().times(1).returning(|| Ok(unsealed()));

        let unsealer = Unsealer::new(
            Arc::new(vault),
            store.clone(),
            UnsealPolicy {
                init: true,
                init_root_token: Some(Zeroizing::new("s.custom".to_string())),
                ..policy()
            },
        );
        unsealer.run().await.unwrap();
        assert_eq!(
            store.get(ROOT_TOKEN_KEY).await.unwrap().as_slice(),
            b"s.custom"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_root_token_not_stored_when_disabled() {
        let store = Arc::new(MemoryKeyStore::new());
        let mut vault = MockVaultApi::new();
        vault.expect_init_status().times(1).returning(|| Ok(false));
        vault.expect_init().times(1).returning(|_| {
            Ok(InitResponse {
                keys: vec!["share-0".to_string()],
                keys_base64: vec![],
                root_token: "s.generated".to_string(),
            })
        });
        vault.expect_seal_status().times(1).returning(|| Ok(unsealed()));

        let unsealer = Unsealer::new(
            Arc::new(vault),
            store.clone(),
            UnsealPolicy {
                init: true,
                store_root_token: false,
                secret_shares: 1,
                secret_threshold: 1,
                ..policy()
            },
        );
        unsealer.run().await.unwrap();
        assert!(store.get(ROOT_TOKEN_KEY).await.unwrap_err().is_not_found());
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_policy_debug_hides_root_token() {
        let policy = UnsealPolicy {
            init_root_token: Some(Zeroizing::new("s.custom".to_string())),
            ..UnsealPolicy::default()
        };
        assert!(!format!("{policy:?}").contains("s.custom"));
    }
}
