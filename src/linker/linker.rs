//! Account linker.
//!
//! # Responsibilities
//! - Resolve or create the external account for an internal account
//! - Advance the confirmed sequence, never backwards
//! - Establish trustlines for the configured assets
//! - Track which transactions reference a link, and quarantine links that
//!   need manual reconciliation
//!
//! # Design Decisions
//! - Every mutation is persisted before the call returns
//! - Link creation is serialized per internal account; trustline
//!   transactions are serialized on the funding account, whose sequence
//!   they consume
//! - A pending trustline is resolved by querying its recorded hash before
//!   anything is resubmitted

use std::sync::Arc;

use crate::builder::TransactionBuilder;
use crate::config::VersionedConfiguration;
use crate::engine::AccountLocks;
use crate::error::{BridgeError, BridgeResult};
use crate::linker::link::{AccountLink, TrustlineStatus};
use crate::linker::provision::AccountProvisioner;
use crate::network::{ExternalTxStatus, NetworkClient, NetworkError, SubmitOutcome};
use crate::resilience::timeouts::with_deadline;
use crate::store::BridgeStore;

pub struct AccountLinker {
    store: Arc<dyn BridgeStore>,
    network: Arc<dyn NetworkClient>,
    provisioner: Arc<dyn AccountProvisioner>,
    builder: Arc<TransactionBuilder>,
    locks: AccountLocks,
}

impl AccountLinker {
    pub fn new(
        store: Arc<dyn BridgeStore>,
        network: Arc<dyn NetworkClient>,
        provisioner: Arc<dyn AccountProvisioner>,
        builder: Arc<TransactionBuilder>,
        locks: AccountLocks,
    ) -> Self {
        Self {
            store,
            network,
            provisioner,
            builder,
            locks,
        }
    }

    pub fn get_link(&self, internal_account_id: &str) -> BridgeResult<Option<AccountLink>> {
        Ok(self.store.get_link(internal_account_id)?)
    }

    fn require_link(&self, internal_account_id: &str) -> BridgeResult<AccountLink> {
        self.store
            .get_link(internal_account_id)?
            .ok_or_else(|| BridgeError::linking(internal_account_id, "no link for account"))
    }

    /// Return the link for `internal_account_id`, creating it on first use.
    pub async fn resolve_or_create_link(
        &self,
        internal_account_id: &str,
        snapshot: &VersionedConfiguration,
    ) -> BridgeResult<AccountLink> {
        if let Some(link) = self.store.get_link(internal_account_id)? {
            return Ok(link);
        }

        let _guard = self.locks.lock(&format!("link:{}", internal_account_id)).await;
        if let Some(link) = self.store.get_link(internal_account_id)? {
            return Ok(link);
        }

        let external_account_id = self.provisioner.provision(internal_account_id, snapshot).await?;
        if let Some(existing) = self.store.find_link_by_external(&external_account_id)? {
            return Err(BridgeError::linking(
                internal_account_id,
                format!(
                    "external account {} already linked to {}",
                    external_account_id, existing.internal_account_id
                ),
            ));
        }

        let sequence = match self.network.get_account_sequence(&external_account_id).await {
            Ok(sequence) => sequence,
            Err(NetworkError::AccountNotFound(_)) => {
                return Err(BridgeError::linking(
                    internal_account_id,
                    format!("external account {} does not exist", external_account_id),
                ))
            }
            Err(e) => return Err(e.into()),
        };

        let link = AccountLink::new(internal_account_id, external_account_id, sequence);
        self.store.put_link(&link)?;
        tracing::info!(
            internal_account = %internal_account_id,
            account = %link.external_account_id,
            sequence = sequence,
            "Created account link"
        );
        Ok(link)
    }

    /// Record a confirmed sequence. Callers hold the account lock.
    pub fn advance_sequence(&self, external_account_id: &str, new_sequence: u64) -> BridgeResult<AccountLink> {
        let mut link = self
            .store
            .find_link_by_external(external_account_id)?
            .ok_or_else(|| BridgeError::linking(external_account_id, "no link for external account"))?;

        if new_sequence <= link.last_known_sequence {
            return Err(BridgeError::SequenceRegression {
                account: external_account_id.to_string(),
                stored: link.last_known_sequence,
                proposed: new_sequence,
            });
        }

        link.last_known_sequence = new_sequence;
        self.store.put_link(&link)?;
        tracing::debug!(account = %external_account_id, sequence = new_sequence, "Advanced link sequence");
        Ok(link)
    }

    /// Make sure the linked account trusts every configured asset.
    pub async fn establish_trustline_if_needed(
        &self,
        internal_account_id: &str,
        snapshot: &VersionedConfiguration,
    ) -> BridgeResult<AccountLink> {
        let link = self.require_link(internal_account_id)?;
        if link.trustline_status == TrustlineStatus::Established {
            return Ok(link);
        }
        if snapshot.assets.is_empty() {
            return self.set_trustline(link, TrustlineStatus::Established, None);
        }

        let _guard = self.locks.lock(&snapshot.funding_account_identity).await;
        let link = self.require_link(internal_account_id)?;
        if link.trustline_status == TrustlineStatus::Established {
            return Ok(link);
        }

        if let (TrustlineStatus::Pending, Some(hash)) = (link.trustline_status, link.trustline_tx_hash.clone()) {
            match self.network.get_transaction_status(&hash).await {
                Ok(ExternalTxStatus::Confirmed { .. }) => {
                    tracing::info!(account = %link.external_account_id, tx_hash = %hash, "Pending trustline confirmed");
                    return self.set_trustline(link, TrustlineStatus::Established, None);
                }
                Ok(ExternalTxStatus::Pending) => {
                    return Err(BridgeError::TransientNetwork(format!("trustline {} still pending", hash)));
                }
                Ok(ExternalTxStatus::NotFound) | Ok(ExternalTxStatus::Failed { .. }) => {
                    tracing::warn!(account = %link.external_account_id, tx_hash = %hash, "Pending trustline did not land, resubmitting");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let funding_sequence = self
            .network
            .get_account_sequence(&snapshot.funding_account_identity)
            .await?;
        let envelope = self.builder.build_trustline(&link, funding_sequence + 1, snapshot)?;
        let link = self.set_trustline(link, TrustlineStatus::Pending, Some(envelope.hash.clone()))?;

        match with_deadline(snapshot.submission_timeout(), self.network.submit(&envelope)).await {
            Ok(SubmitOutcome::Accepted { ledger, .. }) => {
                tracing::info!(
                    account = %link.external_account_id,
                    tx_hash = %envelope.hash,
                    ledger = ledger,
                    assets = snapshot.assets.len(),
                    "Trustline established"
                );
                self.set_trustline(link, TrustlineStatus::Established, None)
            }
            Ok(SubmitOutcome::Rejected(reason)) | Ok(SubmitOutcome::Failed(reason)) => {
                tracing::warn!(account = %link.external_account_id, reason = %reason, "Trustline rejected");
                self.set_trustline(link, TrustlineStatus::None, None)?;
                if reason.is_sequence_conflict() {
                    Err(BridgeError::TransientNetwork(format!("trustline rejected: {}", reason)))
                } else {
                    Err(BridgeError::linking(internal_account_id, format!("trustline rejected: {}", reason)))
                }
            }
            Err(e) => {
                tracing::warn!(account = %link.external_account_id, error = %e, "Trustline outcome unknown");
                Err(e.into())
            }
        }
    }

    fn set_trustline(
        &self,
        link: AccountLink,
        status: TrustlineStatus,
        hash: Option<String>,
    ) -> BridgeResult<AccountLink> {
        // Other fields may have moved while the trustline was in flight.
        let mut link = self.store.get_link(&link.internal_account_id)?.unwrap_or(link);
        link.trustline_status = status;
        link.trustline_tx_hash = hash;
        self.store.put_link(&link)?;
        Ok(link)
    }

    /// Reference a non-terminal transaction from its link.
    pub fn attach_pending(&self, internal_account_id: &str, event_id: &str) -> BridgeResult<AccountLink> {
        let mut link = self.require_link(internal_account_id)?;
        if link.pending_event_ids.insert(event_id.to_string()) {
            self.store.put_link(&link)?;
        }
        Ok(link)
    }

    /// Drop the reference once the transaction is terminal.
    pub fn detach_pending(&self, internal_account_id: &str, event_id: &str) -> BridgeResult<AccountLink> {
        let mut link = self.require_link(internal_account_id)?;
        if link.pending_event_ids.remove(event_id) {
            self.store.put_link(&link)?;
        }
        Ok(link)
    }

    pub fn quarantine(&self, internal_account_id: &str, reason: &str) -> BridgeResult<AccountLink> {
        let mut link = self.require_link(internal_account_id)?;
        if !link.quarantined {
            link.quarantined = true;
            self.store.put_link(&link)?;
            tracing::warn!(internal_account = %internal_account_id, reason = %reason, "Account quarantined");
        }
        Ok(link)
    }

    /// Lift a quarantine after manual review, adopting the network sequence
    /// when it is ahead of the recorded one.
    pub async fn release(&self, internal_account_id: &str) -> BridgeResult<AccountLink> {
        let link = self.require_link(internal_account_id)?;
        let network_sequence = self.network.get_account_sequence(&link.external_account_id).await?;

        let _guard = self.locks.lock(&link.external_account_id).await;
        let mut link = self.require_link(internal_account_id)?;
        if network_sequence > link.last_known_sequence {
            tracing::info!(
                account = %link.external_account_id,
                recorded = link.last_known_sequence,
                observed = network_sequence,
                "Adopting network sequence on release"
            );
            link.last_known_sequence = network_sequence;
        }
        link.quarantined = false;
        self.store.put_link(&link)?;
        tracing::info!(internal_account = %internal_account_id, "Account released from quarantine");
        Ok(link)
    }

    /// Delete a link that no pending transaction references.
    pub fn remove_link(&self, internal_account_id: &str) -> BridgeResult<AccountLink> {
        let link = self.require_link(internal_account_id)?;
        if link.has_pending() {
            return Err(BridgeError::linking(
                internal_account_id,
                format!("{} pending transactions reference this link", link.pending_event_ids.len()),
            ));
        }
        self.store.remove_link(internal_account_id)?;
        tracing::info!(internal_account = %internal_account_id, "Removed account link");
        Ok(link)
    }

    pub fn links(&self) -> BridgeResult<Vec<AccountLink>> {
        Ok(self.store.links()?)
    }
}

impl std::fmt::Debug for AccountLinker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountLinker").finish_non_exhaustive()
    }
}
