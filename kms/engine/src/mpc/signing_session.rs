//! State machine for an in-progress MPC signing request.
//!
//! `pending -> collecting -> {complete | expired | failed}`. Persistence is
//! the manager's job; these methods only mutate the record in hand.

use chrono::{DateTime, Duration, Utc};

use crate::crypto::random_id;
use crate::error::{KmsError, KmsResult};
use crate::mpc::types::{MpcChain, MpcSigningRequest, MpcWallet, SigningOptions, SigningStatus};

impl MpcSigningRequest {
    /// Opens a request against an active wallet. Required signatures = wallet threshold.
    /// A deadline past the representable range is rejected.
    pub fn open(
        wallet: &MpcWallet,
        chain: MpcChain,
        raw_transaction: Vec<u8>,
        opts: SigningOptions,
        default_expiry: Duration,
        now: DateTime<Utc>,
    ) -> KmsResult<Self> {
        let expires_at = now
            .checked_add_signed(opts.expires_in.unwrap_or(default_expiry))
            .ok_or_else(|| KmsError::InvalidRequestBody("signing expiry out of range".into()))?;
        Ok(MpcSigningRequest {
            id: random_id(),
            wallet_id: wallet.id.clone(),
            chain,
            raw_transaction,
            message: opts.message,
            status: SigningStatus::Pending,
            signatures: Default::default(),
            final_signature: None,
            required_sigs: wallet.threshold,
            collected_sigs: 0,
            created: now,
            expires_at,
            metadata: opts.metadata,
        })
    }

    /// Still accepting partial signatures.
    pub fn is_open(&self) -> bool {
        matches!(self.status, SigningStatus::Pending | SigningStatus::Collecting)
    }

    /// Deadline reached.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Moves an open request past its deadline to `expired`. Returns true when
    /// the status changed and the record must be written back.
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_open() && self.is_expired_at(now) {
            self.status = SigningStatus::Expired;
            true
        } else {
            false
        }
    }

    /// Rejects submissions against a request in a terminal state.
    pub fn ensure_accepting(&self) -> KmsResult<()> {
        match self.status {
            SigningStatus::Pending | SigningStatus::Collecting => Ok(()),
            SigningStatus::Complete => Err(KmsError::AlreadyComplete(self.id.clone())),
            SigningStatus::Expired => Err(KmsError::RequestExpired(self.id.clone())),
            SigningStatus::Failed => Err(KmsError::RequestFailed(self.id.clone())),
        }
    }

    /// Adds a partial signature from a participant. Returns true once the
    /// threshold is reached and the request moved to `complete`.
    pub fn record_partial(&mut self, wallet: &MpcWallet, node_id: &str, sig: Vec<u8>) -> KmsResult<bool> {
        self.ensure_accepting()?;
        if !wallet.has_participant(node_id) {
            return Err(KmsError::NotAParticipant {
                node_id: node_id.to_string(),
                wallet_id: wallet.id.clone(),
            });
        }
        if self.signatures.contains_key(node_id) {
            return Err(KmsError::DuplicateSignature(node_id.to_string()));
        }

        self.signatures.insert(node_id.to_string(), sig);
        self.collected_sigs += 1;
        self.status = SigningStatus::Collecting;
        if self.ready_to_aggregate() {
            self.status = SigningStatus::Complete;
            return Ok(true);
        }
        Ok(false)
    }

    /// Threshold met.
    pub fn ready_to_aggregate(&self) -> bool {
        self.collected_sigs >= self.required_sigs
    }

    /// Records the combined signature and forces `complete`.
    pub fn finalize(&mut self, signature: Vec<u8>) {
        self.final_signature = Some(signature);
        self.status = SigningStatus::Complete;
    }

    pub fn fail(&mut self) {
        self.status = SigningStatus::Failed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{KeyStatus, MpcScheme};

    fn wallet(threshold: usize, participants: &[&str]) -> MpcWallet {
        let now = Utc::now();
        MpcWallet {
            id: "w1".into(),
            name: "treasury".into(),
            key_type: MpcScheme::Ecdsa,
            threshold,
            total_parties: participants.len(),
            participant_ids: participants.iter().map(|s| s.to_string()).collect(),
            public_key: Some(vec![2; 33]),
            chain_addresses: Default::default(),
            status: KeyStatus::Active,
            org_id: String::new(),
            project_id: String::new(),
            metadata: Default::default(),
            created: now,
            updated: now,
        }
    }

    #[test]
    fn two_of_three_completes_on_second_partial() {
        let w = wallet(2, &["a", "b", "c"]);
        let mut req = MpcSigningRequest::open(
            &w,
            MpcChain::Ethereum,
            vec![0xde, 0xad],
            SigningOptions::default(),
            Duration::minutes(5),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(req.status, SigningStatus::Pending);

        assert!(!req.record_partial(&w, "a", vec![1]).unwrap());
        assert_eq!(req.status, SigningStatus::Collecting);
        assert!(req.signatures.contains_key("a"));

        assert!(req.record_partial(&w, "c", vec![3]).unwrap());
        assert_eq!(req.status, SigningStatus::Complete);
        assert!(matches!(
            req.record_partial(&w, "b", vec![2]),
            Err(KmsError::AlreadyComplete(_))
        ));
    }

    #[test]
    fn rejects_strangers_and_repeats() {
        let w = wallet(3, &["a", "b", "c"]);
        let mut req = MpcSigningRequest::open(
            &w,
            MpcChain::Bitcoin,
            vec![1],
            SigningOptions::default(),
            Duration::minutes(5),
            Utc::now(),
        )
        .unwrap();
        assert!(matches!(
            req.record_partial(&w, "mallory", vec![0]),
            Err(KmsError::NotAParticipant { .. })
        ));
        req.record_partial(&w, "a", vec![1]).unwrap();
        assert!(matches!(
            req.record_partial(&w, "a", vec![1]),
            Err(KmsError::DuplicateSignature(_))
        ));
        assert_eq!(req.collected_sigs, 1);
    }

    #[test]
    fn deadline_moves_open_request_to_expired() {
        let w = wallet(1, &["a"]);
        let start = Utc::now();
        let mut req = MpcSigningRequest::open(
            &w,
            MpcChain::Solana,
            vec![1],
            SigningOptions::default(),
            Duration::seconds(1),
            start,
        )
        .unwrap();
        assert!(!req.expire_if_due(start));
        assert!(req.expire_if_due(start + Duration::seconds(2)));
        assert!(matches!(req.ensure_accepting(), Err(KmsError::RequestExpired(_))));
        assert!(!req.expire_if_due(start + Duration::seconds(3)));
    }

    #[test]
    fn unrepresentable_deadline_is_rejected() {
        let w = wallet(1, &["a"]);
        let opts = SigningOptions {
            expires_in: Duration::try_days(1_000_000_000),
            ..SigningOptions::default()
        };
        let result = MpcSigningRequest::open(&w, MpcChain::Ethereum, vec![1], opts, Duration::minutes(5), Utc::now());
        assert!(matches!(result, Err(KmsError::InvalidRequestBody(_))));
    }
}
