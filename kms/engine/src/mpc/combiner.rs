use crate::error::KmsResult;
use crate::mpc::types::{MpcSigningRequest, MpcWallet};

/// Turns collected partial signatures into a final signature.
///
/// Called once, when a request reaches its threshold. `Ok(None)` leaves the
/// final signature to arrive later through `set_final_signature`; an error
/// marks the request `failed`.
pub trait SignatureCombiner: Send + Sync {
    fn combine(&self, wallet: &MpcWallet, request: &MpcSigningRequest) -> KmsResult<Option<Vec<u8>>>;
}

/// Combination happens off-box; this KMS only tracks the partials.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeferredCombiner;

impl SignatureCombiner for DeferredCombiner {
    fn combine(&self, _wallet: &MpcWallet, _request: &MpcSigningRequest) -> KmsResult<Option<Vec<u8>>> {
        Ok(None)
    }
}
