// SPDX-License-Identifier: CC0-1.0

//! Satisfaction support
//!
//! Bridges an output's signer set, hash preimages and temporal constraints
//! to the miniscript planner and satisfier. The planner is queried with
//! key *availability* only, which fixes the spending path and its
//! locktime/sequence before any real signature exists; the satisfier is
//! then restricted to those temporal bounds so real signatures cannot
//! shift them.

use std::collections::BTreeMap;

use bitcoin::absolute::LockTime;
use bitcoin::hashes::{hash160, ripemd160, sha256, Hash};
use bitcoin::{ecdsa, PublicKey, Sequence};
use miniscript::hash256;
use miniscript::miniscript::satisfy::{Preimage32, Satisfier};
use miniscript::plan::AssetProvider;
use miniscript::{DefiniteDescriptorKey, Descriptor, ToPublicKey};

use crate::Error;

/// A hash preimage revealed when satisfying `sha256`, `hash256`,
/// `ripemd160` or `hash160` miniscript fragments.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Preimage {
    digest: Vec<u8>,
    preimage: [u8; 32],
}

impl Preimage {
    /// Preimage of a `sha256(H)` fragment.
    pub fn sha256(preimage: [u8; 32]) -> Self {
        Preimage {
            digest: sha256::Hash::hash(&preimage).to_byte_array().to_vec(),
            preimage,
        }
    }

    /// Preimage of a `hash256(H)` fragment.
    pub fn hash256(preimage: [u8; 32]) -> Self {
        Preimage {
            digest: hash256::Hash::hash(&preimage).to_byte_array().to_vec(),
            preimage,
        }
    }

    /// Preimage of a `ripemd160(H)` fragment.
    pub fn ripemd160(preimage: [u8; 32]) -> Self {
        Preimage {
            digest: ripemd160::Hash::hash(&preimage).to_byte_array().to_vec(),
            preimage,
        }
    }

    /// Preimage of a `hash160(H)` fragment.
    pub fn hash160(preimage: [u8; 32]) -> Self {
        Preimage {
            digest: hash160::Hash::hash(&preimage).to_byte_array().to_vec(),
            preimage,
        }
    }

    /// Pair an externally supplied digest with its preimage. The digest
    /// must be 20 or 32 bytes.
    pub fn from_digest(digest: Vec<u8>, preimage: [u8; 32]) -> Result<Self, Error> {
        if digest.len() != 20 && digest.len() != 32 {
            return Err(Error::InvalidDescriptor(format!(
                "preimage digest must be 20 or 32 bytes, got {}",
                digest.len()
            )));
        }
        Ok(Preimage { digest, preimage })
    }

    /// The digest bytes.
    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    /// The 32-byte preimage.
    pub fn preimage(&self) -> [u8; 32] {
        self.preimage
    }
}

/// The `nLockTime`/`nSequence` pair required by the spending path chosen
/// for an output's signer set.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TimeConstraints {
    /// Absolute locktime required by the path, if any.
    pub n_lock_time: Option<LockTime>,
    /// Relative locktime required by the path, if any.
    pub n_sequence: Option<Sequence>,
}

impl TimeConstraints {
    pub(crate) fn covers_older(&self, s: Sequence) -> bool {
        match self.n_sequence {
            Some(bound) => sequence_covers(bound, s),
            None => false,
        }
    }

    pub(crate) fn covers_after(&self, l: LockTime) -> bool {
        match self.n_lock_time {
            Some(bound) => locktime_covers(bound, l),
            None => false,
        }
    }
}

/// Whether setting nSequence to `bound` satisfies an `older(s)` fragment:
/// same lock unit and a value at least as large.
fn sequence_covers(bound: Sequence, s: Sequence) -> bool {
    if !bound.is_relative_lock_time() || !s.is_relative_lock_time() {
        return false;
    }
    if bound.is_height_locked() != s.is_height_locked() {
        return false;
    }
    (s.to_consensus_u32() & 0x0000_ffff) <= (bound.to_consensus_u32() & 0x0000_ffff)
}

/// Whether setting nLockTime to `bound` satisfies an `after(l)` fragment.
fn locktime_covers(bound: LockTime, l: LockTime) -> bool {
    match (bound, l) {
        (LockTime::Blocks(b), LockTime::Blocks(h)) => {
            h.to_consensus_u32() <= b.to_consensus_u32()
        }
        (LockTime::Seconds(b), LockTime::Seconds(t)) => {
            t.to_consensus_u32() <= b.to_consensus_u32()
        }
        _ => false,
    }
}

/// What a signer set *could* provide, without any actual signature.
///
/// Planning against this provider selects the cheapest spending path
/// reachable with the given keys and preimages; with `constraints` unset
/// every timelock is acceptable.
pub(crate) struct SignerAssets<'a> {
    pub signers: &'a [Vec<u8>],
    pub preimages: &'a [Preimage],
    pub constraints: Option<&'a TimeConstraints>,
}

impl SignerAssets<'_> {
    fn has_digest(&self, digest: &[u8]) -> bool {
        self.preimages.iter().any(|p| p.digest() == digest)
    }
}

impl AssetProvider<DefiniteDescriptorKey> for SignerAssets<'_> {
    fn provider_lookup_ecdsa_sig(&self, pk: &DefiniteDescriptorKey) -> bool {
        let bytes = pk.to_public_key().to_bytes();
        self.signers.iter().any(|s| s[..] == bytes[..])
    }

    fn provider_lookup_sha256(&self, hash: &sha256::Hash) -> bool {
        self.has_digest(&hash.to_byte_array())
    }

    fn provider_lookup_hash256(&self, hash: &hash256::Hash) -> bool {
        self.has_digest(&hash.to_byte_array())
    }

    fn provider_lookup_ripemd160(&self, hash: &ripemd160::Hash) -> bool {
        self.has_digest(&hash.to_byte_array())
    }

    fn provider_lookup_hash160(&self, hash: &hash160::Hash) -> bool {
        self.has_digest(&hash.to_byte_array())
    }

    fn check_older(&self, s: Sequence) -> bool {
        match self.constraints {
            None => true,
            Some(tc) => tc.covers_older(s),
        }
    }

    fn check_after(&self, l: LockTime) -> bool {
        match self.constraints {
            None => true,
            Some(tc) => tc.covers_after(l),
        }
    }
}

/// Satisfier over a PSBT input's `partial_sigs` map, the output's
/// preimages, and the precomputed temporal bounds.
pub(crate) struct PartialSigSatisfier<'a> {
    pub signatures: &'a BTreeMap<PublicKey, ecdsa::Signature>,
    pub preimages: &'a [Preimage],
    pub constraints: &'a TimeConstraints,
}

impl PartialSigSatisfier<'_> {
    fn find_preimage(&self, digest: &[u8]) -> Option<Preimage32> {
        self.preimages
            .iter()
            .find(|p| p.digest() == digest)
            .map(|p| p.preimage())
    }
}

impl Satisfier<DefiniteDescriptorKey> for PartialSigSatisfier<'_> {
    fn lookup_ecdsa_sig(&self, pk: &DefiniteDescriptorKey) -> Option<ecdsa::Signature> {
        self.signatures.get(&pk.to_public_key()).cloned()
    }

    fn lookup_raw_pkh_ecdsa_sig(
        &self,
        pkh: &hash160::Hash,
    ) -> Option<(PublicKey, ecdsa::Signature)> {
        self.signatures
            .iter()
            .find(|(pk, _)| hash160::Hash::hash(&pk.to_bytes()) == *pkh)
            .map(|(pk, sig)| (*pk, sig.clone()))
    }

    fn lookup_sha256(&self, hash: &sha256::Hash) -> Option<Preimage32> {
        self.find_preimage(&hash.to_byte_array())
    }

    fn lookup_hash256(&self, hash: &hash256::Hash) -> Option<Preimage32> {
        self.find_preimage(&hash.to_byte_array())
    }

    fn lookup_ripemd160(&self, hash: &ripemd160::Hash) -> Option<Preimage32> {
        self.find_preimage(&hash.to_byte_array())
    }

    fn lookup_hash160(&self, hash: &hash160::Hash) -> Option<Preimage32> {
        self.find_preimage(&hash.to_byte_array())
    }

    fn check_older(&self, s: Sequence) -> bool {
        self.constraints.covers_older(s)
    }

    fn check_after(&self, l: LockTime) -> bool {
        self.constraints.covers_after(l)
    }
}

/// Plan the spending path for the given assets and report its temporal
/// constraints.
pub(crate) fn plan_time_constraints(
    descriptor: &Descriptor<DefiniteDescriptorKey>,
    assets: &SignerAssets,
) -> Result<TimeConstraints, Error> {
    let plan = descriptor
        .clone()
        .plan(assets)
        .map_err(|_| Error::SatisfactionUnavailable)?;
    Ok(TimeConstraints {
        n_lock_time: plan.absolute_timelock,
        n_sequence: plan.relative_timelock,
    })
}
