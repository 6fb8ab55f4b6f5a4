// SPDX-License-Identifier: CC0-1.0

//! Descriptor-bound outputs
//!
//! An [`Output`] binds a parsed descriptor to a concrete instance: a
//! network, a derivation index (already substituted during expansion), the
//! hash preimages it can reveal and the set of pubkeys expected to sign.
//! From there it derives scripts and addresses, reports the temporal
//! constraints of its spending path, and assembles script satisfactions.

use std::collections::BTreeMap;
use std::str::FromStr;

use bitcoin::absolute::LockTime;
use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::{ecdsa, Address, Network, PublicKey, Script, ScriptBuf, Sequence};
use miniscript::{
    DefiniteDescriptorKey, Descriptor as MsDescriptor, DescriptorPublicKey,
};

use crate::expand::{self, ExpandRequest, Expansion, Payment};
use crate::satisfy::{self, PartialSigSatisfier, Preimage, SignerAssets, TimeConstraints};
use crate::Error;

/// Construction parameters for an [`Output`].
#[derive(Clone, Debug)]
pub struct OutputParams<'a> {
    /// The descriptor string.
    pub descriptor: Option<&'a str>,
    /// Deprecated spelling of `descriptor`; supplying both is an error.
    pub expression: Option<&'a str>,
    /// Index substituted for `*` in a ranged descriptor.
    pub index: Option<u32>,
    /// Reject descriptors without a trailing `#checksum`.
    pub checksum_required: bool,
    /// Admit arbitrary miniscript inside `sh(...)`.
    pub allow_miniscript_in_p2sh: bool,
    /// Network used for addresses and key version bytes.
    pub network: Network,
    /// Hash preimages this output can reveal when spending.
    pub preimages: Vec<Preimage>,
    /// Serialized pubkeys expected to sign. Defaults to every key of the
    /// expansion map, or to the scriptPubKey bytes for `addr(...)`.
    pub signers_pub_keys: Option<Vec<Vec<u8>>>,
}

impl<'a> OutputParams<'a> {
    /// Parameters with default options for the given descriptor on
    /// mainnet.
    pub fn new(descriptor: &'a str) -> Self {
        OutputParams {
            descriptor: Some(descriptor),
            ..Default::default()
        }
    }
}

impl Default for OutputParams<'_> {
    fn default() -> Self {
        OutputParams {
            descriptor: None,
            expression: None,
            index: None,
            checksum_required: false,
            allow_miniscript_in_p2sh: false,
            network: Network::Bitcoin,
            preimages: Vec::new(),
            signers_pub_keys: None,
        }
    }
}

/// A complete unlocking package for one input: the witness stack and the
/// scriptSig, each already carrying the witness/redeem script its form
/// requires.
#[derive(Clone, Debug)]
pub struct ScriptSatisfaction {
    /// Witness stack; empty for pre-segwit outputs.
    pub witness: Vec<Vec<u8>>,
    /// Complete scriptSig; empty for native segwit outputs.
    pub script_sig: ScriptBuf,
}

/// A descriptor bound to one concrete output instance.
///
/// Immutable after construction; every derived artifact is a pure function
/// of the construction parameters.
#[derive(Clone, Debug)]
pub struct Output {
    network: Network,
    expansion: Expansion,
    payment: Payment,
    signers_pub_keys: Vec<Vec<u8>>,
    preimages: Vec<Preimage>,
    /// Concretized descriptor, only for miniscript shells.
    compiled: Option<MsDescriptor<DefiniteDescriptorKey>>,
    /// Locks of the spending path planned for the signer set. `None` when
    /// there is no miniscript or no plan exists for the signers.
    time_constraints: Option<TimeConstraints>,
}

impl Output {
    /// Expand a descriptor and bind it to a concrete instance.
    ///
    /// Fails when the expansion produces no scripts: an unparseable
    /// descriptor, or a ranged one without an index.
    pub fn new(secp: &Secp256k1<All>, params: OutputParams) -> Result<Output, Error> {
        let request = ExpandRequest {
            descriptor: params.descriptor,
            expression: params.expression,
            index: params.index,
            checksum_required: params.checksum_required,
            allow_miniscript_in_p2sh: params.allow_miniscript_in_p2sh,
            network: params.network,
        };
        let expansion = expand::expand(secp, &request)?;
        let payment = expansion.payment.clone().ok_or(Error::MissingIndex)?;

        let signers_pub_keys = match params.signers_pub_keys {
            Some(signers) => signers,
            None => match expansion.expansion_map {
                Some(ref map) => {
                    let mut signers = Vec::with_capacity(map.len());
                    for (_, info) in map.iter() {
                        signers.push(info.pubkey.ok_or(Error::MissingIndex)?.to_bytes());
                    }
                    signers
                }
                None => vec![payment.script_pubkey.to_bytes()],
            },
        };

        let compiled = match (&expansion.expanded_expression, &expansion.miniscript) {
            (Some(expanded), Some(_)) => {
                let map = expansion
                    .expansion_map
                    .as_ref()
                    .expect("miniscript expansions carry a map");
                let concrete = map.substitute(expanded)?;
                let descriptor = MsDescriptor::<DescriptorPublicKey>::from_str(&concrete)?;
                Some(
                    descriptor
                        .at_derivation_index(0)
                        .map_err(|e| Error::InvalidDescriptor(e.to_string()))?,
                )
            }
            _ => None,
        };

        let time_constraints = compiled.as_ref().and_then(|descriptor| {
            satisfy::plan_time_constraints(
                descriptor,
                &SignerAssets {
                    signers: &signers_pub_keys,
                    preimages: &params.preimages,
                    constraints: None,
                },
            )
            .ok()
        });

        Ok(Output {
            network: params.network,
            expansion,
            payment,
            signers_pub_keys,
            preimages: params.preimages,
            compiled,
            time_constraints,
        })
    }

    /// The payment record: scriptPubKey plus address when the form has
    /// one.
    pub fn payment(&self) -> &Payment {
        &self.payment
    }

    /// The address of this output; p2pk outputs have none.
    pub fn address(&self) -> Result<Address, Error> {
        self.payment
            .address
            .clone()
            .ok_or_else(|| Error::InvalidAddress("this output form has no address".to_string()))
    }

    /// The locking script.
    pub fn script_pubkey(&self) -> &Script {
        &self.payment.script_pubkey
    }

    /// The witness script, for `wsh(...)` forms.
    pub fn witness_script(&self) -> Option<&Script> {
        self.expansion.witness_script.as_deref()
    }

    /// The redeem script, for `sh(...)`-wrapped forms.
    pub fn redeem_script(&self) -> Option<&Script> {
        self.expansion.redeem_script.as_deref()
    }

    /// The network this output was derived for.
    pub fn network(&self) -> Network {
        self.network
    }

    /// Whether the output is segwit; unknown for `addr(...)`.
    pub fn is_segwit(&self) -> Option<bool> {
        self.expansion.is_segwit
    }

    /// The nSequence the planned spending path requires, if it uses a
    /// relative timelock. Undefined for non-miniscript descriptors.
    pub fn sequence(&self) -> Option<Sequence> {
        self.time_constraints.as_ref().and_then(|tc| tc.n_sequence)
    }

    /// The nLockTime the planned spending path requires, if it uses an
    /// absolute timelock. Undefined for non-miniscript descriptors.
    pub fn lock_time(&self) -> Option<LockTime> {
        self.time_constraints.as_ref().and_then(|tc| tc.n_lock_time)
    }

    /// The expansion this output was built from.
    pub fn expansion(&self) -> &Expansion {
        &self.expansion
    }

    /// Assemble the unlocking data for this output from a set of
    /// signatures (keyed the way a PSBT input's `partial_sigs` map is).
    ///
    /// Only signatures from this output's signer set are used, and the
    /// satisfier is pinned to the temporal constraints planned for that
    /// set, so a different signature mix cannot shift nLockTime or
    /// nSequence. Fails on non-miniscript descriptors and when no
    /// satisfaction exists.
    pub fn script_satisfaction(
        &self,
        signatures: &BTreeMap<PublicKey, ecdsa::Signature>,
    ) -> Result<ScriptSatisfaction, Error> {
        let descriptor = self.compiled.as_ref().ok_or_else(|| {
            Error::InvalidDescriptor(
                "script satisfactions exist only for miniscript descriptors".to_string(),
            )
        })?;
        let constraints = self.time_constraints.ok_or(Error::SatisfactionUnavailable)?;

        let from_signers: BTreeMap<PublicKey, ecdsa::Signature> = signatures
            .iter()
            .filter(|(pk, _)| self.signers_pub_keys.iter().any(|s| s[..] == pk.to_bytes()[..]))
            .map(|(pk, sig)| (*pk, sig.clone()))
            .collect();
        if from_signers.is_empty() {
            return Err(Error::SatisfactionUnavailable);
        }

        let satisfier = PartialSigSatisfier {
            signatures: &from_signers,
            preimages: &self.preimages,
            constraints: &constraints,
        };
        let (witness, script_sig) = descriptor
            .get_satisfaction(&satisfier)
            .map_err(|_| Error::SatisfactionUnavailable)?;
        Ok(ScriptSatisfaction {
            witness,
            script_sig,
        })
    }

    /// The sequence a transaction input spending this output must use:
    /// the planned relative timelock when there is one, otherwise the
    /// locktime-enabling value when an absolute timelock is in play,
    /// otherwise final.
    pub(crate) fn expected_sequence(&self) -> Sequence {
        if let Some(sequence) = self.sequence() {
            return sequence;
        }
        match self.lock_time() {
            Some(lt) if lt.to_consensus_u32() != 0 => Sequence::ENABLE_LOCKTIME_NO_RBF,
            _ => Sequence::MAX,
        }
    }

    pub(crate) fn signers_pub_keys(&self) -> &[Vec<u8>] {
        &self.signers_pub_keys
    }

    pub(crate) fn has_miniscript(&self) -> bool {
        self.compiled.is_some()
    }
}
