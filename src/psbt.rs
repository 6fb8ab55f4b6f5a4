// SPDX-License-Identifier: CC0-1.0

//! PSBT plumbing
//!
//! Consuming an [`Output`] as a transaction input: appending it to a PSBT
//! with the right sequence, locktime, scripts and key origins, and
//! finalizing that input once the partial signatures are in.

use bitcoin::psbt::{self, Psbt};
use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::sighash::SighashCache;
use bitcoin::{OutPoint, Transaction, TxIn, TxOut, Txid, Witness};
use log::warn;
use miniscript::psbt::PsbtExt;

use crate::output::Output;
use crate::Error;

/// Where the UTXO being spent comes from.
///
/// Supplying the full previous transaction is strongly preferred; without
/// it the txid (and, for segwit outputs, the value in satoshis) must be
/// given explicitly, and hardware signers may refuse to sign.
#[derive(Clone, Debug, Default)]
pub struct UtxoParams {
    /// Output index of the UTXO within its transaction.
    pub vout: u32,
    /// The full previous transaction.
    pub tx: Option<Transaction>,
    /// Txid of the previous transaction, when `tx` is not supplied.
    pub txid: Option<Txid>,
    /// Value of the UTXO in satoshis, when `tx` is not supplied.
    pub value: Option<u64>,
}

/// Handle for finalizing the PSBT input appended by
/// [`Output::update_psbt_as_input`]. Remembers the input index assigned at
/// append time.
#[must_use = "the appended input still needs to be finalized"]
#[derive(Debug)]
pub struct PsbtInputFinalizer<'a> {
    output: &'a Output,
    index: usize,
}

impl PsbtInputFinalizer<'_> {
    /// The index the input was appended at.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Finalize the input, validating its partial signatures first unless
    /// `validate` is off.
    pub fn finalize(
        &self,
        secp: &Secp256k1<All>,
        psbt: &mut Psbt,
        validate: bool,
    ) -> Result<(), Error> {
        self.output.finalize_psbt_input(secp, psbt, self.index, validate)
    }
}

impl Output {
    /// Append this UTXO as an input of the PSBT.
    ///
    /// Sets the input sequence to the value the planned spending path
    /// requires, raises the transaction locktime when the path needs one,
    /// and populates the witness/redeem scripts, the UTXO fields and the
    /// BIP32 key origins. Returns the finalizer handle for the appended
    /// input.
    pub fn update_psbt_as_input<'a>(
        &'a self,
        psbt: &mut Psbt,
        params: &UtxoParams,
    ) -> Result<PsbtInputFinalizer<'a>, Error> {
        let is_segwit = self.is_segwit().ok_or(Error::UnknownSegwit)?;

        let (txid, utxo) = match params.tx {
            Some(ref tx) => {
                let txid = tx.txid();
                if let Some(given) = params.txid {
                    if given != txid {
                        return Err(Error::InputShapeMismatch(format!(
                            "supplied txid {} does not match the supplied transaction {}",
                            given, txid
                        )));
                    }
                }
                let txout = tx.output.get(params.vout as usize).ok_or_else(|| {
                    Error::InputShapeMismatch(format!(
                        "transaction {} has no output {}",
                        txid, params.vout
                    ))
                })?;
                if txout.script_pubkey != *self.script_pubkey() {
                    return Err(Error::InputShapeMismatch(format!(
                        "output {}:{} does not pay to this descriptor",
                        txid, params.vout
                    )));
                }
                if let Some(value) = params.value {
                    if value != txout.value {
                        return Err(Error::InputShapeMismatch(format!(
                            "supplied value {} does not match the utxo value {}",
                            value, txout.value
                        )));
                    }
                }
                (txid, Some(txout.clone()))
            }
            None => {
                warn!(
                    "psbt input added without the full previous transaction; \
                     hardware signers may refuse to sign it"
                );
                if !is_segwit {
                    return Err(Error::MissingNonWitnessUtxo);
                }
                let txid = params.txid.ok_or_else(|| {
                    Error::InputShapeMismatch(
                        "either the previous transaction or its txid is required".to_string(),
                    )
                })?;
                let utxo = params.value.map(|value| TxOut {
                    value,
                    script_pubkey: self.script_pubkey().to_owned(),
                });
                (txid, utxo)
            }
        };
        if is_segwit && utxo.is_none() {
            return Err(Error::InputShapeMismatch(
                "a segwit input needs the previous transaction or the utxo value".to_string(),
            ));
        }

        // An absolute timelock binds the whole transaction: raise the
        // locktime when needed, never lower it.
        if let Some(lock) = self.lock_time() {
            let current = psbt.unsigned_tx.lock_time;
            if current.to_consensus_u32() == 0 {
                psbt.unsigned_tx.lock_time = lock;
            } else if current.is_block_height() != lock.is_block_height() {
                return Err(Error::InputShapeMismatch(
                    "required locktime unit conflicts with the transaction locktime".to_string(),
                ));
            } else if current.to_consensus_u32() < lock.to_consensus_u32() {
                psbt.unsigned_tx.lock_time = lock;
            }
        }

        psbt.unsigned_tx.input.push(TxIn {
            previous_output: OutPoint::new(txid, params.vout),
            sequence: self.expected_sequence(),
            ..Default::default()
        });

        let mut input = psbt::Input::default();
        if is_segwit {
            input.witness_utxo = utxo;
        }
        input.non_witness_utxo = params.tx.clone();
        input.witness_script = self.witness_script().map(|s| s.to_owned());
        input.redeem_script = self.redeem_script().map(|s| s.to_owned());
        if let Some(map) = self.expansion().expansion_map.as_ref() {
            for (_, info) in map.iter() {
                if let (Some(pubkey), Some(source)) = (info.pubkey, info.key_source.clone()) {
                    input.bip32_derivation.insert(pubkey.inner, source);
                }
            }
        }
        psbt.inputs.push(input);

        Ok(PsbtInputFinalizer {
            output: self,
            index: psbt.inputs.len() - 1,
        })
    }

    /// Append this output as a destination of the PSBT, paying `value`
    /// satoshis to its scriptPubKey.
    pub fn update_psbt_as_output(&self, psbt: &mut Psbt, value: u64) {
        psbt.unsigned_tx.output.push(TxOut {
            value,
            script_pubkey: self.script_pubkey().to_owned(),
        });
        psbt.outputs.push(psbt::Output::default());
    }

    /// Finalize the PSBT input at `index`.
    ///
    /// With `validate` on, every partial signature is first checked
    /// against the input's sighash. The input must match this output's
    /// shape exactly; non-miniscript inputs are handed to the standard
    /// finalizer, miniscript inputs get their satisfaction computed from
    /// the partial signatures and installed as final scripts.
    pub fn finalize_psbt_input(
        &self,
        secp: &Secp256k1<All>,
        psbt: &mut Psbt,
        index: usize,
        validate: bool,
    ) -> Result<(), Error> {
        let input = psbt.inputs.get(index).ok_or_else(|| {
            Error::InputShapeMismatch(format!("psbt has no input {}", index))
        })?;
        if input.partial_sigs.is_empty() {
            return Err(Error::MissingSignatures);
        }
        if validate {
            self.validate_signatures(secp, psbt, index)?;
        }
        self.assert_psbt_input(psbt, index)?;

        if !self.has_miniscript() {
            return psbt
                .finalize_inp_mut(secp, index)
                .map_err(|_| Error::SatisfactionUnavailable);
        }

        let satisfaction = self.script_satisfaction(&psbt.inputs[index].partial_sigs)?;
        let input = &mut psbt.inputs[index];
        input.final_script_witness = if satisfaction.witness.is_empty() {
            None
        } else {
            Some(Witness::from_slice(&satisfaction.witness))
        };
        input.final_script_sig = if satisfaction.script_sig.is_empty() {
            None
        } else {
            Some(satisfaction.script_sig)
        };

        input.partial_sigs.clear();
        input.sighash_type = None;
        input.redeem_script = None;
        input.witness_script = None;
        input.bip32_derivation.clear();
        Ok(())
    }

    /// Check that the PSBT input at `index` has the shape this output
    /// expects: same scriptPubKey, sequence, locktime, witness script and
    /// redeem script.
    pub fn assert_psbt_input(&self, psbt: &Psbt, index: usize) -> Result<(), Error> {
        let input = psbt.inputs.get(index).ok_or_else(|| {
            Error::InputShapeMismatch(format!("psbt has no input {}", index))
        })?;
        let txin = psbt.unsigned_tx.input.get(index).ok_or_else(|| {
            Error::InputShapeMismatch(format!("unsigned tx has no input {}", index))
        })?;

        let observed_spk = if let Some(ref utxo) = input.witness_utxo {
            utxo.script_pubkey.clone()
        } else if let Some(ref tx) = input.non_witness_utxo {
            if tx.txid() != txin.previous_output.txid {
                return Err(Error::InputShapeMismatch(
                    "non_witness_utxo does not match the input's previous txid".to_string(),
                ));
            }
            tx.output
                .get(txin.previous_output.vout as usize)
                .ok_or_else(|| {
                    Error::InputShapeMismatch(format!(
                        "non_witness_utxo has no output {}",
                        txin.previous_output.vout
                    ))
                })?
                .script_pubkey
                .clone()
        } else {
            return Err(Error::InputShapeMismatch(
                "input carries neither witness_utxo nor non_witness_utxo".to_string(),
            ));
        };
        if observed_spk != *self.script_pubkey() {
            return Err(Error::InputShapeMismatch(
                "scriptPubKey differs from this descriptor's".to_string(),
            ));
        }

        let expected_sequence = self.expected_sequence();
        if txin.sequence != expected_sequence {
            return Err(Error::InputShapeMismatch(format!(
                "sequence {} differs from the required {}",
                txin.sequence, expected_sequence
            )));
        }

        let expected_locktime = self.lock_time().map(|l| l.to_consensus_u32()).unwrap_or(0);
        if psbt.unsigned_tx.lock_time.to_consensus_u32() != expected_locktime {
            return Err(Error::InputShapeMismatch(format!(
                "locktime {} differs from the required {}",
                psbt.unsigned_tx.lock_time, expected_locktime
            )));
        }

        if input.witness_script.as_deref() != self.witness_script() {
            return Err(Error::InputShapeMismatch(
                "witness script differs from this descriptor's".to_string(),
            ));
        }
        if input.redeem_script.as_deref() != self.redeem_script() {
            return Err(Error::InputShapeMismatch(
                "redeem script differs from this descriptor's".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_signatures(
        &self,
        secp: &Secp256k1<All>,
        psbt: &Psbt,
        index: usize,
    ) -> Result<(), Error> {
        let mut cache = SighashCache::new(&psbt.unsigned_tx);
        let msg = psbt
            .sighash_msg(index, &mut cache, None)
            .map_err(|e| Error::InvalidSignatures(e.to_string()))?
            .to_secp_msg();
        for (pubkey, signature) in &psbt.inputs[index].partial_sigs {
            secp.verify_ecdsa(&msg, &signature.sig, &pubkey.inner)
                .map_err(|_| {
                    Error::InvalidSignatures(format!(
                        "signature for {} does not verify against the input sighash",
                        pubkey
                    ))
                })?;
        }
        Ok(())
    }
}
