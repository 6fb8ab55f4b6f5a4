// SPDX-License-Identifier: CC0-1.0

//! Errors

use std::{error, fmt};

use bitcoin::bip32;

/// Errors returned by descriptor expansion, output construction and PSBT
/// handling.
///
/// Variants that originate from a malformed input carry the offending
/// fragment so callers can point at the exact part of the descriptor that
/// was rejected.
#[derive(Debug)]
pub enum Error {
    /// The descriptor string is empty, unparseable, or its outer shell is
    /// not one of the recognized forms.
    InvalidDescriptor(String),
    /// A checksum was present and did not verify, or it was absent while
    /// the caller required one.
    BadChecksum(String),
    /// An index was supplied for a descriptor without a wildcard.
    InvalidIndex(String),
    /// A ranged descriptor was asked to materialize scripts without an
    /// index.
    MissingIndex,
    /// The `addr(...)` body could not be decoded under the requested
    /// network, or decodes to an unrecognized payment form.
    InvalidAddress(String),
    /// A key expression is malformed, belongs to another network, or uses
    /// an uncompressed key in a segwit context.
    InvalidKeyExpression(String),
    /// The compiled script exceeds the byte cap of its shell.
    ScriptTooLarge {
        /// Size of the compiled script.
        size: usize,
        /// Cap imposed by the shell (520 for p2sh, 3600 for p2wsh).
        max: usize,
    },
    /// The compiled script contains more than 201 non-push opcodes.
    TooManyOps(usize),
    /// The satisfier could not produce a witness for the requested
    /// signer/preimage set, or the produced witness would shift the
    /// precomputed locktime or sequence.
    SatisfactionUnavailable,
    /// A PSBT input does not match this output's scripts, sequence or
    /// locktime.
    InputShapeMismatch(String),
    /// The operation needs to know whether the output is segwit, which is
    /// undeterminable for `addr(...)` descriptors.
    UnknownSegwit,
    /// `finalize_psbt_input` was called on an input without partial
    /// signatures.
    MissingSignatures,
    /// Signature validation was requested and at least one partial
    /// signature does not verify against the input's sighash.
    InvalidSignatures(String),
    /// A non-segwit input was added without the full previous transaction,
    /// so its legacy sighash cannot be computed.
    MissingNonWitnessUtxo,
    /// Error bubbled up from the miniscript compiler/satisfier.
    Miniscript(miniscript::Error),
    /// BIP32 derivation error.
    Bip32(bip32::Error),
    /// PSBT container error.
    Psbt(bitcoin::psbt::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::InvalidDescriptor(ref s) => write!(f, "invalid descriptor: {}", s),
            Error::BadChecksum(ref s) => write!(f, "bad descriptor checksum: {}", s),
            Error::InvalidIndex(ref s) => write!(f, "invalid index: {}", s),
            Error::MissingIndex => {
                f.write_str("ranged descriptor requires an index to derive scripts")
            }
            Error::InvalidAddress(ref s) => write!(f, "invalid address: {}", s),
            Error::InvalidKeyExpression(ref s) => write!(f, "invalid key expression: {}", s),
            Error::ScriptTooLarge { size, max } => {
                write!(f, "script of {} bytes exceeds the {} byte cap", size, max)
            }
            Error::TooManyOps(n) => {
                write!(f, "script has {} non-push opcodes, only 201 are allowed", n)
            }
            Error::SatisfactionUnavailable => {
                f.write_str("no satisfaction exists for the given signers and preimages")
            }
            Error::InputShapeMismatch(ref s) => {
                write!(f, "psbt input does not match this output: {}", s)
            }
            Error::UnknownSegwit => f.write_str("cannot tell whether an addr() output is segwit"),
            Error::MissingSignatures => f.write_str("psbt input has no partial signatures"),
            Error::InvalidSignatures(ref s) => write!(f, "invalid signature: {}", s),
            Error::MissingNonWitnessUtxo => {
                f.write_str("non-segwit input requires the full previous transaction")
            }
            Error::Miniscript(ref e) => fmt::Display::fmt(e, f),
            Error::Bip32(ref e) => fmt::Display::fmt(e, f),
            Error::Psbt(ref e) => fmt::Display::fmt(e, f),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::Miniscript(ref e) => Some(e),
            Error::Bip32(ref e) => Some(e),
            Error::Psbt(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<miniscript::Error> for Error {
    fn from(e: miniscript::Error) -> Error {
        Error::Miniscript(e)
    }
}

impl From<bip32::Error> for Error {
    fn from(e: bip32::Error) -> Error {
        Error::Bip32(e)
    }
}

impl From<bitcoin::psbt::Error> for Error {
    fn from(e: bitcoin::psbt::Error) -> Error {
        Error::Psbt(e)
    }
}
