// SPDX-License-Identifier: CC0-1.0

//! # Bitcoin Output Descriptors
//!
//! Tools for working with [output descriptors]: the textual, checksummed
//! encoding of Bitcoin spending conditions, including descriptors whose
//! locking condition is written in miniscript.
//!
//! Given a descriptor string this crate produces the locking script and
//! address of the output, any witness/redeem scripts it needs, and a
//! decomposition that separates the *shape* of the descriptor from its key
//! material (`@0, @1, ...` placeholders plus an [`ExpansionMap`]), so one
//! shape can be reused across keys and derivation indexes.
//!
//! An [`Output`] binds an expansion to a concrete instance (network,
//! index, preimages, signer set) and drives the consumption of such a UTXO
//! in a PSBT: appending it as an input with the right sequence and
//! locktime, and finalizing the input with a miniscript satisfaction once
//! the partial signatures are in.
//!
//! [output descriptors]: <https://github.com/bitcoin/bips/blob/master/bip-0380.mediawiki>
//!
//! # Examples
//!
//! ```rust
//! use bitcoin_descriptors::bitcoin::secp256k1::Secp256k1;
//! use bitcoin_descriptors::{expand, ExpandRequest};
//!
//! let secp = Secp256k1::new();
//! let request = ExpandRequest::new(
//!     "pkh(02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5)",
//! );
//! let expansion = expand(&secp, &request).unwrap();
//! assert_eq!(expansion.expanded_expression.as_deref(), Some("pkh(@0)"));
//! assert!(expansion.payment.unwrap().script_pubkey.is_p2pkh());
//! ```
//!
//! Ranged descriptors substitute an index for their wildcard:
//!
//! ```rust
//! use bitcoin_descriptors::bitcoin::secp256k1::Secp256k1;
//! use bitcoin_descriptors::{expand, ExpandRequest};
//!
//! let secp = Secp256k1::new();
//! let request = ExpandRequest {
//!     index: Some(7),
//!     ..ExpandRequest::new("wpkh(xpub6ERApfZwUNrhLCkDtcHTcxd75RbzS1ed54G1LkBUHQVHQKqhMkhgbmJbZRkrgZw4koxb5JaHWkY4ALHY2grBGRjaDMzQLcgJvLJuZZvRcEL/0/*)")
//! };
//! let expansion = expand(&secp, &request).unwrap();
//! assert!(expansion.canonical_expression.ends_with("/0/7)"));
//! ```

// Re-exported so downstream code uses the exact dependency versions this
// crate was built against.
pub use bitcoin;
pub use miniscript;

pub mod checksum;
mod error;
pub mod expand;
pub mod expansion;
pub mod keys;
pub mod output;
pub mod psbt;
pub mod satisfy;

pub use crate::error::Error;
pub use crate::expand::{expand, ExpandRequest, Expansion, Payment};
pub use crate::expansion::ExpansionMap;
pub use crate::keys::{parse_key_expression, KeyInfo, ParsedKey, SinglePubKey, Wildcard};
pub use crate::output::{Output, OutputParams, ScriptSatisfaction};
pub use crate::psbt::{PsbtInputFinalizer, UtxoParams};
pub use crate::satisfy::{Preimage, TimeConstraints};

pub use bitcoin::bip32::{ExtendedPrivKey, ExtendedPubKey};
pub use bitcoin::{PrivateKey, PublicKey};

/// Former name of [`Output`].
#[deprecated(
    note = "use `Output`; the matching legacy constructor field is `OutputParams::expression`"
)]
pub type Descriptor = Output;
