// SPDX-License-Identifier: CC0-1.0

//! Descriptor expansion
//!
//! Turns a descriptor string into an [`Expansion`]: the checksum-verified,
//! index-substituted canonical expression, the scripts and address it locks
//! to, and the shape/key decomposition (`@i` placeholders plus an
//! [`ExpansionMap`]) when the descriptor embeds keys or a miniscript.

use std::str::FromStr;

use bitcoin::blockdata::opcodes;
use bitcoin::blockdata::script::Instruction;
use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::{Address, Network, Script, ScriptBuf};
use miniscript::{Descriptor as MsDescriptor, DescriptorPublicKey};

use crate::expansion::{self, ExpansionMap};
use crate::{checksum, keys, Error};

/// Largest standard p2wsh witness script.
const MAX_STANDARD_P2WSH_SCRIPT_SIZE: usize = 3600;
/// Largest p2sh redeem script (a single push element).
const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;
/// Consensus cap on non-push opcodes per script.
const MAX_OPS_PER_SCRIPT: usize = 201;

/// Miniscript heads admitted inside `sh(...)` without the
/// `allow_miniscript_in_p2sh` escape hatch.
const P2SH_MINISCRIPT_HEADS: [&str; 8] = [
    "pk(",
    "pkh(",
    "wpkh(",
    "combo(",
    "multi(",
    "sortedmulti(",
    "multi_a(",
    "sortedmulti_a(",
];

/// A request to expand a descriptor.
#[derive(Clone, Debug)]
pub struct ExpandRequest<'a> {
    /// The descriptor string.
    pub descriptor: Option<&'a str>,
    /// Deprecated spelling of `descriptor`; supplying both is an error.
    pub expression: Option<&'a str>,
    /// Index substituted for `*` in a ranged descriptor.
    pub index: Option<u32>,
    /// Reject descriptors without a trailing `#checksum`.
    pub checksum_required: bool,
    /// Admit arbitrary miniscript inside `sh(...)`, beyond the standard
    /// head whitelist.
    pub allow_miniscript_in_p2sh: bool,
    /// Network used for addresses and key version bytes.
    pub network: Network,
}

impl<'a> ExpandRequest<'a> {
    /// A request with default options for the given descriptor on mainnet.
    pub fn new(descriptor: &'a str) -> Self {
        ExpandRequest {
            descriptor: Some(descriptor),
            ..Default::default()
        }
    }
}

impl Default for ExpandRequest<'_> {
    fn default() -> Self {
        ExpandRequest {
            descriptor: None,
            expression: None,
            index: None,
            checksum_required: false,
            allow_miniscript_in_p2sh: false,
            network: Network::Bitcoin,
        }
    }
}

/// The scriptPubKey an expansion locks to, with its address when the form
/// has one (p2pk does not).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Payment {
    /// The locking script.
    pub script_pubkey: ScriptBuf,
    /// The address encoding of the locking script.
    pub address: Option<Address>,
}

/// Result of expanding a descriptor.
///
/// Fields a branch does not produce stay `None`: `payment` and the script
/// fields are absent while the canonical expression still contains a
/// wildcard, the miniscript fields are only set for miniscript shells, and
/// `is_segwit` is unknowable for `addr(...)`.
#[derive(Clone, Debug)]
pub struct Expansion {
    /// Checksum-stripped, index-substituted descriptor body.
    pub canonical_expression: String,
    /// Whether the original descriptor contained a wildcard.
    pub is_ranged: bool,
    /// The descriptor with each key expression replaced by `@i`.
    pub expanded_expression: Option<String>,
    /// The embedded miniscript, verbatim.
    pub miniscript: Option<String>,
    /// The embedded miniscript with `@i` placeholders.
    pub expanded_miniscript: Option<String>,
    /// Placeholder-to-key map.
    pub expansion_map: Option<ExpansionMap>,
    /// Whether the output is segwit; `None` for `addr(...)`.
    pub is_segwit: Option<bool>,
    /// The locking script and address.
    pub payment: Option<Payment>,
    /// Redeem script, for `sh(...)`-wrapped outputs.
    pub redeem_script: Option<ScriptBuf>,
    /// Witness script, for `wsh(...)` outputs.
    pub witness_script: Option<ScriptBuf>,
}

/// Expand a descriptor string into scripts, address and shape/key
/// decomposition.
pub fn expand(secp: &Secp256k1<All>, request: &ExpandRequest) -> Result<Expansion, Error> {
    let source = match (request.descriptor, request.expression) {
        (Some(d), None) => d,
        (None, Some(e)) => e,
        (Some(_), Some(_)) => {
            return Err(Error::InvalidDescriptor(
                "both 'descriptor' and the deprecated 'expression' were supplied".to_string(),
            ))
        }
        (None, None) => {
            return Err(Error::InvalidDescriptor("no descriptor supplied".to_string()))
        }
    };
    if source.is_empty() {
        return Err(Error::InvalidDescriptor("empty descriptor".to_string()));
    }
    if request.checksum_required && !source.contains('#') {
        return Err(Error::BadChecksum(format!(
            "'{}' has no checksum and one is required",
            source
        )));
    }

    let body = checksum::verify_checksum(source)?;
    if body.is_empty() {
        return Err(Error::InvalidDescriptor("empty descriptor body".to_string()));
    }

    let is_ranged = body.contains('*');
    let canonical = match request.index {
        Some(index) => {
            if !is_ranged {
                return Err(Error::InvalidIndex(format!(
                    "index {} supplied for the non-ranged descriptor '{}'",
                    index, body
                )));
            }
            body.replace('*', &index.to_string())
        }
        None => body.to_string(),
    };

    Expander {
        secp,
        network: request.network,
        allow_miniscript_in_p2sh: request.allow_miniscript_in_p2sh,
        is_ranged,
        // Scripts can only be derived once no wildcard remains.
        materialize: !canonical.contains('*'),
    }
    .dispatch(canonical)
}

struct Expander<'s> {
    secp: &'s Secp256k1<All>,
    network: Network,
    allow_miniscript_in_p2sh: bool,
    is_ranged: bool,
    materialize: bool,
}

impl<'s> Expander<'s> {
    /// Shell dispatch. Order matters: `sh(wpkh(...))` and `sh(wsh(...))`
    /// take precedence over the generic `sh(MS)` branch.
    fn dispatch(self, canonical: String) -> Result<Expansion, Error> {
        if let Some(addr) = unwrap_fn("addr", &canonical) {
            let addr = addr.to_string();
            return self.expand_addr(canonical, &addr);
        }
        if let Some(key) = unwrap_fn("pk", &canonical) {
            let key = key.to_string();
            return self.expand_single_key(canonical, &key, Shell::Pk);
        }
        if let Some(key) = unwrap_fn("pkh", &canonical) {
            let key = key.to_string();
            return self.expand_single_key(canonical, &key, Shell::Pkh);
        }
        if let Some(key) = unwrap_fn("wpkh", &canonical) {
            let key = key.to_string();
            return self.expand_single_key(canonical, &key, Shell::Wpkh);
        }
        if let Some(sh_inner) = unwrap_fn("sh", &canonical) {
            if let Some(key) = unwrap_fn("wpkh", sh_inner) {
                let key = key.to_string();
                return self.expand_single_key(canonical, &key, Shell::ShWpkh);
            }
            if let Some(ms) = unwrap_fn("wsh", sh_inner) {
                let ms = ms.to_string();
                return self.expand_miniscript_shell(canonical, &ms, Shell::ShWsh);
            }
            let ms = sh_inner.to_string();
            return self.expand_miniscript_shell(canonical, &ms, Shell::Sh);
        }
        if let Some(ms) = unwrap_fn("wsh", &canonical) {
            let ms = ms.to_string();
            return self.expand_miniscript_shell(canonical, &ms, Shell::Wsh);
        }
        Err(Error::InvalidDescriptor(format!(
            "'{}' matches no known descriptor form",
            canonical
        )))
    }

    fn expand_addr(self, canonical: String, addr: &str) -> Result<Expansion, Error> {
        if self.is_ranged {
            return Err(Error::InvalidDescriptor(
                "addr() descriptors cannot be ranged".to_string(),
            ));
        }
        let address = addr
            .parse::<Address<bitcoin::address::NetworkUnchecked>>()
            .map_err(|e| Error::InvalidAddress(format!("'{}': {}", addr, e)))?
            .require_network(self.network)
            .map_err(|e| Error::InvalidAddress(format!("'{}': {}", addr, e)))?;
        let script_pubkey = address.script_pubkey();

        // Trial the recognized forms in order, keeping the last match. The
        // forms are mutually exclusive, so this equals first-match; bare
        // scripts and future witness versions fall through.
        let mut form = None;
        if script_pubkey.is_p2pkh() {
            form = Some("p2pkh");
        }
        if script_pubkey.is_p2sh() {
            form = Some("p2sh");
        }
        if script_pubkey.is_v0_p2wpkh() {
            form = Some("p2wpkh");
        }
        if script_pubkey.is_v0_p2wsh() {
            form = Some("p2wsh");
        }
        if script_pubkey.is_v1_p2tr() {
            form = Some("p2tr");
        }
        if form.is_none() {
            return Err(Error::InvalidAddress(format!(
                "'{}' is not a recognized payment form",
                addr
            )));
        }

        Ok(Expansion {
            canonical_expression: canonical,
            is_ranged: false,
            expanded_expression: None,
            miniscript: None,
            expanded_miniscript: None,
            expansion_map: None,
            is_segwit: None,
            payment: Some(Payment {
                script_pubkey,
                address: Some(address),
            }),
            redeem_script: None,
            witness_script: None,
        })
    }

    fn expand_single_key(
        self,
        canonical: String,
        key: &str,
        shell: Shell,
    ) -> Result<Expansion, Error> {
        let is_segwit = shell.is_segwit();
        let info =
            keys::parse_key_expression(self.secp, key, self.network, Some(is_segwit))?;

        let mut map = ExpansionMap::default();
        map.insert(info);

        let (payment, redeem_script) = if self.materialize {
            let pubkey = map
                .get(0)
                .and_then(|i| i.pubkey)
                .ok_or(Error::MissingIndex)?;
            let (payment, redeem) = match shell {
                Shell::Pk => (
                    Payment {
                        script_pubkey: ScriptBuf::new_p2pk(&pubkey),
                        address: None,
                    },
                    None,
                ),
                Shell::Pkh => (
                    Payment {
                        script_pubkey: ScriptBuf::new_p2pkh(&pubkey.pubkey_hash()),
                        address: Some(Address::p2pkh(&pubkey, self.network)),
                    },
                    None,
                ),
                Shell::Wpkh => {
                    let wpkh = pubkey.wpubkey_hash().ok_or_else(|| {
                        Error::InvalidKeyExpression(format!(
                            "uncompressed key '{}' in a segwit context",
                            key
                        ))
                    })?;
                    (
                        Payment {
                            script_pubkey: ScriptBuf::new_v0_p2wpkh(&wpkh),
                            address: Some(
                                Address::p2wpkh(&pubkey, self.network).map_err(|e| {
                                    Error::InvalidKeyExpression(e.to_string())
                                })?,
                            ),
                        },
                        None,
                    )
                }
                Shell::ShWpkh => {
                    let wpkh = pubkey.wpubkey_hash().ok_or_else(|| {
                        Error::InvalidKeyExpression(format!(
                            "uncompressed key '{}' in a segwit context",
                            key
                        ))
                    })?;
                    let redeem = ScriptBuf::new_v0_p2wpkh(&wpkh);
                    (
                        Payment {
                            script_pubkey: ScriptBuf::new_p2sh(&redeem.script_hash()),
                            address: Some(
                                Address::p2shwpkh(&pubkey, self.network).map_err(|e| {
                                    Error::InvalidKeyExpression(e.to_string())
                                })?,
                            ),
                        },
                        Some(redeem),
                    )
                }
                Shell::ShWsh | Shell::Wsh | Shell::Sh => unreachable!("miniscript shells"),
            };
            (Some(payment), redeem)
        } else {
            (None, None)
        };

        Ok(Expansion {
            canonical_expression: canonical,
            is_ranged: self.is_ranged,
            expanded_expression: Some(shell.placeholder_expression()),
            miniscript: None,
            expanded_miniscript: None,
            expansion_map: Some(map),
            is_segwit: Some(is_segwit),
            payment,
            redeem_script,
            witness_script: None,
        })
    }

    fn expand_miniscript_shell(
        self,
        canonical: String,
        ms: &str,
        shell: Shell,
    ) -> Result<Expansion, Error> {
        let is_segwit = shell.is_segwit();
        if let Shell::Sh = shell {
            if !self.allow_miniscript_in_p2sh
                && !P2SH_MINISCRIPT_HEADS.iter().any(|h| ms.starts_with(h))
            {
                return Err(Error::InvalidDescriptor(format!(
                    "miniscript '{}' is not allowed inside sh()",
                    ms
                )));
            }
        }

        let (expanded_ms, map) =
            expansion::expand_miniscript(self.secp, ms, self.network, is_segwit)?;
        let expanded_expression = match shell {
            Shell::Wsh => format!("wsh({})", expanded_ms),
            Shell::ShWsh => format!("sh(wsh({}))", expanded_ms),
            Shell::Sh => format!("sh({})", expanded_ms),
            _ => unreachable!("single-key shells"),
        };

        let (payment, redeem_script, witness_script) = if self.materialize {
            match shell {
                Shell::Wsh => {
                    let witness_script = compile_miniscript(&expanded_ms, &map, true)?;
                    check_script_limits(&witness_script, MAX_STANDARD_P2WSH_SCRIPT_SIZE)?;
                    let script_pubkey = ScriptBuf::new_v0_p2wsh(&witness_script.wscript_hash());
                    let address = Address::p2wsh(&witness_script, self.network);
                    (
                        Some(Payment {
                            script_pubkey,
                            address: Some(address),
                        }),
                        None,
                        Some(witness_script),
                    )
                }
                Shell::ShWsh => {
                    let witness_script = compile_miniscript(&expanded_ms, &map, true)?;
                    check_script_limits(&witness_script, MAX_STANDARD_P2WSH_SCRIPT_SIZE)?;
                    let redeem = ScriptBuf::new_v0_p2wsh(&witness_script.wscript_hash());
                    let script_pubkey = ScriptBuf::new_p2sh(&redeem.script_hash());
                    let address = Address::p2sh(&redeem, self.network)
                        .map_err(|e| Error::InvalidDescriptor(e.to_string()))?;
                    (
                        Some(Payment {
                            script_pubkey,
                            address: Some(address),
                        }),
                        Some(redeem),
                        Some(witness_script),
                    )
                }
                Shell::Sh => {
                    let redeem = compile_miniscript(&expanded_ms, &map, false)?;
                    check_script_limits(&redeem, MAX_SCRIPT_ELEMENT_SIZE)?;
                    let script_pubkey = ScriptBuf::new_p2sh(&redeem.script_hash());
                    let address = Address::p2sh(&redeem, self.network)
                        .map_err(|e| Error::InvalidDescriptor(e.to_string()))?;
                    (
                        Some(Payment {
                            script_pubkey,
                            address: Some(address),
                        }),
                        Some(redeem),
                        None,
                    )
                }
                _ => unreachable!("single-key shells"),
            }
        } else {
            (None, None, None)
        };

        Ok(Expansion {
            canonical_expression: canonical,
            is_ranged: self.is_ranged,
            expanded_expression: Some(expanded_expression),
            miniscript: Some(ms.to_string()),
            expanded_miniscript: Some(expanded_ms),
            expansion_map: Some(map),
            is_segwit: Some(is_segwit),
            payment,
            redeem_script,
            witness_script,
        })
    }
}

#[derive(Copy, Clone, Debug)]
enum Shell {
    Pk,
    Pkh,
    Wpkh,
    ShWpkh,
    ShWsh,
    Wsh,
    Sh,
}

impl Shell {
    fn is_segwit(self) -> bool {
        match self {
            Shell::Pk | Shell::Pkh | Shell::Sh => false,
            Shell::Wpkh | Shell::ShWpkh | Shell::ShWsh | Shell::Wsh => true,
        }
    }

    fn placeholder_expression(self) -> String {
        match self {
            Shell::Pk => "pk(@0)",
            Shell::Pkh => "pkh(@0)",
            Shell::Wpkh => "wpkh(@0)",
            Shell::ShWpkh => "sh(wpkh(@0))",
            _ => unreachable!("miniscript shells build their own expression"),
        }
        .to_string()
    }
}

/// Match `name(body)` anchored to the whole string, with a balanced-paren
/// body, returning the body.
fn unwrap_fn<'a>(name: &str, s: &'a str) -> Option<&'a str> {
    let body = s
        .strip_prefix(name)?
        .strip_prefix('(')?
        .strip_suffix(')')?;
    let mut depth = 0i32;
    for c in body.bytes() {
        match c {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    if depth == 0 {
        Some(body)
    } else {
        None
    }
}

/// Substitute placeholders and compile the miniscript to a byte script
/// through the descriptor compiler (which also handles `multi` and
/// `sortedmulti` heads).
pub(crate) fn compile_miniscript(
    expanded: &str,
    map: &ExpansionMap,
    segwit: bool,
) -> Result<ScriptBuf, Error> {
    let concrete = map.substitute(expanded)?;
    let wrapped = if segwit {
        format!("wsh({})", concrete)
    } else {
        format!("sh({})", concrete)
    };
    let descriptor = MsDescriptor::<DescriptorPublicKey>::from_str(&wrapped)?;
    let descriptor = descriptor
        .at_derivation_index(0)
        .map_err(|e| Error::InvalidDescriptor(e.to_string()))?;
    descriptor.explicit_script().map_err(Error::Miniscript)
}

/// Enforce the shell's script caps: a byte-size limit and the 201 cap on
/// non-push opcodes (opcode value above `OP_16`). A script that fails to
/// decompile is rejected outright.
pub(crate) fn check_script_limits(script: &Script, max_size: usize) -> Result<(), Error> {
    if script.len() > max_size {
        return Err(Error::ScriptTooLarge {
            size: script.len(),
            max: max_size,
        });
    }
    let mut ops = 0usize;
    for instruction in script.instructions() {
        match instruction {
            Err(e) => {
                return Err(Error::InvalidDescriptor(format!(
                    "cannot decompile script: {}",
                    e
                )))
            }
            Ok(Instruction::Op(op)) if op.to_u8() > opcodes::all::OP_PUSHNUM_16.to_u8() => {
                ops += 1
            }
            Ok(_) => {}
        }
    }
    if ops > MAX_OPS_PER_SCRIPT {
        return Err(Error::TooManyOps(ops));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::blockdata::script::Builder;

    const KEY: &str = "02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5";

    fn secp() -> Secp256k1<All> {
        Secp256k1::new()
    }

    fn expand_str(descriptor: &str) -> Result<Expansion, Error> {
        expand(&secp(), &ExpandRequest::new(descriptor))
    }

    #[test]
    fn pkh_single_key() {
        let descriptor = format!("pkh({})", KEY);
        let expansion = expand_str(&descriptor).unwrap();
        assert_eq!(expansion.canonical_expression, descriptor);
        assert_eq!(expansion.is_segwit, Some(false));
        assert_eq!(expansion.expanded_expression.as_deref(), Some("pkh(@0)"));
        let map = expansion.expansion_map.as_ref().unwrap();
        assert_eq!(map.get(0).unwrap().pubkey.unwrap().to_string(), KEY);

        let spk = expansion.payment.as_ref().unwrap().script_pubkey.clone();
        assert!(spk.is_p2pkh());
        let hex = spk.to_hex_string();
        assert!(hex.starts_with("76a914") && hex.ends_with("88ac"));
    }

    #[test]
    fn pkh_with_checksum_round_trips() {
        let body = format!("pkh({})", KEY);
        let sum = checksum::desc_checksum(&body).unwrap();
        let full = format!("{}#{}", body, sum);
        let request = ExpandRequest {
            checksum_required: true,
            ..ExpandRequest::new(&full)
        };
        let expansion = expand(&secp(), &request).unwrap();
        assert_eq!(expansion.canonical_expression, body);
    }

    #[test]
    fn wrong_checksum_is_rejected() {
        let descriptor = format!("pkh({})#00000000", KEY);
        assert!(matches!(
            expand_str(&descriptor),
            Err(Error::BadChecksum(_))
        ));
    }

    #[test]
    fn missing_required_checksum_is_rejected() {
        let body = format!("pkh({})", KEY);
        let request = ExpandRequest {
            checksum_required: true,
            ..ExpandRequest::new(&body)
        };
        assert!(matches!(expand(&secp(), &request), Err(Error::BadChecksum(_))));
    }

    #[test]
    fn pk_has_no_address() {
        let expansion = expand_str(&format!("pk({})", KEY)).unwrap();
        let payment = expansion.payment.unwrap();
        assert!(payment.address.is_none());
        assert!(payment.script_pubkey.is_p2pk());
    }

    #[test]
    fn sh_wpkh_wraps_the_witness_program() {
        let expansion = expand_str(&format!("sh(wpkh({}))", KEY)).unwrap();
        assert_eq!(expansion.is_segwit, Some(true));
        assert_eq!(
            expansion.expanded_expression.as_deref(),
            Some("sh(wpkh(@0))")
        );
        let redeem = expansion.redeem_script.unwrap();
        assert_eq!(redeem.len(), 22);
        assert!(redeem.is_v0_p2wpkh());
        let spk = expansion.payment.unwrap().script_pubkey;
        assert!(spk.is_p2sh());
        assert_eq!(spk.len(), 23);
    }

    #[test]
    fn wpkh_rejects_uncompressed() {
        let uncompressed = "04a34b99f22c790c4e36b2b3c2c35a36db06226e41c692fc82b8b56ac1c540c5bd5b8dec5235a0fa8722476c7709c02559e3aa73aa03918ba2d492eea75abea235";
        assert!(matches!(
            expand_str(&format!("wpkh({})", uncompressed)),
            Err(Error::InvalidKeyExpression(_))
        ));
    }

    #[test]
    fn ranged_descriptor_without_index_is_shape_only() {
        let descriptor = "wpkh([d34db33f/84'/0'/0']xpub6ERApfZwUNrhLCkDtcHTcxd75RbzS1ed54G1LkBUHQVHQKqhMkhgbmJbZRkrgZw4koxb5JaHWkY4ALHY2grBGRjaDMzQLcgJvLJuZZvRcEL/0/*)";
        let expansion = expand_str(descriptor).unwrap();
        assert!(expansion.is_ranged);
        assert!(expansion.payment.is_none());
        assert!(expansion.canonical_expression.contains('*'));
        assert_eq!(expansion.expanded_expression.as_deref(), Some("wpkh(@0)"));
        let map = expansion.expansion_map.unwrap();
        assert!(map.get(0).unwrap().pubkey.is_none());
    }

    #[test]
    fn ranged_descriptor_substitutes_index() {
        let descriptor = "wpkh([d34db33f/84'/0'/0']xpub6ERApfZwUNrhLCkDtcHTcxd75RbzS1ed54G1LkBUHQVHQKqhMkhgbmJbZRkrgZw4koxb5JaHWkY4ALHY2grBGRjaDMzQLcgJvLJuZZvRcEL/0/*)";
        let secp = secp();
        let at0 = expand(
            &secp,
            &ExpandRequest {
                index: Some(0),
                ..ExpandRequest::new(descriptor)
            },
        )
        .unwrap();
        let at1 = expand(
            &secp,
            &ExpandRequest {
                index: Some(1),
                ..ExpandRequest::new(descriptor)
            },
        )
        .unwrap();

        assert!(at0.canonical_expression.ends_with("/0/0)"));
        assert!(!at0.canonical_expression.contains('*'));
        let spk0 = at0.payment.unwrap().script_pubkey;
        let spk1 = at1.payment.unwrap().script_pubkey;
        assert!(spk0.is_v0_p2wpkh());
        assert_eq!(spk0.len(), 22);
        assert_ne!(spk0, spk1);

        // Substituting by hand must produce the same scriptPubKey.
        let substituted = descriptor.replace('*', "0");
        let direct = expand(&secp, &ExpandRequest::new(&substituted)).unwrap();
        assert_eq!(direct.payment.unwrap().script_pubkey, spk0);
    }

    #[test]
    fn index_on_non_ranged_descriptor_is_rejected() {
        let request = ExpandRequest {
            index: Some(0),
            ..ExpandRequest::new("pkh(02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5)")
        };
        assert!(matches!(
            expand(&secp(), &request),
            Err(Error::InvalidIndex(_))
        ));
    }

    #[test]
    fn wsh_miniscript_expands_and_compiles() {
        let descriptor = format!("wsh(and_v(v:pk({}),older(144)))", KEY);
        let expansion = expand_str(&descriptor).unwrap();
        assert_eq!(expansion.is_segwit, Some(true));
        assert_eq!(
            expansion.expanded_miniscript.as_deref(),
            Some("and_v(v:pk(@0),older(144))")
        );
        assert_eq!(
            expansion.expanded_expression.as_deref(),
            Some("wsh(and_v(v:pk(@0),older(144)))")
        );
        let witness_script = expansion.witness_script.unwrap();
        assert!(witness_script.len() <= MAX_STANDARD_P2WSH_SCRIPT_SIZE);
        assert!(expansion.payment.unwrap().script_pubkey.is_v0_p2wsh());
        assert!(expansion.redeem_script.is_none());
    }

    #[test]
    fn sh_wsh_sets_both_scripts() {
        let descriptor = format!("sh(wsh(and_v(v:pk({}),older(144))))", KEY);
        let expansion = expand_str(&descriptor).unwrap();
        assert_eq!(expansion.is_segwit, Some(true));
        let redeem = expansion.redeem_script.unwrap();
        let witness = expansion.witness_script.unwrap();
        assert!(redeem.is_v0_p2wsh());
        assert_eq!(redeem, ScriptBuf::new_v0_p2wsh(&witness.wscript_hash()));
        assert!(expansion.payment.unwrap().script_pubkey.is_p2sh());
    }

    #[test]
    fn sh_multi_is_whitelisted() {
        let key_b = "0379be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";
        let descriptor = format!("sh(multi(2,{},{}))", KEY, key_b);
        let expansion = expand_str(&descriptor).unwrap();
        assert_eq!(expansion.is_segwit, Some(false));
        let redeem = expansion.redeem_script.unwrap();
        assert!(redeem.len() <= MAX_SCRIPT_ELEMENT_SIZE);
        assert!(expansion.witness_script.is_none());
    }

    #[test]
    fn sh_arbitrary_miniscript_needs_opt_in() {
        let descriptor = format!("sh(and_v(v:pk({}),older(144)))", KEY);
        assert!(matches!(
            expand_str(&descriptor),
            Err(Error::InvalidDescriptor(_))
        ));

        let request = ExpandRequest {
            allow_miniscript_in_p2sh: true,
            ..ExpandRequest::new(&descriptor)
        };
        assert!(expand(&secp(), &request).is_ok());
    }

    #[test]
    fn unknown_shell_is_rejected() {
        for descriptor in &["tr(abc)", "pkh", "pkh()extra", "combo(abc)", ""] {
            assert!(expand_str(descriptor).is_err(), "accepted: {}", descriptor);
        }
    }

    #[test]
    fn addr_classifies_known_forms() {
        let expansion = expand_str("addr(bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4)").unwrap();
        assert!(expansion.is_segwit.is_none());
        assert!(expansion.expansion_map.is_none());
        let payment = expansion.payment.unwrap();
        assert!(payment.script_pubkey.is_v0_p2wpkh());
        assert!(payment.address.is_some());
    }

    #[test]
    fn addr_on_wrong_network_is_rejected() {
        let request = ExpandRequest {
            network: Network::Testnet,
            ..ExpandRequest::new("addr(bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4)")
        };
        assert!(matches!(
            expand(&secp(), &request),
            Err(Error::InvalidAddress(_))
        ));
    }

    #[test]
    fn script_size_cap_is_enforced() {
        let script = Builder::new()
            .push_slice([0u8; 75])
            .into_script();
        let mut big = script.to_bytes();
        while big.len() <= MAX_SCRIPT_ELEMENT_SIZE {
            big.extend_from_slice(script.as_bytes());
        }
        let big = ScriptBuf::from_bytes(big);
        assert!(matches!(
            check_script_limits(&big, MAX_SCRIPT_ELEMENT_SIZE),
            Err(Error::ScriptTooLarge { .. })
        ));
    }

    #[test]
    fn op_count_cap_is_enforced() {
        let mut builder = Builder::new();
        for _ in 0..202 {
            builder = builder.push_opcode(opcodes::all::OP_DUP);
        }
        let script = builder.into_script();
        assert!(matches!(
            check_script_limits(&script, MAX_STANDARD_P2WSH_SCRIPT_SIZE),
            Err(Error::TooManyOps(_))
        ));
    }

    #[test]
    fn push_only_script_counts_no_ops() {
        let script = Builder::new()
            .push_int(1)
            .push_slice([7u8; 20])
            .into_script();
        assert!(check_script_limits(&script, MAX_SCRIPT_ELEMENT_SIZE).is_ok());
    }
}
