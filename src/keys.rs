// SPDX-License-Identifier: CC0-1.0

//! Key expressions
//!
//! Parsing of the key expressions that appear inside descriptors: raw hex
//! public keys, WIF private keys, and BIP32 extended keys with optional
//! `[fingerprint/path]` origin information and a derivation suffix that may
//! end in a wildcard.

use std::str::FromStr;

use bitcoin::bip32::{self, ChildNumber, DerivationPath, ExtendedPrivKey, ExtendedPubKey};
use bitcoin::secp256k1::{All, Parity, Secp256k1, XOnlyPublicKey};
use bitcoin::{Network, PrivateKey, PublicKey};

use crate::Error;

/// Whether a key expression ends with a derivation wildcard.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Wildcard {
    /// No wildcard
    None,
    /// Unhardened wildcard, e.g. `*`
    Unhardened,
    /// Hardened wildcard, e.g. `*'` or `*h`
    Hardened,
}

/// Single public key without origin or range information.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SinglePubKey {
    /// Compressed or uncompressed key
    FullKey(PublicKey),
    /// 32-byte x-only key
    XOnly(XOnlyPublicKey),
}

/// The key material of a key expression.
///
/// A key expression carries either a BIP32 extended key with a derivation
/// suffix or standalone key material (a WIF private key or a literal public
/// key), never both.
#[derive(Clone, Debug)]
pub enum ParsedKey {
    /// Extended public key plus derivation suffix
    XPub {
        /// The extended key
        xkey: ExtendedPubKey,
        /// Derivation suffix, without the wildcard step
        path: DerivationPath,
        /// Trailing wildcard, if any
        wildcard: Wildcard,
    },
    /// Extended private key plus derivation suffix
    XPrv {
        /// The extended key
        xkey: ExtendedPrivKey,
        /// Derivation suffix, without the wildcard step
        path: DerivationPath,
        /// Trailing wildcard, if any
        wildcard: Wildcard,
    },
    /// WIF-encoded private key
    Wif(PrivateKey),
    /// Literal public key
    Single(SinglePubKey),
}

/// One key participant of a descriptor.
#[derive(Clone, Debug)]
pub struct KeyInfo {
    /// The source substring this record was parsed from.
    pub key_expression: String,
    /// Master fingerprint and origin path, when a `[..]` prefix is present.
    pub origin: Option<bip32::KeySource>,
    /// The parsed key material.
    pub key: ParsedKey,
    /// The concrete public key. `None` until a wildcard expression has had
    /// its index substituted.
    pub pubkey: Option<PublicKey>,
    /// Master fingerprint plus the origin path extended by the derivation
    /// suffix, as recorded in PSBT `bip32_derivation` entries. Only
    /// extended keys carry one.
    pub key_source: Option<bip32::KeySource>,
}

impl KeyInfo {
    /// Whether the expression still contains an unsubstituted wildcard.
    pub fn is_ranged(&self) -> bool {
        match self.key {
            ParsedKey::XPub { wildcard, .. } | ParsedKey::XPrv { wildcard, .. } => {
                wildcard != Wildcard::None
            }
            _ => false,
        }
    }

    /// Master fingerprint of the origin, if one was given.
    pub fn master_fingerprint(&self) -> Option<bip32::Fingerprint> {
        self.origin.as_ref().map(|(fpr, _)| *fpr)
    }
}

/// Parse a single key expression.
///
/// `is_segwit` selects the public key encoding rules: in a segwit v0
/// context uncompressed keys are rejected. Wildcard expressions parse but
/// leave [`KeyInfo::pubkey`] unset until the wildcard is substituted.
pub fn parse_key_expression(
    secp: &Secp256k1<All>,
    expression: &str,
    network: Network,
    is_segwit: Option<bool>,
) -> Result<KeyInfo, Error> {
    for ch in expression.as_bytes() {
        if *ch < 20 || *ch > 127 {
            return Err(Error::InvalidKeyExpression(format!(
                "unprintable character in '{}'",
                expression
            )));
        }
    }
    if expression.is_empty() {
        return Err(Error::InvalidKeyExpression("empty key expression".to_string()));
    }

    let (key_part, origin) = parse_origin(expression)?;
    let key = parse_key_part(key_part, network)?;

    if is_segwit == Some(true) && is_uncompressed(&key) {
        return Err(Error::InvalidKeyExpression(format!(
            "uncompressed key '{}' in a segwit context",
            key_part
        )));
    }

    let pubkey = materialize(secp, &key)?;
    let key_source = full_key_source(secp, &key, &origin);
    Ok(KeyInfo {
        key_expression: expression.to_string(),
        origin,
        key,
        pubkey,
        key_source,
    })
}

/// The master fingerprint and full derivation path of an extended key:
/// its origin (or its own fingerprint when no origin is given) extended by
/// the derivation suffix.
fn full_key_source(
    secp: &Secp256k1<All>,
    key: &ParsedKey,
    origin: &Option<bip32::KeySource>,
) -> Option<bip32::KeySource> {
    let (path, own_fingerprint) = match *key {
        ParsedKey::XPub {
            ref xkey, ref path, ..
        } => (path, xkey.fingerprint()),
        ParsedKey::XPrv {
            ref xkey, ref path, ..
        } => (path, xkey.fingerprint(secp)),
        _ => return None,
    };
    match *origin {
        Some((fpr, ref origin_path)) => Some((fpr, origin_path.extend(path))),
        None => Some((own_fingerprint, path.clone())),
    }
}

/// Split an optional `[fingerprint/path]` origin prefix off a key
/// expression.
fn parse_origin(s: &str) -> Result<(&str, Option<bip32::KeySource>), Error> {
    if !s.starts_with('[') {
        return Ok((s, None));
    }

    let mut parts = s[1..].splitn(2, ']');
    let raw_origin = parts
        .next()
        .expect("splitn yields at least one part");
    let key = parts
        .next()
        .ok_or_else(|| Error::InvalidKeyExpression(format!("unclosed '[' in '{}'", s)))?;
    if key.contains(']') {
        return Err(Error::InvalidKeyExpression(format!(
            "multiple ']' in '{}'",
            s
        )));
    }

    let mut origin = raw_origin.split('/');
    let fingerprint_hex = origin
        .next()
        .expect("split yields at least one part");
    if fingerprint_hex.len() != 8 {
        return Err(Error::InvalidKeyExpression(format!(
            "master fingerprint '{}' should be 8 characters long",
            fingerprint_hex
        )));
    }
    let fingerprint = bip32::Fingerprint::from_str(fingerprint_hex).map_err(|_| {
        Error::InvalidKeyExpression(format!(
            "malformed master fingerprint '{}', expected 8 hex chars",
            fingerprint_hex
        ))
    })?;
    let origin_path = origin
        .map(ChildNumber::from_str)
        .collect::<Result<DerivationPath, _>>()
        .map_err(|_| {
            Error::InvalidKeyExpression(format!("invalid origin path in '{}'", s))
        })?;

    Ok((key, Some((fingerprint, origin_path))))
}

fn parse_key_part(key_part: &str, network: Network) -> Result<ParsedKey, Error> {
    if ["xpub", "tpub"].iter().any(|p| key_part.starts_with(p)) {
        let (xkey_str, path, wildcard) = split_xkey_deriv(key_part)?;
        let xkey = ExtendedPubKey::from_str(xkey_str).map_err(|_| {
            Error::InvalidKeyExpression(format!("cannot parse xpub in '{}'", key_part))
        })?;
        check_key_network(xkey.network, network, key_part)?;
        Ok(ParsedKey::XPub {
            xkey,
            path,
            wildcard,
        })
    } else if ["xprv", "tprv"].iter().any(|p| key_part.starts_with(p)) {
        let (xkey_str, path, wildcard) = split_xkey_deriv(key_part)?;
        let xkey = ExtendedPrivKey::from_str(xkey_str).map_err(|_| {
            Error::InvalidKeyExpression(format!("cannot parse xprv in '{}'", key_part))
        })?;
        check_key_network(xkey.network, network, key_part)?;
        Ok(ParsedKey::XPrv {
            xkey,
            path,
            wildcard,
        })
    } else if key_part.len() == 64 && key_part.chars().all(|c| c.is_ascii_hexdigit()) {
        let xonly = XOnlyPublicKey::from_str(key_part).map_err(|_| {
            Error::InvalidKeyExpression(format!("cannot parse x-only key '{}'", key_part))
        })?;
        Ok(ParsedKey::Single(SinglePubKey::XOnly(xonly)))
    } else if (key_part.len() == 66 || key_part.len() == 130)
        && key_part.chars().all(|c| c.is_ascii_hexdigit())
    {
        match &key_part[0..2] {
            "02" | "03" | "04" => {}
            prefix => {
                return Err(Error::InvalidKeyExpression(format!(
                    "public key prefix '{}' is not one of 02/03/04",
                    prefix
                )))
            }
        }
        let key = PublicKey::from_str(key_part).map_err(|_| {
            Error::InvalidKeyExpression(format!("cannot parse public key '{}'", key_part))
        })?;
        Ok(ParsedKey::Single(SinglePubKey::FullKey(key)))
    } else {
        let key = PrivateKey::from_wif(key_part).map_err(|_| {
            Error::InvalidKeyExpression(format!("'{}' matches no key format", key_part))
        })?;
        check_key_network(key.network, network, key_part)?;
        Ok(ParsedKey::Wif(key))
    }
}

/// Split an extended key from its derivation suffix, detecting a trailing
/// wildcard step.
fn split_xkey_deriv(key_part: &str) -> Result<(&str, DerivationPath, Wildcard), Error> {
    let mut segments = key_part.split('/');
    let xkey_str = segments.next().expect("split yields at least one part");

    let mut wildcard = Wildcard::None;
    let path = segments
        .filter_map(|step| {
            if wildcard != Wildcard::None {
                Some(Err(Error::InvalidKeyExpression(format!(
                    "'*' must be the last step of '{}'",
                    key_part
                ))))
            } else if step == "*" {
                wildcard = Wildcard::Unhardened;
                None
            } else if step == "*'" || step == "*h" {
                wildcard = Wildcard::Hardened;
                None
            } else {
                Some(ChildNumber::from_str(step).map_err(|_| {
                    Error::InvalidKeyExpression(format!(
                        "invalid derivation step '{}' in '{}'",
                        step, key_part
                    ))
                }))
            }
        })
        .collect::<Result<DerivationPath, _>>()?;

    Ok((xkey_str, path, wildcard))
}

fn check_key_network(key_network: Network, network: Network, key_part: &str) -> Result<(), Error> {
    // xpub/xprv/WIF version bytes only distinguish mainnet from the test
    // networks, so testnet material is accepted on regtest and signet.
    let mainnet_key = key_network == Network::Bitcoin;
    let mainnet = network == Network::Bitcoin;
    if mainnet_key != mainnet {
        return Err(Error::InvalidKeyExpression(format!(
            "key '{}' does not belong to {}",
            key_part, network
        )));
    }
    Ok(())
}

fn is_uncompressed(key: &ParsedKey) -> bool {
    match *key {
        ParsedKey::Single(SinglePubKey::FullKey(ref pk)) => !pk.compressed,
        ParsedKey::Wif(ref sk) => !sk.compressed,
        _ => false,
    }
}

/// Derive the concrete public key of a non-ranged parsed key.
fn materialize(secp: &Secp256k1<All>, key: &ParsedKey) -> Result<Option<PublicKey>, Error> {
    match *key {
        ParsedKey::XPub {
            ref xkey,
            ref path,
            wildcard,
        } => {
            if wildcard != Wildcard::None {
                return Ok(None);
            }
            let derived = xkey.derive_pub(secp, path).map_err(|e| {
                Error::InvalidKeyExpression(format!("cannot derive from xpub: {}", e))
            })?;
            Ok(Some(PublicKey::new(derived.public_key)))
        }
        ParsedKey::XPrv {
            ref xkey,
            ref path,
            wildcard,
        } => {
            if wildcard != Wildcard::None {
                return Ok(None);
            }
            let derived = xkey.derive_priv(secp, path).map_err(|e| {
                Error::InvalidKeyExpression(format!("cannot derive from xprv: {}", e))
            })?;
            let xpub = ExtendedPubKey::from_priv(secp, &derived);
            Ok(Some(PublicKey::new(xpub.public_key)))
        }
        ParsedKey::Wif(ref sk) => Ok(Some(sk.public_key(secp))),
        ParsedKey::Single(SinglePubKey::FullKey(pk)) => Ok(Some(pk)),
        ParsedKey::Single(SinglePubKey::XOnly(xonly)) => {
            Ok(Some(PublicKey::new(xonly.public_key(Parity::Even))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secp() -> Secp256k1<All> {
        Secp256k1::new()
    }

    #[test]
    fn parse_raw_pubkey() {
        let hex = "02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5";
        let info =
            parse_key_expression(&secp(), hex, Network::Bitcoin, Some(true)).unwrap();
        assert_eq!(info.key_expression, hex);
        assert!(info.origin.is_none());
        assert_eq!(info.pubkey.unwrap().to_string(), hex);
    }

    #[test]
    fn uncompressed_rejected_in_segwit() {
        let hex = "04a34b99f22c790c4e36b2b3c2c35a36db06226e41c692fc82b8b56ac1c540c5bd5b8dec5235a0fa8722476c7709c02559e3aa73aa03918ba2d492eea75abea235";
        assert!(matches!(
            parse_key_expression(&secp(), hex, Network::Bitcoin, Some(true)),
            Err(Error::InvalidKeyExpression(_))
        ));
        // Fine in a pre-segwit context.
        assert!(parse_key_expression(&secp(), hex, Network::Bitcoin, Some(false)).is_ok());
    }

    #[test]
    fn parse_xpub_with_origin() {
        let expr = "[d34db33f/44'/0'/0']xpub6ERApfZwUNrhLCkDtcHTcxd75RbzS1ed54G1LkBUHQVHQKqhMkhgbmJbZRkrgZw4koxb5JaHWkY4ALHY2grBGRjaDMzQLcgJvLJuZZvRcEL/1/2";
        let info = parse_key_expression(&secp(), expr, Network::Bitcoin, Some(false)).unwrap();
        let (fpr, origin_path) = info.origin.clone().unwrap();
        assert_eq!(fpr.to_string(), "d34db33f");
        assert_eq!(origin_path.to_string(), "m/44'/0'/0'");
        assert!(info.pubkey.is_some());
        let (_, full_path) = info.key_source.clone().unwrap();
        assert_eq!(full_path.to_string(), "m/44'/0'/0'/1/2");
    }

    #[test]
    fn ranged_xpub_defers_pubkey() {
        let expr = "xpub6ERApfZwUNrhLCkDtcHTcxd75RbzS1ed54G1LkBUHQVHQKqhMkhgbmJbZRkrgZw4koxb5JaHWkY4ALHY2grBGRjaDMzQLcgJvLJuZZvRcEL/1/*";
        let info = parse_key_expression(&secp(), expr, Network::Bitcoin, Some(true)).unwrap();
        assert!(info.is_ranged());
        assert!(info.pubkey.is_none());
    }

    #[test]
    fn wildcard_must_be_last() {
        let expr = "xpub6ERApfZwUNrhLCkDtcHTcxd75RbzS1ed54G1LkBUHQVHQKqhMkhgbmJbZRkrgZw4koxb5JaHWkY4ALHY2grBGRjaDMzQLcgJvLJuZZvRcEL/1/*/44";
        assert!(matches!(
            parse_key_expression(&secp(), expr, Network::Bitcoin, None),
            Err(Error::InvalidKeyExpression(_))
        ));
    }

    #[test]
    fn malformed_origins() {
        let secp = secp();
        let bad_fingerprint = "[NonHexor]xpub6ERApfZwUNrhLCkDtcHTcxd75RbzS1ed54G1LkBUHQVHQKqhMkhgbmJbZRkrgZw4koxb5JaHWkY4ALHY2grBGRjaDMzQLcgJvLJuZZvRcEL/1";
        assert!(parse_key_expression(&secp, bad_fingerprint, Network::Bitcoin, None).is_err());

        let double_bracket = "[78412e3a]]03f28773c2d975288bc7d1d205c3748651b075fbc6610e58cddeeddf8f19405aa8";
        assert!(parse_key_expression(&secp, double_bracket, Network::Bitcoin, None).is_err());

        let unclosed = "[78412e3a03f28773c2d975288bc7d1d205c3748651b075fbc6610e58cddeeddf8f19405aa8";
        assert!(parse_key_expression(&secp, unclosed, Network::Bitcoin, None).is_err());
    }

    #[test]
    fn network_mismatch_rejected() {
        let tpub = "tpubD6NzVbkrYhZ4XHndKkuB8FifXm8r5FQHwrN6oZuWCz13qb93rtgKvD4PQsqC4HP4yhV3tA2fqr2RbY5mNXfM7RxXUoeABoDtsFUq2zJq6YK";
        assert!(parse_key_expression(&secp(), tpub, Network::Bitcoin, None).is_err());
        assert!(parse_key_expression(&secp(), tpub, Network::Regtest, None).is_ok());
    }

    #[test]
    fn wif_derives_pubkey() {
        let secp = secp();
        let wif = "KxQqtbUnMugSEbKHG3saknvVYux1cgFjFqWzMfwnFhLm8QrGq26v";
        let info = parse_key_expression(&secp, wif, Network::Bitcoin, Some(true)).unwrap();
        let sk = PrivateKey::from_wif(wif).unwrap();
        assert_eq!(info.pubkey.unwrap(), sk.public_key(&secp));
    }

    #[test]
    fn deriv_on_xprv_matches_neutered_key() {
        let secp = secp();
        let expr = "tprv8ZgxMBicQKsPcwcD4gSnMti126ZiETsuX7qwrtMypr6FBwAP65puFn4v6c3jrN9VwtMRMph6nyT63NrfUL4C3nBzPcduzVSuHD7zbX2JKVc/0'/1'/2";
        let info = parse_key_expression(&secp, expr, Network::Testnet, Some(false)).unwrap();

        let xprv = ExtendedPrivKey::from_str(
            "tprv8ZgxMBicQKsPcwcD4gSnMti126ZiETsuX7qwrtMypr6FBwAP65puFn4v6c3jrN9VwtMRMph6nyT63NrfUL4C3nBzPcduzVSuHD7zbX2JKVc",
        )
        .unwrap();
        let path: DerivationPath = vec![
            ChildNumber::from_hardened_idx(0).unwrap(),
            ChildNumber::from_hardened_idx(1).unwrap(),
            ChildNumber::from_normal_idx(2).unwrap(),
        ]
        .into();
        let derived = xprv.derive_priv(&secp, &path).unwrap();
        let expected = ExtendedPubKey::from_priv(&secp, &derived).public_key;
        assert_eq!(info.pubkey.unwrap().inner, expected);
    }

    #[test]
    fn hardened_step_on_xpub_fails() {
        let expr = "xpub6ERApfZwUNrhLCkDtcHTcxd75RbzS1ed54G1LkBUHQVHQKqhMkhgbmJbZRkrgZw4koxb5JaHWkY4ALHY2grBGRjaDMzQLcgJvLJuZZvRcEL/1'/0";
        assert!(matches!(
            parse_key_expression(&secp(), expr, Network::Bitcoin, None),
            Err(Error::InvalidKeyExpression(_))
        ));
    }
}
