// SPDX-License-Identifier: CC0-1.0

//! Miniscript expansion
//!
//! Separates the shape of a miniscript from its key material: every key
//! expression is replaced by a placeholder `@i`, and the placeholder map
//! remembers which key each `@i` stands for. The same shape can then be
//! compiled or satisfied against any set of concrete keys.

use std::fmt;

use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::Network;

use crate::keys::KeyInfo;
use crate::{keys, Error};

/// Ordered map from placeholders `@0, @1, ...` to the key expressions they
/// replace.
///
/// Placeholders are dense and numbered in order of first appearance;
/// repeated occurrences of the same key expression share one placeholder.
#[derive(Clone, Debug, Default)]
pub struct ExpansionMap {
    entries: Vec<KeyInfo>,
}

impl ExpansionMap {
    /// The key behind placeholder `@index`.
    pub fn get(&self, index: usize) -> Option<&KeyInfo> {
        self.entries.get(index)
    }

    /// Number of distinct key expressions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(placeholder index, key)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &KeyInfo)> {
        self.entries.iter().enumerate()
    }

    /// Register a key expression, returning its placeholder index.
    pub(crate) fn insert(&mut self, info: KeyInfo) -> usize {
        match self
            .entries
            .iter()
            .position(|e| e.key_expression == info.key_expression)
        {
            Some(i) => i,
            None => {
                self.entries.push(info);
                self.entries.len() - 1
            }
        }
    }

    /// Replace every `@i` placeholder in `expanded` by the hex encoding of
    /// the corresponding concrete public key.
    ///
    /// Fails if a placeholder is unknown or its key has not been
    /// materialized (a wildcard expression without an index).
    pub fn substitute(&self, expanded: &str) -> Result<String, Error> {
        let mut out = String::with_capacity(expanded.len());
        let bytes = expanded.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] != b'@' {
                out.push(bytes[i] as char);
                i += 1;
                continue;
            }
            let digits_start = i + 1;
            let mut digits_end = digits_start;
            while digits_end < bytes.len() && bytes[digits_end].is_ascii_digit() {
                digits_end += 1;
            }
            if digits_end == digits_start {
                return Err(Error::InvalidDescriptor(format!(
                    "stray '@' in expanded expression '{}'",
                    expanded
                )));
            }
            let index: usize = expanded[digits_start..digits_end]
                .parse()
                .expect("digits only");
            let info = self.get(index).ok_or_else(|| {
                Error::InvalidDescriptor(format!("unknown placeholder '@{}'", index))
            })?;
            let pubkey = info.pubkey.ok_or(Error::MissingIndex)?;
            out.push_str(&pubkey.to_string());
            i = digits_end;
        }
        Ok(out)
    }
}

impl fmt::Display for ExpansionMap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, info) in self.iter() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "@{}={}", i, info.key_expression)?;
        }
        Ok(())
    }
}

/// Fragments whose arguments are digests or numbers, never keys. A sha256
/// digest is 64 hex characters and would otherwise be indistinguishable
/// from an x-only key.
const NON_KEY_FRAGMENTS: [&str; 6] = [
    "sha256",
    "hash256",
    "ripemd160",
    "hash160",
    "after",
    "older",
];

fn is_delimiter(b: u8) -> bool {
    matches!(b, b'(' | b')' | b',' | b':' | b'{' | b'}')
}

/// Replace every key expression inside `miniscript` with a placeholder.
///
/// Returns the expanded miniscript and the placeholder map. Key
/// expressions are located as the maximal delimiter-free substrings that
/// parse as a key under the given context; fragment names (tokens directly
/// followed by `(`) and the arguments of digest/timelock fragments are
/// never keys.
pub fn expand_miniscript(
    secp: &Secp256k1<All>,
    miniscript: &str,
    network: Network,
    is_segwit: bool,
) -> Result<(String, ExpansionMap), Error> {
    let mut map = ExpansionMap::default();
    let mut out = String::with_capacity(miniscript.len());
    let mut fragments: Vec<&str> = Vec::new();

    let bytes = miniscript.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if is_delimiter(bytes[i]) {
            if bytes[i] == b')' {
                fragments.pop();
            }
            out.push(bytes[i] as char);
            i += 1;
            continue;
        }

        let start = i;
        while i < bytes.len() && !is_delimiter(bytes[i]) {
            i += 1;
        }
        let token = &miniscript[start..i];

        // A token directly followed by '(' names a fragment, not a key.
        if i < bytes.len() && bytes[i] == b'(' {
            fragments.push(token);
            out.push_str(token);
            continue;
        }

        let in_non_key_position = fragments
            .last()
            .map_or(false, |f| NON_KEY_FRAGMENTS.contains(f));
        if !in_non_key_position {
            if let Ok(info) =
                keys::parse_key_expression(secp, token, network, Some(is_segwit))
            {
                let index = map.insert(info);
                out.push('@');
                out.push_str(&index.to_string());
                continue;
            }
        }
        out.push_str(token);
    }

    Ok((out, map))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_A: &str = "02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5";
    const KEY_B: &str = "0379be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

    fn secp() -> Secp256k1<All> {
        Secp256k1::new()
    }

    #[test]
    fn single_key_is_expanded() {
        let ms = format!("and_v(v:pk({}),older(144))", KEY_A);
        let (expanded, map) =
            expand_miniscript(&secp(), &ms, Network::Bitcoin, true).unwrap();
        assert_eq!(expanded, "and_v(v:pk(@0),older(144))");
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(0).unwrap().key_expression, KEY_A);
    }

    #[test]
    fn repeated_keys_share_a_placeholder() {
        let ms = format!("or_b(pk({}),s:pk({}))", KEY_A, KEY_A);
        let (expanded, map) =
            expand_miniscript(&secp(), &ms, Network::Bitcoin, true).unwrap();
        assert_eq!(expanded, "or_b(pk(@0),s:pk(@0))");
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn distinct_keys_are_numbered_in_appearance_order() {
        let ms = format!("multi(2,{},{})", KEY_A, KEY_B);
        let (expanded, map) =
            expand_miniscript(&secp(), &ms, Network::Bitcoin, true).unwrap();
        assert_eq!(expanded, "multi(2,@0,@1)");
        assert_eq!(map.get(0).unwrap().key_expression, KEY_A);
        assert_eq!(map.get(1).unwrap().key_expression, KEY_B);
    }

    #[test]
    fn sha256_digest_is_not_a_key() {
        let digest = "6c60f404f8167a38fc70eaf8aa17ac351023bef86bcb9d1086a19afe95bd5333";
        let ms = format!("and_v(v:sha256({}),pk({}))", digest, KEY_A);
        let (expanded, map) =
            expand_miniscript(&secp(), &ms, Network::Bitcoin, true).unwrap();
        assert_eq!(expanded, format!("and_v(v:sha256({}),pk(@0))", digest));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn substitution_restores_keys() {
        let ms = format!("and_v(v:pk({}),older(144))", KEY_A);
        let (expanded, map) =
            expand_miniscript(&secp(), &ms, Network::Bitcoin, true).unwrap();
        assert_eq!(map.substitute(&expanded).unwrap(), ms);
    }

    #[test]
    fn two_digit_placeholders_do_not_collide() {
        let secp = secp();
        let mut map = ExpansionMap::default();
        for i in 0..11u32 {
            // Distinct keys derived from a throwaway xpub.
            let expr = format!("xpub6ERApfZwUNrhLCkDtcHTcxd75RbzS1ed54G1LkBUHQVHQKqhMkhgbmJbZRkrgZw4koxb5JaHWkY4ALHY2grBGRjaDMzQLcgJvLJuZZvRcEL/{}", i);
            let info =
                keys::parse_key_expression(&secp, &expr, Network::Bitcoin, Some(true)).unwrap();
            map.insert(info);
        }
        let ten = map.get(10).unwrap().pubkey.unwrap().to_string();
        let one = map.get(1).unwrap().pubkey.unwrap().to_string();
        assert_eq!(map.substitute("pk(@10)").unwrap(), format!("pk({})", ten));
        assert_eq!(map.substitute("pk(@1)").unwrap(), format!("pk({})", one));
    }

    #[test]
    fn unresolved_wildcard_cannot_be_substituted() {
        let ms = "pk(xpub6ERApfZwUNrhLCkDtcHTcxd75RbzS1ed54G1LkBUHQVHQKqhMkhgbmJbZRkrgZw4koxb5JaHWkY4ALHY2grBGRjaDMzQLcgJvLJuZZvRcEL/1/*)";
        let (expanded, map) =
            expand_miniscript(&secp(), ms, Network::Bitcoin, true).unwrap();
        assert_eq!(expanded, "pk(@0)");
        assert!(matches!(
            map.substitute(&expanded),
            Err(Error::MissingIndex)
        ));
    }
}
