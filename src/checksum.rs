// SPDX-License-Identifier: CC0-1.0

//! Descriptor checksum
//!
//! The 8-character checksum that Bitcoin Core appends to descriptors after
//! a `#` separator, as specified in [BIP-380].
//!
//! [BIP-380]: <https://github.com/bitcoin/bips/blob/master/bip-0380.mediawiki>

use crate::Error;

const INPUT_CHARSET: &str = "0123456789()[],'/*abcdefgh@:$%{}IJKLMNOPQRSTUVWXYZ&+-.;<=>?!^_|~ijklmnopqrstuvwxyzABCDEFGH`#\"\\ ";
const CHECKSUM_CHARSET: &str = "qpzry9x8gf2tvdw0s3jn54khce6mua7l";

const CHECKSUM_LENGTH: usize = 8;

fn poly_mod(mut c: u64, val: u64) -> u64 {
    let c0 = c >> 35;
    c = ((c & 0x7ffffffff) << 5) ^ val;
    if c0 & 1 > 0 {
        c ^= 0xf5dee51989
    };
    if c0 & 2 > 0 {
        c ^= 0xa9fdca3312
    };
    if c0 & 4 > 0 {
        c ^= 0x1bab10e32d
    };
    if c0 & 8 > 0 {
        c ^= 0x3706b1677a
    };
    if c0 & 16 > 0 {
        c ^= 0x644d626ffd
    };
    c
}

/// Compute the checksum of a descriptor body.
///
/// The body must not contain a `#` separator or a checksum of its own; this
/// function does not check that the descriptor is syntactically valid.
pub fn desc_checksum(desc: &str) -> Result<String, Error> {
    let mut c = 1u64;
    let mut cls = 0u64;
    let mut clscount = 0u64;

    for ch in desc.chars() {
        let pos = INPUT_CHARSET
            .find(ch)
            .ok_or_else(|| Error::InvalidDescriptor(format!("invalid character '{}'", ch)))?
            as u64;
        c = poly_mod(c, pos & 31);
        cls = cls * 3 + (pos >> 5);
        clscount += 1;
        if clscount == 3 {
            c = poly_mod(c, cls);
            cls = 0;
            clscount = 0;
        }
    }
    if clscount > 0 {
        c = poly_mod(c, cls);
    }
    (0..CHECKSUM_LENGTH).for_each(|_| c = poly_mod(c, 0));
    c ^= 1;

    let mut chars = String::with_capacity(CHECKSUM_LENGTH);
    for j in 0..CHECKSUM_LENGTH {
        let pos = ((c >> (5 * (7 - j))) & 31) as usize;
        chars.push(
            CHECKSUM_CHARSET
                .chars()
                .nth(pos)
                .expect("poly_mod outputs 5-bit groups"),
        );
    }
    Ok(chars)
}

/// Split a descriptor at its checksum and verify it when present.
///
/// Returns the bare body with the `#checksum` suffix removed. A present
/// checksum must be exactly eight characters of the bech32 charset and
/// match the computed value; a second `#` anywhere in the string is
/// rejected.
pub fn verify_checksum(s: &str) -> Result<&str, Error> {
    let mut parts = s.splitn(2, '#');
    let body = parts.next().expect("splitn yields at least one part");
    let checksum = match parts.next() {
        None => return Ok(body),
        Some(cs) => cs,
    };

    if checksum.len() != CHECKSUM_LENGTH {
        return Err(Error::BadChecksum(format!(
            "expected {} checksum characters, found {}",
            CHECKSUM_LENGTH,
            checksum.len()
        )));
    }
    if checksum.chars().any(|ch| !CHECKSUM_CHARSET.contains(ch)) {
        return Err(Error::BadChecksum(format!(
            "'{}' contains characters outside the checksum charset",
            checksum
        )));
    }

    let expected = desc_checksum(body)?;
    if expected != checksum {
        return Err(Error::BadChecksum(format!(
            "'{}' is invalid, expected '{}'",
            checksum, expected
        )));
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! check_expected {
        ($desc: expr, $checksum: expr) => {
            assert_eq!(desc_checksum($desc).unwrap(), $checksum);
        };
    }

    #[test]
    fn valid_descriptor_checksum() {
        check_expected!(
            "wpkh(tprv8ZgxMBicQKsPdpkqS7Eair4YxjcuuvDPNYmKX3sCniCf16tHEVrjjiSXEkFRnUH77yXc6ZcwHHcLNfjdi5qUvw3VDfgYiH5mNsj5izuiu2N/1/2/*)",
            "tqz0nc62"
        );
        check_expected!(
            "pkh(tpubD6NzVbkrYhZ4XHndKkuB8FifXm8r5FQHwrN6oZuWCz13qb93rtgKvD4PQsqC4HP4yhV3tA2fqr2RbY5mNXfM7RxXUoeABoDtsFUq2zJq6YK/44'/1'/0'/0/*)",
            "lasegmfs"
        );
        check_expected!(
            "sh(multi(2,[00000000/111'/222]xprvA1RpRA33e1JQ7ifknakTFpgNXPmW2YvmhqLQYMmrj4xJXXWYpDPS3xz7iAxn8L39njGVyuoseXzU6rcxFLJ8HFsTjSyQbLYnMpCqE2VbFWc,xprv9uPDJpEQgRQfDcW7BkF7eTya6RPxXeJCqCJGHuCJ4GiRVLzkTXBAJMu2qaMWPrS7AANYqdq6vcBcBUdJCVVFceUvJFjaPdGZ2y9WACViL4L/0))",
            "ggrsrxfy"
        );
        check_expected!(
            "sh(multi(2,[00000000/111'/222]xpub6ERApfZwUNrhLCkDtcHTcxd75RbzS1ed54G1LkBUHQVHQKqhMkhgbmJbZRkrgZw4koxb5JaHWkY4ALHY2grBGRjaDMzQLcgJvLJuZZvRcEL,xpub68NZiKmJWnxxS6aaHmn81bvJeTESw724CRDs6HbuccFQN9Ku14VQrADWgqbhhTHBaohPX4CjNLf9fq9MYo6oDaPPLPxSb7gwQN3ih19Zm4Y/0))",
            "tjg09x5t"
        );
    }

    #[test]
    fn bip_380_vectors_valid() {
        for tc in &["raw(deadbeef)#89f8spxm", "raw(deadbeef)"] {
            assert!(verify_checksum(tc).is_ok(), "false negative: {}", tc);
        }
    }

    #[test]
    fn bip_380_vectors_invalid() {
        let tcs = &[
            "raw(deadbeef)#",          // Missing checksum.
            "raw(deadbeef)#89f8spxmx", // Too long checksum.
            "raw(deadbeef)#89f8spx",   // Too short checksum.
            "raw(dedbeef)#89f8spxm",   // Error in payload.
            "raw(deadbeef)##9f8spxm",  // Error in checksum.
            "raw(Ü)#00000000",         // Invalid characters in payload.
        ];
        for tc in tcs {
            assert!(verify_checksum(tc).is_err(), "false positive: {}", tc);
        }
    }

    #[test]
    fn compute_is_fixed_point() {
        let body = "pkh(02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5)";
        let sum = desc_checksum(body).unwrap();
        let full = format!("{}#{}", body, sum);
        assert_eq!(verify_checksum(&full).unwrap(), body);
    }

    #[test]
    fn single_character_mutation_is_rejected() {
        let body = "pkh(02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5)";
        let sum = desc_checksum(body).unwrap();
        for (i, _) in sum.char_indices() {
            let mut mutated: Vec<char> = sum.chars().collect();
            mutated[i] = if mutated[i] == 'q' { 'p' } else { 'q' };
            let full = format!("{}#{}", body, mutated.iter().collect::<String>());
            assert!(verify_checksum(&full).is_err(), "mutation accepted: {}", full);
        }
    }
}
