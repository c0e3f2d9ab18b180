//! Standard script classification and construction.

use emberd_primitives::hash::hash160;

pub type KeyId = [u8; 20];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScriptType {
    P2Pk,
    P2Pkh,
    P2Sh,
    NullData,
    Unknown,
}

pub const OP_DUP: u8 = 0x76;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_RETURN: u8 = 0x6a;

pub fn classify_script_pubkey(script: &[u8]) -> ScriptType {
    if is_p2pkh(script) {
        ScriptType::P2Pkh
    } else if is_p2sh(script) {
        ScriptType::P2Sh
    } else if is_p2pk(script) {
        ScriptType::P2Pk
    } else if is_null_data(script) {
        ScriptType::NullData
    } else {
        ScriptType::Unknown
    }
}

/// The key id a script pays to: the embedded hash160 for P2PKH, the hash160
/// of the pushed key for P2PK. Other shapes have no single key id.
pub fn extract_key_id(script: &[u8]) -> Option<(ScriptType, KeyId)> {
    if is_p2pkh(script) {
        let mut key_id = [0u8; 20];
        key_id.copy_from_slice(&script[3..23]);
        return Some((ScriptType::P2Pkh, key_id));
    }
    if is_p2pk(script) {
        let key_len = script[0] as usize;
        return Some((ScriptType::P2Pk, hash160(&script[1..1 + key_len])));
    }
    None
}

pub fn is_p2pkh(script: &[u8]) -> bool {
    script.len() == 25
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == 0x14
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG
}

pub fn is_p2sh(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == OP_HASH160 && script[1] == 0x14 && script[22] == OP_EQUAL
}

pub fn is_p2pk(script: &[u8]) -> bool {
    let key_len = match script.first().copied() {
        Some(len @ 33) => len,
        Some(len @ 65) => len,
        _ => return false,
    };

    let expected_len = key_len as usize + 2;
    script.len() == expected_len && script[script.len() - 1] == OP_CHECKSIG
}

pub fn is_null_data(script: &[u8]) -> bool {
    script.first() == Some(&OP_RETURN)
}

pub fn p2pkh_script(key_id: &KeyId) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.push(OP_DUP);
    script.push(OP_HASH160);
    script.push(0x14);
    script.extend_from_slice(key_id);
    script.push(OP_EQUALVERIFY);
    script.push(OP_CHECKSIG);
    script
}

pub fn p2pk_script(pubkey: &[u8]) -> Vec<u8> {
    let mut script = Vec::with_capacity(pubkey.len() + 2);
    script.push(pubkey.len() as u8);
    script.extend_from_slice(pubkey);
    script.push(OP_CHECKSIG);
    script
}

/// Single-opcode OP_RETURN; provably unspendable, used to burn a reward share.
pub fn burn_script() -> Vec<u8> {
    vec![OP_RETURN]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_standard_shapes() {
        let key_id = [0x42u8; 20];
        assert_eq!(
            classify_script_pubkey(&p2pkh_script(&key_id)),
            ScriptType::P2Pkh
        );

        let pubkey = [0x02u8; 33];
        assert_eq!(
            classify_script_pubkey(&p2pk_script(&pubkey)),
            ScriptType::P2Pk
        );

        assert_eq!(classify_script_pubkey(&burn_script()), ScriptType::NullData);
        assert_eq!(classify_script_pubkey(&[0x51]), ScriptType::Unknown);
    }

    #[test]
    fn p2pkh_key_id_is_embedded_hash() {
        let key_id = [0x42u8; 20];
        let (kind, extracted) = extract_key_id(&p2pkh_script(&key_id)).expect("key id");
        assert_eq!(kind, ScriptType::P2Pkh);
        assert_eq!(extracted, key_id);
    }

    #[test]
    fn p2pk_key_id_is_hash_of_pubkey() {
        let pubkey = [0x03u8; 33];
        let (kind, extracted) = extract_key_id(&p2pk_script(&pubkey)).expect("key id");
        assert_eq!(kind, ScriptType::P2Pk);
        assert_eq!(extracted, hash160(&pubkey));
    }

    #[test]
    fn no_key_id_for_p2sh_or_burn() {
        let mut p2sh = vec![OP_HASH160, 0x14];
        p2sh.extend_from_slice(&[0u8; 20]);
        p2sh.push(OP_EQUAL);
        assert!(extract_key_id(&p2sh).is_none());
        assert!(extract_key_id(&burn_script()).is_none());
    }
}
