//! Consensus whitelist of super-staker scripts.
//!
//! Super stakers are exempt from the maturity requirement and, past a short
//! delay, from the difficulty comparison. The table below is consensus data:
//! changing it forks the chain.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use emberd_consensus::Network;
use emberd_script::standard::{p2pk_script, p2pkh_script};

const MAIN_SUPER_STAKER_PUBKEYS: [&str; 5] = [
    "0306ccf3e23ab1102cf06d736e7efe8e9b76c1448aee3c532e799007e2a7bcb5e0",
    "0370066183f0c9600363fdc084e64cf97079b281d6f2ab258345e0f3d836b87a01",
    "02c1721bf711a59a6eadb4edff717aaedcc0bfb82699ed9a8bbd0a93f22d391ee2",
    "02605fc7bd9d51b0e9ae0723528e6f98b20435b3e3b8754cf9f58b00b0befb1109",
    "0344e02fc7a6e50342676559543c9651d977d4b2826c5b7b360fd1639bb23182cb",
];

const MAIN_SUPER_STAKER_KEY_IDS: [&str; 5] = [
    "06156ffdfc890bfc411002385644c15b5e90a749",
    "7e65714e92ebc3926370f3c531db5244955a98f5",
    "092ab315c198e8c5e9aed36f2371c446e65aface",
    "e458f37672fbbb17803bae54fb8e53d000cd4234",
    "f3be13345a13414696ac85901a714c2071205197",
];

// Regtest whitelists the two well-known test keys so the relaxed paths can
// be exercised on a throwaway chain.
const REGTEST_SUPER_STAKER_PUBKEYS: [&str; 2] = [
    "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
    "02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5",
];

static MAIN_SCRIPTS: OnceLock<BTreeSet<Vec<u8>>> = OnceLock::new();
static REGTEST_SCRIPTS: OnceLock<BTreeSet<Vec<u8>>> = OnceLock::new();

pub fn super_staker_scripts(network: Network) -> &'static BTreeSet<Vec<u8>> {
    match network {
        Network::Mainnet | Network::Testnet => MAIN_SCRIPTS
            .get_or_init(|| build_scripts(&MAIN_SUPER_STAKER_PUBKEYS, &MAIN_SUPER_STAKER_KEY_IDS)),
        Network::Regtest => {
            REGTEST_SCRIPTS.get_or_init(|| build_scripts(&REGTEST_SUPER_STAKER_PUBKEYS, &[]))
        }
    }
}

pub fn is_super_staker(network: Network, script_pubkey: &[u8]) -> bool {
    let scripts = super_staker_scripts(network);
    !scripts.is_empty() && scripts.contains(script_pubkey)
}

fn build_scripts(pubkeys: &[&str], key_ids: &[&str]) -> BTreeSet<Vec<u8>> {
    let mut scripts = BTreeSet::new();
    for hex in pubkeys {
        let pubkey = hex_to_bytes(hex).expect("super staker pubkey");
        scripts.insert(p2pk_script(&pubkey));
    }
    for hex in key_ids {
        let bytes = hex_to_bytes(hex).expect("super staker key id");
        let key_id: [u8; 20] = bytes
            .as_slice()
            .try_into()
            .expect("super staker key id length");
        scripts.insert(p2pkh_script(&key_id));
    }
    scripts
}

fn hex_to_bytes(input: &str) -> Option<Vec<u8>> {
    if input.len() % 2 == 1 {
        return None;
    }
    let mut bytes = Vec::with_capacity(input.len() / 2);
    for i in (0..input.len()).step_by(2) {
        let byte = u8::from_str_radix(&input[i..i + 2], 16).ok()?;
        bytes.push(byte);
    }
    Some(bytes)
}
