//! Utility functions for identifiers and hashing

use bech32::{Bech32, Bech32m};
use uuid7::uuid7;

// construct a unique record id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

// same key parts always give the same id, so a repeated write lands on the same record
pub fn digest_to_bech32(hrp: &str, parts: &[&str]) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let digest = sha256::digest(parts.join(":"));
    let encode = bech32::encode::<Bech32>(hrp, &digest.as_bytes()[..32])?;
    Ok(encode)
}
