//! Account activation tokens.
//!
//! A token has the form `<timestamp in base 36>-<20 hex digits>`, where the
//! digits are a truncated HMAC-SHA256 of `user id:timestamp:active` keyed with
//! the server's secret. Including the activation state means a token stops
//! working once the account it was issued for has been activated.

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::User;
use crate::util::to_base36;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_BYTES: usize = 10;

fn mac(user: &User, timestamp: i64, secret: &[u8]) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(format!("{}:{}:{}", user.id, timestamp, user.active).as_bytes());
    mac
}

pub fn make_token(user: &User, secret: &[u8], now: DateTime<Utc>) -> String {
    let timestamp = now.timestamp();
    let signature = mac(user, timestamp, secret).finalize().into_bytes();

    format!(
        "{}-{}",
        to_base36(timestamp.max(0) as u64),
        hex::encode(&signature[..SIGNATURE_BYTES])
    )
}

pub fn check_token(
    user: &User,
    token: &str,
    secret: &[u8],
    now: DateTime<Utc>,
    timeout: Duration,
) -> bool {
    let (timestamp, signature) = match token.split_once('-') {
        Some(parts) => parts,
        None => return false,
    };

    let timestamp = match i64::from_str_radix(timestamp, 36) {
        Ok(it) => it,
        Err(_) => return false,
    };
    let signature = match hex::decode(signature) {
        Ok(it) if it.len() == SIGNATURE_BYTES => it,
        _ => return false,
    };

    if mac(user, timestamp, secret)
        .verify_truncated_left(&signature)
        .is_err()
    {
        return false;
    }

    let age = now.timestamp().saturating_sub(timestamp);
    (0..=timeout.num_seconds()).contains(&age)
}
