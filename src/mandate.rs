//! AP2 mandate verification (spec `§4.4`).
//!
//! Checks run in a fixed order and short-circuit on the first failure. The canonical
//! signing payload is a compact JSON object with lexicographically sorted keys and no
//! signature field (documented as an Open Question decision in `DESIGN.md`); the EIP-191
//! personal-message digest of those bytes is what `signature` must recover to
//! `owner_pubkey`.

use alloy_primitives::{eip191_hash_message, Address, Signature};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::MandateError;
use crate::spend_tracker::SpendTracker;
use crate::types::{Mandate, MandateVerdict};

pub const CONFIRM_HEADER: &str = "x-mandate-confirm";

/// Builds the deterministic signing payload: sorted-key, whitespace-free JSON of every
/// mandate field except `signature`. `allowlisted_tool_ids` is sorted before
/// serialization so that two sets with the same members always produce identical bytes.
pub fn canonical_payload(mandate: &Mandate) -> String {
    let mut allowlist: Vec<&String> = mandate.allowlisted_tool_ids.iter().collect();
    allowlist.sort();
    let mut obj = serde_json::Map::new();
    obj.insert(
        "allowlistedToolIds".to_string(),
        serde_json::Value::Array(allowlist.into_iter().map(|s| serde_json::Value::String(s.clone())).collect()),
    );
    obj.insert("expiresAt".to_string(), serde_json::Value::String(mandate.expires_at.to_rfc3339()));
    obj.insert(
        "mandateId".to_string(),
        serde_json::Value::String(mandate.mandate_id.clone()),
    );
    obj.insert(
        "maxSpendUsdcPerDay".to_string(),
        serde_json::Value::String(mandate.max_spend_usdc_per_day.clone()),
    );
    obj.insert(
        "ownerPubkey".to_string(),
        serde_json::Value::String(mandate.owner_pubkey.to_ascii_lowercase()),
    );
    if let Some(threshold) = &mandate.require_user_confirm_for_price_over {
        obj.insert(
            "requireUserConfirmForPriceOver".to_string(),
            serde_json::Value::String(threshold.clone()),
        );
    }
    // serde_json::Map is a BTreeMap by default, so keys are already sorted on iteration.
    serde_json::Value::Object(obj).to_string()
}

fn verify_signature(mandate: &Mandate) -> Result<(), MandateError> {
    let payload = canonical_payload(mandate);
    let message_hash = eip191_hash_message(payload.as_bytes());
    let signature = Signature::from_str(&mandate.signature).map_err(|_| MandateError::Malformed)?;
    let recovered: Address = signature
        .recover_address_from_prehash(&message_hash)
        .map_err(|_| MandateError::InvalidSignature)?;
    let expected = Address::from_str(&mandate.owner_pubkey).map_err(|_| MandateError::Malformed)?;
    if recovered != expected {
        return Err(MandateError::InvalidSignature);
    }
    Ok(())
}

/// Runs the ordered checks from spec `§4.4`. `confirm_header_present` reflects whether the
/// request carried [`CONFIRM_HEADER`]. Does **not** record spend; the pipeline records
/// only after settlement succeeds.
pub fn verify(
    mandate: &Mandate,
    tool_id: &str,
    price: Decimal,
    confirm_header_present: bool,
    spend_tracker: &SpendTracker,
) -> Result<MandateVerdict, MandateError> {
    if mandate.expires_at <= chrono::Utc::now() {
        return Err(MandateError::Expired);
    }
    if !mandate.allowlisted_tool_ids.contains(tool_id) {
        return Err(MandateError::NotAllowlisted);
    }
    if let Some(threshold) = &mandate.require_user_confirm_for_price_over {
        let threshold = Decimal::from_str(threshold).map_err(|_| MandateError::Malformed)?;
        if price > threshold && !confirm_header_present {
            return Err(MandateError::ConfirmRequired);
        }
    }
    let cap = Decimal::from_str(&mandate.max_spend_usdc_per_day).map_err(|_| MandateError::Malformed)?;
    if spend_tracker.get_spent_today(&mandate.mandate_id) + price > cap {
        return Err(MandateError::BudgetExceeded);
    }
    verify_signature(mandate)?;
    Ok(MandateVerdict::Approved)
}
