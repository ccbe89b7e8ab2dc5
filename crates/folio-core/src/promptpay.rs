//! # PromptPay Payload Codec
//!
//! Encodes and decodes Thai PromptPay payment payloads. The payloads follow
//! the EMVCo merchant-presented QR layout: a flat sequence of
//! tag/length/value fields closed by a CRC-16 checksum.
//!
//! ## Payload Layout
//! ```text
//! ┌──────┬─────┬────────────────────────────────────────────────────────┐
//! │ Tag  │ Len │ Value                                                  │
//! ├──────┼─────┼────────────────────────────────────────────────────────┤
//! │  00  │ 02  │ "01"               payload format indicator            │
//! │  01  │ 02  │ "12"               dynamic QR (amount bound)           │
//! │  29  │ nn  │ merchant account:                                      │
//! │      │     │   00 16 A000000677010111   PromptPay AID               │
//! │      │     │   01 13 0066XXXXXXXXX      mobile number               │
//! │      │     │   02 13 XXXXXXXXXXXXX      national / tax id           │
//! │      │     │   03 15 XXXXXXXXXXXXXXX    e-wallet id                 │
//! │  58  │ 02  │ "TH"               country                             │
//! │  53  │ 03  │ "764"              currency (THB)                      │
//! │  54  │ nn  │ "123.45"           amount                              │
//! │  63  │ 04  │ CRC-16/CCITT-FALSE over everything up to "6304"        │
//! └──────┴─────┴────────────────────────────────────────────────────────┘
//! ```
//!
//! The same payee and amount always produce the same payload.

use crate::error::{CoreError, CoreResult};
use crate::money::Money;

const PROMPTPAY_AID: &str = "A000000677010111";
const CURRENCY_THB: &str = "764";
const COUNTRY_TH: &str = "TH";
const MAX_AMOUNT_LEN: usize = 13;

// =============================================================================
// Payee
// =============================================================================

/// The kind of PromptPay proxy identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayeeKind {
    /// 10-digit Thai mobile number starting with 0.
    MobileNumber,
    /// 13-digit national ID or tax ID.
    NationalId,
    /// 15-digit e-wallet ID.
    EWallet,
}

impl PayeeKind {
    fn sub_tag(self) -> &'static str {
        match self {
            PayeeKind::MobileNumber => "01",
            PayeeKind::NationalId => "02",
            PayeeKind::EWallet => "03",
        }
    }
}

/// A validated payee identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payee {
    kind: PayeeKind,
    digits: String,
}

impl Payee {
    /// Parses a payee identifier, ignoring dashes and spaces.
    ///
    /// ## Accepted Forms
    /// - `081-234-5678` → mobile number
    /// - `1234567890123` → national / tax id
    /// - `123456789012345` → e-wallet
    pub fn parse(input: &str) -> CoreResult<Payee> {
        let digits: String = input.chars().filter(|c| *c != '-' && *c != ' ').collect();

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CoreError::InvalidPayee {
                reason: "identifier must contain only digits".to_string(),
            });
        }

        let kind = match digits.len() {
            10 if digits.starts_with('0') => PayeeKind::MobileNumber,
            10 => {
                return Err(CoreError::InvalidPayee {
                    reason: "mobile number must start with 0".to_string(),
                })
            }
            13 => PayeeKind::NationalId,
            15 => PayeeKind::EWallet,
            n => {
                return Err(CoreError::InvalidPayee {
                    reason: format!("expected 10, 13 or 15 digits, got {n}"),
                })
            }
        };

        Ok(Payee { kind, digits })
    }

    pub fn kind(&self) -> PayeeKind {
        self.kind
    }

    /// The identifier as the payer knows it, e.g. `0812345678`.
    pub fn as_str(&self) -> &str {
        &self.digits
    }

    /// The identifier as carried in the merchant account field.
    fn proxy_value(&self) -> String {
        match self.kind {
            PayeeKind::MobileNumber => {
                let international = format!("66{}", &self.digits[1..]);
                format!("{:0>13}", international)
            }
            PayeeKind::NationalId | PayeeKind::EWallet => self.digits.clone(),
        }
    }
}

// =============================================================================
// Encoding
// =============================================================================

/// Builds the payload committing the payer to `amount` for `payee`.
///
/// ## Errors
/// - `InvalidPayee` when the identifier is malformed
/// - `InvalidAmount` when `amount` is not positive or too large to encode
///
/// ## Example
/// ```rust
/// use folio_core::money::Money;
/// use folio_core::promptpay;
///
/// let payload = promptpay::encode("0812345678", Money::from_cents(12_345)).unwrap();
/// let decoded = promptpay::decode(&payload).unwrap();
/// assert_eq!(decoded.payee, "0812345678");
/// assert_eq!(decoded.amount, Some(Money::from_cents(12_345)));
/// ```
pub fn encode(payee: &str, amount: Money) -> CoreResult<String> {
    let payee = Payee::parse(payee)?;
    encode_for(&payee, amount)
}

/// Same as [`encode`] for an already validated payee.
pub fn encode_for(payee: &Payee, amount: Money) -> CoreResult<String> {
    if !amount.is_positive() {
        return Err(CoreError::InvalidAmount {
            reason: format!("amount must be greater than zero, got {}", amount),
        });
    }

    let amount_text = amount.to_decimal_string();
    if amount_text.len() > MAX_AMOUNT_LEN {
        return Err(CoreError::InvalidAmount {
            reason: format!("amount {} exceeds {} characters", amount_text, MAX_AMOUNT_LEN),
        });
    }

    let merchant = [
        field("00", PROMPTPAY_AID),
        field(payee.kind.sub_tag(), &payee.proxy_value()),
    ]
    .concat();

    let mut payload = [
        field("00", "01"),
        field("01", "12"),
        field("29", &merchant),
        field("58", COUNTRY_TH),
        field("53", CURRENCY_THB),
        field("54", &amount_text),
    ]
    .concat();

    payload.push_str("6304");
    let checksum = crc16_ccitt(payload.as_bytes());
    payload.push_str(&format!("{:04X}", checksum));

    Ok(payload)
}

fn field(tag: &str, value: &str) -> String {
    format!("{}{:02}{}", tag, value.len(), value)
}

// =============================================================================
// Decoding
// =============================================================================

/// The payee and amount recovered from a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPayment {
    /// Identifier in its local form, e.g. `0812345678`.
    pub payee: String,
    pub kind: PayeeKind,
    /// `None` for static (amount-less) payloads.
    pub amount: Option<Money>,
}

/// Parses and verifies a payload.
pub fn decode(payload: &str) -> CoreResult<DecodedPayment> {
    if !payload.is_ascii() || payload.len() < 8 {
        return Err(malformed("payload too short or not ASCII"));
    }

    let (body, checksum) = payload.split_at(payload.len() - 4);
    if !body.ends_with("6304") {
        return Err(malformed("missing checksum field"));
    }
    let expected = format!("{:04X}", crc16_ccitt(body.as_bytes()));
    if !checksum.eq_ignore_ascii_case(&expected) {
        return Err(malformed("checksum mismatch"));
    }

    let fields = parse_fields(&body[..body.len() - 4])?;
    let lookup = |tag: &str| fields.iter().find(|(t, _)| *t == tag).map(|(_, v)| *v);

    if lookup("00") != Some("01") {
        return Err(malformed("unsupported payload format"));
    }
    if lookup("53") != Some(CURRENCY_THB) {
        return Err(malformed("currency is not THB"));
    }

    let merchant = lookup("29").ok_or_else(|| malformed("missing PromptPay merchant field"))?;
    let sub_fields = parse_fields(merchant)?;
    if sub_fields.iter().find(|(t, _)| *t == "00").map(|(_, v)| *v) != Some(PROMPTPAY_AID) {
        return Err(malformed("not a PromptPay merchant field"));
    }

    let (kind, payee) = sub_fields
        .iter()
        .find_map(|(tag, value)| match *tag {
            "01" => Some((PayeeKind::MobileNumber, local_mobile(value))),
            "02" => Some((PayeeKind::NationalId, value.to_string())),
            "03" => Some((PayeeKind::EWallet, value.to_string())),
            _ => None,
        })
        .ok_or_else(|| malformed("missing payee identifier"))?;

    let amount = match lookup("54") {
        Some(text) => Some(Money::parse_decimal(text).ok_or_else(|| malformed("invalid amount"))?),
        None => None,
    };

    Ok(DecodedPayment { payee, kind, amount })
}

/// Splits a TLV run into (tag, value) pairs.
fn parse_fields(mut data: &str) -> CoreResult<Vec<(&str, &str)>> {
    let mut fields = Vec::new();

    while !data.is_empty() {
        if data.len() < 4 {
            return Err(malformed("truncated field header"));
        }
        let tag = &data[..2];
        let len: usize = data[2..4]
            .parse()
            .map_err(|_| malformed("field length is not numeric"))?;
        if data.len() < 4 + len {
            return Err(malformed("field value runs past the end"));
        }
        fields.push((tag, &data[4..4 + len]));
        data = &data[4 + len..];
    }

    Ok(fields)
}

/// `0066812345678` → `0812345678`.
fn local_mobile(proxy: &str) -> String {
    let trimmed = proxy.trim_start_matches('0');
    match trimmed.strip_prefix("66") {
        Some(rest) => format!("0{}", rest),
        None => trimmed.to_string(),
    }
}

fn malformed(reason: &str) -> CoreError {
    CoreError::MalformedPayload {
        reason: reason.to_string(),
    }
}

/// CRC-16/CCITT-FALSE: polynomial 0x1021, initial value 0xFFFF.
fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_reference_payload() {
        let payload = encode("000-000-0000", Money::from_cents(422)).unwrap();
        assert_eq!(
            payload,
            "00020101021229370016A000000677010111011300660000000005802TH530376454044.226304E469"
        );
    }

    #[test]
    fn test_round_trip_mobile() {
        let payload = encode("0812345678", Money::from_cents(12_345)).unwrap();
        assert_eq!(
            payload,
            "00020101021229370016A000000677010111011300668123456785802TH53037645406123.456304906E"
        );

        let decoded = decode(&payload).unwrap();
        assert_eq!(decoded.payee, "0812345678");
        assert_eq!(decoded.kind, PayeeKind::MobileNumber);
        assert_eq!(decoded.amount, Some(Money::from_cents(12_345)));
    }

    #[test]
    fn test_round_trip_national_id() {
        let payload = encode("1-2345-67890-12-3", Money::from_cents(9_900)).unwrap();
        let decoded = decode(&payload).unwrap();
        assert_eq!(decoded.payee, "1234567890123");
        assert_eq!(decoded.kind, PayeeKind::NationalId);
        assert_eq!(decoded.amount, Some(Money::from_cents(9_900)));
    }

    #[test]
    fn test_deterministic() {
        let a = encode("0812345678", Money::from_cents(5_000)).unwrap();
        let b = encode("0812345678", Money::from_cents(5_000)).unwrap();
        let c = encode("0812345678", Money::from_cents(5_001)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_invalid_amount() {
        assert!(matches!(
            encode("0812345678", Money::zero()),
            Err(CoreError::InvalidAmount { .. })
        ));
        assert!(matches!(
            encode("0812345678", Money::from_cents(-100)),
            Err(CoreError::InvalidAmount { .. })
        ));
        assert!(matches!(
            encode("0812345678", Money::from_cents(100_000_000_000_000)),
            Err(CoreError::InvalidAmount { .. })
        ));
    }

    #[test]
    fn test_invalid_payee() {
        for bad in ["", "12345", "081234567x", "1812345678", "08123456789"] {
            assert!(
                matches!(encode(bad, Money::from_cents(100)), Err(CoreError::InvalidPayee { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let payload = encode("0812345678", Money::from_cents(12_345)).unwrap();
        let tampered = payload.replace("123.45", "100.00");
        assert!(matches!(decode(&tampered), Err(CoreError::MalformedPayload { .. })));
        assert!(decode("6304").is_err());
    }
}
