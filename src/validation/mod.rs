use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const CURRENCY_CODE_MAX_LEN: usize = 12;
pub const DESCRIPTION_MAX_LEN: usize = 255;
pub const AMOUNT_MAX_SCALE: i64 = 8;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const BECH32_CHARSET: &str = "qpzry9x8gf2tvdw0s3jn54khce6mua7l";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

/// Withdrawal target networks and their address grammars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Bitcoin,
    Ethereum,
    Tron,
    Bank,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Bitcoin => "bitcoin",
            Network::Ethereum => "ethereum",
            Network::Tron => "tron",
            Network::Bank => "bank",
        }
    }

    /// Checks `address` against this network's grammar.
    pub fn validate_address(&self, address: &str) -> ValidationResult {
        let address = sanitize_string(address);
        validate_required("destination", &address)?;

        let valid = match self {
            Network::Bitcoin => is_bitcoin_address(&address),
            Network::Ethereum => is_ethereum_address(&address),
            Network::Tron => is_tron_address(&address),
            Network::Bank => is_valid_iban(&address),
        };

        if !valid {
            return Err(ValidationError::new(
                "destination",
                format!("not a valid {} address", self.as_str()),
            ));
        }

        Ok(())
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bitcoin" | "btc" => Ok(Network::Bitcoin),
            "ethereum" | "eth" | "erc20" => Ok(Network::Ethereum),
            "tron" | "trx" | "trc20" => Ok(Network::Tron),
            "bank" | "sepa" | "iban" => Ok(Network::Bank),
            _ => Err(format!("Invalid network: {}", s)),
        }
    }
}

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.len() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

pub fn validate_positive_amount(amount: &BigDecimal) -> ValidationResult {
    if amount <= &BigDecimal::from(0) {
        return Err(ValidationError::new("amount", "must be greater than zero"));
    }

    Ok(())
}

pub fn validate_amount_scale(amount: &BigDecimal) -> ValidationResult {
    let (_, scale) = amount.as_bigint_and_exponent();
    if scale > AMOUNT_MAX_SCALE {
        return Err(ValidationError::new(
            "amount",
            format!("must have at most {} decimal places", AMOUNT_MAX_SCALE),
        ));
    }

    Ok(())
}

pub fn validate_currency_code(field: &'static str, code: &str) -> ValidationResult {
    let code = sanitize_string(code);
    validate_required(field, &code)?;
    validate_max_len(field, &code, CURRENCY_CODE_MAX_LEN)?;

    if !code.chars().all(|ch| ch.is_ascii_alphanumeric()) {
        return Err(ValidationError::new(field, "must contain only letters and digits"));
    }

    Ok(())
}

pub fn validate_description(description: &str) -> ValidationResult {
    let description = sanitize_string(description);
    validate_required("description", &description)?;
    validate_max_len("description", &description, DESCRIPTION_MAX_LEN)
}

fn is_base58(value: &str) -> bool {
    value.chars().all(|ch| BASE58_ALPHABET.contains(ch))
}

fn is_bitcoin_address(address: &str) -> bool {
    if let Some(data) = address.strip_prefix("bc1") {
        return (42..=62).contains(&address.len())
            && data.chars().all(|ch| BECH32_CHARSET.contains(ch));
    }

    (address.starts_with('1') || address.starts_with('3'))
        && (26..=35).contains(&address.len())
        && is_base58(address)
}

fn is_ethereum_address(address: &str) -> bool {
    match address.strip_prefix("0x") {
        Some(hex) => hex.len() == 40 && hex.chars().all(|ch| ch.is_ascii_hexdigit()),
        None => false,
    }
}

fn is_tron_address(address: &str) -> bool {
    address.starts_with('T') && address.len() == 34 && is_base58(address)
}

/// ISO 13616 check: country code, check digits, mod-97 remainder of 1.
fn is_valid_iban(raw: &str) -> bool {
    let iban: String = raw
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase();

    if !(15..=34).contains(&iban.len()) || !iban.chars().all(|ch| ch.is_ascii_alphanumeric()) {
        return false;
    }

    let bytes = iban.as_bytes();
    if !bytes[0].is_ascii_alphabetic()
        || !bytes[1].is_ascii_alphabetic()
        || !bytes[2].is_ascii_digit()
        || !bytes[3].is_ascii_digit()
    {
        return false;
    }

    let rearranged = iban[4..].chars().chain(iban[..4].chars());
    let mut remainder: u32 = 0;
    for ch in rearranged {
        let value = match ch.to_digit(36) {
            Some(v) => v,
            None => return false,
        };
        remainder = if value >= 10 {
            (remainder * 100 + value) % 97
        } else {
            (remainder * 10 + value) % 97
        };
    }

    remainder == 1
}
