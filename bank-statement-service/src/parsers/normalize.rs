//! Locale and key helpers shared by the statement parsers.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use std::str::FromStr;

/// Characters of the description that take part in the content hash.
const HASH_DESCRIPTION_CHARS: usize = 80;

/// Fold the accented letters found in Portuguese bank exports to ASCII.
fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
        'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'A',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'É' | 'È' | 'Ê' | 'Ë' => 'E',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'O',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
        'ç' => 'c',
        'Ç' => 'C',
        'ñ' => 'n',
        'Ñ' => 'N',
        other => other,
    }
}

/// Canonical form used to compare bank names and header labels:
/// accents folded, upper-cased, whitespace collapsed.
pub fn normalize_bank_name(name: &str) -> String {
    name.split_whitespace()
        .map(|word| word.chars().map(fold_accent).collect::<String>())
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Parse a `dd/mm/yyyy` date into midnight UTC of that day.
pub fn parse_localized_date(value: &str, format: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(value.trim(), format)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Parse a Brazilian-formatted amount such as `-1.234,56`, `R$ 10,00`,
/// `(15,00)` or `80,00 D`. The sign of the result is preserved.
pub fn parse_localized_amount(value: &str) -> Option<Decimal> {
    let mut text: String = value
        .replace("R$", "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    let mut negative = false;
    if let Some(stripped) = text.strip_suffix(['D', 'd']) {
        negative = true;
        text = stripped.to_string();
    } else if let Some(stripped) = text.strip_suffix(['C', 'c']) {
        text = stripped.to_string();
    }
    if text.starts_with('(') && text.ends_with(')') && text.len() > 2 {
        negative = true;
        text = text[1..text.len() - 1].to_string();
    }

    let text = text.replace('.', "").replace(',', ".");
    if text.is_empty() {
        return None;
    }

    let amount = Decimal::from_str(&text).ok()?;
    Some(if negative { -amount.abs() } else { amount })
}

/// Content hash used as the fallback dedup key:
/// `sha256(posted_at ISO | amount with 2 decimals | first 80 chars of description)`.
pub fn statement_hash(posted_at: DateTime<Utc>, amount: Decimal, description: &str) -> String {
    let iso = posted_at.to_rfc3339_opts(SecondsFormat::Millis, true);
    let amount = format!("{:.2}", amount.round_dp(2));
    let description: String = description.chars().take(HASH_DESCRIPTION_CHARS).collect();

    let mut hasher = Sha256::new();
    hasher.update(format!("{}|{}|{}", iso, amount, description).as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::dec;

    #[test]
    fn test_normalize_bank_name() {
        assert_eq!(normalize_bank_name("  banco do   Brasil "), "BANCO DO BRASIL");
        assert_eq!(normalize_bank_name("Itaú Unibanco"), "ITAU UNIBANCO");
        assert_eq!(normalize_bank_name("Número do documento"), "NUMERO DO DOCUMENTO");
    }

    #[test]
    fn test_parse_localized_date() {
        let parsed = parse_localized_date("10/05/2024", "%d/%m/%Y").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 5, 10, 0, 0, 0).unwrap());
        assert!(parse_localized_date("2024-05-10", "%d/%m/%Y").is_none());
        assert!(parse_localized_date("31/02/2024", "%d/%m/%Y").is_none());
    }

    #[test]
    fn test_parse_localized_amount() {
        assert_eq!(parse_localized_amount("100,00"), Some(dec!(100.00)));
        assert_eq!(parse_localized_amount("-1.234,56"), Some(dec!(-1234.56)));
        assert_eq!(parse_localized_amount("R$ 10,50"), Some(dec!(10.50)));
        assert_eq!(parse_localized_amount("80,00 D"), Some(dec!(-80.00)));
        assert_eq!(parse_localized_amount("80,00 C"), Some(dec!(80.00)));
        assert_eq!(parse_localized_amount("(15,00)"), Some(dec!(-15.00)));
        assert_eq!(parse_localized_amount(""), None);
        assert_eq!(parse_localized_amount("abc"), None);
    }

    #[test]
    fn test_statement_hash_is_stable() {
        let posted_at = Utc.with_ymd_and_hms(2024, 5, 10, 0, 0, 0).unwrap();
        let a = statement_hash(posted_at, dec!(100), "PIX RECEBIDO");
        let b = statement_hash(posted_at, dec!(100.00), "PIX RECEBIDO");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let other_day = Utc.with_ymd_and_hms(2024, 5, 11, 0, 0, 0).unwrap();
        assert_ne!(a, statement_hash(other_day, dec!(100), "PIX RECEBIDO"));
    }

    #[test]
    fn test_statement_hash_ignores_description_past_80_chars() {
        let posted_at = Utc.with_ymd_and_hms(2024, 5, 10, 0, 0, 0).unwrap();
        let base = "X".repeat(80);
        let a = statement_hash(posted_at, dec!(5), &format!("{}AAAA", base));
        let b = statement_hash(posted_at, dec!(5), &format!("{}BBBB", base));
        assert_eq!(a, b);
    }
}
