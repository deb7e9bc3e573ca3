//! Post-OCR text cleanup.
//!
//! Page text is joined with blank lines by the aggregator, so a page must
//! never contain a blank line of its own. The optional field normalization
//! makes dates and ID numbers on Vietnamese forms consistent across engines.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static HORIZONTAL_WS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\u{00A0}]+").unwrap());

static DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})[.\-](\d{1,2})[.\-](\d{4})\b").unwrap());

/// Twelve-digit citizen ID numbers printed or read as groups of three.
static CITIZEN_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{3})[ \t]+(\d{3})[ \t]+(\d{3})[ \t]+(\d{3})\b")
        .unwrap()
});

static PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\+84|\b0)[ \t\-]*(\d{2,3})[ \t\-]+(\d{3})[ \t\-]+(\d{3,4})\b")
        .unwrap()
});

/// Normalize one page of OCR text.
///
/// Composes to NFC first, since engines disagree on precomposed versus
/// combining diacritics. Then unifies line endings, collapses runs of spaces
/// and tabs, trims every line and drops empty lines.
pub fn normalize_page_text(text: &str) -> String {
    let composed: String = text.nfc().collect();
    composed
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .lines()
        .map(|line| HORIZONTAL_WS.replace_all(line.trim(), " ").into_owned())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Normalize dates, citizen ID numbers and phone numbers.
///
/// `DD.MM.YYYY` and `DD-MM-YYYY` become `DD/MM/YYYY`; digit groups of a
/// 12-digit ID and spaced-out phone numbers are joined.
pub fn normalize_fields(text: &str) -> String {
    let text = DATE.replace_all(text, "$1/$2/$3");
    let text = CITIZEN_ID.replace_all(&text, "$1$2$3$4");
    PHONE.replace_all(&text, "$1$2$3$4").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_text_has_no_blank_lines() {
        let raw = "  CỘNG HÒA XÃ HỘI\r\n\r\n\tĐộc lập   -  Tự do \n   \nHạnh phúc  ";
        let cleaned = normalize_page_text(raw);
        assert_eq!(cleaned, "CỘNG HÒA XÃ HỘI\nĐộc lập - Tự do\nHạnh phúc");
        assert!(!cleaned.contains("\n\n"));
    }

    #[test]
    fn test_combining_diacritics_composed() {
        let decomposed = "Ho\u{0302}\u{0300} Chi\u{0301} Minh";
        let cleaned = normalize_page_text(decomposed);
        assert_eq!(cleaned, "H\u{1ED3} Ch\u{00ED} Minh");
        assert_eq!(cleaned, normalize_page_text("H\u{1ED3} Ch\u{00ED} Minh"));
        assert_eq!(cleaned.chars().count(), 11);
    }

    #[test]
    fn test_whitespace_only_becomes_empty() {
        assert_eq!(normalize_page_text(" \n\t\n "), "");
    }

    #[test]
    fn test_dates_normalized() {
        assert_eq!(
            normalize_fields("Ngày sinh: 01.02.1990, cấp 15-08-2021"),
            "Ngày sinh: 01/02/1990, cấp 15/08/2021"
        );
    }

    #[test]
    fn test_citizen_id_joined() {
        assert_eq!(
            normalize_fields("Số: 001 234 567 890"),
            "Số: 001234567890"
        );
    }

    #[test]
    fn test_phone_joined() {
        assert_eq!(normalize_fields("ĐT: 0912 345 678"), "ĐT: 0912345678");
        assert_eq!(normalize_fields("ĐT: +84 91 234 5678"), "ĐT: +84912345678");
    }
}
