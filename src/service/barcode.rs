/// 条码规范化：去掉首尾空白，以及开头的撇号、空白和前导零
///
/// manifest、扫码记录、销售记录都以规范化后的值作为查找键。
/// 开头的撇号/空白/零作为一个整体剥离，保证幂等。
pub fn normalize_barcode(raw: &str) -> String {
    raw.trim()
        .trim_start_matches(|c: char| c == '\'' || c == '0' || c.is_whitespace())
        .to_string()
}

/// 清货商条码以 99 或 091 开头 (规范化后)；SKU 条码 (211...) 不算
pub fn is_liquidator_barcode(raw: &str) -> bool {
    let norm = normalize_barcode(raw);
    norm.starts_with("99") || norm.starts_with("091")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_quote_whitespace_and_zeros() {
        assert_eq!(normalize_barcode(" '000123"), "123");
        assert_eq!(normalize_barcode("0450001"), "450001");
        assert_eq!(normalize_barcode("  099123  "), "99123");
        assert_eq!(normalize_barcode(""), "");
        assert_eq!(normalize_barcode("000"), "");
    }

    #[test]
    fn normalize_is_idempotent() {
        for raw in ["'  0 0123", " '000123", "0450001", "'0'0'7", "\t 00 12 ", "abc", ""] {
            let once = normalize_barcode(raw);
            assert_eq!(normalize_barcode(&once), once, "input {:?}", raw);
        }
    }

    #[test]
    fn liquidator_prefixes() {
        assert!(is_liquidator_barcode("0991234"));
        assert!(is_liquidator_barcode("'99000"));
        assert!(!is_liquidator_barcode("2110001"));
        // 规范化后不会再以 0 开头，091 前缀实际上不会命中
        assert!(!is_liquidator_barcode("0910001"));
    }
}
