//! oracle 响应解析
//!
//! 模型输出是自由文本，先截取第一个 `{`/`[` 到最后一个 `}`/`]` 的片段，再交给
//! serde_json。字段类型宽松：数字和字符串都接受。

use super::OracleError;
use crate::models::{Confidence, NewReceiptItem, ProposedMatch, TagFields};
use crate::service::fees::is_storable_amount;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::str::FromStr;

fn extract_between(text: &str, open: char, close: char) -> Result<&str, OracleError> {
    let start = text.find(open);
    let end = text.rfind(close);
    match (start, end) {
        (Some(start), Some(end)) if end > start => Ok(&text[start..=end]),
        _ => Err(OracleError::Parse(format!(
            "no JSON {}...{} found in oracle response",
            open, close
        ))),
    }
}

pub fn extract_json_object(text: &str) -> Result<&str, OracleError> {
    extract_between(text, '{', '}')
}

pub fn extract_json_array(text: &str) -> Result<&str, OracleError> {
    extract_between(text, '[', ']')
}

fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(value_to_string))
}

/// 去掉符号后的金额文本长度上限
const MAX_MONEY_LEN: usize = 32;

/// 金额解析：忽略 `$`、`,` 和空白
///
/// 无法解析、过长或超出 NUMERIC(12,2) 范围 (含 `1e300000000` 这类指数写法) 时返回 None。
pub fn parse_money(raw: &str) -> Option<BigDecimal> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '$' | ',') && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() || cleaned.len() > MAX_MONEY_LEN {
        return None;
    }
    BigDecimal::from_str(&cleaned)
        .ok()
        .filter(is_storable_amount)
}

/// 吊牌识别的原始输出
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractedTag {
    #[serde(default, deserialize_with = "lenient_string")]
    pub upc: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub brand: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub style_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub color: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub size: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub msrp: Option<String>,
}

impl ExtractedTag {
    pub fn into_fields(self) -> TagFields {
        TagFields {
            upc: self.upc,
            style_number: self.style_number,
            brand: self.brand,
            description: self.description,
            color: self.color,
            size: self.size,
            msrp: self.msrp.as_deref().and_then(parse_money),
        }
    }
}

pub fn parse_tag_response(text: &str) -> Result<TagFields, OracleError> {
    let json = extract_json_object(text)?;
    let raw: ExtractedTag = serde_json::from_str(json)
        .map_err(|e| OracleError::Parse(format!("tag JSON: {}", e)))?;
    Ok(raw.into_fields())
}

#[derive(Debug, Deserialize)]
struct RawReceiptLine {
    #[serde(default, deserialize_with = "lenient_string")]
    style_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    description: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    qty: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    price_each: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    line_total: Option<String>,
}

/// 小票明细；数量缺失或非正数时按 1 计
pub fn parse_receipt_response(text: &str) -> Result<Vec<NewReceiptItem>, OracleError> {
    let json = extract_json_array(text)?;
    let lines: Vec<RawReceiptLine> = serde_json::from_str(json)
        .map_err(|e| OracleError::Parse(format!("receipt JSON: {}", e)))?;

    Ok(lines
        .into_iter()
        .map(|line| {
            let qty = line
                .qty
                .as_deref()
                .and_then(|q| q.parse::<f64>().ok())
                .map(|q| q.trunc() as i32)
                .filter(|q| *q > 0)
                .unwrap_or(1);
            NewReceiptItem {
                style_number: line.style_number,
                description: line.description,
                qty,
                price_each: line.price_each.as_deref().and_then(parse_money),
                line_total: line.line_total.as_deref().and_then(parse_money),
            }
        })
        .collect())
}

#[derive(Debug, Deserialize)]
struct RawMatch {
    tag_id: Value,
    receipt_item_id: Value,
    #[serde(default)]
    confidence: Option<String>,
}

fn value_to_id(value: &Value, field: &str) -> Result<i64, OracleError> {
    let id = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    id.ok_or_else(|| OracleError::Parse(format!("{} is not an identifier: {}", field, value)))
}

/// 配对结果；任一元素的 id 无法识别即整体失败
pub fn parse_match_response(text: &str) -> Result<Vec<ProposedMatch>, OracleError> {
    let json = extract_json_array(text)?;
    let raw: Vec<RawMatch> = serde_json::from_str(json)
        .map_err(|e| OracleError::Parse(format!("match JSON: {}", e)))?;

    raw.iter()
        .map(|m| {
            Ok(ProposedMatch {
                tag_id: value_to_id(&m.tag_id, "tag_id")?,
                receipt_item_id: value_to_id(&m.receipt_item_id, "receipt_item_id")?,
                confidence: m
                    .confidence
                    .as_deref()
                    .map(Confidence::parse_lenient)
                    .unwrap_or(Confidence::Low),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_response_with_prose_around_json() {
        let text = "Here you go:\n{\"upc\": \"195372123456\", \"brand\": \"Free People\", \
                    \"style_number\": \"OB1364600\", \"description\": \"\", \"color\": \"LAPIS\", \
                    \"size\": \"M\", \"msrp\": \"$128.00\"}\nThanks";
        let fields = parse_tag_response(text).unwrap();
        assert_eq!(fields.style_number.as_deref(), Some("OB1364600"));
        assert_eq!(fields.description, None);
        assert_eq!(fields.msrp, Some(BigDecimal::from(128)));
    }

    #[test]
    fn tag_msrp_as_number_or_garbage() {
        let fields = parse_tag_response(r#"{"msrp": 78}"#).unwrap();
        assert_eq!(fields.msrp, Some(BigDecimal::from(78)));
        let fields = parse_tag_response(r#"{"msrp": "n/a", "size": "XS"}"#).unwrap();
        assert_eq!(fields.msrp, None);
        assert_eq!(fields.size.as_deref(), Some("XS"));
    }

    #[test]
    fn tag_response_without_json_is_parse_error() {
        assert!(matches!(
            parse_tag_response("I cannot read this tag."),
            Err(OracleError::Parse(_))
        ));
    }

    #[test]
    fn receipt_lines_default_qty() {
        let text = r#"[{"style_number": "OB123X", "description": "Floral Dress", "price_each": 24.0, "line_total": 24.0},
                       {"description": "Top", "qty": 2, "price_each": "5.00", "line_total": "10.00"},
                       {"description": "Sock", "qty": 0}]"#;
        let items = parse_receipt_response(text).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].qty, 1);
        assert_eq!(items[1].qty, 2);
        assert_eq!(items[1].line_total, Some(BigDecimal::from(10)));
        assert_eq!(items[2].qty, 1);
        assert_eq!(items[2].price_each, None);
    }

    #[test]
    fn empty_receipt_array() {
        assert!(parse_receipt_response("[]").unwrap().is_empty());
    }

    #[test]
    fn match_ids_accept_numbers_and_strings() {
        let text = r#"```json
[{"tag_id": 12, "receipt_item_id": "3", "confidence": "HIGH"},
 {"tag_id": "14", "receipt_item_id": 3, "confidence": "unsure"}]
```"#;
        let matches = parse_match_response(text).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].tag_id, 12);
        assert_eq!(matches[0].receipt_item_id, 3);
        assert_eq!(matches[0].confidence, Confidence::High);
        assert_eq!(matches[1].tag_id, 14);
        assert_eq!(matches[1].confidence, Confidence::Low);
    }

    #[test]
    fn malformed_match_entry_fails_whole_response() {
        let text = r#"[{"tag_id": 1, "receipt_item_id": 2}, {"tag_id": "abc", "receipt_item_id": 2}]"#;
        assert!(matches!(parse_match_response(text), Err(OracleError::Parse(_))));
        assert!(matches!(parse_match_response("{\"tag_id\": 1}"), Err(OracleError::Parse(_))));
    }

    #[test]
    fn money_parsing() {
        assert_eq!(parse_money("$1,299.50"), BigDecimal::from_str("1299.50").ok());
        assert_eq!(parse_money(""), None);
        assert_eq!(parse_money("free"), None);
        assert_eq!(parse_money("2.4e1"), BigDecimal::from_str("24").ok());
    }

    #[test]
    fn money_out_of_range_is_dropped() {
        assert_eq!(parse_money("1e300000000"), None);
        assert_eq!(parse_money("1E-300000000"), None);
        assert_eq!(parse_money("$12,345,678,901.00"), None);
        assert_eq!(parse_money(&"9".repeat(40)), None);
        assert_eq!(parse_money("9999999999.99"), BigDecimal::from_str("9999999999.99").ok());
    }

    #[test]
    fn hostile_amounts_in_oracle_output_become_unknown() {
        let items = parse_receipt_response(
            r#"[{"description": "Dress", "qty": 1, "price_each": "1e300000000", "line_total": "1E+300000000"}]"#,
        )
        .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].price_each, None);
        assert_eq!(items[0].line_total, None);

        let fields = parse_tag_response(r#"{"style_number": "OB1", "msrp": "5e99999"}"#).unwrap();
        assert_eq!(fields.style_number.as_deref(), Some("OB1"));
        assert_eq!(fields.msrp, None);
    }
}
