use crate::models::{LineItemCandidate, TagCandidate};

pub const TAG_PROMPT: &str = r#"The photo shows a clothing hang tag (Free People, Urban Outfitters or Anthropologie). Read every line of text on it.

Field rules:
- upc: the digits printed under the barcode bars (usually 12-13 digits). Empty string if no barcode digits are visible. Never use S/C/V codes here.
- style_number: the code beginning with OB, C or CS (for example OB1364600, C8130, CS151). Drop a leading "S " prefix if present.
- color: the color written as words (for example SMOKEY GRAPE, LAPIS, BLACK). Never the numeric C code.
- size: one of XS, S, M, L, XL, ALL.
- msrp: the USD price as a bare number. Prefer USD when USD and CAD are both printed.
- brand: "Urban Outfitters" or "Anthropologie" when either name appears, otherwise "Free People".
- description: the product name when printed, otherwise empty string.

Reply with a single JSON object and nothing else:
{"upc": "", "brand": "", "style_number": "", "description": "", "color": "", "size": "", "msrp": ""}
Use an empty string for any field you cannot read."#;

pub const RECEIPT_PROMPT: &str = r#"The photo shows a retail store receipt (Free People, Urban Outfitters or Anthropologie). List every purchased item.

For each line item report:
- style_number: style or SKU code when visible
- description: product name
- qty: quantity (1 when not shown)
- price_each: the amount actually charged per unit, after any discount
- line_total: price_each multiplied by qty

Skip tax, subtotal, total and payment lines. "2 @ $5.00" means qty 2, price_each 5.00, line_total 10.00.

Reply with a single JSON array and nothing else:
[{"style_number": "", "description": "", "qty": 1, "price_each": 0.00, "line_total": 0.00}]
Reply with [] if the receipt is unreadable."#;

/// 配对提示词：两组数据完整序列化后放入正文
pub fn build_match_prompt(
    items: &[LineItemCandidate],
    tags: &[TagCandidate],
) -> Result<String, serde_json::Error> {
    let items_json = serde_json::to_string_pretty(items)?;
    let tags_json = serde_json::to_string_pretty(tags)?;

    Ok(format!(
        r#"Pair receipt line items with photographed clothing hang tags from one store trip.

RECEIPT ITEMS (price actually paid):
{items_json}

TAGS (read from hang tags; MSRP, description, style):
{tags_json}

Rules:
- Pair each tag with the receipt item it most likely is.
- Compare descriptions first, then style numbers, then price proximity. Receipt style numbers often differ from tag style numbers.
- A receipt item with qty greater than 1 may pair with several tags, at most qty of them.
- A tag pairs with at most one receipt item.
- Leave out tags and receipt items with no good counterpart. Never force a pair.

Reply with a single JSON array and nothing else:
[{{"tag_id": 123, "receipt_item_id": 456, "confidence": "high"}}]
confidence is one of "high", "medium", "low". Use the ids exactly as given."#
    ))
}
