use serde::Deserialize;

/// A price field as it arrives from a catalog: some sources emit numbers,
/// others locale-formatted strings ("1.150,23", "1,150.23", "€ 12,5").
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PriceField {
    Number(f64),
    Text(String),
}

/// Parse a price into a non-negative value rounded to 2 decimal places.
/// Unparseable input yields 0.00 — a zero price is the skip signal
/// downstream, never an error.
pub fn parse_price(value: Option<&PriceField>) -> f64 {
    match value {
        Some(PriceField::Number(n)) => round2(n.max(0.0)),
        Some(PriceField::Text(s)) => parse_price_str(s),
        None => 0.0,
    }
}

/// Decimal-separator disambiguation across three catalogs with mixed
/// locales. The rule: when both `,` and `.` occur, the right-most one is
/// the decimal point; repeated single separators are thousands separators
/// except the last; a lone separator is the decimal point.
pub fn parse_price_str(raw: &str) -> f64 {
    let mut value: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.' || c.is_whitespace())
        .collect();
    value = value.trim().to_string();

    let commas = value.matches(',').count();
    let dots = value.matches('.').count();

    if commas > 0 && dots > 0 {
        if value.rfind(',') > value.rfind('.') {
            value = value.replace('.', "").replace(',', ".");
        } else {
            value = value.replace(',', "");
        }
    } else if commas > 1 {
        value = join_all_but_last(&value, ',');
    } else if dots > 1 {
        value = join_all_but_last(&value, '.');
    } else {
        value = value.replace(',', ".");
    }

    match value.parse::<f64>() {
        Ok(n) if n >= 0.0 => round2(n),
        _ => 0.0,
    }
}

fn join_all_but_last(value: &str, sep: char) -> String {
    let parts: Vec<&str> = value.split(sep).collect();
    let (last, head) = parts.split_last().unwrap();
    format!("{}.{}", head.concat(), last)
}

pub fn round2(n: f64) -> f64 {
    (n * 100.0).round() / 100.0
}

// ── Tests ──
