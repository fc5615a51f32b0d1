use std::sync::LazyLock;

use regex::{Captures, Regex};

/// The three base measurement scales every quantity converges to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Grams,
    Millilitres,
    Units,
}

impl Unit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Grams => "g",
            Unit::Millilitres => "ml",
            Unit::Units => "un",
        }
    }

    pub fn from_str_or_units(s: &str) -> Unit {
        match s {
            "g" => Unit::Grams,
            "ml" => Unit::Millilitres,
            _ => Unit::Units,
        }
    }
}

/// Canonical quantity: per-item amount in a base unit, pack count, and
/// their product.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardQuantity {
    pub value: f64,
    pub unit: Unit,
    pub items: i64,
    pub total: f64,
}

impl Default for StandardQuantity {
    fn default() -> Self {
        StandardQuantity {
            value: 1.0,
            unit: Unit::Units,
            items: 1,
            total: 1.0,
        }
    }
}

/// Raw quantity input: free text from a token or product page, a bare
/// number from a structured feed, or nothing.
#[derive(Debug, Clone, Copy)]
pub enum RawQuantity<'a> {
    Text(&'a str),
    Number(f64),
    Missing,
}

impl<'a> RawQuantity<'a> {
    /// Classify a stored quantity column: a field that parses cleanly as a
    /// number came from a structured feed and needs the price-unit hint.
    pub fn from_field(field: Option<&'a str>) -> RawQuantity<'a> {
        match field {
            None => RawQuantity::Missing,
            Some(s) if s.trim().is_empty() => RawQuantity::Missing,
            Some(s) => match s.trim().parse::<f64>() {
                Ok(n) => RawQuantity::Number(n),
                Err(_) => RawQuantity::Text(s),
            },
        }
    }
}

static FILLER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(emb\.?|quant\. mínima =|aprox\.?|grátis|aproximadamente|cerca de)\b").unwrap()
});

type ShapeBuilder = fn(&Captures) -> StandardQuantity;

/// Ordered shape matchers, first match wins. Order is a tested contract.
static SHAPES: LazyLock<Vec<(Regex, ShapeBuilder)>> = LazyLock::new(|| {
    vec![
        // "1,075 gr (38 un)" — net amount with bracketed unit count
        (
            Regex::new(r"(\d+[.,]?\d*)\s*(g|gr|ml|l|lt|cl|kg)\s*\((\d+)\s*un\)").unwrap(),
            (|c: &Captures| {
                let total = to_base(parse_number(&c[1]), &c[2]);
                let items = int(&c[3]).max(1);
                StandardQuantity {
                    value: total / items as f64,
                    unit: base_unit(&c[2]),
                    items,
                    total,
                }
            }) as ShapeBuilder,
        ),
        // "peso escorrido 41 gr" — drained weight
        (
            Regex::new(r"peso\s*escorrido\s*(\d+)\s*(g|gr|ml|l|lt|cl|kg)").unwrap(),
            |c| single(to_base(parse_number(&c[1]), &c[2]), base_unit(&c[2])),
        ),
        // "12 x 1 lt"
        (
            Regex::new(r"(\d+)\s*x\s*(\d+[.,]?\d*)\s*(g|gr|ml|l|lt|cl|kg)").unwrap(),
            |c| {
                let value = to_base(parse_number(&c[2]), &c[3]);
                let items = int(&c[1]);
                StandardQuantity {
                    value,
                    unit: base_unit(&c[3]),
                    items,
                    total: items as f64 * value,
                }
            },
        ),
        // "100 un + 20 grátis" — bonus units summed
        (
            Regex::new(r"(\d+)\s*un\s*\+\s*(\d+)").unwrap(),
            |c| single((int(&c[1]) + int(&c[2])) as f64, Unit::Units),
        ),
        // "2 x emb. 10 un" — filler stripping may leave a stray dot behind
        (
            Regex::new(r"(\d+)\s*x[\s.]*(?:emb\.)?[\s.]*(\d+)\s*un").unwrap(),
            |c| {
                let items = int(&c[1]);
                let value = int(&c[2]) as f64;
                StandardQuantity {
                    value,
                    unit: Unit::Units,
                    items,
                    total: items as f64 * value,
                }
            },
        ),
        // leading bare unit count: "40 un ..."
        (
            Regex::new(r"^(\d+)\s*un").unwrap(),
            |c| single(int(&c[1]) as f64, Unit::Units),
        ),
        // plain weight/volume: "200g", "1.5kg"
        (
            Regex::new(r"(\d+[.,]?\d*)\s*(g|gr|ml|l|lt|cl|kg)").unwrap(),
            |c| single(to_base(parse_number(&c[1]), &c[2]), base_unit(&c[2])),
        ),
        // "emb. 20 comprimidos"
        (
            Regex::new(r"emb\.?\s*(\d+)\s*(comprimidos|cápsulas|drageias|doses)").unwrap(),
            |c| single(int(&c[1]) as f64, Unit::Units),
        ),
        // "90 cápsulas"
        (
            Regex::new(r"(\d+)\s*(comprimidos|cápsulas|drageias|doses)").unwrap(),
            |c| single(int(&c[1]) as f64, Unit::Units),
        ),
    ]
});

/// Convert a raw quantity into the canonical `{value, unit, items, total}`
/// tuple. Never errors: anything unrecognized falls back to one bare unit.
pub fn standardize(quantity: RawQuantity, secondary_price_unit: &str) -> StandardQuantity {
    let text = match quantity {
        RawQuantity::Missing => return StandardQuantity::default(),
        RawQuantity::Number(n) => synthesize_token(n, secondary_price_unit),
        RawQuantity::Text(t) => t.to_lowercase(),
    };

    let cleaned = FILLER_RE.replace_all(text.trim(), "");
    let cleaned = cleaned.trim();

    SHAPES
        .iter()
        .find_map(|(re, build)| re.captures(cleaned).map(|c| build(&c)))
        .unwrap_or_default()
}

/// A numeric quantity from a structured feed carries no unit of its own;
/// the secondary price unit says whether it is a mass, a volume or a count.
fn synthesize_token(n: f64, secondary_price_unit: &str) -> String {
    match secondary_price_unit {
        "kg" | "kgm" => format!("{n}g"),
        "lt" | "l" | "ltr" => format!("{n}ml"),
        _ => format!("{n}un"),
    }
}

fn single(value: f64, unit: Unit) -> StandardQuantity {
    StandardQuantity {
        value,
        unit,
        items: 1,
        total: value,
    }
}

fn int(s: &str) -> i64 {
    s.parse::<i64>().unwrap_or(1)
}

/// Parse a captured number that may use a comma or dot either as a decimal
/// separator ("0,375") or as a thousands separator ("1,075"). A separator
/// followed by exactly three digits after a non-zero 1-3 digit head is
/// grouping; everything else is a decimal point.
fn parse_number(s: &str) -> f64 {
    static GROUPED_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^([1-9]\d{0,2})[.,](\d{3})$").unwrap());
    if let Some(c) = GROUPED_RE.captures(s) {
        return format!("{}{}", &c[1], &c[2]).parse::<f64>().unwrap_or(1.0);
    }
    s.replace(',', ".").parse::<f64>().unwrap_or(1.0)
}

fn to_base(value: f64, unit: &str) -> f64 {
    match unit {
        "kg" | "l" | "lt" => value * 1000.0,
        "cl" => value * 10.0,
        _ => value,
    }
}

fn base_unit(unit: &str) -> Unit {
    match unit {
        "g" | "gr" | "kg" => Unit::Grams,
        "ml" | "l" | "lt" | "cl" => Unit::Millilitres,
        _ => Unit::Units,
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn std_text(s: &str) -> StandardQuantity {
        standardize(RawQuantity::Text(s), "")
    }

    #[test]
    fn bracketed_unit_count_splits_total() {
        let q = std_text("1,075 gr (38 un)");
        assert_eq!(q.total, 1075.0);
        assert_eq!(q.items, 38);
        assert_eq!(q.unit, Unit::Grams);
        assert!((q.value - 1075.0 / 38.0).abs() < 1e-9);
    }

    #[test]
    fn multi_pack_volume() {
        let q = std_text("12 x 1 lt");
        assert_eq!(
            q,
            StandardQuantity {
                value: 1000.0,
                unit: Unit::Millilitres,
                items: 12,
                total: 12000.0
            }
        );
    }

    #[test]
    fn drained_weight() {
        let q = std_text("peso escorrido 41 gr");
        assert_eq!(q.total, 41.0);
        assert_eq!(q.unit, Unit::Grams);
        assert_eq!(q.items, 1);
    }

    #[test]
    fn bonus_units_summed() {
        let q = std_text("100 un + 20 grátis");
        assert_eq!(q.total, 120.0);
        assert_eq!(q.items, 1);
        assert_eq!(q.unit, Unit::Units);
    }

    #[test]
    fn pack_of_packs() {
        let q = std_text("2 x emb. 10 un");
        assert_eq!(q.items, 2);
        assert_eq!(q.value, 10.0);
        assert_eq!(q.total, 20.0);
    }

    #[test]
    fn leading_unit_count() {
        let q = std_text("40 un sacos congelação");
        assert_eq!(q.total, 40.0);
        assert_eq!(q.unit, Unit::Units);
    }

    #[test]
    fn plain_weight_with_decimal_comma() {
        let q = std_text("1,5kg");
        assert_eq!(q.total, 1500.0);
        assert_eq!(q.unit, Unit::Grams);

        let q = std_text("0,375 l");
        assert_eq!(q.total, 375.0);
        assert_eq!(q.unit, Unit::Millilitres);
    }

    #[test]
    fn centilitres_scale_by_ten() {
        let q = std_text("75 cl");
        assert_eq!(q.total, 750.0);
        assert_eq!(q.unit, Unit::Millilitres);
    }

    #[test]
    fn dosage_counts() {
        let q = std_text("90 cápsulas");
        assert_eq!(q.total, 90.0);
        assert_eq!(q.unit, Unit::Units);
    }

    #[test]
    fn filler_words_stripped() {
        let q = std_text("emb. aprox. 500 g");
        assert_eq!(q.total, 500.0);
        assert_eq!(q.unit, Unit::Grams);
    }

    #[test]
    fn numeric_input_uses_price_unit_hint() {
        let q = standardize(RawQuantity::Number(250.0), "kg");
        assert_eq!(q.unit, Unit::Grams);
        assert_eq!(q.total, 250.0);

        let q = standardize(RawQuantity::Number(330.0), "lt");
        assert_eq!(q.unit, Unit::Millilitres);

        let q = standardize(RawQuantity::Number(6.0), "un");
        assert_eq!(q.unit, Unit::Units);
        assert_eq!(q.total, 6.0);
    }

    #[test]
    fn unmatched_defaults_to_one_unit() {
        assert_eq!(std_text("tamanho único"), StandardQuantity::default());
        assert_eq!(
            standardize(RawQuantity::Missing, "kg"),
            StandardQuantity::default()
        );
    }

    #[test]
    fn from_field_classifies_numeric_text() {
        assert!(matches!(
            RawQuantity::from_field(Some("250")),
            RawQuantity::Number(_)
        ));
        assert!(matches!(
            RawQuantity::from_field(Some("2x500g")),
            RawQuantity::Text(_)
        ));
        assert!(matches!(RawQuantity::from_field(None), RawQuantity::Missing));
    }
}
