//! Locale-aware normalization of scraped amounts and dates into canonical form.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};

use crate::{BillFragment, ProviderId, RawAmount};

/// Month-name prefixes in the forms Greek portals actually render, plus the
/// English forms some portals fall back to.
const MONTHS: &[(&str, u32)] = &[
    ("ιαν", 1),
    ("φεβ", 2),
    ("μαρ", 3),
    ("απρ", 4),
    ("μαΐ", 5),
    ("μαϊ", 5),
    ("μαι", 5),
    ("ιουν", 6),
    ("ιουλ", 7),
    ("αυγ", 8),
    ("σεπ", 9),
    ("οκτ", 10),
    ("νοε", 11),
    ("δεκ", 12),
    ("jan", 1),
    ("feb", 2),
    ("mar", 3),
    ("apr", 4),
    ("may", 5),
    ("jun", 6),
    ("jul", 7),
    ("aug", 8),
    ("sep", 9),
    ("oct", 10),
    ("nov", 11),
    ("dec", 12),
];

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl RawAmount {
    /// Canonical two-fraction-digit value; `0.0` means "no amount found".
    pub fn normalized(&self) -> f64 {
        match self {
            RawAmount::Number(value) => round2(*value),
            RawAmount::Text(text) => parse_amount(text),
        }
    }
}

/// Parse a locale-formatted monetary string.
///
/// Detects Greek grouping (thousand separator `.`, decimal `,`) versus plain
/// grouping (`,` thousands, `.` decimal) by shape. Unparsable input yields
/// `0.0`, which callers treat as a discarded fragment.
pub fn parse_amount(text: &str) -> f64 {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    if cleaned.chars().all(|c| !c.is_ascii_digit()) {
        return 0.0;
    }

    let has_dot = cleaned.contains('.');
    let has_comma = cleaned.contains(',');

    let canonical = if has_dot && has_comma {
        let last_dot = cleaned.rfind('.').unwrap_or(0);
        let last_comma = cleaned.rfind(',').unwrap_or(0);
        if last_comma > last_dot {
            cleaned.replace('.', "").replace(',', ".")
        } else {
            cleaned.replace(',', "")
        }
    } else if has_comma {
        let digits_after = cleaned.len() - cleaned.rfind(',').map_or(0, |i| i + 1);
        if cleaned.matches(',').count() == 1 && digits_after <= 2 {
            cleaned.replace(',', ".")
        } else {
            cleaned.replace(',', "")
        }
    } else if has_dot {
        let digits_after = cleaned.len() - cleaned.rfind('.').map_or(0, |i| i + 1);
        if cleaned.matches('.').count() == 1 && digits_after <= 2 {
            cleaned
        } else {
            cleaned.replace('.', "")
        }
    } else {
        cleaned
    };

    canonical.parse::<f64>().map(round2).unwrap_or(0.0)
}

fn month_number(token: &str) -> Option<u32> {
    let lower = token.trim_matches('.').to_lowercase();
    MONTHS
        .iter()
        .find(|(name, _)| lower.starts_with(name))
        .map(|(_, month)| *month)
}

/// Strict parse attempts, in priority order. `None` when nothing matched.
pub fn parse_date_opt(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    // "15 Φεβ 2025" / "15 Feb 2025"
    let tokens: Vec<&str> = trimmed.split_whitespace().collect();
    if tokens.len() == 3 {
        if let (Ok(day), Some(month), Ok(year)) = (
            tokens[0].parse::<u32>(),
            month_number(tokens[1]),
            tokens[2].parse::<i32>(),
        ) {
            if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                return Some(date);
            }
        }
    }

    // "15/02/2025", "15-02-2025", "15.02.2025", "2025-02-15"
    let parts: Vec<&str> = trimmed
        .split(['/', '-', '.'])
        .map(str::trim)
        .collect();
    if parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
    {
        let numbers: Vec<u32> = parts.iter().filter_map(|p| p.parse().ok()).collect();
        if numbers.len() == 3 {
            if parts[2].len() == 4 {
                return NaiveDate::from_ymd_opt(numbers[2] as i32, numbers[1], numbers[0]);
            }
            if parts[0].len() == 4 {
                return NaiveDate::from_ymd_opt(numbers[0] as i32, numbers[1], numbers[2]);
            }
        }
    }

    if let Ok(stamp) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(stamp.date_naive());
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").ok()
}

/// Lenient parse used for scraped date fields: falls back to today rather
/// than failing the whole sync for one unparsable field. Known data-quality
/// tradeoff, preserved from observed behavior.
pub fn parse_date(text: &str) -> NaiveDate {
    parse_date_opt(text).unwrap_or_else(|| Utc::now().date_naive())
}

/// Canonical bill candidate after normalization, ready for reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBill {
    pub title: String,
    pub amount: f64,
    pub due_date: NaiveDate,
    pub issue_date: Option<NaiveDate>,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub reference_number: String,
    pub bill_type: String,
    pub payment_code: Option<String>,
}

fn synthesize_reference(
    provider: ProviderId,
    due_date: NaiveDate,
    amount: f64,
    ordinal: u32,
) -> String {
    let cents = (amount * 100.0).round() as i64;
    format!("SYN-{provider}-{}-{cents}-{ordinal}", due_date.format("%Y%m%d"))
}

/// Normalize raw fragments into canonical bill candidates.
///
/// Fragments without a positive amount are discarded. A fragment without a
/// portal-assigned reference number gets a deterministic synthesized one; the
/// ordinal disambiguates same-valued fragments within one outcome so two
/// distinct bills never collapse into one record, while re-running against an
/// unchanged portal reproduces the same references.
pub fn normalize_fragments(
    provider: ProviderId,
    default_bill_type: &str,
    fragments: &[BillFragment],
) -> Vec<NormalizedBill> {
    let mut synthesized: HashMap<String, u32> = HashMap::new();
    let mut out = Vec::new();

    for fragment in fragments {
        let amount = fragment
            .amount
            .as_ref()
            .map(RawAmount::normalized)
            .unwrap_or(0.0);
        if amount <= 0.0 {
            continue;
        }

        let due_date = fragment
            .due_date
            .as_deref()
            .map(parse_date)
            .unwrap_or_else(|| Utc::now().date_naive());

        let title = fragment
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(ToString::to_string)
            .unwrap_or_else(|| format!("{provider} bill"));

        let reference_number = match fragment
            .reference_number
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
        {
            Some(reference) => reference.to_string(),
            None => {
                let key = format!("{provider}:{due_date}:{}", (amount * 100.0).round() as i64);
                let ordinal = *synthesized
                    .entry(key)
                    .and_modify(|n| *n += 1)
                    .or_insert(0);
                synthesize_reference(provider, due_date, amount, ordinal)
            }
        };

        out.push(NormalizedBill {
            title,
            amount,
            due_date,
            issue_date: fragment.issue_date.as_deref().map(parse_date),
            period_start: fragment.period_start.as_deref().map(parse_date),
            period_end: fragment.period_end.as_deref().map(parse_date),
            reference_number,
            bill_type: fragment
                .bill_type
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(ToString::to_string)
                .unwrap_or_else(|| default_bill_type.to_string()),
            payment_code: fragment.payment_code.clone(),
        });
    }

    out
}
