// 🧹 Data Shaping - coercion and naming rules shared by every view
//
// Deal records arrive with holes: missing values, missing timestamps,
// unresolved references. None of that is an error. Each hole has exactly one
// rule, and every view goes through these helpers so the rules never drift:
//
//   value missing / non-numeric / non-finite  → 0
//   status unresolved or blank                → "Unknown"
//   owner unresolved or blank                 → "Unassigned"
//   company unresolved or blank               → not attributed
//   created_at missing                        → excluded from time buckets

use crate::db::{Deal, NamedRef};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Bucket name for deals whose status does not resolve.
pub const UNKNOWN_STATUS: &str = "Unknown";

/// Bucket name for deals without an owning person.
pub const UNASSIGNED: &str = "Unassigned";

const MILLIS_PER_DAY: f64 = 1000.0 * 60.0 * 60.0 * 24.0;

// ============================================================================
// VALUES
// ============================================================================

/// Coerce an optional deal value to a usable number.
pub fn coerce_value(value: Option<f64>) -> f64 {
    match value {
        Some(v) if v.is_finite() => v,
        _ => 0.0,
    }
}

/// Serde hook: numbers and numeric strings are values, anything else is missing.
pub fn deserialize_lenient_value<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|v| lenient_value(&v)))
}

fn lenient_value(raw: &serde_json::Value) -> Option<f64> {
    match raw {
        serde_json::Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        serde_json::Value::String(s) => parse_value(s),
        _ => None,
    }
}

/// Parse a value cell such as `"1200"`, `"1,200.50"` or `"$300"`.
pub fn parse_value(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' '))
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

// ============================================================================
// NAMES
// ============================================================================

/// Normal form of a status, company or person name. Columns are keyed by it
/// and status lookups match on it, so a drop target always resolves.
pub fn normalize_name(raw: &str) -> &str {
    raw.trim()
}

fn resolved(reference: Option<&NamedRef>) -> Option<&str> {
    reference
        .map(|r| normalize_name(&r.name))
        .filter(|name| !name.is_empty())
}

/// Status display name, `"Unknown"` when unresolved.
pub fn status_name(deal: &Deal) -> &str {
    resolved(deal.status.as_ref()).unwrap_or(UNKNOWN_STATUS)
}

/// Owner display name, `"Unassigned"` when unresolved.
pub fn person_name(deal: &Deal) -> &str {
    resolved(deal.person.as_ref()).unwrap_or(UNASSIGNED)
}

/// Company display name; deals without one are not attributed to any company.
pub fn company_name(deal: &Deal) -> Option<&str> {
    resolved(deal.company.as_ref())
}

// ============================================================================
// TIME
// ============================================================================

/// Calendar-month bucket key (`YYYY-MM`, zero padded, UTC).
pub fn month_key(instant: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", instant.year(), instant.month())
}

/// Elapsed fractional days between two instants.
pub fn duration_days(created_at: DateTime<Utc>, closed_at: DateTime<Utc>) -> f64 {
    (closed_at - created_at).num_milliseconds() as f64 / MILLIS_PER_DAY
}

/// Parse a timestamp cell: RFC 3339, naive date-time (assumed UTC) or bare date.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

// ============================================================================
// PRESENTATION FORMATTING (front ends only, never inside the engine)
// ============================================================================

/// `$1,234.5` style currency with thousands grouping and at most 2 decimals.
pub fn format_currency(amount: f64) -> String {
    let amount = coerce_value(Some(amount));
    let negative = amount < 0.0;
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = cents / 100;
    let fraction = cents % 100;

    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    let sign = if negative { "-" } else { "" };
    match fraction {
        0 => format!("{sign}${grouped}"),
        f if f % 10 == 0 => format!("{sign}${grouped}.{}", f / 10),
        f => format!("{sign}${grouped}.{f:02}"),
    }
}

/// One-decimal percentage (`66.7%`).
pub fn format_percent(percent: f64) -> String {
    format!("{:.1}%", coerce_value(Some(percent)))
}

// ============================================================================
// SHAPE REPORT
// ============================================================================

/// Counts of data-shape anomalies in one deal collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShapeReport {
    pub total_deals: usize,
    pub missing_value: usize,
    pub missing_created_at: usize,
    pub closed_without_created_at: usize,
    pub unresolved_status: usize,
    pub missing_company: usize,
    pub missing_owner: usize,
}

impl ShapeReport {
    pub fn inspect(deals: &[Deal]) -> Self {
        let mut report = ShapeReport {
            total_deals: deals.len(),
            ..Default::default()
        };

        for deal in deals {
            if !matches!(deal.value, Some(v) if v.is_finite()) {
                report.missing_value += 1;
            }
            if deal.created_at.is_none() {
                report.missing_created_at += 1;
                if deal.closed_at.is_some() {
                    report.closed_without_created_at += 1;
                }
            }
            if resolved(deal.status.as_ref()).is_none() {
                report.unresolved_status += 1;
            }
            if company_name(deal).is_none() {
                report.missing_company += 1;
            }
            if resolved(deal.person.as_ref()).is_none() {
                report.missing_owner += 1;
            }
        }

        report
    }

    pub fn anomaly_count(&self) -> usize {
        self.missing_value
            + self.missing_created_at
            + self.unresolved_status
            + self.missing_company
            + self.missing_owner
    }

    pub fn is_clean(&self) -> bool {
        self.anomaly_count() == 0
    }

    pub fn summary(&self) -> String {
        format!(
            "{} deals: {} without value, {} without created_at, {} unresolved status, {} without company, {} without owner",
            self.total_deals,
            self.missing_value,
            self.missing_created_at,
            self.unresolved_status,
            self.missing_company,
            self.missing_owner
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn named(name: &str) -> Option<NamedRef> {
        Some(NamedRef {
            name: name.to_string(),
        })
    }

    #[test]
    fn test_coerce_value() {
        assert_eq!(coerce_value(Some(120.5)), 120.5);
        assert_eq!(coerce_value(None), 0.0);
        assert_eq!(coerce_value(Some(f64::NAN)), 0.0);
        assert_eq!(coerce_value(Some(f64::INFINITY)), 0.0);
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("1200"), Some(1200.0));
        assert_eq!(parse_value("$1,200.50"), Some(1200.5));
        assert_eq!(parse_value("  "), None);
        assert_eq!(parse_value("n/a"), None);
        assert_eq!(parse_value("NaN"), None);
    }

    #[test]
    fn test_lenient_value_from_json() {
        let deal: Deal = serde_json::from_value(serde_json::json!({
            "id": "D1",
            "value": "250"
        }))
        .unwrap();
        assert_eq!(deal.value, Some(250.0));

        let deal: Deal = serde_json::from_value(serde_json::json!({
            "id": "D2",
            "value": {"amount": 3}
        }))
        .unwrap();
        assert_eq!(deal.value, None);

        let deal: Deal = serde_json::from_value(serde_json::json!({ "id": "D3" })).unwrap();
        assert_eq!(deal.value, None);
    }

    #[test]
    fn test_name_fallbacks() {
        let mut deal = Deal::new("D1");
        assert_eq!(status_name(&deal), UNKNOWN_STATUS);
        assert_eq!(person_name(&deal), UNASSIGNED);
        assert_eq!(company_name(&deal), None);

        deal.status = named("  ");
        deal.person = named("");
        assert_eq!(status_name(&deal), UNKNOWN_STATUS);
        assert_eq!(person_name(&deal), UNASSIGNED);

        deal.status = named("Open");
        deal.person = named("Ana");
        deal.company = named("Acme");
        assert_eq!(status_name(&deal), "Open");
        assert_eq!(person_name(&deal), "Ana");
        assert_eq!(company_name(&deal), Some("Acme"));

        deal.status = named("Won ");
        assert_eq!(status_name(&deal), normalize_name("Won "));
        assert_eq!(status_name(&deal), "Won");
    }

    #[test]
    fn test_month_key_is_zero_padded() {
        let instant = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();
        assert_eq!(month_key(instant), "2024-03");

        let instant = Utc.with_ymd_and_hms(2023, 11, 30, 23, 59, 59).unwrap();
        assert_eq!(month_key(instant), "2023-11");
    }

    #[test]
    fn test_duration_days_is_fractional() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let closed = Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap();
        assert_eq!(duration_days(created, closed), 1.5);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 2, 10, 8, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-02-10T08:30:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-02-10T10:30:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-02-10 08:30:00"), Some(expected));
        assert_eq!(
            parse_timestamp("2024-02-10"),
            Some(Utc.with_ymd_and_hms(2024, 2, 10, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("last tuesday"), None);
    }

    #[test]
    fn test_format_currency() {
        assert_eq!(format_currency(0.0), "$0");
        assert_eq!(format_currency(350.0), "$350");
        assert_eq!(format_currency(1234567.891), "$1,234,567.89");
        assert_eq!(format_currency(116.666), "$116.67");
        assert_eq!(format_currency(1000.5), "$1,000.5");
        assert_eq!(format_currency(-2500.0), "-$2,500");
    }

    #[test]
    fn test_format_percent() {
        assert_eq!(format_percent(66.666), "66.7%");
        assert_eq!(format_percent(0.0), "0.0%");
    }

    #[test]
    fn test_shape_report() {
        let mut clean = Deal::new("D1");
        clean.value = Some(10.0);
        clean.created_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        clean.status = named("Open");
        clean.company = named("Acme");
        clean.person = named("Ana");

        let mut holes = Deal::new("D2");
        holes.closed_at = Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());

        let report = ShapeReport::inspect(&[clean.clone(), holes]);
        assert_eq!(report.total_deals, 2);
        assert_eq!(report.missing_value, 1);
        assert_eq!(report.missing_created_at, 1);
        assert_eq!(report.closed_without_created_at, 1);
        assert_eq!(report.unresolved_status, 1);
        assert_eq!(report.missing_company, 1);
        assert_eq!(report.missing_owner, 1);
        assert!(!report.is_clean());

        assert!(ShapeReport::inspect(&[clean]).is_clean());
        assert!(ShapeReport::inspect(&[]).is_clean());
    }
}
