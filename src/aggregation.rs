// 📊 Aggregation Engine - every dashboard number comes from here
//
// Pure functions from a deal collection to view statistics. No I/O, no
// clocks, no rounding (the only arithmetic shaping is the mean in velocity
// and trend). Empty input always yields empty/zeroed output.
//
// Ordering rules:
//   - status / velocity groupings: first-encounter order of the key
//   - company / person metrics: total value descending, ties keep encounter order
//   - monthly revenue: ascending YYYY-MM key

use crate::db::Deal;
use crate::entities::Company;
use crate::shaping::{
    coerce_value, company_name, duration_days, month_key, person_name, status_name,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default moving-average window for the revenue trend
pub const DEFAULT_TREND_WINDOW: usize = 3;

/// Number of companies in the value distribution chart
pub const DISTRIBUTION_SIZE: usize = 5;

// ============================================================================
// OUTPUT SHAPES
// ============================================================================

/// Display name → aggregate, keeping the order in which names were first seen.
///
/// The key set is only known at runtime (statuses are data-driven), so this is
/// a map rather than a struct; it serializes as a plain JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Grouping<V> {
    entries: IndexMap<String, V>,
}

impl<V> Grouping<V> {
    pub fn new() -> Self {
        Grouping {
            entries: IndexMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&V> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Position of a name in encounter order
    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.get_index_of(name)
    }

    pub fn get_index(&self, index: usize) -> Option<(&str, &V)> {
        self.entries.get_index(index).map(|(k, v)| (k.as_str(), v))
    }

    fn slot(&mut self, name: &str, init: impl FnOnce() -> V) -> &mut V {
        self.entries.entry(name.to_string()).or_insert_with(init)
    }
}

impl<V> Default for Grouping<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> IntoIterator for Grouping<V> {
    type Item = (String, V);
    type IntoIter = indexmap::map::IntoIter<String, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// One Kanban column / status bar
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusBucket {
    pub count: usize,
    pub total_value: f64,
    pub members: Vec<Deal>,
}

/// Per-company or per-person performance row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMetrics {
    pub name: String,
    pub total_value: f64,
    pub deal_count: usize,
    pub closed_deals: usize,
    /// Percentage of closed deals, 0 when there are no deals
    pub success_rate: f64,
}

impl EntityMetrics {
    fn empty(name: &str) -> Self {
        EntityMetrics {
            name: name.to_string(),
            total_value: 0.0,
            deal_count: 0,
            closed_deals: 0,
            success_rate: 0.0,
        }
    }

    fn add(&mut self, deal: &Deal) {
        self.total_value += coerce_value(deal.value);
        self.deal_count += 1;
        if deal.is_closed() {
            self.closed_deals += 1;
        }
    }

    fn finish(&mut self) {
        self.success_rate = if self.deal_count == 0 {
            0.0
        } else {
            self.closed_deals as f64 / self.deal_count as f64 * 100.0
        };
    }
}

/// `{name, value}` point for bar/pie charts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameValue {
    pub name: String,
    pub value: f64,
}

/// Revenue of one calendar month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyBucket {
    /// `YYYY-MM`
    pub date: String,
    pub value: f64,
}

/// Monthly revenue with its moving-average trend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub date: String,
    pub value: f64,
    /// Absent until a full window of months is available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<f64>,
}

/// Scalar forecast cards shown under the revenue trend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastSummary {
    /// Latest month × 3
    pub current_quarter_forecast: Option<f64>,
    pub average_monthly_revenue: f64,
    /// Latest month against the one before, in percent
    pub growth_rate_percent: Option<f64>,
}

// ============================================================================
// TOTALS
// ============================================================================

pub fn total_value(deals: &[Deal]) -> f64 {
    deals.iter().map(|deal| coerce_value(deal.value)).sum()
}

pub fn average_value(deals: &[Deal]) -> f64 {
    if deals.is_empty() {
        return 0.0;
    }
    total_value(deals) / deals.len() as f64
}

// ============================================================================
// STATUS GROUPING
// ============================================================================

/// Deals bucketed by status name. Every deal lands in exactly one bucket.
pub fn group_by_status(deals: &[Deal]) -> Grouping<StatusBucket> {
    let mut groups: Grouping<StatusBucket> = Grouping::new();

    for deal in deals {
        let bucket = groups.slot(status_name(deal), StatusBucket::default);
        bucket.count += 1;
        bucket.total_value += coerce_value(deal.value);
        bucket.members.push(deal.clone());
    }

    groups
}

/// Deal count per status (Overview bar chart)
pub fn status_counts(deals: &[Deal]) -> Vec<NameValue> {
    let mut counts: Grouping<usize> = Grouping::new();
    for deal in deals {
        *counts.slot(status_name(deal), || 0) += 1;
    }

    counts
        .into_iter()
        .map(|(name, count)| NameValue {
            name,
            value: count as f64,
        })
        .collect()
}

// ============================================================================
// COMPANY / PERSON METRICS
// ============================================================================

fn rank_by_value(mut metrics: Vec<EntityMetrics>) -> Vec<EntityMetrics> {
    for m in metrics.iter_mut() {
        m.finish();
    }
    // sort_by is stable: equal totals keep encounter order
    metrics.sort_by(|a, b| b.total_value.total_cmp(&a.total_value));
    metrics
}

fn collect_metrics<'a, F>(deals: &'a [Deal], mut seed: Grouping<EntityMetrics>, key: F) -> Vec<EntityMetrics>
where
    F: Fn(&'a Deal) -> Option<&'a str>,
{
    for deal in deals {
        if let Some(name) = key(deal) {
            seed.slot(name, || EntityMetrics::empty(name)).add(deal);
        }
    }
    rank_by_value(seed.into_iter().map(|(_, m)| m).collect())
}

/// Per-company metrics, highest total value first.
/// Deals without a company are not attributed to any company.
pub fn company_metrics(deals: &[Deal]) -> Vec<EntityMetrics> {
    collect_metrics(deals, Grouping::new(), company_name)
}

/// Like `company_metrics`, but every company of the directory gets a row,
/// including companies without deals (deal_count 0, success_rate 0).
pub fn company_metrics_with_directory(deals: &[Deal], companies: &[Company]) -> Vec<EntityMetrics> {
    let mut seen: Grouping<EntityMetrics> = Grouping::new();
    for deal in deals {
        if let Some(name) = company_name(deal) {
            seen.slot(name, || EntityMetrics::empty(name)).add(deal);
        }
    }
    for company in companies {
        let name = company.name.trim();
        if !name.is_empty() {
            seen.slot(name, || EntityMetrics::empty(name));
        }
    }
    rank_by_value(seen.into_iter().map(|(_, m)| m).collect())
}

/// Per-owner metrics, highest total value first; missing owner is `"Unassigned"`.
pub fn performance_by_person(deals: &[Deal]) -> Vec<EntityMetrics> {
    collect_metrics(deals, Grouping::new(), |deal| Some(person_name(deal)))
}

/// First `n` rows of a ranked metrics table as chart points.
pub fn value_distribution(metrics: &[EntityMetrics], n: usize) -> Vec<NameValue> {
    metrics
        .iter()
        .take(n)
        .map(|m| NameValue {
            name: m.name.clone(),
            value: m.total_value,
        })
        .collect()
}

// ============================================================================
// REVENUE OVER TIME
// ============================================================================

/// Revenue per creation month, ascending. Deals without `created_at` are left out.
pub fn monthly_revenue(deals: &[Deal]) -> Vec<MonthlyBucket> {
    let mut months: BTreeMap<String, f64> = BTreeMap::new();

    for deal in deals {
        if let Some(created_at) = deal.created_at {
            *months.entry(month_key(created_at)).or_insert(0.0) += coerce_value(deal.value);
        }
    }

    months
        .into_iter()
        .map(|(date, value)| MonthlyBucket { date, value })
        .collect()
}

/// Attach a trailing moving average to each month.
///
/// The first `window - 1` months have no trend: a trend is only reported once
/// a full window of months exists.
pub fn moving_average_trend(series: &[MonthlyBucket], window: usize) -> Vec<TrendPoint> {
    series
        .iter()
        .enumerate()
        .map(|(index, bucket)| {
            let trend = if window > 0 && index + 1 >= window {
                let slice = &series[index + 1 - window..=index];
                Some(slice.iter().map(|b| b.value).sum::<f64>() / window as f64)
            } else {
                None
            };

            TrendPoint {
                date: bucket.date.clone(),
                value: bucket.value,
                trend,
            }
        })
        .collect()
}

pub fn forecast_summary(series: &[MonthlyBucket]) -> ForecastSummary {
    let latest = series.last().map(|b| b.value);

    let average_monthly_revenue = if series.is_empty() {
        0.0
    } else {
        series.iter().map(|b| b.value).sum::<f64>() / series.len() as f64
    };

    let growth_rate_percent = match series {
        [.., previous, latest] if previous.value != 0.0 => {
            Some((latest.value / previous.value - 1.0) * 100.0)
        }
        _ => None,
    };

    ForecastSummary {
        current_quarter_forecast: latest.map(|v| v * 3.0),
        average_monthly_revenue,
        growth_rate_percent,
    }
}

// ============================================================================
// VELOCITY
// ============================================================================

/// Mean days from creation to close, per status.
/// Deals missing either timestamp are left out; unresolved status is `"Unknown"`.
pub fn velocity_by_status(deals: &[Deal]) -> Vec<NameValue> {
    let mut durations: Grouping<(f64, usize)> = Grouping::new();

    for deal in deals {
        if let (Some(created_at), Some(closed_at)) = (deal.created_at, deal.closed_at) {
            let entry = durations.slot(status_name(deal), || (0.0, 0));
            entry.0 += duration_days(created_at, closed_at);
            entry.1 += 1;
        }
    }

    durations
        .into_iter()
        .map(|(name, (sum, count))| NameValue {
            name,
            value: sum / count as f64,
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NamedRef;
    use crate::shaping::{UNASSIGNED, UNKNOWN_STATUS};
    use chrono::{TimeZone, Utc};

    fn create_test_deal(id: &str, value: Option<f64>, status: Option<&str>) -> Deal {
        let mut deal = Deal::new(id);
        deal.value = value;
        deal.status = status.map(NamedRef::new);
        deal
    }

    fn with_company(mut deal: Deal, company: &str) -> Deal {
        deal.company = Some(NamedRef::new(company));
        deal
    }

    fn with_person(mut deal: Deal, person: &str) -> Deal {
        deal.person = Some(NamedRef::new(person));
        deal
    }

    fn created(mut deal: Deal, y: i32, m: u32, d: u32) -> Deal {
        deal.created_at = Some(Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).unwrap());
        deal
    }

    fn closed(mut deal: Deal, y: i32, m: u32, d: u32) -> Deal {
        deal.closed_at = Some(Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).unwrap());
        deal
    }

    fn month(date: &str, value: f64) -> MonthlyBucket {
        MonthlyBucket {
            date: date.to_string(),
            value,
        }
    }

    fn scenario_deals() -> Vec<Deal> {
        vec![
            create_test_deal("D1", Some(100.0), Some("Open")),
            create_test_deal("D2", Some(200.0), Some("Open")),
            closed(create_test_deal("D3", Some(50.0), Some("Won")), 2024, 3, 1),
        ]
    }

    #[test]
    fn test_totals_scenario() {
        let deals = scenario_deals();
        assert_eq!(total_value(&deals), 350.0);
        assert!((average_value(&deals) - 116.666_666).abs() < 1e-3);
        assert_eq!(format!("{:.2}", average_value(&deals)), "116.67");
    }

    #[test]
    fn test_totals_empty() {
        assert_eq!(total_value(&[]), 0.0);
        assert_eq!(average_value(&[]), 0.0);
    }

    #[test]
    fn test_missing_values_coerce_to_zero() {
        let deals = vec![
            create_test_deal("D1", None, Some("Open")),
            create_test_deal("D2", Some(f64::NAN), Some("Open")),
            create_test_deal("D3", Some(30.0), Some("Open")),
        ];
        assert_eq!(total_value(&deals), 30.0);
        assert_eq!(average_value(&deals), 10.0);
        assert_eq!(group_by_status(&deals).get("Open").unwrap().total_value, 30.0);
    }

    #[test]
    fn test_group_by_status_scenario() {
        let groups = group_by_status(&scenario_deals());

        assert_eq!(groups.len(), 2);
        let open = groups.get("Open").unwrap();
        assert_eq!(open.count, 2);
        assert_eq!(open.total_value, 300.0);
        assert_eq!(open.members[0].id, "D1");

        let won = groups.get("Won").unwrap();
        assert_eq!(won.count, 1);
        assert_eq!(won.total_value, 50.0);

        let names: Vec<&str> = groups.names().collect();
        assert_eq!(names, vec!["Open", "Won"]);
    }

    #[test]
    fn test_group_by_status_unknown_bucket() {
        let deals = vec![
            create_test_deal("D1", Some(10.0), None),
            create_test_deal("D2", Some(10.0), Some("")),
            create_test_deal("D3", Some(10.0), Some("Open")),
        ];
        let groups = group_by_status(&deals);
        assert_eq!(groups.get(UNKNOWN_STATUS).unwrap().count, 2);

        let total: usize = groups.iter().map(|(_, b)| b.count).sum();
        assert_eq!(total, deals.len());
    }

    #[test]
    fn test_status_counts() {
        let counts = status_counts(&scenario_deals());
        assert_eq!(
            counts,
            vec![
                NameValue { name: "Open".to_string(), value: 2.0 },
                NameValue { name: "Won".to_string(), value: 1.0 },
            ]
        );
        assert!(status_counts(&[]).is_empty());
    }

    #[test]
    fn test_company_metrics_sorted_with_stable_ties() {
        let deals = vec![
            with_company(create_test_deal("D1", Some(100.0), Some("Open")), "Beta"),
            with_company(create_test_deal("D2", Some(500.0), Some("Open")), "Acme"),
            with_company(create_test_deal("D3", Some(100.0), Some("Open")), "Gamma"),
            closed(
                with_company(create_test_deal("D4", Some(100.0), Some("Won")), "Acme"),
                2024,
                1,
                1,
            ),
            create_test_deal("D5", Some(999.0), Some("Open")),
        ];

        let metrics = company_metrics(&deals);
        let names: Vec<&str> = metrics.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Acme", "Beta", "Gamma"]);

        let acme = &metrics[0];
        assert_eq!(acme.total_value, 600.0);
        assert_eq!(acme.deal_count, 2);
        assert_eq!(acme.closed_deals, 1);
        assert_eq!(acme.success_rate, 50.0);
        assert_eq!(metrics[1].success_rate, 0.0);
    }

    #[test]
    fn test_company_metrics_with_directory_includes_idle_companies() {
        let deals = vec![with_company(create_test_deal("D1", Some(0.0), None), "Acme")];
        let directory = vec![
            Company::new("c1".to_string(), "Acme".to_string()),
            Company::new("c2".to_string(), "Dormant".to_string()),
        ];

        let metrics = company_metrics_with_directory(&deals, &directory);
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].name, "Acme");
        let dormant = &metrics[1];
        assert_eq!(dormant.deal_count, 0);
        assert_eq!(dormant.success_rate, 0.0);
        assert!(!dormant.success_rate.is_nan());
    }

    #[test]
    fn test_value_distribution_takes_top_five() {
        let deals: Vec<Deal> = (1..=7)
            .map(|i| {
                with_company(
                    create_test_deal(&format!("D{}", i), Some(i as f64 * 10.0), None),
                    &format!("Company {}", i),
                )
            })
            .collect();

        let metrics = company_metrics(&deals);
        let top = value_distribution(&metrics, DISTRIBUTION_SIZE);
        assert_eq!(top.len(), 5);
        assert_eq!(top[0].name, "Company 7");
        assert_eq!(top[4].name, "Company 3");
        assert_eq!(metrics.len(), 7);
    }

    #[test]
    fn test_performance_by_person() {
        let deals = vec![
            with_person(create_test_deal("D1", Some(100.0), None), "Ana"),
            create_test_deal("D2", Some(300.0), None),
            closed(with_person(create_test_deal("D3", Some(50.0), None), "Ana"), 2024, 2, 2),
        ];

        let metrics = performance_by_person(&deals);
        assert_eq!(metrics[0].name, UNASSIGNED);
        assert_eq!(metrics[0].total_value, 300.0);
        assert_eq!(metrics[1].name, "Ana");
        assert_eq!(metrics[1].deal_count, 2);
        assert_eq!(metrics[1].success_rate, 50.0);
    }

    #[test]
    fn test_monthly_revenue_sorted_and_excludes_undated() {
        let deals = vec![
            created(create_test_deal("D1", Some(300.0), None), 2024, 3, 15),
            created(create_test_deal("D2", Some(100.0), None), 2024, 1, 2),
            create_test_deal("D3", Some(1000.0), None),
            created(create_test_deal("D4", None, None), 2024, 1, 20),
            created(create_test_deal("D5", Some(200.0), None), 2024, 2, 28),
            created(create_test_deal("D6", Some(5.0), None), 2023, 12, 31),
        ];

        let series = monthly_revenue(&deals);
        assert_eq!(
            series,
            vec![
                month("2023-12", 5.0),
                month("2024-01", 100.0),
                month("2024-02", 200.0),
                month("2024-03", 300.0),
            ]
        );
    }

    #[test]
    fn test_moving_average_trend_scenario() {
        let series = vec![
            month("2024-01", 100.0),
            month("2024-02", 200.0),
            month("2024-03", 300.0),
        ];

        let trend = moving_average_trend(&series, DEFAULT_TREND_WINDOW);
        assert_eq!(trend[0].trend, None);
        assert_eq!(trend[1].trend, None);
        assert_eq!(trend[2].trend, Some(200.0));
        assert_eq!(trend[1].value, 200.0);
    }

    #[test]
    fn test_moving_average_trend_slides() {
        let series = vec![
            month("2024-01", 100.0),
            month("2024-02", 200.0),
            month("2024-03", 300.0),
            month("2024-04", 700.0),
        ];
        let trend = moving_average_trend(&series, 3);
        assert_eq!(trend[3].trend, Some(400.0));

        let short = moving_average_trend(&series[..2], 3);
        assert!(short.iter().all(|p| p.trend.is_none()));

        let no_window = moving_average_trend(&series, 0);
        assert!(no_window.iter().all(|p| p.trend.is_none()));

        assert!(moving_average_trend(&[], 3).is_empty());
    }

    #[test]
    fn test_trend_point_serialization_omits_missing_trend() {
        let trend = moving_average_trend(&[month("2024-01", 10.0)], 3);
        let json = serde_json::to_value(&trend[0]).unwrap();
        assert_eq!(json, serde_json::json!({"date": "2024-01", "value": 10.0}));
    }

    #[test]
    fn test_forecast_summary() {
        let series = vec![month("2024-01", 100.0), month("2024-02", 150.0)];
        let summary = forecast_summary(&series);
        assert_eq!(summary.current_quarter_forecast, Some(450.0));
        assert_eq!(summary.average_monthly_revenue, 125.0);
        assert_eq!(summary.growth_rate_percent, Some(50.0));

        let single = forecast_summary(&[month("2024-01", 100.0)]);
        assert_eq!(single.growth_rate_percent, None);

        let from_zero = forecast_summary(&[month("2024-01", 0.0), month("2024-02", 10.0)]);
        assert_eq!(from_zero.growth_rate_percent, None);

        assert_eq!(forecast_summary(&[]), ForecastSummary::default());
    }

    #[test]
    fn test_velocity_by_status() {
        let deals = vec![
            closed(created(create_test_deal("D1", None, Some("Won")), 2024, 1, 1), 2024, 1, 11),
            closed(created(create_test_deal("D2", None, Some("Won")), 2024, 1, 1), 2024, 1, 21),
            closed(created(create_test_deal("D3", None, Some("Lost")), 2024, 1, 1), 2024, 1, 4),
            created(create_test_deal("D4", None, Some("Open")), 2024, 1, 1),
            closed(create_test_deal("D5", None, Some("Won")), 2024, 1, 1),
            closed(created(create_test_deal("D6", None, None), 2024, 1, 1), 2024, 1, 2),
        ];

        let velocity = velocity_by_status(&deals);
        assert_eq!(
            velocity,
            vec![
                NameValue { name: "Won".to_string(), value: 15.0 },
                NameValue { name: "Lost".to_string(), value: 3.0 },
                NameValue { name: UNKNOWN_STATUS.to_string(), value: 1.0 },
            ]
        );
    }

    #[test]
    fn test_velocity_keeps_fractional_days() {
        let mut deal = create_test_deal("D1", None, Some("Won"));
        deal.created_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        deal.closed_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 6, 0, 0).unwrap());

        assert_eq!(velocity_by_status(&[deal])[0].value, 0.25);
    }

    #[test]
    fn test_grouping_serializes_as_object() {
        let groups = group_by_status(&[create_test_deal("D1", Some(5.0), Some("Open"))]);
        let json = serde_json::to_value(&groups).unwrap();
        assert_eq!(json["Open"]["count"], 1);
        assert_eq!(json["Open"]["total_value"], 5.0);
    }
}
