// Aggregation properties over arbitrary deal collections

use chrono::{TimeZone, Utc};
use pipeline_dashboard::{
    company_metrics, group_by_status, monthly_revenue, moving_average_trend, performance_by_person,
    total_value, velocity_by_status, Deal, MonthlyBucket, NamedRef,
};
use proptest::prelude::*;

fn arb_name() -> impl Strategy<Value = Option<String>> {
    prop_oneof![
        Just(None),
        Just(Some(String::new())),
        prop::sample::select(vec!["Open", "Won", "Lost", "Proposal"]).prop_map(|s| Some(s.to_string())),
    ]
}

fn arb_value() -> impl Strategy<Value = Option<f64>> {
    prop_oneof![
        Just(None),
        Just(Some(f64::NAN)),
        Just(Some(f64::INFINITY)),
        (-1_000_000.0..1_000_000.0f64).prop_map(Some),
    ]
}

fn arb_instant() -> impl Strategy<Value = Option<chrono::DateTime<Utc>>> {
    prop_oneof![
        Just(None),
        (0i64..1_000_000_000).prop_map(|secs| Some(Utc.timestamp_opt(1_600_000_000 + secs, 0).unwrap())),
    ]
}

fn arb_deal() -> impl Strategy<Value = Deal> {
    (
        "[A-Z][0-9]{1,4}",
        arb_value(),
        arb_instant(),
        arb_instant(),
        arb_name(),
        arb_name(),
        arb_name(),
    )
        .prop_map(|(id, value, created_at, closed_at, status, company, person)| {
            let mut deal = Deal::new(id);
            deal.value = value;
            deal.created_at = created_at;
            deal.closed_at = closed_at;
            deal.status = status.map(NamedRef::new);
            deal.company = company.map(NamedRef::new);
            deal.person = person.map(NamedRef::new);
            deal
        })
}

fn arb_deals() -> impl Strategy<Value = Vec<Deal>> {
    prop::collection::vec(arb_deal(), 0..40)
}

proptest! {
    #[test]
    fn status_buckets_partition_the_collection(deals in arb_deals()) {
        let grouping = group_by_status(&deals);
        let counted: usize = grouping.iter().map(|(_, bucket)| bucket.count).sum();
        prop_assert_eq!(counted, deals.len());

        let members: usize = grouping.iter().map(|(_, bucket)| bucket.members.len()).sum();
        prop_assert_eq!(members, deals.len());
    }

    #[test]
    fn aggregates_are_never_nan(deals in arb_deals()) {
        prop_assert!(total_value(&deals).is_finite());
        for (_, bucket) in group_by_status(&deals).iter() {
            prop_assert!(bucket.total_value.is_finite());
        }
        for point in velocity_by_status(&deals) {
            prop_assert!(!point.value.is_nan());
        }
    }

    #[test]
    fn success_rates_are_percentages(deals in arb_deals()) {
        for metrics in company_metrics(&deals).into_iter().chain(performance_by_person(&deals)) {
            prop_assert!((0.0..=100.0).contains(&metrics.success_rate));
            prop_assert!(metrics.closed_deals <= metrics.deal_count);
            if metrics.deal_count == 0 {
                prop_assert_eq!(metrics.success_rate, 0.0);
            }
        }
    }

    #[test]
    fn metrics_sorted_by_value_descending(deals in arb_deals()) {
        let metrics = company_metrics(&deals);
        for pair in metrics.windows(2) {
            prop_assert!(pair[0].total_value >= pair[1].total_value);
        }
    }

    #[test]
    fn monthly_revenue_sorted_for_any_input_order(mut deals in arb_deals(), seed in any::<u64>()) {
        let expected = monthly_revenue(&deals);
        for pair in expected.windows(2) {
            prop_assert!(pair[0].date < pair[1].date);
        }

        // Rotating the input changes encounter order but not the series
        if !deals.is_empty() {
            let shift = (seed as usize) % deals.len();
            deals.rotate_left(shift);
        }
        let rotated = monthly_revenue(&deals);
        prop_assert_eq!(rotated.len(), expected.len());
        for (a, b) in rotated.iter().zip(expected.iter()) {
            prop_assert_eq!(&a.date, &b.date);
            prop_assert!((a.value - b.value).abs() < 1e-6 * (1.0 + b.value.abs()));
        }
    }

    #[test]
    fn trend_defined_only_after_full_window(values in prop::collection::vec(0.0..10_000.0f64, 0..24)) {
        let series: Vec<MonthlyBucket> = values
            .iter()
            .enumerate()
            .map(|(i, value)| MonthlyBucket {
                date: format!("{:04}-{:02}", 2020 + i / 12, i % 12 + 1),
                value: *value,
            })
            .collect();

        let trend = moving_average_trend(&series, 3);
        prop_assert_eq!(trend.len(), series.len());
        for (i, point) in trend.iter().enumerate() {
            prop_assert_eq!(point.value, series[i].value);
            prop_assert_eq!(point.trend.is_some(), i >= 2);
        }
    }
}
