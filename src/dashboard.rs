// 🖥️ Dashboard Views - one view model per page, all from the same snapshot
//
// Pages:
//   Overview     → totals + deals per status
//   Pipeline     → Kanban columns
//   Companies    → top-N distribution + full performance table
//   Performance  → per-owner table
//   Forecasting  → monthly revenue, trend, forecast cards
//   Velocity     → mean days in pipeline per status
//
// Every view is built from one `DealSnapshot`, so numbers on different pages
// always agree. A failed fetch is reported as a `ViewState::Failed`; it is
// never blended with the previous snapshot.

use crate::aggregation::{
    average_value, company_metrics, company_metrics_with_directory, forecast_summary, group_by_status,
    monthly_revenue, moving_average_trend, performance_by_person, status_counts, total_value,
    value_distribution, velocity_by_status, EntityMetrics, ForecastSummary, MonthlyBucket, NameValue,
    TrendPoint, DEFAULT_TREND_WINDOW, DISTRIBUTION_SIZE,
};
use crate::db::Deal;
use crate::entities::{Company, Status};
use crate::error::FetchError;
use crate::shaping::normalize_name;
use crate::snapshot::{DealCache, DealSnapshot};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ViewOptions {
    pub trend_window: usize,
    pub top_companies: usize,
}

impl Default for ViewOptions {
    fn default() -> Self {
        ViewOptions {
            trend_window: DEFAULT_TREND_WINDOW,
            top_companies: DISTRIBUTION_SIZE,
        }
    }
}

/// Either a whole view from one snapshot, or the fetch error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ViewState<T> {
    Ready {
        generation: u64,
        fingerprint: String,
        view: T,
    },
    Failed {
        error: String,
        /// Generation still held by the cache, if any
        last_known_good_generation: Option<u64>,
    },
}

impl<T> ViewState<T> {
    pub fn ready(snapshot: &DealSnapshot, view: T) -> Self {
        ViewState::Ready {
            generation: snapshot.generation,
            fingerprint: snapshot.fingerprint.clone(),
            view,
        }
    }

    pub fn failed(error: &FetchError, cache: &DealCache) -> Self {
        ViewState::Failed {
            error: error.to_string(),
            last_known_good_generation: cache.current().map(|snapshot| snapshot.generation),
        }
    }

    pub fn view(&self) -> Option<&T> {
        match self {
            ViewState::Ready { view, .. } => Some(view),
            ViewState::Failed { .. } => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ViewState::Ready { .. })
    }
}

// ============================================================================
// PAGE VIEW MODELS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverviewView {
    pub total_value: f64,
    pub deal_count: usize,
    pub average_value: f64,
    pub deals_by_status: Vec<NameValue>,
}

/// One Kanban column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineColumn {
    pub name: String,
    pub count: usize,
    pub total_value: f64,
    pub deals: Vec<Deal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineView {
    pub columns: Vec<PipelineColumn>,
}

impl PipelineView {
    /// Columns in status encounter order, then any known status that has no
    /// deals yet as an empty column.
    pub fn build(deals: &[Deal], statuses: &[Status]) -> Self {
        let mut columns: Vec<PipelineColumn> = group_by_status(deals)
            .into_iter()
            .map(|(name, bucket)| PipelineColumn {
                name,
                count: bucket.count,
                total_value: bucket.total_value,
                deals: bucket.members,
            })
            .collect();

        for status in statuses {
            let name = normalize_name(&status.name);
            if name.is_empty() {
                continue;
            }
            if !columns.iter().any(|column| column.name == name) {
                columns.push(PipelineColumn {
                    name: name.to_string(),
                    count: 0,
                    total_value: 0.0,
                    deals: Vec::new(),
                });
            }
        }

        PipelineView { columns }
    }

    pub fn column(&self, name: &str) -> Option<&PipelineColumn> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    /// Column currently holding a deal
    pub fn column_of(&self, deal_id: &str) -> Option<&PipelineColumn> {
        self.columns
            .iter()
            .find(|column| column.deals.iter().any(|deal| deal.id == deal_id))
    }

    /// Column `offset` places left (negative) or right (positive) of `name`.
    /// `None` past either edge.
    pub fn neighbour_column(&self, name: &str, offset: isize) -> Option<&PipelineColumn> {
        let index = self.column_index(name)? as isize + offset;
        if index < 0 {
            return None;
        }
        self.columns.get(index as usize)
    }

    pub fn deal_count(&self) -> usize {
        self.columns.iter().map(|column| column.count).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompaniesView {
    /// Top companies by total value, for the distribution chart
    pub distribution: Vec<NameValue>,
    pub metrics: Vec<EntityMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceView {
    pub people: Vec<EntityMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastingView {
    pub monthly: Vec<MonthlyBucket>,
    pub trend: Vec<TrendPoint>,
    pub summary: ForecastSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VelocityView {
    /// Mean days from creation to close, per status
    pub by_status: Vec<NameValue>,
}

// ============================================================================
// DASHBOARD
// ============================================================================

/// All page views over one snapshot.
#[derive(Debug, Clone)]
pub struct DashboardViews {
    snapshot: Arc<DealSnapshot>,
    options: ViewOptions,
    statuses: Vec<Status>,
    companies: Vec<Company>,
}

impl DashboardViews {
    pub fn new(snapshot: Arc<DealSnapshot>, options: ViewOptions) -> Self {
        DashboardViews {
            snapshot,
            options,
            statuses: Vec::new(),
            companies: Vec::new(),
        }
    }

    /// Known statuses and companies, so empty columns and zero-deal
    /// companies still show up.
    pub fn with_directory(mut self, statuses: Vec<Status>, companies: Vec<Company>) -> Self {
        self.statuses = statuses;
        self.companies = companies;
        self
    }

    pub fn snapshot(&self) -> &Arc<DealSnapshot> {
        &self.snapshot
    }

    pub fn deals(&self) -> &[Deal] {
        self.snapshot.deals()
    }

    pub fn overview(&self) -> OverviewView {
        let deals = self.deals();
        OverviewView {
            total_value: total_value(deals),
            deal_count: deals.len(),
            average_value: average_value(deals),
            deals_by_status: status_counts(deals),
        }
    }

    pub fn pipeline(&self) -> PipelineView {
        PipelineView::build(self.deals(), &self.statuses)
    }

    pub fn companies(&self) -> CompaniesView {
        let metrics = if self.companies.is_empty() {
            company_metrics(self.deals())
        } else {
            company_metrics_with_directory(self.deals(), &self.companies)
        };
        CompaniesView {
            distribution: value_distribution(&metrics, self.options.top_companies),
            metrics,
        }
    }

    pub fn performance(&self) -> PerformanceView {
        PerformanceView {
            people: performance_by_person(self.deals()),
        }
    }

    pub fn forecasting(&self) -> ForecastingView {
        let monthly = monthly_revenue(self.deals());
        ForecastingView {
            trend: moving_average_trend(&monthly, self.options.trend_window),
            summary: forecast_summary(&monthly),
            monthly,
        }
    }

    pub fn velocity(&self) -> VelocityView {
        VelocityView {
            by_status: velocity_by_status(self.deals()),
        }
    }

    /// Wrap a view built from this snapshot
    pub fn ready<T>(&self, view: T) -> ViewState<T> {
        ViewState::ready(&self.snapshot, view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NamedRef;
    use chrono::{TimeZone, Utc};

    fn create_test_deal(id: &str, status: &str, company: &str, value: f64, month: u32) -> Deal {
        let mut deal = Deal::new(id);
        deal.status = Some(NamedRef::new(status));
        deal.company = Some(NamedRef::new(company));
        deal.value = Some(value);
        deal.created_at = Some(Utc.with_ymd_and_hms(2024, month, 10, 0, 0, 0).unwrap());
        deal
    }

    fn create_test_views() -> DashboardViews {
        let deals = vec![
            create_test_deal("D1", "Open", "Acme", 100.0, 1),
            create_test_deal("D2", "Won", "Beta", 50.0, 2),
            create_test_deal("D3", "Open", "Acme", 200.0, 3),
        ];
        DashboardViews::new(Arc::new(DealSnapshot::new(7, deals)), ViewOptions::default())
    }

    #[test]
    fn test_overview_scenario() {
        let overview = create_test_views().overview();
        assert_eq!(overview.total_value, 350.0);
        assert_eq!(overview.deal_count, 3);
        assert!((overview.average_value - 116.666_666).abs() < 1e-4);
        assert_eq!(overview.deals_by_status[0].name, "Open");
        assert_eq!(overview.deals_by_status[0].value, 2.0);
    }

    #[test]
    fn test_pipeline_columns_and_neighbours() {
        let views = create_test_views().with_directory(
            vec![Status::named("Won"), Status::named("Lost")],
            vec![],
        );
        let pipeline = views.pipeline();

        let names: Vec<&str> = pipeline.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Open", "Won", "Lost"]);
        assert_eq!(pipeline.column("Open").unwrap().total_value, 300.0);
        assert_eq!(pipeline.column("Lost").unwrap().count, 0);
        assert_eq!(pipeline.deal_count(), 3);

        assert_eq!(pipeline.column_of("D2").unwrap().name, "Won");
        assert_eq!(pipeline.neighbour_column("Open", 1).unwrap().name, "Won");
        assert_eq!(pipeline.neighbour_column("Won", -1).unwrap().name, "Open");
        assert!(pipeline.neighbour_column("Open", -1).is_none());
        assert!(pipeline.neighbour_column("Lost", 1).is_none());
    }

    #[test]
    fn test_padded_directory_status_does_not_duplicate_column() {
        let views = create_test_views().with_directory(
            vec![Status::named("Won "), Status::named(" Lost"), Status::named("  ")],
            vec![],
        );
        let names: Vec<String> = views.pipeline().columns.into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["Open", "Won", "Lost"]);
    }

    #[test]
    fn test_companies_with_directory_includes_idle_companies() {
        let views = create_test_views().with_directory(
            vec![],
            vec![Company::new("c9".to_string(), "Zeta".to_string())],
        );
        let companies = views.companies();
        assert_eq!(companies.metrics.len(), 3);
        assert_eq!(companies.metrics[0].name, "Acme");
        assert_eq!(companies.metrics[2].name, "Zeta");
        assert_eq!(companies.metrics[2].success_rate, 0.0);
        assert_eq!(companies.distribution.len(), 3);
    }

    #[test]
    fn test_forecasting_trend_and_summary() {
        let forecasting = create_test_views().forecasting();
        assert_eq!(forecasting.monthly.len(), 3);
        assert_eq!(forecasting.trend[0].trend, None);
        assert_eq!(forecasting.trend[1].trend, None);
        assert!((forecasting.trend[2].trend.unwrap() - 116.666_666).abs() < 1e-4);
        assert_eq!(forecasting.summary.current_quarter_forecast, Some(600.0));
    }

    #[test]
    fn test_view_state_ready_and_failed() {
        let views = create_test_views();
        let state = views.ready(views.performance());
        assert!(state.is_ready());
        assert!(matches!(state, ViewState::Ready { generation: 7, .. }));

        let cache = DealCache::new();
        cache.replace(vec![]);
        let failed: ViewState<PerformanceView> =
            ViewState::failed(&FetchError::Storage("offline".to_string()), &cache);
        assert!(failed.view().is_none());
        assert_eq!(
            failed,
            ViewState::Failed {
                error: "deal storage unavailable: offline".to_string(),
                last_known_good_generation: Some(1),
            }
        );
    }
}
