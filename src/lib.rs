// Pipeline Dashboard - Core Library
// Exposes all modules for use in the CLI/TUI, the API server, and tests

pub mod config;
pub mod telemetry;
pub mod error;
pub mod db;
pub mod entities;
pub mod shaping;        // Data-shaping helpers: coercion, names, months, durations
pub mod aggregation;    // Aggregation Engine: pure view derivations
pub mod source;         // Deal Record Source seam + in-memory implementation
pub mod snapshot;       // Immutable deal snapshots + invalidation
pub mod notify;         // Success/failure notifications
pub mod kanban;         // Kanban Transition State Machine
pub mod dashboard;      // Per-page view models built from one snapshot

// Re-export commonly used types
pub use config::Config;
pub use error::{FetchError, PersistenceError, StatusLookupError, TransitionError};
pub use db::{
    Deal, NamedRef, Event, DealImportRow, ImportSummary, SqliteDealStore,
    load_csv, setup_database, import_deals, get_all_deals, get_status_id_by_name,
    update_deal_status, verify_count, insert_event, get_events_for_entity,
};
pub use entities::{Company, Person, Status, StatusRegistry};
pub use shaping::{ShapeReport, UNASSIGNED, UNKNOWN_STATUS};
pub use aggregation::{
    Grouping, StatusBucket, EntityMetrics, NameValue, MonthlyBucket, TrendPoint,
    ForecastSummary,
    total_value, average_value, group_by_status, company_metrics,
    company_metrics_with_directory, performance_by_person, value_distribution,
    monthly_revenue, moving_average_trend, velocity_by_status, status_counts,
    forecast_summary, DEFAULT_TREND_WINDOW,
};
pub use source::{DealSource, InMemoryDealSource};
pub use snapshot::{DealCache, DealSnapshot};
pub use notify::{Notification, NotificationKind, NotificationLog, Notifier};
pub use kanban::{
    step, Effect, TransitionCoordinator, TransitionEvent, TransitionOutcome,
    TransitionRequest, TransitionState,
};
pub use dashboard::{
    CompaniesView, DashboardViews, ForecastingView, OverviewView, PerformanceView,
    PipelineColumn, PipelineView, VelocityView, ViewOptions, ViewState,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
