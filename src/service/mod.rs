pub mod barcode;
pub mod fees;
pub mod lease;
pub mod matcher;
pub mod profitability;
pub mod reconcile;

pub use barcode::{is_liquidator_barcode, normalize_barcode};
pub use fees::{calculate_fees, calculate_profit, FeeBreakdown, Profitability};
pub use lease::{TripLease, TripLeases};
pub use matcher::{plan_matches, TagMatcher};
pub use profitability::{build_report, export_report_csv, ProfitRow, ProfitabilityReport, ReportSummary};
pub use reconcile::{Reconciler, Submitted};
