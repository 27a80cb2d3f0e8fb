pub mod correlate;
pub mod filter;

pub use correlate::{correlate, ConsoleLinks, CorrelatedReport, PolicyUpdateMode, POLICY_NOT_FOUND};
pub use filter::{
    filter_conditions_by_date, present, resolve_date_range, uses_default_window, DateRange,
};
