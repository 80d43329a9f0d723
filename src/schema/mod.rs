pub mod header;
pub mod types;

pub use header::{merge_column_names, HeaderShape};
pub use types::{
    grid_column, Metric, MetricTotals, PermitCounts, PermitRecord, Region, ReleaseKey, Scale,
    TimeScale, UnitSize, ALL_REGIONS,
};
