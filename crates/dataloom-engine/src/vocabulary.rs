//! The fixed operation vocabulary (Glossary) the Planner may emit and the
//! Executor must resolve, plus the one-line business rationale attached to
//! each when building the planning prompt.

/// `(operation name, business-oriented description)`.
pub const OPERATIONS: &[(&str, &str)] = &[
    ("mean", "average value of a business metric"),
    ("sum", "total scale of a business metric"),
    ("max", "peak observed value"),
    ("min", "floor observed value"),
    ("count", "volume of observations"),
    ("percentage", "share of a category within the whole"),
    ("std", "volatility of a business metric"),
    ("unique", "distinct values present in a column"),
    ("median", "typical value, robust to outliers"),
    ("mode", "most frequent category"),
    ("variance", "spread of a business metric"),
    ("quantile_25", "lower-quartile benchmark"),
    ("quantile_75", "upper-quartile benchmark"),
    ("range", "spread between the extremes"),
    ("first", "earliest observation"),
    ("last", "most recent observation"),
    ("missing_count", "data-quality gap, absolute"),
    ("missing_percentage", "data-quality gap, relative"),
    ("correlation", "relationship strength between two metrics"),
    ("group_by", "per-category breakdown"),
    ("cross_tab", "cross-category frequency breakdown"),
    ("pivot_table", "multi-dimensional summary table"),
    ("aggregate", "combined summary across several operations"),
];

pub fn operation_names() -> Vec<&'static str> {
    OPERATIONS.iter().map(|(name, _)| *name).collect()
}

pub fn description_for(name: &str) -> Option<&'static str> {
    OPERATIONS.iter().find(|(n, _)| *n == name).map(|(_, d)| *d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_operation_has_a_description() {
        assert_eq!(OPERATIONS.len(), operation_names().len());
        for name in operation_names() {
            assert!(description_for(name).is_some());
        }
    }
}
