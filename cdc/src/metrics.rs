use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};

static REGISTER_METRICS: Once = Once::new();

pub const CDC_ROWS_APPLIED_TOTAL: &str = "cdc_rows_applied_total";
pub const CDC_ROWS_CONSOLIDATED_TOTAL: &str = "cdc_rows_consolidated_total";
pub const CDC_STAGE_DURATION_SECONDS: &str = "cdc_stage_duration_seconds";
pub const CDC_ROW_COUNT_MISMATCH_PCT: &str = "cdc_row_count_mismatch_pct";
pub const STAGE: &str = "stage";

/// Register metrics emitted by the replication core. This should be called before
/// starting a pipeline. It is safe to call this method multiple times. It is
/// guaranteed to register the metrics only once.
pub(crate) fn register_metrics() {
    REGISTER_METRICS.call_once(|| {
        describe_counter!(
            CDC_ROWS_APPLIED_TOTAL,
            Unit::Count,
            "Total number of captured rows applied to destination tables"
        );

        describe_counter!(
            CDC_ROWS_CONSOLIDATED_TOTAL,
            Unit::Count,
            "Total number of rows folded into consolidated change tables"
        );

        describe_histogram!(
            CDC_STAGE_DURATION_SECONDS,
            Unit::Seconds,
            "Time taken in seconds to run one pipeline stage"
        );

        describe_gauge!(
            CDC_ROW_COUNT_MISMATCH_PCT,
            Unit::Percent,
            "Percentage mismatch between applied and expected row counts for the last batch"
        );
    });
}
