// Prometheus metrics for the HTTP boundary

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter_vec, Encoder, Histogram, IntCounterVec, TextEncoder,
};

lazy_static! {
    pub static ref SUBMISSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "flowrun_submissions_total",
        "Submissions accepted into the job queue",
        &["language"]
    )
    .expect("metric can be registered");
    pub static ref REJECTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "flowrun_submissions_rejected_total",
        "Submissions refused before reaching the queue",
        &["reason"]
    )
    .expect("metric can be registered");
    pub static ref RESULTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "flowrun_results_total",
        "Results returned to callers, by error kind",
        &["error_kind"]
    )
    .expect("metric can be registered");
    pub static ref WAIT_SECONDS: Histogram = register_histogram!(
        "flowrun_result_wait_seconds",
        "Time a synchronous caller waited for its result",
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0]
    )
    .expect("metric can be registered");
}

/// Render every registered metric in the Prometheus text format
pub fn render() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
