use std::sync::LazyLock;

use prometheus::*;

static METRIC_SEARCH_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "furn_search_count",
        "count of the searches",
        &["kind", "class"]
    )
    .unwrap()
});

static METRIC_SEARCH_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "furn_search_duration",
        "duration of the per-request search in seconds",
        &["kind", "class"]
    )
    .unwrap()
});

static METRIC_VERIFY_INLIERS: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "furn_verify_inliers",
        "max inlier count of the geometric verification",
        &["class"],
        vec![0.0, 5.0, 10.0, 20.0, 30.0, 50.0, 100.0, 200.0, 500.0]
    )
    .unwrap()
});

/// 增加搜索计数，`kind` 为 scene、click 或 text
pub fn inc_search_count(kind: &str, class: &str) {
    METRIC_SEARCH_COUNT.with_label_values(&[kind, class]).inc();
}

pub fn inc_search_duration(kind: &str, class: &str, duration: f32) {
    METRIC_SEARCH_DURATION.with_label_values(&[kind, class]).observe(duration as f64);
}

pub fn inc_verify_inliers(class: &str, inliers: usize) {
    METRIC_VERIFY_INLIERS.with_label_values(&[class]).observe(inliers as f64);
}
