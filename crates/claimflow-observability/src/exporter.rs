use prometheus::{Encoder, TextEncoder};

use crate::metrics::REGISTRY;

/// Render every registered metric in the Prometheus text exposition format.
pub fn gather_text() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;

    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics;

    #[test]
    fn test_text_export_contains_registered_metrics() {
        metrics::init();
        metrics::RECORDS_PUBLISHED_TOTAL.inc();

        let text = gather_text().unwrap();
        assert!(text.contains("claimflow_records_published_total"));
        assert!(text.contains("# TYPE claimflow_records_published_total counter"));
    }
}
