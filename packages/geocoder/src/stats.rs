//! Geocode resolution counters for one run.

use std::collections::BTreeSet;

use parking_violation_models::GeocodeSource;
use serde::Serialize;

/// Process-lifetime geocoding counters.
///
/// Every resolution bumps `total` and exactly one of `gps`, `segment`,
/// `failed_segment`, `failed_address`. `zip` counts independently.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GeocodeStats {
    /// Records resolved.
    pub total: u64,
    /// Records that kept their supplied coordinates.
    pub gps: u64,
    /// Records for which a postal code was found.
    pub zip: u64,
    /// Records placed at a segment centroid.
    pub segment: u64,
    /// Records whose location could not be turned into a segment id.
    pub failed_address: u64,
    /// Records whose segment id is missing from the centroid table.
    pub failed_segment: u64,
    /// Segment ids that were derived but had no centroid.
    pub unmatched_segments: BTreeSet<String>,
}

impl GeocodeStats {
    /// Records the outcome of one resolution.
    pub fn record(&mut self, source: GeocodeSource, has_zip: bool, unmatched_segment: Option<&str>) {
        self.total += 1;
        match source {
            GeocodeSource::Gps => self.gps += 1,
            GeocodeSource::Segment => self.segment += 1,
            GeocodeSource::FailedSegment => self.failed_segment += 1,
            GeocodeSource::FailedAddress => self.failed_address += 1,
        }
        if has_zip {
            self.zip += 1;
        }
        if let Some(segment_id) = unmatched_segment {
            self.unmatched_segments.insert(segment_id.to_string());
        }
    }

    /// Records that ended up with coordinates.
    #[must_use]
    pub const fn resolved(&self) -> u64 {
        self.gps + self.segment
    }

    /// Records that ended up without coordinates.
    #[must_use]
    pub const fn failed(&self) -> u64 {
        self.failed_address + self.failed_segment
    }

    /// Logs the end-of-run summary, listing at most `max_unmatched`
    /// unmatched segment ids.
    #[allow(clippy::cast_precision_loss)]
    pub fn log_summary(&self, max_unmatched: usize) {
        let pct = |n: u64| {
            if self.total == 0 {
                0.0
            } else {
                n as f64 * 100.0 / self.total as f64
            }
        };

        log::info!(
            "Geocoding: {} total, {} gps ({:.1}%), {} segment ({:.1}%), {} zip ({:.1}%)",
            self.total,
            self.gps,
            pct(self.gps),
            self.segment,
            pct(self.segment),
            self.zip,
            pct(self.zip),
        );
        log::info!(
            "Geocoding failures: {} unparseable address ({:.1}%), {} unmatched segment ({:.1}%)",
            self.failed_address,
            pct(self.failed_address),
            self.failed_segment,
            pct(self.failed_segment),
        );

        if !self.unmatched_segments.is_empty() {
            let shown: Vec<&str> = self
                .unmatched_segments
                .iter()
                .take(max_unmatched)
                .map(String::as_str)
                .collect();
            log::warn!(
                "{} segment id(s) missing from the centroid table: {}{}",
                self.unmatched_segments.len(),
                shown.join(", "),
                if self.unmatched_segments.len() > shown.len() {
                    ", ..."
                } else {
                    ""
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_record_bumps_total_and_one_outcome() {
        let mut stats = GeocodeStats::default();
        stats.record(GeocodeSource::Gps, true, None);
        stats.record(GeocodeSource::Segment, false, None);
        stats.record(GeocodeSource::FailedSegment, true, Some("42"));
        stats.record(GeocodeSource::FailedSegment, false, Some("42"));
        stats.record(GeocodeSource::FailedAddress, false, None);

        assert_eq!(stats.total, 5);
        assert_eq!(stats.gps, 1);
        assert_eq!(stats.segment, 1);
        assert_eq!(stats.failed_segment, 2);
        assert_eq!(stats.failed_address, 1);
        assert_eq!(stats.zip, 2);
        assert_eq!(stats.resolved(), 2);
        assert_eq!(stats.failed(), 3);
        assert_eq!(stats.unmatched_segments.len(), 1);
        assert_eq!(
            stats.total,
            stats.gps + stats.segment + stats.failed_segment + stats.failed_address
        );
    }
}
