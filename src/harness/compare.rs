//! Comparison of rendered output against expected data.

use serde::Serialize;

use crate::runtime::value::Value;

/// A rendered or expected stream: one entry per frame, one sample per channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamData {
    pub sample_rate: f64,
    pub frames: Vec<Vec<f64>>,
}

impl StreamData {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            frames: Vec::new(),
        }
    }

    pub fn mono(sample_rate: f64, samples: &[f64]) -> Self {
        Self {
            sample_rate,
            frames: samples.iter().map(|&s| vec![s]).collect(),
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

/// An event or value change at an absolute frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimedValue {
    pub frame_offset: u64,
    pub value: Value,
}

impl TimedValue {
    pub fn new(frame_offset: u64, value: Value) -> Self {
        Self {
            frame_offset,
            value,
        }
    }
}

#[derive(Debug, Default)]
struct DiffStats {
    max_diff: f64,
    max_value: f64,
    diff_frame: usize,
    diff_channel: usize,
}

impl DiffStats {
    fn compare(&mut self, expected: f64, actual: f64, frame: usize, channel: usize) {
        self.max_value = self.max_value.max(expected.abs());
        let diff = (expected - actual).abs();
        if diff > self.max_diff {
            self.max_diff = diff;
            self.diff_frame = frame;
            self.diff_channel = channel;
        }
    }
}

/// Compare two streams. Returns `None` when they match, otherwise a
/// description of the first structural mismatch or of the largest sample
/// difference, relative to the loudest expected sample, when it exceeds
/// `max_diff_db`.
pub fn stream_data_comparison(data: &StreamData, expected: &StreamData, max_diff_db: f64) -> Option<String> {
    if data.sample_rate != expected.sample_rate {
        return Some(format!(
            "Sample rate mismatch - expected {}, got {}",
            expected.sample_rate, data.sample_rate
        ));
    }
    if data.frame_count() != expected.frame_count() {
        return Some(format!(
            "Frame count mismatch - expected {}, got {}",
            expected.frame_count(),
            data.frame_count()
        ));
    }

    let mut stats = DiffStats::default();
    for (i, (expected_frame, frame)) in expected.frames.iter().zip(&data.frames).enumerate() {
        if expected_frame.len() != frame.len() {
            return Some(format!(
                "Channel count mismatch at frame {i}, expected {}, got {}",
                expected_frame.len(),
                frame.len()
            ));
        }
        for (channel, (&e, &a)) in expected_frame.iter().zip(frame).enumerate() {
            stats.compare(e, a, i, channel);
        }
    }

    // 0/0 is NaN and never exceeds the threshold, so silence matches silence
    let diff_db = 20.0 * (stats.max_diff / stats.max_value).log10();
    if diff_db > max_diff_db {
        return Some(format!(
            "Max db diff exceeded: diff of {diff_db} detected. maxDiffDb allowed:{max_diff_db}, \
             maxDiff:{}, maxValue:{}, diffFrame:{}, diffChannel:{}",
            stats.max_diff, stats.max_value, stats.diff_frame, stats.diff_channel
        ));
    }
    None
}

/// Compare event or value sequences by count, frame offset and payload.
pub fn event_data_comparison(data: &[TimedValue], expected: &[TimedValue]) -> Option<String> {
    if data.len() != expected.len() {
        return Some(format!(
            "Different number of events - expected {}, got {}",
            expected.len(),
            data.len()
        ));
    }
    for (i, (actual, wanted)) in data.iter().zip(expected).enumerate() {
        if actual.frame_offset != wanted.frame_offset {
            return Some(format!(
                "Event {i} has different frame offset - expected {}, got {}",
                wanted.frame_offset, actual.frame_offset
            ));
        }
        let (got, want) = (actual.value.to_string(), wanted.value.to_string());
        if got != want {
            return Some(format!(
                "Event {i} has different event data - expected {want}, got {got}"
            ));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(n: usize) -> Vec<f64> {
        (0..n).map(|i| (i as f64 * 0.1).sin()).collect()
    }

    #[test]
    fn identical_streams_match() {
        let a = StreamData::mono(44100.0, &sine(64));
        assert_eq!(stream_data_comparison(&a, &a.clone(), -100.0), None);
    }

    #[test]
    fn silent_streams_match() {
        let a = StreamData::mono(44100.0, &[0.0; 16]);
        assert_eq!(stream_data_comparison(&a, &a.clone(), -100.0), None);
    }

    #[test]
    fn single_differing_sample_is_located() {
        let expected = StreamData {
            sample_rate: 44100.0,
            frames: sine(32).into_iter().map(|s| vec![s, -s]).collect(),
        };
        let mut data = expected.clone();
        data.frames[17][1] += 0.01;
        let report = stream_data_comparison(&data, &expected, -100.0).unwrap();
        assert!(report.starts_with("Max db diff exceeded"));
        assert!(report.contains("diffFrame:17"));
        assert!(report.contains("diffChannel:1"));
    }

    #[test]
    fn small_differences_within_threshold_pass() {
        let expected = StreamData::mono(44100.0, &sine(32));
        let mut data = expected.clone();
        data.frames[3][0] += 1e-9;
        assert_eq!(stream_data_comparison(&data, &expected, -60.0), None);
    }

    #[test]
    fn structural_mismatches() {
        let a = StreamData::mono(44100.0, &sine(8));
        let b = StreamData::mono(48000.0, &sine(8));
        assert_eq!(
            stream_data_comparison(&a, &b, -100.0).unwrap(),
            "Sample rate mismatch - expected 48000, got 44100"
        );
        let c = StreamData::mono(44100.0, &sine(9));
        assert_eq!(
            stream_data_comparison(&a, &c, -100.0).unwrap(),
            "Frame count mismatch - expected 9, got 8"
        );
        let mut d = a.clone();
        d.frames[2].push(0.0);
        assert_eq!(
            stream_data_comparison(&d, &a, -100.0).unwrap(),
            "Channel count mismatch at frame 2, expected 1, got 2"
        );
    }

    #[test]
    fn event_comparison_messages() {
        let expected = vec![
            TimedValue::new(0, Value::Int32(1)),
            TimedValue::new(10, Value::Int32(2)),
        ];
        assert_eq!(event_data_comparison(&expected, &expected), None);
        assert_eq!(
            event_data_comparison(&expected[..1], &expected).unwrap(),
            "Different number of events - expected 2, got 1"
        );

        let shifted = vec![expected[0].clone(), TimedValue::new(11, Value::Int32(2))];
        assert_eq!(
            event_data_comparison(&shifted, &expected).unwrap(),
            "Event 1 has different frame offset - expected 10, got 11"
        );

        let changed = vec![expected[0].clone(), TimedValue::new(10, Value::Int32(3))];
        assert_eq!(
            event_data_comparison(&changed, &expected).unwrap(),
            "Event 1 has different event data - expected 2, got 3"
        );
    }

    #[test]
    fn event_payloads_compare_by_value_not_width() {
        let a = vec![TimedValue::new(0, Value::Float32(0.5))];
        let b = vec![TimedValue::new(0, Value::Float64(0.5))];
        assert_eq!(event_data_comparison(&a, &b), None);
    }
}
