//! Topic-to-type scoring.
//!
//! Plain topics carry no type hint, so the registry guesses: every known
//! fully-qualified type name is scored by the summed length of the topic
//! segments it contains. Best-effort; a `camera` resource published by an
//! `rtsp-camera` node can still pick the wrong type when two packages
//! both mention `camera`.

use crate::domain::topic::{ROOT_NAMESPACE, is_hash_segment};

/// Segments shorter than this never contribute to a score.
const MIN_SEGMENT_LEN: usize = 3;

/// Lowercased, hyphen-free topic segments eligible for scoring.
#[must_use]
pub fn scoring_segments(topic: &str) -> Vec<String> {
    topic
        .split(['/', '%'])
        .filter(|segment| !segment.is_empty())
        .filter(|segment| *segment != ROOT_NAMESPACE)
        .filter(|segment| !segment.contains('*') && !is_hash_segment(segment))
        .map(|segment| segment.replace('-', "_").to_lowercase())
        .filter(|segment| segment.len() >= MIN_SEGMENT_LEN)
        .collect()
}

/// Score of one type name against the scoring segments.
#[must_use]
pub fn score_type_name(type_name: &str, segments: &[String]) -> usize {
    let lowered = type_name.to_lowercase();
    segments
        .iter()
        .filter(|segment| lowered.contains(segment.as_str()))
        .map(String::len)
        .sum()
}

/// Highest-scoring type name, first one winning ties; `None` if nothing
/// scored above zero.
#[must_use]
pub fn best_type_for_topic<'a, I>(topic: &str, type_names: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let segments = scoring_segments(topic);
    if segments.is_empty() {
        return None;
    }

    let mut best: Option<(&str, usize)> = None;
    for name in type_names {
        let score = score_type_name(name, &segments);
        if score > best.map_or(0, |(_, top)| top) {
            best = Some((name, score));
        }
    }
    best.map(|(name, _)| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_drop_root_and_short_tokens() {
        let segments = scoring_segments("bubbaloop/local/m1/rtsp-camera/front");
        assert_eq!(segments, vec!["local", "rtsp_camera", "front"]);
    }

    #[test]
    fn weather_topic_picks_current_weather() {
        let types = [
            "bubbaloop.camera.v1.CompressedImage",
            "weather.v1.HourlyForecast",
            "weather.v1.CurrentWeather",
        ];
        assert_eq!(
            best_type_for_topic("bubbaloop/local/m1/weather/current", types),
            Some("weather.v1.CurrentWeather".to_string())
        );
    }

    #[test]
    fn ties_keep_first_type() {
        let types = ["a.camera.One", "b.camera.Two"];
        assert_eq!(
            best_type_for_topic("bubbaloop/local/m1/camera", types),
            Some("a.camera.One".to_string())
        );
    }

    #[test]
    fn no_match_yields_none() {
        let types = ["weather.v1.CurrentWeather"];
        assert_eq!(best_type_for_topic("bubbaloop/local/m1/lidar/points", types), None);
        assert_eq!(best_type_for_topic("bubbaloop/x/y", types), None);
    }

    #[test]
    fn hyphenated_resource_matches_underscored_package() {
        let types = ["rtsp_camera.v1.Frame", "weather.v1.CurrentWeather"];
        assert_eq!(
            best_type_for_topic("bubbaloop/local/m1/rtsp-camera/frames", types),
            Some("rtsp_camera.v1.Frame".to_string())
        );
    }
}
