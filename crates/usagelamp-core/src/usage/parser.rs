//! Extract usage percentages from loosely-shaped usage documents.
//!
//! Remote responses and pushed payloads share one shape: a mapping of
//! category name to an object holding a utilization-like number and an
//! optional reset time.
//!
//! ```text
//! {
//!   "five_hour":  { "utilization": 42.0, "resets_at": "2026-10-16T18:00:00Z" },
//!   "seven_day":  { "utilization": 13.0, "resets_at": null },
//!   "extra_usage": { "utilization": 80.0 }
//! }
//! ```
//!
//! Field names are unofficial and drift, so each category value is run
//! through an ordered list of extractors and the first hit wins.

use serde_json::Value;

use super::types::{UsageMeter, UsageSnapshot, UsageSource};

/// One way of pulling a number out of a category value
#[derive(Debug, Clone, Copy)]
enum Extractor {
    /// The category value is itself a number
    Bare,
    /// A named field of the category object
    Field(&'static str),
}

/// Tried in order; the first one yielding a number wins
const EXTRACTORS: &[Extractor] = &[
    Extractor::Bare,
    Extractor::Field("utilization"),
    Extractor::Field("percent_used"),
    Extractor::Field("used_percent"),
    Extractor::Field("usage_percent"),
    Extractor::Field("percentage"),
    Extractor::Field("percent"),
];

const RESET_FIELDS: &[&str] = &["resets_at", "reset_at", "resetsAt"];

/// Keys some senders wrap the category map in
const WRAPPER_KEYS: &[&str] = &["usage", "data"];

impl Extractor {
    fn apply(self, value: &Value) -> Option<f64> {
        let raw = match self {
            Extractor::Bare => value,
            Extractor::Field(name) => value.get(name)?,
        };
        let number = match raw {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        number.filter(|v| v.is_finite())
    }
}

/// Rolling-window class of a limit category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    /// Short rolling window (resets every few hours)
    Short,
    /// Long window (weekly)
    Long,
    /// Paid overage; never drives the light
    Extra,
    Other,
}

impl WindowKind {
    pub fn classify(label: &str) -> Self {
        let label = label.to_ascii_lowercase();
        if label.contains("extra") {
            WindowKind::Extra
        } else if label.contains("five_hour") || label.contains("5h") || label.contains("session")
        {
            WindowKind::Short
        } else if label.contains("seven_day") || label.contains("7d") || label.contains("week") {
            WindowKind::Long
        } else {
            WindowKind::Other
        }
    }
}

/// Normalize a raw utilization value to 0-1
///
/// Values above 1 are read as a 0-100 percentage.
pub fn normalize(raw: f64) -> f64 {
    let value = if raw > 1.0 { raw / 100.0 } else { raw };
    value.clamp(0.0, 1.0)
}

/// Extract every category with a usable utilization value
pub fn extract_meters(doc: &Value) -> Vec<UsageMeter> {
    let Some(map) = doc.as_object() else {
        return Vec::new();
    };

    let mut meters: Vec<UsageMeter> = map
        .iter()
        .filter_map(|(label, value)| {
            let raw = EXTRACTORS.iter().find_map(|e| e.apply(value))?;
            let resets_at = RESET_FIELDS
                .iter()
                .find_map(|f| value.get(f).and_then(Value::as_str))
                .map(str::to_string);
            Some(UsageMeter {
                label: label.clone(),
                fraction: normalize(raw),
                resets_at,
            })
        })
        .collect();

    if meters.is_empty() {
        if let Some(inner) = WRAPPER_KEYS
            .iter()
            .find_map(|k| map.get(*k).filter(|v| v.is_object()))
        {
            meters = extract_meters(inner);
        }
    }

    meters
}

/// Pick the meter that drives the light
///
/// Short window first, then long window, then the highest of whatever else
/// is present. Extra-usage categories are ignored.
pub fn select_primary(meters: &[UsageMeter]) -> Option<&UsageMeter> {
    let by_kind = |kind| {
        meters
            .iter()
            .find(|m| WindowKind::classify(&m.label) == kind)
    };

    by_kind(WindowKind::Short)
        .or_else(|| by_kind(WindowKind::Long))
        .or_else(|| {
            meters
                .iter()
                .filter(|m| WindowKind::classify(&m.label) != WindowKind::Extra)
                .max_by(|a, b| a.fraction.total_cmp(&b.fraction))
        })
}

/// Render a one-line breakdown of all meters
pub fn describe(meters: &[UsageMeter]) -> String {
    meters
        .iter()
        .map(|m| {
            let pct = (m.fraction * 100.0).round();
            match &m.resets_at {
                Some(reset) => format!("{} {}% (resets {})", m.label, pct, reset),
                None => format!("{} {}%", m.label, pct),
            }
        })
        .collect::<Vec<_>>()
        .join(" · ")
}

/// Turn a usage document into a snapshot tagged with `source`
///
/// Returns `None` when no category yields a usable number.
pub fn parse_usage_document(doc: &Value, source: UsageSource) -> Option<UsageSnapshot> {
    let meters = extract_meters(doc);
    let primary = select_primary(&meters)?;
    Some(UsageSnapshot::new(
        primary.fraction,
        source,
        describe(&meters),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(42.0), 0.42);
        assert_eq!(normalize(0.42), 0.42);
        assert_eq!(normalize(1.0), 1.0);
        assert_eq!(normalize(250.0), 1.0);
        assert_eq!(normalize(-3.0), 0.0);
    }

    #[test]
    fn test_extract_meters_api_shape() {
        let doc = json!({
            "five_hour": { "utilization": 42.0, "resets_at": "2026-10-16T18:00:00Z" },
            "seven_day": { "utilization": 13.0, "resets_at": null },
            "seven_day_opus": null
        });

        let meters = extract_meters(&doc);
        assert_eq!(
            meters,
            vec![
                UsageMeter {
                    label: "five_hour".to_string(),
                    fraction: 0.42,
                    resets_at: Some("2026-10-16T18:00:00Z".to_string()),
                },
                UsageMeter {
                    label: "seven_day".to_string(),
                    fraction: 0.13,
                    resets_at: None,
                },
            ]
        );
    }

    #[test]
    fn test_alternate_field_names() {
        let doc = json!({
            "a": { "percent_used": 30 },
            "b": { "usage_percent": "0.5" },
            "c": 0.25,
            "d": { "unrelated": 99 }
        });
        let meters = extract_meters(&doc);
        let fractions: Vec<f64> = meters.iter().map(|m| m.fraction).collect();
        assert_eq!(fractions, vec![0.3, 0.5, 0.25]);
    }

    #[test]
    fn test_wrapped_document() {
        let doc = json!({ "usage": { "five_hour": { "utilization": 10 } } });
        let meters = extract_meters(&doc);
        assert_eq!(meters.len(), 1);
        assert_eq!(meters[0].fraction, 0.1);
    }

    #[test]
    fn test_prefers_short_window() {
        let doc = json!({
            "five_hour": { "utilization": 20 },
            "seven_day": { "utilization": 90 }
        });
        let snapshot = parse_usage_document(&doc, UsageSource::Oauth).unwrap();
        assert_eq!(snapshot.percentage, 0.2);
        assert_eq!(snapshot.source, UsageSource::Oauth);
    }

    #[test]
    fn test_falls_back_to_long_window() {
        let doc = json!({
            "seven_day": { "utilization": 35 },
            "other": { "utilization": 80 }
        });
        let snapshot = parse_usage_document(&doc, UsageSource::Push).unwrap();
        assert_eq!(snapshot.percentage, 0.35);
    }

    #[test]
    fn test_max_of_unclassified_ignores_extra() {
        let doc = json!({
            "extra_usage": { "utilization": 99 },
            "alpha": { "utilization": 15 },
            "beta": { "utilization": 55 }
        });
        let snapshot = parse_usage_document(&doc, UsageSource::CookieApi).unwrap();
        assert_eq!(snapshot.percentage, 0.55);
    }

    #[test]
    fn test_only_extra_yields_nothing() {
        let doc = json!({ "extra_usage": { "utilization": 99 } });
        assert!(parse_usage_document(&doc, UsageSource::Push).is_none());
    }

    #[test]
    fn test_unusable_documents() {
        assert!(parse_usage_document(&json!([]), UsageSource::Push).is_none());
        assert!(parse_usage_document(&json!({}), UsageSource::Push).is_none());
        assert!(parse_usage_document(&json!({"x": {"y": "z"}}), UsageSource::Push).is_none());
    }

    #[test]
    fn test_classify() {
        assert_eq!(WindowKind::classify("five_hour"), WindowKind::Short);
        assert_eq!(WindowKind::classify("Current session"), WindowKind::Short);
        assert_eq!(WindowKind::classify("seven_day_opus"), WindowKind::Long);
        assert_eq!(WindowKind::classify("Current week (all models)"), WindowKind::Long);
        assert_eq!(WindowKind::classify("extra_usage"), WindowKind::Extra);
        assert_eq!(WindowKind::classify("iguana_necktie"), WindowKind::Other);
    }

    #[test]
    fn test_describe() {
        let meters = vec![
            UsageMeter {
                label: "five_hour".to_string(),
                fraction: 0.42,
                resets_at: Some("18:00".to_string()),
            },
            UsageMeter {
                label: "seven_day".to_string(),
                fraction: 0.13,
                resets_at: None,
            },
        ];
        assert_eq!(
            describe(&meters),
            "five_hour 42% (resets 18:00) · seven_day 13%"
        );
    }
}
