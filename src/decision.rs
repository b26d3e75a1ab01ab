//! Flood decision rules.
//!
//! Maps one sensor reading to a status, a gate servo position and the
//! buzzer state. The rules are evaluated in order and the first match wins,
//! so the three outcomes are mutually exclusive.

use crate::model::{Decision, SensorReading, ServoPosition, Status};

/// Water level (cm) above which the channel is considered clear.
pub const SAFE_LEVEL_CM: f64 = 10.0;

/// Flow meter pulse count below which flow is considered calm.
pub const CALM_FLOW_PULSES: i64 = 5;

/// Evaluates a reading against the flood rules.
///
/// 1. no rain, calm flow and level above 10 cm → SAFE, neutral, buzzer off
/// 2. rain and level at or below 10 cm         → ALERT, intermediate, buzzer off
/// 3. anything else                            → DANGER, full, buzzer on
///
/// An unknown field fails every comparison it takes part in, so a reading
/// with an unreadable rain flag, flow count or level is never SAFE, and is
/// ALERT only if both rain and level are known.
pub fn evaluate(reading: &SensorReading) -> Decision {
    let level_clear = reading.water_level.is_some_and(|level| level > SAFE_LEVEL_CM);
    let level_low = reading.water_level.is_some_and(|level| level <= SAFE_LEVEL_CM);
    let flow_calm = reading.flow_pulses.is_some_and(|flow| flow < CALM_FLOW_PULSES);

    if reading.rain == Some(false) && flow_calm && level_clear {
        Decision {
            status: Status::Safe,
            servo: ServoPosition::Neutral,
            buzzer: false,
        }
    } else if reading.rain == Some(true) && level_low {
        Decision {
            status: Status::Alert,
            servo: ServoPosition::Intermediate,
            buzzer: false,
        }
    } else {
        Decision {
            status: Status::Danger,
            servo: ServoPosition::Full,
            buzzer: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(rain: bool, flow_pulses: i64, water_level: Option<f64>) -> SensorReading {
        SensorReading {
            rain: Some(rain),
            flow_pulses: Some(flow_pulses),
            water_level,
        }
    }

    // --- SAFE ---------------------------------------------------------------

    #[test]
    fn test_dry_calm_high_level_is_safe() {
        for flow in 0..CALM_FLOW_PULSES {
            for level in [10.5, 15.0, 200.0] {
                let d = evaluate(&reading(false, flow, Some(level)));
                assert_eq!(d.status, Status::Safe, "flow={} level={}", flow, level);
                assert_eq!(d.servo, ServoPosition::Neutral);
                assert!(!d.buzzer);
            }
        }
    }

    // --- ALERT --------------------------------------------------------------

    #[test]
    fn test_rain_with_low_level_is_alert_regardless_of_flow() {
        for flow in [0, 4, 5, 10, 1_000] {
            for level in [-3.0, 0.0, 5.0, 10.0] {
                let d = evaluate(&reading(true, flow, Some(level)));
                assert_eq!(d.status, Status::Alert, "flow={} level={}", flow, level);
                assert_eq!(d.servo, ServoPosition::Intermediate);
                assert!(!d.buzzer);
            }
        }
    }

    // --- DANGER -------------------------------------------------------------

    #[test]
    fn test_rain_with_high_level_is_danger() {
        let d = evaluate(&reading(true, 10, Some(20.0)));
        assert_eq!(d.status, Status::Danger);
        assert_eq!(d.servo, ServoPosition::Full);
        assert!(d.buzzer);
    }

    #[test]
    fn test_dry_with_strong_flow_is_danger() {
        let d = evaluate(&reading(false, CALM_FLOW_PULSES, Some(50.0)));
        assert_eq!(d.status, Status::Danger);
    }

    #[test]
    fn test_dry_with_low_level_is_danger() {
        // Rule 2 requires rain, so a dry low channel falls through to DANGER.
        let d = evaluate(&reading(false, 0, Some(3.0)));
        assert_eq!(d.status, Status::Danger);
        assert!(d.buzzer);
    }

    // --- Boundaries ---------------------------------------------------------

    #[test]
    fn test_level_exactly_ten_without_rain_is_danger() {
        // SAFE requires strictly greater than 10.
        let d = evaluate(&reading(false, 0, Some(10.0)));
        assert_eq!(d.status, Status::Danger);
    }

    #[test]
    fn test_level_exactly_ten_with_rain_is_alert() {
        let d = evaluate(&reading(true, 0, Some(10.0)));
        assert_eq!(d.status, Status::Alert);
    }

    #[test]
    fn test_flow_boundary_at_five_pulses() {
        assert_eq!(evaluate(&reading(false, 4, Some(11.0))).status, Status::Safe);
        assert_eq!(evaluate(&reading(false, 5, Some(11.0))).status, Status::Danger);
    }

    // --- Unknown level ------------------------------------------------------

    #[test]
    fn test_unknown_level_is_never_safe() {
        let d = evaluate(&reading(false, 0, None));
        assert_ne!(d.status, Status::Safe, "unknown level must not be classified SAFE");
        assert_eq!(d.status, Status::Danger);
    }

    #[test]
    fn test_unknown_level_with_rain_is_danger() {
        let d = evaluate(&reading(true, 0, None));
        assert_eq!(d.status, Status::Danger);
    }

    // --- Unknown rain / flow ------------------------------------------------

    #[test]
    fn test_unknown_rain_is_never_safe_or_alert() {
        let dry_looking = SensorReading {
            rain: None,
            ..reading(false, 0, Some(15.0))
        };
        let low_level = SensorReading {
            rain: None,
            ..reading(true, 0, Some(5.0))
        };
        assert_eq!(evaluate(&dry_looking).status, Status::Danger);
        assert_eq!(evaluate(&low_level).status, Status::Danger);
    }

    #[test]
    fn test_unknown_flow_is_never_safe() {
        let r = SensorReading {
            flow_pulses: None,
            ..reading(false, 0, Some(15.0))
        };
        assert_eq!(evaluate(&r).status, Status::Danger);
    }

    #[test]
    fn test_unknown_flow_still_allows_alert() {
        // Rule 2 does not look at flow.
        let r = SensorReading {
            flow_pulses: None,
            ..reading(true, 0, Some(5.0))
        };
        assert_eq!(evaluate(&r).status, Status::Alert);
    }

    #[test]
    fn test_unreadable_payload_fields_classify_as_danger() {
        let payloads: [&[u8]; 4] = [
            br#"{"rain":"1","flowPulses":0,"waterLevel":15}"#,
            br#"{"rain":0,"flowPulses":"100","waterLevel":15}"#,
            br#"{"rain":0,"flowPulses":null,"waterLevel":15}"#,
            br#"{"rain":2,"flowPulses":0,"waterLevel":5}"#,
        ];
        for payload in payloads {
            let r = SensorReading::from_payload(payload).expect("payload is a JSON object");
            assert_eq!(
                evaluate(&r).status,
                Status::Danger,
                "{}",
                String::from_utf8_lossy(payload)
            );
        }
    }

    // --- Out-of-range inputs ------------------------------------------------

    #[test]
    fn test_negative_inputs_fall_through_without_panicking() {
        assert_eq!(evaluate(&reading(false, -7, Some(12.0))).status, Status::Safe);
        assert_eq!(evaluate(&reading(true, -7, Some(-12.0))).status, Status::Alert);
    }

    #[test]
    fn test_evaluate_is_deterministic() {
        let levels = [None, Some(-1.0), Some(10.0), Some(10.01), Some(99.0)];
        for rain in [false, true] {
            for flow in [-1, 0, 4, 5, 100] {
                for level in levels {
                    let r = reading(rain, flow, level);
                    assert_eq!(evaluate(&r), evaluate(&r));
                }
            }
        }
    }
}
