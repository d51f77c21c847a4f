use super::{RuleKey, RulePredicate, ThresholdConfigError, ThresholdRule, ThresholdRules};
use crate::events::{Event, EventName};
use chrono::{TimeZone, Utc};
use std::path::Path;

const DEFAULT_RULES: &str = include_str!("../../config/thresholds.json");

fn rules_from(doc: &str) -> Result<ThresholdRules, ThresholdConfigError> {
    let mut bytes = doc.as_bytes().to_vec();
    ThresholdRules::from_slice(Path::new("thresholds.json"), &mut bytes)
}

fn reading(event_name: EventName, parameter_name: &str, value: Option<f64>) -> Event {
    Event {
        timestamp: Utc.with_ymd_and_hms(2024, 10, 16, 0, 0, 0).unwrap(),
        machine_id: "M1".to_string(),
        event_name,
        parameter_name: parameter_name.to_string(),
        value,
        arrival_seq: 0,
    }
}

#[test]
fn pick_force_outside_range_boundaries() {
    let rules = rules_from(r#"{"PickForce": {"error_if_outside_range": [60, 120]}}"#).unwrap();

    let flag = |v: f64| rules.is_error(&reading(EventName::PickCheck, "PP_Force", Some(v)));
    assert!(flag(59.9));
    assert!(!flag(60.0));
    assert!(!flag(120.0));
    assert!(flag(250.0));
}

#[test]
fn readings_without_a_matching_rule_are_never_flagged() {
    let rules = rules_from(DEFAULT_RULES).unwrap();

    assert!(!rules.is_error(&reading(EventName::AsCheck, "PP_Force", Some(1e9))));
    assert!(!rules.is_error(&reading(
        EventName::Other("Nozzle_Check".into()),
        "PP_Force",
        Some(1e9)
    )));
    assert!(!rules.is_error(&reading(EventName::PickCheck, "PP_Force", None)));
}

#[test]
fn same_parameter_is_judged_by_the_rule_for_its_event() {
    let rules = rules_from(DEFAULT_RULES).unwrap();

    // AS_VacuumUnits at 500 is a blow-off reading in range but a vacuum reading far out of it.
    assert!(!rules.is_error(&reading(EventName::AsBlowoffCheck, "AS_VacuumUnits", Some(500.0))));
    assert!(rules.is_error(&reading(EventName::AsCheck, "AS_VacuumUnits", Some(500.0))));
    assert!(rules.is_error(&reading(EventName::PlaceCheck, "PP_Force", Some(120.01))));
}

#[test]
fn above_and_below_predicates() {
    let rules = rules_from(
        r#"{
            "PP_VacuumUnits": {"error_if_above": 75},
            "AS_VacuumUnits_Release": {"error_if_below": 450.5}
        }"#,
    )
    .unwrap();
    assert_eq!(rules.rules().len(), 2);

    assert!(rules.is_error(&reading(EventName::PickCheck, "PP_VacuumUnits", Some(75.01))));
    assert!(!rules.is_error(&reading(EventName::PickCheck, "PP_VacuumUnits", Some(75.0))));
    assert!(rules.is_error(&reading(EventName::AsBlowoffCheck, "AS_VacuumUnits", Some(450.0))));
    assert!(!rules.is_error(&reading(EventName::AsBlowoffCheck, "AS_VacuumUnits", Some(450.5))));
}

#[test]
fn comments_unknown_keys_and_malformed_entries_are_ignored() {
    let rules = rules_from(
        r#"{
            "_comment": {"error_if_above": 1},
            "_note": "bounds in vacuum units",
            "SpindleSpeed": {"error_if_above": 10},
            "PickForce": "not an object",
            "PlaceForce": {"error_if_outside_range": [60]},
            "PP_VacuumUnits": {"unit": "kPa"},
            "AS_VacuumUnits": {"error_if_above": "high"},
            "PP_VacuumUnits_Release": {"error_if_below": 450}
        }"#,
    )
    .unwrap();

    assert_eq!(
        rules.rules(),
        &[ThresholdRule::new(
            RuleKey::PpVacuumUnitsRelease,
            RulePredicate::BelowThreshold(450.0)
        )]
    );
}

#[test]
fn first_named_predicate_wins() {
    let rules = rules_from(
        r#"{"PickForce": {"error_if_outside_range": [60, 120], "error_if_above": 200}}"#,
    )
    .unwrap();
    assert_eq!(
        rules.rules()[0].predicate,
        RulePredicate::AboveThreshold(200.0)
    );
}

#[test]
fn invalid_documents_are_fatal() {
    assert!(matches!(
        rules_from("{ not json"),
        Err(ThresholdConfigError::Syntax { .. })
    ));
    assert!(matches!(
        rules_from("[1, 2]"),
        Err(ThresholdConfigError::NotAnObject { .. })
    ));
}

#[test]
fn missing_file_yields_empty_rule_set() {
    let dir = tempfile::tempdir().unwrap();
    let rules = ThresholdRules::load(&dir.path().join("absent.json")).unwrap();
    assert!(rules.is_empty());
    assert!(!rules.is_error(&reading(EventName::PickCheck, "PP_Force", Some(1e9))));
}

#[test]
fn load_reads_rules_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("thresholds.json");
    std::fs::write(&path, DEFAULT_RULES).unwrap();

    let rules = ThresholdRules::load(&path).unwrap();
    let keys: Vec<RuleKey> = rules.rules().iter().map(|r| r.key).collect();
    for key in RuleKey::ALL {
        assert!(keys.contains(&key), "missing {}", key.config_key());
    }

    std::fs::write(&path, "{\"PickForce\": ").unwrap();
    assert!(ThresholdRules::load(&path).is_err());
}
