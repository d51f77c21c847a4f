use crate::events::EventName;
use serde_json::Value as JsonValue;

/// Logical rule names accepted in the threshold document. The measurement each one
/// guards is fixed here; the document only supplies bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleKey {
    AsVacuumUnits,
    PpVacuumUnits,
    AsVacuumUnitsRelease,
    PpVacuumUnitsRelease,
    PickForce,
    PlaceForce,
}

impl RuleKey {
    pub const COUNT: usize = 6;
    pub const ALL: [RuleKey; Self::COUNT] = [
        RuleKey::AsVacuumUnits,
        RuleKey::PpVacuumUnits,
        RuleKey::AsVacuumUnitsRelease,
        RuleKey::PpVacuumUnitsRelease,
        RuleKey::PickForce,
        RuleKey::PlaceForce,
    ];

    pub fn from_config_key(key: &str) -> Option<Self> {
        match key {
            "AS_VacuumUnits" => Some(RuleKey::AsVacuumUnits),
            "PP_VacuumUnits" => Some(RuleKey::PpVacuumUnits),
            "AS_VacuumUnits_Release" => Some(RuleKey::AsVacuumUnitsRelease),
            "PP_VacuumUnits_Release" => Some(RuleKey::PpVacuumUnitsRelease),
            "PickForce" => Some(RuleKey::PickForce),
            "PlaceForce" => Some(RuleKey::PlaceForce),
            _ => None,
        }
    }

    pub fn config_key(&self) -> &'static str {
        match self {
            RuleKey::AsVacuumUnits => "AS_VacuumUnits",
            RuleKey::PpVacuumUnits => "PP_VacuumUnits",
            RuleKey::AsVacuumUnitsRelease => "AS_VacuumUnits_Release",
            RuleKey::PpVacuumUnitsRelease => "PP_VacuumUnits_Release",
            RuleKey::PickForce => "PickForce",
            RuleKey::PlaceForce => "PlaceForce",
        }
    }

    pub fn parameter_name(&self) -> &'static str {
        match self {
            RuleKey::AsVacuumUnits | RuleKey::AsVacuumUnitsRelease => "AS_VacuumUnits",
            RuleKey::PpVacuumUnits | RuleKey::PpVacuumUnitsRelease => "PP_VacuumUnits",
            RuleKey::PickForce | RuleKey::PlaceForce => "PP_Force",
        }
    }

    pub fn event_name(&self) -> EventName {
        match self {
            RuleKey::AsVacuumUnits => EventName::AsCheck,
            RuleKey::PpVacuumUnits => EventName::PickCheck,
            RuleKey::AsVacuumUnitsRelease => EventName::AsBlowoffCheck,
            RuleKey::PpVacuumUnitsRelease => EventName::PlaceCheck,
            RuleKey::PickForce => EventName::PickCheck,
            RuleKey::PlaceForce => EventName::PlaceCheck,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RulePredicate {
    AboveThreshold(f64),
    BelowThreshold(f64),
    OutsideRange { low: f64, high: f64 },
}

impl RulePredicate {
    pub fn violates(&self, value: f64) -> bool {
        match *self {
            RulePredicate::AboveThreshold(limit) => value > limit,
            RulePredicate::BelowThreshold(limit) => value < limit,
            RulePredicate::OutsideRange { low, high } => value < low || value > high,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdRule {
    pub key: RuleKey,
    pub parameter_name: &'static str,
    pub event_name: EventName,
    pub predicate: RulePredicate,
}

impl ThresholdRule {
    pub fn new(key: RuleKey, predicate: RulePredicate) -> Self {
        Self {
            key,
            parameter_name: key.parameter_name(),
            event_name: key.event_name(),
            predicate,
        }
    }
}

/// Reads the predicate out of one rule object. `Ok(None)` means the object names no
/// predicate at all; `Err` carries why a named predicate could not be used.
pub fn parse_predicate(rule: &JsonValue) -> Result<Option<RulePredicate>, String> {
    let Some(fields) = rule.as_object() else {
        return Ok(None);
    };

    if let Some(raw) = fields.get("error_if_above") {
        let limit = raw
            .as_f64()
            .ok_or_else(|| format!("error_if_above must be a number, got {raw}"))?;
        return Ok(Some(RulePredicate::AboveThreshold(limit)));
    }
    if let Some(raw) = fields.get("error_if_below") {
        let limit = raw
            .as_f64()
            .ok_or_else(|| format!("error_if_below must be a number, got {raw}"))?;
        return Ok(Some(RulePredicate::BelowThreshold(limit)));
    }
    if let Some(raw) = fields.get("error_if_outside_range") {
        let bounds = raw
            .as_array()
            .filter(|items| items.len() == 2)
            .ok_or_else(|| format!("error_if_outside_range must be [low, high], got {raw}"))?;
        let (Some(low), Some(high)) = (bounds[0].as_f64(), bounds[1].as_f64()) else {
            return Err(format!("error_if_outside_range bounds must be numbers, got {raw}"));
        };
        return Ok(Some(RulePredicate::OutsideRange { low, high }));
    }

    Ok(None)
}
