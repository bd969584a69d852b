//! Change detection between two snapshots of the same vehicle.
//!
//! The compared fields and how each one is compared live in
//! [`COMPARED_FIELDS`]. Fields outside that table (timestamps, record ids,
//! the opaque attribute bag, descriptive names) never influence the decision.

use crate::core::models::Snapshot;

/// Floats closer than this are considered equal.
pub const FLOAT_TOLERANCE: f64 = 1e-4;

/// How a single field is compared.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Strategy {
    /// Values must be identical.
    Exact,
    /// `|a - b| > tolerance` means different.
    Tolerance(f64),
}

/// Borrowed view of one field value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Float(Option<f64>),
    Int(Option<i64>),
    Text(Option<&'a str>),
}

/// One row of the comparison table.
#[derive(Clone, Copy)]
pub struct CompareRule {
    /// Wire name of the field, used in logs.
    pub name: &'static str,
    pub extract: fn(&Snapshot) -> FieldValue<'_>,
    pub strategy: Strategy,
}

impl std::fmt::Debug for CompareRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompareRule")
            .field("name", &self.name)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

impl CompareRule {
    /// Whether this field differs between the two snapshots.
    #[must_use]
    pub fn differs(&self, new: &Snapshot, last: &Snapshot) -> bool {
        values_differ((self.extract)(new), (self.extract)(last), self.strategy)
    }
}

const TOLERANT: Strategy = Strategy::Tolerance(FLOAT_TOLERANCE);

/// Fields that decide whether a fresh snapshot is worth storing.
pub const COMPARED_FIELDS: &[CompareRule] = &[
    CompareRule {
        name: "latitude",
        extract: |s| FieldValue::Float(s.latitude),
        strategy: TOLERANT,
    },
    CompareRule {
        name: "longitude",
        extract: |s| FieldValue::Float(s.longitude),
        strategy: TOLERANT,
    },
    CompareRule {
        name: "speed",
        extract: |s| FieldValue::Float(s.speed),
        strategy: TOLERANT,
    },
    CompareRule {
        name: "status",
        extract: |s| FieldValue::Text(s.status.as_ref().map(|st| st.as_str())),
        strategy: Strategy::Exact,
    },
    CompareRule {
        name: "rpm",
        extract: |s| FieldValue::Text(s.rpm.as_deref()),
        strategy: TOLERANT,
    },
    CompareRule {
        name: "currentFuelConsumption",
        extract: |s| FieldValue::Float(s.current_fuel_consumption),
        strategy: TOLERANT,
    },
    CompareRule {
        name: "totalFuelConsumption",
        extract: |s| FieldValue::Float(s.total_fuel_consumption),
        strategy: TOLERANT,
    },
    CompareRule {
        name: "currentOdometer",
        extract: |s| FieldValue::Float(s.current_odometer),
        strategy: TOLERANT,
    },
    CompareRule {
        name: "totalOdometer",
        extract: |s| FieldValue::Float(s.total_odometer),
        strategy: TOLERANT,
    },
    CompareRule {
        name: "driverId",
        extract: |s| FieldValue::Int(s.driver_id),
        strategy: Strategy::Exact,
    },
    CompareRule {
        name: "course",
        extract: |s| FieldValue::Float(s.course),
        strategy: TOLERANT,
    },
    CompareRule {
        name: "address",
        extract: |s| FieldValue::Text(s.address.as_deref()),
        strategy: Strategy::Exact,
    },
];

fn values_differ(a: FieldValue<'_>, b: FieldValue<'_>, strategy: Strategy) -> bool {
    match (a, b, strategy) {
        (FieldValue::Float(Some(x)), FieldValue::Float(Some(y)), Strategy::Tolerance(tol)) => {
            (x - y).abs() > tol
        }
        // Numeric text ("1450" vs "1450.0"); anything unparsable compares as text.
        (FieldValue::Text(Some(x)), FieldValue::Text(Some(y)), Strategy::Tolerance(tol)) => {
            match (x.trim().parse::<f64>(), y.trim().parse::<f64>()) {
                (Ok(x), Ok(y)) => (x - y).abs() > tol,
                _ => x != y,
            }
        }
        // Present on one side only, or compared exactly.
        _ => a != b,
    }
}

/// True if `new` should be stored given the last persisted snapshot.
///
/// The first observation of a vehicle is always stored.
#[must_use]
pub fn has_changed(new: &Snapshot, last: Option<&Snapshot>) -> bool {
    last.is_none_or(|last| COMPARED_FIELDS.iter().any(|rule| rule.differs(new, last)))
}

/// Names of the compared fields that differ, for diagnostics.
#[must_use]
pub fn changed_fields(new: &Snapshot, last: &Snapshot) -> Vec<&'static str> {
    COMPARED_FIELDS
        .iter()
        .filter(|rule| rule.differs(new, last))
        .map(|rule| rule.name)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::VehicleStatus;

    fn base() -> Snapshot {
        Snapshot {
            vehicle_id: Some(42),
            latitude: Some(1.0),
            longitude: Some(2.0),
            speed: Some(10.0),
            status: Some(VehicleStatus::Running),
            ..Snapshot::default()
        }
    }

    #[test]
    fn first_observation_is_always_stored() {
        assert!(has_changed(&base(), None));
        assert!(has_changed(&Snapshot::default(), None));
    }

    #[test]
    fn identical_snapshots_are_unchanged() {
        assert!(!has_changed(&base(), Some(&base())));
    }

    #[test]
    fn speed_tolerance_boundary() {
        let mut within = base();
        within.speed = Some(10.000_05);
        assert!(!has_changed(&within, Some(&base())));

        let mut beyond = base();
        beyond.speed = Some(10.000_2);
        assert!(has_changed(&beyond, Some(&base())));
        assert_eq!(changed_fields(&beyond, &base()), vec!["speed"]);
    }

    #[test]
    fn discrete_fields_compare_exactly() {
        let mut idle = base();
        idle.status = Some(VehicleStatus::Idle);
        assert_eq!(changed_fields(&idle, &base()), vec!["status"]);

        let mut driver = base();
        driver.driver_id = Some(7);
        assert_eq!(changed_fields(&driver, &base()), vec!["driverId"]);
    }

    #[test]
    fn rpm_compares_by_numeric_value() {
        let with_rpm = |rpm: &str| Snapshot {
            rpm: Some(rpm.to_string()),
            ..base()
        };

        assert!(!has_changed(&with_rpm("1450.0"), Some(&with_rpm("1450"))));
        assert_eq!(changed_fields(&with_rpm("1500"), &with_rpm("1450")), vec!["rpm"]);
        assert!(!has_changed(&with_rpm("n/a"), Some(&with_rpm("n/a"))));
        assert!(has_changed(&with_rpm("n/a"), Some(&with_rpm("1450"))));
    }

    #[test]
    fn presence_change_counts_as_change() {
        let mut with_address = base();
        with_address.address = Some("MG Road".to_string());
        assert!(has_changed(&with_address, Some(&base())));
        assert!(has_changed(&base(), Some(&with_address)));

        let mut no_speed = base();
        no_speed.speed = None;
        assert!(has_changed(&no_speed, Some(&base())));
    }

    #[test]
    fn ignored_fields_do_not_trigger_storage() {
        let mut other = base();
        other.time_stamp = Some("1760000000000".to_string());
        other.server_time = Some(1_760_000_000_123);
        other.vehicle_name = Some("Truck 9".to_string());
        other.other_attributes = Some(serde_json::json!({"door": "open"}));
        assert!(!has_changed(&other, Some(&base())));
    }

    #[test]
    fn table_names_are_unique() {
        let mut names: Vec<_> = COMPARED_FIELDS.iter().map(|r| r.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), COMPARED_FIELDS.len());
    }
}
