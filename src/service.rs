//! Service catalog.
//!
//! The business sells exactly 26 services, each backed by a price object at
//! the billing provider. Codes and display labels must round-trip exactly;
//! anything not in the table is rejected rather than guessed at.

use serde::{Deserialize, Serialize};

use crate::error::PawsyncError;

/// One of the 26 catalogued services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ServiceCode {
    PickupDropoff,
    PickupFortnightlyPerVisit,
    PickupWeeklyPerVisit,
    DaycareSingle,
    DaycareFortnightlyPerVisit,
    DaycareWeekly,
    DaycarePack5,
    Home30Weekly,
    Home30TwoDayWeekly,
    Hv30OnceSingle,
    Hv30OncePack5,
    Hv30TwiceSingle,
    Hv30TwicePack5,
    WalkLongSingle,
    WalkLongPack5,
    WalkShortSingle,
    WalkShortPack5,
    WalkLongWeekly,
    WalkShortWeekly,
    ScoopTwiceWeeklyMonth,
    ScoopFortnightlyMonth,
    ScoopWeeklyMonth,
    ScoopOnceSingle,
    BoardOvernightSingle,
    BoardOvernightPack5,
    PickupDropoffPack5,
}

/// (code, display label) for every catalogued service, in catalog order.
const CATALOG: &[(ServiceCode, &str, &str)] = &[
    (ServiceCode::PickupDropoff, "PICKUP_DROPOFF", "Pick up/Drop off"),
    (
        ServiceCode::PickupFortnightlyPerVisit,
        "PICKUP_FORTNIGHTLY_PER_VISIT",
        "Pick up/Drop off (Fortnightly per visit)",
    ),
    (
        ServiceCode::PickupWeeklyPerVisit,
        "PICKUP_WEEKLY_PER_VISIT",
        "Pick up/Drop off (Weekly per visit)",
    ),
    (ServiceCode::DaycareSingle, "DAYCARE_SINGLE", "Doggy Daycare (per day)"),
    (
        ServiceCode::DaycareFortnightlyPerVisit,
        "DAYCARE_FORTNIGHTLY_PER_VISIT",
        "Doggy Daycare (Fortnightly per visit)",
    ),
    (ServiceCode::DaycareWeekly, "DAYCARE_WEEKLY", "Doggy Daycare (Weekly)"),
    (ServiceCode::DaycarePack5, "DAYCARE_PACK5", "Doggy Daycare (Pack x5)"),
    (ServiceCode::Home30Weekly, "HOME_30WEEKLY", "Home Visit 1/day (weekly)"),
    (
        ServiceCode::Home30TwoDayWeekly,
        "HOME_30_2_DAY_WEEKLY",
        "Home Visit 2/day (weekly)",
    ),
    (ServiceCode::Hv30OnceSingle, "HV_30_1X_SINGLE", "Home Visit 30m 1\u{d7} (Single)"),
    (ServiceCode::Hv30OncePack5, "HV_30_1X_PACK5", "Home Visit 30m 1\u{d7} (Pack x5)"),
    (ServiceCode::Hv30TwiceSingle, "HV_30_2X_SINGLE", "Home Visit 30m 2\u{d7} (Single)"),
    (ServiceCode::Hv30TwicePack5, "HV_30_2X_PACK5", "Home Visit 30m 2\u{d7} (Pack x5)"),
    (ServiceCode::WalkLongSingle, "WALK_LONG_SINGLE", "Long Walk (Single)"),
    (ServiceCode::WalkLongPack5, "WALK_LONG_PACK5", "Long Walk (Pack x5)"),
    (ServiceCode::WalkShortSingle, "WALK_SHORT_SINGLE", "Short Walk (Single)"),
    (ServiceCode::WalkShortPack5, "WALK_SHORT_PACK5", "Short Walk (Pack x5)"),
    (ServiceCode::WalkLongWeekly, "WALK_LONG_WEEKLY", "Long Walk (Weekly)"),
    (ServiceCode::WalkShortWeekly, "WALK_SHORT_WEEKLY", "Short Walk (Weekly)"),
    (
        ServiceCode::ScoopTwiceWeeklyMonth,
        "SCOOP_TWICE_WEEKLY_MONTH",
        "Poop Scoop \u{2013} Twice Weekly (Monthly)",
    ),
    (
        ServiceCode::ScoopFortnightlyMonth,
        "SCOOP_FORTNIGHTLY_MONTH",
        "Poop Scoop \u{2013} Fortnightly (Monthly)",
    ),
    (
        ServiceCode::ScoopWeeklyMonth,
        "SCOOP_WEEKLY_MONTH",
        "Poop Scoop \u{2013} Weekly (Monthly)",
    ),
    (ServiceCode::ScoopOnceSingle, "SCOOP_ONCE_SINGLE", "Poop Scoop \u{2013} One-time"),
    (
        ServiceCode::BoardOvernightSingle,
        "BOARD_OVERNIGHT_SINGLE",
        "Overnight Pet Sitting (Single)",
    ),
    (
        ServiceCode::BoardOvernightPack5,
        "BOARD_OVERNIGHT_PACK5",
        "Overnight Pet Sitting (Pack x5)",
    ),
    (
        ServiceCode::PickupDropoffPack5,
        "PICKUP_DROPOFF_PACK5",
        "Pick up/Drop off (Pack x5)",
    ),
];

impl ServiceCode {
    /// Canonical machine code, e.g. `WALK_SHORT_SINGLE`.
    pub fn as_str(&self) -> &'static str {
        CATALOG
            .iter()
            .find(|(code, _, _)| code == self)
            .map(|(_, s, _)| *s)
            .unwrap_or("UNKNOWN")
    }

    /// Human-facing label as it appears on invoices and the calendar.
    pub fn display_name(&self) -> &'static str {
        CATALOG
            .iter()
            .find(|(code, _, _)| code == self)
            .map(|(_, _, label)| *label)
            .unwrap_or("Service")
    }

    /// Exact lookup by machine code. Unmapped input is an error.
    pub fn from_code(code: &str) -> Result<Self, PawsyncError> {
        CATALOG
            .iter()
            .find(|(_, s, _)| *s == code)
            .map(|(c, _, _)| *c)
            .ok_or_else(|| PawsyncError::UnknownServiceCode(code.to_string()))
    }

    /// Exact lookup by display label. Unmapped input is an error.
    pub fn from_label(label: &str) -> Result<Self, PawsyncError> {
        CATALOG
            .iter()
            .find(|(_, _, l)| *l == label)
            .map(|(c, _, _)| *c)
            .ok_or_else(|| PawsyncError::UnknownServiceCode(label.to_string()))
    }

    /// Overnight services span into the following day.
    pub fn is_overnight(&self) -> bool {
        matches!(
            self,
            ServiceCode::BoardOvernightSingle | ServiceCode::BoardOvernightPack5
        )
    }

    /// Every catalogued service, in catalog order.
    pub fn all() -> impl Iterator<Item = ServiceCode> {
        CATALOG.iter().map(|(c, _, _)| *c)
    }
}

impl std::fmt::Display for ServiceCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ServiceCode {
    type Err = PawsyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_code(s)
    }
}

impl TryFrom<String> for ServiceCode {
    type Error = PawsyncError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_code(&s)
    }
}

impl From<ServiceCode> for String {
    fn from(code: ServiceCode) -> Self {
        code.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_has_26_services() {
        assert_eq!(ServiceCode::all().count(), 26);
        assert_eq!(CATALOG.len(), 26);
    }

    #[test]
    fn test_code_round_trip() {
        for code in ServiceCode::all() {
            assert_eq!(ServiceCode::from_code(code.as_str()).unwrap(), code);
            assert_eq!(ServiceCode::from_label(code.display_name()).unwrap(), code);
        }
    }

    #[test]
    fn test_known_lookups() {
        assert_eq!(
            ServiceCode::from_code("WALK_SHORT_SINGLE").unwrap(),
            ServiceCode::WalkShortSingle
        );
        assert_eq!(
            ServiceCode::WalkShortSingle.display_name(),
            "Short Walk (Single)"
        );
        assert_eq!(
            ServiceCode::from_label("Overnight Pet Sitting (Single)").unwrap(),
            ServiceCode::BoardOvernightSingle
        );
    }

    #[test]
    fn test_unmapped_code_is_rejected() {
        let err = ServiceCode::from_code("WALK_MEDIUM_SINGLE").unwrap_err();
        assert!(matches!(err, PawsyncError::UnknownServiceCode(_)));

        // no fuzzy matching on labels either
        assert!(ServiceCode::from_label("short walk (single)").is_err());
        assert!(ServiceCode::from_label("Short Walk").is_err());
    }

    #[test]
    fn test_overnight_flag() {
        assert!(ServiceCode::BoardOvernightSingle.is_overnight());
        assert!(ServiceCode::BoardOvernightPack5.is_overnight());
        assert!(!ServiceCode::WalkLongSingle.is_overnight());
        assert!(!ServiceCode::DaycareSingle.is_overnight());
    }

    #[test]
    fn test_serde_uses_machine_code() {
        let json = serde_json::to_string(&ServiceCode::DaycarePack5).unwrap();
        assert_eq!(json, "\"DAYCARE_PACK5\"");
        let back: ServiceCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ServiceCode::DaycarePack5);
        assert!(serde_json::from_str::<ServiceCode>("\"NOT_A_SERVICE\"").is_err());
    }
}
