// ── Identity types ──
//
// Every policy entity is keyed by a numeric row id assigned by the policy
// store. Each entity kind gets its own newtype so a device id can never be
// passed where a traffic class id is expected.

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse().map(Self)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }
    };
}

entity_id!(
    /// A NAS router.
    DeviceId
);
entity_id!(
    /// A named traffic class ("CDN").
    TrafficClassId
);
entity_id!(
    /// A billable service plan.
    ServiceId
);
entity_id!(
    /// A service/traffic-class binding.
    BindingId
);
entity_id!(SubscriberId);
entity_id!(
    /// A bandwidth rule. Service rules and traffic-class rules are stored
    /// separately and each table numbers its own rows.
    RuleId
);

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_surrounding_whitespace() {
        let id: DeviceId = " 7 ".parse().unwrap();
        assert_eq!(id, DeviceId(7));
    }

    #[test]
    fn rejects_non_numeric() {
        assert!("nas-1".parse::<DeviceId>().is_err());
    }

    #[test]
    fn serializes_as_bare_number() {
        let json = serde_json::to_string(&SubscriberId(5)).unwrap();
        assert_eq!(json, "5");
    }

    #[test]
    fn orders_numerically() {
        assert!(RuleId(2) < RuleId(10));
    }
}
