use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

/// Chain phases. The host framework may invoke the chain at each of the
/// four anchor points; entries with no phase run whenever the chain runs
/// without an anchor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    /// Before authentication
    PreAuth = 0,
    /// After authentication, before routing
    PostAuth = 1,
    /// Before route resolution
    PreRoute = 2,
    /// After route resolution, before the terminal handler
    PostRoute = 3,
    /// No phase assigned
    #[default]
    Unassigned = 4,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::PreAuth => "pre-auth",
            Phase::PostAuth => "post-auth",
            Phase::PreRoute => "pre-route",
            Phase::PostRoute => "post-route",
            Phase::Unassigned => "",
        }
    }

    pub fn all() -> &'static [Phase] {
        &[
            Phase::PreAuth,
            Phase::PostAuth,
            Phase::PreRoute,
            Phase::PostRoute,
            Phase::Unassigned,
        ]
    }

    /// The four anchor phases, in chain order.
    pub fn anchors() -> &'static [Phase] {
        &[
            Phase::PreAuth,
            Phase::PostAuth,
            Phase::PreRoute,
            Phase::PostRoute,
        ]
    }

    /// Parse a phase name. The empty string and `"unassigned"` both map to
    /// [`Phase::Unassigned`].
    pub fn parse(s: &str) -> Option<Phase> {
        match s {
            "pre-auth" => Some(Phase::PreAuth),
            "post-auth" => Some(Phase::PostAuth),
            "pre-route" => Some(Phase::PreRoute),
            "post-route" => Some(Phase::PostRoute),
            "" | "unassigned" => Some(Phase::Unassigned),
            _ => None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = crate::StratoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::parse(s)
            .ok_or_else(|| crate::StratoError::InvalidArgument(format!("unknown phase: {s:?}")))
    }
}

impl Serialize for Phase {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Phase {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PhaseVisitor;

        impl Visitor<'_> for PhaseVisitor {
            type Value = Phase;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a phase name (pre-auth, post-auth, pre-route, post-route, or empty)")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Phase, E> {
                Phase::parse(v).ok_or_else(|| E::custom(format!("unknown phase: {v:?}")))
            }
        }

        deserializer.deserialize_str(PhaseVisitor)
    }
}
