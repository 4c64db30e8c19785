use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Ordered privilege level of an actor. Anything above [`Tier::Member`]
/// bypasses ambient field locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Member,
    Trusted,
    Mod,
    Admin,
}

impl Tier {
    /// Tier used by the ingestion worker for every automated write.
    pub const AUTOMATED: Tier = Tier::Member;

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Member => "member",
            Tier::Trusted => "trusted",
            Tier::Mod => "mod",
            Tier::Admin => "admin",
        }
    }

    /// True for every tier above the lowest one.
    pub fn is_privileged(&self) -> bool {
        *self > Tier::Member
    }
}

impl Default for Tier {
    fn default() -> Self {
        Tier::Member
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "member" => Ok(Tier::Member),
            "trusted" => Ok(Tier::Trusted),
            "mod" | "moderator" => Ok(Tier::Mod),
            "admin" => Ok(Tier::Admin),
            other => Err(format!("unknown tier '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering() {
        assert!(Tier::Member < Tier::Trusted);
        assert!(Tier::Trusted < Tier::Mod);
        assert!(Tier::Mod < Tier::Admin);
        assert!(!Tier::AUTOMATED.is_privileged());
        assert!(Tier::Mod.is_privileged());
    }

    #[test]
    fn test_tier_parse() {
        assert_eq!("MOD".parse::<Tier>().unwrap(), Tier::Mod);
        assert_eq!("moderator".parse::<Tier>().unwrap(), Tier::Mod);
        assert_eq!(" admin ".parse::<Tier>().unwrap(), Tier::Admin);
        assert!("owner".parse::<Tier>().is_err());
    }

    #[test]
    fn test_tier_serde() {
        let json = serde_json::to_string(&Tier::Trusted).unwrap();
        assert_eq!(json, r#""trusted""#);
        let parsed: Tier = serde_json::from_str(r#""member""#).unwrap();
        assert_eq!(parsed, Tier::Member);
    }
}
