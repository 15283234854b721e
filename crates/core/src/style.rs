//! Headshot style selector.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// The fixed set of styles a client may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Style {
    CorporateClassic,
    CreativeProfessional,
    ExecutivePortrait,
}

impl Style {
    pub const ALL: [Style; 3] = [
        Style::CorporateClassic,
        Style::CreativeProfessional,
        Style::ExecutivePortrait,
    ];

    /// Parse from the wire name.
    pub fn from_name(name: &str) -> Result<Self, CoreError> {
        match name {
            "corporate_classic" => Ok(Self::CorporateClassic),
            "creative_professional" => Ok(Self::CreativeProfessional),
            "executive_portrait" => Ok(Self::ExecutivePortrait),
            other => Err(CoreError::Validation(format!("Unknown style '{other}'"))),
        }
    }

    /// Wire name, also used as the provider template id.
    pub fn name(self) -> &'static str {
        match self {
            Self::CorporateClassic => "corporate_classic",
            Self::CreativeProfessional => "creative_professional",
            Self::ExecutivePortrait => "executive_portrait",
        }
    }

    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Self::CorporateClassic => "Corporate Classic",
            Self::CreativeProfessional => "Creative Professional",
            Self::ExecutivePortrait => "Executive Portrait",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_round_trips_for_every_style() {
        for style in Style::ALL {
            assert_eq!(Style::from_name(style.name()).unwrap(), style);
        }
    }

    #[test]
    fn unknown_style_rejected() {
        assert!(Style::from_name("vaporwave").is_err());
        assert!(Style::from_name("").is_err());
    }

    #[test]
    fn labels() {
        assert_eq!(Style::ExecutivePortrait.label(), "Executive Portrait");
    }
}
