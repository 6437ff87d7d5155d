//! The challenge-specification payload (§6.4) — the configuration half of
//! a `Challenge`, validated at ingress (create/import) rather than at
//! dispatch time (SPEC_FULL.md §6).

use serde::{Deserialize, Serialize};

use crate::enums::ModulationKind;
use crate::error::{CoreResult, ValidationError};

/// §4.5.2: a challenge declares its frequency in exactly one of three
/// forms. Untagged so the wire payload stays the flat shape operators
/// author by hand; `validate` rejects the empty/inverted edge cases
/// that would otherwise only surface as a confusing dispatch-time error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FrequencySpec {
    Single { frequency_hz: i64 },
    NamedRanges { named_ranges: Vec<String> },
    ManualRange { min_hz: i64, max_hz: i64 },
}

impl FrequencySpec {
    pub fn validate(&self) -> CoreResult<()> {
        match self {
            FrequencySpec::Single { .. } => Ok(()),
            FrequencySpec::NamedRanges { named_ranges } => {
                if named_ranges.is_empty() {
                    return Err(ValidationError::InvalidValue {
                        field: "named_ranges".into(),
                        reason: "must name at least one range".into(),
                    }
                    .into());
                }
                Ok(())
            }
            FrequencySpec::ManualRange { min_hz, max_hz } => {
                if min_hz > max_hz {
                    return Err(ValidationError::InvalidValue {
                        field: "manual_range".into(),
                        reason: format!("min_hz ({min_hz}) exceeds max_hz ({max_hz})"),
                    }
                    .into());
                }
                Ok(())
            }
        }
    }
}

/// Modulation-specific knobs (§6.4: "speed for CW, sample-rate for audio,
/// hop parameters for FHSS, etc."). Untagged alongside `modulation` so a
/// challenge payload stays one flat JSON object on the wire.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModulationParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cw_speed_wpm: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_sample_rate_hz: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fhss_hop_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fhss_dwell_ms: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digital_symbol_rate: Option<u32>,
}

/// §6.4 challenge-specification payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeSpec {
    #[serde(flatten)]
    pub frequency: FrequencySpec,
    pub modulation: ModulationKind,
    pub payload_text: Option<String>,
    pub payload_artifact_hash: Option<String>,
    pub min_delay_secs: i64,
    pub max_delay_secs: i64,
    #[serde(default)]
    pub modulation_params: ModulationParams,
    #[serde(default)]
    pub public_view: bool,
}

impl ChallengeSpec {
    /// Ingress-time validation (SPEC_FULL.md §6): called from challenge
    /// create and from config-driven import, never from the dispatch path.
    pub fn validate(&self) -> CoreResult<()> {
        self.frequency.validate()?;

        if self.payload_text.is_none() && self.payload_artifact_hash.is_none() {
            return Err(ValidationError::MissingField {
                field: "payload".into(),
            }
            .into());
        }

        if self.min_delay_secs < 0 || self.max_delay_secs < 0 {
            return Err(ValidationError::InvalidValue {
                field: "min_delay/max_delay".into(),
                reason: "must be non-negative".into(),
            }
            .into());
        }

        if self.min_delay_secs > self.max_delay_secs {
            return Err(ValidationError::InvalidValue {
                field: "min_delay/max_delay".into(),
                reason: format!(
                    "min_delay ({}) exceeds max_delay ({})",
                    self.min_delay_secs, self.max_delay_secs
                ),
            }
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_spec(frequency: FrequencySpec) -> ChallengeSpec {
        ChallengeSpec {
            frequency,
            modulation: ModulationKind::Cw,
            payload_text: Some("...-- ...".into()),
            payload_artifact_hash: None,
            min_delay_secs: 30,
            max_delay_secs: 90,
            modulation_params: ModulationParams::default(),
            public_view: true,
        }
    }

    #[test]
    fn rejects_empty_named_ranges() {
        let spec = base_spec(FrequencySpec::NamedRanges { named_ranges: vec![] });
        assert!(spec.validate().is_err());
    }

    #[test]
    fn rejects_inverted_manual_range() {
        let spec = base_spec(FrequencySpec::ManualRange { min_hz: 146_000_000, max_hz: 144_000_000 });
        assert!(spec.validate().is_err());
    }

    #[test]
    fn rejects_missing_payload() {
        let mut spec = base_spec(FrequencySpec::Single { frequency_hz: 145_000_000 });
        spec.payload_text = None;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn accepts_well_formed_spec() {
        let spec = base_spec(FrequencySpec::Single { frequency_hz: 145_000_000 });
        assert!(spec.validate().is_ok());
    }
}
