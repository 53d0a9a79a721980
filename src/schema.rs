//! Canonical extraction output types.
//!
//! Field names are part of the wire contract: downstream form-fillers and
//! report generators key on them, so they must stay stable across versions.
//! All fields are optional on deserialize: the model is allowed to return
//! partial objects and the pipeline fills the gaps by falling through to
//! other strategies.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate ISO8601 timestamp for current time.
pub fn now_iso8601() -> String {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let secs = duration.as_secs();
    let days_since_epoch = secs / 86400;
    let time_of_day = secs % 86400;
    let hours = time_of_day / 3600;
    let minutes = (time_of_day % 3600) / 60;
    let seconds = time_of_day % 60;

    // Simplified date calculation (good enough for timestamps)
    let mut year = 1970i32;
    let mut remaining_days = days_since_epoch as i32;

    loop {
        let days_in_year = if is_leap_year(year) { 366 } else { 365 };
        if remaining_days < days_in_year {
            break;
        }
        remaining_days -= days_in_year;
        year += 1;
    }

    let days_in_months: [i32; 12] = if is_leap_year(year) {
        [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    } else {
        [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    };

    let mut month = 1;
    for days in days_in_months {
        if remaining_days < days {
            break;
        }
        remaining_days -= days;
        month += 1;
    }
    let day = remaining_days + 1;

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        year, month, day, hours, minutes, seconds
    )
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

/// Bibliographic metadata extracted from a patent application cover sheet or ADS.
///
/// Immutable once the pipeline returns it; an all-`None` instance is a valid
/// (explicitly permitted) last-resort outcome.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_number: Option<String>,
    /// Kept as a string: forms carry dates in wildly inconsistent formats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filing_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_status: Option<String>,
    #[serde(default)]
    pub inventors: Vec<Inventor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applicant: Option<Applicant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_drawing_sheets: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_confidence: Option<f64>,
    /// Model's own explanation of where it found the data. Debug aid only.
    #[serde(
        rename = "_debug_reasoning",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub debug_reasoning: Option<String>,
}

impl ApplicationMetadata {
    /// At least one non-empty scalar field, or at least one inventor
    /// carrying a name fragment. Empty results must escalate, not return.
    pub fn is_acceptable(&self) -> bool {
        self.has_scalar_data() || self.inventors.iter().any(Inventor::has_name_fragment)
    }

    pub fn has_scalar_data(&self) -> bool {
        non_empty(&self.title)
            || non_empty(&self.application_number)
            || non_empty(&self.entity_status)
    }
}

fn non_empty(field: &Option<String>) -> bool {
    field.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false)
}

/// A single inventor record.
///
/// Identity for deduplication is the normalized full name; see
/// [`Inventor::identity_key`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventor {
    /// Full display name, as printed on the form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citizenship: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_confidence: Option<f64>,
}

impl Inventor {
    pub fn has_name_fragment(&self) -> bool {
        non_empty(&self.name) || non_empty(&self.first_name) || non_empty(&self.last_name)
    }

    /// Normalized identity key: lowercased, whitespace-collapsed full name,
    /// synthesized from first/middle/last when no full name is given.
    /// Empty key means the record carries no name data and is not mergeable.
    ///
    /// Known limitation: two distinct inventors sharing a name will merge,
    /// and the same inventor listed with and without a middle name will not.
    pub fn identity_key(&self) -> String {
        let raw = match self.name.as_deref().map(str::trim) {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => [&self.first_name, &self.middle_name, &self.last_name]
                .iter()
                .filter_map(|p| p.as_deref())
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .collect::<Vec<_>>()
                .join(" "),
        };
        raw.split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
}

/// The applicant (often a company) named on the ADS, when distinct from the inventors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Applicant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

// ============================================================================
// Office Action types
// ============================================================================

/// Structured data extracted from a patent Office Action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OfficeActionData {
    #[serde(default)]
    pub header: OfficeActionHeader,
    #[serde(default)]
    pub claims_status: Vec<ClaimStatus>,
    #[serde(default)]
    pub rejections: Vec<Rejection>,
    #[serde(default)]
    pub objections: Vec<Objection>,
    #[serde(default)]
    pub other_statements: Vec<OtherStatement>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OfficeActionHeader {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filing_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub office_action_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub office_action_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub examiner_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub art_unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_deadline: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimStatus {
    pub claim_number: String,
    /// Rejected, Allowed, Objected to, Cancelled, Withdrawn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rejection {
    /// E.g. "102", "103", "112".
    pub rejection_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statutory_basis: Option<String>,
    #[serde(default)]
    pub affected_claims: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub examiner_reasoning: Option<String>,
    #[serde(default)]
    pub cited_prior_art: Vec<PriorArtReference>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorArtReference {
    /// US Patent, Foreign Patent, NPL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_type: Option<String>,
    pub identifier: String,
    #[serde(default)]
    pub relevant_claims: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Objection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objected_item: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrective_action: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtherStatement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// A completed analysis record as stored/served by the HTTP layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: String,
    pub source_file: String,
    pub content_hash: String,
    pub analyzed_at: String,
    pub metadata: ApplicationMetadata,
}

impl AnalysisRecord {
    pub fn new(source_file: String, content_hash: String, metadata: ApplicationMetadata) -> Self {
        Self {
            id: format!("ana_{}", Uuid::new_v4().simple()),
            source_file,
            content_hash,
            analyzed_at: now_iso8601(),
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_metadata_is_not_acceptable() {
        let meta = ApplicationMetadata::default();
        assert!(!meta.is_acceptable());
    }

    #[test]
    fn whitespace_scalar_is_not_acceptable() {
        let meta = ApplicationMetadata {
            title: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(!meta.is_acceptable());
    }

    #[test]
    fn named_inventor_makes_result_acceptable() {
        let meta = ApplicationMetadata {
            inventors: vec![Inventor {
                last_name: Some("Doe".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(meta.is_acceptable());
    }

    #[test]
    fn nameless_inventor_does_not_make_result_acceptable() {
        let meta = ApplicationMetadata {
            inventors: vec![Inventor {
                city: Some("Springfield".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(!meta.is_acceptable());
    }

    #[test]
    fn identity_key_collapses_whitespace_and_case() {
        let inv = Inventor {
            name: Some("  John   A.  Doe ".to_string()),
            ..Default::default()
        };
        assert_eq!(inv.identity_key(), "john a. doe");
    }

    #[test]
    fn identity_key_synthesized_from_parts() {
        let inv = Inventor {
            first_name: Some("John".to_string()),
            last_name: Some("Doe".to_string()),
            ..Default::default()
        };
        assert_eq!(inv.identity_key(), "john doe");
    }

    #[test]
    fn identity_key_empty_without_name_data() {
        let inv = Inventor {
            city: Some("Springfield".to_string()),
            ..Default::default()
        };
        assert!(inv.identity_key().is_empty());
    }

    #[test]
    fn debug_reasoning_round_trips_under_its_wire_name() {
        let json = r#"{"title":"Widget","_debug_reasoning":"found in header"}"#;
        let meta: ApplicationMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.debug_reasoning.as_deref(), Some("found in header"));

        let out = serde_json::to_string(&meta).unwrap();
        assert!(out.contains("_debug_reasoning"));
    }
}
