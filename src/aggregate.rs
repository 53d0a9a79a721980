//! Cross-chunk aggregation of extraction results.
//!
//! Chunk results arrive in page order; scalar fields take the first
//! non-empty value seen, and inventor records are deduplicated by a
//! normalized name key with field backfill across sightings.

use crate::schema::{ApplicationMetadata, Inventor};
use std::collections::HashMap;
use tracing::debug;

fn first_non_empty(target: &mut Option<String>, candidate: &Option<String>) {
    if target.as_deref().map_or(true, |s| s.trim().is_empty()) {
        if let Some(value) = candidate {
            if !value.trim().is_empty() {
                *target = Some(value.clone());
            }
        }
    }
}

fn first_some<T: Clone>(target: &mut Option<T>, candidate: &Option<T>) {
    if target.is_none() {
        *target = candidate.clone();
    }
}

/// Merge per-chunk results, in chunk order, into one record.
///
/// Scalars are first-non-empty-wins. Inventors seen in multiple chunks
/// (same normalized name) collapse into one record, with fields the
/// earlier sighting lacked filled in from later ones. Records with no
/// name fragment at all are kept as-is, never merged with each other.
pub fn merge_chunk_results(results: &[ApplicationMetadata]) -> ApplicationMetadata {
    let mut merged = ApplicationMetadata::default();
    let mut keyed: HashMap<String, usize> = HashMap::new();

    for result in results {
        first_non_empty(&mut merged.title, &result.title);
        first_non_empty(&mut merged.application_number, &result.application_number);
        first_non_empty(&mut merged.filing_date, &result.filing_date);
        first_non_empty(&mut merged.entity_status, &result.entity_status);
        first_some(&mut merged.total_drawing_sheets, &result.total_drawing_sheets);
        first_some(&mut merged.extraction_confidence, &result.extraction_confidence);
        first_non_empty(&mut merged.debug_reasoning, &result.debug_reasoning);

        if merged.applicant.is_none() {
            if let Some(applicant) = &result.applicant {
                if applicant.name.as_deref().map_or(false, |n| !n.trim().is_empty()) {
                    merged.applicant = Some(applicant.clone());
                }
            }
        }

        for inventor in &result.inventors {
            let key = inventor.identity_key();
            if key.is_empty() {
                merged.inventors.push(inventor.clone());
            } else if let Some(&idx) = keyed.get(&key) {
                backfill_inventor(&mut merged.inventors[idx], inventor);
            } else {
                keyed.insert(key, merged.inventors.len());
                merged.inventors.push(inventor.clone());
            }
        }
    }

    debug!(
        "Merged {} chunk results into {} inventors",
        results.len(),
        merged.inventors.len()
    );

    split_inventor_names(&mut merged);
    merged
}

fn backfill_inventor(existing: &mut Inventor, incoming: &Inventor) {
    first_non_empty(&mut existing.name, &incoming.name);
    first_non_empty(&mut existing.first_name, &incoming.first_name);
    first_non_empty(&mut existing.middle_name, &incoming.middle_name);
    first_non_empty(&mut existing.last_name, &incoming.last_name);
    first_non_empty(&mut existing.suffix, &incoming.suffix);
    first_non_empty(&mut existing.street_address, &incoming.street_address);
    first_non_empty(&mut existing.city, &incoming.city);
    first_non_empty(&mut existing.state, &incoming.state);
    first_non_empty(&mut existing.zip_code, &incoming.zip_code);
    first_non_empty(&mut existing.country, &incoming.country);
    first_non_empty(&mut existing.citizenship, &incoming.citizenship);
    first_non_empty(&mut existing.full_address, &incoming.full_address);
    first_some(&mut existing.extraction_confidence, &incoming.extraction_confidence);
}

/// Derive name parts for inventors that only carry a full name.
///
/// First whitespace token becomes the first name, the last token the last
/// name, anything between the middle name. A single token lands in the
/// first name alone. Existing parts are never overwritten.
pub fn split_inventor_names(metadata: &mut ApplicationMetadata) {
    for inventor in &mut metadata.inventors {
        let has_parts = inventor.first_name.as_deref().map_or(false, |s| !s.trim().is_empty())
            || inventor.last_name.as_deref().map_or(false, |s| !s.trim().is_empty());
        if has_parts {
            continue;
        }

        let Some(name) = inventor.name.as_deref() else {
            continue;
        };
        let tokens: Vec<&str> = name.split_whitespace().collect();
        match tokens.len() {
            0 => {}
            1 => inventor.first_name = Some(tokens[0].to_string()),
            n => {
                inventor.first_name = Some(tokens[0].to_string());
                inventor.last_name = Some(tokens[n - 1].to_string());
                if n >= 3 {
                    inventor.middle_name = Some(tokens[1..n - 1].join(" "));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> Inventor {
        Inventor {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn scalars_are_first_non_empty_wins() {
        let a = ApplicationMetadata {
            title: Some("Widget Apparatus".into()),
            application_number: None,
            ..Default::default()
        };
        let b = ApplicationMetadata {
            title: Some("Ignored Later Title".into()),
            application_number: Some("17/123,456".into()),
            ..Default::default()
        };

        let merged = merge_chunk_results(&[a, b]);
        assert_eq!(merged.title.as_deref(), Some("Widget Apparatus"));
        assert_eq!(merged.application_number.as_deref(), Some("17/123,456"));
    }

    #[test]
    fn blank_scalar_does_not_block_later_value() {
        let a = ApplicationMetadata {
            filing_date: Some("   ".into()),
            ..Default::default()
        };
        let b = ApplicationMetadata {
            filing_date: Some("2024-03-15".into()),
            ..Default::default()
        };

        let merged = merge_chunk_results(&[a, b]);
        assert_eq!(merged.filing_date.as_deref(), Some("2024-03-15"));
    }

    #[test]
    fn same_inventor_across_chunks_is_backfilled() {
        let mut first = named("John Doe");
        first.city = Some("Springfield".into());
        let mut second = named("john  doe");
        second.state = Some("IL".into());
        second.city = Some("Shelbyville".into());

        let a = ApplicationMetadata {
            inventors: vec![first],
            ..Default::default()
        };
        let b = ApplicationMetadata {
            inventors: vec![second],
            ..Default::default()
        };

        let merged = merge_chunk_results(&[a, b]);
        assert_eq!(merged.inventors.len(), 1);
        let inv = &merged.inventors[0];
        // The first sighting keeps its city; the gap gets filled.
        assert_eq!(inv.city.as_deref(), Some("Springfield"));
        assert_eq!(inv.state.as_deref(), Some("IL"));
    }

    #[test]
    fn distinct_inventors_stay_distinct_in_chunk_order() {
        let a = ApplicationMetadata {
            inventors: vec![named("Alice Chen"), named("Bob Osei")],
            ..Default::default()
        };
        let b = ApplicationMetadata {
            inventors: vec![named("Carol Dube"), named("Alice Chen")],
            ..Default::default()
        };

        let merged = merge_chunk_results(&[a, b]);
        let names: Vec<_> = merged
            .inventors
            .iter()
            .map(|i| i.name.as_deref().unwrap())
            .collect();
        assert_eq!(names, vec!["Alice Chen", "Bob Osei", "Carol Dube"]);
    }

    #[test]
    fn nameless_records_are_kept_separately() {
        let orphan_a = Inventor {
            city: Some("Austin".into()),
            ..Default::default()
        };
        let orphan_b = Inventor {
            city: Some("Denver".into()),
            ..Default::default()
        };

        let merged = merge_chunk_results(&[
            ApplicationMetadata {
                inventors: vec![orphan_a],
                ..Default::default()
            },
            ApplicationMetadata {
                inventors: vec![orphan_b],
                ..Default::default()
            },
        ]);
        assert_eq!(merged.inventors.len(), 2);
    }

    #[test]
    fn four_token_name_splits_with_compound_middle() {
        let mut metadata = ApplicationMetadata {
            inventors: vec![named("Maria Elena Garcia Lopez")],
            ..Default::default()
        };
        split_inventor_names(&mut metadata);

        let inv = &metadata.inventors[0];
        assert_eq!(inv.first_name.as_deref(), Some("Maria"));
        assert_eq!(inv.middle_name.as_deref(), Some("Elena Garcia"));
        assert_eq!(inv.last_name.as_deref(), Some("Lopez"));
    }

    #[test]
    fn single_token_name_becomes_first_name_only() {
        let mut metadata = ApplicationMetadata {
            inventors: vec![named("Cher")],
            ..Default::default()
        };
        split_inventor_names(&mut metadata);

        let inv = &metadata.inventors[0];
        assert_eq!(inv.first_name.as_deref(), Some("Cher"));
        assert!(inv.last_name.is_none());
        assert!(inv.middle_name.is_none());
    }

    #[test]
    fn existing_name_parts_are_not_overwritten() {
        let mut inv = named("Jean-Luc Picard");
        inv.first_name = Some("Jean-Luc".into());
        inv.last_name = Some("Picard".into());
        let mut metadata = ApplicationMetadata {
            inventors: vec![inv],
            ..Default::default()
        };
        split_inventor_names(&mut metadata);

        let inv = &metadata.inventors[0];
        assert!(inv.middle_name.is_none());
        assert_eq!(inv.first_name.as_deref(), Some("Jean-Luc"));
    }
}
