//! Local PDF signal extraction, no remote calls.
//!
//! Everything here is cheap CPU work used to decide which extraction
//! strategy to run: page count, embedded AcroForm field values, per-page
//! text layer, and the XFA "datasets" packet for dynamic forms.
//!
//! Failure philosophy: a parse error in any sub-extraction degrades that
//! one signal to empty/absent. This function never fails the analysis.

use lopdf::{Dictionary, Document, Object};
use std::io::Cursor;
use tracing::{debug, warn};

pub const FORM_DATA_START: &str = "--- FORM FIELD DATA ---";
pub const FORM_DATA_END: &str = "--- END FORM DATA ---";
pub const EMPTY_PAGE_MARKER: &str = "[EMPTY PAGE TEXT]";

/// Locally extracted signal for one document.
#[derive(Debug, Clone)]
pub struct PdfSignal {
    /// 0 means "unknown" (document unreadable), never an error.
    pub page_count: u32,
    /// Form-field key/value block followed by per-page text with
    /// `--- PAGE n ---` markers. Empty pages are marked, not omitted,
    /// so length heuristics downstream see the gap.
    pub local_text: String,
    /// Decoded XML of the XFA datasets packet, when the document is a
    /// dynamic form. The form template is deliberately never returned.
    pub xfa_datasets: Option<String>,
}

/// Extract all local signal from raw PDF bytes.
pub fn analyze_pdf(bytes: &[u8]) -> PdfSignal {
    let doc = match Document::load_from(Cursor::new(bytes)) {
        Ok(doc) => doc,
        Err(e) => {
            warn!("Local PDF parse failed: {}", e);
            return PdfSignal {
                page_count: 0,
                local_text: String::new(),
                xfa_datasets: None,
            };
        }
    };

    let page_count = doc.get_pages().len() as u32;
    let local_text = extract_local_text(&doc);
    let xfa_datasets = extract_xfa_datasets(&doc);

    debug!(
        "Local signal: {} pages, {} chars of text, xfa_datasets={}",
        page_count,
        local_text.len(),
        xfa_datasets.is_some()
    );

    PdfSignal {
        page_count,
        local_text,
        xfa_datasets,
    }
}

/// Build the combined local text: form fields first (key for editable
/// PDFs), then per-page text-layer content.
fn extract_local_text(doc: &Document) -> String {
    let mut parts: Vec<String> = Vec::new();

    let fields = extract_form_fields(doc);
    if !fields.is_empty() {
        parts.push(FORM_DATA_START.to_string());
        for (key, value) in fields {
            parts.push(format!("{}: {}", key, value));
        }
        parts.push(format!("{}\n", FORM_DATA_END));
    }

    for (page_num, _) in doc.get_pages() {
        parts.push(format!("--- PAGE {} ---", page_num));
        match doc.extract_text(&[page_num]) {
            Ok(text) if !text.trim().is_empty() => parts.push(text),
            Ok(_) => parts.push(EMPTY_PAGE_MARKER.to_string()),
            Err(e) => {
                warn!("Failed to extract text from page {}: {}", page_num, e);
                parts.push(EMPTY_PAGE_MARKER.to_string());
            }
        }
    }

    parts.join("\n")
}

/// Collect filled AcroForm text-field values as (name, value) pairs.
fn extract_form_fields(doc: &Document) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let Some(acroform) = acroform_dict(doc) else {
        return out;
    };

    if let Ok(fields) = acroform.get(b"Fields") {
        if let Object::Array(items) = resolve(doc, fields) {
            for item in items {
                collect_field(doc, resolve(doc, item), &mut out);
            }
        }
    }

    out
}

fn collect_field(doc: &Document, obj: &Object, out: &mut Vec<(String, String)>) {
    let Ok(dict) = obj.as_dict() else { return };

    let name = dict
        .get(b"T")
        .ok()
        .map(|t| resolve(doc, t))
        .and_then(object_to_text);

    if let (Some(name), Ok(value)) = (&name, dict.get(b"V")) {
        if let Some(value) = object_to_text(resolve(doc, value)) {
            if !value.trim().is_empty() {
                out.push((name.clone(), value));
            }
        }
    }

    if let Ok(kids) = dict.get(b"Kids") {
        if let Object::Array(items) = resolve(doc, kids) {
            for item in items {
                collect_field(doc, resolve(doc, item), out);
            }
        }
    }
}

/// Extract the XFA "datasets" packet as decoded XML.
///
/// XFA entries come as a flat `[name, stream, name, stream, ...]` array.
/// Only the datasets packet holds user-entered values; the template packet
/// is the empty form structure (often hundreds of KB) and is pure noise
/// for extraction, so it is skipped.
fn extract_xfa_datasets(doc: &Document) -> Option<String> {
    let acroform = acroform_dict(doc)?;
    let xfa = resolve(doc, acroform.get(b"XFA").ok()?);

    match xfa {
        Object::Array(items) => {
            for pair in items.chunks(2) {
                let [key_obj, value_obj] = pair else { continue };
                let Some(key) = object_to_text(resolve(doc, key_obj)) else {
                    continue;
                };
                if key != "datasets" {
                    continue;
                }
                if let Some(xml) = stream_to_xml(doc, value_obj) {
                    debug!("Extracted XFA datasets packet ({} bytes)", xml.len());
                    return Some(xml);
                }
            }
            None
        }
        // Single-stream XFA: the whole form in one packet.
        Object::Stream(_) | Object::Reference(_) => stream_to_xml(doc, xfa),
        _ => None,
    }
}

fn stream_to_xml(doc: &Document, obj: &Object) -> Option<String> {
    let stream = resolve(doc, obj).as_stream().ok()?;
    let data = stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone());
    let xml = String::from_utf8_lossy(&data).into_owned();
    // Require some substance; a near-empty packet carries no user data.
    if xml.len() > 100 {
        Some(xml)
    } else {
        None
    }
}

fn acroform_dict(doc: &Document) -> Option<&Dictionary> {
    let root = resolve(doc, doc.trailer.get(b"Root").ok()?);
    let root = root.as_dict().ok()?;
    resolve(doc, root.get(b"AcroForm").ok()?).as_dict().ok()
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

fn object_to_text(obj: &Object) -> Option<String> {
    match obj {
        Object::String(bytes, _) | Object::Name(bytes) => {
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
        _ => None,
    }
}


#[cfg(test)]
mod tests {
    use super::test_pdf::*;
    use super::*;

    #[test]
    fn unreadable_bytes_degrade_to_empty_signal() {
        let signal = analyze_pdf(b"definitely not a pdf");
        assert_eq!(signal.page_count, 0);
        assert!(signal.local_text.is_empty());
        assert!(signal.xfa_datasets.is_none());
    }

    #[test]
    fn page_count_and_markers() {
        let bytes = build_pdf(&["", "", ""]);
        let signal = analyze_pdf(&bytes);
        assert_eq!(signal.page_count, 3);
        assert!(signal.local_text.contains("--- PAGE 1 ---"));
        assert!(signal.local_text.contains("--- PAGE 3 ---"));
    }

    #[test]
    fn empty_pages_are_marked_not_omitted() {
        let bytes = build_pdf(&["", ""]);
        let signal = analyze_pdf(&bytes);
        assert_eq!(
            signal.local_text.matches(EMPTY_PAGE_MARKER).count(),
            2,
            "both scanned pages must carry the empty marker"
        );
    }

    #[test]
    fn form_fields_appear_as_key_value_lines() {
        let bytes = build_form_pdf(
            &[""],
            &[("InventionTitle", "Self-Sealing Widget"), ("AppNum", "17/123,456")],
        );
        let signal = analyze_pdf(&bytes);
        assert!(signal.local_text.starts_with(FORM_DATA_START));
        assert!(signal
            .local_text
            .contains("InventionTitle: Self-Sealing Widget"));
        assert!(signal.local_text.contains("AppNum: 17/123,456"));
        assert!(signal.local_text.contains(FORM_DATA_END));
    }

    #[test]
    fn blank_form_fields_are_skipped() {
        let bytes = build_form_pdf(&[""], &[("Title", "  "), ("AppNum", "17/1")]);
        let signal = analyze_pdf(&bytes);
        assert!(!signal.local_text.contains("Title:"));
        assert!(signal.local_text.contains("AppNum: 17/1"));
    }

    #[test]
    fn xfa_datasets_packet_is_returned_without_template() {
        let xml = format!(
            "<xfa:datasets><inventor><name>Jane Q. Inventor</name></inventor>{}</xfa:datasets>",
            "<pad>____________________________________________________</pad>"
        );
        let bytes = build_xfa_pdf(&[""], &xml);
        let signal = analyze_pdf(&bytes);
        let datasets = signal.xfa_datasets.expect("datasets packet expected");
        assert!(datasets.contains("Jane Q. Inventor"));
        assert!(!datasets.contains("layout noise"));
    }

    #[test]
    fn plain_pdf_has_no_xfa() {
        let bytes = build_pdf(&[""]);
        assert!(analyze_pdf(&bytes).xfa_datasets.is_none());
    }
}
