//! Splitting a multi-page PDF into standalone page-range chunks.
//!
//! Each chunk is a self-contained, independently valid PDF (not a byte
//! slice) so it can be uploaded and analyzed on its own. Page ranges are
//! 1-indexed against the *original* document so merged output can cite
//! true page numbers.

use crate::error::ExtractError;
use lopdf::Document;
use std::io::Cursor;
use tracing::debug;

/// A contiguous page range of the source document as a standalone PDF.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Position in the ordered chunk sequence, 0-based.
    pub index: usize,
    /// First page covered, 1-indexed in the original document.
    pub start_page: u32,
    /// Last page covered, inclusive.
    pub end_page: u32,
    pub bytes: Vec<u8>,
}

/// Partition the document into contiguous non-overlapping windows of
/// `chunk_size_pages` pages (the last window may be shorter).
pub fn split_into_chunks(
    pdf_bytes: &[u8],
    chunk_size_pages: u32,
) -> Result<Vec<Chunk>, ExtractError> {
    if chunk_size_pages == 0 {
        return Err(ExtractError::Document("chunk size must be >= 1".into()));
    }

    let doc = Document::load_from(Cursor::new(pdf_bytes))
        .map_err(|e| ExtractError::Document(format!("failed to load PDF for chunking: {}", e)))?;
    let total_pages = doc.get_pages().len() as u32;
    if total_pages == 0 {
        return Err(ExtractError::Document("document has no pages".into()));
    }

    let mut chunks = Vec::new();
    let mut start_page = 1u32;
    while start_page <= total_pages {
        let end_page = (start_page + chunk_size_pages - 1).min(total_pages);
        let bytes = extract_page_range(&doc, start_page, end_page, total_pages)?;
        chunks.push(Chunk {
            index: chunks.len(),
            start_page,
            end_page,
            bytes,
        });
        start_page = end_page + 1;
    }

    debug!(
        "Split {} pages into {} chunks of up to {} pages",
        total_pages,
        chunks.len(),
        chunk_size_pages
    );

    Ok(chunks)
}

/// Build a standalone PDF containing only pages `start..=end`.
///
/// Construction by deletion: clone the document, delete everything outside
/// the window (in reverse so page numbers stay valid), then prune orphaned
/// objects so shared resources outside the range don't bloat every chunk.
fn extract_page_range(
    doc: &Document,
    start: u32,
    end: u32,
    total_pages: u32,
) -> Result<Vec<u8>, ExtractError> {
    let mut chunk_doc = doc.clone();

    let mut pages_to_delete: Vec<u32> = (1..=total_pages)
        .filter(|p| *p < start || *p > end)
        .collect();
    pages_to_delete.reverse();
    for page_num in pages_to_delete {
        chunk_doc.delete_pages(&[page_num]);
    }

    chunk_doc.prune_objects();
    chunk_doc.compress();

    let mut buffer = Vec::new();
    chunk_doc
        .save_to(&mut buffer)
        .map_err(|e| ExtractError::Document(format!("failed to serialize chunk: {}", e)))?;
    Ok(buffer)
}
