use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::Path;

use crate::models::{Posting, Status};

const RULE: &str = "--------------------------------------------------------------------------";

/// Renders the postings approved in this run as plain text, ready to paste
/// into a chat assistant for prioritising.
pub fn render(postings: &[Posting]) -> String {
    let mut out = String::new();
    out.push_str(
        "I am looking for a job. Please analyze these NEW job postings and prioritize them.\n",
    );
    out.push_str(&"=".repeat(RULE.len()));
    out.push_str("\n\n");

    for posting in postings {
        // Writing to a String cannot fail.
        let _ = write!(
            out,
            "JOB TITLE: {}\nCOMPANY: {}\nDEADLINE: {}\nLOCATION: {}\nLINK: {}\nDESCRIPTION:\n{}\n\n{}\n\n",
            posting.title,
            posting.employer,
            posting.deadline,
            posting.location,
            posting.link,
            posting.description,
            RULE
        );
    }
    out
}

/// Writes the digest of approved postings. Nothing is written (and an older
/// digest is left alone) when no posting awaits review. Returns how many
/// postings were written.
pub fn write_digest(path: &Path, postings: &[Posting]) -> Result<usize> {
    let pending: Vec<Posting> = postings
        .iter()
        .filter(|p| p.status == Status::NotSearched)
        .cloned()
        .collect();
    if pending.is_empty() {
        return Ok(0);
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::write(path, render(&pending))
        .with_context(|| format!("writing digest {}", path.display()))?;
    Ok(pending.len())
}
