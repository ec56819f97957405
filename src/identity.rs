use anyhow::{anyhow, Result};

use crate::models::PostingId;

/// Derives the posting id from the last path segment of its locator.
///
/// Query strings and fragments are ignored, as are trailing slashes, so
/// `https://www.finn.no/job/ad/123?ref=x` and `.../ad/123/` both resolve to 123.
pub fn resolve(locator: &str) -> Result<PostingId> {
    let without_fragment = locator.split('#').next().unwrap_or(locator);
    let path = without_fragment.split('?').next().unwrap_or(without_fragment);
    let segment = path
        .trim()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("");

    segment
        .parse::<PostingId>()
        .map_err(|_| anyhow!("No numeric id at the end of locator '{}'", locator))
}
