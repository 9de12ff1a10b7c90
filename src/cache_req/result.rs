/// Per-domain results and bounded views over them
use crate::store::IdentityRecord;
use serde::Serialize;

/// Records one domain produced for a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheRequestResult {
    pub domain: String,
    pub records: Vec<IdentityRecord>,
    /// Input name after the domain's normalisation, for name-keyed requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lookup_name: Option<String>,
}

impl CacheRequestResult {
    pub fn new(domain: &str, records: Vec<IdentityRecord>, lookup_name: Option<String>) -> Self {
        Self {
            domain: domain.to_string(),
            records,
            lookup_name,
        }
    }

    /// "Not found in this domain"
    pub fn empty(domain: &str, lookup_name: Option<String>) -> Self {
        Self::new(domain, Vec::new(), lookup_name)
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn as_limited(&self) -> LimitedResult<'_> {
        copy_limited(self, 0, 0)
    }
}

/// Read-only window over a result's records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LimitedResult<'a> {
    pub domain: &'a str,
    pub records: &'a [IdentityRecord],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lookup_name: Option<&'a str>,
}

impl<'a> LimitedResult<'a> {
    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn to_owned_result(&self) -> CacheRequestResult {
        CacheRequestResult::new(
            self.domain,
            self.records.to_vec(),
            self.lookup_name.map(str::to_string),
        )
    }
}

/// Records `[start, start + limit)` of `result`
///
/// `limit == 0` means no upper bound. A `start` past the end yields an empty
/// view rather than an error.
pub fn copy_limited(result: &CacheRequestResult, start: usize, limit: usize) -> LimitedResult<'_> {
    let total = result.records.len();
    let begin = start.min(total);
    let end = if limit == 0 {
        total
    } else {
        begin.saturating_add(limit).min(total)
    };

    LimitedResult {
        domain: &result.domain,
        records: &result.records[begin..end],
        lookup_name: result.lookup_name.as_deref(),
    }
}

/// Page over several domain results as if they were one sequence
///
/// Domain order is kept; domains with nothing left in the window are
/// dropped from the output.
pub fn page(results: &[CacheRequestResult], start: usize, limit: usize) -> Vec<LimitedResult<'_>> {
    let mut skip = start;
    let mut remaining = if limit == 0 { usize::MAX } else { limit };
    let mut out = Vec::new();

    for result in results {
        if remaining == 0 {
            break;
        }
        if skip >= result.count() {
            skip -= result.count();
            continue;
        }

        let view = copy_limited(result, skip, remaining.min(result.count()));
        skip = 0;
        remaining -= view.count();
        out.push(view);
    }

    out
}
