//! Request-level URL deduplication.
//!
//! Incoming URLs are partitioned by their normalized form: the first
//! occurrence of each key is checked, later occurrences are remembered and
//! answered by cloning the canonical result with their original `context`
//! and `url` put back.

use std::collections::{HashMap, HashSet};

use dashmap::DashMap;

use linkward_lib::normalized_url;

use crate::serialization::{UrlRequest, UrlStatusResponse};

#[derive(Debug, Default)]
pub struct Deduplicator {
    to_check: Vec<UrlRequest>,
    /// normalized URL -> the duplicates carrying their original requests
    to_duplicate: HashMap<String, Vec<UrlRequest>>,
    /// normalized URL -> canonical response, filled as results arrive
    responses: DashMap<String, UrlStatusResponse>,
}

impl Deduplicator {
    /// Partitions `urls` into the canonical list to check and the
    /// duplicates multimap.
    #[must_use]
    pub fn partition(urls: Vec<UrlRequest>) -> Self {
        let mut res = Self::default();
        let mut seen = HashSet::new();

        for request in urls {
            let key = normalized_url(&request.url);
            if seen.contains(&key) {
                res.to_duplicate.entry(key).or_default().push(request);
            } else {
                seen.insert(key);
                res.to_check.push(request);
            }
        }
        res
    }

    /// The canonical requests to fan out.
    #[must_use]
    pub fn to_check(&self) -> &[UrlRequest] {
        &self.to_check
    }

    /// Number of duplicates across all keys.
    #[must_use]
    pub fn duplicate_count(&self) -> usize {
        self.to_duplicate.values().map(Vec::len).sum()
    }

    /// Remembers a canonical result so duplicates can be answered later.
    pub fn on_response(&self, response: &UrlStatusResponse) {
        self.responses
            .insert(normalized_url(&response.url), response.clone());
    }

    /// The canonical result followed by the entries for its duplicates.
    #[must_use]
    pub fn deduplicated_results_for(&self, result: &UrlStatusResponse) -> Vec<UrlStatusResponse> {
        let mut res = vec![result.clone()];
        if let Some(duplicates) = self.to_duplicate.get(&normalized_url(&result.url)) {
            for original in duplicates {
                self.push_response_if_cached(original, &mut res);
            }
        }
        res
    }

    /// Appends the entries for every duplicate whose canonical result has
    /// arrived. Used by the batch aggregator at the end of a request.
    #[must_use]
    pub fn all_results_deduplicated(
        &self,
        mut results: Vec<UrlStatusResponse>,
    ) -> Vec<UrlStatusResponse> {
        for duplicates in self.to_duplicate.values() {
            for original in duplicates {
                self.push_response_if_cached(original, &mut results);
            }
        }
        results
    }

    fn push_response_if_cached(&self, original: &UrlRequest, out: &mut Vec<UrlStatusResponse>) {
        if let Some(cached) = self.responses.get(&normalized_url(&original.url)) {
            let mut response = cached.clone();
            response.context = original.context.clone();
            response.url = original.url.clone();
            out.push(response);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkward_lib::CheckResult;
    use pretty_assertions::assert_eq;

    fn request(context: &str, url: &str) -> UrlRequest {
        UrlRequest {
            context: context.to_owned(),
            url: url.to_owned(),
        }
    }

    #[test]
    fn test_equivalent_urls_collapse_to_one_check() {
        let dedup = Deduplicator::partition(vec![
            request("1", "https://google.com"),
            request("2", "https://google.com  "),
            request("3", "https://google.com/"),
        ]);
        assert_eq!(dedup.to_check().len(), 1);
        assert_eq!(dedup.duplicate_count(), 2);
    }

    #[test]
    fn test_distinct_urls_stay_separate() {
        let dedup = Deduplicator::partition(vec![
            request("1", "https://google.com/a"),
            request("2", "https://google.com/b"),
        ]);
        assert_eq!(dedup.to_check().len(), 2);
        assert_eq!(dedup.duplicate_count(), 0);
    }

    #[test]
    fn test_duplicates_inherit_result_with_their_own_identity() {
        let dedup = Deduplicator::partition(vec![
            request("1", "https://google.com"),
            request("2", "https://google.com/"),
        ]);
        let canonical = UrlStatusResponse::from_result(
            request("1", "https://google.com"),
            &CheckResult::ok(200),
        );
        dedup.on_response(&canonical);

        let all = dedup.deduplicated_results_for(&canonical);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].context, "1");
        assert_eq!(all[1].context, "2");
        assert_eq!(all[1].url, "https://google.com/");
        assert_eq!(all[0].fetched_at_epoch_seconds, all[1].fetched_at_epoch_seconds);
        assert_eq!(all[0].status, all[1].status);
    }

    #[test]
    fn test_unanswered_duplicates_are_left_out() {
        let dedup = Deduplicator::partition(vec![
            request("1", "https://google.com"),
            request("2", "https://google.com/"),
        ]);
        // no canonical response arrived
        let all = dedup.all_results_deduplicated(vec![]);
        assert!(all.is_empty());
    }
}
