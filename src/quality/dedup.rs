//! Duplicate grouping over a result set.
//!
//! Results whose pairwise content similarity exceeds the threshold form a
//! group; exactly one representative per group survives — the first
//! encountered in input order, which is typically the highest-ranked.

use std::collections::HashSet;

use serde::Serialize;

use crate::search::SearchResult;

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup {
    pub original_index: usize,
    pub duplicate_indices: Vec<usize>,
    pub similarity: f32,
    pub representative_content: String,
}

pub fn find_duplicate_groups(results: &[SearchResult], threshold: f32) -> Vec<DuplicateGroup> {
    let mut groups = Vec::new();
    let mut claimed = vec![false; results.len()];

    for i in 0..results.len() {
        if claimed[i] {
            continue;
        }

        let mut duplicate_indices = Vec::new();
        let mut max_similarity = 0.0f32;
        for j in (i + 1)..results.len() {
            if claimed[j] {
                continue;
            }
            let similarity = content_similarity(&results[i].content, &results[j].content);
            if similarity > threshold {
                claimed[j] = true;
                duplicate_indices.push(j);
                max_similarity = max_similarity.max(similarity);
            }
        }

        if !duplicate_indices.is_empty() {
            groups.push(DuplicateGroup {
                original_index: i,
                duplicate_indices,
                similarity: max_similarity,
                representative_content: results[i].content.clone(),
            });
        }
    }

    groups
}

/// Drop every non-representative member of each group, preserving input
/// order for survivors.
pub fn remove_duplicates(results: &[SearchResult], groups: &[DuplicateGroup]) -> Vec<SearchResult> {
    let dropped: HashSet<usize> = groups
        .iter()
        .flat_map(|g| g.duplicate_indices.iter().copied())
        .collect();

    results
        .iter()
        .enumerate()
        .filter(|(i, _)| !dropped.contains(i))
        .map(|(_, r)| r.clone())
        .collect()
}

/// Jaccard similarity over lowercase word sets.
pub(crate) fn content_similarity(a: &str, b: &str) -> f32 {
    let set_a = word_set(a);
    let set_b = word_set(b);
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }

    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f32 / union as f32
}

fn word_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, content: &str) -> SearchResult {
        SearchResult {
            id: id.to_string(),
            chunk_id: format!("chunk-{id}"),
            document_id: format!("doc-{id}"),
            content: content.to_string(),
            metadata: Default::default(),
            semantic_score: 0.5,
            keyword_score: 0.0,
            relevance_score: 0.5,
            distance: 0.5,
            rank: 0,
        }
    }

    #[test]
    fn identical_content_forms_a_group() {
        let results = vec![
            result("a", "the quick brown fox jumps over the lazy dog"),
            result("b", "the quick brown fox jumps over the lazy dog"),
            result("c", "completely different subject matter entirely"),
        ];

        let groups = find_duplicate_groups(&results, 0.85);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].original_index, 0);
        assert_eq!(groups[0].duplicate_indices, vec![1]);
        assert!((groups[0].similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn first_encountered_survives() {
        let results = vec![
            result("a", "shared text body"),
            result("b", "shared text body"),
            result("c", "another passage"),
        ];

        let groups = find_duplicate_groups(&results, 0.85);
        let survivors = remove_duplicates(&results, &groups);
        assert_eq!(survivors.len(), 2);
        assert_eq!(survivors[0].id, "a");
        assert_eq!(survivors[1].id, "c");
    }

    #[test]
    fn dissimilar_results_form_no_groups() {
        let results = vec![
            result("a", "rust memory safety"),
            result("b", "gardening in spring"),
        ];
        assert!(find_duplicate_groups(&results, 0.85).is_empty());
    }

    #[test]
    fn similarity_is_symmetric_and_bounded() {
        let s1 = content_similarity("alpha beta gamma", "beta gamma delta");
        let s2 = content_similarity("beta gamma delta", "alpha beta gamma");
        assert!((s1 - s2).abs() < 1e-6);
        assert!(s1 > 0.0 && s1 < 1.0);
    }
}
