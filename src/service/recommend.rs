//! Recommendation synthesis from topics, entities and insights.

use std::collections::HashMap;

use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct Recommendations {
    /// Alternative phrasings of the query, derived from top topics.
    pub alternative_queries: Vec<String>,
    pub related_entities: Vec<String>,
    pub follow_up_questions: Vec<String>,
}

pub fn build_recommendations(
    query: &str,
    topics: &[String],
    entity_mentions: &HashMap<String, u32>,
    insights: &[String],
) -> Recommendations {
    let query_lower = query.to_lowercase();

    let alternative_queries: Vec<String> = topics
        .iter()
        .filter(|topic| !query_lower.contains(topic.as_str()))
        .take(3)
        .map(|topic| format!("{query} {topic}"))
        .collect();

    let mut ranked_entities: Vec<(&String, &u32)> = entity_mentions.iter().collect();
    ranked_entities.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    let related_entities: Vec<String> = ranked_entities
        .iter()
        .filter(|(name, _)| !query_lower.contains(&name.to_lowercase()))
        .take(5)
        .map(|(name, _)| (*name).clone())
        .collect();

    let mut follow_up_questions: Vec<String> = related_entities
        .iter()
        .take(2)
        .map(|entity| format!("How does {entity} relate to {query}?"))
        .collect();
    if let Some(insight) = insights.first() {
        follow_up_questions.push(format!("Can you elaborate on \"{insight}\"?"));
    }

    Recommendations {
        alternative_queries,
        related_entities,
        follow_up_questions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_already_in_query_are_skipped() {
        let topics = vec!["caching".to_string(), "eviction".to_string()];
        let recs = build_recommendations("caching strategies", &topics, &HashMap::new(), &[]);
        assert_eq!(recs.alternative_queries.len(), 1);
        assert!(recs.alternative_queries[0].contains("eviction"));
    }

    #[test]
    fn entities_rank_by_mention_count() {
        let mut mentions = HashMap::new();
        mentions.insert("Tokio".to_string(), 5);
        mentions.insert("Serde".to_string(), 2);
        let recs = build_recommendations("rust crates", &[], &mentions, &[]);
        assert_eq!(recs.related_entities[0], "Tokio");
        assert_eq!(recs.follow_up_questions.len(), 2);
        assert!(recs.follow_up_questions[0].contains("Tokio"));
    }

    #[test]
    fn insights_produce_a_follow_up() {
        let insights = vec!["The cache evicts by recency.".to_string()];
        let recs = build_recommendations("cache", &[], &HashMap::new(), &insights);
        assert_eq!(recs.follow_up_questions.len(), 1);
        assert!(recs.follow_up_questions[0].contains("evicts by recency"));
    }
}
