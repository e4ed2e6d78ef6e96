//! Keyword-weighted intent classification.
//!
//! The classifier is a pure function of its [`KeywordTables`] and the query:
//! every keyword that occurs as a case-insensitive substring adds its weight to
//! its domain, and the domain with the strictly highest total wins. Ties and
//! queries that match nothing fall back to [`Domain::Activities`].
//!
//! ```rust
//! use travel_stream::domain::Domain;
//! use travel_stream::intent::IntentClassifier;
//!
//! let classifier = IntentClassifier::default();
//! assert_eq!(classifier.classify("dinner and a hotel room"), Domain::Lodging);
//! ```

use std::collections::BTreeMap;

use crate::domain::Domain;

/// Keyword → weight tables, one per domain.
#[derive(Debug, Clone)]
pub struct KeywordTables {
    tables: BTreeMap<Domain, BTreeMap<String, u32>>,
}

impl KeywordTables {
    /// Build tables from `(domain, [(keyword, weight)])` rows.
    pub fn from_rows<'a, I, K>(rows: I) -> Self
    where
        I: IntoIterator<Item = (Domain, K)>,
        K: IntoIterator<Item = (&'a str, u32)>,
    {
        let mut tables: BTreeMap<Domain, BTreeMap<String, u32>> = BTreeMap::new();
        for (domain, keywords) in rows {
            let table = tables.entry(domain).or_default();
            for (keyword, weight) in keywords {
                table.insert(keyword.to_lowercase(), weight);
            }
        }
        Self { tables }
    }

    fn score(&self, domain: Domain, lower_query: &str) -> u32 {
        self.tables.get(&domain).map_or(0, |table| {
            table
                .iter()
                .filter(|(keyword, _)| lower_query.contains(keyword.as_str()))
                .map(|(_, weight)| *weight)
                .sum()
        })
    }
}

impl Default for KeywordTables {
    fn default() -> Self {
        Self::from_rows([
            (
                Domain::Dining,
                vec![
                    ("restaurant", 3),
                    ("dinner", 3),
                    ("lunch", 3),
                    ("breakfast", 3),
                    ("brunch", 3),
                    ("food", 2),
                    ("eat", 2),
                    ("cuisine", 2),
                    ("cafe", 2),
                    ("coffee", 1),
                    ("drinks", 1),
                ],
            ),
            (
                Domain::Lodging,
                vec![
                    ("hotel", 3),
                    ("room", 3),
                    ("hostel", 3),
                    ("accommodation", 3),
                    ("airbnb", 3),
                    ("stay", 2),
                    ("sleep", 2),
                    ("lodging", 2),
                    ("resort", 2),
                ],
            ),
            (
                Domain::Activities,
                vec![
                    ("museum", 3),
                    ("activities", 3),
                    ("things to do", 3),
                    ("park", 2),
                    ("tour", 2),
                    ("hike", 2),
                    ("gallery", 2),
                    ("sightseeing", 2),
                    ("attraction", 2),
                    ("beach", 1),
                ],
            ),
            (
                Domain::Itinerary,
                vec![
                    ("itinerary", 3),
                    ("plan", 2),
                    ("schedule", 2),
                    ("trip", 1),
                    ("weekend", 1),
                    ("vacation", 1),
                ],
            ),
        ])
    }
}

/// Routes a free-text query to a [`Domain`].
#[derive(Debug, Clone, Default)]
pub struct IntentClassifier {
    tables: KeywordTables,
}

impl IntentClassifier {
    #[must_use]
    pub fn new(tables: KeywordTables) -> Self {
        Self { tables }
    }

    /// Per-domain keyword totals for `query`.
    #[must_use]
    pub fn scores(&self, query: &str) -> [(Domain, u32); 4] {
        let lower = query.to_lowercase();
        Domain::ALL.map(|domain| (domain, self.tables.score(domain, &lower)))
    }

    /// Classify `query`; deterministic for identical input.
    #[must_use]
    pub fn classify(&self, query: &str) -> Domain {
        let scores = self.scores(query);
        let best = scores.iter().map(|(_, s)| *s).max().unwrap_or(0);
        if best == 0 {
            return Domain::Activities;
        }

        let mut leaders = scores.iter().filter(|(_, s)| *s == best);
        match (leaders.next(), leaders.next()) {
            (Some((domain, _)), None) => *domain,
            _ => Domain::Activities,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_museums_and_parks_is_activities() {
        let classifier = IntentClassifier::default();
        assert_eq!(classifier.classify("best museums and parks"), Domain::Activities);
    }

    #[test]
    fn test_higher_total_wins() {
        let classifier = IntentClassifier::default();
        let scores = classifier.scores("dinner and a hotel room");
        assert!(scores.contains(&(Domain::Dining, 3)));
        assert!(scores.contains(&(Domain::Lodging, 6)));
        assert_eq!(classifier.classify("dinner and a hotel room"), Domain::Lodging);
    }

    #[test]
    fn test_case_insensitive() {
        let classifier = IntentClassifier::default();
        assert_eq!(classifier.classify("RESTAURANT near me"), Domain::Dining);
    }

    #[test]
    fn test_no_match_defaults_to_activities() {
        let classifier = IntentClassifier::default();
        assert_eq!(classifier.classify("xyzzy"), Domain::Activities);
        assert_eq!(classifier.classify(""), Domain::Activities);
    }

    #[test]
    fn test_tie_defaults_to_activities() {
        let tables = KeywordTables::from_rows([
            (Domain::Dining, vec![("alpha", 2)]),
            (Domain::Lodging, vec![("beta", 2)]),
        ]);
        let classifier = IntentClassifier::new(tables);
        assert_eq!(classifier.classify("alpha beta"), Domain::Activities);
        assert_eq!(classifier.classify("alpha"), Domain::Dining);
    }

    #[test]
    fn test_deterministic() {
        let classifier = IntentClassifier::default();
        let query = "plan a weekend trip with lunch and a museum";
        let first = classifier.classify(query);
        for _ in 0..50 {
            assert_eq!(classifier.classify(query), first);
        }
    }
}
