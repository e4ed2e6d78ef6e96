//! Category membership table and domain projections.

use std::collections::HashMap;

use super::{Domain, Poi};

/// Maps a normalized POI category to the single domain it belongs to.
///
/// Because each category maps to at most one domain, the lodging, dining and
/// activities projections of any POI list are pairwise disjoint.
#[derive(Debug, Clone)]
pub struct CategoryTable {
    members: HashMap<String, Domain>,
}

const LODGING: &[&str] = &[
    "hotel",
    "hostel",
    "motel",
    "guesthouse",
    "guest house",
    "bed and breakfast",
    "resort",
    "apartment",
    "inn",
    "lodging",
    "accommodation",
];

const DINING: &[&str] = &[
    "restaurant",
    "cafe",
    "café",
    "bar",
    "pub",
    "bistro",
    "bakery",
    "diner",
    "food",
    "street food",
    "dining",
    "wine bar",
];

const ACTIVITIES: &[&str] = &[
    "museum",
    "park",
    "attraction",
    "landmark",
    "monument",
    "gallery",
    "tour",
    "beach",
    "nature",
    "viewpoint",
    "historic site",
    "shopping",
    "entertainment",
    "activity",
    "market",
];

impl Default for CategoryTable {
    fn default() -> Self {
        let mut table = Self {
            members: HashMap::new(),
        };
        for (domain, categories) in [
            (Domain::Lodging, LODGING),
            (Domain::Dining, DINING),
            (Domain::Activities, ACTIVITIES),
        ] {
            for category in categories {
                table.insert(category, domain);
            }
        }
        table
    }
}

impl CategoryTable {
    /// Create an empty table.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            members: HashMap::new(),
        }
    }

    /// Assign `category` to `domain`, replacing any previous assignment.
    ///
    /// [`Domain::Itinerary`] is not a projection target and is ignored.
    pub fn insert(&mut self, category: &str, domain: Domain) {
        if domain == Domain::Itinerary {
            return;
        }
        self.members.insert(normalize(category), domain);
    }

    /// Domain the category belongs to, if any.
    #[must_use]
    pub fn domain_of(&self, category: &str) -> Option<Domain> {
        self.members.get(&normalize(category)).copied()
    }

    /// Whether `poi` belongs to the projection for `domain`.
    #[must_use]
    pub fn contains(&self, domain: Domain, poi: &Poi) -> bool {
        match domain {
            Domain::Itinerary => true,
            _ => self.domain_of(&poi.category) == Some(domain),
        }
    }
}

fn normalize(category: &str) -> String {
    category.trim().to_lowercase()
}

/// Project a unified POI set onto `domain`.
///
/// The itinerary projection is the whole set; the other three keep only the
/// POIs whose category the table assigns to that domain, preserving order.
#[must_use]
pub fn project(table: &CategoryTable, pois: &[Poi], domain: Domain) -> Vec<Poi> {
    pois.iter()
        .filter(|poi| table.contains(domain, poi))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fixtures::poi;

    fn sample() -> Vec<Poi> {
        vec![
            poi("1", "Hotel"),
            poi("2", "restaurant"),
            poi("3", " Museum "),
            poi("4", "Cafe"),
            poi("5", "spaceport"),
            poi("6", "park"),
        ]
    }

    #[test]
    fn test_projection_partitions_pois() {
        let table = CategoryTable::default();
        let pois = sample();

        let projections = [Domain::Lodging, Domain::Dining, Domain::Activities]
            .map(|d| project(&table, &pois, d));

        for p in &pois {
            let memberships = projections
                .iter()
                .filter(|proj| proj.iter().any(|q| q.id == p.id))
                .count();
            assert!(memberships <= 1, "{} appears in {memberships} projections", p.id);
        }

        let ids = |v: &Vec<Poi>| v.iter().map(|p| p.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&projections[0]), vec!["1"]);
        assert_eq!(ids(&projections[1]), vec!["2", "4"]);
        assert_eq!(ids(&projections[2]), vec!["3", "6"]);
    }

    #[test]
    fn test_itinerary_projection_is_everything() {
        let table = CategoryTable::default();
        let pois = sample();
        assert_eq!(project(&table, &pois, Domain::Itinerary).len(), pois.len());
    }

    #[test]
    fn test_reassignment_keeps_partition() {
        let mut table = CategoryTable::default();
        table.insert("Bar", Domain::Activities);
        assert_eq!(table.domain_of("bar"), Some(Domain::Activities));
        assert!(!table.contains(Domain::Dining, &poi("x", "bar")));
    }

    #[test]
    fn test_default_tables_do_not_overlap() {
        let all: Vec<&str> = LODGING.iter().chain(DINING).chain(ACTIVITIES).copied().collect();
        let unique: std::collections::HashSet<_> = all.iter().map(|c| normalize(c)).collect();
        assert_eq!(all.len(), unique.len());
    }
}
