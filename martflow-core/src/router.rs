//! Branch decisions.
//!
//! Each function maps observed state to exactly one action from a closed set.
//! None of them mutate anything.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("unroutable state at '{decision}': {value:?} is not one of {expected:?}")]
    Unroutable {
        decision: &'static str,
        value: String,
        expected: Vec<&'static str>,
    },
}

/// Outcome of the source-file presence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFileRoute {
    UseExisting,
    Download,
}

/// `UseExisting` iff a file is already present at `path`.
pub fn route_source_file(path: &Path) -> SourceFileRoute {
    if path.is_file() {
        SourceFileRoute::UseExisting
    } else {
        SourceFileRoute::Download
    }
}

/// The closed set of product categories that have a mart branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    Furniture,
    #[serde(rename = "Office Supplies")]
    OfficeSupplies,
    Technology,
}

impl Category {
    pub const ALL: [Category; 3] = [
        Category::Furniture,
        Category::OfficeSupplies,
        Category::Technology,
    ];

    /// Name as stored in the core `category` table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Furniture => "Furniture",
            Category::OfficeSupplies => "Office Supplies",
            Category::Technology => "Technology",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = RouteError;

    /// Exact, case-sensitive match.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| RouteError::Unroutable {
                decision: "category",
                value: s.to_string(),
                expected: Category::ALL.iter().map(|c| c.as_str()).collect(),
            })
    }
}

/// The per-category mart action selected by the category branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryMart {
    FurnitureMart,
    OfficeMart,
    TechMart,
}

impl CategoryMart {
    pub fn category(&self) -> Category {
        match self {
            CategoryMart::FurnitureMart => Category::Furniture,
            CategoryMart::OfficeMart => Category::OfficeSupplies,
            CategoryMart::TechMart => Category::Technology,
        }
    }
}

impl From<Category> for CategoryMart {
    fn from(category: Category) -> Self {
        match category {
            Category::Furniture => CategoryMart::FurnitureMart,
            Category::OfficeSupplies => CategoryMart::OfficeMart,
            Category::Technology => CategoryMart::TechMart,
        }
    }
}

/// Map a published category name to its mart action.
pub fn route_category(category: &str) -> Result<CategoryMart, RouteError> {
    category.parse::<Category>().map(CategoryMart::from)
}

/// Pick one value uniformly over the DISTINCT values given.
///
/// Duplicates in `values` do not add weight. Returns `None` when empty.
pub fn pick_category<R: Rng + ?Sized>(values: &[String], rng: &mut R) -> Option<String> {
    let distinct: Vec<&String> = values.iter().collect::<BTreeSet<_>>().into_iter().collect();
    distinct.choose(rng).map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    #[test]
    fn every_category_routes_to_exactly_one_mart() {
        let routes: Vec<CategoryMart> = Category::ALL
            .iter()
            .map(|c| route_category(c.as_str()).unwrap())
            .collect();
        assert_eq!(
            routes,
            vec![
                CategoryMart::FurnitureMart,
                CategoryMart::OfficeMart,
                CategoryMart::TechMart
            ]
        );
        for (route, category) in routes.iter().zip(Category::ALL) {
            assert_eq!(route.category(), category);
        }
    }

    #[test]
    fn unknown_category_is_unroutable() {
        for bad in ["Toys", "furniture", "Office supplies", "", " Technology"] {
            let err = route_category(bad).unwrap_err();
            let RouteError::Unroutable { decision, value, .. } = err;
            assert_eq!(decision, "category");
            assert_eq!(value, bad);
        }
    }

    #[test]
    fn existing_file_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Sample_Superstore.csv");
        assert_eq!(route_source_file(&path), SourceFileRoute::Download);

        std::fs::write(&path, "a\n1\n").unwrap();
        assert_eq!(route_source_file(&path), SourceFileRoute::UseExisting);
    }

    #[test]
    fn directory_at_source_path_still_needs_download() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(route_source_file(dir.path()), SourceFileRoute::Download);
    }

    #[test]
    fn pick_is_not_weighted_by_duplicates() {
        let mut values = vec!["A".to_string(); 98];
        values.push("B".to_string());
        values.push("C".to_string());

        let mut rng = StdRng::seed_from_u64(7);
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..3000 {
            *counts.entry(pick_category(&values, &mut rng).unwrap()).or_default() += 1;
        }
        // Weighted by rows, A would win ~98% of the time.
        assert!(counts["A"] < 1300, "A picked {} times", counts["A"]);
        assert!(counts["B"] > 700);
        assert!(counts["C"] > 700);
    }

    #[test]
    fn pick_from_nothing_is_none() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(pick_category(&[], &mut rng), None);
    }
}
