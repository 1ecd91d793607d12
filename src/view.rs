use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::profile::DisplayProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortKey {
    FullName,
    Specialty,
    Affiliation,
    Location,
    Degrees,
    Npi,
    Publications,
    Confidence,
    ResearchPrestigeScore,
    TotalTrials,
}

impl SortKey {
    /// Accepts the JSON field name in camelCase or snake_case.
    pub fn parse(s: &str) -> Option<Self> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "fullname" | "name" => Some(Self::FullName),
            "specialty" => Some(Self::Specialty),
            "affiliation" => Some(Self::Affiliation),
            "location" => Some(Self::Location),
            "degrees" => Some(Self::Degrees),
            "npi" => Some(Self::Npi),
            "publications" => Some(Self::Publications),
            "confidence" => Some(Self::Confidence),
            "researchprestigescore" => Some(Self::ResearchPrestigeScore),
            "totaltrials" => Some(Self::TotalTrials),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Sort {
    pub key: SortKey,
    pub direction: SortDirection,
}

/// Search term and sort selection for the profile table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ViewState {
    pub search: String,
    pub sort: Option<Sort>,
}

enum FieldValue<'a> {
    Text(&'a str),
    Number(f64),
}

impl ViewState {
    /// Selecting the active key flips direction; any other key starts ascending.
    pub fn select_sort(&mut self, key: SortKey) {
        self.sort = Some(match self.sort {
            Some(Sort { key: cur, direction }) if cur == key => Sort {
                key,
                direction: match direction {
                    SortDirection::Asc => SortDirection::Desc,
                    SortDirection::Desc => SortDirection::Asc,
                },
            },
            _ => Sort {
                key,
                direction: SortDirection::Asc,
            },
        });
    }

    pub fn set_search(&mut self, term: impl Into<String>) {
        self.search = term.into();
    }

    /// Filter then sort. The sort is stable, so ties keep their arrival order.
    pub fn apply<'a>(&self, profiles: &'a [DisplayProfile]) -> Vec<&'a DisplayProfile> {
        let needle = self.search.to_lowercase();
        let mut rows: Vec<&DisplayProfile> = profiles
            .iter()
            .filter(|p| matches_search(p, &needle))
            .collect();

        if let Some(sort) = self.sort {
            rows.sort_by(|a, b| {
                let ord = compare_field(field(a, sort.key), field(b, sort.key));
                match sort.direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            });
        }
        rows
    }
}

/// `needle` must already be lowercased.
fn matches_search(p: &DisplayProfile, needle: &str) -> bool {
    needle.is_empty()
        || [&p.full_name, &p.specialty, &p.affiliation]
            .iter()
            .any(|f| f.to_lowercase().contains(needle))
}

fn field(p: &DisplayProfile, key: SortKey) -> FieldValue<'_> {
    match key {
        SortKey::FullName => FieldValue::Text(&p.full_name),
        SortKey::Specialty => FieldValue::Text(&p.specialty),
        SortKey::Affiliation => FieldValue::Text(&p.affiliation),
        SortKey::Location => FieldValue::Text(&p.location),
        SortKey::Degrees => FieldValue::Text(&p.degrees),
        SortKey::Npi => FieldValue::Text(&p.npi),
        SortKey::Publications => FieldValue::Number(p.publications as f64),
        SortKey::Confidence => FieldValue::Number(f64::from(p.confidence)),
        SortKey::ResearchPrestigeScore => FieldValue::Number(p.research_prestige_score),
        SortKey::TotalTrials => FieldValue::Number(p.total_trials as f64),
    }
}

fn compare_field(a: FieldValue<'_>, b: FieldValue<'_>) -> Ordering {
    match (a, b) {
        (FieldValue::Text(a), FieldValue::Text(b)) => collate(a, b),
        (FieldValue::Number(a), FieldValue::Number(b)) => a.total_cmp(&b),
        _ => Ordering::Equal,
    }
}

// Case-folded comparison first so "adams" sorts next to "Adams"; the raw
// comparison only breaks exact case-insensitive ties.
fn collate(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
        .then_with(|| a.cmp(b))
}
