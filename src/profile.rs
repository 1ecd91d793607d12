use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::common::now_unix_millis;

const DEFAULT_CONFIDENCE: u32 = 80;

/// One record as returned by the enrichment backend. Every field is
/// optional and tolerant of the loose typing the backend produces
/// (numbers as strings, lists as comma-joined strings, nulls).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnrichmentResult {
    #[serde(deserialize_with = "lenient_text")]
    pub npi: Option<String>,
    #[serde(deserialize_with = "lenient_text", alias = "full_name")]
    pub full_name: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub specialty: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub affiliation: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub location: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub degrees: Option<String>,
    #[serde(deserialize_with = "lenient_pair")]
    pub social_media_handles: Option<SocialPair>,
    #[serde(deserialize_with = "lenient_pair")]
    pub followers: Option<SocialPair>,
    #[serde(deserialize_with = "lenient_tags")]
    pub top_interests: Option<Vec<String>>,
    #[serde(deserialize_with = "lenient_text")]
    pub recent_activity: Option<String>,
    #[serde(deserialize_with = "lenient_count")]
    pub publications: Option<u64>,
    #[serde(deserialize_with = "lenient_text")]
    pub engagement_style: Option<String>,
    #[serde(deserialize_with = "lenient_count")]
    pub confidence: Option<u64>,
    #[serde(deserialize_with = "lenient_text")]
    pub summary: Option<String>,

    #[serde(deserialize_with = "lenient_text")]
    pub gender: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub publication_years: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub top_publication_journals: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub top_publication_titles: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub journal_classification: Option<String>,
    #[serde(deserialize_with = "lenient_score")]
    pub research_prestige_score: Option<f64>,
    #[serde(deserialize_with = "lenient_text")]
    pub top_influential_publications: Option<String>,
    #[serde(deserialize_with = "lenient_count")]
    pub total_trials: Option<u64>,
    #[serde(deserialize_with = "lenient_count")]
    pub active_trials: Option<u64>,
    #[serde(deserialize_with = "lenient_count")]
    pub completed_trials: Option<u64>,
    #[serde(deserialize_with = "lenient_text")]
    pub conditions: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub interventions: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub roles: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub trial_involvement: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub leadership_roles: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub impact_summary: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub practice_city: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub practice_state: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub education: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub affiliations: Option<String>,
}

/// Twitter/LinkedIn pair used for both handles and follower counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SocialPair {
    pub twitter: String,
    pub linkedin: String,
}

/// The two shapes the backend answers with.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum EnrichmentResponse {
    List(Vec<Option<EnrichmentResult>>),
    Wrapped {
        profiles: Vec<Option<EnrichmentResult>>,
    },
}

impl EnrichmentResponse {
    pub fn parse(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }

    pub fn into_results(self) -> Vec<EnrichmentResult> {
        let items = match self {
            Self::List(items) => items,
            Self::Wrapped { profiles } => profiles,
        };
        items.into_iter().map(Option::unwrap_or_default).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum ProfileKey {
    Npi(u64),
    Generated(String),
}

impl ProfileKey {
    fn generated(now_millis: u128, index: usize, nonce: u32) -> Self {
        Self::Generated(format!("{now_millis}-{index}-{nonce:08x}"))
    }
}

impl fmt::Display for ProfileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Npi(n) => write!(f, "{n:010}"),
            Self::Generated(s) => f.write_str(s),
        }
    }
}

/// Render-ready record. Every field holds a concrete value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayProfile {
    #[serde(rename = "id")]
    pub key: ProfileKey,
    pub npi: String,
    pub full_name: String,
    pub specialty: String,
    pub affiliation: String,
    pub location: String,
    pub degrees: String,
    pub social_media_handles: SocialPair,
    pub followers: SocialPair,
    pub top_interests: Vec<String>,
    pub recent_activity: String,
    pub publications: u64,
    pub engagement_style: String,
    pub confidence: u32,
    pub summary: String,
    pub gender: String,
    pub publication_years: String,
    pub top_publication_journals: String,
    pub top_publication_titles: String,
    pub journal_classification: String,
    pub research_prestige_score: f64,
    pub top_influential_publications: String,
    pub total_trials: u64,
    pub active_trials: u64,
    pub completed_trials: u64,
    pub conditions: String,
    pub interventions: String,
    pub roles: String,
    pub trial_involvement: String,
    pub leadership_roles: String,
    pub impact_summary: String,
    pub practice_city: String,
    pub practice_state: String,
    pub education: String,
    pub affiliations: String,
}

/// Build exactly one display profile per returned result.
///
/// `submitted` is the identifier list sent to the backend. It only lends an
/// identifier to a result that does not echo one when the backend answered
/// one-to-one; a partial or reordered answer cannot be matched by position.
pub fn reconcile(submitted: &[String], results: Vec<EnrichmentResult>) -> Vec<DisplayProfile> {
    reconcile_at(submitted, results, now_unix_millis(), rand::random::<u32>)
}

fn reconcile_at(
    submitted: &[String],
    results: Vec<EnrichmentResult>,
    now_millis: u128,
    mut nonce: impl FnMut() -> u32,
) -> Vec<DisplayProfile> {
    let positional = submitted.len() == results.len();
    let mut used_keys = HashSet::with_capacity(results.len());

    results
        .into_iter()
        .enumerate()
        .map(|(i, r)| {
            let echoed = non_empty(r.npi.clone());
            let numeric = echoed
                .as_deref()
                .and_then(|n| n.parse::<u64>().ok())
                .map(ProfileKey::Npi)
                .filter(|k| !used_keys.contains(k));
            let key = numeric.unwrap_or_else(|| ProfileKey::generated(now_millis, i, nonce()));
            used_keys.insert(key.clone());

            let npi = echoed
                .or_else(|| submitted.get(i).filter(|_| positional).cloned())
                .unwrap_or_default();
            let full_name = non_empty(r.full_name).unwrap_or_else(|| {
                if npi.is_empty() {
                    format!("Profile {}", i + 1)
                } else {
                    format!("NPI {npi}")
                }
            });

            DisplayProfile {
                key,
                npi,
                full_name,
                specialty: r.specialty.unwrap_or_default(),
                affiliation: r.affiliation.unwrap_or_default(),
                location: r.location.unwrap_or_default(),
                degrees: r.degrees.unwrap_or_default(),
                social_media_handles: r.social_media_handles.unwrap_or_default(),
                followers: r.followers.unwrap_or_default(),
                top_interests: r.top_interests.unwrap_or_default(),
                recent_activity: r.recent_activity.unwrap_or_default(),
                publications: r.publications.unwrap_or_default(),
                engagement_style: r.engagement_style.unwrap_or_default(),
                confidence: r
                    .confidence
                    .filter(|c| *c > 0)
                    .map(|c| c.min(u64::from(u32::MAX)) as u32)
                    .unwrap_or(DEFAULT_CONFIDENCE),
                summary: r.summary.unwrap_or_default(),
                gender: r.gender.unwrap_or_default(),
                publication_years: r.publication_years.unwrap_or_default(),
                top_publication_journals: r.top_publication_journals.unwrap_or_default(),
                top_publication_titles: r.top_publication_titles.unwrap_or_default(),
                journal_classification: r.journal_classification.unwrap_or_default(),
                research_prestige_score: r.research_prestige_score.unwrap_or_default(),
                top_influential_publications: r.top_influential_publications.unwrap_or_default(),
                total_trials: r.total_trials.unwrap_or_default(),
                active_trials: r.active_trials.unwrap_or_default(),
                completed_trials: r.completed_trials.unwrap_or_default(),
                conditions: r.conditions.unwrap_or_default(),
                interventions: r.interventions.unwrap_or_default(),
                roles: r.roles.unwrap_or_default(),
                trial_involvement: r.trial_involvement.unwrap_or_default(),
                leadership_roles: r.leadership_roles.unwrap_or_default(),
                impact_summary: r.impact_summary.unwrap_or_default(),
                practice_city: r.practice_city.unwrap_or_default(),
                practice_state: r.practice_state.unwrap_or_default(),
                education: r.education.unwrap_or_default(),
                affiliations: r.affiliations.unwrap_or_default(),
            }
        })
        .collect()
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn value_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(number_text(n)),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(value_text).collect();
            Some(parts.join(", "))
        }
        Value::Null | Value::Object(_) => None,
    }
}

// `1234567890.0` reads as `1234567890`; fractional values keep their digits.
fn number_text(n: &serde_json::Number) -> String {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 9.0e15 => {
            format!("{}", f as i64)
        }
        _ => n.to_string(),
    }
}

fn value_count(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64)),
        Value::String(s) => {
            let s = s.trim().trim_end_matches('%');
            s.parse::<u64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && *f >= 0.0)
                    .map(|f| f.round() as u64)
            })
        }
        _ => None,
    }
}

fn lenient_text<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(d)?;
    Ok(v.as_ref().and_then(value_text))
}

fn lenient_count<'de, D>(d: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(d)?;
    Ok(v.as_ref().and_then(value_count))
}

fn lenient_score<'de, D>(d: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(d)?;
    Ok(match v {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|f| f.is_finite()))
}

fn lenient_tags<'de, D>(d: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(d)?;
    let tags = match v {
        Some(Value::Array(items)) => items.iter().filter_map(value_text).collect::<Vec<_>>(),
        Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
        _ => return Ok(None),
    };
    Ok(Some(
        tags.into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
    ))
}

fn lenient_pair<'de, D>(d: D) -> Result<Option<SocialPair>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(d)?;
    let Some(Value::Object(map)) = v else {
        return Ok(None);
    };
    let field = |name: &str| map.get(name).and_then(value_text).unwrap_or_default();
    Ok(Some(SocialPair {
        twitter: field("twitter"),
        linkedin: field("linkedin"),
    }))
}
