use std::fmt;

use serde::{Deserialize, Serialize};

/// Fixed extraction taxonomy for stage 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaxonomyCategory {
    Skill,
    Tool,
    Experience,
    Trait,
    Qualification,
    #[serde(rename = "Knowledge Area")]
    KnowledgeArea,
}

impl TaxonomyCategory {
    pub const ALL: [TaxonomyCategory; 6] = [
        TaxonomyCategory::Skill,
        TaxonomyCategory::Tool,
        TaxonomyCategory::Experience,
        TaxonomyCategory::Trait,
        TaxonomyCategory::Qualification,
        TaxonomyCategory::KnowledgeArea,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaxonomyCategory::Skill => "Skill",
            TaxonomyCategory::Tool => "Tool",
            TaxonomyCategory::Experience => "Experience",
            TaxonomyCategory::Trait => "Trait",
            TaxonomyCategory::Qualification => "Qualification",
            TaxonomyCategory::KnowledgeArea => "Knowledge Area",
        }
    }

    /// Lenient parse: case-insensitive, ignores spaces, `_` and `-`, accepts plurals.
    pub fn parse(s: &str) -> Option<Self> {
        let key = squash(s);
        let key = key.strip_suffix('s').unwrap_or(&key);
        Self::ALL
            .into_iter()
            .find(|c| squash(c.as_str()) == key)
    }

    /// Pillar used when the categorization stage produced nothing for this attribute.
    pub fn default_pillar(&self) -> FitPillar {
        match self {
            TaxonomyCategory::Skill | TaxonomyCategory::Tool => FitPillar::Technical,
            TaxonomyCategory::Experience | TaxonomyCategory::KnowledgeArea => FitPillar::Industry,
            TaxonomyCategory::Trait | TaxonomyCategory::Qualification => FitPillar::Process,
        }
    }
}

/// Axis along which an attribute's fit is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FitPillar {
    Industry,
    Process,
    Technical,
}

impl FitPillar {
    pub const ALL: [FitPillar; 3] = [FitPillar::Industry, FitPillar::Process, FitPillar::Technical];

    pub fn as_str(&self) -> &'static str {
        match self {
            FitPillar::Industry => "Industry",
            FitPillar::Process => "Process",
            FitPillar::Technical => "Technical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let key = squash(s);
        Self::ALL.into_iter().find(|p| squash(p.as_str()) == key)
    }
}

impl fmt::Display for FitPillar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display bucket. Declaration order is favorability order: `Grey < Yellow < Green`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeColor {
    Grey,
    Yellow,
    Green,
}

impl AttributeColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeColor::Grey => "grey",
            AttributeColor::Yellow => "yellow",
            AttributeColor::Green => "green",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match squash(s).as_str() {
            "green" => Some(AttributeColor::Green),
            "yellow" | "amber" => Some(AttributeColor::Yellow),
            "grey" | "gray" => Some(AttributeColor::Grey),
            _ => None,
        }
    }

    pub fn multiplier(&self) -> f64 {
        match self {
            AttributeColor::Green => 1.0,
            AttributeColor::Yellow => 0.65,
            AttributeColor::Grey => 0.0,
        }
    }
}

impl fmt::Display for AttributeColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage 1 output row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeCandidate {
    pub rank: u32,
    pub label: String,
    pub taxonomy_category: TaxonomyCategory,
    pub rationale: String,
}

/// Stage 2 output row. Rank and label are carried over from stage 1 untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorizedAttribute {
    pub rank: u32,
    pub label: String,
    pub previous_category: TaxonomyCategory,
    pub fit_pillar: FitPillar,
    pub rationale: String,
}

/// Stage 3 output row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinedAttribute {
    pub rank: u32,
    pub original_label: String,
    pub refined_label: String,
    pub fit_pillar: FitPillar,
    pub rationale: String,
}

/// Stage 4 output row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleRelevanceAttribute {
    pub independent_rank: u32,
    pub refined_label: String,
    pub relevance_score: u8,
    pub rationale: String,
}

/// A ranked, weighted, colorized attribute: one set per deal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalAttribute {
    pub attribute_name: String,
    pub pillar: FitPillar,
    pub jd_rank: u32,
    pub title_rank: u32,
    pub final_rank: u32,
    pub weight: u32,
    pub color: AttributeColor,
    pub multiplier: f64,
    pub weighted_score: u32,
}

/// Identity key for labels: lowercase alphanumerics, single spaces between words.
pub fn normalize_label(label: &str) -> String {
    label
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Display form: whitespace collapsed, wrapping quotes and trailing punctuation removed.
pub fn clean_label(label: &str) -> String {
    let collapsed = label.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '*' | '-' | '•'))
        .trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | ':'))
        .trim()
        .to_string()
}

fn squash(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_parse_is_lenient() {
        assert_eq!(TaxonomyCategory::parse("knowledge_area"), Some(TaxonomyCategory::KnowledgeArea));
        assert_eq!(TaxonomyCategory::parse("Knowledge Area"), Some(TaxonomyCategory::KnowledgeArea));
        assert_eq!(TaxonomyCategory::parse("TOOLS"), Some(TaxonomyCategory::Tool));
        assert_eq!(TaxonomyCategory::parse("hobby"), None);
    }

    #[test]
    fn test_taxonomy_serde_uses_display_names() {
        let json = serde_json::to_string(&TaxonomyCategory::KnowledgeArea).unwrap();
        assert_eq!(json, r#""Knowledge Area""#);
    }

    #[test]
    fn test_pillar_parse() {
        assert_eq!(FitPillar::parse(" technical "), Some(FitPillar::Technical));
        assert_eq!(FitPillar::parse("INDUSTRY"), Some(FitPillar::Industry));
        assert_eq!(FitPillar::parse("people"), None);
    }

    #[test]
    fn test_color_order_is_favorability() {
        assert!(AttributeColor::Green > AttributeColor::Yellow);
        assert!(AttributeColor::Yellow > AttributeColor::Grey);
        assert_eq!(AttributeColor::parse("Gray"), Some(AttributeColor::Grey));
    }

    #[test]
    fn test_color_serde_lowercase() {
        assert_eq!(serde_json::to_string(&AttributeColor::Green).unwrap(), r#""green""#);
    }

    #[test]
    fn test_normalize_label_ignores_case_and_punctuation() {
        assert_eq!(normalize_label("  CI/CD  Pipelines! "), "ci cd pipelines");
        assert_eq!(normalize_label("ci-cd pipelines"), normalize_label("CI/CD Pipelines"));
    }

    #[test]
    fn test_clean_label() {
        assert_eq!(clean_label("  \"Stakeholder   Management.\" "), "Stakeholder Management");
        assert_eq!(clean_label("- SQL"), "SQL");
    }
}
