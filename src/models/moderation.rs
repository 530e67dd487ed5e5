use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Confidence above which any single category denies the comment.
pub const DENY_THRESHOLD: Decimal = Decimal::from_parts(90, 0, 0, false, 2);

/// Label and code of the synthetic entry recorded when the engine refuses a prompt.
pub const BLOCKED_LABEL: &str = "blocked-by-api";
pub const BLOCKED_CODE: &str = "API_BLOCK";

/// The eight fixed harm categories, serialized by their short code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display)]
pub enum Category {
    #[strum(serialize = "S")]
    Sexual,
    #[strum(serialize = "S3")]
    SexualMinors,
    #[strum(serialize = "H")]
    Hate,
    #[strum(serialize = "H2")]
    HateThreatening,
    #[strum(serialize = "V")]
    Violence,
    #[strum(serialize = "V2")]
    ViolenceGraphic,
    #[strum(serialize = "HR")]
    Harassment,
    #[strum(serialize = "SH")]
    SelfHarm,
}

impl Category {
    /// Canonical order used in prompts and stored results.
    pub const ALL: [Category; 8] = [
        Category::Sexual,
        Category::SexualMinors,
        Category::Hate,
        Category::HateThreatening,
        Category::Violence,
        Category::ViolenceGraphic,
        Category::Harassment,
        Category::SelfHarm,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Category::Sexual => "sexual",
            Category::SexualMinors => "sexual/minors",
            Category::Hate => "hate",
            Category::HateThreatening => "hate/threatening",
            Category::Violence => "violence",
            Category::ViolenceGraphic => "violence/graphic",
            Category::Harassment => "harassment",
            Category::SelfHarm => "self-harm",
        }
    }

    pub fn code(self) -> String {
        self.to_string()
    }

    /// Position in [`Category::ALL`].
    pub fn ordinal(self) -> usize {
        Category::ALL
            .iter()
            .position(|c| *c == self)
            .unwrap_or(Category::ALL.len())
    }
}

/// Aggregate verdict for a comment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Denied,
    Block,
}

/// Score for a single category.
///
/// Confidence is kept as the exact decimal the engine wrote, so the threshold
/// comparison never sees a binary floating-point rounding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryScore {
    pub label: String,
    pub code: String,
    #[serde(default, with = "rust_decimal::serde::arbitrary_precision")]
    pub confidence: Decimal,
    #[serde(default)]
    pub matched_text: String,
}

/// Verdict persisted on a completed job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassificationResult {
    pub decision: Decision,
    pub categories: Vec<CategoryScore>,
}

impl ClassificationResult {
    /// Build a verdict from category scores, deriving the decision from them.
    pub fn from_scores(categories: Vec<CategoryScore>) -> Self {
        Self {
            decision: decide(&categories),
            categories,
        }
    }

    /// Synthetic verdict for a prompt the engine refused to process.
    pub fn blocked() -> Self {
        Self {
            decision: Decision::Block,
            categories: vec![CategoryScore {
                label: BLOCKED_LABEL.to_string(),
                code: BLOCKED_CODE.to_string(),
                confidence: Decimal::ZERO,
                matched_text: String::new(),
            }],
        }
    }

    pub fn max_confidence(&self) -> Decimal {
        self.categories
            .iter()
            .map(|c| c.confidence)
            .max()
            .unwrap_or(Decimal::ZERO)
    }
}

/// `Denied` if any category scores strictly above [`DENY_THRESHOLD`], otherwise `Allow`.
pub fn decide(categories: &[CategoryScore]) -> Decision {
    if categories.iter().any(|c| c.confidence > DENY_THRESHOLD) {
        Decision::Denied
    } else {
        Decision::Allow
    }
}
