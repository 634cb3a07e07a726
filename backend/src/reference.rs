use std::fmt::{Display, Formatter};

use lazy_static::lazy_static;
use regex::Regex;

use crate::config::{ExtractorMode, MainConfig};

lazy_static! {
    static ref HASH_NUMBER: Regex = Regex::new(r"#([0-9]+)").unwrap();
    static ref DIGIT_RUN: Regex = Regex::new(r"\b[0-9]{5,}\b").unwrap();
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum MatchRule {
    OrderTag,
    HashNumber,
    DigitRun,
    TopupMarker,
}

impl Display for MatchRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            MatchRule::OrderTag => "order tag",
            MatchRule::HashNumber => "# + digits",
            MatchRule::DigitRun => "5+ digits",
            MatchRule::TopupMarker => "topup marker",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedReference {
    pub value: String,
    pub rule: MatchRule,
}

/**
Finds the order or user code a payer typed into the transfer memo.

One strategy is chosen per deployment: order codes (`DH12345`, `#12345`, a bare
run of digits) or a topup marker followed by the account number
(`NAPTIEN 7219600109`).
 */
#[derive(Debug)]
pub enum ReferenceExtractor {
    OrderCode { tagged: Option<Regex> },
    TopupMarker { marker: String },
}

impl ReferenceExtractor {
    pub fn from_config(config: &MainConfig) -> Result<Self, regex::Error> {
        match config.extractor {
            ExtractorMode::OrderCode => Self::order_code(&config.order_tags()[..]),
            ExtractorMode::TopupMarker => Ok(Self::topup_marker(&config.topup_marker)),
        }
    }

    pub fn order_code<S: AsRef<str>>(tags: &[S]) -> Result<Self, regex::Error> {
        let alternatives: Vec<String> = tags
            .iter()
            .map(|tag| {
                tag.as_ref()
                    .split_whitespace()
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(r"[\s-]?")
            })
            .filter(|tag| !tag.is_empty())
            .collect();

        let tagged = if alternatives.is_empty() {
            None
        } else {
            Some(Regex::new(&format!(
                r"(?i)\b(?:{})[\s:-]?([0-9]+)",
                alternatives.join("|")
            ))?)
        };

        Ok(Self::OrderCode { tagged })
    }

    pub fn topup_marker(marker: &str) -> Self {
        Self::TopupMarker {
            marker: marker.trim().to_uppercase(),
        }
    }

    pub fn extract(&self, content: &str) -> Option<ExtractedReference> {
        if content.trim().is_empty() {
            return None;
        }

        match self {
            ReferenceExtractor::OrderCode { tagged } => Self::extract_order_code(tagged.as_ref(), content),
            ReferenceExtractor::TopupMarker { marker } => {
                Self::extract_after_marker(marker, content).map(|value| ExtractedReference {
                    value,
                    rule: MatchRule::TopupMarker,
                })
            }
        }
    }

    fn extract_order_code(tagged: Option<&Regex>, content: &str) -> Option<ExtractedReference> {
        if let Some(captures) = tagged.and_then(|re| re.captures(content)) {
            return Some(ExtractedReference {
                value: captures[1].to_string(),
                rule: MatchRule::OrderTag,
            });
        }

        if let Some(captures) = HASH_NUMBER.captures(content) {
            return Some(ExtractedReference {
                value: captures[1].to_string(),
                rule: MatchRule::HashNumber,
            });
        }

        DIGIT_RUN.find(content).map(|m| ExtractedReference {
            value: m.as_str().to_string(),
            rule: MatchRule::DigitRun,
        })
    }

    fn extract_after_marker(marker: &str, content: &str) -> Option<String> {
        if marker.is_empty() {
            return None;
        }

        let upper = content.to_uppercase();
        let (_, rest) = upper.split_once(marker)?;
        let token = rest.split_whitespace().next()?;

        let digits: String = token.chars().filter(char::is_ascii_digit).collect();

        (!digits.is_empty()).then_some(digits)
    }
}
