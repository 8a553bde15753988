use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::validator::normalize;

/// A case as delivered by the case-loading side. Answer arrays are read
/// leniently: a non-sequence `answer_options` is treated as absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaseRecord {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub answer_options: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient_strings", skip_serializing_if = "Option::is_none")]
    pub answer_feedbacks: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient_strings", skip_serializing_if = "Option::is_none")]
    pub answer_short_tips: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient_index")]
    pub correct_answer_index: Option<i64>,
    /// Free-text answer key used by records authored before indices were stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
}

fn lenient_strings<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Array(items)) => Some(
            items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => s,
                    Value::Null => String::new(),
                    other => other.to_string(),
                })
                .collect(),
        ),
        _ => None,
    })
}

fn lenient_index<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

impl CaseRecord {
    pub fn options(&self) -> &[String] {
        self.answer_options.as_deref().unwrap_or_default()
    }

    /// Authored correct position, if it points inside the options.
    pub fn correct_position(&self) -> Option<usize> {
        self.correct_answer_index
            .and_then(|i| usize::try_from(i).ok())
            .filter(|i| *i < self.options().len())
    }

    pub fn answer_set(&self) -> Option<CaseAnswerSet> {
        let options = self.answer_options.as_ref()?;
        CaseAnswerSet::new(
            options,
            self.answer_feedbacks.as_deref().unwrap_or_default(),
            self.answer_short_tips.as_deref().unwrap_or_default(),
            self.correct_answer_index.and_then(|i| usize::try_from(i).ok()),
        )
    }

    /// Legacy free-text answer key. Records without one are graded by
    /// index only.
    pub fn correct_text(&self) -> Option<&str> {
        self.correct_answer.as_deref().filter(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerChoice {
    pub text: String,
    pub feedback: String,
    pub short_tip: String,
}

/// Answer choices in authoring order. `correct_index` is kept as given;
/// it may point past the end for malformed records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseAnswerSet {
    pub choices: Vec<AnswerChoice>,
    pub correct_index: Option<usize>,
}

impl CaseAnswerSet {
    /// Zips the three parallel sequences, padding missing feedbacks and tips
    /// with empty strings. Returns `None` when there are no options.
    pub fn new(
        options: &[String],
        feedbacks: &[String],
        short_tips: &[String],
        correct_index: Option<usize>,
    ) -> Option<Self> {
        if options.is_empty() {
            return None;
        }
        let choices = options
            .iter()
            .enumerate()
            .map(|(i, text)| AnswerChoice {
                text: text.clone(),
                feedback: feedbacks.get(i).cloned().unwrap_or_default(),
                short_tip: short_tips.get(i).cloned().unwrap_or_default(),
            })
            .collect();
        Some(Self {
            choices,
            correct_index,
        })
    }

    pub fn len(&self) -> usize {
        self.choices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    pub fn correct_choice(&self) -> Option<&AnswerChoice> {
        self.correct_index.and_then(|i| self.choices.get(i))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct LearnerStats {
    pub correct: u32,
    pub wrong: u32,
}

impl LearnerStats {
    pub fn record(&mut self, correct: bool) {
        if correct {
            self.correct += 1;
        } else {
            self.wrong += 1;
        }
    }

    pub fn correct_pct(&self) -> f64 {
        let total = self.correct + self.wrong;
        if total == 0 {
            0.0
        } else {
            (self.correct as f64) * 100.0 / (total as f64)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub issue: String,
}

/// Authoring-time checks applied on write. Reads never reject a record.
pub fn validate_case(case: &CaseRecord) -> Result<(), Vec<ValidationIssue>> {
    let mut issues = Vec::new();
    if case.id.trim().is_empty() {
        issues.push(ValidationIssue {
            field: "id".into(),
            issue: "must not be empty".into(),
        });
    }

    let options = match &case.answer_options {
        Some(options) if !options.is_empty() => options,
        _ => {
            issues.push(ValidationIssue {
                field: "answer_options".into(),
                issue: "must contain at least one option".into(),
            });
            return Err(issues);
        }
    };

    let mut seen = HashMap::new();
    for (i, opt) in options.iter().enumerate() {
        if opt.trim().is_empty() {
            issues.push(ValidationIssue {
                field: format!("answer_options[{i}]"),
                issue: "must not be empty".into(),
            });
            continue;
        }
        if let Some(first) = seen.insert(normalize(opt), i) {
            issues.push(ValidationIssue {
                field: format!("answer_options[{i}]"),
                issue: format!("reads the same as answer_options[{first}]"),
            });
        }
    }

    for (field, seq) in [
        ("answer_feedbacks", &case.answer_feedbacks),
        ("answer_short_tips", &case.answer_short_tips),
    ] {
        if let Some(seq) = seq {
            if seq.len() > options.len() {
                issues.push(ValidationIssue {
                    field: field.into(),
                    issue: "must not be longer than answer_options".into(),
                });
            }
        }
    }

    match case.correct_answer_index {
        None => issues.push(ValidationIssue {
            field: "correct_answer_index".into(),
            issue: "is required".into(),
        }),
        Some(_) if case.correct_position().is_none() => issues.push(ValidationIssue {
            field: "correct_answer_index".into(),
            issue: format!("must be between 0 and {}", options.len() - 1),
        }),
        Some(_) => {}
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}
