use crate::models::{AnswerChoice, CaseAnswerSet};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

/// One presentation order of a case's choices.
///
/// `options`, `feedbacks` and `short_tips` are permuted together. The value
/// is never modified after creation; a new view order means a new value.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShuffleResult {
    pub options: Vec<String>,
    pub feedbacks: Vec<String>,
    pub short_tips: Vec<String>,
    /// Position of the correct choice in this order. `None` when the
    /// authored index did not point at any choice; such a case is ungraded.
    pub correct_index: Option<usize>,
    #[serde(skip)]
    source_positions: Vec<usize>,
}

impl ShuffleResult {
    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn is_graded(&self) -> bool {
        self.correct_index.is_some()
    }

    /// Authoring-order index of the choice shown at `position`.
    pub fn original_index(&self, position: usize) -> Option<usize> {
        self.source_positions.get(position).copied()
    }

    pub fn choice_at(&self, position: usize) -> Option<AnswerChoice> {
        Some(AnswerChoice {
            text: self.options.get(position)?.clone(),
            feedback: self.feedbacks.get(position)?.clone(),
            short_tip: self.short_tips.get(position)?.clone(),
        })
    }
}

struct MarkedChoice<'a> {
    source: usize,
    choice: &'a AnswerChoice,
    is_correct: bool,
}

/// Shuffles parallel answer sequences. Missing feedbacks and tips are padded
/// with empty strings. Returns `None` for an empty option list.
pub fn shuffle_answers<R: Rng + ?Sized>(
    rng: &mut R,
    options: &[String],
    feedbacks: &[String],
    short_tips: &[String],
    correct_index: Option<usize>,
) -> Option<ShuffleResult> {
    let set = CaseAnswerSet::new(options, feedbacks, short_tips, correct_index)?;
    Some(shuffle_set(rng, &set))
}

/// Uniformly permutes the choices, then locates the correct one by its
/// marker rather than by following the swaps.
pub fn shuffle_set<R: Rng + ?Sized>(rng: &mut R, set: &CaseAnswerSet) -> ShuffleResult {
    let mut marked: Vec<MarkedChoice<'_>> = set
        .choices
        .iter()
        .enumerate()
        .map(|(i, choice)| MarkedChoice {
            source: i,
            choice,
            is_correct: Some(i) == set.correct_index,
        })
        .collect();
    marked.shuffle(rng);

    let correct_index = marked.iter().position(|m| m.is_correct);
    let mut result = ShuffleResult {
        options: Vec::with_capacity(marked.len()),
        feedbacks: Vec::with_capacity(marked.len()),
        short_tips: Vec::with_capacity(marked.len()),
        correct_index,
        source_positions: Vec::with_capacity(marked.len()),
    };
    for m in marked {
        result.options.push(m.choice.text.clone());
        result.feedbacks.push(m.choice.feedback.clone());
        result.short_tips.push(m.choice.short_tip.clone());
        result.source_positions.push(m.source);
    }
    result
}
