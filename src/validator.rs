use crate::models::CaseRecord;
use crate::shuffle::ShuffleResult;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

static PUNCTUATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\p{P}+").unwrap());

/// Canonical form used for free-text answer comparison: lowercase, no
/// diacritics, no punctuation, single spaces.
pub fn normalize(text: &str) -> String {
    let folded: String = text
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect();
    PUNCTUATION
        .replace_all(&folded, "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Index match is authoritative. Text is compared only when the indices
/// disagree and both sides carry non-empty text.
pub fn is_correct(
    selected_index: usize,
    selected_text: Option<&str>,
    correct_index: Option<usize>,
    correct_text: Option<&str>,
) -> bool {
    if correct_index == Some(selected_index) {
        return true;
    }
    match (selected_text, correct_text) {
        (Some(selected), Some(correct)) if !selected.is_empty() && !correct.is_empty() => {
            normalize(selected) == normalize(correct)
        }
        _ => false,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationInput {
    pub selected_index: usize,
    #[serde(default)]
    pub selected_text: Option<String>,
    #[serde(default)]
    pub correct_index: Option<usize>,
    #[serde(default)]
    pub correct_text: Option<String>,
}

impl ValidationInput {
    pub fn is_correct(&self) -> bool {
        is_correct(
            self.selected_index,
            self.selected_text.as_deref(),
            self.correct_index,
            self.correct_text.as_deref(),
        )
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Grade {
    pub correct: bool,
    pub correct_index: Option<usize>,
    pub original_index: Option<usize>,
}

/// Grades a selection made against `shuffle`, which must have been built
/// from `case`. The fallback comparison uses the option shown at the
/// selected position, never text supplied by the learner.
pub fn grade_selection(case: &CaseRecord, shuffle: &ShuffleResult, selected_index: usize) -> Grade {
    let shown_text = shuffle.options.get(selected_index).map(String::as_str);
    let correct = is_correct(
        selected_index,
        shown_text,
        shuffle.correct_index,
        case.correct_text(),
    );
    Grade {
        correct,
        correct_index: shuffle.correct_index,
        original_index: shuffle.original_index(selected_index),
    }
}

/// Whether text echoed back by a client names the option shown at `selected_index`.
pub fn matches_shown_option(shuffle: &ShuffleResult, selected_index: usize, text: &str) -> bool {
    shuffle
        .options
        .get(selected_index)
        .is_some_and(|shown| normalize(shown) == normalize(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shuffle::{shuffle_answers, shuffle_set};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn normalize_strips_case_accents_and_punctuation() {
        assert_eq!(normalize("Não!"), normalize("nao"));
        assert_eq!(normalize("  Derrame   Pleural. "), "derrame pleural");
        assert_eq!(normalize("Insuficiência cardíaca (IC)"), "insuficiencia cardiaca ic");
        assert_eq!(normalize("¿Qué?"), "que");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize(" \t\n"), "");
    }

    #[test]
    fn normalize_is_idempotent() {
        let samples = [
            "Não!",
            "  ÉCHOGRAPHIE   abdominale ",
            "Crème brûlée, s.v.p.",
            "İstanbul",
            "ﬁbrose — pulmonar",
            "a\u{0301}\u{0327}",
            "Ωmega; ΣΙΓΜΑ",
            "",
        ];
        for s in samples {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "input {s:?}");
        }
    }

    #[test]
    fn index_match_wins() {
        assert!(is_correct(2, Some("x"), Some(2), Some("y")));
        assert!(is_correct(0, None, Some(0), None));
    }

    #[test]
    fn text_fallback() {
        assert!(is_correct(1, Some("Derrame Pleural"), Some(0), Some("derrame pleural")));
        assert!(!is_correct(1, Some(""), Some(0), Some("")));
        assert!(!is_correct(1, None, Some(0), Some("derrame pleural")));
        assert!(!is_correct(1, Some("Asma"), Some(0), Some("Derrame pleural")));
    }

    #[test]
    fn ungraded_index_only_matches_by_text() {
        assert!(!is_correct(0, None, None, None));
        assert!(is_correct(0, Some("Asma"), None, Some("asma")));
    }

    #[test]
    fn validation_input_from_json() {
        let input: ValidationInput = serde_json::from_value(serde_json::json!({
            "selectedIndex": 1,
            "selectedText": "Não",
            "correctIndex": 0,
            "correctText": "nao"
        }))
        .unwrap();
        assert!(input.is_correct());
    }

    #[test]
    fn shuffled_case_grades_only_the_correct_position() {
        let case = CaseRecord {
            id: "abcd".into(),
            title: String::new(),
            prompt: String::new(),
            answer_options: Some(vec!["A".into(), "B".into(), "C".into(), "D".into()]),
            answer_feedbacks: None,
            answer_short_tips: None,
            correct_answer_index: Some(2),
            correct_answer: None,
        };
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let shuffle = shuffle_answers(
                &mut rng,
                case.options(),
                &[],
                &[],
                Some(2),
            )
            .unwrap();
            let position = shuffle.correct_index.unwrap();
            assert_eq!(shuffle.options[position], "C");

            for selected in 0..shuffle.len() {
                let grade = grade_selection(&case, &shuffle, selected);
                assert_eq!(grade.correct, selected == position);
                assert_eq!(grade.correct_index, Some(position));
            }
        }
    }

    #[test]
    fn legacy_text_key_grades_when_index_is_broken() {
        let case = CaseRecord {
            id: "legacy".into(),
            title: String::new(),
            prompt: String::new(),
            answer_options: Some(vec!["Pneumotórax".into(), "Derrame pleural".into()]),
            answer_feedbacks: None,
            answer_short_tips: None,
            correct_answer_index: Some(7),
            correct_answer: Some("DERRAME PLEURAL".into()),
        };
        let mut rng = StdRng::seed_from_u64(9);
        let shuffle = shuffle_set(&mut rng, &case.answer_set().unwrap());
        assert!(!shuffle.is_graded());
        let position = shuffle.options.iter().position(|o| o == "Derrame pleural").unwrap();
        assert!(grade_selection(&case, &shuffle, position).correct);
        assert!(!grade_selection(&case, &shuffle, 1 - position).correct);
    }

    #[test]
    fn learner_text_cannot_override_the_shown_option() {
        let case = CaseRecord {
            id: "abcd".into(),
            title: String::new(),
            prompt: String::new(),
            answer_options: Some(vec!["A".into(), "B".into(), "C".into(), "D".into()]),
            answer_feedbacks: None,
            answer_short_tips: None,
            correct_answer_index: Some(2),
            correct_answer: Some("C".into()),
        };
        let mut rng = StdRng::seed_from_u64(13);
        let shuffle = shuffle_set(&mut rng, &case.answer_set().unwrap());
        let position = shuffle.correct_index.unwrap();
        let wrong = (position + 1) % shuffle.len();

        assert!(!grade_selection(&case, &shuffle, wrong).correct);
        assert!(!matches_shown_option(&shuffle, wrong, "C"));
        assert!(matches_shown_option(&shuffle, position, " c. "));
        assert!(!matches_shown_option(&shuffle, 99, "C"));
    }

    #[test]
    fn exact_index_ignores_lookalike_options() {
        let case = CaseRecord {
            id: "lookalike".into(),
            title: String::new(),
            prompt: String::new(),
            answer_options: Some(vec![
                "Derrame pleural".into(),
                "Asma".into(),
                "Derrame pleural.".into(),
            ]),
            answer_feedbacks: None,
            answer_short_tips: None,
            correct_answer_index: Some(0),
            correct_answer: None,
        };
        for seed in 0..10 {
            let mut rng = StdRng::seed_from_u64(seed);
            let shuffle = shuffle_set(&mut rng, &case.answer_set().unwrap());
            let lookalike = (0..shuffle.len())
                .find(|p| shuffle.original_index(*p) == Some(2))
                .unwrap();
            assert!(!grade_selection(&case, &shuffle, lookalike).correct);
            assert!(grade_selection(&case, &shuffle, shuffle.correct_index.unwrap()).correct);
        }
    }
}
