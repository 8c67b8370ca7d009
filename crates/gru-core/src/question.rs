//! Questions streamed by the server and the local answer selection.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerOption {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    pub options: Vec<AnswerOption>,
    /// Score for a correct answer.
    #[serde(default)]
    pub positive: f64,
    /// Penalty for a wrong answer, as a positive number.
    #[serde(default)]
    pub negative: f64,
    /// More than one option may be correct.
    #[serde(default)]
    pub multiple: bool,
    /// Remaining quiz time as the server sees it, Go duration syntax.
    #[serde(default)]
    pub time_left: Option<String>,
}

impl Question {
    pub fn scoring_info(&self) -> String {
        let kind = if self.multiple {
            "Multiple answers may be correct."
        } else {
            "Exactly one answer is correct."
        };
        format!(
            "{kind}\n\nCorrect answer: +{:.1}\nWrong answer: -{:.1}\nSkip: 0.0",
            self.positive, self.negative
        )
    }
}

/// One item of a demo or test question stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionEvent {
    Question(Question),
    Score { total: f64, last: f64 },
    /// No more questions in this stream.
    End,
}

/// What the client sends back for a question. No answer ids means skip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerSubmission {
    pub question_id: String,
    pub answer_ids: Vec<String>,
}

impl AnswerSubmission {
    pub fn is_skip(&self) -> bool {
        self.answer_ids.is_empty()
    }
}

/// Selected option indices for the question on screen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    selected: BTreeSet<usize>,
}

impl Selection {
    /// Toggle option `index`. Single-answer questions keep at most one
    /// selection. Out-of-range indices are ignored; returns whether anything
    /// changed.
    pub fn toggle(&mut self, question: &Question, index: usize) -> bool {
        if index >= question.options.len() {
            return false;
        }
        if self.selected.remove(&index) {
            return true;
        }
        if !question.multiple {
            self.selected.clear();
        }
        self.selected.insert(index);
        true
    }

    pub fn is_selected(&self, index: usize) -> bool {
        self.selected.contains(&index)
    }

    pub fn clear(&mut self) {
        self.selected.clear();
    }

    pub fn submission(&self, question: &Question) -> AnswerSubmission {
        AnswerSubmission {
            question_id: question.id.clone(),
            answer_ids: self
                .selected
                .iter()
                .filter_map(|i| question.options.get(*i))
                .map(|o| o.id.clone())
                .collect(),
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_question(id: &str, multiple: bool) -> Question {
    Question {
        id: id.to_string(),
        text: format!("question {id}"),
        options: ["alpha", "beta", "gamma"]
            .iter()
            .enumerate()
            .map(|(i, t)| AnswerOption {
                id: format!("{id}-{i}"),
                text: (*t).to_string(),
            })
            .collect(),
        positive: 5.0,
        negative: 2.5,
        multiple,
        time_left: None,
    }
}
