//! Keyboard bindings per page.

use std::collections::BTreeMap;
use std::fmt;

use crate::page::Page;

/// Answer selection keys on the Demo and Test pages, in option order.
pub const ANSWER_KEYS: [char; 5] = ['a', 'b', 'c', 'd', 'e'];

/// The start key on the Instructions page.
pub const START_KEY: char = 's';

/// A key press, already decoded from the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Char(char),
    Enter,
    CtrlQ,
    CtrlC,
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Char(c) => write!(f, "{c}"),
            Key::Enter => f.write_str("<enter>"),
            Key::CtrlQ => f.write_str("C-q"),
            Key::CtrlC => f.write_str("C-c"),
        }
    }
}

/// What a bound key asks the session to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    StartDemo,
    StartTest,
    /// End the quiz from the Instructions page.
    EndQuiz,
    /// Leave the demo early.
    EndDemo,
    EndTest,
    /// Toggle the answer option at this index.
    ToggleAnswer(usize),
    /// Submit the current selection. An empty selection skips the question.
    SubmitAnswer,
}

/// Letter shown next to the option at `index`.
pub fn answer_key(index: usize) -> Option<char> {
    ANSWER_KEYS.get(index).copied()
}

/// The bindings installed for exactly one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerSet {
    page: Page,
    bindings: BTreeMap<Key, Action>,
}

impl HandlerSet {
    pub fn empty(page: Page) -> Self {
        Self {
            page,
            bindings: BTreeMap::new(),
        }
    }

    /// Build the binding table for `page`. The Instructions start key picks
    /// demo or test depending on `demo_taken`.
    pub fn for_page(page: Page, demo_taken: bool) -> Self {
        let mut set = Self::empty(page);
        match page {
            Page::Instructions => {
                let start = if demo_taken {
                    Action::StartTest
                } else {
                    Action::StartDemo
                };
                set.bind(Key::Char(START_KEY), start);
                set.bind(Key::CtrlQ, Action::EndQuiz);
                set.bind(Key::CtrlC, Action::EndQuiz);
            }
            Page::Demo | Page::Test => {
                for (index, c) in ANSWER_KEYS.iter().enumerate() {
                    set.bind(Key::Char(*c), Action::ToggleAnswer(index));
                }
                set.bind(Key::Enter, Action::SubmitAnswer);
                let end = if page == Page::Demo {
                    Action::EndDemo
                } else {
                    Action::EndTest
                };
                set.bind(Key::CtrlQ, end);
                set.bind(Key::CtrlC, end);
            }
            Page::Error | Page::Final => {}
        }
        set
    }

    fn bind(&mut self, key: Key, action: Action) {
        self.bindings.insert(key, action);
    }

    pub fn page(&self) -> Page {
        self.page
    }

    pub fn lookup(&self, key: Key) -> Option<Action> {
        self.bindings.get(&key).copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.bindings.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }
}
