//! Accept/reject workflow for new reference results
//!
//! Comparisons never write reference files themselves. They ask the review
//! policy for a [`Verdict`]; the policy either answers from a sticky
//! decision or asks a human through a [`ReviewPrompt`].

use std::collections::VecDeque;
use std::io::{BufRead, Write};

/// Standing decision for all pending reviews
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReviewDecision {
    /// Accept every new result
    AcceptAll,
    /// Reject every new result (batch mode)
    RejectAll,
    /// Ask for each result
    #[default]
    AskEachTime,
}

/// Verdict for one pending reference update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Write the new reference
    Accept,
    /// Keep the old reference
    Reject,
    /// A human has to decide
    NeedsHumanInput,
}

/// One answer to the review question
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    /// `y`
    Yes,
    /// `n`
    No,
    /// `Y`, yes for all remaining reviews
    YesToAll,
    /// `N`, no for all remaining reviews
    NoToAll,
}

impl Answer {
    /// Parse `y`, `n`, `Y` or `N`
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim() {
            "y" => Some(Self::Yes),
            "n" => Some(Self::No),
            "Y" => Some(Self::YesToAll),
            "N" => Some(Self::NoToAll),
            _ => None,
        }
    }

    /// True for `y` and `Y`
    #[must_use]
    pub const fn accepts(self) -> bool {
        matches!(self, Self::Yes | Self::YesToAll)
    }
}

/// Source of human answers
pub trait ReviewPrompt {
    /// Ask `question`; `None` means no answer can be obtained
    fn ask(&mut self, question: &str) -> Option<Answer>;
}

/// Prompt on the terminal, repeating until a valid answer is entered
#[derive(Debug, Default)]
pub struct StdinPrompt;

impl ReviewPrompt for StdinPrompt {
    fn ask(&mut self, question: &str) -> Option<Answer> {
        let stdin = std::io::stdin();
        let mut input = String::new();
        println!("{question}");
        loop {
            print!("             Enter: y(yes), n(no), Y(yes for all), N(no for all): ");
            let _ = std::io::stdout().flush();
            input.clear();
            match stdin.lock().read_line(&mut input) {
                Ok(0) | Err(_) => return None,
                Ok(_) => {
                    if let Some(answer) = Answer::parse(&input) {
                        return Some(answer);
                    }
                }
            }
        }
    }
}

/// Prompt that replays prepared answers
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    answers: VecDeque<Answer>,
    questions: Vec<String>,
}

impl ScriptedPrompt {
    /// Prompt answering with `answers` in order
    #[must_use]
    pub fn new(answers: impl IntoIterator<Item = Answer>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            questions: Vec::new(),
        }
    }

    /// Questions asked so far
    #[must_use]
    pub fn questions(&self) -> &[String] {
        &self.questions
    }
}

impl ReviewPrompt for ScriptedPrompt {
    fn ask(&mut self, question: &str) -> Option<Answer> {
        self.questions.push(question.to_string());
        self.answers.pop_front()
    }
}

/// Applies the sticky decision and asks the prompt when needed
pub struct ReviewPolicy {
    decision: ReviewDecision,
    prompt: Box<dyn ReviewPrompt + Send>,
}

impl std::fmt::Debug for ReviewPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReviewPolicy")
            .field("decision", &self.decision)
            .finish_non_exhaustive()
    }
}

impl ReviewPolicy {
    /// Policy with an explicit decision and prompt
    #[must_use]
    pub fn new(decision: ReviewDecision, prompt: Box<dyn ReviewPrompt + Send>) -> Self {
        Self { decision, prompt }
    }

    /// Batch mode: never write, never ask
    #[must_use]
    pub fn batch() -> Self {
        Self::new(ReviewDecision::RejectAll, Box::new(ScriptedPrompt::default()))
    }

    /// Interactive mode on the terminal
    #[must_use]
    pub fn interactive() -> Self {
        Self::new(ReviewDecision::AskEachTime, Box::new(StdinPrompt))
    }

    /// Current sticky decision
    #[must_use]
    pub const fn decision(&self) -> ReviewDecision {
        self.decision
    }

    /// Verdict implied by the sticky decision alone
    #[must_use]
    pub const fn verdict(&self) -> Verdict {
        match self.decision {
            ReviewDecision::AcceptAll => Verdict::Accept,
            ReviewDecision::RejectAll => Verdict::Reject,
            ReviewDecision::AskEachTime => Verdict::NeedsHumanInput,
        }
    }

    /// Resolve a pending update to `Accept` or `Reject`
    ///
    /// `Y` and `N` answers become the sticky decision. A prompt that cannot
    /// answer rejects this and every following update.
    pub fn resolve(&mut self, question: &str) -> Verdict {
        match self.verdict() {
            Verdict::NeedsHumanInput => {}
            decided => return decided,
        }
        let Some(answer) = self.prompt.ask(question) else {
            tracing::warn!("no answer available, rejecting remaining updates");
            self.decision = ReviewDecision::RejectAll;
            return Verdict::Reject;
        };
        match answer {
            Answer::YesToAll => self.decision = ReviewDecision::AcceptAll,
            Answer::NoToAll => self.decision = ReviewDecision::RejectAll,
            Answer::Yes | Answer::No => {}
        }
        if answer.accepts() {
            Verdict::Accept
        } else {
            Verdict::Reject
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answer_parse() {
        assert_eq!(Answer::parse("y\n"), Some(Answer::Yes));
        assert_eq!(Answer::parse("n"), Some(Answer::No));
        assert_eq!(Answer::parse("Y"), Some(Answer::YesToAll));
        assert_eq!(Answer::parse(" N "), Some(Answer::NoToAll));
        assert_eq!(Answer::parse("yes"), None);
    }

    #[test]
    fn test_batch_rejects_without_asking() {
        let mut policy = ReviewPolicy::batch();
        assert_eq!(policy.verdict(), Verdict::Reject);
        assert_eq!(policy.resolve("accept?"), Verdict::Reject);
    }

    #[test]
    fn test_accept_all() {
        let mut policy = ReviewPolicy::new(
            ReviewDecision::AcceptAll,
            Box::new(ScriptedPrompt::default()),
        );
        assert_eq!(policy.resolve("accept?"), Verdict::Accept);
    }

    #[test]
    fn test_single_answers_not_sticky() {
        let prompt = ScriptedPrompt::new([Answer::Yes, Answer::No]);
        let mut policy = ReviewPolicy::new(ReviewDecision::AskEachTime, Box::new(prompt));
        assert_eq!(policy.resolve("first"), Verdict::Accept);
        assert_eq!(policy.resolve("second"), Verdict::Reject);
        assert_eq!(policy.decision(), ReviewDecision::AskEachTime);
    }

    #[test]
    fn test_yes_to_all_sticky() {
        let prompt = ScriptedPrompt::new([Answer::YesToAll]);
        let mut policy = ReviewPolicy::new(ReviewDecision::AskEachTime, Box::new(prompt));
        assert_eq!(policy.resolve("first"), Verdict::Accept);
        assert_eq!(policy.decision(), ReviewDecision::AcceptAll);
        // no answers left, but none are needed
        assert_eq!(policy.resolve("second"), Verdict::Accept);
    }

    #[test]
    fn test_no_to_all_sticky() {
        let prompt = ScriptedPrompt::new([Answer::NoToAll]);
        let mut policy = ReviewPolicy::new(ReviewDecision::AskEachTime, Box::new(prompt));
        assert_eq!(policy.resolve("first"), Verdict::Reject);
        assert_eq!(policy.resolve("second"), Verdict::Reject);
        assert_eq!(policy.decision(), ReviewDecision::RejectAll);
    }

    #[test]
    fn test_exhausted_prompt_rejects() {
        let mut policy = ReviewPolicy::new(
            ReviewDecision::AskEachTime,
            Box::new(ScriptedPrompt::default()),
        );
        assert_eq!(policy.resolve("q"), Verdict::Reject);
        assert_eq!(policy.decision(), ReviewDecision::RejectAll);
    }

    #[test]
    fn test_scripted_prompt_records_questions() {
        let mut prompt = ScriptedPrompt::new([Answer::Yes]);
        let _ = prompt.ask("Create new file?");
        assert_eq!(prompt.questions(), ["Create new file?".to_string()]);
    }
}
