//! Adaptive difficulty controller and per-question timer.
//!
//! This is the client-observable half of the assessment: a pure state
//! machine with no I/O. The driver feeds it answers and timer ticks; the
//! runner answers with what has to happen next (keep going, fetch another
//! batch at the current difficulty, or submit). Persistence flows through
//! `snapshot()` / `resume()` so an abandoned run restores the exact
//! countdown state instead of resetting timers.

use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::models::attempt::AttemptAnswer;

/// The assessment ends after exactly this many recorded answers.
pub const ASSESSMENT_LENGTH: usize = 10;
/// Countdown budget per question, in timer ticks.
pub const QUESTION_TIME_BUDGET: i32 = 60;
pub const MIN_DIFFICULTY: i32 = 1;
pub const MAX_DIFFICULTY: i32 = 10;
pub const STARTING_DIFFICULTY: i32 = 5;

/// Difficulty step rule: one up on a correct answer, one down on an
/// incorrect one, clamped to the 1..=10 scale.
pub fn next_difficulty(current: i32, correct: bool) -> i32 {
    let stepped = if correct { current + 1 } else { current - 1 };
    stepped.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
}

/// The slice of a question the controller needs to react to an answer.
#[derive(Debug, Clone)]
pub struct RunnerQuestion {
    pub question_id: ObjectId,
    pub correct_option_id: i32,
    pub difficulty: i32,
}

/// What the driver must do after feeding the runner an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerStep {
    /// Nothing to do; present the question at `current_index`.
    Continue,
    /// Working set exhausted before the answer target; assemble a new batch
    /// at this difficulty and `extend()` the runner with it.
    NeedsQuestions { difficulty: i32 },
    /// Answer target reached (or the last question timed out); submit.
    Submit { score: i32 },
}

/// Progress checkpoint, shaped exactly like the SaveProgress payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub answers: Vec<AttemptAnswer>,
    pub current_index: i32,
    pub time_left: Vec<i32>,
    pub time_taken: i32,
}

#[derive(Debug, Clone)]
pub struct QuizRunner {
    questions: Vec<RunnerQuestion>,
    answers: Vec<AttemptAnswer>,
    current_index: usize,
    difficulty: i32,
    time_left: Vec<i32>,
    time_taken: i32,
}

impl QuizRunner {
    pub fn new(questions: Vec<RunnerQuestion>) -> Self {
        let time_left = vec![QUESTION_TIME_BUDGET; questions.len()];
        Self {
            questions,
            answers: Vec::new(),
            current_index: 0,
            difficulty: STARTING_DIFFICULTY,
            time_left,
            time_taken: 0,
        }
    }

    /// Restore a run from persisted progress. The countdown array is trusted
    /// as-is when its length matches the working set; otherwise timers reset
    /// to the full budget (mirrors what happens when an attempt resumes with
    /// a stale snapshot).
    pub fn resume(questions: Vec<RunnerQuestion>, snapshot: ProgressSnapshot) -> Self {
        let count = questions.len();
        let time_left = if snapshot.time_left.len() == count {
            snapshot.time_left
        } else {
            vec![QUESTION_TIME_BUDGET; count]
        };
        let current_index = (snapshot.current_index.max(0) as usize).min(count.saturating_sub(1));
        let difficulty = questions
            .get(current_index)
            .map(|q| q.difficulty)
            .unwrap_or(STARTING_DIFFICULTY);
        Self {
            questions,
            answers: snapshot.answers,
            current_index,
            difficulty,
            time_left,
            time_taken: snapshot.time_taken.max(0),
        }
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn difficulty(&self) -> i32 {
        self.difficulty
    }

    pub fn answers(&self) -> &[AttemptAnswer] {
        &self.answers
    }

    /// Score over the answers recorded so far, from the working set's
    /// correct option ids.
    pub fn score(&self) -> i32 {
        self.answers
            .iter()
            .filter(|answer| {
                self.questions
                    .iter()
                    .find(|q| q.question_id == answer.question_id)
                    .is_some_and(|q| q.correct_option_id == answer.selected_option_id)
            })
            .count() as i32
    }

    /// Record an answer for the current question and decide what follows.
    pub fn record_answer(&mut self, selected_option_id: i32) -> RunnerStep {
        let Some(question) = self.questions.get(self.current_index) else {
            return RunnerStep::NeedsQuestions {
                difficulty: self.difficulty,
            };
        };

        let correct = question.correct_option_id == selected_option_id;
        self.answers.push(AttemptAnswer {
            question_id: question.question_id,
            selected_option_id,
        });

        if self.answers.len() >= ASSESSMENT_LENGTH {
            return RunnerStep::Submit { score: self.score() };
        }

        self.difficulty = next_difficulty(self.difficulty, correct);

        if self.current_index + 1 < self.questions.len() {
            self.current_index += 1;
            RunnerStep::Continue
        } else {
            RunnerStep::NeedsQuestions {
                difficulty: self.difficulty,
            }
        }
    }

    /// Append a freshly assembled batch to the working set. The run stays a
    /// single attempt; only the final answer set is scored and persisted.
    pub fn extend(&mut self, batch: Vec<RunnerQuestion>) {
        if batch.is_empty() {
            return;
        }
        self.time_left
            .extend(std::iter::repeat(QUESTION_TIME_BUDGET).take(batch.len()));
        let was_exhausted = self.current_index + 1 >= self.questions.len()
            && !self.questions.is_empty()
            && self.answered_current();
        self.questions.extend(batch);
        if was_exhausted {
            self.current_index += 1;
        }
    }

    fn answered_current(&self) -> bool {
        self.questions
            .get(self.current_index)
            .is_some_and(|question| {
                self.answers
                    .iter()
                    .any(|a| a.question_id == question.question_id)
            })
    }

    /// One timer tick: the active countdown drops by one and elapsed time
    /// rises in lock-step. At zero the run auto-advances, or submits when
    /// the last question has run dry. Countdowns never go negative.
    pub fn tick(&mut self) -> RunnerStep {
        let Some(remaining) = self.time_left.get_mut(self.current_index) else {
            return RunnerStep::Continue;
        };

        if *remaining > 0 {
            *remaining -= 1;
            self.time_taken += 1;
            return RunnerStep::Continue;
        }

        if self.current_index + 1 < self.questions.len() {
            self.current_index += 1;
            RunnerStep::Continue
        } else {
            RunnerStep::Submit { score: self.score() }
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            answers: self.answers.clone(),
            current_index: self.current_index as i32,
            time_left: self.time_left.clone(),
            time_taken: self.time_taken,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(correct: i32, difficulty: i32) -> RunnerQuestion {
        RunnerQuestion {
            question_id: ObjectId::new(),
            correct_option_id: correct,
            difficulty,
        }
    }

    fn batch(count: usize) -> Vec<RunnerQuestion> {
        (0..count).map(|_| question(0, 5)).collect()
    }

    #[test]
    fn difficulty_steps_up_on_correct_down_on_incorrect() {
        assert_eq!(next_difficulty(5, true), 6);
        assert_eq!(next_difficulty(6, true), 7);
        assert_eq!(next_difficulty(7, false), 6);
    }

    #[test]
    fn difficulty_clamps_at_bounds() {
        assert_eq!(next_difficulty(10, true), 10);
        assert_eq!(next_difficulty(1, false), 1);
    }

    #[test]
    fn runner_walks_difficulty_with_answers() {
        let mut runner = QuizRunner::new(batch(15));
        assert_eq!(runner.difficulty(), 5);
        runner.record_answer(0); // correct
        assert_eq!(runner.difficulty(), 6);
        runner.record_answer(0); // correct
        assert_eq!(runner.difficulty(), 7);
        runner.record_answer(1); // incorrect
        assert_eq!(runner.difficulty(), 6);
    }

    #[test]
    fn run_submits_after_exactly_ten_answers() {
        let mut runner = QuizRunner::new(batch(15));
        for i in 0..ASSESSMENT_LENGTH - 1 {
            assert_eq!(runner.record_answer(0), RunnerStep::Continue, "answer {}", i);
        }
        match runner.record_answer(1) {
            RunnerStep::Submit { score } => assert_eq!(score, 9),
            other => panic!("expected submit, got {:?}", other),
        }
        assert_eq!(runner.answers().len(), ASSESSMENT_LENGTH);
    }

    #[test]
    fn exhausted_working_set_requests_a_batch_at_current_difficulty() {
        let mut runner = QuizRunner::new(batch(3));
        runner.record_answer(0);
        runner.record_answer(0);
        match runner.record_answer(1) {
            // 5 -> 6 -> 7 -> 6 after the incorrect third answer
            RunnerStep::NeedsQuestions { difficulty } => assert_eq!(difficulty, 6),
            other => panic!("expected batch request, got {:?}", other),
        }

        runner.extend(batch(3));
        assert_eq!(runner.current_index(), 3);
        assert_eq!(runner.record_answer(0), RunnerStep::Continue);
        assert_eq!(runner.answers().len(), 4);
    }

    #[test]
    fn tick_counts_down_and_elapsed_rises_in_lock_step() {
        let mut runner = QuizRunner::new(batch(2));
        for _ in 0..5 {
            assert_eq!(runner.tick(), RunnerStep::Continue);
        }
        let snapshot = runner.snapshot();
        assert_eq!(snapshot.time_left[0], QUESTION_TIME_BUDGET - 5);
        assert_eq!(snapshot.time_left[1], QUESTION_TIME_BUDGET);
        assert_eq!(snapshot.time_taken, 5);
    }

    #[test]
    fn expired_question_auto_advances_and_last_question_submits() {
        let mut runner = QuizRunner::new(batch(2));
        for _ in 0..QUESTION_TIME_BUDGET {
            runner.tick();
        }
        assert_eq!(runner.current_index(), 0);
        // Budget is spent; the next tick advances instead of going negative.
        assert_eq!(runner.tick(), RunnerStep::Continue);
        assert_eq!(runner.current_index(), 1);
        assert_eq!(runner.snapshot().time_left[0], 0);

        for _ in 0..QUESTION_TIME_BUDGET {
            runner.tick();
        }
        match runner.tick() {
            RunnerStep::Submit { score } => assert_eq!(score, 0),
            other => panic!("expected submit, got {:?}", other),
        }
    }

    #[test]
    fn snapshot_resume_restores_exact_countdowns() {
        let questions = batch(4);
        let mut runner = QuizRunner::new(questions.clone());
        runner.tick();
        runner.tick();
        runner.record_answer(0);
        runner.tick();
        let snapshot = runner.snapshot();

        let resumed = QuizRunner::resume(questions, snapshot.clone());
        assert_eq!(resumed.snapshot(), snapshot);
        assert_eq!(resumed.current_index(), 1);
        assert_eq!(resumed.answers().len(), 1);
    }

    #[test]
    fn resume_with_stale_countdowns_resets_to_full_budget() {
        let questions = batch(3);
        let snapshot = ProgressSnapshot {
            answers: Vec::new(),
            current_index: 0,
            time_left: vec![10, 10], // wrong length
            time_taken: 50,
        };
        let resumed = QuizRunner::resume(questions, snapshot);
        assert_eq!(resumed.snapshot().time_left, vec![QUESTION_TIME_BUDGET; 3]);
    }

    #[test]
    fn score_recomputes_from_working_set() {
        let questions = vec![question(1, 5), question(2, 5), question(0, 5)];
        let mut runner = QuizRunner::new(questions);
        runner.record_answer(1); // correct
        runner.record_answer(3); // incorrect
        runner.record_answer(0); // correct
        assert_eq!(runner.score(), 2);
    }
}
