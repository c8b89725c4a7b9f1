//! # Classifier
//!
//! Rule-based duplicate classification. Rules are evaluated in order; the
//! first unambiguous verdict wins, ambiguous verdicts are remembered while
//! later rules get a chance, and rules that do not apply are skipped.
//!
//! Scores follow one sign convention:
//! - `NaN`: the rule does not apply to the pair
//! - `s >= 0`: duplicate with confidence `s`
//! - `s < 0` (including `-0.0`): non-duplicate with confidence `|s|`

use crate::error::DedupeError;
use crate::model::{Candidate, ClassificationResult};
use crate::similarity::{BoxedMeasure, SimilarityContext, SimilarityMeasure, SimilarityMeasureExt};
use anyhow::Context;
use rustc_hash::FxHashSet;
use std::fmt;
use std::hash::Hash;
use tracing::trace;

/// Name given to the rule added through [`RuleBasedClassifierBuilder::default_rule`].
pub const DEFAULT_RULE_NAME: &str = "default";

/// Assigns a verdict to a candidate pair.
pub trait Classifier<T> {
    fn classify(&self, candidate: &Candidate<T>) -> Result<ClassificationResult, DedupeError>;
}

impl<T, F> Classifier<T> for F
where
    F: Fn(&Candidate<T>) -> Result<ClassificationResult, DedupeError>,
{
    fn classify(&self, candidate: &Candidate<T>) -> Result<ClassificationResult, DedupeError> {
        self(candidate)
    }
}

/// How an applicable score is turned into a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Sign of the score decides between duplicate and non-duplicate.
    Scored,
    /// Non-negative scores become possible duplicates.
    Possible,
}

/// A named similarity measure with its verdict mapping.
pub struct Rule<T: ?Sized> {
    name: String,
    measure: BoxedMeasure<T>,
    verdict: Verdict,
}

impl<T: ?Sized + 'static> Rule<T> {
    pub fn new<M>(name: impl Into<String>, measure: M) -> Self
    where
        M: SimilarityMeasure<T> + 'static,
    {
        Self {
            name: name.into(),
            measure: BoxedMeasure::new(measure),
            verdict: Verdict::Scored,
        }
    }

    /// A rule whose applicable non-negative scores are possible duplicates.
    pub fn possible<M>(name: impl Into<String>, measure: M) -> Self
    where
        M: SimilarityMeasure<T> + 'static,
    {
        Self {
            verdict: Verdict::Possible,
            ..Self::new(name, measure)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    pub fn score(&self, left: &T, right: &T, context: &mut SimilarityContext) -> anyhow::Result<f64> {
        self.measure
            .similarity(left, right, context)
            .with_context(|| format!("rule `{}` failed", self.name))
    }

    /// Map a score to a result; `None` when the rule does not apply.
    pub fn interpret(&self, score: f64) -> Option<ClassificationResult> {
        if score.is_nan() {
            return None;
        }
        let result = if score.is_sign_negative() {
            ClassificationResult::non_duplicate(-score)
        } else {
            match self.verdict {
                Verdict::Scored => ClassificationResult::duplicate(score),
                Verdict::Possible => ClassificationResult::possible_duplicate(score),
            }
        };
        Some(result.with_explanation(self.name.clone()))
    }
}

impl<T: ?Sized> fmt::Debug for Rule<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("verdict", &self.verdict)
            .finish_non_exhaustive()
    }
}

type ContextFactory = Box<dyn Fn() -> SimilarityContext + Send + Sync>;

/// Ordered list of rules reduced to a single verdict.
pub struct RuleBasedClassifier<T> {
    rules: Vec<Rule<T>>,
    default_result: ClassificationResult,
    context_factory: ContextFactory,
}

impl<T: fmt::Debug + 'static> RuleBasedClassifier<T> {
    pub fn builder() -> RuleBasedClassifierBuilder<T> {
        RuleBasedClassifierBuilder::new()
    }

    pub fn rules(&self) -> &[Rule<T>] {
        &self.rules
    }
}

impl<T: fmt::Debug + 'static> Classifier<T> for RuleBasedClassifier<T> {
    fn classify(&self, candidate: &Candidate<T>) -> Result<ClassificationResult, DedupeError> {
        let mut context = (self.context_factory)();
        let mut ambiguous: Option<ClassificationResult> = None;
        let mut decided: Option<ClassificationResult> = None;

        for rule in &self.rules {
            let scored = rule.score(&candidate.record1, &candidate.record2, &mut context);
            let Some(score) = context.exceptions_mut().capture(scored) else {
                continue;
            };
            let Some(result) = rule.interpret(score) else {
                continue;
            };
            trace!(rule = rule.name(), %result, "rule applied");
            if result.is_ambiguous() {
                ambiguous = Some(result);
            } else {
                decided = Some(result);
                break;
            }
        }

        if !context.exceptions().is_empty() {
            return Err(DedupeError::classification(candidate, context.into_exceptions()));
        }
        Ok(decided
            .or(ambiguous)
            .unwrap_or_else(|| self.default_result.clone()))
    }
}

impl<T> fmt::Debug for RuleBasedClassifier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.rules.iter().map(|rule| rule.name.as_str()).collect();
        f.debug_struct("RuleBasedClassifier")
            .field("rules", &names)
            .field("default_result", &self.default_result)
            .finish()
    }
}

/// Builder for [`RuleBasedClassifier`]; rules keep the order they are added in.
pub struct RuleBasedClassifierBuilder<T> {
    rules: Vec<Rule<T>>,
    default_result: ClassificationResult,
    context_factory: ContextFactory,
}

impl<T: fmt::Debug + 'static> RuleBasedClassifierBuilder<T> {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            default_result: ClassificationResult::unknown(),
            context_factory: Box::new(SimilarityContext::new),
        }
    }

    pub fn rule(mut self, rule: Rule<T>) -> Self {
        self.rules.push(rule);
        self
    }

    /// Duplicate if the similarity is positive, otherwise not applicable.
    pub fn positive_rule<M>(self, name: impl Into<String>, measure: M) -> Self
    where
        M: SimilarityMeasure<T> + 'static,
    {
        self.rule(Rule::new(name, measure.unknown_if(|s| s <= 0.0)))
    }

    /// Like [`positive_rule`](Self::positive_rule), applicable only when `applies` holds.
    pub fn positive_rule_when<P, M>(self, name: impl Into<String>, applies: P, measure: M) -> Self
    where
        P: Fn(&T, &T) -> bool + Send + Sync + 'static,
        M: SimilarityMeasure<T> + 'static,
    {
        self.positive_rule(name, guarded(applies, measure))
    }

    /// Non-duplicate with confidence equal to the similarity, if positive.
    pub fn negative_rule<M>(self, name: impl Into<String>, measure: M) -> Self
    where
        M: SimilarityMeasure<T> + 'static,
    {
        let negated = move |left: &T, right: &T, context: &mut SimilarityContext| -> anyhow::Result<f64> {
            Ok(-measure.similarity(left, right, context)?)
        };
        self.rule(Rule::new(name, negated.unknown_if(|s| s >= 0.0)))
    }

    pub fn negative_rule_when<P, M>(self, name: impl Into<String>, applies: P, measure: M) -> Self
    where
        P: Fn(&T, &T) -> bool + Send + Sync + 'static,
        M: SimilarityMeasure<T> + 'static,
    {
        self.negative_rule(name, guarded(applies, measure))
    }

    /// Possible duplicate if the similarity is positive, otherwise not applicable.
    pub fn possible_rule<M>(self, name: impl Into<String>, measure: M) -> Self
    where
        M: SimilarityMeasure<T> + 'static,
    {
        self.rule(Rule::possible(name, measure.unknown_if(|s| s <= 0.0)))
    }

    pub fn possible_rule_when<P, M>(self, name: impl Into<String>, applies: P, measure: M) -> Self
    where
        P: Fn(&T, &T) -> bool + Send + Sync + 'static,
        M: SimilarityMeasure<T> + 'static,
    {
        self.possible_rule(name, guarded(applies, measure))
    }

    /// Raw-score rule named `"default"`, usually added last.
    pub fn default_rule<M>(self, measure: M) -> Self
    where
        M: SimilarityMeasure<T> + 'static,
    {
        self.rule(Rule::new(DEFAULT_RULE_NAME, measure))
    }

    /// Result returned when no rule applies.
    pub fn default_result(mut self, result: ClassificationResult) -> Self {
        self.default_result = result;
        self
    }

    pub fn context_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> SimilarityContext + Send + Sync + 'static,
    {
        self.context_factory = Box::new(factory);
        self
    }

    pub fn build(self) -> RuleBasedClassifier<T> {
        RuleBasedClassifier {
            rules: self.rules,
            default_result: self.default_result,
            context_factory: self.context_factory,
        }
    }
}

impl<T: fmt::Debug + 'static> Default for RuleBasedClassifierBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn guarded<T, P, M>(applies: P, measure: M) -> impl SimilarityMeasure<T>
where
    T: ?Sized,
    P: Fn(&T, &T) -> bool + Send + Sync,
    M: SimilarityMeasure<T>,
{
    move |left: &T, right: &T, context: &mut SimilarityContext| -> anyhow::Result<f64> {
        if applies(left, right) {
            measure.similarity(left, right, context)
        } else {
            Ok(f64::NAN)
        }
    }
}

/// Classifies from a gold standard of known duplicate pairs.
pub struct OracleClassifier<T, I> {
    id_extractor: Box<dyn Fn(&T) -> I + Send + Sync>,
    duplicates: FxHashSet<(I, I)>,
}

impl<T, I: Eq + Hash + Clone> OracleClassifier<T, I> {
    pub fn new<F, P>(id_extractor: F, duplicate_pairs: P) -> Self
    where
        F: Fn(&T) -> I + Send + Sync + 'static,
        P: IntoIterator<Item = (I, I)>,
    {
        let mut duplicates = FxHashSet::default();
        for (left, right) in duplicate_pairs {
            duplicates.insert((right.clone(), left.clone()));
            duplicates.insert((left, right));
        }
        Self {
            id_extractor: Box::new(id_extractor),
            duplicates,
        }
    }

    pub fn is_duplicate(&self, left: &T, right: &T) -> bool {
        let key = ((self.id_extractor)(left), (self.id_extractor)(right));
        self.duplicates.contains(&key)
    }
}

impl<T, I: Eq + Hash + Clone> Classifier<T> for OracleClassifier<T, I> {
    fn classify(&self, candidate: &Candidate<T>) -> Result<ClassificationResult, DedupeError> {
        let result = if self.is_duplicate(&candidate.record1, &candidate.record2) {
            ClassificationResult::duplicate(1.0)
        } else {
            ClassificationResult::non_duplicate(1.0)
        };
        Ok(result.with_explanation("oracle"))
    }
}
