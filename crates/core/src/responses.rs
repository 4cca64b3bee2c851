use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Fixed corpus of nudge lines posted at whoever is still working.
pub const GO_HOME_LINES: [&str; 4] =
    ["Go home!", "Are you homeless?", "Stop working!", "Why are you here?"];

/// Emoji name attached when the bot reacts instead of replying.
pub const GO_HOME_REACTION: &str = "go_home";

/// Randomness source for nudge selection.
///
/// Injected into the selector rather than reached for ambiently, so tests
/// can force either branch and any corpus index.
pub trait NudgeRng: Send {
    /// Uniform draw in `[0, 1)`.
    fn roll(&mut self) -> f64;
    /// Uniform draw in `[0, upper)`. `upper` must be nonzero.
    fn pick(&mut self, upper: usize) -> usize;
}

/// Production [`NudgeRng`] backed by a seedable standard generator.
pub struct StdNudgeRng(StdRng);

impl StdNudgeRng {
    pub fn from_entropy() -> Self {
        Self(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }
}

impl NudgeRng for StdNudgeRng {
    fn roll(&mut self) -> f64 {
        self.0.gen::<f64>()
    }

    fn pick(&mut self, upper: usize) -> usize {
        self.0.gen_range(0..upper)
    }
}

/// One nudge, decided once per qualifying message and never retained.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponsePlan {
    TextReply(String),
    ReactionAdd(String),
}

/// Chooses between an emoji reaction and a corpus line.
#[derive(Clone, Debug)]
pub struct ResponseSelector {
    reaction_probability: f64,
    reaction_name: String,
}

impl Default for ResponseSelector {
    fn default() -> Self {
        Self { reaction_probability: 0.4, reaction_name: GO_HOME_REACTION.to_owned() }
    }
}

impl ResponseSelector {
    pub fn new(reaction_probability: f64, reaction_name: impl Into<String>) -> Self {
        Self { reaction_probability, reaction_name: reaction_name.into() }
    }

    /// True when this nudge should be an emoji reaction rather than text.
    pub fn should_use_reaction(&self, rng: &mut dyn NudgeRng) -> bool {
        rng.roll() < self.reaction_probability
    }

    pub fn select(&self, rng: &mut dyn NudgeRng) -> ResponsePlan {
        if self.should_use_reaction(rng) {
            ResponsePlan::ReactionAdd(self.reaction_name.clone())
        } else {
            ResponsePlan::TextReply(generate_go_home(rng).to_owned())
        }
    }
}

/// Draws one line from the fixed corpus.
pub fn generate_go_home(rng: &mut dyn NudgeRng) -> &'static str {
    GO_HOME_LINES[rng.pick(GO_HOME_LINES.len())]
}

/// Rate-limit gate for nudges. Reserved as an extension point; always false
/// in this version and must not grow implicit behavior.
pub fn is_tired() -> bool {
    false
}
