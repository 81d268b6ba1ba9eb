use crate::preferences::PreferenceSource;
use crate::task::Task;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

mod rules;

#[cfg(test)]
mod tests;

pub use rules::{Rule, RULES};

/// Preference key consulted for brightness levels
pub const BRIGHTNESS_PREFERENCE: &str = "default_brightness";

/// Preference key consulted for thermostat targets
pub const TEMPERATURE_PREFERENCE: &str = "default_temperature";

pub const DEFAULT_BRIGHTNESS: i64 = 75;
pub const DEFAULT_TEMPERATURE: f64 = 22.0;

/// Inputs a rule may substitute into its Tasks
#[derive(Debug, Clone, PartialEq)]
pub struct PlanContext {
    /// Original goal text, before lower-casing
    pub goal: String,
    pub brightness: Value,
    pub temperature: Value,
}

/// Maps free-text goals to candidate Tasks.
///
/// The goal is lower-cased and tested against [`RULES`] in order; the first
/// rule whose trigger matches produces the plan. An unmatched goal yields a
/// single fallback Task, so a plan is never empty.
pub struct Planner {
    preferences: Arc<dyn PreferenceSource>,
}

impl Planner {
    pub fn new(preferences: Arc<dyn PreferenceSource>) -> Self {
        Self { preferences }
    }

    /// Build the substitution context for `user_id`
    pub fn context(&self, user_id: &str, goal: &str) -> PlanContext {
        let prefs = self.preferences.get_preferences(user_id);
        PlanContext {
            goal: goal.to_string(),
            brightness: prefs
                .get(BRIGHTNESS_PREFERENCE)
                .cloned()
                .unwrap_or_else(|| json!(DEFAULT_BRIGHTNESS)),
            temperature: prefs
                .get(TEMPERATURE_PREFERENCE)
                .cloned()
                .unwrap_or_else(|| json!(DEFAULT_TEMPERATURE)),
        }
    }

    pub fn plan_goal(&self, user_id: &str, goal: &str) -> Vec<Task> {
        let ctx = self.context(user_id, goal);
        let goal_lower = goal.to_lowercase();

        // First matching rule wins
        let rule = RULES
            .iter()
            .find(|rule| (rule.matches)(&goal_lower))
            .unwrap_or(&rules::FALLBACK);
        let tasks = (rule.build)(&ctx);

        info!(
            user_id = %user_id,
            goal = %goal,
            rule = rule.name,
            tasks = tasks.len(),
            "Planned goal"
        );
        tasks
    }
}
