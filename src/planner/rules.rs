use super::PlanContext;
use crate::task::Task;

/// One entry of the goal table
pub struct Rule {
    pub name: &'static str,
    /// Trigger over the lower-cased goal
    pub matches: fn(&str) -> bool,
    pub build: fn(&PlanContext) -> Vec<Task>,
}

fn contains_any(goal: &str, triggers: &[&str]) -> bool {
    triggers.iter().any(|trigger| goal.contains(trigger))
}

/// Ordered goal table; the first match wins.
pub static RULES: &[Rule] = &[
    Rule {
        name: "goodnight",
        matches: |g| contains_any(g, &["goodnight", "sleep"]),
        build: |_| {
            vec![
                Task::new("light.bedroom", "set_brightness").with_value(10),
                Task::new("light.living_room", "turn_off").with_value(false),
                Task::new("thermostat.main", "set_temperature").with_value(20.0),
                Task::new("lock.front_door", "lock").with_value(true),
            ]
        },
    },
    Rule {
        name: "good_morning",
        matches: |g| contains_any(g, &["good morning", "wake up"]),
        build: |ctx| {
            vec![
                Task::new("light.bedroom", "set_brightness").with_value(ctx.brightness.clone()),
                Task::new("thermostat.main", "set_temperature")
                    .with_value(ctx.temperature.clone()),
                Task::new("switch.coffee_maker", "turn_on").with_value(true),
            ]
        },
    },
    Rule {
        name: "movie",
        matches: |g| contains_any(g, &["movie", "watch"]),
        build: |_| {
            vec![
                Task::new("light.living_room", "set_brightness").with_value(20),
                Task::new("light.kitchen", "turn_off").with_value(false),
                Task::new("thermostat.main", "set_temperature").with_value(21.0),
            ]
        },
    },
    Rule {
        name: "party",
        matches: |g| contains_any(g, &["party", "entertainment"]),
        build: |_| {
            vec![
                Task::new("light.living_room", "set_color").with_value("#FF6B6B"),
                Task::new("light.kitchen", "set_color").with_value("#4ECDC4"),
                Task::new("fan.living_room", "set_speed").with_value(2),
            ]
        },
    },
    Rule {
        name: "away",
        matches: |g| contains_any(g, &["away", "leaving"]),
        build: |_| {
            vec![
                Task::new("light.living_room", "turn_off").with_value(false),
                Task::new("light.bedroom", "turn_off").with_value(false),
                Task::new("light.kitchen", "turn_off").with_value(false),
                Task::new("thermostat.main", "set_temperature").with_value(18.0),
                Task::new("lock.front_door", "lock").with_value(true),
            ]
        },
    },
    Rule {
        name: "bright",
        matches: |g| contains_any(g, &["bright", "lights on"]),
        build: |ctx| {
            ["light.living_room", "light.bedroom", "light.kitchen"]
                .into_iter()
                .map(|device| {
                    Task::new(device, "set_brightness").with_value(ctx.brightness.clone())
                })
                .collect()
        },
    },
    Rule {
        name: "light_on",
        matches: |g| g.contains("light") && g.contains("on"),
        build: |_| vec![Task::new("light.living_room", "turn_on").with_value(true)],
    },
    Rule {
        name: "light_off",
        matches: |g| g.contains("light") && g.contains("off"),
        build: |_| vec![Task::new("light.living_room", "turn_off").with_value(false)],
    },
    Rule {
        // A goal about lights never reaches the thermostat
        name: "temperature",
        matches: |g| !g.contains("light") && contains_any(g, &["temperature", "temp"]),
        build: |ctx| {
            vec![Task::new("thermostat.main", "set_temperature")
                .with_value(ctx.temperature.clone())]
        },
    },
];

/// Used when nothing in [`RULES`] matches
pub(super) static FALLBACK: Rule = Rule {
    name: "fallback",
    matches: |_| true,
    build: |ctx| {
        vec![Task::new("light.living_room", "turn_on")
            .with_value(true)
            .with_param("reason", format!("Unknown goal: {}", ctx.goal))]
    },
};
