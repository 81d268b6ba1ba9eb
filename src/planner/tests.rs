use super::*;
use crate::preferences::InMemoryPreferences;
use serde_json::json;

fn planner_with(prefs: InMemoryPreferences) -> Planner {
    Planner::new(Arc::new(prefs))
}

fn devices_and_actions(tasks: &[Task]) -> Vec<(&str, &str)> {
    tasks
        .iter()
        .map(|t| (t.device.as_str(), t.action.as_str()))
        .collect()
}

#[test]
fn test_goodnight_plan() {
    let planner = planner_with(InMemoryPreferences::new());
    let tasks = planner.plan_goal("john", "goodnight");

    assert_eq!(
        tasks,
        vec![
            Task::new("light.bedroom", "set_brightness").with_value(10),
            Task::new("light.living_room", "turn_off").with_value(false),
            Task::new("thermostat.main", "set_temperature").with_value(20.0),
            Task::new("lock.front_door", "lock").with_value(true),
        ]
    );
}

#[test]
fn test_matching_is_case_insensitive_substring() {
    let planner = planner_with(InMemoryPreferences::new());
    let tasks = planner.plan_goal("john", "Time to SLEEP now");
    assert_eq!(tasks.len(), 4);
    assert_eq!(tasks[3].device, "lock.front_door");
}

#[test]
fn test_first_matching_rule_wins() {
    let planner = planner_with(InMemoryPreferences::new());
    // Mentions both "movie" and "party"; movie comes first in the table
    let tasks = planner.plan_goal("john", "movie party");
    assert_eq!(
        devices_and_actions(&tasks),
        vec![
            ("light.living_room", "set_brightness"),
            ("light.kitchen", "turn_off"),
            ("thermostat.main", "set_temperature"),
        ]
    );
}

#[test]
fn test_preferences_substitute_defaults() {
    let prefs = InMemoryPreferences::new();
    prefs.set_preference("jane", "default_brightness", "40");
    prefs.set_preference("jane", "default_temperature", "23.5");
    let planner = planner_with(prefs);

    let tasks = planner.plan_goal("jane", "good morning");
    assert_eq!(tasks[0].value(), Some(&json!(40)));
    assert_eq!(tasks[1].value(), Some(&json!(23.5)));
    assert_eq!(tasks[2].device, "switch.coffee_maker");

    // Another user gets the fixed defaults
    let tasks = planner.plan_goal("bob", "wake up");
    assert_eq!(tasks[0].value(), Some(&json!(75)));
    assert_eq!(tasks[1].value(), Some(&json!(22.0)));
}

#[test]
fn test_bright_sets_all_lights() {
    let planner = planner_with(InMemoryPreferences::new());
    let tasks = planner.plan_goal("john", "make it bright");
    assert_eq!(tasks.len(), 3);
    assert!(tasks
        .iter()
        .all(|t| t.action == "set_brightness" && t.value() == Some(&json!(75))));
}

#[test]
fn test_away_plan() {
    let planner = planner_with(InMemoryPreferences::new());
    let tasks = planner.plan_goal("john", "I'm leaving");
    assert_eq!(tasks.len(), 5);
    assert_eq!(tasks[3].value(), Some(&json!(18.0)));
}

#[test]
fn test_generic_light_rules() {
    let planner = planner_with(InMemoryPreferences::new());

    let on = planner.plan_goal("john", "light on please");
    assert_eq!(devices_and_actions(&on), vec![("light.living_room", "turn_on")]);

    let off = planner.plan_goal("john", "light off");
    assert_eq!(devices_and_actions(&off), vec![("light.living_room", "turn_off")]);
    assert_eq!(off[0].value(), Some(&json!(false)));
}

#[test]
fn test_temperature_rule() {
    let prefs = InMemoryPreferences::new();
    prefs.set("john", "default_temperature", json!(19.0));
    let planner = planner_with(prefs);

    let tasks = planner.plan_goal("john", "adjust temp");
    assert_eq!(
        tasks,
        vec![Task::new("thermostat.main", "set_temperature").with_value(19.0)]
    );
}

#[test]
fn test_unmatched_goal_falls_back() {
    let planner = planner_with(InMemoryPreferences::new());
    let tasks = planner.plan_goal("john", "xyzzy");

    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].device, "light.living_room");
    assert_eq!(tasks[0].action, "turn_on");
    assert_eq!(tasks[0].reason(), Some("Unknown goal: xyzzy"));
}

#[test]
fn test_light_without_direction_falls_back() {
    let planner = planner_with(InMemoryPreferences::new());
    let tasks = planner.plan_goal("john", "light temp");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].reason(), Some("Unknown goal: light temp"));
}

#[test]
fn test_plan_is_never_empty() {
    let planner = planner_with(InMemoryPreferences::new());
    for goal in ["", "   ", "hello", "light", "LIGHT", "goodnight", "party time"] {
        assert!(!planner.plan_goal("john", goal).is_empty(), "empty plan for {goal:?}");
    }
}

#[test]
fn test_planning_is_deterministic() {
    let planner = planner_with(InMemoryPreferences::new());
    assert_eq!(
        planner.plan_goal("john", "movie night"),
        planner.plan_goal("john", "movie night")
    );
}
