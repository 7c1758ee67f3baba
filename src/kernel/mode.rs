use serde::{Deserialize, Serialize};

/// Which production path runs this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkMode {
    Reactive,
    GoalDriven,
    Autonomous,
    Idle,
}

/// PURE FUNCTION: first match wins.
/// Input beats everything; with autonomy off nothing else runs; an active
/// goal beats free-running autonomy.
pub fn select(input: Option<&str>, autonomous_mode: bool, has_active_goal: bool) -> ThinkMode {
    if input.is_some() {
        ThinkMode::Reactive
    } else if !autonomous_mode {
        ThinkMode::Idle
    } else if has_active_goal {
        ThinkMode::GoalDriven
    } else {
        ThinkMode::Autonomous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_order() {
        assert_eq!(select(Some("hi"), false, true), ThinkMode::Reactive);
        assert_eq!(select(None, false, true), ThinkMode::Idle);
        assert_eq!(select(None, true, true), ThinkMode::GoalDriven);
        assert_eq!(select(None, true, false), ThinkMode::Autonomous);
    }

    #[test]
    fn empty_input_is_still_input() {
        assert_eq!(select(Some(""), true, false), ThinkMode::Reactive);
    }
}
