use std::sync::OnceLock;

use regex::Regex;

use super::RemoteEvent;

/// Patterns over `cec-client` log lines, in evaluation order.
const RULES: &[(&str, RemoteEvent)] = &[
    (r"key pressed: pause \([0-9]+, [0-9]+\)", RemoteEvent::Pause),
    (r"key pressed: play \([0-9]+, [0-9]+\)", RemoteEvent::Play),
    (
        r"key pressed: stop \([0-9]+\) current\(ff\) duration\(0\)",
        RemoteEvent::Stop,
    ),
    (
        r"key pressed: Fast forward \([0-9]+, [0-9]+\)",
        RemoteEvent::FastForward,
    ),
    (r"key pressed: rewind \([0-9]+, [0-9]+\)", RemoteEvent::Rewind),
];

fn rules() -> &'static [(Regex, RemoteEvent)] {
    static COMPILED: OnceLock<Vec<(Regex, RemoteEvent)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        RULES
            .iter()
            .filter_map(|(pattern, event)| Regex::new(pattern).ok().map(|re| (re, *event)))
            .collect()
    })
}

/// Map one line of client output to a remote event.  Every rule is tried;
/// the last match wins.
pub fn classify(line: &str) -> RemoteEvent {
    rules()
        .iter()
        .filter(|(re, _)| re.is_match(line))
        .last()
        .map(|(_, event)| *event)
        .unwrap_or(RemoteEvent::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_rules_compile() {
        assert_eq!(rules().len(), RULES.len());
    }

    #[test]
    fn test_key_presses() {
        assert_eq!(classify("key pressed: pause (1, 2)"), RemoteEvent::Pause);
        assert_eq!(
            classify("TRAFFIC: [  4521]\t>> key pressed: play (44, 0)"),
            RemoteEvent::Play
        );
        assert_eq!(
            classify("DEBUG:   [ 9001]\tkey pressed: stop (45) current(ff) duration(0)"),
            RemoteEvent::Stop
        );
        assert_eq!(
            classify("key pressed: Fast forward (49, 0)"),
            RemoteEvent::FastForward
        );
        assert_eq!(classify("key pressed: rewind (48, 0)"), RemoteEvent::Rewind);
    }

    #[test]
    fn test_unrecognized_lines() {
        assert_eq!(classify(""), RemoteEvent::Unknown);
        assert_eq!(
            classify("NOTICE:  [  120]\tconnection opened"),
            RemoteEvent::Unknown
        );
        // Key release and partial stop lines are not presses.
        assert_eq!(classify("key released: pause (46)"), RemoteEvent::Unknown);
        assert_eq!(classify("key pressed: stop (45)"), RemoteEvent::Unknown);
        assert_eq!(classify("key pressed: pause"), RemoteEvent::Unknown);
    }

    #[test]
    fn test_last_match_wins() {
        let line = "key pressed: pause (1, 2) key pressed: rewind (3, 4)";
        assert_eq!(classify(line), RemoteEvent::Rewind);
    }
}
