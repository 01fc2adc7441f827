use nix::sys::signal::Signal;

/// Signal names accepted in `stopsignal`/`reloadsignal`, with or without the
/// `SIG` prefix.
const KNOWN: [(&str, Signal); 7] = [
    ("TERM", Signal::SIGTERM),
    ("HUP", Signal::SIGHUP),
    ("INT", Signal::SIGINT),
    ("QUIT", Signal::SIGQUIT),
    ("KILL", Signal::SIGKILL),
    ("USR1", Signal::SIGUSR1),
    ("USR2", Signal::SIGUSR2),
];

fn normalize(name: &str) -> String {
    let upper = name.trim().to_ascii_uppercase();
    upper.strip_prefix("SIG").unwrap_or(&upper).to_string()
}

pub fn is_known(name: &str) -> bool {
    let normalized = normalize(name);
    KNOWN.iter().any(|(n, _)| *n == normalized)
}

pub fn known_names() -> Vec<&'static str> {
    KNOWN.iter().map(|(n, _)| *n).collect()
}

/// Maps a symbolic signal name to the platform signal. Unknown names fall
/// back to SIGTERM.
pub fn resolve(name: &str) -> Signal {
    let normalized = normalize(name);
    KNOWN
        .iter()
        .find(|(n, _)| *n == normalized)
        .map(|(_, s)| *s)
        .unwrap_or(Signal::SIGTERM)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("TERM", Signal::SIGTERM)]
    #[case("term", Signal::SIGTERM)]
    #[case("SIGTERM", Signal::SIGTERM)]
    #[case("HUP", Signal::SIGHUP)]
    #[case("USR2", Signal::SIGUSR2)]
    fn resolves_symbolic_names(#[case] name: &str, #[case] expected: Signal) {
        assert_eq!(resolve(name), expected);
    }

    #[test]
    fn unknown_names_fall_back_to_sigterm() {
        assert_eq!(resolve("WINCH"), Signal::SIGTERM);
        assert!(!is_known("WINCH"));
    }
}
