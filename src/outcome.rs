//! Outcome Resolver (spec §4.E).
//!
//! Combines the Subprocess Executor's result with the parsed sentinel into
//! a boolean success plus an explanatory note.

use crate::executor::{ExecOutcome, TimeoutKind};
use crate::sentinel::{ParsedResult, ResultStatus, Validation};

/// The resolved outcome of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub success: bool,
    pub note: String,
}

/// Decision table from spec §4.E, evaluated top-down.
pub fn resolve(outcome: &ExecOutcome) -> Resolution {
    if let Some(parsed) = &outcome.parsed_result {
        return resolve_parsed(parsed);
    }

    if outcome.timed_out {
        let kind = match outcome.timeout_kind {
            Some(TimeoutKind::Idle) => "idle",
            Some(TimeoutKind::Hard) => "hard",
            None => "unknown",
        };
        let bound = outcome.timeout_bound_ms.unwrap_or(0);
        return Resolution {
            success: false,
            note: format!("executor {kind} timeout after {bound}ms"),
        };
    }

    if outcome.exit_code == Some(0) {
        return Resolution {
            success: true,
            note: "exit_code_fallback success (missing RESULT)".to_string(),
        };
    }

    Resolution {
        success: false,
        note: format!(
            "executor failed exitCode={} signal={}",
            outcome
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "null".to_string()),
            outcome.signal.clone().unwrap_or_else(|| "null".to_string()),
        ),
    }
}

fn resolve_parsed(parsed: &ParsedResult) -> Resolution {
    let success = parsed.status == ResultStatus::Done && parsed.validation != Validation::Fail;
    let mut note = format!(
        "parsed_result status={} validation={}",
        if parsed.status == ResultStatus::Done {
            "done"
        } else {
            "failed"
        },
        parsed.validation.as_str()
    );
    if !parsed.summary.is_empty() {
        note.push_str(&format!(" summary={}", parsed.summary));
    }
    Resolution { success, note }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_outcome() -> ExecOutcome {
        ExecOutcome {
            exit_code: None,
            signal: None,
            elapsed_ms: 0,
            log_path: "log".into(),
            timed_out: false,
            timeout_kind: None,
            timeout_bound_ms: None,
            parsed_result: None,
        }
    }

    #[test]
    fn test_timeout_beats_exit_code() {
        let mut outcome = base_outcome();
        outcome.timed_out = true;
        outcome.timeout_kind = Some(TimeoutKind::Hard);
        outcome.exit_code = Some(0);
        let resolution = resolve(&outcome);
        assert!(!resolution.success);
        assert!(resolution.note.contains("hard"));
    }

    #[test]
    fn test_exit_code_zero_fallback() {
        let mut outcome = base_outcome();
        outcome.exit_code = Some(0);
        let resolution = resolve(&outcome);
        assert!(resolution.success);
        assert!(resolution.note.contains("exit_code_fallback"));
    }

    #[test]
    fn test_parsed_done_with_fail_validation_is_failure() {
        let mut outcome = base_outcome();
        outcome.parsed_result = Some(ParsedResult {
            status: ResultStatus::Done,
            validation: Validation::Fail,
            summary: String::new(),
            raw: "{}".into(),
        });
        let resolution = resolve(&outcome);
        assert!(!resolution.success);
    }

    #[test]
    fn test_parsed_done_overrides_nonzero_exit() {
        let mut outcome = base_outcome();
        outcome.exit_code = Some(1);
        outcome.parsed_result = Some(ParsedResult {
            status: ResultStatus::Done,
            validation: Validation::Pass,
            summary: "ok".into(),
            raw: "{}".into(),
        });
        let resolution = resolve(&outcome);
        assert!(resolution.success);
    }

    #[test]
    fn test_no_result_nonzero_exit_is_failure() {
        let mut outcome = base_outcome();
        outcome.exit_code = Some(1);
        let resolution = resolve(&outcome);
        assert!(!resolution.success);
        assert!(resolution.note.contains("exitCode=1"));
    }
}
