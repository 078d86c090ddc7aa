//! Sentinel Parser (spec §4.C).
//!
//! Scans a sliding output buffer backward for the last `RESULT:` line
//! carrying a single-line JSON object payload.

use serde_json::Value;

/// Status reported by a parsed sentinel line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStatus {
    Done,
    Failed,
}

/// Validation outcome reported by a parsed sentinel line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    Pass,
    Fail,
    Unknown,
}

impl Validation {
    fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pass" => Validation::Pass,
            "fail" => Validation::Fail,
            _ => Validation::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Validation::Pass => "pass",
            Validation::Fail => "fail",
            Validation::Unknown => "unknown",
        }
    }
}

/// A successfully parsed sentinel line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResult {
    pub status: ResultStatus,
    pub validation: Validation,
    pub summary: String,
    pub raw: String,
}

const PREFIX: &str = "RESULT:";

/// Scan `buffer` from the last line to the first for the last valid
/// sentinel; return `None` if no line yields a valid result.
pub fn extract(buffer: &str) -> Option<ParsedResult> {
    for line in buffer.lines().rev() {
        let Some(idx) = line.find(PREFIX) else {
            continue;
        };
        let payload = line[idx + PREFIX.len()..].trim();

        let Some(start) = payload.find('{') else {
            continue;
        };
        let Some(end) = payload.rfind('}') else {
            continue;
        };
        if end < start {
            continue;
        }

        let candidate = &payload[start..=end];
        let Ok(value) = serde_json::from_str::<Value>(candidate) else {
            continue;
        };
        let Some(obj) = value.as_object() else {
            continue;
        };

        let status = match obj.get("status").and_then(Value::as_str) {
            Some(s) if s.eq_ignore_ascii_case("done") => ResultStatus::Done,
            Some(s) if s.eq_ignore_ascii_case("failed") => ResultStatus::Failed,
            _ => continue,
        };

        let validation = obj
            .get("validation")
            .and_then(Value::as_str)
            .map(Validation::from_str)
            .unwrap_or(Validation::Unknown);

        let summary = obj
            .get("summary")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or("")
            .to_string();

        return Some(ParsedResult {
            status,
            validation,
            summary,
            raw: candidate.to_string(),
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_done() {
        let buf = "some log line\nRESULT: {\"status\":\"done\",\"validation\":\"pass\",\"summary\":\"ok\"}\n";
        let parsed = extract(buf).unwrap();
        assert_eq!(parsed.status, ResultStatus::Done);
        assert_eq!(parsed.validation, Validation::Pass);
        assert_eq!(parsed.summary, "ok");
    }

    #[test]
    fn test_last_of_multiple_lines_wins() {
        let buf = "RESULT: {\"status\":\"failed\"}\nmore output\nRESULT: {\"status\":\"done\"}\n";
        let parsed = extract(buf).unwrap();
        assert_eq!(parsed.status, ResultStatus::Done);
    }

    #[test]
    fn test_invalid_status_is_skipped_scanning_earlier_lines() {
        let buf = "RESULT: {\"status\":\"done\"}\nRESULT: {\"status\":\"weird\"}\n";
        let parsed = extract(buf).unwrap();
        assert_eq!(parsed.status, ResultStatus::Done);
    }

    #[test]
    fn test_no_result_line_returns_none() {
        assert!(extract("just some normal output\nnothing special\n").is_none());
    }

    #[test]
    fn test_unparseable_json_is_skipped() {
        let buf = "RESULT: {not json}\nRESULT: {\"status\":\"done\"}\n";
        let parsed = extract(buf).unwrap();
        assert_eq!(parsed.status, ResultStatus::Done);
    }

    #[test]
    fn test_validation_coerced_to_unknown() {
        let buf = "RESULT: {\"status\":\"done\",\"validation\":\"maybe\"}";
        let parsed = extract(buf).unwrap();
        assert_eq!(parsed.validation, Validation::Unknown);
    }

    #[test]
    fn test_validation_missing_defaults_unknown() {
        let buf = "RESULT: {\"status\":\"failed\"}";
        let parsed = extract(buf).unwrap();
        assert_eq!(parsed.validation, Validation::Unknown);
    }

    #[test]
    fn test_summary_trimmed() {
        let buf = "RESULT: {\"status\":\"done\",\"summary\":\"  padded  \"}";
        let parsed = extract(buf).unwrap();
        assert_eq!(parsed.summary, "padded");
    }

    #[test]
    fn test_result_anywhere_on_line() {
        let buf = "prefix noise RESULT: {\"status\":\"done\"} trailing noise";
        assert!(extract(buf).is_some());
    }
}
