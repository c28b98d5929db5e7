use std::collections::HashSet;

use regex::Regex;
use serde_json::Value;

use shelflist_common::{timestamp::pad_timestamp, CdxjLine, ShelflistError, ShelflistResult};

/// A single `field OP value` predicate over a record's JSON body.
#[derive(Debug)]
pub struct FieldFilter {
    field: String,
    op: FieldOp,
}

#[derive(Debug)]
enum FieldOp {
    Equals(String),
    NotEquals(String),
    Matches(Regex),
    NotMatches(Regex),
}

impl FieldFilter {
    /// Parse a filter expression: `field=value`, `field!=value`,
    /// `field~regex`, or `field!~regex`. Operator detection checks the
    /// negated forms first so `!` never ends up inside a field name.
    pub fn parse(expr: &str) -> ShelflistResult<FieldFilter> {
        let (field, op) = if let Some((field, pattern)) = expr.split_once("!~") {
            (field, FieldOp::NotMatches(Regex::new(pattern.trim())?))
        } else if let Some((field, pattern)) = expr.split_once('~') {
            (field, FieldOp::Matches(Regex::new(pattern.trim())?))
        } else if let Some((field, value)) = expr.split_once("!=") {
            (field, FieldOp::NotEquals(value.trim().to_owned()))
        } else if let Some((field, value)) = expr.split_once('=') {
            (field, FieldOp::Equals(value.trim().to_owned()))
        } else {
            return Err(ShelflistError::InvalidParam(format!(
                "filter expression {expr:?} has no operator"
            )));
        };

        Ok(FieldFilter {
            field: field.trim().to_owned(),
            op,
        })
    }

    fn accepts(&self, body: &Value) -> bool {
        let value = match body.get(&self.field) {
            Some(Value::Null) | None => return false,
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };

        match &self.op {
            FieldOp::Equals(expected) => value == *expected,
            FieldOp::NotEquals(expected) => value != *expected,
            FieldOp::Matches(regex) => regex.is_match(&value),
            FieldOp::NotMatches(regex) => !regex.is_match(&value),
        }
    }
}

/// The post-filter applied to a result stream: an inclusive timestamp range
/// plus any number of field predicates, all of which must hold.
#[derive(Debug, Default)]
pub struct LineFilter {
    from_ts: Option<String>,
    to_ts: Option<String>,
    fields: Vec<FieldFilter>,
}

impl LineFilter {
    pub fn new(
        from_ts: Option<&str>,
        to_ts: Option<&str>,
        exprs: &[String],
    ) -> ShelflistResult<LineFilter> {
        Ok(LineFilter {
            from_ts: from_ts.map(pad_timestamp),
            to_ts: to_ts.map(pad_timestamp),
            fields: exprs
                .iter()
                .map(|e| FieldFilter::parse(e))
                .collect::<ShelflistResult<_>>()?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.from_ts.is_none() && self.to_ts.is_none() && self.fields.is_empty()
    }

    /// Timestamp bounds compare against the record's timestamp field; field
    /// predicates need a parseable JSON body and fail without one.
    pub fn accepts(&self, line: &[u8]) -> bool {
        let Ok(record) = CdxjLine::parse(line) else {
            return false;
        };

        if let Some(from) = &self.from_ts {
            if record.timestamp < from.as_bytes() {
                return false;
            }
        }
        if let Some(to) = &self.to_ts {
            if record.timestamp > to.as_bytes() {
                return false;
            }
        }

        if self.fields.is_empty() {
            return true;
        }

        let Some(json) = record.json else {
            return false;
        };
        let Ok(body) = serde_json::from_slice::<Value>(json) else {
            return false;
        };

        self.fields.iter().all(|f| f.accepts(&body))
    }
}

fn dedupe_key(line: &[u8]) -> Vec<u8> {
    match CdxjLine::parse(line) {
        Ok(record) => {
            let mut key = record.surt.to_vec();
            key.push(b' ');
            key.extend_from_slice(record.timestamp);
            key
        }
        Err(_) => line.to_vec(),
    }
}

/// Stable sort by `(SURT, TIMESTAMP)`; used to re-order results gathered
/// from multiple files.
pub fn sort_lines(lines: &mut [Vec<u8>]) {
    lines.sort_by_cached_key(|line| dedupe_key(line));
}

/// Collapse lines sharing a `(SURT, TIMESTAMP)` pair to the first one seen.
pub fn dedupe_lines(lines: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
    let mut seen = HashSet::new();
    lines
        .into_iter()
        .filter(|line| seen.insert(dedupe_key(line)))
        .collect()
}

/// Apply the output stages in their fixed order: sort, dedupe, then limit.
pub fn finish_results(
    mut lines: Vec<Vec<u8>>,
    sort: bool,
    dedupe: bool,
    limit: Option<usize>,
) -> Vec<Vec<u8>> {
    if sort {
        sort_lines(&mut lines);
    }
    if dedupe {
        lines = dedupe_lines(lines);
    }
    if let Some(limit) = limit {
        lines.truncate(limit);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<Vec<u8>> {
        raw.iter().map(|l| l.as_bytes().to_vec()).collect()
    }

    #[test]
    fn timestamp_range_is_inclusive_and_padded() {
        let filter = LineFilter::new(Some("2020"), Some("20201231235959"), &[]).unwrap();

        assert!(filter.accepts(b"com,example)/ 20200101000000 {}"));
        assert!(filter.accepts(b"com,example)/ 20201231235959 {}"));
        assert!(!filter.accepts(b"com,example)/ 20191231235959 {}"));
        assert!(!filter.accepts(b"com,example)/ 20210101000000 {}"));
    }

    #[test]
    fn timestamp_filter_accepts_legacy_rows_without_json() {
        let filter = LineFilter::new(Some("2020"), None, &[]).unwrap();
        assert!(filter.accepts(b"com,example)/ 20200615120000"));
    }

    #[test]
    fn field_predicates() {
        let line = b"com,example)/ 20200101000000 {\"status\":200,\"mime\":\"text/html\"}";

        macro_rules! case {
            ($expr:literal, $expected:literal) => {
                let filter = LineFilter::new(None, None, &[$expr.to_string()]).unwrap();
                assert_eq!(filter.accepts(line), $expected, "filter {}", $expr);
            };
        }

        case!("status=200", true);
        case!("status=404", false);
        case!("status!=404", true);
        case!("status!=200", false);
        case!("mime~text/.*", true);
        case!("mime~image/.*", false);
        case!("mime!~image/.*", true);
        case!("missing=1", false);
        case!("missing!=1", false);
    }

    #[test]
    fn field_predicates_fail_without_parseable_json() {
        let filter = LineFilter::new(None, None, &["status=200".to_string()]).unwrap();
        assert!(!filter.accepts(b"com,example)/ 20200101000000"));
        assert!(!filter.accepts(b"com,example)/ 20200101000000 not-json"));
    }

    #[test]
    fn bad_regex_is_fatal_at_construction() {
        assert!(matches!(
            LineFilter::new(None, None, &["mime~(".to_string()]),
            Err(ShelflistError::BadRegex(_))
        ));
        assert!(matches!(
            FieldFilter::parse("no-operator-here"),
            Err(ShelflistError::InvalidParam(_))
        ));
    }

    #[test]
    fn adding_a_filter_never_grows_the_result_set() {
        let all = lines(&[
            "com,a)/ 20200101000000 {\"status\":\"200\"}",
            "com,b)/ 20210101000000 {\"status\":\"404\"}",
            "com,c)/ 20220101000000 {\"status\":\"200\"}",
        ]);

        let loose = LineFilter::new(Some("2020"), None, &[]).unwrap();
        let tight =
            LineFilter::new(Some("2020"), None, &["status=200".to_string()]).unwrap();

        let loose_hits: Vec<_> = all.iter().filter(|l| loose.accepts(l)).collect();
        let tight_hits: Vec<_> = all.iter().filter(|l| tight.accepts(l)).collect();

        assert!(tight_hits.len() <= loose_hits.len());
        assert!(tight_hits.iter().all(|l| loose_hits.contains(l)));
    }

    #[test]
    fn sort_and_dedupe_are_idempotent_and_commute() {
        let raw = lines(&[
            "com,b)/ 20200101000000 {}",
            "com,a)/ 20200202000000 {}",
            "com,a)/ 20200101000000 {\"first\":true}",
            "com,a)/ 20200101000000 {\"second\":true}",
        ]);

        let mut sorted = raw.clone();
        sort_lines(&mut sorted);
        let mut twice = sorted.clone();
        sort_lines(&mut twice);
        assert_eq!(sorted, twice);

        // stable: the two equal-key lines keep their relative order
        assert!(sorted[0].ends_with(b"{\"first\":true}"));
        assert!(sorted[1].ends_with(b"{\"second\":true}"));

        let deduped = dedupe_lines(raw.clone());
        assert_eq!(deduped.len(), 3);
        assert_eq!(dedupe_lines(deduped.clone()), deduped);

        let sort_then_dedupe = {
            let mut l = raw.clone();
            sort_lines(&mut l);
            dedupe_lines(l)
        };
        let dedupe_then_sort = {
            let mut l = dedupe_lines(raw);
            sort_lines(&mut l);
            l
        };
        assert_eq!(sort_then_dedupe, dedupe_then_sort);
    }

    #[test]
    fn limit_applies_after_sort_and_dedupe() {
        let raw = lines(&[
            "com,b)/ 20200101000000 {}",
            "com,a)/ 20200101000000 {}",
            "com,a)/ 20200101000000 {}",
        ]);

        let out = finish_results(raw, true, true, Some(1));
        assert_eq!(out, lines(&["com,a)/ 20200101000000 {}"]));
    }
}
