//! Static SQL safety policy.
//!
//! [`SafetyValidator`] inspects a candidate statement before anything reaches
//! the query engine. It is a pure function of its inputs: no I/O, no state,
//! identical verdicts for identical input. Rules are applied in a fixed order
//! and the first failure wins:
//!
//! 1. the statement must begin with `SELECT` or `WITH`
//! 2. no forbidden keyword may appear anywhere as a whole token
//! 3. every referenced table must be known (CTE names are whitelisted)
//! 4. a `LIMIT` clause must stay at or under the row cap; a missing clause is
//!    injected
//!
//! Table references are extracted by lightweight token scanning, not a full
//! SQL parse. The engine still has the final word on anything the heuristic
//! lets through.

use regex::Regex;

use querent_types::RejectReason;

/// Hard cap on the number of rows a statement may request.
pub const MAX_ROWS: u64 = 1000;

const FORBIDDEN_KEYWORDS: &str = "INSERT|UPDATE|DELETE|DROP|ALTER|CREATE|TRUNCATE|ATTACH|COPY|\
     PRAGMA|EXEC|EXECUTE|CALL|MERGE|REPLACE|ANALYZE";

/// Keywords and punctuation that mark a statement as ending mid-expression,
/// making it unsafe to append a `LIMIT` clause.
const DANGLING_TAIL_KEYWORDS: &[&str] = &[
    "AND", "OR", "WHERE", "BY", "ON", "AS", "FROM", "JOIN", "SELECT", "WITH", "IN", "NOT", "LIKE",
    "BETWEEN", "CASE", "WHEN", "THEN", "ELSE", "UNION", "ALL", "HAVING", "DISTINCT",
];

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// The outcome of one validation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The statement passed every rule. `sql` is the normalized form:
    /// trimmed, trailing semicolon removed, `LIMIT` guaranteed present.
    Accept { sql: String },
    /// The statement broke a rule. `detail` names the offending token or
    /// value for repair prompts and logs.
    Reject {
        reason: RejectReason,
        detail: String,
    },
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept { .. })
    }

    /// The rejection reason, if this verdict is a rejection.
    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            Verdict::Accept { .. } => None,
            Verdict::Reject { reason, .. } => Some(*reason),
        }
    }
}

// ---------------------------------------------------------------------------
// SafetyValidator
// ---------------------------------------------------------------------------

pub struct SafetyValidator {
    leading: Regex,
    forbidden: Regex,
    table_ref: Regex,
    cte_binding: Regex,
    limit_clause: Regex,
}

impl SafetyValidator {
    pub fn new() -> Self {
        Self {
            leading: Regex::new(r"(?i)^(?:SELECT|WITH)\b").unwrap(),
            forbidden: Regex::new(&format!(r"(?i)\b({FORBIDDEN_KEYWORDS})\b")).unwrap(),
            table_ref: Regex::new(r"(?i)\b(?:FROM|JOIN)\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap(),
            cte_binding: Regex::new(r"(?i)\b([A-Za-z_][A-Za-z0-9_]*)\s+AS\s*\(").unwrap(),
            limit_clause: Regex::new(r"(?i)\bLIMIT\s+(\d+)").unwrap(),
        }
    }

    /// Validate `sql` against the policy, given the set of known table names.
    ///
    /// On acceptance the returned statement is normalized; feeding it back in
    /// yields the same accepted statement (validation is a fixed point).
    pub fn validate(&self, sql: &str, known_tables: &[&str]) -> Verdict {
        let stmt = sql.trim().trim_end_matches(';').trim_end();

        // Rule 1: read-only prefix. An empty statement fails here too.
        if !self.leading.is_match(stmt) {
            return Verdict::Reject {
                reason: RejectReason::NotReadOnly,
                detail: "statement must begin with SELECT or WITH".into(),
            };
        }

        // Rule 2: forbidden keywords, whole-token match.
        if let Some(caps) = self.forbidden.captures(stmt) {
            return Verdict::Reject {
                reason: RejectReason::ForbiddenKeyword,
                detail: format!("forbidden keyword: {}", caps[1].to_uppercase()),
            };
        }

        // Rule 3: every FROM/JOIN target must be a known table or a CTE
        // bound earlier in the statement.
        let ctes: Vec<String> = self
            .cte_binding
            .captures_iter(stmt)
            .map(|c| c[1].to_ascii_lowercase())
            .collect();
        for caps in self.table_ref.captures_iter(stmt) {
            let name = &caps[1];
            let known = known_tables.iter().any(|t| t.eq_ignore_ascii_case(name))
                || ctes.contains(&name.to_ascii_lowercase());
            if !known {
                return Verdict::Reject {
                    reason: RejectReason::UnknownTable,
                    detail: format!("unknown table: {name}"),
                };
            }
        }

        // Rule 4: LIMIT present and bounded, or injected.
        let mut has_limit = false;
        for caps in self.limit_clause.captures_iter(stmt) {
            has_limit = true;
            match caps[1].parse::<u64>() {
                Ok(value) if value <= MAX_ROWS => {}
                Ok(value) => {
                    return Verdict::Reject {
                        reason: RejectReason::LimitExceeded,
                        detail: format!("LIMIT {value} exceeds maximum of {MAX_ROWS}"),
                    }
                }
                // Digits too large for u64 certainly exceed the cap.
                Err(_) => {
                    return Verdict::Reject {
                        reason: RejectReason::LimitExceeded,
                        detail: format!("LIMIT {} exceeds maximum of {MAX_ROWS}", &caps[1]),
                    }
                }
            }
        }

        if has_limit {
            return Verdict::Accept {
                sql: stmt.to_string(),
            };
        }

        if !injection_safe(stmt) {
            return Verdict::Reject {
                reason: RejectReason::LimitExceeded,
                detail: "statement ends mid-expression; cannot append LIMIT clause".into(),
            };
        }

        Verdict::Accept {
            sql: format!("{stmt} LIMIT {MAX_ROWS}"),
        }
    }
}

impl Default for SafetyValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether appending ` LIMIT n` to `stmt` produces a structurally plausible
/// statement: parentheses balanced and the tail not a dangling operator,
/// comma, or clause keyword.
fn injection_safe(stmt: &str) -> bool {
    let mut depth: i64 = 0;
    for ch in stmt.chars() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return false;
    }

    match stmt.chars().last() {
        None => return false,
        Some(c) if ",(+-*/=<>|&".contains(c) => return false,
        _ => {}
    }

    let last_word = stmt
        .rsplit(|c: char| c.is_whitespace())
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();
    !DANGLING_TAIL_KEYWORDS.contains(&last_word.as_str())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
