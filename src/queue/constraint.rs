//! Minimal constraint matcher covering the forms the orchestrator emits:
//! `attr == "string"`, `attr == 42`, and conjunctions with `&&`.

use super::{unquote, JobRecord};

pub fn matches(record: &JobRecord, constraint: &str) -> bool {
    constraint
        .split("&&")
        .all(|clause| match_clause(record, clause.trim()))
}

fn match_clause(record: &JobRecord, clause: &str) -> bool {
    let Some((attribute, wanted)) = clause.split_once("==") else {
        return false;
    };
    let Some(actual) = record.get(attribute.trim()) else {
        return false;
    };
    unquote(actual) == unquote(wanted)
}
