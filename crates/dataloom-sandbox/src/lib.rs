//! AST-whitelisted evaluation of LLM-produced tabular-analysis expressions.
//!
//! The pipeline is: strip fences/comments, parse each remaining line into
//! a constrained statement AST, reject anything outside the whitelist,
//! then interpret the surviving statements against the dataset's merged
//! [`Table`]. A single syntactic repair retry is applied when evaluation
//! fails with a multi-column tuple-selection shape error
//! (`df[(a, b)]` instead of `df[[a, b]]`, or the same for `groupby`/`agg`/
//! `pivot_table` arguments).

mod ast;
mod error;
mod eval;
mod lexer;
mod preprocess;
mod repair;
mod value;
mod whitelist;

pub use error::SandboxError;
pub use value::SandboxValue;

use ast::Stmt;
use dataloom_tablestore::Table;
use eval::Evaluator;

/// Parses, whitelists, and evaluates `code` against `table`, returning the
/// sandbox's flattened result value. Tabular objects never escape this
/// call; only scalars, mappings, and sequences do.
pub fn evaluate(code: &str, table: &Table) -> Result<SandboxValue, SandboxError> {
    let cleaned = preprocess::preprocess(code);
    let stmts = try_parse_and_check(&cleaned)?;

    let value = match Evaluator::new(table).run(&stmts) {
        Ok(v) => v,
        Err(eval_err) => {
            tracing::debug!(error = %eval_err, "evaluation failed, attempting tuple-selection repair");
            let repaired = repair::repair_tuple_selection(&cleaned);
            if repaired == cleaned {
                return Err(eval_err);
            }
            let repaired_stmts = try_parse_and_check(&repaired)?;
            Evaluator::new(table).run(&repaired_stmts)?
        }
    };

    if value == SandboxValue::None && is_pivot_or_groupby(&cleaned) {
        tracing::debug!("pivot/groupby expression returned null, re-running once");
        let retried = match try_parse_and_check(&cleaned) {
            Ok(stmts) => Evaluator::new(table).run(&stmts)?,
            Err(_) => value.clone(),
        };
        if retried == SandboxValue::None {
            tracing::warn!(code = %cleaned, "pivot/groupby expression still returned null after retry");
        }
        return Ok(retried);
    }

    Ok(value)
}

fn is_pivot_or_groupby(code: &str) -> bool {
    code.contains("pivot_table") || code.contains("groupby") || code.contains("crosstab")
}

fn try_parse_and_check(code: &str) -> Result<Vec<Stmt>, SandboxError> {
    let mut stmts = Vec::new();
    for line in code.lines().filter(|l| !l.trim().is_empty()) {
        let stmt = ast::parse_line(line)?;
        whitelist::check_stmt(&stmt)?;
        stmts.push(stmt);
    }
    if stmts.is_empty() {
        return Err(SandboxError::Syntax("no executable statement found".to_string()));
    }
    Ok(stmts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataloom_tablestore::parse_single_table;

    fn sample_table() -> Table {
        parse_single_table("region|sales\nnorth|100\nsouth|200").unwrap()
    }

    #[test]
    fn evaluates_whitelisted_reducer_expression() {
        let table = sample_table();
        let result = evaluate("df['sales'].sum()", &table).unwrap();
        assert_eq!(result, SandboxValue::Number(300.0));
    }

    #[test]
    fn rejects_import_statement() {
        let table = sample_table();
        let err = evaluate("import os\ndf['sales'].sum()", &table).unwrap_err();
        assert!(matches!(err, SandboxError::Unsafe(_)));
    }

    #[test]
    fn tuple_column_selection_yields_a_mapping() {
        let table = sample_table();
        let result = evaluate("df[('region', 'sales')]", &table).unwrap();
        assert!(matches!(result, SandboxValue::Mapping(_)));
    }

    #[test]
    fn assignment_to_sink_variable_is_read_back() {
        let table = sample_table();
        let result = evaluate("__result__ = df['sales'].mean()", &table).unwrap();
        assert_eq!(result, SandboxValue::Number(150.0));
    }

    #[test]
    fn unknown_method_is_rejected_before_execution() {
        let table = sample_table();
        let err = evaluate("df['sales'].to_csv()", &table).unwrap_err();
        assert!(matches!(err, SandboxError::Unsafe(_)));
    }

    #[test]
    fn null_groupby_result_is_retried_and_still_surfaces_as_a_success() {
        // `sales` has no numeric cells, so `.mean()` yields null on both
        // the first pass and the retry; the call still returns `Ok` rather
        // than an error, per the single-retry-then-warn policy.
        let table = parse_single_table("region|sales\nnorth|a\nsouth|b").unwrap();
        let result = evaluate("df['sales'].mean()  # groupby summary", &table).unwrap();
        assert_eq!(result, SandboxValue::None);
    }
}
