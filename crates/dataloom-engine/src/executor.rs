//! C7: runs each operation in a plan through the sandbox (C4), collecting
//! results under stable keys. A single operation's failure never aborts
//! the rest.

use dataloom_llm::{ChatParams, ChatProvider};
use dataloom_tablestore::Table;

use crate::config::EngineConfig;
use crate::model::{Column, Operation, Plan, ResultValue, Results};

/// Resolves a requested column name against the dataset's merged columns.
/// Exact match (after trim) wins over containment, which wins over the
/// composite `"<col>_<sheet>"` form; a last-resort fuzzy match (grounded
/// in the original's substring-fallback behavior) catches near-misses.
pub fn resolve_column<'a>(table: &'a Table, requested: &str) -> Option<&'a str> {
    let requested = requested.trim();

    if let Some(exact) = table.columns.iter().find(|c| c.as_str() == requested) {
        return Some(exact.as_str());
    }
    if let Some(contains) = table.columns.iter().find(|c| c.contains(requested) || requested.contains(c.as_str())) {
        return Some(contains.as_str());
    }
    if let Some(composite) = table.columns.iter().find(|c| c.ends_with(&format!("_{requested}"))) {
        return Some(composite.as_str());
    }

    table
        .columns
        .iter()
        .map(|c| (c.as_str(), strsim::jaro_winkler(c, requested)))
        .filter(|(_, score)| *score >= 0.85)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
        .map(|(c, _)| c)
}

fn dtype_of(table: &Table, column: &str) -> &'static str {
    let idx = match table.column_index(column) {
        Some(i) => i,
        None => return "unknown",
    };
    let numeric = table.rows.iter().all(|row| matches!(row.get(idx), Some(dataloom_tablestore::Cell::Number(_)) | Some(dataloom_tablestore::Cell::Empty)));
    if numeric {
        "numeric"
    } else {
        "text"
    }
}

fn result_key(op: &Operation, resolved: &[String]) -> String {
    match &op.column {
        Column::Relational(_) => format!("{}_result", op.name),
        _ => match resolved.first() {
            Some(col) => format!("{col}_{}", op.name),
            None => format!("{}_result", op.name),
        },
    }
}

async fn code_for_operation(op: &Operation, resolved: &[String], table: &Table, llm: &dyn ChatProvider, params: ChatParams) -> Result<String, dataloom_llm::LLMError> {
    let dtypes: String = resolved.iter().map(|c| format!("{c}: {}", dtype_of(table, c))).collect::<Vec<_>>().join(", ");
    let prompt = format!(
        "Write a single pandas expression (no imports, no assignment unless to __result__) \
         computing the '{}' operation against df, using column(s) [{}] (dtypes: {}). \
         Operation description: {}. Respond with code only.",
        op.name,
        resolved.join(", "),
        dtypes,
        op.description,
    );
    llm.complete(&prompt, params).await
}

/// `execute(plan, dataset, settings) -> Results`.
pub async fn execute(plan: &Plan, table: &Table, config: &EngineConfig, llm: &dyn ChatProvider) -> Results {
    let mut results = Results::new();
    results.insert("row_count".to_string(), ResultValue::Number(table.row_count() as f64));
    results.insert("column_count".to_string(), ResultValue::Number(table.column_count() as f64));
    results.insert(
        "column_names".to_string(),
        ResultValue::Sequence(table.columns.iter().map(|c| ResultValue::Text(c.clone())).collect()),
    );

    for op in &plan.operations {
        let requested_names = op.column.names();
        let resolved: Vec<String> = requested_names
            .iter()
            .filter_map(|name| resolve_column(table, name).map(|s| s.to_string()))
            .collect();

        if resolved.is_empty() {
            results.insert(format!("{}_error", op.name), ResultValue::error(format!("no matching column for '{}'", op.name)));
            continue;
        }

        let params = ChatParams {
            model: config.model_name.clone(),
            temperature: config.temperature as f32,
            max_tokens: config.max_tokens,
            top_p: config.top_p as f32,
            frequency_penalty: config.frequency_penalty as f32,
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            ..Default::default()
        };

        let code = match code_for_operation(op, &resolved, table, llm, params).await {
            Ok(code) => code,
            Err(e) => {
                results.insert(format!("{}_error", op.name), ResultValue::error(e.to_string()));
                continue;
            }
        };

        let key = result_key(op, &resolved);
        match dataloom_sandbox::evaluate(&code, table) {
            Ok(value) => {
                results.insert(key, ResultValue::from_sandbox(value));
            }
            Err(e) => {
                results.insert(format!("{}_error", op.name), ResultValue::error(e.to_string()));
            }
        }
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataloom_tablestore::parse_single_table;

    #[test]
    fn exact_match_wins_over_containment() {
        let table = parse_single_table("sales|total_sales\n1|2").unwrap();
        assert_eq!(resolve_column(&table, "sales"), Some("sales"));
    }

    #[test]
    fn containment_resolves_when_no_exact_match() {
        let table = parse_single_table("north_sales|south_sales\n1|2").unwrap();
        assert_eq!(resolve_column(&table, "sales"), Some("north_sales"));
    }

    #[test]
    fn composite_sheet_suffix_resolves() {
        let table = parse_single_table("north_sales|region\n1|a").unwrap();
        assert_eq!(resolve_column(&table, "north_sales"), Some("north_sales"));
    }

    #[test]
    fn unresolvable_column_returns_none() {
        let table = parse_single_table("a|b\n1|2").unwrap();
        assert_eq!(resolve_column(&table, "zzz_unrelated"), None);
    }

    #[test]
    fn result_key_uses_resolved_column_for_simple_operations() {
        let op = Operation { name: "sum".to_string(), column: Column::Single("sales".to_string()), description: String::new() };
        assert_eq!(result_key(&op, &["sales".to_string()]), "sales_sum");
    }

    #[test]
    fn result_key_falls_back_to_op_result_for_relational_operations() {
        let op = Operation {
            name: "pivot_table".to_string(),
            column: Column::Relational(crate::model::RelationalColumn::default()),
            description: String::new(),
        };
        assert_eq!(result_key(&op, &[]), "pivot_table_result");
    }
}
