use crate::ast::{Expr, Stmt};
use crate::error::SandboxError;

pub const SINK_VARIABLE: &str = "__result__";

const BASE_NAMES: [&str; 3] = ["df", "pd", "np"];

const SAFE_BUILTINS: [&str; 14] = [
    "abs", "round", "min", "max", "sum", "len", "range", "enumerate", "zip", "map", "filter",
    "list", "dict", "set", "tuple",
];

const BUILTIN_TYPES: [&str; 3] = ["str", "int", "float"];
const BUILTIN_BOOL_CTOR: [&str; 1] = ["bool"];

const LIBRARY_FUNCS: [&str; 10] = [
    "crosstab", "concat", "merge", "pivot_table", "get_dummies", "cut", "qcut", "melt",
    "date_range", "to_datetime",
];
const LIBRARY_CTORS: [&str; 2] = ["Series", "DataFrame"];

/// Operation vocabulary (Glossary) plus the tabular-method whitelist
/// (Glossary), merged into the single set of attribute/method names
/// allowed to be invoked on a dataset-derived value.
const TABULAR_METHODS: &[&str] = &[
    "mean", "sum", "max", "min", "count", "std", "var", "median", "quantile", "unique", "mode",
    "nunique", "loc", "iloc", "groupby", "agg", "pivot_table", "crosstab", "corr", "cov",
    "describe", "head", "tail", "value_counts", "sort_values", "reset_index", "rename",
    "replace", "assign", "apply", "map", "any", "all", "empty", "isna", "notna", "fillna",
    "dropna", "drop_duplicates", "to_dict", "to_list", "to_numpy", "shape", "size", "columns",
    "index", "dtypes", "merge", "concat",
];

fn is_allowed_name(name: &str, bound: &[String]) -> bool {
    name == SINK_VARIABLE
        || BASE_NAMES.contains(&name)
        || SAFE_BUILTINS.contains(&name)
        || BUILTIN_TYPES.contains(&name)
        || BUILTIN_BOOL_CTOR.contains(&name)
        || bound.iter().any(|b| b == name)
}

fn is_allowed_bare_call(name: &str) -> bool {
    SAFE_BUILTINS.contains(&name)
        || BUILTIN_TYPES.contains(&name)
        || BUILTIN_BOOL_CTOR.contains(&name)
        || LIBRARY_FUNCS.contains(&name)
        || LIBRARY_CTORS.contains(&name)
}

fn is_allowed_method(name: &str) -> bool {
    TABULAR_METHODS.contains(&name) || LIBRARY_FUNCS.contains(&name)
}

/// Validates a parsed statement against the whitelist: every node kind,
/// name reference, and call target must be sanctioned, or the whole
/// fragment is rejected as `SandboxError::Unsafe` before any execution.
pub fn check_stmt(stmt: &Stmt) -> Result<(), SandboxError> {
    match stmt {
        Stmt::Import => Err(SandboxError::unsafe_("import statement is not allowed")),
        Stmt::FunctionDef => Err(SandboxError::unsafe_("function definitions are not allowed")),
        Stmt::ClassDef => Err(SandboxError::unsafe_("class definitions are not allowed")),
        Stmt::For => Err(SandboxError::unsafe_("for loops are not allowed")),
        Stmt::While => Err(SandboxError::unsafe_("while loops are not allowed")),
        Stmt::Assign { target, value } => {
            if target != SINK_VARIABLE {
                return Err(SandboxError::unsafe_(format!(
                    "assignment target '{target}' is not the sanctioned sink variable"
                )));
            }
            check_expr(value, &mut Vec::new())
        }
        Stmt::Expr(expr) => check_expr(expr, &mut Vec::new()),
    }
}

fn check_expr(expr: &Expr, bound: &mut Vec<String>) -> Result<(), SandboxError> {
    match expr {
        Expr::Num(_) | Expr::Str(_) | Expr::Bool(_) | Expr::NoneLit => Ok(()),
        Expr::Name(n) => {
            if is_allowed_name(n, bound) {
                Ok(())
            } else {
                Err(SandboxError::unsafe_(format!("name '{n}' is not allowed")))
            }
        }
        Expr::Attribute(base, attr) => {
            check_expr(base, bound)?;
            if is_allowed_method(attr) {
                Ok(())
            } else {
                Err(SandboxError::unsafe_(format!("attribute/method '{attr}' is not allowed")))
            }
        }
        Expr::Subscript(base, index) => {
            check_expr(base, bound)?;
            check_expr(index, bound)
        }
        Expr::Call { func, args, kwargs } => {
            match func.as_ref() {
                Expr::Name(n) => {
                    if !is_allowed_bare_call(n) {
                        return Err(SandboxError::unsafe_(format!(
                            "call to '{n}' is not a whitelisted library function"
                        )));
                    }
                }
                Expr::Attribute(base, method) => {
                    if !is_allowed_method(method) {
                        return Err(SandboxError::unsafe_(format!(
                            "method '{method}' is not in the tabular-method whitelist"
                        )));
                    }
                    check_expr(base, bound)?;
                }
                other => check_expr(other, bound)?,
            }
            for a in args {
                check_expr(a, bound)?;
            }
            for (_, v) in kwargs {
                check_expr(v, bound)?;
            }
            Ok(())
        }
        Expr::Tuple(items) | Expr::ListLit(items) | Expr::SetLit(items) => {
            for i in items {
                check_expr(i, bound)?;
            }
            Ok(())
        }
        Expr::DictLit(pairs) => {
            for (k, v) in pairs {
                check_expr(k, bound)?;
                check_expr(v, bound)?;
            }
            Ok(())
        }
        Expr::Compare(l, _, r) | Expr::BinOp(l, _, r) => {
            check_expr(l, bound)?;
            check_expr(r, bound)
        }
        Expr::BoolOp(_, items) => {
            for i in items {
                check_expr(i, bound)?;
            }
            Ok(())
        }
        Expr::UnaryOp(_, inner) => check_expr(inner, bound),
        Expr::IfExp { body, test, orelse } => {
            check_expr(body, bound)?;
            check_expr(test, bound)?;
            check_expr(orelse, bound)
        }
        Expr::ListComp { elt, var, iter, cond } => {
            check_expr(iter, bound)?;
            bound.push(var.clone());
            let result = (|| {
                check_expr(elt, bound)?;
                if let Some(c) = cond {
                    check_expr(c, bound)?;
                }
                Ok(())
            })();
            bound.pop();
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse_line;

    #[test]
    fn accepts_whitelisted_reducer_call() {
        let stmt = parse_line("df['sales'].sum()").unwrap();
        assert!(check_stmt(&stmt).is_ok());
    }

    #[test]
    fn rejects_import() {
        let stmt = parse_line("import os").unwrap();
        assert!(matches!(check_stmt(&stmt), Err(SandboxError::Unsafe(_))));
    }

    #[test]
    fn rejects_assignment_to_non_sink_variable() {
        let stmt = parse_line("x = df['sales'].sum()").unwrap();
        assert!(matches!(check_stmt(&stmt), Err(SandboxError::Unsafe(_))));
    }

    #[test]
    fn accepts_assignment_to_sink_variable() {
        let stmt = parse_line("__result__ = df['sales'].sum()").unwrap();
        assert!(check_stmt(&stmt).is_ok());
    }

    #[test]
    fn rejects_unknown_method() {
        let stmt = parse_line("df['sales'].to_csv()").unwrap();
        assert!(matches!(check_stmt(&stmt), Err(SandboxError::Unsafe(_))));
    }

    #[test]
    fn rejects_unknown_name() {
        let stmt = parse_line("os.system('ls')").unwrap();
        assert!(matches!(check_stmt(&stmt), Err(SandboxError::Unsafe(_))));
    }

    #[test]
    fn rejects_for_loop() {
        let stmt = parse_line("for x in y: pass").unwrap();
        assert!(matches!(check_stmt(&stmt), Err(SandboxError::Unsafe(_))));
    }

    #[test]
    fn accepts_comprehension_with_bound_variable() {
        let stmt = parse_line("[x for x in df['sales']]").unwrap();
        assert!(check_stmt(&stmt).is_ok());
    }
}
