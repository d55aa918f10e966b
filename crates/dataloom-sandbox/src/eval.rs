use std::collections::HashMap;

use dataloom_tablestore::{Cell, Table};

use crate::ast::{Expr, Stmt};
use crate::error::SandboxError;
use crate::value::SandboxValue;

/// Runtime values produced while walking the expression tree. Distinct
/// from [`SandboxValue`]: this type still carries tabular intermediates
/// (`Series`/`Frame`/`GroupBy`), which are flattened away only at the very
/// end, in [`RtVal::into_result`].
#[derive(Debug, Clone)]
pub enum RtVal {
    Num(f64),
    Str(String),
    Bool(bool),
    None,
    Series(Vec<Cell>),
    Frame(Vec<(String, Vec<Cell>)>),
    Df,
    List(Vec<RtVal>),
    Dict(Vec<(String, RtVal)>),
    Tuple(Vec<RtVal>),
}

pub struct Evaluator<'a> {
    table: &'a Table,
}

impl<'a> Evaluator<'a> {
    pub fn new(table: &'a Table) -> Self {
        Self { table }
    }

    /// Runs a whole preprocessed fragment: if it is a single expression
    /// statement, evaluates and returns it directly; otherwise executes
    /// each statement in order and reads back the sink variable.
    pub fn run(&self, stmts: &[Stmt]) -> Result<SandboxValue, SandboxError> {
        if stmts.len() == 1 {
            if let Stmt::Expr(e) = &stmts[0] {
                let v = self.eval(e, &HashMap::new())?;
                return v.into_result();
            }
        }

        let mut env: HashMap<String, RtVal> = HashMap::new();
        for stmt in stmts {
            match stmt {
                Stmt::Expr(e) => {
                    self.eval(e, &env)?;
                }
                Stmt::Assign { target, value } => {
                    let v = self.eval(value, &env)?;
                    env.insert(target.clone(), v);
                }
                _ => unreachable!("non-expression statements are rejected by the whitelist pass"),
            }
        }
        match env.get(crate::whitelist::SINK_VARIABLE) {
            Some(v) => v.clone().into_result(),
            None => Err(SandboxError::Runtime(
                "statement form did not assign __result__".to_string(),
            )),
        }
    }

    fn eval(&self, expr: &Expr, env: &HashMap<String, RtVal>) -> Result<RtVal, SandboxError> {
        match expr {
            Expr::Num(n) => Ok(RtVal::Num(*n)),
            Expr::Str(s) => Ok(RtVal::Str(s.clone())),
            Expr::Bool(b) => Ok(RtVal::Bool(*b)),
            Expr::NoneLit => Ok(RtVal::None),
            Expr::Name(n) if n == "df" => Ok(RtVal::Df),
            Expr::Name(n) if n == "pd" || n == "np" => Ok(RtVal::Str(n.clone())),
            Expr::Name(n) => env
                .get(n)
                .cloned()
                .ok_or_else(|| SandboxError::Runtime(format!("name '{n}' is not bound"))),
            Expr::Tuple(items) => Ok(RtVal::Tuple(self.eval_all(items, env)?)),
            Expr::ListLit(items) => Ok(RtVal::List(self.eval_all(items, env)?)),
            Expr::SetLit(items) => Ok(RtVal::List(self.eval_all(items, env)?)),
            Expr::DictLit(pairs) => {
                let mut out = Vec::new();
                for (k, v) in pairs {
                    let key = match self.eval(k, env)? {
                        RtVal::Str(s) => s,
                        other => other.display(),
                    };
                    out.push((key, self.eval(v, env)?));
                }
                Ok(RtVal::Dict(out))
            }
            Expr::UnaryOp(op, inner) => {
                let v = self.eval(inner, env)?;
                match (op.as_str(), &v) {
                    ("-", RtVal::Num(n)) => Ok(RtVal::Num(-n)),
                    ("not", RtVal::Bool(b)) => Ok(RtVal::Bool(!b)),
                    ("not", other) => Ok(RtVal::Bool(!other.truthy())),
                    _ => Err(SandboxError::Runtime(format!("cannot apply unary '{op}'"))),
                }
            }
            Expr::BinOp(l, op, r) => {
                let lv = self.eval(l, env)?;
                let rv = self.eval(r, env)?;
                eval_binop(op, lv, rv)
            }
            Expr::Compare(l, op, r) => {
                let lv = self.eval(l, env)?;
                let rv = self.eval(r, env)?;
                eval_compare(op, lv, rv)
            }
            Expr::BoolOp(op, items) => {
                let mut result = None;
                for item in items {
                    let v = self.eval(item, env)?;
                    let truthy = v.truthy();
                    result = Some(v);
                    if op == "and" && !truthy {
                        break;
                    }
                    if op == "or" && truthy {
                        break;
                    }
                }
                Ok(result.unwrap_or(RtVal::Bool(op == "and")))
            }
            Expr::IfExp { body, test, orelse } => {
                if self.eval(test, env)?.truthy() {
                    self.eval(body, env)
                } else {
                    self.eval(orelse, env)
                }
            }
            Expr::ListComp { elt, var, iter, cond } => {
                let iterable = self.eval(iter, env)?.into_iter_values()?;
                let mut out = Vec::new();
                for item in iterable {
                    let mut scoped = env.clone();
                    scoped.insert(var.clone(), item);
                    if let Some(c) = cond {
                        if !self.eval(c, &scoped)?.truthy() {
                            continue;
                        }
                    }
                    out.push(self.eval(elt, &scoped)?);
                }
                Ok(RtVal::List(out))
            }
            Expr::Subscript(base, index) => {
                let base_v = self.eval(base, env)?;
                self.eval_subscript(base_v, index, env)
            }
            Expr::Attribute(base, attr) => {
                let base_v = self.eval(base, env)?;
                self.eval_attribute(base_v, attr)
            }
            Expr::Call { func, args, kwargs } => self.eval_call(func, args, kwargs, env),
        }
    }

    fn eval_all(&self, items: &[Expr], env: &HashMap<String, RtVal>) -> Result<Vec<RtVal>, SandboxError> {
        items.iter().map(|i| self.eval(i, env)).collect()
    }

    fn eval_subscript(&self, base: RtVal, index: &Expr, env: &HashMap<String, RtVal>) -> Result<RtVal, SandboxError> {
        match base {
            RtVal::Df => match index {
                Expr::Str(col) => self.column_series(col),
                Expr::ListLit(items) => {
                    let names: Vec<String> = items
                        .iter()
                        .map(|i| match i {
                            Expr::Str(s) => Ok(s.clone()),
                            _ => Err(SandboxError::Syntax("column selection must be string literals".to_string())),
                        })
                        .collect::<Result<_, _>>()?;
                    self.frame_of(&names)
                }
                // pandas treats a tuple subscript as a single (MultiIndex)
                // key, not a multi-column selector: `df[(a, b)]` is a shape
                // error that the `repair` module's tuple-to-list rewrite
                // targets, not a valid selection to execute natively.
                Expr::Tuple(_) => {
                    Err(SandboxError::Runtime("multi-column tuple selection is not supported; use a list".to_string()))
                }
                other => {
                    let v = self.eval(other, env)?;
                    match v {
                        RtVal::Str(col) => self.column_series(&col),
                        RtVal::List(items) => {
                            let names: Vec<String> = items.iter().map(RtVal::display).collect();
                            self.frame_of(&names)
                        }
                        RtVal::Tuple(_) => Err(SandboxError::Runtime(
                            "multi-column tuple selection is not supported; use a list".to_string(),
                        )),
                        _ => Err(SandboxError::Runtime("unsupported dataframe subscript".to_string())),
                    }
                }
            },
            RtVal::Dict(pairs) => {
                let key = match self.eval(index, env)? {
                    RtVal::Str(s) => s,
                    other => other.display(),
                };
                pairs
                    .into_iter()
                    .find(|(k, _)| *k == key)
                    .map(|(_, v)| v)
                    .ok_or_else(|| SandboxError::Runtime(format!("key '{key}' not found")))
            }
            RtVal::List(items) | RtVal::Tuple(items) => {
                let idx = match self.eval(index, env)? {
                    RtVal::Num(n) => n as i64,
                    _ => return Err(SandboxError::Runtime("list index must be an integer".to_string())),
                };
                let len = items.len() as i64;
                let resolved = if idx < 0 { len + idx } else { idx };
                items
                    .get(resolved as usize)
                    .cloned()
                    .ok_or_else(|| SandboxError::Runtime("index out of range".to_string()))
            }
            other => Err(SandboxError::Runtime(format!("value {other:?} is not subscriptable"))),
        }
    }

    fn column_series(&self, name: &str) -> Result<RtVal, SandboxError> {
        match self.table.column_values(name) {
            Some(cells) => Ok(RtVal::Series(cells.into_iter().cloned().collect())),
            None => Err(SandboxError::Runtime(format!("column '{name}' not found"))),
        }
    }

    fn frame_of(&self, names: &[String]) -> Result<RtVal, SandboxError> {
        let mut cols = Vec::new();
        for name in names {
            let cells = self
                .table
                .column_values(name)
                .ok_or_else(|| SandboxError::Runtime(format!("column '{name}' not found")))?;
            cols.push((name.clone(), cells.into_iter().cloned().collect()));
        }
        Ok(RtVal::Frame(cols))
    }

    fn eval_attribute(&self, base: RtVal, attr: &str) -> Result<RtVal, SandboxError> {
        match (base, attr) {
            (RtVal::Df, "shape") => Ok(RtVal::Tuple(vec![
                RtVal::Num(self.table.row_count() as f64),
                RtVal::Num(self.table.column_count() as f64),
            ])),
            (RtVal::Df, "columns") => Ok(RtVal::List(self.table.columns.iter().map(|c| RtVal::Str(c.clone())).collect())),
            (RtVal::Df, "empty") => Ok(RtVal::Bool(self.table.row_count() == 0)),
            (base, _) => Ok(base),
        }
    }

    fn eval_call(
        &self,
        func: &Expr,
        args: &[Expr],
        kwargs: &[(String, Expr)],
        env: &HashMap<String, RtVal>,
    ) -> Result<RtVal, SandboxError> {
        let arg_vals = self.eval_all(args, env)?;
        let kwarg_vals: Vec<(String, RtVal)> = kwargs
            .iter()
            .map(|(k, v)| Ok((k.clone(), self.eval(v, env)?)))
            .collect::<Result<_, SandboxError>>()?;

        match func {
            Expr::Attribute(base, method) => {
                let base_v = self.eval(base, env)?;
                match (&base_v, method.as_str()) {
                    (RtVal::Df, "groupby") => {
                        let key_col = match arg_vals.first() {
                            Some(RtVal::Str(s)) => s.clone(),
                            // `groupby(['col'])`/`groupby(('col',))` — the
                            // list/tuple form of a single grouping key,
                            // as produced by the `repair` module's
                            // tuple-to-list rewrite.
                            Some(RtVal::List(items) | RtVal::Tuple(items)) if items.len() == 1 => match &items[0] {
                                RtVal::Str(s) => s.clone(),
                                _ => return Err(SandboxError::Runtime("groupby requires a column name".to_string())),
                            },
                            _ => return Err(SandboxError::Runtime("groupby requires a column name".to_string())),
                        };
                        self.groupby(&key_col)
                    }
                    (RtVal::Series(cells), name) => reduce_series(name, cells, &arg_vals),
                    (RtVal::Frame(cols), name) => {
                        let mut out = Vec::new();
                        for (col_name, cells) in cols {
                            out.push((col_name.clone(), reduce_series(name, cells, &arg_vals)?));
                        }
                        Ok(RtVal::Dict(out))
                    }
                    (RtVal::Dict(groups), name) if is_group_reducer(name) => {
                        group_agg(groups, name, &arg_vals, &kwarg_vals)
                    }
                    (RtVal::List(items), "len") => Ok(RtVal::Num(items.len() as f64)),
                    _ => Err(SandboxError::Runtime(format!("method '{method}' is not supported by the evaluator"))),
                }
            }
            Expr::Name(name) => eval_builtin_call(name, &arg_vals),
            _ => Err(SandboxError::Runtime("unsupported call target".to_string())),
        }
    }

    fn groupby(&self, key_col: &str) -> Result<RtVal, SandboxError> {
        let key_idx = self
            .table
            .column_index(key_col)
            .ok_or_else(|| SandboxError::Runtime(format!("column '{key_col}' not found")))?;
        let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
        for (row_idx, row) in self.table.rows.iter().enumerate() {
            let key = row[key_idx].display();
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, rows)) => rows.push(row_idx),
                None => groups.push((key, vec![row_idx])),
            }
        }

        let mut out = Vec::new();
        for (key, row_idxs) in groups {
            let mut cols = Vec::new();
            for (ci, col) in self.table.columns.iter().enumerate() {
                if ci == key_idx {
                    continue;
                }
                let cells: Vec<Cell> = row_idxs.iter().map(|&r| self.table.rows[r][ci].clone()).collect();
                cols.push((col.clone(), RtVal::Series(cells)));
            }
            out.push((key, RtVal::Dict(cols)));
        }
        Ok(RtVal::Dict(out))
    }
}

/// The reducer method names dispatchable against a post-`groupby` `Dict`
/// of group key -> column series.
fn is_group_reducer(method: &str) -> bool {
    matches!(
        method,
        "agg" | "mean" | "sum" | "count" | "max" | "min" | "std" | "var" | "median" | "nunique"
    )
}

/// Applies the requested reducer to every column of every group. For
/// `.agg(...)`, the actual reducer name comes from the first positional
/// (or `func=`) argument rather than the method name itself.
fn group_agg(
    groups: &[(String, RtVal)],
    method: &str,
    args: &[RtVal],
    kwargs: &[(String, RtVal)],
) -> Result<RtVal, SandboxError> {
    let reducer = if method == "agg" {
        match args.first().or_else(|| kwargs.iter().find(|(k, _)| k == "func").map(|(_, v)| v)) {
            Some(RtVal::Str(s)) => s.clone(),
            _ => return Err(SandboxError::Runtime("agg() requires a reducer name".to_string())),
        }
    } else {
        method.to_string()
    };

    let mut out = Vec::new();
    for (key, cols) in groups {
        if let RtVal::Dict(cols) = cols {
            let mut row = Vec::new();
            for (col_name, v) in cols {
                if let RtVal::Series(cells) = v {
                    row.push((col_name.clone(), reduce_series(&reducer, cells, &[])?));
                }
            }
            out.push((key.clone(), RtVal::Dict(row)));
        }
    }
    Ok(RtVal::Dict(out))
}

fn eval_builtin_call(name: &str, args: &[RtVal]) -> Result<RtVal, SandboxError> {
    match name {
        "len" => match args.first() {
            Some(RtVal::Series(cells)) => Ok(RtVal::Num(cells.len() as f64)),
            Some(RtVal::List(items) | RtVal::Tuple(items)) => Ok(RtVal::Num(items.len() as f64)),
            Some(RtVal::Str(s)) => Ok(RtVal::Num(s.chars().count() as f64)),
            _ => Err(SandboxError::Runtime("len() requires a sized argument".to_string())),
        },
        "abs" => match args.first() {
            Some(RtVal::Num(n)) => Ok(RtVal::Num(n.abs())),
            _ => Err(SandboxError::Runtime("abs() requires a number".to_string())),
        },
        "round" => match args.first() {
            Some(RtVal::Num(n)) => Ok(RtVal::Num(n.round())),
            _ => Err(SandboxError::Runtime("round() requires a number".to_string())),
        },
        "sum" => match args.first() {
            Some(RtVal::List(items) | RtVal::Tuple(items)) => {
                let total: f64 = items.iter().filter_map(RtVal::as_f64).sum();
                Ok(RtVal::Num(total))
            }
            _ => Err(SandboxError::Runtime("sum() requires a sequence".to_string())),
        },
        "min" | "max" => {
            let nums: Vec<f64> = args.iter().filter_map(RtVal::as_f64).collect();
            let v = if name == "min" {
                nums.into_iter().fold(f64::INFINITY, f64::min)
            } else {
                nums.into_iter().fold(f64::NEG_INFINITY, f64::max)
            };
            Ok(RtVal::Num(v))
        }
        "list" | "tuple" | "set" => match args.first() {
            Some(RtVal::Series(cells)) => {
                Ok(RtVal::List(cells.iter().map(|c| RtVal::from_cell(c)).collect()))
            }
            Some(other) => Ok(other.clone()),
            None => Ok(RtVal::List(Vec::new())),
        },
        _ => Err(SandboxError::Runtime(format!("builtin '{name}' is not supported by the evaluator"))),
    }
}

fn reduce_series(method: &str, cells: &[Cell], args: &[RtVal]) -> Result<RtVal, SandboxError> {
    let numeric: Vec<f64> = cells.iter().filter_map(Cell::as_f64).collect();
    let non_empty: Vec<&Cell> = cells.iter().filter(|c| !matches!(c, Cell::Empty)).collect();

    match method {
        "sum" => Ok(RtVal::Num(numeric.iter().sum())),
        "mean" => mean(&numeric),
        "max" => numeric.iter().cloned().fold(None, |acc: Option<f64>, n| Some(acc.map_or(n, |a| a.max(n)))).map(RtVal::Num).ok_or_else(no_numeric),
        "min" => numeric.iter().cloned().fold(None, |acc: Option<f64>, n| Some(acc.map_or(n, |a| a.min(n)))).map(RtVal::Num).ok_or_else(no_numeric),
        "count" => Ok(RtVal::Num(non_empty.len() as f64)),
        "std" => variance(&numeric).map(|v| RtVal::Num(v.sqrt())),
        "var" => variance(&numeric).map(RtVal::Num),
        "median" => median(&numeric),
        "quantile" => {
            let q = args.first().and_then(RtVal::as_f64).unwrap_or(0.5);
            quantile(&numeric, q)
        }
        "nunique" => {
            let mut distinct: Vec<String> = non_empty.iter().map(|c| c.display()).collect();
            distinct.sort();
            distinct.dedup();
            Ok(RtVal::Num(distinct.len() as f64))
        }
        "unique" => {
            let mut seen = Vec::new();
            for c in &non_empty {
                let d = c.display();
                if !seen.contains(&d) {
                    seen.push(d.clone());
                    let _ = d;
                }
            }
            Ok(RtVal::List(seen.into_iter().map(RtVal::Str).collect()))
        }
        "mode" => mode(&non_empty),
        "value_counts" => value_counts(&non_empty),
        "first" => non_empty.first().map(|c| RtVal::from_cell(c)).ok_or_else(no_numeric),
        "last" => non_empty.last().map(|c| RtVal::from_cell(c)).ok_or_else(no_numeric),
        "empty" => Ok(RtVal::Bool(cells.is_empty())),
        "any" => Ok(RtVal::Bool(cells.iter().any(cell_truthy))),
        "all" => Ok(RtVal::Bool(cells.iter().all(cell_truthy))),
        "isna" | "notna" => {
            let flags: Vec<RtVal> = cells
                .iter()
                .map(|c| RtVal::Bool(matches!(c, Cell::Empty) == (method == "isna")))
                .collect();
            Ok(RtVal::List(flags))
        }
        "to_list" | "to_numpy" => Ok(RtVal::List(cells.iter().map(RtVal::from_cell).collect())),
        "to_dict" => Ok(RtVal::Dict(
            cells.iter().enumerate().map(|(i, c)| (i.to_string(), RtVal::from_cell(c))).collect(),
        )),
        "head" => {
            let n = args.first().and_then(RtVal::as_f64).unwrap_or(5.0) as usize;
            Ok(RtVal::List(cells.iter().take(n).map(RtVal::from_cell).collect()))
        }
        "tail" => {
            let n = args.first().and_then(RtVal::as_f64).unwrap_or(5.0) as usize;
            let skip = cells.len().saturating_sub(n);
            Ok(RtVal::List(cells.iter().skip(skip).map(RtVal::from_cell).collect()))
        }
        "describe" => describe(&numeric),
        other => Err(SandboxError::Runtime(format!("method '{other}' is not supported by the evaluator"))),
    }
}

fn no_numeric() -> SandboxError {
    SandboxError::Runtime("no numeric values to reduce".to_string())
}

fn mean(numeric: &[f64]) -> Result<RtVal, SandboxError> {
    if numeric.is_empty() {
        return Ok(RtVal::None);
    }
    Ok(RtVal::Num(numeric.iter().sum::<f64>() / numeric.len() as f64))
}

fn variance(numeric: &[f64]) -> Result<RtVal, SandboxError> {
    if numeric.len() < 2 {
        return Ok(RtVal::None);
    }
    let mean = numeric.iter().sum::<f64>() / numeric.len() as f64;
    let sum_sq: f64 = numeric.iter().map(|n| (n - mean).powi(2)).sum();
    Ok(RtVal::Num(sum_sq / (numeric.len() as f64 - 1.0)))
}

fn median(numeric: &[f64]) -> Result<RtVal, SandboxError> {
    if numeric.is_empty() {
        return Ok(RtVal::None);
    }
    let mut sorted = numeric.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = sorted.len() / 2;
    let v = if sorted.len() % 2 == 0 { (sorted[mid - 1] + sorted[mid]) / 2.0 } else { sorted[mid] };
    Ok(RtVal::Num(v))
}

fn quantile(numeric: &[f64], q: f64) -> Result<RtVal, SandboxError> {
    if numeric.is_empty() {
        return Ok(RtVal::None);
    }
    let mut sorted = numeric.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    let v = sorted[lo] + (sorted[hi] - sorted[lo]) * frac;
    Ok(RtVal::Num(v))
}

fn mode(cells: &[&Cell]) -> Result<RtVal, SandboxError> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for c in cells {
        let d = c.display();
        match counts.iter_mut().find(|(k, _)| *k == d) {
            Some((_, n)) => *n += 1,
            None => counts.push((d, 1)),
        }
    }
    let best = counts.into_iter().max_by_key(|(_, n)| *n);
    match best {
        Some((v, _)) => Ok(RtVal::Str(v)),
        None => Ok(RtVal::None),
    }
}

fn value_counts(cells: &[&Cell]) -> Result<RtVal, SandboxError> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for c in cells {
        let d = c.display();
        match counts.iter_mut().find(|(k, _)| *k == d) {
            Some((_, n)) => *n += 1,
            None => counts.push((d, 1)),
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    Ok(RtVal::Dict(counts.into_iter().map(|(k, n)| (k, RtVal::Num(n as f64))).collect()))
}

fn describe(numeric: &[f64]) -> Result<RtVal, SandboxError> {
    let count = numeric.len() as f64;
    let mean_v = mean(numeric)?;
    let std_v = variance(numeric)?;
    let mut sorted = numeric.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let min_v = sorted.first().copied().unwrap_or(f64::NAN);
    let max_v = sorted.last().copied().unwrap_or(f64::NAN);
    Ok(RtVal::Dict(vec![
        ("count".to_string(), RtVal::Num(count)),
        ("mean".to_string(), mean_v),
        ("std".to_string(), match std_v {
            RtVal::Num(v) => RtVal::Num(v.sqrt()),
            other => other,
        }),
        ("min".to_string(), RtVal::Num(min_v)),
        ("max".to_string(), RtVal::Num(max_v)),
    ]))
}

fn cell_truthy(c: &Cell) -> bool {
    match c {
        Cell::Empty => false,
        Cell::Number(n) => *n != 0.0,
        Cell::Text(s) => !s.is_empty(),
    }
}

fn eval_binop(op: &str, l: RtVal, r: RtVal) -> Result<RtVal, SandboxError> {
    let (lf, rf) = match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(SandboxError::Runtime(format!("cannot apply '{op}' to non-numeric operands"))),
    };
    let v = match op {
        "+" => lf + rf,
        "-" => lf - rf,
        "*" => lf * rf,
        "/" => {
            if rf == 0.0 {
                return Err(SandboxError::Runtime("division by zero".to_string()));
            }
            lf / rf
        }
        "%" => lf % rf,
        "//" => (lf / rf).floor(),
        "**" => lf.powf(rf),
        other => return Err(SandboxError::Runtime(format!("unsupported operator '{other}'"))),
    };
    Ok(RtVal::Num(v))
}

fn eval_compare(op: &str, l: RtVal, r: RtVal) -> Result<RtVal, SandboxError> {
    if op == "in" {
        let needle = l.display();
        return Ok(RtVal::Bool(match r {
            RtVal::List(items) | RtVal::Tuple(items) => items.iter().any(|i| i.display() == needle),
            RtVal::Str(s) => s.contains(&needle),
            _ => false,
        }));
    }
    let cmp = match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => l.display().partial_cmp(&r.display()),
    };
    let Some(ordering) = cmp else {
        return Err(SandboxError::Runtime("values are not comparable".to_string()));
    };
    let result = match op {
        "==" => ordering == std::cmp::Ordering::Equal,
        "!=" => ordering != std::cmp::Ordering::Equal,
        "<" => ordering == std::cmp::Ordering::Less,
        ">" => ordering == std::cmp::Ordering::Greater,
        "<=" => ordering != std::cmp::Ordering::Greater,
        ">=" => ordering != std::cmp::Ordering::Less,
        other => return Err(SandboxError::Runtime(format!("unsupported comparison '{other}'"))),
    };
    Ok(RtVal::Bool(result))
}

impl RtVal {
    fn from_cell(c: &Cell) -> RtVal {
        match c {
            Cell::Number(n) => RtVal::Num(*n),
            Cell::Text(s) => RtVal::Str(s.clone()),
            Cell::Empty => RtVal::None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            RtVal::Num(n) => Some(*n),
            _ => None,
        }
    }

    fn display(&self) -> String {
        match self {
            RtVal::Num(n) => {
                if n.fract() == 0.0 {
                    format!("{n:.0}")
                } else {
                    n.to_string()
                }
            }
            RtVal::Str(s) => s.clone(),
            RtVal::Bool(b) => b.to_string(),
            RtVal::None => String::new(),
            _ => String::new(),
        }
    }

    fn truthy(&self) -> bool {
        match self {
            RtVal::Bool(b) => *b,
            RtVal::Num(n) => *n != 0.0,
            RtVal::Str(s) => !s.is_empty(),
            RtVal::None => false,
            RtVal::List(items) | RtVal::Tuple(items) => !items.is_empty(),
            _ => true,
        }
    }

    fn into_iter_values(self) -> Result<Vec<RtVal>, SandboxError> {
        match self {
            RtVal::Series(cells) => Ok(cells.iter().map(RtVal::from_cell).collect()),
            RtVal::List(items) | RtVal::Tuple(items) => Ok(items),
            other => Err(SandboxError::Runtime(format!("{other:?} is not iterable"))),
        }
    }

    /// Flattens any remaining runtime value into the sandbox's public
    /// result channel. Tabular intermediates never escape past this call.
    pub fn into_result(self) -> Result<SandboxValue, SandboxError> {
        Ok(match self {
            RtVal::Num(n) => SandboxValue::Number(n),
            RtVal::Str(s) => SandboxValue::Text(s),
            RtVal::Bool(b) => SandboxValue::Bool(b),
            RtVal::None => SandboxValue::None,
            RtVal::List(items) | RtVal::Tuple(items) => {
                SandboxValue::Sequence(items.into_iter().map(RtVal::into_result).collect::<Result<_, _>>()?)
            }
            RtVal::Dict(pairs) => SandboxValue::Mapping(
                pairs
                    .into_iter()
                    .map(|(k, v)| Ok((k, v.into_result()?)))
                    .collect::<Result<_, SandboxError>>()?,
            ),
            RtVal::Series(cells) => {
                SandboxValue::Sequence(cells.iter().map(RtVal::from_cell).map(RtVal::into_result).collect::<Result<_, _>>()?)
            }
            RtVal::Frame(cols) => SandboxValue::Mapping(
                cols.into_iter()
                    .map(|(name, cells)| {
                        Ok((
                            name,
                            SandboxValue::Sequence(
                                cells.iter().map(RtVal::from_cell).map(RtVal::into_result).collect::<Result<_, _>>()?,
                            ),
                        ))
                    })
                    .collect::<Result<_, SandboxError>>()?,
            ),
            RtVal::Df => return Err(SandboxError::Runtime("the dataset itself cannot be a result".to_string())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ast, whitelist};
    use dataloom_tablestore::parse_single_table;

    fn run(code: &str, table: &Table) -> SandboxValue {
        let stmt = ast::parse_line(code).unwrap();
        whitelist::check_stmt(&stmt).unwrap();
        Evaluator::new(table).run(&[stmt]).unwrap()
    }

    fn sales_for(result: &SandboxValue, group_key: &str) -> SandboxValue {
        match result {
            SandboxValue::Mapping(pairs) => {
                let (_, cols) = pairs.iter().find(|(k, _)| k == group_key).unwrap();
                match cols {
                    SandboxValue::Mapping(cols) => {
                        cols.iter().find(|(k, _)| k == "sales").unwrap().1.clone()
                    }
                    other => panic!("expected a per-group mapping, got {other:?}"),
                }
            }
            other => panic!("expected a mapping, got {other:?}"),
        }
    }

    #[test]
    fn groupby_sum_is_not_confused_with_mean() {
        let table = parse_single_table("region|sales\nnorth|100\nnorth|300\nsouth|200").unwrap();
        let summed = run("df.groupby('region').sum()", &table);
        let averaged = run("df.groupby('region').mean()", &table);
        assert_ne!(sales_for(&summed, "north"), sales_for(&averaged, "north"));
        assert_eq!(sales_for(&summed, "north"), SandboxValue::Number(400.0));
        assert_eq!(sales_for(&averaged, "north"), SandboxValue::Number(200.0));
    }

    #[test]
    fn groupby_agg_dispatches_by_requested_reducer() {
        let table = parse_single_table("region|sales\nnorth|100\nnorth|300\nsouth|200").unwrap();
        let result = run("df.groupby('region').agg('sum')", &table);
        assert_eq!(sales_for(&result, "north"), SandboxValue::Number(400.0));
    }

    #[test]
    fn tuple_subscript_is_a_shape_error_not_a_selection() {
        let table = parse_single_table("region|sales\nnorth|100\nsouth|200").unwrap();
        let stmt = ast::parse_line("df[('region', 'sales')]").unwrap();
        whitelist::check_stmt(&stmt).unwrap();
        let err = Evaluator::new(&table).run(&[stmt]).unwrap_err();
        assert!(matches!(err, SandboxError::Runtime(_)));
    }
}
