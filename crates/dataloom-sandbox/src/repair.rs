use regex::Regex;
use std::sync::OnceLock;

fn tuple_subscript_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\(([^()]+)\)\]").unwrap())
}

fn tuple_call_arg_re(func: &str) -> Regex {
    Regex::new(&format!(r"\b{func}\(([^()]*)\(([^()]+)\)([^()]*)\)")).unwrap()
}

/// Rewrites the multi-column tuple-selection shape error
/// (`df[(a, b)]` → `df[[a, b]]`) and the equivalent inside
/// `groupby`/`agg`/`pivot_table` index/columns/values arguments.
pub fn repair_tuple_selection(code: &str) -> String {
    let mut out = tuple_subscript_re().replace_all(code, "[[$1]]").to_string();
    for func in ["groupby", "agg", "pivot_table"] {
        let re = tuple_call_arg_re(func);
        let replacement = format!("{func}($1[$2]$3)");
        out = re.replace_all(&out, replacement.as_str()).to_string();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_tuple_subscript_to_list() {
        assert_eq!(repair_tuple_selection("df[(a, b)]"), "df[[a, b]]");
    }

    #[test]
    fn leaves_already_valid_code_untouched() {
        assert_eq!(repair_tuple_selection("df['a'].sum()"), "df['a'].sum()");
    }
}
