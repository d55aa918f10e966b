/// Strips Markdown code fences, blank lines, and comments; rewrites the
/// deprecated `DataFrame.append` call into a `pd.concat` form. Import
/// statements are deliberately left untouched — they must reach
/// `ast::parse_line`/`whitelist::check_stmt` so the whitelist can reject
/// them as unsafe, rather than being silently dropped here.
pub fn preprocess(code: &str) -> String {
    let mut lines: Vec<&str> = code.lines().collect();

    // Drop a leading/trailing ``` or ```python fence if present.
    if lines.first().map(|l| l.trim_start().starts_with("```")).unwrap_or(false) {
        lines.remove(0);
    }
    if lines.last().map(|l| l.trim().starts_with("```")).unwrap_or(false) {
        lines.pop();
    }

    let kept: Vec<String> = lines
        .into_iter()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter(|l| !l.starts_with('#'))
        .map(rewrite_deprecated_append)
        .collect();

    kept.join("\n")
}

/// `a.append(b)` (pandas' removed `DataFrame.append`) becomes
/// `pd.concat([a, b])`.
fn rewrite_deprecated_append(line: &str) -> String {
    if let Some(dot_idx) = line.find(".append(") {
        if line.trim_end().ends_with(')') {
            let receiver = &line[..dot_idx];
            let inner = &line[dot_idx + ".append(".len()..line.len() - 1];
            return format!("pd.concat([{receiver}, {inner}])");
        }
    }
    line.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fences_comments_and_blanks() {
        let code = "```python\n# a comment\n\ndf['sales'].sum()\n```";
        assert_eq!(preprocess(code), "df['sales'].sum()");
    }

    #[test]
    fn import_lines_pass_through_untouched() {
        let code = "```python\nimport pandas as pd\ndf['sales'].sum()\n```";
        assert_eq!(preprocess(code), "import pandas as pd\ndf['sales'].sum()");
    }

    #[test]
    fn rewrites_deprecated_append() {
        let code = "result = df.append(other)";
        assert_eq!(preprocess(code), "result = pd.concat([df, other])");
    }
}
