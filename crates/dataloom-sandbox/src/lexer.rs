#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Name(String),
    Number(f64),
    Str(String),
    Op(String),
    Keyword(String),
    Eof,
}

const KEYWORDS: [&str; 13] = [
    "and", "or", "not", "if", "else", "for", "in", "import", "from", "def", "class", "while",
    "lambda",
];

pub fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    let mut tokens = Vec::new();

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '#' {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if c.is_ascii_digit() || (c == '.' && i + 1 < chars.len() && chars[i + 1].is_ascii_digit()) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let n: f64 = text.parse().map_err(|_| format!("bad number literal {text}"))?;
            tokens.push(Token::Number(n));
            continue;
        }
        if c == '\'' || c == '"' {
            let quote = c;
            i += 1;
            let start = i;
            while i < chars.len() && chars[i] != quote {
                i += 1;
            }
            if i >= chars.len() {
                return Err("unterminated string literal".to_string());
            }
            let text: String = chars[start..i].iter().collect();
            i += 1;
            tokens.push(Token::Str(text));
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            if KEYWORDS.contains(&text.as_str()) {
                tokens.push(Token::Keyword(text));
            } else {
                tokens.push(Token::Name(text));
            }
            continue;
        }

        // multi-char operators first
        let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
        const TWO_CHAR: [&str; 8] = ["==", "!=", ">=", "<=", "**", "//", "->", "+="];
        if TWO_CHAR.contains(&two.as_str()) {
            tokens.push(Token::Op(two));
            i += 2;
            continue;
        }
        const ONE_CHAR: &str = "+-*/%()[]{}.,:=<>";
        if ONE_CHAR.contains(c) {
            tokens.push(Token::Op(c.to_string()));
            i += 1;
            continue;
        }

        return Err(format!("unexpected character {c:?}"));
    }

    tokens.push(Token::Eof);
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_a_method_chain() {
        let toks = tokenize("df['sales'].sum()").unwrap();
        assert_eq!(
            toks,
            vec![
                Token::Name("df".into()),
                Token::Op("[".into()),
                Token::Str("sales".into()),
                Token::Op("]".into()),
                Token::Op(".".into()),
                Token::Name("sum".into()),
                Token::Op("(".into()),
                Token::Op(")".into()),
                Token::Eof,
            ]
        );
    }
}
