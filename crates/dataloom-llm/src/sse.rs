use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct StreamEnvelope {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
}

/// Result of parsing one buffered chunk of an SSE stream: the text deltas
/// found in it, and whether the `[DONE]` sentinel was seen.
#[derive(Debug, Default)]
pub struct ParsedChunk {
    pub deltas: Vec<String>,
    pub done: bool,
}

/// Parses a buffer of `data: ...` lines per the Qwen/OpenAI-compatible SSE
/// contract: `data: [DONE]` terminates, malformed JSON payloads are skipped
/// silently, and `choices[0].delta.content` is extracted from the rest.
pub fn parse_sse_buffer(buf: &str) -> ParsedChunk {
    let mut out = ParsedChunk::default();
    for line in buf.lines() {
        let Some(data) = line.strip_prefix("data: ") else {
            continue;
        };
        if data == "[DONE]" {
            out.done = true;
            break;
        }
        match serde_json::from_str::<StreamEnvelope>(data) {
            Ok(envelope) => {
                if let Some(choice) = envelope.choices.into_iter().next() {
                    if let Some(content) = choice.delta.content {
                        out.deltas.push(content);
                    }
                }
            }
            Err(_) => continue,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_content_deltas() {
        let buf = "data: {\"choices\":[{\"delta\":{\"content\":\"he\"}}]}\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}\n";
        let parsed = parse_sse_buffer(buf);
        assert_eq!(parsed.deltas, vec!["he", "llo"]);
        assert!(!parsed.done);
    }

    #[test]
    fn stops_at_done_sentinel() {
        let buf = "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\ndata: [DONE]\ndata: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n";
        let parsed = parse_sse_buffer(buf);
        assert_eq!(parsed.deltas, vec!["a"]);
        assert!(parsed.done);
    }

    #[test]
    fn skips_malformed_json_silently() {
        let buf = "data: not json\ndata: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n";
        let parsed = parse_sse_buffer(buf);
        assert_eq!(parsed.deltas, vec!["ok"]);
    }

    #[test]
    fn ignores_lines_without_data_prefix() {
        let buf = "event: ping\ndata: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n";
        let parsed = parse_sse_buffer(buf);
        assert_eq!(parsed.deltas, vec!["ok"]);
    }
}
