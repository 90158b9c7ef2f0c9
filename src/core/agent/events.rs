use serde::Deserialize;

/// One typed event from the agent's response stream. Upstream adds event
/// kinds over time; anything unrecognized decodes to `Unknown` and is
/// ignored rather than failing the call.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    #[serde(rename = "text-delta")]
    TextDelta { text: String },
    #[serde(rename = "final-text")]
    FinalText { text: String },
    #[serde(other)]
    Unknown,
}

/// Drain a fully-buffered event stream into the final answer text.
///
/// Accepts the three framings the agent endpoint is known to emit: an
/// SSE body (`event:`/`data:` blocks), a JSON array of events, or
/// newline-delimited JSON. `text-delta` events are concatenated in
/// order; a `final-text` event replaces whatever was accumulated.
pub fn extract_final_text(body: &str) -> Result<String, String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Ok(String::new());
    }

    let events = if trimmed.starts_with('[') {
        serde_json::from_str::<Vec<AgentEvent>>(trimmed)
            .map_err(|e| format!("invalid event array: {}", e))?
    } else if is_sse_framed(trimmed) {
        let events = decode_sse(trimmed);
        if events.is_empty() {
            return Err("no decodable events in SSE body".to_string());
        }
        events
    } else {
        decode_ndjson(trimmed)?
    };

    Ok(accumulate(events))
}

/// SSE framing is a structural property of the lines, not of the payload
/// text: a `data:` substring inside a delta must not reroute the body.
fn is_sse_framed(body: &str) -> bool {
    body.lines().any(|line| {
        let line = line.trim_start();
        line.starts_with("data:") || line.starts_with("event:")
    })
}

fn accumulate(events: Vec<AgentEvent>) -> String {
    let mut text = String::new();
    for event in events {
        match event {
            AgentEvent::TextDelta { text: delta } => text.push_str(&delta),
            AgentEvent::FinalText { text: full } => text = full,
            AgentEvent::Unknown => {}
        }
    }
    text
}

/// SSE framing: `data:` payload lines carry the event JSON. Undecodable
/// payloads are skipped, matching the tolerance rule for unknown kinds.
fn decode_sse(body: &str) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    for line in body.lines() {
        let line = line.trim();
        if let Some(data) = line.strip_prefix("data:") {
            if let Ok(event) = serde_json::from_str::<AgentEvent>(data.trim()) {
                events.push(event);
            }
        }
    }
    events
}

fn decode_ndjson(body: &str) -> Result<Vec<AgentEvent>, String> {
    let mut events = Vec::new();
    let mut decoded_any = false;
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<AgentEvent>(line) {
            Ok(event) => {
                decoded_any = true;
                events.push(event);
            }
            Err(_) => continue,
        }
    }
    if !decoded_any {
        return Err("no decodable events in response body".to_string());
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deltas_concatenate_in_order() {
        let body = r#"[{"type":"text-delta","text":"Revenue "},{"type":"text-delta","text":"is up."}]"#;
        assert_eq!(extract_final_text(body).unwrap(), "Revenue is up.");
    }

    #[test]
    fn final_text_replaces_accumulated_deltas() {
        let body = r#"[{"type":"text-delta","text":"partial"},{"type":"final-text","text":"The full answer."}]"#;
        assert_eq!(extract_final_text(body).unwrap(), "The full answer.");
    }

    #[test]
    fn unknown_event_kinds_are_ignored() {
        let body = r#"[{"type":"tool-use","name":"sql"},{"type":"final-text","text":"done"},{"type":"metrics","tokens":12}]"#;
        assert_eq!(extract_final_text(body).unwrap(), "done");
    }

    #[test]
    fn sse_framing_decodes_data_lines() {
        let body = "event: response.delta\ndata: {\"type\":\"text-delta\",\"text\":\"Hello \"}\n\nevent: response.delta\ndata: {\"type\":\"text-delta\",\"text\":\"world\"}\n\nevent: response.done\ndata: [DONE]\n";
        assert_eq!(extract_final_text(body).unwrap(), "Hello world");
    }

    #[test]
    fn ndjson_framing_decodes_lines() {
        let body = "{\"type\":\"text-delta\",\"text\":\"a\"}\n{\"type\":\"text-delta\",\"text\":\"b\"}";
        assert_eq!(extract_final_text(body).unwrap(), "ab");
    }

    #[test]
    fn ndjson_delta_text_mentioning_data_prefix_is_kept() {
        let body = "{\"type\":\"text-delta\",\"text\":\"the data: shows growth\"}";
        assert_eq!(extract_final_text(body).unwrap(), "the data: shows growth");
    }

    #[test]
    fn sse_body_with_no_decodable_events_is_a_parse_error() {
        let body = "event: response.done\ndata: [DONE]\n";
        assert!(extract_final_text(body).is_err());
    }

    #[test]
    fn malformed_array_is_a_parse_error() {
        assert!(extract_final_text("[{not json").is_err());
    }

    #[test]
    fn garbage_body_is_a_parse_error() {
        assert!(extract_final_text("<html>502 Bad Gateway</html>").is_err());
    }

    #[test]
    fn empty_body_is_empty_text() {
        assert_eq!(extract_final_text("  \n ").unwrap(), "");
    }
}
