use serde_json::json;
use serde_json::Value;

pub fn session_json(id: &str, title: &str, updated: f64) -> Value {
    return json!({
        "id": id,
        "projectID": "proj-1",
        "directory": "/tmp/project",
        "title": title,
        "version": "0.15.0",
        "time": {
            "created": 1.0,
            "updated": updated
        }
    });
}

pub fn user_message_json(session_id: &str, id: &str) -> Value {
    return json!({
        "id": id,
        "sessionID": session_id,
        "role": "user",
        "time": { "created": 1.0 },
        "agent": "build",
        "model": {
            "providerID": "anthropic",
            "modelID": "claude-sonnet-4"
        }
    });
}

pub fn assistant_message_json(session_id: &str, id: &str, parent_id: &str) -> Value {
    return json!({
        "id": id,
        "sessionID": session_id,
        "role": "assistant",
        "time": { "created": 2.0 },
        "parentID": parent_id,
        "modelID": "claude-sonnet-4",
        "providerID": "anthropic",
        "agent": "build",
        "mode": "build",
        "path": { "cwd": "/tmp/project", "root": "/tmp/project" },
        "cost": 0.0012,
        "tokens": {
            "input": 120,
            "output": 48,
            "reasoning": 0,
            "cache": { "read": 0, "write": 0 }
        }
    });
}

pub fn text_part_json(session_id: &str, message_id: &str, id: &str, text: &str) -> Value {
    return json!({
        "id": id,
        "sessionID": session_id,
        "messageID": message_id,
        "type": "text",
        "text": text
    });
}

pub fn tool_part_json(session_id: &str, message_id: &str, id: &str, state: Value) -> Value {
    return json!({
        "id": id,
        "sessionID": session_id,
        "messageID": message_id,
        "type": "tool",
        "callID": "call-1",
        "tool": "glob",
        "state": state
    });
}

pub fn question_json(session_id: &str, id: &str) -> Value {
    return json!({
        "id": id,
        "sessionID": session_id,
        "questions": [
            {
                "question": "Which citation style should the bibliography use?",
                "header": "Citations",
                "options": [
                    { "label": "APA", "description": "Author-date" },
                    { "label": "Chicago" }
                ]
            }
        ],
        "tool": { "messageID": "msg_2", "callID": "call-1" }
    });
}

pub fn event_json(kind: &str, properties: Value) -> Value {
    return json!({
        "type": kind,
        "properties": properties
    });
}

/// Wraps event envelopes into a `text/event-stream` body.
pub fn sse_body(events: &[Value]) -> String {
    return events
        .iter()
        .map(|event| {
            return format!("data: {event}\n\n");
        })
        .collect::<Vec<String>>()
        .join("");
}
