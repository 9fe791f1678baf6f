//! Locating JSON in free-form model replies and folding partial updates
//! into accumulated state.

use serde_json::{Map, Value};

/// Finds the JSON object a model reply carries. Fenced ```json blocks win,
/// then any fenced block, then the whole reply, then the first balanced
/// `{...}` span.
pub fn extract_json(text: &str) -> Result<Value, String> {
    for block in fenced_blocks(text) {
        if block.tagged_json
            && let Ok(value) = serde_json::from_str::<Value>(block.body)
        {
            return Ok(value);
        }
    }
    for block in fenced_blocks(text) {
        if let Ok(value) = serde_json::from_str::<Value>(block.body) {
            return Ok(value);
        }
    }

    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed)
        && (value.is_object() || value.is_array())
    {
        return Ok(value);
    }

    if let Some(span) = first_balanced_object(trimmed)
        && let Ok(value) = serde_json::from_str::<Value>(span)
    {
        return Ok(value);
    }

    Err("no JSON object found in reply".to_string())
}

struct FencedBlock<'a> {
    tagged_json: bool,
    body: &'a str,
}

fn fenced_blocks(text: &str) -> Vec<FencedBlock<'_>> {
    let mut blocks = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find("```") {
        let after_fence = &rest[start + 3..];
        let (info, body_start) = match after_fence.find('\n') {
            Some(newline) => (&after_fence[..newline], newline + 1),
            None => break,
        };
        let body_and_rest = &after_fence[body_start..];
        let Some(end) = body_and_rest.find("```") else {
            break;
        };
        blocks.push(FencedBlock {
            tagged_json: info.trim().eq_ignore_ascii_case("json"),
            body: body_and_rest[..end].trim(),
        });
        rest = &body_and_rest[end + 3..];
    }

    blocks
}

fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Recursively merges `update` into `prior`. Objects merge key by key,
/// `null` leaves the prior value in place, anything else replaces it.
pub fn deep_merge(prior: &Value, update: &Value) -> Value {
    match (prior, update) {
        (Value::Object(base), Value::Object(patch)) => {
            let mut merged: Map<String, Value> = base.clone();
            for (key, value) in patch {
                let next = match merged.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None if value.is_null() => continue,
                    None => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        (_, Value::Null) => prior.clone(),
        (_, other) => other.clone(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub state: Value,
    /// Set when the evidence held no usable JSON; `state` is then the prior.
    pub warning: Option<String>,
}

/// Folds structured facts found in a model reply into the prior state.
/// Extraction failure is not an error: the prior state is kept and the
/// reason is reported for logging.
pub fn merge_extracted(prior: &Value, evidence: &str) -> MergeOutcome {
    match extract_json(evidence) {
        Ok(update @ Value::Object(_)) => MergeOutcome {
            state: deep_merge(prior, &update),
            warning: None,
        },
        Ok(_) => MergeOutcome {
            state: prior.clone(),
            warning: Some("extracted JSON is not an object".to_string()),
        },
        Err(reason) => MergeOutcome {
            state: prior.clone(),
            warning: Some(reason),
        },
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn prefers_tagged_fence() {
        let reply = "Here you go:\n```\n[1,2]\n```\nand\n```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json(reply).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn falls_back_to_balanced_span() {
        let reply = r#"Sure! The result is {"title": "a {brace} in \"text\"", "n": {"x": 1}} hope it helps"#;
        assert_eq!(
            extract_json(reply).unwrap(),
            json!({"title": "a {brace} in \"text\"", "n": {"x": 1}})
        );
        assert!(extract_json("no json here").is_err());
        assert!(extract_json("{ unbalanced").is_err());
    }

    #[test]
    fn merge_keeps_prior_on_garbage() {
        let prior = json!({"businessName": "Harbor"});
        let outcome = merge_extracted(&prior, "I could not find anything.");
        assert_eq!(outcome.state, prior);
        assert!(outcome.warning.is_some());
    }

    #[test]
    fn merge_is_deep_and_ignores_nulls() {
        let prior = json!({"businessName": "Harbor", "contact": {"phone": "1", "email": "a@b"}});
        let evidence = "```json\n{\"contact\": {\"phone\": \"2\"}, \"industry\": \"bakery\", \"businessName\": null}\n```";
        let outcome = merge_extracted(&prior, evidence);
        assert!(outcome.warning.is_none());
        assert_eq!(
            outcome.state,
            json!({
                "businessName": "Harbor",
                "industry": "bakery",
                "contact": {"phone": "2", "email": "a@b"}
            })
        );
    }
}
