use flowpulse_protocol::RelayRequestBody;

const UNSPECIFIED: &str = "unspecified";

/// Fills `{field}` placeholders from the request's mode fields.
///
/// Unknown placeholders render as `unspecified`. Text that does not form a
/// `{identifier}` pair (stray braces, JSON examples in the prompt) is kept verbatim.
pub fn render_system_prompt(template: &str, body: &RelayRequestBody) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if is_placeholder_name(&after[..close]) => {
                let name = &after[..close];
                match body.field_text(name) {
                    Some(value) => out.push_str(&value),
                    None => out.push_str(UNSPECIFIED),
                }
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowpulse_protocol::Message;
    use serde_json::json;

    fn body(fields: serde_json::Value) -> RelayRequestBody {
        let mut body = RelayRequestBody::new(vec![Message::user("hi")]);
        if let serde_json::Value::Object(map) = fields {
            body.fields = map;
        }
        body
    }

    #[test]
    fn fills_known_fields() {
        let rendered = render_system_prompt(
            "Produce a {analysisType} analysis for {company}.",
            &body(json!({"analysisType": "swot", "company": "Acme"})),
        );
        assert_eq!(rendered, "Produce a swot analysis for Acme.");
    }

    #[test]
    fn missing_fields_render_unspecified() {
        let rendered = render_system_prompt("Company: {company}", &body(json!({})));
        assert_eq!(rendered, "Company: unspecified");

        let rendered =
            render_system_prompt("Depth {depth}", &body(json!({"depth": {"nested": true}})));
        assert_eq!(rendered, "Depth unspecified");
    }

    #[test]
    fn non_placeholder_braces_are_kept() {
        let template = r#"Reply as {"summary": "..."} or { } for {company"#;
        let rendered = render_system_prompt(template, &body(json!({"company": "Acme"})));
        assert_eq!(rendered, template);
    }
}
