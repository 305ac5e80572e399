use crate::authz::errors::AuthzError;
use crate::authz::model::Model;
use crate::authz::types::*;

/// Discriminator for plain policy rules.
pub const POLICY_PTYPE: &str = "p";

/// Parse a flat policy source into typed rules and role edges.
///
/// ```text
/// p, alice, /dataset1/*, GET
/// p, dataset1_admin, /dataset1/*, *
/// g, cathy, dataset1_admin
/// ```
///
/// Lines are CSV records: fields are trimmed, and a field that starts with
/// `"` directly after the comma may contain commas, with `""` for a literal
/// quote. Any bad line fails the whole parse.
pub fn parse_policy(source: &str, model: &Model) -> Result<ParsedPolicy, AuthzError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(source.as_bytes());

    let mut policy = ParsedPolicy::default();

    for result in reader.records() {
        let record = result.map_err(|e| {
            let line = e.position().map_or(0, |pos| record_line(source, pos));
            AuthzError::policy(line, e.to_string())
        })?;
        let line_no = record.position().map_or(0, |pos| record_line(source, pos));

        let mut fields: Vec<String> = record.iter().map(str::to_string).collect();
        // whitespace-only or indented comment lines
        if fields.iter().all(String::is_empty) || fields[0].starts_with('#') {
            continue;
        }
        check_fields(&fields).map_err(|reason| AuthzError::policy(line_no, reason))?;
        let ptype = fields.remove(0);

        if ptype == POLICY_PTYPE {
            let rule = rule_from_fields(fields, model)
                .map_err(|reason| AuthzError::policy(line_no, reason))?;
            policy.rules.push(rule);
        } else if model.role_arity(&ptype).is_some() {
            let edge = edge_from_fields(&ptype, fields, model)
                .map_err(|reason| AuthzError::policy(line_no, reason))?;
            policy.edges.push(edge);
        } else {
            return Err(AuthzError::policy(
                line_no,
                format!("unknown rule type `{ptype}`"),
            ));
        }
    }

    Ok(policy)
}

/// Line a record starts on. The reader positions a record where the previous
/// one ended, before any blank or comment lines it skipped.
fn record_line(source: &str, pos: &csv::Position) -> usize {
    let skipped = source
        .get(pos.byte() as usize..)
        .unwrap_or_default()
        .lines()
        .take_while(|line| line.is_empty() || line.starts_with('#'))
        .count();
    pos.line() as usize + skipped
}

fn check_fields(fields: &[String]) -> Result<(), String> {
    if fields.iter().any(|f| f.contains(['\n', '\r'])) {
        return Err("quoted field is not closed on its line".into());
    }
    if fields.iter().any(String::is_empty) {
        return Err("empty field".into());
    }
    Ok(())
}

/// Build a policy rule from its fields (discriminator already removed).
pub fn rule_from_fields(fields: Vec<String>, model: &Model) -> Result<PolicyRule, String> {
    let expected = model.policy_fields().len();
    if fields.len() != expected {
        return Err(format!(
            "policy rule has {} fields, model declares {expected} ({})",
            fields.len(),
            model.policy_fields().join(", ")
        ));
    }

    let effect = match model.eft_index() {
        Some(i) => RuleEffect::parse(&fields[i]).ok_or_else(|| {
            format!("`eft` must be `allow` or `deny`, got `{}`", fields[i])
        })?,
        None => RuleEffect::Allow,
    };

    if let Some(i) = model.priority_index() {
        rule_priority(&fields[i])?;
    }

    Ok(PolicyRule { fields, effect })
}

/// Build a role edge for role definition `ptype` from its fields.
pub fn edge_from_fields(
    ptype: &str,
    fields: Vec<String>,
    model: &Model,
) -> Result<RoleEdge, String> {
    let arity = model
        .role_arity(ptype)
        .ok_or_else(|| format!("unknown role definition `{ptype}`"))?;
    if fields.len() != arity {
        return Err(format!(
            "`{ptype}` rule has {} fields, role definition declares {arity}",
            fields.len()
        ));
    }

    let mut fields = fields.into_iter();
    let member = fields.next().unwrap_or_default();
    let role = fields.next().unwrap_or_default();
    Ok(RoleEdge {
        ptype: ptype.to_string(),
        member,
        role,
        domain: fields.next(),
    })
}

pub fn rule_priority(value: &str) -> Result<i64, String> {
    value
        .parse()
        .map_err(|_| format!("`priority` must be an integer, got `{value}`"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::model::load_model;

    const MODEL: &str = r#"
[request_definition]
r = sub, obj, act
[policy_definition]
p = sub, obj, act
[role_definition]
g = _, _
g2 = _, _, _
[policy_effect]
e = some(where (p.eft == allow))
[matchers]
m = g(r.sub, p.sub) && keyMatch(r.obj, p.obj) && r.act == p.act
"#;

    const EFT_MODEL: &str = r#"
[request_definition]
r = sub, obj, act
[policy_definition]
p = sub, obj, act, eft, priority
[policy_effect]
e = priority(p.eft) || deny
[matchers]
m = r.sub == p.sub && r.obj == p.obj && r.act == p.act
"#;

    #[test]
    fn test_parse_rules_and_edges() {
        let model = load_model(MODEL).unwrap();
        let src = r#"
# alice's permissions
p, alice, /dataset1/*, GET
p,alice , /dataset1/resource1 ,POST

g, cathy, dataset1_admin
g2, dave, admin, tenant1
"#;
        let policy = parse_policy(src, &model).unwrap();
        assert_eq!(policy.rules.len(), 2);
        assert_eq!(policy.rules[1].fields, vec!["alice", "/dataset1/resource1", "POST"]);
        assert_eq!(policy.rules[0].effect, RuleEffect::Allow);

        assert_eq!(policy.edges.len(), 2);
        assert_eq!(policy.edges[0].member, "cathy");
        assert_eq!(policy.edges[0].role, "dataset1_admin");
        assert!(policy.edges[0].domain.is_none());
        assert_eq!(policy.edges[1].ptype, "g2");
        assert_eq!(policy.edges[1].domain.as_deref(), Some("tenant1"));
    }

    #[test]
    fn test_arity_mismatch_rejected() {
        let model = load_model(MODEL).unwrap();
        let err = parse_policy("p, alice, /dataset1/*, GET\np, bob, /x\n", &model).unwrap_err();
        assert!(matches!(err, AuthzError::MalformedPolicy { line: 2, .. }));

        let err = parse_policy("p, alice, /x, GET, extra", &model).unwrap_err();
        assert!(matches!(err, AuthzError::MalformedPolicy { line: 1, .. }));

        let err = parse_policy("g, cathy", &model).unwrap_err();
        assert!(matches!(err, AuthzError::MalformedPolicy { line: 1, .. }));

        let err = parse_policy("g2, cathy, admin", &model).unwrap_err();
        assert!(matches!(err, AuthzError::MalformedPolicy { line: 1, .. }));
    }

    #[test]
    fn test_unknown_discriminator_rejected() {
        let model = load_model(MODEL).unwrap();
        let err = parse_policy("p, a, b, c\ng3, a, b\n", &model).unwrap_err();
        assert!(matches!(err, AuthzError::MalformedPolicy { line: 2, .. }));
    }

    #[test]
    fn test_quoted_fields() {
        let model = load_model(MODEL).unwrap();
        let policy =
            parse_policy(r#"p,"alice, inc","/say ""hi""" , GET"#, &model).unwrap();
        assert_eq!(policy.rules[0].fields, vec!["alice, inc", r#"/say "hi""#, "GET"]);

        // a quote after a space is literal text, so the comma still splits
        let err = parse_policy(r#"p, "alice, inc", /x, GET"#, &model).unwrap_err();
        assert!(matches!(err, AuthzError::MalformedPolicy { line: 1, .. }));
    }

    #[test]
    fn test_unclosed_quote_rejected() {
        let model = load_model(MODEL).unwrap();
        let err = parse_policy(r#"p,"alice, /x, GET"#, &model).unwrap_err();
        assert!(matches!(err, AuthzError::MalformedPolicy { line: 1, .. }));

        // an open quote must not swallow the lines after it
        let src = "p, bob, /b, GET\np,\"alice, /x, GET\np, carol, /c, GET\n";
        let err = parse_policy(src, &model).unwrap_err();
        assert!(matches!(err, AuthzError::MalformedPolicy { line: 2, .. }));
    }

    #[test]
    fn test_line_numbers_skip_blanks_and_comments() {
        let model = load_model(MODEL).unwrap();
        let src = "# header\n\np, alice, /a, GET\n\n# note\n   \n  # indented\np, bob, /b\n";
        let err = parse_policy(src, &model).unwrap_err();
        assert!(matches!(err, AuthzError::MalformedPolicy { line: 8, .. }), "{err:?}");

        let crlf = "p, alice, /a, GET\r\n\r\np, bob\r\n";
        let err = parse_policy(crlf, &model).unwrap_err();
        assert!(matches!(err, AuthzError::MalformedPolicy { line: 3, .. }), "{err:?}");
    }

    #[test]
    fn test_empty_field_rejected() {
        let model = load_model(MODEL).unwrap();
        assert!(parse_policy("p, alice, , GET", &model).is_err());
        assert!(parse_policy("p, alice, /x, GET,", &model).is_err());
    }

    #[test]
    fn test_eft_and_priority_validated() {
        let model = load_model(EFT_MODEL).unwrap();
        let policy = parse_policy("p, alice, /x, GET, deny, 1", &model).unwrap();
        assert_eq!(policy.rules[0].effect, RuleEffect::Deny);

        let err = parse_policy("p, alice, /x, GET, maybe, 1", &model).unwrap_err();
        assert!(matches!(err, AuthzError::MalformedPolicy { .. }));
        let err = parse_policy("p, alice, /x, GET, allow, high", &model).unwrap_err();
        assert!(matches!(err, AuthzError::MalformedPolicy { .. }));
    }

    #[test]
    fn test_edge_from_fields() {
        let model = load_model(MODEL).unwrap();
        let edge = edge_from_fields("g", vec!["cathy".into(), "admin".into()], &model).unwrap();
        assert_eq!(edge.to_string(), "g, cathy, admin");
        assert!(edge_from_fields("gx", vec!["a".into(), "b".into()], &model).is_err());
    }
}
