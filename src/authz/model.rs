//! Model definition: the section-based schema that declares request and
//! policy shapes, role definitions, the effect strategy and the matchers.
//!
//! ```text
//! [request_definition]
//! r = sub, obj, act
//!
//! [policy_definition]
//! p = sub, obj, act
//!
//! [role_definition]
//! g = _, _
//!
//! [policy_effect]
//! e = some(where (p.eft == allow))
//!
//! [matchers]
//! m = g(r.sub, p.sub) && keyMatch(r.obj, p.obj) && r.act == p.act
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use crate::authz::errors::AuthzError;
use crate::authz::matcher::Matcher;
use crate::authz::types::Effect;

/// Name of the matcher used by plain `enforce` calls.
pub const DEFAULT_MATCHER: &str = "m";

const REQUEST_SECTION: &str = "request_definition";
const POLICY_SECTION: &str = "policy_definition";
const ROLE_SECTION: &str = "role_definition";
const EFFECT_SECTION: &str = "policy_effect";
const MATCHERS_SECTION: &str = "matchers";

/// The declared names a matcher expression may refer to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    pub request_fields: Vec<String>,
    pub policy_fields: Vec<String>,
    /// role definition name -> number of `_` slots (2, or 3 with a domain)
    pub role_definitions: BTreeMap<String, usize>,
}

impl Schema {
    pub fn request_index(&self, field: &str) -> Option<usize> {
        self.request_fields.iter().position(|f| f == field)
    }

    pub fn policy_index(&self, field: &str) -> Option<usize> {
        self.policy_fields.iter().position(|f| f == field)
    }

    pub fn role_arity(&self, name: &str) -> Option<usize> {
        self.role_definitions.get(name).copied()
    }
}

/// A loaded, immutable model with its matchers already compiled.
#[derive(Debug, Clone)]
pub struct Model {
    schema: Schema,
    effect: Effect,
    matchers: BTreeMap<String, Matcher>,
}

impl Model {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn effect(&self) -> Effect {
        self.effect
    }

    pub fn request_fields(&self) -> &[String] {
        &self.schema.request_fields
    }

    pub fn policy_fields(&self) -> &[String] {
        &self.schema.policy_fields
    }

    /// Position of the `eft` policy field, if declared.
    pub fn eft_index(&self) -> Option<usize> {
        self.schema.policy_index("eft")
    }

    /// Position of the `priority` policy field, if declared.
    pub fn priority_index(&self) -> Option<usize> {
        self.schema.policy_index("priority")
    }

    pub fn role_arity(&self, name: &str) -> Option<usize> {
        self.schema.role_arity(name)
    }

    pub fn role_definitions(&self) -> impl Iterator<Item = &str> {
        self.schema.role_definitions.keys().map(String::as_str)
    }

    pub fn matcher(&self, name: &str) -> Option<&Matcher> {
        self.matchers.get(name)
    }

    pub fn default_matcher(&self) -> &Matcher {
        // presence of `m` is checked in `load_model`
        &self.matchers[DEFAULT_MATCHER]
    }

    pub fn matcher_names(&self) -> impl Iterator<Item = &str> {
        self.matchers.keys().map(String::as_str)
    }

    pub(crate) fn matchers(&self) -> impl Iterator<Item = &Matcher> {
        self.matchers.values()
    }
}

impl std::str::FromStr for Model {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        load_model(s)
    }
}

/// Read and parse a model file.
pub fn load_model_file(path: &Path) -> Result<Model, AuthzError> {
    let source = std::fs::read_to_string(path).map_err(|source| AuthzError::SourceLoad {
        path: path.display().to_string(),
        source,
    })?;
    let model = load_model(&source)?;
    tracing::info!(
        path = %path.display(),
        request_fields = model.request_fields().len(),
        policy_fields = model.policy_fields().len(),
        roles = model.schema.role_definitions.len(),
        effect = ?model.effect,
        "Loaded authorization model"
    );
    Ok(model)
}

/// Parse a model source and compile its matchers.
pub fn load_model(source: &str) -> Result<Model, AuthzError> {
    let mut sections = parse_sections(source)?;

    let request_fields = {
        let entries = take_section(&mut sections, REQUEST_SECTION)?;
        parse_fields(REQUEST_SECTION, single_entry(REQUEST_SECTION, "r", entries)?)?
    };
    let policy_fields = {
        let entries = take_section(&mut sections, POLICY_SECTION)?;
        parse_fields(POLICY_SECTION, single_entry(POLICY_SECTION, "p", entries)?)?
    };

    let mut role_definitions = BTreeMap::new();
    for (name, value) in sections.remove(ROLE_SECTION).unwrap_or_default() {
        let arity = parse_role_definition(&name, &value)?;
        role_definitions.insert(name, arity);
    }

    let effect = {
        let entries = take_section(&mut sections, EFFECT_SECTION)?;
        let expr = single_entry(EFFECT_SECTION, "e", entries)?;
        Effect::parse(&expr).ok_or_else(|| {
            AuthzError::MalformedModel(format!("unsupported policy effect `{expr}`"))
        })?
    };

    let schema = Schema {
        request_fields,
        policy_fields,
        role_definitions,
    };

    let mut matchers = BTreeMap::new();
    for (name, expr) in take_section(&mut sections, MATCHERS_SECTION)? {
        let matcher = Matcher::compile(&expr, &schema).map_err(|e| match e {
            AuthzError::MalformedModel(msg) => {
                AuthzError::MalformedModel(format!("matcher `{name}`: {msg}"))
            }
            AuthzError::Matcher(msg) => AuthzError::Matcher(format!("matcher `{name}`: {msg}")),
            other => other,
        })?;
        matchers.insert(name, matcher);
    }
    if !matchers.contains_key(DEFAULT_MATCHER) {
        return Err(AuthzError::MalformedModel(format!(
            "[{MATCHERS_SECTION}] must define `{DEFAULT_MATCHER}`"
        )));
    }

    if let Some(unknown) = sections.keys().next() {
        return Err(AuthzError::MalformedModel(format!(
            "unknown section `[{unknown}]`"
        )));
    }

    Ok(Model {
        schema,
        effect,
        matchers,
    })
}

type Sections = BTreeMap<String, Vec<(String, String)>>;

/// Split the source into `[section]` -> ordered `key = value` entries.
/// A trailing `\` joins a line with the next one.
fn parse_sections(source: &str) -> Result<Sections, AuthzError> {
    let mut sections: Sections = BTreeMap::new();
    let mut current: Option<String> = None;
    let mut pending = String::new();

    for raw in source.lines() {
        let line = raw.trim();
        if pending.is_empty() && (line.is_empty() || line.starts_with('#') || line.starts_with(';'))
        {
            continue;
        }
        if let Some(head) = line.strip_suffix('\\') {
            pending.push_str(head.trim_end());
            pending.push(' ');
            continue;
        }
        pending.push_str(line);
        let line = std::mem::take(&mut pending);
        let line = line.trim();

        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let name = name.trim().to_string();
            if sections.contains_key(&name) {
                return Err(AuthzError::MalformedModel(format!(
                    "duplicate section `[{name}]`"
                )));
            }
            sections.insert(name.clone(), Vec::new());
            current = Some(name);
            continue;
        }

        let Some(section) = &current else {
            return Err(AuthzError::MalformedModel(format!(
                "`{line}` appears before any section header"
            )));
        };
        let (key, value) = line.split_once('=').ok_or_else(|| {
            AuthzError::MalformedModel(format!("expected `key = value` in [{section}], got `{line}`"))
        })?;
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            return Err(AuthzError::MalformedModel(format!(
                "empty key or value in [{section}]: `{line}`"
            )));
        }

        let entries = sections.entry(section.clone()).or_default();
        if entries.iter().any(|(k, _)| k == key) {
            return Err(AuthzError::MalformedModel(format!(
                "duplicate key `{key}` in [{section}]"
            )));
        }
        entries.push((key.to_string(), value.to_string()));
    }

    if !pending.is_empty() {
        return Err(AuthzError::MalformedModel(
            "line continuation at end of model".into(),
        ));
    }
    Ok(sections)
}

fn take_section(
    sections: &mut Sections,
    name: &str,
) -> Result<Vec<(String, String)>, AuthzError> {
    match sections.remove(name) {
        Some(entries) if !entries.is_empty() => Ok(entries),
        Some(_) => Err(AuthzError::MalformedModel(format!("section `[{name}]` is empty"))),
        None => Err(AuthzError::MalformedModel(format!(
            "missing required section `[{name}]`"
        ))),
    }
}

fn single_entry(
    section: &str,
    key: &str,
    entries: Vec<(String, String)>,
) -> Result<String, AuthzError> {
    let mut entries = entries.into_iter();
    match (entries.next(), entries.next()) {
        (Some((k, v)), None) if k == key => Ok(v),
        (Some((k, _)), None) => Err(AuthzError::MalformedModel(format!(
            "[{section}] must declare `{key}`, found `{k}`"
        ))),
        _ => Err(AuthzError::MalformedModel(format!(
            "[{section}] must declare exactly one entry `{key}`"
        ))),
    }
}

fn parse_fields(section: &str, value: String) -> Result<Vec<String>, AuthzError> {
    let mut fields: Vec<String> = Vec::new();
    for field in value.split(',').map(str::trim) {
        if field.is_empty() || !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(AuthzError::MalformedModel(format!(
                "invalid field name `{field}` in [{section}]"
            )));
        }
        if fields.iter().any(|f| f == field) {
            return Err(AuthzError::MalformedModel(format!(
                "duplicate field `{field}` in [{section}]"
            )));
        }
        fields.push(field.to_string());
    }
    Ok(fields)
}

fn parse_role_definition(name: &str, value: &str) -> Result<usize, AuthzError> {
    let slots: Vec<&str> = value.split(',').map(str::trim).collect();
    if slots.iter().any(|s| *s != "_") {
        return Err(AuthzError::MalformedModel(format!(
            "role definition `{name}` must only contain `_` placeholders, got `{value}`"
        )));
    }
    match slots.len() {
        2 | 3 => Ok(slots.len()),
        n => Err(AuthzError::MalformedModel(format!(
            "role definition `{name}` has {n} slots (expected `_, _` or `_, _, _`)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RBAC_MODEL: &str = r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[role_definition]
g = _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub) && keyMatch(r.obj, p.obj) && (r.act == p.act || p.act == "*")
"#;

    fn without_section(section: &str) -> String {
        let mut out = String::new();
        let mut skipping = false;
        for line in RBAC_MODEL.lines() {
            if line.starts_with('[') {
                skipping = line == format!("[{section}]");
            }
            if !skipping {
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }

    #[test]
    fn test_load_rbac_model() {
        let model = load_model(RBAC_MODEL).unwrap();
        assert_eq!(model.request_fields(), ["sub", "obj", "act"]);
        assert_eq!(model.policy_fields(), ["sub", "obj", "act"]);
        assert_eq!(model.role_arity("g"), Some(2));
        assert_eq!(model.effect(), Effect::AllowOverride);
        assert!(model.eft_index().is_none());
        assert_eq!(
            model.default_matcher().source(),
            r#"g(r.sub, p.sub) && keyMatch(r.obj, p.obj) && (r.act == p.act || p.act == "*")"#
        );
    }

    #[test]
    fn test_model_from_str() {
        let model: Model = RBAC_MODEL.parse().unwrap();
        assert_eq!(model.matcher_names().collect::<Vec<_>>(), vec!["m"]);
    }

    #[test]
    fn test_role_definition_optional() {
        let model = load_model(&without_section(ROLE_SECTION).replace(
            "g(r.sub, p.sub)",
            "r.sub == p.sub",
        ))
        .unwrap();
        assert_eq!(model.role_definitions().count(), 0);
    }

    #[test]
    fn test_missing_required_sections() {
        for section in [REQUEST_SECTION, POLICY_SECTION, EFFECT_SECTION, MATCHERS_SECTION] {
            let err = load_model(&without_section(section)).unwrap_err();
            assert!(
                matches!(err, AuthzError::MalformedModel(_)),
                "missing [{section}] should be a model error, got {err:?}"
            );
        }
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let src = RBAC_MODEL.replace("r = sub, obj, act", "r = sub, obj, sub");
        assert!(matches!(
            load_model(&src).unwrap_err(),
            AuthzError::MalformedModel(_)
        ));
    }

    #[test]
    fn test_matcher_with_undeclared_field_rejected() {
        let src = RBAC_MODEL.replace("keyMatch(r.obj, p.obj)", "keyMatch(r.path, p.obj)");
        let err = load_model(&src).unwrap_err();
        assert!(matches!(err, AuthzError::MalformedModel(msg) if msg.contains("r.path")));
    }

    #[test]
    fn test_matcher_with_unknown_predicate_rejected() {
        let src = RBAC_MODEL.replace("keyMatch(", "keyMatch9(");
        assert!(matches!(
            load_model(&src).unwrap_err(),
            AuthzError::Matcher(_)
        ));
    }

    #[test]
    fn test_unsupported_effect_rejected() {
        let src = RBAC_MODEL.replace(
            "some(where (p.eft == allow))",
            "some(where (p.eft == maybe))",
        );
        assert!(matches!(
            load_model(&src).unwrap_err(),
            AuthzError::MalformedModel(_)
        ));
    }

    #[test]
    fn test_effect_section_single_entry() {
        let src = RBAC_MODEL.replace(
            "e = some(where (p.eft == allow))",
            "e = some(where (p.eft == allow))\ne2 = priority(p.eft) || deny",
        );
        assert!(load_model(&src).is_err());
    }

    #[test]
    fn test_domain_role_definition() {
        let src = r#"
[request_definition]
r = sub, dom, obj, act
[policy_definition]
p = sub, dom, obj, act, eft
[role_definition]
g = _, _, _
[policy_effect]
e = some(where (p.eft == allow)) && !some(where (p.eft == deny))
[matchers]
m = g(r.sub, p.sub, r.dom) && r.dom == p.dom && r.obj == p.obj && r.act == p.act
"#;
        let model = load_model(src).unwrap();
        assert_eq!(model.role_arity("g"), Some(3));
        assert_eq!(model.eft_index(), Some(4));
    }

    #[test]
    fn test_invalid_role_definition() {
        let src = RBAC_MODEL.replace("g = _, _", "g = _");
        assert!(load_model(&src).is_err());
        let src = RBAC_MODEL.replace("g = _, _", "g = _, x");
        assert!(load_model(&src).is_err());
    }

    #[test]
    fn test_comments_continuations_and_extra_matchers() {
        let src = r#"
# request shape
[request_definition]
r = sub, obj, act
; policy shape
[policy_definition]
p = sub, obj, act, priority
[policy_effect]
e = priority(p.eft) || deny
[matchers]
m = r.sub == p.sub && \
    r.obj == p.obj && \
    r.act == p.act
m_any = r.sub == p.sub
"#;
        let model = load_model(src).unwrap();
        assert_eq!(model.effect(), Effect::Priority);
        assert_eq!(model.priority_index(), Some(3));
        assert_eq!(
            model.default_matcher().source(),
            "r.sub == p.sub && r.obj == p.obj && r.act == p.act"
        );
        assert!(model.matcher("m_any").is_some());
    }

    #[test]
    fn test_missing_default_matcher() {
        let src = RBAC_MODEL.replace("m = g(", "m2 = g(");
        assert!(matches!(
            load_model(&src).unwrap_err(),
            AuthzError::MalformedModel(_)
        ));
    }

    #[test]
    fn test_unknown_section_and_stray_lines() {
        let src = format!("{RBAC_MODEL}\n[extras]\nx = 1\n");
        assert!(load_model(&src).is_err());
        let src = format!("r = sub\n{RBAC_MODEL}");
        assert!(load_model(&src).is_err());
    }

    #[test]
    fn test_load_model_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.conf");
        std::fs::write(&path, RBAC_MODEL).unwrap();
        assert!(load_model_file(&path).is_ok());

        let err = load_model_file(&dir.path().join("missing.conf")).unwrap_err();
        assert!(matches!(err, AuthzError::SourceLoad { .. }));
    }
}
