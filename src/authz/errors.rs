use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AuthzError {
    #[error("Failed to read `{path}`")]
    #[diagnostic(
        code(warden::authz::source_load),
        help("Check that the model/policy file exists and is readable")
    )]
    SourceLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed model: {0}")]
    #[diagnostic(
        code(warden::authz::malformed_model),
        help("A model needs [request_definition], [policy_definition], [policy_effect] and [matchers] sections; matchers may only reference declared r.* and p.* fields")
    )]
    MalformedModel(String),

    #[error("Malformed policy at line {line}: {reason}")]
    #[diagnostic(
        code(warden::authz::malformed_policy),
        help("Policy lines look like `p, alice, /dataset1/*, GET` or `g, cathy, dataset1_admin`")
    )]
    MalformedPolicy { line: usize, reason: String },

    #[error("Invalid rule: {0}")]
    #[diagnostic(
        code(warden::authz::invalid_rule),
        help("Rules and role edges added at runtime must match the arity declared by the model")
    )]
    InvalidRule(String),

    #[error("Matcher error: {0}")]
    #[diagnostic(
        code(warden::authz::matcher),
        help("Supported operators: ==, !=, &&, ||, !, in. Predicates: keyMatch, keyMatch2, regexMatch and the declared role functions (g, g2, ...)")
    )]
    Matcher(String),
}

impl AuthzError {
    pub(crate) fn policy(line: usize, reason: impl Into<String>) -> Self {
        AuthzError::MalformedPolicy {
            line,
            reason: reason.into(),
        }
    }
}
