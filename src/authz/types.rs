use serde::{Deserialize, Serialize};

/// Domain used for role edges declared without one (`g = _, _`).
pub const DEFAULT_DOMAIN: &str = "";

/// Effect tag carried by a policy rule through its `eft` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleEffect {
    Allow,
    Deny,
}

impl RuleEffect {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "allow" => Some(Self::Allow),
            "deny" => Some(Self::Deny),
            _ => None,
        }
    }
}

/// How the outcomes of all matching rules are reduced into one decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Allowed iff some `allow` rule matched and no `deny` rule matched.
    AllowOverride,
    /// Allowed unless some `deny` rule matched. Fail-open by construction.
    DenyOverride,
    /// The first matching rule in priority order decides.
    Priority,
}

impl Effect {
    /// Recognise a `policy_effect` expression. Whitespace is ignored.
    pub fn parse(expr: &str) -> Option<Self> {
        let compact: String = expr.chars().filter(|c| !c.is_whitespace()).collect();
        match compact.as_str() {
            "some(where(p.eft==allow))" => Some(Self::AllowOverride),
            "some(where(p.eft==allow))&&!some(where(p.eft==deny))" => Some(Self::AllowOverride),
            "!some(where(p.eft==deny))" => Some(Self::DenyOverride),
            "priority(p.eft)||deny" => Some(Self::Priority),
            _ => None,
        }
    }

    /// Reduce the effects of matched rules, in evaluation order.
    pub fn combine<I>(self, matched: I) -> bool
    where
        I: IntoIterator<Item = RuleEffect>,
    {
        let mut matched = matched.into_iter();
        match self {
            Effect::AllowOverride => {
                let mut allowed = false;
                for eft in matched {
                    match eft {
                        RuleEffect::Deny => return false,
                        RuleEffect::Allow => allowed = true,
                    }
                }
                allowed
            }
            Effect::DenyOverride => !matched.any(|eft| eft == RuleEffect::Deny),
            Effect::Priority => matched.next() == Some(RuleEffect::Allow),
        }
    }
}

/// A loaded policy line (`p, ...`). `fields` has exactly the arity of the
/// model's policy definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRule {
    pub fields: Vec<String>,
    pub effect: RuleEffect,
}

impl PolicyRule {
    pub fn get(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }
}

impl std::fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "p, {}", self.fields.join(", "))
    }
}

/// "member inherits role", optionally scoped to a domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoleEdge {
    /// Role definition this edge belongs to (`g`, `g2`, ...).
    pub ptype: String,
    pub member: String,
    pub role: String,
    pub domain: Option<String>,
}

impl RoleEdge {
    pub fn domain(&self) -> &str {
        self.domain.as_deref().unwrap_or(DEFAULT_DOMAIN)
    }
}

impl std::fmt::Display for RoleEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {}, {}", self.ptype, self.member, self.role)?;
        if let Some(domain) = &self.domain {
            write!(f, ", {domain}")?;
        }
        Ok(())
    }
}

/// Everything parsed out of one policy source, before it is compiled into a
/// snapshot.
#[derive(Debug, Clone, Default)]
pub struct ParsedPolicy {
    pub rules: Vec<PolicyRule>,
    pub edges: Vec<RoleEdge>,
}

// ---------- CLI output ----------

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckResponse {
    pub allowed: bool,
}
