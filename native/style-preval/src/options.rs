//! Pass configuration.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Execute the file as written.
    Ignore,
    /// Lower the file (ESM, TypeScript, JSX, defines) before executing it.
    Transpile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalRule {
    #[serde(default)]
    pub test: Option<String>,
    pub action: RuleAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrevalOptions {
    pub tag: String,
    pub rules: Vec<EvalRule>,
    pub extensions: Vec<String>,
    pub defines: BTreeMap<String, serde_json::Value>,
    pub env: BTreeMap<String, String>,
    pub root_dir: Option<String>,
    pub css_url_placeholder: String,
    pub href_prefix: String,
}

impl Default for PrevalOptions {
    fn default() -> Self {
        let mut defines = BTreeMap::new();
        defines.insert("process.env.EVAL".to_string(), serde_json::Value::Bool(true));
        Self {
            tag: "css".to_string(),
            rules: vec![
                EvalRule {
                    test: Some(r"[\\/]node_modules[\\/]".to_string()),
                    action: RuleAction::Ignore,
                },
                EvalRule {
                    test: None,
                    action: RuleAction::Transpile,
                },
            ],
            extensions: [".json", ".js", ".jsx", ".mjs", ".cjs", ".ts", ".tsx"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            defines,
            env: BTreeMap::new(),
            root_dir: None,
            css_url_placeholder: "__cssFileUrl__".to_string(),
            href_prefix: "/dist".to_string(),
        }
    }
}

impl PrevalOptions {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn is_evaluable(&self, path: &str) -> bool {
        self.extensions.iter().any(|ext| path.ends_with(ext.as_str()))
    }
}

/// Rules with their patterns compiled once per runtime.
#[derive(Debug, Clone)]
pub struct CompiledRules {
    rules: Vec<(Option<Regex>, RuleAction)>,
}

impl CompiledRules {
    pub fn new(rules: &[EvalRule]) -> Result<Self, regex::Error> {
        let rules = rules
            .iter()
            .map(|rule| {
                let test = rule.test.as_deref().map(Regex::new).transpose()?;
                Ok((test, rule.action))
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { rules })
    }

    /// First matching rule wins; nothing matching means `Ignore`.
    pub fn action_for(&self, path: &str) -> RuleAction {
        self.rules
            .iter()
            .find(|(test, _)| test.as_ref().map_or(true, |re| re.is_match(path)))
            .map(|(_, action)| *action)
            .unwrap_or(RuleAction::Ignore)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = PrevalOptions::default();
        assert_eq!(options.tag, "css");
        assert!(options.is_evaluable("/src/theme.ts"));
        assert!(!options.is_evaluable("/src/logo.svg"));
        assert_eq!(
            options.defines.get("process.env.EVAL"),
            Some(&serde_json::Value::Bool(true))
        );
    }

    #[test]
    fn test_from_json_partial() {
        let options =
            PrevalOptions::from_json(r#"{ "tag": "style", "rootDir": "/app", "hrefPrefix": "" }"#)
                .unwrap();
        assert_eq!(options.tag, "style");
        assert_eq!(options.root_dir.as_deref(), Some("/app"));
        assert_eq!(options.href_prefix, "");
        assert_eq!(options.css_url_placeholder, "__cssFileUrl__");
        assert_eq!(options.rules.len(), 2);
    }

    #[test]
    fn test_first_rule_wins() {
        let rules = CompiledRules::new(&PrevalOptions::default().rules).unwrap();
        assert_eq!(
            rules.action_for("/app/node_modules/lib/index.js"),
            RuleAction::Ignore
        );
        assert_eq!(rules.action_for("/app/src/theme.ts"), RuleAction::Transpile);

        let none = CompiledRules::new(&[]).unwrap();
        assert_eq!(none.action_for("/app/src/theme.ts"), RuleAction::Ignore);
    }

    #[test]
    fn test_rules_from_json() {
        let options = PrevalOptions::from_json(
            r#"{ "rules": [{ "test": "\\.generated\\.", "action": "ignore" }] }"#,
        )
        .unwrap();
        let rules = CompiledRules::new(&options.rules).unwrap();
        assert_eq!(rules.action_for("a.generated.js"), RuleAction::Ignore);
        assert_eq!(rules.action_for("a.js"), RuleAction::Ignore);
    }
}
