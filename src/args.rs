//! Module-argument binding (spec.md §6 "Module arguments").
//!
//! Converts a CLI token vector into a typed module-arguments map
//! according to `manifest.parameters` (spec.md §4.7 step 5): positional
//! tokens bind to positional parameters in declaration order,
//! option-style tokens (`--name=value` / `--name`) bind to
//! non-positional parameters by their explicit key.

use indexmap::IndexMap;
use thiserror::Error;

use crate::manifest::ParameterSpec;

#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    String(String),
    Bool(bool),
}

impl ArgValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::String(s) => Some(s),
            ArgValue::Bool(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleArguments {
    pub values: IndexMap<String, ArgValue>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ManifestArgError {
    #[error("missing required parameter '{0}'\nusage: {1}")]
    MissingRequired(String, String),
    #[error("unknown option '--{0}'")]
    UnknownOption(String),
}

/// Converts a CLI token vector to a [`ModuleArguments`] object
/// according to `parameters` (spec.md §4.7 step 5, §6 "Module
/// arguments").
pub fn bind_cli_args(parameters: &[ParameterSpec], tokens: &[String]) -> Result<ModuleArguments, ManifestArgError> {
    let mut args = ModuleArguments::default();
    let positionals: Vec<&ParameterSpec> = parameters.iter().filter(|p| matches!(p, ParameterSpec::Positional { .. })).collect();
    let mut next_positional = 0usize;

    let mut iter = tokens.iter();
    while let Some(tok) = iter.next() {
        if let Some(opt) = tok.strip_prefix("--") {
            let (key, value) = match opt.split_once('=') {
                Some((k, v)) => (k.to_string(), ArgValue::String(v.to_string())),
                None => (opt.to_string(), ArgValue::Bool(true)),
            };
            if !parameters.iter().any(|p| matches!(p, ParameterSpec::NonPositional { key: k, .. } if k == &key)) {
                return Err(ManifestArgError::UnknownOption(key));
            }
            args.values.insert(key, value);
            continue;
        }
        match positionals.get(next_positional) {
            Some(ParameterSpec::Positional { name, rest, .. }) => {
                if *rest {
                    let mut collected = vec![tok.clone()];
                    collected.extend(iter.by_ref().cloned());
                    args.values.insert(name.clone(), ArgValue::String(collected.join(" ")));
                    next_positional += 1;
                    break;
                }
                args.values.insert(name.clone(), ArgValue::String(tok.clone()));
                next_positional += 1;
            }
            _ => {} // extra positional tokens beyond the declared parameters are ignored
        }
    }

    for p in parameters {
        match p {
            ParameterSpec::Positional { name, .. } => {
                if !args.values.contains_key(name) {
                    return Err(ManifestArgError::MissingRequired(name.clone(), usage_string(parameters)));
                }
            }
            ParameterSpec::NonPositional { key, default, .. } => {
                if !args.values.contains_key(key) {
                    match default {
                        Some(d) => {
                            args.values.insert(key.clone(), ArgValue::String(d.clone()));
                        }
                        None => return Err(ManifestArgError::MissingRequired(key.clone(), usage_string(parameters))),
                    }
                }
            }
        }
    }

    Ok(args)
}

/// Generated from the manifest's parameter descriptors (spec.md §6
/// "Missing required parameters are reported with a generated usage
/// string derived from the manifest").
pub fn usage_string(parameters: &[ParameterSpec]) -> String {
    parameters
        .iter()
        .map(|p| match p {
            ParameterSpec::Positional { name, rest, .. } => {
                if *rest {
                    format!("<{name}...>")
                } else {
                    format!("<{name}>")
                }
            }
            ParameterSpec::NonPositional { key, default, .. } => {
                if default.is_some() {
                    format!("[--{key}]")
                } else {
                    format!("--{key}")
                }
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positional(name: &str) -> ParameterSpec {
        ParameterSpec::Positional { name: name.to_string(), pattern: "%str".to_string(), description: None, rest: false }
    }

    fn non_positional(key: &str, default: Option<&str>) -> ParameterSpec {
        ParameterSpec::NonPositional {
            key: key.to_string(),
            pattern: "%str".to_string(),
            default: default.map(str::to_string),
            char_name: None,
            description: None,
        }
    }

    #[test]
    fn binds_positional_in_declaration_order() {
        let params = vec![positional("src"), positional("dst")];
        let tokens = vec!["a.txt".to_string(), "b.txt".to_string()];
        let args = bind_cli_args(&params, &tokens).unwrap();
        assert_eq!(args.values.get("src").unwrap().as_str(), Some("a.txt"));
        assert_eq!(args.values.get("dst").unwrap().as_str(), Some("b.txt"));
    }

    #[test]
    fn binds_option_style_token_to_non_positional() {
        let params = vec![non_positional("verbose", None)];
        let tokens = vec!["--verbose=true".to_string()];
        let args = bind_cli_args(&params, &tokens).unwrap();
        assert_eq!(args.values.get("verbose").unwrap().as_str(), Some("true"));
    }

    #[test]
    fn missing_required_positional_reports_usage_string() {
        let params = vec![positional("src")];
        let result = bind_cli_args(&params, &[]);
        assert!(matches!(result, Err(ManifestArgError::MissingRequired(_, _))));
    }

    #[test]
    fn default_fills_missing_non_positional() {
        let params = vec![non_positional("mode", Some("fast"))];
        let args = bind_cli_args(&params, &[]).unwrap();
        assert_eq!(args.values.get("mode").unwrap().as_str(), Some("fast"));
    }

    #[test]
    fn unknown_option_is_rejected() {
        let params: Vec<ParameterSpec> = vec![];
        let tokens = vec!["--bogus".to_string()];
        assert!(matches!(bind_cli_args(&params, &tokens), Err(ManifestArgError::UnknownOption(_))));
    }
}
