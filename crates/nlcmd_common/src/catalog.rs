//! Built-in action catalog
//!
//! Demonstration actions for the supported target languages. Handlers only
//! RENDER command text; nothing here executes a process. Commands are built
//! from separate arguments and quoted on output, so a parameter value can
//! never smuggle extra shell syntax into the rendered line. Positional
//! operands may not start with `-`, so a value cannot turn into an option.

use crate::error::{HandlerError, RegistryError};
use crate::registry::{ActionRegistry, ResolvedParams};
use crate::schema::{ActionRisk, ActionSchema, ParamSource, ParamSpec, ParamType, ResultShape};
use serde::Serialize;
use serde_json::{json, Value};

// ============================================================================
// Rendering
// ============================================================================

/// Target language of a rendered command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetLanguage {
    Shell,
    Sql,
    Docker,
    Kubectl,
}

/// A program plus separate arguments (never a pre-joined shell string)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append `flag value` only when the value is present
    pub fn opt_arg(self, flag: &str, value: Option<String>) -> Self {
        match value {
            Some(value) => self.arg(flag).arg(value),
            None => self,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Render as one line with every word quoted as needed
    pub fn render(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|word| shell_quote(word))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Quote a word for POSIX shells; plain words pass through
pub fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=:,@%+".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Quote an SQL string literal
pub fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Letters, digits and underscores, not starting with a digit
fn check_identifier(param: &str, value: &str) -> Result<(), HandlerError> {
    let mut chars = value.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(HandlerError::bad_param(param, &format!("'{}' is not a valid identifier", value)))
    }
}

/// Positional operand: a leading '-' would be parsed as an option or, for
/// find, as part of its expression
fn check_operand<'a>(param: &str, value: &'a str) -> Result<&'a str, HandlerError> {
    if value.starts_with('-') {
        return Err(HandlerError::bad_param(param, &format!("'{}' must not start with '-'", value)));
    }
    Ok(value)
}

fn rendered(language: TargetLanguage, command: String) -> Value {
    json!({ "language": language, "command": command })
}

// ============================================================================
// Handlers
// ============================================================================

fn find_files(params: &ResolvedParams) -> Result<Value, HandlerError> {
    let cmd = CommandLine::new("find")
        .arg(check_operand("path", params.str("path")?)?)
        .opt_arg("-maxdepth", params.opt_i64("max_depth").map(|d| d.to_string()))
        .arg("-type")
        .arg("f")
        .opt_arg("-name", params.opt_str("name").map(str::to_string));
    Ok(rendered(TargetLanguage::Shell, cmd.render()))
}

fn count_matches(params: &ResolvedParams) -> Result<Value, HandlerError> {
    let cmd = CommandLine::new("grep")
        .args(["-c", "--"])
        .arg(params.str("pattern")?)
        .arg(params.str("file")?);
    Ok(rendered(TargetLanguage::Shell, cmd.render()))
}

fn remove_files(params: &ResolvedParams) -> Result<Value, HandlerError> {
    let cmd = CommandLine::new("find")
        .arg(check_operand("path", params.str("path")?)?)
        .arg("-type")
        .arg("f")
        .opt_arg("-name", params.opt_str("name").map(str::to_string))
        .arg("-delete");
    Ok(rendered(TargetLanguage::Shell, cmd.render()))
}

fn split_text(params: &ResolvedParams) -> Result<Value, HandlerError> {
    let text = params.str("text")?;
    let separator = params.opt_str("separator").unwrap_or(",");
    if separator.is_empty() {
        return Err(HandlerError::bad_param("separator", "must not be empty"));
    }

    let parts: Vec<&str> = text
        .split(separator)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect();
    Ok(json!(parts))
}

fn sql_select(params: &ResolvedParams) -> Result<Value, HandlerError> {
    let table = params.str("table")?;
    check_identifier("table", table)?;

    let columns = match params.opt_str("columns") {
        None => "*".to_string(),
        Some(list) => {
            let columns: Vec<&str> = list.split(',').map(str::trim).collect();
            for column in &columns {
                check_identifier("columns", column)?;
            }
            columns.join(", ")
        }
    };

    let mut sql = format!("SELECT {} FROM {}", columns, table);
    match (params.opt_str("where_column"), params.opt_str("where_value")) {
        (Some(column), Some(value)) => {
            check_identifier("where_column", column)?;
            sql.push_str(&format!(" WHERE {} = {}", column, sql_literal(value)));
        }
        (None, None) => {}
        _ => {
            return Err(HandlerError::new(
                "where_column and where_value must be given together",
            ))
        }
    }
    if let Some(limit) = params.opt_i64("limit") {
        if limit < 0 {
            return Err(HandlerError::bad_param("limit", "must not be negative"));
        }
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    sql.push(';');

    Ok(rendered(TargetLanguage::Sql, sql))
}

fn docker_ps(params: &ResolvedParams) -> Result<Value, HandlerError> {
    let mut cmd = CommandLine::new("docker").arg("ps");
    if params.opt_bool("all").unwrap_or(false) {
        cmd = cmd.arg("--all");
    }
    Ok(rendered(TargetLanguage::Docker, cmd.render()))
}

fn docker_logs(params: &ResolvedParams) -> Result<Value, HandlerError> {
    let cmd = CommandLine::new("docker")
        .arg("logs")
        .opt_arg("--tail", params.opt_i64("tail").map(|n| n.to_string()))
        .arg(check_operand("container", params.str("container")?)?);
    Ok(rendered(TargetLanguage::Docker, cmd.render()))
}

fn kubectl_get(params: &ResolvedParams) -> Result<Value, HandlerError> {
    let resource = params.str("resource")?;
    check_identifier("resource", resource)?;

    let mut cmd = CommandLine::new("kubectl").arg("get").arg(resource);
    if let Some(name) = params.opt_str("name") {
        cmd = cmd.arg(check_operand("name", name)?);
    }
    let cmd = cmd.opt_arg("--namespace", params.opt_str("namespace").map(str::to_string));
    Ok(rendered(TargetLanguage::Kubectl, cmd.render()))
}

// ============================================================================
// Registry
// ============================================================================

/// Every built-in action with its schema
pub fn builtin_schemas() -> Vec<ActionSchema> {
    builtin_actions().into_iter().map(|(schema, _)| schema).collect()
}

type Handler = fn(&ResolvedParams) -> Result<Value, HandlerError>;

fn builtin_actions() -> Vec<(ActionSchema, Handler)> {
    use ParamType::{Boolean, Integer, String as Text};

    vec![
        (
            ActionSchema::new("shell.find_files", "Render a find command listing regular files under a path")
                .param(ParamSpec::required("path", Text).source(ParamSource::Path))
                .param(ParamSpec::optional("name", Text).describe("glob, e.g. *.log"))
                .param(ParamSpec::optional("max_depth", Integer))
                .returns(ResultShape::Object),
            find_files as Handler,
        ),
        (
            ActionSchema::new("shell.count_matches", "Render a grep command counting pattern matches in one file")
                .param(ParamSpec::required("file", Text).source(ParamSource::Path))
                .param(ParamSpec::required("pattern", Text))
                .returns(ResultShape::Object),
            count_matches as Handler,
        ),
        (
            ActionSchema::new("shell.remove_files", "Render a find command deleting files under a path")
                .param(ParamSpec::required("path", Text).source(ParamSource::Path))
                .param(ParamSpec::optional("name", Text))
                .returns(ResultShape::Object)
                .risk(ActionRisk::High),
            remove_files as Handler,
        ),
        (
            ActionSchema::new("text.split", "Split text into a list of trimmed, non-empty parts")
                .param(ParamSpec::required("text", Text).source(ParamSource::Body))
                .param(ParamSpec::optional("separator", Text).describe("defaults to ','"))
                .returns(ResultShape::Sequence),
            split_text as Handler,
        ),
        (
            ActionSchema::new("sql.select", "Render a SELECT statement for one table")
                .param(ParamSpec::required("table", Text))
                .param(ParamSpec::optional("columns", Text).describe("comma-separated"))
                .param(ParamSpec::optional("where_column", Text).source(ParamSource::Query))
                .param(ParamSpec::optional("where_value", Text).source(ParamSource::Query))
                .param(ParamSpec::optional("limit", Integer).source(ParamSource::Query))
                .returns(ResultShape::Object),
            sql_select as Handler,
        ),
        (
            ActionSchema::new("docker.ps", "Render a docker command listing containers")
                .param(ParamSpec::optional("all", Boolean).source(ParamSource::Query))
                .returns(ResultShape::Object),
            docker_ps as Handler,
        ),
        (
            ActionSchema::new("docker.logs", "Render a docker command showing container logs")
                .param(ParamSpec::required("container", Text).source(ParamSource::Path))
                .param(ParamSpec::optional("tail", Integer).source(ParamSource::Query))
                .returns(ResultShape::Object),
            docker_logs as Handler,
        ),
        (
            ActionSchema::new("kubectl.get", "Render a kubectl get command")
                .param(ParamSpec::required("resource", Text).source(ParamSource::Path))
                .param(ParamSpec::optional("name", Text).source(ParamSource::Path))
                .param(ParamSpec::optional("namespace", Text).source(ParamSource::Query))
                .returns(ResultShape::Object),
            kubectl_get as Handler,
        ),
    ]
}

/// Registry holding the built-in catalog
pub fn builtin_registry() -> Result<ActionRegistry, RegistryError> {
    let mut registry = ActionRegistry::new();
    for (schema, handler) in builtin_actions() {
        registry.register(schema, handler)?;
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn params(pairs: &[(&str, Value)]) -> ResolvedParams {
        ResolvedParams::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    fn command(value: &Value) -> &str {
        value["command"].as_str().unwrap()
    }

    #[test]
    fn test_builtin_registry() {
        let registry = builtin_registry().unwrap();
        assert_eq!(registry.len(), 8);
        assert!(registry.contains("sql.select"));
        assert_eq!(
            registry.lookup("shell.remove_files").unwrap().schema.risk,
            ActionRisk::High
        );
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/var/log"), "/var/log");
        assert_eq!(shell_quote("*.log"), "'*.log'");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_injection_stays_quoted() {
        let out = count_matches(&params(&[
            ("file", json!("x; rm -rf /")),
            ("pattern", json!("$(reboot)")),
        ]))
        .unwrap();
        assert_eq!(command(&out), "grep -c -- '$(reboot)' 'x; rm -rf /'");
        assert_eq!(out["language"], json!("shell"));
    }

    #[test]
    fn test_option_like_operands_rejected() {
        for path in ["-delete", "-exec", "--help"] {
            let err = find_files(&params(&[("path", json!(path))])).unwrap_err();
            assert!(err.message.contains("must not start with '-'"), "{}", err);
            assert!(remove_files(&params(&[("path", json!(path))])).is_err());
        }
        assert!(docker_logs(&params(&[("container", json!("--follow"))])).is_err());
        assert!(kubectl_get(&params(&[("resource", json!("pods")), ("name", json!("-A"))])).is_err());

        // Relative paths and dashes inside a word are fine
        let out = find_files(&params(&[("path", json!("./-delete"))])).unwrap();
        assert_eq!(command(&out), "find ./-delete -type f");
        let out = docker_logs(&params(&[("container", json!("web-1"))])).unwrap();
        assert_eq!(command(&out), "docker logs web-1");
    }

    #[test]
    fn test_find_files() {
        let out = find_files(&params(&[
            ("path", json!("/var/log")),
            ("name", json!("*.log")),
            ("max_depth", json!(2)),
        ]))
        .unwrap();
        assert_eq!(command(&out), "find /var/log -maxdepth 2 -type f -name '*.log'");
    }

    #[test]
    fn test_split_text() {
        let out = split_text(&params(&[("text", json!(" a.log, b.log,,c.log "))])).unwrap();
        assert_eq!(out, json!(["a.log", "b.log", "c.log"]));

        let out = split_text(&params(&[("text", json!("x|y")), ("separator", json!("|"))])).unwrap();
        assert_eq!(out, json!(["x", "y"]));

        assert!(split_text(&params(&[("text", json!("x")), ("separator", json!(""))])).is_err());
    }

    #[test]
    fn test_sql_select() {
        let out = sql_select(&params(&[
            ("table", json!("users")),
            ("columns", json!("id, name")),
            ("where_column", json!("name")),
            ("where_value", json!("O'Brien")),
            ("limit", json!(10)),
        ]))
        .unwrap();
        assert_eq!(
            command(&out),
            "SELECT id, name FROM users WHERE name = 'O''Brien' LIMIT 10;"
        );
    }

    #[test]
    fn test_sql_rejects_bad_identifiers() {
        assert!(sql_select(&params(&[("table", json!("users; DROP TABLE x"))])).is_err());
        assert!(sql_select(&params(&[("table", json!("t")), ("columns", json!("a,1b"))])).is_err());
        assert!(sql_select(&params(&[("table", json!("t")), ("where_column", json!("a"))])).is_err());
    }

    #[test]
    fn test_docker_and_kubectl() {
        let out = docker_ps(&params(&[("all", json!(true))])).unwrap();
        assert_eq!(command(&out), "docker ps --all");

        let out = docker_logs(&params(&[("container", json!("web")), ("tail", json!(50))])).unwrap();
        assert_eq!(command(&out), "docker logs --tail 50 web");

        let out = kubectl_get(&params(&[
            ("resource", json!("pods")),
            ("namespace", json!("kube-system")),
        ]))
        .unwrap();
        assert_eq!(command(&out), "kubectl get pods --namespace kube-system");
        assert!(kubectl_get(&params(&[("resource", json!("pods;ls"))])).is_err());
    }
}
