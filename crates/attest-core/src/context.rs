//! Sandboxed evaluation context for control-definition units.
//!
//! Each profile owns one context. Evaluating a control file walks its
//! parsed statements and exercises the registration surface: rules land
//! in the insertion-ordered registry, attributes resolve against
//! caller-supplied bindings, `only_if` sets the sticky skip flag, and
//! `require` consults the in-memory library store before anything else.
//!
//! A failure in one definition unit aborts that unit only; the error is
//! recorded and evaluation continues with the next unit, so the registry
//! holds exactly the successfully registered rules.

use crate::attribute::{Attribute, AttributeOptions};
use crate::control::{CheckSpec, Control};
use crate::dsl::{self, CtrlStmt, DescribeBlock, Stmt};
use crate::library_loader::LibraryLoader;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// A recorded per-unit evaluation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalError {
    pub file: String,
    pub line: usize,
    pub message: String,
}

/// Controls grouped by the file that declared them.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Group {
    pub file: String,
    pub title: Option<String>,
    pub controls: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ProfileContext {
    profile_id: String,
    bindings: HashMap<String, Value>,
    controls: Vec<Control>,
    index: HashMap<String, usize>,
    attributes: Vec<Attribute>,
    loader: LibraryLoader,
    skip_all: bool,
    skipped_ids: HashSet<String>,
    groups: Vec<Group>,
    errors: Vec<EvalError>,
}

impl ProfileContext {
    /// `profile_id` prefixes rule ids; it is the caller-supplied id
    /// override, empty for a profile evaluated standalone.
    pub fn new(profile_id: impl Into<String>, bindings: HashMap<String, Value>) -> Self {
        Self {
            profile_id: profile_id.into(),
            bindings,
            ..Default::default()
        }
    }

    pub fn loader_mut(&mut self) -> &mut LibraryLoader {
        &mut self.loader
    }

    /// Mark the flat libraries at the store root loaded, in
    /// alphabetical order. Runs before any control file is evaluated.
    pub fn autoload_libraries(&mut self) {
        let flat: Vec<String> = self
            .loader
            .paths()
            .filter(|p| !p.contains('/'))
            .map(str::to_string)
            .collect();
        for path in flat {
            self.loader.load(&path);
        }
    }

    /// Evaluate one control file. Failures are recorded, not returned.
    pub fn eval_file(&mut self, file: &str, source: &str) {
        let statements = match dsl::parse(source) {
            Ok(statements) => statements,
            Err(e) => {
                self.errors.push(EvalError {
                    file: file.to_string(),
                    line: e.line,
                    message: e.message,
                });
                return;
            }
        };

        for statement in statements {
            if let Err(e) = self.eval_statement(file, statement) {
                self.errors.push(e);
                // The unit is aborted; remaining statements are skipped.
                return;
            }
        }
    }

    fn eval_statement(&mut self, file: &str, statement: Stmt) -> Result<(), EvalError> {
        match statement {
            Stmt::Control {
                id,
                opts,
                body,
                line,
                code,
            } => {
                let control = self.build_control(file, id, opts, body, line, code)?;
                self.register(control);
            }
            Stmt::Describe(block) => {
                let control = self.anonymous_control(file, block);
                self.register(control);
            }
            Stmt::Title { value, line } => {
                let title = string_value(&value).ok_or_else(|| EvalError {
                    file: file.to_string(),
                    line,
                    message: "title must be a string".to_string(),
                })?;
                self.set_group_title(file, title);
            }
            Stmt::OnlyIf { .. } => {
                // Sticky: never cleared for the life of the context.
                self.skip_all = true;
            }
            Stmt::Attribute { name, opts, line } => {
                self.register_attribute(file, &name, opts, line);
            }
            Stmt::SkipControl { id, .. } => {
                let full_id = self.full_id(&id);
                if let Some(&i) = self.index.get(&full_id) {
                    self.controls[i].skip = true;
                }
                self.skipped_ids.insert(full_id);
            }
            Stmt::Require { path, .. } => {
                if self.loader.exists(&path) {
                    // Re-requiring a loaded module is a no-op.
                    if !self.loader.loaded(&path) {
                        self.loader.load(&path);
                    }
                } else {
                    // Unknown here: falls through to the host loader,
                    // which the core does not provide.
                    tracing::debug!(path = %path, "require fell through the in-memory store");
                }
            }
        }
        Ok(())
    }

    fn build_control(
        &mut self,
        file: &str,
        id: Value,
        opts: Vec<(String, Value)>,
        body: Vec<CtrlStmt>,
        line: usize,
        code: String,
    ) -> Result<Control, EvalError> {
        let id = match &id {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            other => {
                return Err(EvalError {
                    file: file.to_string(),
                    line,
                    message: format!("control id must be a string, got {other}"),
                })
            }
        };

        let mut control = Control::new(id, file, line);
        control.code = code;

        for (key, value) in opts {
            match key.as_str() {
                "title" => control.title = string_value(&value),
                "desc" => control.desc = string_value(&value),
                "impact" => control.impact = value.as_f64(),
                "refs" => {
                    if let Value::Array(items) = value {
                        control.refs.extend(items);
                    }
                }
                "tags" => {
                    if let Value::Object(map) = value {
                        control.tags.extend(map);
                    }
                }
                _ => {}
            }
        }

        for statement in body {
            match statement {
                CtrlStmt::Impact { value, line } => {
                    control.impact = Some(value.as_f64().ok_or_else(|| EvalError {
                        file: file.to_string(),
                        line,
                        message: "impact must be a number".to_string(),
                    })?);
                }
                CtrlStmt::Title { value, .. } => control.title = string_value(&value),
                CtrlStmt::Desc { values, .. } => {
                    let joined = values
                        .iter()
                        .filter_map(string_value)
                        .collect::<Vec<_>>()
                        .join("\n");
                    if !joined.is_empty() {
                        control.desc = Some(joined);
                    }
                }
                CtrlStmt::Tag { args, kwargs, .. } => {
                    for arg in args {
                        let key = match &arg {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        control.tags.insert(key, Value::Null);
                    }
                    for (key, value) in kwargs {
                        control.tags.insert(key, value);
                    }
                }
                CtrlStmt::Ref { args, kwargs, .. } => {
                    let mut entry = serde_json::Map::new();
                    if let Some(first) = args.into_iter().next() {
                        entry.insert("ref".to_string(), first);
                    }
                    for (key, value) in kwargs {
                        entry.insert(key, value);
                    }
                    if !entry.is_empty() {
                        control.refs.push(Value::Object(entry));
                    }
                }
                CtrlStmt::Describe(block) => {
                    control.checks.push(check_spec(block));
                }
                CtrlStmt::OnlyIf { .. } => {
                    self.skip_all = true;
                }
            }
        }

        Ok(control)
    }

    /// A bare `describe` at file scope registers an anonymous rule with
    /// a synthesized id, stable within this evaluation only.
    fn anonymous_control(&mut self, file: &str, block: DescribeBlock) -> Control {
        let basename = file.rsplit('/').next().unwrap_or(file);
        let id = format!(
            "(generated from {basename}:{} {:016x})",
            block.line,
            rand::random::<u64>()
        );
        let mut control = Control::new(id, file, block.line);
        control.code = format!("describe {} do\n{}\nend", block.subject, block.body);
        control.checks.push(check_spec(block));
        control
    }

    /// Registration contract: provenance captured here, merge on
    /// re-declaration of the same full id.
    fn register(&mut self, mut control: Control) {
        let full_id = self.full_id(&control.id);
        control.id = full_id.clone();
        control.skip =
            control.skip || self.skip_all || self.skipped_ids.contains(&full_id);
        control.group_title = self.group_title(&control.source_location.file);

        let file = control.source_location.file.clone();
        match self.index.get(&full_id) {
            Some(&i) => self.controls[i].merge(control),
            None => {
                self.index.insert(full_id.clone(), self.controls.len());
                self.controls.push(control);
                self.group_for(&file).controls.push(full_id);
            }
        }
    }

    /// Register a parameter and resolve its value: caller binding first,
    /// declared default second, unset otherwise.
    pub fn register_attribute(
        &mut self,
        file: &str,
        name: &str,
        opts: Vec<(String, Value)>,
        line: usize,
    ) -> Option<Value> {
        let mut options = AttributeOptions::default();
        for (key, value) in opts {
            match key.as_str() {
                "default" => options.default = Some(value),
                "description" => options.description = string_value(&value),
                "required" => options.required = value.as_bool().unwrap_or(false),
                _ => {}
            }
        }
        let attribute = Attribute::resolve(name, options, self.bindings.get(name));
        if attribute.missing_required() {
            self.errors.push(EvalError {
                file: file.to_string(),
                line,
                message: format!("Attribute '{name}' is required and has no value"),
            });
        }
        let value = attribute.value.clone();
        self.attributes.push(attribute);
        value
    }

    fn full_id(&self, rule_id: &str) -> String {
        if self.profile_id.is_empty() {
            rule_id.to_string()
        } else {
            format!("{}/{}", self.profile_id, rule_id)
        }
    }

    fn set_group_title(&mut self, file: &str, title: String) {
        self.group_for(file).title = Some(title);
    }

    fn group_title(&self, file: &str) -> Option<String> {
        self.groups
            .iter()
            .find(|g| g.file == file)
            .and_then(|g| g.title.clone())
    }

    fn group_for(&mut self, file: &str) -> &mut Group {
        if let Some(i) = self.groups.iter().position(|g| g.file == file) {
            &mut self.groups[i]
        } else {
            self.groups.push(Group {
                file: file.to_string(),
                title: None,
                controls: Vec::new(),
            });
            self.groups.last_mut().unwrap()
        }
    }

    pub fn rules(&self) -> &[Control] {
        &self.controls
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn errors(&self) -> &[EvalError] {
        &self.errors
    }

    /// Record a unit failure discovered outside statement evaluation
    /// (unreadable file, undecodable bytes).
    pub fn record_error(&mut self, error: EvalError) {
        self.errors.push(error);
    }

    pub fn skip_all(&self) -> bool {
        self.skip_all
    }
}

fn check_spec(block: DescribeBlock) -> CheckSpec {
    CheckSpec {
        kind: "describe".to_string(),
        args: vec![Value::String(block.subject)],
        body: block.body,
    }
}

fn string_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> ProfileContext {
        ProfileContext::new("", HashMap::new())
    }

    #[test]
    fn control_registers_with_fields() {
        let mut c = ctx();
        c.eval_file(
            "controls/a.rb",
            "control 'c1' do\n  impact 0.7\n  title 't'\n  desc 'd'\n  describe file('/etc/hosts') do\n    it { should exist }\n  end\nend\n",
        );
        assert!(c.errors().is_empty());
        assert_eq!(c.rules().len(), 1);
        let rule = &c.rules()[0];
        assert_eq!(rule.id, "c1");
        assert_eq!(rule.impact, Some(0.7));
        assert_eq!(rule.title.as_deref(), Some("t"));
        assert_eq!(rule.checks.len(), 1);
        assert_eq!(rule.checks[0].args[0], json!("file('/etc/hosts')"));
        assert_eq!(rule.source_location.line, 1);
    }

    #[test]
    fn profile_id_prefixes_rule_ids() {
        let mut c = ProfileContext::new("wrapper", HashMap::new());
        c.eval_file("controls/a.rb", "control 'c1' do\nend\n");
        assert_eq!(c.rules()[0].id, "wrapper/c1");
    }

    #[test]
    fn redeclaration_merges_into_existing_entry() {
        let mut c = ctx();
        c.eval_file(
            "controls/a.rb",
            "control 'c1' do\n  title 'first'\n  describe file('/a') do\n  end\nend\ncontrol 'c1' do\n  title 'second'\n  describe file('/b') do\n  end\nend\n",
        );
        assert_eq!(c.rules().len(), 1);
        let rule = &c.rules()[0];
        assert_eq!(rule.title.as_deref(), Some("second"));
        assert_eq!(rule.checks.len(), 2);
    }

    #[test]
    fn anonymous_describe_gets_generated_id() {
        let mut c = ctx();
        c.eval_file(
            "controls/host.rb",
            "describe file('/x') do\n  it { should exist }\nend\n",
        );
        assert_eq!(c.rules().len(), 1);
        let rule = &c.rules()[0];
        assert!(rule.id.starts_with("(generated from host.rb:1 "));
        assert!(rule.is_synthetic());
    }

    #[test]
    fn only_if_skips_every_later_rule() {
        let mut c = ctx();
        c.eval_file("controls/a.rb", "control 'before' do\nend\nonly_if { false }\ncontrol 'after' do\nend\n");
        c.eval_file("controls/b.rb", "control 'next_file' do\nend\n");
        let by_id = |id: &str| c.rules().iter().find(|r| r.id == id).unwrap();
        assert!(!by_id("before").skip);
        assert!(by_id("after").skip);
        // The flag is sticky across units until the context is discarded.
        assert!(by_id("next_file").skip);
    }

    #[test]
    fn failing_unit_aborts_but_evaluation_continues() {
        let mut c = ctx();
        c.eval_file("controls/bad.rb", "control 'ok' do\nend\nnot_a_statement\ncontrol 'never' do\nend\n");
        c.eval_file("controls/good.rb", "control 'fine' do\nend\n");
        assert_eq!(c.errors().len(), 1);
        assert_eq!(c.errors()[0].file, "controls/bad.rb");
        let ids: Vec<&str> = c.rules().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["ok", "fine"]);
    }

    #[test]
    fn attribute_binding_beats_default() {
        let mut c = ProfileContext::new(
            "",
            HashMap::from([("user".to_string(), json!("bound"))]),
        );
        c.eval_file(
            "controls/a.rb",
            "attribute('user', default: 'fallback')\nattribute('port', default: 22)\n",
        );
        assert_eq!(c.attributes().len(), 2);
        assert_eq!(c.attributes()[0].value, Some(json!("bound")));
        assert_eq!(c.attributes()[1].value, Some(json!(22)));
    }

    #[test]
    fn required_attribute_without_value_records_an_error() {
        let mut c = ctx();
        c.eval_file("controls/a.rb", "attribute('token', required: true)\n");
        assert_eq!(c.errors().len(), 1);
        assert!(c.errors()[0].message.contains("token"));
    }

    #[test]
    fn skip_control_marks_existing_and_future_rules() {
        let mut c = ctx();
        c.eval_file(
            "controls/a.rb",
            "control 'early' do\nend\nskip_control 'early'\nskip_control 'late'\ncontrol 'late' do\nend\ncontrol 'normal' do\nend\n",
        );
        let by_id = |id: &str| c.rules().iter().find(|r| r.id == id).unwrap();
        assert!(by_id("early").skip);
        assert!(by_id("late").skip);
        assert!(!by_id("normal").skip);
    }

    #[test]
    fn require_loads_in_memory_modules_once() {
        let mut c = ctx();
        c.loader_mut()
            .add("helper", b"# helper".to_vec(), "libraries/helper.rb", 1);
        c.eval_file("controls/a.rb", "require 'helper'\nrequire 'helper'\nrequire 'missing'\n");
        assert!(c.errors().is_empty());
        assert!(c.loader.loaded("helper"));
    }

    #[test]
    fn group_title_lands_on_rules_registered_in_that_file() {
        let mut c = ctx();
        c.eval_file(
            "controls/ssh.rb",
            "title 'SSH hardening'\ncontrol 'ssh-1' do\nend\n",
        );
        assert_eq!(
            c.rules()[0].group_title.as_deref(),
            Some("SSH hardening")
        );
        assert_eq!(c.groups().len(), 1);
        assert_eq!(c.groups()[0].controls, vec!["ssh-1"]);
    }

    #[test]
    fn tags_union_last_writer_wins() {
        let mut c = ctx();
        c.eval_file(
            "controls/a.rb",
            "control 'c' do\n  tag severity: 'low'\nend\ncontrol 'c' do\n  tag severity: 'high'\n  tag 'audited'\nend\n",
        );
        let rule = &c.rules()[0];
        assert_eq!(rule.tags["severity"], json!("high"));
        assert!(rule.tags.contains_key("audited"));
    }

    #[test]
    fn control_level_opts_apply() {
        let mut c = ctx();
        c.eval_file(
            "controls/a.rb",
            "control 'c', impact: 0.3, title: 'from opts' do\nend\n",
        );
        let rule = &c.rules()[0];
        assert_eq!(rule.impact, Some(0.3));
        assert_eq!(rule.title.as_deref(), Some("from opts"));
    }
}
