//! CLI flags generated from route field descriptors.
//!
//! A [`Definition`] is built per invocation from the target route's params, query and
//! payload fields plus a fixed set of built-ins, turned into a clap [`Command`] for
//! syntax parsing, and the parsed values are partitioned back into nested objects by
//! [`pick`].

use std::collections::BTreeMap;

use clap::builder::PossibleValuesParser;
use clap::{Arg, ArgAction, ArgMatches, Command};
use serde_json::{Map, Value};

use crate::schema::{FieldDescriptor, FieldType};

/// Joins the path segments of nested fields into a single flag key.
pub const SEPARATOR: char = '-';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagType {
    String,
    Boolean,
}

/// Which part of the request a set of fields belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Params,
    Query,
    Payload,
}

impl InputKind {
    fn help_prefix(self) -> &'static str {
        match self {
            InputKind::Params => "Route path param",
            InputKind::Query => "Route query param",
            InputKind::Payload => "Route payload param",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagValue {
    Bool(bool),
    Str(String),
    Many(Vec<String>),
}

impl FlagValue {
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            FlagValue::Bool(b) => Value::Bool(*b),
            FlagValue::Str(s) => Value::String(s.clone()),
            FlagValue::Many(values) => {
                Value::Array(values.iter().cloned().map(Value::String).collect())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagDefinition {
    pub key: String,
    pub flag_type: FlagType,
    pub alias: Option<char>,
    pub multiple: bool,
    pub description: String,
    pub default: Option<FlagValue>,
    /// Restricts accepted values, when set.
    pub valid: Option<Vec<String>>,
}

impl FlagDefinition {
    pub fn new<K: Into<String>, D: Into<String>>(key: K, flag_type: FlagType, description: D) -> Self {
        Self {
            key: key.into(),
            flag_type,
            alias: None,
            multiple: false,
            description: description.into(),
            default: None,
            valid: None,
        }
    }

    #[must_use]
    pub fn alias(mut self, alias: char) -> Self {
        self.alias = Some(alias);
        self
    }

    #[must_use]
    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: Option<FlagValue>) -> Self {
        self.default = value;
        self
    }

    #[must_use]
    pub fn valid<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.valid = Some(values.into_iter().map(Into::into).collect());
        self
    }

    fn to_arg(&self) -> Arg {
        let mut arg = Arg::new(self.key.clone())
            .long(self.key.clone())
            .help(self.description.clone());
        if let Some(alias) = self.alias {
            arg = arg.short(alias);
        }
        arg = match (self.flag_type, self.multiple) {
            (FlagType::Boolean, false) => arg.action(ArgAction::SetTrue),
            (FlagType::Boolean, true) => arg
                .action(ArgAction::Append)
                .value_parser(PossibleValuesParser::new(["true", "false"])),
            (FlagType::String, true) => arg.action(ArgAction::Append).num_args(1),
            (FlagType::String, false) => arg.action(ArgAction::Set).num_args(1),
        };
        if let Some(valid) = &self.valid {
            arg = arg.value_parser(PossibleValuesParser::new(valid.clone()));
        }
        arg
    }

    fn extract(&self, matches: &ArgMatches) -> Option<FlagValue> {
        match (self.flag_type, self.multiple) {
            (FlagType::Boolean, false) => Some(FlagValue::Bool(matches.get_flag(&self.key))),
            (_, true) => matches
                .get_many::<String>(&self.key)
                .map(|values| FlagValue::Many(values.cloned().collect())),
            (FlagType::String, false) => matches.get_one::<String>(&self.key).cloned().map(FlagValue::Str),
        }
    }
}

/// An ordered set of flags keyed by name. Inserting an existing key replaces it in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Definition {
    flags: Vec<FlagDefinition>,
}

impl Definition {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, flag: FlagDefinition) {
        match self.flags.iter_mut().find(|f| f.key == flag.key) {
            Some(existing) => *existing = flag,
            None => self.flags.push(flag),
        }
    }

    /// Merge `other` into this definition; `other` wins on key collisions.
    #[must_use]
    pub fn merge(mut self, other: Definition) -> Self {
        for flag in other.flags {
            self.insert(flag);
        }
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&FlagDefinition> {
        self.flags.iter().find(|f| f.key == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FlagDefinition> {
        self.flags.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// The clap command performing syntax parsing for this definition.
    #[must_use]
    pub fn to_command(&self, name: &str, usage: &str) -> Command {
        let mut cmd = Command::new(name.to_string())
            .no_binary_name(true)
            .disable_help_flag(true)
            .disable_version_flag(true)
            .args_override_self(true)
            .allow_negative_numbers(true)
            .override_usage(usage.to_string());
        for flag in &self.flags {
            cmd = cmd.arg(flag.to_arg());
        }
        cmd
    }

    /// Rendered usage block: usage lines followed by every flag with its help text.
    #[must_use]
    pub fn usage(&self, name: &str, usage: &str) -> String {
        let mut cmd = self.to_command(name, usage);
        cmd.render_help().to_string().trim_end().to_string()
    }
}

/// Build one flag per field (and per nested object field), keyed by the dash-joined path.
#[must_use]
pub fn build_definition(fields: &[FieldDescriptor], kind: InputKind) -> Definition {
    let mut definition = Definition::new();
    collect_flags(fields, kind, None, &mut definition);
    definition
}

fn collect_flags(
    fields: &[FieldDescriptor],
    kind: InputKind,
    prefix: Option<&str>,
    definition: &mut Definition,
) {
    for field in fields.iter().filter(|f| is_flag_name(&f.name)) {
        let key = join_key(prefix, &field.name);
        definition.insert(flag_for_field(field, &key, kind));
        if let Some(children) = &field.children {
            collect_flags(children, kind, Some(&key), definition);
        }
    }
}

fn flag_for_field(field: &FieldDescriptor, key: &str, kind: InputKind) -> FlagDefinition {
    let description = match &field.description {
        Some(text) => format!("{}: {}", kind.help_prefix(), text),
        None => kind.help_prefix().to_string(),
    };
    let (flag_type, multiple) = match (&field.field_type, &field.items) {
        (FieldType::Array, Some(items)) if items.len() == 1 => {
            (flag_type_of(&items[0].field_type), true)
        }
        (FieldType::Array, _) => (FlagType::String, true),
        (other, _) => (flag_type_of(other), false),
    };
    let flag = FlagDefinition::new(key, flag_type, description);
    if multiple {
        flag.multiple()
    } else {
        flag
    }
}

fn flag_type_of(field_type: &FieldType) -> FlagType {
    if *field_type == FieldType::Boolean {
        FlagType::Boolean
    } else {
        FlagType::String
    }
}

/// Field names clap can take as a long flag; other fields get no flag.
fn is_flag_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('-') && !name.contains('=')
}

fn join_key(prefix: Option<&str>, name: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}{SEPARATOR}{name}"),
        None => name.to_string(),
    }
}

/// The flags every request-injecting command understands.
///
/// `raw_default` is the default for `--raw` (typically `true` when stdout is not a
/// terminal); `with_config` adds the batch-file flag.
#[must_use]
pub fn builtin_flags(raw_default: bool, with_config: bool) -> Definition {
    let mut definition = Definition::new();
    definition.insert(
        FlagDefinition::new("help", FlagType::Boolean, "Show usage options.").alias('h'),
    );
    definition.insert(
        FlagDefinition::new(
            "header",
            FlagType::String,
            "Request headers. Should be specified once per header, e.g -H \"content-type: text/plain\" -H \"user-agent: routedebug\".",
        )
        .alias('H')
        .multiple(),
    );
    definition.insert(
        FlagDefinition::new(
            "data",
            FlagType::String,
            "Raw payload data. Should not be used in conjunction with route-specific payload options. Note that the default content-type remains \"application/json\".",
        )
        .alias('d'),
    );
    definition.insert(
        FlagDefinition::new(
            "verbose",
            FlagType::Boolean,
            "Show timing and headers in addition to response.",
        )
        .alias('v'),
    );
    definition.insert(
        FlagDefinition::new(
            "raw",
            FlagType::Boolean,
            "Output only the unformatted response payload.",
        )
        .alias('r')
        .default_value(raw_default.then_some(FlagValue::Bool(true))),
    );
    if with_config {
        definition.insert(
            FlagDefinition::new(
                "config",
                FlagType::String,
                "Path to a request collection (Postman v2, JSON or YAML) to run against the server.",
            )
            .alias('c'),
        );
    }
    definition
}

/// Flat flag values keyed by flag name. Flags that were not supplied are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedParameters {
    values: BTreeMap<String, FlagValue>,
}

impl ParsedParameters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<K: Into<String>>(&mut self, key: K, value: FlagValue) {
        self.values.insert(key.into(), value);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&FlagValue> {
        self.values.get(key)
    }

    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.values.get(key), Some(FlagValue::Bool(true)))
    }

    #[must_use]
    pub fn string(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(FlagValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn strings(&self, key: &str) -> Vec<String> {
        match self.values.get(key) {
            Some(FlagValue::Many(values)) => values.clone(),
            Some(FlagValue::Str(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

/// Parse `argv` against `definition`.
///
/// Unset booleans are dropped rather than reported as `false`, so every kind of flag
/// shares the same "absent" representation. Defaults are applied afterwards.
///
/// # Errors
///
/// Returns the clap error for unknown flags, invalid values or missing values.
pub fn parse(
    definition: &Definition,
    name: &str,
    usage: &str,
    argv: &[String],
) -> Result<ParsedParameters, clap::Error> {
    let matches = definition.to_command(name, usage).try_get_matches_from(argv)?;
    let mut parameters = ParsedParameters::new();
    for flag in definition.iter() {
        match flag.extract(&matches) {
            Some(FlagValue::Bool(false)) | None => {
                if let Some(default) = &flag.default {
                    parameters.insert(flag.key.clone(), default.clone());
                }
            }
            Some(value) => parameters.insert(flag.key.clone(), value),
        }
    }
    parameters
        .values
        .retain(|_, value| *value != FlagValue::Bool(false));
    tracing::trace!(keys = ?parameters.values.keys().collect::<Vec<_>>(), "parsed flags");
    Ok(parameters)
}

/// First line of a clap error, without clap's `error: ` prefix.
#[must_use]
pub fn parse_error_message(err: &clap::Error) -> String {
    let text = err.to_string();
    let first = text.lines().next().unwrap_or_default();
    first.strip_prefix("error: ").unwrap_or(first).to_string()
}

/// Rebuild the nested object described by `fields` from flat flag values.
///
/// Returns `None` when no value was supplied anywhere in the tree: an empty object
/// and no object at all mean different things to a route.
#[must_use]
pub fn pick(parameters: &ParsedParameters, fields: &[FieldDescriptor]) -> Option<Map<String, Value>> {
    pick_at(parameters, fields, None)
}

fn pick_at(
    parameters: &ParsedParameters,
    fields: &[FieldDescriptor],
    prefix: Option<&str>,
) -> Option<Map<String, Value>> {
    let mut picked = Map::new();
    for field in fields.iter().filter(|f| is_flag_name(&f.name)) {
        let key = join_key(prefix, &field.name);
        if let Some(value) = parameters.get(&key) {
            picked.insert(field.name.clone(), value_for_field(field, value));
        }
        if let Some(children) = &field.children {
            if let Some(nested) = pick_at(parameters, children, Some(&key)) {
                let merged = match picked.remove(&field.name) {
                    Some(Value::Object(mut base)) => {
                        base.extend(nested);
                        base
                    }
                    _ => nested,
                };
                picked.insert(field.name.clone(), Value::Object(merged));
            }
        }
    }
    (!picked.is_empty()).then_some(picked)
}

fn value_for_field(field: &FieldDescriptor, value: &FlagValue) -> Value {
    if field.field_type == FieldType::Object {
        if let FlagValue::Str(text) = value {
            if let Ok(object @ Value::Object(_)) = serde_json::from_str::<Value>(text) {
                return object;
            }
        }
    }
    value.to_json()
}
