//! Built-in interpreters (simple call scripts, shell commands).

use polres_core::ScriptValue;
use regex::Regex;
use std::process::Command;
use std::sync::OnceLock;
use tracing::{error, info, warn};

use crate::r#trait::{CompiledScript, Interpreter, Result, ScriptEnv, ScriptError, ScriptStatus};

const ENOENT: i32 = 2;
const EIO: i32 = 5;
const EINVAL: i32 = 22;

/// Magnitude of a `fail()` code, clamped to what a status can carry.
fn failure_code(magnitude: u64) -> i32 {
    i32::try_from(magnitude).unwrap_or(i32::MAX)
}

/// Render a value without type decoration.
fn plain(value: &ScriptValue) -> String {
    match value {
        ScriptValue::String(s) => s.clone(),
        ScriptValue::Bool(b) => b.to_string(),
        ScriptValue::Int32(v) => v.to_string(),
        ScriptValue::Uint32(v) => v.to_string(),
        ScriptValue::Int64(v) => v.to_string(),
        ScriptValue::Uint64(v) => v.to_string(),
        ScriptValue::Double(v) => v.to_string(),
    }
}

/// Functions callable from a simple script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    Echo,
    Set,
    Fail,
    Noop,
    Require,
}

impl Builtin {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "echo" => Some(Builtin::Echo),
            "set" => Some(Builtin::Set),
            "fail" => Some(Builtin::Fail),
            "noop" => Some(Builtin::Noop),
            "require" => Some(Builtin::Require),
            _ => None,
        }
    }

    /// Accepted argument count range.
    fn arity(&self) -> (usize, usize) {
        match self {
            Builtin::Echo => (0, usize::MAX),
            Builtin::Set => (3, 3),
            Builtin::Fail => (0, 1),
            Builtin::Noop => (0, 0),
            Builtin::Require => (1, usize::MAX),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Arg {
    Const(ScriptValue),
    Var(String),
}

#[derive(Debug, Clone)]
struct Call {
    builtin: Builtin,
    args: Vec<Arg>,
    line: usize,
}

/// Split an argument list on commas that are not inside string literals.
fn split_args(text: &str) -> Option<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut escaped = false;

    for c in text.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if quoted => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            ',' if !quoted => {
                args.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if quoted {
        return None;
    }
    if !current.trim().is_empty() || !args.is_empty() {
        args.push(current.trim().to_string());
    }
    Some(args)
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

struct Patterns {
    call: Regex,
    string: Regex,
    var: Regex,
    int: Regex,
    double: Regex,
}

impl Patterns {
    fn new() -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            call: Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*\((.*)\)\s*;?$")?,
            string: Regex::new(r#"^"((?:[^"\\]|\\.)*)"$"#)?,
            var: Regex::new(r"^&([A-Za-z_][A-Za-z0-9_]*)$")?,
            int: Regex::new(r"^-?[0-9]+$")?,
            double: Regex::new(r"^-?[0-9]+\.[0-9]+$")?,
        })
    }

    /// Shared, compiled once per process.
    fn get() -> std::result::Result<&'static Self, regex::Error> {
        static PATTERNS: OnceLock<std::result::Result<Patterns, regex::Error>> = OnceLock::new();
        PATTERNS.get_or_init(Self::new).as_ref().map_err(Clone::clone)
    }

    fn parse_arg(&self, text: &str) -> Option<Arg> {
        if let Some(caps) = self.string.captures(text) {
            return Some(Arg::Const(ScriptValue::String(unescape(&caps[1]))));
        }
        if let Some(caps) = self.var.captures(text) {
            return Some(Arg::Var(caps[1].to_string()));
        }
        if self.int.is_match(text) {
            let value = text.parse::<i64>().ok()?;
            return Some(Arg::Const(match i32::try_from(value) {
                Ok(v) => ScriptValue::Int32(v),
                Err(_) => ScriptValue::Int64(value),
            }));
        }
        if self.double.is_match(text) {
            return Some(Arg::Const(ScriptValue::Double(text.parse().ok()?)));
        }
        match text {
            "true" => Some(Arg::Const(ScriptValue::Bool(true))),
            "false" => Some(Arg::Const(ScriptValue::Bool(false))),
            _ => None,
        }
    }
}

/// Line-oriented call interpreter.
///
/// Each non-empty line that is not a `#` comment is a call such as
/// `echo("volume is", &volume)` or `set("audio", "state", "muted")`.
/// Arguments are string literals, integers, floats, booleans or `&name`
/// references to context variables.
pub struct SimpleInterpreter;

impl SimpleInterpreter {
    /// Interpreter name.
    pub const NAME: &'static str = "simple";

    /// Create the interpreter.
    pub fn new() -> Self {
        Self
    }

    fn compile_error(message: impl Into<String>) -> ScriptError {
        ScriptError::Compile {
            interpreter: Self::NAME.to_string(),
            message: message.into(),
        }
    }

    fn parse(&self, source: &str) -> Result<Vec<Call>> {
        let patterns = Patterns::get().map_err(|e| Self::compile_error(e.to_string()))?;
        let mut calls = Vec::new();

        for (idx, raw) in source.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let caps = patterns
                .call
                .captures(line)
                .ok_or_else(|| Self::compile_error(format!("line {}: expected a call", idx + 1)))?;

            let name = &caps[1];
            let builtin = Builtin::lookup(name).ok_or_else(|| {
                Self::compile_error(format!("line {}: unknown function '{}'", idx + 1, name))
            })?;

            let texts = split_args(&caps[2]).ok_or_else(|| {
                Self::compile_error(format!("line {}: unterminated string", idx + 1))
            })?;
            let args = texts
                .iter()
                .map(|t| {
                    patterns.parse_arg(t).ok_or_else(|| {
                        Self::compile_error(format!("line {}: bad argument '{}'", idx + 1, t))
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            let (min, max) = builtin.arity();
            if args.len() < min || args.len() > max {
                return Err(Self::compile_error(format!(
                    "line {}: {}() takes {}..{} arguments, got {}",
                    idx + 1,
                    name,
                    min,
                    if max == usize::MAX { "n".to_string() } else { max.to_string() },
                    args.len()
                )));
            }
            if builtin == Builtin::Require && args.iter().any(|a| !matches!(a, Arg::Var(_))) {
                return Err(Self::compile_error(format!(
                    "line {}: require() takes only &variables",
                    idx + 1
                )));
            }

            calls.push(Call {
                builtin,
                args,
                line: idx + 1,
            });
        }

        Ok(calls)
    }

    fn eval(arg: &Arg, env: &ScriptEnv<'_>) -> Option<ScriptValue> {
        match arg {
            Arg::Const(v) => Some(v.clone()),
            Arg::Var(name) => env.scope.lookup(name),
        }
    }

    fn run(&self, call: &Call, env: &mut ScriptEnv<'_>) -> ScriptStatus {
        match call.builtin {
            Builtin::Echo => {
                let line = call
                    .args
                    .iter()
                    .map(|a| match Self::eval(a, env) {
                        Some(v) => plain(&v),
                        None => "<unset>".to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(" ");
                info!(target_name = env.target, "echo: {}", line);
                env.output.push(line);
                ScriptStatus::Success
            }
            Builtin::Set => {
                let values: Vec<_> = call.args.iter().map(|a| Self::eval(a, env)).collect();
                let (
                    Some(Some(ScriptValue::String(table))),
                    Some(Some(ScriptValue::String(key))),
                    Some(Some(value)),
                ) = (values.first(), values.get(1), values.get(2))
                else {
                    warn!("{}: line {}: bad arguments to set()", env.target, call.line);
                    return ScriptStatus::Failure(-EINVAL);
                };
                match env.store.upsert(table, key, value.to_json()) {
                    Ok(()) => ScriptStatus::Success,
                    Err(e) => {
                        error!("{}: line {}: set() failed: {}", env.target, call.line, e);
                        ScriptStatus::Failure(-EIO)
                    }
                }
            }
            Builtin::Fail => {
                let code = match call.args.first().and_then(|a| Self::eval(a, env)) {
                    Some(ScriptValue::Int32(c)) if c != 0 => {
                        -failure_code(u64::from(c.unsigned_abs()))
                    }
                    Some(ScriptValue::Int64(c)) if c != 0 => -failure_code(c.unsigned_abs()),
                    _ => -1,
                };
                ScriptStatus::Failure(code)
            }
            Builtin::Noop => ScriptStatus::NoOp,
            Builtin::Require => {
                for arg in &call.args {
                    if let Arg::Var(name) = arg {
                        if env.scope.lookup(name).is_none() {
                            warn!("{}: required variable '{}' is not set", env.target, name);
                            return ScriptStatus::Failure(-ENOENT);
                        }
                    }
                }
                ScriptStatus::Success
            }
        }
    }
}

impl Default for SimpleInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter for SimpleInterpreter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn compile(&self, source: &str) -> Result<CompiledScript> {
        Ok(CompiledScript::new(self.parse(source)?))
    }

    fn execute(&self, script: &CompiledScript, env: &mut ScriptEnv<'_>) -> ScriptStatus {
        let Some(calls) = script.downcast_ref::<Vec<Call>>() else {
            error!("{}: script was not compiled by '{}'", env.target, Self::NAME);
            return ScriptStatus::Failure(-EINVAL);
        };

        let mut status = ScriptStatus::Success;
        for call in calls {
            status = self.run(call, env);
            if status.is_failure() {
                break;
            }
        }
        status
    }
}

/// Runs the script source with `sh -c`.
///
/// Bound context variables are exported to the environment, along with
/// `POLRES_TARGET`. Exit status 0 is success.
pub struct ShellInterpreter;

impl ShellInterpreter {
    /// Interpreter name.
    pub const NAME: &'static str = "shell";
}

impl Interpreter for ShellInterpreter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn compile(&self, source: &str) -> Result<CompiledScript> {
        let source = source.trim();
        if source.is_empty() {
            return Err(ScriptError::Compile {
                interpreter: Self::NAME.to_string(),
                message: "empty command".to_string(),
            });
        }
        Ok(CompiledScript::new(source.to_string()))
    }

    fn execute(&self, script: &CompiledScript, env: &mut ScriptEnv<'_>) -> ScriptStatus {
        let Some(command) = script.downcast_ref::<String>() else {
            return ScriptStatus::Failure(-EINVAL);
        };

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).env("POLRES_TARGET", env.target);
        for (name, value) in env.scope.bindings() {
            cmd.env(name, plain(&value));
        }

        let output = match cmd.output() {
            Ok(o) => o,
            Err(e) => {
                error!("{}: failed to run shell: {}", env.target, e);
                return ScriptStatus::Failure(-EIO);
            }
        };

        env.output.extend(
            String::from_utf8_lossy(&output.stdout)
                .lines()
                .map(|l| l.to_string()),
        );

        match output.status.code() {
            Some(0) => ScriptStatus::Success,
            Some(code) => {
                warn!("{}: shell exited with {}", env.target, code);
                ScriptStatus::Failure(-code.abs())
            }
            None => ScriptStatus::Failure(-EIO),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::r#trait::VariableScope;
    use polres_storage::{FactStore, MemoryStore};
    use std::collections::HashMap;

    struct MapScope(HashMap<String, ScriptValue>);

    impl VariableScope for MapScope {
        fn lookup(&self, name: &str) -> Option<ScriptValue> {
            self.0.get(name).cloned()
        }

        fn bindings(&self) -> Vec<(String, ScriptValue)> {
            self.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        }
    }

    fn scope(pairs: &[(&str, ScriptValue)]) -> MapScope {
        MapScope(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
    }

    fn run(
        interp: &dyn Interpreter,
        source: &str,
        scope: &MapScope,
        store: &MemoryStore,
    ) -> (ScriptStatus, Vec<String>) {
        let compiled = interp.compile(source).unwrap();
        let mut output = Vec::new();
        let mut env = ScriptEnv {
            target: "test",
            scope,
            store,
            output: &mut output,
        };
        let status = interp.execute(&compiled, &mut env);
        (status, output)
    }

    #[test]
    fn test_split_args() {
        assert_eq!(split_args("").unwrap(), Vec::<String>::new());
        assert_eq!(split_args(r#""a, b", 3"#).unwrap(), vec![r#""a, b""#, "3"]);
        assert_eq!(split_args(r#""x\"y""#).unwrap(), vec![r#""x\"y""#]);
        assert!(split_args(r#""open"#).is_none());
    }

    #[test]
    fn test_echo_with_variables() {
        let store = MemoryStore::new();
        let vars = scope(&[("volume", ScriptValue::Uint32(7))]);
        let (status, output) = run(
            &SimpleInterpreter::new(),
            "# comment\necho(\"volume\", &volume, &missing, true)\n",
            &vars,
            &store,
        );
        assert_eq!(status, ScriptStatus::Success);
        assert_eq!(output, vec!["volume 7 <unset> true".to_string()]);
    }

    #[test]
    fn test_set_writes_store() {
        let store = MemoryStore::new();
        let vars = scope(&[("state", ScriptValue::from("muted"))]);
        let (status, _) = run(
            &SimpleInterpreter::new(),
            r#"set("audio", "state", &state)"#,
            &vars,
            &store,
        );
        assert_eq!(status, ScriptStatus::Success);
        assert_eq!(store.get("audio", "state"), Some(serde_json::json!("muted")));
    }

    #[test]
    fn test_fail_stops_execution() {
        let store = MemoryStore::new();
        let vars = scope(&[]);
        let (status, output) = run(
            &SimpleInterpreter::new(),
            "echo(1)\nfail(3)\necho(2)",
            &vars,
            &store,
        );
        assert_eq!(status, ScriptStatus::Failure(-3));
        assert_eq!(output, vec!["1".to_string()]);
    }

    #[test]
    fn test_fail_code_extremes() {
        let store = MemoryStore::new();
        let interp = SimpleInterpreter::new();
        let vars = scope(&[]);

        let (status, _) = run(&interp, "fail(-2147483648)", &vars, &store);
        assert_eq!(status, ScriptStatus::Failure(-i32::MAX));
        let (status, _) = run(&interp, "fail(-9223372036854775808)", &vars, &store);
        assert_eq!(status, ScriptStatus::Failure(-i32::MAX));
        let (status, _) = run(&interp, "fail(-7)", &vars, &store);
        assert_eq!(status, ScriptStatus::Failure(-7));
        let (status, _) = run(&interp, "fail(0)", &vars, &store);
        assert_eq!(status, ScriptStatus::Failure(-1));
    }

    #[test]
    fn test_noop_and_require() {
        let store = MemoryStore::new();
        let interp = SimpleInterpreter::new();
        let (status, _) = run(&interp, "noop()", &scope(&[]), &store);
        assert_eq!(status, ScriptStatus::NoOp);

        let (status, _) = run(&interp, "require(&zone)", &scope(&[]), &store);
        assert_eq!(status, ScriptStatus::Failure(-ENOENT));

        let vars = scope(&[("zone", "driver".into())]);
        let (status, _) = run(&interp, "require(&zone)", &vars, &store);
        assert_eq!(status, ScriptStatus::Success);
    }

    #[test]
    fn test_compile_errors() {
        let interp = SimpleInterpreter::new();
        assert!(interp.compile("launch()").is_err());
        assert!(interp.compile("echo(").is_err());
        assert!(interp.compile("set(\"a\")").is_err());
        assert!(interp.compile("noop(1)").is_err());
        assert!(interp.compile("require(\"x\")").is_err());
        assert!(interp.compile("echo(bareword)").is_err());
        assert!(interp.compile("").is_ok());
    }

    #[test]
    fn test_shell_exports_variables() {
        let store = MemoryStore::new();
        let vars = scope(&[("ZONE", ScriptValue::from("driver"))]);
        let (status, output) = run(
            &ShellInterpreter,
            "echo \"$POLRES_TARGET:$ZONE\"",
            &vars,
            &store,
        );
        assert_eq!(status, ScriptStatus::Success);
        assert_eq!(output, vec!["test:driver".to_string()]);
    }

    #[test]
    fn test_shell_failure() {
        let store = MemoryStore::new();
        let (status, _) = run(&ShellInterpreter, "exit 3", &scope(&[]), &store);
        assert_eq!(status, ScriptStatus::Failure(-3));
        assert!(ShellInterpreter.compile("   ").is_err());
    }
}
