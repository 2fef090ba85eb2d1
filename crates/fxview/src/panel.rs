//! Line-oriented control panel on stdin.
//!
//! ```text
//! set bloom.strength 0.8   toggle glitch   get tint.red-x   list   quit
//! ```

use std::io::{self, BufRead, Write};
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Result};
use composer::{ParamValue, ParameterInfo};
use renderer::ControlHandle;

/// What the panel needs from the running viewer.
pub trait ParameterControl {
    fn set_parameter(&self, key: &str, value: ParamValue) -> Result<ParamValue>;
    fn toggle(&self, stage: &str) -> Result<bool>;
    fn parameters(&self) -> Result<Vec<ParameterInfo>>;
    fn shutdown(&self);
}

impl ParameterControl for ControlHandle {
    fn set_parameter(&self, key: &str, value: ParamValue) -> Result<ParamValue> {
        ControlHandle::set_parameter(self, key, value)
    }

    fn toggle(&self, stage: &str) -> Result<bool> {
        ControlHandle::toggle(self, stage)
    }

    fn parameters(&self) -> Result<Vec<ParameterInfo>> {
        ControlHandle::parameters(self)
    }

    fn shutdown(&self) {
        ControlHandle::shutdown(self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PanelCommand {
    Set { key: String, value: ParamValue },
    Toggle(String),
    Get(String),
    List,
    Help,
    Quit,
}

const HELP: &str = "commands: set <stage.param> <value> | toggle <stage> | get <stage.param> | list | quit";

/// Parses one input line; blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<PanelCommand>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or_default().to_ascii_lowercase();
    let args: Vec<&str> = words.collect();

    let command = match (verb.as_str(), args.as_slice()) {
        ("set", [key, value]) => PanelCommand::Set {
            key: (*key).to_string(),
            value: ParamValue::parse(value)
                .ok_or_else(|| format!("'{value}' is neither a number nor true/false"))?,
        },
        ("set", [assignment]) if assignment.contains('=') => {
            let (key, value) = crate::cli::parse_assignment(assignment)?;
            PanelCommand::Set { key, value }
        }
        ("toggle", [stage]) => PanelCommand::Toggle((*stage).to_string()),
        ("get", [key]) => PanelCommand::Get((*key).to_string()),
        ("list" | "ls", []) => PanelCommand::List,
        ("help" | "?", []) => PanelCommand::Help,
        ("quit" | "exit" | "q", []) => PanelCommand::Quit,
        (verb, _) => return Err(format!("unrecognised command '{verb}'; {HELP}")),
    };
    Ok(Some(command))
}

/// Applies one command and writes its outcome. Returns false once the panel should stop.
pub fn execute<C: ParameterControl>(
    control: &C,
    command: PanelCommand,
    out: &mut impl Write,
) -> io::Result<bool> {
    match command {
        PanelCommand::Set { key, value } => match control.set_parameter(&key, value) {
            Ok(stored) => writeln!(out, "{key} = {stored}")?,
            Err(err) => writeln!(out, "error: {err:#}")?,
        },
        PanelCommand::Toggle(stage) => match control.toggle(&stage) {
            Ok(enabled) => writeln!(out, "{stage} {}", if enabled { "enabled" } else { "disabled" })?,
            Err(err) => writeln!(out, "error: {err:#}")?,
        },
        PanelCommand::Get(key) => match lookup(control, &key) {
            Ok(info) => writeln!(out, "{}", describe(&info))?,
            Err(err) => writeln!(out, "error: {err:#}")?,
        },
        PanelCommand::List => match control.parameters() {
            Ok(parameters) => {
                for info in &parameters {
                    writeln!(out, "{}", describe(info))?;
                }
            }
            Err(err) => writeln!(out, "error: {err:#}")?,
        },
        PanelCommand::Help => writeln!(out, "{HELP}")?,
        PanelCommand::Quit => {
            control.shutdown();
            return Ok(false);
        }
    }
    Ok(true)
}

fn lookup<C: ParameterControl>(control: &C, key: &str) -> Result<ParameterInfo> {
    control
        .parameters()?
        .into_iter()
        .find(|info| info.key == key)
        .ok_or_else(|| anyhow!("unknown parameter '{key}'"))
}

fn describe(info: &ParameterInfo) -> String {
    match (info.min, info.max) {
        (Some(min), Some(max)) => format!("{} = {}  [{min}, {max}]  {}", info.key, info.value, info.label),
        _ => format!("{} = {}  {}", info.key, info.value, info.label),
    }
}

/// Reads commands until `quit` or end of input.
pub fn run<C: ParameterControl>(
    control: &C,
    input: impl BufRead,
    out: &mut impl Write,
) -> io::Result<()> {
    for line in input.lines() {
        let line = line?;
        match parse_line(&line) {
            Ok(Some(command)) => {
                if !execute(control, command, out)? {
                    break;
                }
            }
            Ok(None) => {}
            Err(message) => writeln!(out, "error: {message}")?,
        }
        out.flush()?;
    }
    Ok(())
}

/// Serves stdin on a background thread for as long as the window lives.
pub fn spawn(control: ControlHandle) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("fxview-panel".into())
        .spawn(move || {
            let stdin = io::stdin();
            let mut stdout = io::stdout();
            if let Err(err) = run(&control, stdin.lock(), &mut stdout) {
                tracing::warn!(error = %err, "control panel stopped");
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct FakeControl {
        values: RefCell<BTreeMap<String, ParamValue>>,
        shutdown: RefCell<bool>,
    }

    impl FakeControl {
        fn with(entries: &[(&str, ParamValue)]) -> Self {
            let control = Self::default();
            for (key, value) in entries {
                control.values.borrow_mut().insert((*key).to_string(), *value);
            }
            control
        }
    }

    impl ParameterControl for FakeControl {
        fn set_parameter(&self, key: &str, value: ParamValue) -> Result<ParamValue> {
            let mut values = self.values.borrow_mut();
            let slot = values
                .get_mut(key)
                .ok_or_else(|| anyhow!("unknown parameter '{key}'"))?;
            *slot = value;
            Ok(value)
        }

        fn toggle(&self, stage: &str) -> Result<bool> {
            let key = format!("{stage}.enabled");
            let mut values = self.values.borrow_mut();
            match values.get_mut(&key) {
                Some(ParamValue::Bool(flag)) => {
                    *flag = !*flag;
                    Ok(*flag)
                }
                _ => Err(anyhow!("unknown stage '{stage}'")),
            }
        }

        fn parameters(&self) -> Result<Vec<ParameterInfo>> {
            Ok(self
                .values
                .borrow()
                .iter()
                .map(|(key, value)| ParameterInfo {
                    key: key.clone(),
                    label: key.clone(),
                    min: None,
                    max: None,
                    step: None,
                    value: *value,
                })
                .collect())
        }

        fn shutdown(&self) {
            *self.shutdown.borrow_mut() = true;
        }
    }

    #[test]
    fn parses_commands() {
        assert_eq!(parse_line("  ").unwrap(), None);
        assert_eq!(parse_line("# note").unwrap(), None);
        assert_eq!(
            parse_line("set bloom.strength 0.5").unwrap(),
            Some(PanelCommand::Set {
                key: "bloom.strength".into(),
                value: ParamValue::Float(0.5)
            })
        );
        assert_eq!(
            parse_line("set glitch.go_wild=on").unwrap(),
            Some(PanelCommand::Set {
                key: "glitch.go_wild".into(),
                value: ParamValue::Bool(true)
            })
        );
        assert_eq!(
            parse_line("TOGGLE glitch").unwrap(),
            Some(PanelCommand::Toggle("glitch".into()))
        );
        assert_eq!(parse_line("ls").unwrap(), Some(PanelCommand::List));
        assert!(parse_line("set bloom.strength").is_err());
        assert!(parse_line("set bloom.strength much").is_err());
        assert!(parse_line("dance").is_err());
    }

    #[test]
    fn session_applies_commands_in_order() {
        let control = FakeControl::with(&[
            ("bloom.strength", ParamValue::Float(0.3)),
            ("glitch.enabled", ParamValue::Bool(false)),
        ]);
        let input = "set bloom.strength 0.9\ntoggle glitch\nget bloom.strength\nbogus\nquit\nset bloom.strength 0.1\n";
        let mut out = Vec::new();
        run(&control, input.as_bytes(), &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "bloom.strength = 0.9");
        assert_eq!(lines[1], "glitch enabled");
        assert!(lines[2].starts_with("bloom.strength = 0.9"));
        assert!(lines[3].starts_with("error: unrecognised command 'bogus'"));
        assert_eq!(lines.len(), 4);
        assert!(*control.shutdown.borrow());
        assert_eq!(
            control.values.borrow()["bloom.strength"],
            ParamValue::Float(0.9)
        );
    }

    #[test]
    fn failures_are_reported_not_fatal() {
        let control = FakeControl::default();
        let mut out = Vec::new();
        run(&control, "set nope.value 1\ntoggle nope\nget nope.value\n".as_bytes(), &mut out)
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().filter(|line| line.starts_with("error:")).count(), 3);
        assert!(!*control.shutdown.borrow());
    }
}
