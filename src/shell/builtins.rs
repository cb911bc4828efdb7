//! Commands executed inside the runner rather than as child processes.
//!
//! Every builtin receives the full argument vector, command name included.

use std::fs;
use std::path::Path;

use super::ast::is_name;
use super::error::RuntimeError;
use super::runner::{Flow, Runner};

pub(super) type Builtin = fn(&mut Runner, &[String]) -> Result<Flow, RuntimeError>;

/// Find the builtin implementing `name`.
pub(super) fn lookup(name: &str) -> Option<Builtin> {
    let builtin: Builtin = match name {
        ":" | "true" => builtin_true,
        "false" => builtin_false,
        "echo" => echo,
        "cd" => cd,
        "pwd" => pwd,
        "export" => export,
        "unset" => unset,
        "exit" => exit,
        "return" => return_builtin,
        "break" => break_builtin,
        "continue" => continue_builtin,
        "shift" => shift,
        "set" => set,
        "test" | "[" => test_command,
        "read" => read,
        "eval" => eval,
        "source" | "." => source,
        _ => return None,
    };
    Some(builtin)
}

fn status(runner: &mut Runner, code: i32) -> Result<Flow, RuntimeError> {
    runner.last_status = code;
    Ok(Flow::Normal)
}

fn fail(runner: &mut Runner, code: i32, message: &str) -> Result<Flow, RuntimeError> {
    runner.report(message)?;
    status(runner, code)
}

fn builtin_true(runner: &mut Runner, _args: &[String]) -> Result<Flow, RuntimeError> {
    status(runner, 0)
}

fn builtin_false(runner: &mut Runner, _args: &[String]) -> Result<Flow, RuntimeError> {
    status(runner, 1)
}

fn echo(runner: &mut Runner, args: &[String]) -> Result<Flow, RuntimeError> {
    let mut words = &args[1..];
    let mut newline = true;
    while let Some(first) = words.first() {
        if first != "-n" {
            break;
        }
        newline = false;
        words = &words[1..];
    }

    let mut line = words.join(" ");
    if newline {
        line.push('\n');
    }
    runner.write_stdout(line.as_bytes())?;
    status(runner, 0)
}

fn cd(runner: &mut Runner, args: &[String]) -> Result<Flow, RuntimeError> {
    let target = match args.get(1).map(String::as_str) {
        None => match runner.var("HOME") {
            Some(home) => home.to_string(),
            None => return fail(runner, 1, "cd: HOME not set"),
        },
        Some("-") => match runner.var("OLDPWD") {
            Some(old) => old.to_string(),
            None => return fail(runner, 1, "cd: OLDPWD not set"),
        },
        Some(dir) => dir.to_string(),
    };

    let path = match fs::canonicalize(runner.resolve_path(&target)) {
        Ok(path) => path,
        Err(e) => return fail(runner, 1, &format!("cd: {target}: {e}")),
    };
    if !path.is_dir() {
        return fail(runner, 1, &format!("cd: {target}: Not a directory"));
    }

    let previous = runner.cwd.display().to_string();
    runner.set_var("OLDPWD", previous);
    runner.set_var("PWD", path.display().to_string());
    runner.cwd = path;
    status(runner, 0)
}

fn pwd(runner: &mut Runner, _args: &[String]) -> Result<Flow, RuntimeError> {
    let line = format!("{}\n", runner.cwd.display());
    runner.write_stdout(line.as_bytes())?;
    status(runner, 0)
}

fn export(runner: &mut Runner, args: &[String]) -> Result<Flow, RuntimeError> {
    if args.len() == 1 {
        let mut exported: Vec<String> = runner
            .exported_env()
            .map(|(name, value)| format!("export {name}='{value}'\n"))
            .collect();
        exported.sort();
        runner.write_stdout(exported.concat().as_bytes())?;
        return status(runner, 0);
    }

    let mut code = 0;
    for arg in &args[1..] {
        let (name, value) = match arg.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (arg.as_str(), None),
        };
        if !is_name(name) {
            runner.report(&format!("export: '{arg}': not a valid identifier"))?;
            code = 1;
            continue;
        }
        if let Some(value) = value {
            runner.set_var(name, value);
        }
        runner.export_var(name);
    }
    status(runner, code)
}

fn unset(runner: &mut Runner, args: &[String]) -> Result<Flow, RuntimeError> {
    let mut functions = false;
    for arg in &args[1..] {
        match arg.as_str() {
            "-f" => functions = true,
            "-v" => functions = false,
            name if functions => {
                runner.functions.remove(name);
            }
            name => runner.unset_var(name),
        }
    }
    status(runner, 0)
}

/// Parse an optional numeric operand for `exit` and `return`.
fn status_operand(runner: &Runner, args: &[String]) -> Result<i32, String> {
    match args.get(1) {
        None => Ok(runner.last_status),
        Some(arg) => arg
            .parse::<i32>()
            .map(|code| code & 0xff)
            .map_err(|_| format!("{}: {arg}: numeric argument required", args[0])),
    }
}

fn exit(runner: &mut Runner, args: &[String]) -> Result<Flow, RuntimeError> {
    runner.last_status = match status_operand(runner, args) {
        Ok(code) => code,
        Err(message) => {
            runner.report(&message)?;
            2
        }
    };
    Ok(Flow::Exit)
}

fn return_builtin(runner: &mut Runner, args: &[String]) -> Result<Flow, RuntimeError> {
    match status_operand(runner, args) {
        Ok(code) => {
            runner.last_status = code;
            Ok(Flow::Return)
        }
        Err(message) => fail(runner, 2, &message),
    }
}

fn loop_count(runner: &mut Runner, args: &[String]) -> Result<Option<usize>, RuntimeError> {
    let count = match args.get(1) {
        None => 1,
        Some(arg) => match arg.parse::<usize>() {
            Ok(n) if n >= 1 => n,
            _ => {
                fail(runner, 1, &format!("{}: {arg}: loop count out of range", args[0]))?;
                return Ok(None);
            }
        },
    };
    if runner.loop_depth == 0 {
        fail(runner, 0, &format!("{}: only meaningful in a loop", args[0]))?;
        return Ok(None);
    }
    runner.last_status = 0;
    Ok(Some(count.min(runner.loop_depth)))
}

fn break_builtin(runner: &mut Runner, args: &[String]) -> Result<Flow, RuntimeError> {
    Ok(loop_count(runner, args)?.map_or(Flow::Normal, Flow::Break))
}

fn continue_builtin(runner: &mut Runner, args: &[String]) -> Result<Flow, RuntimeError> {
    Ok(loop_count(runner, args)?.map_or(Flow::Normal, Flow::Continue))
}

fn shift(runner: &mut Runner, args: &[String]) -> Result<Flow, RuntimeError> {
    let count = match args.get(1) {
        None => 1,
        Some(arg) => match arg.parse::<usize>() {
            Ok(n) => n,
            Err(_) => return fail(runner, 1, &format!("shift: {arg}: numeric argument required")),
        },
    };
    if count > runner.positional.len() {
        return status(runner, 1);
    }
    runner.positional.drain(..count);
    status(runner, 0)
}

/// `set [-e|+e] [--] [ARG...]`
fn set(runner: &mut Runner, args: &[String]) -> Result<Flow, RuntimeError> {
    if args.len() == 1 {
        let mut vars: Vec<String> = runner
            .vars
            .iter()
            .map(|(name, var)| format!("{name}='{}'\n", var.value))
            .collect();
        vars.sort();
        runner.write_stdout(vars.concat().as_bytes())?;
        return status(runner, 0);
    }

    let mut rest = &args[1..];
    let mut code = 0;
    while let Some(arg) = rest.first() {
        if arg == "--" {
            rest = &rest[1..];
            runner.positional = rest.to_vec();
            return status(runner, code);
        }
        let (enable, flags) = match (arg.strip_prefix('-'), arg.strip_prefix('+')) {
            (Some(flags), _) if !flags.is_empty() => (true, flags),
            (_, Some(flags)) if !flags.is_empty() => (false, flags),
            _ => break,
        };
        for flag in flags.chars() {
            match flag {
                'e' => runner.errexit = enable,
                other => {
                    runner.report(&format!("set: -{other}: unsupported option"))?;
                    code = 2;
                }
            }
        }
        rest = &rest[1..];
    }

    if !rest.is_empty() {
        runner.positional = rest.to_vec();
    }
    status(runner, code)
}

fn test_command(runner: &mut Runner, args: &[String]) -> Result<Flow, RuntimeError> {
    let mut operands: Vec<&str> = args[1..].iter().map(String::as_str).collect();
    if args[0] == "[" {
        if operands.last() != Some(&"]") {
            return fail(runner, 2, "[: missing ']'");
        }
        operands.pop();
    }

    match evaluate_test(runner, &operands) {
        Ok(true) => status(runner, 0),
        Ok(false) => status(runner, 1),
        Err(message) => fail(runner, 2, &format!("{}: {message}", args[0])),
    }
}

fn is_binary_operator(op: &str) -> bool {
    matches!(
        op,
        "=" | "==" | "!=" | "-eq" | "-ne" | "-lt" | "-le" | "-gt" | "-ge"
    )
}

fn evaluate_test(runner: &Runner, args: &[&str]) -> Result<bool, String> {
    match args {
        [] => Ok(false),
        [lhs, op, rhs] if is_binary_operator(op) => binary_test(lhs, op, rhs),
        ["!", rest @ ..] => evaluate_test(runner, rest).map(|result| !result),
        ["(", inner @ .., ")"] => evaluate_test(runner, inner),
        [value] => Ok(!value.is_empty()),
        [op, operand] => unary_test(runner, op, operand),
        _ => Err("too many arguments".to_string()),
    }
}

fn integer(value: &str) -> Result<i64, String> {
    value
        .trim()
        .parse()
        .map_err(|_| format!("{value}: integer expression expected"))
}

fn binary_test(lhs: &str, op: &str, rhs: &str) -> Result<bool, String> {
    Ok(match op {
        "=" | "==" => lhs == rhs,
        "!=" => lhs != rhs,
        _ => {
            let (lhs, rhs) = (integer(lhs)?, integer(rhs)?);
            match op {
                "-eq" => lhs == rhs,
                "-ne" => lhs != rhs,
                "-lt" => lhs < rhs,
                "-le" => lhs <= rhs,
                "-gt" => lhs > rhs,
                _ => lhs >= rhs,
            }
        }
    })
}

fn unary_test(runner: &Runner, op: &str, operand: &str) -> Result<bool, String> {
    let path = || runner.resolve_path(operand);
    Ok(match op {
        "-z" => operand.is_empty(),
        "-n" => !operand.is_empty(),
        "-e" => path().exists(),
        "-f" => path().is_file(),
        "-d" => path().is_dir(),
        "-s" => fs::metadata(path()).is_ok_and(|m| m.len() > 0),
        "-r" | "-w" => path().exists(),
        "-x" => is_executable(&path()),
        _ => return Err(format!("{op}: unary operator expected")),
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// `read [-r] [NAME...]`: the last name receives the rest of the line.
fn read(runner: &mut Runner, args: &[String]) -> Result<Flow, RuntimeError> {
    let names: Vec<&str> = args[1..]
        .iter()
        .map(String::as_str)
        .filter(|arg| *arg != "-r")
        .collect();
    if let Some(bad) = names.iter().find(|name| !is_name(name)) {
        return fail(runner, 2, &format!("read: '{bad}': not a valid identifier"));
    }

    let Some(line) = runner.read_line()? else {
        return status(runner, 1);
    };

    if names.is_empty() {
        runner.set_var("REPLY", line);
        return status(runner, 0);
    }

    let mut rest = line.trim_start();
    for (index, name) in names.iter().enumerate() {
        if index + 1 == names.len() {
            runner.set_var(name, rest.trim_end());
            break;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        runner.set_var(name, &rest[..end]);
        rest = rest[end..].trim_start();
    }
    status(runner, 0)
}

fn eval(runner: &mut Runner, args: &[String]) -> Result<Flow, RuntimeError> {
    let source = args[1..].join(" ");
    if source.trim().is_empty() {
        return status(runner, 0);
    }
    let name = runner.script_name.clone();
    runner.run_nested(&source, &name)
}

/// `source FILE [ARG...]`: run a file in the current context.
fn source(runner: &mut Runner, args: &[String]) -> Result<Flow, RuntimeError> {
    let Some(file) = args.get(1) else {
        return fail(runner, 2, &format!("{}: filename argument required", args[0]));
    };
    let text = match fs::read_to_string(runner.resolve_path(file)) {
        Ok(text) => text,
        Err(e) => return fail(runner, 1, &format!("{file}: {e}")),
    };

    let saved = (args.len() > 2).then(|| std::mem::replace(&mut runner.positional, args[2..].to_vec()));
    let result = runner.run_nested(&text, file);
    if let Some(positional) = saved {
        runner.positional = positional;
    }

    match result? {
        Flow::Return => Ok(Flow::Normal),
        flow => Ok(flow),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunnerConfig;
    use crate::shell::parser;
    use crate::shell::runner::{CancelToken, SharedBuffer};

    fn run_in(runner: &mut Runner, source: &str) -> Result<(), RuntimeError> {
        let program = parser::parse(source, "test.sh").unwrap();
        runner.run(&program, &CancelToken::new())
    }

    fn capture() -> (Runner, SharedBuffer, SharedBuffer) {
        let out = SharedBuffer::new();
        let err = SharedBuffer::new();
        let runner = Runner::new(&RunnerConfig::default())
            .unwrap()
            .with_output(out.clone(), err.clone());
        (runner, out, err)
    }

    #[test]
    fn test_lookup() {
        for name in [":", "true", "echo", "cd", "test", "[", "source", "."] {
            assert!(lookup(name).is_some(), "missing builtin {name}");
        }
        assert!(lookup("ls").is_none());
    }

    #[test]
    fn test_test_builtin() {
        let (mut runner, out, _) = capture();
        let script = r#"
[ -z "" ] && echo z
[ -n "x" ] && echo n
[ abc = abc ] && echo eq
[ abc != abd ] && echo ne
[ 2 -lt 10 ] && echo lt
test 3 -ge 3 && echo ge
[ ! -e /definitely/not/here ] && echo missing
[ -d / ] && echo dir
[ "" ] || echo empty-false
true
"#;
        run_in(&mut runner, script).unwrap();
        assert_eq!(
            out.contents(),
            "z\nn\neq\nne\nlt\nge\nmissing\ndir\nempty-false\n"
        );
    }

    #[test]
    fn test_test_errors() {
        let (mut runner, _, err) = capture();
        run_in(&mut runner, "[ 1 -eq 1; true").unwrap();
        assert!(err.contents().contains("missing ']'"));

        let (mut runner, out, _) = capture();
        run_in(&mut runner, "[ a -lt 2 ]; echo $?").unwrap();
        assert_eq!(out.contents(), "2\n");
    }

    #[test]
    fn test_cd_and_pwd() {
        let dir = tempfile::tempdir().unwrap();
        let canonical = fs::canonicalize(dir.path()).unwrap();
        fs::create_dir(canonical.join("sub")).unwrap();

        let (mut runner, out, _) = capture();
        let script = format!("cd {}\ncd sub\npwd\ncd -\npwd", canonical.display());
        run_in(&mut runner, &script).unwrap();
        assert_eq!(
            out.contents(),
            format!("{}\n{}\n", canonical.join("sub").display(), canonical.display())
        );
        assert_eq!(runner.cwd(), canonical.as_path());
        assert_eq!(runner.var("PWD"), Some(canonical.to_str().unwrap()));
    }

    #[test]
    fn test_cd_missing_directory() {
        let (mut runner, _, err) = capture();
        let before = runner.cwd().to_path_buf();
        assert!(run_in(&mut runner, "cd /definitely/not/here").is_err());
        assert_eq!(runner.cwd(), before.as_path());
        assert!(err.contents().contains("cd: /definitely/not/here"));
    }

    #[test]
    fn test_unset_and_export_errors() {
        let (mut runner, _, err) = capture();
        run_in(&mut runner, "X=1; unset X; f() { :; }; unset -f f").unwrap();
        assert_eq!(runner.var("X"), None);
        assert!(!runner.has_function("f"));

        assert!(run_in(&mut runner, "export 1BAD=x").is_err());
        assert!(err.contents().contains("not a valid identifier"));
    }

    #[test]
    fn test_shift_and_set() {
        let (mut runner, out, _) = capture();
        run_in(&mut runner, "set -- a b c\nshift\necho $@\nshift 2\necho $#").unwrap();
        assert_eq!(out.contents(), "b c\n0\n");
        assert!(run_in(&mut runner, "shift").is_err());
    }

    #[test]
    fn test_set_unsupported_option() {
        let (mut runner, _, err) = capture();
        assert!(run_in(&mut runner, "set -x").is_err());
        assert!(err.contents().contains("-x: unsupported option"));
    }

    #[test]
    fn test_read_splits_fields() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.txt");
        fs::write(&input, "  first second  third \nnext\n").unwrap();

        let (mut runner, _, _) = capture();
        let script = format!("read A B < {}", input.display());
        run_in(&mut runner, &script).unwrap();
        assert_eq!(runner.var("A"), Some("first"));
        assert_eq!(runner.var("B"), Some("second  third"));
    }

    #[test]
    fn test_read_at_end_of_input() {
        let (mut runner, out, _) = capture();
        run_in(&mut runner, "read LINE < /dev/null; echo $?").unwrap();
        assert_eq!(out.contents(), "1\n");
    }

    #[test]
    fn test_eval() {
        let (mut runner, out, err) = capture();
        run_in(&mut runner, "CMD='echo evaluated'; eval $CMD; eval 'Y=2'; echo $Y").unwrap();
        assert_eq!(out.contents(), "evaluated\n2\n");

        assert!(run_in(&mut runner, "eval 'if true'").is_err());
        assert!(err.contents().contains("expected"));
    }

    #[test]
    fn test_source_runs_in_current_context() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("lib.sh");
        fs::write(&lib, "LOADED=yes\nhelper() { echo \"helped $1\"; }\nreturn 0\necho never\n").unwrap();

        let (mut runner, out, _) = capture();
        let script = format!(". {}\nhelper me\necho $LOADED", lib.display());
        run_in(&mut runner, &script).unwrap();
        assert_eq!(out.contents(), "helped me\nyes\n");
    }

    #[test]
    fn test_break_outside_loop() {
        let (mut runner, out, err) = capture();
        run_in(&mut runner, "break\necho after").unwrap();
        assert_eq!(out.contents(), "after\n");
        assert!(err.contents().contains("only meaningful in a loop"));
    }

    #[test]
    fn test_exit_numeric_argument() {
        let (mut runner, _, err) = capture();
        assert!(matches!(
            run_in(&mut runner, "exit abc"),
            Err(RuntimeError::ExitStatus(2))
        ));
        assert!(err.contents().contains("numeric argument required"));
    }
}
