//! End-to-end executor tests built directly on hand-built [`TreeNode`]s
//! (the parser that would normally produce them is out of scope, §1) and
//! fake collaborators, covering the §8 scenarios that don't require a real
//! `fork` (external commands and pipelines get their own coverage in
//! `nsh-exec`'s unit tests under `redir`/`envstack`/`pathcache`).

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use nsh_ast::{CaseTerminator, Tag, TreeNode};
use nsh_env::builtins::{BuiltinEntry, BuiltinFlags, BuiltinRegistry, BuiltinTable};
use nsh_env::dbracket::DBracketEval;
use nsh_env::expansion::{ExpandFlags, Expansion};
use nsh_env::glob::GlobMatcher;
use nsh_env::parser::SourceParser;
use nsh_env::process::ProcessPrimitives;
use nsh_env::symtab::{SymbolTable, TypeFlags, Value};
use nsh_env::Shell;
use nsh_error::{Flow, ShellError, UnwindClass};
use nsh_exec::{ExecFlags, ExecLimits, Executor};
use nsh_token::Word;

fn word(s: &str) -> Word {
    let mut w = Word::new();
    for b in s.bytes() {
        w.push_char(b);
    }
    w.finish();
    w
}

fn node(tag: Tag) -> TreeNode {
    TreeNode::new(tag, 0, Default::default())
}

/// Literal-substitution expansion: enough to drive control flow without
/// reimplementing the out-of-scope parameter/glob expander (§1).
struct LiteralExpansion;

impl Expansion for LiteralExpansion {
    fn expand(&mut self, w: &Word, flags: ExpandFlags) -> Result<Vec<String>, ShellError> {
        let text = w.as_literal_bytes().map(|b| String::from_utf8_lossy(&b).into_owned()).unwrap_or_default();
        if flags.contains(ExpandFlags::DOBLANK) {
            Ok(text.split_whitespace().map(str::to_string).collect())
        } else {
            Ok(vec![text])
        }
    }
}

/// Matches `*` as a trailing wildcard only — sufficient for the `case`
/// scenarios under test without importing a real glob engine.
struct SimpleGlob;

impl GlobMatcher for SimpleGlob {
    fn matches(&self, text: &str, pattern: &str) -> bool {
        match pattern.strip_suffix('*') {
            Some(prefix) => text.starts_with(prefix),
            None => text == pattern,
        }
    }
}

#[derive(Default)]
struct FakeSymtab(HashMap<String, (Value, TypeFlags)>);

impl SymbolTable for FakeSymtab {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.0.get(name).map(|(v, _)| v)
    }
    fn set(&mut self, name: &str, value: Value, type_flags: TypeFlags) -> Result<(), String> {
        if self.is_readonly(name) {
            return Err(format!("{name}: is read only"));
        }
        self.0.insert(name.to_string(), (value, type_flags));
        Ok(())
    }
    fn delete(&mut self, name: &str) {
        self.0.remove(name);
    }
    fn typeset(&mut self, name: &str, flags: TypeFlags) -> Result<(), String> {
        let entry = self.0.entry(name.to_string()).or_insert((Value::Scalar(String::new()), TypeFlags::empty()));
        entry.1 |= flags;
        Ok(())
    }
    fn is_readonly(&self, name: &str) -> bool {
        self.0.get(name).is_some_and(|(_, f)| f.contains(TypeFlags::READONLY))
    }
    fn is_exported(&self, name: &str) -> bool {
        self.0.get(name).is_some_and(|(_, f)| f.contains(TypeFlags::EXPORT))
    }
    fn push_scope(&mut self) {}
    fn pop_scope(&mut self) {}
}

struct NoDBracket;
impl DBracketEval for NoDBracket {
    fn eval(&mut self, _condition: &str) -> Result<bool, ShellError> {
        Ok(false)
    }
}

struct NoParser;
impl SourceParser for NoParser {
    fn parse(&mut self, _source: &str) -> Result<TreeNode, ShellError> {
        Err(ShellError::FunctionLoadError("parser not wired in this test".into()))
    }
}

/// None of these scenarios exec an external command or spawn a pipeline,
/// so every OS-touching method here is unreachable; each panics loudly
/// rather than silently returning a made-up success.
struct NoProcess;
impl ProcessPrimitives for NoProcess {
    unsafe fn fork(&self) -> nix::Result<nix::unistd::ForkResult> {
        panic!("fork not expected in this test")
    }
    fn exec(&self, _path: &std::ffi::CString, _argv: &[std::ffi::CString], _envp: &[std::ffi::CString]) -> nix::Error {
        panic!("exec not expected in this test")
    }
    fn waitpid(&self, _pid: nix::unistd::Pid) -> nix::Result<nix::sys::wait::WaitStatus> {
        panic!("waitpid not expected in this test")
    }
    fn pipe(&self) -> nix::Result<(std::os::unix::io::RawFd, std::os::unix::io::RawFd)> {
        panic!("pipe not expected in this test")
    }
    fn dup(&self, _fd: std::os::unix::io::RawFd) -> nix::Result<std::os::unix::io::RawFd> {
        panic!("dup not expected in this test")
    }
    fn dup2(&self, _src: std::os::unix::io::RawFd, _dst: std::os::unix::io::RawFd) -> nix::Result<std::os::unix::io::RawFd> {
        panic!("dup2 not expected in this test")
    }
    fn close(&self, _fd: std::os::unix::io::RawFd) -> nix::Result<()> {
        panic!("close not expected in this test")
    }
    fn open(&self, _path: &std::ffi::CString, _flags: nix::fcntl::OFlag, _mode: nix::sys::stat::Mode) -> nix::Result<std::os::unix::io::RawFd> {
        panic!("open not expected in this test")
    }
    fn stat_is_regular(&self, _path: &str) -> bool {
        panic!("stat not expected in this test")
    }
    fn access_executable(&self, _path: &str) -> bool {
        panic!("access not expected in this test")
    }
}

type TestExecutor = Executor<LiteralExpansion, BuiltinTable, FakeSymtab, SimpleGlob, NoProcess, NoDBracket, NoParser>;

/// Builds an executor with a `BuiltinTable` wired for `echo` (appends its
/// argv, space-joined, to a shared log) plus `true`/`false`, which covers
/// every scenario below without ever reaching `call_external`.
fn executor_with_echo_log() -> (TestExecutor, Rc<RefCell<Vec<String>>>) {
    let log: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let mut builtins = BuiltinTable::new();
    let echo_log = log.clone();
    builtins.insert("echo", BuiltinEntry::new(BuiltinFlags::empty(), move |argv: &[String]| {
        echo_log.borrow_mut().push(argv.join(" "));
        0
    }));
    builtins.insert("true", BuiltinEntry::new(BuiltinFlags::empty(), |_argv| 0));
    builtins.insert("false", BuiltinEntry::new(BuiltinFlags::empty(), |_argv| 1));

    let shell = Shell::new(LiteralExpansion, builtins, FakeSymtab::default(), SimpleGlob, NoProcess, NoDBracket, NoParser);
    (Executor::new(shell, ExecLimits::unbounded()), log)
}

fn com(args: &[&str]) -> TreeNode {
    let mut n = node(Tag::Com);
    n.args = args.iter().map(|a| word(a)).collect();
    n
}

#[test]
fn simple_command_assignment_then_echo() {
    let (mut exec, log) = executor_with_echo_log();
    // `a=1 b=2; echo b` modelled directly (parameter expansion of `$b`
    // itself is the out-of-scope Expansion collaborator's job, §1).
    let mut assign = node(Tag::Com);
    assign.vars = vec![word("a=1"), word("b=2")];
    let echo = com(&["echo", "2"]);
    let list = TreeNode::binary(Tag::List, assign, echo, 0, Default::default());

    let status = exec.execute(&list, ExecFlags::empty()).unwrap();
    assert_eq!(status, 0);
    assert_eq!(log.borrow().as_slice(), ["2"]);
    assert_eq!(exec.shell.symtab.lookup("a").and_then(Value::as_scalar), Some("1"));
    assert_eq!(exec.shell.symtab.lookup("b").and_then(Value::as_scalar), Some("2"));
}

#[test]
fn and_or_short_circuit() {
    let (mut exec, log) = executor_with_echo_log();

    let and_node = TreeNode::binary(Tag::And, com(&["false"]), com(&["echo", "unreached"]), 0, Default::default());
    assert_eq!(exec.execute(&and_node, ExecFlags::empty()).unwrap(), 1);
    assert!(log.borrow().is_empty());

    let or_node = TreeNode::binary(Tag::Or, com(&["false"]), com(&["echo", "reached"]), 0, Default::default());
    assert_eq!(exec.execute(&or_node, ExecFlags::empty()).unwrap(), 0);
    assert_eq!(log.borrow().as_slice(), ["reached"]);
}

#[test]
fn bang_negates_status() {
    let (mut exec, _log) = executor_with_echo_log();
    let bang_true = TreeNode::unary(Tag::Bang, com(&["true"]), 0, Default::default());
    assert_eq!(exec.execute(&bang_true, ExecFlags::empty()).unwrap(), 1);

    let bang_false = TreeNode::unary(Tag::Bang, com(&["false"]), 0, Default::default());
    assert_eq!(exec.execute(&bang_false, ExecFlags::empty()).unwrap(), 0);
}

#[test]
fn if_then_runs_only_on_success() {
    let (mut exec, log) = executor_with_echo_log();
    let mut if_node = node(Tag::If);
    if_node.left = Some(Box::new(com(&["true"])));
    if_node.right = Some(Box::new(com(&["echo", "yes"])));
    assert_eq!(exec.execute(&if_node, ExecFlags::empty()).unwrap(), 0);
    assert_eq!(log.borrow().as_slice(), ["yes"]);

    log.borrow_mut().clear();
    let mut if_false = node(Tag::If);
    if_false.left = Some(Box::new(com(&["false"])));
    if_false.right = Some(Box::new(com(&["echo", "yes"])));
    assert_eq!(exec.execute(&if_false, ExecFlags::empty()).unwrap(), 0);
    assert!(log.borrow().is_empty());
}

/// §4.4 `TIF`: "status 0 of condition runs `then`, else `else`" —
/// `if false; then a; else b; fi` must run `b`.
#[test]
fn if_false_runs_else_branch() {
    let (mut exec, log) = executor_with_echo_log();
    let if_node = TreeNode::if_node(Tag::If, com(&["false"]), com(&["echo", "then"]), Some(com(&["echo", "else"])), 0, Default::default());
    assert_eq!(exec.execute(&if_node, ExecFlags::empty()).unwrap(), 0);
    assert_eq!(log.borrow().as_slice(), ["else"]);
}

/// An `elif` chain: the first false condition falls to the next `Elif`
/// node hanging off `else_branch`; the matching arm's `then` runs and
/// the final `else` is skipped.
#[test]
fn elif_chain_runs_the_first_matching_arm() {
    let (mut exec, log) = executor_with_echo_log();
    let final_else = com(&["echo", "else"]);
    let elif = TreeNode::if_node(Tag::Elif, com(&["true"]), com(&["echo", "elif"]), Some(final_else), 0, Default::default());
    let if_node = TreeNode::if_node(Tag::If, com(&["false"]), com(&["echo", "then"]), Some(elif), 0, Default::default());
    assert_eq!(exec.execute(&if_node, ExecFlags::empty()).unwrap(), 0);
    assert_eq!(log.borrow().as_slice(), ["elif"]);
}

/// §8 scenario 6: `case abc in a*) echo one;& b*) echo two;; esac` must
/// print both arms — `;&` falls through unconditionally even though `b*`
/// does not match the scrutinee.
#[test]
fn case_break_fallthrough_is_unconditional() {
    let (mut exec, log) = executor_with_echo_log();

    let mut arm2 = node(Tag::Pat);
    arm2.args = vec![word("b*")];
    arm2.left = Some(Box::new(com(&["echo", "two"])));
    arm2.case_terminator = Some(CaseTerminator::Break);

    let mut arm1 = node(Tag::Pat);
    arm1.args = vec![word("a*")];
    arm1.left = Some(Box::new(com(&["echo", "one"])));
    arm1.case_terminator = Some(CaseTerminator::BreakFt);
    arm1.right = Some(Box::new(arm2));

    let mut case_node = node(Tag::Case);
    case_node.str = Some("abc".to_string());
    case_node.left = Some(Box::new(arm1));

    assert_eq!(exec.execute(&case_node, ExecFlags::empty()).unwrap(), 0);
    assert_eq!(log.borrow().as_slice(), ["one", "two"]);
}

/// `;|` (`BreakEv`) re-tests the next pattern instead of forcing it: here
/// the second arm's pattern does not match, so only the first arm's body
/// runs.
#[test]
fn case_break_ev_still_tests_next_pattern() {
    let (mut exec, log) = executor_with_echo_log();

    let mut arm2 = node(Tag::Pat);
    arm2.args = vec![word("zzz*")];
    arm2.left = Some(Box::new(com(&["echo", "two"])));
    arm2.case_terminator = Some(CaseTerminator::Break);

    let mut arm1 = node(Tag::Pat);
    arm1.args = vec![word("a*")];
    arm1.left = Some(Box::new(com(&["echo", "one"])));
    arm1.case_terminator = Some(CaseTerminator::BreakEv);
    arm1.right = Some(Box::new(arm2));

    let mut case_node = node(Tag::Case);
    case_node.str = Some("abc".to_string());
    case_node.left = Some(Box::new(arm1));

    assert_eq!(exec.execute(&case_node, ExecFlags::empty()).unwrap(), 0);
    assert_eq!(log.borrow().as_slice(), ["one"]);
}

#[test]
fn while_loop_does_not_enter_body_on_false_condition() {
    let (mut exec, log) = executor_with_echo_log();
    let mut while_node = node(Tag::While);
    while_node.left = Some(Box::new(com(&["false"])));
    while_node.right = Some(Box::new(com(&["echo", "unreached"])));
    assert_eq!(exec.execute(&while_node, ExecFlags::empty()).unwrap(), 0);
    assert!(log.borrow().is_empty());
}

/// `until`'s condition is inverted: the body runs while the condition is
/// *false*, so `until false; ...; done` would loop forever — use `true`
/// here to assert it exits immediately instead.
#[test]
fn until_loop_does_not_enter_body_on_true_condition() {
    let (mut exec, log) = executor_with_echo_log();
    let mut until_node = node(Tag::Until);
    until_node.left = Some(Box::new(com(&["true"])));
    until_node.right = Some(Box::new(com(&["echo", "unreached"])));
    assert_eq!(exec.execute(&until_node, ExecFlags::empty()).unwrap(), 0);
    assert!(log.borrow().is_empty());
}

#[test]
fn for_loop_iterates_list_and_binds_variable() {
    let (mut exec, log) = executor_with_echo_log();
    let mut for_node = node(Tag::For);
    for_node.str = Some("i".to_string());
    for_node.args = vec![word("1 2 3")];
    for_node.left = Some(Box::new(com(&["echo", "i"])));

    assert_eq!(exec.execute(&for_node, ExecFlags::empty()).unwrap(), 0);
    assert_eq!(log.borrow().as_slice(), ["i", "i", "i"]);
    assert_eq!(exec.shell.symtab.lookup("i").and_then(Value::as_scalar), Some("3"));
}

/// §8 "errexit scope": a non-zero status propagates as an `Unwind(Error)`
/// once `errexit` is on, but never while `in_eval` is set.
#[test]
fn errexit_unwinds_outside_eval_but_not_inside() {
    let (mut exec, log) = executor_with_echo_log();
    exec.shell.options.errexit = true;

    let list = TreeNode::binary(Tag::List, com(&["false"]), com(&["echo", "unreached"]), 0, Default::default());
    match exec.execute(&list, ExecFlags::empty()) {
        Err(Flow::Unwind(u)) => assert_eq!(u.class, UnwindClass::Error),
        other => panic!("expected an Error unwind, got {other:?}"),
    }
    assert!(log.borrow().is_empty());

    exec.in_eval = true;
    let list2 = TreeNode::binary(Tag::List, com(&["false"]), com(&["echo", "reached"]), 0, Default::default());
    let status = exec.execute(&list2, ExecFlags::empty()).unwrap();
    assert_eq!(status, 0);
    assert_eq!(log.borrow().as_slice(), ["reached"]);
}

#[test]
fn funct_defines_and_calls_function() {
    let (mut exec, log) = executor_with_echo_log();
    let mut funct = node(Tag::Funct);
    funct.str = Some("greet".to_string());
    funct.left = Some(Box::new(com(&["echo", "hi"])));

    assert_eq!(exec.execute(&funct, ExecFlags::empty()).unwrap(), 0);
    assert!(exec.shell.functions.get("greet").is_some());

    let call = com(&["greet"]);
    assert_eq!(exec.execute(&call, ExecFlags::empty()).unwrap(), 0);
    assert_eq!(log.borrow().as_slice(), ["hi"]);
}

#[test]
fn call_function_binds_positional_parameters() {
    let (mut exec, _log) = executor_with_echo_log();
    let mut funct = node(Tag::Funct);
    funct.str = Some("f".to_string());
    funct.left = Some(Box::new(com(&["echo", "body"])));
    exec.execute(&funct, ExecFlags::empty()).unwrap();

    let call = com(&["f", "hello", "world"]);
    assert_eq!(exec.execute(&call, ExecFlags::empty()).unwrap(), 0);
    assert_eq!(exec.shell.symtab.lookup("1"), Some(&Value::Scalar("hello".to_string())));
    assert_eq!(exec.shell.symtab.lookup("2"), Some(&Value::Scalar("world".to_string())));
    assert_eq!(exec.shell.symtab.lookup("#"), Some(&Value::Scalar("2".to_string())));
}

/// Registers `exec`/`command`/`builtin` as pre-word builtins on top of the
/// shared `echo`/`true`/`false` fixture, the way an embedding shell's real
/// registry would (§4.4 "Shell builtin").
fn executor_with_preword_builtins() -> (TestExecutor, Rc<RefCell<Vec<String>>>) {
    let (mut exec, log) = executor_with_echo_log();
    exec.shell.builtins.insert("exec", BuiltinEntry::new(BuiltinFlags::PREWORD, |_| 0));
    exec.shell.builtins.insert("command", BuiltinEntry::new(BuiltinFlags::PREWORD, |_| 0));
    exec.shell.builtins.insert("builtin", BuiltinEntry::new(BuiltinFlags::PREWORD, |_| 0));
    (exec, log)
}

#[test]
fn exec_preword_sets_xexec_and_consumes_the_word() {
    let (mut exec, log) = executor_with_preword_builtins();
    let call = com(&["exec", "echo", "hi"]);
    assert_eq!(exec.execute(&call, ExecFlags::empty()).unwrap(), 0);
    assert_eq!(log.borrow().as_slice(), ["hi"]);
}

#[test]
fn command_preword_skips_function_lookup() {
    // `greet` is a defined function and not in `$PATH` (unset in the fake
    // symtab), so `command greet` must miss rather than run the function
    // body, and comes back 127 (not found) instead of logging anything.
    let (mut exec, log) = executor_with_preword_builtins();
    let mut funct = node(Tag::Funct);
    funct.str = Some("greet".to_string());
    funct.left = Some(Box::new(com(&["echo", "shadowed"])));
    exec.execute(&funct, ExecFlags::empty()).unwrap();

    let call = com(&["command", "greet"]);
    assert_eq!(exec.execute(&call, ExecFlags::empty()).unwrap(), 127);
    assert!(log.borrow().is_empty());
}

#[test]
fn builtin_preword_rejects_a_non_builtin_name() {
    let (mut exec, _log) = executor_with_preword_builtins();
    let call = com(&["builtin", "not-a-builtin"]);
    let err = exec.execute(&call, ExecFlags::empty()).unwrap_err();
    assert!(matches!(err, Flow::Err(ShellError::NotFound(_))));
}
