//! The tree executor (§4.4): walks a [`TreeNode`] produced by the
//! (out-of-scope) parser, threading a single [`Shell`] context and an
//! [`EnvStack`] rather than any module-level state.

#![cfg_attr(test, allow(clippy::panic, clippy::unwrap_used, clippy::expect_used))]

pub mod envstack;
pub mod flags;
pub mod limits;
pub mod pathcache;
pub mod redir;
pub mod script_fallback;

pub use envstack::{EnvFrame, EnvKind, EnvStack, SavedState};
pub use flags::ExecFlags;
pub use limits::ExecLimits;
pub use pathcache::PathCache;

use nsh_ast::{CaseTerminator, Tag, TreeNode};
use nsh_env::builtins::BuiltinFlags;
use nsh_env::expansion::ExpandFlags;
use nsh_env::function::Resolution;
use nsh_env::symtab::{TypeFlags, Value};
use nsh_env::{BuiltinRegistry, DBracketEval, Expansion, GlobMatcher, ProcessPrimitives, Shell, SourceParser, SymbolTable};
use nsh_error::{Flow, FlowResult, RedirAction, ShellError, Unwind, UnwindClass};
use tracing::{trace, warn};

/// A checkpoint the executor calls out to so traps queued during signal
/// delivery can run "at well-defined checkpoints" (§5) without `nsh-exec`
/// owning a signal-disposition table itself — that bookkeeping belongs to
/// whatever embeds this crate (an interactive REPL, a batch runner).
pub trait TrapHooks {
    /// Step 2 of §4.4's general protocol: "push an `EXEC` environment
    /// frame; run any pending traps."
    fn run_pending(&mut self) {}
    /// §4.4 "after execution... run the `ERR` trap."
    fn run_err_trap(&mut self, _status: i32) {}
}

/// A hook implementation that does nothing — the default for an embedder
/// that hasn't wired up trap delivery yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTraps;
impl TrapHooks for NoTraps {}

/// The tree executor (§4.4), generic over the same collaborator set as
/// [`Shell`] plus a [`TrapHooks`] implementation.
pub struct Executor<E, B, S, G, P, D, R, T = NoTraps>
where
    E: Expansion,
    B: BuiltinRegistry,
    S: SymbolTable,
    G: GlobMatcher,
    P: ProcessPrimitives,
    D: DBracketEval,
    R: SourceParser,
    T: TrapHooks,
{
    pub shell: Shell<E, B, S, G, P, D, R>,
    pub env: EnvStack,
    pub path_cache: PathCache,
    pub limits: ExecLimits,
    pub traps: T,
    /// Suppresses the `eval`-scope carve-out in §4.4's final errexit check
    /// ("if... we are not inside `eval`"); an embedder's `eval` builtin
    /// should flip this for the duration of its own nested `execute` call.
    pub in_eval: bool,
}

impl<E, B, S, G, P, D, R> Executor<E, B, S, G, P, D, R, NoTraps>
where
    E: Expansion,
    B: BuiltinRegistry,
    S: SymbolTable,
    G: GlobMatcher,
    P: ProcessPrimitives,
    D: DBracketEval,
    R: SourceParser,
{
    pub fn new(shell: Shell<E, B, S, G, P, D, R>, limits: ExecLimits) -> Self {
        Self { shell, env: EnvStack::new(limits.max_env_depth), path_cache: PathCache::new(), limits, traps: NoTraps, in_eval: false }
    }
}

impl<E, B, S, G, P, D, R, T> Executor<E, B, S, G, P, D, R, T>
where
    E: Expansion,
    B: BuiltinRegistry,
    S: SymbolTable,
    G: GlobMatcher,
    P: ProcessPrimitives,
    D: DBracketEval,
    R: SourceParser,
    T: TrapHooks,
{
    pub fn with_traps(shell: Shell<E, B, S, G, P, D, R>, limits: ExecLimits, traps: T) -> Self {
        Self { shell, env: EnvStack::new(limits.max_env_depth), path_cache: PathCache::new(), limits, traps, in_eval: false }
    }

    /// `execute(tree, flags) -> int` (§4.4). The top-level entry point.
    pub fn execute(&mut self, tree: &TreeNode, flags: ExecFlags) -> FlowResult<i32> {
        if flags.contains(ExecFlags::XFORK) && tree.tag != Tag::Pipe {
            return self.fork_and_execute(tree, flags - ExecFlags::XFORK);
        }

        self.env.push(EnvKind::Exec)?;
        self.traps.run_pending();

        let outcome = self.dispatch(tree, flags);
        self.env.pop_and_restore(&self.shell.process);

        let status = match outcome {
            Ok(status) => status,
            Err(Flow::Unwind(u)) => return Err(Flow::Unwind(u)),
            Err(err) => return Err(err),
        };

        if status != 0 && !flags.contains(ExecFlags::XERROK) {
            self.traps.run_err_trap(status);
            if self.shell.options.errexit && !self.in_eval {
                return Err(Flow::unwind(UnwindClass::Error, status));
            }
        }

        if flags.contains(ExecFlags::XEXEC) {
            return Err(Flow::unwind(UnwindClass::Exit, status));
        }
        Ok(status)
    }

    /// §4.4 step 1: "fork and recurse in the child... return the child's
    /// status." The child's own `execute` call translates any escaping
    /// `Flow::Unwind(Exit|Leave)` into a real `_exit`, since by
    /// construction a forked child never returns past this point.
    fn fork_and_execute(&mut self, tree: &TreeNode, flags: ExecFlags) -> FlowResult<i32> {
        self.fork_and_execute_piped(tree, flags, None, None)
    }

    /// Same as [`Self::fork_and_execute`], but additionally dups
    /// `read_end`/`write_end` onto the child's fd 0/1 before it runs its
    /// segment (§4.4 `TPIPE`: "dup child's stdout to the write end"/"dup
    /// the read end to the next child's stdin"). The caller retains its
    /// own copies of `read_end`/`write_end` and is responsible for closing
    /// them once this returns.
    fn fork_and_execute_piped(
        &mut self,
        tree: &TreeNode,
        flags: ExecFlags,
        read_end: Option<std::os::unix::io::RawFd>,
        write_end: Option<std::os::unix::io::RawFd>,
    ) -> FlowResult<i32> {
        // SAFETY: the shell is single-threaded end to end (§5); the child
        // branch below only calls further `execute`/primitive-trait calls
        // before its terminal exit, never arbitrary post-fork code.
        match unsafe { self.shell.process.fork() } {
            Ok(nix::unistd::ForkResult::Child) => {
                if let Some(fd) = read_end {
                    let _ = self.shell.process.dup2(fd, 0);
                    let _ = self.shell.process.close(fd);
                }
                if let Some(fd) = write_end {
                    let _ = self.shell.process.dup2(fd, 1);
                    let _ = self.shell.process.close(fd);
                }
                let status = match self.execute(tree, flags) {
                    Ok(status) => status,
                    Err(Flow::Unwind(Unwind { status, .. })) => status,
                    Err(Flow::Err(err)) => {
                        warn!(%err, "error escaped forked child");
                        1
                    }
                };
                std::process::exit(status & 0xFF);
            }
            Ok(nix::unistd::ForkResult::Parent { child }) => match self.shell.process.waitpid(child) {
                Ok(nix::sys::wait::WaitStatus::Exited(_, code)) => Ok(code),
                Ok(nix::sys::wait::WaitStatus::Signaled(_, signal, _)) => Ok(128 + signal as i32),
                Ok(_) => Ok(0),
                Err(e) => Err(ShellError::Internal(format!("waitpid: {e}")).into()),
            },
            Err(e) => Err(ShellError::Internal(format!("fork: {e}")).into()),
        }
    }

    fn dispatch(&mut self, tree: &TreeNode, flags: ExecFlags) -> FlowResult<i32> {
        match tree.tag {
            Tag::Com => self.exec_com(tree, flags),
            Tag::Paren => {
                let child = tree.left.as_deref().ok_or_else(|| malformed("Paren node always has a body"))?;
                self.execute(child, flags | ExecFlags::XFORK)
            }
            Tag::Pipe => self.exec_pipe(tree, flags),
            Tag::List => self.exec_list(tree, flags),
            Tag::Or => self.exec_or(tree, flags),
            Tag::And => self.exec_and(tree, flags),
            Tag::Bang => self.exec_bang(tree, flags),
            Tag::For => self.exec_for(tree, flags),
            Tag::Select => self.exec_select(tree, flags),
            Tag::While => self.exec_while(tree, flags, true),
            Tag::Until => self.exec_while(tree, flags, false),
            Tag::If | Tag::Elif => self.exec_if(tree, flags),
            Tag::Case => self.exec_case(tree, flags),
            Tag::Brace => {
                let child = tree.left.as_deref().ok_or_else(|| malformed("Brace node always has a body"))?;
                self.execute(child, flags)
            }
            Tag::Funct => self.exec_funct(tree),
            Tag::Time => self.exec_time(tree, flags),
            Tag::DBracket => self.exec_dbracket(tree),
            Tag::Coproc => self.exec_coproc(tree, flags),
            Tag::Async => {
                let child = tree.left.as_deref().ok_or_else(|| malformed("Async node always has a body"))?;
                self.execute(child, flags | ExecFlags::XBGND | ExecFlags::XFORK)
            }
            Tag::Exec => self.exec_texec(tree, flags),
        }
    }

    // ---- TCOM -----------------------------------------------------

    fn exec_com(&mut self, tree: &TreeNode, flags: ExecFlags) -> FlowResult<i32> {
        if let Some(status) = self.try_heredoc_assignment_rewrite(tree)? {
            return Ok(status);
        }

        let argv = self.expand_argv(tree)?;

        if argv.is_empty() {
            self.bind_assignments(tree, true)?;
            return self.apply_redirections(tree);
        }

        let (argv, flags, keepasn_ok, skip_functions) = self.resolve_preword_builtins(argv, flags)?;

        if argv.is_empty() {
            self.bind_assignments(tree, true)?;
            return self.apply_redirections(tree);
        }

        let keeps_assignments = keepasn_ok
            && self
                .shell
                .builtins
                .lookup(&argv[0])
                .is_some_and(|e| e.flags.contains(BuiltinFlags::SPEC_BI) || e.flags.contains(BuiltinFlags::KEEPASN));
        self.bind_assignments(tree, keeps_assignments)?;

        if self.shell.options.xtrace {
            trace!(argv = ?argv, "xtrace");
        }

        let redir_status = self.apply_redirections(tree)?;
        if redir_status != 0 {
            return Ok(redir_status);
        }

        let (name, args) = (argv[0].clone(), &argv[1..]);

        if self.shell.builtins.lookup(&name).is_some() {
            return Ok(self.shell.builtins.call(&name, args).unwrap_or(0));
        }

        if !skip_functions && self.shell.functions.get(&name).is_some() {
            return self.call_function(&name, args, flags);
        }

        self.call_external(&name, args, flags)
    }

    /// Resolves the command-like pre-word builtins (`builtin`, `exec`,
    /// `command`, `trap`) in a loop before the real callee lookup, the way
    /// `exec_com`'s source counterpart re-runs `findcom` with reduced flags
    /// each time it peels one off (§4.4 "Shell builtin"). Returns the
    /// remaining argv, the (possibly `XEXEC`-augmented) flags, whether a
    /// still-pending assignment block should keep POSIX special-builtin
    /// persistence (`command` always loses it), and whether function lookup
    /// should be skipped for the remaining word (`builtin`/`command` both
    /// force a builtin-or-external search).
    fn resolve_preword_builtins(
        &mut self,
        mut argv: Vec<String>,
        mut flags: ExecFlags,
    ) -> FlowResult<(Vec<String>, ExecFlags, bool, bool)> {
        let mut keepasn_ok = true;
        let mut skip_functions = false;

        loop {
            let Some(head) = argv.first().cloned() else { break };
            let is_preword = self.shell.builtins.lookup(&head).is_some_and(|e| e.flags.contains(BuiltinFlags::PREWORD));
            if !is_preword {
                break;
            }

            match head.as_str() {
                "builtin" => {
                    argv.remove(0);
                    if argv.first().map(String::as_str) == Some("--") {
                        argv.remove(0);
                    }
                    skip_functions = true;
                    if argv.is_empty() {
                        break;
                    }
                    if self.shell.builtins.lookup(&argv[0]).is_none() {
                        return Err(ShellError::NotFound(format!("{}: not a builtin", argv[0])).into());
                    }
                    break;
                }
                "exec" => {
                    if argv.len() == 1 {
                        break;
                    }
                    argv.remove(0);
                    flags |= ExecFlags::XEXEC;
                }
                "command" => {
                    argv.remove(0);
                    skip_functions = true;
                    keepasn_ok = false;
                    let mut saw_p = false;
                    while argv.first().map(String::as_str) == Some("-p") {
                        saw_p = true;
                        argv.remove(0);
                    }
                    if saw_p && self.shell.options.restricted {
                        return Err(ShellError::RestrictedViolation("command -p".to_string()).into());
                    }
                    if matches!(argv.first().map(String::as_str), Some("-v") | Some("-V")) {
                        break;
                    }
                    if argv.is_empty() {
                        break;
                    }
                }
                // `trap` is a pre-word candidate only so it can land here
                // unconsumed and fall through to ordinary builtin dispatch.
                _ => break,
            }
        }

        Ok((argv, flags, keepasn_ok, skip_functions))
    }

    /// "`VAR=<<EOF` binds expanded heredoc content to `VAR`" (§4.4 step 3).
    fn try_heredoc_assignment_rewrite(&mut self, tree: &TreeNode) -> FlowResult<Option<i32>> {
        if !(tree.args.is_empty() && tree.vars.len() == 1 && tree.ioact.len() == 1 && tree.ioact[0].is_here()) {
            return Ok(None);
        }
        let assign = self.shell.expansion.expand_one(&tree.vars[0], ExpandFlags::ONEWORD)?;
        let Some((name, _)) = assign.split_once('=') else { return Ok(None) };
        let body = tree.ioact[0].heredoc.as_deref().unwrap_or(&[]);
        let value = String::from_utf8_lossy(body).into_owned();
        self.shell
            .symtab
            .set(name, Value::Scalar(value), TypeFlags::empty())
            .map_err(|msg| ShellError::Builtin { name: name.to_string(), message: msg })?;
        Ok(Some(0))
    }

    fn expand_argv(&mut self, tree: &TreeNode) -> FlowResult<Vec<String>> {
        let mut argv = Vec::with_capacity(tree.args.len());
        for word in &tree.args {
            let flags = ExpandFlags::DOBLANK | ExpandFlags::DOGLOB | ExpandFlags::DOTILDE;
            argv.extend(self.shell.expansion.expand(word, flags)?);
        }
        Ok(argv)
    }

    /// §4.4 "Assignment handling": binds leading `VAR=value` words. POSIX
    /// functions additionally export caller-scope assignments, which the
    /// function-call path handles by re-invoking with `export = true`.
    fn bind_assignments(&mut self, tree: &TreeNode, keep: bool) -> FlowResult<()> {
        if tree.vars.is_empty() {
            return Ok(());
        }
        let flags = if keep { TypeFlags::empty() } else { TypeFlags::LOCAL };
        for word in &tree.vars {
            let assigned = self.shell.expansion.expand_one(word, ExpandFlags::DOASNTILDE | ExpandFlags::ONEWORD)?;
            let Some((name, value)) = assigned.split_once('=') else { continue };
            self.shell
                .symtab
                .set(name, Value::Scalar(value.to_string()), flags)
                .map_err(|msg| ShellError::Builtin { name: name.to_string(), message: msg })?;
        }
        Ok(())
    }

    /// §4.4 step 4: "If any redirection fails, status ← 1... special
    /// builtins additionally unwind to the enclosing error handler." A
    /// redirection failure on an ordinary command collapses to exit status
    /// `1`; only a special builtin's failure (or an in-flight unwind)
    /// propagates as a `Flow` to the caller.
    fn apply_redirections(&mut self, tree: &TreeNode) -> FlowResult<i32> {
        for iow in &tree.ioact {
            let opts = redir::RedirOptions { noclobber: self.shell.options.noclobber, restricted: self.shell.options.restricted };
            if let Err(flow) = redir::setup(iow, &mut self.shell.expansion, &mut self.env, &self.shell.process, &mut self.shell.coproc, opts) {
                if self.is_special_builtin_com(tree) || matches!(flow, Flow::Unwind(_)) {
                    return Err(flow);
                }
                return Ok(1);
            }
        }
        Ok(0)
    }

    fn is_special_builtin_com(&self, tree: &TreeNode) -> bool {
        tree.args
            .first()
            .and_then(|w| w.as_plain_identifier())
            .is_some_and(|name| self.shell.builtins.lookup(&name).is_some_and(|e| e.is_special()))
    }

    fn call_function(&mut self, name: &str, args: &[String], flags: ExecFlags) -> FlowResult<i32> {
        let Some(entry) = self.shell.functions.get(name) else {
            return Err(ShellError::NotFound(name.to_string()).into());
        };
        let Some(body) = entry.body.clone() else {
            return Err(ShellError::FunctionLoadError(name.to_string()).into());
        };
        let ksh_func = entry.flags.contains(nsh_env::function::FunctionFlags::KSH);

        let saved_kshname = self.shell.kshname.clone();
        if ksh_func {
            self.shell.kshname = name.to_string();
        }
        self.shell.functions.mark_in_use(name);
        self.shell.symtab.push_scope();
        self.env.push(EnvKind::Func)?;

        for (i, arg) in args.iter().enumerate() {
            self.shell
                .symtab
                .set(&(i + 1).to_string(), Value::Scalar(arg.clone()), TypeFlags::LOCAL)
                .map_err(|msg| ShellError::Builtin { name: name.to_string(), message: msg })?;
        }
        self.shell
            .symtab
            .set("#", Value::Scalar(args.len().to_string()), TypeFlags::LOCAL)
            .map_err(|msg| ShellError::Builtin { name: name.to_string(), message: msg })?;

        let result = self.execute(&body, flags - ExecFlags::XEXEC);

        self.env.pop_and_restore(&self.shell.process);
        self.shell.symtab.pop_scope();
        self.shell.functions.clear_in_use(name);
        self.shell.kshname = saved_kshname;

        match result {
            Ok(status) => Ok(status),
            Err(Flow::Unwind(Unwind { class: UnwindClass::Return | UnwindClass::Error, status })) => Ok(status & 0xFF),
            other => other,
        }
    }

    fn resolve_function_if_needed(&mut self, name: &str) -> FlowResult<Resolution> {
        if self.shell.functions.get(name).is_some() {
            return Ok(Resolution::NotFound);
        }
        let fpath = match self.shell.symtab.lookup("FPATH") {
            Some(Value::Scalar(s)) => s.split(':').map(str::to_string).collect::<Vec<_>>(),
            _ => Vec::new(),
        };
        Ok(self.shell.functions.load_from_fpath(name, &fpath, std::fs::read_to_string))
    }

    fn call_external(&mut self, name: &str, args: &[String], flags: ExecFlags) -> FlowResult<i32> {
        match self.resolve_function_if_needed(name)? {
            Resolution::Found(source) => {
                let body = self.shell.parser.parse(&source)?;
                self.shell.functions.define(name, body, false);
                return self.call_function(name, args, flags);
            }
            Resolution::LoadError(msg) => {
                warn!(%name, %msg, "function load error");
                return Ok(126);
            }
            Resolution::NotFound => {}
        }

        let path_dirs = match self.shell.symtab.lookup("PATH") {
            Some(Value::Scalar(s)) => s.split(':').map(str::to_string).collect::<Vec<_>>(),
            _ => Vec::new(),
        };
        let process = &self.shell.process;
        let Some(resolved) = self.path_cache.resolve(name, &path_dirs, |p| process.access_executable(p)) else {
            warn!(%name, "command not found");
            return Ok(127);
        };
        self.shell.last_resolved_path = resolved.to_str().map(str::to_string);

        if !process.access_executable(resolved.to_str().unwrap_or_default()) {
            warn!(%name, "not executable");
            return Ok(126);
        }

        let mut node = TreeNode::new(Tag::Exec, tree_line(), Default::default());
        node.str = resolved.to_str().map(str::to_string);
        node.args = std::iter::once(name.to_string()).chain(args.iter().cloned()).map(plain_word).collect();
        self.execute(&node, flags | ExecFlags::XFORK | ExecFlags::XEXEC)
    }

    // ---- TPIPE ------------------------------------------------------

    fn exec_pipe(&mut self, tree: &TreeNode, flags: ExecFlags) -> FlowResult<i32> {
        let mut segments = Vec::new();
        let mut cursor = tree;
        loop {
            match cursor.tag {
                Tag::Pipe => {
                    segments.push(cursor.left.as_deref().ok_or_else(|| malformed("pipe segment"))?);
                    cursor = cursor.right.as_deref().ok_or_else(|| malformed("pipe continuation"))?;
                }
                _ => {
                    segments.push(cursor);
                    break;
                }
            }
        }
        if segments.len() > self.limits.max_pipeline_segments {
            return Err(ShellError::Internal(format!(
                "pipeline exceeded its configured segment limit ({})",
                self.limits.max_pipeline_segments
            ))
            .into());
        }

        let mut statuses = Vec::with_capacity(segments.len());
        let mut prev_read: Option<std::os::unix::io::RawFd> = None;
        let last = segments.len() - 1;

        for (i, segment) in segments.iter().enumerate() {
            let mut seg_flags = flags | ExecFlags::XPIPEST;
            if i > 0 {
                seg_flags |= ExecFlags::XPIPEI;
            }
            let is_last = i == last;
            let pipe_fds = if !is_last {
                let (read_end, write_end) = self.shell.process.pipe().map_err(|e| ShellError::Internal(format!("pipe: {e}")))?;
                seg_flags |= ExecFlags::XPIPEO;
                Some((read_end, write_end))
            } else {
                None
            };
            let write_end = pipe_fds.map(|(_, write_end)| write_end);

            let status = if is_last && !flags.contains(ExecFlags::XBGND) {
                // The last segment runs in this process (§4.4 "the last
                // segment runs in the current process"): dup its stdin from
                // the prior pipe's read end through the live `EnvStack`
                // frame so `pop_and_restore` puts fd 0 back afterwards
                // (§8 "Redirection restore").
                self.env.push(EnvKind::Exec)?;
                if let Some(fd) = prev_read {
                    self.env.save_once(0, &self.shell.process);
                    let _ = self.shell.process.dup2(fd, 0);
                    let _ = self.shell.process.close(fd);
                }
                let result = self.execute(segment, seg_flags);
                self.env.pop_and_restore(&self.shell.process);
                result?
            } else {
                let status = self.fork_and_execute_piped(segment, seg_flags, prev_read, write_end)?;
                if let Some(fd) = prev_read {
                    let _ = self.shell.process.close(fd);
                }
                if let Some(fd) = write_end {
                    let _ = self.shell.process.close(fd);
                }
                status
            };

            prev_read = pipe_fds.map(|(read_end, _)| read_end);
            statuses.push(status);
        }

        self.shell.set_pipestatus(statuses);
        Ok(self.shell.last_status)
    }

    // ---- sequencing ---------------------------------------------------

    fn exec_list(&mut self, tree: &TreeNode, flags: ExecFlags) -> FlowResult<i32> {
        let left = tree.left.as_deref().ok_or_else(|| malformed("List always has left"))?;
        let left_flags = if tree.background { flags | ExecFlags::XBGND | ExecFlags::XFORK } else { flags };
        self.execute(left, left_flags)?;
        match &tree.right {
            Some(right) => self.execute(right, flags),
            None => Ok(self.shell.last_status),
        }
    }

    fn exec_or(&mut self, tree: &TreeNode, flags: ExecFlags) -> FlowResult<i32> {
        let left = tree.left.as_deref().ok_or_else(|| malformed("Or always has left"))?;
        let left_status = self.execute(left, flags | ExecFlags::XERROK)?;
        if left_status == 0 {
            return Ok(left_status);
        }
        let right = tree.right.as_deref().ok_or_else(|| malformed("Or always has right"))?;
        self.execute(right, flags)
    }

    fn exec_and(&mut self, tree: &TreeNode, flags: ExecFlags) -> FlowResult<i32> {
        let left = tree.left.as_deref().ok_or_else(|| malformed("And always has left"))?;
        let left_status = self.execute(left, flags | ExecFlags::XERROK)?;
        if left_status != 0 {
            return Ok(left_status);
        }
        let right = tree.right.as_deref().ok_or_else(|| malformed("And always has right"))?;
        self.execute(right, flags)
    }

    fn exec_bang(&mut self, tree: &TreeNode, flags: ExecFlags) -> FlowResult<i32> {
        let child = tree.left.as_deref().ok_or_else(|| malformed("Bang always has a body"))?;
        let status = self.execute(child, flags | ExecFlags::XERROK)?;
        Ok(if status == 0 { 1 } else { 0 })
    }

    // ---- loops ----------------------------------------------------

    fn exec_for(&mut self, tree: &TreeNode, flags: ExecFlags) -> FlowResult<i32> {
        let name = tree.str.as_deref().unwrap_or_default();
        let items = self.expand_loop_items(tree)?;
        let body = tree.left.as_deref().ok_or_else(|| malformed("For always has a body"))?;
        self.env.push(EnvKind::Loop)?;
        let mut status = 0;
        for item in items {
            self.shell
                .symtab
                .set(name, Value::Scalar(item), TypeFlags::empty())
                .map_err(|msg| ShellError::Builtin { name: name.to_string(), message: msg })?;
            match self.execute(body, flags) {
                Ok(s) => status = s,
                Err(Flow::Unwind(Unwind { class: UnwindClass::Break, status: s })) => {
                    status = s;
                    break;
                }
                Err(Flow::Unwind(Unwind { class: UnwindClass::Continue, status: s })) => {
                    status = s;
                    continue;
                }
                Err(other) => {
                    self.env.pop_and_restore(&self.shell.process);
                    return Err(other);
                }
            }
        }
        self.env.pop_and_restore(&self.shell.process);
        Ok(status)
    }

    fn expand_loop_items(&mut self, tree: &TreeNode) -> FlowResult<Vec<String>> {
        let mut items = Vec::new();
        for word in &tree.args {
            items.extend(self.shell.expansion.expand(word, ExpandFlags::DOBLANK | ExpandFlags::DOGLOB | ExpandFlags::DOTILDE)?);
        }
        Ok(items)
    }

    /// `TSELECT`: reduced to the non-interactive core — menu printing and
    /// `read -r REPLY` both ultimately go through the builtin registry
    /// (§4.4 "read via the `read -r REPLY` builtin"), so the loop only
    /// drives that call and the numeric-reply mapping.
    fn exec_select(&mut self, tree: &TreeNode, flags: ExecFlags) -> FlowResult<i32> {
        let name = tree.str.as_deref().unwrap_or_default();
        let items = self.expand_loop_items(tree)?;
        let body = tree.left.as_deref().ok_or_else(|| malformed("Select always has a body"))?;
        if items.is_empty() {
            return Ok(1);
        }
        self.env.push(EnvKind::Loop)?;
        let mut status = 0;
        loop {
            let Some(read_status) = self.shell.builtins.call("read", &["-r".to_string(), "REPLY".to_string()]) else {
                self.env.pop_and_restore(&self.shell.process);
                return Ok(1);
            };
            if read_status != 0 {
                self.env.pop_and_restore(&self.shell.process);
                return Ok(1);
            }
            let reply = self.shell.symtab.lookup("REPLY").and_then(Value::as_scalar).unwrap_or_default().to_string();
            let chosen = reply.trim().parse::<usize>().ok().filter(|n| *n >= 1 && *n <= items.len()).map(|n| items[n - 1].clone());
            self.shell
                .symtab
                .set(name, Value::Scalar(chosen.unwrap_or_default()), TypeFlags::empty())
                .map_err(|msg| ShellError::Builtin { name: name.to_string(), message: msg })?;
            match self.execute(body, flags) {
                Ok(s) => status = s,
                Err(Flow::Unwind(Unwind { class: UnwindClass::Break, status: s })) => {
                    status = s;
                    break;
                }
                Err(Flow::Unwind(Unwind { class: UnwindClass::Continue, .. })) => continue,
                Err(other) => {
                    self.env.pop_and_restore(&self.shell.process);
                    return Err(other);
                }
            }
        }
        self.env.pop_and_restore(&self.shell.process);
        Ok(status)
    }

    fn exec_while(&mut self, tree: &TreeNode, flags: ExecFlags, until_false: bool) -> FlowResult<i32> {
        let cond = tree.left.as_deref().ok_or_else(|| malformed("While/Until always has a condition"))?;
        let body = tree.right.as_deref().ok_or_else(|| malformed("While/Until always has a body"))?;
        self.env.push(EnvKind::Loop)?;
        let mut status = 0;
        loop {
            let cond_status = match self.execute(cond, flags | ExecFlags::XERROK) {
                Ok(s) => s,
                Err(other) => {
                    self.env.pop_and_restore(&self.shell.process);
                    return Err(other);
                }
            };
            let keep_going = if until_false { cond_status == 0 } else { cond_status != 0 };
            if keep_going {
                break;
            }
            match self.execute(body, flags) {
                Ok(s) => status = s,
                Err(Flow::Unwind(Unwind { class: UnwindClass::Break, status: s })) => {
                    status = s;
                    break;
                }
                Err(Flow::Unwind(Unwind { class: UnwindClass::Continue, .. })) => continue,
                Err(other) => {
                    self.env.pop_and_restore(&self.shell.process);
                    return Err(other);
                }
            }
        }
        self.env.pop_and_restore(&self.shell.process);
        Ok(status)
    }

    // ---- conditionals ------------------------------------------------

    /// §4.4 `TIF`/`TELIF`: "status 0 of condition runs `then`, else
    /// `else`." An `elif` is a nested `Tag::Elif` node hanging off
    /// `else_branch`, so running it here recurses back into `exec_if`.
    fn exec_if(&mut self, tree: &TreeNode, flags: ExecFlags) -> FlowResult<i32> {
        let cond = tree.left.as_deref().ok_or_else(|| malformed("If/Elif always has a condition"))?;
        let cond_status = self.execute(cond, flags | ExecFlags::XERROK)?;
        if cond_status == 0 {
            let then_branch = tree.right.as_deref().ok_or_else(|| malformed("If/Elif always has a then branch"))?;
            return self.execute(then_branch, flags);
        }
        match &tree.else_branch {
            Some(else_branch) => self.execute(else_branch, flags),
            None => Ok(0),
        }
    }

    fn exec_case(&mut self, tree: &TreeNode, flags: ExecFlags) -> FlowResult<i32> {
        let scrutinee_word = tree.str.as_deref().unwrap_or_default();
        let mut scrutinee_w = nsh_token::Word::new();
        for b in scrutinee_word.bytes() {
            scrutinee_w.push_char(b);
        }
        scrutinee_w.finish();
        let scrutinee = self.shell.expansion.expand_one(&scrutinee_w, ExpandFlags::DOTILDE)?;

        let Some(first_arm) = tree.left.as_deref() else { return Ok(0) };
        let mut status = 0;
        let mut arm_iter = Some(first_arm);
        // `;&` falls through into the next arm's body unconditionally, without
        // re-testing its pattern; `;|` keeps matching subsequent patterns
        // against the same scrutinee (§4.4 `TCASE`, §8 scenario 6).
        let mut force_next = false;
        'arms: while let Some(arm) = arm_iter {
            let matched = if force_next {
                true
            } else {
                let mut m = false;
                for pattern in &arm.args {
                    let pat = self.shell.expansion.expand_one(pattern, ExpandFlags::DOTILDE | ExpandFlags::DOPAT)?;
                    if self.shell.glob.matches(&scrutinee, &pat) {
                        m = true;
                        break;
                    }
                }
                m
            };
            force_next = false;
            if matched {
                if let Some(body) = &arm.left {
                    status = self.execute(body, flags)?;
                }
                match arm.case_terminator {
                    Some(CaseTerminator::BreakFt) => {
                        force_next = true;
                        arm_iter = arm.right.as_deref();
                        continue 'arms;
                    }
                    Some(CaseTerminator::BreakEv) => {
                        arm_iter = arm.right.as_deref();
                        continue 'arms;
                    }
                    _ => break 'arms,
                }
            }
            arm_iter = arm.right.as_deref();
        }
        Ok(status)
    }

    // ---- misc node kinds -----------------------------------------

    fn exec_funct(&mut self, tree: &TreeNode) -> FlowResult<i32> {
        let name = tree.str.clone().unwrap_or_default();
        let body = tree.left.as_deref().ok_or_else(|| malformed("Funct always has a body"))?.clone();
        self.shell.functions.define(name, body, tree.ksh_func);
        Ok(0)
    }

    fn exec_time(&mut self, tree: &TreeNode, flags: ExecFlags) -> FlowResult<i32> {
        let child = tree.left.as_deref().ok_or_else(|| malformed("Time always has a body"))?;
        let start = std::time::Instant::now();
        let status = self.execute(child, flags - ExecFlags::XEXEC)?;
        trace!(elapsed = ?start.elapsed(), "time");
        Ok(status)
    }

    fn exec_dbracket(&mut self, tree: &TreeNode) -> FlowResult<i32> {
        let condition = tree.str.as_deref().unwrap_or_default();
        let truthy = self.shell.dbracket.eval(condition)?;
        Ok(if truthy { 0 } else { 1 })
    }

    fn exec_coproc(&mut self, tree: &TreeNode, flags: ExecFlags) -> FlowResult<i32> {
        if self.shell.coproc.is_live() {
            return Err(ShellError::CoprocExists.into());
        }
        let (read_end, write_end) = self.shell.process.pipe().map_err(|e| ShellError::Internal(format!("pipe: {e}")))?;
        let body = tree.left.as_deref().ok_or_else(|| malformed("Coproc always has a body"))?;
        let status = self.execute(body, flags | ExecFlags::XBGND | ExecFlags::XFORK | ExecFlags::XCOPROC | ExecFlags::XCCLOSE)?;
        self.shell.coproc.start(1, read_end, write_end);
        Ok(status)
    }

    fn exec_texec(&mut self, tree: &TreeNode, flags: ExecFlags) -> FlowResult<i32> {
        let path = tree.str.clone().unwrap_or_default();
        let argv: Vec<String> = tree.args.iter().filter_map(|w| w.as_plain_identifier()).collect();
        let path_c = std::ffi::CString::new(path.clone()).map_err(|_| ShellError::Internal("path contains an embedded NUL".into()))?;
        let argv_c: Vec<_> = argv.iter().filter_map(|a| std::ffi::CString::new(a.as_str()).ok()).collect();
        let envp_c: Vec<std::ffi::CString> = Vec::new();

        let errno = self.shell.process.exec(&path_c, &argv_c, &envp_c);
        if errno == nix::Error::ENOEXEC {
            return self.run_script_fallback(&path, &argv, flags);
        }
        Err(ShellError::Redir { action: RedirAction::Open, target: path, source: errno.into() }.into())
    }

    fn run_script_fallback(&mut self, path: &str, argv: &[String], flags: ExecFlags) -> FlowResult<i32> {
        let head = std::fs::read(path).unwrap_or_default();
        let head_slice = &head[..head.len().min(script_fallback::MAX_INTERP)];
        match script_fallback::classify(head_slice) {
            script_fallback::ScriptVerdict::RejectedBinary { .. } => Err(ShellError::NotExecutable(path.to_string()).into()),
            script_fallback::ScriptVerdict::Shebang { interpreter, arg } => {
                let mut new_argv = vec![interpreter.clone()];
                new_argv.extend(arg);
                new_argv.push(path.to_string());
                new_argv.extend(argv.iter().skip(1).cloned());
                let mut node = TreeNode::new(Tag::Exec, tree_line(), Default::default());
                node.str = Some(interpreter);
                node.args = new_argv.into_iter().map(plain_word).collect();
                self.execute(&node, flags)
            }
            script_fallback::ScriptVerdict::PlainScript => {
                let shell = std::env::var("EXECSHELL").unwrap_or_else(|_| "/bin/sh".to_string());
                let mut new_argv = vec![shell.clone(), path.to_string()];
                new_argv.extend(argv.iter().skip(1).cloned());
                let mut node = TreeNode::new(Tag::Exec, tree_line(), Default::default());
                node.str = Some(shell);
                node.args = new_argv.into_iter().map(plain_word).collect();
                self.execute(&node, flags)
            }
        }
    }
}

fn tree_line() -> u32 {
    0
}

/// A node reached `dispatch()` without the child its `Tag` requires — the
/// (out-of-scope) parser builds tree shapes, so this is a parser/embedder
/// bug rather than anything a shell script can trigger; report it as
/// `ShellError::Internal` instead of panicking (§7 "Internal").
fn malformed(what: &'static str) -> Flow {
    ShellError::Internal(format!("malformed tree: {what}")).into()
}

fn plain_word(s: String) -> nsh_token::Word {
    let mut w = nsh_token::Word::new();
    for b in s.bytes() {
        w.push_char(b);
    }
    w.finish();
    w
}
