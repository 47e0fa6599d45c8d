//! The `Shell` context: a single value threaded through the executor
//! carrying every piece of state a running script can observe or mutate.
//! Subshells get a logically-copied context via fork; there are no hidden
//! singletons.
//!
//! `nsh-exec` owns the executor loop but never reaches for a module-level
//! static; every call takes `&mut Shell` (or a narrower borrow of one of
//! its fields).

use crate::alias::AliasTable;
use crate::builtins::BuiltinRegistry;
use crate::coproc::CoprocState;
use crate::dbracket::DBracketEval;
use crate::expansion::Expansion;
use crate::function::FunctionTable;
use crate::glob::GlobMatcher;
use crate::options::ShellOptions;
use crate::parser::SourceParser;
use crate::process::ProcessPrimitives;
use crate::symtab::SymbolTable;

/// The shell's process-wide state (§5 "Shared resources"), generic over
/// the out-of-scope collaborators so embedders can plug in their own
/// expansion/builtin/symbol-table/glob/process-primitive/`[[ ]]`/parser
/// implementations (or fakes, in tests) without `nsh-exec` depending on a
/// concrete crate for any of them.
pub struct Shell<E, B, S, G, P, D, R>
where
    E: Expansion,
    B: BuiltinRegistry,
    S: SymbolTable,
    G: GlobMatcher,
    P: ProcessPrimitives,
    D: DBracketEval,
    R: SourceParser,
{
    pub expansion: E,
    pub builtins: B,
    pub symtab: S,
    pub glob: G,
    pub process: P,
    pub dbracket: D,
    pub parser: R,

    pub aliases: AliasTable,
    pub functions: FunctionTable,
    pub options: ShellOptions,
    pub coproc: CoprocState,

    /// `$0` as currently bound (script name, or a ksh function's own name
    /// while it runs, §4.4 "Function").
    pub kshname: String,
    /// `$_`: the most recently resolved external command path (§4.4
    /// "External command").
    pub last_resolved_path: Option<String>,
    /// The last pipeline's per-segment exit statuses, left to right
    /// (§3 "PIPESTATUS", §8 "PIPESTATUS").
    pub pipestatus: Vec<i32>,
    /// `$?`.
    pub last_status: i32,
}

impl<E, B, S, G, P, D, R> Shell<E, B, S, G, P, D, R>
where
    E: Expansion,
    B: BuiltinRegistry,
    S: SymbolTable,
    G: GlobMatcher,
    P: ProcessPrimitives,
    D: DBracketEval,
    R: SourceParser,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(expansion: E, builtins: B, symtab: S, glob: G, process: P, dbracket: D, parser: R) -> Self {
        Self {
            expansion,
            builtins,
            symtab,
            glob,
            process,
            dbracket,
            parser,
            aliases: AliasTable::new(),
            functions: FunctionTable::new(),
            options: ShellOptions::default(),
            coproc: CoprocState::default(),
            kshname: String::new(),
            last_resolved_path: None,
            pipestatus: Vec::new(),
            last_status: 0,
        }
    }

    /// §8 "PIPESTATUS": records a pipeline's per-segment statuses and sets
    /// `$?` to the last element.
    pub fn set_pipestatus(&mut self, statuses: Vec<i32>) {
        self.last_status = *statuses.last().unwrap_or(&0);
        self.pipestatus = statuses;
    }
}
