macro_rules! symbols {
    ($($variant:ident => $name:literal,)*) => {
        /// Nonterminals of the grammar, one per rule in `Grammar.txt`.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Symbol {
            $($variant,)*
        }

        impl Symbol {
            pub const ALL: &'static [Symbol] = &[$(Symbol::$variant,)*];

            pub fn name(self) -> &'static str {
                match self {
                    $(Symbol::$variant => $name,)*
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(Symbol::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

symbols! {
    SingleInput => "single_input",
    FileInput => "file_input",
    EvalInput => "eval_input",
    Decorator => "decorator",
    Decorators => "decorators",
    Decorated => "decorated",
    Funcdef => "funcdef",
    Parameters => "parameters",
    Typedargslist => "typedargslist",
    Tfpdef => "tfpdef",
    Varargslist => "varargslist",
    Vfpdef => "vfpdef",
    Stmt => "stmt",
    SimpleStmt => "simple_stmt",
    SmallStmt => "small_stmt",
    ExprStmt => "expr_stmt",
    Annassign => "annassign",
    TestlistStarExpr => "testlist_star_expr",
    Augassign => "augassign",
    DelStmt => "del_stmt",
    PassStmt => "pass_stmt",
    FlowStmt => "flow_stmt",
    BreakStmt => "break_stmt",
    ContinueStmt => "continue_stmt",
    ReturnStmt => "return_stmt",
    YieldStmt => "yield_stmt",
    RaiseStmt => "raise_stmt",
    ImportStmt => "import_stmt",
    ImportName => "import_name",
    ImportFrom => "import_from",
    ImportAsName => "import_as_name",
    DottedAsName => "dotted_as_name",
    ImportAsNames => "import_as_names",
    DottedAsNames => "dotted_as_names",
    DottedName => "dotted_name",
    GlobalStmt => "global_stmt",
    NonlocalStmt => "nonlocal_stmt",
    AssertStmt => "assert_stmt",
    CompoundStmt => "compound_stmt",
    IfStmt => "if_stmt",
    WhileStmt => "while_stmt",
    ForStmt => "for_stmt",
    TryStmt => "try_stmt",
    WithStmt => "with_stmt",
    WithItem => "with_item",
    ExceptClause => "except_clause",
    Suite => "suite",
    Test => "test",
    TestNocond => "test_nocond",
    Lambdef => "lambdef",
    LambdefNocond => "lambdef_nocond",
    OrTest => "or_test",
    AndTest => "and_test",
    NotTest => "not_test",
    Comparison => "comparison",
    CompOp => "comp_op",
    StarExpr => "star_expr",
    Expr => "expr",
    XorExpr => "xor_expr",
    AndExpr => "and_expr",
    ShiftExpr => "shift_expr",
    ArithExpr => "arith_expr",
    Term => "term",
    Factor => "factor",
    Power => "power",
    AtomExpr => "atom_expr",
    Atom => "atom",
    TestlistComp => "testlist_comp",
    Trailer => "trailer",
    Subscriptlist => "subscriptlist",
    Subscript => "subscript",
    Sliceop => "sliceop",
    Exprlist => "exprlist",
    Testlist => "testlist",
    Dictorsetmaker => "dictorsetmaker",
    Classdef => "classdef",
    Arglist => "arglist",
    Argument => "argument",
    CompIter => "comp_iter",
    CompFor => "comp_for",
    CompIf => "comp_if",
    YieldExpr => "yield_expr",
    YieldArg => "yield_arg",
}
