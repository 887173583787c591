//! The compiler driver: ties the demo AST builder, lowering, and the pass
//! pipeline together behind the flags `main.rs` parses. Lexing, parsing,
//! and code generation are out of scope (`spec.md` §1), so this `Driver`
//! never touches a file system path or a target architecture — it runs
//! one of the six `spec.md` §8.1 scenarios (or all of them) and optionally
//! prints the resulting IR.

use anyhow::{bail, Result};

use crate::ast::builder::{bin, lit, var, FunctionBuilder, ProgramBuilder};
use crate::ast::{BinOp, Program, Stmt};
use crate::ir::printer::print_module;
use crate::ir::types::Type;
use crate::lowering::lower_program;
use crate::passes::{self, PassConfig};

pub struct Driver {
    /// Which `spec.md` §8.1 scenario to run; `None` runs all six in order.
    pub scenario: Option<u32>,
    pub emit_ir: bool,
    pub opt_level: u32,
    pub verbose: bool,
}

impl Default for Driver {
    fn default() -> Self {
        Self { scenario: None, emit_ir: false, opt_level: 2, verbose: false }
    }
}

impl Driver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run(&self) -> Result<()> {
        let scenarios: Vec<u32> = match self.scenario {
            Some(n) => vec![n],
            None => (1..=6).collect(),
        };
        for n in scenarios {
            self.run_scenario(n)?;
        }
        Ok(())
    }

    fn config(&self) -> PassConfig {
        match self.opt_level {
            0 => PassConfig::none(),
            1 | 2 => PassConfig::default(),
            _ => PassConfig::all_with_unroll(),
        }
    }

    fn run_scenario(&self, n: u32) -> Result<()> {
        let (name, program) = match n {
            1 => ("scalar_promotion", scenario_scalar_promotion()),
            2 => ("if_folding", scenario_if_folding()),
            3 => ("loop_unroll", scenario_loop_unroll()),
            4 => ("licm", scenario_licm()),
            5 => ("cse", scenario_cse()),
            6 => ("tail_recursion", scenario_tail_recursion()),
            other => bail!("no such scenario: {other} (expected 1-6)"),
        };

        let (mut module, diags) = lower_program(&program);
        if diags.has_errors() {
            bail!("{} error(s) lowering scenario {name}", diags.error_count());
        }
        if self.verbose {
            log::info!("scenario {n} ({name}): lowered {} function(s)", module.funcs_in_order().len());
        }

        let config = if n == 3 { PassConfig::all_with_unroll() } else { self.config() };
        passes::run(&mut module, &config);

        if self.emit_ir {
            println!("; -- scenario {n}: {name} --");
            println!("{}", print_module(&module));
        }
        Ok(())
    }
}

// ---- the six `spec.md` §8.1 scenarios -----------------------------------

/// `int a = 0; a = 5; a = a + 1; return a;`
fn scenario_scalar_promotion() -> Program {
    let mut pb = ProgramBuilder::new();
    let mut fb = FunctionBuilder::new(&mut pb, "scalar_promotion", Type::i32());
    let a = fb.local("a", Type::i32(), Some(lit(0)));
    fb.stmt(Stmt::Assign { target: var(a), value: lit(5) })
        .stmt(Stmt::Assign { target: var(a), value: bin(BinOp::Add, var(a), lit(1)) })
        .stmt(Stmt::Return(Some(var(a))))
        .finish();
    pb.build()
}

/// `if (1 < 2) return 10; else return 20;`
fn scenario_if_folding() -> Program {
    let mut pb = ProgramBuilder::new();
    FunctionBuilder::new(&mut pb, "if_folding", Type::i32())
        .stmt(Stmt::If {
            cond: bin(BinOp::Lt, lit(1), lit(2)),
            then_body: vec![Stmt::Return(Some(lit(10)))],
            else_body: vec![Stmt::Return(Some(lit(20)))],
        })
        .finish();
    pb.build()
}

/// `int s=0; int i=0; while (i<8) { s = s+i; i=i+1; } return s;`
fn scenario_loop_unroll() -> Program {
    let mut pb = ProgramBuilder::new();
    let mut fb = FunctionBuilder::new(&mut pb, "loop_unroll", Type::i32());
    let s = fb.local("s", Type::i32(), Some(lit(0)));
    let i = fb.local("i", Type::i32(), Some(lit(0)));
    fb.stmt(Stmt::While {
        cond: bin(BinOp::Lt, var(i), lit(8)),
        body: vec![
            Stmt::Assign { target: var(s), value: bin(BinOp::Add, var(s), var(i)) },
            Stmt::Assign { target: var(i), value: bin(BinOp::Add, var(i), lit(1)) },
        ],
    })
    .stmt(Stmt::Return(Some(var(s))))
    .finish();
    pb.build()
}

/// `while (i<n) { x = n*2; a[i] = x; i=i+1; }`
fn scenario_licm() -> Program {
    use crate::ast::builder::index;

    let mut pb = ProgramBuilder::new();
    let (fb, n) = FunctionBuilder::new(&mut pb, "licm", Type::void()).param("n", Type::i32());
    let mut fb = fb;
    let a = fb.local_array("a", Type::i32(), vec![8], Vec::new());
    let i = fb.local("i", Type::i32(), Some(lit(0)));
    let x = fb.local("x", Type::i32(), None);
    fb.stmt(Stmt::While {
        cond: bin(BinOp::Lt, var(i), var(n)),
        body: vec![
            Stmt::Assign { target: var(x), value: bin(BinOp::Mul, var(n), lit(2)) },
            Stmt::Assign { target: index(a, vec![var(i)]), value: var(x) },
            Stmt::Assign { target: var(i), value: bin(BinOp::Add, var(i), lit(1)) },
        ],
    })
    .stmt(Stmt::Return(None))
    .finish();
    pb.build()
}

/// `int a = x+y; int b = x+y; return a+b;`
fn scenario_cse() -> Program {
    let mut pb = ProgramBuilder::new();
    let (fb, x) = FunctionBuilder::new(&mut pb, "cse", Type::i32()).param("x", Type::i32());
    let (fb, y) = fb.param("y", Type::i32());
    let mut fb = fb;
    let a = fb.local("a", Type::i32(), Some(bin(BinOp::Add, var(x), var(y))));
    let b = fb.local("b", Type::i32(), Some(bin(BinOp::Add, var(x), var(y))));
    fb.stmt(Stmt::Return(Some(bin(BinOp::Add, var(a), var(b))))).finish();
    pb.build()
}

/// `int f(int n, int acc) { if (n==0) return acc; return f(n-1, acc+n); }`
fn scenario_tail_recursion() -> Program {
    use crate::ast::builder::call;

    let mut pb = ProgramBuilder::new();
    let (fb, n) = FunctionBuilder::new(&mut pb, "f", Type::i32()).param("n", Type::i32());
    let (fb, acc) = fb.param("acc", Type::i32());
    fb.stmt(Stmt::If {
        cond: bin(BinOp::Eq, var(n), lit(0)),
        then_body: vec![Stmt::Return(Some(var(acc)))],
        else_body: vec![],
    })
    .stmt(Stmt::Return(Some(call(
        "f",
        vec![bin(BinOp::Sub, var(n), lit(1)), bin(BinOp::Add, var(acc), var(n))],
    ))))
    .finish();
    pb.build()
}
