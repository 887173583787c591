//! A fluent builder for already-analyzed ASTs, standing in for the excluded
//! front end so the demo CLI (`spec.md` §8.1's six scenarios) and tests can
//! construct lowering input directly. This is new surface, not a parser: it
//! produces exactly the resolved-symbol, evaluated-type tree shape
//! `ast::mod` describes.

use crate::ast::{BinOp, Expr, Function, GlobalDecl, LocalDecl, Param, Program, Stmt, Symbol, UnaryOp};
use crate::ir::types::Type;

#[derive(Default)]
pub struct ProgramBuilder {
    next_symbol: u32,
    program: Program,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh_symbol(&mut self) -> Symbol {
        let id = self.next_symbol;
        self.next_symbol += 1;
        Symbol(id)
    }

    pub fn global(mut self, decl: GlobalDecl) -> Self {
        self.program.globals.push(decl);
        self
    }

    pub fn function(mut self, f: Function) -> Self {
        self.program.functions.push(f);
        self
    }

    pub fn build(self) -> Program {
        self.program
    }
}

/// Builds one [`Function`]'s body statement by statement.
pub struct FunctionBuilder<'a> {
    owner: &'a mut ProgramBuilder,
    name: String,
    ret_ty: Type,
    params: Vec<Param>,
    body: Vec<Stmt>,
}

impl<'a> FunctionBuilder<'a> {
    pub fn new(owner: &'a mut ProgramBuilder, name: impl Into<String>, ret_ty: Type) -> Self {
        Self { owner, name: name.into(), ret_ty, params: Vec::new(), body: Vec::new() }
    }

    pub fn param(mut self, name: impl Into<String>, ty: Type) -> (Self, Symbol) {
        let symbol = self.owner.fresh_symbol();
        self.params.push(Param { symbol, name: name.into(), ty });
        (self, symbol)
    }

    pub fn local(&mut self, name: impl Into<String>, ty: Type, init: Option<Expr>) -> Symbol {
        let symbol = self.owner.fresh_symbol();
        self.body.push(Stmt::Decl(LocalDecl {
            symbol,
            name: name.into(),
            ty,
            dims: Vec::new(),
            is_const: false,
            init: init.into_iter().collect(),
        }));
        symbol
    }

    pub fn local_array(&mut self, name: impl Into<String>, elem_ty: Type, dims: Vec<u32>, init: Vec<Expr>) -> Symbol {
        let symbol = self.owner.fresh_symbol();
        self.body.push(Stmt::Decl(LocalDecl { symbol, name: name.into(), ty: elem_ty, dims, is_const: false, init }));
        symbol
    }

    pub fn stmt(mut self, stmt: Stmt) -> Self {
        self.body.push(stmt);
        self
    }

    pub fn finish(self) -> &'a mut ProgramBuilder {
        self.owner.program.functions.push(Function {
            name: self.name,
            ret_ty: self.ret_ty,
            params: self.params,
            body: self.body,
            is_declaration: false,
        });
        self.owner
    }
}

// ---- expression helpers -------------------------------------------------

pub fn lit(v: i32) -> Expr {
    Expr::IntLit(v)
}

pub fn flit(v: f32) -> Expr {
    Expr::FloatLit(v)
}

pub fn str_lit(s: impl Into<String>) -> Expr {
    Expr::StringLit(s.into())
}

pub fn var(s: Symbol) -> Expr {
    Expr::Var(s)
}

pub fn bin(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
}

pub fn unary(op: UnaryOp, e: Expr) -> Expr {
    Expr::Unary { op, expr: Box::new(e) }
}

pub fn call(callee: impl Into<String>, args: Vec<Expr>) -> Expr {
    Expr::Call { callee: callee.into(), args }
}

pub fn index(base: Symbol, indices: Vec<Expr>) -> Expr {
    Expr::Index { base, indices }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BinOp;

    #[test]
    fn builds_a_function_with_a_local_and_a_return() {
        let mut pb = ProgramBuilder::new();
        let (fb, _) = FunctionBuilder::new(&mut pb, "identity", Type::i32()).param("x", Type::i32());
        let mut fb = fb;
        let x = fb.params[0].symbol;
        fb.finish();
        // second function reusing the same ProgramBuilder via fresh_symbol uniqueness
        let y = pb.fresh_symbol();
        assert_ne!(x, y);
        let program = pb.build();
        assert_eq!(program.functions.len(), 1);
        assert_eq!(program.functions[0].name, "identity");
    }

    #[test]
    fn expression_helpers_compose() {
        let e = bin(BinOp::Add, lit(1), lit(2));
        match e {
            Expr::Binary { op: BinOp::Add, .. } => {}
            _ => panic!("expected Add"),
        }
    }
}
