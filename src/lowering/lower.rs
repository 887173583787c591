//! The lowering walk itself.
//!
//! Every local (including parameters, for uniformity) gets a home-slot
//! `alloca` in its function's entry block, with loads/stores at every use
//! and def; `spec.md` §4.3 describes this as the expected starting point
//! before `Mem2Reg` promotes slots that qualify. Short-circuit `&&`/`||`
//! lower directly to a diamond of conditional branches rather than via a
//! boolean-valued instruction, since SysY gives `&&`/`||` control-flow
//! semantics (the right-hand side must not execute when the left side
//! already decides the result).

use std::collections::HashMap;

use crate::ast::{BinOp as AstBinOp, Expr, Function, GlobalDecl, Program, Stmt, Symbol, UnaryOp};
use crate::common::error::{Diagnostic, DiagnosticEngine, LoweringError};
use crate::common::source::Span;
use crate::ir::builder::Builder;
use crate::ir::function::{FuncData, FuncId, Param as IrParam};
use crate::ir::instruction::{BinOp as IrBinOp, CastOp, IPred, Opcode};
use crate::ir::module::{GlobalData, GlobalId, Module};
use crate::ir::operand::OperandKind;
use crate::ir::types::{ArrayLen, Type};
use crate::ir::value::Const;
use crate::ir::{BlockId, InstId};

use super::const_eval::eval_const;

/// The SysY runtime library (`spec.md` §6.1): externs lowering may call
/// directly, never defined in the module itself.
pub const RUNTIME_FUNCS: &[(&str, &[Type], Type)] = &[];

fn runtime_signature(name: &str) -> Option<(Vec<Type>, Type)> {
    let sig = match name {
        "getint" | "getch" => (vec![], Type::i32()),
        "getfloat" => (vec![], Type::f32()),
        "getarray" => (vec![Type::pointer_to(Type::i32())], Type::i32()),
        "getfarray" => (vec![Type::pointer_to(Type::f32())], Type::i32()),
        "putint" | "putch" => (vec![Type::i32()], Type::void()),
        "putfloat" => (vec![Type::f32()], Type::void()),
        "putarray" => (vec![Type::i32(), Type::pointer_to(Type::i32())], Type::void()),
        "putfarray" => (vec![Type::i32(), Type::pointer_to(Type::f32())], Type::void()),
        "putf" => (vec![Type::pointer_to(Type::i8())], Type::void()),
        "starttime" | "stoptime" => (vec![], Type::void()),
        _ => return None,
    };
    Some(sig)
}

#[derive(Clone)]
enum LocalSlot {
    /// A scalar or fixed-size-array local with a home-slot `alloca`.
    Slot { ptr: InstId, ty: Type },
}

struct LoopFrame {
    continue_block: BlockId,
    break_block: BlockId,
}

pub fn lower_program(program: &Program) -> (Module, DiagnosticEngine) {
    let mut module = Module::new();
    let mut diags = DiagnosticEngine::new();
    let mut globals: HashMap<Symbol, (GlobalId, Type)> = HashMap::new();
    let mut funcs_by_name: HashMap<String, FuncId> = HashMap::new();

    for g in &program.globals {
        lower_global(&mut module, g, &mut globals, &mut diags);
    }

    funcs_by_name.extend(declare_runtime(&mut module));
    let mut strings: HashMap<String, GlobalId> = HashMap::new();

    for f in &program.functions {
        let (param_tys, ret_ty) = (
            f.params.iter().map(|p| p.ty.clone()).collect::<Vec<_>>(),
            f.ret_ty.clone(),
        );
        let mut data = FuncData::new(f.name.clone(), ret_ty);
        data.is_declaration = f.is_declaration;
        for (i, p) in f.params.iter().enumerate() {
            data.params.push(IrParam { name: p.name.clone(), ty: param_tys[i].clone(), value: crate::ir::arena::Id::new(0) });
        }
        let id = module.add_func(data);
        funcs_by_name.insert(f.name.clone(), id);
    }

    for f in &program.functions {
        if f.is_declaration {
            continue;
        }
        let func_id = funcs_by_name[&f.name];
        lower_function_body(&mut module, func_id, f, &globals, &funcs_by_name, &mut strings, &mut diags);
    }

    (module, diags)
}

fn lower_global(
    module: &mut Module,
    g: &GlobalDecl,
    globals: &mut HashMap<Symbol, (GlobalId, Type)>,
    diags: &mut DiagnosticEngine,
) {
    let consts = HashMap::new();
    let mut init = Vec::new();
    for e in &g.init {
        match eval_const(e, &consts) {
            Ok(c) => init.push(c),
            Err(err) => diags.emit(Diagnostic::error(err, Span::dummy())),
        }
    }
    let ty = if g.dims.is_empty() {
        g.ty.clone()
    } else {
        g.dims.iter().rev().fold(g.ty.clone(), |acc, &n| Type::array_of(acc, ArrayLen::Fixed(n)))
    };
    let id = module.add_global(GlobalData { name: g.name.clone(), ty: ty.clone(), init, first_use: None });
    globals.insert(g.symbol, (id, ty));
}

struct FnCtx<'m> {
    module: &'m mut Module,
    func: FuncId,
    locals: HashMap<Symbol, LocalSlot>,
    loop_stack: Vec<LoopFrame>,
    funcs_by_name: &'m HashMap<String, FuncId>,
    strings: &'m mut HashMap<String, GlobalId>,
    current: BlockId,
}

fn lower_function_body(
    module: &mut Module,
    func_id: FuncId,
    f: &Function,
    globals: &HashMap<Symbol, (GlobalId, Type)>,
    funcs_by_name: &HashMap<String, FuncId>,
    strings: &mut HashMap<String, GlobalId>,
    diags: &mut DiagnosticEngine,
) {
    let entry = Builder::new(module, func_id).create_block("entry");
    module.funcs.get_mut(func_id).entry = Some(entry);

    let mut locals = HashMap::new();
    for (i, p) in f.params.iter().enumerate() {
        let mut b = Builder::new(module, func_id);
        let ptr = b.append(entry, Opcode::Alloca, Type::pointer_to(p.ty.clone()), vec![]);
        let param_value = b.alloc_param_value(i as u32);
        b.append(entry, Opcode::Store, Type::void(), vec![OperandKind::Param(param_value), OperandKind::Inst(ptr)]);
        module.funcs.get_mut(func_id).params[i].value = param_value;
        locals.insert(p.symbol, LocalSlot::Slot { ptr, ty: p.ty.clone() });
    }

    let globals_owned: HashMap<Symbol, (GlobalId, Type)> = globals.clone();
    let mut cx = FnCtx { module, func: func_id, locals, loop_stack: Vec::new(), funcs_by_name, strings, current: entry };

    for stmt in &f.body {
        lower_stmt(&mut cx, stmt, &globals_owned, diags);
    }

    // `spec.md` §4.3: a function falling off the end without a `return`
    // (valid for `void` functions, and for non-void `main`-equivalent
    // fuzz targets the front end would normally reject) gets an implicit
    // default-value return so the IR stays well-formed.
    ensure_terminated(&mut cx, f);
}

fn ensure_terminated(cx: &mut FnCtx, f: &Function) {
    let needs_term = {
        let func = cx.module.funcs.get(cx.func);
        match func.blocks.get(cx.current).last_inst {
            Some(last) => !func.insts.get(last).opcode.is_terminator(),
            None => true,
        }
    };
    if !needs_term {
        return;
    }
    let mut b = Builder::new(cx.module, cx.func);
    if f.ret_ty.is_void() {
        b.append(cx.current, Opcode::Ret, Type::void(), vec![]);
    } else {
        let zero = if f.ret_ty.is_f32() { Const::F32(0.0) } else { Const::I32(0) };
        b.append(cx.current, Opcode::Ret, f.ret_ty.clone(), vec![OperandKind::Const(zero)]);
    }
}

fn lower_stmt(cx: &mut FnCtx, stmt: &Stmt, globals: &HashMap<Symbol, (GlobalId, Type)>, diags: &mut DiagnosticEngine) {
    if is_terminated(cx) {
        return;
    }
    match stmt {
        Stmt::Expr(e) => {
            lower_expr(cx, e, globals, diags);
        }
        Stmt::Decl(decl) => {
            let ty = if decl.dims.is_empty() {
                decl.ty.clone()
            } else {
                decl.dims.iter().rev().fold(decl.ty.clone(), |acc, &n| Type::array_of(acc, ArrayLen::Fixed(n)))
            };
            let entry = cx.module.funcs.get(cx.func).entry.unwrap();
            let ptr = Builder::new(cx.module, cx.func).append(entry, Opcode::Alloca, Type::pointer_to(ty.clone()), vec![]);
            cx.locals.insert(decl.symbol, LocalSlot::Slot { ptr, ty: ty.clone() });
            if decl.dims.is_empty() {
                if let Some(e) = decl.init.first() {
                    let (v, _) = lower_expr(cx, e, globals, diags);
                    let v = coerce(cx, v, &decl.ty);
                    Builder::new(cx.module, cx.func).append(cx.current, Opcode::Store, Type::void(), vec![v, OperandKind::Inst(ptr)]);
                }
            } else {
                for (i, e) in decl.init.iter().enumerate() {
                    let (v, _) = lower_expr(cx, e, globals, diags);
                    let v = coerce(cx, v, &decl.ty);
                    let elem_ptr = Builder::new(cx.module, cx.func).append(
                        cx.current,
                        Opcode::GetElementPtr,
                        Type::pointer_to(decl.ty.clone()),
                        vec![OperandKind::Inst(ptr), OperandKind::Const(Const::I32(i as i32))],
                    );
                    Builder::new(cx.module, cx.func).append(cx.current, Opcode::Store, Type::void(), vec![v, OperandKind::Inst(elem_ptr)]);
                }
            }
        }
        Stmt::Assign { target, value } => {
            let (v, _) = lower_expr(cx, value, globals, diags);
            let addr = lower_addr(cx, target, globals, diags);
            let elem_ty = addr_elem_ty(cx, target, globals);
            let v = coerce(cx, v, &elem_ty);
            Builder::new(cx.module, cx.func).append(cx.current, Opcode::Store, Type::void(), vec![v, OperandKind::Inst(addr)]);
        }
        Stmt::Block(stmts) => {
            for s in stmts {
                lower_stmt(cx, s, globals, diags);
            }
        }
        Stmt::If { cond, then_body, else_body } => {
            let then_blk = Builder::new(cx.module, cx.func).create_block("if.then");
            let else_blk = Builder::new(cx.module, cx.func).create_block("if.else");
            let join_blk = Builder::new(cx.module, cx.func).create_block("if.end");
            lower_cond(cx, cond, then_blk, else_blk, globals, diags);

            cx.current = then_blk;
            for s in then_body {
                lower_stmt(cx, s, globals, diags);
            }
            branch_to_if_open(cx, join_blk);

            cx.current = else_blk;
            for s in else_body {
                lower_stmt(cx, s, globals, diags);
            }
            branch_to_if_open(cx, join_blk);

            cx.current = join_blk;
        }
        Stmt::While { cond, body } => {
            let header = Builder::new(cx.module, cx.func).create_block("while.cond");
            let body_blk = Builder::new(cx.module, cx.func).create_block("while.body");
            let exit_blk = Builder::new(cx.module, cx.func).create_block("while.end");
            branch_to_if_open(cx, header);

            cx.current = header;
            lower_cond(cx, cond, body_blk, exit_blk, globals, diags);

            cx.current = body_blk;
            cx.loop_stack.push(LoopFrame { continue_block: header, break_block: exit_blk });
            for s in body {
                lower_stmt(cx, s, globals, diags);
            }
            cx.loop_stack.pop();
            branch_to_if_open(cx, header);

            cx.current = exit_blk;
        }
        Stmt::Break => match cx.loop_stack.last() {
            Some(frame) => {
                let target = frame.break_block;
                branch_to_if_open(cx, target);
            }
            None => diags.emit(Diagnostic::error(LoweringError::LoopControlOutsideLoop, Span::dummy())),
        },
        Stmt::Continue => match cx.loop_stack.last() {
            Some(frame) => {
                let target = frame.continue_block;
                branch_to_if_open(cx, target);
            }
            None => diags.emit(Diagnostic::error(LoweringError::LoopControlOutsideLoop, Span::dummy())),
        },
        Stmt::Return(e) => {
            match e {
                Some(e) => {
                    let (v, _) = lower_expr(cx, e, globals, diags);
                    let ret_ty = cx.module.funcs.get(cx.func).ret_ty.clone();
                    let v = coerce(cx, v, &ret_ty);
                    Builder::new(cx.module, cx.func).append(cx.current, Opcode::Ret, ret_ty, vec![v]);
                }
                None => {
                    Builder::new(cx.module, cx.func).append(cx.current, Opcode::Ret, Type::void(), vec![]);
                }
            };
        }
    }
}

fn is_terminated(cx: &FnCtx) -> bool {
    let func = cx.module.funcs.get(cx.func);
    match func.blocks.get(cx.current).last_inst {
        Some(last) => func.insts.get(last).opcode.is_terminator(),
        None => false,
    }
}

/// Emits an unconditional branch from the current block to `target` unless
/// the current block already ended (e.g. with a `return`), and wires up the
/// CFG edge either way the branch is taken.
fn branch_to_if_open(cx: &mut FnCtx, target: BlockId) {
    if is_terminated(cx) {
        return;
    }
    let from = cx.current;
    let mut b = Builder::new(cx.module, cx.func);
    let br = b.append(from, Opcode::Br, Type::void(), vec![]);
    b.set_targets(br, vec![target]);
    b.add_edge(from, target);
}

/// Lowers a condition expression directly into a branch to `true_blk` or
/// `false_blk`, handling `&&`/`||`/`!` as control flow rather than values.
fn lower_cond(
    cx: &mut FnCtx,
    expr: &Expr,
    true_blk: BlockId,
    false_blk: BlockId,
    globals: &HashMap<Symbol, (GlobalId, Type)>,
    diags: &mut DiagnosticEngine,
) {
    match expr {
        Expr::Binary { op: AstBinOp::And, lhs, rhs } => {
            let mid = Builder::new(cx.module, cx.func).create_block("land.rhs");
            lower_cond(cx, lhs, mid, false_blk, globals, diags);
            cx.current = mid;
            lower_cond(cx, rhs, true_blk, false_blk, globals, diags);
        }
        Expr::Binary { op: AstBinOp::Or, lhs, rhs } => {
            let mid = Builder::new(cx.module, cx.func).create_block("lor.rhs");
            lower_cond(cx, lhs, true_blk, mid, globals, diags);
            cx.current = mid;
            lower_cond(cx, rhs, true_blk, false_blk, globals, diags);
        }
        Expr::Unary { op: UnaryOp::Not, expr } => {
            lower_cond(cx, expr, false_blk, true_blk, globals, diags);
        }
        _ => {
            let (v, ty) = lower_expr(cx, expr, globals, diags);
            let cond = truthy(cx, v, &ty);
            let from = cx.current;
            let mut b = Builder::new(cx.module, cx.func);
            let br = b.append(from, Opcode::CondBr, Type::void(), vec![cond]);
            b.set_targets(br, vec![true_blk, false_blk]);
            b.add_edge(from, true_blk);
            b.add_edge(from, false_blk);
        }
    }
}

/// Reduces a value to an `i1`-equivalent `i32` truth value (SysY has no
/// first-class boolean type; `spec.md` §3.1 keeps comparisons `i32`).
fn truthy(cx: &mut FnCtx, v: OperandKind, ty: &Type) -> OperandKind {
    if ty.is_f32() {
        let inst = Builder::new(cx.module, cx.func).append(
            cx.current,
            Opcode::FCmp(crate::ir::instruction::FPred::One),
            Type::i32(),
            vec![v, OperandKind::Const(Const::F32(0.0))],
        );
        OperandKind::Inst(inst)
    } else if let OperandKind::Const(c) = v {
        OperandKind::Const(Const::I32(c.is_truthy().unwrap_or(false) as i32))
    } else {
        let inst = Builder::new(cx.module, cx.func).append(
            cx.current,
            Opcode::ICmp(IPred::Ne),
            Type::i32(),
            vec![v, OperandKind::Const(Const::I32(0))],
        );
        OperandKind::Inst(inst)
    }
}

fn coerce(cx: &mut FnCtx, v: OperandKind, target_ty: &Type) -> OperandKind {
    let src_ty = operand_ty(cx, &v);
    if src_ty.eq_ignoring_const(target_ty) {
        return v;
    }
    if target_ty.is_f32() && src_ty.is_i32() {
        if let OperandKind::Const(Const::I32(i)) = v {
            return OperandKind::Const(Const::F32(i as f32));
        }
        let inst = Builder::new(cx.module, cx.func).append(cx.current, Opcode::Cast(CastOp::SIToFP), Type::f32(), vec![v]);
        return OperandKind::Inst(inst);
    }
    if target_ty.is_i32() && src_ty.is_f32() {
        if let OperandKind::Const(Const::F32(f)) = v {
            return OperandKind::Const(Const::I32(f as i32));
        }
        let inst = Builder::new(cx.module, cx.func).append(cx.current, Opcode::Cast(CastOp::FPToSI), Type::i32(), vec![v]);
        return OperandKind::Inst(inst);
    }
    v
}

fn operand_ty(cx: &FnCtx, v: &OperandKind) -> Type {
    match v {
        OperandKind::Const(c) => c.ty(),
        OperandKind::Inst(i) => cx.module.funcs.get(cx.func).insts.get(*i).ty.clone(),
        OperandKind::Param(p) => {
            let func = cx.module.funcs.get(cx.func);
            let crate::ir::value::ValueKind::Param { index, .. } = func.values.get(*p).kind;
            func.params[index as usize].ty.clone()
        }
        OperandKind::Global(g) => cx.module.globals.get(*g).ty.clone(),
        OperandKind::Function(_) | OperandKind::Removed => Type::void(),
    }
}

/// Computes the address of an lvalue expression (a plain variable or an
/// array index), for use as a `load`/`store`/`GetElementPtr` base.
fn lower_addr(
    cx: &mut FnCtx,
    expr: &Expr,
    globals: &HashMap<Symbol, (GlobalId, Type)>,
    diags: &mut DiagnosticEngine,
) -> InstId {
    match expr {
        Expr::Var(sym) => match cx.locals.get(sym).cloned() {
            Some(LocalSlot::Slot { ptr, .. }) => ptr,
            None => match globals.get(sym) {
                Some((g, ty)) => {
                    Builder::new(cx.module, cx.func).append(cx.current, Opcode::GetElementPtr, Type::pointer_to(ty.clone()), vec![OperandKind::Global(*g)])
                }
                None => {
                    diags.emit(Diagnostic::error(LoweringError::UndefinedSymbol(format!("symbol#{}", sym.0)), Span::dummy()));
                    Builder::new(cx.module, cx.func).append(cx.current, Opcode::Alloca, Type::pointer_to(Type::i32()), vec![])
                }
            },
        },
        Expr::Index { base, indices } => {
            let base_ptr = match cx.locals.get(base).cloned() {
                Some(LocalSlot::Slot { ptr, .. }) => OperandKind::Inst(ptr),
                None => match globals.get(base) {
                    Some((g, _)) => OperandKind::Global(*g),
                    None => {
                        diags.emit(Diagnostic::error(LoweringError::UndefinedSymbol(format!("symbol#{}", base.0)), Span::dummy()));
                        OperandKind::Const(Const::I32(0))
                    }
                },
            };
            let elem_ty = addr_elem_ty(cx, expr, globals);
            let mut gep_operands = vec![base_ptr];
            for idx in indices {
                let (v, _) = lower_expr(cx, idx, globals, diags);
                gep_operands.push(v);
            }
            Builder::new(cx.module, cx.func).append(cx.current, Opcode::GetElementPtr, Type::pointer_to(elem_ty), gep_operands)
        }
        _ => {
            diags.emit(Diagnostic::error(LoweringError::UndefinedSymbol("not an lvalue".into()), Span::dummy()));
            Builder::new(cx.module, cx.func).append(cx.current, Opcode::Alloca, Type::pointer_to(Type::i32()), vec![])
        }
    }
}

fn addr_elem_ty(cx: &FnCtx, expr: &Expr, globals: &HashMap<Symbol, (GlobalId, Type)>) -> Type {
    match expr {
        Expr::Var(sym) => match cx.locals.get(sym) {
            Some(LocalSlot::Slot { ty, .. }) => ty.clone(),
            None => globals.get(sym).map(|(_, t)| t.clone()).unwrap_or(Type::i32()),
        },
        Expr::Index { base, indices } => {
            let base_ty = match cx.locals.get(base) {
                Some(LocalSlot::Slot { ty, .. }) => ty.clone(),
                None => globals.get(base).map(|(_, t)| t.clone()).unwrap_or(Type::i32()),
            };
            let mut ty = base_ty;
            for _ in indices {
                ty = match ty.kind {
                    crate::ir::types::TypeKind::Array { elem, .. } => *elem,
                    crate::ir::types::TypeKind::Pointer(elem) => *elem,
                    _ => ty,
                };
            }
            ty
        }
        _ => Type::i32(),
    }
}

/// Lowers an rvalue expression, returning its value and evaluated type.
fn lower_expr(
    cx: &mut FnCtx,
    expr: &Expr,
    globals: &HashMap<Symbol, (GlobalId, Type)>,
    diags: &mut DiagnosticEngine,
) -> (OperandKind, Type) {
    match expr {
        Expr::IntLit(v) => (OperandKind::Const(Const::I32(*v)), Type::i32()),
        Expr::FloatLit(v) => (OperandKind::Const(Const::F32(*v)), Type::f32()),
        Expr::StringLit(s) => (intern_string(cx, s), Type::pointer_to(Type::i8())),
        Expr::Var(_) | Expr::Index { .. } => {
            let ty = addr_elem_ty(cx, expr, globals);
            let addr = lower_addr(cx, expr, globals, diags);
            let inst = Builder::new(cx.module, cx.func).append(cx.current, Opcode::Load, ty.clone(), vec![OperandKind::Inst(addr)]);
            (OperandKind::Inst(inst), ty)
        }
        Expr::Unary { op, expr } => {
            let (v, ty) = lower_expr(cx, expr, globals, diags);
            match op {
                UnaryOp::Neg => {
                    let zero = if ty.is_f32() { Const::F32(0.0) } else { Const::I32(0) };
                    let bin = if ty.is_f32() { IrBinOp::FSub } else { IrBinOp::Sub };
                    let inst = Builder::new(cx.module, cx.func).append(cx.current, Opcode::Binary(bin), ty.clone(), vec![OperandKind::Const(zero), v]);
                    (OperandKind::Inst(inst), ty)
                }
                UnaryOp::Not => {
                    let t = truthy(cx, v, &ty);
                    let inst = Builder::new(cx.module, cx.func).append(cx.current, Opcode::ICmp(IPred::Eq), Type::i32(), vec![t, OperandKind::Const(Const::I32(0))]);
                    (OperandKind::Inst(inst), Type::i32())
                }
            }
        }
        Expr::Binary { op: AstBinOp::And, .. } | Expr::Binary { op: AstBinOp::Or, .. } => {
            // Materialize a short-circuited boolean value via a diamond,
            // for contexts (e.g. `a = x && y;`) that need it as a value
            // rather than purely as a branch condition.
            let true_blk = Builder::new(cx.module, cx.func).create_block("land.true");
            let false_blk = Builder::new(cx.module, cx.func).create_block("land.false");
            let join = Builder::new(cx.module, cx.func).create_block("land.end");
            lower_cond(cx, expr, true_blk, false_blk, globals, diags);

            cx.current = true_blk;
            branch_to_if_open(cx, join);
            cx.current = false_blk;
            branch_to_if_open(cx, join);

            cx.current = join;
            let phi = Builder::new(cx.module, cx.func).append(
                join,
                Opcode::Phi,
                Type::i32(),
                vec![OperandKind::Const(Const::I32(1)), OperandKind::Const(Const::I32(0))],
            );
            (OperandKind::Inst(phi), Type::i32())
        }
        Expr::Binary { op, lhs, rhs } => {
            let (l, lty) = lower_expr(cx, lhs, globals, diags);
            let (r, rty) = lower_expr(cx, rhs, globals, diags);
            let float = lty.is_f32() || rty.is_f32();
            let common = if float { Type::f32() } else { Type::i32() };
            let l = coerce(cx, l, &common);
            let r = coerce(cx, r, &common);
            lower_binop(cx, *op, l, r, float)
        }
        Expr::Call { callee, args } => {
            let mut arg_vals = Vec::new();
            for a in args {
                let (v, _) = lower_expr(cx, a, globals, diags);
                arg_vals.push(v);
            }
            let (func_id, ret_ty) = match cx.funcs_by_name.get(callee.as_str()).copied() {
                Some(id) => (id, cx.module.funcs.get(id).ret_ty.clone()),
                None => {
                    diags.emit(Diagnostic::error(LoweringError::UndefinedSymbol(callee.clone()), Span::dummy()));
                    (cx.func, Type::void())
                }
            };
            let mut call_operands = vec![OperandKind::Function(func_id)];
            call_operands.extend(arg_vals);
            let inst = Builder::new(cx.module, cx.func).append(cx.current, Opcode::Call, ret_ty.clone(), call_operands);
            (OperandKind::Inst(inst), ret_ty)
        }
    }
}

fn lower_binop(cx: &mut FnCtx, op: AstBinOp, l: OperandKind, r: OperandKind, float: bool) -> (OperandKind, Type) {
    let ty = if float { Type::f32() } else { Type::i32() };
    let (opcode, result_ty) = match op {
        AstBinOp::Add => (Opcode::Binary(if float { IrBinOp::FAdd } else { IrBinOp::Add }), ty.clone()),
        AstBinOp::Sub => (Opcode::Binary(if float { IrBinOp::FSub } else { IrBinOp::Sub }), ty.clone()),
        AstBinOp::Mul => (Opcode::Binary(if float { IrBinOp::FMul } else { IrBinOp::Mul }), ty.clone()),
        AstBinOp::Div => (Opcode::Binary(if float { IrBinOp::FDiv } else { IrBinOp::Div }), ty.clone()),
        AstBinOp::Mod => (Opcode::Binary(IrBinOp::Rem), Type::i32()),
        AstBinOp::Lt => (cmp_opcode(float, IPred::Slt), Type::i32()),
        AstBinOp::Le => (cmp_opcode(float, IPred::Sle), Type::i32()),
        AstBinOp::Gt => (cmp_opcode(float, IPred::Sgt), Type::i32()),
        AstBinOp::Ge => (cmp_opcode(float, IPred::Sge), Type::i32()),
        AstBinOp::Eq => (cmp_opcode(float, IPred::Eq), Type::i32()),
        AstBinOp::Ne => (cmp_opcode(float, IPred::Ne), Type::i32()),
        AstBinOp::And | AstBinOp::Or => unreachable!("handled by lower_expr's short-circuit path"),
    };
    let inst = Builder::new(cx.module, cx.func).append(cx.current, opcode, result_ty.clone(), vec![l, r]);
    (OperandKind::Inst(inst), result_ty)
}

/// Interns a format-string literal as a NUL-terminated `[N x i8]` global,
/// deduplicated by its text, and returns a pointer to its first byte.
/// `putf`'s format argument is the only thing that ever needs one
/// (`spec.md` §6.1); there is no first-class string type to otherwise
/// produce an `i8*` from.
fn intern_string(cx: &mut FnCtx, s: &str) -> OperandKind {
    let global = match cx.strings.get(s) {
        Some(&g) => g,
        None => {
            let mut init: Vec<Const> = s.bytes().map(|b| Const::I32(b as i32)).collect();
            init.push(Const::I32(0));
            let ty = Type::array_of(Type::i8(), ArrayLen::Fixed(init.len() as u32));
            let name = format!(".str.{}", cx.module.globals_in_order().len());
            let g = cx.module.add_global(GlobalData { name, ty, init, first_use: None });
            cx.strings.insert(s.to_string(), g);
            g
        }
    };
    let ptr = Builder::new(cx.module, cx.func).append(
        cx.current,
        Opcode::GetElementPtr,
        Type::pointer_to(Type::i8()),
        vec![OperandKind::Global(global), OperandKind::Const(Const::I32(0))],
    );
    OperandKind::Inst(ptr)
}

fn cmp_opcode(float: bool, pred: IPred) -> Opcode {
    if float {
        let fpred = match pred {
            IPred::Eq => crate::ir::instruction::FPred::Oeq,
            IPred::Ne => crate::ir::instruction::FPred::One,
            IPred::Slt => crate::ir::instruction::FPred::Olt,
            IPred::Sle => crate::ir::instruction::FPred::Ole,
            IPred::Sgt => crate::ir::instruction::FPred::Ogt,
            IPred::Sge => crate::ir::instruction::FPred::Oge,
        };
        Opcode::FCmp(fpred)
    } else {
        Opcode::ICmp(pred)
    }
}

/// Declares the fixed SysY runtime externs (`spec.md` §6.1) in `module`,
/// returning their names mapped to `FuncId`s for call lowering to use.
pub fn declare_runtime(module: &mut Module) -> HashMap<String, FuncId> {
    let names = [
        "getint", "getch", "getfloat", "getarray", "getfarray", "putint", "putch", "putfloat", "putarray",
        "putfarray", "putf", "starttime", "stoptime",
    ];
    let mut out = HashMap::new();
    for name in names {
        let (params, ret) = runtime_signature(name).unwrap();
        let mut data = FuncData::new(name.to_string(), ret);
        data.is_declaration = true;
        data.is_variadic = name == "putf";
        for (i, ty) in params.into_iter().enumerate() {
            data.params.push(IrParam { name: format!("a{i}"), ty, value: crate::ir::arena::Id::new(0) });
        }
        let id = module.add_func(data);
        out.insert(name.to_string(), id);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builder::{bin, call, lit, str_lit, FunctionBuilder, ProgramBuilder};
    use crate::ast::{BinOp, Stmt};

    #[test]
    fn lowers_a_constant_return() {
        let mut pb = ProgramBuilder::new();
        FunctionBuilder::new(&mut pb, "main", Type::i32())
            .stmt(Stmt::Return(Some(bin(BinOp::Add, lit(1), lit(2)))))
            .finish();
        let program = pb.build();
        let (module, diags) = lower_program(&program);
        assert!(!diags.has_errors());
        let f = module.find_func("main").unwrap();
        let func = module.funcs.get(f);
        assert!(func.entry.is_some());
        let last = func.blocks.get(func.entry.unwrap()).last_inst.unwrap();
        assert_eq!(func.insts.get(last).opcode, Opcode::Ret);
    }

    #[test]
    fn lowers_a_putf_call_into_an_interned_string_global() {
        let mut pb = ProgramBuilder::new();
        FunctionBuilder::new(&mut pb, "main", Type::i32())
            .stmt(Stmt::Expr(call("putf", vec![str_lit("hi"), lit(1)])))
            .stmt(Stmt::Return(Some(lit(0))))
            .finish();
        let program = pb.build();
        let (module, diags) = lower_program(&program);
        assert!(!diags.has_errors());

        assert_eq!(module.globals_in_order().len(), 1);
        let g = module.globals.get(module.globals_in_order()[0]);
        assert_eq!(g.name, ".str.0");
        assert_eq!(g.init, vec![Const::I32(b'h' as i32), Const::I32(b'i' as i32), Const::I32(0)]);

        let putf = module.find_func("putf").unwrap();
        assert!(module.funcs.get(putf).is_variadic);

        let f = module.find_func("main").unwrap();
        let func = module.funcs.get(f);
        let call_inst = func
            .insts
            .ids()
            .map(|id| func.insts.get(id))
            .find(|inst| inst.opcode == Opcode::Call && inst.operands[0].kind == OperandKind::Function(putf))
            .expect("expected a call to putf");
        match call_inst.operands[1].kind {
            OperandKind::Inst(gep) => assert_eq!(func.insts.get(gep).opcode, Opcode::GetElementPtr),
            other => panic!("expected the format argument to be a GEP result, got {other:?}"),
        }
    }
}
