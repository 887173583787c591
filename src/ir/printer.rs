//! The textual IR printer (`spec.md` §6.2): a pure function of the in-memory
//! IR, LLVM-flavored syntax, used for `--emit-ir` and in tests that assert
//! on printed output rather than walking the arena by hand.

use std::fmt::Write;

use crate::ir::function::{FuncData, FuncId};
use crate::ir::instruction::{InstData, InstId, Opcode};
use crate::ir::module::Module;
use crate::ir::operand::OperandKind;
use crate::ir::value::ValueKind;

pub fn print_module(module: &Module) -> String {
    let mut out = String::new();
    for &g in module.globals_in_order() {
        let gd = module.globals.get(g);
        if gd.init.is_empty() {
            let _ = writeln!(out, "@{} = global {} zeroinitializer", gd.name, gd.ty);
        } else {
            let items: Vec<String> = gd.init.iter().map(|c| c.to_string()).collect();
            let _ = writeln!(out, "@{} = global {} [{}]", gd.name, gd.ty, items.join(", "));
        }
    }
    if !module.globals_in_order().is_empty() {
        out.push('\n');
    }
    for (i, &f) in module.funcs_in_order().iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        print_func(module, f, &mut out);
    }
    out
}

fn print_func(module: &Module, id: FuncId, out: &mut String) {
    let func = module.funcs.get(id);
    let mut params: Vec<String> = func.params.iter().map(|p| format!("{} %{}", p.ty, p.name)).collect();
    if func.is_variadic {
        params.push("...".to_string());
    }
    if func.is_declaration {
        let _ = writeln!(out, "declare {} @{}({})", func.ret_ty, func.name, params.join(", "));
        return;
    }
    let _ = writeln!(out, "define {} @{}({}) {{", func.ret_ty, func.name, params.join(", "));
    for block in func.block_order() {
        let b = func.blocks.get(block);
        let _ = writeln!(out, "{}:", b.name);
        for inst in func.inst_order(block) {
            print_inst(module, func, inst, out);
        }
    }
    let _ = writeln!(out, "}}");
}

fn operand_str(module: &Module, func: &FuncData, kind: OperandKind) -> String {
    match kind {
        OperandKind::Const(c) => c.to_string(),
        OperandKind::Inst(i) => format!("%{}", i.index()),
        OperandKind::Param(v) => {
            let ValueKind::Param { index, .. } = func.values.get(v).kind;
            func.params.get(index as usize).map(|p| format!("%{}", p.name)).unwrap_or_default()
        }
        OperandKind::Global(g) => format!("@{}", module.globals.get(g).name),
        OperandKind::Function(f) => format!("@{}", module.funcs.get(f).name),
        OperandKind::Removed => "<removed>".to_string(),
    }
}

fn print_inst(module: &Module, func: &FuncData, id: InstId, out: &mut String) {
    let inst: &InstData = func.insts.get(id);
    let ops: Vec<String> = inst.operands.iter().map(|slot| operand_str(module, func, slot.kind)).collect();
    let dest = if inst.defines_value() { format!("%{} = ", id.index()) } else { String::new() };
    match inst.opcode {
        Opcode::Alloca => {
            let _ = writeln!(out, "  {dest}alloca {}", inst.ty.pointee());
        }
        Opcode::Load => {
            let _ = writeln!(out, "  {dest}load {}, {}* {}", inst.ty, inst.ty, ops[0]);
        }
        Opcode::Store => {
            let _ = writeln!(out, "  store {} {}, {}* {}", inst.ty, ops[0], inst.ty, ops[1]);
        }
        Opcode::Binary(op) => {
            let _ = writeln!(out, "  {dest}{op} {} {}, {}", inst.ty, ops[0], ops[1]);
        }
        Opcode::ICmp(pred) => {
            let _ = writeln!(out, "  {dest}icmp {pred} {}, {}", ops[0], ops[1]);
        }
        Opcode::FCmp(pred) => {
            let _ = writeln!(out, "  {dest}fcmp {pred} {}, {}", ops[0], ops[1]);
        }
        Opcode::Cast(op) => {
            let _ = writeln!(out, "  {dest}{op} {} to {}", ops[0], inst.ty);
        }
        Opcode::GetElementPtr => {
            let _ = writeln!(out, "  {dest}getelementptr {}, {}", ops[0], ops[1..].join(", "));
        }
        Opcode::Call => {
            let _ = writeln!(out, "  {dest}call {} {}({})", inst.ty, ops[0], ops[1..].join(", "));
        }
        Opcode::Br => {
            let target = func.blocks.get(inst.targets[0]).name.clone();
            let _ = writeln!(out, "  br label %{target}");
        }
        Opcode::CondBr => {
            let t = func.blocks.get(inst.targets[0]).name.clone();
            let e = func.blocks.get(inst.targets[1]).name.clone();
            let _ = writeln!(out, "  br i1 {}, label %{t}, label %{e}", ops[0]);
        }
        Opcode::Ret => {
            if ops.is_empty() {
                let _ = writeln!(out, "  ret void");
            } else {
                let _ = writeln!(out, "  ret {} {}", inst.ty, ops[0]);
            }
        }
        Opcode::Phi => {
            let preds = &func.blocks.get(inst.block).preds;
            let pairs: Vec<String> = ops
                .iter()
                .zip(preds.iter())
                .map(|(v, p)| format!("[ {}, %{} ]", v, func.blocks.get(*p).name))
                .collect();
            let _ = writeln!(out, "  {dest}phi {} {}", inst.ty, pairs.join(", "));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::Builder;
    use crate::ir::function::FuncData;
    use crate::ir::instruction::BinOp;
    use crate::ir::types::Type;
    use crate::ir::value::Const;

    #[test]
    fn prints_a_trivial_function() {
        let mut module = Module::new();
        let f = module.add_func(FuncData::new("main".into(), Type::i32()));
        let mut b = Builder::new(&mut module, f);
        let entry = b.create_block("entry");
        let add = b.append(
            entry,
            Opcode::Binary(BinOp::Add),
            Type::i32(),
            vec![OperandKind::Const(Const::I32(1)), OperandKind::Const(Const::I32(2))],
        );
        b.append(entry, Opcode::Ret, Type::i32(), vec![OperandKind::Inst(add)]);

        let text = print_module(&module);
        assert!(text.contains("define i32 @main()"));
        assert!(text.contains("add i32 1, 2"));
        assert!(text.contains("ret i32"));
    }
}
