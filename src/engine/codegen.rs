//! Lowering from the typed tree to VM bytecode.

use crate::runtime::ops::{CompiledFunction, Op};
use crate::runtime::value::Value;
use crate::sema::tir::{Expr, ExprKind, Function, Module, Place, Root, Stmt};
use crate::sema::types::{PrimitiveType, Type};
use crate::syntax::ast::{BinaryOp, EndpointKind};

/// Compile every function in `module`. Function ids are preserved.
pub fn compile_module(module: &Module, optimisation_level: u8) -> Vec<CompiledFunction> {
    module
        .functions
        .iter()
        .map(|f| {
            FunctionBuilder::new(module, optimisation_level > 0).compile(f)
        })
        .collect()
}

#[derive(Default)]
struct LoopLabels {
    breaks: Vec<usize>,
    continues: Vec<usize>,
}

struct FunctionBuilder<'m> {
    module: &'m Module,
    fold: bool,
    code: Vec<Op>,
    loops: Vec<LoopLabels>,
}

impl<'m> FunctionBuilder<'m> {
    fn new(module: &'m Module, fold: bool) -> Self {
        Self {
            module,
            fold,
            code: Vec::new(),
            loops: Vec::new(),
        }
    }

    fn compile(mut self, f: &Function) -> CompiledFunction {
        self.block(&f.body);
        if !f.return_type.is_void() {
            // unreachable once checked, but keeps the frame well formed
            self.emit(Op::Const(f.return_type.default_value()));
        }
        self.emit(Op::Return);

        let max_depth = self.max_depth();
        CompiledFunction {
            name: f.name.clone(),
            code: self.code,
            num_params: f.params.len(),
            num_locals: f.locals.len().max(f.params.len()),
            ref_params: f
                .params
                .iter()
                .enumerate()
                .filter(|(_, p)| p.is_ref)
                .map(|(i, _)| i)
                .collect(),
            returns_value: !f.return_type.is_void(),
            max_depth,
        }
    }

    fn emit(&mut self, op: Op) -> usize {
        self.code.push(op);
        self.code.len() - 1
    }

    fn here(&self) -> usize {
        self.code.len()
    }

    fn patch(&mut self, at: usize, target: usize) {
        match &mut self.code[at] {
            Op::Jump(t) | Op::JumpIfFalse(t) => *t = target,
            _ => {}
        }
    }

    // ---- statements ------------------------------------------------------

    fn block(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Eval(e) => {
                self.expr(e);
                if !e.ty.is_void() {
                    self.emit(Op::Pop);
                }
            }
            Stmt::Assign { target, value } => {
                self.expr(value);
                self.store(target);
            }
            Stmt::Write {
                endpoint,
                kind,
                value,
            } => {
                self.expr(value);
                self.emit(match kind {
                    EndpointKind::Stream => Op::WriteStream(*endpoint),
                    EndpointKind::Value => Op::WriteValue(*endpoint),
                    EndpointKind::Event => Op::WriteEvent(*endpoint),
                });
            }
            Stmt::WriteConsole(e) => {
                self.expr(e);
                self.emit(Op::WriteConsole);
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                self.expr(cond);
                let skip_then = self.emit(Op::JumpIfFalse(0));
                self.block(then);
                if otherwise.is_empty() {
                    let end = self.here();
                    self.patch(skip_then, end);
                } else {
                    let skip_else = self.emit(Op::Jump(0));
                    let else_start = self.here();
                    self.patch(skip_then, else_start);
                    self.block(otherwise);
                    let end = self.here();
                    self.patch(skip_else, end);
                }
            }
            Stmt::Loop { cond, body, step } => {
                let start = self.here();
                let exit = cond.as_ref().map(|c| {
                    self.expr(c);
                    self.emit(Op::JumpIfFalse(0))
                });
                self.loops.push(LoopLabels::default());
                self.block(body);
                let continue_target = self.here();
                self.block(step);
                self.emit(Op::Jump(start));
                let end = self.here();
                self.close_loop(continue_target, end);
                if let Some(exit) = exit {
                    self.patch(exit, end);
                }
            }
            Stmt::Repeat {
                counter,
                count,
                body,
            } => {
                self.expr(count);
                self.emit(Op::StoreLocal(*counter));
                let start = self.here();
                self.emit(Op::LoadLocal(*counter));
                self.emit(Op::Const(count.ty.default_value()));
                self.emit(Op::Binary(BinaryOp::Gt));
                let exit = self.emit(Op::JumpIfFalse(0));
                self.loops.push(LoopLabels::default());
                self.block(body);
                let continue_target = self.here();
                self.emit(Op::LoadLocal(*counter));
                self.emit(Op::Const(step_value(&count.ty, 1)));
                self.emit(Op::Binary(BinaryOp::Sub));
                self.emit(Op::StoreLocal(*counter));
                self.emit(Op::Jump(start));
                let end = self.here();
                self.close_loop(continue_target, end);
                self.patch(exit, end);
            }
            Stmt::Break => {
                let at = self.emit(Op::Jump(0));
                if let Some(labels) = self.loops.last_mut() {
                    labels.breaks.push(at);
                }
            }
            Stmt::Continue => {
                let at = self.emit(Op::Jump(0));
                if let Some(labels) = self.loops.last_mut() {
                    labels.continues.push(at);
                }
            }
            Stmt::Return(value) => {
                if let Some(v) = value {
                    self.expr(v);
                }
                self.emit(Op::Return);
            }
            Stmt::Advance => {
                self.emit(Op::Advance);
            }
        }
    }

    fn close_loop(&mut self, continue_target: usize, end: usize) {
        if let Some(labels) = self.loops.pop() {
            for at in labels.breaks {
                self.patch(at, end);
            }
            for at in labels.continues {
                self.patch(at, continue_target);
            }
        }
    }

    /// Store the value on top of the stack into `place`.
    fn store(&mut self, place: &Place) {
        if place.indices.is_empty() {
            self.emit(match place.root {
                Root::Local(slot) => Op::StoreLocal(slot),
                Root::State(slot) => Op::StoreState(slot),
            });
            return;
        }
        for index in &place.indices {
            self.expr(index);
        }
        let depth = place.indices.len();
        self.emit(match place.root {
            Root::Local(slot) => Op::StoreLocalElement { slot, depth },
            Root::State(slot) => Op::StoreStateElement { slot, depth },
        });
    }

    // ---- expressions -----------------------------------------------------

    fn expr(&mut self, e: &Expr) {
        if self.fold && !e.is_constant() {
            if let Some(v) = e.fold() {
                self.emit(Op::Const(v));
                return;
            }
        }

        match &e.kind {
            ExprKind::Constant(v) => {
                self.emit(Op::Const(v.clone()));
            }
            ExprKind::Local(slot) => {
                self.emit(Op::LoadLocal(*slot));
            }
            ExprKind::State(slot) => {
                self.emit(Op::LoadState(*slot));
            }
            ExprKind::External(i) => {
                self.emit(Op::LoadExternal(*i));
            }
            ExprKind::Input(i) => {
                self.emit(Op::ReadInput(*i));
            }
            ExprKind::Property(p) => {
                self.emit(Op::Property(*p));
            }
            ExprKind::Index { object, index } => match element_path(e) {
                Some((root, indices)) => {
                    for index in &indices {
                        self.expr(index);
                    }
                    let depth = indices.len();
                    self.emit(match root {
                        Root::Local(slot) => Op::LoadLocalElement { slot, depth },
                        Root::State(slot) => Op::LoadStateElement { slot, depth },
                    });
                }
                None => {
                    self.expr(object);
                    self.expr(index);
                    self.emit(Op::Index);
                }
            },
            ExprKind::Call {
                function,
                args,
                writeback,
            } => {
                for arg in args {
                    self.expr(arg);
                }
                self.emit(Op::Call(*function));
                // reference results come back in parameter order, last on top
                for place in writeback.iter().rev().flatten() {
                    self.store(place);
                }
            }
            ExprKind::Intrinsic { intrinsic, args } => {
                for arg in args {
                    self.expr(arg);
                }
                self.emit(Op::Intrinsic {
                    intrinsic: *intrinsic,
                    argc: args.len(),
                });
            }
            ExprKind::Construct(items) => {
                for item in items {
                    self.expr(item);
                }
                self.emit(Op::Construct {
                    ty: e.ty.clone(),
                    count: items.len(),
                });
            }
            ExprKind::Cast(inner) => {
                self.expr(inner);
                self.emit(Op::Cast(e.ty.clone()));
            }
            ExprKind::Unary { op, operand } => {
                self.expr(operand);
                self.emit(Op::Unary(*op));
            }
            ExprKind::Binary { op, lhs, rhs } => {
                self.expr(lhs);
                self.expr(rhs);
                self.emit(Op::Binary(*op));
            }
            ExprKind::And(lhs, rhs) => {
                self.expr(lhs);
                let short = self.emit(Op::JumpIfFalse(0));
                self.expr(rhs);
                let done = self.emit(Op::Jump(0));
                let false_branch = self.here();
                self.patch(short, false_branch);
                self.emit(Op::Const(Value::Bool(false)));
                let end = self.here();
                self.patch(done, end);
            }
            ExprKind::Or(lhs, rhs) => {
                self.expr(lhs);
                let to_rhs = self.emit(Op::JumpIfFalse(0));
                self.emit(Op::Const(Value::Bool(true)));
                let done = self.emit(Op::Jump(0));
                let rhs_start = self.here();
                self.patch(to_rhs, rhs_start);
                self.expr(rhs);
                let end = self.here();
                self.patch(done, end);
            }
            ExprKind::Ternary {
                cond,
                then,
                otherwise,
            } => {
                self.expr(cond);
                let to_else = self.emit(Op::JumpIfFalse(0));
                self.expr(then);
                let done = self.emit(Op::Jump(0));
                let else_start = self.here();
                self.patch(to_else, else_start);
                self.expr(otherwise);
                let end = self.here();
                self.patch(done, end);
            }
            ExprKind::Update {
                target,
                delta,
                prefix,
            } => {
                self.expr(&target.to_expr());
                if !prefix {
                    self.emit(Op::Dup);
                }
                self.emit(Op::Const(step_value(&target.ty, *delta)));
                self.emit(Op::Binary(BinaryOp::Add));
                if *prefix {
                    self.emit(Op::Dup);
                }
                self.store(target);
            }
        }
    }

    /// Conservative bound on operand stack growth, scanning straight through
    /// the code. Branches that each push one value are counted twice.
    fn max_depth(&self) -> usize {
        let mut depth: isize = 0;
        let mut max: isize = 0;
        for op in &self.code {
            depth += self.stack_effect(op);
            depth = depth.max(0);
            max = max.max(depth);
        }
        max as usize
    }

    fn stack_effect(&self, op: &Op) -> isize {
        match op {
            Op::Const(_)
            | Op::LoadLocal(_)
            | Op::LoadState(_)
            | Op::LoadExternal(_)
            | Op::ReadInput(_)
            | Op::Property(_)
            | Op::Dup => 1,
            Op::StoreLocal(_)
            | Op::StoreState(_)
            | Op::WriteStream(_)
            | Op::WriteValue(_)
            | Op::WriteEvent(_)
            | Op::WriteConsole
            | Op::Index
            | Op::Binary(_)
            | Op::JumpIfFalse(_)
            | Op::Pop => -1,
            Op::LoadLocalElement { depth, .. } | Op::LoadStateElement { depth, .. } => {
                1 - *depth as isize
            }
            Op::StoreLocalElement { depth, .. } | Op::StoreStateElement { depth, .. } => {
                -(*depth as isize) - 1
            }
            Op::Construct { count, .. } => 1 - *count as isize,
            Op::Intrinsic { argc, .. } => 1 - *argc as isize,
            Op::Call(id) => {
                let f = &self.module.functions[*id];
                let results =
                    usize::from(!f.return_type.is_void()) + f.params.iter().filter(|p| p.is_ref).count();
                results as isize - f.params.len() as isize
            }
            Op::Unary(_) | Op::Cast(_) | Op::Jump(_) | Op::Advance | Op::Return => 0,
        }
    }
}

/// The variable under a chain of index expressions and the indices applied
/// to it, outermost first. `None` when the chain ends in a temporary.
fn element_path(e: &Expr) -> Option<(Root, Vec<&Expr>)> {
    let mut indices = Vec::new();
    let mut current = e;
    let root = loop {
        match &current.kind {
            ExprKind::Index { object, index } => {
                indices.push(index.as_ref());
                current = object;
            }
            ExprKind::Local(slot) => break Root::Local(*slot),
            ExprKind::State(slot) => break Root::State(*slot),
            _ => return None,
        }
    };
    indices.reverse();
    Some((root, indices))
}

/// `delta` in the representation of `ty`.
fn step_value(ty: &Type, delta: i8) -> Value {
    match ty {
        Type::Primitive(PrimitiveType::Int64) => Value::Int64(i64::from(delta)),
        Type::Primitive(PrimitiveType::Float32) => Value::Float32(f32::from(delta)),
        Type::Primitive(PrimitiveType::Float64) => Value::Float64(f64::from(delta)),
        _ => Value::Int32(i32::from(delta)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema;
    use crate::syntax::parse_unit;

    fn compile(src: &str, level: u8) -> (Module, Vec<CompiledFunction>) {
        let unit = parse_unit(src, None).unwrap();
        let module = sema::analyse(&[unit]).unwrap();
        let functions = compile_module(&module, level);
        (module, functions)
    }

    fn find<'a>(functions: &'a [CompiledFunction], name: &str) -> &'a CompiledFunction {
        functions.iter().find(|f| f.name == name).unwrap()
    }

    #[test]
    fn constant_expressions_fold_when_optimising() {
        let src = "namespace n { int f() { return 2 * 3 + 1; } }";
        let (_, folded) = compile(src, 3);
        assert_eq!(
            find(&folded, "f").code,
            vec![
                Op::Const(Value::Int32(7)),
                Op::Return,
                Op::Const(Value::Int32(0)),
                Op::Return
            ]
        );

        let (_, plain) = compile(src, 0);
        assert!(find(&plain, "f").code.contains(&Op::Binary(BinaryOp::Mul)));
    }

    #[test]
    fn main_contains_advance() {
        let (_, functions) = compile(
            "processor P { output stream float out; void main() { loop { out <- 1.0f; advance(); } } }",
            3,
        );
        let main = find(&functions, "main");
        assert!(main.code.contains(&Op::Advance));
        assert!(main.code.contains(&Op::WriteStream(0)));
    }

    #[test]
    fn reference_parameters_are_recorded() {
        let (_, functions) = compile(
            "namespace n { void inc(int& x) { x++; } void f() { int a = 1; inc(a); } }",
            3,
        );
        assert_eq!(find(&functions, "inc").ref_params, vec![0]);
        let f = find(&functions, "f");
        let call = f.code.iter().position(|op| *op == Op::Call(0)).unwrap();
        assert_eq!(f.code[call + 1], Op::StoreLocal(0));
    }

    #[test]
    fn array_reads_index_in_place() {
        let (_, functions) = compile(
            "processor P { output stream float out; float[48000] buf; int i;
                void main() { loop { out <- buf[i]; buf[i] = 1.0f; i = (i + 1) % 48000; advance(); } } }",
            0,
        );
        let main = find(&functions, "main");
        assert!(main.code.contains(&Op::LoadStateElement { slot: 0, depth: 1 }));
        assert!(!main.code.contains(&Op::LoadState(0)));
        assert!(!main.code.contains(&Op::Index));

        let (_, functions) = compile(
            "namespace n { int f() { int[2][3] a; a[1][2] = 5; return a[1][2] + int[2](4, 6)[1]; } }",
            0,
        );
        let f = find(&functions, "f");
        assert!(f.code.contains(&Op::LoadLocalElement { slot: 0, depth: 2 }));
        // a temporary still goes through a plain index
        assert!(f.code.contains(&Op::Index));
    }

    #[test]
    fn depth_accounts_for_nested_expressions() {
        let (_, functions) = compile(
            "namespace n { int f(int a, int b, int c) { return a + (b * (c - a)); } }",
            0,
        );
        assert_eq!(find(&functions, "f").max_depth, 4);
    }
}
