//! Stack-based bytecode interpreter.
//!
//! Each processor instance runs its `main` on a [`Fiber`]: a value stack plus
//! explicit call frames, so executing `advance()` simply returns to the caller
//! with the frames intact and the next [`Fiber::resume`] continues from there.

use thiserror::Error;

use super::ops::{CompiledFunction, FunctionId, Op, ProcessorProperty};
use super::value::Value;
use crate::sema::types::Type;

/// Instructions one resume may execute before it is considered stuck.
pub const DEFAULT_INSTRUCTION_BUDGET: u64 = 5_000_000;

/// An unrecoverable error raised while executing bytecode.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Fault {
    #[error("Integer division by zero")]
    DivideByZero,

    #[error("Instruction limit exceeded before reaching advance()")]
    BudgetExhausted,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why [`Fiber::resume`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Suspended at `advance()`.
    Advanced,
    /// The entry function returned.
    Finished,
}

/// Read-only per-instance properties.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Properties {
    pub frequency: f64,
    pub id: i32,
    pub session: i32,
}

impl Properties {
    fn get(&self, property: ProcessorProperty) -> Value {
        match property {
            ProcessorProperty::Frequency => Value::Float64(self.frequency),
            ProcessorProperty::Period => Value::Float64(1.0 / self.frequency),
            ProcessorProperty::Id => Value::Int32(self.id),
            ProcessorProperty::Session => Value::Int32(self.session),
        }
    }
}

/// Everything bytecode can touch besides its own stack.
pub struct Context<'a> {
    pub state: &'a mut [Value],
    pub externals: &'a [Value],
    /// Current frame's stream and value inputs.
    pub inputs: &'a [Value],
    /// Stream accumulators and current value outputs.
    pub outputs: &'a mut [Value],
    /// Events written this frame, as `(output endpoint, payload)`.
    pub events: &'a mut Vec<(usize, Value)>,
    pub console: &'a mut Vec<Value>,
    pub properties: Properties,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    function: FunctionId,
    pc: usize,
    base: usize,
}

/// A suspended or runnable thread of bytecode.
#[derive(Debug, Clone, Default)]
pub struct Fiber {
    stack: Vec<Value>,
    frames: Vec<Frame>,
}

impl Fiber {
    pub fn new(functions: &[CompiledFunction], entry: FunctionId, args: Vec<Value>) -> Self {
        let mut fiber = Self::default();
        fiber.restart(functions, entry, args);
        fiber
    }

    /// Discard any current activation and prepare to run `entry`, keeping
    /// the allocations.
    pub fn restart(&mut self, functions: &[CompiledFunction], entry: FunctionId, args: Vec<Value>) {
        self.stack.clear();
        self.frames.clear();
        self.stack.extend(args);
        let locals = functions[entry].num_locals;
        if self.stack.len() < locals {
            self.stack.resize(locals, Value::Void);
        }
        self.frames.push(Frame {
            function: entry,
            pc: 0,
            base: 0,
        });
    }

    pub fn is_finished(&self) -> bool {
        self.frames.is_empty()
    }

    /// Values left behind by a finished entry function.
    pub fn results(&self) -> &[Value] {
        &self.stack
    }

    /// Run until `advance()`, completion, a fault or the budget runs out.
    pub fn resume(
        &mut self,
        functions: &[CompiledFunction],
        ctx: &mut Context<'_>,
        budget: u64,
    ) -> Result<Status, Fault> {
        let mut remaining = budget;
        loop {
            let Some(frame) = self.frames.last_mut() else {
                return Ok(Status::Finished);
            };
            let function = &functions[frame.function];
            let Some(op) = function.code.get(frame.pc) else {
                return Err(Fault::Internal(format!(
                    "execution ran past the end of '{}'",
                    function.name
                )));
            };
            frame.pc += 1;
            let base = frame.base;

            if remaining == 0 {
                return Err(Fault::BudgetExhausted);
            }
            remaining -= 1;

            match op {
                Op::Const(v) => self.stack.push(v.clone()),
                Op::LoadLocal(slot) => {
                    let v = self.local(base + slot)?.clone();
                    self.stack.push(v);
                }
                Op::StoreLocal(slot) => {
                    let v = self.pop()?;
                    *self.local_mut(base + slot)? = v;
                }
                Op::LoadLocalElement { slot, depth } => {
                    let indices = self.pop_indices(*depth)?;
                    let v = self.local(base + slot)?.get_at(&indices)?.clone();
                    self.stack.push(v);
                }
                Op::StoreLocalElement { slot, depth } => {
                    let indices = self.pop_indices(*depth)?;
                    let v = self.pop()?;
                    self.local_mut(base + slot)?.set_at(&indices, v)?;
                }
                Op::LoadState(slot) => {
                    let v = slot_ref(ctx.state, *slot)?.clone();
                    self.stack.push(v);
                }
                Op::StoreState(slot) => {
                    let v = self.pop()?;
                    *slot_mut(ctx.state, *slot)? = v;
                }
                Op::LoadStateElement { slot, depth } => {
                    let indices = self.pop_indices(*depth)?;
                    let v = slot_ref(ctx.state, *slot)?.get_at(&indices)?.clone();
                    self.stack.push(v);
                }
                Op::StoreStateElement { slot, depth } => {
                    let indices = self.pop_indices(*depth)?;
                    let v = self.pop()?;
                    slot_mut(ctx.state, *slot)?.set_at(&indices, v)?;
                }
                Op::LoadExternal(i) => self.stack.push(slot_ref(ctx.externals, *i)?.clone()),
                Op::ReadInput(i) => self.stack.push(slot_ref(ctx.inputs, *i)?.clone()),
                Op::WriteStream(i) => {
                    let v = self.pop()?;
                    slot_mut(ctx.outputs, *i)?.accumulate(&v)?;
                }
                Op::WriteValue(i) => {
                    let v = self.pop()?;
                    *slot_mut(ctx.outputs, *i)? = v;
                }
                Op::WriteEvent(i) => {
                    let v = self.pop()?;
                    ctx.events.push((*i, v));
                }
                Op::WriteConsole => {
                    let v = self.pop()?;
                    ctx.console.push(v);
                }
                Op::Property(p) => self.stack.push(ctx.properties.get(*p)),
                Op::Index => {
                    let index = self.pop()?;
                    let object = self.pop()?;
                    let i = index
                        .as_i64()
                        .ok_or_else(|| Fault::Internal(format!("non-integer index {index}")))?;
                    self.stack.push(object.index(i)?);
                }
                Op::Unary(op) => {
                    let v = self.pop()?;
                    self.stack.push(Value::unary(*op, &v)?);
                }
                Op::Binary(op) => {
                    let rhs = self.pop()?;
                    let lhs = self.pop()?;
                    self.stack.push(Value::binary(*op, &lhs, &rhs)?);
                }
                Op::Cast(ty) => {
                    let v = self.pop()?;
                    let converted = v
                        .cast(ty)
                        .ok_or_else(|| Fault::Internal(format!("cannot convert {v} to {ty}")))?;
                    self.stack.push(converted);
                }
                Op::Construct { ty, count } => {
                    let items = self.pop_many(*count)?;
                    self.stack.push(match ty {
                        Type::Vector(..) => Value::Vector(items),
                        _ => Value::Array(items),
                    });
                }
                Op::Intrinsic { intrinsic, argc } => {
                    let args = self.pop_many(*argc)?;
                    self.stack.push(intrinsic.evaluate(&args)?);
                }
                Op::Call(callee) => {
                    let f = &functions[*callee];
                    let base = self
                        .stack
                        .len()
                        .checked_sub(f.num_params)
                        .ok_or_else(underflow)?;
                    self.stack.resize(base + f.num_locals, Value::Void);
                    self.frames.push(Frame {
                        function: *callee,
                        pc: 0,
                        base,
                    });
                }
                Op::Jump(target) => self.jump(*target),
                Op::JumpIfFalse(target) => {
                    let cond = self.pop()?;
                    if !cond.as_bool().unwrap_or(false) {
                        self.jump(*target);
                    }
                }
                Op::Pop => {
                    self.pop()?;
                }
                Op::Dup => {
                    let v = self.stack.last().ok_or_else(underflow)?.clone();
                    self.stack.push(v);
                }
                Op::Advance => return Ok(Status::Advanced),
                Op::Return => {
                    let result = if function.returns_value {
                        Some(self.pop()?)
                    } else {
                        None
                    };
                    let mut refs = Vec::with_capacity(function.ref_params.len());
                    for slot in &function.ref_params {
                        refs.push(self.local(base + slot)?.clone());
                    }
                    self.stack.truncate(base);
                    self.stack.extend(result);
                    self.stack.extend(refs);
                    self.frames.pop();
                }
            }
        }
    }

    /// Run a function that must not suspend, such as an event handler.
    pub fn run_to_completion(
        &mut self,
        functions: &[CompiledFunction],
        ctx: &mut Context<'_>,
        budget: u64,
    ) -> Result<(), Fault> {
        match self.resume(functions, ctx, budget)? {
            Status::Finished => Ok(()),
            Status::Advanced => Err(Fault::Internal(
                "advance() called outside of main()".into(),
            )),
        }
    }

    fn jump(&mut self, target: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.pc = target;
        }
    }

    fn pop(&mut self) -> Result<Value, Fault> {
        self.stack.pop().ok_or_else(underflow)
    }

    /// Pop `n` values, returned in push order.
    fn pop_many(&mut self, n: usize) -> Result<Vec<Value>, Fault> {
        let start = self.stack.len().checked_sub(n).ok_or_else(underflow)?;
        Ok(self.stack.split_off(start))
    }

    fn pop_indices(&mut self, depth: usize) -> Result<Vec<i64>, Fault> {
        self.pop_many(depth)?
            .iter()
            .map(|v| {
                v.as_i64()
                    .ok_or_else(|| Fault::Internal(format!("non-integer index {v}")))
            })
            .collect()
    }

    fn local(&self, index: usize) -> Result<&Value, Fault> {
        slot_ref(&self.stack, index)
    }

    fn local_mut(&mut self, index: usize) -> Result<&mut Value, Fault> {
        slot_mut(&mut self.stack, index)
    }
}

fn underflow() -> Fault {
    Fault::Internal("stack underflow".into())
}

fn slot_ref(values: &[Value], index: usize) -> Result<&Value, Fault> {
    values
        .get(index)
        .ok_or_else(|| Fault::Internal(format!("slot {index} out of range")))
}

fn slot_mut(values: &mut [Value], index: usize) -> Result<&mut Value, Fault> {
    values
        .get_mut(index)
        .ok_or_else(|| Fault::Internal(format!("slot {index} out of range")))
}
