//! Input staging between the caller and the performer: event FIFOs and
//! ramped value inputs.

use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use super::value::Value;
use crate::sema::types::Type;

/// Bounded FIFO of events waiting for the next block.
pub struct EventQueue {
    producer: HeapProd<Value>,
    consumer: HeapCons<Value>,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        let (producer, consumer) = HeapRb::<Value>::new(capacity.max(1)).split();
        Self { producer, consumer }
    }

    /// Queue an event. Returns `false` and drops it when the queue is full.
    pub fn push(&mut self, event: Value) -> bool {
        self.producer.try_push(event).is_ok()
    }

    /// Move every queued event into `out`, oldest first.
    pub fn drain_into(&mut self, out: &mut Vec<Value>) {
        while let Some(event) = self.consumer.try_pop() {
            out.push(event);
        }
    }

    pub fn clear(&mut self) {
        while self.consumer.try_pop().is_some() {}
    }
}

/// A value input that moves linearly towards its target.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueRamp {
    ty: Type,
    current: Value,
    target: Value,
    step: f64,
    remaining: u32,
}

impl ValueRamp {
    pub fn new(ty: Type) -> Self {
        let initial = ty.default_value();
        Self {
            ty,
            current: initial.clone(),
            target: initial,
            step: 0.0,
            remaining: 0,
        }
    }

    /// Start moving to `target`, arriving after `frames` frames. Only float
    /// scalars ramp; anything else, or `frames == 0`, jumps immediately.
    pub fn set_target(&mut self, target: Value, frames: u32) {
        let ramps = self.ty.is_float() && frames > 0;
        match (ramps, self.current.as_f64(), target.as_f64()) {
            (true, Some(from), Some(to)) => {
                self.step = (to - from) / f64::from(frames);
                self.remaining = frames;
                self.target = target;
            }
            _ => {
                self.current = target.clone();
                self.target = target;
                self.remaining = 0;
            }
        }
    }

    /// Advance one frame and return the value for that frame.
    pub fn next_frame(&mut self) -> &Value {
        if self.remaining > 0 {
            self.remaining -= 1;
            if self.remaining == 0 {
                self.current = self.target.clone();
            } else if let Some(now) = self.current.as_f64() {
                self.current = Value::Float64(now + self.step)
                    .cast(&self.ty)
                    .unwrap_or_else(|| self.target.clone());
            }
        }
        &self.current
    }

    pub fn current(&self) -> &Value {
        &self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn queue_drops_when_full() {
        let mut queue = EventQueue::new(2);
        assert!(queue.push(Value::Int32(1)));
        assert!(queue.push(Value::Int32(2)));
        assert!(!queue.push(Value::Int32(3)));

        let mut out = Vec::new();
        queue.drain_into(&mut out);
        assert_eq!(out, vec![Value::Int32(1), Value::Int32(2)]);
        assert!(queue.push(Value::Int32(4)));
    }

    #[test]
    fn ramp_reaches_target_exactly() {
        let mut ramp = ValueRamp::new(Type::FLOAT32);
        ramp.set_target(Value::Float32(1.0), 4);
        let frames: Vec<f64> = (0..4).map(|_| ramp.next_frame().as_f64().unwrap()).collect();
        assert_approx_eq!(frames[0], 0.25);
        assert_approx_eq!(frames[1], 0.5);
        assert_approx_eq!(frames[2], 0.75);
        assert_eq!(frames[3], 1.0);
        assert_eq!(ramp.next_frame(), &Value::Float32(1.0));
    }

    #[test]
    fn zero_frames_is_immediate() {
        let mut ramp = ValueRamp::new(Type::FLOAT64);
        ramp.set_target(Value::Float64(3.0), 0);
        assert_eq!(ramp.next_frame(), &Value::Float64(3.0));
    }

    #[test]
    fn integers_do_not_ramp() {
        let mut ramp = ValueRamp::new(Type::INT32);
        ramp.set_target(Value::Int32(10), 100);
        assert_eq!(ramp.next_frame(), &Value::Int32(10));
    }
}
