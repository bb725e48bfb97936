//! External computation bridge (C12): the calling convention an
//! `external_computation` IR node uses to invoke a natively-linked
//! function over strided views into the run's buffers.
//!
//! Grounded in the reference compiler's `external_computations.cpp/h`,
//! which packs each argument into a `{base_ptr, stride, count}` view and
//! calls a DLL-exported `void fn(Value_Access*)`. Here the DLL-export
//! table becomes a `HashMap<String, ExternalFn>` a host program
//! populates before a run; no dynamic loading is performed (an
//! out-of-scope collaborator per the external-computation module's own
//! scope note).

use std::collections::HashMap;

/// A strided, bounded view into a run's `f64` buffer, standing in for
/// the original's raw `{pointer, stride, count}` struct. Bit
/// reinterpretation (`to_bits`/`from_bits`) is used for the bool/int
/// accessors rather than a pointer cast, to stay in safe Rust while
/// preserving the same storage layout convention.
pub struct ValueAccess<'a> {
    data: &'a mut [f64],
    stride: usize,
    count: usize,
}

impl<'a> ValueAccess<'a> {
    #[must_use]
    pub fn new(data: &'a mut [f64], stride: usize, count: usize) -> Self {
        ValueAccess { data, stride, count }
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    fn slot(&self, index: usize) -> usize {
        index * self.stride.max(1)
    }

    #[must_use]
    pub fn at(&self, index: usize) -> f64 {
        self.data[self.slot(index)]
    }

    pub fn set(&mut self, index: usize, value: f64) {
        let slot = self.slot(index);
        self.data[slot] = value;
    }

    #[must_use]
    pub fn int_at(&self, index: usize) -> i64 {
        self.at(index).to_bits() as i64
    }

    pub fn set_int(&mut self, index: usize, value: i64) {
        let slot = self.slot(index);
        self.data[slot] = f64::from_bits(value as u64);
    }

    #[must_use]
    pub fn bool_at(&self, index: usize) -> bool {
        self.int_at(index) != 0
    }

    pub fn set_bool(&mut self, index: usize, value: bool) {
        self.set_int(index, i64::from(value));
    }
}

/// A natively-linked external computation: given the per-argument
/// views constructed for one call, mutates whichever are output views.
pub type ExternalFn = Box<dyn Fn(&mut [ValueAccess<'_>]) + Send + Sync>;

/// The DLL-export-table analogue: maps an `external_computation`
/// node's `function_name` to the function a host program registered
/// for it.
#[derive(Default)]
pub struct ExternalRegistry {
    functions: HashMap<String, ExternalFn>,
}

impl ExternalRegistry {
    #[must_use]
    pub fn new() -> Self {
        ExternalRegistry::default()
    }

    pub fn register(&mut self, name: impl Into<String>, func: ExternalFn) {
        self.functions.insert(name.into(), func);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ExternalFn> {
        self.functions.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_access_reads_strided_elements() {
        let mut data = vec![1.0, 0.0, 2.0, 0.0, 3.0, 0.0];
        let view = ValueAccess::new(&mut data, 2, 3);
        assert_eq!(view.at(0), 1.0);
        assert_eq!(view.at(1), 2.0);
        assert_eq!(view.at(2), 3.0);
    }

    #[test]
    fn value_access_round_trips_bool_and_int() {
        let mut data = vec![0.0, 0.0];
        let mut view = ValueAccess::new(&mut data, 1, 2);
        view.set_bool(0, true);
        view.set_int(1, 42);
        assert!(view.bool_at(0));
        assert_eq!(view.int_at(1), 42);
    }

    #[test]
    fn registry_dispatches_registered_function() {
        let mut registry = ExternalRegistry::new();
        registry.register(
            "double_first",
            Box::new(|views: &mut [ValueAccess<'_>]| {
                let v = views[0].at(0);
                views[0].set(0, v * 2.0);
            }),
        );
        let mut data = vec![21.0];
        let mut views = vec![ValueAccess::new(&mut data, 1, 1)];
        (registry.get("double_first").unwrap())(&mut views);
        assert_eq!(views[0].at(0), 42.0);
    }

    #[test]
    fn unregistered_function_is_absent() {
        let registry = ExternalRegistry::new();
        assert!(!registry.contains("missing"));
    }
}
