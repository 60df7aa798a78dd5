//! Aggregate function registry.
//!
//! Maps aggregate names to constructors of fresh [`Accumulator`]s. The
//! analyzer only accepts names from `lakeq_core::functions::AGG_FUNCS`; a
//! name missing here is therefore a defect.

use std::collections::HashMap;

use crate::aggregate::{Accumulator, Any, Avg, Collect, Count, First, Last, MinMax, Sum};

pub struct Registry {
    makers: HashMap<&'static str, fn() -> Box<dyn Accumulator>>,
}

impl Registry {
    pub fn new() -> Self {
        let mut r = Self {
            makers: HashMap::new(),
        };
        r.register("count", || Box::<Count>::default());
        r.register("sum", || Box::<Sum>::default());
        r.register("avg", || Box::<Avg>::default());
        r.register("min", || Box::new(MinMax::min()));
        r.register("max", || Box::new(MinMax::max()));
        r.register("collect", || Box::<Collect>::default());
        r.register("any", || Box::<Any>::default());
        r.register("first", || Box::<First>::default());
        r.register("last", || Box::<Last>::default());
        r
    }

    pub fn register(&mut self, name: &'static str, f: fn() -> Box<dyn Accumulator>) {
        self.makers.insert(name, f);
    }

    pub fn make(&self, name: &str) -> Option<Box<dyn Accumulator>> {
        self.makers.get(name).map(|f| f())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakeq_core::functions::AGG_FUNCS;

    #[test]
    fn every_aggregate_name_is_registered() {
        let r = Registry::new();
        for name in AGG_FUNCS {
            assert!(r.make(name).is_some(), "{name} missing");
        }
        assert!(r.make("median").is_none());
    }
}
