//! Exemplar sampling.
//!
//! An exemplar is a raw measurement retained next to an aggregate, along with the attributes the
//! stream's attribute filter removed from it.
use std::{fmt, sync::Arc};

use rand::Rng;

use crate::attributes::KeyValue;

/// A sampled measurement.
#[derive(Clone, Debug, PartialEq)]
pub struct Exemplar {
    /// Measured value.
    pub value: f64,
    /// Time of the measurement.
    pub time: u64,
    /// Attributes of the measurement that were not kept by the attribute filter.
    pub filtered_attributes: Vec<KeyValue>,
}

/// Storage for exemplars of a single series.
pub trait ExemplarReservoir: Send {
    /// Offers a measurement to the reservoir.
    fn offer(&mut self, value: f64, time: u64, filtered_attributes: &[KeyValue]);

    /// Takes every sampled exemplar, resetting the reservoir.
    fn collect(&mut self) -> Vec<Exemplar>;
}

/// Factory building one reservoir per series.
#[derive(Clone)]
pub struct ExemplarReservoirFactory(Arc<dyn Fn() -> Box<dyn ExemplarReservoir> + Send + Sync>);

impl ExemplarReservoirFactory {
    /// Creates a factory from a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> Box<dyn ExemplarReservoir> + Send + Sync + 'static,
    {
        ExemplarReservoirFactory(Arc::new(f))
    }

    /// Creates a factory of [`FixedSizeReservoir`]s holding up to `size` exemplars each.
    pub fn fixed_size(size: usize) -> Self {
        ExemplarReservoirFactory::new(move || Box::new(FixedSizeReservoir::new(size)))
    }

    pub(crate) fn create(&self) -> Box<dyn ExemplarReservoir> {
        (self.0)()
    }
}

impl fmt::Debug for ExemplarReservoirFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExemplarReservoirFactory")
    }
}

/// A fixed-size sampling reservoir.
///
/// Uses Vitter's ["Algorithm R"][vitter_paper]: the first `size` measurements are kept, and the
/// `n`-th measurement after that replaces a random slot with probability `size / n`.
///
/// [vitter_paper]: https://www.cs.umd.edu/~samir/498/vitter.pdf
#[derive(Debug)]
pub struct FixedSizeReservoir {
    exemplars: Vec<Exemplar>,
    size: usize,
    seen: usize,
}

impl FixedSizeReservoir {
    /// Creates a reservoir holding up to `size` exemplars.
    pub fn new(size: usize) -> Self {
        FixedSizeReservoir { exemplars: Vec::with_capacity(size), size, seen: 0 }
    }
}

impl ExemplarReservoir for FixedSizeReservoir {
    fn offer(&mut self, value: f64, time: u64, filtered_attributes: &[KeyValue]) {
        if self.size == 0 {
            return;
        }

        let idx = self.seen;
        self.seen += 1;

        let exemplar = Exemplar { value, time, filtered_attributes: filtered_attributes.to_vec() };
        if idx < self.size {
            self.exemplars.push(exemplar);
        } else {
            let maybe_idx = rand::rng().random_range(0..=idx);
            if maybe_idx < self.size {
                self.exemplars[maybe_idx] = exemplar;
            }
        }
    }

    fn collect(&mut self) -> Vec<Exemplar> {
        self.seen = 0;
        std::mem::take(&mut self.exemplars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reservoir_fills_then_samples() {
        let mut reservoir = FixedSizeReservoir::new(4);
        for i in 0..3 {
            reservoir.offer(i as f64, i, &[]);
        }
        let exemplars = reservoir.collect();
        assert_eq!(exemplars.len(), 3);
        assert_eq!(exemplars[2].value, 2.0);

        for i in 0..1000 {
            reservoir.offer(i as f64, i, &[KeyValue::new("user", "a")]);
        }
        let exemplars = reservoir.collect();
        assert_eq!(exemplars.len(), 4);
        assert!(exemplars.iter().all(|e| e.value < 1000.0));
        assert!(exemplars.iter().all(|e| e.filtered_attributes.len() == 1));

        assert!(reservoir.collect().is_empty());
    }

    #[test]
    fn test_zero_sized_reservoir() {
        let mut reservoir = FixedSizeReservoir::new(0);
        reservoir.offer(1.0, 1, &[]);
        assert!(reservoir.collect().is_empty());
    }

    #[test]
    fn test_factory() {
        let factory = ExemplarReservoirFactory::fixed_size(1);
        let mut reservoir = factory.create();
        reservoir.offer(7.0, 3, &[]);
        assert_eq!(
            reservoir.collect(),
            vec![Exemplar { value: 7.0, time: 3, filtered_attributes: vec![] }]
        );
    }
}
