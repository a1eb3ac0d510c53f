use crate::error::{PddlError, Result};
use crate::formula::Parameter;
use crate::registry::{Object, Registry};

/// Enumerates every type-respecting argument tuple for a parameter list.
///
/// Tuples are numbered in mixed radix over the per-slot candidate lists,
/// with the leftmost slot varying slowest. Only the slot types are stored;
/// candidate lists are read from the registry at call time, so objects
/// added or removed between calls are reflected immediately.
#[derive(Clone, Debug, Ord, PartialOrd, PartialEq, Eq)]
pub struct ParameterGenerator {
    types: Vec<String>,
}

impl ParameterGenerator {
    pub fn new(params: &[Parameter]) -> Self {
        ParameterGenerator {
            types: params.iter().map(|p| p.typ.clone()).collect(),
        }
    }

    pub fn arity(&self) -> usize {
        self.types.len()
    }

    fn options<'a>(&self, registry: &'a Registry) -> Vec<&'a [Object]> {
        self.types.iter().map(|t| registry.objects_of(t)).collect()
    }

    /// Number of distinct tuples. A parameter list with no slots has
    /// exactly one tuple, the empty one.
    pub fn len(&self, registry: &Registry) -> usize {
        self.options(registry).iter().map(|opts| opts.len()).product()
    }

    pub fn is_empty(&self, registry: &Registry) -> bool {
        self.len(registry) == 0
    }

    /// The `index`-th tuple in enumeration order.
    pub fn at(&self, registry: &Registry, index: usize) -> Result<Vec<Object>> {
        let options = self.options(registry);
        let total: usize = options.iter().map(|opts| opts.len()).product();
        if index >= total {
            return Err(PddlError::InvalidArgument(format!(
                "tuple index {index} out of range for {total} tuples"
            )));
        }
        let sizes = group_sizes(&options);
        Ok(options
            .iter()
            .zip(sizes.iter())
            .map(|(opts, size)| opts[(index / size) % opts.len()].clone())
            .collect())
    }

    /// Inverse of [`at`](Self::at): the enumeration index of `args`.
    pub fn find(&self, registry: &Registry, args: &[Object]) -> Result<usize> {
        if args.len() != self.types.len() {
            return Err(PddlError::ArityMismatch {
                symbol: "argument tuple".to_owned(),
                expected: self.types.len(),
                found: args.len(),
            });
        }
        let options = self.options(registry);
        let sizes = group_sizes(&options);
        let mut index = 0;
        for (slot, arg) in args.iter().enumerate() {
            let at = options[slot]
                .iter()
                .position(|obj| obj.name == arg.name)
                .ok_or_else(|| {
                    PddlError::InvalidArgument(format!(
                        "{} is not a candidate for a {} slot",
                        arg.name, self.types[slot]
                    ))
                })?;
            index += at * sizes[slot];
        }
        Ok(index)
    }

    pub fn tuples<'a>(&self, registry: &'a Registry) -> Tuples<'a> {
        let options = self.options(registry);
        let len = options.iter().map(|opts| opts.len()).product();
        let sizes = group_sizes(&options);
        Tuples {
            options,
            sizes,
            index: 0,
            len,
        }
    }
}

// Radix weights, rightmost slot fastest.
fn group_sizes(options: &[&[Object]]) -> Vec<usize> {
    let mut sizes = vec![1; options.len()];
    for i in (0..options.len().saturating_sub(1)).rev() {
        sizes[i] = sizes[i + 1] * options[i + 1].len();
    }
    sizes
}

/// Iterator over every tuple of a [`ParameterGenerator`], in index order.
pub struct Tuples<'a> {
    options: Vec<&'a [Object]>,
    sizes: Vec<usize>,
    index: usize,
    len: usize,
}

impl<'a> Iterator for Tuples<'a> {
    type Item = Vec<Object>;

    fn next(&mut self) -> Option<Vec<Object>> {
        if self.index >= self.len {
            return None;
        }
        let tuple = self
            .options
            .iter()
            .zip(self.sizes.iter())
            .map(|(opts, size)| opts[(self.index / size) % opts.len()].clone())
            .collect();
        self.index += 1;
        Some(tuple)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.len - self.index;
        (left, Some(left))
    }
}
