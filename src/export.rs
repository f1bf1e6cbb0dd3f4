use crate::descriptor::ResultDescriptor;
use crate::error::TsError;
use crate::types::{Measurement, Row};

/// Projects every row onto the export labels, in order.
///
/// Labels absent from a row are filled with a NaN measurement without attributes, so every
/// output row has the same shape.
#[derive(Debug)]
pub struct Export<I> {
    input: I,
    exports: Vec<String>,
}

impl<I> Export<I>
where
    I: Iterator<Item = Result<Row<Measurement>, TsError>>,
{
    pub fn new(descriptor: &ResultDescriptor, input: I) -> Self {
        Self::with_labels(descriptor.exports().iter().cloned(), input)
    }

    pub fn with_labels(labels: impl IntoIterator<Item = String>, input: I) -> Self {
        Self {
            input,
            exports: labels.into_iter().collect(),
        }
    }

    fn project(&self, row: Row<Measurement>) -> Row<Measurement> {
        let (ts, resource) = (row.timestamp(), row.resource().clone());
        let mut out = Row::with_capacity(ts, resource.clone(), self.exports.len());
        let mut elements: Vec<Option<Measurement>> = row.into_elements().into_iter().map(Some).collect();
        for label in &self.exports {
            let found = elements
                .iter_mut()
                .find(|m| m.as_ref().is_some_and(|m| &m.name == label))
                .and_then(Option::take);
            out.add_element(found.unwrap_or_else(|| {
                Measurement::new(ts, resource.clone(), label.clone(), f64::NAN)
            }));
        }
        out
    }
}

impl<I> Iterator for Export<I>
where
    I: Iterator<Item = Result<Row<Measurement>, TsError>>,
{
    type Item = Result<Row<Measurement>, TsError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.input.next().map(|r| r.map(|row| self.project(row)))
    }
}
