use crate::descriptor::{Calculation, Operand, ResultDescriptor};
use crate::error::TsError;
use crate::types::{Measurement, Row};

/// Adds one element per calculation to every row.
///
/// Calculations run in insertion order, so later ones can read earlier results. A missing
/// operand reads as NaN. A calculation never replaces an element that is already present.
#[derive(Debug)]
pub struct Compute<I> {
    input: I,
    calculations: Vec<Calculation>,
}

impl<I> Compute<I>
where
    I: Iterator<Item = Result<Row<Measurement>, TsError>>,
{
    pub fn new(descriptor: &ResultDescriptor, input: I) -> Self {
        Self {
            input,
            calculations: descriptor.calculations().to_vec(),
        }
    }

    fn apply(&self, mut row: Row<Measurement>) -> Row<Measurement> {
        for calc in &self.calculations {
            if row.contains(&calc.label) {
                continue;
            }
            let a = operand_value(&row, &calc.left);
            let b = operand_value(&row, &calc.right);
            let m = Measurement::new(
                row.timestamp(),
                row.resource().clone(),
                calc.label.clone(),
                (calc.function)(a, b),
            );
            row.add_element(m);
        }
        row
    }
}

fn operand_value(row: &Row<Measurement>, operand: &Operand) -> f64 {
    match operand {
        Operand::Constant(v) => *v,
        Operand::Label(name) => row.element(name).map_or(f64::NAN, |m| m.value),
    }
}

impl<I> Iterator for Compute<I>
where
    I: Iterator<Item = Result<Row<Measurement>, TsError>>,
{
    type Item = Result<Row<Measurement>, TsError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.input.next().map(|r| r.map(|row| self.apply(row)))
    }
}
