/// Splits incoming bytes into lines.
pub(crate) mod lines;
