/// Newline delimited framing.
pub mod lines;
