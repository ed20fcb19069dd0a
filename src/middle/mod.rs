//! Middle end - node model, stage pipeline and optimizer

pub mod ir;
pub mod ir_printer;
pub mod legacy;
pub mod lower;
pub mod optimize;
pub mod visit;
