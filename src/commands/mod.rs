pub mod eval;
pub mod normalize;
pub mod pairs;
pub mod qrels;
pub mod sweep;
