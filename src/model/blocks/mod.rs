pub mod conv;
pub mod l2norm;

pub use conv::{xavier, ConvRelu, ConvSpec};
pub use l2norm::L2Norm;
