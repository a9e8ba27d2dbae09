pub mod backbone;
pub mod blocks;
pub mod box_utils;
pub mod head;
pub mod loss;
pub mod neck;
pub mod prior_box;
pub mod ssd;

pub use backbone::Vgg;
pub use head::MultiBoxHead;
pub use loss::MultiBoxLoss;
pub use neck::Extras;
pub use prior_box::PriorBox;
pub use ssd::Ssd;
