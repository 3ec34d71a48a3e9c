pub mod product;

pub use product::{normalize, NormalizedProduct, ProductType};
