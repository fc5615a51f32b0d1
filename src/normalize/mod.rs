pub mod fields;
pub mod price;
pub mod quantity;
pub mod standardize;
pub mod taxonomy;
